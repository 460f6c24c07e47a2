//! Newline-delimited, one-frame-per-turn framing over the engine pipes.
//!
//! A frame is the payload followed by one [`FRAME_DELIMITER`]. The engine
//! answers every input frame with one frame on each output stream. A frame
//! ends when a read returns bytes whose last byte is the delimiter; delimiter
//! bytes earlier in the accumulator stay part of the frame.

use std::io::ErrorKind;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const FRAME_DELIMITER: u8 = b'\n';
pub const FRAME_READ_CHUNK_BYTES: usize = 1024;
pub const FRAME_READ_BACKOFF: Duration = Duration::from_millis(1);
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("stream closed before frame delimiter ({received} bytes buffered)")]
    Closed { received: usize },
    #[error("stream I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame exceeded {limit} bytes without a delimiter")]
    TooLarge { limit: usize },
}

/// Writes `payload` plus the delimiter as one `write_all`, then flushes.
///
/// `payload` must not contain [`FRAME_DELIMITER`].
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.extend_from_slice(payload);
    frame.push(FRAME_DELIMITER);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads until the last received byte is the delimiter and returns the frame
/// with that one trailing delimiter stripped.
pub async fn read_frame<R>(reader: &mut R, max_frame_bytes: usize) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut frame = Vec::new();
    let mut chunk = [0_u8; FRAME_READ_CHUNK_BYTES];
    loop {
        let read = match reader.read(&mut chunk).await {
            Ok(0) => {
                return Err(FrameError::Closed {
                    received: frame.len(),
                })
            }
            Ok(read) => read,
            Err(error) if is_transient_read_error(&error) => {
                tokio::time::sleep(FRAME_READ_BACKOFF).await;
                continue;
            }
            Err(error) => return Err(FrameError::Io(error)),
        };

        let received = &chunk[..read];
        frame.extend_from_slice(received);
        if received.last() == Some(&FRAME_DELIMITER) {
            frame.pop();
            ensure_within_limit(&frame, max_frame_bytes)?;
            return Ok(frame);
        }
        ensure_within_limit(&frame, max_frame_bytes)?;
    }
}

fn ensure_within_limit(frame: &[u8], max_frame_bytes: usize) -> Result<(), FrameError> {
    if frame.len() > max_frame_bytes {
        return Err(FrameError::TooLarge {
            limit: max_frame_bytes,
        });
    }
    Ok(())
}

fn is_transient_read_error(error: &std::io::Error) -> bool {
    matches!(error.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock)
}
