//! Engine subprocess supervision: spawn once, hand out the raw pipes.

use std::collections::BTreeMap;
use std::process::Stdio;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::fatal_fault::{ChannelFault, EngineStream, FatalFaultSupervisor};

pub const DEFAULT_ENGINE_COMMAND: &str = "gramine-sgx";
pub const DEFAULT_ENGINE_ARGS: &[&str] = &["./sgx-revm"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineProcessConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl Default for EngineProcessConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_ENGINE_COMMAND.to_string(),
            args: DEFAULT_ENGINE_ARGS
                .iter()
                .map(|arg| arg.to_string())
                .collect(),
            env: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineStartError {
    #[error("engine command must be non-empty")]
    EmptyCommand,
    #[error("failed to spawn engine process '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("engine process {0} pipe was not captured")]
    MissingPipe(EngineStream),
}

/// The three byte streams of a running engine. No framing, no buffering.
pub struct EngineStreams {
    pub input: Box<dyn AsyncWrite + Send + Unpin>,
    pub primary: Box<dyn AsyncRead + Send + Unpin>,
    pub diagnostic: Box<dyn AsyncRead + Send + Unpin>,
}

impl EngineStreams {
    pub fn new<I, P, D>(input: I, primary: P, diagnostic: D) -> Self
    where
        I: AsyncWrite + Send + Unpin + 'static,
        P: AsyncRead + Send + Unpin + 'static,
        D: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            input: Box::new(input),
            primary: Box::new(primary),
            diagnostic: Box::new(diagnostic),
        }
    }
}

impl std::fmt::Debug for EngineStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineStreams").finish_non_exhaustive()
    }
}

/// Owns the engine child process. The child is killed when this is dropped.
#[derive(Debug)]
pub struct EngineProcess {
    child: Child,
    command: String,
}

impl EngineProcess {
    /// Spawns the engine with all three stdio handles piped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: &EngineProcessConfig) -> Result<(Self, EngineStreams), EngineStartError> {
        let command_name = config.command.trim();
        if command_name.is_empty() {
            return Err(EngineStartError::EmptyCommand);
        }

        let mut command = Command::new(command_name);
        command
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| EngineStartError::Spawn {
            command: command_name.to_string(),
            source,
        })?;
        let input = child
            .stdin
            .take()
            .ok_or(EngineStartError::MissingPipe(EngineStream::Input))?;
        let primary = child
            .stdout
            .take()
            .ok_or(EngineStartError::MissingPipe(EngineStream::Primary))?;
        let diagnostic = child
            .stderr
            .take()
            .ok_or(EngineStartError::MissingPipe(EngineStream::Diagnostic))?;

        info!(
            command = command_name,
            args = ?config.args,
            pid = ?child.id(),
            "engine process started"
        );
        Ok((
            Self {
                child,
                command: command_name.to_string(),
            },
            EngineStreams::new(input, primary, diagnostic),
        ))
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Trips `faults` once the engine exits for any reason.
    pub fn watch_exit(mut self, faults: FatalFaultSupervisor) -> JoinHandle<()> {
        tokio::spawn(async move {
            let detail = match self.child.wait().await {
                Ok(status) => format!("engine process '{}' exited with {status}", self.command),
                Err(error) => format!("failed to wait for engine process '{}': {error}", self.command),
            };
            warn!(detail = detail.as_str(), "engine process is gone");
            faults.trip(ChannelFault::new(EngineStream::Process, detail));
        })
    }
}
