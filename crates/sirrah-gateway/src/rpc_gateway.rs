use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::Value;
use sirrah_runtime::{
    duration_us, ExecutionCoordinator, FatalFaultSupervisor, MetricEvent, MetricsSink,
    ReadinessController,
};
use tokio::net::TcpListener;
use tokio::time::Instant;
use tracing::{error, info, warn};

mod endpoints;
mod health_handlers;
mod server_bootstrap;
mod transaction;
mod types;

use endpoints::{
    DRAIN_ENDPOINT, JSON_RPC_API_ENDPOINT, JSON_RPC_ROOT_ENDPOINT, LIVEZ_ENDPOINT,
    READYZ_ENDPOINT, UNDRAIN_ENDPOINT,
};
use health_handlers::{handle_drain, handle_livez, handle_readyz, handle_undrain};
pub use server_bootstrap::{build_gateway_router, run_gateway_server, serve_gateway};
pub use transaction::{
    decode_transaction_params, EncodedTransaction, TransactionDecodeError, TransactionKind,
};
pub use types::{
    JsonRpcErrorObject, JsonRpcErrorResponse, JsonRpcRequest, JsonRpcSuccessResponse,
    RpcGatewayError, JSON_RPC_INVALID_REQUEST_CODE, JSON_RPC_VERSION, OFFCHAIN_CALL_METHOD,
};

pub const DEFAULT_GATEWAY_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_EXECUTION_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayServerConfig {
    pub bind: String,
    /// Upper bound on how long a request may wait for the engine.
    pub execution_wait_timeout: Duration,
    pub max_request_bytes: usize,
}

impl Default for GatewayServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_GATEWAY_BIND.to_string(),
            execution_wait_timeout: DEFAULT_EXECUTION_WAIT_TIMEOUT,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }
}

/// Everything a request handler needs. The engine coordinator and readiness
/// controller are injected so tests can swap in a loopback engine.
pub struct GatewayServerState {
    config: GatewayServerConfig,
    coordinator: Arc<ExecutionCoordinator>,
    readiness: ReadinessController,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for GatewayServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayServerState")
            .field("config", &self.config)
            .field("coordinator", &self.coordinator)
            .field("readiness", &self.readiness)
            .finish_non_exhaustive()
    }
}

impl GatewayServerState {
    pub fn new(
        config: GatewayServerConfig,
        coordinator: Arc<ExecutionCoordinator>,
        readiness: ReadinessController,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            config,
            coordinator,
            readiness,
            metrics,
        }
    }

}

/// Records the request duration when dropped, including when the client
/// disconnects and the handler future is cancelled.
struct RequestDurationTimer {
    started: Instant,
    metrics: Arc<dyn MetricsSink>,
}

impl RequestDurationTimer {
    fn start(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            started: Instant::now(),
            metrics,
        }
    }
}

impl Drop for RequestDurationTimer {
    fn drop(&mut self) {
        self.metrics.record(MetricEvent::RequestDuration {
            duration_us: duration_us(self.started.elapsed()),
        });
    }
}

async fn handle_json_rpc(State(state): State<Arc<GatewayServerState>>, body: Bytes) -> Response {
    let _timer = RequestDurationTimer::start(Arc::clone(&state.metrics));

    let request = match serde_json::from_slice::<JsonRpcRequest>(&body) {
        Ok(request) => request,
        Err(parse_error) => {
            let error = RpcGatewayError::InvalidEnvelope(parse_error);
            warn!(error = %error, "rejected json-rpc request");
            return JsonRpcErrorResponse::unparsed(&error).into_response();
        }
    };

    match execute_offchain_call(&state, &request).await {
        Ok(result) => JsonRpcSuccessResponse::for_request(&request, result).into_response(),
        Err(error) => JsonRpcErrorResponse::for_request(&request, &error).into_response(),
    }
}

async fn execute_offchain_call(
    state: &GatewayServerState,
    request: &JsonRpcRequest,
) -> Result<Value, RpcGatewayError> {
    if request.method != OFFCHAIN_CALL_METHOD {
        warn!(method = request.method.as_str(), "unsupported json-rpc method");
        return Err(RpcGatewayError::InvalidMethod {
            method: request.method.clone(),
        });
    }

    let transaction = decode_transaction_params(&request.params).map_err(|error| {
        warn!(error = %error, "could not decode transaction params");
        RpcGatewayError::from(error)
    })?;

    let deadline = Instant::now() + state.config.execution_wait_timeout;
    let output = state
        .coordinator
        .run(transaction.into_bytes(), deadline)
        .await
        .map_err(|error| {
            error!(error = %error, fatal = error.is_fatal(), "could not execute offchain call");
            RpcGatewayError::from(error)
        })?;

    if !output.diagnostic.is_empty() {
        info!(
            diagnostic = %String::from_utf8_lossy(&output.diagnostic),
            "engine reported diagnostic output"
        );
    }
    Ok(render_primary_output(&output.primary))
}

/// UTF-8 output is returned as a string, anything else as `0x` hex.
fn render_primary_output(primary: &[u8]) -> Value {
    match std::str::from_utf8(primary) {
        Ok(text) => Value::String(text.to_string()),
        Err(_) => Value::String(format!("0x{}", hex::encode(primary))),
    }
}
