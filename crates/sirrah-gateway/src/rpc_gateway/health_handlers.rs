//! Liveness, readiness and drain control handlers.

use super::*;

pub(super) async fn handle_livez() -> StatusCode {
    StatusCode::OK
}

pub(super) async fn handle_readyz(State(state): State<Arc<GatewayServerState>>) -> StatusCode {
    if state.readiness.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Blocks for the drain grace interval on the transition to draining.
pub(super) async fn handle_drain(State(state): State<Arc<GatewayServerState>>) -> StatusCode {
    state.readiness.drain().await;
    StatusCode::OK
}

pub(super) async fn handle_undrain(State(state): State<Arc<GatewayServerState>>) -> StatusCode {
    state.readiness.undrain();
    StatusCode::OK
}
