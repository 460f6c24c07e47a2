//! Gateway server bootstrap and router wiring.

use super::*;

/// Binds `config.bind` and serves until Ctrl-C or a fatal engine fault.
///
/// Returns an error when shutdown was forced by a fatal fault.
pub async fn run_gateway_server(
    state: GatewayServerState,
    faults: FatalFaultSupervisor,
) -> Result<()> {
    let bind_addr = state
        .config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid --bind '{}'", state.config.bind))?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind sirrah gateway on {bind_addr}"))?;
    serve_gateway(listener, Arc::new(state), faults).await
}

pub async fn serve_gateway(
    listener: TcpListener,
    state: Arc<GatewayServerState>,
    faults: FatalFaultSupervisor,
) -> Result<()> {
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound gateway address")?;
    info!(
        addr = %local_addr,
        endpoint = JSON_RPC_ROOT_ENDPOINT,
        method = OFFCHAIN_CALL_METHOD,
        "sirrah gateway listening"
    );

    let app = build_gateway_router(state);
    let shutdown_faults = faults.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received, stopping gateway");
                }
                fault = shutdown_faults.wait() => {
                    error!(error = %fault, "stopping gateway after fatal engine fault");
                }
            }
        })
        .await
        .context("sirrah gateway server exited unexpectedly")?;

    if let Some(fault) = faults.fault() {
        return Err(anyhow::Error::new(fault).context("gateway stopped by fatal engine fault"));
    }
    info!("sirrah gateway stopped");
    Ok(())
}

pub fn build_gateway_router(state: Arc<GatewayServerState>) -> Router {
    let max_request_bytes = state.config.max_request_bytes;
    Router::new()
        .route(JSON_RPC_ROOT_ENDPOINT, post(handle_json_rpc))
        .route(JSON_RPC_API_ENDPOINT, post(handle_json_rpc))
        .route(LIVEZ_ENDPOINT, get(handle_livez))
        .route(READYZ_ENDPOINT, get(handle_readyz))
        .route(DRAIN_ENDPOINT, get(handle_drain).post(handle_drain))
        .route(UNDRAIN_ENDPOINT, get(handle_undrain).post(handle_undrain))
        .layer(DefaultBodyLimit::max(max_request_bytes))
        .with_state(state)
}
