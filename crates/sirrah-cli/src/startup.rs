//! Wires the engine, coordinator and gateway together for one process run.

use std::sync::Arc;

use anyhow::{Context, Result};
use sirrah_gateway::{run_gateway_server, GatewayServerState};
use sirrah_runtime::{
    EngineProcess, EngineStreams, ExecutionCoordinator, FatalFaultSupervisor, LoopbackEngine,
    LoopbackEngineHandle, MetricsRegistry, MetricsSink, ReadinessController,
};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cli_args::Cli;

/// Keeps the engine alive for the lifetime of the server.
enum EngineGuard {
    Process { exit_watcher: JoinHandle<()> },
    Loopback { handle: LoopbackEngineHandle },
}

impl EngineGuard {
    fn shutdown(self) {
        match self {
            // The watcher owns the child; aborting it drops and kills the engine.
            Self::Process { exit_watcher } => exit_watcher.abort(),
            Self::Loopback { handle } => {
                info!(
                    frames = handle.frames_received(),
                    "stopping loopback engine"
                );
                handle.abort();
            }
        }
    }
}

fn start_engine(cli: &Cli, faults: &FatalFaultSupervisor) -> Result<(EngineStreams, EngineGuard)> {
    if cli.engine_loopback {
        warn!("serving against the in-process loopback engine; no transaction is executed");
        let (handle, streams) = LoopbackEngine::echo()
            .with_max_frame_bytes(cli.max_frame_bytes)
            .spawn();
        return Ok((streams, EngineGuard::Loopback { handle }));
    }

    let config = cli.engine_config();
    let (process, streams) =
        EngineProcess::start(&config).context("failed to start trusted execution engine")?;
    info!(
        command = process.command(),
        pid = ?process.pid(),
        "watching trusted execution engine for exit"
    );
    let exit_watcher = process.watch_exit(faults.clone());
    Ok((streams, EngineGuard::Process { exit_watcher }))
}

fn log_metrics_snapshot(registry: &MetricsRegistry) {
    match serde_json::to_string(&registry.snapshot()) {
        Ok(snapshot) => info!(metrics = snapshot.as_str(), "final metrics snapshot"),
        Err(error) => warn!(error = %error, "failed to render metrics snapshot"),
    }
}

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    let readiness = ReadinessController::new(cli.drain_grace());
    let faults = FatalFaultSupervisor::with_readiness(readiness.clone());
    let registry = Arc::new(MetricsRegistry::new());

    let (streams, engine) = start_engine(&cli, &faults)?;
    let coordinator = Arc::new(ExecutionCoordinator::new(
        streams,
        cli.coordinator_config(),
        faults.clone(),
        Arc::clone(&registry) as Arc<dyn MetricsSink>,
    ));
    let state = GatewayServerState::new(
        cli.gateway_config(),
        coordinator,
        readiness,
        Arc::clone(&registry) as Arc<dyn MetricsSink>,
    );

    let outcome = run_gateway_server(state, faults).await;
    engine.shutdown();
    log_metrics_snapshot(&registry);
    if let Err(error) = &outcome {
        error!(error = format!("{error:#}").as_str(), "sirrah-rpc terminating");
    }
    outcome
}
