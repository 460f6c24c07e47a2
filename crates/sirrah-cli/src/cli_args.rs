use std::collections::BTreeMap;
use std::time::Duration;

use clap::{ArgAction, Parser};
use sirrah_gateway::GatewayServerConfig;
use sirrah_runtime::{EngineProcessConfig, ExecutionCoordinatorConfig};

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "sirrah-rpc",
    about = "JSON-RPC gateway serializing offchain calls into a trusted execution engine",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long,
        env = "SIRRAH_BIND",
        default_value = "0.0.0.0:8080",
        help = "Socket address the JSON-RPC and health endpoints listen on"
    )]
    pub bind: String,

    #[arg(
        long = "engine-command",
        env = "SIRRAH_ENGINE_COMMAND",
        default_value = "gramine-sgx",
        help = "Executable that launches the trusted execution engine"
    )]
    pub engine_command: String,

    #[arg(
        long = "engine-arg",
        env = "SIRRAH_ENGINE_ARGS",
        value_delimiter = ',',
        default_value = "./sgx-revm",
        allow_hyphen_values = true,
        help = "Argument passed to the engine command. Repeatable or comma-delimited."
    )]
    pub engine_args: Vec<String>,

    #[arg(
        long = "engine-loopback",
        env = "SIRRAH_ENGINE_LOOPBACK",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Serve against an in-process echo engine instead of spawning the engine command"
    )]
    pub engine_loopback: bool,

    #[arg(
        long = "execution-wait-timeout-ms",
        env = "SIRRAH_EXECUTION_WAIT_TIMEOUT_MS",
        default_value_t = 30_000,
        value_parser = parse_positive_u64,
        help = "Maximum time a request waits for the engine before failing"
    )]
    pub execution_wait_timeout_ms: u64,

    #[arg(
        long = "drain-grace-ms",
        env = "SIRRAH_DRAIN_GRACE_MS",
        default_value_t = 15_000,
        value_parser = parse_positive_u64,
        help = "How long /drain holds the caller after marking the server not ready"
    )]
    pub drain_grace_ms: u64,

    #[arg(
        long = "max-frame-bytes",
        env = "SIRRAH_MAX_FRAME_BYTES",
        default_value_t = 16 * 1024 * 1024,
        value_parser = parse_positive_usize,
        help = "Largest engine output frame accepted before the channel is declared corrupt"
    )]
    pub max_frame_bytes: usize,

    #[arg(
        long = "max-request-bytes",
        env = "SIRRAH_MAX_REQUEST_BYTES",
        default_value_t = 1024 * 1024,
        value_parser = parse_positive_usize,
        help = "Largest JSON-RPC request body accepted by the router"
    )]
    pub max_request_bytes: usize,
}

impl Cli {
    pub(crate) fn gateway_config(&self) -> GatewayServerConfig {
        GatewayServerConfig {
            bind: self.bind.clone(),
            execution_wait_timeout: Duration::from_millis(self.execution_wait_timeout_ms),
            max_request_bytes: self.max_request_bytes,
        }
    }

    pub(crate) fn engine_config(&self) -> EngineProcessConfig {
        EngineProcessConfig {
            command: self.engine_command.clone(),
            args: self
                .engine_args
                .iter()
                .map(|arg| arg.trim())
                .filter(|arg| !arg.is_empty())
                .map(str::to_string)
                .collect(),
            env: BTreeMap::new(),
        }
    }

    pub(crate) fn coordinator_config(&self) -> ExecutionCoordinatorConfig {
        ExecutionCoordinatorConfig {
            max_frame_bytes: self.max_frame_bytes,
        }
    }

    pub(crate) fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_cli_defaults_match_the_enclave_deployment() {
        let cli = Cli::parse_from(["sirrah-rpc"]);
        assert_eq!(cli.bind, "0.0.0.0:8080");
        assert!(!cli.engine_loopback);

        let engine = cli.engine_config();
        assert_eq!(engine.command, "gramine-sgx");
        assert_eq!(engine.args, vec!["./sgx-revm".to_string()]);

        let gateway = cli.gateway_config();
        assert_eq!(gateway.execution_wait_timeout, Duration::from_secs(30));
        assert_eq!(gateway.max_request_bytes, 1024 * 1024);
        assert_eq!(cli.coordinator_config().max_frame_bytes, 16 * 1024 * 1024);
        assert_eq!(cli.drain_grace(), Duration::from_secs(15));
    }

    #[test]
    fn functional_engine_args_accept_repeats_and_commas() {
        let cli = Cli::parse_from([
            "sirrah-rpc",
            "--engine-command",
            "/usr/bin/env",
            "--engine-arg",
            "gramine-direct,./sgx-revm",
            "--engine-arg=--verbose",
        ]);
        assert_eq!(
            cli.engine_config().args,
            vec![
                "gramine-direct".to_string(),
                "./sgx-revm".to_string(),
                "--verbose".to_string()
            ]
        );
    }

    #[test]
    fn functional_engine_loopback_flag_forms() {
        let bare = Cli::parse_from(["sirrah-rpc", "--engine-loopback"]);
        assert!(bare.engine_loopback);
        let explicit = Cli::parse_from(["sirrah-rpc", "--engine-loopback=false"]);
        assert!(!explicit.engine_loopback);
    }

    #[test]
    fn regression_zero_durations_and_limits_are_rejected() {
        for flag in [
            "--execution-wait-timeout-ms",
            "--drain-grace-ms",
            "--max-frame-bytes",
            "--max-request-bytes",
        ] {
            let error = Cli::try_parse_from(["sirrah-rpc", flag, "0"])
                .expect_err("zero should be rejected");
            assert!(
                error.to_string().contains("value must be greater than 0"),
                "{flag}: {error}"
            );
        }
    }
}
