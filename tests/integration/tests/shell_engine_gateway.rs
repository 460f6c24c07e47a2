//! End-to-end gateway runs against a `/bin/sh` stand-in for the enclave engine.
#![cfg(unix)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use sirrah_gateway::{serve_gateway, GatewayServerConfig, GatewayServerState};
use sirrah_runtime::{
    EngineProcess, EngineProcessConfig, EngineStream, ExecutionCoordinator,
    ExecutionCoordinatorConfig, FatalFaultSupervisor, MetricsRegistry, MetricsSink,
    ReadinessController,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Answers each input line on stdout and an empty frame on stderr.
const ECHO_ENGINE_SCRIPT: &str =
    "while IFS= read -r line; do printf '%s\\n' \"$line\"; printf '\\n' 1>&2; done";
/// Reads one frame, writes half an answer, closes stdout and stays alive.
const HANGUP_ENGINE_SCRIPT: &str =
    "IFS= read -r line; printf '0xpartial'; exec 1>&-; exec sleep 30";

struct ShellGateway {
    addr: SocketAddr,
    server: JoinHandle<anyhow::Result<()>>,
    faults: FatalFaultSupervisor,
    readiness: ReadinessController,
    registry: Arc<MetricsRegistry>,
    _exit_watcher: JoinHandle<()>,
}

async fn start_shell_gateway(script: &str) -> ShellGateway {
    let readiness = ReadinessController::new(Duration::from_millis(10));
    let faults = FatalFaultSupervisor::with_readiness(readiness.clone());
    let registry = Arc::new(MetricsRegistry::new());

    let (process, streams) = EngineProcess::start(&EngineProcessConfig {
        command: "/bin/sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        env: BTreeMap::new(),
    })
    .expect("start shell engine");
    let exit_watcher = process.watch_exit(faults.clone());

    let coordinator = Arc::new(ExecutionCoordinator::new(
        streams,
        ExecutionCoordinatorConfig::default(),
        faults.clone(),
        Arc::clone(&registry) as Arc<dyn MetricsSink>,
    ));
    let state = Arc::new(GatewayServerState::new(
        GatewayServerConfig {
            execution_wait_timeout: Duration::from_secs(5),
            ..GatewayServerConfig::default()
        },
        coordinator,
        readiness.clone(),
        Arc::clone(&registry) as Arc<dyn MetricsSink>,
    ));

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral listener");
    let addr = listener.local_addr().expect("resolve listener addr");
    let server = tokio::spawn(serve_gateway(listener, state, faults.clone()));
    tokio::time::sleep(Duration::from_millis(20)).await;

    ShellGateway {
        addr,
        server,
        faults,
        readiness,
        registry,
        _exit_watcher: exit_watcher,
    }
}

async fn offchain_call(client: &Client, addr: SocketAddr, params: &str, id: u64) -> Value {
    client
        .post(format!("http://{addr}/"))
        .json(&json!({
            "jsonrpc": "2.0",
            "method": "suave_offchainCall",
            "params": params,
            "id": id
        }))
        .send()
        .await
        .expect("send offchain call")
        .json::<Value>()
        .await
        .expect("json-rpc response")
}

#[tokio::test]
async fn integration_offchain_call_round_trips_through_shell_engine() {
    let gateway = start_shell_gateway(ECHO_ENGINE_SCRIPT).await;
    let client = Client::new();

    let response = offchain_call(&client, gateway.addr, "0x02c3010203", 1).await;
    assert_eq!(
        response,
        json!({"jsonrpc": "2.0", "result": "0x02c3010203", "id": 1})
    );

    let readyz = client
        .get(format!("http://{}/readyz", gateway.addr))
        .send()
        .await
        .expect("readiness probe");
    assert_eq!(readyz.status(), reqwest::StatusCode::OK);
    assert!(!gateway.faults.is_tripped());

    gateway.server.abort();
}

#[tokio::test]
async fn integration_concurrent_calls_are_serialized_over_real_pipes() {
    let gateway = start_shell_gateway(ECHO_ENGINE_SCRIPT).await;
    let client = Client::new();

    let mut calls = Vec::new();
    for id in 1..=6_u64 {
        let client = client.clone();
        let addr = gateway.addr;
        calls.push(tokio::spawn(async move {
            let params = format!("0x02c301020{id}");
            let response = offchain_call(&client, addr, &params, id).await;
            (params, id, response)
        }));
    }
    for call in calls {
        let (params, id, response) = call.await.expect("call joins");
        assert_eq!(response["id"], id);
        assert_eq!(response["result"], params.as_str());
    }

    let snapshot = gateway.registry.snapshot();
    assert_eq!(snapshot.engine_lock_wait.count, 6);
    assert_eq!(snapshot.request_duration_api.count, 6);
    assert_eq!(snapshot.engine_lock_timeout.count, 0);

    gateway.server.abort();
}

#[tokio::test]
async fn integration_invalid_method_never_reaches_the_engine() {
    let gateway = start_shell_gateway(ECHO_ENGINE_SCRIPT).await;

    let response = Client::new()
        .post(format!("http://{}/api", gateway.addr))
        .json(&json!({"jsonrpc": "2.0", "method": "foo", "params": "0xc0", "id": 5}))
        .send()
        .await
        .expect("send request")
        .json::<Value>()
        .await
        .expect("json body");
    assert_eq!(response["error"]["code"], -32600);
    assert_eq!(
        response["error"]["message"],
        "invalid method, expected suave_offchainCall"
    );
    assert_eq!(response["id"], 5);
    assert_eq!(gateway.registry.snapshot().engine_lock_wait.count, 0);

    gateway.server.abort();
}

#[tokio::test]
async fn integration_engine_closing_primary_stream_shuts_the_gateway_down() {
    let gateway = start_shell_gateway(HANGUP_ENGINE_SCRIPT).await;

    let response = offchain_call(&Client::new(), gateway.addr, "0xc0", 42).await;
    assert_eq!(response["id"], 42);
    let message = response["error"]["message"].as_str().expect("message");
    assert!(
        message.starts_with("could not execute: engine primary stream fault"),
        "{message}"
    );

    let outcome = tokio::time::timeout(Duration::from_secs(5), gateway.server)
        .await
        .expect("gateway stops after fatal fault")
        .expect("server task joins");
    assert!(outcome.is_err());

    let fault = gateway.faults.fault().expect("fault recorded");
    assert_eq!(fault.stream, EngineStream::Primary);
    assert_eq!(gateway.faults.trip_count(), 1);
    assert!(!gateway.readiness.is_ready());
}

#[tokio::test]
async fn integration_engine_exit_before_any_request_shuts_the_gateway_down() {
    let gateway = start_shell_gateway("exit 7").await;

    let outcome = tokio::time::timeout(Duration::from_secs(5), gateway.server)
        .await
        .expect("gateway stops after engine exit")
        .expect("server task joins");
    let error = outcome.expect_err("engine exit is fatal");
    assert!(format!("{error:#}").contains("exited"));

    let fault = gateway.faults.fault().expect("fault recorded");
    assert_eq!(fault.stream, EngineStream::Process);
    assert!(!gateway.readiness.is_ready());
}
