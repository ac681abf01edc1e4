//! The metrics endpoint, driven both through the handler and over a socket.
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::to_bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use serde_json::Value;
use time::UtcOffset;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use hostpulse_agent::collector::Collector;
use hostpulse_agent::error::CollectionError;
use hostpulse_agent::host::{FakeHost, Host};
use hostpulse_agent::http::{metrics_handler, router};
use hostpulse_agent::source::{MetricSource, Platform, PlatformSource};
use hostpulse_agent::state::AppState;
use hostpulse_agent::types::{CpuMetric, DiskMetric, NetworkMetric, RamMetric, ServerInfo};

const GIB: u64 = 1024 * 1024 * 1024;

fn unix_host() -> FakeHost {
    FakeHost::new()
        .with_command("nproc", &[], "4\n")
        .with_load_average(1.0)
        .with_file(
            "/proc/meminfo",
            "MemTotal: 8192000 kB\nMemFree: 1024000 kB\nMemAvailable: 2048000 kB\n",
        )
        .with_disk("/", 200 * GIB, 50 * GIB)
        .with_command(
            "ip",
            &["route", "show", "default"],
            "default via 192.168.1.1 dev wlan0\n",
        )
        .with_file("/sys/class/net/wlan0/statistics/rx_bytes", "100\n")
        .with_file("/sys/class/net/wlan0/statistics/tx_bytes", "200\n")
        .with_env("SERVER_SOFTWARE", "Caddy")
}

fn state_for(source: impl MetricSource + 'static) -> AppState {
    AppState::new(Collector::new(
        Arc::new(source),
        "Linux (test)",
        UtcOffset::UTC,
    ))
}

async fn call(state: AppState) -> (StatusCode, axum::http::HeaderMap, Value) {
    let resp = metrics_handler(State(state)).await;
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, headers, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn snapshot_from_unix_source() {
    let host: Arc<dyn Host> = Arc::new(unix_host());
    let state = state_for(PlatformSource::new(Platform::Unix, host, None));
    let (status, headers, body) = call(state).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers[header::CONTENT_TYPE],
        "application/json; charset=utf-8"
    );
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "GET");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type");

    assert_eq!(body["os"], "Linux (test)");
    assert_eq!(body["time"].as_str().unwrap().len(), 8);
    assert_eq!(body["cpu"]["cores"], 4);
    assert_eq!(body["cpu"]["percentage"], 25.0);
    assert_eq!(body["ram"]["total"], 8000.0);
    assert_eq!(body["ram"]["free"], 2000.0);
    assert_eq!(body["ram"]["percentage"], 75.0);
    assert_eq!(body["disk"]["total"], 200.0);
    assert_eq!(body["disk"]["used"], 150.0);
    assert_eq!(body["network"]["rx_bytes"], 0);
    assert_eq!(body["network"]["interface"], "wlan0");
    assert_eq!(body["server"]["server_software"], "Caddy");
}

#[tokio::test]
async fn missing_probe_data_degrades_only_that_field() {
    // no disk registered, no interface discoverable
    let host: Arc<dyn Host> = Arc::new(
        FakeHost::new()
            .with_command("nproc", &[], "2\n")
            .with_load_average(0.5)
            .with_memory(4 * GIB, GIB),
    );
    let state = state_for(PlatformSource::new(Platform::Unix, host, Some("/data".into())));
    let (status, _, body) = call(state).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["disk"]["error"].as_str().unwrap().contains("/data"));
    assert_eq!(body["cpu"]["percentage"], 25.0);
    assert_eq!(body["ram"]["total"], 4096.0);
    assert_eq!(body["network"]["error"], "No network interface found");
    assert_eq!(body["network"]["rx_mbps"], 0.0);
    assert_eq!(body["server"]["server_software"], "Unknown");
}

struct BrokenServer;

#[async_trait]
impl MetricSource for BrokenServer {
    async fn cpu(&self) -> Result<CpuMetric, CollectionError> {
        Err(CollectionError::Unavailable("unused".into()))
    }
    async fn ram(&self) -> Result<RamMetric, CollectionError> {
        Err(CollectionError::Unavailable("unused".into()))
    }
    async fn disk(&self) -> Result<DiskMetric, CollectionError> {
        Err(CollectionError::Unavailable("unused".into()))
    }
    async fn network(&self) -> Result<NetworkMetric, CollectionError> {
        Ok(NetworkMetric::unavailable("unused"))
    }
    async fn server_info(&self) -> Result<ServerInfo, CollectionError> {
        Err(CollectionError::Unavailable("environment unreadable".into()))
    }
}

#[tokio::test]
async fn fatal_failure_answers_500_with_context() {
    let (status, headers, body) = call(state_for(BrokenServer)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        headers[header::CONTENT_TYPE],
        "application/json; charset=utf-8"
    );
    assert_eq!(body["error"], true);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("environment unreadable"));
    assert!(body["file"].as_str().unwrap().ends_with(".rs"));
    assert!(body["line"].as_u64().is_some());
    assert_eq!(body["os"], "Linux (test)");
    assert_eq!(body["time"].as_str().unwrap().len(), 8);
}

async fn raw_request(addr: std::net::SocketAddr, request: &str) -> String {
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut out = String::new();
    stream.read_to_string(&mut out).await.unwrap();
    out
}

#[tokio::test]
async fn serves_get_on_configured_route_over_tcp() {
    let host: Arc<dyn Host> = Arc::new(unix_host());
    let state = state_for(PlatformSource::new(Platform::Unix, host, None));
    let app = router(state, "/metrics");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    let ok = raw_request(
        addr,
        "GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(ok.starts_with("HTTP/1.1 200"), "{ok}");
    assert!(ok.contains("\"cores\":4"));

    let post = raw_request(
        addr,
        "POST /metrics HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(post.starts_with("HTTP/1.1 405"), "{post}");

    let missing = raw_request(
        addr,
        "GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(missing.starts_with("HTTP/1.1 404"), "{missing}");

    server.abort();
}
