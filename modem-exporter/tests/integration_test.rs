//! Integration tests for the modem exporter.
//!
//! These tests drive the poller, registry and HTTP endpoint together, with a
//! scripted status source or a fake modem standing in for real hardware.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use modem_exporter::config::{ExporterConfig, ModemConfig, PollConfig};
use modem_exporter::parser::zte;
use modem_exporter::snapshot::{DeviceInfo, Sample};
use modem_exporter::{
    ClientError, DeviceFamily, Exposition, HttpServer, MetricRegistry, ModemClient, Poller,
    RawPayload, RenderOptions, SharedRegistry, Stat, StatSnapshot, StatusSource,
};

const ZTE_STATUS: &str = include_str!("fixtures/zte_status.json");
const HILINK_INFORMATION: &str = include_str!("fixtures/hilink_information.xml");
const HILINK_SIGNAL: &str = include_str!("fixtures/hilink_signal.xml");
const HILINK_TRAFFIC: &str = include_str!("fixtures/hilink_traffic.xml");

/// ZTE status document reporting the given SNR.
fn zte_payload(snr: f64) -> RawPayload {
    let mut status: serde_json::Value = serde_json::from_str(ZTE_STATUS).unwrap();
    status["lte_snr"] = serde_json::Value::from(snr.to_string());
    RawPayload::new(DeviceFamily::ZteGoform, Utc::now()).with_section(zte::STATUS, status.to_string())
}

/// Status source that replays a fixed script.
struct Scripted {
    script: VecDeque<Result<RawPayload, ClientError>>,
}

#[async_trait]
impl StatusSource for Scripted {
    async fn fetch_status(&mut self) -> Result<RawPayload, ClientError> {
        self.script
            .pop_front()
            .unwrap_or_else(|| Err(ClientError::Unreachable("script exhausted".into())))
    }
}

/// Value of the first sample line for `name`.
fn sample_value(document: &str, name: &str) -> Option<f64> {
    document
        .lines()
        .filter(|line| !line.starts_with('#'))
        .find(|line| {
            line.strip_prefix(name)
                .is_some_and(|rest| rest.starts_with(' ') || rest.starts_with('{'))
        })
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|value| value.parse().ok())
}

fn poll_config() -> PollConfig {
    PollConfig {
        interval_secs: 1,
        max_backoff_secs: 8,
        request_timeout_ms: 500,
        retry_attempts: 0,
        retry_delay_ms: 10,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_failures_keep_last_good_snapshot() {
    let registry: SharedRegistry = Arc::new(MetricRegistry::new());
    let exposition = Exposition::new(registry.clone(), RenderOptions::default());

    let script = VecDeque::from(vec![
        Ok(zte_payload(5.0)),
        Ok(zte_payload(6.5)),
        Err(ClientError::Unreachable("connection refused".into())),
        Ok(RawPayload::new(DeviceFamily::ZteGoform, Utc::now())
            .with_section(zte::STATUS, "<html>busy</html>")),
        Err(ClientError::UpstreamError(503)),
        Ok(zte_payload(9.0)),
    ]);
    let mut poller = Poller::new(Scripted { script }, registry.clone(), &poll_config());

    let mut observed = Vec::new();
    for _ in 0..6 {
        poller.poll_once().await;
        let document = exposition.handle_scrape().into_string();
        observed.push((
            sample_value(&document, "exporter_consecutive_failures").unwrap(),
            sample_value(&document, "exporter_up").unwrap(),
            sample_value(&document, "modem_snr_db").unwrap(),
        ));
    }

    assert_eq!(
        observed,
        vec![
            (0.0, 1.0, 5.0),
            (0.0, 1.0, 6.5),
            (1.0, 0.0, 6.5),
            (2.0, 0.0, 6.5),
            (3.0, 0.0, 6.5),
            (0.0, 1.0, 9.0),
        ]
    );

    let state = registry.read();
    assert_eq!(state.health().successes_total, 3);
    assert_eq!(state.health().failures_total, 3);
    assert_eq!(
        state.health().last_error.as_ref().unwrap().kind,
        "upstream_error"
    );
}

#[tokio::test]
async fn test_scrape_before_first_success() {
    let registry: SharedRegistry = Arc::new(MetricRegistry::new());
    let exposition = Exposition::new(registry.clone(), RenderOptions::default());
    let mut poller = Poller::new(
        Scripted {
            script: VecDeque::from(vec![Err(ClientError::AuthFailed("HTTP 401".into()))]),
        },
        registry,
        &poll_config(),
    );

    let document = exposition.handle_scrape();
    assert!(document.as_str().contains("exporter_up 0\n"));
    assert!(!document.contains_metric("modem_device_info"));

    poller.poll_once().await;

    let document = exposition.handle_scrape();
    let text = document.as_str();
    assert!(text.contains("exporter_up 0\n"));
    assert!(text.contains("exporter_consecutive_failures 1\n"));
    assert!(text.contains("exporter_last_error_info{error=\"auth_failed\"} 1\n"));
    assert!(!text.lines().any(|l| l.starts_with("modem_")));
}

/// Snapshot whose every value, and capture second, encodes `generation`.
fn generation_snapshot(generation: i64) -> StatSnapshot {
    let value = generation as f64;
    StatSnapshot::new(
        DeviceFamily::ArrisSurfboard,
        Utc.timestamp_opt(1_700_000_000 + generation, 0).unwrap(),
        DeviceInfo {
            model: "SB8200".into(),
            firmware: format!("fw-{}", generation),
        },
        vec![
            Sample::new(Stat::ConnectionUptime, value),
            Sample::new(Stat::Snr, value).with_label("channel", "1"),
            Sample::new(Stat::Snr, value).with_label("channel", "2"),
            Sample::new(Stat::CorrectedCodewords, value).with_label("channel", "1"),
        ],
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_scrapes_are_consistent() {
    let registry: SharedRegistry = Arc::new(MetricRegistry::new());
    registry.update(generation_snapshot(0));
    let exposition = Exposition::new(registry.clone(), RenderOptions::default());

    let writer = {
        let registry = registry.clone();
        tokio::spawn(async move {
            for generation in 1..=500 {
                registry.update(generation_snapshot(generation));
                tokio::task::yield_now().await;
            }
        })
    };

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let exposition = exposition.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    let document = exposition.handle_scrape().into_string();
                    let generation =
                        sample_value(&document, "modem_snapshot_timestamp_seconds").unwrap()
                            - 1_700_000_000.0;

                    for line in document.lines().filter(|l| l.starts_with("modem_")) {
                        if line.starts_with("modem_snapshot_timestamp_seconds") {
                            continue;
                        }
                        if line.starts_with("modem_device_info") {
                            assert!(line.contains(&format!("firmware=\"fw-{}\"", generation)));
                            continue;
                        }
                        let value: f64 = line.rsplit(' ').next().unwrap().parse().unwrap();
                        assert_eq!(value, generation, "torn line: {}", line);
                    }
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
}

#[tokio::test]
async fn test_http_server_serves_registry() {
    let registry: SharedRegistry = Arc::new(MetricRegistry::new());
    let exposition = Exposition::new(registry.clone(), RenderOptions::default());
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = HttpServer::new(exposition, addr, "/metrics".to_string())
        .bind()
        .await
        .unwrap();
    let actual_addr = server.local_addr();
    let server_handle = tokio::spawn(server.run(shutdown_rx));

    let client = reqwest::Client::new();

    let ready = client
        .get(format!("http://{}/ready", actual_addr))
        .send()
        .await
        .unwrap();
    assert_eq!(ready.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    registry.update(generation_snapshot(3));

    let response = client
        .get(format!("http://{}/metrics", actual_addr))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body = response.text().await.unwrap();
    assert!(body.contains("modem_snr_db{channel=\"2\"} 3\n"));
    assert!(body.contains("exporter_up 1\n"));

    let ready = client
        .get(format!("http://{}/ready", actual_addr))
        .send()
        .await
        .unwrap();
    assert_eq!(ready.status(), reqwest::StatusCode::OK);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server_handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_hung_modem_reported_unreachable() {
    let modem = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&modem)
        .await;

    let config = ExporterConfig {
        modem: ModemConfig {
            family: DeviceFamily::HuaweiHilink,
            base_url: modem.uri(),
            ..Default::default()
        },
        poll: PollConfig {
            interval_secs: 2,
            max_backoff_secs: 8,
            request_timeout_ms: 200,
            retry_attempts: 2,
            retry_delay_ms: 20,
            ..Default::default()
        },
        ..Default::default()
    };
    config.validate().unwrap();

    let registry: SharedRegistry = Arc::new(MetricRegistry::new());
    let client = ModemClient::new(&config.modem, &config.poll).unwrap();
    let mut poller = Poller::new(client, registry.clone(), &config.poll);

    let delay = poller.poll_once().await;

    assert_eq!(delay, Duration::from_secs(4));
    let state = registry.read();
    let last_error = state.health().last_error.as_ref().unwrap();
    assert_eq!(last_error.kind, "unreachable");
    assert!(last_error.message.contains("timed out"));
    assert!(state.health().last_poll_duration.unwrap() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_end_to_end_with_fake_modem() {
    let modem = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/webserver/SesTokInfo"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<response><SesInfo>SessionID=abc</SesInfo><TokInfo>tok</TokInfo></response>",
        ))
        .mount(&modem)
        .await;
    for (endpoint, body) in [
        ("/api/device/information", HILINK_INFORMATION),
        ("/api/device/signal", HILINK_SIGNAL),
        ("/api/monitoring/traffic-statistics", HILINK_TRAFFIC),
    ] {
        Mock::given(method("GET"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&modem)
            .await;
    }

    let modem_config = ModemConfig {
        family: DeviceFamily::HuaweiHilink,
        base_url: modem.uri(),
        ..Default::default()
    };
    let poll = PollConfig {
        interval_secs: 60,
        max_backoff_secs: 60,
        ..poll_config()
    };

    let registry: SharedRegistry = Arc::new(MetricRegistry::new());
    let client = ModemClient::new(&modem_config, &poll).unwrap();
    let poller = Poller::new(client, registry.clone(), &poll);
    let server = HttpServer::new(
        Exposition::new(registry.clone(), RenderOptions::default()),
        "127.0.0.1:0".parse().unwrap(),
        "/metrics".to_string(),
    )
    .bind()
    .await
    .unwrap();
    let addr = server.local_addr();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller_task = tokio::spawn(poller.run(shutdown_rx.clone()));
    let server_task = tokio::spawn(server.run(shutdown_rx));

    let http = reqwest::Client::new();
    let ready = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = http
                .get(format!("http://{}/ready", addr))
                .send()
                .await
                .map(|r| r.status());
            if matches!(status, Ok(s) if s.is_success()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(ready.is_ok(), "exporter never became ready");

    let body = http
        .get(format!("http://{}/metrics", addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert_eq!(sample_value(&body, "modem_rsrp_dbm"), Some(-98.0));
    assert_eq!(
        sample_value(&body, "modem_downlink_rate_bytes_per_second"),
        Some(48213.0)
    );
    assert!(body.contains("model=\"E3372h-320\""));
    assert!(body.contains("exporter_up 1\n"));

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        poller_task.await.unwrap();
        server_task.await.unwrap().unwrap();
    })
    .await
    .unwrap();
}
