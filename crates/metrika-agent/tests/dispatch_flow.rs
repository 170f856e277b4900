use anyhow::Result;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::routing::post;
use axum::Router;
use metrika_agent::config::AgentConfig;
use metrika_agent::dispatch::{DispatchSummary, Dispatcher};
use metrika_agent::scheduler::Scheduler;
use metrika_agent::store::LocalStore;
use metrika_collector::{Collector, Sample};
use metrika_common::codec;
use metrika_common::retry::RetryPolicy;
use metrika_common::signature::{Signer, HASH_HEADER};
use metrika_common::types::{Metrics, Snapshot};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct Captured {
    path: String,
    content_encoding: Option<String>,
    hash: Option<String>,
    raw: Vec<u8>,
    json: Vec<u8>,
}

#[derive(Clone, Default)]
struct Recorder {
    requests: Arc<Mutex<Vec<Captured>>>,
    /// Status codes to answer with, front first; 200 once exhausted.
    script: Arc<Mutex<Vec<StatusCode>>>,
}

impl Recorder {
    fn captured(&self) -> Vec<Captured> {
        self.requests.lock().unwrap().clone()
    }
}

async fn capture(
    State(recorder): State<Recorder>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let json = codec::gunzip(&body).unwrap_or_default();
    recorder.requests.lock().unwrap().push(Captured {
        path: uri.path().to_string(),
        content_encoding: header("content-encoding"),
        hash: header(HASH_HEADER),
        raw: body.to_vec(),
        json,
    });
    let mut script = recorder.script.lock().unwrap();
    if script.is_empty() {
        StatusCode::OK
    } else {
        script.remove(0)
    }
}

async fn spawn_server(recorder: Recorder) -> Result<SocketAddr> {
    let app = Router::new()
        .route("/update/", post(capture))
        .route("/updates/", post(capture))
        .with_state(recorder);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(addr)
}

fn agent_config(addr: SocketAddr) -> AgentConfig {
    AgentConfig {
        address: addr.to_string(),
        poll_interval: Duration::from_millis(20),
        report_interval: Duration::from_millis(60),
        key: None,
        rate_limit: 0,
        batch: false,
    }
}

fn sample_snapshot() -> Snapshot {
    let mut snapshot = Snapshot::default();
    snapshot.apply_gauge("Alloc", 1024.0);
    snapshot.apply_gauge("HeapSys", 2048.0);
    snapshot.apply_gauge("RandomValue", 0.5);
    snapshot.apply_counter("PollCount", 3);
    snapshot
}

#[tokio::test]
async fn per_metric_requests_are_gzipped_json() -> Result<()> {
    let recorder = Recorder::default();
    let addr = spawn_server(recorder.clone()).await?;
    let mut config = agent_config(addr);
    config.rate_limit = 2;

    let dispatcher = Dispatcher::new(&config)?.with_policy(RetryPolicy::immediate(3));
    let summary = dispatcher.send_report(&sample_snapshot()).await;
    assert_eq!(summary, DispatchSummary { sent: 4, failed: 0 });

    let captured = recorder.captured();
    assert_eq!(captured.len(), 4);
    let mut received: Vec<Metrics> = captured
        .iter()
        .map(|c| {
            assert_eq!(c.path, "/update/");
            assert_eq!(c.content_encoding.as_deref(), Some("gzip"));
            assert!(c.hash.is_none());
            serde_json::from_slice(&c.json).unwrap()
        })
        .collect();
    received.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(received[0], Metrics::gauge("Alloc", 1024.0));
    assert_eq!(received[2], Metrics::counter("PollCount", 3));
    Ok(())
}

#[tokio::test]
async fn signed_requests_carry_tag_over_compressed_body() -> Result<()> {
    let recorder = Recorder::default();
    let addr = spawn_server(recorder.clone()).await?;
    let mut config = agent_config(addr);
    config.key = Some("shared-secret".to_string());

    let dispatcher = Dispatcher::new(&config)?.with_policy(RetryPolicy::immediate(3));
    dispatcher
        .send_metric(&Metrics::gauge("Alloc", 1.0))
        .await?;

    let captured = recorder.captured();
    assert_eq!(captured.len(), 1);
    let signer = Signer::new("shared-secret")?;
    let tag = captured[0].hash.clone().expect("signed request");
    assert_eq!(tag, signer.sign(&captured[0].raw)?);
    Ok(())
}

#[tokio::test]
async fn batch_mode_sends_one_array() -> Result<()> {
    let recorder = Recorder::default();
    let addr = spawn_server(recorder.clone()).await?;
    let mut config = agent_config(addr);
    config.batch = true;

    let dispatcher = Dispatcher::new(&config)?.with_policy(RetryPolicy::immediate(3));
    let summary = dispatcher.deliver(&sample_snapshot()).await;
    assert_eq!(summary, DispatchSummary { sent: 4, failed: 0 });

    let captured = recorder.captured();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].path, "/updates/");
    let items: Vec<Metrics> = serde_json::from_slice(&captured[0].json)?;
    assert_eq!(items.len(), 4);
    Ok(())
}

#[tokio::test]
async fn failed_send_is_retried_blindly() -> Result<()> {
    let recorder = Recorder::default();
    *recorder.script.lock().unwrap() =
        vec![StatusCode::INTERNAL_SERVER_ERROR, StatusCode::BAD_REQUEST];
    let addr = spawn_server(recorder.clone()).await?;

    let dispatcher =
        Dispatcher::new(&agent_config(addr))?.with_policy(RetryPolicy::immediate(3));
    dispatcher
        .send_metric(&Metrics::counter("PollCount", 1))
        .await?;
    assert_eq!(recorder.captured().len(), 3);
    Ok(())
}

#[tokio::test]
async fn send_is_dropped_after_three_attempts() -> Result<()> {
    let recorder = Recorder::default();
    *recorder.script.lock().unwrap() = vec![StatusCode::BAD_REQUEST; 5];
    let addr = spawn_server(recorder.clone()).await?;

    let dispatcher =
        Dispatcher::new(&agent_config(addr))?.with_policy(RetryPolicy::immediate(3));
    let mut snapshot = Snapshot::default();
    snapshot.apply_counter("PollCount", 1);
    let summary = dispatcher.send_report(&snapshot).await;
    assert_eq!(summary, DispatchSummary { sent: 0, failed: 1 });
    assert_eq!(recorder.captured().len(), 3);
    Ok(())
}

#[tokio::test]
async fn empty_snapshot_sends_nothing() -> Result<()> {
    let recorder = Recorder::default();
    let addr = spawn_server(recorder.clone()).await?;
    let dispatcher = Dispatcher::new(&agent_config(addr))?;
    assert_eq!(
        dispatcher.send_report(&Snapshot::default()).await,
        DispatchSummary::default()
    );
    dispatcher.send_batch(&Snapshot::default()).await?;
    assert!(recorder.captured().is_empty());
    Ok(())
}

struct FixedCollector;

impl Collector for FixedCollector {
    fn name(&self) -> &str {
        "fixed"
    }

    fn collect(&mut self) -> anyhow::Result<Vec<Sample>> {
        Ok(vec![
            Sample::gauge("Alloc", 42.0),
            Sample::counter("PollCount", 1),
        ])
    }
}

struct BrokenCollector;

impl Collector for BrokenCollector {
    fn name(&self) -> &str {
        "broken"
    }

    fn collect(&mut self) -> anyhow::Result<Vec<Sample>> {
        anyhow::bail!("sensor unavailable")
    }
}

#[tokio::test]
async fn scheduler_polls_reports_and_stops() -> Result<()> {
    let recorder = Recorder::default();
    let addr = spawn_server(recorder.clone()).await?;
    let config = agent_config(addr);
    let dispatcher = Dispatcher::new(&config)?.with_policy(RetryPolicy::immediate(3));

    let store = Arc::new(LocalStore::new());
    let scheduler = Scheduler::new(
        vec![Box::new(BrokenCollector), Box::new(FixedCollector)],
        store.clone(),
        dispatcher,
        config.poll_interval,
        config.report_interval,
    );
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(scheduler.run(shutdown.clone()));

    for _ in 0..100 {
        if recorder.captured().len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle).await??;

    let captured = recorder.captured();
    let records: Vec<Metrics> = captured
        .iter()
        .map(|c| serde_json::from_slice(&c.json).unwrap())
        .collect();
    assert!(records.contains(&Metrics::gauge("Alloc", 42.0)));

    let reported: i64 = records
        .iter()
        .filter(|m| m.id == "PollCount")
        .filter_map(|m| m.delta)
        .sum();
    assert!(reported >= 1);
    let count_before = captured.len();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(recorder.captured().len(), count_before);
    Ok(())
}
