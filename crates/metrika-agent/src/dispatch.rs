use crate::config::AgentConfig;
use metrika_common::codec;
use metrika_common::error::SignatureError;
use metrika_common::retry::{retry, RetryPolicy};
use metrika_common::signature::{Signer, HASH_HEADER};
use metrika_common::types::{Metrics, Snapshot};
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Dispatch: HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Any non-2xx answer, surfaced as an error so that it is retried.
    #[error("Dispatch: server answered {status}")]
    Status { status: u16 },

    #[error("Dispatch: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Dispatch: compression error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Dispatch: {0}")]
    Signature(#[from] SignatureError),
}

/// Outcome of one report cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
}

impl DispatchSummary {
    fn merge(&mut self, other: DispatchSummary) {
        self.sent += other.sent;
        self.failed += other.failed;
    }
}

/// A gzip-compressed body and its optional integrity tag.
struct Envelope {
    body: Vec<u8>,
    tag: Option<String>,
}

/// Delivers a snapshot to the server, one request per metric through a
/// bounded worker pool or as a single batch request.
///
/// Every request is retried up to the policy's attempt count regardless of
/// the failure kind, including 4xx answers. Metrics that still fail are
/// logged and dropped.
#[derive(Clone)]
pub struct Dispatcher {
    client: reqwest::Client,
    base_url: String,
    signer: Option<Arc<Signer>>,
    rate_limit: usize,
    batch: bool,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(config: &AgentConfig) -> Result<Self, DispatchError> {
        let signer = config
            .key
            .as_deref()
            .map(Signer::new)
            .transpose()?
            .map(Arc::new);
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: config.server_url(),
            signer,
            rate_limit: config.rate_limit,
            batch: config.batch,
            policy: RetryPolicy::standard(),
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sends `snapshot` in the configured mode.
    pub async fn deliver(&self, snapshot: &Snapshot) -> DispatchSummary {
        if self.batch {
            let count = snapshot.len();
            match self.send_batch(snapshot).await {
                Ok(()) => DispatchSummary {
                    sent: count,
                    failed: 0,
                },
                Err(e) => {
                    tracing::warn!(count, error = %e, "Batch dropped after retries");
                    DispatchSummary {
                        sent: 0,
                        failed: count,
                    }
                }
            }
        } else {
            self.send_report(snapshot).await
        }
    }

    /// Fans the snapshot out to `rate_limit` workers (one per metric when
    /// the limit is 0) over a bounded channel and waits for all of them.
    pub async fn send_report(&self, snapshot: &Snapshot) -> DispatchSummary {
        let items = snapshot.to_metrics();
        if items.is_empty() {
            return DispatchSummary::default();
        }

        let workers = match self.rate_limit {
            0 => items.len(),
            limit => limit.min(items.len()),
        };
        let (tx, rx) = mpsc::channel::<Metrics>(workers);
        let rx = Arc::new(Mutex::new(rx));

        let mut pool = JoinSet::new();
        for id in 0..workers {
            let this = self.clone();
            let rx = rx.clone();
            pool.spawn(async move { this.worker(id, rx).await });
        }

        for item in items {
            if tx.send(item).await.is_err() {
                tracing::warn!("All send workers exited early");
                break;
            }
        }
        // Closing the channel ends the batch for the workers.
        drop(tx);

        let mut summary = DispatchSummary::default();
        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(partial) => summary.merge(partial),
                Err(e) => tracing::error!(error = %e, "Send worker panicked"),
            }
        }
        tracing::debug!(
            workers,
            sent = summary.sent,
            failed = summary.failed,
            "Report cycle finished"
        );
        summary
    }

    async fn worker(&self, id: usize, rx: Arc<Mutex<mpsc::Receiver<Metrics>>>) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        loop {
            let next = rx.lock().await.recv().await;
            let Some(metric) = next else {
                break;
            };
            match self.send_metric(&metric).await {
                Ok(()) => summary.sent += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(
                        worker = id,
                        metric = %metric.id,
                        error = %e,
                        "Metric dropped after retries"
                    );
                }
            }
        }
        summary
    }

    pub async fn send_metric(&self, metric: &Metrics) -> Result<(), DispatchError> {
        let envelope = self.seal(&serde_json::to_vec(metric)?)?;
        retry(&self.policy, "update", || self.post("/update/", &envelope)).await
    }

    /// Sends the whole snapshot as one JSON array.
    pub async fn send_batch(&self, snapshot: &Snapshot) -> Result<(), DispatchError> {
        let items = snapshot.to_metrics();
        if items.is_empty() {
            return Ok(());
        }
        let envelope = self.seal(&serde_json::to_vec(&items)?)?;
        retry(&self.policy, "updates", || self.post("/updates/", &envelope)).await
    }

    /// Compresses, then signs the compressed bytes.
    fn seal(&self, json: &[u8]) -> Result<Envelope, DispatchError> {
        let body = codec::gzip(json)?;
        let tag = match &self.signer {
            Some(signer) => Some(signer.sign(&body)?),
            None => None,
        };
        Ok(Envelope { body, tag })
    }

    async fn post(&self, path: &str, envelope: &Envelope) -> Result<(), DispatchError> {
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, codec::GZIP)
            .header(ACCEPT_ENCODING, codec::GZIP);
        if let Some(tag) = &envelope.tag {
            request = request.header(HASH_HEADER, tag.as_str());
        }

        let response = request.body(envelope.body.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Status {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}
