use crate::dispatch::Dispatcher;
use crate::store::LocalStore;
use metrika_collector::Collector;
use metrika_common::settings::MAX_INTERVAL;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Drives sampling and reporting from one task: a poll timer, a report
/// timer and a cancellation token, selected in a single loop.
///
/// Report cycles run as spawned tasks so a slow server does not delay
/// polling. On cancellation no new cycle starts; cycles already in flight
/// are awaited before [`Scheduler::run`] returns.
pub struct Scheduler {
    collectors: Vec<Box<dyn Collector>>,
    store: Arc<LocalStore>,
    dispatcher: Dispatcher,
    poll_interval: Duration,
    report_interval: Duration,
}

impl Scheduler {
    pub fn new(
        collectors: Vec<Box<dyn Collector>>,
        store: Arc<LocalStore>,
        dispatcher: Dispatcher,
        poll_interval: Duration,
        report_interval: Duration,
    ) -> Self {
        Self {
            collectors,
            store,
            dispatcher,
            poll_interval,
            report_interval,
        }
    }

    pub fn store(&self) -> Arc<LocalStore> {
        self.store.clone()
    }

    /// Runs one poll: every collector is sampled and the results folded
    /// into the local store. A failing collector is logged and skipped.
    pub fn poll_once(&mut self) {
        for collector in &mut self.collectors {
            match collector.collect() {
                Ok(samples) => self.store.apply(&samples),
                Err(e) => {
                    tracing::warn!(collector = collector.name(), error = %e, "Collection failed")
                }
            }
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        let now = Instant::now();
        let poll_every = self.poll_interval.min(MAX_INTERVAL);
        let report_every = self.report_interval.min(MAX_INTERVAL);
        let mut poll = interval_at(now + poll_every, poll_every);
        let mut report = interval_at(now + report_every, report_every);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        report.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut in_flight = JoinSet::new();

        tracing::info!(
            poll_ms = self.poll_interval.as_millis() as u64,
            report_ms = self.report_interval.as_millis() as u64,
            collectors = self.collectors.len(),
            "Collection loop started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Collection loop stopping");
                    break;
                }
                _ = poll.tick() => {
                    self.poll_once();
                    tracing::debug!("Metrics collected");
                }
                _ = report.tick() => {
                    let snapshot = self.store.take_report();
                    if snapshot.is_empty() {
                        continue;
                    }
                    let dispatcher = self.dispatcher.clone();
                    in_flight.spawn(async move {
                        let summary = dispatcher.deliver(&snapshot).await;
                        tracing::info!(sent = summary.sent, failed = summary.failed, "Report sent");
                    });
                }
                Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = done {
                        tracing::error!(error = %e, "Report task panicked");
                    }
                }
            }
        }

        drop(poll);
        drop(report);

        while let Some(done) = in_flight.join_next().await {
            if let Err(e) = done {
                tracing::error!(error = %e, "Report task panicked");
            }
        }
        tracing::info!("Collection loop stopped");
    }
}
