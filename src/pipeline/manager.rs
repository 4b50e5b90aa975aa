//! Pipeline manager: wires the ingress queue, filter chain, transform,
//! and per-sink fan-out workers together, and drives shutdown drain.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{BackpressurePolicy, ErrorHandlingStrategy, PipelineConfig};
use crate::error::{PipelineError, SinkError};
use crate::model::WeatherEvent;
use crate::pipeline::filter::{Filter, FilterDecision};
use crate::pipeline::policy::{self, CircuitBreaker, PolicyOutcome};
use crate::pipeline::transform::Transform;
use crate::sinks::SinkKind;
use crate::stats::PipelineStats;

/// A bounded FIFO queue supporting the manager's two backpressure modes.
/// Plain `tokio::sync::mpsc` can't implement drop-oldest (there is no way
/// for a sender to evict the receiver's oldest buffered item), so the
/// ingress queue is hand-rolled over a mutex-guarded deque instead.
struct IngressQueue {
    items: Mutex<VecDeque<WeatherEvent>>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
}

impl IngressQueue {
    fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    async fn push_block(&self, event: WeatherEvent) {
        loop {
            {
                let mut items = self.items.lock().await;
                if items.len() < self.capacity {
                    items.push_back(event);
                    self.not_empty.notify_one();
                    return;
                }
            }
            self.not_full.notified().await;
        }
    }

    /// Pushes unconditionally, evicting the oldest entry first if full.
    /// Returns `true` if an entry was evicted to make room.
    async fn push_drop_oldest(&self, event: WeatherEvent) -> bool {
        let mut items = self.items.lock().await;
        let evicted = if items.len() >= self.capacity {
            items.pop_front();
            true
        } else {
            false
        };
        items.push_back(event);
        self.not_empty.notify_one();
        evicted
    }

    fn try_pop(&self) -> Option<WeatherEvent> {
        let mut items = self.items.try_lock().ok()?;
        let event = items.pop_front();
        if event.is_some() {
            drop(items);
            self.not_full.notify_one();
        }
        event
    }

    async fn depth(&self) -> usize {
        self.items.lock().await.len()
    }
}

/// Submission handle for a running pipeline. Cloning is cheap; every
/// clone submits into the same ingress queue.
#[derive(Clone)]
pub struct PipelineHandle {
    ingress: Arc<IngressQueue>,
    backpressure: BackpressurePolicy,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
}

impl PipelineHandle {
    /// Submit an event for processing. Under [`BackpressurePolicy::Block`]
    /// this waits for room in the ingress queue; under
    /// [`BackpressurePolicy::DropOldest`] it always succeeds immediately,
    /// evicting the oldest queued event if the queue was full.
    pub async fn submit(&self, event: WeatherEvent) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::ShuttingDown);
        }
        match self.backpressure {
            BackpressurePolicy::Block => {
                self.ingress.push_block(event).await;
            }
            BackpressurePolicy::DropOldest => {
                if self.ingress.push_drop_oldest(event).await {
                    self.stats.record_dropped("ingress");
                }
            }
        }
        Ok(())
    }

    pub async fn queue_depth(&self) -> usize {
        self.ingress.depth().await
    }
}

/// A running pipeline's background tasks, owned by whoever spawned it.
/// Dropping this without calling [`PipelineManager::shutdown`] abandons
/// the workers; `shutdown` is the graceful path.
pub struct PipelineManager {
    handle: PipelineHandle,
    main_task: tokio::task::JoinHandle<()>,
    sink_tasks: Vec<(String, tokio::task::JoinHandle<()>)>,
    shutdown_deadline: Duration,
}

impl PipelineManager {
    pub fn spawn(
        config: PipelineConfig,
        filters: Vec<Box<dyn Filter>>,
        transform: Box<dyn Transform>,
        sinks: Vec<SinkKind>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let ingress = Arc::new(IngressQueue::new(config.max_queue_size));
        // `Arc` rather than `Box` so a per-event `spawn_blocking` (see
        // `main_loop`) can hand the executor its own cheap clone without
        // taking ownership of the transform itself.
        let transform: Arc<dyn Transform> = Arc::from(transform);

        let mut sink_senders = Vec::with_capacity(sinks.len());
        let mut sink_tasks = Vec::with_capacity(sinks.len());
        for sink in sinks {
            let name = sink.name().to_string();
            let (tx, rx) = mpsc::channel(config.max_queue_size.max(1));
            let task = tokio::spawn(sink_worker(sink, rx, config.clone(), stats.clone()));
            sink_senders.push((name.clone(), tx));
            sink_tasks.push((name, task));
        }

        let main_task = tokio::spawn(main_loop(
            ingress.clone(),
            cancel.clone(),
            filters,
            transform,
            sink_senders,
            stats.clone(),
            config.processing_timeout_seconds,
        ));

        let handle = PipelineHandle {
            ingress,
            backpressure: config.backpressure_policy,
            stats,
            cancel,
        };

        Self {
            handle,
            main_task,
            sink_tasks,
            shutdown_deadline: Duration::from_secs(config.shutdown_deadline_seconds),
        }
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Stop accepting new events, drain whatever is already queued through
    /// every stage, then give each sink worker its grace period to finish
    /// before abandoning it. Bounded overall by `shutdown_deadline_seconds`.
    pub async fn shutdown(self) {
        self.handle.cancel.cancel();
        info!("pipeline shutting down, draining ingress queue");

        match tokio::time::timeout(self.shutdown_deadline, self.main_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("pipeline main loop task panicked: {e}"),
            Err(_) => warn!("pipeline drain did not finish within the shutdown deadline"),
        }

        for (name, task) in self.sink_tasks {
            match tokio::time::timeout(self.shutdown_deadline, task).await {
                Ok(Ok(())) => debug!(sink = %name, "sink worker drained cleanly"),
                Ok(Err(e)) => error!(sink = %name, "sink worker panicked: {e}"),
                Err(_) => {
                    warn!(sink = %name, "sink worker did not finish within the shutdown deadline, abandoning");
                }
            }
        }
    }
}

async fn next_or_drain(
    queue: &IngressQueue,
    cancel: &CancellationToken,
) -> Option<WeatherEvent> {
    loop {
        if let Some(event) = queue.try_pop() {
            return Some(event);
        }
        if cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            _ = queue.not_empty.notified() => continue,
            _ = cancel.cancelled() => {
                return queue.try_pop();
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn main_loop(
    ingress: Arc<IngressQueue>,
    cancel: CancellationToken,
    filters: Vec<Box<dyn Filter>>,
    transform: Arc<dyn Transform>,
    sink_senders: Vec<(String, mpsc::Sender<WeatherEvent>)>,
    stats: Arc<PipelineStats>,
    processing_timeout_seconds: u64,
) {
    let transform_timeout = Duration::from_secs(processing_timeout_seconds.max(1));

    while let Some(event) = next_or_drain(&ingress, &cancel).await {
        let started = Instant::now();

        let filter_started = Instant::now();
        let mut reason = None;
        for filter in &filters {
            if let FilterDecision::Reject(why) = filter.evaluate(&event) {
                reason = Some(why);
                break;
            }
        }
        stats.record_stage_latency("filter", filter_started.elapsed().as_secs_f64() * 1000.0);
        if let Some(reason) = reason {
            stats.record_filtered(&reason);
            continue;
        }

        // `Transform::apply` is synchronous, so it runs on a blocking-pool
        // thread rather than the event loop's own worker thread; that is
        // what lets `tokio::time::timeout` actually bound it instead of
        // just measuring it after the fact.
        let transform_started = Instant::now();
        let transform_for_event = transform.clone();
        let event = match tokio::time::timeout(
            transform_timeout,
            tokio::task::spawn_blocking(move || transform_for_event.apply(event)),
        )
        .await
        {
            Ok(Ok(event)) => {
                stats.record_stage_latency(
                    "transform",
                    transform_started.elapsed().as_secs_f64() * 1000.0,
                );
                event
            }
            Ok(Err(join_err)) => {
                error!("transform stage panicked: {join_err}");
                stats.record_errored("transform");
                continue;
            }
            Err(_elapsed) => {
                warn!(
                    "transform stage exceeded processing_timeout_seconds ({}s)",
                    processing_timeout_seconds
                );
                stats.record_errored("transform");
                continue;
            }
        };

        stats.record_processed(&event.cccc, event.received_at);

        for (name, tx) in &sink_senders {
            if tx.try_send(event.clone()).is_err() {
                stats.record_dropped(name);
            }
        }

        stats
            .pipeline_latency_ms
            .observe(started.elapsed().as_secs_f64() * 1000.0);
    }
    debug!("pipeline ingress drained, main loop exiting");
}

async fn sink_worker(
    sink: SinkKind,
    mut rx: mpsc::Receiver<WeatherEvent>,
    config: PipelineConfig,
    stats: Arc<PipelineStats>,
) {
    let name = sink.name().to_string();
    let mut breaker = CircuitBreaker::new(&config);
    let uses_breaker = config.error_handling_strategy == ErrorHandlingStrategy::CircuitBreaker;
    let send_timeout = Duration::from_secs(config.processing_timeout_seconds.max(1));

    while let Some(event) = rx.recv().await {
        let mut attempt = 0u32;
        loop {
            if uses_breaker && !breaker.should_attempt() {
                stats.record_dropped(&name);
                stats.set_circuit_state(&name, breaker.state().as_str());
                break;
            }

            let send_started = Instant::now();
            let outcome = match tokio::time::timeout(send_timeout, sink.send(&event)).await {
                Ok(result) => result,
                Err(_elapsed) => Err(SinkError::Timeout {
                    seconds: config.processing_timeout_seconds,
                }),
            };
            stats.record_stage_latency(&name, send_started.elapsed().as_secs_f64() * 1000.0);

            match outcome {
                Ok(()) => {
                    stats.record_sink_success(&name);
                    if uses_breaker {
                        breaker.record_success();
                        stats.set_circuit_state(&name, breaker.state().as_str());
                    }
                    break;
                }
                Err(e) => {
                    stats.record_sink_failure(&name);
                    stats.record_errored(&name);
                    warn!(sink = %name, event_id = %event.event_id, error = %e, "sink send failed");

                    // Terminal errors are pointless to retry even under the
                    // `retry` strategy; treat them as exhausted immediately.
                    let effective_attempt =
                        if config.error_handling_strategy == ErrorHandlingStrategy::Retry
                            && !e.is_transient()
                        {
                            config.max_retries
                        } else {
                            attempt
                        };

                    let breaker_ref = if uses_breaker { Some(&mut breaker) } else { None };
                    let outcome = policy::decide(
                        config.error_handling_strategy,
                        effective_attempt,
                        config.max_retries,
                        breaker_ref,
                    );
                    if uses_breaker {
                        stats.set_circuit_state(&name, breaker.state().as_str());
                    }

                    match outcome {
                        PolicyOutcome::StopPipeline => {
                            error!(sink = %name, "fail_fast: sink worker stopping");
                            stats.record_dropped(&name);
                            return;
                        }
                        PolicyOutcome::LogAndContinue => {
                            stats.record_dropped(&name);
                            break;
                        }
                        PolicyOutcome::Shed => {
                            stats.record_dropped(&name);
                            break;
                        }
                        PolicyOutcome::RetryAfter(next_attempt) => {
                            attempt = next_attempt;
                            tokio::time::sleep(policy::retry_delay(&config, attempt)).await;
                            continue;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::transform::IdentityTransform;
    use crate::sinks::console::ConsoleSink;
    use chrono::Utc;

    fn sample_event(cccc: &str) -> WeatherEvent {
        WeatherEvent {
            event_id: uuid::Uuid::new_v4(),
            product_id: "p".to_string(),
            wmo: "WFUS53KTOP151830".to_string(),
            awips_id: "TORTOP".to_string(),
            cccc: cccc.to_string(),
            product_category: "TOR".to_string(),
            issued_at: Utc::now(),
            received_at: Utc::now(),
            text: String::new(),
            segments: Vec::new(),
            fingerprint: 1,
        }
    }

    #[tokio::test]
    async fn events_flow_through_to_sink_and_stats() {
        let stats = Arc::new(PipelineStats::default());
        let manager = PipelineManager::spawn(
            PipelineConfig::default(),
            Vec::new(),
            Box::new(IdentityTransform),
            vec![SinkKind::Console(ConsoleSink::new())],
            stats.clone(),
        );
        let handle = manager.handle();
        handle.submit(sample_event("KTOP")).await.unwrap();

        for _ in 0..50 {
            if stats.snapshot().events_processed_total >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stats.snapshot().events_processed_total, 1);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn drop_oldest_evicts_under_pressure() {
        let queue = IngressQueue::new(2);
        assert!(!queue.push_drop_oldest(sample_event("A")).await);
        assert!(!queue.push_drop_oldest(sample_event("B")).await);
        assert!(queue.push_drop_oldest(sample_event("C")).await);
        assert_eq!(queue.depth().await, 2);
        let first = queue.try_pop().unwrap();
        assert_eq!(first.cccc, "B");
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let stats = Arc::new(PipelineStats::default());
        let manager = PipelineManager::spawn(
            PipelineConfig::default(),
            Vec::new(),
            Box::new(IdentityTransform),
            vec![SinkKind::Console(ConsoleSink::new())],
            stats,
        );
        let handle = manager.handle();
        manager.shutdown().await;
        assert!(matches!(
            handle.submit(sample_event("KTOP")).await,
            Err(PipelineError::ShuttingDown)
        ));
    }
}
