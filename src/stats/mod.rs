//! Stats collectors (C7): counters, gauges, and histograms for the
//! receiver and pipeline, plus a consistent snapshot API for the
//! dashboard feed.

mod histogram;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use histogram::{Histogram, HistogramSnapshot};

/// Receiver-side counters and gauges.
#[derive(Debug, Default)]
pub struct ReceiverStats {
    pub messages_received_total: AtomicU64,
    pub messages_malformed_envelope: AtomicU64,
    pub messages_malformed_header: AtomicU64,
    pub reconnects_total: AtomicU64,
    pub auth_failures_total: AtomicU64,
    pub connected: AtomicU64,
    pub queue_depth: AtomicI64,
    started_at: Mutex<Option<DateTime<Utc>>>,
    last_message_at: Mutex<Option<DateTime<Utc>>>,
    pub stanza_to_message_latency_ms: Histogram,
    pub ping_latency_ms: Histogram,
}

impl ReceiverStats {
    pub fn mark_started(&self) {
        *self.started_at.lock().unwrap() = Some(Utc::now());
    }

    pub fn mark_message_received(&self, now: DateTime<Utc>) {
        self.messages_received_total.fetch_add(1, Ordering::Relaxed);
        *self.last_message_at.lock().unwrap() = Some(now);
    }

    pub fn uptime_seconds(&self) -> i64 {
        match *self.started_at.lock().unwrap() {
            Some(start) => (Utc::now() - start).num_seconds(),
            None => 0,
        }
    }

    pub fn last_message_age_seconds(&self) -> Option<i64> {
        self.last_message_at
            .lock()
            .unwrap()
            .map(|t| (Utc::now() - t).num_seconds())
    }

    pub fn snapshot(&self) -> ReceiverSnapshot {
        ReceiverSnapshot {
            messages_received_total: self.messages_received_total.load(Ordering::Relaxed),
            messages_malformed_envelope: self.messages_malformed_envelope.load(Ordering::Relaxed),
            messages_malformed_header: self.messages_malformed_header.load(Ordering::Relaxed),
            reconnects_total: self.reconnects_total.load(Ordering::Relaxed),
            auth_failures_total: self.auth_failures_total.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed) != 0,
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            uptime_seconds: self.uptime_seconds(),
            last_message_age_seconds: self.last_message_age_seconds(),
            stanza_to_message_latency_ms: self.stanza_to_message_latency_ms.snapshot(),
            ping_latency_ms: self.ping_latency_ms.snapshot(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReceiverSnapshot {
    pub messages_received_total: u64,
    pub messages_malformed_envelope: u64,
    pub messages_malformed_header: u64,
    pub reconnects_total: u64,
    pub auth_failures_total: u64,
    pub connected: bool,
    pub queue_depth: i64,
    pub uptime_seconds: i64,
    pub last_message_age_seconds: Option<i64>,
    pub stanza_to_message_latency_ms: HistogramSnapshot,
    pub ping_latency_ms: HistogramSnapshot,
}

/// Pipeline-side counters, gauges, and histograms.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub events_processed_total: AtomicU64,
    filtered_by_reason: Mutex<HashMap<String, u64>>,
    errored_by_stage: Mutex<HashMap<String, u64>>,
    dropped_by_sink: Mutex<HashMap<String, u64>>,
    sink_success: Mutex<HashMap<String, u64>>,
    sink_failures: Mutex<HashMap<String, u64>>,
    sink_circuit_state: Mutex<HashMap<String, String>>,
    processed_by_office: Mutex<HashMap<String, u64>>,
    last_activity_by_office: Mutex<HashMap<String, DateTime<Utc>>>,
    pub pipeline_latency_ms: Histogram,
    stage_latency: Mutex<HashMap<String, Histogram>>,
    cleanup_deleted_by_strategy: Mutex<HashMap<String, u64>>,
}

impl PipelineStats {
    pub fn record_processed(&self, cccc: &str, received_at: DateTime<Utc>) {
        self.events_processed_total.fetch_add(1, Ordering::Relaxed);
        *self
            .processed_by_office
            .lock()
            .unwrap()
            .entry(cccc.to_string())
            .or_insert(0) += 1;
        self.last_activity_by_office
            .lock()
            .unwrap()
            .insert(cccc.to_string(), received_at);
    }

    pub fn record_filtered(&self, reason: &str) {
        *self
            .filtered_by_reason
            .lock()
            .unwrap()
            .entry(reason.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_errored(&self, stage: &str) {
        *self
            .errored_by_stage
            .lock()
            .unwrap()
            .entry(stage.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_dropped(&self, sink: &str) {
        *self
            .dropped_by_sink
            .lock()
            .unwrap()
            .entry(sink.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_sink_success(&self, sink: &str) {
        *self
            .sink_success
            .lock()
            .unwrap()
            .entry(sink.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_sink_failure(&self, sink: &str) {
        *self
            .sink_failures
            .lock()
            .unwrap()
            .entry(sink.to_string())
            .or_insert(0) += 1;
    }

    pub fn set_circuit_state(&self, sink: &str, state: &str) {
        self.sink_circuit_state
            .lock()
            .unwrap()
            .insert(sink.to_string(), state.to_string());
    }

    pub fn record_stage_latency(&self, stage: &str, ms: f64) {
        let mut stages = self.stage_latency.lock().unwrap();
        stages.entry(stage.to_string()).or_default().observe(ms);
    }

    pub fn record_cleanup_deleted(&self, strategy: &str, count: u64) {
        *self
            .cleanup_deleted_by_strategy
            .lock()
            .unwrap()
            .entry(strategy.to_string())
            .or_insert(0) += count;
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            events_processed_total: self.events_processed_total.load(Ordering::Relaxed),
            events_filtered_total: self.filtered_by_reason.lock().unwrap().clone(),
            events_errored_total: self.errored_by_stage.lock().unwrap().clone(),
            events_dropped_total: self.dropped_by_sink.lock().unwrap().clone(),
            sink_success_total: self.sink_success.lock().unwrap().clone(),
            sink_failures_total: self.sink_failures.lock().unwrap().clone(),
            sink_circuit_state: self.sink_circuit_state.lock().unwrap().clone(),
            messages_processed_total_by_office: self.processed_by_office.lock().unwrap().clone(),
            last_activity_by_office: self.last_activity_by_office.lock().unwrap().clone(),
            pipeline_latency_ms: self.pipeline_latency_ms.snapshot(),
            per_stage_latency_ms: self
                .stage_latency
                .lock()
                .unwrap()
                .iter()
                .map(|(k, v)| (k.clone(), v.snapshot()))
                .collect(),
            cleanup_deleted_by_strategy: self.cleanup_deleted_by_strategy.lock().unwrap().clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    pub events_processed_total: u64,
    pub events_filtered_total: HashMap<String, u64>,
    pub events_errored_total: HashMap<String, u64>,
    pub events_dropped_total: HashMap<String, u64>,
    pub sink_success_total: HashMap<String, u64>,
    pub sink_failures_total: HashMap<String, u64>,
    pub sink_circuit_state: HashMap<String, String>,
    pub messages_processed_total_by_office: HashMap<String, u64>,
    pub last_activity_by_office: HashMap<String, DateTime<Utc>>,
    pub pipeline_latency_ms: HistogramSnapshot,
    pub per_stage_latency_ms: HashMap<String, HistogramSnapshot>,
    pub cleanup_deleted_by_strategy: HashMap<String, u64>,
}

/// Everything the dashboard's JSON endpoint needs in one read.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub receiver: ReceiverSnapshot,
    pub pipeline: PipelineSnapshot,
}

/// Owns both collectors; shared behind an `Arc` across the receiver,
/// pipeline manager, and dashboard feed.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    pub receiver: ReceiverStats,
    pub pipeline: PipelineStats,
}

impl StatsRegistry {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            taken_at: Utc::now(),
            receiver: self.receiver.snapshot(),
            pipeline: self.pipeline.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = StatsRegistry::default();
        stats.receiver.mark_message_received(Utc::now());
        stats.receiver.mark_message_received(Utc::now());
        assert_eq!(stats.snapshot().receiver.messages_received_total, 2);
    }

    #[test]
    fn pipeline_tracks_by_office() {
        let stats = StatsRegistry::default();
        stats.pipeline.record_processed("KTOP", Utc::now());
        stats.pipeline.record_processed("KTOP", Utc::now());
        stats.pipeline.record_processed("KBOU", Utc::now());
        let snap = stats.snapshot();
        assert_eq!(snap.pipeline.messages_processed_total_by_office["KTOP"], 2);
        assert_eq!(snap.pipeline.messages_processed_total_by_office["KBOU"], 1);
    }
}
