//! Sinks (C5/C6) plus the supplemented console and dashboard feeds. Every
//! sink is driven by its own worker task reading from a bounded,
//! per-sink queue so a slow sink can never block another.
//!
//! Sinks are closed over a single enum rather than a trait object —
//! constructor functions keyed by enum instead of a string-keyed
//! registry of `dyn` components — so the pipeline manager matches
//! exhaustively instead of dispatching through a trait object.

pub mod console;
pub mod dashboard;
pub mod db;
pub mod mqtt;

use crate::error::SinkError;
use crate::model::WeatherEvent;

pub enum SinkKind {
    Mqtt(mqtt::MqttSink),
    Db(db::DbSink),
    Console(console::ConsoleSink),
    Dashboard(dashboard::DashboardSink),
}

impl SinkKind {
    pub fn name(&self) -> &str {
        match self {
            SinkKind::Mqtt(s) => s.name(),
            SinkKind::Db(s) => s.name(),
            SinkKind::Console(s) => s.name(),
            SinkKind::Dashboard(s) => s.name(),
        }
    }

    pub async fn send(&self, event: &WeatherEvent) -> Result<(), SinkError> {
        match self {
            SinkKind::Mqtt(s) => s.send(event).await,
            SinkKind::Db(s) => s.send(event).await,
            SinkKind::Console(s) => s.send(event).await,
            SinkKind::Dashboard(s) => s.send(event).await,
        }
    }
}
