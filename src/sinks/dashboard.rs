//! Dashboard feed: a broadcast channel of published events, consumed by
//! the (out-of-scope) HTTP dashboard to drive its live view. Publishing
//! is fire-and-forget — a dashboard with no subscribers drops events,
//! which is fine since the JSON/GeoJSON endpoint contract is someone
//! else's problem.

use tokio::sync::broadcast;

use crate::error::SinkError;
use crate::model::WeatherEvent;

pub struct DashboardSink {
    name: String,
    tx: broadcast::Sender<WeatherEvent>,
}

impl DashboardSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            name: "dashboard".to_string(),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WeatherEvent> {
        self.tx.subscribe()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn send(&self, event: &WeatherEvent) -> Result<(), SinkError> {
        // A lagging/absent subscriber is not a sink failure; the feed is
        // best-effort by design.
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}
