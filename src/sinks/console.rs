//! Console sink: prints each event as a single JSON line to stdout.
//! Useful for local debugging and the bundled end-to-end scenarios,
//! which need no broker or database.

use tracing::info;

use crate::error::SinkError;
use crate::model::WeatherEvent;

pub struct ConsoleSink {
    name: String,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            name: "console".to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn send(&self, event: &WeatherEvent) -> Result<(), SinkError> {
        let line = serde_json::to_string(event)
            .map_err(|e| SinkError::ConstraintViolation(e.to_string()))?;
        println!("{line}");
        info!(event_id = %event.event_id, cccc = %event.cccc, awips_id = %event.awips_id, "published to console");
        Ok(())
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}
