//! MQTT sink (C5). `send` only enqueues to an internal bounded
//! channel — the broker publish happens on a dedicated worker task, so a
//! stalled broker connection can't block the pipeline fan-out.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;
use crate::error::SinkError;
use crate::model::WeatherEvent;

pub struct MqttSink {
    name: String,
    tx: mpsc::Sender<WeatherEvent>,
    pending: Arc<AtomicI64>,
}

impl MqttSink {
    /// Spawn the sink's worker and the underlying `rumqttc` event loop
    /// pump. `queue_size` bounds the internal buffer events wait in while
    /// the broker connection recovers.
    pub fn spawn(config: &MqttConfig, queue_size: usize) -> Self {
        let mut options = MqttOptions::new(config.client_id.clone(), config.broker.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user.clone(), pass.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, queue_size.max(16));
        let (tx, rx) = mpsc::channel(queue_size.max(16));
        let pending = Arc::new(AtomicI64::new(0));
        let published_at: PublishedAt = Arc::new(std::sync::Mutex::new(std::collections::HashMap::new()));

        tokio::spawn(pump_eventloop(eventloop));
        tokio::spawn(worker(
            rx,
            client.clone(),
            config.topic_prefix.clone(),
            qos_from_u8(config.qos),
            config.retain,
            config.message_expiry_minutes,
            pending.clone(),
            published_at.clone(),
        ));
        if let Some(expiry_minutes) = config.message_expiry_minutes {
            tokio::spawn(expiry_sweeper(client, published_at, expiry_minutes));
        }

        Self {
            name: "mqtt".to_string(),
            tx,
            pending,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pending_count(&self) -> i64 {
        self.pending.load(Ordering::Relaxed)
    }

    /// Non-blocking at the sink boundary: a full internal buffer is
    /// reported as a transient `BrokerUnavailable` rather than blocking
    /// the caller.
    pub async fn send(&self, event: &WeatherEvent) -> Result<(), SinkError> {
        self.pending.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(event.clone()) {
            Ok(()) => Ok(()),
            Err(_) => {
                self.pending.fetch_sub(1, Ordering::Relaxed);
                Err(SinkError::BrokerUnavailable(
                    "mqtt sink buffer is full".to_string(),
                ))
            }
        }
    }
}

async fn pump_eventloop(mut eventloop: EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => info!("mqtt sink connected to broker"),
            Ok(_) => {}
            Err(e) => {
                warn!("mqtt event loop error: {e}");
                if matches!(e, ConnectionError::RequestsDone) {
                    return;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Topic → last-publish-time, used by [`expiry_sweeper`] when the broker
/// doesn't support MQTT v5 message-expiry properties.
type PublishedAt = Arc<std::sync::Mutex<std::collections::HashMap<String, std::time::Instant>>>;

async fn worker(
    mut rx: mpsc::Receiver<WeatherEvent>,
    client: AsyncClient,
    topic_prefix: String,
    qos: QoS,
    retain: bool,
    message_expiry_minutes: Option<u32>,
    pending: Arc<AtomicI64>,
    published_at: PublishedAt,
) {
    while let Some(event) = rx.recv().await {
        let topic = build_topic(&topic_prefix, &event.cccc, &event.awips_id, &event.product_id);
        let payload = match serde_json::to_vec(&event) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("failed to serialize event {}: {e}", event.event_id);
                pending.fetch_sub(1, Ordering::Relaxed);
                continue;
            }
        };

        if payload.len() > MAX_PAYLOAD_BYTES {
            error!(
                "event {} payload ({} bytes) exceeds the mqtt sink's limit",
                event.event_id,
                payload.len()
            );
            pending.fetch_sub(1, Ordering::Relaxed);
            continue;
        }

        match client.publish(&topic, qos, retain, payload).await {
            Ok(()) => {
                debug!("published {} to {topic}", event.event_id);
                if message_expiry_minutes.is_some() {
                    published_at
                        .lock()
                        .unwrap()
                        .insert(topic, std::time::Instant::now());
                }
            }
            Err(e) => error!("mqtt publish failed for {}: {e}", event.event_id),
        }
        pending.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Fallback for brokers that don't honor MQTT v5 message-expiry: clears
/// stale retained messages by republishing a zero-length payload once
/// they age past `expiry_minutes`.
async fn expiry_sweeper(client: AsyncClient, published_at: PublishedAt, expiry_minutes: u32) {
    let expiry = Duration::from_secs(u64::from(expiry_minutes) * 60);
    let mut ticker = tokio::time::interval(Duration::from_secs(60));
    loop {
        ticker.tick().await;
        let stale: Vec<String> = {
            let mut map = published_at.lock().unwrap();
            let now = std::time::Instant::now();
            let stale = map
                .iter()
                .filter(|(_, &t)| now.duration_since(t) >= expiry)
                .map(|(topic, _)| topic.clone())
                .collect::<Vec<_>>();
            for topic in &stale {
                map.remove(topic);
            }
            stale
        };
        for topic in stale {
            if let Err(e) = client.publish(&topic, QoS::AtLeastOnce, true, Vec::new()).await {
                warn!("failed to clear stale retained message on {topic}: {e}");
            }
        }
    }
}

const MAX_PAYLOAD_BYTES: usize = 256 * 1024;

fn qos_from_u8(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// `{prefix}/{cccc}/{awips_id}/{product_id}`, sanitized per MQTT topic
/// rules: `/`, `+`, `#`, and whitespace become `_`; no leading/trailing
/// slash.
pub fn build_topic(prefix: &str, cccc: &str, awips_id: &str, product_id: &str) -> String {
    let parts = [prefix, cccc, awips_id, product_id]
        .iter()
        .map(|s| sanitize_component(s))
        .collect::<Vec<_>>()
        .join("/");
    parts.trim_matches('/').to_string()
}

fn sanitize_component(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c == '/' || c == '+' || c == '#' || c.is_whitespace() {
                '_'
            } else {
                c
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_is_sanitized_and_joined() {
        let topic = build_topic("nwws", "KTOP", "TOR TOP", "p/1");
        assert_eq!(topic, "nwws/KTOP/TOR_TOP/p_1");
    }

    #[test]
    fn qos_maps_correctly() {
        assert_eq!(qos_from_u8(0), QoS::AtMostOnce);
        assert_eq!(qos_from_u8(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_u8(2), QoS::ExactlyOnce);
        assert_eq!(qos_from_u8(9), QoS::AtLeastOnce);
    }
}
