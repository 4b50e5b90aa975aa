//! XMPP receiver (C3): connects to the NWWS-OI feed, reconnects with
//! exponential backoff and jitter, and hands decoded
//! [`crate::model::WireMessage`]s to the caller over a channel.

mod connection;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::warn;

use crate::config::ReceiverConfig;
use crate::error::ReceiverError;
use crate::model::WireMessage;
use crate::stats::ReceiverStats;
use connection::{Connection, ConnectionEvent};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    JoiningRoom,
    Receiving,
    Disconnecting,
}

#[derive(Debug)]
pub enum ReceiverEvent {
    StateChanged(ConnectionState),
    Message(WireMessage),
    Error(ReceiverError),
}

/// A reconnecting stream of [`ReceiverEvent`]s. Runs the XMPP client on a
/// dedicated OS thread plus `LocalSet`, since `tokio_xmpp::SimpleClient`
/// is not `Send`.
pub struct Receiver {
    rx: mpsc::Receiver<ReceiverEvent>,
    stats: Arc<ReceiverStats>,
}

impl Receiver {
    pub fn spawn(config: ReceiverConfig, stats: Arc<ReceiverStats>) -> Self {
        let (tx, rx) = mpsc::channel(config.max_queue_size.max(16));

        let run_stats = stats.clone();
        std::thread::spawn(move || {
            let local = tokio::task::LocalSet::new();
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build receiver runtime");

            local.spawn_local(run(config, tx, run_stats));
            rt.block_on(local);
        });

        Self { rx, stats }
    }

    pub async fn recv(&mut self) -> Option<ReceiverEvent> {
        let event = self.rx.recv().await;
        if event.is_some() {
            self.stats
                .queue_depth
                .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
        }
        event
    }
}

async fn run(config: ReceiverConfig, tx: mpsc::Sender<ReceiverEvent>, stats: Arc<ReceiverStats>) {
    stats.mark_started();
    let mut attempt: u32 = 0;
    // Lives across reconnect attempts (unlike `attempt`, which resets on a
    // clean run): credential failures must accumulate across `run_once`
    // calls for `max_auth_failures` to mean anything.
    let mut consecutive_auth_failures: u32 = 0;

    loop {
        if let Some(max) = config.max_reconnect_attempts {
            if attempt >= max {
                warn!("giving up after {attempt} reconnect attempts");
                return;
            }
        }

        if send(&tx, &stats, ReceiverEvent::StateChanged(ConnectionState::Connecting))
            .await
            .is_err()
        {
            return;
        }

        match run_once(&config, &tx, &stats, &mut consecutive_auth_failures).await {
            RunOutcome::Continue => {
                attempt = 0;
                consecutive_auth_failures = 0;
                if !config.auto_reconnect {
                    return;
                }
            }
            RunOutcome::Retry => {
                attempt += 1;
            }
            RunOutcome::AuthExhausted => {
                let _ = send(
                    &tx,
                    &stats,
                    ReceiverEvent::Error(ReceiverError::AuthExhausted { attempts: attempt }),
                )
                .await;
                return;
            }
            RunOutcome::ChannelClosed => return,
        }

        if !config.auto_reconnect {
            return;
        }

        let delay = backoff_delay(&config, attempt);
        stats.reconnects_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if send(
            &tx,
            &stats,
            ReceiverEvent::StateChanged(ConnectionState::Disconnected),
        )
        .await
        .is_err()
        {
            return;
        }
        tokio::time::sleep(delay).await;
    }
}

enum RunOutcome {
    Continue,
    Retry,
    AuthExhausted,
    ChannelClosed,
}

async fn run_once(
    config: &ReceiverConfig,
    tx: &mpsc::Sender<ReceiverEvent>,
    stats: &Arc<ReceiverStats>,
    consecutive_auth_failures: &mut u32,
) -> RunOutcome {
    let connect_timeout = Duration::from_secs(config.message_timeout_seconds);

    let mut conn = match tokio::time::timeout(connect_timeout, Connection::new(config)).await {
        Ok(Ok(conn)) => {
            if send(
                &tx,
                stats,
                ReceiverEvent::StateChanged(ConnectionState::Receiving),
            )
            .await
            .is_err()
            {
                return RunOutcome::ChannelClosed;
            }
            stats.connected.store(1, std::sync::atomic::Ordering::Relaxed);
            conn
        }
        Ok(Err(e @ ReceiverError::Credentials(_))) => {
            *consecutive_auth_failures += 1;
            stats
                .auth_failures_total
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let _ = send(&tx, stats, ReceiverEvent::Error(e)).await;
            if *consecutive_auth_failures >= config.max_auth_failures {
                return RunOutcome::AuthExhausted;
            }
            return RunOutcome::Retry;
        }
        Ok(Err(e)) => {
            let _ = send(&tx, stats, ReceiverEvent::Error(e)).await;
            return RunOutcome::Retry;
        }
        Err(_) => {
            let _ = send(&tx, stats, ReceiverEvent::Error(ReceiverError::StreamEnded)).await;
            return RunOutcome::Retry;
        }
    };

    // XEP-0199 keepalive: ping every `keepalive_interval_seconds`; two
    // consecutive unanswered pings means the connection is dead.
    let mut ping_interval =
        tokio::time::interval(Duration::from_secs(config.keepalive_interval_seconds.max(1)));
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping_interval.tick().await;
    let mut consecutive_ping_failures = 0u32;

    let outcome = loop {
        tokio::select! {
            event = conn.next_event() => {
                match event {
                    Ok(ConnectionEvent::Message(message)) => {
                        stats.mark_message_received(message.received_at);
                        if send(&tx, stats, ReceiverEvent::Message(message)).await.is_err() {
                            break RunOutcome::ChannelClosed;
                        }
                    }
                    Ok(ConnectionEvent::Pong(latency)) => {
                        consecutive_ping_failures = 0;
                        stats.ping_latency_ms.observe(latency.as_secs_f64() * 1000.0);
                    }
                    Err(e) => {
                        match &e {
                            ReceiverError::MalformedEnvelope => {
                                stats
                                    .messages_malformed_envelope
                                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            }
                            ReceiverError::MalformedHeader(_) => {
                                stats
                                    .messages_malformed_header
                                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            }
                            _ => {}
                        }
                        let _ = send(&tx, stats, ReceiverEvent::Error(e)).await;
                        break RunOutcome::Retry;
                    }
                }
            }
            _ = ping_interval.tick() => {
                if conn.ping_outstanding() {
                    // Previous ping never got a pong; don't send another on
                    // top of it; a late pong would have no outstanding id
                    // left to match once we'd already replaced it.
                    consecutive_ping_failures += 1;
                    warn!("keepalive ping unanswered ({consecutive_ping_failures} consecutive)");
                    if consecutive_ping_failures >= 2 {
                        let _ = send(&tx, stats, ReceiverEvent::Error(ReceiverError::StreamEnded)).await;
                        break RunOutcome::Retry;
                    }
                } else if let Err(e) = conn.send_ping().await {
                    let _ = send(&tx, stats, ReceiverEvent::Error(e)).await;
                    break RunOutcome::Retry;
                }
            }
        }
    };

    stats.connected.store(0, std::sync::atomic::Ordering::Relaxed);
    let _ = send(
        &tx,
        stats,
        ReceiverEvent::StateChanged(ConnectionState::Disconnecting),
    )
    .await;
    tokio::task::spawn_local(conn.end());
    outcome
}

async fn send(
    tx: &mpsc::Sender<ReceiverEvent>,
    stats: &ReceiverStats,
    event: ReceiverEvent,
) -> Result<(), mpsc::error::SendError<ReceiverEvent>> {
    tx.send(event).await?;
    stats.queue_depth.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    Ok(())
}

/// `delay = min(max_delay, base_delay * factor^attempt) * uniform(0.8, 1.2)`.
/// The jitter factor is derived from the current time rather than a `rand`
/// dependency this crate otherwise has no use for.
fn backoff_delay(config: &ReceiverConfig, attempt: u32) -> Duration {
    let base = config.reconnect_delay_seconds as f64;
    let grown = base * config.reconnect_backoff_factor.powi(attempt as i32);
    let capped = grown.min(config.max_reconnect_delay_seconds as f64);
    let jitter = 0.8 + 0.4 * cheap_unit_random();
    Duration::from_secs_f64((capped * jitter).max(0.0))
}

fn cheap_unit_random() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1_000_000) as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let config = ReceiverConfig {
            reconnect_delay_seconds: 1,
            reconnect_backoff_factor: 2.0,
            max_reconnect_delay_seconds: 10,
            ..ReceiverConfig::default()
        };
        let d0 = backoff_delay(&config, 0).as_secs_f64();
        let d5 = backoff_delay(&config, 5).as_secs_f64();
        assert!(d0 >= 0.8 && d0 <= 1.2);
        assert!(d5 <= 12.0);
    }
}
