//! A single XMPP connection to the NWWS-OI feed, 1:1 with an underlying
//! `tokio_xmpp::SimpleClient`. Failures here are generally unrecoverable
//! for this connection instance; [`super::Receiver`] is what retries.

use std::time::Instant;

use futures::{StreamExt, TryStreamExt};
use tracing::{debug, trace, warn};

use crate::config::ReceiverConfig;
use crate::error::ReceiverError;
use crate::model::{EnvelopeError, WireMessage};

const RESOURCE: &str = "nwws-relay";
const PING_NS: &str = "urn:xmpp:ping";

/// What [`Connection::next_event`] observed: either a decoded product, or
/// the pong for a ping sent via [`Connection::send_ping`].
pub enum ConnectionEvent {
    Message(WireMessage),
    Pong(std::time::Duration),
}

pub struct Connection {
    client: tokio_xmpp::SimpleClient,
    leave_message: xmpp_parsers::Element,
    room_jid: String,
    pending_ping: Option<(String, Instant)>,
}

impl Connection {
    /// Connect, authenticate, and join the configured conference room.
    /// Returns once the MUC self-presence is observed.
    pub async fn new(config: &ReceiverConfig) -> Result<Self, ReceiverError> {
        let bare_jid = format!("{}@{}", config.username, config.server);
        let full_jid = format!("{bare_jid}/{RESOURCE}");

        debug!("connecting to {}", config.server);
        let mut client = tokio_xmpp::SimpleClient::new(&full_jid, config.password.clone())
            .await
            .map_err(|e| match e {
                tokio_xmpp::Error::JidParse(_) => ReceiverError::Configuration(e),
                tokio_xmpp::Error::Auth(_) => ReceiverError::Credentials(e),
                _ => ReceiverError::Network(e),
            })?;
        let jid = client.bound_jid().clone();
        debug!("connected as {jid}");

        let nickname = config.username.clone();
        let channel_jid: jid::Jid = format!("{}/{nickname}", config.conference_room)
            .parse()
            .map_err(|_| ReceiverError::MalformedHeader("invalid conference_room".to_string()))?;

        let join_message =
            xmpp_parsers::presence::Presence::new(xmpp_parsers::presence::Type::None)
                .with_from(jid.clone())
                .with_to(channel_jid.clone())
                .with_payloads(vec![xmpp_parsers::muc::Muc {
                    password: None,
                    history: Some(xmpp_parsers::muc::muc::History {
                        maxchars: None,
                        maxstanzas: None,
                        seconds: Some(300),
                        since: None,
                    }),
                }
                .into()]);

        // https://xmpp.org/extensions/xep-0045.html#bizrules-presence § 17.3.2
        let leave_message =
            xmpp_parsers::presence::Presence::new(xmpp_parsers::presence::Type::Unavailable)
                .with_from(join_message.from.as_ref().unwrap().clone())
                .with_to(join_message.to.as_ref().unwrap().clone())
                .with_payloads(vec![xmpp_parsers::muc::Muc {
                    password: None,
                    history: None,
                }
                .into()])
                .into();

        client.send_stanza(join_message).await?;
        'wait_for_join: loop {
            let item = client
                .try_next()
                .await?
                .ok_or(ReceiverError::StreamEnded)?;

            if let Ok(presence) = xmpp_parsers::presence::Presence::try_from(item.clone()) {
                for payload in presence.payloads {
                    if let Ok(muc_user) = xmpp_parsers::muc::MucUser::try_from(payload) {
                        if muc_user
                            .status
                            .iter()
                            .any(|s| s == &xmpp_parsers::muc::user::Status::SelfPresence)
                        {
                            break 'wait_for_join;
                        }
                    }
                }
            }
        }

        debug!("joined channel {}", config.conference_room);

        Ok(Self {
            client,
            leave_message,
            room_jid: config.conference_room.clone(),
            pending_ping: None,
        })
    }

    /// Leave the room and end the stream as gracefully as possible.
    pub async fn end(self) {
        let mut client = self.client;
        client.send_stanza(self.leave_message).await.ok();
        client.end().await.ok();
    }

    /// Send a XEP-0199 keepalive ping and remember when it went out so the
    /// matching result/error stanza can be timed. Returns an error only if
    /// the underlying stream write failed outright.
    pub async fn send_ping(&mut self) -> Result<(), ReceiverError> {
        let id = uuid::Uuid::new_v4().to_string();
        let ping = xmpp_parsers::Element::builder("ping", PING_NS).build();
        let iq = xmpp_parsers::iq::Iq {
            from: None,
            to: None,
            id: id.clone(),
            payload: xmpp_parsers::iq::IqType::Get(ping),
        };
        self.client.send_stanza(iq).await?;
        self.pending_ping = Some((id, Instant::now()));
        Ok(())
    }

    /// Whether a ping sent via [`Self::send_ping`] is still awaiting its
    /// pong. The caller treats two consecutive `true` observations (one
    /// keepalive interval apart) as a dead connection.
    pub fn ping_outstanding(&self) -> bool {
        self.pending_ping.is_some()
    }

    /// Receive the next decoded wire message or pong, skipping anything
    /// that isn't a groupchat message or a reply to our own ping (IQ
    /// get/set from the server is answered, presences ignored).
    pub async fn next_event(&mut self) -> Result<ConnectionEvent, ReceiverError> {
        loop {
            let element = self
                .client
                .next()
                .await
                .ok_or(ReceiverError::StreamEnded)??;

            trace!("received stanza: {:?}", element);

            if element.is("message", "jabber:client") {
                if let Ok(message) = xmpp_parsers::message::Message::try_from(element.clone()) {
                    match WireMessage::decode(message, &self.room_jid, chrono::Utc::now()) {
                        Ok(wire) => return Ok(ConnectionEvent::Message(wire)),
                        Err(EnvelopeError::NotGroupchat) => continue,
                        Err(e) if e.counter_name() == "malformed_envelope" => {
                            return Err(ReceiverError::MalformedEnvelope)
                        }
                        Err(e) => return Err(ReceiverError::MalformedHeader(e.to_string())),
                    }
                }
            } else if element.is("iq", "jabber:client") {
                let iq = xmpp_parsers::iq::Iq::try_from(element)?;
                if let Some(pong) = self.take_pong_if_matching(&iq) {
                    return Ok(ConnectionEvent::Pong(pong));
                }
                self.handle_iq(iq).await?;
            } else if element.is("presence", "jabber:client") {
                trace!("presence stanza: {:?}", element);
            } else {
                warn!("unhandled stanza: {:?}", element);
            }
        }
    }

    /// If `iq` is a result/error reply matching the outstanding ping,
    /// clears it and returns the round-trip latency.
    fn take_pong_if_matching(&mut self, iq: &xmpp_parsers::iq::Iq) -> Option<std::time::Duration> {
        let is_reply = matches!(
            iq.payload,
            xmpp_parsers::iq::IqType::Result(_) | xmpp_parsers::iq::IqType::Error(_)
        );
        if !is_reply {
            return None;
        }
        let (pending_id, sent_at) = self.pending_ping.as_ref()?;
        if pending_id != &iq.id {
            return None;
        }
        let elapsed = sent_at.elapsed();
        self.pending_ping = None;
        Some(elapsed)
    }

    async fn handle_iq(&mut self, iq: xmpp_parsers::iq::Iq) -> Result<(), ReceiverError> {
        // If an entity receives an IQ of type "get" or "set" with a child
        // it doesn't understand, it SHOULD reply service-unavailable.
        if let xmpp_parsers::iq::IqType::Get(_) | xmpp_parsers::iq::IqType::Set(_) = &iq.payload {
            debug!(
                "responding to IQ{} with service-unavailable",
                iq.from
                    .as_ref()
                    .map(|j| format!(" from {j}"))
                    .unwrap_or_default()
            );

            let stanza = xmpp_parsers::iq::Iq {
                from: iq.to,
                to: iq.from,
                id: iq.id,
                payload: xmpp_parsers::iq::IqType::Error(xmpp_parsers::stanza_error::StanzaError {
                    type_: xmpp_parsers::stanza_error::ErrorType::Cancel,
                    by: None,
                    defined_condition:
                        xmpp_parsers::stanza_error::DefinedCondition::ServiceUnavailable,
                    texts: Default::default(),
                    other: None,
                }),
            };

            self.client.send_stanza(stanza).await?;
        }
        Ok(())
    }
}
