/// A message received from NWWS-OI, decoded from its XMPP group-chat
/// envelope but not yet parsed into a [`crate::model::WeatherEvent`].
///
/// See the [NWS Communications Header Policy Document](https://www.weather.gov/tg/awips) for
/// information about how to interpret this data.
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    /// A unique ID for this message, assigned by the NWWS-OI ingest
    /// process. Unique per feed session; gaps likely indicate loss.
    pub id: String,

    /// The XMPP `<subject>` of the enclosing group-chat message, if any.
    pub subject: Option<String>,

    /// The raw NWS product text, CDATA-decoded with trailing whitespace
    /// and original line breaks preserved.
    pub body_text: String,

    /// The six character AWIPS ID, sometimes called AFOS PIL.
    pub awips_id: Option<String>,

    /// Four character issuing center, e.g. `KBOU`.
    pub cccc: String,

    /// The six character WMO product code (`TTAAII`), e.g. `FXUS61`.
    pub ttaaii: String,

    /// The time at which this product was issued, per the envelope's
    /// `issue` attribute.
    pub issued_at: chrono::DateTime<chrono::Utc>,

    /// The time this process received the stanza.
    pub received_at: chrono::DateTime<chrono::Utc>,

    /// The conference room JID this message arrived on.
    pub room_jid: String,
}

impl WireMessage {
    /// Decode a `<message type="groupchat">` stanza carrying a
    /// `<x xmlns="nwws-oi">` envelope into a [`WireMessage`].
    ///
    /// Returns `Err(envelope_error)` describing which required piece was
    /// missing so the caller can bump the right counter:
    /// `malformed_envelope` when the `<x>` element itself is absent,
    /// `malformed_header` when an attribute is present but invalid.
    pub fn decode(
        value: xmpp_parsers::message::Message,
        room_jid: &str,
        received_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Self, EnvelopeError> {
        if value.type_ != xmpp_parsers::message::MessageType::Groupchat {
            return Err(EnvelopeError::NotGroupchat);
        }

        let subject = value
            .subjects
            .get(&jid::Lang::new("").unwrap_or_default())
            .map(|s| s.0.clone())
            .or_else(|| value.subjects.values().next().map(|s| s.0.clone()));

        let oi = value
            .payloads
            .iter()
            .find(|p| p.is("x", "nwws-oi"))
            .ok_or(EnvelopeError::MissingEnvelope)?;

        let message = oi.text();

        // Some messages have every \n replaced with \n\n; detect and undo.
        let message = if message.matches('\n').count() == message.matches("\n\n").count() * 2 {
            message.replace("\n\n", "\n")
        } else {
            message
        };

        let awipsid = oi
            .attr("awipsid")
            .ok_or(EnvelopeError::MissingAttribute("awipsid"))?;
        let cccc = oi
            .attr("cccc")
            .ok_or(EnvelopeError::MissingAttribute("cccc"))?;
        let id = oi.attr("id").ok_or(EnvelopeError::MissingAttribute("id"))?;
        let issue = oi
            .attr("issue")
            .ok_or(EnvelopeError::MissingAttribute("issue"))?;
        let ttaaii = oi
            .attr("ttaaii")
            .ok_or(EnvelopeError::MissingAttribute("ttaaii"))?;

        if ttaaii.len() != 6 {
            return Err(EnvelopeError::InvalidLength {
                field: "ttaaii",
                expected: 6,
                actual: ttaaii.len(),
            });
        }
        if cccc.len() != 4 {
            return Err(EnvelopeError::InvalidLength {
                field: "cccc",
                expected: 4,
                actual: cccc.len(),
            });
        }

        let issued_at = chrono::DateTime::parse_from_rfc3339(issue)
            .map_err(|_| EnvelopeError::InvalidTimestamp(issue.to_string()))?
            .with_timezone(&chrono::Utc);

        Ok(Self {
            id: id.to_string(),
            subject,
            body_text: message,
            awips_id: Some(awipsid).filter(|s| !s.is_empty()).map(str::to_string),
            cccc: cccc.to_string(),
            ttaaii: ttaaii.to_string(),
            issued_at,
            received_at,
            room_jid: room_jid.to_string(),
        })
    }
}

/// Why a stanza failed to decode into a [`WireMessage`]. Not a
/// [`crate::error::Error`] variant: the receiver counts these and drops
/// the stanza rather than surfacing them as hard failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    NotGroupchat,
    MissingEnvelope,
    MissingAttribute(&'static str),
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    InvalidTimestamp(String),
}

impl EnvelopeError {
    /// Which stats counter this failure increments.
    pub fn counter_name(&self) -> &'static str {
        match self {
            EnvelopeError::NotGroupchat | EnvelopeError::MissingEnvelope => {
                "malformed_envelope"
            }
            _ => "malformed_header",
        }
    }
}

impl std::fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeError::NotGroupchat => write!(f, "message is not type=groupchat"),
            EnvelopeError::MissingEnvelope => write!(f, "missing <x xmlns=\"nwws-oi\"> envelope"),
            EnvelopeError::MissingAttribute(a) => write!(f, "missing attribute {a}"),
            EnvelopeError::InvalidLength {
                field,
                expected,
                actual,
            } => write!(
                f,
                "field {field} has length {actual}, expected {expected}"
            ),
            EnvelopeError::InvalidTimestamp(v) => write!(f, "invalid timestamp: {v}"),
        }
    }
}

impl std::error::Error for EnvelopeError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(xml: &str) -> Result<WireMessage, EnvelopeError> {
        let element: xmpp_parsers::Element = xml.parse().unwrap();
        let msg: xmpp_parsers::message::Message = element.try_into().unwrap();
        WireMessage::decode(
            msg,
            "nwws@conference.nwws-oi.weather.gov",
            chrono::DateTime::parse_from_rfc3339("2024-01-15T18:30:00Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
        )
    }

    #[test]
    fn rejects_banner_without_envelope() {
        let err = decode(
            r#"<message xmlns="jabber:client" from="nwws@conference.nwws-oi.weather.gov" to="w@nwws-oi.weather.gov/todo" type="groupchat"><subject>National Weather Wire Service Open Interface</subject></message>"#,
        )
        .unwrap_err();
        assert_eq!(err, EnvelopeError::MissingEnvelope);
        assert_eq!(err.counter_name(), "malformed_envelope");
    }

    #[test]
    fn rejects_non_groupchat() {
        let err = decode(
            r#"<message xmlns="jabber:client" from="nwws-oi.weather.gov" to="w@nwws-oi.weather.gov/uuid/x"><subject>US Federal Government</subject></message>"#,
        )
        .unwrap_err();
        assert_eq!(err, EnvelopeError::NotGroupchat);
    }

    #[test]
    fn decodes_a_product() {
        let msg = decode(
            r#"<message xmlns="jabber:client" to="w@nwws-oi.weather.gov/uuid/x" type="groupchat" from="nwws@conference.nwws-oi.weather.gov/nwws-oi"><body>KLMK issues RRM</body><x xmlns="nwws-oi" cccc="KLMK" ttaaii="SRUS43" issue="2022-02-04T02:54:00Z" awipsid="RRMLMK" id="14425.25117"><![CDATA[SRUS43 KLMK 040254

RRMLMK

TEST PRODUCT BODY
]]></x></message>"#,
        )
        .unwrap();
        assert_eq!(msg.ttaaii, "SRUS43");
        assert_eq!(msg.cccc, "KLMK");
        assert_eq!(msg.awips_id.as_deref(), Some("RRMLMK"));
        assert_eq!(msg.id, "14425.25117");
        assert!(msg.body_text.starts_with("SRUS43 KLMK 040254"));
    }

    #[test]
    fn rejects_short_ttaaii() {
        let err = decode(
            r#"<message xmlns="jabber:client" to="w@nwws-oi.weather.gov/uuid/x" type="groupchat" from="nwws@conference.nwws-oi.weather.gov/nwws-oi"><x xmlns="nwws-oi" cccc="KLMK" ttaaii="SR" issue="2022-02-04T02:54:00Z" awipsid="RRMLMK" id="1"><![CDATA[x]]></x></message>"#,
        )
        .unwrap_err();
        assert!(matches!(err, EnvelopeError::InvalidLength { field: "ttaaii", .. }));
    }

    #[test]
    fn empty_awips_id_becomes_none() {
        let msg = decode(
            r#"<message xmlns="jabber:client" to="w@nwws-oi.weather.gov/uuid/x" type="groupchat" from="nwws@conference.nwws-oi.weather.gov/nwws-oi"><x xmlns="nwws-oi" cccc="PHEB" ttaaii="NTXX98" issue="2022-02-04T01:23:00Z" awipsid="" id="1"><![CDATA[test]]></x></message>"#,
        )
        .unwrap();
        assert_eq!(msg.awips_id, None);
    }
}
