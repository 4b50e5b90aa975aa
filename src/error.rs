//! Error taxonomy: every kind here is local to its stage and
//! never propagates across a pipeline boundary as an exception — the
//! pipeline engine converts sink/stage results into stats + log records.

use thiserror::Error;

/// Errors raised while loading or validating configuration. Fatal: the
/// process exits with code 1.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("missing required setting: {0}")]
    MissingRequired(&'static str),
    #[error("invalid value for {field}: {detail}")]
    Invalid { field: &'static str, detail: String },
}

/// Errors raised by the XMPP receiver (C3).
#[derive(Error, Debug)]
pub enum ReceiverError {
    #[error("the configuration is invalid: {0}")]
    Configuration(#[source] tokio_xmpp::Error),
    #[error("the credentials were refused: {0}")]
    Credentials(#[source] tokio_xmpp::Error),
    #[error("a network error occurred: {0}")]
    Network(#[source] tokio_xmpp::Error),
    #[error("an XMPP parse error occurred: {0}")]
    XmppParse(#[from] xmpp_parsers::Error),
    #[error("the XMPP stream ended")]
    StreamEnded,
    #[error("stanza missing the nwws-oi envelope element")]
    MalformedEnvelope,
    #[error("stanza header fields failed validation: {0}")]
    MalformedHeader(String),
    #[error("authentication failed {attempts} times, giving up")]
    AuthExhausted { attempts: u32 },
}

impl From<tokio_xmpp::Error> for ReceiverError {
    fn from(e: tokio_xmpp::Error) -> Self {
        Self::Network(e)
    }
}

/// Errors raised while parsing a [`crate::model::WireMessage`] (C1).
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("no WMO abbreviated heading found")]
    MissingWmoHeader,
    #[error("could not parse UGC line: {0}")]
    MalformedUgc(String),
    #[error("UGC list mixes county (C) and zone (Z) prefixes")]
    MixedUgcPrefix,
    #[error("could not parse VTEC string: {0}")]
    MalformedVtec(String),
    #[error("structural damage in product text: {0}")]
    Structural(String),
}

/// Errors surfaced by geo lookup (C2). `NotFound` is soft — callers treat
/// it as `Option::None`, never as a hard failure.
#[derive(Error, Debug)]
pub enum GeoError {
    #[error("failed to load geo dataset: {0}")]
    LoadFailed(String),
}

/// Errors raised by a pipeline stage (C4).
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("ingress queue closed")]
    QueueClosed,
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("pipeline shutting down")]
    ShuttingDown,
}

/// Errors raised by a sink (C5/C6). Distinguishes transient (retryable)
/// from terminal (drop-and-count) failure
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),
    #[error("database unavailable: {0}")]
    DatabaseUnavailable(String),
    #[error("payload too large ({size} bytes)")]
    PayloadTooLarge { size: usize },
    #[error("sink authentication failed: {0}")]
    AuthFailure(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("sink did not respond within {seconds}s")]
    Timeout { seconds: u64 },
}

impl SinkError {
    /// Whether the pipeline's error policy should retry this failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SinkError::BrokerUnavailable(_)
                | SinkError::DatabaseUnavailable(_)
                | SinkError::Timeout { .. }
        )
    }
}

/// Top-level error type gluing the component taxonomies together for
/// `main`. Small, component-scoped error enums convertible into one
/// another via `#[from]`.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Receiver(#[from] ReceiverError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Geo(#[from] GeoError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Process exit codes
pub mod exit_code {
    pub const OK: i32 = 0;
    pub const CONFIG_ERROR: i32 = 1;
    pub const AUTH_FAILURE: i32 = 2;
    pub const RUNTIME_ERROR: i32 = 3;
}
