use std::fmt;

use thiserror::Error;

/// Errors returned when a job cannot be queued.
///
/// Submission never waits; both variants mean the job was dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// Queue is at capacity.
    #[error("notification queue at capacity")]
    Full,

    /// Dispatcher has been shut down.
    #[error("notification queue is closed")]
    Closed,
}

/// Failure of a single HTTP attempt that produced no status code.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection refused, DNS failure, TLS handshake failure.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Connect or read timeout elapsed.
    #[error("request timed out")]
    Timeout,

    /// Stream error while sending the body or reading the response.
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Io(err.to_string())
        }
    }
}

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("invalid target url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("malformed configuration document: {0}")]
    Document(#[from] serde_json::Error),

    #[error("http client: {0}")]
    Client(String),
}

/// Errors raised by a discovery collaborator.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("host lookup failed for {host}: {source}")]
    HostLookup {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("discovery unavailable: {0}")]
    Unavailable(String),
}

/// Final status of one attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// 1xx, 2xx or 3xx.
    Delivered,
    /// 4xx; a deterministic rejection, never retried.
    ClientRejected,
    /// Retryable failure abandoned because the dispatcher was stopped.
    Retryable,
    /// Retryable failure on the last allowed attempt.
    Exhausted,
}

/// Result of delivering one job, consumed immediately for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub status: DeliveryStatus,
    /// Status code of the last attempt, `None` on transport failure.
    pub code: Option<u16>,
    pub attempts: u32,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        self.status == DeliveryStatus::Delivered
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryStatus::Delivered =>
                write!(f, "ok"),
            DeliveryStatus::ClientRejected =>
                write!(f, "noretry"),
            DeliveryStatus::Retryable =>
                write!(f, "abandoned"),
            DeliveryStatus::Exhausted =>
                write!(f, "exhausted"),
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "code={} ({}) attempts={}", code, self.status, self.attempts),
            None => write!(f, "code=none ({}) attempts={}", self.status, self.attempts),
        }
    }
}
