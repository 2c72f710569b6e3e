use thiserror::Error;

/// Credential problems detected while signing a request.
///
/// Fatal to the connection attempt; never retried inside the client.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credential: {field}")]
    MissingCredential { field: &'static str },

    #[error("request not signable: {reason}")]
    Unsignable { reason: String },
}

/// Connection-level failures.
///
/// Before the first chunk these fail the open; after it, the byte stream
/// ends with one terminal `TransportError` so callers can tell an orderly
/// end of stream from an interrupted one.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid request URL: {0}")]
    InvalidUrl(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("request timeout")]
    Timeout,

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("connection interrupted: {0}")]
    Interrupted(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else if let Some(status) = e.status() {
            TransportError::Status(status.as_u16())
        } else {
            TransportError::Interrupted(e.to_string())
        }
    }
}

/// A single malformed or oversized message unit.
///
/// Recovered locally: the decoder reports it and moves on to the next line.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed message unit: {source}")]
    Malformed {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("message unit is not a status object")]
    UnrecognizedShape { line: String },

    #[error("message unit exceeds {limit} bytes")]
    Oversized { limit: usize },

    #[error("message unit is not valid UTF-8")]
    InvalidUtf8,
}

/// Cache failures are best-effort by design: logged and treated as a miss,
/// never surfaced to the consumer.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache entry codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("cache entry body is not valid base64")]
    Body(#[from] base64::DecodeError),
}

/// Errors that can fail `StreamClient::connect` before any event is produced.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
