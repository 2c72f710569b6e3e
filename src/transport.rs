use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use reqwest::Method;
use tracing::debug;

use crate::cache::{CacheEntry, ResponseCache};
use crate::error::TransportError;

/// Lazily-produced, possibly-infinite sequence of raw chunks from the wire.
///
/// An `Err` item is terminal: it distinguishes an interrupted stream from an
/// orderly end (the stream simply finishing).
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// An outbound request, immutable once constructed; built fresh per attempt.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Form-encoded body parameters, when present. They participate in
    /// request signing.
    pub form: Option<Vec<(String, String)>>,
    /// Marks the long-lived feed connection, which is never cached.
    pub streaming: bool,
}

impl StreamRequest {
    /// A long-lived GET against a streaming endpoint.
    pub fn streaming(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            form: None,
            streaming: true,
        }
    }

    /// A long-lived POST against a streaming endpoint with form parameters
    /// (the filter endpoint takes its predicates this way).
    pub fn streaming_form(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: Vec::new(),
            form: Some(form),
            streaming: true,
        }
    }

    /// An ordinary finite GET, eligible for response caching.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            form: None,
            streaming: false,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Cacheable means an idempotent finite fetch: GET and not streaming.
    pub fn cacheable(&self) -> bool {
        self.method == Method::GET && !self.streaming
    }
}

/// A request plus its `Authorization` header. Never mutated after signing.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub request: StreamRequest,
    pub authorization: String,
}

impl SignedRequest {
    /// Canonical cache key: method, URL, and the request headers that select
    /// the response representation. The authorization header is excluded so
    /// rotating nonces do not defeat the cache.
    pub fn cache_key(&self) -> String {
        let mut key = format!("{} {}", self.request.method, self.request.url);

        let mut relevant: Vec<(String, &str)> = self
            .request
            .headers
            .iter()
            .filter(|(name, _)| {
                name.eq_ignore_ascii_case("accept") || name.eq_ignore_ascii_case("accept-encoding")
            })
            .map(|(name, value)| (name.to_ascii_lowercase(), value.trim()))
            .collect();
        relevant.sort();

        for (name, value) in relevant {
            key.push('\n');
            key.push_str(&name);
            key.push(':');
            key.push_str(value);
        }

        key
    }
}

/// Verbosity of the observability hook, selected by the host's debug flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDetail {
    /// Fully suppressed.
    None,
    /// Request/response lines plus header-level detail.
    Headers,
}

/// Observability collaborator: sees every request/response pair.
///
/// Implementations must not block and must not alter request or response
/// semantics.
pub trait HttpObserver: Send + Sync {
    fn on_request(&self, request: &SignedRequest);
    fn on_response(&self, url: &str, status: u16, headers: &[(String, String)]);
}

/// Default observer that reports through `tracing` at debug level.
pub struct TracingObserver {
    detail: LogDetail,
}

impl TracingObserver {
    pub fn new(detail: LogDetail) -> Self {
        Self { detail }
    }
}

impl HttpObserver for TracingObserver {
    fn on_request(&self, request: &SignedRequest) {
        if self.detail == LogDetail::None {
            return;
        }
        debug!(method = %request.request.method, url = %request.request.url, "--> request");
        for (name, value) in &request.request.headers {
            debug!("--> {}: {}", name, value);
        }
    }

    fn on_response(&self, url: &str, status: u16, headers: &[(String, String)]) {
        if self.detail == LogDetail::None {
            return;
        }
        debug!(%url, status, "<-- response");
        for (name, value) in headers {
            debug!("<-- {}: {}", name, value);
        }
    }
}

/// Opens signed requests and exposes the response body as a byte stream.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, request: SignedRequest) -> Result<ByteStream, TransportError>;
}

/// Production transport over reqwest, with a response cache for finite GETs.
pub struct HttpTransport {
    client: reqwest::Client,
    cache: Arc<ResponseCache>,
    observer: Arc<dyn HttpObserver>,
    cache_lifetime: Duration,
}

impl HttpTransport {
    /// No whole-request timeout is set: it would cut the long-lived stream.
    pub fn new(
        cache: Arc<ResponseCache>,
        observer: Arc<dyn HttpObserver>,
        connect_timeout: Duration,
        read_timeout: Duration,
        cache_lifetime: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
            .map_err(TransportError::from)?;

        Ok(Self {
            client,
            cache,
            observer,
            cache_lifetime,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, signed: SignedRequest) -> Result<ByteStream, TransportError> {
        self.observer.on_request(&signed);

        let key = signed.cache_key();
        if signed.request.cacheable() {
            if let Some(entry) = self.cache.lookup(&key) {
                debug!(url = %signed.request.url, "serving response from cache");
                self.observer
                    .on_response(&signed.request.url, entry.status, &entry.headers);
                let body = Bytes::from(entry.body);
                return Ok(Box::pin(stream::once(async move { Ok(body) })));
            }
        }

        let mut builder = self
            .client
            .request(signed.request.method.clone(), &signed.request.url);
        for (name, value) in &signed.request.headers {
            builder = builder.header(name, value);
        }
        builder = builder.header(reqwest::header::AUTHORIZATION, &signed.authorization);
        if let Some(form) = &signed.request.form {
            builder = builder.form(form);
        }

        let response = builder.send().await.map_err(TransportError::from)?;

        let status = response.status();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        self.observer
            .on_response(&signed.request.url, status.as_u16(), &headers);

        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        if signed.request.cacheable() {
            let body = response.bytes().await.map_err(TransportError::from)?;
            let entry =
                CacheEntry::from_response(status.as_u16(), headers, body.to_vec(), self.cache_lifetime);
            self.cache.store(&key, entry);
            return Ok(Box::pin(stream::once(async move { Ok(body) })));
        }

        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(TransportError::from)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cacheable_requests() {
        assert!(StreamRequest::get("https://api.example.com/user.json").cacheable());
        assert!(!StreamRequest::streaming("https://stream.example.com/sample.json").cacheable());
        assert!(!StreamRequest::streaming_form(
            "https://stream.example.com/filter.json",
            vec![("track".to_string(), "rust".to_string())],
        )
        .cacheable());
    }

    #[test]
    fn test_cache_key_canonicalization() {
        let base = StreamRequest::get("https://api.example.com/user.json");
        let signed = |request: StreamRequest, authorization: &str| SignedRequest {
            request,
            authorization: authorization.to_string(),
        };

        // Authorization material must not affect the key
        let a = signed(base.clone(), "OAuth nonce-one");
        let b = signed(base.clone(), "OAuth nonce-two");
        assert_eq!(a.cache_key(), b.cache_key());

        // Representation-affecting headers do, regardless of case and order
        let c = signed(
            base.clone()
                .with_header("Accept", "application/json")
                .with_header("Accept-Encoding", "gzip"),
            "",
        );
        let d = signed(
            base.clone()
                .with_header("accept-encoding", "gzip")
                .with_header("accept", "application/json"),
            "",
        );
        assert_eq!(c.cache_key(), d.cache_key());
        assert_ne!(a.cache_key(), c.cache_key());

        // Unrelated headers do not
        let e = signed(base.with_header("User-Agent", "feedstream"), "");
        assert_eq!(a.cache_key(), e.cache_key());
    }
}
