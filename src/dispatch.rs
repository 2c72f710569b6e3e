use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::auth::{CredentialKeys, OauthSigner};
use crate::cache::ResponseCache;
use crate::config::{ClientConfig, StreamEndpoints};
use crate::decoder::{decode_stream, StreamEvent};
use crate::error::ClientError;
use crate::transport::{HttpTransport, StreamRequest, TracingObserver, Transport};

/// What happens when the consumer cannot keep pace with the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Default: never blocks the I/O task; memory grows with the backlog.
    Unbounded,
    /// A full queue blocks the I/O task until the consumer catches up.
    /// Events are never dropped.
    Bounded(usize),
}

/// What `cancel()` does with events already queued for the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelMode {
    /// Default: queued events stay readable until the queue drains.
    Drain,
    /// The receiving end closes too; nothing further is delivered.
    Discard,
}

enum EventSender {
    Unbounded(mpsc::UnboundedSender<StreamEvent>),
    Bounded(mpsc::Sender<StreamEvent>),
}

impl EventSender {
    async fn send(&self, event: StreamEvent) -> Result<(), ()> {
        match self {
            EventSender::Unbounded(tx) => tx.send(event).map_err(|_| ()),
            EventSender::Bounded(tx) => tx.send(event).await.map_err(|_| ()),
        }
    }
}

#[derive(Debug)]
enum EventReceiver {
    Unbounded(mpsc::UnboundedReceiver<StreamEvent>),
    Bounded(mpsc::Receiver<StreamEvent>),
}

impl EventReceiver {
    async fn recv(&mut self) -> Option<StreamEvent> {
        match self {
            EventReceiver::Unbounded(rx) => rx.recv().await,
            EventReceiver::Bounded(rx) => rx.recv().await,
        }
    }
}

fn event_channel(policy: QueuePolicy) -> (EventSender, EventReceiver) {
    match policy {
        QueuePolicy::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (EventSender::Unbounded(tx), EventReceiver::Unbounded(rx))
        }
        QueuePolicy::Bounded(capacity) => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (EventSender::Bounded(tx), EventReceiver::Bounded(rx))
        }
    }
}

/// Entry point: signs requests, opens the transport, and dispatches decoded
/// events to the consumer over a FIFO channel.
///
/// The I/O side (network read, decode, cache writes) runs on a spawned tokio
/// task; the consumer side is whichever task awaits [`Subscription::recv`].
pub struct StreamClient {
    signer: OauthSigner,
    endpoints: StreamEndpoints,
    transport: Arc<dyn Transport>,
    config: ClientConfig,
}

impl StreamClient {
    pub fn new(
        keys: CredentialKeys,
        endpoints: StreamEndpoints,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let cache = Arc::new(ResponseCache::open(&config.cache_dir, config.cache_ceiling));
        let observer = Arc::new(TracingObserver::new(config.log_detail));
        let transport = HttpTransport::new(
            cache,
            observer,
            config.connect_timeout,
            config.read_timeout,
            config.cache_lifetime,
        )?;
        Ok(Self::with_transport(
            keys,
            endpoints,
            config,
            Arc::new(transport),
        ))
    }

    /// Wire an alternative transport (tests, custom HTTP stacks).
    pub fn with_transport(
        keys: CredentialKeys,
        endpoints: StreamEndpoints,
        config: ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            signer: OauthSigner::new(keys),
            endpoints,
            transport,
            config,
        }
    }

    /// Connect to the random-sample firehose.
    pub async fn connect_sample(&self) -> Result<Subscription, ClientError> {
        self.connect(StreamRequest::streaming(self.endpoints.sample())).await
    }

    /// Connect to the filtered stream with the given track predicate.
    pub async fn connect_filter(&self, track: &str) -> Result<Subscription, ClientError> {
        let request = StreamRequest::streaming_form(
            self.endpoints.filter(),
            vec![("track".to_string(), track.to_string())],
        );
        self.connect(request).await
    }

    /// Sign and open `request`, then spawn the I/O task feeding a new
    /// subscription. Fails fast on bad credentials or on transport errors
    /// that occur before the first chunk.
    pub async fn connect(&self, request: StreamRequest) -> Result<Subscription, ClientError> {
        let signed = self.signer.sign(&request)?;
        let bytes = self.transport.open(signed).await?;
        let events = decode_stream(bytes, self.config.max_line_bytes);

        let (sender, receiver) = event_channel(self.config.queue);
        let task = tokio::spawn(async move {
            futures::pin_mut!(events);
            while let Some(event) = events.next().await {
                if sender.send(event).await.is_err() {
                    debug!("consumer gone, stopping dispatch");
                    break;
                }
            }
        });

        Ok(Subscription {
            receiver,
            task,
            cancel_mode: self.config.cancel_mode,
            discarded: false,
        })
    }
}

/// Consumer-facing handle to a live stream session.
///
/// Events arrive in exactly the order they were framed from the wire. `None`
/// means the sequence is over: either an orderly end of stream or, if the
/// last received event was [`StreamEvent::Interrupted`], a transport failure.
#[derive(Debug)]
pub struct Subscription {
    receiver: EventReceiver,
    task: JoinHandle<()>,
    cancel_mode: CancelMode,
    discarded: bool,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        if self.discarded {
            return None;
        }
        self.receiver.recv().await
    }

    /// Tear down the session. Aborting the I/O task drops the response
    /// body, which closes the underlying connection.
    pub fn cancel(&mut self) {
        self.task.abort();
        if self.cancel_mode == CancelMode::Discard {
            self.discarded = true;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::{ByteStream, SignedRequest};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;
    use std::sync::Mutex;
    use std::time::Duration;

    struct MockTransport {
        chunks: Mutex<Option<Vec<Result<Bytes, TransportError>>>>,
        hold_open: bool,
    }

    impl MockTransport {
        fn new(chunks: Vec<Result<Bytes, TransportError>>, hold_open: bool) -> Arc<Self> {
            Arc::new(Self {
                chunks: Mutex::new(Some(chunks)),
                hold_open,
            })
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn open(&self, _request: SignedRequest) -> Result<ByteStream, TransportError> {
            let chunks = self.chunks.lock().unwrap().take().unwrap_or_default();
            if self.hold_open {
                Ok(Box::pin(stream::iter(chunks).chain(stream::pending())))
            } else {
                Ok(Box::pin(stream::iter(chunks)))
            }
        }
    }

    fn test_keys() -> CredentialKeys {
        CredentialKeys {
            consumer_key: "ck".to_string(),
            consumer_secret: "cs".to_string(),
            access_token: "at".to_string(),
            access_secret: "as".to_string(),
        }
    }

    fn client(config: ClientConfig, transport: Arc<dyn Transport>) -> StreamClient {
        StreamClient::with_transport(test_keys(), StreamEndpoints::default(), config, transport)
    }

    fn tweets(range: std::ops::RangeInclusive<u64>) -> Bytes {
        let mut wire = String::new();
        for id in range {
            wire.push_str(&format!("{{\"id\":{id},\"text\":\"t{id}\"}}\n"));
        }
        Bytes::from(wire)
    }

    async fn collect_ids(sub: &mut Subscription) -> Vec<u64> {
        let mut ids = Vec::new();
        while let Some(event) = sub.recv().await {
            if let StreamEvent::Tweet(tweet) = event {
                ids.push(tweet.id);
            }
        }
        ids
    }

    #[tokio::test]
    async fn test_events_arrive_in_emission_order() {
        let transport = MockTransport::new(
            vec![Ok(tweets(1..=10)), Ok(tweets(11..=20))],
            false,
        );
        let client = client(ClientConfig::default(), transport);

        let mut sub = client.connect_sample().await.unwrap();
        let ids = collect_ids(&mut sub).await;
        assert_eq!(ids, (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_bounded_queue_blocks_but_never_drops() {
        let transport = MockTransport::new(vec![Ok(tweets(1..=10))], false);
        let config = ClientConfig {
            queue: QueuePolicy::Bounded(1),
            ..ClientConfig::default()
        };
        let client = client(config, transport);

        let mut sub = client.connect_sample().await.unwrap();
        let mut ids = Vec::new();
        while let Some(event) = sub.recv().await {
            // A deliberately slow consumer: the producer must wait, not drop.
            tokio::time::sleep(Duration::from_millis(2)).await;
            if let StreamEvent::Tweet(tweet) = event {
                ids.push(tweet.id);
            }
        }
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_cancel_stops_delivery_and_ends_stream() {
        let transport = MockTransport::new(vec![Ok(tweets(1..=3))], true);
        let client = client(ClientConfig::default(), transport);

        let mut sub = client.connect_sample().await.unwrap();
        assert!(sub.recv().await.is_some());

        sub.cancel();
        // Drain mode: whatever was queued may still arrive, then the
        // sequence ends instead of waiting on the held-open connection.
        while sub.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn test_cancel_discard_drops_queued_events() {
        let transport = MockTransport::new(vec![Ok(tweets(1..=3))], true);
        let config = ClientConfig {
            cancel_mode: CancelMode::Discard,
            ..ClientConfig::default()
        };
        let client = client(config, transport);

        let mut sub = client.connect_sample().await.unwrap();
        // Give the I/O task a moment to queue everything.
        tokio::time::sleep(Duration::from_millis(10)).await;

        sub.cancel();
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_bad_credentials_fail_connect() {
        let transport = MockTransport::new(Vec::new(), false);
        let mut keys = test_keys();
        keys.consumer_secret = String::new();
        let client = StreamClient::with_transport(
            keys,
            StreamEndpoints::default(),
            ClientConfig::default(),
            transport,
        );

        let err = client.connect_sample().await.unwrap_err();
        assert!(matches!(err, ClientError::Auth(_)));
    }

    #[tokio::test]
    async fn test_transport_failure_reaches_consumer_last() {
        let transport = MockTransport::new(
            vec![
                Ok(tweets(1..=2)),
                Err(TransportError::Interrupted("reset".to_string())),
            ],
            false,
        );
        let client = client(ClientConfig::default(), transport);

        let mut sub = client.connect_sample().await.unwrap();
        let mut tags = Vec::new();
        while let Some(event) = sub.recv().await {
            tags.push(match event {
                StreamEvent::Tweet(t) => format!("tweet:{}", t.id),
                StreamEvent::Invalid(_) => "invalid".to_string(),
                StreamEvent::Interrupted(_) => "interrupted".to_string(),
            });
        }
        assert_eq!(tags, vec!["tweet:1", "tweet:2", "interrupted"]);
    }
}
