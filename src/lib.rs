//! Streaming ingestion client for a real-time social feed.
//!
//! One long-lived authenticated HTTP connection, decoded incrementally as
//! newline-delimited JSON and dispatched in order to a consumer task:
//!
//! ```no_run
//! use feedstream::{ClientConfig, CredentialKeys, StreamClient, StreamEndpoints, StreamEvent};
//!
//! # async fn run(keys: CredentialKeys) -> Result<(), feedstream::ClientError> {
//! let client = StreamClient::new(keys, StreamEndpoints::default(), ClientConfig::default())?;
//! let mut subscription = client.connect_sample().await?;
//! while let Some(event) = subscription.recv().await {
//!     if let StreamEvent::Tweet(tweet) = event {
//!         println!("{}", tweet.text);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod cache;
pub mod config;
pub mod decoder;
pub mod dispatch;
pub mod error;
pub mod transport;
pub mod tweet;

pub use auth::{CredentialKeys, NonceProvider, OauthSigner, SystemNonce};
pub use cache::{CacheEntry, ResponseCache};
pub use config::{ClientConfig, FileConfig, StreamEndpoints};
pub use decoder::{decode_stream, LineDecoder, StreamEvent};
pub use dispatch::{CancelMode, QueuePolicy, StreamClient, Subscription};
pub use error::{AuthError, CacheError, ClientError, DecodeError, TransportError};
pub use transport::{
    ByteStream, HttpObserver, HttpTransport, LogDetail, SignedRequest, StreamRequest,
    TracingObserver, Transport,
};
pub use tweet::{Entity, Tweet};
