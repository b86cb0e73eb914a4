//! The network side of a progress stream.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use recs_core::error::Result;

/// Where a stream is opened, with the credential to present.
#[derive(Clone, PartialEq, Eq)]
pub struct StreamAddress {
    pub url: String,
    pub bearer: Option<String>,
}

impl StreamAddress {
    pub fn new(url: impl Into<String>, bearer: Option<String>) -> Self {
        Self {
            url: url.into(),
            bearer,
        }
    }
}

// Keep the token out of logs
impl std::fmt::Debug for StreamAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamAddress")
            .field("url", &self.url)
            .field("authenticated", &self.bearer.is_some())
            .finish()
    }
}

/// One item observed on an open stream.
///
/// The end of the stream means the endpoint is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// The endpoint accepted the connection.
    Opened,
    /// One complete `data:` payload.
    Message(String),
    /// The transport reported instability. It may still recover.
    Error(String),
}

pub type FrameStream = Pin<Box<dyn Stream<Item = StreamFrame> + Send>>;

/// Opens long-lived, server-to-client text event streams.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Connects to `address`. An `Err` means the endpoint refused or was
    /// unreachable; the caller treats it like a stream that closed at once.
    async fn connect(&self, address: &StreamAddress) -> Result<FrameStream>;
}
