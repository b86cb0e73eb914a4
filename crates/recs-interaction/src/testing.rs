//! In-memory `StreamTransport` whose connections are fed by the test.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use recs_core::RecsError;
use recs_core::error::Result;
use tokio::sync::mpsc;

use crate::transport::{FrameStream, StreamAddress, StreamFrame, StreamTransport};

enum Scripted {
    Connection(mpsc::UnboundedReceiver<StreamFrame>),
    Refusal(RecsError),
}

/// Hands out pre-registered connections in order, one per `connect`.
#[derive(Default)]
pub struct ScriptedTransport {
    queue: Mutex<VecDeque<Scripted>>,
    addresses: Mutex<Vec<StreamAddress>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers the next connection and returns its feeding end.
    pub fn push_connection(&self) -> ScriptedConnection {
        let (tx, rx) = mpsc::unbounded_channel();
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).push_back(Scripted::Connection(rx));
        ScriptedConnection {
            tx: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Registers a connection that delivers `frames` and then ends.
    pub fn push_frames(&self, frames: impl IntoIterator<Item = StreamFrame>) {
        let conn = self.push_connection();
        for frame in frames {
            conn.send(frame);
        }
        conn.end();
    }

    /// Registers a connect attempt that fails with `error`.
    pub fn push_refusal(&self, error: RecsError) {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).push_back(Scripted::Refusal(error));
    }

    pub fn connect_count(&self) -> usize {
        self.addresses.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn addresses(&self) -> Vec<StreamAddress> {
        self.addresses.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    async fn connect(&self, address: &StreamAddress) -> Result<FrameStream> {
        self.addresses.lock().unwrap_or_else(PoisonError::into_inner).push(address.clone());
        let next = self.queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();

        match next {
            Some(Scripted::Connection(rx)) => {
                let frames = futures::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|frame| (frame, rx))
                });
                Ok(Box::pin(frames))
            }
            Some(Scripted::Refusal(err)) => Err(err),
            None => Err(RecsError::network("no scripted connection left")),
        }
    }
}

/// Feeding end of one scripted connection.
#[derive(Clone)]
pub struct ScriptedConnection {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<StreamFrame>>>>,
}

impl ScriptedConnection {
    pub fn send(&self, frame: StreamFrame) {
        if let Some(tx) = self.tx.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            let _ = tx.send(frame);
        }
    }

    pub fn message(&self, raw: &str) {
        self.send(StreamFrame::Message(raw.to_string()));
    }

    /// Ends the stream, as when the endpoint closes.
    pub fn end(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}
