//! Lifecycle of the single live progress stream.
//!
//! The manager owns at most one connection. Each connection runs a reader task
//! that decodes frames into `ConnectionSignal`s for the controller. A
//! transport error is only escalated after the debounce window, and only if
//! the endpoint is confirmed closed by then.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use recs_core::RecsError;
use recs_core::config::StreamConfig;
use recs_core::progress::ProgressEvent;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;

use crate::transport::{StreamAddress, StreamFrame, StreamTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Endpoint state as last observed by the reader task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closed,
}

/// What a connection reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionSignal {
    Opened,
    Event(ProgressEvent),
    /// A message could not be decoded. The connection is already closed.
    ParseFailure(RecsError),
    /// The endpoint stayed closed through the debounce window.
    TransportLost(RecsError),
    /// The endpoint refused the connection with an error that reconnecting
    /// cannot fix (rejected input, bad credentials). Not debounced.
    Rejected(RecsError),
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub keep_alive: Duration,
    pub debounce: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&StreamConfig::default())
    }
}

impl From<&StreamConfig> for ConnectionSettings {
    fn from(config: &StreamConfig) -> Self {
        Self {
            keep_alive: config.keep_alive(),
            debounce: config.debounce(),
        }
    }
}

struct ActiveConnection {
    handle: ConnectionHandle,
    cancel: CancellationToken,
}

pub struct ConnectionManager {
    transport: Arc<dyn StreamTransport>,
    settings: ConnectionSettings,
    next_id: u64,
    active: Option<ActiveConnection>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn StreamTransport>, settings: ConnectionSettings) -> Self {
        Self {
            transport,
            settings,
            next_id: 0,
            active: None,
        }
    }

    /// Opens a connection to `address`, closing the current one first.
    ///
    /// Must be called within a tokio runtime.
    pub fn open(
        &mut self,
        address: StreamAddress,
    ) -> (ConnectionHandle, mpsc::UnboundedReceiver<ConnectionSignal>) {
        self.close_active();

        self.next_id += 1;
        let handle = ConnectionHandle(self.next_id);
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        tracing::info!(connection = handle.0, url = %address.url, "stream: opening");

        let reader = ConnectionReader {
            handle,
            transport: self.transport.clone(),
            settings: self.settings,
            cancel: cancel.clone(),
            tx,
            ready_state: Arc::new(Mutex::new(ReadyState::Connecting)),
            debounce_pending: Arc::new(AtomicBool::new(false)),
        };
        tokio::spawn(reader.run(address));

        self.active = Some(ActiveConnection { handle, cancel });
        (handle, rx)
    }

    /// Closes `handle` if it is the live connection. Idempotent.
    pub fn close(&mut self, handle: ConnectionHandle) {
        if self.active.as_ref().is_some_and(|a| a.handle == handle) {
            self.close_active();
        }
    }

    /// Closes whatever connection is live. Idempotent.
    pub fn close_active(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::debug!(connection = active.handle.0, "stream: closing");
            active.cancel.cancel();
        }
    }

    pub fn is_open(&self, handle: ConnectionHandle) -> bool {
        self.active.as_ref().is_some_and(|a| a.handle == handle)
    }

    pub fn active_handle(&self) -> Option<ConnectionHandle> {
        self.active.as_ref().map(|a| a.handle)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close_active();
    }
}

/// Decodes one raw message. A failure is fatal for the connection.
pub fn on_message(raw: &str) -> Result<ProgressEvent, RecsError> {
    ProgressEvent::parse(raw)
}

struct ConnectionReader {
    handle: ConnectionHandle,
    transport: Arc<dyn StreamTransport>,
    settings: ConnectionSettings,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<ConnectionSignal>,
    ready_state: Arc<Mutex<ReadyState>>,
    debounce_pending: Arc<AtomicBool>,
}

impl ConnectionReader {
    fn set_state(&self, state: ReadyState) {
        *self.ready_state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn send(&self, signal: ConnectionSignal) {
        if !self.cancel.is_cancelled() {
            let _ = self.tx.send(signal);
        }
    }

    async fn run(self, address: StreamAddress) {
        let connected = tokio::select! {
            _ = self.cancel.cancelled() => return,
            connected = self.transport.connect(&address) => connected,
        };

        let mut frames = match connected {
            Ok(frames) => frames,
            Err(err) => {
                tracing::warn!(connection = self.handle.0, error = %err, "stream: connect failed");
                self.set_state(ReadyState::Closed);
                if err.is_retryable() {
                    self.classify_transport_error(err.to_string());
                } else {
                    self.send(ConnectionSignal::Rejected(err));
                }
                return;
            }
        };

        let start = Instant::now() + self.settings.keep_alive;
        let mut keep_alive = interval_at(start, self.settings.keep_alive);
        let mut last_seen = Instant::now();
        let mut last_error: Option<String> = None;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.set_state(ReadyState::Closed);
                    return;
                }
                _ = keep_alive.tick() => {
                    tracing::trace!(
                        connection = self.handle.0,
                        idle_ms = last_seen.elapsed().as_millis() as u64,
                        "stream: keep-alive"
                    );
                }
                frame = frames.next() => {
                    last_seen = Instant::now();
                    match frame {
                        Some(StreamFrame::Opened) => {
                            self.set_state(ReadyState::Open);
                            self.send(ConnectionSignal::Opened);
                        }
                        Some(StreamFrame::Message(raw)) => {
                            self.set_state(ReadyState::Open);
                            match on_message(&raw) {
                                Ok(event) => self.send(ConnectionSignal::Event(event)),
                                Err(err) => {
                                    tracing::warn!(connection = self.handle.0, error = %err, "stream: unparseable message");
                                    self.set_state(ReadyState::Closed);
                                    self.send(ConnectionSignal::ParseFailure(err));
                                    return;
                                }
                            }
                        }
                        Some(StreamFrame::Error(reason)) => {
                            tracing::debug!(connection = self.handle.0, %reason, "stream: transport instability");
                            self.set_state(ReadyState::Connecting);
                            self.classify_transport_error(reason.clone());
                            last_error = Some(reason);
                        }
                        None => {
                            self.set_state(ReadyState::Closed);
                            let reason = last_error
                                .take()
                                .unwrap_or_else(|| "connection closed before a terminal event".to_string());
                            self.classify_transport_error(reason);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Starts the debounce check unless one is already running.
    ///
    /// After the window the endpoint state is re-read: only a confirmed
    /// `Closed` is escalated to the owner.
    fn classify_transport_error(&self, reason: String) {
        if self.debounce_pending.swap(true, Ordering::SeqCst) {
            return;
        }

        let handle = self.handle;
        let debounce = self.settings.debounce;
        let cancel = self.cancel.clone();
        let tx = self.tx.clone();
        let ready_state = self.ready_state.clone();
        let pending = self.debounce_pending.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(debounce) => {}
            }
            pending.store(false, Ordering::SeqCst);

            let state = *ready_state.lock().unwrap_or_else(PoisonError::into_inner);
            if state == ReadyState::Closed && !cancel.is_cancelled() {
                tracing::warn!(connection = handle.0, %reason, "stream: transport lost");
                let _ = tx.send(ConnectionSignal::TransportLost(RecsError::stream_transport(
                    reason,
                )));
            } else {
                tracing::debug!(connection = handle.0, ?state, "stream: recovered within debounce window");
            }
        });
    }
}
