//! Runs one streaming attempt from open to terminal callback.
//!
//! A `StreamJob` says where to connect, how to decode the `complete` payload
//! and what to write to the cache. The driver owns everything else: the
//! connection, the retry machine, cancellation and the attempt epoch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use recs_core::RecsError;
use recs_core::config::StreamConfig;
use recs_core::error::Result;
use recs_core::generation::Callbacks;
use recs_core::progress::{ProgressEvent, ProgressStatus};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::connection::{ConnectionHandle, ConnectionManager, ConnectionSettings, ConnectionSignal};
use crate::stream_state::{RetryPolicy, StreamAction, StreamInput, StreamMachine};
use crate::transport::{StreamAddress, StreamTransport};

pub const RETRIES_EXHAUSTED: &str = "connection failed after retries";

/// What a streaming controller contributes to an attempt.
#[async_trait]
pub trait StreamJob: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Short name used in logs.
    fn label(&self) -> &'static str;

    /// Resolves the stream address. Runs once per attempt; reconnects reuse it.
    async fn prepare(&self) -> Result<StreamAddress>;

    /// Decodes the `result` of the `complete` event.
    fn decode(&self, event: &ProgressEvent) -> Result<Self::Output>;

    /// Cache writes performed before `on_complete` is delivered.
    async fn on_complete(&self, output: &Self::Output);
}

/// Owns the connection of one controller and the epoch of its attempts.
pub struct StreamDriver {
    connections: Arc<Mutex<ConnectionManager>>,
    policy: RetryPolicy,
    epoch: Arc<AtomicU64>,
    cancel: Mutex<CancellationToken>,
}

impl StreamDriver {
    pub fn new(transport: Arc<dyn StreamTransport>, config: &StreamConfig) -> Self {
        Self {
            connections: Arc::new(Mutex::new(ConnectionManager::new(
                transport,
                ConnectionSettings::from(config),
            ))),
            policy: RetryPolicy::from(config),
            epoch: Arc::new(AtomicU64::new(0)),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Starts a new attempt, superseding the in-flight one.
    ///
    /// Returns the attempt epoch. Must be called within a tokio runtime.
    pub fn start<J: StreamJob>(&self, job: J, callbacks: Callbacks<J::Output>) -> u64 {
        let (epoch, cancel) = self.supersede();
        tracing::info!(job = job.label(), attempt = epoch, "stream: attempt started");

        let attempt = Attempt {
            epoch,
            current: self.epoch.clone(),
            cancel,
            connections: self.connections.clone(),
            policy: self.policy,
            handle: None,
            signals: None,
        };
        tokio::spawn(attempt.run(job, callbacks));
        epoch
    }

    /// Abandons the in-flight attempt; none of its callbacks fire afterwards.
    pub fn cancel(&self) {
        let (epoch, _) = self.supersede();
        tracing::debug!(epoch, "stream: attempt cancelled");
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.connections).active_handle().is_some()
    }

    /// Bumps the epoch, cancels the old token and closes the connection,
    /// all before returning.
    fn supersede(&self) -> (u64, CancellationToken) {
        let mut cancel = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        cancel.cancel();
        *cancel = CancellationToken::new();
        lock(&self.connections).close_active();
        (epoch, cancel.clone())
    }
}

impl Drop for StreamDriver {
    fn drop(&mut self) {
        self.supersede();
    }
}

fn lock(connections: &Mutex<ConnectionManager>) -> MutexGuard<'_, ConnectionManager> {
    connections.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Attempt {
    epoch: u64,
    current: Arc<AtomicU64>,
    cancel: CancellationToken,
    connections: Arc<Mutex<ConnectionManager>>,
    policy: RetryPolicy,
    handle: Option<ConnectionHandle>,
    signals: Option<mpsc::UnboundedReceiver<ConnectionSignal>>,
}

impl Attempt {
    fn is_current(&self) -> bool {
        !self.cancel.is_cancelled() && self.current.load(Ordering::SeqCst) == self.epoch
    }

    fn fail<T>(&self, callbacks: &mut Callbacks<T>, error: RecsError) {
        if self.is_current() && callbacks.fail(error.clone()) {
            tracing::info!(attempt = self.epoch, error = %error, "stream: attempt failed");
        }
    }

    fn close(&mut self) {
        self.signals = None;
        if let Some(handle) = self.handle.take() {
            lock(&self.connections).close(handle);
        }
    }

    async fn run<J: StreamJob>(mut self, job: J, mut callbacks: Callbacks<J::Output>) {
        let prepared = tokio::select! {
            _ = self.cancel.cancelled() => return,
            prepared = job.prepare() => prepared,
        };
        let address = match prepared {
            Ok(address) => address,
            Err(err) => {
                self.fail(&mut callbacks, err);
                return;
            }
        };

        let mut machine = StreamMachine::new(self.policy);
        let mut input = StreamInput::Start;

        loop {
            let mut retry_delay: Option<Duration> = None;

            for action in machine.step(input) {
                match action {
                    StreamAction::Open => {
                        if !self.is_current() {
                            return;
                        }
                        let (handle, signals) = lock(&self.connections).open(address.clone());
                        self.handle = Some(handle);
                        self.signals = Some(signals);
                    }
                    StreamAction::Close => self.close(),
                    StreamAction::ScheduleRetry { attempt, delay } => {
                        tracing::warn!(
                            job = job.label(),
                            retry = attempt,
                            delay_ms = delay.as_millis() as u64,
                            "stream: reconnecting"
                        );
                        retry_delay = Some(delay);
                    }
                    StreamAction::GiveUp => {
                        self.fail(&mut callbacks, RecsError::stream_transport(RETRIES_EXHAUSTED));
                    }
                }
            }

            if machine.is_closed() {
                return;
            }

            input = match retry_delay {
                Some(delay) => tokio::select! {
                    _ = self.cancel.cancelled() => StreamInput::Cancel,
                    _ = tokio::time::sleep(delay) => StreamInput::RetryElapsed,
                },
                None => {
                    let signal = match self.signals.as_mut() {
                        Some(signals) => tokio::select! {
                            _ = self.cancel.cancelled() => None,
                            signal = signals.recv() => Some(signal),
                        },
                        None => None,
                    };
                    match signal {
                        // Cancelled: the canceller already closed the connection
                        None => return,
                        Some(signal) => self.apply(&job, &mut callbacks, signal).await,
                    }
                }
            };
        }
    }

    /// Applies one connection signal and returns the machine input for it.
    async fn apply<J: StreamJob>(
        &mut self,
        job: &J,
        callbacks: &mut Callbacks<J::Output>,
        signal: Option<ConnectionSignal>,
    ) -> StreamInput {
        if !self.is_current() {
            return StreamInput::Cancel;
        }

        match signal {
            Some(ConnectionSignal::Opened) => StreamInput::Opened,
            Some(ConnectionSignal::Event(event)) => {
                callbacks.progress(&event);
                match event.status {
                    ProgressStatus::Complete => {
                        if !callbacks.is_pending() {
                            return StreamInput::Terminal;
                        }
                        match job.decode(&event) {
                            Ok(output) => {
                                job.on_complete(&output).await;
                                if self.is_current() && callbacks.complete(output) {
                                    tracing::info!(job = job.label(), attempt = self.epoch, "stream: attempt complete");
                                }
                                StreamInput::Terminal
                            }
                            Err(err) => {
                                self.fail(callbacks, err);
                                StreamInput::ParseFailed
                            }
                        }
                    }
                    ProgressStatus::Error => {
                        self.fail(callbacks, RecsError::server(event.error_message()));
                        StreamInput::Terminal
                    }
                    ProgressStatus::Queued | ProgressStatus::Processing => StreamInput::Message,
                }
            }
            Some(ConnectionSignal::ParseFailure(err)) => {
                self.fail(callbacks, err);
                StreamInput::ParseFailed
            }
            Some(ConnectionSignal::Rejected(err)) => {
                self.fail(callbacks, err);
                StreamInput::Rejected
            }
            Some(ConnectionSignal::TransportLost(err)) => {
                tracing::debug!(attempt = self.epoch, error = %err, "stream: transport lost");
                StreamInput::TransportLost
            }
            // The reader ended without reporting; treat it as a lost transport
            None => StreamInput::TransportLost,
        }
    }
}
