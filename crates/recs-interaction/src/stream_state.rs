//! Retry/reconnect state machine of one streaming attempt.
//!
//! `transition` is pure: it maps a state and an input to the next state and
//! the actions the driver must perform. All I/O lives in the driver.

use std::time::Duration;

use recs_core::config::StreamConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    Connecting,
    Streaming,
    Retrying { attempt: u32 },
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamInput {
    Start,
    Opened,
    Message,
    /// A `complete` or `error` event was dispatched.
    Terminal,
    ParseFailed,
    /// The endpoint refused with an error reconnecting cannot fix.
    Rejected,
    /// The connection manager confirmed the endpoint closed after debounce.
    TransportLost,
    RetryElapsed,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamAction {
    Open,
    Close,
    ScheduleRetry { attempt: u32, delay: Duration },
    /// Retries are exhausted; surface the failure.
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Linear backoff: the n-th retry waits `n * backoff`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&StreamConfig::default())
    }
}

impl From<&StreamConfig> for RetryPolicy {
    fn from(config: &StreamConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: config.backoff(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamState {
    pub phase: StreamPhase,
    pub retries: u32,
}

impl StreamState {
    pub const IDLE: StreamState = StreamState {
        phase: StreamPhase::Idle,
        retries: 0,
    };
}

pub fn transition(
    state: StreamState,
    input: StreamInput,
    policy: &RetryPolicy,
) -> (StreamState, Vec<StreamAction>) {
    use StreamAction as A;
    use StreamInput as I;
    use StreamPhase as P;

    let at = |phase: StreamPhase, retries: u32| StreamState { phase, retries };

    match (state.phase, input) {
        // Late input after the attempt ended is a no-op
        (P::Closed, _) => (state, vec![]),

        (_, I::Cancel) => (at(P::Closed, state.retries), vec![A::Close]),

        (P::Idle, I::Start) => (at(P::Connecting, 0), vec![A::Open]),
        (_, I::Start) => (at(P::Connecting, 0), vec![A::Close, A::Open]),

        (P::Connecting, I::Opened) => (at(P::Streaming, state.retries), vec![]),
        (P::Connecting | P::Streaming, I::Message) => (at(P::Streaming, state.retries), vec![]),

        (P::Connecting | P::Streaming, I::Terminal | I::ParseFailed | I::Rejected) => {
            (at(P::Closed, state.retries), vec![A::Close])
        }

        (P::Connecting | P::Streaming, I::TransportLost) => {
            if state.retries < policy.max_retries {
                let attempt = state.retries + 1;
                (
                    at(P::Retrying { attempt }, attempt),
                    vec![
                        A::Close,
                        A::ScheduleRetry {
                            attempt,
                            delay: policy.delay_for(attempt),
                        },
                    ],
                )
            } else {
                (at(P::Closed, state.retries), vec![A::Close, A::GiveUp])
            }
        }

        (P::Retrying { .. }, I::RetryElapsed) => (at(P::Connecting, state.retries), vec![A::Open]),

        _ => (state, vec![]),
    }
}

/// Mutable wrapper over `transition` used by the driver.
#[derive(Debug)]
pub struct StreamMachine {
    state: StreamState,
    policy: RetryPolicy,
}

impl StreamMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: StreamState::IDLE,
            policy,
        }
    }

    pub fn step(&mut self, input: StreamInput) -> Vec<StreamAction> {
        let (next, actions) = transition(self.state, input, &self.policy);
        if next != self.state {
            tracing::debug!(from = ?self.state.phase, to = ?next.phase, ?input, "stream: transition");
        }
        self.state = next;
        actions
    }

    pub fn phase(&self) -> StreamPhase {
        self.state.phase
    }

    pub fn retries(&self) -> u32 {
        self.state.retries
    }

    pub fn is_closed(&self) -> bool {
        self.state.phase == StreamPhase::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(500),
        }
    }

    #[test]
    fn test_happy_path() {
        let mut machine = StreamMachine::new(policy());
        assert_eq!(machine.step(StreamInput::Start), vec![StreamAction::Open]);
        assert_eq!(machine.step(StreamInput::Opened), vec![]);
        assert_eq!(machine.phase(), StreamPhase::Streaming);
        assert_eq!(machine.step(StreamInput::Message), vec![]);
        assert_eq!(machine.step(StreamInput::Terminal), vec![StreamAction::Close]);
        assert!(machine.is_closed());
    }

    #[test]
    fn test_retries_with_linear_backoff_then_gives_up() {
        let mut machine = StreamMachine::new(policy());
        machine.step(StreamInput::Start);

        for attempt in 1..=3 {
            let actions = machine.step(StreamInput::TransportLost);
            assert_eq!(
                actions,
                vec![
                    StreamAction::Close,
                    StreamAction::ScheduleRetry {
                        attempt,
                        delay: Duration::from_millis(500 * attempt as u64),
                    }
                ]
            );
            assert_eq!(machine.phase(), StreamPhase::Retrying { attempt });
            assert_eq!(machine.step(StreamInput::RetryElapsed), vec![StreamAction::Open]);
        }

        assert_eq!(
            machine.step(StreamInput::TransportLost),
            vec![StreamAction::Close, StreamAction::GiveUp]
        );
        assert!(machine.is_closed());
        assert_eq!(machine.retries(), 3);
    }

    #[test]
    fn test_parse_failure_is_never_retried() {
        let mut machine = StreamMachine::new(policy());
        machine.step(StreamInput::Start);
        machine.step(StreamInput::Opened);
        assert_eq!(machine.step(StreamInput::ParseFailed), vec![StreamAction::Close]);
        assert!(machine.is_closed());
    }

    #[test]
    fn test_rejected_connect_closes_without_retry() {
        let mut machine = StreamMachine::new(policy());
        machine.step(StreamInput::Start);
        assert_eq!(machine.step(StreamInput::Rejected), vec![StreamAction::Close]);
        assert!(machine.is_closed());
        assert_eq!(machine.retries(), 0);
    }

    #[test]
    fn test_closed_ignores_late_input() {
        let state = StreamState {
            phase: StreamPhase::Closed,
            retries: 1,
        };
        for input in [
            StreamInput::Message,
            StreamInput::Terminal,
            StreamInput::TransportLost,
            StreamInput::RetryElapsed,
            StreamInput::Start,
        ] {
            assert_eq!(transition(state, input, &policy()), (state, vec![]));
        }
    }

    #[test]
    fn test_cancel_during_retry_wait() {
        let mut machine = StreamMachine::new(policy());
        machine.step(StreamInput::Start);
        machine.step(StreamInput::TransportLost);
        assert_eq!(machine.step(StreamInput::Cancel), vec![StreamAction::Close]);
        assert_eq!(machine.step(StreamInput::RetryElapsed), vec![]);
    }

    #[test]
    fn test_zero_retries_gives_up_immediately() {
        let policy = RetryPolicy {
            max_retries: 0,
            backoff: Duration::from_secs(1),
        };
        let (state, actions) = transition(
            transition(StreamState::IDLE, StreamInput::Start, &policy).0,
            StreamInput::TransportLost,
            &policy,
        );
        assert_eq!(state.phase, StreamPhase::Closed);
        assert_eq!(actions, vec![StreamAction::Close, StreamAction::GiveUp]);
    }
}
