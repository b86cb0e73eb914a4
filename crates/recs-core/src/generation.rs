//! Seams between the workflow and the generation controllers.
//!
//! Controllers live in `recs-interaction`; the workflow only sees these traits
//! so it can be driven by fakes in tests.

use async_trait::async_trait;

use crate::error::{RecsError, Result};
use crate::progress::ProgressEvent;
use crate::recommendation::{
    GenerationRequest, OptionsResult, Recommendation, RefineRequest, SelectionRequest,
};

type ProgressFn = Box<dyn FnMut(&ProgressEvent) + Send>;
type CompleteFn<T> = Box<dyn FnOnce(T) + Send>;
type ErrorFn = Box<dyn FnOnce(RecsError) + Send>;

/// The three caller callbacks of one attempt.
///
/// The terminal pair lives in a single slot that is taken on first use, so at
/// most one of `on_complete` / `on_error` ever runs, at most once.
pub struct Callbacks<T> {
    on_progress: ProgressFn,
    terminal: Option<(CompleteFn<T>, ErrorFn)>,
}

impl<T> Callbacks<T> {
    pub fn new(
        on_progress: impl FnMut(&ProgressEvent) + Send + 'static,
        on_complete: impl FnOnce(T) + Send + 'static,
        on_error: impl FnOnce(RecsError) + Send + 'static,
    ) -> Self {
        Self {
            on_progress: Box::new(on_progress),
            terminal: Some((Box::new(on_complete), Box::new(on_error))),
        }
    }

    /// Forwards a progress event. Ignored once a terminal callback has fired.
    pub fn progress(&mut self, event: &ProgressEvent) {
        if self.terminal.is_some() {
            (self.on_progress)(event);
        }
    }

    /// Whether neither terminal callback has fired yet.
    pub fn is_pending(&self) -> bool {
        self.terminal.is_some()
    }

    /// Fires `on_complete`. Returns `false` if a terminal callback already ran.
    pub fn complete(&mut self, value: T) -> bool {
        match self.terminal.take() {
            Some((on_complete, _)) => {
                on_complete(value);
                true
            }
            None => false,
        }
    }

    /// Fires `on_error`. Returns `false` if a terminal callback already ran.
    pub fn fail(&mut self, error: RecsError) -> bool {
        match self.terminal.take() {
            Some((_, on_error)) => {
                on_error(error);
                true
            }
            None => false,
        }
    }
}

impl<T> std::fmt::Debug for Callbacks<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// Produces a batch of candidate options for a request.
///
/// `generate` returns immediately; the outcome arrives through `callbacks`.
/// Starting a new attempt supersedes the previous one.
pub trait OptionsGenerator: Send + Sync {
    fn generate(&self, request: GenerationRequest, callbacks: Callbacks<OptionsResult>);

    /// Abandons the in-flight attempt. Its callbacks never fire afterwards.
    fn cancel(&self);
}

/// Refines the content of an existing recommendation.
pub trait ContentRefiner: Send + Sync {
    fn refine(&self, request: RefineRequest, callbacks: Callbacks<Recommendation>);

    fn cancel(&self);
}

/// Request/reply calls on persisted recommendations.
#[async_trait]
pub trait RecommendationService: Send + Sync {
    /// Persists the chosen option as a Recommendation.
    async fn select_option(&self, request: SelectionRequest) -> Result<Recommendation>;

    /// Lists the recommendations written for `owner`.
    async fn list_recommendations(&self, owner: &str) -> Result<Vec<Recommendation>>;
}
