//! The generate → choose → refine workflow.
//!
//! `form → generating → options → result`, plus a limit-exceeded overlay on
//! `form`. Controller callbacks are applied under the state lock and only if
//! the attempt epoch they were issued for is still current, so anything that
//! arrives after a reset, a newer submit or close is dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use recs_core::RecsError;
use recs_core::cache::RecommendationCache;
use recs_core::error::Result;
use recs_core::form::{FormData, ValidationErrors, validate_form};
use recs_core::generation::{Callbacks, ContentRefiner, OptionsGenerator, RecommendationService};
use recs_core::principal::CredentialProvider;
use recs_core::progress::ProgressEvent;
use recs_core::quota::QuotaTracker;
use recs_core::recommendation::{
    GenerationRequest, OptionsResult, Recommendation, RecommendationOption, RefineRequest,
    SelectionRequest,
};
use serde_json::Value;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum WorkflowStep {
    Form,
    Generating,
    Options,
    Result,
}

/// Snapshot of the workflow, published on every change.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowState {
    pub step: WorkflowStep,
    pub form_data: FormData,
    pub validation_errors: ValidationErrors,
    pub options: Vec<RecommendationOption>,
    pub generation_parameters: Value,
    pub selected_option: Option<RecommendationOption>,
    pub result: Option<Recommendation>,
    pub regenerate_instructions: String,
    pub viewing_full_content_id: Option<i64>,
    pub show_limit_exceeded: bool,
    pub current_stage: String,
    pub progress: u8,
    /// The one surfaced error message, if any.
    pub error: Option<String>,
    pub is_refining: bool,
    /// A selection is being persisted; further selections are rejected.
    pub is_selecting: bool,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self {
            step: WorkflowStep::Form,
            form_data: FormData::default(),
            validation_errors: ValidationErrors::new(),
            options: Vec::new(),
            generation_parameters: Value::Null,
            selected_option: None,
            result: None,
            regenerate_instructions: String::new(),
            viewing_full_content_id: None,
            show_limit_exceeded: false,
            current_stage: String::new(),
            progress: 0,
            error: None,
            is_refining: false,
            is_selecting: false,
        }
    }
}

/// Collaborators of the workflow.
#[derive(Clone)]
pub struct WorkflowDeps {
    pub generator: Arc<dyn OptionsGenerator>,
    pub refiner: Arc<dyn ContentRefiner>,
    pub service: Arc<dyn RecommendationService>,
    pub quota: Arc<QuotaTracker>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub cache: Arc<RecommendationCache>,
}

struct Inner {
    state: WorkflowState,
    /// Request of the last successful generation, reused by selection.
    request: Option<GenerationRequest>,
    epoch: u64,
    closed: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    updates: watch::Sender<WorkflowState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &Inner) {
        self.updates.send_replace(inner.state.clone());
    }

    /// Runs `f` if `epoch` is still current, then publishes.
    fn apply_if_current(&self, epoch: u64, f: impl FnOnce(&mut Inner)) -> bool {
        let mut inner = self.lock();
        if inner.closed || inner.epoch != epoch {
            tracing::trace!(epoch, current = inner.epoch, "workflow: stale callback dropped");
            return false;
        }
        f(&mut inner);
        self.publish(&inner);
        true
    }
}

pub struct RecommendationWorkflow {
    deps: WorkflowDeps,
    shared: Arc<Shared>,
}

impl RecommendationWorkflow {
    /// OPEN: starts on the form, with the limit overlay when an anonymous
    /// principal has already used up today's quota.
    pub fn open(deps: WorkflowDeps) -> Self {
        let mut state = WorkflowState::default();
        if deps.credentials.principal().is_anonymous() {
            state.show_limit_exceeded = quota_exhausted(&deps.quota);
        }

        let (updates, _) = watch::channel(state.clone());
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state,
                request: None,
                epoch: 0,
                closed: false,
            }),
            updates,
        });

        tracing::debug!("workflow: opened");
        Self { deps, shared }
    }

    pub fn state(&self) -> WorkflowState {
        self.shared.lock().state.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.shared.updates.subscribe()
    }

    fn is_anonymous(&self) -> bool {
        self.deps.credentials.principal().is_anonymous()
    }

    /// Applies `f` to the live state and publishes. No-op once closed.
    fn mutate<R>(&self, f: impl FnOnce(&mut Inner) -> Result<R>) -> Result<R> {
        let mut inner = self.shared.lock();
        if inner.closed {
            return Err(RecsError::internal("workflow is closed"));
        }
        let out = f(&mut inner);
        self.shared.publish(&inner);
        out
    }

    /// Pre-flight quota check. Sets the overlay and the message on failure.
    fn check_quota(&self, inner: &mut Inner) -> Result<()> {
        if !self.is_anonymous() {
            return Ok(());
        }
        match self.deps.quota.check() {
            Err(err) if err.is_quota_exceeded() => {
                inner.state.show_limit_exceeded = true;
                inner.state.error = Some(err.user_message());
                Err(err)
            }
            Err(err) => {
                tracing::warn!(error = %err, "workflow: quota record unreadable, allowing");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    pub fn update_form(&self, f: impl FnOnce(&mut FormData)) -> Result<()> {
        self.mutate(|inner| {
            expect_step(inner, WorkflowStep::Form)?;
            f(&mut inner.state.form_data);
            Ok(())
        })
    }

    /// SUBMIT: validates, checks the quota and starts a generation.
    pub fn submit(&self) -> Result<()> {
        let (request, epoch) = self.mutate(|inner| {
            expect_step(inner, WorkflowStep::Form)?;

            let errors = validate_form(&inner.state.form_data);
            inner.state.validation_errors = errors.clone();
            if !errors.is_empty() {
                return Err(RecsError::validation("Please fix the highlighted fields"));
            }
            self.check_quota(inner)?;

            let request = inner
                .state
                .form_data
                .to_request()
                .map_err(|_| RecsError::validation("Please fix the highlighted fields"))?;

            inner.epoch += 1;
            let state = &mut inner.state;
            state.step = WorkflowStep::Generating;
            state.error = None;
            state.current_stage.clear();
            state.progress = 0;
            state.options.clear();
            state.selected_option = None;
            state.result = None;
            state.viewing_full_content_id = None;
            state.is_selecting = false;
            inner.request = Some(request.clone());
            Ok((request, inner.epoch))
        })?;

        tracing::info!(owner = %request.github_username, epoch, "workflow: generating");
        let callbacks = self.generation_callbacks(epoch);
        self.deps.generator.generate(request, callbacks);
        Ok(())
    }

    fn generation_callbacks(&self, epoch: u64) -> Callbacks<OptionsResult> {
        let (progress, complete, error) = (
            self.shared.clone(),
            self.shared.clone(),
            self.shared.clone(),
        );
        let quota = self.deps.quota.clone();
        let anonymous = self.is_anonymous();

        Callbacks::new(
            move |event: &ProgressEvent| {
                progress.apply_if_current(epoch, |inner| {
                    if inner.state.step == WorkflowStep::Generating {
                        inner.state.current_stage = event.stage.clone();
                        inner.state.progress = event.progress;
                    }
                });
            },
            move |result: OptionsResult| {
                complete.apply_if_current(epoch, |inner| {
                    if inner.state.step != WorkflowStep::Generating {
                        return;
                    }
                    tracing::info!(options = result.options.len(), "workflow: options ready");
                    inner.state.step = WorkflowStep::Options;
                    inner.state.options = result.options;
                    inner.state.generation_parameters = result.generation_parameters;
                    inner.state.progress = 100;
                    if anonymous {
                        record_usage(&quota);
                    }
                });
            },
            move |err: RecsError| {
                error.apply_if_current(epoch, |inner| {
                    if inner.state.step != WorkflowStep::Generating {
                        return;
                    }
                    tracing::info!(error = %err, "workflow: generation failed");
                    inner.state.step = WorkflowStep::Form;
                    inner.state.error = Some(err.user_message());
                    inner.request = None;
                });
            },
        )
    }

    /// SELECT_OPTION: persists the chosen option as a Recommendation.
    pub async fn select_option(&self, option_id: i64) -> Result<Recommendation> {
        let (request, epoch) = self.mutate(|inner| {
            expect_step(inner, WorkflowStep::Options)?;
            if inner.state.is_selecting {
                return Err(RecsError::validation("A selection is already being saved"));
            }
            let option = inner
                .state
                .options
                .iter()
                .find(|o| o.id == option_id)
                .cloned()
                .ok_or_else(|| RecsError::validation(format!("No option with id {option_id}")))?;
            self.check_quota(inner)?;

            let generation = inner
                .request
                .as_ref()
                .ok_or_else(|| RecsError::internal("options without a generation request"))?;
            inner.state.error = None;
            inner.state.is_selecting = true;
            Ok((
                SelectionRequest {
                    github_username: generation.github_username.clone(),
                    selected_option: option,
                    all_options: inner.state.options.clone(),
                    analysis_context_type: generation.analysis_type,
                    repository_url: generation.repository_url.clone(),
                },
                inner.epoch,
            ))
        })?;

        let selected = request.selected_option.clone();
        let outcome = self.deps.service.select_option(request).await;

        let mut applied = Err(RecsError::internal("selection superseded"));
        self.shared.apply_if_current(epoch, |inner| {
            inner.state.is_selecting = false;
            if inner.state.step != WorkflowStep::Options {
                return;
            }
            match &outcome {
                Ok(recommendation) => {
                    tracing::info!(recommendation_id = recommendation.id, "workflow: option selected");
                    inner.state.step = WorkflowStep::Result;
                    inner.state.selected_option = Some(selected);
                    inner.state.result = Some(recommendation.clone());
                    inner.state.viewing_full_content_id = None;
                    if self.is_anonymous() {
                        record_usage(&self.deps.quota);
                    }
                    self.deps.cache.upsert_recommendation(recommendation);
                }
                Err(err) => {
                    inner.state.error = Some(err.user_message());
                }
            }
            applied = outcome.clone();
        });
        applied
    }

    /// EDIT_DETAILS: back to the form with the entered data kept.
    pub fn edit_details(&self) -> Result<()> {
        self.mutate(|inner| {
            expect_step(inner, WorkflowStep::Options)?;
            inner.epoch += 1;
            let state = &mut inner.state;
            state.step = WorkflowStep::Form;
            state.options.clear();
            state.generation_parameters = Value::Null;
            state.selected_option = None;
            state.viewing_full_content_id = None;
            state.is_selecting = false;
            state.error = None;
            Ok(())
        })
    }

    /// BACK_TO_OPTIONS: abandons any refinement in flight.
    pub fn back_to_options(&self) -> Result<()> {
        let was_refining = self.mutate(|inner| {
            expect_step(inner, WorkflowStep::Result)?;
            inner.epoch += 1;
            let was_refining = inner.state.is_refining;
            inner.state.step = WorkflowStep::Options;
            inner.state.is_refining = false;
            inner.state.error = None;
            Ok(was_refining)
        })?;
        if was_refining {
            self.deps.refiner.cancel();
        }
        Ok(())
    }

    pub fn view_full_content(&self, option_id: i64) -> Result<()> {
        self.mutate(|inner| {
            expect_step(inner, WorkflowStep::Options)?;
            if !inner.state.options.iter().any(|o| o.id == option_id) {
                return Err(RecsError::validation(format!("No option with id {option_id}")));
            }
            inner.state.viewing_full_content_id = Some(option_id);
            Ok(())
        })
    }

    pub fn hide_full_content(&self) -> Result<()> {
        self.mutate(|inner| {
            inner.state.viewing_full_content_id = None;
            Ok(())
        })
    }

    pub fn set_refine_instructions(&self, instructions: impl Into<String>) -> Result<()> {
        let instructions = instructions.into();
        self.mutate(|inner| {
            expect_step(inner, WorkflowStep::Result)?;
            inner.state.regenerate_instructions = instructions;
            Ok(())
        })
    }

    /// REFINE: rewrites the current result with the instructions entered.
    ///
    /// Guarded by the quota check; a refinement does not consume quota.
    pub fn refine(&self) -> Result<()> {
        let (request, epoch) = self.mutate(|inner| {
            expect_step(inner, WorkflowStep::Result)?;
            if inner.state.is_refining {
                return Err(RecsError::validation("A refinement is already running"));
            }
            let instructions = inner.state.regenerate_instructions.trim();
            if instructions.is_empty() {
                return Err(RecsError::validation("Describe how the recommendation should change"));
            }
            let current = inner
                .state
                .result
                .as_ref()
                .ok_or_else(|| RecsError::internal("result step without a recommendation"))?;
            let request = RefineRequest::for_recommendation(current, instructions);
            self.check_quota(inner)?;

            inner.epoch += 1;
            inner.state.is_refining = true;
            inner.state.error = None;
            Ok((request, inner.epoch))
        })?;

        tracing::info!(recommendation_id = ?request.recommendation_id, "workflow: refining");
        let callbacks = self.refine_callbacks(epoch);
        self.deps.refiner.refine(request, callbacks);
        Ok(())
    }

    fn refine_callbacks(&self, epoch: u64) -> Callbacks<Recommendation> {
        let (complete, error) = (self.shared.clone(), self.shared.clone());

        Callbacks::new(
            |_event: &ProgressEvent| {},
            move |updated: Recommendation| {
                complete.apply_if_current(epoch, |inner| {
                    inner.state.is_refining = false;
                    let Some(current) = inner.state.result.as_mut() else {
                        return;
                    };
                    if current.id != updated.id {
                        tracing::warn!(
                            expected = current.id,
                            got = updated.id,
                            "workflow: refinement returned a different recommendation"
                        );
                    }
                    *current = updated;
                    inner.state.regenerate_instructions.clear();
                });
            },
            move |err: RecsError| {
                error.apply_if_current(epoch, |inner| {
                    inner.state.is_refining = false;
                    inner.state.error = Some(err.user_message());
                });
            },
        )
    }

    /// RESET: back to an empty form. Form data and the quota count survive.
    pub fn reset(&self) -> Result<()> {
        self.mutate(|inner| {
            inner.epoch += 1;
            let form_data = std::mem::take(&mut inner.state.form_data);
            inner.state = WorkflowState {
                form_data,
                show_limit_exceeded: self.is_anonymous() && quota_exhausted(&self.deps.quota),
                ..WorkflowState::default()
            };
            inner.request = None;
            Ok(())
        })?;
        self.deps.generator.cancel();
        self.deps.refiner.cancel();
        tracing::debug!("workflow: reset");
        Ok(())
    }

    /// CLOSE: tears down; any late callback is dropped. Idempotent.
    pub fn close(&self) {
        {
            let mut inner = self.shared.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.epoch += 1;
        }
        self.deps.generator.cancel();
        self.deps.refiner.cancel();
        tracing::debug!("workflow: closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

impl Drop for RecommendationWorkflow {
    fn drop(&mut self) {
        self.close();
    }
}

fn expect_step(inner: &Inner, step: WorkflowStep) -> Result<()> {
    if inner.state.step == step {
        Ok(())
    } else {
        Err(RecsError::internal(format!(
            "expected step {step}, workflow is at {}",
            inner.state.step
        )))
    }
}

fn quota_exhausted(quota: &QuotaTracker) -> bool {
    quota.is_exhausted().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "workflow: quota record unreadable");
        false
    })
}

fn record_usage(quota: &QuotaTracker) {
    match quota.increment() {
        Ok(counter) => {
            tracing::debug!(count = counter.count, ceiling = quota.ceiling(), "workflow: quota used")
        }
        Err(err) => tracing::warn!(error = %err, "workflow: failed to record quota usage"),
    }
}
