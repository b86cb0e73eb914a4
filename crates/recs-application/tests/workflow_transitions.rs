//! Workflow transitions driven through fake controllers.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use recs_application::{RecommendationWorkflow, WorkflowDeps, WorkflowStep};
use recs_core::RecsError;
use recs_core::cache::RecommendationCache;
use recs_core::error::Result;
use recs_core::form::FormField;
use recs_core::generation::{Callbacks, ContentRefiner, OptionsGenerator, RecommendationService};
use recs_core::principal::{CredentialProvider, StaticCredential};
use recs_core::progress::{ProgressEvent, ProgressStatus};
use recs_core::quota::{InMemoryQuotaStore, QuotaTracker};
use recs_core::recommendation::{
    GenerationRequest, Length, OptionsResult, Recommendation, RecommendationOption,
    RecommendationType, RefineRequest, SelectionRequest, Tone,
};
use serde_json::json;

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct FakeGenerator {
    requests: Mutex<Vec<GenerationRequest>>,
    pending: Mutex<Vec<Callbacks<OptionsResult>>>,
    cancels: Mutex<u32>,
}

impl FakeGenerator {
    fn progress(&self, stage: &str, progress: u8) {
        let event = ProgressEvent {
            stage: stage.into(),
            progress,
            status: ProgressStatus::Processing,
            result: None,
            error: None,
        };
        for callbacks in self.pending.lock().unwrap().iter_mut() {
            callbacks.progress(&event);
        }
    }

    fn complete_all(&self) {
        for mut callbacks in self.pending.lock().unwrap().drain(..) {
            callbacks.complete(options_result());
        }
    }

    fn fail_all(&self, message: &str) {
        for mut callbacks in self.pending.lock().unwrap().drain(..) {
            callbacks.fail(RecsError::server(message));
        }
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl OptionsGenerator for FakeGenerator {
    fn generate(&self, request: GenerationRequest, callbacks: Callbacks<OptionsResult>) {
        self.requests.lock().unwrap().push(request);
        self.pending.lock().unwrap().push(callbacks);
    }

    fn cancel(&self) {
        *self.cancels.lock().unwrap() += 1;
    }
}

#[derive(Default)]
struct FakeRefiner {
    requests: Mutex<Vec<RefineRequest>>,
    pending: Mutex<Vec<Callbacks<Recommendation>>>,
}

impl FakeRefiner {
    fn complete_all(&self, content: &str) {
        let requests = self.requests.lock().unwrap();
        for mut callbacks in self.pending.lock().unwrap().drain(..) {
            let id = requests.last().and_then(|r| r.recommendation_id).unwrap_or(7);
            callbacks.complete(recommendation(id, content));
        }
    }

    fn fail_all(&self, message: &str) {
        for mut callbacks in self.pending.lock().unwrap().drain(..) {
            callbacks.fail(RecsError::server(message));
        }
    }
}

impl ContentRefiner for FakeRefiner {
    fn refine(&self, request: RefineRequest, callbacks: Callbacks<Recommendation>) {
        self.requests.lock().unwrap().push(request);
        self.pending.lock().unwrap().push(callbacks);
    }

    fn cancel(&self) {}
}

#[derive(Default)]
struct FakeService {
    fail_with: Mutex<Option<RecsError>>,
    selections: Mutex<Vec<SelectionRequest>>,
}

#[async_trait]
impl RecommendationService for FakeService {
    async fn select_option(&self, request: SelectionRequest) -> Result<Recommendation> {
        // Suspend once so concurrent callers interleave
        tokio::task::yield_now().await;
        if let Some(err) = self.fail_with.lock().unwrap().clone() {
            return Err(err);
        }
        let content = request.selected_option.content.clone();
        self.selections.lock().unwrap().push(request);
        Ok(recommendation(7, &content))
    }

    async fn list_recommendations(&self, _owner: &str) -> Result<Vec<Recommendation>> {
        Ok(vec![])
    }
}

fn recommendation(id: i64, content: &str) -> Recommendation {
    Recommendation {
        id,
        title: "Recommendation".into(),
        content: content.into(),
        recommendation_type: RecommendationType::Professional,
        tone: Tone::Professional,
        length: Length::Medium,
        word_count: content.split_whitespace().count() as u32,
        created_at: Utc::now(),
        owner: "octocat".into(),
    }
}

fn options_result() -> OptionsResult {
    OptionsResult {
        options: (1..=3)
            .map(|id| RecommendationOption {
                id,
                name: format!("Option {id}"),
                title: format!("Title {id}"),
                content: format!("Content of option {id}"),
                word_count: 4,
                focus: "technical".into(),
                explanation: String::new(),
                generation_parameters: json!({}),
            })
            .collect(),
        generation_parameters: json!({"tone": "professional"}),
    }
}

struct Harness {
    workflow: RecommendationWorkflow,
    generator: Arc<FakeGenerator>,
    refiner: Arc<FakeRefiner>,
    service: Arc<FakeService>,
    quota: Arc<QuotaTracker>,
    cache: Arc<RecommendationCache>,
}

fn harness_with(credentials: Arc<dyn CredentialProvider>, quota: Arc<QuotaTracker>) -> Harness {
    let generator = Arc::new(FakeGenerator::default());
    let refiner = Arc::new(FakeRefiner::default());
    let service = Arc::new(FakeService::default());
    let cache = Arc::new(RecommendationCache::new());

    let workflow = RecommendationWorkflow::open(WorkflowDeps {
        generator: generator.clone(),
        refiner: refiner.clone(),
        service: service.clone(),
        quota: quota.clone(),
        credentials,
        cache: cache.clone(),
    });

    Harness {
        workflow,
        generator,
        refiner,
        service,
        quota,
        cache,
    }
}

fn fresh_quota() -> Arc<QuotaTracker> {
    Arc::new(QuotaTracker::new(Arc::new(InMemoryQuotaStore::new()), 3))
}

fn anonymous() -> Harness {
    harness_with(Arc::new(StaticCredential::anonymous()), fresh_quota())
}

fn fill_valid_form(workflow: &RecommendationWorkflow) {
    workflow
        .update_form(|form| {
            form.github_input = "octocat".into();
            form.working_relationship = "We maintained the parser together for two years".into();
        })
        .unwrap();
}

fn count(quota: &QuotaTracker) -> u32 {
    quota.current().unwrap().count
}

/// Drives a fresh harness to the options step.
fn at_options(h: &Harness) {
    fill_valid_form(&h.workflow);
    h.workflow.submit().unwrap();
    h.generator.complete_all();
    assert_eq!(h.workflow.state().step, WorkflowStep::Options);
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn open_shows_limit_overlay_when_anonymous_quota_is_spent() {
    let quota = fresh_quota();
    for _ in 0..3 {
        quota.increment().unwrap();
    }

    let h = harness_with(Arc::new(StaticCredential::anonymous()), quota.clone());
    let state = h.workflow.state();
    assert_eq!(state.step, WorkflowStep::Form);
    assert!(state.show_limit_exceeded);

    let h = harness_with(Arc::new(StaticCredential::bearer("token")), quota);
    assert!(!h.workflow.state().show_limit_exceeded);
}

#[test]
fn submit_with_invalid_form_stays_on_form() {
    let h = anonymous();
    h.workflow
        .update_form(|form| {
            form.github_input = "octocat".into();
            form.working_relationship = "short".into();
        })
        .unwrap();

    assert!(h.workflow.submit().unwrap_err().is_validation());
    let state = h.workflow.state();
    assert_eq!(state.step, WorkflowStep::Form);
    assert!(state.validation_errors.contains_key(&FormField::WorkingRelationship));
    assert_eq!(h.generator.request_count(), 0);
}

#[test]
fn generation_progress_then_complete_reaches_options() {
    let h = anonymous();
    fill_valid_form(&h.workflow);
    h.workflow.submit().unwrap();
    assert_eq!(h.workflow.state().step, WorkflowStep::Generating);

    h.generator.progress("analyzing", 40);
    let state = h.workflow.state();
    assert_eq!(state.current_stage, "analyzing");
    assert_eq!(state.progress, 40);

    h.generator.complete_all();
    let state = h.workflow.state();
    assert_eq!(state.step, WorkflowStep::Options);
    assert_eq!(state.options.len(), 3);
    assert_eq!(count(&h.quota), 1);

    let request = h.generator.requests.lock().unwrap()[0].clone();
    assert_eq!(request.github_username, "octocat");
}

#[test]
fn progress_then_error_returns_to_form_without_quota_change() {
    let h = anonymous();
    fill_valid_form(&h.workflow);
    h.workflow.submit().unwrap();

    h.generator.progress("analyzing", 40);
    h.generator.fail_all("upstream timeout");

    let state = h.workflow.state();
    assert_eq!(state.step, WorkflowStep::Form);
    assert_eq!(state.error.as_deref(), Some("upstream timeout"));
    assert_eq!(count(&h.quota), 0);
    // Form data survives the failure
    assert_eq!(state.form_data.github_input, "octocat");
}

#[tokio::test]
async fn anonymous_selections_count_up_to_ceiling_then_block() {
    let h = anonymous();
    at_options(&h);
    assert_eq!(count(&h.quota), 1);

    let rec = h.workflow.select_option(2).await.unwrap();
    assert_eq!(rec.content, "Content of option 2");
    assert_eq!(h.workflow.state().step, WorkflowStep::Result);
    assert_eq!(count(&h.quota), 2);

    h.workflow.back_to_options().unwrap();
    h.workflow.select_option(1).await.unwrap();
    assert_eq!(count(&h.quota), 3);

    h.workflow.back_to_options().unwrap();
    let err = h.workflow.select_option(3).await.unwrap_err();
    assert_eq!(err, RecsError::QuotaExceeded { ceiling: 3 });

    let state = h.workflow.state();
    assert_eq!(state.step, WorkflowStep::Options);
    assert!(state.show_limit_exceeded);
    assert_eq!(count(&h.quota), 3);
    // Blocked before reaching the service
    assert_eq!(h.service.selections.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn generation_then_two_selections_exhaust_three_daily_actions() {
    let h = anonymous();
    let mut seen = vec![count(&h.quota)];

    at_options(&h);
    seen.push(count(&h.quota));
    for option_id in [1, 2] {
        h.workflow.select_option(option_id).await.unwrap();
        seen.push(count(&h.quota));
        h.workflow.back_to_options().unwrap();
    }
    // Generating counts as an action, so the third selection is the fourth
    assert_eq!(seen, vec![0, 1, 2, 3]);
    assert!(
        h.workflow
            .select_option(3)
            .await
            .unwrap_err()
            .is_quota_exceeded()
    );
}

#[tokio::test]
async fn concurrent_selections_reach_the_service_once() {
    let h = anonymous();
    at_options(&h);

    let (first, second) = tokio::join!(h.workflow.select_option(1), h.workflow.select_option(2));

    assert_eq!(first.unwrap().content, "Content of option 1");
    assert!(second.unwrap_err().is_validation());
    assert_eq!(h.service.selections.lock().unwrap().len(), 1);
    assert_eq!(count(&h.quota), 2);

    let state = h.workflow.state();
    assert_eq!(state.step, WorkflowStep::Result);
    assert!(!state.is_selecting);
}

#[tokio::test]
async fn failed_selection_clears_in_flight_flag() {
    let h = anonymous();
    at_options(&h);
    *h.service.fail_with.lock().unwrap() = Some(RecsError::server("try again"));
    assert!(h.workflow.select_option(1).await.is_err());
    assert!(!h.workflow.state().is_selecting);

    *h.service.fail_with.lock().unwrap() = None;
    h.workflow.select_option(1).await.unwrap();
    assert_eq!(h.workflow.state().step, WorkflowStep::Result);
}

#[tokio::test]
async fn failed_selection_stays_on_options() {
    let h = anonymous();
    at_options(&h);
    *h.service.fail_with.lock().unwrap() = Some(RecsError::validation("Option expired"));

    let err = h.workflow.select_option(1).await.unwrap_err();
    assert!(err.is_validation());

    let state = h.workflow.state();
    assert_eq!(state.step, WorkflowStep::Options);
    assert_eq!(state.error.as_deref(), Some("Option expired"));
    assert_eq!(count(&h.quota), 1);
}

#[tokio::test]
async fn authenticated_selection_does_not_touch_quota() {
    let h = harness_with(Arc::new(StaticCredential::bearer("token")), fresh_quota());
    at_options(&h);
    h.workflow.select_option(1).await.unwrap();
    assert_eq!(count(&h.quota), 0);
}

#[tokio::test]
async fn refine_replaces_content_in_place() {
    let h = anonymous();
    at_options(&h);
    h.workflow.select_option(1).await.unwrap();
    assert_eq!(h.cache.recommendation(7).unwrap().content, "Content of option 1");

    assert!(h.workflow.refine().unwrap_err().is_validation());

    h.workflow.set_refine_instructions("Make it warmer").unwrap();
    h.workflow.refine().unwrap();
    assert!(h.workflow.state().is_refining);
    assert_eq!(
        h.refiner.requests.lock().unwrap()[0].recommendation_id,
        Some(7)
    );

    h.refiner.complete_all("A warmer recommendation");
    let state = h.workflow.state();
    assert_eq!(state.step, WorkflowStep::Result);
    assert!(!state.is_refining);
    let result = state.result.unwrap();
    assert_eq!(result.id, 7);
    assert_eq!(result.content, "A warmer recommendation");
    // Refining is guarded by the quota but does not consume it
    assert_eq!(count(&h.quota), 2);
}

#[tokio::test]
async fn failed_refine_keeps_previous_content() {
    let h = anonymous();
    at_options(&h);
    h.workflow.select_option(1).await.unwrap();

    h.workflow.set_refine_instructions("Shorter").unwrap();
    h.workflow.refine().unwrap();
    h.refiner.fail_all("model overloaded");

    let state = h.workflow.state();
    assert_eq!(state.step, WorkflowStep::Result);
    assert_eq!(state.result.unwrap().content, "Content of option 1");
    assert_eq!(state.error.as_deref(), Some("model overloaded"));
    assert!(!state.is_refining);
}

#[test]
fn reset_during_generation_drops_late_completion() {
    let h = anonymous();
    fill_valid_form(&h.workflow);
    h.workflow.submit().unwrap();

    h.workflow.reset().unwrap();
    h.generator.complete_all();

    let state = h.workflow.state();
    assert_eq!(state.step, WorkflowStep::Form);
    assert!(state.options.is_empty());
    assert_eq!(state.form_data.github_input, "octocat");
    assert_eq!(count(&h.quota), 0);
    assert!(*h.generator.cancels.lock().unwrap() >= 1);
}

#[test]
fn resubmit_supersedes_previous_attempt() {
    let h = anonymous();
    fill_valid_form(&h.workflow);
    h.workflow.submit().unwrap();
    h.workflow.reset().unwrap();
    h.workflow.submit().unwrap();

    // Both attempts' callbacks fire; only the latest is applied
    h.generator.complete_all();
    assert_eq!(h.workflow.state().step, WorkflowStep::Options);
    assert_eq!(count(&h.quota), 1);
}

#[test]
fn edit_details_keeps_form_and_discards_options() {
    let h = anonymous();
    at_options(&h);

    h.workflow.view_full_content(2).unwrap();
    assert_eq!(h.workflow.state().viewing_full_content_id, Some(2));
    h.workflow.hide_full_content().unwrap();
    assert_eq!(h.workflow.state().viewing_full_content_id, None);

    h.workflow.edit_details().unwrap();
    let state = h.workflow.state();
    assert_eq!(state.step, WorkflowStep::Form);
    assert!(state.options.is_empty());
    assert_eq!(
        state.form_data.working_relationship,
        "We maintained the parser together for two years"
    );
}

#[test]
fn close_drops_late_callbacks_and_blocks_input() {
    let h = anonymous();
    fill_valid_form(&h.workflow);
    h.workflow.submit().unwrap();

    h.workflow.close();
    h.workflow.close();
    h.generator.complete_all();

    assert!(h.workflow.is_closed());
    assert_eq!(h.workflow.state().step, WorkflowStep::Generating);
    assert!(h.workflow.reset().is_err());
    assert_eq!(count(&h.quota), 0);
}

#[tokio::test]
async fn subscribers_see_transitions() {
    let h = anonymous();
    let mut updates = h.workflow.subscribe();

    fill_valid_form(&h.workflow);
    h.workflow.submit().unwrap();
    assert!(updates.has_changed().unwrap());
    assert_eq!(updates.borrow_and_update().step, WorkflowStep::Generating);

    h.generator.complete_all();
    updates.changed().await.unwrap();
    assert_eq!(updates.borrow().step, WorkflowStep::Options);
}
