//! Request/reply generation for when streaming is disabled.
//!
//! Failures are surfaced at once; nothing on this path is retried.

use std::sync::{Arc, Mutex, PoisonError};

use recs_core::error::Result;
use recs_core::generation::{Callbacks, ContentRefiner, OptionsGenerator};
use recs_core::recommendation::{GenerationRequest, OptionsResult, Recommendation, RefineRequest};
use tokio_util::sync::CancellationToken;

use crate::api_client::GenerationApi;
use crate::cache_sync::CacheSync;

#[derive(Clone)]
pub struct FallbackController {
    api: Arc<dyn GenerationApi>,
    cache: CacheSync,
    generating: Arc<Mutex<CancellationToken>>,
    refining: Arc<Mutex<CancellationToken>>,
}

impl FallbackController {
    pub fn new(api: Arc<dyn GenerationApi>, cache: CacheSync) -> Self {
        Self {
            api,
            cache,
            generating: Arc::default(),
            refining: Arc::default(),
        }
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Result<OptionsResult> {
        tracing::info!(owner = %request.github_username, "fallback: generating options");
        let result = self.api.generate_options(request).await?;
        self.cache
            .options_generated(&request.github_username, &result);
        Ok(result)
    }

    pub async fn regenerate(&self, request: &RefineRequest) -> Result<Recommendation> {
        tracing::info!(
            recommendation_id = ?request.recommendation_id,
            "fallback: refining recommendation"
        );
        let recommendation = self.api.regenerate(request).await?;
        self.cache.recommendation_refined(&recommendation);
        Ok(recommendation)
    }
}

/// Replaces the in-flight token, cancelling the previous call.
fn supersede(slot: &Mutex<CancellationToken>) -> CancellationToken {
    let mut inflight = slot.lock().unwrap_or_else(PoisonError::into_inner);
    inflight.cancel();
    *inflight = CancellationToken::new();
    inflight.clone()
}

impl OptionsGenerator for FallbackController {
    fn generate(&self, request: GenerationRequest, mut callbacks: Callbacks<OptionsResult>) {
        let cancel = supersede(&self.generating);
        let this = self.clone();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = this.generate(&request) => outcome,
            };
            if cancel.is_cancelled() {
                return;
            }
            match outcome {
                Ok(result) => callbacks.complete(result),
                Err(err) => callbacks.fail(err),
            };
        });
    }

    fn cancel(&self) {
        supersede(&self.generating);
    }
}

impl ContentRefiner for FallbackController {
    fn refine(&self, request: RefineRequest, mut callbacks: Callbacks<Recommendation>) {
        let cancel = supersede(&self.refining);
        let this = self.clone();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = this.regenerate(&request) => outcome,
            };
            if cancel.is_cancelled() {
                return;
            }
            match outcome {
                Ok(recommendation) => callbacks.complete(recommendation),
                Err(err) => callbacks.fail(err),
            };
        });
    }

    fn cancel(&self) {
        supersede(&self.refining);
    }
}
