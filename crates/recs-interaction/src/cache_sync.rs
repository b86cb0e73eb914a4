//! Cache writes shared by the streaming and non-streaming paths.

use std::sync::Arc;

use recs_core::cache::{CacheKey, CachedValue, ListName, RecommendationCache};
use recs_core::generation::RecommendationService;
use recs_core::recommendation::{OptionsResult, Recommendation};

#[derive(Clone)]
pub struct CacheSync {
    cache: Arc<RecommendationCache>,
    prefetch: Option<Arc<dyn RecommendationService>>,
}

impl CacheSync {
    pub fn new(cache: Arc<RecommendationCache>) -> Self {
        Self {
            cache,
            prefetch: None,
        }
    }

    /// Reads the owner's recommendation list through the cache after each
    /// generation. A cached list is kept current by `upsert_recommendation`,
    /// so only a miss reaches the service.
    pub fn with_prefetch(mut self, service: Arc<dyn RecommendationService>) -> Self {
        self.prefetch = Some(service);
        self
    }

    pub fn cache(&self) -> &Arc<RecommendationCache> {
        &self.cache
    }

    /// A batch of options was generated for `owner`.
    pub fn options_generated(&self, owner: &str, result: &OptionsResult) {
        self.cache.put_options(owner, result.clone());
        tracing::debug!(owner, options = result.options.len(), "cache: options stored");
        self.spawn_prefetch(owner);
    }

    /// An existing recommendation got new content.
    pub fn recommendation_refined(&self, recommendation: &Recommendation) {
        self.cache.put_regenerated(recommendation.clone());
        self.cache.upsert_recommendation(recommendation);
    }

    fn spawn_prefetch(&self, owner: &str) {
        let Some(service) = self.prefetch.clone() else {
            return;
        };
        let cache = self.cache.clone();
        let owner = owner.to_string();

        tokio::spawn(async move {
            let key = CacheKey::list(owner.clone(), ListName::Recommendations);
            let fetched = cache
                .get_or_fetch(key, || async {
                    service
                        .list_recommendations(&owner)
                        .await
                        .map(CachedValue::Recommendations)
                })
                .await;
            match fetched {
                Ok(_) => {
                    tracing::debug!(%owner, "cache: owner list available");
                }
                Err(err) => {
                    tracing::warn!(%owner, error = %err, "cache: owner list prefetch failed");
                }
            }
        });
    }
}
