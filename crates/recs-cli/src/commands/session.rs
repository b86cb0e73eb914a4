//! Composition root: wires the file-backed stores, the API client and the
//! controllers picked by `streaming`.

use std::sync::Arc;

use anyhow::{Context, Result};
use recs_application::WorkflowDeps;
use recs_core::cache::RecommendationCache;
use recs_core::config::ClientConfig;
use recs_core::generation::{ContentRefiner, OptionsGenerator};
use recs_core::principal::CredentialProvider;
use recs_core::quota::QuotaTracker;
use recs_infrastructure::{ConfigService, FileQuotaStore, SecretCredentialProvider};
use recs_interaction::{
    ApiClient, CacheSync, FallbackController, GenerationController, HttpStreamTransport,
    RegenerationController, StreamTransport,
};

pub struct Session {
    pub config: ClientConfig,
    pub credentials: Arc<SecretCredentialProvider>,
    pub quota: Arc<QuotaTracker>,
}

impl Session {
    pub fn load() -> Result<Self> {
        let config = ConfigService::new()?
            .get_config()
            .context("failed to load configuration")?;
        let credentials =
            Arc::new(SecretCredentialProvider::load().context("failed to read credentials")?);
        let store = Arc::new(FileQuotaStore::new()?);
        let quota = Arc::new(QuotaTracker::new(store, config.anonymous_daily_limit));

        Ok(Self {
            config,
            credentials,
            quota,
        })
    }

    pub fn is_anonymous(&self) -> bool {
        self.credentials.principal().is_anonymous()
    }

    pub fn workflow_deps(&self) -> Result<WorkflowDeps> {
        let config = &self.config;
        let api = Arc::new(ApiClient::new(config, self.credentials.clone())?);
        let cache = Arc::new(RecommendationCache::new());

        let mut sync = CacheSync::new(cache.clone());
        if config.prefetch_after_generate {
            sync = sync.with_prefetch(api.clone());
        }

        let (generator, refiner): (Arc<dyn OptionsGenerator>, Arc<dyn ContentRefiner>) =
            if config.streaming {
                let transport: Arc<dyn StreamTransport> = Arc::new(HttpStreamTransport::new());
                (
                    Arc::new(GenerationController::new(
                        api.clone(),
                        transport.clone(),
                        sync.clone(),
                        &config.stream,
                    )),
                    Arc::new(RegenerationController::new(
                        api.clone(),
                        transport,
                        sync,
                        &config.stream,
                    )),
                )
            } else {
                let fallback = FallbackController::new(api.clone(), sync);
                (Arc::new(fallback.clone()), Arc::new(fallback))
            };

        tracing::debug!(
            base_url = %config.api_base_url,
            streaming = config.streaming,
            prefetch = config.prefetch_after_generate,
            "session: wired"
        );

        Ok(WorkflowDeps {
            generator,
            refiner,
            service: api,
            quota: self.quota.clone(),
            credentials: self.credentials.clone(),
            cache,
        })
    }
}
