//! Streaming options generation.

use std::sync::Arc;

use async_trait::async_trait;
use recs_core::config::StreamConfig;
use recs_core::error::Result;
use recs_core::generation::{Callbacks, OptionsGenerator};
use recs_core::progress::ProgressEvent;
use recs_core::recommendation::{GenerationRequest, OptionsResult};

use crate::api_client::GenerationApi;
use crate::cache_sync::CacheSync;
use crate::stream_driver::{StreamDriver, StreamJob};
use crate::transport::{StreamAddress, StreamTransport};

/// Generates options over the progress stream.
///
/// One attempt is live at a time; `generate` supersedes the previous one.
pub struct GenerationController {
    api: Arc<dyn GenerationApi>,
    cache: CacheSync,
    driver: StreamDriver,
}

impl GenerationController {
    pub fn new(
        api: Arc<dyn GenerationApi>,
        transport: Arc<dyn StreamTransport>,
        cache: CacheSync,
        config: &StreamConfig,
    ) -> Self {
        Self {
            api,
            cache,
            driver: StreamDriver::new(transport, config),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.driver.is_connected()
    }
}

impl OptionsGenerator for GenerationController {
    fn generate(&self, request: GenerationRequest, callbacks: Callbacks<OptionsResult>) {
        let job = GenerationJob {
            api: self.api.clone(),
            cache: self.cache.clone(),
            request,
        };
        self.driver.start(job, callbacks);
    }

    fn cancel(&self) {
        self.driver.cancel();
    }
}

struct GenerationJob {
    api: Arc<dyn GenerationApi>,
    cache: CacheSync,
    request: GenerationRequest,
}

#[async_trait]
impl StreamJob for GenerationJob {
    type Output = OptionsResult;

    fn label(&self) -> &'static str {
        "generate"
    }

    async fn prepare(&self) -> Result<StreamAddress> {
        self.api.generation_stream(&self.request)
    }

    fn decode(&self, event: &ProgressEvent) -> Result<OptionsResult> {
        event.decode_result()
    }

    async fn on_complete(&self, output: &OptionsResult) {
        self.cache
            .options_generated(&self.request.github_username, output);
    }
}
