//! Streaming refinement of an existing recommendation.
//!
//! The job is registered with a request/reply call first; its progress is
//! then streamed like a generation.

use std::sync::Arc;

use async_trait::async_trait;
use recs_core::config::StreamConfig;
use recs_core::error::Result;
use recs_core::generation::{Callbacks, ContentRefiner};
use recs_core::progress::ProgressEvent;
use recs_core::recommendation::{Recommendation, RefineRequest};

use crate::api_client::GenerationApi;
use crate::cache_sync::CacheSync;
use crate::stream_driver::{StreamDriver, StreamJob};
use crate::transport::{StreamAddress, StreamTransport};

pub struct RegenerationController {
    api: Arc<dyn GenerationApi>,
    cache: CacheSync,
    driver: StreamDriver,
}

impl RegenerationController {
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
}

impl ContentRefiner for RegenerationController {
    fn refine(&self, request: RefineRequest, callbacks: Callbacks<Recommendation>) {
        let job = RegenerationJob {
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

struct RegenerationJob {
    api: Arc<dyn GenerationApi>,
    cache: CacheSync,
    request: RefineRequest,
}

#[async_trait]
impl StreamJob for RegenerationJob {
    type Output = Recommendation;

    fn label(&self) -> &'static str {
        "regenerate"
    }

    async fn prepare(&self) -> Result<StreamAddress> {
        self.api.register_regeneration(&self.request).await
    }

    fn decode(&self, event: &ProgressEvent) -> Result<Recommendation> {
        event.decode_result()
    }

    async fn on_complete(&self, output: &Recommendation) {
        self.cache.recommendation_refined(output);
    }
}
