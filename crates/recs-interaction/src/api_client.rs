//! Request/reply calls to the recommendation API.

use std::sync::Arc;

use async_trait::async_trait;
use recs_core::RecsError;
use recs_core::config::ClientConfig;
use recs_core::error::Result;
use recs_core::generation::RecommendationService;
use recs_core::principal::CredentialProvider;
use recs_core::recommendation::{
    GenerationRequest, OptionsResult, Recommendation, RefineRequest, SelectionRequest,
};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::http_error::{map_http_error, map_request_error, parse_retry_after};
use crate::transport::StreamAddress;

/// The generation endpoints the controllers depend on.
#[async_trait]
pub trait GenerationApi: Send + Sync {
    /// Address of the options progress stream for `request`.
    fn generation_stream(&self, request: &GenerationRequest) -> Result<StreamAddress>;

    /// Registers a refine job and returns the address of its progress stream.
    async fn register_regeneration(&self, request: &RefineRequest) -> Result<StreamAddress>;

    /// Non-streaming options generation.
    async fn generate_options(&self, request: &GenerationRequest) -> Result<OptionsResult>;

    /// Non-streaming refine call.
    async fn regenerate(&self, request: &RefineRequest) -> Result<Recommendation>;
}

#[derive(Deserialize)]
struct JobTicket {
    job_id: Value,
}

impl JobTicket {
    fn id(&self) -> Option<String> {
        match &self.job_id {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// reqwest client for the recommendation API.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| RecsError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn url_with_params<'a>(
        &self,
        path: &str,
        params: impl IntoIterator<Item = (&'a str, String)>,
    ) -> Result<Url> {
        Url::parse_with_params(&self.url(path), params)
            .map_err(|e| RecsError::config(format!("invalid API base URL '{}': {e}", self.base_url)))
    }

    fn stream_address(&self, url: Url) -> StreamAddress {
        StreamAddress::new(url.to_string(), self.bearer())
    }

    fn bearer(&self) -> Option<String> {
        self.credentials
            .bearer_token()
            .filter(|token| !token.trim().is_empty())
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.bearer() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| map_request_error(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let body = response.text().await.unwrap_or_default();
            let err = map_http_error(status, &body, retry_after);
            tracing::warn!(%status, error = %err, "api: request rejected");
            return Err(err);
        }

        Ok(response)
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        tracing::debug!(path, "api: POST");
        let response = self.send(self.client.post(self.url(path)).json(body)).await?;
        response.json::<T>().await.map_err(|e| map_request_error(&e))
    }
}

#[async_trait]
impl GenerationApi for ApiClient {
    fn generation_stream(&self, request: &GenerationRequest) -> Result<StreamAddress> {
        let url = self.url_with_params("/api/generate/stream", request.to_query_pairs())?;
        Ok(self.stream_address(url))
    }

    async fn register_regeneration(&self, request: &RefineRequest) -> Result<StreamAddress> {
        let body = serde_json::to_value(request)?;
        let ticket: JobTicket = self.post_json("/api/regenerate/jobs", &body).await?;
        let job_id = ticket
            .id()
            .ok_or_else(|| RecsError::parse("job registration returned no job_id"))?;

        tracing::debug!(%job_id, "api: regeneration job registered");
        let url = self.url_with_params("/api/regenerate/stream", [("job_id", job_id)])?;
        Ok(self.stream_address(url))
    }

    async fn generate_options(&self, request: &GenerationRequest) -> Result<OptionsResult> {
        self.post_json("/api/generate/options", &request.to_json_body())
            .await
    }

    async fn regenerate(&self, request: &RefineRequest) -> Result<Recommendation> {
        let body = serde_json::to_value(request)?;
        self.post_json("/api/recommendations/regenerate", &body).await
    }
}

#[async_trait]
impl RecommendationService for ApiClient {
    async fn select_option(&self, request: SelectionRequest) -> Result<Recommendation> {
        let body = serde_json::to_value(&request)?;
        self.post_json("/api/recommendations/select", &body).await
    }

    async fn list_recommendations(&self, owner: &str) -> Result<Vec<Recommendation>> {
        let url =
            self.url_with_params("/api/recommendations", [("github_username", owner.to_string())])?;
        tracing::debug!(owner, "api: GET recommendations");
        let response = self.send(self.client.get(url)).await?;
        response
            .json::<Vec<Recommendation>>()
            .await
            .map_err(|e| map_request_error(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recs_core::principal::StaticCredential;
    use recs_core::recommendation::AnalysisType;

    fn client(credential: StaticCredential) -> ApiClient {
        let config = ClientConfig {
            api_base_url: "https://recs.example.com/".into(),
            ..ClientConfig::default()
        };
        ApiClient::new(&config, Arc::new(credential)).unwrap()
    }

    #[test]
    fn test_generation_stream_address() {
        let mut request = GenerationRequest::new("octocat");
        request.include_specific_skills = vec!["rust".into(), "tokio".into()];
        request.custom_prompt = Some("We shipped a compiler together".into());

        let address = client(StaticCredential::anonymous())
            .generation_stream(&request)
            .unwrap();

        let url = Url::parse(&address.url).unwrap();
        assert_eq!(url.path(), "/api/generate/stream");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("github_username".into(), "octocat".into())));
        assert!(pairs.contains(&("include_specific_skills".into(), "rust,tokio".into())));
        assert!(pairs.contains(&(
            "custom_prompt".into(),
            "We shipped a compiler together".into()
        )));
        assert!(pairs.contains(&(
            "analysis_type".into(),
            AnalysisType::Profile.to_string()
        )));
        assert_eq!(address.bearer, None);
    }

    #[test]
    fn test_stream_address_carries_bearer() {
        let address = client(StaticCredential::bearer("s3cr3t-token"))
            .generation_stream(&GenerationRequest::new("octocat"))
            .unwrap();
        assert_eq!(address.bearer.as_deref(), Some("s3cr3t-token"));
        assert!(!format!("{address:?}").contains("s3cr3t"));
    }

    #[test]
    fn test_job_ticket_accepts_string_or_number() {
        let ticket: JobTicket = serde_json::from_str(r#"{"job_id":"abc-1"}"#).unwrap();
        assert_eq!(ticket.id().as_deref(), Some("abc-1"));
        let ticket: JobTicket = serde_json::from_str(r#"{"job_id":42}"#).unwrap();
        assert_eq!(ticket.id().as_deref(), Some("42"));
        let ticket: JobTicket = serde_json::from_str(r#"{"job_id":null}"#).unwrap();
        assert_eq!(ticket.id(), None);
    }
}
