//! Recommendation domain models and request payloads.
//!
//! `GenerationRequest` is the single canonical description of one generation
//! attempt. It has two encodings: query pairs for the stream address and a
//! JSON body for the request/reply fallback. Both are derived from the same
//! value so the two paths cannot drift apart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

/// The kind of recommendation being written.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecommendationType {
    #[default]
    Professional,
    Technical,
    Leadership,
    Academic,
    Personal,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Tone {
    #[default]
    Professional,
    Friendly,
    Formal,
    Casual,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Length {
    Short,
    #[default]
    Medium,
    Long,
}

/// What the server analyzes to write the recommendation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AnalysisType {
    /// The whole GitHub profile.
    #[default]
    Profile,
    /// A single repository only.
    RepoOnly,
}

/// One generation attempt's parameters. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub github_username: String,
    pub recommendation_type: RecommendationType,
    pub tone: Tone,
    pub length: Length,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_role: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_specific_skills: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_keywords: Vec<String>,
    pub analysis_type: AnalysisType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,
}

impl GenerationRequest {
    /// Creates a request with default content parameters for `github_username`.
    pub fn new(github_username: impl Into<String>) -> Self {
        Self {
            github_username: github_username.into(),
            recommendation_type: RecommendationType::default(),
            tone: Tone::default(),
            length: Length::default(),
            custom_prompt: None,
            target_role: None,
            include_specific_skills: Vec::new(),
            exclude_keywords: Vec::new(),
            analysis_type: AnalysisType::default(),
            repository_url: None,
        }
    }

    /// Encodes the request as stream address query pairs.
    ///
    /// Scalars are written as-is, list fields are comma-joined, and empty
    /// optional fields are omitted.
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("github_username", self.github_username.clone()),
            ("recommendation_type", self.recommendation_type.to_string()),
            ("tone", self.tone.to_string()),
            ("length", self.length.to_string()),
        ];

        push_optional(&mut pairs, "custom_prompt", self.custom_prompt.as_deref());
        push_optional(&mut pairs, "target_role", self.target_role.as_deref());
        push_list(
            &mut pairs,
            "include_specific_skills",
            &self.include_specific_skills,
        );
        push_list(&mut pairs, "exclude_keywords", &self.exclude_keywords);
        pairs.push(("analysis_type", self.analysis_type.to_string()));
        push_optional(&mut pairs, "repository_url", self.repository_url.as_deref());

        pairs
    }

    /// Encodes the request as the JSON body of the non-streaming call.
    pub fn to_json_body(&self) -> Value {
        // Serializing plain strings and enums into a Value cannot fail
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn push_optional(pairs: &mut Vec<(&'static str, String)>, key: &'static str, value: Option<&str>) {
    if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
        pairs.push((key, value.to_string()));
    }
}

fn push_list(pairs: &mut Vec<(&'static str, String)>, key: &'static str, values: &[String]) {
    let joined = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect::<Vec<_>>()
        .join(",");
    if !joined.is_empty() {
        pairs.push((key, joined));
    }
}

/// An ephemeral candidate produced by one generation attempt. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationOption {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub word_count: u32,
    #[serde(default)]
    pub focus: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub generation_parameters: Value,
}

/// The batch of options returned by one generation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionsResult {
    pub options: Vec<RecommendationOption>,
    #[serde(default)]
    pub generation_parameters: Value,
}

/// A persisted recommendation.
///
/// Regeneration mutates the entity in place: the id stays, the content changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: i64,
    pub title: String,
    pub content: String,
    #[serde(rename = "recommendation_type", alias = "type")]
    pub recommendation_type: RecommendationType,
    pub tone: Tone,
    pub length: Length,
    #[serde(default)]
    pub word_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "github_username", alias = "owner")]
    pub owner: String,
}

/// Body of the selection call that turns an option into a Recommendation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionRequest {
    pub github_username: String,
    pub selected_option: RecommendationOption,
    pub all_options: Vec<RecommendationOption>,
    pub analysis_context_type: AnalysisType,
    pub repository_url: Option<String>,
}

/// A "refine existing content" payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefineRequest {
    /// Id of the persisted recommendation being refined, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation_id: Option<i64>,
    pub original_content: String,
    pub refinement_instructions: String,
    pub github_username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation_type: Option<RecommendationType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<Tone>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<Length>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_keywords: Vec<String>,
}

impl RefineRequest {
    /// Builds a refinement of an existing recommendation, keeping its parameters.
    pub fn for_recommendation(recommendation: &Recommendation, instructions: &str) -> Self {
        Self {
            recommendation_id: Some(recommendation.id),
            original_content: recommendation.content.clone(),
            refinement_instructions: instructions.trim().to_string(),
            github_username: recommendation.owner.clone(),
            recommendation_type: Some(recommendation.recommendation_type),
            tone: Some(recommendation.tone),
            length: Some(recommendation.length),
            include_keywords: Vec::new(),
            exclude_keywords: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn full_request() -> GenerationRequest {
        GenerationRequest {
            github_username: "octocat".into(),
            recommendation_type: RecommendationType::Technical,
            tone: Tone::Friendly,
            length: Length::Long,
            custom_prompt: Some("  We shipped the parser together  ".into()),
            target_role: Some("Staff Engineer".into()),
            include_specific_skills: vec!["rust".into(), " tokio ".into(), "".into()],
            exclude_keywords: vec![],
            analysis_type: AnalysisType::RepoOnly,
            repository_url: Some("https://github.com/octocat/hello-world".into()),
        }
    }

    #[test]
    fn test_query_pairs_join_lists_and_skip_empty() {
        let pairs = full_request().to_query_pairs();
        let get = |k: &str| pairs.iter().find(|(key, _)| *key == k).map(|(_, v)| v.as_str());

        assert_eq!(get("github_username"), Some("octocat"));
        assert_eq!(get("recommendation_type"), Some("technical"));
        assert_eq!(get("custom_prompt"), Some("We shipped the parser together"));
        assert_eq!(get("include_specific_skills"), Some("rust,tokio"));
        assert_eq!(get("exclude_keywords"), None);
        assert_eq!(get("analysis_type"), Some("repo_only"));
        assert_eq!(
            get("repository_url"),
            Some("https://github.com/octocat/hello-world")
        );
    }

    #[test]
    fn test_json_body_matches_query_fields() {
        let request = full_request();
        let body = request.to_json_body();

        assert_eq!(body["github_username"], "octocat");
        assert_eq!(body["tone"], "friendly");
        assert_eq!(body["analysis_type"], "repo_only");
        assert_eq!(body["include_specific_skills"][0], "rust");
        assert!(body.get("exclude_keywords").is_none());
    }

    #[test]
    fn test_minimal_request_pairs() {
        let pairs = GenerationRequest::new("octocat").to_query_pairs();
        let keys: Vec<_> = pairs.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            keys,
            vec![
                "github_username",
                "recommendation_type",
                "tone",
                "length",
                "analysis_type"
            ]
        );
    }

    #[test]
    fn test_enum_strings() {
        assert_eq!(AnalysisType::from_str("repo_only").unwrap(), AnalysisType::RepoOnly);
        assert_eq!(Length::Short.to_string(), "short");
        assert!(Tone::from_str("sarcastic").is_err());
    }

    #[test]
    fn test_recommendation_accepts_type_alias() {
        let json = r#"{
            "id": 7,
            "title": "For Mona",
            "content": "A",
            "type": "leadership",
            "tone": "formal",
            "length": "short",
            "word_count": 1,
            "created_at": "2026-10-16T09:00:00Z",
            "owner": "octocat"
        }"#;
        let rec: Recommendation = serde_json::from_str(json).unwrap();
        assert_eq!(rec.recommendation_type, RecommendationType::Leadership);
        assert_eq!(rec.owner, "octocat");
    }
}
