//! Generation form data and its validation.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::recommendation::{AnalysisType, GenerationRequest, Length, RecommendationType, Tone};

/// Minimum length of the working relationship description, after trimming.
pub const MIN_RELATIONSHIP_CHARS: usize = 10;

static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@?([A-Za-z0-9](?:[A-Za-z0-9-]{0,37}[A-Za-z0-9])?)$").unwrap());

static REPO_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:https?://)?(?:www\.)?github\.com/([A-Za-z0-9](?:[A-Za-z0-9-]{0,37}[A-Za-z0-9])?)/([A-Za-z0-9._-]+?)(?:\.git)?/?$",
    )
    .unwrap()
});

static REPO_SHORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9](?:[A-Za-z0-9-]{0,37}[A-Za-z0-9])?)/([A-Za-z0-9._-]+)$").unwrap()
});

/// Fields that can carry a validation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormField {
    WorkingRelationship,
    GithubInput,
    RepositoryUrl,
}

pub type ValidationErrors = BTreeMap<FormField, String>;

/// What the identity field parsed as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GithubIdentity {
    Username(String),
    Repository { owner: String, name: String },
}

impl GithubIdentity {
    pub fn owner(&self) -> &str {
        match self {
            GithubIdentity::Username(name) => name,
            GithubIdentity::Repository { owner, .. } => owner,
        }
    }
}

/// Parses a bare username or a repository reference.
///
/// Accepted repository shapes are `owner/repo` and
/// `[https://][www.]github.com/owner/repo[.git][/]`.
pub fn parse_github_input(input: &str) -> Option<GithubIdentity> {
    let input = input.trim();
    if let Some(caps) = REPO_URL_RE
        .captures(input)
        .or_else(|| REPO_SHORT_RE.captures(input))
    {
        return Some(GithubIdentity::Repository {
            owner: caps[1].to_string(),
            name: caps[2].to_string(),
        });
    }
    USERNAME_RE
        .captures(input)
        .map(|caps| GithubIdentity::Username(caps[1].to_string()))
}

/// Parses a repository reference only.
pub fn parse_repository(input: &str) -> Option<(String, String)> {
    match parse_github_input(input)? {
        GithubIdentity::Repository { owner, name } => Some((owner, name)),
        GithubIdentity::Username(_) => None,
    }
}

pub fn repository_url(owner: &str, name: &str) -> String {
    format!("https://github.com/{owner}/{name}")
}

/// Everything the user entered on the form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormData {
    pub github_input: String,
    pub working_relationship: String,
    /// Only consulted when analysis is restricted to one repository.
    pub repository_url: String,
    pub analysis_type: AnalysisType,
    pub recommendation_type: RecommendationType,
    pub tone: Tone,
    pub length: Length,
    pub target_role: String,
    pub include_specific_skills: Vec<String>,
    pub exclude_keywords: Vec<String>,
}

impl FormData {
    /// The analysis scope implied by the identity field.
    ///
    /// A repository reference forces `repo_only`; otherwise the user's choice stands.
    pub fn effective_analysis_type(&self) -> AnalysisType {
        match parse_github_input(&self.github_input) {
            Some(GithubIdentity::Repository { .. }) => AnalysisType::RepoOnly,
            _ => self.analysis_type,
        }
    }

    /// Validates the form and builds the generation request.
    pub fn to_request(&self) -> Result<GenerationRequest, ValidationErrors> {
        let errors = validate_form(self);
        if !errors.is_empty() {
            return Err(errors);
        }

        // validate_form guarantees the identity parses
        let Some(identity) = parse_github_input(&self.github_input) else {
            let mut errors = ValidationErrors::new();
            errors.insert(FormField::GithubInput, invalid_identity_message());
            return Err(errors);
        };

        let analysis_type = self.effective_analysis_type();
        let repository_url = match (&identity, analysis_type) {
            (GithubIdentity::Repository { owner, name }, _) => Some(repository_url(owner, name)),
            (GithubIdentity::Username(_), AnalysisType::RepoOnly) => {
                parse_repository(&self.repository_url).map(|(o, n)| repository_url(&o, &n))
            }
            (GithubIdentity::Username(_), AnalysisType::Profile) => None,
        };

        Ok(GenerationRequest {
            github_username: identity.owner().to_string(),
            recommendation_type: self.recommendation_type,
            tone: self.tone,
            length: self.length,
            custom_prompt: Some(self.working_relationship.trim().to_string()),
            target_role: Some(self.target_role.trim().to_string()).filter(|r| !r.is_empty()),
            include_specific_skills: clean_list(&self.include_specific_skills),
            exclude_keywords: clean_list(&self.exclude_keywords),
            analysis_type,
            repository_url,
        })
    }
}

fn clean_list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

fn invalid_identity_message() -> String {
    "Enter a GitHub username or a repository (owner/repo or https://github.com/owner/repo)"
        .to_string()
}

/// Validates the form.
///
/// A missing identity is reported on its own: nothing else on the form can be
/// judged without knowing whose work is being described.
pub fn validate_form(form: &FormData) -> ValidationErrors {
    let mut errors = ValidationErrors::new();

    let github_input = form.github_input.trim();
    if github_input.is_empty() {
        errors.insert(
            FormField::GithubInput,
            "GitHub username or repository is required".to_string(),
        );
        return errors;
    }

    let identity = parse_github_input(github_input);
    if identity.is_none() {
        errors.insert(FormField::GithubInput, invalid_identity_message());
    }

    let relationship = form.working_relationship.trim();
    if relationship.is_empty() {
        errors.insert(
            FormField::WorkingRelationship,
            "Describe how you worked together".to_string(),
        );
    } else if relationship.chars().count() < MIN_RELATIONSHIP_CHARS {
        errors.insert(
            FormField::WorkingRelationship,
            format!("Please provide at least {MIN_RELATIONSHIP_CHARS} characters"),
        );
    }

    if matches!(identity, Some(GithubIdentity::Username(_)))
        && form.analysis_type == AnalysisType::RepoOnly
    {
        let repo = form.repository_url.trim();
        if repo.is_empty() {
            errors.insert(
                FormField::RepositoryUrl,
                "A repository is required for repository-only analysis".to_string(),
            );
        } else if parse_repository(repo).is_none() {
            errors.insert(
                FormField::RepositoryUrl,
                "Enter a repository as owner/repo or https://github.com/owner/repo".to_string(),
            );
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(relationship: &str, github_input: &str) -> FormData {
        FormData {
            working_relationship: relationship.to_string(),
            github_input: github_input.to_string(),
            ..FormData::default()
        }
    }

    #[test]
    fn test_missing_identity_is_the_only_error() {
        let errors = validate_form(&form("ok", ""));
        assert_eq!(errors.keys().copied().collect::<Vec<_>>(), vec![FormField::GithubInput]);
    }

    #[test]
    fn test_short_relationship() {
        let errors = validate_form(&form("short", "octocat"));
        assert_eq!(
            errors.keys().copied().collect::<Vec<_>>(),
            vec![FormField::WorkingRelationship]
        );
    }

    #[test]
    fn test_valid_form() {
        assert!(validate_form(&form(&"A".repeat(10), "octocat")).is_empty());
        // Length is measured after trimming
        assert!(!validate_form(&form("   AAAAAAAAA   ", "octocat")).is_empty());
    }

    #[test]
    fn test_parse_identity_shapes() {
        assert_eq!(
            parse_github_input("octocat"),
            Some(GithubIdentity::Username("octocat".into()))
        );
        assert_eq!(
            parse_github_input("@mona-lisa"),
            Some(GithubIdentity::Username("mona-lisa".into()))
        );
        let repo = Some(GithubIdentity::Repository {
            owner: "octocat".into(),
            name: "hello-world".into(),
        });
        assert_eq!(parse_github_input("octocat/hello-world"), repo);
        assert_eq!(parse_github_input("https://github.com/octocat/hello-world"), repo);
        assert_eq!(parse_github_input("github.com/octocat/hello-world.git/"), repo);

        assert_eq!(parse_github_input("-leading"), None);
        assert_eq!(parse_github_input("has space"), None);
        assert_eq!(parse_github_input("https://gitlab.com/a/b"), None);
    }

    #[test]
    fn test_repository_reference_forces_repo_only() {
        let data = form("We maintained the CLI together", "octocat/hello-world");
        let request = data.to_request().unwrap();

        assert_eq!(request.analysis_type, AnalysisType::RepoOnly);
        assert_eq!(request.github_username, "octocat");
        assert_eq!(
            request.repository_url.as_deref(),
            Some("https://github.com/octocat/hello-world")
        );
    }

    #[test]
    fn test_repo_only_with_username_requires_repository_field() {
        let mut data = form("We maintained the CLI together", "octocat");
        data.analysis_type = AnalysisType::RepoOnly;

        let errors = validate_form(&data);
        assert_eq!(
            errors.keys().copied().collect::<Vec<_>>(),
            vec![FormField::RepositoryUrl]
        );

        data.repository_url = "not a repo".into();
        assert!(validate_form(&data).contains_key(&FormField::RepositoryUrl));

        data.repository_url = "https://github.com/octocat/spoon-knife".into();
        let request = data.to_request().unwrap();
        assert_eq!(request.analysis_type, AnalysisType::RepoOnly);
        assert_eq!(
            request.repository_url.as_deref(),
            Some("https://github.com/octocat/spoon-knife")
        );
    }

    #[test]
    fn test_profile_scope_ignores_repository_field() {
        let mut data = form("We maintained the CLI together", "octocat");
        data.repository_url = "garbage".into();
        data.target_role = "  ".into();
        data.include_specific_skills = vec![" rust ".into(), "".into()];

        let request = data.to_request().unwrap();
        assert_eq!(request.analysis_type, AnalysisType::Profile);
        assert_eq!(request.repository_url, None);
        assert_eq!(request.target_role, None);
        assert_eq!(request.include_specific_skills, vec!["rust".to_string()]);
        assert_eq!(
            request.custom_prompt.as_deref(),
            Some("We maintained the CLI together")
        );
    }
}
