//! Who is driving the workflow.

/// Accessor for the current bearer credential.
///
/// How the credential is stored is not this crate's concern. Implementations
/// must never log the token.
pub trait CredentialProvider: Send + Sync {
    /// The current bearer token, or `None` for an anonymous principal.
    fn bearer_token(&self) -> Option<String>;

    fn principal(&self) -> Principal {
        match self.bearer_token() {
            Some(token) if !token.trim().is_empty() => Principal::Authenticated,
            _ => Principal::Anonymous,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    Anonymous,
    Authenticated,
}

impl Principal {
    pub fn is_anonymous(self) -> bool {
        self == Principal::Anonymous
    }
}

/// A credential fixed at construction time.
#[derive(Debug, Clone, Default)]
pub struct StaticCredential(Option<String>);

impl StaticCredential {
    pub fn anonymous() -> Self {
        Self(None)
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }
}

impl CredentialProvider for StaticCredential {
    fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}
