//! Seams to the rest of the application.
//!
//! The relay needs two answers from outside before it can dial: the current
//! bearer token and which side of the encounter the local actor is on.

use async_trait::async_trait;

use crate::Result;
use crate::types::{EncounterId, Role};

/// Yields the current bearer token.
#[async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    /// `Ok(None)` connects without authentication.
    async fn bearer_token(&self) -> Result<Option<String>>;
}

/// Tells the relay whether the local actor publishes for an encounter.
#[async_trait]
pub trait RoleResolver: Send + Sync + 'static {
    async fn role_for(&self, encounter: &EncounterId) -> Result<Role>;
}

/// Token known up front.
#[derive(Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StaticToken").field(&self.0.as_ref().map(|_| "<redacted>")).finish()
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn bearer_token(&self) -> Result<Option<String>> {
        Ok(self.0.clone())
    }
}

/// Same role for every encounter.
#[derive(Debug, Clone, Copy)]
pub struct FixedRole(pub Role);

#[async_trait]
impl RoleResolver for FixedRole {
    async fn role_for(&self, _encounter: &EncounterId) -> Result<Role> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_collaborators_answer_directly() {
        assert_eq!(StaticToken::new("t").bearer_token().await.unwrap().as_deref(), Some("t"));
        assert_eq!(StaticToken::anonymous().bearer_token().await.unwrap(), None);
        assert_eq!(FixedRole(Role::Both).role_for(&"E1".into()).await.unwrap(), Role::Both);
        assert_eq!(format!("{:?}", StaticToken::new("secret")), "StaticToken(Some(\"<redacted>\"))");
    }
}
