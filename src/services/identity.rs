use std::collections::HashMap;

use super::SupabaseConfig;

/// The caller after its bearer token has been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
    /// Forwarded to collaborators that enforce row-level access.
    pub access_token: String,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("credential rejected")]
    Rejected,
    #[error("identity service unavailable: {0}")]
    Unavailable(String),
}

/// Resolves a bearer token to a user.
#[async_trait::async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<AuthenticatedUser, IdentityError>;
}

/// Fixed token table, for local development and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    tokens: HashMap<String, String>,
}

impl StaticIdentity {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    pub fn single(token: &str, user_id: &str) -> Self {
        let mut tokens = HashMap::new();
        tokens.insert(token.to_string(), user_id.to_string());
        Self { tokens }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait::async_trait]
impl IdentityResolver for StaticIdentity {
    async fn resolve(&self, token: &str) -> Result<AuthenticatedUser, IdentityError> {
        self.tokens
            .get(token)
            .map(|user_id| AuthenticatedUser {
                user_id: user_id.clone(),
                access_token: token.to_string(),
            })
            .ok_or(IdentityError::Rejected)
    }
}

/// Verifies tokens against the hosted auth service (`GET /auth/v1/user`).
pub struct SupabaseIdentity {
    cfg: SupabaseConfig,
    client: reqwest::Client,
}

#[derive(serde::Deserialize)]
struct AuthUser {
    id: Option<String>,
}

impl SupabaseIdentity {
    pub fn new(cfg: SupabaseConfig) -> reqwest::Result<Self> {
        let client = cfg.http_client()?;
        Ok(Self { cfg, client })
    }
}

#[async_trait::async_trait]
impl IdentityResolver for SupabaseIdentity {
    async fn resolve(&self, token: &str) -> Result<AuthenticatedUser, IdentityError> {
        let resp = self
            .client
            .get(self.cfg.endpoint("auth/v1/user"))
            .header("apikey", &self.cfg.anon_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            tracing::debug!(status = resp.status().as_u16(), "auth service rejected token");
            return Err(IdentityError::Rejected);
        }
        let user: AuthUser = resp
            .json()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;
        match user.id.filter(|id| !id.is_empty()) {
            Some(user_id) => Ok(AuthenticatedUser {
                user_id,
                access_token: token.to_string(),
            }),
            None => Err(IdentityError::Rejected),
        }
    }
}
