//! External collaborators consumed by the advice pipeline.
//!
//! Each collaborator sits behind an `async_trait` seam so the composition
//! root can choose between the hosted implementation and a local one.

pub mod generation;
pub mod identity;
pub mod quota;

pub use self::generation::{
    CredentialSource, GeminiFactory, GenerationError, GenerationParams, GeneratorCache,
    GeneratorFactory, TextGenerator,
};
pub use self::identity::{AuthenticatedUser, IdentityError, IdentityResolver, StaticIdentity, SupabaseIdentity};
pub use self::quota::{InMemoryQuota, QuotaCounter, QuotaError, QuotaState, SupabaseQuota};

/// Connection details for the hosted database project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
    pub timeout_ms: u64,
}

impl SupabaseConfig {
    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    pub(crate) fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(self.timeout_ms))
            .build()
    }
}
