//! Text generation client.
//!
//! [`GeneratorCache`] keeps the most recently built client and rebuilds it
//! only when the credential changes, so a rotated API key takes effect on the
//! next request without a restart.  Concurrent rebuilds after a rotation are
//! harmless; the last writer wins.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generator transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("generator returned HTTP {status}")]
    Status { status: u16 },
    #[error("generator response carried no text")]
    EmptyResponse,
}

/// A single-shot text generator.  Implementations never retry.
#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, params: GenerationParams)
        -> Result<String, GenerationError>;
}

/// Builds a generator for a given credential.
pub trait GeneratorFactory: Send + Sync {
    fn build(&self, credential: &str) -> Result<Arc<dyn TextGenerator>, GenerationError>;
}

/// Where the generator credential is read from on each request.
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// Read the named environment variable every time.
    Env(String),
    Fixed(Option<String>),
}

impl CredentialSource {
    pub fn current(&self) -> Option<String> {
        let raw = match self {
            CredentialSource::Env(var) => std::env::var(var).ok(),
            CredentialSource::Fixed(value) => value.clone(),
        };
        raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
    }
}

type Slot = Option<(String, Arc<dyn TextGenerator>)>;

pub struct GeneratorCache {
    factory: Arc<dyn GeneratorFactory>,
    slot: RwLock<Slot>,
}

impl GeneratorCache {
    pub fn new(factory: Arc<dyn GeneratorFactory>) -> Self {
        Self {
            factory,
            slot: RwLock::new(None),
        }
    }

    /// Return the client for `credential`, building it on first use or after
    /// the credential changed.
    pub fn get(&self, credential: &str) -> Result<Arc<dyn TextGenerator>, GenerationError> {
        if let Ok(slot) = self.slot.read() {
            if let Some((key, generator)) = slot.as_ref() {
                if key == credential {
                    return Ok(generator.clone());
                }
            }
        }
        let generator = self.factory.build(credential)?;
        if let Ok(mut slot) = self.slot.write() {
            let rotated = slot.is_some();
            *slot = Some((credential.to_string(), generator.clone()));
            if rotated {
                tracing::info!("generator credential changed, client rebuilt");
            }
        }
        Ok(generator)
    }
}

/// Factory for the Gemini `generateContent` REST API.
#[derive(Debug, Clone)]
pub struct GeminiFactory {
    pub base_url: String,
    pub model: String,
    pub timeout_ms: u64,
}

impl GeneratorFactory for GeminiFactory {
    fn build(&self, credential: &str) -> Result<Arc<dyn TextGenerator>, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(self.timeout_ms))
            .build()?;
        let endpoint = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        Ok(Arc::new(GeminiGenerator {
            client,
            endpoint,
            api_key: credential.to_string(),
        }))
    }
}

pub struct GeminiGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[async_trait::async_trait]
impl TextGenerator for GeminiGenerator {
    async fn generate(
        &self,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<String, GenerationError> {
        let payload = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": params.temperature,
                "maxOutputTokens": params.max_output_tokens,
            }
        });
        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(GenerationError::Status {
                status: status.as_u16(),
            });
        }
        let body: Value = resp.json().await?;
        response_text(&body).ok_or(GenerationError::EmptyResponse)
    }
}

/// Concatenate the text parts of the first candidate.
fn response_text(body: &Value) -> Option<String> {
    let parts = body
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}
