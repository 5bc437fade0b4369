#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use nurse_advice::services::{
    CredentialSource, GenerationError, GenerationParams, GeneratorFactory, InMemoryQuota,
    QuotaCounter, StaticIdentity, TextGenerator,
};
use nurse_advice::{app, AppState};
use tokio::net::TcpListener;

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn set_many(&mut self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

pub const TOKEN: &str = "nurse-token";
pub const USER: &str = "nurse-1";

/// Generator with a fixed reply that records every prompt it receives.
pub struct Scripted {
    reply: Result<String, u16>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl Scripted {
    pub fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(text.to_string()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(status),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait::async_trait]
impl TextGenerator for Scripted {
    async fn generate(
        &self,
        prompt: &str,
        _params: GenerationParams,
    ) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err(status) => Err(GenerationError::Status { status: *status }),
        }
    }
}

/// Hands out the same scripted generator regardless of credential.
pub struct ScriptedFactory(pub Arc<Scripted>);

impl GeneratorFactory for ScriptedFactory {
    fn build(&self, _credential: &str) -> Result<Arc<dyn TextGenerator>, GenerationError> {
        Ok(self.0.clone())
    }
}

pub fn state_with(generator: Arc<Scripted>, quota: Arc<dyn QuotaCounter>) -> AppState {
    AppState::new(
        Arc::new(StaticIdentity::single(TOKEN, USER)),
        quota,
        Arc::new(ScriptedFactory(generator)),
        CredentialSource::Fixed(Some("test-key".into())),
    )
}

pub fn state(generator: Arc<Scripted>) -> AppState {
    state_with(generator, Arc::new(InMemoryQuota::new(3)))
}

pub async fn spawn(state: AppState) -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(state);
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{}", addr), handle)
}

pub fn valid_body() -> serde_json::Value {
    serde_json::json!({
        "mbtiType": "infj",
        "personalityData": {
            "title": "The Quiet Guardian",
            "description": "Reads patients well and keeps calm under pressure.",
            "strengths": ["empathy", "planning", "empathy"],
            "workStyle": "Prefers steady routines with room for one-to-one care."
        }
    })
}

pub fn advice_text() -> String {
    serde_json::json!({
        "careerAdvice": "Consider a **palliative care** ward.",
        "stressManagement": "Protect a short reset after each shift.",
        "teamCompatibility": "You pair well with decisive charge nurses.",
        "personalizedSiteRecommendations": [
            { "siteName": "Kango Job Plus", "reason": "Clinic roles with day shifts.", "matchScore": 88 }
        ]
    })
    .to_string()
}
