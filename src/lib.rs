//! Core library for the nurse career-advice service.  This module wires the
//! advice pipeline, its external collaborators and the HTTP handlers
//! together.
//!
//! Request flow for `POST /advice`:
//!
//! ```text
//! method -> bearer -> body size/JSON -> normalise -> generator config
//!        -> identity -> quota consume -> prompt -> generate -> extract
//!        -> sanitise -> 200 (generated or fallback)
//! ```
//!
//! Nothing before the quota consumption reaches the generator, and nothing
//! after it returns an error.

mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod services;
pub mod telemetry;

pub use config::{AppConfig, GeminiConfig, QuotaBackend, DEFAULT_MAX_BODY_CHARS};
pub use error::{ApiError, ErrorResponse, RATE_LIMIT_REMAINING};

use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context};
use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, FailedToBufferBody};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::error::set_remaining;
use crate::metrics::ServiceMetrics;
use crate::pipeline::{fallback_advice, normalize_advice_request};
use crate::services::{
    AuthenticatedUser, CredentialSource, GeminiFactory, GeneratorCache, GeneratorFactory,
    IdentityError, IdentityResolver, InMemoryQuota, QuotaCounter, StaticIdentity, SupabaseIdentity,
    SupabaseQuota,
};
use crate::telemetry::{Outcome, OutcomeLog, OutcomeRecord, RotatingFile};

/// Shared state handed to every handler.  Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub identity: Arc<dyn IdentityResolver>,
    pub quota: Arc<dyn QuotaCounter>,
    pub generators: Arc<GeneratorCache>,
    pub credentials: CredentialSource,
    /// Ceiling on the raw body, in characters.
    pub max_body_chars: usize,
    pub outcome_log: OutcomeLog,
    pub metrics: Arc<ServiceMetrics>,
}

impl AppState {
    pub fn new(
        identity: Arc<dyn IdentityResolver>,
        quota: Arc<dyn QuotaCounter>,
        factory: Arc<dyn GeneratorFactory>,
        credentials: CredentialSource,
    ) -> Self {
        Self {
            identity,
            quota,
            generators: Arc::new(GeneratorCache::new(factory)),
            credentials,
            max_body_chars: DEFAULT_MAX_BODY_CHARS,
            outcome_log: OutcomeLog::disabled(),
            metrics: Arc::new(ServiceMetrics::default()),
        }
    }

    pub fn with_max_body_chars(mut self, max_body_chars: usize) -> Self {
        self.max_body_chars = max_body_chars;
        self
    }

    pub fn with_outcome_log(mut self, outcome_log: OutcomeLog) -> Self {
        self.outcome_log = outcome_log;
        self
    }
}

/// Build state from environment variables.  See [`AppConfig::from_env`] for
/// the variables read.
pub async fn build_state_from_env() -> anyhow::Result<AppState> {
    let config = AppConfig::from_env()?;
    build_state(config)
}

pub fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let identity: Arc<dyn IdentityResolver> = match &config.supabase {
        Some(cfg) => Arc::new(
            SupabaseIdentity::new(cfg.clone()).context("failed to build auth service client")?,
        ),
        None => {
            let identity = StaticIdentity::new(config.static_tokens.clone());
            if identity.is_empty() {
                tracing::warn!("no identity provider configured; every request will be rejected");
            }
            Arc::new(identity)
        }
    };

    let quota: Arc<dyn QuotaCounter> = match config.quota_backend {
        QuotaBackend::Memory => Arc::new(InMemoryQuota::new(config.daily_limit)),
        QuotaBackend::Supabase => {
            let cfg = config
                .supabase
                .clone()
                .ok_or_else(|| anyhow!("supabase quota backend selected without credentials"))?;
            Arc::new(SupabaseQuota::new(cfg).context("failed to build quota service client")?)
        }
    };

    let outcome_log = match config.log_file.as_deref() {
        Some(path) => match RotatingFile::open(path, config.rotation.clone()) {
            Ok(file) => OutcomeLog::new(Some(file), config.log_stdout),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "failed to open LOG_FILE; outcome log disabled");
                OutcomeLog::new(None, config.log_stdout)
            }
        },
        None => {
            tracing::info!("outcome log disabled: LOG_FILE not set");
            OutcomeLog::new(None, config.log_stdout)
        }
    };

    let factory = Arc::new(GeminiFactory {
        base_url: config.gemini.base_url.clone(),
        model: config.gemini.model.clone(),
        timeout_ms: config.gemini.timeout_ms,
    });
    let credentials = CredentialSource::Env(config.gemini.credential_var.clone());
    if credentials.current().is_none() {
        tracing::warn!(
            var = %config.gemini.credential_var,
            "generator credential not set; advice requests will fail with 500 until it is"
        );
    }

    tracing::info!(
        quota_backend = quota.backend(),
        daily_limit = config.daily_limit,
        max_body_chars = config.max_body_chars,
        model = %config.gemini.model,
        "advice service configured"
    );

    Ok(AppState::new(identity, quota, factory, credentials)
        .with_max_body_chars(config.max_body_chars)
        .with_outcome_log(outcome_log))
}

/// Build the Axum router and attach handlers.
pub fn app(state: AppState) -> Router {
    // Generous byte cap; the character ceiling is enforced in the handler.
    let byte_limit = state.max_body_chars.saturating_mul(4);

    Router::new()
        .route("/advice", any(advice_handler))
        .route("/quota", any(quota_handler))
        .route("/track-click", any(track_click_handler))
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler))
        .layer(DefaultBodyLimit::max(byte_limit))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}

static BEARER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^Bearer\s+(.+)$").unwrap());

fn extract_bearer_token(headers: &HeaderMap) -> Result<String, ApiError> {
    let missing = || ApiError::Unauthorized("sign-in is required to use AI career advice");
    let raw = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(missing)?;
    let token = BEARER_RE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|t| !t.is_empty())
        .ok_or_else(missing)?;
    Ok(token.to_string())
}

fn ensure_method(method: &Method, expected: Method, allow: &'static str) -> Result<(), ApiError> {
    if *method == expected {
        Ok(())
    } else {
        Err(ApiError::MethodNotAllowed { allow })
    }
}

/// Enforce the character ceiling, then parse the body as a JSON object.
fn parse_body(
    body: Result<Bytes, BytesRejection>,
    max_chars: usize,
) -> Result<Map<String, Value>, ApiError> {
    let bytes = match body {
        Ok(bytes) => bytes,
        Err(BytesRejection::FailedToBufferBody(FailedToBufferBody::LengthLimitError(_))) => {
            tracing::warn!(limit = max_chars, "request body exceeded byte limit");
            return Err(ApiError::PayloadTooLarge { limit: max_chars });
        }
        Err(other) => {
            tracing::debug!(error = %other, "failed to read request body");
            return Err(ApiError::BadRequest("request body could not be read".into()));
        }
    };
    let text = std::str::from_utf8(&bytes)
        .map_err(|_| ApiError::BadRequest("request body is not valid UTF-8".into()))?;
    if text.chars().count() > max_chars {
        return Err(ApiError::PayloadTooLarge { limit: max_chars });
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ApiError::BadRequest("request body must be a JSON object".into())),
        Err(_) => Err(ApiError::BadRequest("request body is not valid JSON".into())),
    }
}

async fn authenticate(state: &AppState, token: &str) -> Result<AuthenticatedUser, ApiError> {
    state.identity.resolve(token).await.map_err(|e| {
        match &e {
            IdentityError::Unavailable(_) => {
                tracing::warn!(error = %e, "identity service unavailable")
            }
            IdentityError::Rejected => tracing::debug!("bearer token rejected"),
        }
        ApiError::Unauthorized("session is invalid, please sign in again")
    })
}

/// Handler for `POST /advice`.
async fn advice_handler(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let start = Instant::now();
    state.metrics.record_request();
    let response = match serve_advice(&state, &method, &headers, body, start).await {
        Ok(resp) => resp,
        Err(err) => {
            state.metrics.record_rejection(err.status());
            if err.status().is_server_error() {
                tracing::error!(error = %err, "advice request failed");
            } else {
                tracing::debug!(status = err.status().as_u16(), error = %err, "advice request rejected");
            }
            err.into_response()
        }
    };
    state.metrics.observe_latency(start.elapsed());
    response
}

async fn serve_advice(
    state: &AppState,
    method: &Method,
    headers: &HeaderMap,
    body: Result<Bytes, BytesRejection>,
    start: Instant,
) -> Result<Response, ApiError> {
    ensure_method(method, Method::POST, "POST")?;
    let token = extract_bearer_token(headers)?;
    let payload = parse_body(body, state.max_body_chars)?;
    let request =
        normalize_advice_request(&payload).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let credential = state
        .credentials
        .current()
        .ok_or(ApiError::Configuration("text generator credential is not configured"))?;
    let generator = state.generators.get(&credential).map_err(|e| {
        tracing::error!(error = %e, "failed to build generator client");
        ApiError::Configuration("text generator client could not be initialised")
    })?;

    let user = authenticate(state, &token).await?;
    let quota = state.quota.consume(&user).await.map_err(|e| {
        tracing::error!(error = %e, user = %user.user_id, "quota consumption failed");
        ApiError::QuotaService
    })?;

    let mbti_type = request.personality.mbti_type.as_str();
    let has_deep_dive = request.has_deep_dive();
    if !quota.allowed {
        tracing::info!(user = %user.user_id, daily_limit = quota.daily_limit, "daily advice quota exhausted");
        state.outcome_log.record(&OutcomeRecord {
            outcome: Outcome::QuotaExceeded,
            cause: None,
            stage: None,
            remaining: quota.remaining,
            latency_ms: start.elapsed().as_millis(),
            mbti_type,
            has_deep_dive,
        });
        return Err(ApiError::QuotaExceeded {
            remaining: quota.remaining,
        });
    }

    let result = pipeline::generate_advice(generator.as_ref(), &request).await;
    let (advice, outcome, cause, stage) = match result {
        Ok(advice) => {
            state.metrics.record_success();
            (advice, Outcome::Succeeded, None, None)
        }
        Err(cause) => {
            tracing::warn!(
                user = %user.user_id,
                stage = cause.stage(),
                cause = %cause,
                "advice generation fell back"
            );
            state.metrics.record_fallback(cause.label());
            (
                fallback_advice(),
                Outcome::FellBack,
                Some(cause.label()),
                Some(cause.stage()),
            )
        }
    };
    state.outcome_log.record(&OutcomeRecord {
        outcome,
        cause,
        stage,
        remaining: quota.remaining,
        latency_ms: start.elapsed().as_millis(),
        mbti_type,
        has_deep_dive,
    });

    let mut resp = (StatusCode::OK, Json(advice)).into_response();
    set_remaining(&mut resp, quota.remaining);
    Ok(resp)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QuotaResponse {
    remaining: u32,
    used: u32,
    daily_limit: u32,
}

/// Handler for `GET /quota`.  Reads without consuming.
async fn quota_handler(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    match serve_quota(&state, &method, &headers).await {
        Ok(resp) => resp,
        Err(err) => {
            if err.status().is_server_error() {
                tracing::error!(error = %err, "quota request failed");
            }
            err.into_response()
        }
    }
}

async fn serve_quota(
    state: &AppState,
    method: &Method,
    headers: &HeaderMap,
) -> Result<Response, ApiError> {
    ensure_method(method, Method::GET, "GET")?;
    let token = extract_bearer_token(headers)?;
    let user = authenticate(state, &token).await?;
    let quota = state.quota.peek(&user).await.map_err(|e| {
        tracing::error!(error = %e, user = %user.user_id, "quota read failed");
        ApiError::QuotaService
    })?;
    let body = QuotaResponse {
        remaining: quota.remaining,
        used: quota.used,
        daily_limit: quota.daily_limit,
    };
    let mut resp = (StatusCode::OK, Json(body)).into_response();
    set_remaining(&mut resp, quota.remaining);
    Ok(resp)
}

const MAX_SITE_NAME_CHARS: usize = 80;

/// Handler for `POST /track-click`.  Best effort: any well-formed POST is
/// acknowledged so the client's navigation never waits on it.
async fn track_click_handler(
    State(state): State<AppState>,
    method: Method,
    body: Bytes,
) -> Response {
    if let Err(err) = ensure_method(&method, Method::POST, "POST") {
        return err.into_response();
    }
    let value: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let site = value
        .get("siteName")
        .and_then(|v| pipeline::normalize::normalize_string(v, MAX_SITE_NAME_CHARS));
    let mbti = value
        .get("mbtiType")
        .and_then(pipeline::normalize::normalize_mbti_type);
    tracing::debug!(site = ?site, mbti = ?mbti.as_ref().map(|m| m.as_str()), "recommendation click");
    state.metrics.record_site_click(site.as_deref());
    (StatusCode::OK, Json(serde_json::json!({ "success": true }))).into_response()
}

/// Health endpoint for container readiness / liveness checks.
async fn healthz_handler(State(state): State<AppState>) -> Response {
    let json = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "quotaBackend": state.quota.backend(),
        "dailyLimit": state.quota.configured_limit(),
        "generatorConfigured": state.credentials.current().is_some(),
    });
    (StatusCode::OK, Json(json)).into_response()
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{GenerationError, GenerationParams, TextGenerator};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct Unused;

    #[async_trait::async_trait]
    impl TextGenerator for Unused {
        async fn generate(&self, _: &str, _: GenerationParams) -> Result<String, GenerationError> {
            Err(GenerationError::EmptyResponse)
        }
    }

    impl GeneratorFactory for Unused {
        fn build(&self, _: &str) -> Result<Arc<dyn TextGenerator>, GenerationError> {
            Ok(Arc::new(Unused))
        }
    }

    fn state() -> AppState {
        AppState::new(
            Arc::new(StaticIdentity::single("tok", "nurse-1")),
            Arc::new(InMemoryQuota::new(3)),
            Arc::new(Unused),
            CredentialSource::Fixed(Some("key".into())),
        )
    }

    fn headers(auth: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        h
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(extract_bearer_token(&headers("Bearer abc")).unwrap(), "abc");
        assert_eq!(extract_bearer_token(&headers("bearer   abc ")).unwrap(), "abc");
        assert_eq!(extract_bearer_token(&headers("BEARER x.y.z")).unwrap(), "x.y.z");
    }

    #[test]
    fn malformed_authorization_is_unauthorized() {
        for raw in ["Basic abc", "Bearer", "Bearer    ", "Bearerabc", "abc"] {
            let err = extract_bearer_token(&headers(raw)).unwrap_err();
            assert_eq!(err.status(), StatusCode::UNAUTHORIZED, "{raw:?}");
        }
        assert!(extract_bearer_token(&HeaderMap::new()).is_err());
    }

    #[test]
    fn body_ceiling_counts_characters() {
        let body = format!("{{\"k\":\"{}\"}}", "看".repeat(10));
        let ok = parse_body(Ok(Bytes::from(body.clone())), body.chars().count());
        assert!(ok.is_ok());
        let err = parse_body(Ok(Bytes::from(body.clone())), body.chars().count() - 1).unwrap_err();
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn body_must_be_a_json_object() {
        for raw in ["", "not json", "[1,2]", "\"str\"", "{\"a\":"] {
            let err = parse_body(Ok(Bytes::from(raw)), 100).unwrap_err();
            assert_eq!(err.status(), StatusCode::BAD_REQUEST, "{raw:?}");
        }
    }

    #[tokio::test]
    async fn wrong_method_is_rejected_with_allow_and_no_store() {
        let resp = app(state())
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/advice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(resp.headers()[header::ALLOW], "POST");
        assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-store");

        let resp = app(state())
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/quota")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(resp.headers()[header::ALLOW], "GET");
    }
}
