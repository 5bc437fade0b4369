use std::collections::HashMap;
use std::env;

use anyhow::{anyhow, bail, Result};

use crate::services::quota::DEFAULT_DAILY_LIMIT;
use crate::services::SupabaseConfig;
use crate::telemetry::RotationConfig;

pub const DEFAULT_MAX_BODY_CHARS: usize = 20_000;
const DEFAULT_GEMINI_BASE: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaBackend {
    Memory,
    Supabase,
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// Environment variable holding the API key; read on every request.
    pub credential_var: String,
    pub base_url: String,
    pub model: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub max_body_chars: usize,
    pub daily_limit: u32,
    pub quota_backend: QuotaBackend,
    pub supabase: Option<SupabaseConfig>,
    pub static_tokens: HashMap<String, String>,
    pub gemini: GeminiConfig,
    pub log_file: Option<String>,
    pub rotation: RotationConfig,
    pub log_stdout: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let max_body_chars = parse_optional_u64("ADVICE_MAX_BODY_CHARS")?
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_BODY_CHARS);
        let daily_limit = match parse_optional_u64("ADVICE_DAILY_LIMIT")? {
            Some(v) => u32::try_from(v).map_err(|_| anyhow!("ADVICE_DAILY_LIMIT is too large"))?,
            None => DEFAULT_DAILY_LIMIT,
        };

        let supabase = supabase_from_env()?;
        let quota_backend = match non_empty_var("ADVICE_QUOTA_BACKEND") {
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "memory" => QuotaBackend::Memory,
                "supabase" if supabase.is_some() => QuotaBackend::Supabase,
                "supabase" => bail!(
                    "ADVICE_QUOTA_BACKEND=supabase requires SUPABASE_URL and SUPABASE_ANON_KEY"
                ),
                other => bail!("ADVICE_QUOTA_BACKEND must be memory or supabase, got '{}'", other),
            },
            None if supabase.is_some() => QuotaBackend::Supabase,
            None => QuotaBackend::Memory,
        };

        let static_tokens = non_empty_var("ADVICE_STATIC_TOKENS")
            .map(|raw| parse_static_tokens(&raw))
            .unwrap_or_default();

        let gemini = GeminiConfig {
            credential_var: "GEMINI_API_KEY".to_string(),
            base_url: non_empty_var("GEMINI_API_BASE")
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE.to_string()),
            model: non_empty_var("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            timeout_ms: parse_optional_u64("GEMINI_TIMEOUT_MS")?.unwrap_or(30_000),
        };

        let rotation = RotationConfig {
            max_bytes: parse_optional_u64("LOG_MAX_BYTES")?,
            keep: parse_optional_u64("LOG_ROTATE_KEEP")?.unwrap_or(1) as usize,
            compress: parse_bool_env("LOG_ROTATE_COMPRESS")?.unwrap_or(false),
        };

        Ok(Self {
            max_body_chars,
            daily_limit,
            quota_backend,
            supabase,
            static_tokens,
            gemini,
            log_file: non_empty_var("LOG_FILE"),
            rotation,
            log_stdout: parse_bool_env("ADVICE_LOG_STDOUT")?.unwrap_or(false),
        })
    }
}

fn supabase_from_env() -> Result<Option<SupabaseConfig>> {
    let url = non_empty_var("SUPABASE_URL").or_else(|| non_empty_var("VITE_SUPABASE_URL"));
    let key = non_empty_var("SUPABASE_ANON_KEY").or_else(|| non_empty_var("VITE_SUPABASE_ANON_KEY"));
    let timeout_ms = parse_optional_u64("SUPABASE_TIMEOUT_MS")?.unwrap_or(5_000);
    Ok(match (url, key) {
        (Some(url), Some(anon_key)) => Some(SupabaseConfig {
            url,
            anon_key,
            timeout_ms,
        }),
        _ => None,
    })
}

/// `token:user,token2:user2`; a bare token maps to itself.
fn parse_static_tokens(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((token, user)) => (token.trim().to_string(), user.trim().to_string()),
            None => (entry.to_string(), entry.to_string()),
        })
        .filter(|(token, user)| !token.is_empty() && !user.is_empty())
        .collect()
}

fn non_empty_var(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
