//! The advice pipeline.
//!
//! Stages run strictly forward: normalise the request, render the prompt,
//! call the generator, extract the JSON object and sanitise it.  Any failure
//! from generation onwards is reported as a [`FallbackCause`] so the caller
//! can substitute [`fallback_advice`] and still answer 200.

use std::fmt;

use serde::Serialize;

use crate::services::generation::{GenerationError, TextGenerator};

pub mod extract;
pub mod normalize;
pub mod prompt;
pub mod sanitize;

pub use self::extract::extract_first_json_object;
pub use self::normalize::{normalize_advice_request, InputError};
pub use self::prompt::{build_prompt, ADVICE_DECODING};
pub use self::sanitize::{fallback_advice, sanitize_advice};

/// One of the 16 personality type codes, always uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MbtiType(pub(crate) String);

impl MbtiType {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MbtiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonalityRequest {
    pub mbti_type: MbtiType,
    pub title: String,
    pub description: String,
    /// Never empty.
    pub strengths: Vec<String>,
    pub work_style: String,
}

/// Optional career context.  Absent answers stay `None`/empty and are shown
/// to the generator as unanswered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeepDiveAnswers {
    pub experience_years: Option<String>,
    pub current_area: Option<String>,
    pub desired_timing: Option<String>,
    pub constraints: Vec<String>,
    pub priorities: Vec<String>,
    pub stressors: Vec<String>,
    pub free_text: Option<String>,
}

impl DeepDiveAnswers {
    pub fn is_empty(&self) -> bool {
        self.experience_years.is_none()
            && self.current_area.is_none()
            && self.desired_timing.is_none()
            && self.constraints.is_empty()
            && self.priorities.is_empty()
            && self.stressors.is_empty()
            && self.free_text.is_none()
    }
}

/// A fully normalised `/advice` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdviceRequest {
    pub personality: PersonalityRequest,
    pub deep_dive: Option<DeepDiveAnswers>,
}

impl AdviceRequest {
    pub fn has_deep_dive(&self) -> bool {
        self.deep_dive.as_ref().is_some_and(|d| !d.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteRecommendation {
    pub site_name: String,
    pub reason: String,
    /// Always within 0..=100.
    pub match_score: u8,
}

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AIAdvice {
    pub career_advice: String,
    pub stress_management: String,
    pub team_compatibility: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personalized_site_recommendations: Option<Vec<SiteRecommendation>>,
}

/// Why a generation attempt was replaced by the fallback payload.  Internal
/// only; logged, never returned to the client.
#[derive(Debug, thiserror::Error)]
pub enum FallbackCause {
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),
    #[error("no JSON object in generator output")]
    NoJsonObject,
    #[error("generated advice is incomplete")]
    IncompleteAdvice,
}

impl FallbackCause {
    /// Pipeline stage the attempt stopped in.
    pub fn stage(&self) -> &'static str {
        match self {
            FallbackCause::Generation(_) => "generating",
            FallbackCause::NoJsonObject => "extracting",
            FallbackCause::IncompleteAdvice => "sanitizing",
        }
    }

    /// Short label used in metrics and the outcome log.
    pub fn label(&self) -> &'static str {
        match self {
            FallbackCause::Generation(_) => "generation_error",
            FallbackCause::NoJsonObject => "no_json",
            FallbackCause::IncompleteAdvice => "incomplete",
        }
    }
}

/// Run the generation half of the pipeline for an already admitted request.
pub async fn generate_advice(
    generator: &dyn TextGenerator,
    request: &AdviceRequest,
) -> Result<AIAdvice, FallbackCause> {
    let prompt = build_prompt(&request.personality, request.deep_dive.as_ref());
    tracing::debug!(
        mbti = %request.personality.mbti_type,
        prompt_chars = prompt.chars().count(),
        has_deep_dive = request.has_deep_dive(),
        "requesting advice generation"
    );
    let raw = generator.generate(&prompt, ADVICE_DECODING).await?;
    let candidate = extract_first_json_object(&raw).ok_or(FallbackCause::NoJsonObject)?;
    let value: serde_json::Value =
        serde_json::from_str(candidate).map_err(|_| FallbackCause::NoJsonObject)?;
    sanitize_advice(&value).ok_or(FallbackCause::IncompleteAdvice)
}
