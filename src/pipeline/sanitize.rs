//! Output sanitisation and the fallback payload.
//!
//! The client renders plain text, so literal `**` emphasis markers are
//! removed from everything a user will read.

use serde_json::{Map, Value};

use super::{AIAdvice, SiteRecommendation};

const FALLBACK_CAREER: &str = "Look for a workplace where your strengths are valued. \
     Trust yourself and take your time finding an environment that suits you.";
const FALLBACK_STRESS: &str = "Don't carry everything alone. Make time to talk with \
     a colleague or senior nurse you trust.";
const FALLBACK_TEAM: &str = "Your sincerity reaches the people around you. Saying \
     thank you often will make working together even smoother.";

/// Generic advice returned whenever generation fails after quota was spent.
pub fn fallback_advice() -> AIAdvice {
    AIAdvice {
        career_advice: FALLBACK_CAREER.to_string(),
        stress_management: FALLBACK_STRESS.to_string(),
        team_compatibility: FALLBACK_TEAM.to_string(),
        personalized_site_recommendations: None,
    }
}

pub fn strip_double_asterisks(text: &str) -> String {
    text.replace("**", "")
}

/// Turn an untyped parsed object into [`AIAdvice`].  Returns `None` when any
/// of the three advice texts is missing or blank after cleaning.
pub fn sanitize_advice(value: &Value) -> Option<AIAdvice> {
    let obj = value.as_object()?;
    let career_advice = text_field(obj, "careerAdvice");
    let stress_management = text_field(obj, "stressManagement");
    let team_compatibility = text_field(obj, "teamCompatibility");
    if [&career_advice, &stress_management, &team_compatibility]
        .iter()
        .any(|s| s.trim().is_empty())
    {
        return None;
    }

    let personalized_site_recommendations = obj
        .get("personalizedSiteRecommendations")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(sanitize_recommendation)
                .collect::<Vec<_>>()
        })
        .filter(|recs| !recs.is_empty());

    Some(AIAdvice {
        career_advice,
        stress_management,
        team_compatibility,
        personalized_site_recommendations,
    })
}

fn text_field(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .map(strip_double_asterisks)
        .unwrap_or_default()
}

fn sanitize_recommendation(value: &Value) -> Option<SiteRecommendation> {
    let obj = value.as_object()?;
    let site_name = Some(text_field(obj, "siteName")).filter(|s| !s.trim().is_empty())?;
    let reason = Some(text_field(obj, "reason")).filter(|s| !s.trim().is_empty())?;
    let match_score = match_score(obj.get("matchScore")?)?;
    Some(SiteRecommendation {
        site_name,
        reason,
        match_score,
    })
}

/// Accept a finite number or numeric string, round it and clamp to 0..=100.
fn match_score(value: &Value) -> Option<u8> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok()?
        }
        _ => return None,
    };
    if !raw.is_finite() {
        return None;
    }
    Some(raw.round().clamp(0.0, 100.0) as u8)
}
