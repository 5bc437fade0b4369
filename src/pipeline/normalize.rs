//! Input normalisation.
//!
//! Every function here is total: malformed input yields `None` (or an empty
//! list) rather than an error, and over-long text is truncated silently.  The
//! caller decides which `None`s are fatal.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::{AdviceRequest, DeepDiveAnswers, MbtiType, PersonalityRequest};

pub const MAX_TITLE_CHARS: usize = 80;
pub const MAX_DESCRIPTION_CHARS: usize = 600;
pub const MAX_STRENGTHS: usize = 8;
pub const MAX_STRENGTH_CHARS: usize = 80;
pub const MAX_WORK_STYLE_CHARS: usize = 400;

pub const MAX_SHORT_ANSWER_CHARS: usize = 40;
pub const MAX_AREA_CHARS: usize = 80;
pub const MAX_LIST_ITEMS: usize = 6;
pub const MAX_LIST_ITEM_CHARS: usize = 80;
pub const MAX_FREE_TEXT_CHARS: usize = 800;

static MBTI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[EI][SN][TF][JP]$").unwrap());

/// Reasons a payload cannot be turned into an [`AdviceRequest`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InputError {
    #[error("mbtiType must be one of the 16 four-letter type codes")]
    InvalidMbtiType,
    #[error("personalityData requires title, description, workStyle and at least one strength")]
    InvalidPersonalityData,
}

/// Trim a string value and cap it at `max_len` characters.  Non-strings and
/// blank strings yield `None`.
pub fn normalize_string(value: &Value, max_len: usize) -> Option<String> {
    let trimmed = value.as_str()?.trim();
    let truncated = truncate_chars(trimmed, max_len);
    if truncated.is_empty() {
        None
    } else {
        Some(truncated.to_string())
    }
}

/// Normalise every element of an array value, dropping invalid entries and
/// duplicates (first occurrence wins) and keeping at most `max_items`.
pub fn normalize_string_array(value: &Value, max_items: usize, max_item_len: usize) -> Vec<String> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        if out.len() >= max_items {
            break;
        }
        if let Some(s) = normalize_string(item, max_item_len) {
            if seen.insert(s.clone()) {
                out.push(s);
            }
        }
    }
    out
}

/// Uppercase and validate a personality type code.
pub fn normalize_mbti_type(value: &Value) -> Option<MbtiType> {
    let upper = value.as_str()?.to_ascii_uppercase();
    if MBTI_RE.is_match(&upper) {
        Some(MbtiType(upper))
    } else {
        None
    }
}

pub fn normalize_personality_request(
    mbti_type: MbtiType,
    value: &Value,
) -> Option<PersonalityRequest> {
    let obj = value.as_object()?;
    let title = normalize_field(obj, "title", MAX_TITLE_CHARS)?;
    let description = normalize_field(obj, "description", MAX_DESCRIPTION_CHARS)?;
    let work_style = normalize_field(obj, "workStyle", MAX_WORK_STYLE_CHARS)?;
    let strengths = list_field(obj, "strengths", MAX_STRENGTHS, MAX_STRENGTH_CHARS);
    if strengths.is_empty() {
        return None;
    }
    Some(PersonalityRequest {
        mbti_type,
        title,
        description,
        strengths,
        work_style,
    })
}

/// Build the optional deep-dive record.  Returns `None` when nothing usable
/// was supplied so callers never confuse "not answered" with "answered blank".
pub fn normalize_deep_dive(value: &Value) -> Option<DeepDiveAnswers> {
    let obj = value.as_object()?;
    let answers = DeepDiveAnswers {
        experience_years: normalize_field(obj, "experienceYears", MAX_SHORT_ANSWER_CHARS),
        current_area: normalize_field(obj, "currentArea", MAX_AREA_CHARS),
        desired_timing: normalize_field(obj, "desiredTiming", MAX_SHORT_ANSWER_CHARS),
        constraints: list_field(obj, "constraints", MAX_LIST_ITEMS, MAX_LIST_ITEM_CHARS),
        priorities: list_field(obj, "priorities", MAX_LIST_ITEMS, MAX_LIST_ITEM_CHARS),
        stressors: list_field(obj, "stressors", MAX_LIST_ITEMS, MAX_LIST_ITEM_CHARS),
        free_text: normalize_field(obj, "freeText", MAX_FREE_TEXT_CHARS),
    };
    if answers.is_empty() {
        None
    } else {
        Some(answers)
    }
}

/// Normalise the whole `/advice` body.
pub fn normalize_advice_request(body: &Map<String, Value>) -> Result<AdviceRequest, InputError> {
    let mbti_type = body
        .get("mbtiType")
        .and_then(normalize_mbti_type)
        .ok_or(InputError::InvalidMbtiType)?;
    let personality = body
        .get("personalityData")
        .and_then(|v| normalize_personality_request(mbti_type, v))
        .ok_or(InputError::InvalidPersonalityData)?;
    let deep_dive = body.get("deepDive").and_then(normalize_deep_dive);
    Ok(AdviceRequest {
        personality,
        deep_dive,
    })
}

fn normalize_field(obj: &Map<String, Value>, key: &str, max_len: usize) -> Option<String> {
    obj.get(key).and_then(|v| normalize_string(v, max_len))
}

fn list_field(obj: &Map<String, Value>, key: &str, max_items: usize, max_len: usize) -> Vec<String> {
    obj.get(key)
        .map(|v| normalize_string_array(v, max_items, max_len))
        .unwrap_or_default()
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
