//! Prompt rendering for the advice generator.

use std::fmt::Write as _;

use super::{DeepDiveAnswers, PersonalityRequest};
use crate::services::generation::GenerationParams;

/// Fixed decoding parameters.  Not user-configurable.
pub const ADVICE_DECODING: GenerationParams = GenerationParams {
    temperature: 0.8,
    max_output_tokens: 4096,
};

/// A recruitment source the generator may recommend.
#[derive(Debug, Clone, Copy)]
pub struct RecommendationSource {
    pub name: &'static str,
    pub tags: &'static [&'static str],
}

pub const RECOMMENDATION_SOURCES: &[RecommendationSource] = &[
    RecommendationSource {
        name: "Nurse Career Navi",
        tags: &["large listings", "hospital wards", "career consultants"],
    },
    RecommendationSource {
        name: "Kango Job Plus",
        tags: &["clinics", "day shifts only", "work-life balance"],
    },
    RecommendationSource {
        name: "MediStaff Agent",
        tags: &["specialist roles", "certified nurse paths", "salary negotiation"],
    },
    RecommendationSource {
        name: "CareWork Direct",
        tags: &["home care", "elder care facilities", "flexible hours"],
    },
];

const UNANSWERED: &str = "(unanswered)";

/// Render the generator prompt.  Deterministic for a given input.
pub fn build_prompt(personality: &PersonalityRequest, deep_dive: Option<&DeepDiveAnswers>) -> String {
    let mbti = personality.mbti_type.as_str();
    let strengths = personality.strengths.join(", ");
    let mut buf = String::new();

    writeln!(
        &mut buf,
        "You are a career counselor who specialises in nurses. You combine extensive \
         clinical experience with psychology and give concrete, practical advice."
    )
    .ok();
    writeln!(&mut buf).ok();
    writeln!(&mut buf, "[Personality profile]").ok();
    writeln!(&mut buf, "- Type: {}", mbti).ok();
    writeln!(&mut buf, "- Type name: {}", personality.title).ok();
    writeln!(&mut buf, "- Characteristics: {}", personality.description).ok();
    writeln!(&mut buf, "- Strengths: {}", strengths).ok();
    writeln!(&mut buf, "- Preferred work style: {}", personality.work_style).ok();
    writeln!(&mut buf).ok();

    if let Some(answers) = deep_dive.filter(|d| !d.is_empty()) {
        render_deep_dive(&mut buf, answers);
    }

    writeln!(
        &mut buf,
        "Write advice tailored to a nurse of type {mbti} for each of the following fields."
    )
    .ok();
    writeln!(&mut buf).ok();
    writeln!(
        &mut buf,
        "1. careerAdvice: how to use the strengths ({strengths}) on the ward with concrete \
         scenes, suitable departments and workplaces, a five and ten year career vision, \
         and specialist or certified nurse options. At least 400 characters."
    )
    .ok();
    writeln!(
        &mut buf,
        "2. stressManagement: the stress this type is most prone to, concrete coping for \
         night shifts, multidisciplinary work and patient or family interactions, ways to \
         recharge on days off, and burnout prevention. At least 400 characters."
    )
    .ok();
    writeln!(
        &mut buf,
        "3. teamCompatibility: communicating with doctors and other professions, behaviour \
         during handovers, conferences and emergency reports, and working with colleagues \
         of different types. At least 400 characters."
    )
    .ok();
    writeln!(
        &mut buf,
        "4. personalizedSiteRecommendations: choose exactly two of the sources below that \
         best fit a {mbti} nurse, explain why, and give a matchScore from 0 to 100."
    )
    .ok();
    let names: Vec<&str> = RECOMMENDATION_SOURCES.iter().map(|s| s.name).collect();
    writeln!(&mut buf, "   Available sources: {}", names.join(", ")).ok();
    let described: Vec<String> = RECOMMENDATION_SOURCES
        .iter()
        .map(|s| format!("{}({})", s.name, s.tags.join(",")))
        .collect();
    writeln!(&mut buf, "   Source features: {}", described.join(" / ")).ok();
    writeln!(&mut buf).ok();

    writeln!(&mut buf, "[Tone]").ok();
    writeln!(
        &mut buf,
        "- Warm and empathetic while staying professional; specific to {mbti}, never generic."
    )
    .ok();
    writeln!(&mut buf).ok();
    writeln!(&mut buf, "[Formatting rules]").ok();
    writeln!(
        &mut buf,
        "- Do not use any markup in the text (no **bold**, *italics*, # headings or code fences)."
    )
    .ok();
    writeln!(
        &mut buf,
        "- If a deep-dive answer is marked {UNANSWERED}, do not guess it."
    )
    .ok();
    writeln!(
        &mut buf,
        "- Output only one JSON object, with no text before or after it, in exactly this shape:"
    )
    .ok();
    buf.push_str(
        r#"{
  "careerAdvice": "...",
  "stressManagement": "...",
  "teamCompatibility": "...",
  "personalizedSiteRecommendations": [
    { "siteName": "...", "reason": "...", "matchScore": 85 },
    { "siteName": "...", "reason": "...", "matchScore": 80 }
  ]
}
"#,
    );
    buf
}

fn render_deep_dive(buf: &mut String, answers: &DeepDiveAnswers) {
    fn line(buf: &mut String, label: &str, value: Option<&str>) {
        writeln!(buf, "- {}: {}", label, value.unwrap_or(UNANSWERED)).ok();
    }
    fn list(buf: &mut String, label: &str, items: &[String]) {
        let joined = items.join(", ");
        let value = if items.is_empty() { None } else { Some(joined.as_str()) };
        line(buf, label, value);
    }

    writeln!(buf, "[Career context supplied by the nurse]").ok();
    line(buf, "Years of experience", answers.experience_years.as_deref());
    line(buf, "Current area", answers.current_area.as_deref());
    line(buf, "Desired timing for a change", answers.desired_timing.as_deref());
    list(buf, "Constraints", &answers.constraints);
    list(buf, "Priorities", &answers.priorities);
    list(buf, "Stressors", &answers.stressors);
    line(buf, "In their own words", answers.free_text.as_deref());
    writeln!(buf).ok();
}
