//! Deterministic prompt optimization
//!
//! Style keywords are matched in the order of [`STYLE_ENHANCEMENTS`]; only
//! the first keyword found (case-insensitive substring) contributes its
//! enhancement phrase. Running [`optimize`] on its own output is not
//! idempotent: an appended phrase can contain a keyword and match again.

use serde::{Deserialize, Serialize};

/// Appended unless the prompt already mentions "quality"
pub const QUALITY_TAGS: &str = "high quality, detailed, 8k resolution";

/// Token budget for an optimized prompt
pub const MAX_TOKENS: usize = 300;

/// Ordered (keyword, enhancement phrase) pairs. Earlier entries win.
pub const STYLE_ENHANCEMENTS: &[(&str, &str)] = &[
    (
        "portrait",
        "professional studio lighting, shallow depth of field, bokeh",
    ),
    (
        "landscape",
        "golden hour, wide angle, atmospheric perspective, HDR",
    ),
    (
        "product",
        "clean background, studio lighting, commercial photography, sharp focus",
    ),
    (
        "cyberpunk",
        "neon lights, rain-soaked streets, futuristic architecture, blade runner aesthetic",
    ),
    (
        "anime",
        "anime style, vibrant colors, cel shaded, clean lines",
    ),
    (
        "realistic",
        "photorealistic, natural lighting, real world physics",
    ),
    (
        "artistic",
        "oil painting, artistic interpretation, expressive brushstrokes",
    ),
    (
        "minimalist",
        "minimalist design, clean composition, negative space",
    ),
];

const EXPLANATION: &str = "Enhanced with style-specific terms and quality tags";

/// Result of [`optimize`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptOptimization {
    pub optimized: String,
    pub explanation: String,
    /// Token estimate of `optimized`
    pub tokens: usize,
}

/// Enhance a raw prompt with a style phrase and quality tags, then cap its
/// length to [`MAX_TOKENS`].
pub fn optimize(raw: &str) -> PromptOptimization {
    let mut optimized = raw.trim().to_string();

    if let Some(enhancement) = detect_style(&optimized) {
        optimized = format!("{optimized}, {enhancement}");
    }

    if !optimized.to_lowercase().contains("quality") {
        optimized = format!("{optimized}, {QUALITY_TAGS}");
    }

    if estimate_tokens(&optimized) > MAX_TOKENS {
        optimized = truncate_to_tokens(&optimized, MAX_TOKENS);
    }

    let tokens = estimate_tokens(&optimized);
    PromptOptimization {
        optimized,
        explanation: EXPLANATION.to_string(),
        tokens,
    }
}

/// Enhancement phrase for the first style keyword contained in `prompt`
pub fn detect_style(prompt: &str) -> Option<&'static str> {
    let lowered = prompt.to_lowercase();
    STYLE_ENHANCEMENTS
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, enhancement)| *enhancement)
}

/// `ceil(words * 1.3)`, computed in integers
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    (words * 13).div_ceil(10)
}

/// Keep the first `floor(max_tokens / 1.3)` words
fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    let target_words = max_tokens * 10 / 13;
    text.split_whitespace()
        .take(target_words)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Prompt assembled from labelled parts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredPrompt {
    pub subject: String,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub lighting: Option<String>,
    #[serde(default)]
    pub camera: Option<String>,
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default)]
    pub atmosphere: Option<String>,
}

/// Join the present parts as `subject, style: .., lighting: .., ...`
pub fn build_structured_prompt(structured: &StructuredPrompt) -> String {
    let labelled = |label: &str, value: &Option<String>| {
        value
            .as_deref()
            .filter(|v| !v.is_empty())
            .map(|v| format!("{label}: {v}"))
    };

    let colors = (!structured.colors.is_empty())
        .then(|| format!("colors: {}", structured.colors.join(", ")));

    let parts: Vec<String> = [
        (!structured.subject.is_empty()).then(|| structured.subject.clone()),
        labelled("style", &structured.style),
        labelled("lighting", &structured.lighting),
        labelled("camera", &structured.camera),
        colors,
        labelled("atmosphere", &structured.atmosphere),
    ]
    .into_iter()
    .flatten()
    .collect();

    parts.join(", ")
}

/// Append a hex color palette, e.g. `prompt, color palette: #ff0000 #00ff00`
pub fn with_hex_colors(prompt: &str, hex_colors: &[&str]) -> String {
    format!("{prompt}, color palette: {}", hex_colors.join(" "))
}
