//! Prompt normalization: optimization and style presets

pub mod optimizer;
pub mod presets;

pub use optimizer::{
    build_structured_prompt, estimate_tokens, optimize, with_hex_colors, PromptOptimization,
    StructuredPrompt,
};
pub use presets::{apply_style_preset, find_preset, presets, PresetApplication, StylePreset};
