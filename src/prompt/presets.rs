//! Static style presets

use serde::Serialize;

use crate::backend::traits::GenerationSettings;
use crate::error::{AppError, Result};

/// A named style: prompt suffix plus a fixed generation-parameter tuple
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StylePreset {
    pub key: &'static str,
    pub name: &'static str,
    pub suffix: &'static str,
    pub guidance: f32,
    pub num_steps: u32,
    pub width: u32,
    pub height: u32,
    pub description: &'static str,
}

const STYLE_PRESETS: &[StylePreset] = &[
    StylePreset {
        key: "photorealistic",
        name: "Photorealistic",
        suffix: "photorealistic, 8k, highly detailed, professional photography, natural lighting",
        guidance: 3.5,
        num_steps: 6,
        width: 1024,
        height: 1024,
        description: "Ultra-realistic photos with natural lighting",
    },
    StylePreset {
        key: "anime",
        name: "Anime",
        suffix: "anime style, vibrant colors, cel shaded, Studio Ghibli inspired, clean lines",
        guidance: 4.0,
        num_steps: 4,
        width: 1024,
        height: 1024,
        description: "Japanese anime art style",
    },
    StylePreset {
        key: "cyberpunk",
        name: "Cyberpunk",
        suffix: "cyberpunk aesthetic, neon lights, dark atmosphere, futuristic, blade runner style",
        guidance: 3.8,
        num_steps: 5,
        width: 1024,
        height: 1024,
        description: "Neon-lit futuristic scenes",
    },
    StylePreset {
        key: "minimalist",
        name: "Minimalist",
        suffix: "minimalist design, clean lines, simple composition, white background, modern",
        guidance: 3.0,
        num_steps: 3,
        width: 1024,
        height: 1024,
        description: "Clean and simple designs",
    },
    StylePreset {
        key: "vintage",
        name: "Vintage",
        suffix: "vintage photography, film grain, warm tones, nostalgic, retro aesthetic",
        guidance: 3.5,
        num_steps: 4,
        width: 1024,
        height: 1024,
        description: "Retro and nostalgic feel",
    },
    StylePreset {
        key: "portrait",
        name: "Portrait",
        suffix: "professional portrait, studio lighting, shallow depth of field, bokeh, 85mm lens",
        guidance: 3.7,
        num_steps: 5,
        width: 768,
        height: 1024,
        description: "Professional portrait photography",
    },
    StylePreset {
        key: "landscape",
        name: "Landscape",
        suffix: "landscape photography, golden hour, wide angle, atmospheric, HDR, majestic",
        guidance: 3.5,
        num_steps: 5,
        width: 1024,
        height: 768,
        description: "Stunning landscape scenes",
    },
    StylePreset {
        key: "product",
        name: "Product",
        suffix: "product photography, white background, studio lighting, commercial, sharp details",
        guidance: 3.3,
        num_steps: 4,
        width: 1024,
        height: 1024,
        description: "E-commerce product shots",
    },
];

/// All presets in table order
pub fn presets() -> &'static [StylePreset] {
    STYLE_PRESETS
}

pub fn find_preset(key: &str) -> Option<&'static StylePreset> {
    STYLE_PRESETS.iter().find(|preset| preset.key == key)
}

/// Prompt and parameters produced by [`apply_style_preset`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresetApplication {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub num_steps: u32,
    pub guidance: f32,
}

impl PresetApplication {
    pub fn settings(&self, seed: Option<i64>) -> GenerationSettings {
        GenerationSettings {
            width: self.width,
            height: self.height,
            num_steps: self.num_steps,
            guidance: self.guidance,
            seed,
        }
    }
}

/// Append the preset suffix and take over its parameters.
///
/// Unknown keys fail with [`AppError::UnknownPreset`].
pub fn apply_style_preset(prompt: &str, key: &str) -> Result<PresetApplication> {
    let preset = find_preset(key).ok_or_else(|| AppError::UnknownPreset(key.to_string()))?;

    Ok(PresetApplication {
        prompt: format!("{}, {}", prompt, preset.suffix),
        width: preset.width,
        height: preset.height,
        num_steps: preset.num_steps,
        guidance: preset.guidance,
    })
}
