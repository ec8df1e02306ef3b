use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VoiceForgeError};

pub const MIN_SPEED: f32 = 0.5;
pub const MAX_SPEED: f32 = 2.0;
pub const DEFAULT_SPEED: f32 = 1.0;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_TOP_P: f32 = 0.7;

const DEFAULT_FEMALE_VOICE: &str = "b545c585f631496c914815291da4e893";
const ADAM_VOICE: &str = "728f6ff2240d49308e8137ffe66008e2";
const ENERGETIC_MALE_VOICE: &str = "802e3bc2b27e49c2995d23ef70e6ac89";

/// Silence inserted by the remote synthesizer between paragraphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PauseClass {
    Short,
    #[default]
    Medium,
    Long,
}

impl PauseClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechParams {
    pub speed: f32,
    pub temperature: f32,
    pub top_p: f32,
    pub paragraph_pause: PauseClass,
}

impl Default for SpeechParams {
    fn default() -> Self {
        Self {
            speed: DEFAULT_SPEED,
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            paragraph_pause: PauseClass::Medium,
        }
    }
}

impl SpeechParams {
    pub fn validate(&self) -> Result<()> {
        if !self.speed.is_finite() || !(MIN_SPEED..=MAX_SPEED).contains(&self.speed) {
            return Err(VoiceForgeError::InvalidParameter(format!(
                "speed must be between {MIN_SPEED} and {MAX_SPEED}, got {}",
                self.speed
            )));
        }
        for (name, value) in [("temperature", self.temperature), ("top_p", self.top_p)] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(VoiceForgeError::InvalidParameter(format!(
                    "{name} must be between 0 and 1, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct SpeechPreset {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub use_case: &'static str,
    pub voice: &'static str,
    pub params: SpeechParams,
}

const fn params(speed: f32, temperature: f32, top_p: f32, pause: PauseClass) -> SpeechParams {
    SpeechParams {
        speed,
        temperature,
        top_p,
        paragraph_pause: pause,
    }
}

pub static PRESETS: [SpeechPreset; 12] = [
    SpeechPreset {
        key: "female-narrator",
        name: "Female Narrator",
        description: "Professional female narrator for audiobooks and storytelling",
        use_case: "Audiobooks, storytelling, professional narration",
        voice: DEFAULT_FEMALE_VOICE,
        params: params(0.85, 0.6, 0.7, PauseClass::Long),
    },
    SpeechPreset {
        key: "male-narrator",
        name: "Male Narrator",
        description: "Professional male narrator for audiobooks and documentaries",
        use_case: "Audiobooks, documentaries, professional narration",
        voice: ADAM_VOICE,
        params: params(0.85, 0.6, 0.7, PauseClass::Long),
    },
    SpeechPreset {
        key: "audiobook",
        name: "Audiobook",
        description: "Optimized for long-form audiobook narration with clear pacing",
        use_case: "Long-form audiobooks, novels, literature",
        voice: DEFAULT_FEMALE_VOICE,
        params: params(0.8, 0.5, 0.6, PauseClass::Long),
    },
    SpeechPreset {
        key: "presentation",
        name: "Presentation",
        description: "Clear, professional speech for business presentations",
        use_case: "Business presentations, corporate content, training",
        voice: ENERGETIC_MALE_VOICE,
        params: params(0.9, 0.4, 0.6, PauseClass::Medium),
    },
    SpeechPreset {
        key: "educational",
        name: "Educational",
        description: "Clear, engaging speech for educational content and tutorials",
        use_case: "Educational content, tutorials, e-learning",
        voice: DEFAULT_FEMALE_VOICE,
        params: params(0.85, 0.6, 0.7, PauseClass::Medium),
    },
    SpeechPreset {
        key: "podcast",
        name: "Podcast",
        description: "Conversational, natural speech for podcast content",
        use_case: "Podcasts, conversational content, interviews",
        voice: DEFAULT_FEMALE_VOICE,
        params: params(0.9, 0.6, 0.8, PauseClass::Short),
    },
    SpeechPreset {
        key: "news",
        name: "News",
        description: "Professional, authoritative speech for news and announcements",
        use_case: "News broadcasts, announcements, formal content",
        voice: ENERGETIC_MALE_VOICE,
        params: params(0.95, 0.4, 0.6, PauseClass::Short),
    },
    SpeechPreset {
        key: "storytelling",
        name: "Storytelling",
        description: "Expressive, engaging speech for stories and creative content",
        use_case: "Stories, creative writing, children's content",
        voice: DEFAULT_FEMALE_VOICE,
        params: params(0.85, 0.7, 0.8, PauseClass::Medium),
    },
    SpeechPreset {
        key: "meditation",
        name: "Meditation",
        description: "Calm, soothing speech for meditation and relaxation content",
        use_case: "Meditation guides, relaxation, mindfulness content",
        voice: DEFAULT_FEMALE_VOICE,
        params: params(0.75, 0.5, 0.6, PauseClass::Long),
    },
    SpeechPreset {
        key: "technical",
        name: "Technical",
        description: "Clear, precise speech for technical documentation and manuals",
        use_case: "Technical documentation, manuals, specifications",
        voice: "speech-1.6",
        params: params(0.85, 0.4, 0.6, PauseClass::Medium),
    },
    SpeechPreset {
        key: "conversational",
        name: "Conversational",
        description: "Natural, casual speech for everyday content",
        use_case: "Casual content, blogs, personal messages",
        voice: DEFAULT_FEMALE_VOICE,
        params: params(0.9, 0.7, 0.7, PauseClass::Short),
    },
    SpeechPreset {
        key: "dramatic",
        name: "Dramatic",
        description: "Expressive, theatrical speech for dramatic content",
        use_case: "Dramatic readings, theater, emotional content",
        voice: DEFAULT_FEMALE_VOICE,
        params: params(0.8, 0.8, 0.8, PauseClass::Medium),
    },
];

pub fn preset_names() -> Vec<&'static str> {
    let mut names: Vec<_> = PRESETS.iter().map(|p| p.key).collect();
    names.sort_unstable();
    names
}

pub fn find_preset(name: &str) -> Result<&'static SpeechPreset> {
    PRESETS
        .iter()
        .find(|p| p.key == name)
        .ok_or_else(|| VoiceForgeError::PresetNotFound {
            name: name.to_string(),
            available: preset_names(),
        })
}

pub fn describe_preset(preset: &SpeechPreset) -> String {
    format!(
        "{}: {} (Use case: {})",
        preset.name, preset.description, preset.use_case
    )
}

/// Individually supplied speech parameters, e.g. from CLI flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterOverrides {
    pub speed: Option<f32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub paragraph_pause: Option<PauseClass>,
}

impl ParameterOverrides {
    fn supplied(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.speed.is_some() {
            names.push("speed");
        }
        if self.temperature.is_some() {
            names.push("temperature");
        }
        if self.top_p.is_some() {
            names.push("top_p");
        }
        if self.paragraph_pause.is_some() {
            names.push("paragraph_pause");
        }
        names
    }

    fn apply_to(&self, base: SpeechParams) -> SpeechParams {
        SpeechParams {
            speed: self.speed.unwrap_or(base.speed),
            temperature: self.temperature.unwrap_or(base.temperature),
            top_p: self.top_p.unwrap_or(base.top_p),
            paragraph_pause: self.paragraph_pause.unwrap_or(base.paragraph_pause),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VoiceChoices<'a> {
    pub explicit: Option<&'a str>,
    pub configured_default: Option<&'a str>,
    pub provider_default: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSpeech {
    pub voice: String,
    pub params: SpeechParams,
    pub preset: Option<&'static str>,
    /// Overrides that were supplied but shadowed by the preset.
    pub ignored_overrides: Vec<&'static str>,
}

/// Resolves voice and speech parameters.
///
/// Voice precedence: explicit id, preset voice, configured default, provider
/// default. When a preset is named its speed, temperature, top_p and pause
/// class win over individual overrides; the shadowed override names are
/// returned so the caller can tell the user.
pub fn resolve_speech(
    preset: Option<&str>,
    voices: &VoiceChoices<'_>,
    overrides: &ParameterOverrides,
) -> Result<ResolvedSpeech> {
    let preset = preset.map(find_preset).transpose()?;

    let voice = voices
        .explicit
        .or(preset.map(|p| p.voice))
        .or(voices.configured_default)
        .unwrap_or(voices.provider_default)
        .to_string();

    let resolved = match preset {
        Some(preset) => ResolvedSpeech {
            voice,
            params: preset.params,
            preset: Some(preset.key),
            ignored_overrides: overrides.supplied(),
        },
        None => ResolvedSpeech {
            voice,
            params: overrides.apply_to(SpeechParams::default()),
            preset: None,
            ignored_overrides: Vec::new(),
        },
    };
    resolved.params.validate()?;
    Ok(resolved)
}
