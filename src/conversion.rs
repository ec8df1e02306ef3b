use std::path::{Path, PathBuf};

use log::warn;

use crate::config::ConfigStore;
use crate::error::Result;
use crate::input::{InputText, read_text_file};
use crate::output::{OutputOptions, output_path};
use crate::presets::{ParameterOverrides, ResolvedSpeech, VoiceChoices, resolve_speech};
use crate::provider::{ConversionRequest, DEFAULT_BITRATE, default_voice_for, validate_bitrate};

#[derive(Debug, Clone)]
pub struct ConversionOptions<'a> {
    pub input: &'a Path,
    pub provider: Option<&'a str>,
    pub voice: Option<&'a str>,
    pub preset: Option<&'a str>,
    pub overrides: ParameterOverrides,
    pub mp3_bitrate: u32,
}

impl<'a> ConversionOptions<'a> {
    pub fn new(input: &'a Path) -> Self {
        Self {
            input,
            provider: None,
            voice: None,
            preset: None,
            overrides: ParameterOverrides::default(),
            mp3_bitrate: DEFAULT_BITRATE,
        }
    }
}

/// A fully resolved conversion, ready to hand to a provider.
#[derive(Debug, Clone)]
pub struct ConversionPlan {
    pub input_path: PathBuf,
    pub input: InputText,
    pub speech: ResolvedSpeech,
    pub request: ConversionRequest,
}

impl ConversionPlan {
    pub fn destination(&self, store: &ConfigStore, options: &OutputOptions<'_>) -> Result<PathBuf> {
        output_path(
            &self.input_path,
            &store.output_directory()?,
            &self.request.provider,
            &self.request.voice,
            options,
        )
    }
}

/// Resolves provider, preset, voice and input text. Performs no network I/O,
/// so bad presets or parameters fail before anything is sent.
pub fn plan_conversion(store: &ConfigStore, options: &ConversionOptions<'_>) -> Result<ConversionPlan> {
    let provider = match options.provider {
        Some(provider) => provider.to_string(),
        None => store.default_provider().to_string(),
    };
    let voices = VoiceChoices {
        explicit: options.voice,
        configured_default: store.default_voice(&provider),
        provider_default: default_voice_for(&provider)?,
    };
    let speech = resolve_speech(options.preset, &voices, &options.overrides)?;
    if !speech.ignored_overrides.is_empty() {
        warn!(
            "preset '{}' sets all speech parameters; ignoring {}",
            speech.preset.unwrap_or_default(),
            speech.ignored_overrides.join(", ")
        );
    }
    let mp3_bitrate = validate_bitrate(options.mp3_bitrate)?;
    let input = read_text_file(options.input)?;

    let request = ConversionRequest {
        text: input.text.clone(),
        provider,
        voice: speech.voice.clone(),
        mp3_bitrate,
        params: speech.params,
    };
    Ok(ConversionPlan {
        input_path: options.input.to_path_buf(),
        input,
        speech,
        request,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VoiceForgeError;
    use crate::presets::PauseClass;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, ConfigStore, PathBuf) {
        let dir = TempDir::new().expect("temp dir");
        let store = ConfigStore::open(Some(dir.path().join("config").as_path())).expect("store");
        let input = dir.path().join("chapter.txt");
        fs::write(&input, "Once upon a time.\n\nThe end.").expect("write");
        (dir, store, input)
    }

    #[test]
    fn plan_uses_preset_and_configured_voice_order() {
        let (_dir, mut store, input) = fixture();
        store.set_default_voice("fish_audio", "configured");

        let mut options = ConversionOptions::new(&input);
        let plan = plan_conversion(&store, &options).expect("plan");
        assert_eq!(plan.request.voice, "configured");
        assert_eq!(plan.request.provider, "fish_audio");
        assert_eq!(plan.input.stats.paragraphs, 2);

        options.preset = Some("podcast");
        let plan = plan_conversion(&store, &options).expect("plan");
        assert_eq!(plan.request.voice, "b545c585f631496c914815291da4e893");
        assert_eq!(plan.request.params.paragraph_pause, PauseClass::Short);
    }

    #[test]
    fn unknown_preset_fails_before_reading_input() {
        let (dir, store, _input) = fixture();
        let missing = dir.path().join("missing.txt");
        let mut options = ConversionOptions::new(&missing);
        options.preset = Some("opera");
        assert!(matches!(
            plan_conversion(&store, &options),
            Err(VoiceForgeError::PresetNotFound { .. })
        ));
    }

    #[test]
    fn unknown_provider_and_bad_bitrate_are_rejected() {
        let (_dir, store, input) = fixture();
        let mut options = ConversionOptions::new(&input);
        options.provider = Some("nope");
        assert!(matches!(
            plan_conversion(&store, &options),
            Err(VoiceForgeError::Configuration { .. })
        ));

        let mut options = ConversionOptions::new(&input);
        options.mp3_bitrate = 100;
        assert!(matches!(
            plan_conversion(&store, &options),
            Err(VoiceForgeError::InvalidParameter(_))
        ));
    }

    #[test]
    fn destination_defaults_to_configured_directory() {
        let (dir, mut store, input) = fixture();
        let out = dir.path().join("audio");
        store.set_output_directory(&out);
        let plan = plan_conversion(&store, &ConversionOptions::new(&input)).expect("plan");
        let dest = plan
            .destination(&store, &OutputOptions::default())
            .expect("destination");
        assert_eq!(dest, out.join("chapter_fish_audio_speech-1.6.mp3"));
    }
}
