use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::error::{Result, VoiceForgeError};
use crate::fish::{self, FishAudioClient};
use crate::presets::SpeechParams;
use crate::progress::ProgressSink;

pub const DEFAULT_BITRATE: u32 = 128;
pub const SUPPORTED_BITRATES: &[u32] = &[64, 128, 192];

/// Everything a provider needs for one synthesis call. Built once per
/// invocation and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRequest {
    pub text: String,
    pub provider: String,
    pub voice: String,
    pub mp3_bitrate: u32,
    pub params: SpeechParams,
}

#[derive(Debug)]
pub struct ConversionResult {
    pub output_path: PathBuf,
    /// Bytes on disk; for failures, what was written before the error.
    pub file_size: u64,
    pub error: Option<VoiceForgeError>,
}

impl ConversionResult {
    pub fn succeeded(output_path: &Path, file_size: u64) -> Self {
        Self {
            output_path: output_path.to_path_buf(),
            file_size,
            error: None,
        }
    }

    pub fn failed(output_path: &Path, file_size: u64, error: VoiceForgeError) -> Self {
        Self {
            output_path: output_path.to_path_buf(),
            file_size,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceKind {
    Ai,
    Human,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoiceInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub languages: Vec<String>,
    pub kind: VoiceKind,
    pub author: Option<String>,
    pub like_count: u64,
    pub task_count: u64,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoiceCatalog {
    pub provider: String,
    pub voices: Vec<VoiceInfo>,
    pub default_voice: String,
    /// Remote total, which may exceed `voices.len()`.
    pub total_available: u64,
}

/// A remote text-to-speech vendor.
pub trait TtsProvider {
    fn display_name(&self) -> &str;
    fn character_limit(&self) -> Option<usize>;
    fn estimate_cost(&self, text: &str) -> String;
    fn list_voices(&self, limit: usize) -> Result<VoiceCatalog>;
    fn validate_api_key(&self) -> bool;
    /// Streams synthesized audio into `dest`. Never retries; a failed result
    /// leaves any partial file in place.
    fn synthesize(
        &self,
        request: &ConversionRequest,
        dest: &Path,
        sink: &mut dyn ProgressSink,
    ) -> ConversionResult;
}

pub const AVAILABLE_PROVIDERS: &[&str] = &[fish::PROVIDER_ID];

pub fn is_provider_available(id: &str) -> bool {
    AVAILABLE_PROVIDERS.contains(&id)
}

pub fn ensure_provider_available(id: &str) -> Result<()> {
    if is_provider_available(id) {
        return Ok(());
    }
    Err(VoiceForgeError::config(
        "provider",
        format!(
            "provider '{id}' not available. Available: {}",
            AVAILABLE_PROVIDERS.join(", ")
        ),
    ))
}

pub fn default_voice_for(id: &str) -> Result<&'static str> {
    ensure_provider_available(id)?;
    Ok(fish::DEFAULT_VOICE)
}

pub fn create_provider(
    id: &str,
    api_key: Option<String>,
    settings: &Settings,
) -> Result<Box<dyn TtsProvider>> {
    ensure_provider_available(id)?;
    let client = FishAudioClient::new(api_key, &settings.network, settings.progress)?;
    Ok(Box::new(client))
}

pub fn validate_bitrate(bitrate: u32) -> Result<u32> {
    if SUPPORTED_BITRATES.contains(&bitrate) {
        return Ok(bitrate);
    }
    Err(VoiceForgeError::InvalidParameter(format!(
        "unsupported MP3 bitrate {bitrate}; expected one of {SUPPORTED_BITRATES:?}"
    )))
}

pub fn format_thousands(value: usize) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thousands_separator() {
        assert_eq!(format_thousands(0), "0");
        assert_eq!(format_thousands(999), "999");
        assert_eq!(format_thousands(1_000), "1,000");
        assert_eq!(format_thousands(12_345_678), "12,345,678");
    }

    #[test]
    fn unknown_provider_is_a_configuration_error() {
        assert!(ensure_provider_available("fish_audio").is_ok());
        let err = create_provider("elevenlabs", None, &Settings::default())
            .err()
            .expect("unknown provider");
        assert!(matches!(err, VoiceForgeError::Configuration { .. }));
    }

    #[test]
    fn bitrate_validation() {
        assert_eq!(validate_bitrate(192).expect("valid"), 192);
        assert!(validate_bitrate(100).is_err());
    }

    #[test]
    fn result_reports_success() {
        let ok = ConversionResult::succeeded(Path::new("a.mp3"), 10);
        assert!(ok.is_success());
        let failed = ConversionResult::failed(
            Path::new("a.mp3"),
            3,
            VoiceForgeError::MalformedResponse("empty".to_string()),
        );
        assert!(!failed.is_success());
        assert_eq!(failed.file_size, 3);
    }
}
