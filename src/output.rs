use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use crate::error::{Result, VoiceForgeError};

const AUDIO_EXTENSION: &str = ".mp3";
const FALLBACK_FILE_NAME: &str = "output.mp3";
const MAX_FILE_NAME_LEN: usize = 255;
const MAX_VOICE_COMPONENT_LEN: usize = 50;
const MAX_CONFLICT_SUFFIX: u32 = 1000;
const INVALID_FILE_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

fn clean_component(value: &str) -> String {
    value
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .take(MAX_VOICE_COMPONENT_LEN)
        .collect()
}

pub fn sanitize_file_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if INVALID_FILE_NAME_CHARS.contains(&c) { '_' } else { c })
        .collect();
    let trimmed = replaced.trim_matches(|c| c == '.' || c == ' ');
    if trimmed.is_empty() {
        return FALLBACK_FILE_NAME.to_string();
    }

    if trimmed.chars().count() > MAX_FILE_NAME_LEN {
        let stem = trimmed.strip_suffix(AUDIO_EXTENSION).unwrap_or(trimmed);
        let keep = MAX_FILE_NAME_LEN - AUDIO_EXTENSION.len();
        let stem: String = stem.chars().take(keep).collect();
        return format!("{stem}{AUDIO_EXTENSION}");
    }
    trimmed.to_string()
}

/// `{input stem}_{provider}_{voice}.mp3`, sanitized for any filesystem.
pub fn default_file_name(input: &Path, provider: &str, voice: &str) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut components = vec![stem];
    if !provider.is_empty() {
        components.push(provider.to_string());
    }
    let voice = clean_component(voice);
    if !voice.is_empty() {
        components.push(voice);
    }
    sanitize_file_name(&format!("{}{AUDIO_EXTENSION}", components.join("_")))
}

pub fn custom_file_name(name: &str) -> String {
    if name.ends_with(AUDIO_EXTENSION) {
        sanitize_file_name(name)
    } else {
        sanitize_file_name(&format!("{name}{AUDIO_EXTENSION}"))
    }
}

pub fn ensure_directory(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| VoiceForgeError::file(dir, "create", e))?;
    let metadata = fs::metadata(dir).map_err(|e| VoiceForgeError::file(dir, "create", e))?;
    if metadata.permissions().readonly() {
        return Err(VoiceForgeError::file(dir, "create", "directory is not writable"));
    }
    Ok(())
}

/// Picks a free path next to `desired` unless overwriting is allowed:
/// `name.mp3`, `name_1.mp3`, `name_2.mp3`, ...
pub fn resolve_conflict(desired: &Path, overwrite: bool) -> Result<PathBuf> {
    if overwrite || !desired.exists() {
        return Ok(desired.to_path_buf());
    }

    let parent = desired.parent().unwrap_or_else(|| Path::new(""));
    let stem = desired
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = desired
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    for counter in 1..=MAX_CONFLICT_SUFFIX {
        let candidate = parent.join(format!("{stem}_{counter}{extension}"));
        if !candidate.exists() {
            info!("{} exists, using {}", desired.display(), candidate.display());
            return Ok(candidate);
        }
    }
    Err(VoiceForgeError::file(
        desired,
        "write",
        "too many existing files with similar names",
    ))
}

#[derive(Debug, Clone, Default)]
pub struct OutputOptions<'a> {
    pub directory: Option<&'a Path>,
    pub file_name: Option<&'a str>,
    pub overwrite: bool,
}

/// Final destination for a conversion of `input`; the directory is created.
pub fn output_path(
    input: &Path,
    default_dir: &Path,
    provider: &str,
    voice: &str,
    options: &OutputOptions<'_>,
) -> Result<PathBuf> {
    let dir = options.directory.unwrap_or(default_dir);
    ensure_directory(dir)?;
    let name = match options.file_name {
        Some(name) => custom_file_name(name),
        None => default_file_name(input, provider, voice),
    };
    resolve_conflict(&dir.join(name), options.overwrite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_name_combines_stem_provider_and_voice() {
        let name = default_file_name(Path::new("/books/Chapter 1.txt"), "fish_audio", "speech-1.6");
        assert_eq!(name, "Chapter 1_fish_audio_speech-1.6.mp3");
        let name = default_file_name(Path::new("a.txt"), "fish_audio", "My Voice/v2!");
        assert_eq!(name, "a_fish_audio_My_Voicev2.mp3");
    }

    #[test]
    fn voice_component_is_truncated() {
        let voice = "x".repeat(80);
        let name = default_file_name(Path::new("a.txt"), "p", &voice);
        assert_eq!(name, format!("a_p_{}.mp3", "x".repeat(50)));
    }

    #[test]
    fn sanitizing_handles_reserved_chars_and_empty_names() {
        assert_eq!(sanitize_file_name("a<b>c?.mp3"), "a_b_c_.mp3");
        assert_eq!(sanitize_file_name(" .. "), "output.mp3");
        let long = format!("{}.mp3", "n".repeat(300));
        let cleaned = sanitize_file_name(&long);
        assert_eq!(cleaned.len(), 255);
        assert!(cleaned.ends_with(".mp3"));
        assert_eq!(custom_file_name("final"), "final.mp3");
        assert_eq!(custom_file_name("final.mp3"), "final.mp3");
    }

    #[test]
    fn existing_files_get_numbered_suffixes() {
        let dir = TempDir::new().expect("temp dir");
        let desired = dir.path().join("story.mp3");
        assert_eq!(resolve_conflict(&desired, false).expect("free"), desired);

        fs::write(&desired, b"x").expect("write");
        fs::write(dir.path().join("story_1.mp3"), b"x").expect("write");
        assert_eq!(
            resolve_conflict(&desired, false).expect("free"),
            dir.path().join("story_2.mp3")
        );
        assert_eq!(resolve_conflict(&desired, true).expect("overwrite"), desired);
    }

    #[test]
    fn output_path_creates_missing_directory() {
        let dir = TempDir::new().expect("temp dir");
        let target = dir.path().join("nested").join("out");
        let options = OutputOptions {
            directory: Some(&target),
            ..Default::default()
        };
        let path = output_path(Path::new("in.txt"), dir.path(), "fish_audio", "v", &options)
            .expect("path");
        assert!(target.is_dir());
        assert_eq!(path, target.join("in_fish_audio_v.mp3"));
    }
}
