use std::fs;
use std::path::Path;

use chardetng::EncodingDetector;
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, VoiceForgeError};

pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt"];
pub const MAX_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;

static PARAGRAPH_SPLIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\r?\n[ \t]*\r?\n").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextStats {
    pub characters: usize,
    pub characters_no_spaces: usize,
    pub words: usize,
    pub lines: usize,
    pub paragraphs: usize,
}

impl TextStats {
    pub fn of(text: &str) -> Self {
        Self {
            characters: text.chars().count(),
            characters_no_spaces: text.chars().filter(|&c| c != ' ').count(),
            words: text.split_whitespace().count(),
            lines: text.lines().count(),
            paragraphs: PARAGRAPH_SPLIT_RE
                .split(text)
                .filter(|p| !p.trim().is_empty())
                .count(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InputText {
    pub text: String,
    pub encoding: &'static str,
    pub stats: TextStats,
}

fn validate_path(path: &Path) -> Result<u64> {
    let metadata = fs::metadata(path).map_err(|e| VoiceForgeError::file(path, "read", e))?;
    if !metadata.is_file() {
        return Err(VoiceForgeError::file(path, "read", "path is not a file"));
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    if !extension.is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str())) {
        return Err(VoiceForgeError::file(
            path,
            "read",
            format!(
                "unsupported file type. Supported: {}",
                SUPPORTED_EXTENSIONS
                    .iter()
                    .map(|ext| format!(".{ext}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        ));
    }

    if metadata.len() > MAX_FILE_SIZE_BYTES {
        return Err(VoiceForgeError::file(
            path,
            "read",
            format!(
                "file too large ({:.1}MB). Maximum size: {}MB",
                metadata.len() as f64 / (1024.0 * 1024.0),
                MAX_FILE_SIZE_BYTES / (1024 * 1024)
            ),
        ));
    }
    Ok(metadata.len())
}

/// Decodes raw bytes, preferring UTF-8 and falling back to detection.
pub fn decode_text(raw: &[u8]) -> (String, &'static str) {
    let raw = raw.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(raw);
    if let Ok(text) = std::str::from_utf8(raw) {
        return (text.to_string(), "UTF-8");
    }

    let mut detector = EncodingDetector::new();
    detector.feed(raw, true);
    let encoding = detector.guess(None, true);
    debug!("UTF-8 decoding failed, detected {}", encoding.name());
    let (text, _, _) = encoding.decode(raw);
    (text.into_owned(), encoding.name())
}

pub fn read_text_file(path: &Path) -> Result<InputText> {
    validate_path(path)?;
    let raw = fs::read(path).map_err(|e| VoiceForgeError::file(path, "read", e))?;
    let (text, encoding) = decode_text(&raw);

    if text.trim().is_empty() {
        return Err(VoiceForgeError::file(
            path,
            "read",
            "file is empty or contains only whitespace",
        ));
    }

    let stats = TextStats::of(&text);
    info!(
        "read {} ({} characters, {encoding})",
        path.display(),
        stats.characters
    );
    Ok(InputText {
        text,
        encoding,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn stats_count_words_lines_and_paragraphs() {
        let stats = TextStats::of("Hello world.\nSecond line here.\n\nNew paragraph.\n");
        assert_eq!(stats.words, 7);
        assert_eq!(stats.lines, 4);
        assert_eq!(stats.paragraphs, 2);
        assert_eq!(stats.characters, 47);
        assert_eq!(stats.characters_no_spaces, 43);
    }

    #[test]
    fn reads_utf8_text_and_strips_bom() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("story.txt");
        fs::write(&path, "\u{feff}Grüße aus Köln").expect("write");
        let input = read_text_file(&path).expect("readable");
        assert_eq!(input.text, "Grüße aus Köln");
        assert_eq!(input.encoding, "UTF-8");
        assert_eq!(input.stats.characters, 14);
    }

    #[test]
    fn falls_back_to_detected_legacy_encoding() {
        let raw = b"Le caf\xE9 de la r\xE9publique est ferm\xE9 le lundi. \
            Nous avons d\xE9j\xE0 r\xE9serv\xE9 une table pour la soir\xE9e.";
        let (text, encoding) = decode_text(raw);
        assert_ne!(encoding, "UTF-8");
        assert!(text.contains("café"));
        assert!(!text.contains('\u{fffd}'));
    }

    #[test]
    fn rejects_wrong_extension_and_blank_files() {
        let dir = TempDir::new().expect("temp dir");
        let md = dir.path().join("notes.md");
        fs::write(&md, "text").expect("write");
        assert!(matches!(
            read_text_file(&md),
            Err(VoiceForgeError::File { .. })
        ));

        let blank = dir.path().join("blank.TXT");
        fs::write(&blank, "  \n\t ").expect("write");
        let err = read_text_file(&blank).expect_err("blank file");
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn rejects_missing_file() {
        let err = read_text_file(Path::new("/definitely/not/here.txt")).expect_err("missing");
        assert!(matches!(err, VoiceForgeError::File { operation: "read", .. }));
    }
}
