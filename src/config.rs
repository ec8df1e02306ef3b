use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use directories::{BaseDirs, ProjectDirs};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, VoiceForgeError};
use crate::progress::ProgressTuning;

pub const DEFAULT_PROVIDER: &str = "fish_audio";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const KEY_FILE_NAME: &str = ".key";
const DEFAULT_OUTPUT_DIR: &str = "./voiceforge_output";
const SECRET_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_encrypted: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_voice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub default_directory: PathBuf,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            default_directory: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Longest wait between two body chunks before a download is abandoned.
    pub stall_timeout_secs: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 300,
            stall_timeout_secs: 30,
        }
    }
}

impl NetworkSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub default_provider: String,
    pub providers: BTreeMap<String, ProviderEntry>,
    pub output: OutputSettings,
    pub network: NetworkSettings,
    pub progress: ProgressTuning,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_provider: DEFAULT_PROVIDER.to_string(),
            providers: BTreeMap::new(),
            output: OutputSettings::default(),
            network: NetworkSettings::default(),
            progress: ProgressTuning::default(),
        }
    }
}

/// Persistent settings plus the encrypted API keys, rooted in one directory.
pub struct ConfigStore {
    dir: PathBuf,
    settings: Settings,
    cipher: Aes256Gcm,
}

impl ConfigStore {
    pub fn default_dir() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("io", "VoiceForge", "voiceforge").ok_or_else(|| {
            VoiceForgeError::config("config_dir", "could not determine platform config directory")
        })?;
        Ok(dirs.config_dir().to_path_buf())
    }

    /// Opens the store in `dir`, or in the platform default directory.
    pub fn open(dir: Option<&Path>) -> Result<Self> {
        let dir = match dir {
            Some(dir) => dir.to_path_buf(),
            None => Self::default_dir()?,
        };
        fs::create_dir_all(&dir).map_err(|e| VoiceForgeError::file(&dir, "create", e))?;

        let secret = load_or_create_secret(&dir.join(KEY_FILE_NAME))?;
        let cipher = Aes256Gcm::new_from_slice(&secret)
            .map_err(|e| VoiceForgeError::config("key_file", format!("invalid key: {e}")))?;
        let settings = load_settings(&dir.join(CONFIG_FILE_NAME))?;
        Ok(Self {
            cipher,
            dir,
            settings,
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE_NAME)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn save(&self) -> Result<()> {
        let path = self.config_path();
        let json = serde_json::to_string_pretty(&self.settings)
            .map_err(|e| VoiceForgeError::config("config", e))?;
        fs::write(&path, json).map_err(|e| VoiceForgeError::file(&path, "write", e))?;
        debug!("configuration saved to {}", path.display());
        Ok(())
    }

    pub fn list_providers(&self) -> Vec<&str> {
        self.settings.providers.keys().map(String::as_str).collect()
    }

    pub fn default_provider(&self) -> &str {
        &self.settings.default_provider
    }

    pub fn set_default_provider(&mut self, provider: &str) {
        self.settings.default_provider = provider.to_string();
    }

    pub fn has_api_key(&self, provider: &str) -> bool {
        self.settings
            .providers
            .get(provider)
            .is_some_and(|entry| entry.api_key_encrypted.is_some())
    }

    pub fn api_key(&self, provider: &str) -> Result<Option<String>> {
        let Some(encrypted) = self
            .settings
            .providers
            .get(provider)
            .and_then(|entry| entry.api_key_encrypted.as_deref())
        else {
            return Ok(None);
        };
        self.decrypt(encrypted)
            .map(Some)
            .map_err(|message| VoiceForgeError::config(format!("providers.{provider}"), message))
    }

    pub fn set_api_key(&mut self, provider: &str, api_key: &str) -> Result<()> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(VoiceForgeError::config(
                format!("providers.{provider}"),
                "API key must not be empty",
            ));
        }
        let encrypted = self.encrypt(api_key)?;
        self.settings
            .providers
            .entry(provider.to_string())
            .or_default()
            .api_key_encrypted = Some(encrypted);
        info!("API key set for provider {provider}");
        Ok(())
    }

    /// Returns whether a key was present.
    pub fn remove_api_key(&mut self, provider: &str) -> bool {
        let removed = self
            .settings
            .providers
            .get_mut(provider)
            .and_then(|entry| entry.api_key_encrypted.take())
            .is_some();
        if removed {
            info!("API key removed for provider {provider}");
        }
        removed
    }

    /// Short sha256 fingerprint of the stored key, safe to display.
    pub fn api_key_fingerprint(&self, provider: &str) -> Result<Option<String>> {
        Ok(self.api_key(provider)?.map(|key| {
            let digest = Sha256::digest(key.as_bytes());
            hex::encode(&digest[..8])
        }))
    }

    pub fn default_voice(&self, provider: &str) -> Option<&str> {
        self.settings
            .providers
            .get(provider)
            .and_then(|entry| entry.default_voice.as_deref())
    }

    pub fn set_default_voice(&mut self, provider: &str, voice: &str) {
        self.settings
            .providers
            .entry(provider.to_string())
            .or_default()
            .default_voice = Some(voice.to_string());
    }

    /// Configured output directory with `~` expanded, made absolute.
    pub fn output_directory(&self) -> Result<PathBuf> {
        let configured = &self.settings.output.default_directory;
        let expanded = match configured.strip_prefix("~") {
            Ok(rest) => BaseDirs::new()
                .map(|dirs| dirs.home_dir().join(rest))
                .unwrap_or_else(|| configured.clone()),
            Err(_) => configured.clone(),
        };
        std::path::absolute(&expanded)
            .map_err(|e| VoiceForgeError::config("output.default_directory", e))
    }

    pub fn set_output_directory(&mut self, dir: &Path) {
        self.settings.output.default_directory = dir.to_path_buf();
    }

    /// Restores every setting to its default but keeps provider entries.
    pub fn reset_to_defaults(&mut self) {
        let providers = std::mem::take(&mut self.settings.providers);
        self.settings = Settings {
            providers,
            ..Settings::default()
        };
    }

    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce: [u8; NONCE_LEN] = rand::random();
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| VoiceForgeError::config("api_key", "encryption failed"))?;
        let mut payload = nonce.to_vec();
        payload.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(payload))
    }

    fn decrypt(&self, encoded: &str) -> std::result::Result<String, String> {
        let payload = STANDARD
            .decode(encoded)
            .map_err(|e| format!("stored API key is not valid base64: {e}"))?;
        if payload.len() <= NONCE_LEN {
            return Err("stored API key is truncated".to_string());
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| "failed to decrypt stored API key (was the key file replaced?)".to_string())?;
        String::from_utf8(plaintext).map_err(|_| "stored API key is not UTF-8".to_string())
    }
}

fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        info!("no configuration at {}, using defaults", path.display());
        return Ok(Settings::default());
    }
    let raw = fs::read_to_string(path).map_err(|e| VoiceForgeError::file(path, "read", e))?;
    serde_json::from_str(&raw).map_err(|e| {
        VoiceForgeError::config(
            "config",
            format!("failed parsing {}: {e}", path.display()),
        )
    })
}

fn load_or_create_secret(path: &Path) -> Result<[u8; SECRET_LEN]> {
    if path.exists() {
        let encoded = fs::read_to_string(path).map_err(|e| VoiceForgeError::file(path, "read", e))?;
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| VoiceForgeError::config("key_file", e))?;
        return bytes.try_into().map_err(|_| {
            VoiceForgeError::config("key_file", format!("{} is not a {SECRET_LEN}-byte key", path.display()))
        });
    }

    let secret: [u8; SECRET_LEN] = rand::random();
    fs::write(path, STANDARD.encode(secret)).map_err(|e| VoiceForgeError::file(path, "write", e))?;
    restrict_permissions(path)?;
    debug!("created encryption key at {}", path.display());
    Ok(secret)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| VoiceForgeError::file(path, "chmod", e))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn api_keys_round_trip_through_disk_encrypted() {
        let dir = TempDir::new().expect("temp dir");
        let mut store = ConfigStore::open(Some(dir.path())).expect("open");
        assert_eq!(store.api_key("fish_audio").expect("readable"), None);

        store.set_api_key("fish_audio", "  sk-secret-123 ").expect("set");
        store.set_default_voice("fish_audio", "speech-1.5");
        store.save().expect("save");

        let raw = fs::read_to_string(dir.path().join(CONFIG_FILE_NAME)).expect("config written");
        assert!(!raw.contains("sk-secret-123"));

        let reopened = ConfigStore::open(Some(dir.path())).expect("reopen");
        assert_eq!(
            reopened.api_key("fish_audio").expect("decrypts"),
            Some("sk-secret-123".to_string())
        );
        assert_eq!(reopened.default_voice("fish_audio"), Some("speech-1.5"));
        assert_eq!(reopened.list_providers(), vec!["fish_audio"]);
        assert_eq!(
            reopened.api_key_fingerprint("fish_audio").expect("fp").map(|f| f.len()),
            Some(16)
        );
    }

    #[test]
    fn replaced_key_file_is_a_configuration_error() {
        let dir = TempDir::new().expect("temp dir");
        let mut store = ConfigStore::open(Some(dir.path())).expect("open");
        store.set_api_key("fish_audio", "secret").expect("set");
        store.save().expect("save");

        fs::remove_file(dir.path().join(KEY_FILE_NAME)).expect("remove key");
        let reopened = ConfigStore::open(Some(dir.path())).expect("reopen");
        assert!(reopened.has_api_key("fish_audio"));
        assert!(matches!(
            reopened.api_key("fish_audio"),
            Err(VoiceForgeError::Configuration { .. })
        ));
    }

    #[test]
    fn partial_config_files_fill_in_defaults() {
        let dir = TempDir::new().expect("temp dir");
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"{"network": {"stall_timeout_secs": 5}, "progress": {"min_update_bytes": 1024}}"#,
        )
        .expect("write");
        let store = ConfigStore::open(Some(dir.path())).expect("open");
        let settings = store.settings();
        assert_eq!(settings.default_provider, DEFAULT_PROVIDER);
        assert_eq!(settings.network.stall_timeout(), Duration::from_secs(5));
        assert_eq!(settings.network.connect_timeout_secs, 10);
        assert_eq!(settings.progress.min_update_bytes, 1024);
        assert_eq!(settings.progress.min_update_interval_ms, 500);
    }

    #[test]
    fn corrupt_config_is_reported_not_replaced() {
        let dir = TempDir::new().expect("temp dir");
        fs::write(dir.path().join(CONFIG_FILE_NAME), "{not json").expect("write");
        assert!(matches!(
            ConfigStore::open(Some(dir.path())),
            Err(VoiceForgeError::Configuration { .. })
        ));
    }

    #[test]
    fn reset_keeps_provider_keys() {
        let dir = TempDir::new().expect("temp dir");
        let mut store = ConfigStore::open(Some(dir.path())).expect("open");
        store.set_api_key("fish_audio", "secret").expect("set");
        store.set_output_directory(Path::new("/tmp/elsewhere"));
        store.set_default_provider("other");
        store.reset_to_defaults();
        assert_eq!(store.default_provider(), DEFAULT_PROVIDER);
        assert_eq!(
            store.settings().output.default_directory,
            PathBuf::from(DEFAULT_OUTPUT_DIR)
        );
        assert!(store.has_api_key("fish_audio"));
    }

    #[test]
    fn remove_api_key_reports_presence() {
        let dir = TempDir::new().expect("temp dir");
        let mut store = ConfigStore::open(Some(dir.path())).expect("open");
        assert!(!store.remove_api_key("fish_audio"));
        store.set_api_key("fish_audio", "secret").expect("set");
        assert!(store.remove_api_key("fish_audio"));
        assert!(!store.has_api_key("fish_audio"));
        assert!(store.set_api_key("fish_audio", "   ").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().expect("temp dir");
        ConfigStore::open(Some(dir.path())).expect("open");
        let mode = fs::metadata(dir.path().join(KEY_FILE_NAME))
            .expect("key file")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
