use std::path::PathBuf;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum VoiceForgeError {
    #[error("authentication failed for {provider}: {message}")]
    Authentication { provider: String, message: String },

    #[error("network error: {message}{}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Network {
        message: String,
        status: Option<u16>,
    },

    #[error("stream stalled: no data received for {:.1}s", .waited.as_secs_f64())]
    StreamStalled { waited: Duration },

    #[error("failed to {operation} file {}: {message}", .path.display())]
    File {
        path: PathBuf,
        operation: &'static str,
        message: String,
    },

    #[error("preset '{name}' not found. Available: {}", .available.join(", "))]
    PresetNotFound {
        name: String,
        available: Vec<&'static str>,
    },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("configuration error ({key}): {message}")]
    Configuration { key: String, message: String },

    #[error("{provider}: {message}")]
    Service { provider: String, message: String },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, VoiceForgeError>;

impl VoiceForgeError {
    pub(crate) fn file(
        path: impl Into<PathBuf>,
        operation: &'static str,
        message: impl ToString,
    ) -> Self {
        Self::File {
            path: path.into(),
            operation,
            message: message.to_string(),
        }
    }

    pub(crate) fn config(key: impl Into<String>, message: impl ToString) -> Self {
        Self::Configuration {
            key: key.into(),
            message: message.to_string(),
        }
    }
}

impl From<reqwest::Error> for VoiceForgeError {
    fn from(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("request timed out: {err}")
        } else if err.is_connect() {
            format!("connection failed: {err}")
        } else {
            err.to_string()
        };
        Self::Network {
            message,
            status: err.status().map(|s| s.as_u16()),
        }
    }
}
