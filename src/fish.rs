use std::path::Path;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};

use crate::config::NetworkSettings;
use crate::download::{stream_to_file, verify_audio_file};
use crate::error::{Result, VoiceForgeError};
use crate::presets::PauseClass;
use crate::progress::{ProgressSink, ProgressState, ProgressTuning, Stage};
use crate::provider::{
    ConversionRequest, ConversionResult, TtsProvider, VoiceCatalog, VoiceInfo, VoiceKind,
    format_thousands,
};

pub const PROVIDER_ID: &str = "fish_audio";
pub const PROVIDER_NAME: &str = "Fish Audio";
pub const DEFAULT_BASE_URL: &str = "https://api.fish.audio";
pub const DEFAULT_VOICE: &str = "speech-1.6";
pub const AI_MODELS: &[&str] = &["speech-1.6", "speech-1.5"];
const TTS_ENDPOINT: &str = "/v1/tts";
const MODELS_ENDPOINT: &str = "/model";
const CHARACTER_LIMIT: usize = 10_000;
const COST_PER_1K_CHARS: f64 = 0.015;
const MAX_PAGE_SIZE: usize = 100;
const VALIDATION_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ERROR_DETAIL: usize = 200;
const MAX_SAMPLE_DESCRIPTION: usize = 100;

#[derive(Debug, Serialize)]
struct Prosody {
    speed: f32,
    volume: f32,
}

#[derive(Debug, Serialize)]
pub(crate) struct TtsRequestBody<'a> {
    text: &'a str,
    format: &'static str,
    mp3_bitrate: u32,
    temperature: f32,
    top_p: f32,
    prosody: Prosody,
    paragraph_pause: PauseClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_id: Option<&'a str>,
}

impl<'a> TtsRequestBody<'a> {
    pub(crate) fn new(request: &'a ConversionRequest) -> Self {
        Self {
            text: &request.text,
            format: "mp3",
            mp3_bitrate: request.mp3_bitrate,
            temperature: request.params.temperature,
            top_p: request.params.top_p,
            prosody: Prosody {
                speed: request.params.speed,
                volume: 0.0,
            },
            paragraph_pause: request.params.paragraph_pause,
            reference_id: (!is_ai_model(&request.voice)).then_some(request.voice.as_str()),
        }
    }
}

pub fn is_ai_model(voice: &str) -> bool {
    AI_MODELS.contains(&voice)
}

#[derive(Debug, Default, Deserialize)]
struct ModelPage {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    items: Vec<ModelItem>,
}

#[derive(Debug, Deserialize)]
struct ModelItem {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    languages: Vec<String>,
    #[serde(default)]
    author: Option<ModelAuthor>,
    #[serde(default)]
    like_count: u64,
    #[serde(default)]
    task_count: u64,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    samples: Vec<ModelSample>,
}

#[derive(Debug, Deserialize)]
struct ModelAuthor {
    #[serde(default)]
    nickname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelSample {
    #[serde(default)]
    text: String,
}

impl ModelItem {
    fn into_voice(self) -> VoiceInfo {
        let description = match self.description.filter(|d| !d.is_empty()) {
            Some(description) => description,
            None => self
                .samples
                .first()
                .map(|sample| truncate_with_ellipsis(&sample.text, MAX_SAMPLE_DESCRIPTION))
                .unwrap_or_default(),
        };
        VoiceInfo {
            id: self.id,
            name: self.title.unwrap_or_else(|| "Unknown Voice".to_string()),
            description,
            languages: if self.languages.is_empty() {
                vec!["en".to_string()]
            } else {
                self.languages
            },
            kind: VoiceKind::Human,
            author: self.author.and_then(|a| a.nickname),
            like_count: self.like_count,
            task_count: self.task_count,
            tags: self.tags,
        }
    }
}

fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

fn ai_voice(id: &str, name: &str, description: &str, languages: &[&str]) -> VoiceInfo {
    VoiceInfo {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        languages: languages.iter().map(|l| l.to_string()).collect(),
        kind: VoiceKind::Ai,
        author: Some(PROVIDER_NAME.to_string()),
        like_count: 0,
        task_count: 0,
        tags: Vec::new(),
    }
}

fn builtin_models() -> Vec<VoiceInfo> {
    vec![
        ai_voice(
            "speech-1.6",
            "Speech 1.6 (AI)",
            "Latest Fish Audio AI speech model",
            &["en", "zh", "ja", "ko", "fr", "de", "es", "ar"],
        ),
        ai_voice(
            "speech-1.5",
            "Speech 1.5 (AI)",
            "Previous generation AI speech model",
            &["en", "zh", "ja"],
        ),
    ]
}

fn parse_model_page(raw: &str, limit: usize) -> VoiceCatalog {
    let page: ModelPage = match serde_json::from_str(raw) {
        Ok(page) => page,
        Err(err) => {
            warn!("could not parse {PROVIDER_NAME} voice list, using built-in models: {err}");
            ModelPage::default()
        }
    };

    let mut voices = builtin_models();
    voices.extend(
        page.items
            .into_iter()
            .take(limit)
            .filter(|item| item.kind == "tts")
            .map(ModelItem::into_voice),
    );
    VoiceCatalog {
        provider: PROVIDER_NAME.to_string(),
        voices,
        default_voice: DEFAULT_VOICE.to_string(),
        total_available: page.total,
    }
}

fn error_detail(response: Response) -> String {
    let body = response.text().unwrap_or_default();
    truncate_with_ellipsis(body.trim(), MAX_ERROR_DETAIL)
}

fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = error_detail(response);
    debug!("{PROVIDER_NAME} returned {status}: {detail}");
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => VoiceForgeError::Authentication {
            provider: PROVIDER_NAME.to_string(),
            message: "Invalid API key".to_string(),
        },
        StatusCode::BAD_REQUEST => VoiceForgeError::Service {
            provider: PROVIDER_NAME.to_string(),
            message: format!("Bad request - check text and model parameters ({detail})"),
        },
        StatusCode::TOO_MANY_REQUESTS => VoiceForgeError::Service {
            provider: PROVIDER_NAME.to_string(),
            message: "Rate limit exceeded - please wait and try again".to_string(),
        },
        other => VoiceForgeError::Network {
            message: format!("{PROVIDER_NAME} API error"),
            status: Some(other.as_u16()),
        },
    })
}

/// Rejects success responses that carry an error document instead of audio.
fn check_audio_content_type(response: Response) -> Result<Response> {
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if content_type.starts_with("application/json") || content_type.starts_with("text/") {
        let detail = error_detail(response);
        return Err(VoiceForgeError::MalformedResponse(format!(
            "expected audio, got {content_type}: {detail}"
        )));
    }
    Ok(response)
}

pub struct FishAudioClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    request_timeout: Duration,
    tuning: ProgressTuning,
}

impl FishAudioClient {
    pub fn new(
        api_key: Option<String>,
        network: &NetworkSettings,
        tuning: ProgressTuning,
    ) -> Result<Self> {
        // The client timeout bounds each transport operation (connect, the
        // wait for headers, every body read), which is the stall deadline.
        let http = Client::builder()
            .user_agent(concat!("voiceforge/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(network.connect_timeout())
            .timeout(network.stall_timeout())
            .build()?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            request_timeout: network.request_timeout(),
            tuning,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| VoiceForgeError::Authentication {
                provider: PROVIDER_NAME.to_string(),
                message: "no API key configured".to_string(),
            })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{endpoint}", self.base_url)
    }

    fn run_conversion(
        &self,
        request: &ConversionRequest,
        dest: &Path,
        state: &mut ProgressState,
        sink: &mut dyn ProgressSink,
    ) -> Result<u64> {
        sink.report(&state.stage(Stage::Preparing));
        let api_key = self.api_key()?;
        let chars = request.text.chars().count();
        if chars > CHARACTER_LIMIT {
            warn!(
                "text has {chars} characters, above the {PROVIDER_NAME} limit of {CHARACTER_LIMIT}; the request may be rejected"
            );
        }

        let body = TtsRequestBody::new(request);
        let mut http_request = self
            .http
            .post(self.url(TTS_ENDPOINT))
            .bearer_auth(api_key)
            .json(&body);
        if is_ai_model(&request.voice) {
            http_request = http_request.header("model", request.voice.as_str());
        }
        debug!("TTS request: {chars} chars, voice {}", request.voice);
        sink.report(&state.stage(Stage::Sending));

        let started = Instant::now();
        sink.report(&state.stage(Stage::Connecting));
        let response = http_request.send()?;
        sink.report(&state.stage(Stage::Processing));
        debug!(
            "{PROVIDER_NAME} responded {} after {:.2}s",
            response.status(),
            started.elapsed().as_secs_f64()
        );

        let response = check_audio_content_type(check_status(response)?)?;
        sink.report(&state.stage(Stage::Receiving));
        let written = stream_to_file(response, dest, state, sink)?;

        sink.report(&state.stage(Stage::Verifying));
        let size = verify_audio_file(dest, written)?;
        sink.report(&state.stage(Stage::Complete));
        info!(
            "TTS conversion successful: {chars} chars -> {size} bytes -> {} ({:.2}s)",
            dest.display(),
            started.elapsed().as_secs_f64()
        );
        Ok(size)
    }
}

impl TtsProvider for FishAudioClient {
    fn display_name(&self) -> &str {
        PROVIDER_NAME
    }

    fn character_limit(&self) -> Option<usize> {
        Some(CHARACTER_LIMIT)
    }

    fn estimate_cost(&self, text: &str) -> String {
        estimate_cost(text)
    }

    fn list_voices(&self, limit: usize) -> Result<VoiceCatalog> {
        let page_size = limit.clamp(1, MAX_PAGE_SIZE);
        let response = self
            .http
            .get(self.url(MODELS_ENDPOINT))
            .bearer_auth(self.api_key()?)
            .query(&[("page_size", page_size), ("page_number", 1)])
            .timeout(self.request_timeout)
            .send()?;
        let raw = check_status(response)?.text()?;
        let catalog = parse_model_page(&raw, limit);
        info!(
            "retrieved {} voices from {PROVIDER_NAME}",
            catalog.voices.len()
        );
        Ok(catalog)
    }

    fn validate_api_key(&self) -> bool {
        let Ok(api_key) = self.api_key() else {
            return false;
        };
        if api_key.trim().is_empty() {
            return false;
        }
        match self
            .http
            .get(self.url(MODELS_ENDPOINT))
            .bearer_auth(api_key)
            .timeout(VALIDATION_TIMEOUT)
            .send()
        {
            Ok(response) => response.status() == StatusCode::OK,
            Err(err) => {
                debug!("API key validation failed: {err}");
                false
            }
        }
    }

    fn synthesize(
        &self,
        request: &ConversionRequest,
        dest: &Path,
        sink: &mut dyn ProgressSink,
    ) -> ConversionResult {
        let mut state = ProgressState::new(self.tuning);
        match self.run_conversion(request, dest, &mut state, sink) {
            Ok(size) => ConversionResult::succeeded(dest, size),
            Err(err) => {
                warn!("{PROVIDER_NAME} conversion failed: {err}");
                ConversionResult::failed(dest, state.bytes_received(), err)
            }
        }
    }
}

/// Rough price at $0.015 per 1000 characters.
pub fn estimate_cost(text: &str) -> String {
    let chars = text.chars().count();
    let cost = chars as f64 * COST_PER_1K_CHARS / 1000.0;
    let chars = format_thousands(chars);
    if cost < 0.01 {
        format!("~$0.01 ({chars} chars)")
    } else {
        format!("~${cost:.3} ({chars} chars)")
    }
}
