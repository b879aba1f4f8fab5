use serde::{Deserialize, Serialize};

use crate::stt::{DEEPGRAM_DEFAULT_LANGUAGE, DEEPGRAM_MODEL_NOVA_2, STT_PROVIDER_DEEPGRAM};

pub const SESSION_ID_PLACEHOLDER: &str = "{session_id}";
pub const APPLICATION_ID_PLACEHOLDER: &str = "{application_id}";

pub const DEFAULT_INTERVIEW_URL_TEMPLATE: &str = "ws://localhost:8000/ws/interview/{session_id}";
pub const DEFAULT_HEALTH_URL: &str = "http://localhost:8000/health";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub interview: InterviewServiceConfig,
    pub stt: SttConfig,
    pub tts: TtsConfig,

    #[serde(default)]
    pub microphone_device: Option<String>,

    // The STT key is stored outside this struct at rest.
    #[serde(default)]
    pub stt_api_key_present: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterviewServiceConfig {
    pub url_template: String,
    pub health_url: String,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub connect_timeout_ms: u64,
    pub default_max_duration_secs: u64,
}

impl Default for InterviewServiceConfig {
    fn default() -> Self {
        Self {
            url_template: DEFAULT_INTERVIEW_URL_TEMPLATE.into(),
            health_url: DEFAULT_HEALTH_URL.into(),
            reconnect_delay_ms: 3_000,
            max_reconnect_attempts: 3,
            connect_timeout_ms: 10_000,
            default_max_duration_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SttConfig {
    pub provider: String,
    pub model: String,
    pub language: String,
    pub punctuate: bool,
    pub interim_results: bool,
    pub endpointing_ms: u32,
    pub sample_rate_hz: u32,
    pub chunk_interval_ms: u64,
    pub keepalive_interval_ms: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: STT_PROVIDER_DEEPGRAM.into(),
            model: DEEPGRAM_MODEL_NOVA_2.into(),
            language: DEEPGRAM_DEFAULT_LANGUAGE.into(),
            punctuate: true,
            interim_results: true,
            endpointing_ms: 300,
            sample_rate_hz: 16_000,
            chunk_interval_ms: 250,
            keepalive_interval_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtsConfig {
    pub enabled: bool,
    /// Synthesizer executable; `None` picks the platform default.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub rate_wpm: Option<u32>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: None,
            voice: None,
            rate_wpm: None,
        }
    }
}

/// Substitutes the session id into the interview URL template.
///
/// Both `{session_id}` and `{application_id}` are accepted. A template without a
/// placeholder is used verbatim.
pub fn render_session_url(template: &str, session_id: &str) -> String {
    template
        .replace(SESSION_ID_PLACEHOLDER, session_id)
        .replace(APPLICATION_ID_PLACEHOLDER, session_id)
}
