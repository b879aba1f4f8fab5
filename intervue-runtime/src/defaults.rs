use intervue_core::{AppConfig, InterviewServiceConfig, SttConfig, TtsConfig};

pub const DEFAULT_CONFIG_FILE: &str = "intervue.json";

pub fn default_app_config() -> AppConfig {
    AppConfig {
        interview: InterviewServiceConfig::default(),
        stt: SttConfig::default(),
        tts: TtsConfig::default(),
        microphone_device: None,
        stt_api_key_present: false,
    }
}
