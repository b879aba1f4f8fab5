use std::sync::Arc;
use std::time::Duration;

use intervue_core::AppConfig;
use intervue_engine::engine::{Capabilities, EngineConfig, InterviewEngine};
use intervue_engine::traits::CaptureFormat;

use crate::microphone::SystemMicrophone;
use crate::secrets::{SecretKey, resolve_secret};
use crate::stt::DeepgramStt;
use crate::transport::WsTransportFactory;
use crate::tts::CommandSynthesizer;

/// Build a runnable engine from config + platform adapters.
///
/// The Deepgram key is resolved from the keyring or the environment.
pub fn build_engine_from_config(cfg: &AppConfig) -> InterviewEngine {
    let api_key = resolve_secret(SecretKey::DeepgramApiKey).unwrap_or_default();
    if api_key.is_empty() {
        if cfg.stt_api_key_present {
            log::warn!("runtime: a Deepgram API key was stored but the keyring did not return it");
        } else {
            log::warn!("runtime: no Deepgram API key configured; voice answers will fail to transcribe");
        }
    }
    build_engine(cfg, api_key)
}

pub fn build_engine(cfg: &AppConfig, deepgram_api_key: String) -> InterviewEngine {
    let engine_cfg = EngineConfig {
        url_template: cfg.interview.url_template.clone(),
        capture: CaptureFormat {
            sample_rate_hz: cfg.stt.sample_rate_hz,
            chunk_interval: Duration::from_millis(cfg.stt.chunk_interval_ms.max(1)),
        },
    };

    let caps = Capabilities {
        transport: Arc::new(WsTransportFactory::from_service_config(&cfg.interview)),
        synthesizer: Arc::new(CommandSynthesizer::from_config(&cfg.tts)),
        microphone: Arc::new(SystemMicrophone::new(cfg.microphone_device.clone())),
        speech_to_text: Arc::new(DeepgramStt::new(cfg.stt.clone(), deepgram_api_key)),
    };

    InterviewEngine::new(engine_cfg, caps)
}
