use async_trait::async_trait;
use intervue_core::{SttConfig, accept_final_transcript, is_deepgram_selected};
use intervue_engine::traits::{SpeechToText, SttEvent, TranscriptionStream};
use intervue_providers::deepgram_realtime::{
    DeepgramRealtimeConfig, DeepgramRealtimeHandle, RealtimeEvent, spawn_realtime_session,
};
use tokio::sync::mpsc;
use url::Url;

/// Streams microphone audio to Deepgram's realtime listen API.
#[derive(Clone)]
pub struct DeepgramStt {
    stt: SttConfig,
    api_key: String,
    listen_url: Option<Url>,
}

impl std::fmt::Debug for DeepgramStt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepgramStt")
            .field("model", &self.stt.model)
            .field("language", &self.stt.language)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl DeepgramStt {
    pub fn new(stt: SttConfig, api_key: impl Into<String>) -> Self {
        Self {
            stt,
            api_key: api_key.into(),
            listen_url: None,
        }
    }

    /// Point at a different listen endpoint (self-hosted or a test server).
    pub fn with_listen_url(mut self, url: Url) -> Self {
        self.listen_url = Some(url);
        self
    }
}

#[async_trait]
impl SpeechToText for DeepgramStt {
    async fn connect(&self, sample_rate_hz: u32) -> anyhow::Result<Box<dyn TranscriptionStream>> {
        if !is_deepgram_selected(&self.stt.provider) {
            return Err(anyhow::anyhow!(
                "unsupported STT provider: {}",
                self.stt.provider
            ));
        }

        let mut cfg = DeepgramRealtimeConfig::from_stt_config(&self.stt, self.api_key.clone())?;
        cfg.sample_rate_hz = sample_rate_hz;
        if let Some(url) = &self.listen_url {
            cfg.ws_url = url.clone();
        }

        let (handle, events) = spawn_realtime_session(cfg).await?;
        Ok(Box::new(DeepgramStream { handle, events }))
    }
}

// Dropping the stream drops the last handle, which makes the session send
// CloseStream and shut the socket.
struct DeepgramStream {
    handle: DeepgramRealtimeHandle,
    events: mpsc::Receiver<RealtimeEvent>,
}

#[async_trait]
impl TranscriptionStream for DeepgramStream {
    fn send_audio(&mut self, pcm_s16le: Vec<u8>) -> bool {
        self.handle.try_send_audio_chunk(pcm_s16le)
    }

    async fn next_event(&mut self) -> Option<SttEvent> {
        loop {
            match self.events.recv().await? {
                RealtimeEvent::Opened { .. } => continue,
                RealtimeEvent::Partial { text } => return Some(SttEvent::Partial(text)),
                RealtimeEvent::Utterance { text } => match accept_final_transcript(&text) {
                    Some(text) => return Some(SttEvent::Final(text)),
                    None => continue,
                },
                RealtimeEvent::Error { message } => return Some(SttEvent::Error(message)),
            }
        }
    }
}
