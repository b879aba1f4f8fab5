use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::traits::{CaptureError, CaptureFormat, Microphone, SpeechToText, SttEvent};

/// Posted by the capture pump. `generation` identifies the capture run so that
/// reports from a stopped run can be told apart from the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureNotice {
    Listening {
        generation: u64,
    },
    Transcript {
        generation: u64,
        text: String,
        is_final: bool,
    },
    Failed {
        generation: u64,
        error: CaptureError,
    },
}

impl CaptureNotice {
    fn generation(&self) -> u64 {
        match self {
            CaptureNotice::Listening { generation }
            | CaptureNotice::Transcript { generation, .. }
            | CaptureNotice::Failed { generation, .. } => *generation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureUpdate {
    ListeningChanged(bool),
    Transcript { text: String, is_final: bool },
    Failed(CaptureError),
}

fn should_log_dropped_chunks(dropped: u64) -> bool {
    // First drop, then periodically.
    dropped > 0 && (dropped == 1 || dropped % 50 == 0)
}

/// Owns the microphone -> STT pump for one session.
pub struct CaptureCoordinator {
    mic: Arc<dyn Microphone>,
    stt: Arc<dyn SpeechToText>,
    format: CaptureFormat,
    notices: UnboundedSender<CaptureNotice>,

    generation: u64,
    task: Option<JoinHandle<()>>,
    listening: bool,
    live_transcript: String,
    disabled: bool,
}

impl CaptureCoordinator {
    pub fn new(
        mic: Arc<dyn Microphone>,
        stt: Arc<dyn SpeechToText>,
        format: CaptureFormat,
        notices: UnboundedSender<CaptureNotice>,
    ) -> Self {
        Self {
            mic,
            stt,
            format,
            notices,
            generation: 0,
            task: None,
            listening: false,
            live_transcript: String::new(),
            disabled: false,
        }
    }

    /// True from `start` until `stop` or a failure, including while the
    /// microphone is still being acquired.
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn is_available(&self) -> bool {
        !self.disabled
    }

    pub fn live_transcript(&self) -> &str {
        &self.live_transcript
    }

    pub fn reset(&mut self) -> Option<CaptureUpdate> {
        self.disabled = false;
        self.stop()
    }

    /// Returns false when capture is disabled or already running.
    pub fn start(&mut self) -> bool {
        if self.disabled || self.task.is_some() {
            return false;
        }

        self.generation += 1;
        self.live_transcript.clear();

        let generation = self.generation;
        let mic = self.mic.clone();
        let stt = self.stt.clone();
        let format = self.format;
        let notices = self.notices.clone();

        log::info!("capture: starting (generation {generation})");
        self.task = Some(tokio::spawn(run_capture(
            generation, mic, stt, format, notices,
        )));
        true
    }

    /// Idempotent. Aborting the pump drops the audio source and the STT stream,
    /// including a microphone acquisition that is still pending.
    pub fn stop(&mut self) -> Option<CaptureUpdate> {
        let task = self.task.take()?;
        task.abort();
        self.live_transcript.clear();
        log::info!("capture: stopped (generation {})", self.generation);

        if std::mem::take(&mut self.listening) {
            Some(CaptureUpdate::ListeningChanged(false))
        } else {
            None
        }
    }

    pub fn on_notice(&mut self, notice: CaptureNotice) -> Vec<CaptureUpdate> {
        if notice.generation() != self.generation || self.task.is_none() {
            return Vec::new();
        }

        match notice {
            CaptureNotice::Listening { .. } => {
                self.listening = true;
                vec![CaptureUpdate::ListeningChanged(true)]
            }
            CaptureNotice::Transcript { text, is_final, .. } => {
                if is_final {
                    self.live_transcript.clear();
                } else {
                    self.live_transcript = text.clone();
                }
                vec![CaptureUpdate::Transcript { text, is_final }]
            }
            CaptureNotice::Failed { error, .. } => {
                let mut out: Vec<CaptureUpdate> = self.stop().into_iter().collect();
                if error.is_capability_error() {
                    log::warn!("capture: {error}; disabling capture for this session");
                    self.disabled = true;
                } else {
                    log::warn!("capture: {error}");
                }
                out.push(CaptureUpdate::Failed(error));
                out
            }
        }
    }
}

async fn run_capture(
    generation: u64,
    mic: Arc<dyn Microphone>,
    stt: Arc<dyn SpeechToText>,
    format: CaptureFormat,
    notices: UnboundedSender<CaptureNotice>,
) {
    let fail = |error: CaptureError| {
        let _ = notices.send(CaptureNotice::Failed { generation, error });
    };

    let mut source = match mic.acquire(&format).await {
        Ok(s) => s,
        Err(e) => return fail(e),
    };

    let mut stream = match stt.connect(format.sample_rate_hz).await {
        Ok(s) => s,
        Err(e) => return fail(CaptureError::Transcription(format!("{e:#}"))),
    };

    let _ = notices.send(CaptureNotice::Listening { generation });

    let mut dropped_chunks: u64 = 0;
    loop {
        tokio::select! {
            chunk = source.next_chunk() => {
                let Some(pcm) = chunk else {
                    return fail(CaptureError::DeviceUnavailable("audio stream ended".into()));
                };
                if !stream.send_audio(pcm) {
                    dropped_chunks = dropped_chunks.saturating_add(1);
                    if should_log_dropped_chunks(dropped_chunks) {
                        log::warn!(
                            "capture: transcription backpressure, dropped {dropped_chunks} audio chunks"
                        );
                    }
                }
            }
            event = stream.next_event() => {
                match event {
                    Some(SttEvent::Partial(text)) => {
                        let _ = notices.send(CaptureNotice::Transcript { generation, text, is_final: false });
                    }
                    Some(SttEvent::Final(text)) => {
                        let _ = notices.send(CaptureNotice::Transcript { generation, text, is_final: true });
                    }
                    Some(SttEvent::Error(message)) => {
                        return fail(CaptureError::Transcription(message));
                    }
                    None => {
                        return fail(CaptureError::Transcription("transcription stream closed".into()));
                    }
                }
            }
        }
    }
}
