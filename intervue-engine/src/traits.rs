use std::time::Duration;

use async_trait::async_trait;
use intervue_core::{ConnectionState, OutboundMessage, TransportEvent};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

/// One WebSocket connection to the interview service.
///
/// Implementations run their socket on background tasks and report through the
/// event sender handed to [`TransportFactory::create`]. None of these calls block.
pub trait InterviewTransport: Send {
    /// No-op while already connecting or connected.
    fn connect(&mut self, url: &str);

    /// Returns false (and drops the message) unless the socket is connected.
    fn send(&mut self, msg: &OutboundMessage) -> bool;

    /// Idempotent. Closes with a normal closure and stops reconnecting.
    fn disconnect(&mut self);

    fn state(&self) -> ConnectionState;
}

pub trait TransportFactory: Send + Sync {
    fn create(&self, events: UnboundedSender<TransportEvent>) -> Box<dyn InterviewTransport>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("speech synthesis is not supported on this system")]
    Unsupported,

    #[error("speech synthesis failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Resolves when the utterance finishes. Dropping the future must stop the audio.
    async fn speak(&self, text: &str) -> Result<(), PlaybackError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureFormat {
    pub sample_rate_hz: u32,
    pub chunk_interval: Duration,
}

impl Default for CaptureFormat {
    fn default() -> Self {
        Self {
            sample_rate_hz: 16_000,
            chunk_interval: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("microphone unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("transcription failed: {0}")]
    Transcription(String),
}

impl CaptureError {
    /// Microphone problems are not retried for the rest of the session.
    pub fn is_capability_error(&self) -> bool {
        matches!(
            self,
            CaptureError::PermissionDenied | CaptureError::DeviceUnavailable(_)
        )
    }
}

#[async_trait]
pub trait Microphone: Send + Sync {
    async fn acquire(&self, format: &CaptureFormat) -> Result<Box<dyn AudioSource>, CaptureError>;
}

#[async_trait]
pub trait AudioSource: Send {
    /// Next mono PCM16 LE chunk at the requested rate; `None` once the device stops.
    async fn next_chunk(&mut self) -> Option<Vec<u8>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SttEvent {
    Partial(String),
    Final(String),
    Error(String),
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn connect(&self, sample_rate_hz: u32) -> anyhow::Result<Box<dyn TranscriptionStream>>;
}

#[async_trait]
pub trait TranscriptionStream: Send {
    /// Non-blocking. Returns false when the chunk was dropped because the stream is backlogged.
    fn send_audio(&mut self, pcm_s16le: Vec<u8>) -> bool;

    /// `None` once the stream has closed.
    async fn next_event(&mut self) -> Option<SttEvent>;
}
