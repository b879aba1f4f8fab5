use intervue_core::{ConnectionState, Phase, SessionId, TranscriptEntry};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Completed,
    EndedByCandidate,
    TimeLimit,
}

/// Handed to the caller exactly once, when the phase becomes `ended`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewResult {
    pub session_id: SessionId,
    pub reason: EndReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_assessment: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_feedback: Option<String>,
    pub questions_asked: u32,
    pub elapsed_secs: u64,
    pub transcript: Vec<TranscriptEntry>,
}

/// Point-in-time view of a session, published after every processed event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Option<SessionId>,
    pub phase: Phase,
    pub connection: ConnectionState,
    pub questions_asked: u32,
    pub current_question: Option<String>,
    pub elapsed_secs: u64,
    pub max_duration_secs: u64,
    pub progress: f64,
    pub time_remaining: f64,
    pub job_title: Option<String>,
    pub company: Option<String>,

    pub listening: bool,
    pub live_transcript: String,
    pub speaking: bool,

    // Capability flags flip to false after a permission or support failure.
    pub capture_available: bool,
    pub playback_available: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PhaseChanged(Phase),
    ConnectionChanged(ConnectionState),
    Transcript(TranscriptEntry),
    LiveTranscript { text: String, is_final: bool },
    SpeakingStarted { utterance: u64 },
    SpeakingEnded { utterance: u64 },
    ListeningChanged(bool),
    Finished(InterviewResult),
}
