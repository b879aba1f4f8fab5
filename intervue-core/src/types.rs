use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::InboundMessage;

pub fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().try_into().unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Locally generated identifier for one interview attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// `interview_<unix-ms>_<9 random alphanumerics>`, matching what the web client generates.
    pub fn generate() -> Self {
        let suffix: String = Uuid::new_v4().simple().to_string().chars().take(9).collect();
        Self(format!("interview_{}_{suffix}", now_unix_ms()))
    }

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Setup,
    Connecting,
    Active,
    Paused,
    Ended,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::Connecting => "connecting",
            Phase::Active => "active",
            Phase::Paused => "paused",
            Phase::Ended => "ended",
        }
    }

    /// Phases from which the candidate can still end the interview.
    pub fn is_live(self) -> bool {
        matches!(self, Phase::Connecting | Phase::Active | Phase::Paused)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Everything the interview socket reports back to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StateChanged(ConnectionState),
    Opened,
    Message(InboundMessage),
    /// A text frame that could not be decoded as an envelope.
    Malformed(String),
    Closed { code: u16, reason: String },
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptKind {
    Ai,
    Candidate,
    System,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    #[serde(rename = "type")]
    pub kind: TranscriptKind,
    pub content: String,
    pub ts_unix_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_number: Option<u32>,
}

impl TranscriptEntry {
    pub fn new(kind: TranscriptKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            ts_unix_ms: now_unix_ms(),
            question_number: None,
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(TranscriptKind::Ai, content)
    }

    pub fn candidate(content: impl Into<String>) -> Self {
        Self::new(TranscriptKind::Candidate, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(TranscriptKind::System, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(TranscriptKind::Error, content)
    }

    pub fn with_question_number(mut self, n: Option<u32>) -> Self {
        self.question_number = n;
        self
    }
}

/// Input collected by the setup screen before an interview can start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterviewSetup {
    pub job_id: String,
    pub candidate_id: String,
    pub candidate_name: String,
    #[serde(default)]
    pub resume_text: Option<String>,
    pub max_duration_secs: u64,
    #[serde(default)]
    pub difficulty_level: Option<String>,
    #[serde(default)]
    pub focus_areas: Vec<String>,
}

impl InterviewSetup {
    pub fn new(
        job_id: impl Into<String>,
        candidate_id: impl Into<String>,
        candidate_name: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            candidate_id: candidate_id.into(),
            candidate_name: candidate_name.into(),
            resume_text: None,
            max_duration_secs: 30 * 60,
            difficulty_level: None,
            focus_areas: Vec::new(),
        }
    }

    pub fn with_resume_text(mut self, text: impl Into<String>) -> Self {
        self.resume_text = Some(text.into());
        self
    }

    pub fn with_max_duration_secs(mut self, secs: u64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    pub fn with_difficulty_level(mut self, level: impl Into<String>) -> Self {
        self.difficulty_level = Some(level.into());
        self
    }

    pub fn with_focus_areas(mut self, areas: Vec<String>) -> Self {
        self.focus_areas = areas;
        self
    }

    /// The service expects whole minutes.
    pub fn max_duration_minutes(&self) -> u32 {
        let mins = self.max_duration_secs.div_ceil(60).max(1);
        mins.try_into().unwrap_or(u32::MAX)
    }
}
