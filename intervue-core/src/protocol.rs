//! Message envelope and the closed set of message types exchanged with the
//! interview service.
//!
//! Every frame on the interview socket is one JSON envelope
//! `{"type": ..., "data": {...}, "timestamp"?: ...}`. Outbound messages are
//! produced only through [`OutboundMessage`]; inbound frames are decoded with
//! [`decode_inbound`], which never fails on an unrecognised `type`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const CLOSE_NORMAL: u16 = 1000;
// Browsers report a refused/unreachable endpoint as 1006; we use the same code
// for handshake failures and dropped streams.
pub const CLOSE_ABNORMAL: u16 = 1006;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a json object")]
    NotAnObject,

    #[error("frame has no string `type`")]
    MissingType,
}

/// Wire shape shared by every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub max_duration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty_level: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub focus_areas: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartInterviewData {
    pub job_id: String,
    pub candidate_id: String,
    pub candidate_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_text: Option<String>,
    pub preferences: Preferences,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateResponseData {
    pub response: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveTranscriptData {
    pub transcript: String,
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OutboundMessage {
    StartInterview(StartInterviewData),
    CandidateResponse(CandidateResponseData),
    LiveTranscript(LiveTranscriptData),
    PauseInterview(Empty),
    ResumeInterview(Empty),
    EndInterview(Empty),
    GetStatus(Empty),
}

impl OutboundMessage {
    pub fn candidate_response(response: impl Into<String>) -> Self {
        Self::CandidateResponse(CandidateResponseData {
            response: response.into(),
        })
    }

    pub fn live_transcript(transcript: impl Into<String>, is_final: bool) -> Self {
        Self::LiveTranscript(LiveTranscriptData {
            transcript: transcript.into(),
            is_final,
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::StartInterview(_) => "start_interview",
            OutboundMessage::CandidateResponse(_) => "candidate_response",
            OutboundMessage::LiveTranscript(_) => "live_transcript",
            OutboundMessage::PauseInterview(_) => "pause_interview",
            OutboundMessage::ResumeInterview(_) => "resume_interview",
            OutboundMessage::EndInterview(_) => "end_interview",
            OutboundMessage::GetStatus(_) => "get_status",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterviewStartedData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interview_phase: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewQuestionData {
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_type: Option<String>,
}

/// Conversational reply to an answer, optionally carrying the next question.
/// `time_elapsed` is reported in minutes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiResponseData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub questions_asked: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_elapsed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interview_phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comfort_level: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusUpdateData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterviewCompletedData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_assessment: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_feedback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorData {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PongData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum InboundMessage {
    InterviewStarted(InterviewStartedData),
    NewQuestion(NewQuestionData),
    AiResponse(AiResponseData),
    StatusUpdate(StatusUpdateData),
    InterviewCompleted(InterviewCompletedData),
    Error(ErrorData),
    Pong(PongData),
    InterviewPaused(Empty),
    InterviewResumed(Empty),
    LiveTranscriptUpdate(Value),
}

impl InboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::InterviewStarted(_) => "interview_started",
            InboundMessage::NewQuestion(_) => "new_question",
            InboundMessage::AiResponse(_) => "ai_response",
            InboundMessage::StatusUpdate(_) => "status_update",
            InboundMessage::InterviewCompleted(_) => "interview_completed",
            InboundMessage::Error(_) => "error",
            InboundMessage::Pong(_) => "pong",
            InboundMessage::InterviewPaused(_) => "interview_paused",
            InboundMessage::InterviewResumed(_) => "interview_resumed",
            InboundMessage::LiveTranscriptUpdate(_) => "live_transcript_update",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Known(InboundMessage),
    /// A well-formed envelope whose `type` this client does not handle.
    Unknown(String),
}

/// Maps wire aliases onto the canonical inbound type name.
fn canonical_inbound_kind(kind: &str) -> Option<&'static str> {
    match kind {
        "interview_started" => Some("interview_started"),
        "new_question" | "ai_question" => Some("new_question"),
        "ai_response" => Some("ai_response"),
        "status_update" => Some("status_update"),
        "interview_completed" | "interview_ended" => Some("interview_completed"),
        "error" => Some("error"),
        "pong" => Some("pong"),
        "interview_paused" => Some("interview_paused"),
        "interview_resumed" => Some("interview_resumed"),
        "live_transcript_update" => Some("live_transcript_update"),
        _ => None,
    }
}

pub fn decode_inbound(text: &str) -> Result<Decoded, ProtocolError> {
    let v: Value = serde_json::from_str(text)?;
    let Value::Object(mut obj) = v else {
        return Err(ProtocolError::NotAnObject);
    };

    let kind = match obj.remove("type") {
        Some(Value::String(s)) => s,
        _ => return Err(ProtocolError::MissingType),
    };

    let Some(canonical) = canonical_inbound_kind(&kind) else {
        return Ok(Decoded::Unknown(kind));
    };

    // Older servers put the payload next to `type` instead of under `data`.
    let data = match obj.remove("data") {
        Some(d @ Value::Object(_)) => d,
        Some(Value::Null) | None => {
            obj.remove("timestamp");
            Value::Object(obj)
        }
        Some(other) => other,
    };

    let normalized = serde_json::json!({ "type": canonical, "data": data });
    Ok(Decoded::Known(serde_json::from_value(normalized)?))
}
