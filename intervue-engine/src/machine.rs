//! Session phase state machine.
//!
//! Pure event-in/effect-out: [`SessionMachine::handle`] takes one [`Input`],
//! mutates the session bookkeeping and returns the [`Effect`]s the façade must
//! carry out, in order. Nothing here touches sockets, audio or clocks.

use intervue_core::protocol::{Empty, Preferences, StartInterviewData};
use intervue_core::{
    ConnectionState, InboundMessage, InterviewSetup, OutboundMessage, Phase, SessionId,
    TranscriptEntry, normalize_answer, render_session_url,
};
use thiserror::Error;

use crate::session::EndReason;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("interview duration must be at least one second")]
    InvalidDuration,

    #[error("there is no question awaiting an answer")]
    NoActiveQuestion,

    #[error("answer is empty")]
    EmptyAnswer,

    #[error("not connected to the interview service")]
    NotConnected,

    #[error("cannot {action} while the interview is {phase}")]
    InvalidPhase {
        action: &'static str,
        phase: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Start {
        session_id: SessionId,
        setup: InterviewSetup,
    },
    ConnectionChanged(ConnectionState),
    TransportOpened,
    TransportClosed {
        code: u16,
        reason: String,
    },
    Inbound(InboundMessage),
    Malformed(String),
    SubmitAnswer(String),
    LiveTranscript {
        text: String,
        is_final: bool,
    },
    Pause,
    Resume,
    End,
    RequestStatus,
    Tick,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Connect {
        url: String,
    },
    Send(OutboundMessage),
    Speak(String),
    /// Interrupt playback and stop capture.
    StopAudio,
    ArmTimer,
    SuspendTimer,
    Disconnect,
    Transcript(TranscriptEntry),
    PhaseChanged(Phase),
    Finished {
        reason: EndReason,
        final_assessment: Option<serde_json::Value>,
        final_feedback: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    pub session_id: Option<SessionId>,
    pub phase: Phase,
    pub connection: ConnectionState,
    pub setup: Option<InterviewSetup>,
    pub max_duration_secs: u64,
    pub elapsed_secs: u64,
    pub questions_asked: u32,
    pub current_question: Option<String>,
    pub current_question_number: Option<u32>,
    pub progress: f64,
    pub time_remaining: f64,
    pub job_title: Option<String>,
    pub company: Option<String>,
    pub remote_session_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionMachine {
    url_template: String,
    state: SessionState,
    // `start_interview` goes out on the first open of a session only.
    pending_start: bool,
}

impl SessionMachine {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            state: SessionState::default(),
            pending_start: false,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn handle(&mut self, input: Input) -> Result<Vec<Effect>, Rejection> {
        match input {
            Input::Start { session_id, setup } => self.start(session_id, setup),
            Input::ConnectionChanged(state) => Ok(self.connection_changed(state)),
            Input::TransportOpened => Ok(self.opened()),
            Input::TransportClosed { .. } => Ok(Vec::new()),
            Input::Inbound(msg) => Ok(self.inbound(msg)),
            Input::Malformed(_) => Ok(vec![Effect::Transcript(TranscriptEntry::error(
                "Received an unreadable message from the interview service",
            ))]),
            Input::SubmitAnswer(text) => self.submit_answer(&text),
            Input::LiveTranscript { text, is_final } => Ok(self.live_transcript(text, is_final)),
            Input::Pause => self.pause(),
            Input::Resume => self.resume(),
            Input::End => self.end(),
            Input::RequestStatus => self.request_status(),
            Input::Tick => Ok(self.tick()),
        }
    }

    fn start(&mut self, session_id: SessionId, setup: InterviewSetup) -> Result<Vec<Effect>, Rejection> {
        // A connect that failed outright leaves the session in `connecting`; allow a retry.
        let failed_connect =
            self.state.phase == Phase::Connecting && self.state.connection == ConnectionState::Error;
        if !matches!(self.state.phase, Phase::Setup | Phase::Ended) && !failed_connect {
            return Err(self.invalid_phase("start"));
        }
        if setup.job_id.trim().is_empty() {
            return Err(Rejection::MissingField("job_id"));
        }
        if setup.candidate_id.trim().is_empty() {
            return Err(Rejection::MissingField("candidate_id"));
        }
        if setup.max_duration_secs == 0 {
            return Err(Rejection::InvalidDuration);
        }

        let url = render_session_url(&self.url_template, session_id.as_str());

        self.state = SessionState {
            session_id: Some(session_id),
            phase: Phase::Connecting,
            connection: ConnectionState::Connecting,
            max_duration_secs: setup.max_duration_secs,
            setup: Some(setup),
            ..SessionState::default()
        };
        self.pending_start = true;

        Ok(vec![
            Effect::PhaseChanged(Phase::Connecting),
            Effect::Connect { url },
        ])
    }

    fn connection_changed(&mut self, state: ConnectionState) -> Vec<Effect> {
        let previous = self.state.connection;
        self.state.connection = state;

        if state == ConnectionState::Error && previous != ConnectionState::Error && self.state.phase.is_live() {
            return vec![Effect::Transcript(TranscriptEntry::error(
                "Connection to the interview service failed",
            ))];
        }
        Vec::new()
    }

    fn opened(&mut self) -> Vec<Effect> {
        self.state.connection = ConnectionState::Connected;

        if self.pending_start && self.state.phase == Phase::Connecting {
            self.pending_start = false;
            if let Some(data) = self.start_payload() {
                return vec![Effect::Send(OutboundMessage::StartInterview(data))];
            }
        } else if matches!(self.state.phase, Phase::Active | Phase::Paused) {
            return vec![Effect::Transcript(TranscriptEntry::system(
                "Reconnected to the interview service",
            ))];
        }
        Vec::new()
    }

    fn start_payload(&self) -> Option<StartInterviewData> {
        let setup = self.state.setup.as_ref()?;
        Some(StartInterviewData {
            job_id: setup.job_id.clone(),
            candidate_id: setup.candidate_id.clone(),
            candidate_name: setup.candidate_name.clone(),
            resume_text: setup.resume_text.clone(),
            preferences: Preferences {
                max_duration: setup.max_duration_minutes(),
                difficulty_level: setup.difficulty_level.clone(),
                focus_areas: setup.focus_areas.clone(),
            },
        })
    }

    fn inbound(&mut self, msg: InboundMessage) -> Vec<Effect> {
        if !self.state.phase.is_live() {
            // Late frames after `ended` (or before `start`) carry no meaning.
            return Vec::new();
        }

        match msg {
            InboundMessage::InterviewStarted(data) => {
                let mut out = self.activate();
                if data.session_id.is_some() {
                    self.state.remote_session_id = data.session_id;
                }
                if data.job_title.is_some() {
                    self.state.job_title = data.job_title;
                }
                if data.company.is_some() {
                    self.state.company = data.company;
                }

                let banner = match (&self.state.job_title, &self.state.company) {
                    (Some(title), Some(company)) => format!("Interview started: {title} at {company}"),
                    (Some(title), None) => format!("Interview started: {title}"),
                    _ => "Interview started".to_string(),
                };
                out.push(Effect::Transcript(TranscriptEntry::system(banner)));

                // The opening question is not counted as an asked question.
                if let Some(q) = data.initial_question.filter(|q| !q.trim().is_empty()) {
                    out.extend(self.present_question(q, None));
                }
                out
            }
            InboundMessage::NewQuestion(data) => {
                let mut out = self.activate();
                self.state.questions_asked += 1;
                self.state.progress = data.progress.unwrap_or(0.0);
                self.state.time_remaining = data.time_remaining.unwrap_or(0.0);

                if data.question.trim().is_empty() {
                    // A blank question leaves nothing to answer.
                    self.state.current_question = None;
                    self.state.current_question_number = None;
                    return out;
                }
                let number = data.question_number.or(Some(self.state.questions_asked));
                out.extend(self.present_question(data.question, number));
                out
            }
            InboundMessage::AiResponse(data) => {
                let mut out = self.activate();
                if let Some(n) = data.questions_asked {
                    self.state.questions_asked = n;
                }
                let response = data.response.filter(|r| !r.trim().is_empty());
                if let Some(r) = &response {
                    out.push(Effect::Transcript(TranscriptEntry::ai(r.clone())));
                }

                if data.completed == Some(true) {
                    out.push(Effect::Transcript(TranscriptEntry::system(
                        "Interview completed",
                    )));
                    out.extend(self.finish(EndReason::Completed, None, response));
                    return out;
                }

                match data.question.filter(|q| !q.trim().is_empty()) {
                    Some(q) if response.as_deref() != Some(q.as_str()) => {
                        out.extend(self.present_question(q, data.questions_asked));
                    }
                    // The reply doubles as the next question.
                    Some(q) => {
                        self.state.current_question = Some(q);
                        self.state.current_question_number = data.questions_asked;
                        if self.state.phase == Phase::Active {
                            out.extend(response.map(Effect::Speak));
                        }
                    }
                    None => {}
                }
                out
            }
            InboundMessage::StatusUpdate(data) => {
                if let Some(p) = data.progress {
                    self.state.progress = p;
                }
                if let Some(t) = data.time_remaining {
                    self.state.time_remaining = t;
                }
                match data.message.filter(|m| !m.trim().is_empty()) {
                    Some(m) => vec![Effect::Transcript(TranscriptEntry::system(m))],
                    None => Vec::new(),
                }
            }
            InboundMessage::InterviewCompleted(data) => {
                let mut out = vec![Effect::Transcript(TranscriptEntry::system(
                    "Interview completed",
                ))];
                if let Some(fb) = data.final_feedback.as_ref().filter(|f| !f.trim().is_empty()) {
                    out.push(Effect::Transcript(TranscriptEntry::ai(fb.clone())));
                }
                out.extend(self.finish(
                    EndReason::Completed,
                    data.final_assessment,
                    data.final_feedback,
                ));
                out
            }
            InboundMessage::Error(data) => {
                let msg = if data.message.trim().is_empty() {
                    "The interview service reported an error".to_string()
                } else {
                    data.message
                };
                vec![Effect::Transcript(TranscriptEntry::error(msg))]
            }
            InboundMessage::InterviewPaused(_) => {
                vec![Effect::Transcript(TranscriptEntry::system("Interview paused"))]
            }
            InboundMessage::InterviewResumed(_) => {
                vec![Effect::Transcript(TranscriptEntry::system("Interview resumed"))]
            }
            InboundMessage::Pong(_) | InboundMessage::LiveTranscriptUpdate(_) => Vec::new(),
        }
    }

    fn activate(&mut self) -> Vec<Effect> {
        if self.state.phase != Phase::Connecting {
            return Vec::new();
        }
        self.state.phase = Phase::Active;
        vec![Effect::PhaseChanged(Phase::Active), Effect::ArmTimer]
    }

    fn present_question(&mut self, question: String, number: Option<u32>) -> Vec<Effect> {
        self.state.current_question = Some(question.clone());
        self.state.current_question_number = number;

        let mut out = vec![Effect::Transcript(
            TranscriptEntry::ai(question.clone()).with_question_number(number),
        )];
        if self.state.phase == Phase::Active {
            out.push(Effect::Speak(question));
        }
        out
    }

    fn submit_answer(&mut self, text: &str) -> Result<Vec<Effect>, Rejection> {
        if self.state.phase != Phase::Active {
            return Err(self.invalid_phase("answer"));
        }
        if self.state.current_question.is_none() {
            return Err(Rejection::NoActiveQuestion);
        }
        let answer = normalize_answer(text);
        if answer.is_empty() {
            return Err(Rejection::EmptyAnswer);
        }
        if self.state.connection != ConnectionState::Connected {
            return Err(Rejection::NotConnected);
        }

        self.state.current_question = None;
        let number = self.state.current_question_number.take();

        Ok(vec![
            Effect::Send(OutboundMessage::candidate_response(answer.clone())),
            Effect::Transcript(TranscriptEntry::candidate(answer).with_question_number(number)),
        ])
    }

    fn live_transcript(&self, text: String, is_final: bool) -> Vec<Effect> {
        if self.state.phase != Phase::Active
            || self.state.connection != ConnectionState::Connected
            || text.trim().is_empty()
        {
            return Vec::new();
        }
        vec![Effect::Send(OutboundMessage::live_transcript(text, is_final))]
    }

    fn pause(&mut self) -> Result<Vec<Effect>, Rejection> {
        if self.state.phase != Phase::Active {
            return Err(self.invalid_phase("pause"));
        }
        self.state.phase = Phase::Paused;

        let mut out = Vec::new();
        if self.is_connected() {
            out.push(Effect::Send(OutboundMessage::PauseInterview(Empty {})));
        }
        out.extend([
            Effect::SuspendTimer,
            Effect::StopAudio,
            Effect::PhaseChanged(Phase::Paused),
        ]);
        Ok(out)
    }

    fn resume(&mut self) -> Result<Vec<Effect>, Rejection> {
        if self.state.phase != Phase::Paused {
            return Err(self.invalid_phase("resume"));
        }
        self.state.phase = Phase::Active;

        let mut out = Vec::new();
        if self.is_connected() {
            out.push(Effect::Send(OutboundMessage::ResumeInterview(Empty {})));
        }
        out.extend([Effect::ArmTimer, Effect::PhaseChanged(Phase::Active)]);
        Ok(out)
    }

    fn end(&mut self) -> Result<Vec<Effect>, Rejection> {
        if !self.state.phase.is_live() {
            return Err(self.invalid_phase("end"));
        }
        let mut out = Vec::new();
        if self.is_connected() {
            out.push(Effect::Send(OutboundMessage::EndInterview(Empty {})));
        }
        out.push(Effect::Transcript(TranscriptEntry::system(
            "Interview ended by candidate",
        )));
        out.extend(self.finish(EndReason::EndedByCandidate, None, None));
        Ok(out)
    }

    fn request_status(&mut self) -> Result<Vec<Effect>, Rejection> {
        if !self.state.phase.is_live() {
            return Err(self.invalid_phase("request status"));
        }
        if !self.is_connected() {
            return Err(Rejection::NotConnected);
        }
        Ok(vec![Effect::Send(OutboundMessage::GetStatus(Empty {}))])
    }

    fn tick(&mut self) -> Vec<Effect> {
        if self.state.phase != Phase::Active {
            return Vec::new();
        }
        self.state.elapsed_secs += 1;
        if self.state.elapsed_secs < self.state.max_duration_secs {
            return Vec::new();
        }

        let mut out = Vec::new();
        if self.is_connected() {
            out.push(Effect::Send(OutboundMessage::EndInterview(Empty {})));
        }
        out.push(Effect::Transcript(TranscriptEntry::system(
            "Time limit reached",
        )));
        out.extend(self.finish(EndReason::TimeLimit, None, None));
        out
    }

    fn finish(
        &mut self,
        reason: EndReason,
        final_assessment: Option<serde_json::Value>,
        final_feedback: Option<String>,
    ) -> Vec<Effect> {
        self.state.phase = Phase::Ended;
        self.state.current_question = None;
        self.state.current_question_number = None;
        self.pending_start = false;

        vec![
            Effect::StopAudio,
            Effect::SuspendTimer,
            Effect::Disconnect,
            Effect::PhaseChanged(Phase::Ended),
            Effect::Finished {
                reason,
                final_assessment,
                final_feedback,
            },
        ]
    }

    fn is_connected(&self) -> bool {
        self.state.connection == ConnectionState::Connected
    }

    fn invalid_phase(&self, action: &'static str) -> Rejection {
        Rejection::InvalidPhase {
            action,
            phase: self.state.phase.label(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intervue_core::protocol::{
        AiResponseData, ErrorData, InterviewCompletedData, InterviewStartedData, NewQuestionData,
    };
    use intervue_core::TranscriptKind;

    fn setup() -> InterviewSetup {
        InterviewSetup::new("j1", "c1", "Ada")
    }

    fn question(text: &str, number: u32) -> Input {
        Input::Inbound(InboundMessage::NewQuestion(NewQuestionData {
            question: text.into(),
            question_number: Some(number),
            progress: Some(10.0),
            time_remaining: Some(25.0),
            question_type: None,
        }))
    }

    fn sends(effects: &[Effect]) -> Vec<&OutboundMessage> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    fn connected_machine(max_secs: u64) -> SessionMachine {
        let mut m = SessionMachine::new("ws://localhost:8000/ws/interview/{session_id}");
        m.handle(Input::Start {
            session_id: SessionId::new("s1"),
            setup: setup().with_max_duration_secs(max_secs),
        })
        .unwrap();
        m.handle(Input::ConnectionChanged(ConnectionState::Connected)).unwrap();
        m.handle(Input::TransportOpened).unwrap();
        m
    }

    fn active_machine(max_secs: u64) -> SessionMachine {
        let mut m = connected_machine(max_secs);
        m.handle(Input::Inbound(InboundMessage::InterviewStarted(
            InterviewStartedData::default(),
        )))
        .unwrap();
        m
    }

    #[test]
    fn start_connects_and_sends_start_on_first_open_only() {
        let mut m = SessionMachine::new("ws://h/ws/interview/{session_id}");
        let fx = m
            .handle(Input::Start {
                session_id: SessionId::new("s1"),
                setup: setup(),
            })
            .unwrap();
        assert_eq!(m.phase(), Phase::Connecting);
        assert!(fx.contains(&Effect::Connect {
            url: "ws://h/ws/interview/s1".into()
        }));

        let fx = m.handle(Input::TransportOpened).unwrap();
        let sent = sends(&fx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind(), "start_interview");

        // A reconnect before the service answered must not restart the interview.
        let fx = m.handle(Input::TransportOpened).unwrap();
        assert!(sends(&fx).is_empty());
    }

    #[test]
    fn start_is_retryable_after_refused_connect() {
        let mut m = SessionMachine::new("ws://h/{session_id}");
        m.handle(Input::Start {
            session_id: SessionId::new("s1"),
            setup: setup(),
        })
        .unwrap();

        // Still dialing: a second start is refused.
        assert!(matches!(
            m.handle(Input::Start {
                session_id: SessionId::new("s2"),
                setup: setup(),
            }),
            Err(Rejection::InvalidPhase { action: "start", .. })
        ));

        m.handle(Input::ConnectionChanged(ConnectionState::Error)).unwrap();
        assert_eq!(m.phase(), Phase::Connecting);

        let fx = m
            .handle(Input::Start {
                session_id: SessionId::new("s3"),
                setup: setup(),
            })
            .unwrap();
        assert!(fx.contains(&Effect::Connect {
            url: "ws://h/s3".into()
        }));
        assert_eq!(m.state().connection, ConnectionState::Connecting);

        let fx = m.handle(Input::TransportOpened).unwrap();
        assert_eq!(sends(&fx)[0].kind(), "start_interview");
    }

    #[test]
    fn start_requires_identifiers() {
        let mut m = SessionMachine::new("ws://h/{session_id}");
        let err = m
            .handle(Input::Start {
                session_id: SessionId::new("s"),
                setup: InterviewSetup::new(" ", "c1", "Ada"),
            })
            .unwrap_err();
        assert_eq!(err, Rejection::MissingField("job_id"));

        let err = m
            .handle(Input::Start {
                session_id: SessionId::new("s"),
                setup: InterviewSetup::new("j1", "", "Ada"),
            })
            .unwrap_err();
        assert_eq!(err, Rejection::MissingField("candidate_id"));
        assert_eq!(m.phase(), Phase::Setup);
    }

    #[test]
    fn first_question_activates_and_is_spoken() {
        let mut m = connected_machine(1800);
        let fx = m.handle(question("Tell me about yourself", 1)).unwrap();

        assert_eq!(m.phase(), Phase::Active);
        assert_eq!(m.state().questions_asked, 1);
        assert_eq!(
            m.state().current_question.as_deref(),
            Some("Tell me about yourself")
        );
        assert!(fx.contains(&Effect::ArmTimer));
        assert!(fx.contains(&Effect::Speak("Tell me about yourself".into())));
    }

    #[test]
    fn questions_asked_counts_new_question_messages() {
        let mut m = active_machine(1800);
        for (i, q) in ["one", "two", "three"].iter().enumerate() {
            m.handle(question(q, i as u32 + 1)).unwrap();
        }
        assert_eq!(m.state().questions_asked, 3);
        assert_eq!(m.state().current_question.as_deref(), Some("three"));
        assert_eq!(m.state().progress, 10.0);
    }

    #[test]
    fn initial_question_is_presented_but_not_counted() {
        let mut m = connected_machine(1800);
        let fx = m
            .handle(Input::Inbound(InboundMessage::InterviewStarted(
                InterviewStartedData {
                    job_title: Some("Backend Engineer".into()),
                    initial_question: Some("Introduce yourself".into()),
                    ..Default::default()
                },
            )))
            .unwrap();
        assert_eq!(m.phase(), Phase::Active);
        assert_eq!(m.state().questions_asked, 0);
        assert_eq!(
            m.state().current_question.as_deref(),
            Some("Introduce yourself")
        );
        assert!(fx.contains(&Effect::Speak("Introduce yourself".into())));
    }

    #[test]
    fn answer_is_sent_and_clears_current_question() {
        let mut m = active_machine(1800);
        m.handle(question("Tell me about yourself", 1)).unwrap();

        let fx = m.handle(Input::SubmitAnswer("  I build\nAPIs ".into())).unwrap();
        assert_eq!(
            sends(&fx),
            vec![&OutboundMessage::candidate_response("I build APIs")]
        );
        let entry = fx
            .iter()
            .find_map(|e| match e {
                Effect::Transcript(t) => Some(t),
                _ => None,
            })
            .unwrap();
        assert_eq!(entry.kind, TranscriptKind::Candidate);
        assert_eq!(entry.question_number, Some(1));
        assert!(m.state().current_question.is_none());
    }

    #[test]
    fn answer_rejections_produce_no_effects() {
        let mut m = active_machine(1800);
        assert_eq!(
            m.handle(Input::SubmitAnswer("hello".into())).unwrap_err(),
            Rejection::NoActiveQuestion
        );

        m.handle(question("Q", 1)).unwrap();
        assert_eq!(
            m.handle(Input::SubmitAnswer(" \n ".into())).unwrap_err(),
            Rejection::EmptyAnswer
        );

        m.handle(Input::ConnectionChanged(ConnectionState::Connecting)).unwrap();
        assert_eq!(
            m.handle(Input::SubmitAnswer("hello".into())).unwrap_err(),
            Rejection::NotConnected
        );
        assert_eq!(m.state().current_question.as_deref(), Some("Q"));
    }

    #[test]
    fn blank_question_supersedes_the_previous_one() {
        let mut m = active_machine(1800);
        m.handle(question("Q1", 1)).unwrap();

        let fx = m.handle(question("", 2)).unwrap();
        assert!(fx.is_empty());
        assert_eq!(m.state().questions_asked, 2);
        assert!(m.state().current_question.is_none());
        assert!(m.state().current_question_number.is_none());

        assert_eq!(
            m.handle(Input::SubmitAnswer("answer meant for #2".into())).unwrap_err(),
            Rejection::NoActiveQuestion
        );
    }

    fn ai_response(data: AiResponseData) -> Input {
        Input::Inbound(InboundMessage::AiResponse(data))
    }

    #[test]
    fn ai_response_records_reply_and_presents_next_question() {
        let mut m = active_machine(1800);
        m.handle(question("Q1", 1)).unwrap();
        m.handle(Input::SubmitAnswer("my answer".into())).unwrap();

        let fx = m
            .handle(ai_response(AiResponseData {
                response: Some("Nice, thanks.".into()),
                question: Some("How do you test it?".into()),
                questions_asked: Some(2),
                time_elapsed: Some(3.0),
                completed: Some(false),
                ..Default::default()
            }))
            .unwrap();

        let ai_texts: Vec<&str> = fx
            .iter()
            .filter_map(|e| match e {
                Effect::Transcript(t) if t.kind == TranscriptKind::Ai => Some(t.content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(ai_texts, vec!["Nice, thanks.", "How do you test it?"]);
        assert!(fx.contains(&Effect::Speak("How do you test it?".into())));
        assert_eq!(m.state().questions_asked, 2);
        assert_eq!(
            m.state().current_question.as_deref(),
            Some("How do you test it?")
        );
        assert_eq!(m.state().current_question_number, Some(2));
        assert_eq!(m.phase(), Phase::Active);

        let fx = m.handle(Input::SubmitAnswer("unit tests".into())).unwrap();
        assert_eq!(
            sends(&fx),
            vec![&OutboundMessage::candidate_response("unit tests")]
        );
    }

    #[test]
    fn completed_ai_response_ends_with_feedback() {
        let mut m = active_machine(1800);
        let fx = m
            .handle(ai_response(AiResponseData {
                response: Some("That wraps it up.".into()),
                question: Some("ignored".into()),
                completed: Some(true),
                ..Default::default()
            }))
            .unwrap();

        assert_eq!(m.phase(), Phase::Ended);
        assert!(m.state().current_question.is_none());
        assert!(!fx.iter().any(|e| matches!(e, Effect::Speak(_))));
        assert!(fx.contains(&Effect::Disconnect));
        assert!(fx.contains(&Effect::Finished {
            reason: EndReason::Completed,
            final_assessment: None,
            final_feedback: Some("That wraps it up.".into()),
        }));
    }

    #[test]
    fn pause_and_resume_toggle_timer_and_notify_service() {
        let mut m = active_machine(1800);
        let fx = m.handle(Input::Pause).unwrap();
        assert_eq!(m.phase(), Phase::Paused);
        assert_eq!(sends(&fx)[0].kind(), "pause_interview");
        assert!(fx.contains(&Effect::SuspendTimer));

        // Paused time does not count.
        m.handle(Input::Tick).unwrap();
        assert_eq!(m.state().elapsed_secs, 0);

        // Questions received while paused are recorded, not spoken.
        let fx = m.handle(question("Q2", 2)).unwrap();
        assert!(!fx.iter().any(|e| matches!(e, Effect::Speak(_))));
        assert_eq!(m.state().questions_asked, 1);

        let fx = m.handle(Input::Resume).unwrap();
        assert_eq!(m.phase(), Phase::Active);
        assert_eq!(sends(&fx)[0].kind(), "resume_interview");
        assert!(fx.contains(&Effect::ArmTimer));

        assert!(matches!(
            m.handle(Input::Resume),
            Err(Rejection::InvalidPhase { action: "resume", .. })
        ));
    }

    #[test]
    fn budget_exhaustion_ends_at_max_duration() {
        let mut m = active_machine(5);
        for _ in 0..4 {
            assert!(m.handle(Input::Tick).unwrap().is_empty());
        }
        assert_eq!(m.phase(), Phase::Active);
        assert_eq!(m.state().elapsed_secs, 4);

        let fx = m.handle(Input::Tick).unwrap();
        assert_eq!(m.phase(), Phase::Ended);

        let send_at = fx.iter().position(|e| matches!(e, Effect::Send(OutboundMessage::EndInterview(_))));
        let disconnect_at = fx.iter().position(|e| *e == Effect::Disconnect);
        assert!(send_at.unwrap() < disconnect_at.unwrap());
        assert!(fx.iter().any(|e| matches!(
            e,
            Effect::Finished {
                reason: EndReason::TimeLimit,
                ..
            }
        )));
    }

    #[test]
    fn completion_ends_with_assessment() {
        let mut m = active_machine(1800);
        let fx = m
            .handle(Input::Inbound(InboundMessage::InterviewCompleted(
                InterviewCompletedData {
                    final_assessment: Some(serde_json::json!({"score": 7})),
                    completed: Some(true),
                    ..Default::default()
                },
            )))
            .unwrap();
        assert_eq!(m.phase(), Phase::Ended);
        assert!(fx.contains(&Effect::Disconnect));
        assert!(fx.contains(&Effect::Finished {
            reason: EndReason::Completed,
            final_assessment: Some(serde_json::json!({"score": 7})),
            final_feedback: None,
        }));

        // Ended is terminal.
        assert!(m.handle(question("late", 9)).unwrap().is_empty());
        assert!(m.handle(Input::End).is_err());
    }

    #[test]
    fn end_from_connecting_ends_locally_without_sending() {
        let mut m = SessionMachine::new("ws://h/{session_id}");
        m.handle(Input::Start {
            session_id: SessionId::new("s"),
            setup: setup(),
        })
        .unwrap();
        let fx = m.handle(Input::End).unwrap();
        assert!(sends(&fx).is_empty());
        assert_eq!(m.phase(), Phase::Ended);
    }

    #[test]
    fn inbound_error_keeps_phase() {
        let mut m = active_machine(1800);
        let fx = m
            .handle(Input::Inbound(InboundMessage::Error(ErrorData {
                message: "bad".into(),
                ..Default::default()
            })))
            .unwrap();
        assert_eq!(m.phase(), Phase::Active);
        assert!(matches!(
            &fx[..],
            [Effect::Transcript(TranscriptEntry { kind: TranscriptKind::Error, .. })]
        ));
    }

    #[test]
    fn terminal_connection_error_is_reported_once() {
        let mut m = active_machine(1800);
        let fx = m.handle(Input::ConnectionChanged(ConnectionState::Error)).unwrap();
        assert_eq!(fx.len(), 1);
        assert!(m.handle(Input::ConnectionChanged(ConnectionState::Error)).unwrap().is_empty());
        assert_eq!(m.phase(), Phase::Active);
    }

    #[test]
    fn live_transcript_forwarded_only_while_active_and_connected() {
        let mut m = active_machine(1800);
        let fx = m
            .handle(Input::LiveTranscript {
                text: "I build".into(),
                is_final: false,
            })
            .unwrap();
        assert_eq!(sends(&fx), vec![&OutboundMessage::live_transcript("I build", false)]);

        m.handle(Input::Pause).unwrap();
        assert!(m
            .handle(Input::LiveTranscript {
                text: "x".into(),
                is_final: true,
            })
            .unwrap()
            .is_empty());
    }
}
