use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use intervue_core::protocol::{
    InterviewCompletedData, InterviewStartedData, NewQuestionData,
};
use intervue_core::{
    ConnectionState, InboundMessage, InterviewSetup, OutboundMessage, Phase, TranscriptKind,
    TransportEvent,
};
use intervue_engine::engine::{Capabilities, EngineConfig, InterviewEngine, InterviewSession, SessionError};
use intervue_engine::machine::Rejection;
use intervue_engine::session::{EndReason, SessionEvent, SessionSnapshot};
use intervue_engine::traits::{
    AudioSource, CaptureError, CaptureFormat, InterviewTransport, Microphone, PlaybackError,
    SpeechSynthesizer, SpeechToText, SttEvent, TranscriptionStream, TransportFactory,
};
use tokio::sync::{broadcast, mpsc};

#[derive(Default)]
struct ServerInner {
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    state: ConnectionState,
    sent: Vec<OutboundMessage>,
    connects: Vec<String>,
    disconnects: usize,
}

/// Stands in for the interview service and the socket to it.
#[derive(Clone, Default)]
struct TestServer(Arc<Mutex<ServerInner>>);

impl TestServer {
    fn emit(&self, ev: TransportEvent) {
        let inner = self.0.lock().unwrap();
        if let Some(tx) = inner.events.as_ref() {
            let _ = tx.send(ev);
        }
    }

    fn open(&self) {
        self.0.lock().unwrap().state = ConnectionState::Connected;
        self.emit(TransportEvent::StateChanged(ConnectionState::Connected));
        self.emit(TransportEvent::Opened);
    }

    /// The socket drops without a normal close, as a network blip would.
    fn drop_connection(&self) {
        self.0.lock().unwrap().state = ConnectionState::Disconnected;
        self.emit(TransportEvent::StateChanged(ConnectionState::Disconnected));
        self.emit(TransportEvent::Closed {
            code: 1006,
            reason: String::new(),
        });
    }

    fn push(&self, msg: InboundMessage) {
        self.emit(TransportEvent::Message(msg));
    }

    fn sent(&self) -> Vec<OutboundMessage> {
        self.0.lock().unwrap().sent.clone()
    }

    fn sent_kinds(&self) -> Vec<&'static str> {
        self.sent().iter().map(|m| m.kind()).collect()
    }

    fn disconnects(&self) -> usize {
        self.0.lock().unwrap().disconnects
    }
}

struct TestTransport(TestServer);

impl InterviewTransport for TestTransport {
    fn connect(&mut self, url: &str) {
        let mut inner = self.0.0.lock().unwrap();
        inner.connects.push(url.to_string());
        if matches!(inner.state, ConnectionState::Connecting | ConnectionState::Connected) {
            return;
        }
        inner.state = ConnectionState::Connecting;
        if let Some(tx) = inner.events.as_ref() {
            let _ = tx.send(TransportEvent::StateChanged(ConnectionState::Connecting));
        }
    }

    fn send(&mut self, msg: &OutboundMessage) -> bool {
        let mut inner = self.0.0.lock().unwrap();
        if inner.state != ConnectionState::Connected {
            return false;
        }
        inner.sent.push(msg.clone());
        true
    }

    fn disconnect(&mut self) {
        let mut inner = self.0.0.lock().unwrap();
        if inner.state == ConnectionState::Disconnected {
            return;
        }
        inner.state = ConnectionState::Disconnected;
        inner.disconnects += 1;
        if let Some(tx) = inner.events.as_ref() {
            let _ = tx.send(TransportEvent::StateChanged(ConnectionState::Disconnected));
        }
    }

    fn state(&self) -> ConnectionState {
        self.0.0.lock().unwrap().state
    }
}

impl TransportFactory for TestServer {
    fn create(&self, events: mpsc::UnboundedSender<TransportEvent>) -> Box<dyn InterviewTransport> {
        self.0.lock().unwrap().events = Some(events);
        Box::new(TestTransport(self.clone()))
    }
}

/// Records what it was asked to say and keeps "speaking" until interrupted.
#[derive(Clone, Default)]
struct TestVoice(Arc<Mutex<Vec<String>>>);

#[async_trait]
impl SpeechSynthesizer for TestVoice {
    async fn speak(&self, text: &str) -> Result<(), PlaybackError> {
        self.0.lock().unwrap().push(text.to_string());
        futures_util::future::pending::<()>().await;
        Ok(())
    }
}

struct SilentSource;

#[async_trait]
impl AudioSource for SilentSource {
    async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        futures_util::future::pending::<()>().await;
        None
    }
}

struct TestMic {
    deny: bool,
}

#[async_trait]
impl Microphone for TestMic {
    async fn acquire(&self, _format: &CaptureFormat) -> Result<Box<dyn AudioSource>, CaptureError> {
        if self.deny {
            Err(CaptureError::PermissionDenied)
        } else {
            Ok(Box::new(SilentSource))
        }
    }
}

#[derive(Clone, Default)]
struct TestStt {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<SttEvent>>>>,
    connects: Arc<AtomicUsize>,
}

impl TestStt {
    fn say(&self, ev: SttEvent) {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            let _ = tx.send(ev);
        }
    }
}

struct TestStream(mpsc::UnboundedReceiver<SttEvent>);

#[async_trait]
impl TranscriptionStream for TestStream {
    fn send_audio(&mut self, _pcm: Vec<u8>) -> bool {
        true
    }

    async fn next_event(&mut self) -> Option<SttEvent> {
        self.0.recv().await
    }
}

#[async_trait]
impl SpeechToText for TestStt {
    async fn connect(&self, _sample_rate_hz: u32) -> anyhow::Result<Box<dyn TranscriptionStream>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.tx.lock().unwrap() = Some(tx);
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TestStream(rx)))
    }
}

struct Harness {
    session: InterviewSession,
    events: broadcast::Receiver<SessionEvent>,
    server: TestServer,
    voice: TestVoice,
    stt: TestStt,
}

fn harness(deny_mic: bool) -> Harness {
    let server = TestServer::default();
    let voice = TestVoice::default();
    let stt = TestStt::default();

    let session = InterviewEngine::new(
        EngineConfig {
            url_template: "ws://localhost:8000/ws/interview/{session_id}".into(),
            capture: CaptureFormat::default(),
        },
        Capabilities {
            transport: Arc::new(server.clone()),
            synthesizer: Arc::new(voice.clone()),
            microphone: Arc::new(TestMic { deny: deny_mic }),
            speech_to_text: Arc::new(stt.clone()),
        },
    )
    .spawn();
    let events = session.subscribe();

    Harness {
        session,
        events,
        server,
        voice,
        stt,
    }
}

async fn wait_until(session: &InterviewSession, f: impl Fn(&SessionSnapshot) -> bool) -> SessionSnapshot {
    let mut rx = session.watch();
    let snap = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| f(s)))
        .await
        .expect("timed out waiting for session state")
        .expect("session closed")
        .clone();
    snap
}

async fn next_event(
    events: &mut broadcast::Receiver<SessionEvent>,
    f: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let ev = events.recv().await.expect("event stream closed");
            if f(&ev) {
                return ev;
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = events.try_recv() {
        out.push(ev);
    }
    out
}

fn new_question(text: &str, number: u32) -> InboundMessage {
    InboundMessage::NewQuestion(NewQuestionData {
        question: text.into(),
        question_number: Some(number),
        progress: Some(20.0),
        time_remaining: Some(25.0),
        question_type: Some("behavioral".into()),
    })
}

/// Drives a session to `active` with one question asked.
async fn active_with_question(h: &mut Harness) {
    h.session
        .start(InterviewSetup::new("j1", "c1", "Ada"))
        .await
        .unwrap();
    h.server.open();
    h.server
        .push(InboundMessage::InterviewStarted(InterviewStartedData::default()));
    h.server.push(new_question("Tell me about yourself", 1));
    wait_until(&h.session, |s| s.questions_asked == 1 && s.speaking).await;
}

#[tokio::test]
async fn start_to_first_question_scenario() {
    let mut h = harness(false);

    let id = h
        .session
        .start(InterviewSetup::new("j1", "c1", "Ada"))
        .await
        .unwrap();
    assert!(id.as_str().starts_with("interview_"));
    assert_eq!(
        h.server.0.lock().unwrap().connects,
        vec![format!("ws://localhost:8000/ws/interview/{id}")]
    );
    assert_eq!(h.session.snapshot().phase, Phase::Connecting);

    h.server.open();
    h.server.push(InboundMessage::InterviewStarted(InterviewStartedData {
        job_title: Some("Backend Engineer".into()),
        ..Default::default()
    }));
    h.server.push(new_question("Tell me about yourself", 1));

    let snap = wait_until(&h.session, |s| s.questions_asked == 1 && s.speaking).await;
    assert_eq!(snap.phase, Phase::Active);
    assert_eq!(snap.current_question.as_deref(), Some("Tell me about yourself"));
    assert_eq!(snap.job_title.as_deref(), Some("Backend Engineer"));

    let sent = h.server.sent();
    let OutboundMessage::StartInterview(data) = &sent[0] else {
        panic!("expected start_interview first, got {:?}", sent[0]);
    };
    assert_eq!(data.job_id, "j1");
    assert_eq!(data.candidate_id, "c1");
    assert_eq!(data.candidate_name, "Ada");
    assert_eq!(data.preferences.max_duration, 30);

    assert_eq!(h.voice.0.lock().unwrap().as_slice(), ["Tell me about yourself"]);
    next_event(&mut h.events, |e| matches!(e, SessionEvent::SpeakingStarted { .. })).await;
}

#[tokio::test]
async fn typed_answer_is_sent_and_clears_question() {
    let mut h = harness(false);
    active_with_question(&mut h).await;

    h.session.submit_answer("I build APIs").await.unwrap();

    assert_eq!(
        h.server.sent().last(),
        Some(&OutboundMessage::candidate_response("I build APIs"))
    );
    assert!(h.session.snapshot().current_question.is_none());

    let ev = next_event(&mut h.events, |e| {
        matches!(e, SessionEvent::Transcript(t) if t.kind == TranscriptKind::Candidate)
    })
    .await;
    let SessionEvent::Transcript(entry) = ev else {
        unreachable!()
    };
    assert_eq!(entry.content, "I build APIs");
    assert_eq!(entry.question_number, Some(1));
}

#[tokio::test]
async fn answer_without_question_is_rejected_and_nothing_is_sent() {
    let mut h = harness(false);
    active_with_question(&mut h).await;
    h.session.submit_answer("first").await.unwrap();
    drain(&mut h.events);

    let err = h.session.submit_answer("second").await.unwrap_err();
    assert!(matches!(err, SessionError::Rejected(Rejection::NoActiveQuestion)));

    let responses = h
        .server
        .sent_kinds()
        .into_iter()
        .filter(|k| *k == "candidate_response")
        .count();
    assert_eq!(responses, 1);
    assert!(
        !drain(&mut h.events)
            .iter()
            .any(|e| matches!(e, SessionEvent::Transcript(_)))
    );
}

#[tokio::test]
async fn capture_interrupts_playback_and_final_transcript_becomes_answer() {
    let mut h = harness(false);
    active_with_question(&mut h).await;
    drain(&mut h.events);

    assert!(h.session.toggle_capture().await.unwrap());
    wait_until(&h.session, |s| s.listening && !s.speaking).await;

    let seen = drain(&mut h.events);
    let ended_at = seen
        .iter()
        .position(|e| matches!(e, SessionEvent::SpeakingEnded { utterance: 1 }))
        .expect("playback ended");
    let listening_at = seen
        .iter()
        .position(|e| *e == SessionEvent::ListeningChanged(true))
        .expect("listening");
    assert!(ended_at < listening_at);

    h.stt.say(SttEvent::Partial("I build".into()));
    h.stt.say(SttEvent::Final("I build APIs".into()));
    next_event(&mut h.events, |e| {
        matches!(e, SessionEvent::Transcript(t) if t.kind == TranscriptKind::Candidate)
    })
    .await;

    let sent = h.server.sent();
    assert!(sent.contains(&OutboundMessage::live_transcript("I build", false)));
    assert_eq!(
        sent.last(),
        Some(&OutboundMessage::candidate_response("I build APIs"))
    );
    assert_eq!(h.stt.connects.load(Ordering::SeqCst), 1);

    // The interrupted utterance reported its end exactly once.
    assert!(!h.session.toggle_capture().await.unwrap());
    let later = drain(&mut h.events);
    let extra_ends = later
        .iter()
        .filter(|e| matches!(e, SessionEvent::SpeakingEnded { utterance: 1 }))
        .count();
    assert_eq!(extra_ends, 0);
}

#[tokio::test]
async fn denied_microphone_disables_capture_for_the_session() {
    let mut h = harness(true);
    active_with_question(&mut h).await;

    assert!(h.session.toggle_capture().await.unwrap());
    let snap = wait_until(&h.session, |s| !s.capture_available).await;
    assert!(!snap.listening);

    next_event(&mut h.events, |e| {
        matches!(e, SessionEvent::Transcript(t) if t.kind == TranscriptKind::Error)
    })
    .await;

    let err = h.session.toggle_capture().await.unwrap_err();
    assert!(matches!(err, SessionError::CaptureUnavailable));
    assert_eq!(h.session.snapshot().phase, Phase::Active);
}

#[tokio::test]
async fn completion_hands_result_to_caller() {
    let mut h = harness(false);
    active_with_question(&mut h).await;
    h.session.submit_answer("I build APIs").await.unwrap();

    h.server.push(InboundMessage::InterviewCompleted(InterviewCompletedData {
        final_assessment: Some(serde_json::json!({"overall": 8})),
        completed: Some(true),
        ..Default::default()
    }));

    let ev = next_event(&mut h.events, |e| matches!(e, SessionEvent::Finished(_))).await;
    let SessionEvent::Finished(result) = ev else {
        unreachable!()
    };
    assert_eq!(result.reason, EndReason::Completed);
    assert_eq!(result.questions_asked, 1);
    assert_eq!(result.final_assessment, Some(serde_json::json!({"overall": 8})));
    assert!(result
        .transcript
        .iter()
        .any(|t| t.kind == TranscriptKind::Candidate && t.content == "I build APIs"));

    let snap = wait_until(&h.session, |s| s.phase == Phase::Ended).await;
    assert!(!snap.speaking);
    assert_eq!(h.server.disconnects(), 1);
}

#[tokio::test]
async fn candidate_end_notifies_service_then_disconnects() {
    let mut h = harness(false);
    active_with_question(&mut h).await;

    h.session.end().await.unwrap();
    assert_eq!(h.server.sent_kinds().last(), Some(&"end_interview"));
    assert_eq!(h.server.disconnects(), 1);

    let ev = next_event(&mut h.events, |e| matches!(e, SessionEvent::Finished(_))).await;
    assert!(matches!(
        ev,
        SessionEvent::Finished(r) if r.reason == EndReason::EndedByCandidate
    ));

    assert!(h.session.end().await.is_err());
}

#[tokio::test]
async fn malformed_frame_is_reported_without_ending_session() {
    let mut h = harness(false);
    active_with_question(&mut h).await;

    h.server.emit(TransportEvent::Malformed("{not json".into()));
    next_event(&mut h.events, |e| {
        matches!(e, SessionEvent::Transcript(t) if t.kind == TranscriptKind::Error)
    })
    .await;
    assert_eq!(h.session.snapshot().phase, Phase::Active);
}

#[tokio::test]
async fn status_request_requires_connection() {
    let h = harness(false);
    let err = h.session.request_status().await.unwrap_err();
    assert!(matches!(err, SessionError::Rejected(Rejection::InvalidPhase { .. })));

    h.session
        .start(InterviewSetup::new("j1", "c1", "Ada"))
        .await
        .unwrap();
    let err = h.session.request_status().await.unwrap_err();
    assert!(matches!(err, SessionError::Rejected(Rejection::NotConnected)));

    h.server.open();
    wait_until(&h.session, |s| s.connection == ConnectionState::Connected).await;
    h.session.request_status().await.unwrap();
    assert_eq!(h.server.sent_kinds().last(), Some(&"get_status"));
}

#[tokio::test(start_paused = true)]
async fn session_budget_ends_interview_at_max_duration() {
    let mut h = harness(false);
    h.session
        .start(InterviewSetup::new("j1", "c1", "Ada").with_max_duration_secs(5))
        .await
        .unwrap();
    h.server.open();
    h.server.push(new_question("Q1", 1));
    wait_until(&h.session, |s| s.phase == Phase::Active).await;

    for expected in 1..=4 {
        tokio::time::advance(Duration::from_secs(1)).await;
        let s = wait_until(&h.session, |s| s.elapsed_secs == expected).await;
        assert_eq!(s.phase, Phase::Active);
    }

    tokio::time::advance(Duration::from_secs(1)).await;
    let s = wait_until(&h.session, |s| s.phase == Phase::Ended).await;
    assert_eq!(s.elapsed_secs, 5);
    assert!(h.server.sent_kinds().contains(&"end_interview"));

    let ev = next_event(&mut h.events, |e| matches!(e, SessionEvent::Finished(_))).await;
    assert!(matches!(
        ev,
        SessionEvent::Finished(r) if r.reason == EndReason::TimeLimit && r.elapsed_secs == 5
    ));
}

#[tokio::test(start_paused = true)]
async fn pause_freezes_clock_and_stops_audio_until_resume() {
    let h = harness(false);
    h.session
        .start(InterviewSetup::new("j1", "c1", "Ada").with_max_duration_secs(60))
        .await
        .unwrap();
    h.server.open();
    h.server.push(new_question("Q1", 1));
    wait_until(&h.session, |s| s.phase == Phase::Active && s.speaking).await;

    for expected in 1..=2 {
        tokio::time::advance(Duration::from_secs(1)).await;
        wait_until(&h.session, |s| s.elapsed_secs == expected).await;
    }

    h.session.pause().await.unwrap();
    let s = wait_until(&h.session, |s| s.phase == Phase::Paused && !s.speaking).await;
    assert_eq!(s.elapsed_secs, 2);
    assert_eq!(h.server.sent_kinds().last(), Some(&"pause_interview"));

    for _ in 0..3 {
        tokio::time::advance(Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        assert_eq!(h.session.snapshot().elapsed_secs, 2);
    }
    assert!(h.session.toggle_capture().await.is_err());

    h.session.resume().await.unwrap();
    assert_eq!(h.server.sent_kinds().last(), Some(&"resume_interview"));
    assert_eq!(h.session.snapshot().phase, Phase::Active);

    tokio::time::advance(Duration::from_secs(1)).await;
    wait_until(&h.session, |s| s.elapsed_secs == 3).await;

    assert!(h.session.toggle_capture().await.unwrap());
    wait_until(&h.session, |s| s.listening).await;

    h.session.pause().await.unwrap();
    wait_until(&h.session, |s| s.phase == Phase::Paused && !s.listening).await;
}

#[tokio::test]
async fn reconnect_while_active_keeps_the_interview_going() {
    let mut h = harness(false);
    active_with_question(&mut h).await;
    drain(&mut h.events);

    h.server.drop_connection();
    wait_until(&h.session, |s| s.connection == ConnectionState::Disconnected).await;
    let err = h.session.submit_answer("lost").await.unwrap_err();
    assert!(matches!(err, SessionError::Rejected(Rejection::NotConnected)));

    h.server.open();
    let ev = next_event(&mut h.events, |e| {
        matches!(e, SessionEvent::Transcript(t) if t.kind == TranscriptKind::System)
    })
    .await;
    let SessionEvent::Transcript(entry) = ev else {
        unreachable!()
    };
    assert!(entry.content.starts_with("Reconnected"));

    let snap = wait_until(&h.session, |s| s.connection == ConnectionState::Connected).await;
    assert_eq!(snap.phase, Phase::Active);
    assert_eq!(snap.current_question.as_deref(), Some("Tell me about yourself"));

    let starts = h
        .server
        .sent_kinds()
        .into_iter()
        .filter(|k| *k == "start_interview")
        .count();
    assert_eq!(starts, 1);

    h.session.submit_answer("I build APIs").await.unwrap();
    assert_eq!(
        h.server.sent().last(),
        Some(&OutboundMessage::candidate_response("I build APIs"))
    );
}

#[tokio::test]
async fn refused_connect_can_be_retried_with_a_fresh_session() {
    let h = harness(false);
    let first = h
        .session
        .start(InterviewSetup::new("j1", "c1", "Ada"))
        .await
        .unwrap();
    assert!(h.session.start(InterviewSetup::new("j1", "c1", "Ada")).await.is_err());

    {
        let mut inner = h.server.0.lock().unwrap();
        inner.state = ConnectionState::Error;
    }
    h.server.emit(TransportEvent::StateChanged(ConnectionState::Error));
    wait_until(&h.session, |s| s.connection == ConnectionState::Error).await;

    let second = h
        .session
        .start(InterviewSetup::new("j1", "c1", "Ada"))
        .await
        .unwrap();
    assert_ne!(first, second);
    assert_eq!(h.server.0.lock().unwrap().connects.len(), 2);

    h.server.open();
    h.server
        .push(InboundMessage::InterviewStarted(InterviewStartedData::default()));
    wait_until(&h.session, |s| s.phase == Phase::Active).await;
    assert_eq!(h.server.sent_kinds(), vec!["start_interview"]);
}

#[tokio::test]
async fn dropping_the_handle_tears_the_session_down() {
    let mut h = harness(false);
    active_with_question(&mut h).await;

    let server = h.server.clone();
    drop(h.session);

    tokio::time::timeout(Duration::from_secs(5), async {
        while server.disconnects() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("transport disconnected on drop");
}
