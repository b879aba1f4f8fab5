//! Session façade.
//!
//! [`InterviewEngine::spawn`] starts one actor task that owns the state
//! machine, the transport and both audio coordinators. Commands from the
//! [`InterviewSession`] handle, transport events, audio completions and timer
//! ticks are processed one at a time from a single `select!` loop.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future;
use intervue_core::{
    ConnectionState, InterviewSetup, Phase, SessionId, TranscriptEntry, TransportEvent,
    accept_final_transcript, preview_text,
};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, Interval};

use crate::capture::{CaptureCoordinator, CaptureNotice, CaptureUpdate};
use crate::machine::{Effect, Input, Rejection, SessionMachine};
use crate::playback::{PlaybackCoordinator, PlaybackDone, PlaybackNotice};
use crate::session::{InterviewResult, SessionEvent, SessionSnapshot};
use crate::traits::{
    CaptureError, CaptureFormat, InterviewTransport, Microphone, SpeechSynthesizer, SpeechToText,
    TransportFactory,
};

const TICK: Duration = Duration::from_secs(1);
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("voice capture is unavailable for this session")]
    CaptureUnavailable,

    #[error("interview session closed")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub url_template: String,
    pub capture: CaptureFormat,
}

#[derive(Clone)]
pub struct Capabilities {
    pub transport: Arc<dyn TransportFactory>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub microphone: Arc<dyn Microphone>,
    pub speech_to_text: Arc<dyn SpeechToText>,
}

pub struct InterviewEngine {
    cfg: EngineConfig,
    caps: Capabilities,
}

impl InterviewEngine {
    pub fn new(cfg: EngineConfig, caps: Capabilities) -> Self {
        Self { cfg, caps }
    }

    /// Must be called from within a Tokio runtime.
    pub fn spawn(self) -> InterviewSession {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(32);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot {
            capture_available: true,
            playback_available: true,
            ..SessionSnapshot::default()
        });
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();

        let actor = SessionActor {
            machine: SessionMachine::new(self.cfg.url_template.clone()),
            transport_factory: self.caps.transport,
            transport: None,
            transport_rx: None,
            playback: PlaybackCoordinator::new(self.caps.synthesizer, playback_tx),
            capture: CaptureCoordinator::new(
                self.caps.microphone,
                self.caps.speech_to_text,
                self.cfg.capture,
                capture_tx,
            ),
            transcript: Vec::new(),
            ticker: None,
            events: events_tx.clone(),
            snapshot: snapshot_tx,
        };

        tokio::spawn(actor.run(cmd_rx, playback_rx, capture_rx));

        InterviewSession {
            tx: cmd_tx,
            events: events_tx,
            snapshot: snapshot_rx,
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum Command {
    Start {
        setup: InterviewSetup,
        reply: Reply<SessionId>,
    },
    SubmitAnswer {
        text: String,
        reply: Reply<()>,
    },
    ToggleCapture {
        reply: Reply<bool>,
    },
    Pause {
        reply: Reply<()>,
    },
    Resume {
        reply: Reply<()>,
    },
    End {
        reply: Reply<()>,
    },
    RequestStatus {
        reply: Reply<()>,
    },
}

/// Handle to a running session actor. Dropping it tears the session down.
pub struct InterviewSession {
    tx: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl InterviewSession {
    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn start(&self, setup: InterviewSetup) -> Result<SessionId, SessionError> {
        self.call(|reply| Command::Start { setup, reply }).await
    }

    pub async fn submit_answer(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let text = text.into();
        self.call(|reply| Command::SubmitAnswer { text, reply }).await
    }

    /// Starts capture when idle, stops it when running. Returns whether capture is now on.
    pub async fn toggle_capture(&self) -> Result<bool, SessionError> {
        self.call(|reply| Command::ToggleCapture { reply }).await
    }

    pub async fn pause(&self) -> Result<(), SessionError> {
        self.call(|reply| Command::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<(), SessionError> {
        self.call(|reply| Command::Resume { reply }).await
    }

    pub async fn end(&self) -> Result<(), SessionError> {
        self.call(|reply| Command::End { reply }).await
    }

    pub async fn request_status(&self) -> Result<(), SessionError> {
        self.call(|reply| Command::RequestStatus { reply }).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }
}

struct SessionActor {
    machine: SessionMachine,

    transport_factory: Arc<dyn TransportFactory>,
    transport: Option<Box<dyn InterviewTransport>>,
    // One channel per transport, so a replaced socket cannot leak events into a new session.
    transport_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,

    playback: PlaybackCoordinator,
    capture: CaptureCoordinator,

    transcript: Vec<TranscriptEntry>,
    ticker: Option<Interval>,

    events: broadcast::Sender<SessionEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker.as_mut() {
        Some(t) => {
            t.tick().await;
        }
        None => future::pending::<()>().await,
    }
}

async fn next_transport_event(
    rx: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}

impl SessionActor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut playback_rx: mpsc::UnboundedReceiver<PlaybackDone>,
        mut capture_rx: mpsc::UnboundedReceiver<CaptureNotice>,
    ) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break; };
                    self.on_command(cmd);
                }
                ev = next_transport_event(&mut self.transport_rx) => {
                    match ev {
                        Some(ev) => self.on_transport(ev),
                        // The transport was dropped; wait for the next session's channel.
                        None => self.transport_rx = None,
                    }
                }
                Some(done) = playback_rx.recv() => {
                    let notices = self.playback.on_done(done);
                    self.emit_playback(notices);
                }
                Some(notice) = capture_rx.recv() => {
                    let updates = self.capture.on_notice(notice);
                    self.on_capture(updates);
                }
                _ = next_tick(&mut self.ticker) => {
                    self.input(Input::Tick);
                }
            }
            self.publish_snapshot();
        }

        self.teardown();
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start { setup, reply } => {
                let r = self.start(setup);
                self.respond(reply, r);
            }
            Command::SubmitAnswer { text, reply } => {
                let r = self.try_input(Input::SubmitAnswer(text));
                self.respond(reply, r);
            }
            Command::ToggleCapture { reply } => {
                let r = self.toggle_capture();
                self.respond(reply, r);
            }
            Command::Pause { reply } => {
                let r = self.try_input(Input::Pause);
                self.respond(reply, r);
            }
            Command::Resume { reply } => {
                let r = self.try_input(Input::Resume);
                self.respond(reply, r);
            }
            Command::End { reply } => {
                let r = self.try_input(Input::End);
                self.respond(reply, r);
            }
            Command::RequestStatus { reply } => {
                let r = self.try_input(Input::RequestStatus);
                self.respond(reply, r);
            }
        }
    }

    // Callers observe the post-command snapshot as soon as the reply resolves.
    fn respond<T>(&self, reply: Reply<T>, result: Result<T, SessionError>) {
        self.publish_snapshot();
        let _ = reply.send(result);
    }

    fn start(&mut self, setup: InterviewSetup) -> Result<SessionId, SessionError> {
        let session_id = SessionId::generate();

        // Validate before touching any resources of a previous session.
        let mut dry_run = self.machine.clone();
        dry_run.handle(Input::Start {
            session_id: session_id.clone(),
            setup: setup.clone(),
        })?;

        if let Some(mut old) = self.transport.take() {
            old.disconnect();
        }
        self.transport_rx = None;
        self.ticker = None;
        self.transcript.clear();
        let notices = self.playback.reset();
        self.emit_playback(notices);
        if let Some(u) = self.capture.reset() {
            self.on_capture(vec![u]);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.transport = Some(self.transport_factory.create(tx));
        self.transport_rx = Some(rx);

        log::info!(
            "session {session_id}: starting interview for job {} candidate {}",
            setup.job_id,
            setup.candidate_id
        );
        self.try_input(Input::Start {
            session_id: session_id.clone(),
            setup,
        })?;
        Ok(session_id)
    }

    fn toggle_capture(&mut self) -> Result<bool, SessionError> {
        if self.capture.is_running() {
            if let Some(u) = self.capture.stop() {
                self.on_capture(vec![u]);
            }
            return Ok(false);
        }

        let phase = self.machine.phase();
        if phase != Phase::Active {
            return Err(Rejection::InvalidPhase {
                action: "start voice capture",
                phase: phase.label(),
            }
            .into());
        }
        if !self.capture.is_available() {
            return Err(SessionError::CaptureUnavailable);
        }

        // The candidate is about to speak.
        if let Some(n) = self.playback.interrupt() {
            self.emit_playback(vec![n]);
        }
        self.capture.start();
        Ok(true)
    }

    fn on_transport(&mut self, ev: TransportEvent) {
        match ev {
            TransportEvent::StateChanged(state) => {
                log::info!("transport: {state:?}");
                self.emit(SessionEvent::ConnectionChanged(state));
                self.input(Input::ConnectionChanged(state));
            }
            TransportEvent::Opened => self.input(Input::TransportOpened),
            TransportEvent::Message(msg) => {
                log::debug!("inbound: {}", msg.kind());
                self.input(Input::Inbound(msg));
            }
            TransportEvent::Malformed(raw) => {
                log::warn!("inbound: malformed frame: {}", preview_text(&raw));
                self.input(Input::Malformed(raw));
            }
            TransportEvent::Closed { code, reason } => {
                log::info!("transport: closed with {code} {reason}");
                self.input(Input::TransportClosed { code, reason });
            }
            TransportEvent::Error(e) => log::warn!("transport: {e}"),
        }
    }

    fn on_capture(&mut self, updates: Vec<CaptureUpdate>) {
        for u in updates {
            match u {
                CaptureUpdate::ListeningChanged(on) => self.emit(SessionEvent::ListeningChanged(on)),
                CaptureUpdate::Transcript { text, is_final } => {
                    self.emit(SessionEvent::LiveTranscript {
                        text: text.clone(),
                        is_final,
                    });
                    self.input(Input::LiveTranscript {
                        text: text.clone(),
                        is_final,
                    });
                    if is_final {
                        if let Some(answer) = accept_final_transcript(&text) {
                            if let Err(e) = self.try_input(Input::SubmitAnswer(answer)) {
                                log::debug!("voice answer not submitted: {e}");
                            }
                        }
                    }
                }
                CaptureUpdate::Failed(error) => {
                    let msg = match &error {
                        CaptureError::PermissionDenied => {
                            "Microphone permission denied; voice answers are disabled".to_string()
                        }
                        CaptureError::DeviceUnavailable(d) => {
                            format!("Microphone unavailable ({d}); voice answers are disabled")
                        }
                        CaptureError::Transcription(d) => {
                            format!("Speech recognition stopped: {d}")
                        }
                    };
                    self.push_transcript(TranscriptEntry::error(msg));
                }
            }
        }
    }

    fn input(&mut self, input: Input) {
        if let Err(e) = self.try_input(input) {
            log::debug!("input rejected: {e}");
        }
    }

    fn try_input(&mut self, input: Input) -> Result<(), SessionError> {
        let effects = self.machine.handle(input)?;
        for effect in effects {
            self.apply(effect);
        }
        Ok(())
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Connect { url } => {
                log::info!("transport: connecting to {url}");
                if let Some(t) = self.transport.as_mut() {
                    t.connect(&url);
                }
            }
            Effect::Send(msg) => {
                let sent = self.transport.as_mut().is_some_and(|t| t.send(&msg));
                if !sent {
                    log::warn!("outbound: dropped {}", msg.kind());
                    self.push_transcript(TranscriptEntry::error(format!(
                        "Could not deliver {} to the interview service",
                        msg.kind()
                    )));
                }
            }
            Effect::Speak(text) => {
                let notices = self.playback.speak(&text);
                self.emit_playback(notices);
            }
            Effect::StopAudio => {
                if let Some(n) = self.playback.interrupt() {
                    self.emit_playback(vec![n]);
                }
                if let Some(u) = self.capture.stop() {
                    self.on_capture(vec![u]);
                }
            }
            Effect::ArmTimer => {
                self.ticker = Some(tokio::time::interval_at(Instant::now() + TICK, TICK));
            }
            Effect::SuspendTimer => self.ticker = None,
            Effect::Disconnect => {
                if let Some(t) = self.transport.as_mut() {
                    t.disconnect();
                }
            }
            Effect::Transcript(entry) => self.push_transcript(entry),
            Effect::PhaseChanged(phase) => {
                log::info!("session: phase {}", phase.label());
                self.emit(SessionEvent::PhaseChanged(phase));
            }
            Effect::Finished {
                reason,
                final_assessment,
                final_feedback,
            } => {
                let state = self.machine.state();
                let Some(session_id) = state.session_id.clone() else {
                    return;
                };
                let result = InterviewResult {
                    session_id,
                    reason,
                    final_assessment,
                    final_feedback,
                    questions_asked: state.questions_asked,
                    elapsed_secs: state.elapsed_secs,
                    transcript: self.transcript.clone(),
                };
                log::info!(
                    "session {}: finished ({reason:?}) after {}s, {} questions",
                    result.session_id,
                    result.elapsed_secs,
                    result.questions_asked
                );
                self.emit(SessionEvent::Finished(result));
            }
        }
    }

    fn emit_playback(&mut self, notices: Vec<PlaybackNotice>) {
        for n in notices {
            match n {
                PlaybackNotice::Started { utterance } => {
                    self.emit(SessionEvent::SpeakingStarted { utterance })
                }
                PlaybackNotice::Ended { utterance } => {
                    self.emit(SessionEvent::SpeakingEnded { utterance })
                }
                PlaybackNotice::Failed { utterance, error } => {
                    log::warn!("playback: utterance {utterance} failed: {error}");
                }
                PlaybackNotice::Disabled => self.push_transcript(TranscriptEntry::error(
                    "Speech playback is not supported; questions will be shown as text only",
                )),
            }
        }
    }

    fn push_transcript(&mut self, entry: TranscriptEntry) {
        self.transcript.push(entry.clone());
        self.emit(SessionEvent::Transcript(entry));
    }

    fn emit(&self, ev: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(ev);
    }

    fn publish_snapshot(&self) {
        let s = self.machine.state();
        let connection = self
            .transport
            .as_ref()
            .map(|t| t.state())
            .unwrap_or(ConnectionState::Disconnected);

        let next = SessionSnapshot {
            session_id: s.session_id.clone(),
            phase: s.phase,
            connection,
            questions_asked: s.questions_asked,
            current_question: s.current_question.clone(),
            elapsed_secs: s.elapsed_secs,
            max_duration_secs: s.max_duration_secs,
            progress: s.progress,
            time_remaining: s.time_remaining,
            job_title: s.job_title.clone(),
            company: s.company.clone(),
            listening: self.capture.is_listening(),
            live_transcript: self.capture.live_transcript().to_string(),
            speaking: self.playback.is_speaking(),
            capture_available: self.capture.is_available(),
            playback_available: self.playback.is_available(),
        };
        self.snapshot.send_if_modified(|cur| {
            if *cur == next {
                false
            } else {
                *cur = next;
                true
            }
        });
    }

    fn teardown(&mut self) {
        log::info!("session: tearing down");
        self.ticker = None;
        if let Some(mut t) = self.transport.take() {
            t.disconnect();
        }
        self.capture.stop();
        self.playback.interrupt();
    }
}
