use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::traits::{PlaybackError, SpeechSynthesizer};

/// Completion report posted by an utterance task.
#[derive(Debug)]
pub struct PlaybackDone {
    pub utterance: u64,
    pub result: Result<(), PlaybackError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackNotice {
    Started { utterance: u64 },
    Ended { utterance: u64 },
    Failed { utterance: u64, error: PlaybackError },
    /// Synthesis is unsupported; nothing more will be spoken this session.
    Disabled,
}

struct InFlight {
    utterance: u64,
    task: JoinHandle<()>,
}

/// Keeps at most one utterance in flight by cancelling before starting.
///
/// Every accepted `speak` produces exactly one `Ended` notice: from natural
/// completion, failure, `interrupt`, or a superseding `speak`.
pub struct PlaybackCoordinator {
    synth: Arc<dyn SpeechSynthesizer>,
    done_tx: UnboundedSender<PlaybackDone>,
    next_utterance: u64,
    in_flight: Option<InFlight>,
    disabled: bool,
}

impl PlaybackCoordinator {
    pub fn new(synth: Arc<dyn SpeechSynthesizer>, done_tx: UnboundedSender<PlaybackDone>) -> Self {
        Self {
            synth,
            done_tx,
            next_utterance: 0,
            in_flight: None,
            disabled: false,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_available(&self) -> bool {
        !self.disabled
    }

    /// Re-enables playback for a new session.
    pub fn reset(&mut self) -> Vec<PlaybackNotice> {
        self.disabled = false;
        self.interrupt().into_iter().collect()
    }

    pub fn speak(&mut self, text: &str) -> Vec<PlaybackNotice> {
        if self.disabled || text.trim().is_empty() {
            return Vec::new();
        }

        let mut out: Vec<PlaybackNotice> = self.interrupt().into_iter().collect();

        self.next_utterance += 1;
        let utterance = self.next_utterance;
        let synth = self.synth.clone();
        let done_tx = self.done_tx.clone();
        let text = text.to_string();

        let task = tokio::spawn(async move {
            let result = synth.speak(&text).await;
            let _ = done_tx.send(PlaybackDone { utterance, result });
        });

        self.in_flight = Some(InFlight { utterance, task });
        out.push(PlaybackNotice::Started { utterance });
        out
    }

    /// No-op unless an utterance is in flight.
    pub fn interrupt(&mut self) -> Option<PlaybackNotice> {
        let InFlight { utterance, task } = self.in_flight.take()?;
        // Aborting drops the synthesizer future, which stops the audio.
        task.abort();
        Some(PlaybackNotice::Ended { utterance })
    }

    pub fn on_done(&mut self, done: PlaybackDone) -> Vec<PlaybackNotice> {
        // Completions of interrupted utterances were already reported as ended.
        if self.in_flight.as_ref().map(|f| f.utterance) != Some(done.utterance) {
            return Vec::new();
        }
        self.in_flight = None;

        let utterance = done.utterance;
        match done.result {
            Ok(()) => vec![PlaybackNotice::Ended { utterance }],
            Err(PlaybackError::Unsupported) => {
                self.disabled = true;
                log::warn!("speech synthesis unsupported; disabling playback for this session");
                vec![
                    PlaybackNotice::Failed {
                        utterance,
                        error: PlaybackError::Unsupported,
                    },
                    PlaybackNotice::Ended { utterance },
                    PlaybackNotice::Disabled,
                ]
            }
            Err(error) => vec![
                PlaybackNotice::Failed { utterance, error },
                PlaybackNotice::Ended { utterance },
            ],
        }
    }
}
