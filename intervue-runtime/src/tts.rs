use std::process::Stdio;

use async_trait::async_trait;
use intervue_core::TtsConfig;
use intervue_engine::traits::{PlaybackError, SpeechSynthesizer};
use tokio::io::AsyncWriteExt;

const WINDOWS_SPEAK_SCRIPT: &str = "Add-Type -AssemblyName System.Speech; \
$s = New-Object System.Speech.Synthesis.SpeechSynthesizer; \
$s.Speak([Console]::In.ReadToEnd())";

/// Program plus arguments; the utterance is written to its stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Resolve the synthesizer command for `os` (as in `std::env::consts::OS`).
pub fn speech_command_for(cfg: &TtsConfig, os: &str) -> Option<SpeechCommand> {
    if !cfg.enabled {
        return None;
    }

    if let Some(program) = cfg.command.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        return Some(SpeechCommand {
            program: program.to_string(),
            args: Vec::new(),
        });
    }

    let voice = cfg.voice.as_deref().map(str::trim).filter(|v| !v.is_empty());
    let mut args = Vec::new();
    let program = match os {
        "macos" => {
            if let Some(v) = voice {
                args.extend(["-v".to_string(), v.to_string()]);
            }
            if let Some(r) = cfg.rate_wpm {
                args.extend(["-r".to_string(), r.to_string()]);
            }
            args.extend(["-f".to_string(), "-".to_string()]);
            "say"
        }
        "windows" => {
            args.extend(
                ["-NoProfile", "-NonInteractive", "-Command", WINDOWS_SPEAK_SCRIPT]
                    .map(String::from),
            );
            "powershell"
        }
        "linux" | "freebsd" | "openbsd" | "netbsd" => {
            if let Some(v) = voice {
                args.extend(["-v".to_string(), v.to_string()]);
            }
            if let Some(r) = cfg.rate_wpm {
                args.extend(["-s".to_string(), r.to_string()]);
            }
            args.push("--stdin".to_string());
            "espeak-ng"
        }
        _ => return None,
    };

    Some(SpeechCommand {
        program: program.to_string(),
        args,
    })
}

/// Speaks by running a platform text-to-speech command. Dropping the `speak`
/// future kills the child, which is how an utterance is interrupted.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    command: Option<SpeechCommand>,
}

impl CommandSynthesizer {
    pub fn new(command: Option<SpeechCommand>) -> Self {
        Self { command }
    }

    pub fn from_config(cfg: &TtsConfig) -> Self {
        Self::new(speech_command_for(cfg, std::env::consts::OS))
    }
}

#[async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    async fn speak(&self, text: &str) -> Result<(), PlaybackError> {
        let Some(cmd) = &self.command else {
            return Err(PlaybackError::Unsupported);
        };

        let mut child = tokio::process::Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    log::warn!("tts: {} not found", cmd.program);
                    PlaybackError::Unsupported
                }
                _ => PlaybackError::Failed(format!("spawn {}: {e}", cmd.program)),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .await
                .map_err(|e| PlaybackError::Failed(format!("write utterance: {e}")))?;
            // Closing stdin marks the end of the utterance.
            drop(stdin);
        }

        let status = child
            .wait()
            .await
            .map_err(|e| PlaybackError::Failed(format!("wait for {}: {e}", cmd.program)))?;
        if status.success() {
            Ok(())
        } else {
            Err(PlaybackError::Failed(format!("{} exited with {status}", cmd.program)))
        }
    }
}
