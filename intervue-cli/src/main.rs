use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use env_logger::Env;
use intervue_core::{InterviewSetup, TranscriptEntry, TranscriptKind, preview_text};
use intervue_engine::engine::InterviewSession;
use intervue_engine::session::SessionEvent;
use intervue_providers::health::{HealthProbeConfig, probe_health};
use intervue_runtime::config_store::ConfigStore;
use intervue_runtime::defaults::DEFAULT_CONFIG_FILE;
use intervue_runtime::runtime_engine::build_engine_from_config;
use intervue_runtime::secrets::{SecretKey, delete_secret, set_secret};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, oneshot};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Subcommand {
    Interview,
    Health,
    SetKey,
    ClearKey,
}

fn parse_subcommand(arg: Option<&str>) -> anyhow::Result<Subcommand> {
    match arg {
        None => Ok(Subcommand::Interview),
        Some("health") => Ok(Subcommand::Health),
        Some("set-key") => Ok(Subcommand::SetKey),
        Some("clear-key") => Ok(Subcommand::ClearKey),
        Some(other) => anyhow::bail!("unknown command: {other} (expected health, set-key or clear-key)"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliCommand {
    Answer(String),
    ToggleMic,
    Pause,
    Resume,
    Status,
    End,
    Retry,
    Quit,
    Help,
    Empty,
}

fn parse_line(line: &str) -> CliCommand {
    let line = line.trim();
    match line {
        "" => CliCommand::Empty,
        "/mic" => CliCommand::ToggleMic,
        "/pause" => CliCommand::Pause,
        "/resume" => CliCommand::Resume,
        "/status" => CliCommand::Status,
        "/end" => CliCommand::End,
        "/retry" => CliCommand::Retry,
        "/quit" | "/exit" => CliCommand::Quit,
        "/help" => CliCommand::Help,
        answer => CliCommand::Answer(answer.to_string()),
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn setup_from_env(default_max_duration_secs: u64) -> anyhow::Result<InterviewSetup> {
    let mut setup = InterviewSetup::new(
        env_or("INTERVUE_JOB_ID", ""),
        env_or("INTERVUE_CANDIDATE_ID", ""),
        env_or("INTERVUE_CANDIDATE_NAME", ""),
    );

    let max_secs = match std::env::var("INTERVUE_MAX_DURATION_SECS") {
        Ok(v) => v
            .trim()
            .parse::<u64>()
            .with_context(|| format!("INTERVUE_MAX_DURATION_SECS is not a number: {v}"))?,
        Err(_) => default_max_duration_secs,
    };
    setup = setup.with_max_duration_secs(max_secs);

    if let Ok(path) = std::env::var("INTERVUE_RESUME_FILE") {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("read resume file: {path}"))?;
        setup = setup.with_resume_text(text);
    }
    if let Ok(level) = std::env::var("INTERVUE_DIFFICULTY") {
        setup = setup.with_difficulty_level(level);
    }
    if let Ok(areas) = std::env::var("INTERVUE_FOCUS_AREAS") {
        setup.focus_areas = areas
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(String::from)
            .collect();
    }
    Ok(setup)
}

fn print_entry(entry: &TranscriptEntry) {
    match entry.kind {
        TranscriptKind::Ai => match entry.question_number {
            Some(n) => println!("[interviewer #{n}] {}", entry.content),
            None => println!("[interviewer] {}", entry.content),
        },
        TranscriptKind::Candidate => println!("[you] {}", entry.content),
        TranscriptKind::System => println!("[system] {}", entry.content),
        TranscriptKind::Error => println!("[error] {}", entry.content),
    }
}

async fn print_events(mut events: broadcast::Receiver<SessionEvent>, done: oneshot::Sender<()>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Transcript(entry)) => print_entry(&entry),
            Ok(SessionEvent::LiveTranscript { text, is_final: false }) => {
                println!("  … {}", preview_text(&text));
            }
            Ok(SessionEvent::PhaseChanged(phase)) => println!("(phase: {})", phase.label()),
            Ok(SessionEvent::ConnectionChanged(state)) => println!("(connection: {state:?})"),
            Ok(SessionEvent::ListeningChanged(on)) => {
                println!("(microphone {})", if on { "on" } else { "off" });
            }
            Ok(SessionEvent::Finished(result)) => {
                match serde_json::to_string_pretty(&result) {
                    Ok(json) => println!("{json}"),
                    Err(e) => log::error!("failed to encode interview result: {e}"),
                }
                let _ = done.send(());
                return;
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                log::warn!("cli: skipped {n} session events");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn run_command(
    session: &InterviewSession,
    setup: &InterviewSetup,
    cmd: CliCommand,
) -> anyhow::Result<bool> {
    match cmd {
        CliCommand::Empty => {}
        CliCommand::Help => {
            println!("Type an answer, or: /mic /pause /resume /status /end /retry /quit");
            println!("/retry starts a fresh session after the service could not be reached.");
        }
        CliCommand::Answer(text) => session.submit_answer(text).await?,
        CliCommand::ToggleMic => {
            let listening = session.toggle_capture().await?;
            if !listening {
                println!("(microphone stopping)");
            }
        }
        CliCommand::Pause => session.pause().await?,
        CliCommand::Resume => session.resume().await?,
        CliCommand::Status => {
            session.request_status().await?;
            let snap = session.snapshot();
            println!(
                "(elapsed {}s of {}s, {} questions, progress {:.0}%)",
                snap.elapsed_secs, snap.max_duration_secs, snap.questions_asked, snap.progress
            );
        }
        CliCommand::End => session.end().await?,
        CliCommand::Retry => {
            let session_id = session.start(setup.clone()).await?;
            println!("(session {})", session_id.0);
        }
        CliCommand::Quit => {
            if session.snapshot().phase.is_live() {
                session.end().await?;
            }
            return Ok(false);
        }
    }
    Ok(true)
}

/// Reads the key from the first line of stdin so it never shows up in the process list.
async fn store_api_key(store: &ConfigStore) -> anyhow::Result<()> {
    println!("Paste the Deepgram API key and press enter:");
    let line = BufReader::new(tokio::io::stdin())
        .lines()
        .next_line()
        .await
        .context("read stdin")?
        .unwrap_or_default();
    let key = line.trim();
    anyhow::ensure!(!key.is_empty(), "no key entered");

    set_secret(SecretKey::DeepgramApiKey, key)?;
    store.record_stt_api_key_present(true)?;
    println!("(Deepgram API key stored in the system keyring)");
    Ok(())
}

fn clear_api_key(store: &ConfigStore) -> anyhow::Result<()> {
    delete_secret(SecretKey::DeepgramApiKey)?;
    store.record_stt_api_key_present(false)?;
    println!("(Deepgram API key removed)");
    Ok(())
}

async fn run_interview(session: InterviewSession, setup: InterviewSetup) -> anyhow::Result<()> {
    let (done_tx, mut done_rx) = oneshot::channel();
    let printer = tokio::spawn(print_events(session.subscribe(), done_tx));

    let session_id = session.start(setup.clone()).await?;
    println!("(session {})", session_id.0);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = &mut done_rx => break,
            line = lines.next_line() => {
                let Some(line) = line.context("read stdin")? else {
                    break;
                };
                match run_command(&session, &setup, parse_line(&line)).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("! {e}"),
                }
            }
        }
    }

    // Give the printer a moment to flush the result of an `/end` or `/quit`.
    let _ = tokio::time::timeout(Duration::from_secs(2), printer).await;
    drop(session);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let subcommand = parse_subcommand(std::env::args().nth(1).as_deref())?;

    let config_path = env_or("INTERVUE_CONFIG", DEFAULT_CONFIG_FILE);
    let store = ConfigStore::at_path(&config_path);
    let cfg = store.load_or_init()?;
    log::info!("config: {}", store.path().display());

    match subcommand {
        Subcommand::Health => {
            let report =
                probe_health(&cfg.interview.health_url, HealthProbeConfig::default()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.reachable {
                return Ok(ExitCode::FAILURE);
            }
        }
        Subcommand::SetKey => store_api_key(&store).await?,
        Subcommand::ClearKey => clear_api_key(&store)?,
        Subcommand::Interview => {
            let setup = setup_from_env(cfg.interview.default_max_duration_secs)?;
            run_interview(build_engine_from_config(&cfg).spawn(), setup).await?;
        }
    }
    Ok(ExitCode::SUCCESS)
}
