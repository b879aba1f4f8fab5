use std::time::Duration;

use anyhow::{Context, anyhow};
use futures_util::{SinkExt, StreamExt};
use intervue_core::SttConfig;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Message, client::IntoClientRequest};
use url::Url;

const WS_SEND_TIMEOUT: Duration = Duration::from_secs(3);
const DEEPGRAM_LISTEN_URL: &str = "wss://api.deepgram.com/v1/listen";

fn join_committed_and_partial(committed: &str, partial: &str) -> String {
    let c = committed.trim();
    let p = partial.trim();

    if c.is_empty() {
        return p.to_string();
    }
    if p.is_empty() {
        return c.to_string();
    }
    format!("{c} {p}")
}

fn should_emit_backpressure_warning(dropped: u64) -> bool {
    // Emit on first drop, then periodically.
    dropped > 0 && (dropped == 1 || dropped % 50 == 0)
}

#[derive(Clone, PartialEq, Eq)]
pub struct DeepgramRealtimeConfig {
    pub ws_url: Url,
    pub api_key: String,

    // Deepgram query params
    pub model: String,
    pub language: String,
    pub punctuate: bool,
    pub interim_results: bool,
    pub endpointing_ms: u32,
    pub sample_rate_hz: u32,

    pub connect_timeout: Duration,
    // Deepgram closes idle streams after ~10s without audio.
    pub keepalive_interval: Duration,
}

impl std::fmt::Debug for DeepgramRealtimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepgramRealtimeConfig")
            .field("ws_url", &self.ws_url.as_str())
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("language", &self.language)
            .field("sample_rate_hz", &self.sample_rate_hz)
            .finish_non_exhaustive()
    }
}

impl DeepgramRealtimeConfig {
    pub fn production(api_key: impl Into<String>, sample_rate_hz: u32) -> anyhow::Result<Self> {
        let mut cfg = Self::from_stt_config(&SttConfig::default(), api_key)?;
        cfg.sample_rate_hz = sample_rate_hz;
        Ok(cfg)
    }

    pub fn from_stt_config(stt: &SttConfig, api_key: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            ws_url: Url::parse(DEEPGRAM_LISTEN_URL).context("parse deepgram listen url")?,
            api_key: api_key.into(),
            model: stt.model.clone(),
            language: stt.language.clone(),
            punctuate: stt.punctuate,
            interim_results: stt.interim_results,
            endpointing_ms: stt.endpointing_ms,
            sample_rate_hz: stt.sample_rate_hz,
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_millis(stt.keepalive_interval_ms.max(1_000)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeEvent {
    Opened { request_id: Option<String> },
    /// Provisional text for the current utterance (finalized segments plus the live tail).
    Partial { text: String },
    /// The utterance ended (endpointing); `text` is everything finalized since the last one.
    Utterance { text: String },
    Error { message: String },
}

#[derive(Debug)]
enum RealtimeCmd {
    AudioChunk { pcm_s16le: Vec<u8> },
}

#[derive(Clone)]
pub struct DeepgramRealtimeHandle {
    tx: mpsc::Sender<RealtimeCmd>,
}

impl DeepgramRealtimeHandle {
    pub fn try_send_audio_chunk(&self, pcm_s16le: Vec<u8>) -> bool {
        self.tx
            .try_send(RealtimeCmd::AudioChunk { pcm_s16le })
            .is_ok()
    }
}

pub async fn spawn_realtime_session(
    cfg: DeepgramRealtimeConfig,
) -> anyhow::Result<(DeepgramRealtimeHandle, mpsc::Receiver<RealtimeEvent>)> {
    if cfg.api_key.trim().is_empty() {
        return Err(anyhow!("missing Deepgram API key"));
    }

    let url = build_listen_url(&cfg);

    let mut req = url
        .as_str()
        .into_client_request()
        .context("build websocket request")?;
    req.headers_mut().insert(
        "Authorization",
        format!("Token {}", cfg.api_key.trim())
            .parse()
            .map_err(|_| anyhow!("invalid Deepgram API key header"))?,
    );

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<RealtimeCmd>(64);
    let (evt_tx, evt_rx) = mpsc::channel::<RealtimeEvent>(64);

    let (ws, resp) = tokio::time::timeout(cfg.connect_timeout, tokio_tungstenite::connect_async(req))
        .await
        .map_err(|_| anyhow!("Deepgram connect timed out"))?
        .context("connect deepgram websocket")?;

    let request_id = resp
        .headers()
        .get("dg-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    log::info!("deepgram: stream opened (request id {request_id:?})");
    let _ = evt_tx.try_send(RealtimeEvent::Opened { request_id });

    let (ws_write, mut ws_read) = ws.split();

    // Writer task: control frames go ahead of queued audio so KeepAlive/CloseStream
    // are never stuck behind a backlog.
    let (out_ctrl_tx, mut out_ctrl_rx) = mpsc::channel::<Message>(16);
    let (out_audio_tx, mut out_audio_rx) = mpsc::channel::<Message>(256);
    tokio::spawn(async move {
        let mut ws_write = ws_write;
        let mut ctrl_closed = false;
        let mut audio_closed = false;

        loop {
            let next_msg: Option<Message> = tokio::select! {
                biased;
                msg = out_ctrl_rx.recv(), if !ctrl_closed => {
                    match msg {
                        Some(m) => Some(m),
                        None => { ctrl_closed = true; None }
                    }
                }
                msg = out_audio_rx.recv(), if !audio_closed => {
                    match msg {
                        Some(m) => Some(m),
                        None => { audio_closed = true; None }
                    }
                }
            };

            let Some(msg) = next_msg else {
                if ctrl_closed && audio_closed {
                    break;
                }
                continue;
            };

            let res = tokio::time::timeout(WS_SEND_TIMEOUT, ws_write.send(msg)).await;
            if !matches!(res, Ok(Ok(()))) {
                break;
            }
        }

        let _ = ws_write.close().await;
    });

    let keepalive_every = cfg.keepalive_interval;

    tokio::spawn(async move {
        let mut committed = String::new();
        let mut dropped_outbound_audio_chunks: u64 = 0;
        let mut last_audio = Instant::now();

        let mut keepalive = tokio::time::interval_at(Instant::now() + keepalive_every, keepalive_every);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(RealtimeCmd::AudioChunk { pcm_s16le }) => {
                            last_audio = Instant::now();
                            match out_audio_tx.try_send(Message::Binary(pcm_s16le.into())) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(_)) => {
                                    // Drop rather than stall reads.
                                    dropped_outbound_audio_chunks = dropped_outbound_audio_chunks.saturating_add(1);
                                    if should_emit_backpressure_warning(dropped_outbound_audio_chunks) {
                                        log::warn!(
                                            "deepgram: backpressure, dropped {dropped_outbound_audio_chunks} audio chunks; transcript may be incomplete"
                                        );
                                    }
                                }
                                Err(mpsc::error::TrySendError::Closed(_)) => {
                                    let _ = evt_tx.try_send(RealtimeEvent::Error { message: "websocket closed".into() });
                                    break;
                                }
                            }
                        }
                        // Every handle dropped: finish the stream politely.
                        None => {
                            let _ = out_ctrl_tx.try_send(Message::Text(control_message("CloseStream").into()));
                            break;
                        }
                    }
                }

                _ = keepalive.tick() => {
                    if last_audio.elapsed() >= keepalive_every {
                        let _ = out_ctrl_tx.try_send(Message::Text(control_message("KeepAlive").into()));
                    }
                }

                msg = ws_read.next() => {
                    let Some(msg) = msg else {
                        let _ = evt_tx.send(RealtimeEvent::Error { message: "websocket closed".into() }).await;
                        break;
                    };
                    let msg = match msg {
                        Ok(m) => m,
                        Err(e) => {
                            let _ = evt_tx.send(RealtimeEvent::Error { message: format!("websocket read failed: {e}") }).await;
                            break;
                        }
                    };

                    let text = match msg {
                        Message::Text(t) => t.to_string(),
                        Message::Close(frame) => {
                            let normal = frame.as_ref().is_none_or(|f| u16::from(f.code) == 1000);
                            if !normal {
                                let reason = frame.map(|f| format!("{} {}", u16::from(f.code), f.reason)).unwrap_or_default();
                                let _ = evt_tx.send(RealtimeEvent::Error { message: format!("stream closed: {reason}") }).await;
                            }
                            break;
                        }
                        Message::Ping(p) => {
                            let _ = out_ctrl_tx.try_send(Message::Pong(p));
                            continue;
                        }
                        _ => continue,
                    };

                    match parse_listen_message(&text) {
                        Ok(ParsedListen::Results { transcript, is_final, speech_final }) => {
                            if is_final && !transcript.trim().is_empty() {
                                if !committed.is_empty() {
                                    committed.push(' ');
                                }
                                committed.push_str(transcript.trim());
                            }

                            if speech_final {
                                let text = std::mem::take(&mut committed);
                                if !text.trim().is_empty() {
                                    let _ = evt_tx.send(RealtimeEvent::Utterance { text }).await;
                                }
                                continue;
                            }

                            let live = if is_final {
                                committed.clone()
                            } else {
                                join_committed_and_partial(&committed, &transcript)
                            };
                            if !live.trim().is_empty() {
                                let _ = evt_tx.send(RealtimeEvent::Partial { text: live }).await;
                            }
                        }
                        Ok(ParsedListen::UtteranceEnd) => {
                            let text = std::mem::take(&mut committed);
                            if !text.trim().is_empty() {
                                let _ = evt_tx.send(RealtimeEvent::Utterance { text }).await;
                            }
                        }
                        Ok(ParsedListen::Error { message }) => {
                            log::warn!("deepgram: {message}");
                            let _ = evt_tx.send(RealtimeEvent::Error { message }).await;
                            break;
                        }
                        Ok(ParsedListen::Other) => {}
                        Err(e) => {
                            log::debug!("deepgram: ignoring frame: {e:#}");
                        }
                    }
                }
            }
        }

        // Dropping the out senders ends the writer task, which closes the socket.
    });

    Ok((DeepgramRealtimeHandle { tx: cmd_tx }, evt_rx))
}

fn control_message(kind: &str) -> String {
    serde_json::json!({ "type": kind }).to_string()
}

pub fn build_listen_url(cfg: &DeepgramRealtimeConfig) -> Url {
    let mut url = cfg.ws_url.clone();
    {
        let mut qp = url.query_pairs_mut();
        qp.append_pair("model", &cfg.model);
        let lang = cfg.language.trim();
        if !lang.is_empty() {
            qp.append_pair("language", lang);
        }
        qp.append_pair("punctuate", bool_str(cfg.punctuate));
        qp.append_pair("interim_results", bool_str(cfg.interim_results));
        qp.append_pair("encoding", "linear16");
        qp.append_pair("sample_rate", &cfg.sample_rate_hz.to_string());
        qp.append_pair("channels", "1");
        if cfg.endpointing_ms > 0 {
            qp.append_pair("endpointing", &cfg.endpointing_ms.to_string());
        } else {
            qp.append_pair("endpointing", "false");
        }
    }
    url
}

fn bool_str(b: bool) -> &'static str {
    if b { "true" } else { "false" }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ParsedListen {
    Results {
        transcript: String,
        is_final: bool,
        speech_final: bool,
    },
    UtteranceEnd,
    Error {
        message: String,
    },
    Other,
}

fn parse_listen_message(s: &str) -> anyhow::Result<ParsedListen> {
    let v: serde_json::Value = serde_json::from_str(s).context("decode deepgram json")?;
    let t = v
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("missing type"))?;

    match t {
        "Results" => {
            let transcript = v
                .pointer("/channel/alternatives/0/transcript")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let is_final = v.get("is_final").and_then(|v| v.as_bool()).unwrap_or(false);
            let speech_final = v
                .get("speech_final")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            Ok(ParsedListen::Results {
                transcript,
                is_final,
                speech_final,
            })
        }
        "UtteranceEnd" => Ok(ParsedListen::UtteranceEnd),
        "Error" => {
            let message = v
                .get("description")
                .or_else(|| v.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown Deepgram error")
                .to_string();
            Ok(ParsedListen::Error { message })
        }
        "Metadata" | "SpeechStarted" => Ok(ParsedListen::Other),
        other => Err(anyhow!("unknown message type: {other}")),
    }
}
