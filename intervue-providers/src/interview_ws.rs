//! WebSocket transport to the interview service.
//!
//! Each [`InterviewSocket`] owns at most one live socket plus its reconnect
//! loop. Frames are decoded into [`TransportEvent`]s and posted to the owner;
//! writes go through a dedicated writer task so `send` never awaits.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use intervue_core::{
    CLOSE_ABNORMAL, CLOSE_NORMAL, ConnectionState, Decoded, InterviewServiceConfig,
    OutboundMessage, TransportEvent, decode_inbound, preview_text,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const WS_SEND_TIMEOUT: Duration = Duration::from_secs(3);
// RFC 6455: close frame received without a status code.
const CLOSE_NO_STATUS: u16 = 1005;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterviewSocketConfig {
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub connect_timeout: Duration,
}

impl Default for InterviewSocketConfig {
    fn default() -> Self {
        Self::from(&InterviewServiceConfig::default())
    }
}

impl From<&InterviewServiceConfig> for InterviewSocketConfig {
    fn from(cfg: &InterviewServiceConfig) -> Self {
        Self {
            reconnect_delay: Duration::from_millis(cfg.reconnect_delay_ms),
            max_reconnect_attempts: cfg.max_reconnect_attempts,
            connect_timeout: Duration::from_millis(cfg.connect_timeout_ms),
        }
    }
}

#[derive(Default)]
struct Shared {
    state: ConnectionState,
    out: Option<mpsc::UnboundedSender<Message>>,
    // Set by `disconnect`; the socket task must not reconnect or report after this.
    terminated: bool,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Updates the state and reports it. Returns false once the socket was terminated.
fn set_state(
    shared: &Mutex<Shared>,
    events: &mpsc::UnboundedSender<TransportEvent>,
    next: ConnectionState,
) -> bool {
    {
        let mut s = lock(shared);
        if s.terminated {
            return false;
        }
        if s.state == next {
            return true;
        }
        s.state = next;
    }
    let _ = events.send(TransportEvent::StateChanged(next));
    true
}

pub struct InterviewSocket {
    cfg: InterviewSocketConfig,
    events: mpsc::UnboundedSender<TransportEvent>,
    shared: Arc<Mutex<Shared>>,
    task: Option<JoinHandle<()>>,
}

impl InterviewSocket {
    pub fn new(cfg: InterviewSocketConfig, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            cfg,
            events,
            shared: Arc::new(Mutex::new(Shared::default())),
            task: None,
        }
    }

    /// Must be called from within a Tokio runtime.
    pub fn connect(&mut self, url: &str) {
        {
            let mut s = lock(&self.shared);
            if matches!(s.state, ConnectionState::Connecting | ConnectionState::Connected) {
                return;
            }
            s.terminated = false;
        }
        if let Some(old) = self.task.take() {
            old.abort();
        }

        set_state(&self.shared, &self.events, ConnectionState::Connecting);
        self.task = Some(tokio::spawn(run_socket(
            url.to_string(),
            self.cfg.clone(),
            self.shared.clone(),
            self.events.clone(),
        )));
    }

    pub fn send(&self, msg: &OutboundMessage) -> bool {
        let text = match msg.encode() {
            Ok(t) => t,
            Err(e) => {
                log::warn!("interview socket: failed to encode {}: {e}", msg.kind());
                return false;
            }
        };

        let s = lock(&self.shared);
        if s.state != ConnectionState::Connected {
            return false;
        }
        match s.out.as_ref() {
            Some(tx) => tx.send(Message::Text(text.into())).is_ok(),
            None => false,
        }
    }

    pub fn disconnect(&mut self) {
        let previous = {
            let mut s = lock(&self.shared);
            s.terminated = true;
            if let Some(out) = s.out.take() {
                let _ = out.send(Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "".into(),
                })));
            }
            std::mem::replace(&mut s.state, ConnectionState::Disconnected)
        };

        // The writer task outlives this and flushes the close frame.
        if let Some(task) = self.task.take() {
            task.abort();
        }

        if previous != ConnectionState::Disconnected {
            log::info!("interview socket: disconnected");
            let _ = self
                .events
                .send(TransportEvent::StateChanged(ConnectionState::Disconnected));
        }
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.shared).state
    }
}

impl Drop for InterviewSocket {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn run_socket(
    url: String,
    cfg: InterviewSocketConfig,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut attempts: u32 = 0;
    let mut ever_opened = false;

    loop {
        let connected =
            tokio::time::timeout(cfg.connect_timeout, tokio_tungstenite::connect_async(url.as_str()))
                .await;

        let (code, reason) = match connected {
            Ok(Ok((ws, _resp))) => {
                ever_opened = true;
                attempts = 0;
                run_open_socket(ws, &shared, &events).await
            }
            Ok(Err(e)) => {
                log::warn!("interview socket: connect to {url} failed: {e}");
                let _ = events.send(TransportEvent::Error(format!("connect failed: {e}")));
                (CLOSE_ABNORMAL, e.to_string())
            }
            Err(_) => {
                log::warn!("interview socket: connect to {url} timed out");
                let _ = events.send(TransportEvent::Error("connect timed out".into()));
                (CLOSE_ABNORMAL, "connect timed out".to_string())
            }
        };

        {
            let mut s = lock(&shared);
            s.out = None;
            if s.terminated {
                return;
            }
        }
        let _ = events.send(TransportEvent::Closed {
            code,
            reason: reason.clone(),
        });

        if code == CLOSE_NORMAL {
            log::info!("interview socket: closed normally");
            set_state(&shared, &events, ConnectionState::Disconnected);
            return;
        }

        // Never opened: fail without retrying.
        if !ever_opened && attempts == 0 {
            log::error!("interview socket: connection refused ({code}); is the interview service running?");
            set_state(&shared, &events, ConnectionState::Error);
            return;
        }

        if attempts >= cfg.max_reconnect_attempts {
            log::error!("interview socket: giving up after {attempts} reconnect attempts");
            set_state(&shared, &events, ConnectionState::Error);
            return;
        }

        attempts += 1;
        log::info!(
            "interview socket: closed with {code} {reason}; reconnect {attempts}/{} in {:?}",
            cfg.max_reconnect_attempts,
            cfg.reconnect_delay
        );
        if !set_state(&shared, &events, ConnectionState::Disconnected) {
            return;
        }
        tokio::time::sleep(cfg.reconnect_delay).await;
        if !set_state(&shared, &events, ConnectionState::Connecting) {
            return;
        }
    }
}

/// Pumps one open socket until it closes. Returns the close code and reason.
async fn run_open_socket(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    shared: &Mutex<Shared>,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> (u16, String) {
    let (mut ws_write, mut ws_read) = ws.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let is_close = matches!(msg, Message::Close(_));
            let res = tokio::time::timeout(WS_SEND_TIMEOUT, ws_write.send(msg)).await;
            if is_close || !matches!(res, Ok(Ok(()))) {
                break;
            }
        }
        let _ = ws_write.close().await;
    });

    {
        let mut s = lock(shared);
        if s.terminated {
            return (CLOSE_NORMAL, String::new());
        }
        s.out = Some(out_tx.clone());
    }
    if !set_state(shared, events, ConnectionState::Connected) {
        return (CLOSE_NORMAL, String::new());
    }
    log::info!("interview socket: connected");
    let _ = events.send(TransportEvent::Opened);

    loop {
        let Some(msg) = ws_read.next().await else {
            return (CLOSE_ABNORMAL, "connection dropped".into());
        };

        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                let _ = events.send(TransportEvent::Error(e.to_string()));
                return (CLOSE_ABNORMAL, e.to_string());
            }
        };

        match msg {
            Message::Text(text) => match decode_inbound(text.as_str()) {
                Ok(Decoded::Known(m)) => {
                    let _ = events.send(TransportEvent::Message(m));
                }
                Ok(Decoded::Unknown(kind)) => {
                    log::info!("interview socket: ignoring unknown message type {kind}");
                }
                Err(e) => {
                    log::warn!("interview socket: undecodable frame ({e}): {}", preview_text(text.as_str()));
                    let _ = events.send(TransportEvent::Malformed(text.to_string()));
                }
            },
            Message::Ping(p) => {
                let _ = out_tx.send(Message::Pong(p));
            }
            Message::Close(frame) => {
                return match frame {
                    Some(f) => (u16::from(f.code), f.reason.to_string()),
                    None => (CLOSE_NO_STATUS, String::new()),
                };
            }
            // The service only speaks JSON text frames.
            _ => {}
        }
    }
}
