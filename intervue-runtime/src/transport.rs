use intervue_core::{ConnectionState, InterviewServiceConfig, OutboundMessage, TransportEvent};
use intervue_engine::traits::{InterviewTransport, TransportFactory};
use intervue_providers::interview_ws::{InterviewSocket, InterviewSocketConfig};
use tokio::sync::mpsc::UnboundedSender;

/// Opens one real WebSocket per interview session.
#[derive(Debug, Clone)]
pub struct WsTransportFactory {
    cfg: InterviewSocketConfig,
}

impl WsTransportFactory {
    pub fn new(cfg: InterviewSocketConfig) -> Self {
        Self { cfg }
    }

    pub fn from_service_config(cfg: &InterviewServiceConfig) -> Self {
        Self::new(InterviewSocketConfig::from(cfg))
    }
}

impl TransportFactory for WsTransportFactory {
    fn create(&self, events: UnboundedSender<TransportEvent>) -> Box<dyn InterviewTransport> {
        Box::new(WsTransport {
            socket: InterviewSocket::new(self.cfg.clone(), events),
        })
    }
}

struct WsTransport {
    socket: InterviewSocket,
}

impl InterviewTransport for WsTransport {
    fn connect(&mut self, url: &str) {
        self.socket.connect(url);
    }

    fn send(&mut self, msg: &OutboundMessage) -> bool {
        self.socket.send(msg)
    }

    fn disconnect(&mut self) {
        self.socket.disconnect();
    }

    fn state(&self) -> ConnectionState {
        self.socket.state()
    }
}
