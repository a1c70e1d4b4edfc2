use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use serde_json::json;
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::protocol::Message;

use super::types::OutboundMessage;
use crate::common::errors::Result;

/// Queues outbound frames for the writer task and stamps each with the
/// channel's next correlation id.
#[derive(Clone)]
pub struct ControlSender {
    tx: UnboundedSender<Message>,
    next_id: Arc<AtomicU64>,
}

impl ControlSender {
    pub fn new(tx: UnboundedSender<Message>) -> Self {
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Serialize a frame for `name`, consuming one id.
    pub fn payload(&self, name: &str) -> Result<String> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let json = serde_json::to_string(&OutboundMessage {
            name,
            arguments: json!({}),
            id,
        })?;
        Ok(json)
    }

    /// Queue a frame. Returns `false` once the writer has gone away.
    pub fn send(&self, name: &str) -> bool {
        match self.payload(name) {
            Ok(json) => self.tx.send(Message::Text(json.into())).is_ok(),
            Err(_) => false,
        }
    }

    /// Ids handed out so far.
    pub fn sent(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed)
    }
}
