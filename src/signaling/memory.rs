// In-process transport
//
// Each `open` hands the far end of a fresh channel pair to the test (or
// simulator) as a `RemotePeer`, which plays the realtime backend.

use std::sync::Mutex;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use super::transport::{Connection, Transport};
use crate::credential::Credential;
use crate::error::{Error, Result};

/// Transport whose remote side is driven in-process
pub struct MemoryTransport {
    peers: mpsc::UnboundedSender<RemotePeer>,
    refuse: Mutex<Option<Error>>,
}

impl MemoryTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RemotePeer>) {
        let (peers, accepted) = mpsc::unbounded_channel();
        (
            Self {
                peers,
                refuse: Mutex::new(None),
            },
            accepted,
        )
    }

    /// Fail the next `open` with this error
    pub fn refuse_next(&self, error: Error) {
        if let Ok(mut refuse) = self.refuse.lock() {
            *refuse = Some(error);
        }
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, credential: &Credential) -> Result<Connection> {
        if let Some(error) = self.refuse.lock().ok().and_then(|mut r| r.take()) {
            return Err(error);
        }

        let (out_tx, out_rx) = mpsc::channel(1024);
        let (in_tx, in_rx) = mpsc::channel(1024);
        let (close_tx, close_rx) = oneshot::channel();

        let peer = RemotePeer {
            from_client: out_rx,
            to_client: in_tx,
            close_rx,
            api_key: credential.api_key.clone(),
        };
        self.peers
            .send(peer)
            .map_err(|_| Error::Connection("no remote peer listening".to_string()))?;

        Ok(Connection {
            outbound: out_tx,
            inbound: in_rx,
            close: Some(close_tx),
            pump: None,
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// The backend's end of a memory connection
pub struct RemotePeer {
    from_client: mpsc::Receiver<String>,
    to_client: mpsc::Sender<Result<String>>,
    close_rx: oneshot::Receiver<()>,
    /// Credential presented by the client
    pub api_key: String,
}

impl RemotePeer {
    /// Send a server event; returns false once the client is gone
    pub async fn send(&self, event: Value) -> bool {
        self.send_raw(&event.to_string()).await
    }

    /// Send an arbitrary text frame
    pub async fn send_raw(&self, text: &str) -> bool {
        self.to_client.send(Ok(text.to_string())).await.is_ok()
    }

    /// Report a transport failure to the client
    pub async fn fail(&self, message: &str) -> bool {
        self.to_client
            .send(Err(Error::Connection(message.to_string())))
            .await
            .is_ok()
    }

    /// Next client message, `None` once the client side is dropped
    pub async fn recv(&mut self) -> Option<Value> {
        let text = self.from_client.recv().await?;
        serde_json::from_str(&text).ok()
    }

    /// Next client message of the given type, skipping others
    pub async fn recv_type(&mut self, kind: &str) -> Option<Value> {
        loop {
            let message = self.recv().await?;
            if message["type"] == kind {
                return Some(message);
            }
        }
    }

    /// Next client message that is not an audio append
    pub async fn recv_control(&mut self) -> Option<Value> {
        loop {
            let message = self.recv().await?;
            if message["type"] != "input_audio_buffer.append" {
                return Some(message);
            }
        }
    }

    /// Client messages already queued, without waiting
    pub fn drain(&mut self) -> Vec<Value> {
        let mut messages = Vec::new();
        while let Ok(text) = self.from_client.try_recv() {
            if let Ok(value) = serde_json::from_str(&text) {
                messages.push(value);
            }
        }
        messages
    }

    /// Play the backend side of the handshake; returns the `session.update`
    pub async fn accept(&mut self) -> Option<Value> {
        self.send(json!({
            "type": "session.created",
            "session": { "id": "sess_memory" }
        }))
        .await;

        let update = self.recv_type("session.update").await?;

        self.send(json!({
            "type": "session.updated",
            "session": { "id": "sess_memory" }
        }))
        .await;

        Some(update)
    }

    /// Whether the client has closed the connection
    pub fn is_closed(&mut self) -> bool {
        !matches!(
            self.close_rx.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        )
    }
}
