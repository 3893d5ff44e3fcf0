use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::messages::{ClientEvent, ServerEvent};
use super::transport::{Connection, Transport};
use crate::credential::Credential;
use crate::error::{Error, Result};

/// Cloneable handle for sending typed messages over the channel
#[derive(Clone)]
pub struct SignalingSender {
    tx: mpsc::Sender<String>,
}

impl SignalingSender {
    pub async fn send(&self, event: &ClientEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        self.tx
            .send(payload)
            .await
            .map_err(|_| Error::Connection("signaling channel closed".to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The persistent connection to the realtime backend
///
/// `connect` returns only after the session handshake completed, so a
/// channel in hand is always configured.
pub struct SignalingChannel {
    sender: SignalingSender,
    inbound: mpsc::Receiver<Result<String>>,
    close: Option<oneshot::Sender<()>>,
    pump: Option<JoinHandle<()>>,
    remote_session_id: Option<String>,
}

impl SignalingChannel {
    /// Open a connection and run the handshake
    ///
    /// Waits for `session.created`, answers with `update`, then waits for
    /// `session.updated`. Anything short of that within `handshake_timeout`
    /// is a connection error.
    pub async fn connect(
        transport: &dyn Transport,
        credential: &Credential,
        update: ClientEvent,
        handshake_timeout: Duration,
    ) -> Result<Self> {
        let connection = transport.open(credential).await?;
        let mut channel = Self::from_connection(connection);

        let outcome = tokio::time::timeout(handshake_timeout, channel.handshake(update)).await;
        match outcome {
            Ok(Ok(())) => {
                info!(
                    "Realtime session configured over {} ({})",
                    transport.name(),
                    channel.remote_session_id.as_deref().unwrap_or("no id")
                );
                Ok(channel)
            }
            Ok(Err(e)) => {
                channel.close().await;
                Err(e)
            }
            Err(_) => {
                channel.close().await;
                Err(Error::Connection(format!(
                    "session handshake timed out after {}ms",
                    handshake_timeout.as_millis()
                )))
            }
        }
    }

    fn from_connection(connection: Connection) -> Self {
        Self {
            sender: SignalingSender {
                tx: connection.outbound,
            },
            inbound: connection.inbound,
            close: connection.close,
            pump: connection.pump,
            remote_session_id: None,
        }
    }

    async fn handshake(&mut self, update: ClientEvent) -> Result<()> {
        if let ServerEvent::SessionCreated { session } = self.await_event("session.created").await? {
            self.remote_session_id = session.and_then(|s| s.id);
        }

        self.sender.send(&update).await?;

        self.await_event("session.updated").await?;
        Ok(())
    }

    async fn await_event(&mut self, kind: &str) -> Result<ServerEvent> {
        loop {
            match self.next_event().await {
                None => {
                    return Err(Error::Connection(format!(
                        "connection closed while waiting for {kind}"
                    )))
                }
                Some(Ok(ServerEvent::Error { error })) => {
                    return Err(Error::Connection(format!(
                        "backend rejected session: {}",
                        error.message
                    )))
                }
                Some(Ok(event)) if event.kind() == kind => return Ok(event),
                Some(Ok(event)) => {
                    debug!("Ignoring {} during handshake", event.kind());
                }
                Some(Err(e)) if e.is_fatal() => return Err(e),
                Some(Err(e)) => warn!("Dropping inbound message: {}", e),
            }
        }
    }

    /// Sender handle for other tasks
    pub fn sender(&self) -> SignalingSender {
        self.sender.clone()
    }

    /// Session id announced by the backend
    pub fn remote_session_id(&self) -> Option<&str> {
        self.remote_session_id.as_deref()
    }

    /// Next inbound event
    ///
    /// `None` means the remote hung up. Malformed frames come back as
    /// `Error::Protocol`; transport failures as `Error::Connection`.
    pub async fn next_event(&mut self) -> Option<Result<ServerEvent>> {
        let frame = self.inbound.recv().await?;
        Some(frame.and_then(|text| {
            serde_json::from_str::<ServerEvent>(&text)
                .map_err(|e| Error::Protocol(format!("malformed server event: {e}")))
        }))
    }

    /// Close the connection. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if let Some(close) = self.close.take() {
            let _ = close.send(());
            debug!("Signaling channel closing");
        }

        if let Some(mut pump) = self.pump.take() {
            if tokio::time::timeout(Duration::from_secs(1), &mut pump)
                .await
                .is_err()
            {
                pump.abort();
            }
        }

        self.inbound.close();
    }
}
