use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::credential::Credential;
use crate::error::Result;

/// Raw text frames of one open connection
///
/// Inbound `Err` items are transport failures; a closed inbound channel
/// means the remote hung up.
pub struct Connection {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<Result<String>>,
    /// Signals the transport to close gracefully
    pub close: Option<oneshot::Sender<()>>,
    /// Task pumping frames between the socket and the channels, if any
    pub pump: Option<JoinHandle<()>>,
}

/// Opens persistent bidirectional connections to the realtime backend
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection authorized by `credential`
    async fn open(&self, credential: &Credential) -> Result<Connection>;

    /// Transport name for logging
    fn name(&self) -> &str;
}
