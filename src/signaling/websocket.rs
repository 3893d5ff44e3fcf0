use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use super::transport::{Connection, Transport};
use crate::credential::Credential;
use crate::error::{Error, Result};

/// WebSocket transport to the realtime backend
pub struct WebSocketTransport {
    url: String,
    model: String,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            model: model.into(),
        }
    }

    fn endpoint(&self) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}model={}", self.url, separator, self.model)
    }
}

fn map_connect_error(err: tungstenite::Error) -> Error {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            if status == 401 || status == 403 {
                Error::AuthExpired
            } else {
                Error::Connection(format!("upgrade rejected with HTTP {status}"))
            }
        }
        other => Error::Connection(other.to_string()),
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, credential: &Credential) -> Result<Connection> {
        let endpoint = self.endpoint();
        info!("Connecting to realtime backend at {}", self.url);

        let mut request = endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Connection(format!("invalid realtime URL: {e}")))?;

        let bearer = HeaderValue::from_str(&format!("Bearer {}", credential.api_key))
            .map_err(|_| Error::Connection("credential is not a valid header value".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (socket, _) = connect_async(request).await.map_err(map_connect_error)?;

        info!("Realtime WebSocket connected");

        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        let (in_tx, in_rx) = mpsc::channel::<Result<String>>(256);
        let (close_tx, mut close_rx) = oneshot::channel::<()>();

        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut close_rx => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    outbound = out_rx.recv() => match outbound {
                        Some(text) => {
                            if let Err(e) = sink.send(Message::Text(text.into())).await {
                                let _ = in_tx.send(Err(Error::Connection(e.to_string()))).await;
                                break;
                            }
                        }
                        None => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    inbound = stream.next() => match inbound {
                        Some(Ok(Message::Text(text))) => {
                            if in_tx.send(Ok(text.as_str().to_owned())).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("Realtime backend closed the connection: {:?}", frame);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Realtime WebSocket error: {}", e);
                            let _ = in_tx.send(Err(Error::Connection(e.to_string()))).await;
                            break;
                        }
                        None => break,
                    },
                }
            }
            debug!("WebSocket pump stopped");
        });

        Ok(Connection {
            outbound: out_tx,
            inbound: in_rx,
            close: Some(close_tx),
            pump: Some(pump),
        })
    }

    fn name(&self) -> &str {
        "websocket"
    }
}
