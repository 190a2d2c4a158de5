//! WebSocket execution transport

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use http::header::{HeaderValue, USER_AGENT};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::errors::ProvisionError;
use crate::stream::{ExecutionChannel, ExecutionRequest, ExecutionTransport};

/// Opens `/ws/playbook/<name>` on the installer backend
#[derive(Debug, Clone)]
pub struct WsTransport {
    base_url: Url,
    connect_timeout: Duration,
}

impl WsTransport {
    /// Create a transport from the backend HTTP(S) base URL
    pub fn new(backend_url: &str, connect_timeout: Duration) -> Result<Self, ProvisionError> {
        Ok(Self {
            base_url: build_ws_base_url(backend_url)?,
            connect_timeout,
        })
    }

    /// Channel URL for one operation
    pub fn channel_url(&self, operation_name: &str) -> Result<Url, ProvisionError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ProvisionError::ConfigError("Backend URL cannot be a base".to_string()))?
            .pop_if_empty()
            .push("ws")
            .push("playbook")
            .push(operation_name);
        Ok(url)
    }
}

#[async_trait]
impl ExecutionTransport for WsTransport {
    async fn open(&self, operation_name: &str) -> Result<Box<dyn ExecutionChannel>, ProvisionError> {
        let url = self.channel_url(operation_name)?;
        info!("Opening execution channel: {}", url);

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ProvisionError::ConnectionError(e.to_string()))?;
        request
            .headers_mut()
            .insert(USER_AGENT, HeaderValue::from_static("Thinkube-Provisioner"));

        let (stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| {
                ProvisionError::ConnectionError(format!(
                    "timed out after {:?} connecting to {}",
                    self.connect_timeout, url
                ))
            })?
            .map_err(|e| ProvisionError::ConnectionError(e.to_string()))?;

        Ok(Box::new(WsChannel { stream }))
    }
}

struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl ExecutionChannel for WsChannel {
    async fn send(&mut self, request: &ExecutionRequest) -> Result<(), ProvisionError> {
        let payload = serde_json::to_string(request)?;
        self.stream
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| ProvisionError::ConnectionError(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ProvisionError>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.as_str().to_string())),
                Some(Ok(Message::Binary(bytes))) => {
                    return Some(String::from_utf8(bytes.to_vec()).map_err(|e| {
                        ProvisionError::ProtocolError(format!("non UTF-8 binary frame: {e}"))
                    }));
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Execution channel closed by remote: {:?}", frame);
                    return None;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("Execution channel error: {}", e);
                    return Some(Err(ProvisionError::ConnectionError(e.to_string())));
                }
                None => return None,
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("Error closing execution channel: {}", e);
        }
    }
}

fn build_ws_base_url(backend_url: &str) -> Result<Url, ProvisionError> {
    let mut url = Url::parse(backend_url).map_err(|e| ProvisionError::ConfigError(e.to_string()))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => {
            return Err(ProvisionError::ConfigError(
                "Invalid backend URL scheme".to_string(),
            ))
        }
    };

    url.set_scheme(scheme)
        .map_err(|_| ProvisionError::ConfigError("Failed to set scheme".to_string()))?;
    Ok(url)
}
