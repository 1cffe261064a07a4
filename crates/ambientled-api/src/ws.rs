//! tokio-tungstenite implementation of [`Connector`].
//!
//! The token is sent as `Authorization: Bearer <token>` on the upgrade
//! request. A 401/403 upgrade response is reported as
//! [`Error::AuthFailed`], every other handshake failure as a transient
//! [`Error::Connect`].
//!
//! # Example
//!
//! ```rust,ignore
//! use ambientled_api::{Connector, TransportConfig, WsConnector};
//! use secrecy::SecretString;
//! use url::Url;
//!
//! let connector = WsConnector::new(TransportConfig::default())?;
//! let url = Url::parse("wss://ambientled.pl")?;
//! let mut link = connector.connect(&url, &SecretString::from("token".to_owned())).await?;
//!
//! while let Some(Ok(text)) = link.stream.next_text().await {
//!     println!("{text}");
//! }
//! link.sink.close().await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::Error;
use crate::tls;
use crate::transport::{Connector, FrameSink, FrameStream, Link, TransportConfig};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── WsConnector ──────────────────────────────────────────────────────

/// Production connector: one TCP + TLS + WebSocket upgrade per call.
pub struct WsConnector {
    config: TransportConfig,
    tls: Arc<rustls::ClientConfig>,
}

impl WsConnector {
    /// Build a connector. Fails only if the TLS configuration is unusable
    /// (unreadable or empty CA file).
    pub fn new(config: TransportConfig) -> Result<Self, Error> {
        let tls = Arc::new(tls::client_config(&config.tls)?);
        Ok(Self { config, tls })
    }
}

impl std::fmt::Debug for WsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsConnector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url, token: &SecretString) -> Result<Link, Error> {
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(Error::InvalidUrl(format!(
                    "unsupported scheme '{other}' (expected ws:// or wss://)"
                )));
            }
        }

        let uri: tungstenite::http::Uri = url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::InvalidUrl(e.to_string()))?;

        let request = ClientRequestBuilder::new(uri)
            .with_header("Authorization", format!("Bearer {}", token.expose_secret()))
            .with_header("User-Agent", self.config.user_agent.clone());

        tracing::debug!(url = %url, "opening WebSocket");

        let handshake = tokio_tungstenite::connect_async_tls_with_config(
            request,
            None,
            false,
            Some(tokio_tungstenite::Connector::Rustls(Arc::clone(&self.tls))),
        );

        let (ws_stream, response) = tokio::time::timeout(self.config.connect_timeout, handshake)
            .await
            .map_err(|_| Error::Timeout {
                timeout_secs: self.config.connect_timeout.as_secs(),
            })?
            .map_err(map_handshake_error)?;

        tracing::debug!(status = %response.status(), "WebSocket upgrade accepted");

        let (write, read) = ws_stream.split();
        Ok(Link {
            sink: Box::new(WsSink { inner: write }),
            stream: Box::new(WsReader {
                inner: read,
                finished: false,
            }),
        })
    }
}

fn map_handshake_error(err: tungstenite::Error) -> Error {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                Error::AuthFailed {
                    message: format!("backend rejected the token (HTTP {})", status.as_u16()),
                }
            } else {
                Error::Connect(format!("upgrade rejected with HTTP {}", status.as_u16()))
            }
        }
        tungstenite::Error::Tls(e) => Error::Tls(e.to_string()),
        tungstenite::Error::Url(e) => Error::InvalidUrl(e.to_string()),
        other => Error::Connect(other.to_string()),
    }
}

// ── Halves ───────────────────────────────────────────────────────────

struct WsSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), Error> {
        self.inner
            .send(Message::Text(text.into()))
            .await
            .map_err(map_io_error)
    }

    async fn ping(&mut self) -> Result<(), Error> {
        self.inner
            .send(Message::Ping(Default::default()))
            .await
            .map_err(map_io_error)
    }

    async fn close(&mut self) -> Result<(), Error> {
        match self.inner.close().await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(map_io_error(e)),
        }
    }
}

struct WsReader {
    inner: SplitStream<WsStream>,
    finished: bool,
}

#[async_trait]
impl FrameStream for WsReader {
    async fn next_text(&mut self) -> Option<Result<String, Error>> {
        if self.finished {
            return None;
        }

        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.as_str().to_owned())),
                Some(Ok(Message::Binary(bytes))) => {
                    if let Ok(text) = String::from_utf8(bytes.to_vec()) {
                        return Some(Ok(text));
                    }
                    tracing::trace!("dropping non-UTF-8 binary frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    if let Some(cf) = frame {
                        tracing::info!(code = %cf.code, reason = %cf.reason, "WebSocket close frame received");
                    } else {
                        tracing::info!("WebSocket close frame received (no payload)");
                    }
                    self.finished = true;
                    return None;
                }
                Some(Ok(_)) => {
                    // Ping / Pong / raw frames; tungstenite answers pings itself
                    tracing::trace!("WebSocket control frame");
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(map_io_error(e)));
                }
                None => {
                    tracing::info!("WebSocket stream ended");
                    self.finished = true;
                    return None;
                }
            }
        }
    }
}

fn map_io_error(err: tungstenite::Error) -> Error {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => Error::Closed {
            code: 1006,
            reason: "connection already closed".into(),
        },
        tungstenite::Error::Tls(e) => Error::Tls(e.to_string()),
        other => Error::Connect(other.to_string()),
    }
}
