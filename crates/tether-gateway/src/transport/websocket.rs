//! WebSocket connector over `tokio-tungstenite`.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt, future};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use super::{Connection, Connector, Transport, TransportEvent};
use crate::errors::{GatewayError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on TCP connect plus TLS and WebSocket handshakes.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Dials real gateway endpoints.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str) -> Result<Connection> {
        let (ws, response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| GatewayError::Connection(format!("{url}: handshake timed out")))?
            .map_err(|e| GatewayError::Connection(format!("{url}: {e}")))?;
        debug!(status = %response.status(), "websocket handshake complete");

        let (sink, stream) = ws.split();
        let inbound = stream
            .filter_map(|message| future::ready(translate(message)))
            .boxed();

        Ok(Connection {
            transport: Box::new(WsTransport { sink }),
            inbound,
        })
    }
}

struct WsTransport {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }

    async fn close(&mut self, code: u16) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: String::new().into(),
        };
        self.sink
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }
}

/// Map one tungstenite read result onto a [`TransportEvent`]. Control frames
/// are handled by tungstenite and yield `None`.
fn translate(message: std::result::Result<Message, tungstenite::Error>) -> Option<TransportEvent> {
    match message {
        Ok(Message::Text(text)) => Some(TransportEvent::Text(text.as_str().to_owned())),
        Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Some(TransportEvent::Text(text)),
            Err(_) => {
                warn!(len = bytes.len(), "dropping non-utf8 binary frame");
                None
            }
        },
        Ok(Message::Close(frame)) => Some(match frame {
            Some(frame) => TransportEvent::Closed {
                code: Some(u16::from(frame.code)),
                reason: frame.reason.as_str().to_owned(),
            },
            None => TransportEvent::Closed {
                code: None,
                reason: String::new(),
            },
        }),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
        Err(e) => Some(TransportEvent::Error(e.to_string())),
    }
}
