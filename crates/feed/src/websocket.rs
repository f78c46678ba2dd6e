//! GDAX websocket transport
//!
//! Thin wrapper over tokio-tungstenite exposing text frames only. Pings are
//! answered here; close frames and end of stream surface as
//! [`TransportError::ConnectionClosed`].

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace};
use url::Url;

use crate::error::TransportError;
use crate::transport::{Connect, FeedTransport};

/// GDAX public feed URL
pub const GDAX_WS_URL: &str = "wss://ws-feed.gdax.com";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens [`WsTransport`] connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connect for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self, url: &str) -> Result<WsTransport, TransportError> {
        WsTransport::connect(url).await
    }
}

/// Websocket connection split into independently locked halves, so a pending
/// receive does not block control frames going out.
pub struct WsTransport {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WsTransport {
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let url = Url::parse(url).map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        info!(url = %url, "Connecting to GDAX websocket feed");

        let (ws, response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        info!(status = ?response.status(), "GDAX websocket connected");

        let (sink, stream) = ws.split();
        Ok(Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        })
    }
}

#[async_trait]
impl FeedTransport for WsTransport {
    async fn send(&self, text: String) -> Result<(), TransportError> {
        self.sink.lock().await.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn receive(&self) -> Result<String, TransportError> {
        loop {
            let next = self.stream.lock().await.next().await;
            match next {
                Some(Ok(Message::Text(text))) => {
                    trace!(bytes = text.len(), "Received frame");
                    return Ok(text);
                }
                Some(Ok(Message::Binary(data))) => {
                    return String::from_utf8(data)
                        .map_err(|e| TransportError::ReceiveFailed(e.to_string()));
                }
                Some(Ok(Message::Ping(data))) => {
                    trace!("Received WS ping, sending pong");
                    self.sink.lock().await.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(frame = ?frame, "GDAX websocket closed by server");
                    return Err(TransportError::ConnectionClosed);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(TransportError::ConnectionClosed),
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        match self.sink.lock().await.close().await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                debug!("GDAX websocket already closed");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
