use async_trait::async_trait;
use serde::Serialize;

use crate::error::TransportError;

/// Full-duplex text-frame connection to the feed.
///
/// Methods take `&self` so the owning task and the receive task can share one
/// handle; implementations synchronize internally.
#[async_trait]
pub trait FeedTransport: Send + Sync + 'static {
    /// Send one text frame
    async fn send(&self, text: String) -> Result<(), TransportError>;

    /// Wait for the next text frame
    async fn receive(&self) -> Result<String, TransportError>;

    /// Close the connection
    async fn close(&self) -> Result<(), TransportError>;
}

/// Opens transports to a feed URL.
#[async_trait]
pub trait Connect: Send + Sync + 'static {
    type Transport: FeedTransport;

    async fn connect(&self, url: &str) -> Result<Self::Transport, TransportError>;
}

/// Frames the client sends to the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    Subscribe { product_ids: Vec<String> },
    Heartbeat { on: bool },
}

impl ControlFrame {
    pub fn subscribe(products: &[String]) -> Self {
        ControlFrame::Subscribe {
            product_ids: products.to_vec(),
        }
    }

    /// Short name for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            ControlFrame::Subscribe { .. } => "subscribe",
            ControlFrame::Heartbeat { on: true } => "heartbeat_on",
            ControlFrame::Heartbeat { on: false } => "heartbeat_off",
        }
    }

    pub fn to_text(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscribe_frame_shape() {
        let frame = ControlFrame::subscribe(&["BTC-USD".to_string(), "ETH-USD".to_string()]);
        let value: serde_json::Value = serde_json::from_str(&frame.to_text().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "subscribe", "product_ids": ["BTC-USD", "ETH-USD"]})
        );
        assert_eq!(frame.name(), "subscribe");
    }

    #[test]
    fn test_heartbeat_frame_shape() {
        let on: serde_json::Value =
            serde_json::from_str(&ControlFrame::Heartbeat { on: true }.to_text().unwrap()).unwrap();
        assert_eq!(on, json!({"type": "heartbeat", "on": true}));

        let off: serde_json::Value =
            serde_json::from_str(&ControlFrame::Heartbeat { on: false }.to_text().unwrap()).unwrap();
        assert_eq!(off, json!({"type": "heartbeat", "on": false}));
    }
}
