// Outbound port toward one client socket. The concrete transport lives in
// the frameworks layer; tests plug in a channel-backed fake.

use async_trait::async_trait;
use bytes::Bytes;

/// One outbound frame. JSON encodings travel as text, MessagePack as binary.
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    Text(String),
    Binary(Bytes),
}

impl WireFrame {
    pub fn len(&self) -> usize {
        match self {
            WireFrame::Text(text) => text.len(),
            WireFrame::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub enum ConnectionError {
    Closed,
}

/// Send side of one live session.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn send(&self, frame: WireFrame) -> Result<(), ConnectionError>;

    /// Tears the socket down. Safe to call more than once.
    async fn close(&self);
}
