pub mod channel;
pub mod jsonl;

pub use channel::ChannelSink;
pub use jsonl::JsonlSink;

use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug)]
pub enum SinkError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    /// Receiving side of a channel sink was dropped
    Closed,
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err)
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Serialization(err)
    }
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Io(e) => write!(f, "IO error: {}", e),
            SinkError::Serialization(e) => write!(f, "Serialization error: {}", e),
            SinkError::Closed => write!(f, "Sink closed"),
        }
    }
}

impl std::error::Error for SinkError {}

/// Destination for reconstructed events and merge emissions
#[async_trait]
pub trait EventSink<T: Serialize + Send + Sync>: Send {
    /// Publish a single item
    async fn publish(&mut self, item: &T) -> Result<(), SinkError>;

    /// Flush pending writes to storage
    async fn flush(&mut self) -> Result<(), SinkError>;

    /// Sink type for logging
    fn sink_type(&self) -> &'static str;
}
