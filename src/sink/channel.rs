use super::{EventSink, SinkError};
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

/// Forwards owned copies of published items into an mpsc channel
pub struct ChannelSink<T> {
    tx: mpsc::Sender<T>,
}

impl<T> ChannelSink<T> {
    pub fn new(tx: mpsc::Sender<T>) -> Self {
        Self { tx }
    }

    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl<T> EventSink<T> for ChannelSink<T>
where
    T: Serialize + Clone + Send + Sync + 'static,
{
    async fn publish(&mut self, item: &T) -> Result<(), SinkError> {
        self.tx.send(item.clone()).await.map_err(|_| SinkError::Closed)
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "CHANNEL"
    }
}
