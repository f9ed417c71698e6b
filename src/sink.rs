//! # Sink Module
//!
//! Where the crawl's observable output goes.
//!
//! ## Overview
//!
//! Scraped items are handed to every registered [`ItemSink`] in registration
//! order. Faults (transport failures, hard-stopped downloads, HTTP status
//! rejections without an errback, and handler faults) go to the single
//! [`ErrorSink`]. Duplicate suppression is never reported here.
//!
//! ## Provided sinks
//!
//! - [`LogItemSink`]: logs each item; used when no item sink is registered
//! - [`MemoryItemSink`]: keeps items in memory, mostly for tests
//! - [`ChannelItemSink`]: forwards items to a `kanal` channel
//! - [`LogErrorSink`]: logs each fault; the default error sink
//! - [`MemoryErrorSink`]: keeps fault events in memory

use std::sync::Arc;

use async_trait::async_trait;
use kanal::AsyncSender;
use parking_lot::Mutex;
use tracing::{error, info};

use crate::callback::Item;
use crate::error::{Failure, SpiderError};
use crate::request::Request;

/// A fault observed during the crawl.
#[derive(Debug, Clone)]
pub enum FaultEvent {
    /// A fetch failed and no errback took it.
    Download(Failure),
    /// A callback, errback or start-request producer failed.
    Handler {
        error: SpiderError,
        request: Option<Arc<Request>>,
    },
}

impl FaultEvent {
    pub fn error(&self) -> &SpiderError {
        match self {
            FaultEvent::Download(failure) => &failure.error,
            FaultEvent::Handler { error, .. } => error,
        }
    }

    pub fn request(&self) -> Option<&Request> {
        match self {
            FaultEvent::Download(failure) => Some(failure.request()),
            FaultEvent::Handler { request, .. } => request.as_deref(),
        }
    }

    /// Body bytes attached to the fault, for hard-stopped downloads and
    /// rejected statuses.
    pub fn body_len(&self) -> Option<usize> {
        match self {
            FaultEvent::Download(failure) => failure.partial_body().map(|b| b.len()),
            FaultEvent::Handler { .. } => None,
        }
    }
}

/// Receives faults. Called from many tasks at once.
pub trait ErrorSink: Send + Sync {
    fn emit(&self, event: &FaultEvent);
}

/// Receives scraped items.
#[async_trait]
pub trait ItemSink: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Accepts one item. An error stops the item from reaching later sinks.
    async fn emit(&self, item: &Item) -> Result<(), SpiderError>;

    /// Called once after the crawl reached its terminal state.
    async fn close(&self) -> Result<(), SpiderError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn emit(&self, event: &FaultEvent) {
        match event.request() {
            Some(request) => error!("Error processing {}: {}", request.url(), event.error()),
            None => error!("Crawl error: {}", event.error()),
        }
    }
}

/// Records every fault event.
#[derive(Debug, Default)]
pub struct MemoryErrorSink {
    events: Mutex<Vec<FaultEvent>>,
}

impl MemoryErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FaultEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ErrorSink for MemoryErrorSink {
    fn emit(&self, event: &FaultEvent) {
        self.events.lock().push(event.clone());
    }
}

impl<T: ErrorSink + ?Sized> ErrorSink for Arc<T> {
    fn emit(&self, event: &FaultEvent) {
        (**self).emit(event)
    }
}

#[derive(Debug, Default)]
pub struct LogItemSink;

#[async_trait]
impl ItemSink for LogItemSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn emit(&self, item: &Item) -> Result<(), SpiderError> {
        info!("Scraped item: {}", item);
        Ok(())
    }
}

/// Collects items in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemoryItemSink {
    items: Mutex<Vec<Item>>,
}

impl MemoryItemSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> Vec<Item> {
        self.items.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ItemSink for MemoryItemSink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn emit(&self, item: &Item) -> Result<(), SpiderError> {
        self.items.lock().push(item.clone());
        Ok(())
    }
}

#[async_trait]
impl<T: ItemSink + ?Sized> ItemSink for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn emit(&self, item: &Item) -> Result<(), SpiderError> {
        (**self).emit(item).await
    }

    async fn close(&self) -> Result<(), SpiderError> {
        (**self).close().await
    }
}

/// Forwards items to a channel; the channel is closed when the crawl ends.
pub struct ChannelItemSink {
    tx: AsyncSender<Item>,
}

impl ChannelItemSink {
    pub fn new(tx: AsyncSender<Item>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ItemSink for ChannelItemSink {
    fn name(&self) -> &str {
        "channel"
    }

    async fn emit(&self, item: &Item) -> Result<(), SpiderError> {
        self.tx
            .send(item.clone())
            .await
            .map_err(|e| SpiderError::General(format!("item channel closed: {}", e)))
    }

    async fn close(&self) -> Result<(), SpiderError> {
        let _ = self.tx.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_sink_keeps_order() {
        let sink = MemoryItemSink::new();
        sink.emit(&json!({"id": 1})).await.unwrap();
        sink.emit(&json!({"id": 2})).await.unwrap();
        assert_eq!(sink.items(), vec![json!({"id": 1}), json!({"id": 2})]);
    }

    #[tokio::test]
    async fn channel_sink_forwards_and_closes() {
        let (tx, rx) = kanal::unbounded_async();
        let sink = ChannelItemSink::new(tx);
        sink.emit(&json!({"id": 1})).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), json!({"id": 1}));
        sink.close().await.unwrap();
        assert!(sink.emit(&json!({"id": 2})).await.is_err());
    }

    #[test]
    fn fault_event_exposes_partial_body() {
        let request = Arc::new(Request::get("http://a.test/").unwrap());
        let response = crate::response::Response::from_request(
            Arc::clone(&request),
            reqwest::StatusCode::OK,
            vec![0u8; 7],
        );
        let failure = Failure::new(
            request,
            SpiderError::DownloadStopped {
                url: "http://a.test/".into(),
                reason: "stop".into(),
                received: 7,
            },
        )
        .with_response(response);
        let sink = MemoryErrorSink::new();
        sink.emit(&FaultEvent::Download(failure));
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].body_len(), Some(7));
        assert!(events[0].error().is_download_stopped());
    }
}
