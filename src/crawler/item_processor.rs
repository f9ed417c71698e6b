//! Contains the item processor functionality for the crawler.
//! Items are pushed through every registered sink in order, from the task
//! that produced them, so one handler's items keep their yield order.

use crate::callback::Item;
use crate::sink::ItemSink;
use crate::stats::StatCollector;
use futures_util::future::join_all;
use log::{debug, error, trace, warn};
use std::sync::Arc;

pub(crate) struct ItemProcessor {
    sinks: Vec<Box<dyn ItemSink>>,
    stats: Arc<StatCollector>,
}

impl ItemProcessor {
    pub(crate) fn new(sinks: Vec<Box<dyn ItemSink>>, stats: Arc<StatCollector>) -> Self {
        Self { sinks, stats }
    }

    pub(crate) async fn process(&self, item: Item) {
        self.stats.increment_items_scraped();
        trace!("Processing item through {} sinks", self.sinks.len());

        for (idx, sink) in self.sinks.iter().enumerate() {
            trace!(
                "Emitting item to sink '{}' ({} of {})",
                sink.name(),
                idx + 1,
                self.sinks.len()
            );
            if let Err(e) = sink.emit(&item).await {
                warn!("Sink '{}' rejected item: {}", sink.name(), e);
                self.stats.increment_items_dropped();
                return;
            }
        }

        self.stats.increment_items_emitted();
    }

    pub(crate) async fn close_all(&self) {
        debug!("Closing {} item sinks", self.sinks.len());
        let results = join_all(self.sinks.iter().map(|sink| sink.close())).await;
        for (sink, result) in self.sinks.iter().zip(results) {
            if let Err(e) = result {
                error!("Failed to close sink '{}': {}", sink.name(), e);
            }
        }
    }
}
