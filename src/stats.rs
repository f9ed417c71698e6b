//! # Statistics Module
//!
//! Collects counters about a crawl run.
//!
//! ## Key Metrics Tracked
//!
//! - **Requests**: enqueued, suppressed as duplicates, sent, succeeded, failed
//! - **Downloads**: soft-stopped and hard-stopped by bytes-received hooks, bytes received
//! - **Responses**: received and status code distribution
//! - **Items**: scraped by handlers, emitted to every sink, dropped by a failing sink
//! - **Handlers**: faults and errback invocations
//!
//! Duplicate suppression has its own counter and is never counted as a fault.
//!
//! ## Example
//!
//! ```rust,ignore
//! let summary = crawler.start_crawl().await?;
//! println!("{}", summary.stats);
//! println!("{}", summary.stats.to_json_string_pretty()?);
//! ```

use crate::error::SpiderError;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

// Point-in-time copy of the counters used by every presentation method.
struct StatsSnapshot {
    requests_enqueued: usize,
    requests_duplicate_suppressed: usize,
    requests_sent: usize,
    requests_succeeded: usize,
    requests_failed: usize,
    downloads_stopped_soft: usize,
    downloads_stopped_hard: usize,
    responses_received: usize,
    total_bytes_downloaded: usize,
    items_scraped: usize,
    items_emitted: usize,
    items_dropped: usize,
    handler_faults: usize,
    errback_invocations: usize,
    response_status_counts: HashMap<u16, usize>,
    elapsed_duration: Duration,
}

impl StatsSnapshot {
    fn formatted_duration(&self) -> String {
        format!("{:?}", self.elapsed_duration)
    }

    fn per_second(&self, count: usize) -> f64 {
        let total_seconds = self.elapsed_duration.as_secs_f64();
        if total_seconds > 0.0 {
            count as f64 / total_seconds
        } else {
            0.0
        }
    }

    fn formatted_bytes(&self) -> String {
        const KB: usize = 1024;
        const MB: usize = 1024 * KB;
        const GB: usize = 1024 * MB;

        if self.total_bytes_downloaded >= GB {
            format!("{:.2} GB", self.total_bytes_downloaded as f64 / GB as f64)
        } else if self.total_bytes_downloaded >= MB {
            format!("{:.2} MB", self.total_bytes_downloaded as f64 / MB as f64)
        } else if self.total_bytes_downloaded >= KB {
            format!("{:.2} KB", self.total_bytes_downloaded as f64 / KB as f64)
        } else {
            format!("{} B", self.total_bytes_downloaded)
        }
    }

    fn status_codes(&self, separator: &str, line: impl Fn(u16, usize) -> String) -> String {
        let mut codes: Vec<_> = self.response_status_counts.iter().collect();
        codes.sort();
        codes
            .into_iter()
            .map(|(code, count)| line(*code, *count))
            .collect::<Vec<String>>()
            .join(separator)
    }
}

/// Collects and stores statistics about a crawl run.
#[derive(Debug, serde::Serialize)]
pub struct StatCollector {
    #[serde(skip)]
    pub start_time: Instant,

    // Request-related metrics
    pub requests_enqueued: AtomicUsize,
    pub requests_duplicate_suppressed: AtomicUsize,
    pub requests_sent: AtomicUsize,
    pub requests_succeeded: AtomicUsize,
    pub requests_failed: AtomicUsize,

    // Download cancellation
    pub downloads_stopped_soft: AtomicUsize,
    pub downloads_stopped_hard: AtomicUsize,

    // Response-related metrics
    pub responses_received: AtomicUsize,
    pub response_status_counts: Arc<dashmap::DashMap<u16, usize>>,
    pub total_bytes_downloaded: AtomicUsize,

    // Item-related metrics
    pub items_scraped: AtomicUsize,
    pub items_emitted: AtomicUsize,
    pub items_dropped: AtomicUsize,

    // Handler metrics
    pub handler_faults: AtomicUsize,
    pub errback_invocations: AtomicUsize,
}

impl StatCollector {
    /// Creates a new `StatCollector` with all counters initialized to zero.
    pub fn new() -> Self {
        StatCollector {
            start_time: Instant::now(),
            requests_enqueued: AtomicUsize::new(0),
            requests_duplicate_suppressed: AtomicUsize::new(0),
            requests_sent: AtomicUsize::new(0),
            requests_succeeded: AtomicUsize::new(0),
            requests_failed: AtomicUsize::new(0),
            downloads_stopped_soft: AtomicUsize::new(0),
            downloads_stopped_hard: AtomicUsize::new(0),
            responses_received: AtomicUsize::new(0),
            response_status_counts: Arc::new(dashmap::DashMap::new()),
            total_bytes_downloaded: AtomicUsize::new(0),
            items_scraped: AtomicUsize::new(0),
            items_emitted: AtomicUsize::new(0),
            items_dropped: AtomicUsize::new(0),
            handler_faults: AtomicUsize::new(0),
            errback_invocations: AtomicUsize::new(0),
        }
    }

    fn snapshot(&self) -> StatsSnapshot {
        let mut status_counts: HashMap<u16, usize> = HashMap::new();
        for entry in self.response_status_counts.iter() {
            let (key, value) = entry.pair();
            status_counts.insert(*key, *value);
        }

        StatsSnapshot {
            requests_enqueued: self.requests_enqueued.load(Ordering::SeqCst),
            requests_duplicate_suppressed: self
                .requests_duplicate_suppressed
                .load(Ordering::SeqCst),
            requests_sent: self.requests_sent.load(Ordering::SeqCst),
            requests_succeeded: self.requests_succeeded.load(Ordering::SeqCst),
            requests_failed: self.requests_failed.load(Ordering::SeqCst),
            downloads_stopped_soft: self.downloads_stopped_soft.load(Ordering::SeqCst),
            downloads_stopped_hard: self.downloads_stopped_hard.load(Ordering::SeqCst),
            responses_received: self.responses_received.load(Ordering::SeqCst),
            total_bytes_downloaded: self.total_bytes_downloaded.load(Ordering::SeqCst),
            items_scraped: self.items_scraped.load(Ordering::SeqCst),
            items_emitted: self.items_emitted.load(Ordering::SeqCst),
            items_dropped: self.items_dropped.load(Ordering::SeqCst),
            handler_faults: self.handler_faults.load(Ordering::SeqCst),
            errback_invocations: self.errback_invocations.load(Ordering::SeqCst),
            response_status_counts: status_counts,
            elapsed_duration: self.start_time.elapsed(),
        }
    }

    pub(crate) fn increment_requests_enqueued(&self) {
        self.requests_enqueued.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_duplicate_suppressed(&self) {
        self.requests_duplicate_suppressed
            .fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_succeeded(&self) {
        self.requests_succeeded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_downloads_stopped_soft(&self) {
        self.downloads_stopped_soft.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_downloads_stopped_hard(&self) {
        self.downloads_stopped_hard.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_responses_received(&self) {
        self.responses_received.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_response_status(&self, status_code: u16) {
        *self.response_status_counts.entry(status_code).or_insert(0) += 1;
    }

    pub(crate) fn add_bytes_downloaded(&self, bytes: usize) {
        self.total_bytes_downloaded
            .fetch_add(bytes, Ordering::SeqCst);
    }

    pub(crate) fn increment_items_scraped(&self) {
        self.items_scraped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_items_emitted(&self) {
        self.items_emitted.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_items_dropped(&self) {
        self.items_dropped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_handler_faults(&self) {
        self.handler_faults.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_errback_invocations(&self) {
        self.errback_invocations.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of times the given status code was received.
    pub fn status_count(&self, status_code: u16) -> usize {
        self.response_status_counts
            .get(&status_code)
            .map(|count| *count)
            .unwrap_or(0)
    }

    pub fn to_json_string(&self) -> Result<String, SpiderError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_string_pretty(&self) -> Result<String, SpiderError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Exports the current statistics to a Markdown formatted string.
    pub fn to_markdown_string(&self) -> String {
        let snapshot = self.snapshot();

        let status_codes_list =
            snapshot.status_codes("\n", |code, count| format!("- **{}**: {}", code, count));
        let status_codes_output = if status_codes_list.is_empty() {
            "N/A".to_string()
        } else {
            status_codes_list
        };

        format!(
            r#"# Crawl Statistics Report

- **Duration**: {}
- **Average Speed**: {:.2} req/s, {:.2} resp/s, {:.2} item/s

## Requests
| Metric     | Count |
|------------|-------|
| Enqueued   | {}     |
| Duplicates | {}     |
| Sent       | {}     |
| Succeeded  | {}     |
| Failed     | {}     |

## Downloads
| Metric       | Count |
|--------------|-------|
| Soft-stopped | {}     |
| Hard-stopped | {}     |
| Received     | {}     |
| Downloaded   | {}     |

## Items
| Metric     | Count |
|------------|-------|
| Scraped    | {}     |
| Emitted    | {}     |
| Dropped    | {}     |

## Handlers
| Metric     | Count |
|------------|-------|
| Faults     | {}     |
| Errbacks   | {}     |

## Status Codes
{}
"#,
            snapshot.formatted_duration(),
            snapshot.per_second(snapshot.requests_sent),
            snapshot.per_second(snapshot.responses_received),
            snapshot.per_second(snapshot.items_scraped),
            snapshot.requests_enqueued,
            snapshot.requests_duplicate_suppressed,
            snapshot.requests_sent,
            snapshot.requests_succeeded,
            snapshot.requests_failed,
            snapshot.downloads_stopped_soft,
            snapshot.downloads_stopped_hard,
            snapshot.responses_received,
            snapshot.formatted_bytes(),
            snapshot.items_scraped,
            snapshot.items_emitted,
            snapshot.items_dropped,
            snapshot.handler_faults,
            snapshot.errback_invocations,
            status_codes_output
        )
    }
}

impl Default for StatCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StatCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();

        writeln!(f, "\nCrawl Statistics")?;
        writeln!(f, "----------------")?;
        writeln!(f, "  duration : {}", snapshot.formatted_duration())?;
        writeln!(
            f,
            "  speed    : req/s: {:.2}, resp/s: {:.2}, item/s: {:.2}",
            snapshot.per_second(snapshot.requests_sent),
            snapshot.per_second(snapshot.responses_received),
            snapshot.per_second(snapshot.items_scraped)
        )?;
        writeln!(
            f,
            "  requests : enqueued: {}, dupes: {}, sent: {}, ok: {}, fail: {}",
            snapshot.requests_enqueued,
            snapshot.requests_duplicate_suppressed,
            snapshot.requests_sent,
            snapshot.requests_succeeded,
            snapshot.requests_failed
        )?;
        writeln!(
            f,
            "  download : received: {}, soft-stop: {}, hard-stop: {}, bytes: {}",
            snapshot.responses_received,
            snapshot.downloads_stopped_soft,
            snapshot.downloads_stopped_hard,
            snapshot.formatted_bytes()
        )?;
        writeln!(
            f,
            "  items    : scraped: {}, emitted: {}, dropped: {}",
            snapshot.items_scraped, snapshot.items_emitted, snapshot.items_dropped
        )?;
        writeln!(
            f,
            "  handlers : faults: {}, errbacks: {}",
            snapshot.handler_faults, snapshot.errback_invocations
        )?;

        let status_string = if snapshot.response_status_counts.is_empty() {
            "none".to_string()
        } else {
            snapshot.status_codes(", ", |code, count| format!("{}: {}", code, count))
        };

        writeln!(f, "  status   : {}\n", status_string)
    }
}
