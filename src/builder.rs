//! # Builder Module
//!
//! Provides the `CrawlerBuilder`, a fluent API for constructing and configuring
//! `Crawler` instances.
//!
//! ## Overview
//!
//! The builder assembles a spider, a transport, bytes-received hooks, item
//! sinks and an error sink into a [`Crawler`]. Tunables live in
//! [`CrawlerConfig`], which can also be deserialized from any serde source and
//! passed in with [`CrawlerBuilder::with_config`].
//!
//! ## Example
//!
//! ```rust,ignore
//! let items = Arc::new(MemoryItemSink::new());
//! let crawler = CrawlerBuilder::new(MySpider)
//!     .max_concurrent_downloads(8)
//!     .max_errors(10)
//!     .add_bytes_received_hook(|_: &Bytes, _: &Request| ControlSignal::StopSoft)
//!     .add_item_sink(Arc::clone(&items))
//!     .build()?;
//!
//! let summary = crawler.start_crawl().await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderName;
use serde::{Deserialize, Deserializer};
use tokio_util::sync::CancellationToken;

use super::Crawler;
use crate::downloader::{Downloader, ReqwestClientDownloader};
use crate::dupefilter::DupeFilter;
use crate::error::SpiderError;
use crate::fetch::{BytesReceivedHook, CancellableFetcher};
use crate::scheduler::Scheduler;
use crate::sink::{ErrorSink, ItemSink, LogErrorSink, LogItemSink};
use crate::spider::Spider;
use crate::stats::StatCollector;

/// Tunables of a crawl run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// The maximum number of concurrent downloads.
    pub max_concurrent_downloads: usize,
    /// Capacity of the channel carrying fetch outcomes to dispatch.
    pub channel_capacity: usize,
    /// Close the crawl once this many faults were reported.
    pub max_errors: Option<usize>,
    /// Hard-stop downloads whose body grows past this many bytes.
    pub max_download_size: Option<usize>,
    /// Non-2xx statuses handed to callbacks instead of errbacks.
    pub http_error_allowed_statuses: Vec<u16>,
    /// Hand every status to callbacks.
    pub http_error_allow_all: bool,
    #[serde(rename = "shutdown_timeout_ms", deserialize_with = "duration_from_millis")]
    pub shutdown_timeout: Duration,
    #[serde(rename = "idle_poll_interval_ms", deserialize_with = "duration_from_millis")]
    pub idle_poll_interval: Duration,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        CrawlerConfig {
            max_concurrent_downloads: num_cpus::get().max(16),
            channel_capacity: 1000,
            max_errors: None,
            max_download_size: None,
            http_error_allowed_statuses: Vec::new(),
            http_error_allow_all: false,
            shutdown_timeout: Duration::from_secs(30),
            idle_poll_interval: Duration::from_millis(100),
        }
    }
}

impl CrawlerConfig {
    pub fn validate(&self) -> Result<(), SpiderError> {
        if self.max_concurrent_downloads == 0 {
            return Err(SpiderError::Configuration(
                "max_concurrent_downloads must be greater than 0.".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(SpiderError::Configuration(
                "channel_capacity must be greater than 0.".to_string(),
            ));
        }
        if self.max_errors == Some(0) {
            return Err(SpiderError::Configuration(
                "max_errors must be greater than 0 when set.".to_string(),
            ));
        }
        if self.idle_poll_interval.is_zero() {
            return Err(SpiderError::Configuration(
                "idle_poll_interval must be greater than 0.".to_string(),
            ));
        }
        Ok(())
    }
}

fn duration_from_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

pub struct CrawlerBuilder<S: Spider> {
    crawler_config: CrawlerConfig,
    downloader: Arc<dyn Downloader>,
    spider: Option<S>,
    hooks: Vec<Arc<dyn BytesReceivedHook>>,
    item_sinks: Vec<Box<dyn ItemSink>>,
    error_sink: Arc<dyn ErrorSink>,
    fingerprint_headers: Vec<HeaderName>,
}

impl<S: Spider> CrawlerBuilder<S> {
    /// Creates a builder for `spider` using the reqwest-backed downloader.
    pub fn new(spider: S) -> Self {
        Self {
            crawler_config: CrawlerConfig::default(),
            downloader: Arc::new(ReqwestClientDownloader::default()),
            spider: Some(spider),
            hooks: Vec::new(),
            item_sinks: Vec::new(),
            error_sink: Arc::new(LogErrorSink),
            fingerprint_headers: Vec::new(),
        }
    }

    /// Replaces the whole configuration.
    pub fn with_config(mut self, config: CrawlerConfig) -> Self {
        self.crawler_config = config;
        self
    }

    /// Sets the maximum number of concurrent downloads.
    pub fn max_concurrent_downloads(mut self, limit: usize) -> Self {
        self.crawler_config.max_concurrent_downloads = limit;
        self
    }

    /// Sets the capacity of the fetch outcome channel.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.crawler_config.channel_capacity = capacity;
        self
    }

    /// Closes the crawl with `error-limit-exceeded` after `max` faults.
    pub fn max_errors(mut self, max: usize) -> Self {
        self.crawler_config.max_errors = Some(max);
        self
    }

    pub fn max_download_size(mut self, max_bytes: usize) -> Self {
        self.crawler_config.max_download_size = Some(max_bytes);
        self
    }

    /// Lets responses with `status` reach their callback.
    pub fn allow_http_status(mut self, status: u16) -> Self {
        self.crawler_config.http_error_allowed_statuses.push(status);
        self
    }

    pub fn allow_all_http_statuses(mut self) -> Self {
        self.crawler_config.http_error_allow_all = true;
        self
    }

    /// Sets a custom downloader for the crawler.
    pub fn downloader<D: Downloader>(mut self, downloader: D) -> Self {
        self.downloader = Arc::new(downloader);
        self
    }

    /// Registers a hook that sees every body chunk. Hooks run in
    /// registration order.
    pub fn add_bytes_received_hook<H>(mut self, hook: H) -> Self
    where
        H: BytesReceivedHook + 'static,
    {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Adds an item sink. Items pass through sinks in registration order.
    pub fn add_item_sink<I: ItemSink>(mut self, sink: I) -> Self {
        self.item_sinks.push(Box::new(sink));
        self
    }

    pub fn error_sink<E>(mut self, sink: E) -> Self
    where
        E: ErrorSink + 'static,
    {
        self.error_sink = Arc::new(sink);
        self
    }

    /// Makes the named request headers part of the duplicate fingerprint.
    pub fn fingerprint_headers(mut self, headers: Vec<HeaderName>) -> Self {
        self.fingerprint_headers = headers;
        self
    }

    /// Builds the `Crawler`, validating the configuration first.
    pub fn build(mut self) -> Result<Crawler<S>, SpiderError> {
        self.crawler_config.validate()?;
        let spider = self.spider.take().ok_or_else(|| {
            SpiderError::Configuration("Crawler must have a spider.".to_string())
        })?;

        if self.item_sinks.is_empty() {
            self.item_sinks.push(Box::new(LogItemSink));
        }

        let stats = Arc::new(StatCollector::new());
        let dupefilter = DupeFilter::new().with_headers(self.fingerprint_headers);
        let (scheduler, req_rx) = Scheduler::new(dupefilter, Arc::clone(&stats));

        let fetcher = self
            .hooks
            .into_iter()
            .fold(CancellableFetcher::new(self.downloader), |fetcher, hook| {
                fetcher.add_hook(hook)
            })
            .max_download_size(self.crawler_config.max_download_size);

        Ok(Crawler::new(
            scheduler,
            req_rx,
            Arc::new(fetcher),
            spider,
            self.item_sinks,
            self.error_sink,
            self.crawler_config,
            stats,
            CancellationToken::new(),
        ))
    }
}
