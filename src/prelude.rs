//! A "prelude" for users of the `spider-dispatch` crate.
//!
//! Re-exports the types needed to write a spider and run a crawl.
//!
//! # Example
//!
//! ```
//! use spider_dispatch::prelude::*;
//! ```

pub use crate::{
    // Engine
    CloseReason,
    CrawlSummary,
    Crawler,
    CrawlerBuilder,
    CrawlerConfig,
    // Handlers
    CallbackResult,
    Failure,
    HandlerError,
    Handlers,
    Item,
    Output,
    Spider,
    // Model
    Request,
    Response,
    SpiderError,
    // Fetching
    ControlSignal,
    Downloader,
    // Rules
    Rule,
    async_trait,
};

pub use crate::link_extractor::{HtmlLinkExtractor, Link, LinkExtractor};
pub use crate::sink::{ErrorSink, FaultEvent, ItemSink, MemoryErrorSink, MemoryItemSink};

pub use bytes::Bytes;
pub use serde_json::json;
pub use std::sync::Arc;
