//! # spider-dispatch
//!
//! Crawl-callback dispatch and link-following engine.
//!
//! Turns HTTP responses into follow-up requests, scraped items and faults
//! through named handlers, with fingerprint de-duplication, cancellable
//! downloads (soft and hard stops) and rule-based link following.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_dispatch::prelude::*;
//!
//! struct MySpider;
//!
//! impl Spider for MySpider {
//!     fn name(&self) -> &str { "my_spider" }
//!     fn start_urls(&self) -> Vec<String> { vec!["https://example.com".into()] }
//!     fn handlers(self: Arc<Self>) -> Handlers {
//!         Handlers::new().callback("parse", |response: Response| -> CallbackResult {
//!             Output::item(json!({ "title": response.text().len() })).into()
//!         })
//!     }
//! }
//!
//! async fn run_crawler() -> Result<(), SpiderError> {
//!     let summary = CrawlerBuilder::new(MySpider).build()?.start_crawl().await?;
//!     println!("closed: {}", summary.reason);
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod callback;
pub mod crawler;
pub mod downloader;
pub mod dupefilter;
pub mod error;
pub mod fetch;
pub mod link_extractor;
pub mod meta;
pub mod prelude;
pub mod request;
pub mod response;
pub mod rules;
pub mod scheduler;
pub mod sink;
pub mod spider;
pub mod state;
pub mod stats;

pub use builder::{CrawlerBuilder, CrawlerConfig};
pub use callback::{CallbackResult, Handlers, Item, Output};
pub use crawler::{CrawlSummary, Crawler};
pub use downloader::{DownloadEvent, DownloadStream, Downloader, ReqwestClientDownloader};
pub use dupefilter::{Admission, DupeFilter};
pub use error::{Failure, HandlerError, SpiderError};
pub use fetch::{BytesReceivedHook, CancellationOutcome, ControlSignal, FetchOutcome};
pub use request::Request;
pub use response::Response;
pub use rules::{LinkFollower, Rule};
pub use scheduler::Scheduler;
pub use spider::Spider;
pub use state::{CloseReason, CrawlPhase};

pub use async_trait::async_trait;
pub use tokio;
