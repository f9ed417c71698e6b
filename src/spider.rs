//! # Spider Module
//!
//! Defines the `Spider` trait, the user-facing description of a crawl.
//!
//! ## Overview
//!
//! A spider supplies:
//! - its seed requests (`start_urls` or a custom `start_requests` producer),
//! - the named callbacks and errbacks requests refer to (`handlers`),
//! - optionally a list of link-following [`Rule`]s,
//! - a `closed` hook invoked exactly once when the crawl ends.
//!
//! Handlers are resolved by name when a response is dispatched. A request
//! with no callback goes to `parse`, or, when the spider has rules, to
//! `parse_start_url` (if registered) followed by a rule scan.
//!
//! ## Example
//!
//! ```rust,ignore
//! struct QuotesSpider;
//!
//! impl Spider for QuotesSpider {
//!     fn name(&self) -> &str {
//!         "quotes"
//!     }
//!
//!     fn start_urls(&self) -> Vec<String> {
//!         vec!["https://quotes.example/".into()]
//!     }
//!
//!     fn handlers(self: Arc<Self>) -> Handlers {
//!         Handlers::new().callback("parse", |response: Response| -> CallbackResult {
//!             Output::item(json!({ "url": response.url.as_str() })).into()
//!         })
//!     }
//! }
//! ```

use std::sync::Arc;

use crate::callback::{CallbackResult, Handlers, Output};
use crate::error::HandlerError;
use crate::request::Request;
use crate::rules::Rule;
use crate::state::CloseReason;

/// Defines the contract for a spider.
pub trait Spider: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Returns the initial URLs to start crawling from.
    fn start_urls(&self) -> Vec<String> {
        Vec::new()
    }

    /// Produces the seed requests. The default builds a GET request per start
    /// URL that skips the duplicate filter, so a URL listed twice is fetched
    /// twice. An invalid URL ends the producer with a fault.
    fn start_requests(&self) -> CallbackResult {
        let requests = self.start_urls().into_iter().map(|url| {
            Request::get(&url)
                .map(|request| Output::from(request.dont_filter(true)))
                .map_err(HandlerError::from)
        });
        CallbackResult::from_results(requests)
    }

    /// The named callbacks and errbacks of this spider.
    fn handlers(self: Arc<Self>) -> Handlers;

    /// Link-following rules, in evaluation order.
    fn rules(&self) -> Vec<Rule> {
        Vec::new()
    }

    /// Called exactly once when the crawl reaches `Done`.
    fn closed(&self, _reason: CloseReason) {}
}
