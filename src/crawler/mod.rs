//! # Crawler Module
//!
//! Implements the dispatch engine that drives a crawl run.
//!
//! ## Overview
//!
//! A run is a handful of cooperating Tokio tasks:
//!
//! - the start-requests task drains `Spider::start_requests`,
//! - the downloader task pulls admitted requests from the scheduler and runs
//!   the cancellable fetches concurrently,
//! - the parser task spawns one dispatch task per fetch outcome, which runs
//!   the callback or errback, re-submits produced requests, emits items and
//!   applies the link-following rules.
//!
//! `Crawler` watches the shared state, moves the run through
//! `Idle -> Running -> Draining -> Done`, and closes it exactly once.

mod core;
mod item_processor;
mod request_handler;
mod response_parser;

pub use core::{CrawlSummary, Crawler};
pub use response_parser::{META_HANDLE_HTTPSTATUS_ALL, META_HANDLE_HTTPSTATUS_LIST};
