//! # Callback Module
//!
//! Handlers and the normalization of what they return.
//!
//! ## Overview
//!
//! A callback receives a [`Response`] and an errback receives a [`Failure`].
//! Both return a [`CallbackResult`], which may take any of these shapes:
//!
//! - nothing ([`CallbackResult::Empty`], or `None`)
//! - a single request or item
//! - a list of requests and items
//! - a lazy iterator, pulled one element at a time, which may fail partway
//! - an async stream
//! - a future resolving to another `CallbackResult` (which may itself suspend)
//!
//! [`CallbackResult::into_producer`] adapts every shape to a single
//! [`Producer`], so the engine drains all handlers the same way. Elements
//! produced before a failure are delivered; the failure comes last and ends
//! the producer.
//!
//! Handlers are registered by name in [`Handlers`] and resolved when a
//! response is dispatched.
//!
//! ## Example
//!
//! ```rust,ignore
//! let handlers = Handlers::new()
//!     .callback("parse", |response: Response| -> CallbackResult {
//!         CallbackResult::from_future(async move {
//!             tokio::time::sleep(Duration::from_millis(50)).await;
//!             Ok::<CallbackResult, HandlerError>(Output::item(json!({ "status": response.status.as_u16() })).into())
//!         })
//!     })
//!     .errback("on_error", |failure: Failure| -> CallbackResult {
//!         Output::item(json!({ "failed": failure.request.url().as_str() })).into()
//!     });
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::{Future, ready};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use serde_json::Value;

use crate::error::{Failure, HandlerError, SpiderError};
use crate::request::Request;
use crate::response::Response;

/// Name of the callback used for requests without an explicit binding.
pub const DEFAULT_CALLBACK: &str = "parse";
/// Callback that sees seed responses when the spider crawls by rules.
pub const PARSE_START_URL: &str = "parse_start_url";

/// A scraped record.
pub type Item = Value;

/// One element produced by a handler.
#[derive(Debug)]
pub enum Output {
    Request(Request),
    Item(Item),
}

impl Output {
    pub fn item(item: impl Into<Item>) -> Self {
        Output::Item(item.into())
    }
}

impl From<Request> for Output {
    fn from(request: Request) -> Self {
        Output::Request(request)
    }
}

impl From<Item> for Output {
    fn from(item: Item) -> Self {
        Output::Item(item)
    }
}

pub type OutputStream = BoxStream<'static, Result<Output, HandlerError>>;

/// The value a handler returns, in any of the supported shapes.
pub enum CallbackResult {
    Empty,
    Single(Output),
    Many(Vec<Output>),
    Iter(Box<dyn Iterator<Item = Result<Output, HandlerError>> + Send>),
    Stream(OutputStream),
    Future(BoxFuture<'static, Result<CallbackResult, HandlerError>>),
}

impl CallbackResult {
    /// Wraps a lazy iterator; it is advanced only as the engine consumes it.
    pub fn from_results<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Result<Output, HandlerError>>,
        I::IntoIter: Send + 'static,
    {
        CallbackResult::Iter(Box::new(iter.into_iter()))
    }

    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Output, HandlerError>> + Send + 'static,
    {
        CallbackResult::Stream(stream.boxed())
    }

    /// Wraps a suspending computation. Only the owning response waits on it.
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<CallbackResult, HandlerError>> + Send + 'static,
    {
        CallbackResult::Future(Box::pin(future))
    }

    /// A handler that failed before producing anything.
    pub fn fault(error: impl Into<HandlerError>) -> Self {
        CallbackResult::Iter(Box::new(std::iter::once(Err(error.into()))))
    }

    pub fn into_producer(self) -> Producer {
        Producer::new(self.into_stream())
    }

    fn into_stream(self) -> OutputStream {
        match self {
            CallbackResult::Empty => stream::empty().boxed(),
            CallbackResult::Single(output) => stream::once(ready(Ok(output))).boxed(),
            CallbackResult::Many(outputs) => stream::iter(outputs.into_iter().map(Ok)).boxed(),
            CallbackResult::Iter(iter) => stream::iter(iter).boxed(),
            CallbackResult::Stream(stream) => stream,
            CallbackResult::Future(future) => stream::once(future)
                .map(|resolved| match resolved {
                    Ok(next) => next.into_stream(),
                    Err(error) => stream::once(ready(Err(error))).boxed(),
                })
                .flatten()
                .boxed(),
        }
    }
}

impl fmt::Debug for CallbackResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackResult::Empty => f.write_str("Empty"),
            CallbackResult::Single(output) => f.debug_tuple("Single").field(output).finish(),
            CallbackResult::Many(outputs) => f.debug_tuple("Many").field(outputs).finish(),
            CallbackResult::Iter(_) => f.write_str("Iter(..)"),
            CallbackResult::Stream(_) => f.write_str("Stream(..)"),
            CallbackResult::Future(_) => f.write_str("Future(..)"),
        }
    }
}

impl From<Output> for CallbackResult {
    fn from(output: Output) -> Self {
        CallbackResult::Single(output)
    }
}

impl From<Request> for CallbackResult {
    fn from(request: Request) -> Self {
        CallbackResult::Single(Output::Request(request))
    }
}

impl From<Item> for CallbackResult {
    fn from(item: Item) -> Self {
        CallbackResult::Single(Output::Item(item))
    }
}

impl From<Vec<Output>> for CallbackResult {
    fn from(outputs: Vec<Output>) -> Self {
        CallbackResult::Many(outputs)
    }
}

impl From<Vec<Request>> for CallbackResult {
    fn from(requests: Vec<Request>) -> Self {
        CallbackResult::Many(requests.into_iter().map(Output::Request).collect())
    }
}

impl<T: Into<CallbackResult>> From<Option<T>> for CallbackResult {
    fn from(value: Option<T>) -> Self {
        value.map_or(CallbackResult::Empty, Into::into)
    }
}

impl<T: Into<CallbackResult>> From<Result<T, HandlerError>> for CallbackResult {
    fn from(value: Result<T, HandlerError>) -> Self {
        match value {
            Ok(result) => result.into(),
            Err(error) => CallbackResult::fault(error),
        }
    }
}

/// Uniform pull interface over every handler shape.
///
/// `next` yields outputs in handler order, then at most one error, then
/// `None`. Awaiting `next` suspends only the caller.
pub struct Producer {
    stream: OutputStream,
    yielded: usize,
    finished: bool,
}

impl Producer {
    fn new(stream: OutputStream) -> Self {
        Self {
            stream,
            yielded: 0,
            finished: false,
        }
    }

    pub async fn next(&mut self) -> Option<Result<Output, HandlerError>> {
        if self.finished {
            return None;
        }
        match self.stream.next().await {
            Some(Ok(output)) => {
                self.yielded += 1;
                Some(Ok(output))
            }
            Some(Err(error)) => {
                self.finished = true;
                Some(Err(error))
            }
            None => {
                self.finished = true;
                None
            }
        }
    }

    /// Outputs delivered so far.
    pub fn yielded(&self) -> usize {
        self.yielded
    }

    /// Drains everything, returning the outputs and the terminating error.
    pub async fn collect(mut self) -> (Vec<Output>, Option<HandlerError>) {
        let mut outputs = Vec::new();
        while let Some(next) = self.next().await {
            match next {
                Ok(output) => outputs.push(output),
                Err(error) => return (outputs, Some(error)),
            }
        }
        (outputs, None)
    }
}

/// A response handler.
pub trait Callback: Send + Sync {
    fn call(&self, response: Response) -> CallbackResult;
}

impl<F> Callback for F
where
    F: Fn(Response) -> CallbackResult + Send + Sync,
{
    fn call(&self, response: Response) -> CallbackResult {
        self(response)
    }
}

/// A failure handler.
pub trait Errback: Send + Sync {
    fn call(&self, failure: Failure) -> CallbackResult;
}

impl<F> Errback for F
where
    F: Fn(Failure) -> CallbackResult + Send + Sync,
{
    fn call(&self, failure: Failure) -> CallbackResult {
        self(failure)
    }
}

/// Callbacks and errbacks keyed by name.
#[derive(Clone, Default)]
pub struct Handlers {
    callbacks: HashMap<String, Arc<dyn Callback>>,
    errbacks: HashMap<String, Arc<dyn Errback>>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback<C>(mut self, name: impl Into<String>, callback: C) -> Self
    where
        C: Callback + 'static,
    {
        self.callbacks.insert(name.into(), Arc::new(callback));
        self
    }

    pub fn errback<E>(mut self, name: impl Into<String>, errback: E) -> Self
    where
        E: Errback + 'static,
    {
        self.errbacks.insert(name.into(), Arc::new(errback));
        self
    }

    pub fn has_callback(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    pub fn has_errback(&self, name: &str) -> bool {
        self.errbacks.contains_key(name)
    }

    pub fn get_callback(&self, name: &str, url: &str) -> Result<Arc<dyn Callback>, SpiderError> {
        self.callbacks
            .get(name)
            .cloned()
            .ok_or_else(|| SpiderError::UnknownHandler {
                name: name.to_string(),
                url: url.to_string(),
            })
    }

    pub fn get_errback(&self, name: &str, url: &str) -> Result<Arc<dyn Errback>, SpiderError> {
        self.errbacks
            .get(name)
            .cloned()
            .ok_or_else(|| SpiderError::UnknownHandler {
                name: name.to_string(),
                url: url.to_string(),
            })
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut callbacks: Vec<_> = self.callbacks.keys().collect();
        let mut errbacks: Vec<_> = self.errbacks.keys().collect();
        callbacks.sort();
        errbacks.sort();
        f.debug_struct("Handlers")
            .field("callbacks", &callbacks)
            .field("errbacks", &errbacks)
            .finish()
    }
}
