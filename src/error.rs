//! Error types shared by every stage of the crawl.
//!
//! `SpiderError` is the library error. User handlers return `anyhow::Result`
//! (see [`HandlerError`]) and the engine folds those into
//! [`SpiderError::HandlerFault`] together with the number of items the handler
//! managed to yield before failing.
//!
//! A [`Failure`] is what an errback receives: the request that failed, the
//! reason, and whatever part of the response had already arrived.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use crate::request::Request;
use crate::response::Response;

/// Error type produced by user callbacks and errbacks.
pub type HandlerError = anyhow::Error;

/// Errors raised by the crawl engine.
#[derive(Debug, Clone, Error)]
pub enum SpiderError {
    /// The request could not be constructed (empty address, bad method, bad URL).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A request referenced a callback or errback that is not registered.
    #[error("unknown handler '{name}' for {url}")]
    UnknownHandler { name: String, url: String },

    /// The transport failed to produce a response.
    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },

    /// A bytes-received hook hard-stopped the download.
    #[error("download of {url} stopped after {received} bytes: {reason}")]
    DownloadStopped {
        url: String,
        reason: String,
        received: usize,
    },

    /// The response arrived with a status the crawl does not handle.
    #[error("ignoring non-2xx response ({status}) for {url}")]
    HttpStatus { url: String, status: u16 },

    /// A callback or errback raised while producing output.
    ///
    /// Only the number of outputs yielded before the fault is kept. Those
    /// outputs were already emitted or scheduled when the fault is reported.
    #[error("handler '{callback}' failed on {url} after yielding {yielded} item(s): {message}")]
    HandlerFault {
        callback: String,
        url: String,
        yielded: usize,
        message: String,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("{0}")]
    General(String),
}

impl From<serde_json::Error> for SpiderError {
    fn from(err: serde_json::Error) -> Self {
        SpiderError::Json(err.to_string())
    }
}

impl SpiderError {
    /// Builds a `HandlerFault` from a handler error.
    pub(crate) fn handler_fault(
        callback: &str,
        url: impl Into<String>,
        yielded: usize,
        err: &HandlerError,
    ) -> Self {
        SpiderError::HandlerFault {
            callback: callback.to_string(),
            url: url.into(),
            yielded,
            message: format!("{:#}", err),
        }
    }

    /// Returns true for downloads a hook hard-stopped.
    pub fn is_download_stopped(&self) -> bool {
        matches!(self, SpiderError::DownloadStopped { .. })
    }

    /// Returns true for the HTTP status filter rejection.
    pub fn is_http_status(&self) -> bool {
        matches!(self, SpiderError::HttpStatus { .. })
    }

    /// Returns true for faults raised by user handler code.
    pub fn is_handler_fault(&self) -> bool {
        matches!(
            self,
            SpiderError::HandlerFault { .. } | SpiderError::UnknownHandler { .. }
        )
    }
}

/// A failed fetch, as delivered to an errback or to the error sink.
#[derive(Debug, Clone)]
pub struct Failure {
    /// The request whose fetch failed.
    pub request: Arc<Request>,
    /// Why it failed.
    pub error: SpiderError,
    /// The response received so far, if any. A hard-stopped download carries
    /// its partial body here; an HTTP status rejection carries the full one.
    pub response: Option<Response>,
}

impl Failure {
    pub fn new(request: Arc<Request>, error: SpiderError) -> Self {
        Self {
            request,
            error,
            response: None,
        }
    }

    pub fn with_response(mut self, response: Response) -> Self {
        self.response = Some(response);
        self
    }

    /// Body bytes received before the failure, if a response exists.
    pub fn partial_body(&self) -> Option<&Bytes> {
        self.response.as_ref().map(|r| &r.body)
    }

    pub fn request(&self) -> &Request {
        &self.request
    }
}
