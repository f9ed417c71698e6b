//! The `Response` type.
//!
//! A response keeps a reference to the request it answers and exposes that
//! request's metadata bag, so state put into `meta` before the fetch is visible
//! to the handler afterwards.

use std::borrow::Cow;
use std::sync::Arc;

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use url::Url;

use crate::error::SpiderError;
use crate::meta::Meta;
use crate::request::{CbKwargs, Request};

/// Flag set on responses whose download a hook soft-stopped.
pub const FLAG_DOWNLOAD_STOPPED: &str = "download_stopped";

#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub flags: Vec<String>,
    request: Arc<Request>,
}

impl Response {
    /// Creates a response for `request`. The metadata handle is shared with
    /// the request, never copied.
    pub fn from_request(
        request: impl Into<Arc<Request>>,
        status: StatusCode,
        body: impl Into<Bytes>,
    ) -> Self {
        let request = request.into();
        Self {
            url: request.url().clone(),
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            flags: Vec::new(),
            request,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_arc(&self) -> Arc<Request> {
        Arc::clone(&self.request)
    }

    pub fn meta(&self) -> &Meta {
        self.request.meta()
    }

    pub fn cb_kwargs(&self) -> &CbKwargs {
        self.request.cb_kwargs()
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Resolves `href` against the response URL.
    pub fn urljoin(&self, href: &str) -> Result<Url, SpiderError> {
        Ok(self.url.join(href)?)
    }

    /// Builds a GET request for `href`, resolved against the response URL.
    ///
    /// Links that resolve to anything but http(s) fail with
    /// [`SpiderError::InvalidRequest`].
    pub fn follow(&self, href: &str) -> Result<Request, SpiderError> {
        Request::new(self.urljoin(href)?)
    }
}
