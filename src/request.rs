//! The `Request` type and its fingerprint.
//!
//! Address, method and body are fixed once the request is built; the builder
//! methods consume the request so they can only run before it is submitted.
//! The metadata bag is shared (see [`Meta`]) and may be mutated at any time.

use std::fmt::Write as _;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use url::Url;

pub use reqwest::Method;

use crate::error::SpiderError;
use crate::meta::Meta;

/// Keyword arguments handed to the request's callback.
pub type CbKwargs = Map<String, Value>;

const SUPPORTED_METHODS: [Method; 7] = [
    Method::GET,
    Method::HEAD,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::PATCH,
    Method::OPTIONS,
];

#[derive(Debug, Clone)]
pub struct Request {
    url: Url,
    method: Method,
    body: Option<Bytes>,
    headers: HeaderMap,
    callback: Option<String>,
    errback: Option<String>,
    cb_kwargs: CbKwargs,
    meta: Meta,
    dont_filter: bool,
    rule: Option<usize>,
}

impl Request {
    /// Creates a GET request for an already parsed URL.
    ///
    /// Fails with [`SpiderError::InvalidRequest`] unless the scheme is http(s).
    pub fn new(url: Url) -> Result<Self, SpiderError> {
        check_scheme(&url)?;
        Ok(Self {
            url,
            method: Method::GET,
            body: None,
            headers: HeaderMap::new(),
            callback: None,
            errback: None,
            cb_kwargs: CbKwargs::new(),
            meta: Meta::new(),
            dont_filter: false,
            rule: None,
        })
    }

    /// Parses `address` and creates a GET request for it.
    pub fn get(address: &str) -> Result<Self, SpiderError> {
        Self::build(address, "GET")
    }

    /// Validates `address` and `method` and creates a request.
    ///
    /// Fails with [`SpiderError::InvalidRequest`] when the address is empty,
    /// not an absolute http(s) URL, or the method is not one of the standard
    /// HTTP verbs.
    pub fn build(address: &str, method: &str) -> Result<Self, SpiderError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(SpiderError::InvalidRequest("empty request address".into()));
        }
        let url = Url::parse(address)
            .map_err(|e| SpiderError::InvalidRequest(format!("bad address '{}': {}", address, e)))?;
        Self::new(url)?.with_method(parse_method(method)?)
    }

    /// Fails with [`SpiderError::InvalidRequest`] for verbs outside the
    /// standard set, such as `CONNECT` or extension methods.
    pub fn with_method(mut self, method: Method) -> Result<Self, SpiderError> {
        if !SUPPORTED_METHODS.contains(&method) {
            return Err(SpiderError::InvalidRequest(format!(
                "unsupported method '{}'",
                method
            )));
        }
        self.method = method;
        Ok(self)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Binds the request to a named callback.
    pub fn with_callback(mut self, name: impl Into<String>) -> Self {
        self.callback = Some(name.into());
        self
    }

    /// Binds the request to a named errback.
    pub fn with_errback(mut self, name: impl Into<String>) -> Self {
        self.errback = Some(name.into());
        self
    }

    pub fn with_cb_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.cb_kwargs.insert(key.into(), value.into());
        self
    }

    pub fn with_cb_kwargs(mut self, kwargs: CbKwargs) -> Self {
        self.cb_kwargs = kwargs;
        self
    }

    /// Replaces the metadata handle. The bag itself is shared, not copied.
    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    /// Stores one entry in the request's metadata bag.
    pub fn with_meta_value(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key, value);
        self
    }

    /// Lets the request through the duplicate filter unconditionally.
    pub fn dont_filter(mut self, dont_filter: bool) -> Self {
        self.dont_filter = dont_filter;
        self
    }

    pub(crate) fn with_rule(mut self, rule: usize) -> Self {
        self.rule = Some(rule);
        self
    }

    /// Builds a request for another URL that keeps every other attribute,
    /// including the shared metadata bag.
    pub fn replace_url(&self, url: Url) -> Result<Self, SpiderError> {
        check_scheme(&url)?;
        Ok(Self {
            url,
            ..self.clone()
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn callback(&self) -> Option<&str> {
        self.callback.as_deref()
    }

    pub fn errback(&self) -> Option<&str> {
        self.errback.as_deref()
    }

    pub fn cb_kwargs(&self) -> &CbKwargs {
        &self.cb_kwargs
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn is_dont_filter(&self) -> bool {
        self.dont_filter
    }

    /// Index of the crawl rule that produced this request, if any.
    pub fn rule(&self) -> Option<usize> {
        self.rule
    }

    /// Canonical fingerprint over method, normalized URL and body.
    pub fn fingerprint(&self) -> String {
        self.fingerprint_with_headers(&[])
    }

    /// Fingerprint that also covers the named headers, in the given order.
    pub fn fingerprint_with_headers(&self, include_headers: &[HeaderName]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.method.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(canonicalize_url(&self.url).as_bytes());
        hasher.update(b"\n");
        if let Some(body) = &self.body {
            hasher.update(body);
        }
        for name in include_headers {
            hasher.update(b"\n");
            hasher.update(name.as_str().as_bytes());
            for value in self.headers.get_all(name) {
                hasher.update(b":");
                hasher.update(value.as_bytes());
            }
        }
        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(out, "{:02x}", byte);
        }
        out
    }
}

/// Drops the fragment and sorts query pairs so equivalent URLs compare equal.
pub fn canonicalize_url(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    url.to_string()
}

fn check_scheme(url: &Url) -> Result<(), SpiderError> {
    if matches!(url.scheme(), "http" | "https") {
        Ok(())
    } else {
        Err(SpiderError::InvalidRequest(format!(
            "unsupported scheme '{}' in {}",
            url.scheme(),
            url
        )))
    }
}

fn parse_method(method: &str) -> Result<Method, SpiderError> {
    let upper = method.trim().to_ascii_uppercase();
    SUPPORTED_METHODS
        .iter()
        .find(|m| m.as_str() == upper)
        .cloned()
        .ok_or_else(|| SpiderError::InvalidRequest(format!("unsupported method '{}'", method)))
}
