//! # Rules Module
//!
//! Rule-based link following.
//!
//! ## Overview
//!
//! A spider that returns [`Rule`]s from [`Spider::rules`](crate::spider::Spider::rules)
//! gets its responses scanned for links. Rules are evaluated in declaration
//! order and the first rule whose extractor yields at least one link wins:
//! every link it produced becomes a request bound to that rule's callback and
//! errback, and no later rule is consulted for that response.
//!
//! When the winning rule does not follow, responses to its requests still run
//! the rule's callback but are not scanned again.
//!
//! ## Example
//!
//! ```rust,ignore
//! let rules = vec![
//!     Rule::new(HtmlLinkExtractor::new().allow(["/item/"])?)
//!         .callback("parse_item")
//!         .errback("on_error"),
//!     Rule::new(HtmlLinkExtractor::new()),
//! ];
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace};

use crate::error::SpiderError;
use crate::link_extractor::LinkExtractor;
use crate::request::{CbKwargs, Request};
use crate::response::Response;

/// Meta key carrying the index of the rule that produced a request.
pub const META_RULE: &str = "rule";
/// Meta key carrying the anchor text of the followed link.
pub const META_LINK_TEXT: &str = "link_text";

#[derive(Clone)]
pub struct Rule {
    extractor: Arc<dyn LinkExtractor>,
    callback: Option<String>,
    errback: Option<String>,
    cb_kwargs: CbKwargs,
    follow: Option<bool>,
}

impl Rule {
    pub fn new<E>(extractor: E) -> Self
    where
        E: LinkExtractor + 'static,
    {
        Self {
            extractor: Arc::new(extractor),
            callback: None,
            errback: None,
            cb_kwargs: CbKwargs::new(),
            follow: None,
        }
    }

    pub fn callback(mut self, name: impl Into<String>) -> Self {
        self.callback = Some(name.into());
        self
    }

    pub fn errback(mut self, name: impl Into<String>) -> Self {
        self.errback = Some(name.into());
        self
    }

    pub fn cb_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.cb_kwargs.insert(key.into(), value.into());
        self
    }

    pub fn follow(mut self, follow: bool) -> Self {
        self.follow = Some(follow);
        self
    }

    pub fn callback_name(&self) -> Option<&str> {
        self.callback.as_deref()
    }

    pub fn errback_name(&self) -> Option<&str> {
        self.errback.as_deref()
    }

    /// Whether responses to this rule's requests are scanned again.
    /// Defaults to following only when the rule has no callback.
    pub fn follows(&self) -> bool {
        self.follow.unwrap_or(self.callback.is_none())
    }

    fn build_request(
        &self,
        index: usize,
        link: crate::link_extractor::Link,
    ) -> Result<Request, SpiderError> {
        let mut request = Request::new(link.url)?
            .with_cb_kwargs(self.cb_kwargs.clone())
            .with_meta_value(META_RULE, index)
            .with_meta_value(META_LINK_TEXT, link.text)
            .with_rule(index);
        if let Some(callback) = &self.callback {
            request = request.with_callback(callback.clone());
        }
        if let Some(errback) = &self.errback {
            request = request.with_errback(errback.clone());
        }
        Ok(request)
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("callback", &self.callback)
            .field("errback", &self.errback)
            .field("cb_kwargs", &self.cb_kwargs)
            .field("follow", &self.follows())
            .finish()
    }
}

/// The immutable rule set of one crawl.
#[derive(Debug, Clone, Default)]
pub struct LinkFollower {
    rules: Arc<Vec<Rule>>,
}

impl LinkFollower {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules: Arc::new(rules),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn rule(&self, index: usize) -> Option<&Rule> {
        self.rules.get(index)
    }

    /// Requests for the links of the first matching rule, in extraction order.
    pub fn follow_links(&self, response: &Response) -> Vec<Request> {
        for (index, rule) in self.rules.iter().enumerate() {
            let links = rule.extractor.extract_links(response);
            if links.is_empty() {
                trace!("Rule {} matched no links on {}", index, response.url);
                continue;
            }
            debug!(
                "Rule {} matched {} links on {}",
                index,
                links.len(),
                response.url
            );
            return links
                .into_iter()
                .filter_map(|link| match rule.build_request(index, link) {
                    Ok(request) => Some(request),
                    Err(e) => {
                        debug!("Rule {} skipped a link on {}: {}", index, response.url, e);
                        None
                    }
                })
                .collect();
        }
        Vec::new()
    }
}
