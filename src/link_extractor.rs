//! Link extraction for rule-driven crawling.
//!
//! A [`LinkExtractor`] turns a response into an ordered list of absolute
//! links. [`HtmlLinkExtractor`] reads `<a href>` and `<area href>` elements,
//! resolves them against the document base, and filters them with optional
//! regex and domain lists.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::SpiderError;
use crate::response::Response;

static LINK_SELECTOR: LazyLock<Option<Selector>> =
    LazyLock::new(|| Selector::parse("a[href], area[href]").ok());
static BASE_SELECTOR: LazyLock<Option<Selector>> =
    LazyLock::new(|| Selector::parse("base[href]").ok());

const SKIPPED_SCHEMES: [&str; 4] = ["javascript:", "mailto:", "tel:", "data:"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub url: Url,
    pub text: String,
}

/// Pure function of a response's content.
pub trait LinkExtractor: Send + Sync {
    fn extract_links(&self, response: &Response) -> Vec<Link>;
}

impl<F> LinkExtractor for F
where
    F: Fn(&Response) -> Vec<Link> + Send + Sync,
{
    fn extract_links(&self, response: &Response) -> Vec<Link> {
        self(response)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HtmlLinkExtractor {
    allow: Vec<Regex>,
    deny: Vec<Regex>,
    allow_domains: Vec<String>,
}

impl HtmlLinkExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps only links matching at least one of `patterns`.
    pub fn allow<I, S>(mut self, patterns: I) -> Result<Self, SpiderError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allow.extend(compile(patterns)?);
        Ok(self)
    }

    /// Drops links matching any of `patterns`. Deny wins over allow.
    pub fn deny<I, S>(mut self, patterns: I) -> Result<Self, SpiderError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.deny.extend(compile(patterns)?);
        Ok(self)
    }

    /// Keeps only links whose host is one of `domains` or a subdomain of one.
    pub fn allow_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_domains
            .extend(domains.into_iter().map(|d| d.into().to_ascii_lowercase()));
        self
    }

    /// Extracts links from an HTML document located at `page_url`.
    pub fn extract_from_html(&self, html: &str, page_url: &Url) -> Vec<Link> {
        let (Some(link_selector), Some(base_selector)) =
            (LINK_SELECTOR.as_ref(), BASE_SELECTOR.as_ref())
        else {
            return Vec::new();
        };
        let document = Html::parse_document(html);
        let base = document
            .select(base_selector)
            .next()
            .and_then(|base| base.value().attr("href"))
            .and_then(|href| page_url.join(href.trim()).ok())
            .unwrap_or_else(|| page_url.clone());

        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for element in document.select(link_selector) {
            let Some(href) = element.value().attr("href").map(str::trim) else {
                continue;
            };
            if href.is_empty() || href.starts_with('#') || has_skipped_scheme(href) {
                continue;
            }
            let Ok(mut url) = base.join(href) else {
                continue;
            };
            if !matches!(url.scheme(), "http" | "https") {
                continue;
            }
            url.set_fragment(None);
            if !self.is_wanted(&url) || !seen.insert(url.to_string()) {
                continue;
            }
            links.push(Link {
                url,
                text: element_text(element),
            });
        }
        links
    }

    fn is_wanted(&self, url: &Url) -> bool {
        let address = url.as_str();
        if self.deny.iter().any(|re| re.is_match(address)) {
            return false;
        }
        if !self.allow.is_empty() && !self.allow.iter().any(|re| re.is_match(address)) {
            return false;
        }
        if self.allow_domains.is_empty() {
            return true;
        }
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        self.allow_domains
            .iter()
            .any(|domain| host == *domain || host.ends_with(&format!(".{}", domain)))
    }
}

impl LinkExtractor for HtmlLinkExtractor {
    fn extract_links(&self, response: &Response) -> Vec<Link> {
        self.extract_from_html(&response.text(), &response.url)
    }
}

fn compile<I, S>(patterns: I) -> Result<Vec<Regex>, SpiderError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|p| {
            Regex::new(p.as_ref()).map_err(|e| {
                SpiderError::Configuration(format!("invalid link pattern '{}': {}", p.as_ref(), e))
            })
        })
        .collect()
}

fn has_skipped_scheme(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    SKIPPED_SCHEMES.iter().any(|scheme| lower.starts_with(scheme))
}

fn element_text(element: ElementRef) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
