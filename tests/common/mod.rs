#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use tracing_subscriber::EnvFilter;

use spider_dispatch::callback::{CallbackResult, Handlers, Item};
use spider_dispatch::downloader::{DownloadEvent, DownloadStream, Downloader};
use spider_dispatch::error::SpiderError;
use spider_dispatch::request::Request;
use spider_dispatch::rules::Rule;
use spider_dispatch::sink::{ErrorSink, FaultEvent, ItemSink};
use spider_dispatch::spider::Spider;
use spider_dispatch::state::CloseReason;
use spider_dispatch::CrawlerConfig;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Short polling so crawls finish quickly.
pub fn fast_config() -> CrawlerConfig {
    CrawlerConfig {
        max_concurrent_downloads: 8,
        idle_poll_interval: Duration::from_millis(10),
        shutdown_timeout: Duration::from_secs(5),
        ..CrawlerConfig::default()
    }
}

/// What the scripted transport serves for a path.
#[derive(Debug, Clone)]
pub enum Route {
    Page {
        status: u16,
        body: Bytes,
        chunk_size: usize,
    },
    /// Serves the request body back.
    Echo,
    Fail(String),
    Delayed(Duration, Box<Route>),
}

impl Route {
    pub fn html(body: &str) -> Self {
        Route::Page {
            status: 200,
            body: Bytes::copy_from_slice(body.as_bytes()),
            chunk_size: usize::MAX,
        }
    }

    /// `len` bytes delivered in chunks of `chunk_size`.
    pub fn bytes(len: usize, chunk_size: usize) -> Self {
        Route::Page {
            status: 200,
            body: Bytes::from(vec![b'a'; len]),
            chunk_size,
        }
    }

    pub fn delayed(self, delay: Duration) -> Self {
        Route::Delayed(delay, Box::new(self))
    }
}

/// In-process transport. Paths are matched without the query string;
/// `/status?n=<code>` answers with that status and an empty body; anything
/// unscripted gets an empty 200.
#[derive(Default)]
pub struct ScriptedDownloader {
    routes: HashMap<String, Route>,
    fetched: Arc<Mutex<Vec<String>>>,
}

impl ScriptedDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, path: &str, route: Route) -> Self {
        self.routes.insert(path.to_string(), route);
        self
    }

    /// Handle on the list of fetched URLs, in fetch order.
    pub fn fetch_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.fetched)
    }

    fn resolve(&self, request: &Request) -> Route {
        let url = request.url();
        if let Some(route) = self.routes.get(url.path()) {
            return route.clone();
        }
        if url.path() == "/status" {
            let status = url
                .query_pairs()
                .find(|(k, _)| k == "n")
                .and_then(|(_, v)| v.parse().ok())
                .unwrap_or(200);
            return Route::Page {
                status,
                body: Bytes::new(),
                chunk_size: usize::MAX,
            };
        }
        Route::html("")
    }
}

#[async_trait]
impl Downloader for ScriptedDownloader {
    async fn download(&self, request: &Request) -> Result<DownloadStream, SpiderError> {
        self.fetched.lock().push(request.url().to_string());
        let mut route = self.resolve(request);
        while let Route::Delayed(delay, inner) = route {
            tokio::time::sleep(delay).await;
            route = *inner;
        }
        let (status, body, chunk_size) = match route {
            Route::Page {
                status,
                body,
                chunk_size,
            } => (status, body, chunk_size),
            Route::Echo => (200, request.body().cloned().unwrap_or_default(), usize::MAX),
            Route::Fail(message) => {
                return Err(SpiderError::Transport {
                    url: request.url().to_string(),
                    message,
                });
            }
            Route::Delayed(..) => unreachable!(),
        };
        let head = DownloadEvent::Head {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
            headers: HeaderMap::new(),
        };
        let chunks: Vec<_> = body
            .chunks(chunk_size.max(1))
            .map(|c| Ok::<_, SpiderError>(DownloadEvent::Chunk(Bytes::copy_from_slice(c))))
            .collect();
        Ok(stream::iter(std::iter::once(Ok(head)).chain(chunks)).boxed())
    }
}

type StartFn = Box<dyn Fn() -> CallbackResult + Send + Sync>;

/// Spider assembled from closures.
pub struct TestSpider {
    start: StartFn,
    handlers: Handlers,
    rules: Vec<Rule>,
    closed: Arc<Mutex<Vec<CloseReason>>>,
}

impl TestSpider {
    pub fn new<F>(start: F) -> Self
    where
        F: Fn() -> CallbackResult + Send + Sync + 'static,
    {
        Self {
            start: Box::new(start),
            handlers: Handlers::new(),
            rules: Vec::new(),
            closed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Seeds one GET request per URL, with no explicit callback.
    pub fn seeds(urls: &[&str]) -> Self {
        let urls: Vec<String> = urls.iter().map(|u| u.to_string()).collect();
        Self::new(move || {
            let requests: Vec<Request> = urls.iter().map(|u| Request::get(u).unwrap()).collect();
            requests.into()
        })
    }

    pub fn handlers(mut self, handlers: Handlers) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn rules(mut self, rules: Vec<Rule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn closed_log(&self) -> Arc<Mutex<Vec<CloseReason>>> {
        Arc::clone(&self.closed)
    }
}

impl Spider for TestSpider {
    fn name(&self) -> &str {
        "test"
    }

    fn start_requests(&self) -> CallbackResult {
        (self.start)()
    }

    fn handlers(self: Arc<Self>) -> Handlers {
        self.handlers.clone()
    }

    fn rules(&self) -> Vec<Rule> {
        self.rules.clone()
    }

    fn closed(&self, reason: CloseReason) {
        self.closed.lock().push(reason);
    }
}

/// One entry of the shared output journal.
#[derive(Debug, Clone)]
pub enum Entry {
    Item(Item),
    Fault(FaultEvent),
}

/// Records items and faults in a single ordered log.
#[derive(Default)]
pub struct Journal {
    entries: Mutex<Vec<Entry>>,
}

impl Journal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.entries.lock().clone()
    }

    pub fn items(&self) -> Vec<Item> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                Entry::Item(item) => Some(item),
                Entry::Fault(_) => None,
            })
            .collect()
    }

    pub fn faults(&self) -> Vec<FaultEvent> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                Entry::Fault(fault) => Some(fault),
                Entry::Item(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl ItemSink for Journal {
    fn name(&self) -> &str {
        "journal"
    }

    async fn emit(&self, item: &Item) -> Result<(), SpiderError> {
        self.entries.lock().push(Entry::Item(item.clone()));
        Ok(())
    }
}

impl ErrorSink for Journal {
    fn emit(&self, event: &FaultEvent) {
        self.entries.lock().push(Entry::Fault(event.clone()));
    }
}
