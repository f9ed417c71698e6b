//! Transport abstraction.
//!
//! A [`Downloader`] opens a fetch and hands back a stream of [`DownloadEvent`]s:
//! usually one `Head` followed by body `Chunk`s. The engine pulls from the
//! stream chunk by chunk and simply drops it to abort a transfer, so an
//! implementation must not request more bytes than it is polled for.
//!
//! [`ReqwestClientDownloader`] is the default network-backed implementation.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;

use crate::error::SpiderError;
use crate::request::Request;

/// One step of a transfer.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    /// Status line and headers.
    Head { status: StatusCode, headers: HeaderMap },
    /// A slice of the body, in arrival order.
    Chunk(Bytes),
}

pub type DownloadStream = BoxStream<'static, Result<DownloadEvent, SpiderError>>;

/// Opens fetches for requests.
#[async_trait]
pub trait Downloader: Send + Sync + 'static {
    async fn download(&self, request: &Request) -> Result<DownloadStream, SpiderError>;
}

/// Downloader backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestClientDownloader {
    client: reqwest::Client,
}

impl ReqwestClientDownloader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Builds a client with the given connect and whole-request timeouts.
    pub fn with_timeouts(connect: Duration, request: Duration) -> Result<Self, SpiderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect)
            .timeout(request)
            .build()
            .map_err(|e| SpiderError::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

impl Default for ReqwestClientDownloader {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl Downloader for ReqwestClientDownloader {
    async fn download(&self, request: &Request) -> Result<DownloadStream, SpiderError> {
        let url = request.url().to_string();
        let mut builder = self
            .client
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone());
        if let Some(body) = request.body() {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_reqwest_error(&url, e))?;

        let head = DownloadEvent::Head {
            status: response.status(),
            headers: response.headers().clone(),
        };
        let body = response
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => Ok(DownloadEvent::Chunk(bytes)),
                Err(e) => Err(map_reqwest_error(&url, e)),
            });

        Ok(stream::once(async move { Ok(head) }).chain(body).boxed())
    }
}

fn map_reqwest_error(url: &str, err: reqwest::Error) -> SpiderError {
    let message = if err.is_timeout() {
        format!("timed out: {}", err)
    } else if err.is_connect() {
        format!("connection failed: {}", err)
    } else {
        err.to_string()
    };
    SpiderError::Transport {
        url: url.to_string(),
        message,
    }
}
