//! Cancellable fetches.
//!
//! [`CancellableFetcher`] drives a [`Downloader`] stream and shows every body
//! chunk to the registered [`BytesReceivedHook`]s. A hook can let the transfer
//! continue, stop it softly (the partial body becomes a normal response
//! flagged `download_stopped`), or stop it hard (the partial body travels with
//! a [`Failure`] to the request's errback).
//!
//! Hooks run in registration order and evaluation stops at the first hook that
//! asks for a stop. The configured download size cap is checked after the
//! hooks and can upgrade a soft stop into a hard one, never the reverse.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use tracing::{debug, trace};

use crate::downloader::{DownloadEvent, Downloader};
use crate::error::{Failure, SpiderError};
use crate::request::Request;
use crate::response::{FLAG_DOWNLOAD_STOPPED, Response};

/// What a hook wants done with the transfer after seeing a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSignal {
    Continue,
    StopSoft,
    StopHard(String),
}

impl ControlSignal {
    pub fn is_stop(&self) -> bool {
        !matches!(self, ControlSignal::Continue)
    }

    /// Combines two signals; a hard stop beats a soft stop beats continuing.
    pub fn merge(self, other: ControlSignal) -> ControlSignal {
        match (self, other) {
            (ControlSignal::StopHard(reason), _) | (_, ControlSignal::StopHard(reason)) => {
                ControlSignal::StopHard(reason)
            }
            (ControlSignal::StopSoft, _) | (_, ControlSignal::StopSoft) => ControlSignal::StopSoft,
            _ => ControlSignal::Continue,
        }
    }
}

/// Observer for body chunks as they arrive.
pub trait BytesReceivedHook: Send + Sync {
    fn on_bytes_received(&self, chunk: &Bytes, request: &Request) -> ControlSignal;
}

impl<F> BytesReceivedHook for F
where
    F: Fn(&Bytes, &Request) -> ControlSignal + Send + Sync,
{
    fn on_bytes_received(&self, chunk: &Bytes, request: &Request) -> ControlSignal {
        self(chunk, request)
    }
}

/// How an early termination ended.
#[derive(Debug)]
pub enum CancellationOutcome {
    /// Stopped on purpose; the partial response is handled as a success.
    SoftStop(Response),
    /// Stopped as a failure; the partial response rides on the failure.
    HardFail(Failure),
}

#[derive(Debug)]
pub enum FetchOutcome {
    Completed(Response),
    Cancelled(CancellationOutcome),
    Failed(Failure),
}

impl FetchOutcome {
    /// Collapses the outcome into the success/failure split used for routing.
    pub fn into_result(self) -> Result<Response, Failure> {
        match self {
            FetchOutcome::Completed(response)
            | FetchOutcome::Cancelled(CancellationOutcome::SoftStop(response)) => Ok(response),
            FetchOutcome::Cancelled(CancellationOutcome::HardFail(failure))
            | FetchOutcome::Failed(failure) => Err(failure),
        }
    }

    pub fn request(&self) -> &Request {
        match self {
            FetchOutcome::Completed(response)
            | FetchOutcome::Cancelled(CancellationOutcome::SoftStop(response)) => {
                response.request()
            }
            FetchOutcome::Cancelled(CancellationOutcome::HardFail(failure))
            | FetchOutcome::Failed(failure) => failure.request(),
        }
    }
}

pub struct CancellableFetcher {
    downloader: Arc<dyn Downloader>,
    hooks: Vec<Arc<dyn BytesReceivedHook>>,
    max_download_size: Option<usize>,
}

impl CancellableFetcher {
    pub fn new(downloader: Arc<dyn Downloader>) -> Self {
        Self {
            downloader,
            hooks: Vec::new(),
            max_download_size: None,
        }
    }

    pub fn add_hook(mut self, hook: Arc<dyn BytesReceivedHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Hard-stops any download whose body would grow past `max_bytes`.
    pub fn max_download_size(mut self, max_bytes: Option<usize>) -> Self {
        self.max_download_size = max_bytes;
        self
    }

    fn signal_for(&self, chunk: &Bytes, request: &Request, received: usize) -> ControlSignal {
        let mut signal = ControlSignal::Continue;
        for hook in &self.hooks {
            signal = hook.on_bytes_received(chunk, request);
            if signal.is_stop() {
                break;
            }
        }
        match self.max_download_size {
            Some(max) if received + chunk.len() > max => signal.merge(ControlSignal::StopHard(
                format!("max download size of {} bytes exceeded", max),
            )),
            _ => signal,
        }
    }

    /// Runs the fetch for `request` to completion, cancellation or failure.
    pub async fn fetch(&self, request: Arc<Request>) -> FetchOutcome {
        let mut stream = match self.downloader.download(&request).await {
            Ok(stream) => stream,
            Err(error) => return FetchOutcome::Failed(Failure::new(request, error)),
        };

        // Best effort when a stop lands before the head arrived.
        let mut status = StatusCode::OK;
        let mut headers = HeaderMap::new();
        let mut body = BytesMut::new();

        while let Some(event) = stream.next().await {
            match event {
                Ok(DownloadEvent::Head {
                    status: s,
                    headers: h,
                }) => {
                    status = s;
                    headers = h;
                }
                Ok(DownloadEvent::Chunk(chunk)) => {
                    let signal = self.signal_for(&chunk, &request, body.len());
                    body.extend_from_slice(&chunk);
                    trace!("Received {} bytes for {}", body.len(), request.url());
                    if !signal.is_stop() {
                        continue;
                    }
                    // Returning drops the stream, so no more bytes are pulled.
                    let partial = Response::from_request(Arc::clone(&request), status, body.freeze())
                        .with_headers(headers)
                        .with_flag(FLAG_DOWNLOAD_STOPPED);
                    return match signal {
                        ControlSignal::StopHard(reason) => {
                            debug!(
                                "Download hard-stopped for {} after {} bytes: {}",
                                request.url(),
                                partial.body.len(),
                                reason
                            );
                            let error = SpiderError::DownloadStopped {
                                url: request.url().to_string(),
                                reason,
                                received: partial.body.len(),
                            };
                            FetchOutcome::Cancelled(CancellationOutcome::HardFail(
                                Failure::new(request, error).with_response(partial),
                            ))
                        }
                        _ => {
                            debug!(
                                "Download soft-stopped for {} after {} bytes",
                                request.url(),
                                partial.body.len()
                            );
                            FetchOutcome::Cancelled(CancellationOutcome::SoftStop(partial))
                        }
                    };
                }
                Err(error) => return FetchOutcome::Failed(Failure::new(request, error)),
            }
        }

        let response = Response::from_request(request, status, body.freeze()).with_headers(headers);
        FetchOutcome::Completed(response)
    }
}
