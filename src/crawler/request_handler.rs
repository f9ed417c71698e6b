//! Contains the request handling logic for the crawler.
//!
//! The downloader task drains the scheduler's frontier and runs each request
//! through the [`CancellableFetcher`], at most `max_concurrent_downloads` at a
//! time. Every outcome (completed, soft-stopped, hard-stopped or failed) is
//! forwarded to the parser task together with a dispatch guard, so the crawl
//! stays busy until its handler has finished.
//!
//! Each request is registered as in flight before the scheduler drops it
//! from its pending count, and the dispatch guard is raised before the
//! in-flight count is released. The idle check therefore never sees a gap.

use crate::fetch::{CancellableFetcher, CancellationOutcome, FetchOutcome};
use crate::request::Request;
use crate::scheduler::Scheduler;
use crate::state::{Activity, ActivityGuard, CrawlerState};
use crate::stats::StatCollector;

use kanal::{AsyncReceiver, AsyncSender};
use log::{debug, error, trace, warn};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub(crate) type OutcomeSender = AsyncSender<(ActivityGuard, FetchOutcome)>;

pub(crate) fn spawn_downloader_task(
    scheduler: Arc<Scheduler>,
    req_rx: AsyncReceiver<Request>,
    fetcher: Arc<CancellableFetcher>,
    state: Arc<CrawlerState>,
    res_tx: OutcomeSender,
    max_concurrent_downloads: usize,
    stats: Arc<StatCollector>,
) -> tokio::task::JoinHandle<()> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent_downloads));

    tokio::spawn(async move {
        trace!(
            "Downloader task started with max_concurrent_downloads: {}",
            max_concurrent_downloads
        );
        let mut tasks = JoinSet::new();

        while let Ok(request) = req_rx.recv().await {
            trace!("Received request for URL: {}", request.url());
            let in_flight = state.begin(Activity::Download);
            scheduler.request_taken();

            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!("Download semaphore closed, shutting down downloader task.");
                    break;
                }
            };

            let fetcher = Arc::clone(&fetcher);
            let state = Arc::clone(&state);
            let stats = Arc::clone(&stats);
            let res_tx = res_tx.clone();

            tasks.spawn(async move {
                stats.increment_requests_sent();
                let outcome = fetcher.fetch(Arc::new(request)).await;
                record_outcome(&stats, &outcome);

                let dispatch = state.begin(Activity::Dispatch);
                if res_tx.send((dispatch, outcome)).await.is_err() {
                    debug!("Outcome channel closed, dropping fetch outcome.");
                }
                drop(in_flight);
                drop(permit);
            });

            while let Some(res) = tasks.try_join_next() {
                if let Err(e) = res {
                    error!("A download task failed: {:?}", e);
                }
            }
        }

        trace!("Waiting for active download tasks to complete");
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                error!("A download task failed: {:?}", e);
            }
        }
        trace!("Downloader task finished");
    })
}

fn record_outcome(stats: &StatCollector, outcome: &FetchOutcome) {
    match outcome {
        FetchOutcome::Completed(response) => {
            stats.increment_requests_succeeded();
            stats.increment_responses_received();
            stats.record_response_status(response.status.as_u16());
            stats.add_bytes_downloaded(response.body.len());
        }
        FetchOutcome::Cancelled(CancellationOutcome::SoftStop(response)) => {
            debug!("Download soft-stopped for URL: {}", response.url);
            stats.increment_downloads_stopped_soft();
            stats.increment_requests_succeeded();
            stats.increment_responses_received();
            stats.record_response_status(response.status.as_u16());
            stats.add_bytes_downloaded(response.body.len());
        }
        FetchOutcome::Cancelled(CancellationOutcome::HardFail(failure)) => {
            debug!("Download hard-stopped for URL: {}", failure.request.url());
            stats.increment_downloads_stopped_hard();
            stats.increment_requests_failed();
            stats.add_bytes_downloaded(failure.partial_body().map_or(0, |b| b.len()));
        }
        FetchOutcome::Failed(failure) => {
            debug!(
                "Download error for URL {}: {}",
                failure.request.url(),
                failure.error
            );
            stats.increment_requests_failed();
        }
    }
}
