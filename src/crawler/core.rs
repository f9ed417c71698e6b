//! The core Crawler implementation.
//!
//! `Crawler` owns one crawl run. It spawns the start-requests producer, the
//! downloader task and the response parser task, then watches the shared
//! [`CrawlerState`] until the crawl is finished, cancelled, or closed by the
//! error limit. Whatever the reason, the spider's `closed` hook runs exactly
//! once and `start_crawl` returns a [`CrawlSummary`].

use crate::builder::CrawlerConfig;
use crate::crawler::item_processor::ItemProcessor;
use crate::crawler::request_handler::spawn_downloader_task;
use crate::crawler::response_parser::{DispatchContext, spawn_parser_task};
use crate::error::SpiderError;
use crate::fetch::CancellableFetcher;
use crate::request::Request;
use crate::rules::LinkFollower;
use crate::scheduler::Scheduler;
use crate::sink::{ErrorSink, ItemSink};
use crate::spider::Spider;
use crate::state::{Activity, CloseReason, CrawlPhase, CrawlerState};
use crate::stats::StatCollector;
use kanal::{AsyncReceiver, bounded_async};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Name under which start-request faults are reported.
const START_REQUESTS: &str = "start_requests";

/// Result of a finished crawl run.
#[derive(Debug)]
pub struct CrawlSummary {
    pub reason: CloseReason,
    pub stats: Arc<StatCollector>,
}

/// The central orchestrator of a crawl run.
pub struct Crawler<S: Spider> {
    scheduler: Arc<Scheduler>,
    req_rx: AsyncReceiver<Request>,
    stats: Arc<StatCollector>,
    fetcher: Arc<CancellableFetcher>,
    spider: Arc<S>,
    item_sinks: Vec<Box<dyn ItemSink>>,
    error_sink: Arc<dyn ErrorSink>,
    config: CrawlerConfig,
    state: Arc<CrawlerState>,
    cancel: CancellationToken,
}

impl<S: Spider> Crawler<S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        scheduler: Arc<Scheduler>,
        req_rx: AsyncReceiver<Request>,
        fetcher: Arc<CancellableFetcher>,
        spider: S,
        item_sinks: Vec<Box<dyn ItemSink>>,
        error_sink: Arc<dyn ErrorSink>,
        config: CrawlerConfig,
        stats: Arc<StatCollector>,
        cancel: CancellationToken,
    ) -> Self {
        Crawler {
            scheduler,
            req_rx,
            stats,
            fetcher,
            spider: Arc::new(spider),
            item_sinks,
            error_sink,
            config,
            state: CrawlerState::new(),
            cancel,
        }
    }

    /// Token that cancels the crawl; the close reason becomes `cancelled`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns a cloned Arc to the `StatCollector` instance used by this crawler.
    pub fn get_stats(&self) -> Arc<StatCollector> {
        Arc::clone(&self.stats)
    }

    /// Shared state, for observing the crawl phase while it runs.
    pub fn state(&self) -> Arc<CrawlerState> {
        Arc::clone(&self.state)
    }

    /// Runs the crawl to its terminal state.
    pub async fn start_crawl(self) -> Result<CrawlSummary, SpiderError> {
        let Crawler {
            scheduler,
            req_rx,
            stats,
            fetcher,
            spider,
            item_sinks,
            error_sink,
            config,
            state,
            cancel,
        } = self;

        info!(
            "Crawler '{}' starting with max_concurrent_downloads={}, max_errors={:?}",
            spider.name(),
            config.max_concurrent_downloads,
            config.max_errors
        );

        let error_limit = CancellationToken::new();
        let ctx = Arc::new(DispatchContext {
            scheduler: Arc::clone(&scheduler),
            state: Arc::clone(&state),
            stats: Arc::clone(&stats),
            handlers: Arc::clone(&spider).handlers(),
            follower: LinkFollower::new(spider.rules()),
            items: ItemProcessor::new(item_sinks, Arc::clone(&stats)),
            error_sink,
            max_errors: config.max_errors,
            allowed_statuses: config.http_error_allowed_statuses.clone(),
            allow_all_statuses: config.http_error_allow_all,
            error_limit: error_limit.clone(),
        });
        debug!("Registered handlers: {:?}", ctx.handlers);

        state.transition(CrawlPhase::Running);

        trace!(
            "Creating outcome channel with capacity: {}",
            config.channel_capacity
        );
        let (res_tx, res_rx) = bounded_async(config.channel_capacity);

        trace!("Spawning initial requests task");
        let initial_requests_task =
            spawn_initial_requests_task(Arc::clone(&spider), Arc::clone(&ctx));

        trace!("Spawning downloader task");
        let downloader_task = spawn_downloader_task(
            Arc::clone(&scheduler),
            req_rx,
            fetcher,
            Arc::clone(&state),
            res_tx,
            config.max_concurrent_downloads,
            Arc::clone(&stats),
        );

        trace!("Spawning parser task");
        let parser_task = spawn_parser_task(Arc::clone(&ctx), res_rx);

        let reason = tokio::select! {
            biased;
            Ok(()) = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, cancelling crawl.");
                CloseReason::Cancelled
            }
            _ = cancel.cancelled() => {
                info!("Crawl cancelled.");
                CloseReason::Cancelled
            }
            _ = error_limit.cancelled() => {
                warn!("Crawl closed after {} errors.", state.errors());
                CloseReason::ErrorLimitExceeded
            }
            _ = wait_until_idle(&scheduler, &state, config.idle_poll_interval) => {
                info!("Crawl has become idle, initiating shutdown.");
                CloseReason::Finished
            }
        };

        scheduler.shutdown();
        let tasks = [initial_requests_task, downloader_task, parser_task];
        match reason {
            CloseReason::Finished => join_tasks(tasks, config.shutdown_timeout).await,
            _ => abort_tasks(tasks).await,
        }

        info!("Closing item sinks...");
        ctx.items.close_all().await;

        if let Some(previous) = state.transition(CrawlPhase::Done) {
            debug!("Crawl phase {:?} -> Done", previous);
            spider.closed(reason);
        }

        info!("Crawl closed ({}). Stats: {}", reason, stats);
        Ok(CrawlSummary { reason, stats })
    }
}

/// Resolves once nothing is queued, fetched or dispatched, confirmed by a
/// second look half a poll interval later.
async fn wait_until_idle(scheduler: &Scheduler, state: &CrawlerState, poll: Duration) {
    loop {
        tokio::time::sleep(poll).await;

        let fetching = !scheduler.is_idle() || state.has_in_flight_requests();
        let next = if fetching {
            CrawlPhase::Running
        } else if state.has_active_handlers() {
            CrawlPhase::Draining
        } else {
            tokio::time::sleep(poll / 2).await;
            if scheduler.is_idle() && state.is_idle() {
                return;
            }
            continue;
        };
        if let Some(previous) = state.transition(next) {
            debug!("Crawl phase {:?} -> {:?}", previous, next);
        }
    }
}

async fn join_tasks(tasks: [JoinHandle<()>; 3], timeout: Duration) {
    let handles: Vec<_> = tasks.into_iter().collect();
    let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
    match tokio::time::timeout(timeout, futures_util::future::join_all(handles)).await {
        Ok(results) => {
            for result in results {
                if let Err(e) = result {
                    error!("Task failed during shutdown: {}", e);
                }
            }
        }
        Err(_) => {
            warn!(
                "Tasks did not complete within timeout ({}s), aborting remaining tasks.",
                timeout.as_secs()
            );
            for abort in aborts {
                abort.abort();
            }
        }
    }
}

async fn abort_tasks(tasks: [JoinHandle<()>; 3]) {
    for task in &tasks {
        task.abort();
    }
    for task in tasks {
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                error!("Task failed during shutdown: {}", e);
            }
        }
    }
}

fn spawn_initial_requests_task<S: Spider>(
    spider: Arc<S>,
    ctx: Arc<DispatchContext>,
) -> JoinHandle<()> {
    let guard = ctx.state.begin(Activity::Dispatch);
    tokio::spawn(async move {
        let producer = spider.start_requests().into_producer();
        ctx.drain_producer(producer, START_REQUESTS, None).await;
        drop(guard);
    })
}
