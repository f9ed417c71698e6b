//! # Response Parser Module
//!
//! Routes fetch outcomes to user handlers.
//!
//! ## Overview
//!
//! The parser task receives every [`FetchOutcome`] from the downloader and
//! spawns one dispatch task per outcome, so a handler that suspends only holds
//! up its own response. A dispatch task:
//!
//! - turns non-2xx responses into failures unless the status is allowed,
//! - runs the bound callback (or the default one) for successes,
//! - runs the request's errback for failures, or reports them to the error
//!   sink when there is none,
//! - drains the handler's output: requests go back through the scheduler,
//!   items go to the sinks in the order the handler yielded them,
//! - scans the response with the spider's rules when it is eligible.
//!
//! Faults never stop the crawl unless the configured error limit is reached.
//!
//! ## Handler selection
//!
//! | Request                      | Callback                      | Rule scan       |
//! |------------------------------|-------------------------------|-----------------|
//! | produced by rule `i`         | rule `i`'s callback, if any   | if rule follows |
//! | explicit callback            | that callback                 | no              |
//! | no callback, spider has rules| `parse_start_url`, if present | yes             |
//! | no callback, no rules        | `parse`                       | no              |

use crate::callback::{DEFAULT_CALLBACK, Handlers, Output, PARSE_START_URL, Producer};
use crate::crawler::item_processor::ItemProcessor;
use crate::error::{Failure, SpiderError};
use crate::fetch::FetchOutcome;
use crate::request::Request;
use crate::response::Response;
use crate::rules::LinkFollower;
use crate::scheduler::Scheduler;
use crate::sink::{ErrorSink, FaultEvent};
use crate::state::{ActivityGuard, CrawlerState};
use crate::stats::StatCollector;
use kanal::AsyncReceiver;
use log::{debug, error, trace, warn};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Meta key: statuses this request's callback accepts besides 2xx.
pub const META_HANDLE_HTTPSTATUS_LIST: &str = "handle_httpstatus_list";
/// Meta key: when true, this request's callback accepts every status.
pub const META_HANDLE_HTTPSTATUS_ALL: &str = "handle_httpstatus_all";

/// Everything a dispatch task needs, shared across the crawl run.
pub(crate) struct DispatchContext {
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) state: Arc<CrawlerState>,
    pub(crate) stats: Arc<StatCollector>,
    pub(crate) handlers: Handlers,
    pub(crate) follower: LinkFollower,
    pub(crate) items: ItemProcessor,
    pub(crate) error_sink: Arc<dyn ErrorSink>,
    pub(crate) max_errors: Option<usize>,
    pub(crate) allowed_statuses: Vec<u16>,
    pub(crate) allow_all_statuses: bool,
    pub(crate) error_limit: CancellationToken,
}

impl DispatchContext {
    pub(crate) async fn dispatch(&self, outcome: FetchOutcome) {
        trace!("Dispatching outcome for URL: {}", outcome.request().url());
        match outcome.into_result() {
            Ok(response) => self.handle_response(response).await,
            Err(failure) => self.handle_failure(failure).await,
        }
    }

    async fn handle_response(&self, response: Response) {
        if !self.status_allowed(&response) {
            debug!(
                "Status {} not handled for URL: {}",
                response.status, response.url
            );
            let request = response.request_arc();
            let error = SpiderError::HttpStatus {
                url: request.url().to_string(),
                status: response.status.as_u16(),
            };
            return self
                .handle_failure(Failure::new(request, error).with_response(response))
                .await;
        }

        let request = response.request_arc();
        let (callback, scan) = self.route(&request);

        if let Some(name) = callback {
            match self.handlers.get_callback(&name, request.url().as_str()) {
                Ok(callback) => {
                    debug!("Parsing response from {} with '{}'", response.url, name);
                    let producer = callback.call(response.clone()).into_producer();
                    self.drain_producer(producer, &name, Some(&request)).await;
                }
                Err(e) => self.report(FaultEvent::Handler {
                    error: e,
                    request: Some(Arc::clone(&request)),
                }),
            }
        }

        if scan {
            for follow in self.follower.follow_links(&response) {
                self.submit(follow).await;
            }
        }
    }

    fn route(&self, request: &Request) -> (Option<String>, bool) {
        if let Some(index) = request.rule() {
            let follows = self.follower.rule(index).is_some_and(|rule| rule.follows());
            return (request.callback().map(str::to_owned), follows);
        }
        match request.callback() {
            Some(name) => (Some(name.to_owned()), false),
            None if !self.follower.is_empty() => (
                self.handlers
                    .has_callback(PARSE_START_URL)
                    .then(|| PARSE_START_URL.to_owned()),
                true,
            ),
            None => (Some(DEFAULT_CALLBACK.to_owned()), false),
        }
    }

    async fn handle_failure(&self, failure: Failure) {
        let request = Arc::clone(&failure.request);
        let Some(name) = request.errback() else {
            self.report(FaultEvent::Download(failure));
            return;
        };

        match self.handlers.get_errback(name, request.url().as_str()) {
            Ok(errback) => {
                debug!("Routing failure of {} to errback '{}'", request.url(), name);
                self.stats.increment_errback_invocations();
                let producer = errback.call(failure).into_producer();
                self.drain_producer(producer, name, Some(&request)).await;
            }
            Err(e) => {
                self.report(FaultEvent::Download(failure));
                self.report(FaultEvent::Handler {
                    error: e,
                    request: Some(request),
                });
            }
        }
    }

    /// Consumes a handler's output in yield order. A fault ends the producer
    /// after everything it yielded before has been processed.
    pub(crate) async fn drain_producer(
        &self,
        mut producer: Producer,
        handler: &str,
        request: Option<&Arc<Request>>,
    ) {
        while let Some(next) = producer.next().await {
            match next {
                Ok(Output::Request(follow)) => self.submit(follow).await,
                Ok(Output::Item(item)) => self.items.process(item).await,
                Err(err) => {
                    let url = request.map(|r| r.url().to_string()).unwrap_or_default();
                    warn!("Handler '{}' failed on {}: {:#}", handler, url, err);
                    self.stats.increment_handler_faults();
                    let error = SpiderError::handler_fault(handler, url, producer.yielded(), &err);
                    self.report(FaultEvent::Handler {
                        error,
                        request: request.cloned(),
                    });
                }
            }
        }
    }

    async fn submit(&self, request: Request) {
        let url = request.url().clone();
        if let Err(e) = self.scheduler.enqueue_request(request).await {
            debug!("Request for {} not enqueued: {}", url, e);
        }
    }

    fn status_allowed(&self, response: &Response) -> bool {
        if response.is_success() || self.allow_all_statuses {
            return true;
        }
        let status = response.status.as_u16();
        if self.allowed_statuses.contains(&status) {
            return true;
        }
        let meta = response.meta();
        if meta
            .get(META_HANDLE_HTTPSTATUS_ALL)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            return true;
        }
        meta.get(META_HANDLE_HTTPSTATUS_LIST)
            .and_then(|v| {
                v.as_array()
                    .map(|codes| codes.iter().any(|c| c.as_u64() == Some(u64::from(status))))
            })
            .unwrap_or(false)
    }

    /// Sends a fault to the error sink and trips the error limit when reached.
    pub(crate) fn report(&self, event: FaultEvent) {
        self.error_sink.emit(&event);
        let total = self.state.record_error();
        if let Some(max) = self.max_errors {
            if total >= max && !self.error_limit.is_cancelled() {
                warn!("Error limit of {} reached, closing the crawl.", max);
                self.error_limit.cancel();
            }
        }
    }
}

pub(crate) fn spawn_parser_task(
    ctx: Arc<DispatchContext>,
    res_rx: AsyncReceiver<(ActivityGuard, FetchOutcome)>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        trace!("Response parser started");
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                received = res_rx.recv() => match received {
                    Ok((guard, outcome)) => {
                        let ctx = Arc::clone(&ctx);
                        tasks.spawn(async move {
                            ctx.dispatch(outcome).await;
                            drop(guard);
                        });
                    }
                    Err(_) => {
                        trace!("Outcome channel closed, stopping response parser");
                        break;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("A dispatch task failed: {:?}", e);
                    }
                }
            }
        }

        trace!("Waiting for dispatch tasks to complete");
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                error!("A dispatch task failed: {:?}", e);
            }
        }
        trace!("Response parser finished");
    })
}
