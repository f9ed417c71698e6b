//! # Scheduler Module
//!
//! The crawl frontier.
//!
//! ## Overview
//!
//! Every request, whether it comes from the spider's start requests, from a
//! handler, or from a matched rule, enters the crawl through
//! [`Scheduler::enqueue_request`]. The scheduler asks the [`DupeFilter`]
//! whether the request may run and, if so, pushes it onto an unbounded
//! channel that the downloader task drains.
//!
//! The pending counter is raised before the request becomes visible to the
//! downloader and lowered only once the downloader has registered the request
//! as in flight, so the engine never sees a false idle moment between the two.
//!
//! ## Example
//!
//! ```rust,ignore
//! let (scheduler, request_receiver) = Scheduler::new(DupeFilter::new(), stats);
//! let admission = scheduler.enqueue_request(Request::get("https://example.com")?).await?;
//! assert!(admission.is_admitted());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use kanal::{AsyncReceiver, AsyncSender, unbounded_async};
use tracing::{debug, info, trace};

use crate::dupefilter::{Admission, DupeFilter};
use crate::error::SpiderError;
use crate::request::Request;
use crate::stats::StatCollector;

pub struct Scheduler {
    tx: AsyncSender<Request>,
    dupefilter: DupeFilter,
    pending_requests: AtomicUsize,
    pub(crate) is_shutting_down: AtomicBool,
    stats: Arc<StatCollector>,
}

impl Scheduler {
    /// Creates a new `Scheduler` and returns it together with the receiving
    /// end of the frontier.
    pub fn new(
        dupefilter: DupeFilter,
        stats: Arc<StatCollector>,
    ) -> (Arc<Self>, AsyncReceiver<Request>) {
        let (tx, rx) = unbounded_async();
        let scheduler = Arc::new(Scheduler {
            tx,
            dupefilter,
            pending_requests: AtomicUsize::new(0),
            is_shutting_down: AtomicBool::new(false),
            stats,
        });
        (scheduler, rx)
    }

    /// Submits a request for admission and, when admitted, queues it.
    ///
    /// A suppressed duplicate is reported as `Ok(Admission::DuplicateSuppressed)`;
    /// errors only come from a scheduler that is shutting down.
    pub async fn enqueue_request(&self, request: Request) -> Result<Admission, SpiderError> {
        if self.is_shutting_down.load(Ordering::SeqCst) {
            return Err(SpiderError::General(format!(
                "scheduler is shutting down, dropping {}",
                request.url()
            )));
        }

        let admission = self.dupefilter.should_admit(&request);
        if !admission.is_admitted() {
            debug!("Duplicate request suppressed: {}", request.url());
            self.stats.increment_requests_duplicate_suppressed();
            return Ok(admission);
        }

        trace!("Enqueuing request: {}", request.url());
        self.pending_requests.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.tx.send(request).await {
            self.pending_requests.fetch_sub(1, Ordering::SeqCst);
            return Err(SpiderError::General(format!(
                "scheduler channel closed: {}",
                e
            )));
        }
        self.stats.increment_requests_enqueued();
        Ok(admission)
    }

    /// Called by the downloader after it registered the request as in flight.
    pub(crate) fn request_taken(&self) {
        self.pending_requests.fetch_sub(1, Ordering::SeqCst);
    }

    /// Stops admitting requests and closes the frontier.
    pub fn shutdown(&self) {
        if self.is_shutting_down.swap(true, Ordering::SeqCst) {
            debug!("Scheduler already shut down");
            return;
        }
        info!(
            "Scheduler shutting down with {} pending requests",
            self.len()
        );
        let _ = self.tx.close();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    pub fn dupefilter(&self) -> &DupeFilter {
        &self.dupefilter
    }

    /// Returns the number of pending requests in the scheduler.
    #[inline]
    pub fn len(&self) -> usize {
        self.pending_requests.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.is_empty()
    }
}
