//! Operational state of one crawl run.
//!
//! `CrawlerState` is the crawl-scoped context shared by every stage. Its
//! atomic counters say what is in motion right now:
//! - requests being downloaded,
//! - outcomes whose callback or errback has not finished,
//! - the number of faults reported so far.
//!
//! The engine reads them to move through [`CrawlPhase`]s and to decide when
//! the crawl is finished.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use serde::Serialize;

/// Lifecycle of a crawl run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlPhase {
    Idle,
    Running,
    /// Nothing left to fetch, but handlers are still producing output.
    Draining,
    Done,
}

impl CrawlPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => CrawlPhase::Idle,
            1 => CrawlPhase::Running,
            2 => CrawlPhase::Draining,
            _ => CrawlPhase::Done,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            CrawlPhase::Idle => 0,
            CrawlPhase::Running => 1,
            CrawlPhase::Draining => 2,
            CrawlPhase::Done => 3,
        }
    }
}

/// Why a crawl reached `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CloseReason {
    Finished,
    Cancelled,
    ErrorLimitExceeded,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Finished => "finished",
            CloseReason::Cancelled => "cancelled",
            CloseReason::ErrorLimitExceeded => "error-limit-exceeded",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents the shared state of the crawler's various actors.
#[derive(Debug)]
pub struct CrawlerState {
    /// The number of requests currently being downloaded.
    pub in_flight_requests: AtomicUsize,
    /// Outcomes handed to dispatch whose handlers have not completed.
    pub parsing_responses: AtomicUsize,
    /// Faults reported to the error sink.
    pub error_count: AtomicUsize,
    phase: AtomicU8,
}

impl Default for CrawlerState {
    fn default() -> Self {
        Self {
            in_flight_requests: AtomicUsize::new(0),
            parsing_responses: AtomicUsize::new(0),
            error_count: AtomicUsize::new(0),
            phase: AtomicU8::new(CrawlPhase::Idle.as_u8()),
        }
    }
}

impl CrawlerState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn phase(&self) -> CrawlPhase {
        CrawlPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Moves to `next` unless the crawl is already `Done`. Returns the
    /// previous phase when the phase changed.
    pub(crate) fn transition(&self, next: CrawlPhase) -> Option<CrawlPhase> {
        let mut current = self.phase.load(Ordering::SeqCst);
        loop {
            let phase = CrawlPhase::from_u8(current);
            if phase == CrawlPhase::Done || phase == next {
                return None;
            }
            match self.phase.compare_exchange(
                current,
                next.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Some(phase),
                Err(actual) => current = actual,
            }
        }
    }

    /// Counts one fault and returns the new total.
    pub(crate) fn record_error(&self) -> usize {
        self.error_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn errors(&self) -> usize {
        self.error_count.load(Ordering::SeqCst)
    }

    pub fn has_active_handlers(&self) -> bool {
        self.parsing_responses.load(Ordering::SeqCst) > 0
    }

    pub fn has_in_flight_requests(&self) -> bool {
        self.in_flight_requests.load(Ordering::SeqCst) > 0
    }

    /// Checks if all crawler activities are idle.
    pub fn is_idle(&self) -> bool {
        !self.has_in_flight_requests() && !self.has_active_handlers()
    }

    /// Counts one unit of `activity` until the returned guard is dropped.
    pub(crate) fn begin(self: &Arc<Self>, activity: Activity) -> ActivityGuard {
        self.counter(activity).fetch_add(1, Ordering::SeqCst);
        ActivityGuard {
            state: Arc::clone(self),
            activity,
        }
    }

    fn counter(&self, activity: Activity) -> &AtomicUsize {
        match activity {
            Activity::Download => &self.in_flight_requests,
            Activity::Dispatch => &self.parsing_responses,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Activity {
    Download,
    Dispatch,
}

/// Keeps an activity counter raised. Dropping it, including on panic or
/// task abort, lowers the counter again.
#[derive(Debug)]
pub(crate) struct ActivityGuard {
    state: Arc<CrawlerState>,
    activity: Activity,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.state
            .counter(self.activity)
            .fetch_sub(1, Ordering::SeqCst);
    }
}
