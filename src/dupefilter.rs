//! Request de-duplication.
//!
//! The filter owns the crawl's seen-set of fingerprints. `should_admit` is the
//! only place the set is mutated: the check and the insert happen in one
//! `DashSet::insert`, so concurrent submissions of the same logical request
//! admit exactly one of them.

use dashmap::DashSet;
use reqwest::header::HeaderName;
use tracing::trace;

use crate::request::Request;

/// Outcome of submitting a request to the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First time this fingerprint was seen.
    Admitted,
    /// The request opted out of filtering; the seen-set was not touched.
    Bypassed,
    /// Same fingerprint already seen. Not an error.
    DuplicateSuppressed,
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        !matches!(self, Admission::DuplicateSuppressed)
    }
}

#[derive(Debug, Default)]
pub struct DupeFilter {
    seen: DashSet<String>,
    include_headers: Vec<HeaderName>,
}

impl DupeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the named request headers part of the fingerprint.
    pub fn with_headers(mut self, include_headers: Vec<HeaderName>) -> Self {
        self.include_headers = include_headers;
        self
    }

    pub fn fingerprint(&self, request: &Request) -> String {
        request.fingerprint_with_headers(&self.include_headers)
    }

    /// Decides whether `request` may be scheduled, recording its fingerprint
    /// when it is admitted for the first time.
    pub fn should_admit(&self, request: &Request) -> Admission {
        if request.is_dont_filter() {
            return Admission::Bypassed;
        }
        let fingerprint = self.fingerprint(request);
        if self.seen.insert(fingerprint) {
            Admission::Admitted
        } else {
            trace!("Fingerprint already seen for {}", request.url());
            Admission::DuplicateSuppressed
        }
    }

    pub fn has_seen(&self, request: &Request) -> bool {
        self.seen.contains(&self.fingerprint(request))
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }
}
