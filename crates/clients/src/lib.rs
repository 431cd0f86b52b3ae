//! Clients for the external services the harvester drives: the metadata
//! lookup ladder, the PDF/JATS fetcher, and the document structuring
//! service. Every outgoing call is rate limited, deadline-bounded, and
//! translated into the stage failure taxonomy rather than surfaced as a
//! transport error.

mod fetch;
mod limiter;
mod metadata;
mod mirror;
mod pmc;
mod structure;
mod urls;

pub use fetch::{Fetcher, PDF_MAGIC};
pub use limiter::{HostLimiter, ServiceLimiter};
pub use metadata::{Enrichment, MetadataClient};
pub use mirror::{LegacyMirror, PublisherMirror};
pub use pmc::PmcIndex;
pub use structure::{StructureOutput, StructuringClient, StructuringOptions};
pub use urls::assemble_candidates;

use models::FailureReason;

/// A stage-level failure: the taxonomy reason that lands on the Entry plus
/// a human detail string for the logs. `retryable` usually follows the
/// reason, except that 4xx responses are terminal within a run even though
/// they are recorded as `http_error`.
#[derive(Debug, thiserror::Error)]
#[error("{reason}: {detail}")]
pub struct Failure {
    pub reason: FailureReason,
    pub detail: String,
    retryable: bool,
}

impl Failure {
    pub fn new(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
            retryable: reason.is_retryable(),
        }
    }

    /// A failure that must not be retried in this run, whatever its reason.
    pub fn terminal(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    fn from_reqwest(err: reqwest::Error, detail: &str) -> Self {
        let reason = if err.is_timeout() {
            FailureReason::Timeout
        } else {
            FailureReason::HttpError
        };
        Self::new(reason, format!("{detail}: {err}"))
    }
}
