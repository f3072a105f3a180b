use thiserror::Error;
use tracker_core::{UsageLimitSnapshot, UsageStatus};

/// Quota figures fetched from a remote usage endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveUsage {
    pub limits: Vec<UsageLimitSnapshot>,
}

/// Failure of the live usage boundary. Distinct from "no data": callers fall
/// back to locally collected figures and surface the matching status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LiveUsageError {
    #[error("live usage authentication failed: {0}")]
    Auth(String),
    #[error("live usage unavailable: {0}")]
    Unavailable(String),
}

impl LiveUsageError {
    pub fn status(&self) -> UsageStatus {
        match self {
            Self::Auth(_) => UsageStatus::Auth,
            Self::Unavailable(_) => UsageStatus::Error,
        }
    }
}

/// A source of live quota data, e.g. an HTTP client with stored credentials.
/// Implementations own their timeout.
pub trait LiveUsageProvider: Send + Sync {
    fn name(&self) -> &str;

    fn fetch(&self) -> Result<LiveUsage, LiveUsageError>;
}
