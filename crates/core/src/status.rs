use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const NEAR_LIMIT_PERCENT: f64 = 90.0;
pub const LIMITED_PERCENT: f64 = 100.0;

/// Coarse usage status reported per provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageStatus {
    #[default]
    Ok,
    NearLimit,
    Limited,
    Auth,
    Error,
    Unsupported,
    Unknown,
}

impl UsageStatus {
    /// Data-availability outcomes that threshold evaluation never overrides.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Auth | Self::Error | Self::Unsupported)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NearLimit => "near_limit",
            Self::Limited => "limited",
            Self::Auth => "auth",
            Self::Error => "error",
            Self::Unsupported => "unsupported",
            Self::Unknown => "unknown",
        }
    }
}

/// Threshold status for "percent of quota consumed" values. NaN is ignored.
pub fn status_from_percentages<I>(percentages: I) -> UsageStatus
where
    I: IntoIterator<Item = f64>,
{
    let mut status = UsageStatus::Ok;
    for value in percentages.into_iter().filter(|value| !value.is_nan()) {
        if value >= LIMITED_PERCENT {
            return UsageStatus::Limited;
        }
        if value >= NEAR_LIMIT_PERCENT {
            status = UsageStatus::NearLimit;
        }
    }
    status
}

pub fn derive_status(current: UsageStatus, metrics: &BTreeMap<String, f64>) -> UsageStatus {
    if current.is_terminal() {
        return current;
    }
    status_from_percentages(metrics.values().copied())
}
