//! Lock-free run counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use sieve_types::BotStatus;

#[derive(Debug, Default)]
pub struct RunStats {
    success: AtomicU64,
    failure: AtomicU64,
    to_check: AtomicU64,
    retry: AtomicU64,
    ban: AtomicU64,
    error: AtomicU64,
    custom: AtomicU64,
    checked: AtomicU64,
    skip: u64,
}

/// Point-in-time copy of [`RunStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub success: u64,
    pub failure: u64,
    pub to_check: u64,
    pub retry: u64,
    pub ban: u64,
    pub error: u64,
    pub custom: u64,
    pub checked: u64,
    pub skip: u64,
}

impl RunStats {
    pub fn new(skip: u64) -> Self {
        Self {
            skip,
            ..Self::default()
        }
    }

    fn counter(&self, status: &BotStatus) -> &AtomicU64 {
        match status {
            BotStatus::Success => &self.success,
            BotStatus::Failure => &self.failure,
            BotStatus::ToCheck => &self.to_check,
            BotStatus::Retry => &self.retry,
            BotStatus::Ban => &self.ban,
            BotStatus::Error => &self.error,
            BotStatus::None | BotStatus::Custom(_) => &self.custom,
        }
    }

    /// Count a finished record in its bucket.
    pub fn record(&self, status: &BotStatus) {
        self.counter(status).fetch_add(1, Ordering::Relaxed);
        self.checked.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an attempt that ended in a recheckable status.
    pub fn record_recheck(&self, status: &BotStatus) {
        self.counter(status).fetch_add(1, Ordering::Relaxed);
    }

    pub fn checked(&self) -> u64 {
        self.checked.load(Ordering::Relaxed)
    }

    pub fn skip(&self) -> u64 {
        self.skip
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            success: self.success.load(Ordering::Relaxed),
            failure: self.failure.load(Ordering::Relaxed),
            to_check: self.to_check.load(Ordering::Relaxed),
            retry: self.retry.load(Ordering::Relaxed),
            ban: self.ban.load(Ordering::Relaxed),
            error: self.error.load(Ordering::Relaxed),
            custom: self.custom.load(Ordering::Relaxed),
            checked: self.checked.load(Ordering::Relaxed),
            skip: self.skip,
        }
    }
}
