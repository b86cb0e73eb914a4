//! Client-side daily usage quota for anonymous principals.
//!
//! The counter is a local nudge, not an enforcement boundary: it lives in
//! client storage and is never reconciled with the server.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{RecsError, Result};

/// Default ceiling for anonymous principals.
pub const ANONYMOUS_DAILY_LIMIT: u32 = 3;

/// Persisted quota record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaCounter {
    pub count: u32,
    /// Calendar date the count belongs to (no time-of-day component).
    pub reset_boundary: NaiveDate,
}

impl QuotaCounter {
    pub fn fresh(today: NaiveDate) -> Self {
        Self {
            count: 0,
            reset_boundary: today,
        }
    }
}

/// Storage backend for the quota record.
pub trait QuotaStore: Send + Sync {
    fn load(&self) -> Result<Option<QuotaCounter>>;

    fn save(&self, counter: &QuotaCounter) -> Result<()>;
}

/// Source of "today" for boundary checks.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Local wall-clock calendar date.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Volatile store, used when no persistent backend is available and in tests.
#[derive(Debug, Default)]
pub struct InMemoryQuotaStore {
    counter: Mutex<Option<QuotaCounter>>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_counter(counter: QuotaCounter) -> Self {
        Self {
            counter: Mutex::new(Some(counter)),
        }
    }
}

impl QuotaStore for InMemoryQuotaStore {
    fn load(&self) -> Result<Option<QuotaCounter>> {
        Ok(self
            .counter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, counter: &QuotaCounter) -> Result<()> {
        *self.counter.lock().unwrap_or_else(PoisonError::into_inner) = Some(counter.clone());
        Ok(())
    }
}

/// Tracks quota-consuming actions against a fixed daily ceiling.
pub struct QuotaTracker {
    store: Arc<dyn QuotaStore>,
    clock: Arc<dyn Clock>,
    ceiling: u32,
}

impl QuotaTracker {
    pub fn new(store: Arc<dyn QuotaStore>, ceiling: u32) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), ceiling)
    }

    pub fn with_clock(store: Arc<dyn QuotaStore>, clock: Arc<dyn Clock>, ceiling: u32) -> Self {
        Self {
            store,
            clock,
            ceiling,
        }
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Loads today's counter.
    ///
    /// When the stored boundary is not today, the count is reset to zero and
    /// the boundary advanced, and that reset is persisted so it happens once.
    pub fn current(&self) -> Result<QuotaCounter> {
        let today = self.clock.today();
        match self.store.load()? {
            Some(counter) if counter.reset_boundary == today => Ok(counter),
            stale => {
                if let Some(old) = stale {
                    tracing::debug!(
                        previous_count = old.count,
                        previous_boundary = %old.reset_boundary,
                        "quota: day boundary crossed, resetting"
                    );
                }
                let fresh = QuotaCounter::fresh(today);
                self.store.save(&fresh)?;
                Ok(fresh)
            }
        }
    }

    pub fn remaining(&self) -> Result<u32> {
        Ok(self.ceiling.saturating_sub(self.current()?.count))
    }

    pub fn is_exhausted(&self) -> Result<bool> {
        Ok(self.current()?.count >= self.ceiling)
    }

    /// Fails with `QuotaExceeded` when the ceiling has been reached.
    pub fn check(&self) -> Result<()> {
        if self.is_exhausted()? {
            return Err(RecsError::QuotaExceeded {
                ceiling: self.ceiling,
            });
        }
        Ok(())
    }

    /// Records one successful quota-consuming action.
    pub fn increment(&self) -> Result<QuotaCounter> {
        let mut counter = self.current()?;
        counter.count = counter.count.saturating_add(1);
        self.store.save(&counter)?;
        tracing::debug!(count = counter.count, ceiling = self.ceiling, "quota: incremented");
        Ok(counter)
    }
}
