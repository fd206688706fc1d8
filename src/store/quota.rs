// src/store/quota.rs
//! Quota ledger: units consumed against a ceiling inside a fixed,
//! anchored accounting window (e.g. "24h starting 08:00 UTC").
//!
//! Persisted as a single JSON record `{window_start, consumed, ceiling}`.
//! The check-then-debit in [`QuotaLedger::reserve_at`] runs inside one
//! mutex critical section, so concurrent pollers cannot overspend.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::write_atomic;
use crate::error::StoreError;

/// How accounting windows are laid out on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    pub length: Duration,
    /// Offset of window boundaries from the Unix epoch.
    pub anchor: Duration,
}

impl WindowPolicy {
    pub fn new(length: Duration, anchor: Duration) -> Self {
        Self { length, anchor }
    }

    pub fn daily_at_hour_utc(hour: u32) -> Self {
        Self::new(Duration::hours(24), Duration::hours(i64::from(hour % 24)))
    }

    /// Start of the window containing `now`: `anchor + k * length`.
    pub fn window_start_for(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let len = self.length.num_seconds().max(1);
        let anchor = self.anchor.num_seconds();
        let k = (now.timestamp() - anchor).div_euclid(len);
        DateTime::from_timestamp(anchor + k * len, 0).unwrap_or(now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaState {
    pub window_start: DateTime<Utc>,
    pub consumed: u64,
    pub ceiling: u64,
}

impl QuotaState {
    pub fn remaining(&self) -> u64 {
        self.ceiling.saturating_sub(self.consumed)
    }
}

#[derive(Debug)]
pub struct QuotaLedger {
    policy: WindowPolicy,
    path: Option<PathBuf>,
    state: Mutex<QuotaState>,
}

impl QuotaLedger {
    /// Non-durable ledger for tests and dry runs.
    pub fn in_memory(ceiling: u64, policy: WindowPolicy) -> Self {
        Self::in_memory_at(ceiling, policy, Utc::now())
    }

    pub fn in_memory_at(ceiling: u64, policy: WindowPolicy, now: DateTime<Utc>) -> Self {
        Self {
            policy,
            path: None,
            state: Mutex::new(QuotaState {
                window_start: policy.window_start_for(now),
                consumed: 0,
                ceiling,
            }),
        }
    }

    /// Open (or create) the ledger at `path`. The configured `ceiling`
    /// replaces whatever ceiling was persisted.
    pub fn open(path: &Path, ceiling: u64, policy: WindowPolicy) -> Result<Self, StoreError> {
        let state = match fs::read_to_string(path) {
            Ok(s) => {
                let mut st: QuotaState =
                    serde_json::from_str(&s).map_err(|e| StoreError::Corrupt {
                        path: path.to_path_buf(),
                        detail: e.to_string(),
                    })?;
                if st.ceiling != ceiling {
                    tracing::info!(
                        target: "quota",
                        old = st.ceiling,
                        new = ceiling,
                        "quota ceiling changed by configuration"
                    );
                    st.ceiling = ceiling;
                }
                st
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => QuotaState {
                window_start: policy.window_start_for(Utc::now()),
                consumed: 0,
                ceiling,
            },
            Err(e) => return Err(StoreError::io(path, e)),
        };

        Ok(Self {
            policy,
            path: Some(path.to_path_buf()),
            state: Mutex::new(state),
        })
    }

    pub fn policy(&self) -> WindowPolicy {
        self.policy
    }

    pub fn reserve(&self, units: u64) -> Result<bool, StoreError> {
        self.reserve_at(units, Utc::now())
    }

    /// Debit `units` from the window containing `now`.
    ///
    /// `Ok(false)` means the debit would exceed the ceiling and nothing was
    /// debited. A failed persist rolls the debit back and returns `Err`.
    pub fn reserve_at(&self, units: u64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut st = self.lock()?;
        if self.roll(&mut st, now) {
            self.persist(&st)?;
        }

        if units > st.remaining() {
            tracing::debug!(
                target: "quota",
                requested = units,
                remaining = st.remaining(),
                "reservation refused"
            );
            return Ok(false);
        }
        if units == 0 {
            return Ok(true);
        }

        st.consumed += units;
        if let Err(e) = self.persist(&st) {
            st.consumed -= units;
            return Err(e);
        }
        metrics::gauge!("blueflag_quota_remaining").set(st.remaining() as f64);
        Ok(true)
    }

    pub fn window_remaining(&self) -> u64 {
        self.window_remaining_at(Utc::now())
    }

    pub fn window_remaining_at(&self, now: DateTime<Utc>) -> u64 {
        self.snapshot_at(now).remaining()
    }

    /// Current state as of `now`, with any due rollover applied to the copy.
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> QuotaState {
        let mut st = match self.state.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        self.roll(&mut st, now);
        st
    }

    pub fn snapshot(&self) -> QuotaState {
        self.snapshot_at(Utc::now())
    }

    /// Move to a fresh window when `now` has crossed the boundary.
    /// Never moves backwards, so a clock step back cannot refill the budget.
    fn roll(&self, st: &mut QuotaState, now: DateTime<Utc>) -> bool {
        let start = self.policy.window_start_for(now);
        if start > st.window_start {
            tracing::info!(
                target: "quota",
                previous_consumed = st.consumed,
                window_start = %start,
                "quota window rolled over"
            );
            st.window_start = start;
            st.consumed = 0;
            true
        } else {
            false
        }
    }

    fn persist(&self, st: &QuotaState) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(st).map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            detail: e.to_string(),
        })?;
        write_atomic(path, &bytes)
    }

    fn lock(&self) -> Result<MutexGuard<'_, QuotaState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("quota ledger lock poisoned".into()))
    }
}
