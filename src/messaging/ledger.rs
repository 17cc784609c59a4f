// ABOUTME: Per-subscription retry accounting keyed by correlation id
// ABOUTME: Seen set plus attempt counters, replaced wholesale by a periodic eviction task
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Default)]
struct LedgerState {
    seen: HashSet<String>,
    attempts: HashMap<String, u32>,
}

/// Tracks which correlation ids are being processed and how often each was
/// requeued. One ledger belongs to one [`super::SubscribeRuntime`].
#[derive(Debug, Default)]
pub struct RetryLedger {
    state: Mutex<LedgerState>,
}

impl RetryLedger {
    /// Empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` as seen. Returns `false` when it already was.
    pub fn mark_seen(&self, id: &str) -> bool {
        self.state.lock().seen.insert(id.to_owned())
    }

    /// Whether `id` is in the seen set
    #[must_use]
    pub fn is_seen(&self, id: &str) -> bool {
        self.state.lock().seen.contains(id)
    }

    /// Requeues recorded for `id`
    #[must_use]
    pub fn attempts(&self, id: &str) -> u32 {
        self.state.lock().attempts.get(id).copied().unwrap_or(0)
    }

    /// Claim one more retry for `id`.
    ///
    /// While fewer than `max_retry` attempts were recorded the counter is
    /// incremented and the new attempt number is returned. `None` means the
    /// budget is spent. The seen mark stays until [`Self::release_seen`].
    pub fn register_retry(&self, id: &str, max_retry: u32) -> Option<u32> {
        let mut state = self.state.lock();
        let attempts = state.attempts.entry(id.to_owned()).or_insert(0);
        if *attempts >= max_retry {
            return None;
        }
        *attempts += 1;
        Some(*attempts)
    }

    /// Clear the seen mark so the next delivery of `id` is processed
    pub fn release_seen(&self, id: &str) {
        self.state.lock().seen.remove(id);
    }

    /// Replace both maps with empty ones
    pub fn evict(&self) {
        let evicted = {
            let mut state = self.state.lock();
            let evicted = state.seen.len() + state.attempts.len();
            *state = LedgerState::default();
            evicted
        };
        debug!(evicted, "retry ledger evicted");
    }

    /// Evict every `every` until `token` is cancelled
    pub async fn run_eviction(self: Arc<Self>, every: Duration, token: CancellationToken) {
        if every.is_zero() {
            token.cancelled().await;
            return;
        }
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => self.evict(),
            }
        }
    }
}
