use std::collections::BTreeMap;

use parking_lot::Mutex;
use tracing::trace;

use crate::{monotonic_now_ns, TimelineItem, INVALID_TOKEN};

/// Predictions older than this are evicted on the next mint.
pub const MAX_RETENTION_TIME_NS: i64 = 120_000_000;

struct TokenEntry {
    minted_at: i64,
    predictions: TimelineItem,
}

struct TokenMap {
    // Tokens are minted with a monotonic clock, so ascending token order is
    // ascending age order and the eviction sweep only has to look at the head.
    predictions: BTreeMap<i64, TokenEntry>,
    next_token: i64,
}

/// Mints monotonically increasing tokens, each bound to a timeline
/// prediction, and retains the predictions for a bounded window.
pub struct TokenManager {
    state: Mutex<TokenMap>,
}

impl TokenManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TokenMap {
                predictions: BTreeMap::new(),
                next_token: INVALID_TOKEN + 1,
            }),
        }
    }

    pub fn generate_token(&self, predictions: TimelineItem) -> i64 {
        let now = monotonic_now_ns();
        let mut state = self.state.lock();
        let token = state.next_token;
        state.next_token += 1;
        state.predictions.insert(
            token,
            TokenEntry {
                minted_at: now,
                predictions,
            },
        );
        Self::flush_tokens(&mut state, now);
        token
    }

    pub fn predictions_for_token(&self, token: i64) -> Option<TimelineItem> {
        self.state
            .lock()
            .predictions
            .get(&token)
            .map(|entry| entry.predictions)
    }

    fn flush_tokens(state: &mut TokenMap, reference_time: i64) {
        while let Some(entry) = state.predictions.first_entry() {
            if reference_time - entry.get().minted_at >= MAX_RETENTION_TIME_NS {
                let (token, _) = entry.remove_entry();
                trace!(token, "evicted expired prediction");
            } else {
                break;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn flush_for_test(&self, reference_time: i64) {
        Self::flush_tokens(&mut self.state.lock(), reference_time);
    }

    #[cfg(test)]
    pub(crate) fn retained_count(&self) -> usize {
        self.state.lock().predictions.len()
    }
}

impl Default for TokenManager {
    fn default() -> Self {
        Self::new()
    }
}
