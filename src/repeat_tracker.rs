// =============================================================================
// Repeat Tracker — consecutive-match state machine per (user, symbol)
// =============================================================================
//
// Life-cycle per tracked pair:
//   Armed  ->  PendingExpiry   (first matching cycle; rule stays active)
//   PendingExpiry -> expired   (second consecutive match; caller removes the
//                               rule and clears the entry)
//   any    ->  Armed           (non-matching cycle)
//
// Held only in process memory — never persisted. A restart re-arms every
// rule even though the durable rules survive.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;

/// Where a (user, symbol) pair sits in the two-match expiry cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    /// No consecutive match recorded; the next match is a first match.
    Armed,
    /// One match recorded; the next consecutive match expires the rule.
    PendingExpiry,
}

/// Outcome of recording a matching cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// First consecutive match — the rule stays active.
    First,
    /// Second consecutive match — the rule should be retired.
    Expire,
}

/// In-memory tracker of consecutive matches. An injectable component with its
/// own lifecycle so tests can construct isolated instances.
pub struct RepeatTracker {
    phases: RwLock<HashMap<String, HashMap<String, MatchPhase>>>,
}

impl RepeatTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            phases: RwLock::new(HashMap::new()),
        }
    }

    /// Current phase for `(user_id, symbol)`. Untracked pairs are `Armed`.
    pub fn phase(&self, user_id: &str, symbol: &str) -> MatchPhase {
        self.phases
            .read()
            .get(user_id)
            .and_then(|m| m.get(symbol))
            .copied()
            .unwrap_or(MatchPhase::Armed)
    }

    /// Record a matching cycle and return what it means for the rule.
    ///
    /// `Armed` pairs move to `PendingExpiry` and report [`MatchOutcome::First`].
    /// Pairs already in `PendingExpiry` stay there and report
    /// [`MatchOutcome::Expire`]; the entry is kept so a failed rule removal can
    /// be retried on the next cycle — the caller clears it via [`Self::clear`]
    /// once the rule is gone.
    pub fn note_match(&self, user_id: &str, symbol: &str) -> MatchOutcome {
        let mut phases = self.phases.write();
        let entry = phases
            .entry(user_id.to_string())
            .or_default()
            .entry(symbol.to_string())
            .or_insert(MatchPhase::Armed);

        match *entry {
            MatchPhase::Armed => {
                *entry = MatchPhase::PendingExpiry;
                MatchOutcome::First
            }
            MatchPhase::PendingExpiry => MatchOutcome::Expire,
        }
    }

    /// Record a non-matching cycle: the pair returns to `Armed`.
    pub fn note_miss(&self, user_id: &str, symbol: &str) {
        let mut phases = self.phases.write();
        if let Some(user_phases) = phases.get_mut(user_id) {
            if let Some(phase) = user_phases.get_mut(symbol) {
                *phase = MatchPhase::Armed;
            }
        }
    }

    /// Drop the entry for `(user_id, symbol)` entirely. Used when its rule is
    /// retired or deleted. Empty user maps are pruned.
    pub fn clear(&self, user_id: &str, symbol: &str) {
        let mut phases = self.phases.write();
        if let Some(user_phases) = phases.get_mut(user_id) {
            user_phases.remove(symbol);
            if user_phases.is_empty() {
                phases.remove(user_id);
            }
        }
    }
}

impl Default for RepeatTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RepeatTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tracked: usize = self.phases.read().values().map(|m| m.len()).sum();
        f.debug_struct("RepeatTracker")
            .field("tracked_pairs", &tracked)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untracked_pair_is_armed() {
        let tracker = RepeatTracker::new();
        assert_eq!(tracker.phase("42", "BTC/USDT"), MatchPhase::Armed);
    }

    #[test]
    fn first_match_arms_expiry() {
        let tracker = RepeatTracker::new();
        assert_eq!(tracker.note_match("42", "BTC/USDT"), MatchOutcome::First);
        assert_eq!(tracker.phase("42", "BTC/USDT"), MatchPhase::PendingExpiry);
    }

    #[test]
    fn second_consecutive_match_expires() {
        let tracker = RepeatTracker::new();
        tracker.note_match("42", "BTC/USDT");
        assert_eq!(tracker.note_match("42", "BTC/USDT"), MatchOutcome::Expire);
        // Entry survives until explicitly cleared.
        assert_eq!(tracker.phase("42", "BTC/USDT"), MatchPhase::PendingExpiry);
    }

    #[test]
    fn miss_re_arms_the_pair() {
        let tracker = RepeatTracker::new();
        tracker.note_match("42", "BTC/USDT");
        tracker.note_miss("42", "BTC/USDT");

        // The next match is a fresh first match, not an expiry.
        assert_eq!(tracker.note_match("42", "BTC/USDT"), MatchOutcome::First);
    }

    #[test]
    fn clear_drops_entry_and_prunes_user() {
        let tracker = RepeatTracker::new();
        tracker.note_match("42", "BTC/USDT");
        tracker.clear("42", "BTC/USDT");

        assert_eq!(tracker.phase("42", "BTC/USDT"), MatchPhase::Armed);
        assert!(tracker.phases.read().is_empty());
    }

    #[test]
    fn pairs_are_independent() {
        let tracker = RepeatTracker::new();
        tracker.note_match("42", "BTC/USDT");
        tracker.note_match("7", "BTC/USDT");
        tracker.note_miss("42", "BTC/USDT");

        assert_eq!(tracker.phase("42", "BTC/USDT"), MatchPhase::Armed);
        assert_eq!(tracker.phase("7", "BTC/USDT"), MatchPhase::PendingExpiry);
    }
}
