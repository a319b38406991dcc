// =============================================================================
// Alert Monitor Loop — periodic funding-rate evaluation
// =============================================================================
//
// Runs as a background Tokio task, waking on a fixed cadence to:
//   1. Load the full alert book once per cycle.
//   2. Fetch the current funding rate for each rule's symbol.
//   3. Evaluate the rule; a non-match re-arms the pair.
//   4. On a match, notify the owner; on the second consecutive match, retire
//      the rule, clear its repeat state, and confirm the retirement.
//   5. Log every cycle with its outcome counts.
//
// The monitor is designed to be spawned once at engine startup:
//
//   tokio::spawn(run_alert_monitor(
//       Arc::clone(&state),
//       source,
//       notifier,
//   ));
//
// Failure semantics: a fetch failure is scoped to one (user, symbol) pair —
// the owner is told, the cycle continues. A failed rule removal is retried
// once within the cycle; if the retry also fails the owner is told and the
// pair stays pending so the next cycle tries again. Nothing that happens to
// one user's rule can abort another user's evaluation.
// =============================================================================

use std::sync::Arc;

use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::evaluator::evaluate;
use crate::notify::Notifier;
use crate::repeat_tracker::MatchOutcome;
use crate::source::SignalSource;
use crate::types::AlertRule;

/// Outcome counts for a single monitor cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    /// Rules evaluated this cycle (fetch failures included).
    pub rules: usize,
    /// Rules whose condition held.
    pub matches: usize,
    /// Rules retired after their second consecutive match.
    pub expired: usize,
    /// Per-symbol fetch failures.
    pub fetch_failures: usize,
}

/// Run the alert monitor loop. This function runs forever and should be
/// spawned as a background Tokio task.
pub async fn run_alert_monitor(
    state: Arc<AppState>,
    source: Arc<dyn SignalSource>,
    notifier: Arc<dyn Notifier>,
) {
    let (startup_delay, poll_interval) = {
        let config = state.runtime_config.read();
        (config.startup_delay_secs, config.poll_interval_secs)
    };

    info!(
        startup_delay_secs = startup_delay,
        interval_secs = poll_interval,
        "alert monitor started"
    );

    tokio::time::sleep(Duration::from_secs(startup_delay)).await;

    let mut ticker = interval(Duration::from_secs(poll_interval));
    loop {
        ticker.tick().await;

        let stats = run_cycle(&state, source.as_ref(), notifier.as_ref()).await;

        if stats.rules == 0 {
            debug!("monitor cycle: no active rules");
        } else {
            info!(
                rules = stats.rules,
                matches = stats.matches,
                expired = stats.expired,
                fetch_failures = stats.fetch_failures,
                "monitor cycle complete"
            );
        }
    }
}

/// Evaluate every active rule once.
///
/// Separated from the scheduling loop so tests can drive cycles directly.
pub async fn run_cycle(
    state: &AppState,
    source: &dyn SignalSource,
    notifier: &dyn Notifier,
) -> CycleStats {
    let mut stats = CycleStats::default();

    // One whole-book read per cycle; every rule below sees this snapshot.
    // Rules deleted while the cycle runs are handled at the point of
    // mutation, never by re-reading here.
    let book = state.alert_store.load_all();

    for (user_id, rules) in &book {
        for (symbol, rule) in rules {
            stats.rules += 1;

            let value = match source.fetch_value(symbol).await {
                Ok(value) => value,
                Err(e) => {
                    stats.fetch_failures += 1;
                    warn!(user = %user_id, symbol = %symbol, error = %e, "funding fetch failed");
                    state.push_error(format!("funding fetch failed for {symbol}: {e}"));
                    notify(
                        notifier,
                        user_id,
                        &format!("❌ Funding check failed for {symbol}: {e}"),
                    )
                    .await;
                    continue;
                }
            };

            if !evaluate(rule.operator, rule.threshold, value) {
                state.repeat_tracker.note_miss(user_id, symbol);
                continue;
            }

            stats.matches += 1;

            // The owner hears about every match, first or second.
            notify(notifier, user_id, &match_text(rule, value)).await;

            match state.repeat_tracker.note_match(user_id, symbol) {
                MatchOutcome::First => {
                    debug!(user = %user_id, symbol = %symbol, value, "first consecutive match");
                }
                MatchOutcome::Expire => {
                    if retire_rule(state, notifier, user_id, symbol).await {
                        stats.expired += 1;
                    }
                }
            }
        }
    }

    stats
}

/// Remove a rule that has matched twice in a row.
///
/// The removal re-reads the durable book, so a rule the user deleted while
/// this cycle was running is simply found absent. Store write failures are
/// retried once; if the retry fails too, the owner is told and the pair is
/// left pending so the next cycle attempts the removal again.
async fn retire_rule(
    state: &AppState,
    notifier: &dyn Notifier,
    user_id: &str,
    symbol: &str,
) -> bool {
    let removed = match state.alert_store.remove(user_id, symbol) {
        Ok(removed) => removed,
        Err(first_err) => {
            warn!(
                user = %user_id,
                symbol = %symbol,
                error = %first_err,
                "rule removal failed — retrying"
            );
            match state.alert_store.remove(user_id, symbol) {
                Ok(removed) => removed,
                Err(e) => {
                    warn!(user = %user_id, symbol = %symbol, error = %e, "rule removal retry failed");
                    state.push_error(format!("failed to remove expired alert {symbol}: {e}"));
                    notify(
                        notifier,
                        user_id,
                        &format!("❌ Could not remove the alert for {symbol}; will retry next cycle."),
                    )
                    .await;
                    return false;
                }
            }
        }
    };

    // Either the monitor removed the rule or the user already had; in both
    // cases the pair's repeat state is obsolete.
    state.repeat_tracker.clear(user_id, symbol);
    state.increment_version();

    if removed {
        info!(user = %user_id, symbol = %symbol, "alert auto-retired after second match");
        notify(
            notifier,
            user_id,
            &format!("✅ Alert for {symbol} removed after 2 consecutive triggers."),
        )
        .await;
    }

    removed
}

fn match_text(rule: &AlertRule, value: f64) -> String {
    format!(
        "⚠️ Funding {} = {:.3}% {} {}%",
        rule.symbol, value, rule.operator, rule.threshold
    )
}

/// Send one message, logging delivery failures. The core never retries.
async fn notify(notifier: &dyn Notifier, user_id: &str, text: &str) {
    if let Err(e) = notifier.send(user_id, text).await {
        warn!(user = %user_id, error = %e, "notification delivery failed");
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::repeat_tracker::MatchPhase;
    use crate::runtime_config::RuntimeConfig;
    use crate::types::Operator;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};
    use uuid::Uuid;

    // ── Test doubles ────────────────────────────────────────────────────

    /// Returns a fixed value per symbol; symbols in `failing` error instead.
    struct FixedSource {
        values: HashMap<String, f64>,
        failing: Vec<String>,
    }

    impl FixedSource {
        fn new(values: &[(&str, f64)]) -> Self {
            Self {
                values: values
                    .iter()
                    .map(|(s, v)| (s.to_string(), *v))
                    .collect(),
                failing: Vec::new(),
            }
        }

        fn failing_for(mut self, symbol: &str) -> Self {
            self.failing.push(symbol.to_string());
            self
        }
    }

    #[async_trait]
    impl SignalSource for FixedSource {
        async fn fetch_value(&self, symbol: &str) -> Result<f64> {
            if self.failing.iter().any(|s| s == symbol) {
                return Err(anyhow!("exchange unreachable"));
            }
            self.values
                .get(symbol)
                .copied()
                .ok_or_else(|| anyhow!("no value for {symbol}"))
        }
    }

    /// Pops one scripted value per fetch, so each cycle sees the next value.
    struct SeqSource {
        values: Mutex<VecDeque<f64>>,
    }

    impl SeqSource {
        fn new(values: &[f64]) -> Self {
            Self {
                values: Mutex::new(values.iter().copied().collect()),
            }
        }
    }

    #[async_trait]
    impl SignalSource for SeqSource {
        async fn fetch_value(&self, _symbol: &str) -> Result<f64> {
            self.values
                .lock()
                .pop_front()
                .ok_or_else(|| anyhow!("script exhausted"))
        }
    }

    /// Records every message it is asked to deliver.
    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingNotifier {
        fn messages_for(&self, user_id: &str) -> Vec<String> {
            self.sent
                .lock()
                .iter()
                .filter(|(u, _)| u == user_id)
                .map(|(_, t)| t.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, user_id: &str, text: &str) -> Result<()> {
            self.sent.lock().push((user_id.to_string(), text.to_string()));
            Ok(())
        }
    }

    /// Fails every delivery.
    struct DeadNotifier;

    #[async_trait]
    impl Notifier for DeadNotifier {
        async fn send(&self, _user_id: &str, _text: &str) -> Result<()> {
            Err(anyhow!("delivery channel down"))
        }
    }

    /// Deletes the user's rules when a message arrives, simulating a
    /// user-initiated deletion racing the in-flight cycle.
    struct DeletingNotifier {
        store: Arc<crate::alert_store::AlertStore>,
    }

    #[async_trait]
    impl Notifier for DeletingNotifier {
        async fn send(&self, user_id: &str, _text: &str) -> Result<()> {
            self.store.remove_all_for_user(user_id).ok();
            Ok(())
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    fn test_state() -> AppState {
        let config = RuntimeConfig {
            alerts_path: std::env::temp_dir()
                .join(format!("monitor-test-{}.json", Uuid::new_v4()))
                .to_string_lossy()
                .into_owned(),
            ..RuntimeConfig::default()
        };
        AppState::new(config)
    }

    fn add_rule(state: &AppState, user: &str, symbol: &str, op: Operator, threshold: f64) {
        state
            .alert_store
            .upsert(user, AlertRule::new(symbol, op, threshold))
            .unwrap();
    }

    // ── Cycle behaviour ─────────────────────────────────────────────────

    #[tokio::test]
    async fn match_reset_match_expire_sequence() {
        let state = test_state();
        add_rule(&state, "42", "BTC/USDT", Operator::Gt, -0.01);

        // Percentages seen by the monitor across four cycles.
        let source = SeqSource::new(&[0.0, -2.0, 1.0, 2.0]);
        let notifier = RecordingNotifier::default();

        // Cycle 1: 0.0 > -0.01 — match, first trigger, rule retained.
        let stats = run_cycle(&state, &source, &notifier).await;
        assert_eq!((stats.matches, stats.expired), (1, 0));
        assert_eq!(state.repeat_tracker.phase("42", "BTC/USDT"), MatchPhase::PendingExpiry);
        assert_eq!(state.alert_store.rules_for("42").len(), 1);

        // Cycle 2: -2.0 > -0.01 fails — pair re-arms, rule retained.
        let stats = run_cycle(&state, &source, &notifier).await;
        assert_eq!(stats.matches, 0);
        assert_eq!(state.repeat_tracker.phase("42", "BTC/USDT"), MatchPhase::Armed);
        assert_eq!(state.alert_store.rules_for("42").len(), 1);

        // Cycle 3: 1.0 matches — fresh first trigger.
        let stats = run_cycle(&state, &source, &notifier).await;
        assert_eq!((stats.matches, stats.expired), (1, 0));
        assert_eq!(state.alert_store.rules_for("42").len(), 1);

        // Cycle 4: 2.0 matches again — rule retired, phase cleared.
        let stats = run_cycle(&state, &source, &notifier).await;
        assert_eq!((stats.matches, stats.expired), (1, 1));
        assert!(state.alert_store.load_all().is_empty());
        assert_eq!(state.repeat_tracker.phase("42", "BTC/USDT"), MatchPhase::Armed);

        let messages = notifier.messages_for("42");
        // Three match alerts plus one retirement confirmation.
        assert_eq!(messages.len(), 4);
        assert!(messages[0].contains("Funding BTC/USDT"));
        assert!(messages[3].contains("removed after 2 consecutive triggers"));
    }

    #[tokio::test]
    async fn expiry_after_exactly_two_consecutive_matches() {
        let state = test_state();
        add_rule(&state, "42", "BTC/USDT", Operator::Gte, 0.01);

        let source = FixedSource::new(&[("BTC/USDT", 0.05)]);
        let notifier = RecordingNotifier::default();

        let stats = run_cycle(&state, &source, &notifier).await;
        assert_eq!(stats.expired, 0);
        assert_eq!(state.alert_store.rules_for("42").len(), 1);

        let stats = run_cycle(&state, &source, &notifier).await;
        assert_eq!(stats.expired, 1);
        assert!(state.alert_store.load_all().is_empty());

        // A third cycle sees no rules at all — nothing fires.
        let stats = run_cycle(&state, &source, &notifier).await;
        assert_eq!(stats, CycleStats::default());
        assert_eq!(notifier.messages_for("42").len(), 3);
    }

    #[tokio::test]
    async fn fetch_failure_is_isolated_to_its_symbol() {
        let state = test_state();
        add_rule(&state, "42", "BTC/USDT", Operator::Gt, 0.0);
        add_rule(&state, "42", "ETH/USDT", Operator::Gt, 0.0);
        add_rule(&state, "7", "SOL/USDT", Operator::Gt, 0.0);

        let source = FixedSource::new(&[("ETH/USDT", 0.02), ("SOL/USDT", 0.03)])
            .failing_for("BTC/USDT");
        let notifier = RecordingNotifier::default();

        let stats = run_cycle(&state, &source, &notifier).await;
        assert_eq!(stats.fetch_failures, 1);
        assert_eq!(stats.matches, 2);

        // The failing symbol's owner hears about the failure...
        let user_42 = notifier.messages_for("42");
        assert!(user_42.iter().any(|m| m.contains("Funding check failed for BTC/USDT")));
        // ...while the healthy rules still evaluate and notify normally.
        assert!(user_42.iter().any(|m| m.contains("Funding ETH/USDT")));
        assert!(notifier.messages_for("7")[0].contains("Funding SOL/USDT"));
    }

    #[tokio::test]
    async fn fetch_failure_does_not_reset_match_progress() {
        let state = test_state();
        add_rule(&state, "42", "BTC/USDT", Operator::Gt, 0.0);
        let notifier = RecordingNotifier::default();

        let matching = FixedSource::new(&[("BTC/USDT", 0.05)]);
        run_cycle(&state, &matching, &notifier).await;

        // A failed fetch is neither a match nor a miss.
        let failing = FixedSource::new(&[]).failing_for("BTC/USDT");
        run_cycle(&state, &failing, &notifier).await;
        assert_eq!(state.repeat_tracker.phase("42", "BTC/USDT"), MatchPhase::PendingExpiry);

        // The next successful match is therefore the second consecutive one.
        let stats = run_cycle(&state, &matching, &notifier).await;
        assert_eq!(stats.expired, 1);
    }

    #[tokio::test]
    async fn notify_failure_does_not_block_expiry() {
        let state = test_state();
        add_rule(&state, "42", "BTC/USDT", Operator::Gt, 0.0);

        let source = FixedSource::new(&[("BTC/USDT", 0.05)]);

        run_cycle(&state, &source, &DeadNotifier).await;
        let stats = run_cycle(&state, &source, &DeadNotifier).await;

        assert_eq!(stats.expired, 1);
        assert!(state.alert_store.load_all().is_empty());
    }

    #[tokio::test]
    async fn user_deletion_racing_expiry_is_tolerated() {
        let state = test_state();
        add_rule(&state, "42", "BTC/USDT", Operator::Gt, 0.0);

        // Pair already pending: the next match would retire the rule.
        state.repeat_tracker.note_match("42", "BTC/USDT");

        // The match alert triggers a user deletion before the monitor's own
        // removal runs; the monitor must treat the missing rule as done.
        let source = FixedSource::new(&[("BTC/USDT", 0.05)]);
        let notifier = DeletingNotifier {
            store: state.alert_store.clone(),
        };

        let stats = run_cycle(&state, &source, &notifier).await;
        assert_eq!(stats.expired, 0);
        assert!(state.alert_store.load_all().is_empty());
        assert_eq!(state.repeat_tracker.phase("42", "BTC/USDT"), MatchPhase::Armed);
    }

    #[tokio::test]
    async fn eq_rule_matches_at_six_decimal_digits() {
        let state = test_state();
        add_rule(&state, "42", "BTC/USDT", Operator::Eq, 0.01);

        let source = FixedSource::new(&[("BTC/USDT", 0.0100004999)]);
        let notifier = RecordingNotifier::default();

        let stats = run_cycle(&state, &source, &notifier).await;
        assert_eq!(stats.matches, 1);
    }
}
