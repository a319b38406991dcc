// =============================================================================
// Alert Store — durable user -> symbol -> rule mapping
// =============================================================================
//
// The full alert book lives in one human-readable JSON document that is
// re-written wholesale on every mutation (no append log, no partial patch
// format). Writes use the atomic tmp + rename pattern so a crash mid-write
// never leaves a torn document behind.
//
// An unreadable or corrupt document is treated as an empty book. This is a
// deliberate availability-over-consistency choice: the monitor keeps running
// on a fresh book instead of failing every cycle on a storage fault. The
// degradation is logged at WARN, never silent.
//
// All mutations take the `write_lock` around their load + mutate + save
// sequence. Both the monitor loop (auto-expiry) and the REST command layer
// mutate the book, so the read-modify-write must never interleave.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::RuleError;
use crate::types::{AlertBook, AlertRule};

/// Durable store for per-user alert rules.
pub struct AlertStore {
    path: PathBuf,
    max_rules_per_user: usize,
    /// Serialises every load + mutate + save sequence.
    write_lock: Mutex<()>,
}

impl AlertStore {
    /// Create a store backed by the document at `path`.
    ///
    /// The file is not created until the first mutation; a missing file reads
    /// as an empty book.
    pub fn new(path: impl AsRef<Path>, max_rules_per_user: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_rules_per_user,
            write_lock: Mutex::new(()),
        }
    }

    // -------------------------------------------------------------------------
    // Whole-document primitives
    // -------------------------------------------------------------------------

    /// Read the full alert book from disk.
    ///
    /// Never fails: a missing, unreadable, or corrupt document yields an empty
    /// book (logged at WARN when the file exists but cannot be parsed).
    pub fn load_all(&self) -> AlertBook {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "alerts file not found — empty book");
                return AlertBook::new();
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "alerts file unreadable — continuing with empty book"
                );
                return AlertBook::new();
            }
        };

        match serde_json::from_str(&content) {
            Ok(book) => book,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "alerts file corrupt — continuing with empty book"
                );
                AlertBook::new()
            }
        }
    }

    /// Atomically persist the full alert book, overwriting any prior content
    /// (write to `.tmp`, then rename).
    pub fn save_all(&self, book: &AlertBook) -> Result<()> {
        let content =
            serde_json::to_string_pretty(book).context("failed to serialise alert book to JSON")?;

        let tmp_path = self.path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp alerts to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to rename tmp alerts to {}", self.path.display()))?;

        debug!(path = %self.path.display(), "alert book saved (atomic)");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Rule mutations (load + mutate + save under the write lock)
    // -------------------------------------------------------------------------

    /// Insert or replace the rule for `(user_id, rule.symbol)`.
    ///
    /// Replacing a symbol the user already tracks is always accepted. A new
    /// symbol is rejected with [`RuleError::QuotaExceeded`] once the user
    /// tracks the maximum number of distinct symbols.
    pub fn upsert(&self, user_id: &str, rule: AlertRule) -> Result<(), RuleError> {
        let _guard = self.write_lock.lock();

        let mut book = self.load_all();

        let at_quota = book
            .get(user_id)
            .map(|rules| {
                rules.len() >= self.max_rules_per_user && !rules.contains_key(&rule.symbol)
            })
            .unwrap_or(false);

        if at_quota {
            return Err(RuleError::QuotaExceeded {
                user: user_id.to_string(),
                max: self.max_rules_per_user,
            });
        }

        info!(
            user = %user_id,
            symbol = %rule.symbol,
            operator = %rule.operator,
            threshold = rule.threshold,
            "alert rule upserted"
        );

        book.entry(user_id.to_string())
            .or_default()
            .insert(rule.symbol.clone(), rule);
        self.save_all(&book)?;
        Ok(())
    }

    /// Remove the rule for `(user_id, symbol)`. Returns `true` if a rule was
    /// present. Removing a user's last rule removes the user entry entirely.
    pub fn remove(&self, user_id: &str, symbol: &str) -> Result<bool> {
        let _guard = self.write_lock.lock();

        let mut book = self.load_all();
        let removed = match book.get_mut(user_id) {
            Some(user_rules) => {
                let removed = user_rules.remove(symbol).is_some();
                if user_rules.is_empty() {
                    book.remove(user_id);
                }
                removed
            }
            None => false,
        };

        if removed {
            self.save_all(&book)?;
            info!(user = %user_id, symbol = %symbol, "alert rule removed");
        }

        Ok(removed)
    }

    /// Remove every rule belonging to `user_id`. Returns `true` if the user
    /// had any rules.
    pub fn remove_all_for_user(&self, user_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock();

        let mut book = self.load_all();
        let removed = book.remove(user_id).is_some();

        if removed {
            self.save_all(&book)?;
            info!(user = %user_id, "all alert rules removed for user");
        }

        Ok(removed)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Return the rules currently tracked for `user_id`.
    pub fn rules_for(&self, user_id: &str) -> Vec<AlertRule> {
        self.load_all()
            .get(user_id)
            .map(|rules| rules.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for AlertStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertStore")
            .field("path", &self.path)
            .field("max_rules_per_user", &self.max_rules_per_user)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Operator;
    use uuid::Uuid;

    fn temp_store() -> AlertStore {
        let path = std::env::temp_dir().join(format!("alerts-test-{}.json", Uuid::new_v4()));
        AlertStore::new(path, 8)
    }

    fn rule(symbol: &str) -> AlertRule {
        AlertRule::new(symbol, Operator::Gt, 0.01)
    }

    #[test]
    fn missing_file_reads_as_empty_book() {
        let store = temp_store();
        assert!(store.load_all().is_empty());
    }

    #[test]
    fn corrupt_file_reads_as_empty_book() {
        let store = temp_store();
        std::fs::write(&store.path, "{ not json").unwrap();
        assert!(store.load_all().is_empty());
    }

    #[test]
    fn upsert_then_load_roundtrips() {
        let store = temp_store();
        store.upsert("42", rule("BTC/USDT")).unwrap();

        let book = store.load_all();
        assert_eq!(book["42"]["BTC/USDT"].symbol, "BTC/USDT");
        assert_eq!(book["42"]["BTC/USDT"].operator, Operator::Gt);
    }

    #[test]
    fn save_of_loaded_book_is_idempotent() {
        let store = temp_store();
        store.upsert("42", rule("BTC/USDT")).unwrap();
        store.upsert("7", rule("ETH/USDT")).unwrap();

        let before = store.load_all();
        store.save_all(&before).unwrap();
        assert_eq!(store.load_all(), before);
    }

    #[test]
    fn ninth_distinct_symbol_is_rejected() {
        let store = temp_store();
        for i in 0..8 {
            store.upsert("42", rule(&format!("SYM{i}/USDT"))).unwrap();
        }

        let err = store.upsert("42", rule("SYM8/USDT")).unwrap_err();
        assert!(matches!(err, RuleError::QuotaExceeded { max: 8, .. }));

        // Nothing was mutated by the rejection.
        assert_eq!(store.rules_for("42").len(), 8);
    }

    #[test]
    fn replacing_tracked_symbol_is_accepted_at_quota() {
        let store = temp_store();
        for i in 0..8 {
            store.upsert("42", rule(&format!("SYM{i}/USDT"))).unwrap();
        }

        let replacement = AlertRule::new("SYM3/USDT", Operator::Lte, -0.05);
        store.upsert("42", replacement.clone()).unwrap();

        let book = store.load_all();
        assert_eq!(book["42"].len(), 8);
        assert_eq!(book["42"]["SYM3/USDT"], replacement);
    }

    #[test]
    fn quota_is_per_user() {
        let store = temp_store();
        for i in 0..8 {
            store.upsert("42", rule(&format!("SYM{i}/USDT"))).unwrap();
        }
        // A different user is unaffected by user 42's quota.
        store.upsert("7", rule("BTC/USDT")).unwrap();
    }

    #[test]
    fn removing_last_rule_drops_user_entry() {
        let store = temp_store();
        store.upsert("42", rule("BTC/USDT")).unwrap();

        assert!(store.remove("42", "BTC/USDT").unwrap());
        assert!(store.load_all().is_empty());
    }

    #[test]
    fn remove_missing_rule_is_noop() {
        let store = temp_store();
        store.upsert("42", rule("BTC/USDT")).unwrap();

        assert!(!store.remove("42", "ETH/USDT").unwrap());
        assert!(!store.remove("7", "BTC/USDT").unwrap());
        assert_eq!(store.rules_for("42").len(), 1);
    }

    #[test]
    fn remove_all_for_user_clears_only_that_user() {
        let store = temp_store();
        store.upsert("42", rule("BTC/USDT")).unwrap();
        store.upsert("42", rule("ETH/USDT")).unwrap();
        store.upsert("7", rule("SOL/USDT")).unwrap();

        assert!(store.remove_all_for_user("42").unwrap());
        assert!(!store.remove_all_for_user("42").unwrap());

        let book = store.load_all();
        assert!(!book.contains_key("42"));
        assert_eq!(book["7"].len(), 1);
    }
}
