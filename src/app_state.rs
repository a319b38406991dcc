// =============================================================================
// Central Application State — Funding Sentinel
// =============================================================================
//
// The single source of truth for the engine. The monitor loop and the REST
// command layer both hold an Arc<AppState>; the alert store and repeat
// tracker are injectable components with their own lifecycles so tests can
// construct isolated instances.
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock for the mutable error ring buffer.
//   - Arc wrappers for components that manage their own interior mutability.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::alert_store::AlertStore;
use crate::repeat_tracker::RepeatTracker;
use crate::runtime_config::RuntimeConfig;

// =============================================================================
// Error Record
// =============================================================================

/// A recorded error event for the status API error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// Human-readable error message.
    pub message: String,
    /// ISO 8601 timestamp.
    pub at: String,
}

// =============================================================================
// AppState
// =============================================================================

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    /// Monotonically increasing version counter. Incremented on every
    /// meaningful state mutation so status clients can detect changes.
    pub state_version: AtomicU64,

    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    /// Durable user -> symbol -> rule mapping.
    pub alert_store: Arc<AlertStore>,

    /// In-memory consecutive-match phases. Never persisted: a restart re-arms
    /// every rule even though the rules themselves survive.
    pub repeat_tracker: Arc<RepeatTracker>,

    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    /// Instant when the engine was started. Used for uptime calculations.
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Construct a new `AppState` from the given runtime configuration.
    ///
    /// The returned value is typically wrapped in `Arc` immediately.
    pub fn new(config: RuntimeConfig) -> Self {
        let alert_store = Arc::new(AlertStore::new(
            &config.alerts_path,
            config.max_rules_per_user,
        ));

        Self {
            state_version: AtomicU64::new(1),
            runtime_config: Arc::new(RwLock::new(config)),
            alert_store,
            repeat_tracker: Arc::new(RepeatTracker::new()),
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    /// Atomically increment the state version. Call this after every
    /// meaningful mutation.
    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    /// Read the current state version without modifying it.
    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Error Logging ───────────────────────────────────────────────────

    /// Record an error message. The ring buffer is capped at
    /// [`MAX_RECENT_ERRORS`]; oldest entries are evicted when the limit is
    /// reached.
    pub fn push_error(&self, msg: String) {
        let record = ErrorRecord {
            message: msg,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }

        self.increment_version();
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Build a serialisable snapshot of the engine state for the status API.
    pub fn build_snapshot(&self) -> StateSnapshot {
        let config = self.runtime_config.read();
        let book = self.alert_store.load_all();

        let users = book.len();
        let rules: usize = book.values().map(|m| m.len()).sum();

        StateSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            poll_interval_secs: config.poll_interval_secs,
            users,
            rules,
            recent_errors: self.recent_errors.read().clone(),
        }
    }
}

// =============================================================================
// Serialisable snapshot types
// =============================================================================

/// Engine state snapshot returned by the status API.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
    pub poll_interval_secs: u64,
    /// Number of users with at least one active rule.
    pub users: usize,
    /// Total number of active rules across all users.
    pub rules: usize,
    pub recent_errors: Vec<ErrorRecord>,
}
