// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Public endpoints (health) require no
// authentication. All other endpoints require a valid Bearer token checked
// via the `AuthBearer` extractor.
//
// This is the rule-mutation command surface: whatever front end drives the
// bot (chat commands, a dashboard) talks to the alert store exclusively
// through these routes, so store access stays serialised behind one process.
//
// Symbols containing a slash ("BTC/USDT") are passed percent-encoded in the
// path ("BTC%2FUSDT"); the Path extractor decodes them.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::error::RuleError;
use crate::types::{AlertRule, Operator};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/state", get(full_state))
        .route(
            "/api/v1/alerts/:user_id",
            get(list_alerts).delete(delete_all_alerts),
        )
        .route(
            "/api/v1/alerts/:user_id/:symbol",
            put(upsert_alert).delete(delete_alert),
        )
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Error mapping
// =============================================================================

fn rule_error_response(err: RuleError) -> Response {
    let status = match &err {
        RuleError::QuotaExceeded { .. } => StatusCode::CONFLICT,
        RuleError::InvalidOperator(_) | RuleError::InvalidThreshold(_) => StatusCode::BAD_REQUEST,
        RuleError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = serde_json::json!({ "error": err.to_string() });
    (status, Json(body)).into_response()
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// Full state snapshot (authenticated)
// =============================================================================

async fn full_state(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.build_snapshot();
    Json(snapshot)
}

// =============================================================================
// Alert rules (authenticated)
// =============================================================================

async fn list_alerts(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    Json(state.alert_store.rules_for(&user_id))
}

#[derive(Deserialize)]
struct AlertUpsertRequest {
    /// Symbolic comparison operator: `>`, `>=`, `<`, `<=`, or `=`.
    operator: String,
    /// Threshold in percentage units.
    threshold: f64,
}

async fn upsert_alert(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path((user_id, symbol)): Path<(String, String)>,
    Json(req): Json<AlertUpsertRequest>,
) -> Response {
    let operator: Operator = match req.operator.parse() {
        Ok(op) => op,
        Err(e) => return rule_error_response(e),
    };

    if !req.threshold.is_finite() {
        return rule_error_response(RuleError::InvalidThreshold(req.threshold.to_string()));
    }

    let symbol = symbol.trim().to_uppercase();
    let rule = AlertRule::new(symbol.clone(), operator, req.threshold);

    match state.alert_store.upsert(&user_id, rule.clone()) {
        Ok(()) => {
            // A replaced rule starts its match cycle over.
            state.repeat_tracker.clear(&user_id, &symbol);
            state.increment_version();
            info!(user = %user_id, symbol = %symbol, "alert rule set via API");
            (StatusCode::OK, Json(rule)).into_response()
        }
        Err(e) => rule_error_response(e),
    }
}

async fn delete_alert(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path((user_id, symbol)): Path<(String, String)>,
) -> Response {
    let symbol = symbol.trim().to_uppercase();

    match state.alert_store.remove(&user_id, &symbol) {
        Ok(removed) => {
            state.repeat_tracker.clear(&user_id, &symbol);
            state.increment_version();
            Json(serde_json::json!({ "removed": removed })).into_response()
        }
        Err(e) => rule_error_response(e.into()),
    }
}

async fn delete_all_alerts(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Response {
    // Snapshot the symbols first so their repeat state can be dropped too.
    let symbols: Vec<String> = state
        .alert_store
        .rules_for(&user_id)
        .into_iter()
        .map(|r| r.symbol)
        .collect();

    match state.alert_store.remove_all_for_user(&user_id) {
        Ok(removed) => {
            for symbol in &symbols {
                state.repeat_tracker.clear(&user_id, symbol);
            }
            state.increment_version();
            Json(serde_json::json!({ "removed": removed })).into_response()
        }
        Err(e) => rule_error_response(e.into()),
    }
}
