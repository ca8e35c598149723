use crate::error::EngineError;
use crate::ipc::error::{engine_err, ok};
use crate::ipc::helpers::{db_conn, required_str, scope_param, term_param};
use crate::ipc::types::{AppState, Request};
use crate::ledger;
use crate::stats;
use serde_json::json;

fn handle_ledger_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let scope = match scope_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let term = match term_param(req, Some(&scope)) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let period_id = match required_str(req, "periodId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match ledger::load_slice(conn, &scope, term, &period_id) {
        Ok(records) => ok(&req.id, json!({ "records": records })),
        Err(e) => engine_err(&req.id, &EngineError::from(e), Some(&scope)),
    }
}

fn handle_statistics_compute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let scope = match scope_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let term = match term_param(req, Some(&scope)) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let period_id = match required_str(req, "periodId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match stats::compute_statistics(conn, &scope, term, &period_id) {
        Ok(report) => ok(&req.id, json!(report)),
        Err(e) => {
            tracing::warn!(code = e.code(), error = %e, "statistics failed");
            engine_err(&req.id, &e, Some(&scope))
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "ledger.get" => Some(handle_ledger_get(state, req)),
        "statistics.compute" => Some(handle_statistics_compute(state, req)),
        _ => None,
    }
}
