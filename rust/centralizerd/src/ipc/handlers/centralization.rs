use crate::centralize::{self, CentralizeRequest};
use crate::collaborators::SqliteCollaborators;
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::{db_conn, required_str, scope_param, term_param};
use crate::ipc::types::{AppState, Request};
use crate::model::ClassroomFinalScore;
use serde_json::json;
use std::collections::BTreeSet;

fn parse_batch(req: &Request) -> Result<Vec<ClassroomFinalScore>, serde_json::Value> {
    let Some(raw) = req.params.get("scores") else {
        return Err(err(&req.id, "bad_params", "missing scores", None));
    };
    let Some(items) = raw.as_array() else {
        return Err(err(&req.id, "bad_params", "scores must be an array", None));
    };
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let parsed: ClassroomFinalScore = serde_json::from_value(item.clone()).map_err(|e| {
            err(
                &req.id,
                "bad_params",
                format!("scores[{}]: {}", i, e),
                Some(json!({ "index": i })),
            )
        })?;
        out.push(parsed);
    }
    Ok(out)
}

fn parse_subjects(req: &Request) -> Result<Option<BTreeSet<String>>, serde_json::Value> {
    match req.params.get("subjects") {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(arr) = v.as_array() else {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "subjects must be an array of strings",
                    None,
                ));
            };
            let mut out = BTreeSet::new();
            for s in arr {
                let Some(code) = s.as_str() else {
                    return Err(err(
                        &req.id,
                        "bad_params",
                        "subjects must be an array of strings",
                        None,
                    ));
                };
                out.insert(code.trim().to_ascii_uppercase());
            }
            Ok(Some(out))
        }
    }
}

fn handle_centralize(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let actor_id = match required_str(req, "actorId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subjects = match parse_subjects(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let batch = match parse_batch(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let request = CentralizeRequest {
        scope,
        term,
        period_id,
        subjects,
        batch,
    };
    let collab = SqliteCollaborators::new(conn);
    match centralize::centralize(conn, &collab, &request, &actor_id) {
        Ok(outcome) => ok(&req.id, json!(outcome)),
        Err(e) => {
            tracing::warn!(code = e.code(), error = %e, "centralize rejected");
            engine_err(&req.id, &e, Some(&request.scope))
        }
    }
}

fn handle_centralize_classroom(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let classroom_id = match required_str(req, "classroomId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let term = match term_param(req, None) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let actor_id = match required_str(req, "actorId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let collab = SqliteCollaborators::new(conn);
    match centralize::centralize_single_classroom(conn, &collab, &classroom_id, term, &actor_id) {
        Ok(outcome) => ok(&req.id, json!(outcome)),
        Err(e) => {
            tracing::warn!(code = e.code(), error = %e, "classroom centralize rejected");
            engine_err(&req.id, &e, None)
        }
    }
}

fn handle_scope_archive(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let scope = match scope_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let period_id = match required_str(req, "periodId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let actor_id = match required_str(req, "actorId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let collab = SqliteCollaborators::new(conn);
    match centralize::archive_scope(conn, &collab, &scope, &period_id, &actor_id) {
        Ok(outcome) => ok(&req.id, json!(outcome)),
        Err(e) => engine_err(&req.id, &e, Some(&scope)),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "centralize" => Some(handle_centralize(state, req)),
        "centralize.classroom" => Some(handle_centralize_classroom(state, req)),
        "scope.archive" => Some(handle_scope_archive(state, req)),
        _ => None,
    }
}
