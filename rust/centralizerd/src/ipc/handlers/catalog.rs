use crate::catalog::{self, TieredCatalog};
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::{db_conn, required_i64, required_str, required_strings};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn level_param(req: &Request) -> Result<String, serde_json::Value> {
    required_str(req, "level").map(|s| s.to_ascii_lowercase())
}

fn handle_subject_sets_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let level = match level_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let grade = match required_i64(req, "grade") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match catalog::expected_subject_set(conn, &level, grade) {
        Ok(set) => ok(&req.id, json!(set)),
        Err(e) => engine_err(&req.id, &e, None),
    }
}

fn handle_subject_sets_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let level = match level_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let grade = match required_i64(req, "grade") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subjects = match required_strings(req, "subjects") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match catalog::put_subject_set(conn, &level, grade, &subjects) {
        Ok(set) => ok(&req.id, json!(set)),
        Err(e) => engine_err(&req.id, &e, None),
    }
}

fn handle_subject_sets_seed_tiered(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let level = match level_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(grades) = req
        .params
        .get("grades")
        .and_then(|v| v.as_array())
        .and_then(|a| a.iter().map(|g| g.as_i64()).collect::<Option<Vec<_>>>())
    else {
        return err(&req.id, "bad_params", "grades must be an array of integers", None);
    };
    if grades.is_empty() {
        return err(&req.id, "bad_params", "grades must not be empty", None);
    }
    let base = match required_strings(req, "base") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let extension = match required_strings(req, "extension") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let extension_from_grade = match required_i64(req, "extensionFromGrade") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let tiers = TieredCatalog {
        base,
        extension,
        extension_from_grade,
    };
    match catalog::seed_tiered(conn, &level, &grades, &tiers) {
        Ok(sets) => ok(&req.id, json!({ "subjectSets": sets })),
        Err(e) => engine_err(&req.id, &e, None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "catalog.subjectSets.get" => Some(handle_subject_sets_get(state, req)),
        "catalog.subjectSets.set" => Some(handle_subject_sets_set(state, req)),
        "catalog.subjectSets.seedTiered" => Some(handle_subject_sets_seed_tiered(state, req)),
        _ => None,
    }
}
