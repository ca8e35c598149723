//! Seeding methods for the collaborator tables (roster, gradebook, periods, actors).
//! The owning systems normally write these rows; the sidecar accepts them so a workspace
//! can be populated without those systems attached.

use crate::error::EngineError;
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::{db_conn, required_str, scope_param, term_param};
use crate::ipc::types::{AppState, Request};
use crate::model::{round_score, SCORE_MAX};
use serde_json::json;

fn handle_periods_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(active) = req.params.get("active").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "active must be boolean", None);
    };
    let label = req
        .params
        .get("label")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| id.clone());
    if let Err(e) = conn.execute(
        "INSERT INTO management_periods(id, label, active) VALUES(?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET label = excluded.label, active = excluded.active",
        (&id, &label, active as i64),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "management_periods" })),
        );
    }
    tracing::info!(period = %id, active, "management period updated");
    ok(&req.id, json!({ "id": id, "active": active }))
}

fn handle_actors_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let role = match required_str(req, "role") {
        Ok(v) => v.to_ascii_lowercase(),
        Err(resp) => return resp,
    };
    if let Err(e) = conn.execute(
        "INSERT INTO actors(id, role) VALUES(?, ?)
         ON CONFLICT(id) DO UPDATE SET role = excluded.role",
        (&id, &role),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "actors" })),
        );
    }
    ok(&req.id, json!({ "id": id, "role": role }))
}

fn handle_offerings_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let classroom_id = match required_str(req, "classroomId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let scope = match scope_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject_code = match required_str(req, "subjectCode") {
        Ok(v) => v.to_ascii_uppercase(),
        Err(resp) => return resp,
    };
    let period_id = match required_str(req, "periodId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let teacher_id = req
        .params
        .get("teacherId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    if let Err(e) = conn.execute(
        "INSERT INTO classroom_offerings(
            id, school_id, level, grade, section, subject_code, period_id, teacher_id)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           school_id = excluded.school_id,
           level = excluded.level,
           grade = excluded.grade,
           section = excluded.section,
           subject_code = excluded.subject_code,
           period_id = excluded.period_id,
           teacher_id = excluded.teacher_id",
        rusqlite::params![
            classroom_id,
            scope.school_id,
            scope.level,
            scope.grade,
            scope.section,
            subject_code,
            period_id,
            teacher_id,
        ],
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classroom_offerings" })),
        );
    }
    ok(&req.id, json!({ "classroomId": classroom_id }))
}

fn handle_enrollments_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let enrollment_id = match required_str(req, "enrollmentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let classroom_id = match required_str(req, "classroomId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(e) = conn.execute(
        "INSERT INTO enrollments(id, classroom_id, student_id) VALUES(?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           classroom_id = excluded.classroom_id,
           student_id = excluded.student_id",
        (&enrollment_id, &classroom_id, &student_id),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "enrollments" })),
        );
    }
    ok(&req.id, json!({ "enrollmentId": enrollment_id }))
}

fn handle_final_scores_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let enrollment_id = match required_str(req, "enrollmentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let term = match term_param(req, None) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(score) = req.params.get("score").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "score must be a number", None);
    };
    if !(0.0..=SCORE_MAX).contains(&score) {
        let e = EngineError::InvalidScore {
            enrollment_id,
            score,
        };
        return engine_err(&req.id, &e, None);
    }
    if let Err(e) = conn.execute(
        "INSERT INTO classroom_final_scores(enrollment_id, term, score, updated_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(enrollment_id, term) DO UPDATE SET
           score = excluded.score,
           updated_at = excluded.updated_at",
        (
            &enrollment_id,
            term.get(),
            round_score(score),
            chrono::Utc::now().to_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classroom_final_scores" })),
        );
    }
    ok(&req.id, json!({ "enrollmentId": enrollment_id, "term": term.get() }))
}

fn handle_periods_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let sql = "SELECT id, label, active FROM management_periods ORDER BY id";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "label": r.get::<_, String>(1)?,
                "active": r.get::<_, i64>(2)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(periods) => ok(&req.id, json!({ "periods": periods })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "periods.upsert" => Some(handle_periods_upsert(state, req)),
        "periods.list" => Some(handle_periods_list(state, req)),
        "actors.upsert" => Some(handle_actors_upsert(state, req)),
        "roster.offerings.upsert" => Some(handle_offerings_upsert(state, req)),
        "roster.enrollments.upsert" => Some(handle_enrollments_upsert(state, req)),
        "gradebook.finalScores.set" => Some(handle_final_scores_set(state, req)),
        _ => None,
    }
}
