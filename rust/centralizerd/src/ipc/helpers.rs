use crate::ipc::error::{engine_err, err};
use crate::ipc::types::{AppState, Request};
use crate::model::{Scope, Term};
use rusqlite::Connection;

pub fn db_conn<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn required_i64(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be an integer", key), None))
}

pub fn required_strings(req: &Request, key: &str) -> Result<Vec<String>, serde_json::Value> {
    let Some(arr) = req.params.get(key).and_then(|v| v.as_array()) else {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be an array of strings", key),
            None,
        ));
    };
    let mut out = Vec::with_capacity(arr.len());
    for v in arr {
        let Some(s) = v.as_str() else {
            return Err(err(
                &req.id,
                "bad_params",
                format!("{} must be an array of strings", key),
                None,
            ));
        };
        out.push(s.to_string());
    }
    Ok(out)
}

pub fn scope_param(req: &Request) -> Result<Scope, serde_json::Value> {
    Scope::parse(req.params.get("scope")).map_err(|msg| err(&req.id, "bad_params", msg, None))
}

pub fn term_param(req: &Request, scope: Option<&Scope>) -> Result<Term, serde_json::Value> {
    let raw = required_i64(req, "term")?;
    Term::new(raw).map_err(|e| engine_err(&req.id, &e, scope))
}
