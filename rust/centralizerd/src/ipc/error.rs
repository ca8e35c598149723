use crate::error::EngineError;
use crate::model::Scope;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Engine failure as a response. Writes never partially apply, so every failure
/// reports zero records written.
pub fn engine_err(id: &str, e: &EngineError, scope: Option<&Scope>) -> serde_json::Value {
    let mut details = e.details();
    details["recordsWritten"] = json!(0);
    if let Some(scope) = scope {
        details["scope"] = json!(scope);
    }
    err(id, e.code(), e.to_string(), Some(details))
}
