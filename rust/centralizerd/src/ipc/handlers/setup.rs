use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::db_conn;
use crate::ipc::types::{AppState, Request};
use crate::settings::{self, SettingsSection};
use serde_json::{json, Map, Value};

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let mut out = Map::new();
    for section in SettingsSection::ALL {
        match settings::load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SettingsSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    match settings::update_section(conn, section, patch_obj) {
        Ok(current) => {
            tracing::info!(section = section.name(), "settings updated");
            ok(&req.id, json!({ section.name(): current }))
        }
        Err(e) => engine_err(&req.id, &e, None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
