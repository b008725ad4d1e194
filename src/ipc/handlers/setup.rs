use crate::calc::{AggregationPolicy, GradeBand};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const GRADING_KEY: &str = "setup.grading";

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let policy = match helpers::active_policy(conn) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let bands = match helpers::grade_bands(conn) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    ok(
        &req.id,
        json!({
            "grading": {
                "policy": policy.name,
                "bands": bands,
            }
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    if section != "grading" {
        return err(&req.id, "bad_params", "unknown section", None);
    }
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match db::settings_get_json(conn, GRADING_KEY) {
        Ok(v) => v.unwrap_or_else(|| json!({})),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if let Some(policy_raw) = patch.get("policy") {
        let Some(name) = policy_raw.as_str() else {
            return err(&req.id, "bad_params", "policy must be a string", None);
        };
        if AggregationPolicy::parse(name).is_none() {
            return err(
                &req.id,
                "bad_params",
                format!("unknown aggregation policy '{}'", name),
                Some(json!({ "allowed": ["comprehensive", "council_minutes"] })),
            );
        }
        current["policy"] = json!(name);
    }

    if let Some(bands_raw) = patch.get("bands") {
        let bands: Vec<GradeBand> = match serde_json::from_value(bands_raw.clone()) {
            Ok(v) => v,
            Err(e) => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("bands must be [{{min, label}}]: {}", e),
                    None,
                )
            }
        };
        if bands.is_empty() {
            return err(&req.id, "bad_params", "bands must not be empty", None);
        }
        current["bands"] = json!(bands);
    }

    if let Err(e) = db::settings_set_json(conn, GRADING_KEY, &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
