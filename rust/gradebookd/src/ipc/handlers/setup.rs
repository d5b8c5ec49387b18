use crate::calc::{CategoryBand, CategoryBands, GradingPolicy};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::require_session;
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

const GRADING_KEY: &str = "setup.grading";
const MAX_SCALE: f64 = 1000.0;

fn grading_to_json(policy: &GradingPolicy) -> Value {
    json!({
        "scale": policy.scale,
        "passingThreshold": policy.passing_threshold,
        "failingLabel": policy.bands.failing_label(),
        "bands": policy.bands.bands(),
    })
}

fn parse_number(v: &Value, key: &str) -> Result<f64, String> {
    v.as_f64()
        .filter(|n| n.is_finite())
        .ok_or_else(|| format!("{} must be a number", key))
}

fn parse_bands(v: &Value) -> Result<Vec<CategoryBand>, String> {
    serde_json::from_value::<Vec<CategoryBand>>(v.clone())
        .map_err(|e| format!("bands must be a list of {{label, minFraction}}: {e}"))
}

/// Applies `patch` on top of `current`; the merged policy must be consistent.
fn merge_grading_patch(
    current: &GradingPolicy,
    patch: &Map<String, Value>,
) -> Result<GradingPolicy, String> {
    let mut scale = current.scale;
    let mut passing_threshold = current.passing_threshold;
    let mut failing_label = current.bands.failing_label().to_string();
    let mut bands = current.bands.bands().to_vec();

    for (k, v) in patch {
        match k.as_str() {
            "scale" => {
                scale = parse_number(v, k)?;
                if scale <= 0.0 || scale > MAX_SCALE {
                    return Err(format!("scale must be in (0, {}]", MAX_SCALE));
                }
            }
            "passingThreshold" => passing_threshold = parse_number(v, k)?,
            "failingLabel" => {
                failing_label = v
                    .as_str()
                    .ok_or_else(|| "failingLabel must be string".to_string())?
                    .to_string();
            }
            "bands" => bands = parse_bands(v)?,
            _ => return Err(format!("unknown grading field: {}", k)),
        }
    }

    if !(0.0..=scale).contains(&passing_threshold) {
        return Err(format!("passingThreshold must be within 0..={}", scale));
    }
    let bands = CategoryBands::new(failing_label, bands).map_err(|e| e.to_string())?;
    Ok(GradingPolicy {
        scale,
        passing_threshold,
        bands,
    })
}

/// Workspace grading policy; falls back to defaults when unset.
pub fn load_grading(conn: &rusqlite::Connection) -> anyhow::Result<GradingPolicy> {
    let defaults = GradingPolicy::default();
    let Some(saved) = db::settings_get_json(conn, GRADING_KEY)? else {
        return Ok(defaults);
    };
    let Some(saved_obj) = saved.as_object() else {
        return Ok(defaults);
    };
    match merge_grading_patch(&defaults, saved_obj) {
        Ok(policy) => Ok(policy),
        Err(msg) => {
            tracing::warn!(error = %msg, "ignoring malformed grading settings");
            Ok(defaults)
        }
    }
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, _) = match require_session(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match load_grading(conn) {
        Ok(policy) => ok(&req.id, json!({ "grading": grading_to_json(&policy) })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, session) = match require_session(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(section) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    if section != "grading" {
        return err(&req.id, "bad_params", "unknown section", None);
    }
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let current = match load_grading(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let merged = match merge_grading_patch(&current, patch_obj) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let stored = grading_to_json(&merged);
    if let Err(e) = db::settings_set_json(conn, GRADING_KEY, &stored) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(user = %session.user.username, "grading settings updated");
    ok(&req.id, json!({ "grading": stored }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
