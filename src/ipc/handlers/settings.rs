use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::report;
use chrono::Utc;
use serde_json::json;

const SETTINGS_FIELDS: [(&str, &str); 7] = [
    ("schoolName", "school_name"),
    ("schoolAddress", "school_address"),
    ("schoolPhone", "school_phone"),
    ("schoolEmail", "school_email"),
    ("nextTermBegins", "next_term_begins"),
    ("boysUniform", "boys_uniform"),
    ("girlsUniform", "girls_uniform"),
];

const FEE_FIELDS: [(&str, &str); 3] = [
    ("ptaFund", "pta_fund"),
    ("sdfFund", "sdf_fund"),
    ("boardingFee", "boarding_fee"),
];

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match report::school_info(conn) {
        Ok(info) => ok(&req.id, json!({ "settings": info })),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

fn apply_patch(
    conn: &rusqlite::Connection,
    req: &Request,
    table: &str,
    fields: &[(&str, &str)],
) -> Result<usize, serde_json::Value> {
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(err(&req.id, "bad_params", "missing patch object", None));
    };

    let mut sets: Vec<String> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    for (key, column) in fields {
        if let Some(v) = patch.get(*key) {
            let Some(text) = v.as_str() else {
                return Err(err(
                    &req.id,
                    "bad_params",
                    format!("{} must be a string", key),
                    None,
                ));
            };
            sets.push(format!("{} = ?", column));
            values.push(text.to_string().into());
        }
    }
    if sets.is_empty() {
        return Err(err(
            &req.id,
            "bad_params",
            "patch contains no known fields",
            None,
        ));
    }
    sets.push("updated_at = ?".to_string());
    values.push(Utc::now().to_rfc3339().into());

    let sql = format!("UPDATE {} SET {} WHERE id = 1", table, sets.join(", "));
    conn.execute(&sql, rusqlite::params_from_iter(values))
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

fn handle_settings_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match apply_patch(conn, req, "school_settings", &SETTINGS_FIELDS) {
        Ok(_) => {
            log::info!("school settings updated");
            handle_settings_get(state, req)
        }
        Err(e) => e,
    }
}

fn handle_fees_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match report::fee_info(conn) {
        Ok(fees) => ok(&req.id, json!({ "fees": fees })),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

fn handle_fees_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match apply_patch(conn, req, "school_fees", &FEE_FIELDS) {
        Ok(_) => {
            log::info!("school fees updated");
            handle_fees_get(state, req)
        }
        Err(e) => e,
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.update" => Some(handle_settings_update(state, req)),
        "fees.get" => Some(handle_fees_get(state, req)),
        "fees.update" => Some(handle_fees_update(state, req)),
        _ => None,
    }
}
