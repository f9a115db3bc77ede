use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

fn hash_password(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

fn handle_accounts_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let username = match req.params.get("username").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing username", None),
    };
    if username.is_empty() {
        return err(&req.id, "bad_params", "username must not be empty", None);
    }
    let password = match req.params.get("password").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing password", None),
    };
    if password.is_empty() {
        return err(&req.id, "bad_params", "password must not be empty", None);
    }
    let role = req
        .params
        .get("role")
        .and_then(|v| v.as_str())
        .unwrap_or("staff")
        .to_string();

    let exists: Option<String> = match conn
        .query_row(
            "SELECT id FROM accounts WHERE username = ?",
            [&username],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_some() {
        return err(
            &req.id,
            "conflict",
            "username already exists",
            Some(json!({ "username": username })),
        );
    }

    let account_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO accounts(id, username, password_hash, role, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            &account_id,
            &username,
            hash_password(&password),
            &role,
            Utc::now().to_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "accounts" })),
        );
    }

    log::info!("account created: {}", username);
    ok(&req.id, json!({ "accountId": account_id }))
}

fn handle_auth_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let username = match req.params.get("username").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing username", None),
    };
    let password = match req.params.get("password").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing password", None),
    };

    let row: Option<(String, String)> = match conn
        .query_row(
            "SELECT id, role FROM accounts WHERE username = ? AND password_hash = ?",
            (&username, hash_password(&password)),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let Some((account_id, role)) = row else {
        log::warn!("failed login attempt for {}", username);
        return err(&req.id, "unauthorized", "invalid credentials", None);
    };

    if let Err(e) = conn.execute(
        "UPDATE accounts SET last_login = ? WHERE id = ?",
        (Utc::now().to_rfc3339(), &account_id),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "accountId": account_id,
            "username": username,
            "role": role
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "accounts.create" => Some(handle_accounts_create(state, req)),
        "auth.login" => Some(handle_auth_login(state, req)),
        _ => None,
    }
}
