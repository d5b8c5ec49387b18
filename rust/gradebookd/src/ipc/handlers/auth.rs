use crate::auth::{self, AuthError};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{require_db, require_session, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let username = match required_str(req, "username") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    // Passwords are compared as given; no trimming.
    let password = match req.params.get("password").and_then(|v| v.as_str()) {
        Some(p) if !p.is_empty() => p,
        _ => return err(&req.id, "bad_params", "missing password", None),
    };

    match auth::login(conn, &username, password, state.config.session_ttl_hours) {
        Ok(session) => {
            tracing::info!(username = %session.user.username, "login succeeded");
            ok(
                &req.id,
                json!({
                    "token": session.token,
                    "expiresAt": session.expires_at,
                    "user": session.user,
                }),
            )
        }
        Err(AuthError::InvalidCredentials) => {
            tracing::warn!(username = %username, "login failed");
            err(&req.id, "unauthorized", "invalid credentials", None)
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, session) = match require_session(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match auth::logout(conn, &session.token) {
        Ok(revoked) => ok(&req.id, json!({ "revoked": revoked })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_whoami(state: &mut AppState, req: &Request) -> serde_json::Value {
    match require_session(state, req) {
        Ok((_, session)) => ok(
            &req.id,
            json!({ "user": session.user, "expiresAt": session.expires_at }),
        ),
        Err(resp) => resp,
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        "auth.whoami" => Some(handle_whoami(state, req)),
        _ => None,
    }
}
