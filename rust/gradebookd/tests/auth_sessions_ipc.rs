mod support;

use serde_json::json;
use support::{Sidecar, ADMIN_PASSWORD};

#[test]
fn login_rejects_bad_credentials() {
    let workspace = support::temp_dir("gradebook-auth-bad");
    let mut sc = Sidecar::spawn();
    sc.open_workspace(&workspace);

    let (code, _) = sc.request_err(
        "auth.login",
        json!({ "username": "admin", "password": "wrong" }),
    );
    assert_eq!(code, "unauthorized");

    let (code, _) = sc.request_err("auth.login", json!({ "username": "admin" }));
    assert_eq!(code, "bad_params");
}

#[test]
fn login_requires_workspace() {
    let mut sc = Sidecar::spawn();
    let (code, _) = sc.request_err(
        "auth.login",
        json!({ "username": "admin", "password": ADMIN_PASSWORD }),
    );
    assert_eq!(code, "no_workspace");
}

#[test]
fn no_admin_without_bootstrap_password() {
    let workspace = support::temp_dir("gradebook-auth-nobootstrap");
    let mut sc = Sidecar::spawn_with_env(&[]);
    sc.open_workspace(&workspace);
    let (code, _) = sc.request_err(
        "auth.login",
        json!({ "username": "admin", "password": ADMIN_PASSWORD }),
    );
    assert_eq!(code, "unauthorized");
}

#[test]
fn session_lifecycle_login_whoami_logout() {
    let (mut sc, _ws) = Sidecar::ready("gradebook-auth-lifecycle");

    let me = sc.request_ok("auth.whoami", json!({}));
    assert_eq!(me["user"]["username"], json!("admin"));

    let out = sc.request_ok("auth.logout", json!({}));
    assert_eq!(out["revoked"], json!(true));

    let (code, error) = sc.request_err("auth.whoami", json!({}));
    assert_eq!(code, "unauthorized");
    assert_eq!(error["message"], json!("invalid session"));

    sc.token = None;
    let (code, error) = sc.request_err("students.list", json!({}));
    assert_eq!(code, "unauthorized");
    assert_eq!(error["message"], json!("session token is required"));
}

#[test]
fn expired_sessions_are_rejected() {
    let (mut sc, ws) = Sidecar::ready("gradebook-auth-expired");
    let token = sc.token.clone().expect("token");

    let conn = rusqlite::Connection::open(support::db_path(&ws)).expect("open db");
    conn.execute(
        "UPDATE sessions SET expires_at = '2000-01-01T00:00:00+00:00' WHERE token = ?",
        [&token],
    )
    .expect("expire session");
    drop(conn);

    let (code, error) = sc.request_err("courses.available", json!({}));
    assert_eq!(code, "unauthorized");
    assert_eq!(error["message"], json!("session expired"));
}

#[test]
fn sessions_are_independent_per_token() {
    let (mut sc, _ws) = Sidecar::ready("gradebook-auth-tokens");
    let first = sc.token.clone().expect("token");
    let second = sc.login_admin();
    assert_ne!(first, second);

    sc.request_ok("auth.logout", json!({}));
    sc.token = Some(first);
    sc.request_ok("auth.whoami", json!({}));
}
