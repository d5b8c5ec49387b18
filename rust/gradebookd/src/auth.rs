use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::db::now_rfc3339;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("session token is required")]
    MissingToken,
    #[error("invalid session")]
    InvalidSession,
    #[error("session expired")]
    Expired,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
}

/// An authenticated caller, resolved from the token sent with a request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub user: User,
    pub expires_at: String,
}

pub fn hash_password(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Creates `username` unless it already exists.
pub fn ensure_user(
    conn: &Connection,
    username: &str,
    password: &str,
    email: Option<&str>,
) -> anyhow::Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO users(id, username, password_hash, email, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            username,
            hash_password(password),
            email,
            now_rfc3339(),
        ),
    )?;
    Ok(inserted > 0)
}

pub fn login(
    conn: &Connection,
    username: &str,
    password: &str,
    ttl_hours: i64,
) -> Result<Session, AuthError> {
    let user: Option<User> = conn
        .query_row(
            "SELECT id, username, email FROM users WHERE username = ? AND password_hash = ?",
            (username, hash_password(password)),
            |r| {
                Ok(User {
                    id: r.get(0)?,
                    username: r.get(1)?,
                    email: r.get(2)?,
                })
            },
        )
        .optional()?;
    let Some(user) = user else {
        return Err(AuthError::InvalidCredentials);
    };

    let now = Utc::now();
    let expires_at = (now + Duration::hours(ttl_hours)).to_rfc3339();
    let token = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sessions(token, user_id, created_at, expires_at) VALUES(?, ?, ?, ?)",
        (&token, &user.id, now.to_rfc3339(), &expires_at),
    )?;

    Ok(Session {
        token,
        user,
        expires_at,
    })
}

pub fn logout(conn: &Connection, token: &str) -> Result<bool, AuthError> {
    let n = conn.execute("DELETE FROM sessions WHERE token = ?", [token])?;
    Ok(n > 0)
}

/// Resolves a presented token at `now`. Expired sessions are deleted.
pub fn resolve_session(
    conn: &Connection,
    token: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Session, AuthError> {
    let token = match token.map(str::trim) {
        Some(t) if !t.is_empty() => t,
        _ => return Err(AuthError::MissingToken),
    };

    let row: Option<(String, String, Option<String>, String)> = conn
        .query_row(
            "SELECT u.id, u.username, u.email, s.expires_at
             FROM sessions s
             JOIN users u ON u.id = s.user_id
             WHERE s.token = ?",
            [token],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;
    let Some((user_id, username, email, expires_at)) = row else {
        return Err(AuthError::InvalidSession);
    };

    let expiry = DateTime::parse_from_rfc3339(&expires_at)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| AuthError::InvalidSession)?;
    if expiry <= now {
        conn.execute("DELETE FROM sessions WHERE token = ?", [token])?;
        return Err(AuthError::Expired);
    }

    Ok(Session {
        token: token.to_string(),
        user: User {
            id: user_id,
            username,
            email,
        },
        expires_at,
    })
}
