#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const ADMIN_PASSWORD: &str = "admin123";

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}-{}",
        prefix,
        std::process::id(),
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn db_path(workspace: &Path) -> PathBuf {
    workspace.join("gradebook.sqlite3")
}

pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
    pub token: Option<String>,
}

impl Sidecar {
    /// Spawns the binary with the bootstrap admin enabled.
    pub fn spawn() -> Self {
        Self::spawn_with_env(&[("GRADEBOOKD_ADMIN_PASSWORD", ADMIN_PASSWORD)])
    }

    pub fn spawn_with_env(env: &[(&str, &str)]) -> Self {
        let exe = env!("CARGO_BIN_EXE_gradebookd");
        let mut cmd = Command::new(exe);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .env_remove("GRADEBOOKD_WORKSPACE")
            .env_remove("GRADEBOOKD_ADMIN_PASSWORD")
            .env_remove("GRADEBOOKD_SESSION_TTL_HOURS");
        for (k, v) in env {
            cmd.env(k, v);
        }
        let mut child = cmd.spawn().expect("spawn gradebookd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
            token: None,
        }
    }

    pub fn send_raw(&mut self, line: &str) -> Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response for {}", line);
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    /// Sends a request carrying the current session token, if any.
    pub fn request(&mut self, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let mut payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(token) = &self.token {
            payload["session"] = json!({ "token": token });
        }
        let value = self.send_raw(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn request_ok(&mut self, method: &str, params: Value) -> Value {
        let value = self.request(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    /// Returns the error code of a failed response.
    pub fn request_err(&mut self, method: &str, params: Value) -> (String, Value) {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        let error = value.get("error").cloned().unwrap_or_else(|| json!({}));
        let code = error
            .get("code")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        (code, error)
    }

    pub fn open_workspace(&mut self, workspace: &Path) {
        self.request_ok(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
    }

    pub fn login_admin(&mut self) -> String {
        let result = self.request_ok(
            "auth.login",
            json!({ "username": "admin", "password": ADMIN_PASSWORD }),
        );
        let token = result
            .get("token")
            .and_then(|v| v.as_str())
            .expect("token")
            .to_string();
        self.token = Some(token.clone());
        token
    }

    /// Fresh workspace with an authenticated admin session.
    pub fn ready(prefix: &str) -> (Self, PathBuf) {
        let workspace = temp_dir(prefix);
        let mut sc = Self::spawn();
        sc.open_workspace(&workspace);
        sc.login_admin();
        (sc, workspace)
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn register_student(sc: &mut Sidecar, code: &str, national_id: &str, first: &str, last: &str) -> String {
    let result = sc.request_ok(
        "students.register",
        json!({
            "code": code,
            "nationalId": national_id,
            "firstName": first,
            "lastName": last
        }),
    );
    result
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string()
}

pub fn course_id_by_code(sc: &mut Sidecar, code: &str) -> String {
    let result = sc.request_ok("courses.available", json!({}));
    result
        .get("courses")
        .and_then(|v| v.as_array())
        .expect("courses")
        .iter()
        .find(|c| c.get("code").and_then(|v| v.as_str()) == Some(code))
        .and_then(|c| c.get("id").and_then(|v| v.as_str()))
        .expect("course by code")
        .to_string()
}
