use crate::calc::round_2;
use crate::db::now_rfc3339;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{exists, optional_str, require_session, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{json, Value};
use uuid::Uuid;

fn course_from_row(r: &Row<'_>) -> rusqlite::Result<Value> {
    let id: String = r.get(0)?;
    let code: String = r.get(1)?;
    let name: String = r.get(2)?;
    let credits: i64 = r.get(3)?;
    let description: Option<String> = r.get(4)?;
    Ok(json!({
        "id": id,
        "code": code,
        "name": name,
        "credits": credits,
        "description": description
    }))
}

pub fn list_courses(conn: &Connection) -> rusqlite::Result<Vec<Value>> {
    let mut stmt = conn.prepare(
        "SELECT id, code, name, credits, description
         FROM courses
         ORDER BY name, code",
    )?;
    let rows = stmt
        .query_map([], course_from_row)?
        .collect::<Result<Vec<_>, _>>();
    rows
}

fn handle_courses_available(state: &mut AppState, req: &Request) -> Value {
    let (conn, _) = match require_session(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match list_courses(conn) {
        Ok(courses) => {
            let total = courses.len();
            ok(&req.id, json!({ "courses": courses, "total": total }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_stats(state: &mut AppState, req: &Request) -> Value {
    let (conn, _) = match require_session(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // DISTINCT counts keep the grade join from inflating enrollment numbers.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.code,
           c.name,
           c.credits,
           c.description,
           COUNT(DISTINCT e.student_id) AS student_count,
           COUNT(DISTINCT g.id) AS evaluation_count,
           AVG(g.score) AS average_score
         FROM courses c
         LEFT JOIN enrollments e ON e.course_id = c.id
         LEFT JOIN grades g ON g.enrollment_id = e.id
         GROUP BY c.id, c.code, c.name, c.credits, c.description
         ORDER BY c.name, c.code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let mut course = course_from_row(row)?;
            let student_count: i64 = row.get(5)?;
            let evaluation_count: i64 = row.get(6)?;
            let average: Option<f64> = row.get(7)?;
            course["stats"] = json!({
                "enrolledStudents": student_count,
                "evaluations": evaluation_count,
                "averageScore": round_2(average.unwrap_or(0.0))
            });
            Ok(course)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(courses) => {
            let total = courses.len();
            ok(&req.id, json!({ "courses": courses, "total": total }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_get(state: &mut AppState, req: &Request) -> Value {
    let (conn, _) = match require_session(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let course = conn
        .query_row(
            "SELECT id, code, name, credits, description FROM courses WHERE id = ?",
            [&course_id],
            course_from_row,
        )
        .optional();
    match course {
        Ok(Some(c)) => ok(&req.id, json!({ "course": c })),
        Ok(None) => err(&req.id, "not_found", "course not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> Value {
    let (conn, _) = match require_session(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let code = match required_str(req, "code") {
        Ok(v) => v.to_ascii_uppercase(),
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let credits = match req.params.get("credits").and_then(|v| v.as_i64()) {
        Some(n) if n > 0 => n,
        _ => {
            return err(
                &req.id,
                "bad_params",
                "credits must be a positive integer",
                None,
            )
        }
    };
    let description = match optional_str(req, "description") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match exists(conn, "SELECT 1 FROM courses WHERE code = ?", &code) {
        Ok(true) => return err(&req.id, "conflict", "course code already exists", None),
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let course_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO courses(id, code, name, credits, description, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&course_id, &code, &name, credits, &description, now_rfc3339()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    ok(&req.id, json!({ "courseId": course_id, "code": code }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "courses.available" => Some(handle_courses_available(state, req)),
        "courses.stats" => Some(handle_courses_stats(state, req)),
        "courses.get" => Some(handle_courses_get(state, req)),
        "courses.create" => Some(handle_courses_create(state, req)),
        _ => None,
    }
}
