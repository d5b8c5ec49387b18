use crate::calc::{round_2, simulate, GradeEntry};
use crate::db::now_rfc3339;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup::load_grading;
use crate::ipc::helpers::{
    exists, is_constraint_violation, optional_date, optional_i64, optional_str, require_session,
    required_str,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{json, Value};
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: i64 = 100;
pub const MAX_PAGE_SIZE: i64 = 1000;

const STUDENT_COLUMNS: &str =
    "id, code, national_id, first_name, last_name, email, phone, enrolled_on, created_at";

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Value> {
    let id: String = r.get(0)?;
    let code: String = r.get(1)?;
    let national_id: String = r.get(2)?;
    let first_name: String = r.get(3)?;
    let last_name: String = r.get(4)?;
    let email: Option<String> = r.get(5)?;
    let phone: Option<String> = r.get(6)?;
    let enrolled_on: Option<String> = r.get(7)?;
    let created_at: String = r.get(8)?;
    Ok(json!({
        "id": id,
        "code": code,
        "nationalId": national_id,
        "firstName": first_name,
        "lastName": last_name,
        "email": email,
        "phone": phone,
        "enrolledOn": enrolled_on,
        "createdAt": created_at
    }))
}

pub fn list_students(conn: &Connection, limit: i64, offset: i64) -> rusqlite::Result<Vec<Value>> {
    let sql = format!(
        "SELECT {STUDENT_COLUMNS} FROM students
         ORDER BY last_name, first_name, code
         LIMIT ? OFFSET ?"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((limit, offset), student_from_row)?
        .collect::<Result<Vec<_>, _>>();
    rows
}

pub fn count_students(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))
}

fn get_student(conn: &Connection, student_id: &str) -> rusqlite::Result<Option<Value>> {
    let sql = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?");
    conn.query_row(&sql, [student_id], student_from_row)
        .optional()
}

fn is_valid_national_id(s: &str) -> bool {
    s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit())
}

fn handle_students_register(state: &mut AppState, req: &Request) -> Value {
    let (conn, session) = match require_session(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let code = match required_str(req, "code") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let national_id = match required_str(req, "nationalId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let first_name = match required_str(req, "firstName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let last_name = match required_str(req, "lastName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let email = match optional_str(req, "email") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let phone = match optional_str(req, "phone") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let enrolled_on = match optional_date(req, "enrolledOn") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    if !is_valid_national_id(&national_id) {
        return err(
            &req.id,
            "bad_params",
            "nationalId must be exactly 8 digits",
            None,
        );
    }

    match exists(conn, "SELECT 1 FROM students WHERE code = ?", &code) {
        Ok(true) => {
            return err(
                &req.id,
                "conflict",
                "student code already exists",
                Some(json!({ "field": "code" })),
            )
        }
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match exists(
        conn,
        "SELECT 1 FROM students WHERE national_id = ?",
        &national_id,
    ) {
        Ok(true) => {
            return err(
                &req.id,
                "conflict",
                "nationalId already registered",
                Some(json!({ "field": "nationalId" })),
            )
        }
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, code, national_id, first_name, last_name, email, phone, enrolled_on, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &code,
            &national_id,
            &first_name,
            &last_name,
            &email,
            &phone,
            &enrolled_on,
            now_rfc3339(),
        ),
    ) {
        let code = if is_constraint_violation(&e) {
            "conflict"
        } else {
            "db_insert_failed"
        };
        return err(
            &req.id,
            code,
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    tracing::info!(student = %student_id, by = %session.user.username, "student registered");
    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_get(state: &mut AppState, req: &Request) -> Value {
    let (conn, _) = match require_session(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match get_student(conn, &student_id) {
        Ok(Some(student)) => ok(&req.id, json!({ "student": student })),
        Ok(None) => err(&req.id, "not_found", "student not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> Value {
    let (conn, _) = match require_session(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let limit = match optional_i64(req, "limit") {
        Ok(v) => v.unwrap_or(DEFAULT_PAGE_SIZE),
        Err(resp) => return resp,
    };
    let offset = match optional_i64(req, "offset") {
        Ok(v) => v.unwrap_or(0),
        Err(resp) => return resp,
    };
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return err(
            &req.id,
            "bad_params",
            format!("limit must be in 1..={}", MAX_PAGE_SIZE),
            None,
        );
    }
    if offset < 0 {
        return err(&req.id, "bad_params", "offset must be >= 0", None);
    }

    match list_students(conn, limit, offset) {
        Ok(students) => {
            let count = students.len();
            ok(&req.id, json!({ "students": students, "count": count }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

struct HistoryCourse {
    enrollment_id: String,
    course_id: String,
    course_code: String,
    name: String,
    credits: i64,
    semester: String,
    year: i64,
    enrolled_at: String,
    grades: Vec<Value>,
    entries: Vec<GradeEntry>,
}

fn handle_students_history(state: &mut AppState, req: &Request) -> Value {
    let (conn, _) = match require_session(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let student = match get_student(conn, &student_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let policy = match load_grading(conn) {
        Ok(p) => p,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare(
        "SELECT e.id, c.id, c.code, c.name, c.credits, e.semester, e.year, e.enrolled_at,
                g.evaluation_type, g.score, g.weight, g.evaluated_on
         FROM enrollments e
         JOIN courses c ON c.id = e.course_id
         LEFT JOIN grades g ON g.enrollment_id = e.id
         WHERE e.student_id = ?
         ORDER BY e.year DESC, e.semester DESC, c.name, e.id, g.evaluated_on, g.created_at",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    type HistoryRow = (
        String,
        String,
        String,
        String,
        i64,
        String,
        i64,
        String,
        Option<String>,
        Option<f64>,
        Option<f64>,
        Option<String>,
    );
    let rows: Result<Vec<HistoryRow>, _> = stmt
        .query_map([&student_id], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
                r.get(6)?,
                r.get(7)?,
                r.get(8)?,
                r.get(9)?,
                r.get(10)?,
                r.get(11)?,
            ))
        })
        .and_then(|it| it.collect());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Rows arrive ordered, one group per enrollment.
    let mut courses: Vec<HistoryCourse> = Vec::new();
    for row in rows {
        let (enrollment_id, course_id, code, name, credits, semester, year, enrolled_at) =
            (row.0, row.1, row.2, row.3, row.4, row.5, row.6, row.7);
        let (evaluation_type, score, weight, evaluated_on) = (row.8, row.9, row.10, row.11);
        if courses.last().map(|c| c.enrollment_id != enrollment_id).unwrap_or(true) {
            courses.push(HistoryCourse {
                enrollment_id,
                course_id,
                course_code: code,
                name,
                credits,
                semester,
                year,
                enrolled_at,
                grades: Vec::new(),
                entries: Vec::new(),
            });
        }
        let Some(course) = courses.last_mut() else {
            continue;
        };
        if let (Some(ty), Some(score), Some(weight)) = (evaluation_type, score, weight) {
            course.grades.push(json!({
                "evaluationType": ty,
                "score": score,
                "weight": weight,
                "evaluatedOn": evaluated_on
            }));
            course.entries.push(GradeEntry::new(ty, score, weight));
        }
    }

    let history: Vec<Value> = courses
        .into_iter()
        .map(|c| {
            // Only a complete weighted set gets a computed standing.
            let simulation = if c.entries.is_empty() {
                Value::Null
            } else {
                match simulate(&c.entries, policy.scale, policy.passing_threshold, &policy.bands) {
                    Ok(r) => json!({
                        "simpleAverage": round_2(r.simple_average),
                        "weightedAverage": round_2(r.weighted_average),
                        "finalScore": round_2(r.final_score),
                        "passed": r.passed,
                        "category": r.category
                    }),
                    Err(_) => Value::Null,
                }
            };
            json!({
                "enrollmentId": c.enrollment_id,
                "courseId": c.course_id,
                "courseCode": c.course_code,
                "name": c.name,
                "credits": c.credits,
                "semester": c.semester,
                "year": c.year,
                "enrolledAt": c.enrolled_at,
                "grades": c.grades,
                "simulation": simulation
            })
        })
        .collect();

    let total = history.len();
    ok(
        &req.id,
        json!({
            "student": student,
            "history": history,
            "totalCourses": total
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "students.register" => Some(handle_students_register(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.history" => Some(handle_students_history(state, req)),
        _ => None,
    }
}
