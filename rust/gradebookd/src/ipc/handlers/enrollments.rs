use crate::db::now_rfc3339;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup::load_grading;
use crate::ipc::helpers::{
    exists, is_constraint_violation, number_like, optional_date, require_session, required_str,
};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};
use uuid::Uuid;

const MIN_YEAR: i64 = 1900;
const MAX_YEAR: i64 = 2200;

fn handle_enrollments_create(state: &mut AppState, req: &Request) -> Value {
    let (conn, _) = match require_session(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let semester = match required_str(req, "semester") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let year = match req.params.get("year").and_then(|v| v.as_i64()) {
        Some(y) if (MIN_YEAR..=MAX_YEAR).contains(&y) => y,
        _ => {
            return err(
                &req.id,
                "bad_params",
                format!("year must be an integer in {}..={}", MIN_YEAR, MAX_YEAR),
                None,
            )
        }
    };

    match exists(conn, "SELECT 1 FROM students WHERE id = ?", &student_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match exists(conn, "SELECT 1 FROM courses WHERE id = ?", &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let enrollment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO enrollments(id, student_id, course_id, semester, year, enrolled_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &enrollment_id,
            &student_id,
            &course_id,
            &semester,
            year,
            now_rfc3339(),
        ),
    ) {
        if is_constraint_violation(&e) {
            return err(
                &req.id,
                "conflict",
                "student is already enrolled in this course for the term",
                None,
            );
        }
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "enrollments" })),
        );
    }

    ok(&req.id, json!({ "enrollmentId": enrollment_id }))
}

fn handle_grades_record(state: &mut AppState, req: &Request) -> Value {
    let (conn, _) = match require_session(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let enrollment_id = match required_str(req, "enrollmentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let evaluation_type = match required_str(req, "evaluationType") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(score) = req.params.get("score").and_then(number_like) else {
        return err(&req.id, "bad_params", "score must be a number", None);
    };
    let weight = match req.params.get("weight") {
        None | Some(Value::Null) => 1.0,
        Some(v) => match number_like(v) {
            Some(w) => w,
            None => return err(&req.id, "bad_params", "weight must be a number", None),
        },
    };
    let evaluated_on = match optional_date(req, "evaluatedOn") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let policy = match load_grading(conn) {
        Ok(p) => p,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !(0.0..=policy.scale).contains(&score) {
        return err(
            &req.id,
            "validation_failed",
            format!("score {} is outside the valid range 0..={}", score, policy.scale),
            None,
        );
    }
    if !(0.0..=1.0).contains(&weight) {
        return err(
            &req.id,
            "validation_failed",
            format!("weight {} must be between 0 and 1", weight),
            None,
        );
    }

    match exists(conn, "SELECT 1 FROM enrollments WHERE id = ?", &enrollment_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "enrollment not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let grade_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO grades(id, enrollment_id, evaluation_type, score, weight, evaluated_on, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &grade_id,
            &enrollment_id,
            &evaluation_type,
            score,
            weight,
            &evaluated_on,
            now_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "grades" })),
        );
    }

    ok(&req.id, json!({ "gradeId": grade_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "enrollments.create" => Some(handle_enrollments_create(state, req)),
        "grades.record" => Some(handle_grades_record(state, req)),
        _ => None,
    }
}
