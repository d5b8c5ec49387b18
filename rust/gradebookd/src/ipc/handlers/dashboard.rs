use crate::ipc::error::{err, ok};
use crate::ipc::handlers::courses::list_courses;
use crate::ipc::handlers::students::{
    count_students, list_students, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
use crate::ipc::helpers::{optional_i64, require_session};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

/// Students and courses in one round trip; the two reads are independent.
fn handle_dashboard_overview(state: &mut AppState, req: &Request) -> Value {
    let (conn, session) = match require_session(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let limit = match optional_i64(req, "limit") {
        Ok(v) => v.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        Err(resp) => return resp,
    };

    let students = match list_students(conn, limit, 0) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let student_total = match count_students(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let courses = match list_courses(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let course_total = courses.len();
    ok(
        &req.id,
        json!({
            "user": session.user,
            "students": students,
            "courses": courses,
            "totals": {
                "students": student_total,
                "courses": course_total
            }
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "dashboard.overview" => Some(handle_dashboard_overview(state, req)),
        _ => None,
    }
}
