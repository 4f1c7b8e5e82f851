use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn require_course(conn: &Connection, course_id: &str) -> Result<(), (String, String)> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| ("db_query_failed".to_string(), e.to_string()))?;
    if found.is_none() {
        return Err(("not_found".to_string(), "course not found".to_string()));
    }
    Ok(())
}

fn require_student(conn: &Connection, student_id: &str) -> Result<(), (String, String)> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| ("db_query_failed".to_string(), e.to_string()))?;
    if found.is_none() {
        return Err(("not_found".to_string(), "student not found".to_string()));
    }
    Ok(())
}

fn handle_enrollments_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let course_id = match req.params.get("courseId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing courseId", None),
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    if let Err((code, message)) = require_course(conn, &course_id) {
        return err(&req.id, &code, message, None);
    }
    if let Err((code, message)) = require_student(conn, &student_id) {
        return err(&req.id, &code, message, None);
    }

    // Re-enrolling is a no-op, not an error.
    if let Err(e) = conn.execute(
        "INSERT OR IGNORE INTO enrollments(course_id, student_id) VALUES(?, ?)",
        (&course_id, &student_id),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_enrollments_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let course_id = match req.params.get("courseId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing courseId", None),
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    // The student's entered marks go with the enrollment.
    for sql in [
        "DELETE FROM scores WHERE course_id = ? AND student_id = ?",
        "DELETE FROM enrollments WHERE course_id = ? AND student_id = ?",
    ] {
        if let Err(e) = conn.execute(sql, (&course_id, &student_id)) {
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_enrollments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let course_id = match req.params.get("courseId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing courseId", None),
    };

    if let Err((code, message)) = require_course(conn, &course_id) {
        return err(&req.id, &code, message, None);
    }

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.last_name, s.first_name, s.code, s.active
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         WHERE e.course_id = ?
         ORDER BY s.last_name, s.first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let students = stmt
        .query_map([&course_id], |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "lastName": r.get::<_, String>(1)?,
                "firstName": r.get::<_, String>(2)?,
                "code": r.get::<_, Option<String>>(3)?,
                "active": r.get::<_, i64>(4)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match students {
        Ok(v) => ok(&req.id, json!({ "students": v })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollments.add" => Some(handle_enrollments_add(state, req)),
        "enrollments.remove" => Some(handle_enrollments_remove(state, req)),
        "enrollments.list" => Some(handle_enrollments_list(state, req)),
        _ => None,
    }
}
