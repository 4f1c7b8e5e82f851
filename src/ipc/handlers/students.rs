use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let last_name = match req.params.get("lastName").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing lastName", None),
    };
    let first_name = match req.params.get("firstName").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing firstName", None),
    };
    if last_name.is_empty() || first_name.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "firstName/lastName must not be empty",
            None,
        );
    }

    let code = req
        .params
        .get("code")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let active = req
        .params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let student_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, last_name, first_name, code, active, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &last_name,
            &first_name,
            &code,
            active as i64,
            &now,
        ),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let query = req
        .params
        .get("query")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let mut stmt = match conn.prepare(
        "SELECT id, last_name, first_name, code, active, updated_at
         FROM students
         ORDER BY last_name, first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, i64>(4)? != 0,
                r.get::<_, Option<String>>(5)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let students: Vec<serde_json::Value> = rows
        .into_iter()
        .filter(|(_, last, first, code, _, _)| {
            let Some(q) = query.as_ref() else {
                return true;
            };
            let needle = q.to_lowercase();
            last.to_lowercase().contains(&needle)
                || first.to_lowercase().contains(&needle)
                || code
                    .as_deref()
                    .map(|c| c.to_lowercase().contains(&needle))
                    .unwrap_or(false)
        })
        .map(|(id, last, first, code, active, updated_at)| {
            json!({
                "studentId": id,
                "lastName": last,
                "firstName": first,
                "code": code,
                "active": active,
                "updatedAt": updated_at,
            })
        })
        .collect();

    ok(&req.id, json!({ "students": students }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch object", None);
    };

    let existing: Option<(String, String, Option<String>, bool)> = match conn
        .query_row(
            "SELECT last_name, first_name, code, active FROM students WHERE id = ?",
            [&student_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get::<_, i64>(3)? != 0,
                ))
            },
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((mut last_name, mut first_name, mut code, mut active)) = existing else {
        return err(&req.id, "not_found", "student not found", None);
    };

    if let Some(v) = patch.get("lastName").and_then(|v| v.as_str()) {
        let t = v.trim();
        if t.is_empty() {
            return err(&req.id, "bad_params", "lastName must not be empty", None);
        }
        last_name = t.to_string();
    }
    if let Some(v) = patch.get("firstName").and_then(|v| v.as_str()) {
        let t = v.trim();
        if t.is_empty() {
            return err(&req.id, "bad_params", "firstName must not be empty", None);
        }
        first_name = t.to_string();
    }
    if let Some(v) = patch.get("code") {
        code = v.as_str().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    }
    if let Some(v) = patch.get("active").and_then(|v| v.as_bool()) {
        active = v;
    }

    let now = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "UPDATE students SET last_name = ?, first_name = ?, code = ?, active = ?, updated_at = ?
         WHERE id = ?",
        (&last_name, &first_name, &code, active as i64, &now, &student_id),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    // Dependent rows first; foreign keys are enforced.
    for sql in [
        "DELETE FROM scores WHERE student_id = ?",
        "DELETE FROM enrollments WHERE student_id = ?",
        "DELETE FROM students WHERE id = ?",
    ] {
        if let Err(e) = conn.execute(sql, [&student_id]) {
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
