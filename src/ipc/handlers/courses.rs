use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    let code = match req.params.get("code").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing code", None),
    };
    if name.is_empty() || code.is_empty() {
        return err(&req.id, "bad_params", "name/code must not be empty", None);
    }

    let cycle = req.params.get("cycle").and_then(|v| v.as_i64());
    let teacher_id = req
        .params
        .get("teacherId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    if let Some(tid) = teacher_id.as_ref() {
        let found: Result<Option<i64>, _> = conn
            .query_row("SELECT 1 FROM teachers WHERE id = ?", [tid], |r| r.get(0))
            .optional();
        match found {
            Ok(Some(_)) => {}
            Ok(None) => return err(&req.id, "not_found", "teacher not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let course_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO courses(id, name, code, cycle, teacher_id) VALUES(?, ?, ?, ?, ?)",
        (&course_id, &name, &code, cycle, &teacher_id),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "courseId": course_id }))
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let cycle = req.params.get("cycle").and_then(|v| v.as_i64());

    let mut stmt = match conn.prepare(
        "SELECT id, name, code, cycle, teacher_id FROM courses ORDER BY cycle, code",
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
                r.get::<_, Option<i64>>(3)?,
                r.get::<_, Option<String>>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let courses: Vec<serde_json::Value> = rows
        .into_iter()
        .filter(|(_, _, _, c, _)| cycle.map(|want| *c == Some(want)).unwrap_or(true))
        .map(|(id, name, code, cycle, teacher_id)| {
            json!({
                "courseId": id,
                "name": name,
                "code": code,
                "cycle": cycle,
                "teacherId": teacher_id,
            })
        })
        .collect();

    ok(&req.id, json!({ "courses": courses }))
}

fn handle_courses_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let course_id = match req.params.get("courseId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing courseId", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch object", None);
    };

    let existing: Option<(String, String, Option<i64>, Option<String>)> = match conn
        .query_row(
            "SELECT name, code, cycle, teacher_id FROM courses WHERE id = ?",
            [&course_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((mut name, mut code, mut cycle, mut teacher_id)) = existing else {
        return err(&req.id, "not_found", "course not found", None);
    };

    if let Some(v) = patch.get("name").and_then(|v| v.as_str()) {
        let t = v.trim();
        if t.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        name = t.to_string();
    }
    if let Some(v) = patch.get("code").and_then(|v| v.as_str()) {
        let t = v.trim();
        if t.is_empty() {
            return err(&req.id, "bad_params", "code must not be empty", None);
        }
        code = t.to_string();
    }
    if let Some(v) = patch.get("cycle") {
        cycle = v.as_i64();
    }
    if let Some(v) = patch.get("teacherId") {
        teacher_id = v.as_str().map(|s| s.to_string());
    }

    if let Err(e) = conn.execute(
        "UPDATE courses SET name = ?, code = ?, cycle = ?, teacher_id = ? WHERE id = ?",
        (&name, &code, cycle, &teacher_id, &course_id),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_courses_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let course_id = match req.params.get("courseId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing courseId", None),
    };

    for sql in [
        "DELETE FROM scores WHERE course_id = ?",
        "DELETE FROM course_weights WHERE course_id = ?",
        "DELETE FROM enrollments WHERE course_id = ?",
        "DELETE FROM courses WHERE id = ?",
    ] {
        if let Err(e) = conn.execute(sql, [&course_id]) {
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.update" => Some(handle_courses_update(state, req)),
        "courses.delete" => Some(handle_courses_delete(state, req)),
        _ => None,
    }
}
