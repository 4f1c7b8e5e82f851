use crate::grades::{self, CalcContext, CategoryWeights};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn course_exists(conn: &Connection, course_id: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
}

fn handle_weights_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let course_id = match req.params.get("courseId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing courseId", None),
    };
    match course_exists(conn, &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let (weights, default_weights) = match grades::load_course_weights(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    };

    ok(
        &req.id,
        json!({
            "weights": weights,
            "default": default_weights,
        }),
    )
}

fn handle_weights_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let course_id = match req.params.get("courseId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing courseId", None),
    };

    let mut parsed = [0.0_f64; 3];
    for (i, key) in ["evaluations", "practices", "partials"].iter().enumerate() {
        let Some(v) = req.params.get(*key).and_then(|v| v.as_f64()) else {
            return err(
                &req.id,
                "bad_params",
                format!("missing numeric {}", key),
                None,
            );
        };
        if !v.is_finite() || v < 0.0 {
            return err(
                &req.id,
                "bad_params",
                format!("{} weight must be >= 0", key),
                Some(json!({ "value": v })),
            );
        }
        parsed[i] = v;
    }
    // Weights are not required to sum to 1; the engine renormalizes over
    // populated categories anyway.
    let weights = CategoryWeights {
        evaluations: parsed[0],
        practices: parsed[1],
        partials: parsed[2],
    };

    match course_exists(conn, &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(e) = conn.execute(
        "INSERT INTO course_weights(course_id, evaluations_weight, practices_weight, partials_weight)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(course_id) DO UPDATE SET
           evaluations_weight = excluded.evaluations_weight,
           practices_weight = excluded.practices_weight,
           partials_weight = excluded.partials_weight",
        (&course_id, weights.evaluations, weights.practices, weights.partials),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_grades_student_final(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let enrolled: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM enrollments WHERE course_id = ? AND student_id = ?",
            (&course_id, &student_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if enrolled.is_none() {
        return err(
            &req.id,
            "not_found",
            "student is not enrolled in this course",
            None,
        );
    }

    let set = match grades::load_score_set(conn, &course_id, &student_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    };
    let (weights, default_weights) = match grades::load_course_weights(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    };

    let result = grades::compute_final(&set, &weights);

    ok(
        &req.id,
        json!({
            "result": result,
            "defaultWeights": default_weights,
        }),
    )
}

fn handle_grades_course_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let course_id = match req.params.get("courseId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing courseId", None),
    };

    let ctx = CalcContext {
        conn,
        course_id: &course_id,
    };
    match grades::compute_course_summary(&ctx) {
        Ok(model) => ok(&req.id, json!(model)),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "weights.get" => Some(handle_weights_get(state, req)),
        "weights.set" => Some(handle_weights_set(state, req)),
        "grades.studentFinal" => Some(handle_grades_student_final(state, req)),
        "grades.courseSummary" => Some(handle_grades_course_summary(state, req)),
        _ => None,
    }
}
