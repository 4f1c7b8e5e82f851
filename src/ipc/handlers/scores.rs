use crate::grades::{self, Category};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const SCORE_MAX: f64 = 20.0;
const BULK_SET_MAX_EDITS: usize = 1000;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

/// Boundary validation for one slot edit. The stored source accepted any
/// number here; rejecting out-of-range values is deliberate new behavior,
/// the pure engine stays permissive.
fn resolve_slot_edit(
    category: Option<&str>,
    slot: Option<i64>,
    value: Option<f64>,
) -> Result<(Category, i64, Option<f64>), HandlerErr> {
    let Some(cat_raw) = category else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing category".to_string(),
            details: None,
        });
    };
    let Some(cat) = Category::parse(cat_raw) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "category must be one of: evaluations, practices, partials".to_string(),
            details: Some(json!({ "category": cat_raw })),
        });
    };

    let Some(slot) = slot else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing/invalid slot".to_string(),
            details: None,
        });
    };
    if slot < 0 || slot as usize >= cat.slot_capacity() {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!(
                "slot out of range for {}: 0..{}",
                cat.as_str(),
                cat.slot_capacity()
            ),
            details: Some(json!({ "slot": slot })),
        });
    }

    if let Some(v) = value {
        if !v.is_finite() || v < 0.0 || v > SCORE_MAX {
            return Err(HandlerErr {
                code: "bad_params",
                message: format!("value must be within 0..={}", SCORE_MAX),
                details: Some(json!({ "value": v })),
            });
        }
    }

    Ok((cat, slot, value))
}

fn require_enrollment(
    conn: &Connection,
    course_id: &str,
    student_id: &str,
) -> Result<(), HandlerErr> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM enrollments WHERE course_id = ? AND student_id = ?",
            (course_id, student_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;

    found.map(|_| ()).ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "student is not enrolled in this course".to_string(),
        details: None,
    })
}

fn upsert_slot(
    conn: &Connection,
    course_id: &str,
    student_id: &str,
    category: Category,
    slot: i64,
    value: Option<f64>,
) -> Result<(), HandlerErr> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO scores(course_id, student_id, category, slot, value, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(course_id, student_id, category, slot) DO UPDATE SET
           value = excluded.value,
           updated_at = excluded.updated_at",
        (course_id, student_id, category.as_str(), slot, value, &now),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "scores" })),
    })?;
    Ok(())
}

fn handle_scores_get(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    if let Err(e) = require_enrollment(conn, &course_id, &student_id) {
        return e.response(&req.id);
    }

    let set = match grades::load_score_set(conn, &course_id, &student_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    };

    ok(
        &req.id,
        json!({
            "evaluations": set.evaluations,
            "practices": set.practices,
            "partials": set.partials,
        }),
    )
}

fn handle_scores_set(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let category = req.params.get("category").and_then(|v| v.as_str());
    let slot = req.params.get("slot").and_then(|v| v.as_i64());
    let value = req.params.get("value").and_then(|v| v.as_f64());

    let (cat, slot, value) = match resolve_slot_edit(category, slot, value) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    if let Err(e) = require_enrollment(conn, &course_id, &student_id) {
        return e.response(&req.id);
    }
    if let Err(e) = upsert_slot(conn, &course_id, &student_id, cat, slot, value) {
        return e.response(&req.id);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_scores_bulk_set(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let Some(edits_arr) = req.params.get("edits").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing edits[]", None);
    };

    if edits_arr.len() > BULK_SET_MAX_EDITS {
        let rejected = edits_arr.len();
        return ok(
            &req.id,
            json!({
                "ok": true,
                "updated": 0,
                "rejected": rejected,
                "limitExceeded": true,
                "errors": [{
                    "index": -1,
                    "code": "too_many_edits",
                    "message": format!(
                        "bulk payload exceeds max edits: {} > {}",
                        rejected, BULK_SET_MAX_EDITS
                    )
                }]
            }),
        );
    }

    if let Err(e) = require_enrollment(conn, &course_id, &student_id) {
        return e.response(&req.id);
    }

    let mut updated: usize = 0;
    let mut errors: Vec<serde_json::Value> = Vec::new();

    for (i, edit) in edits_arr.iter().enumerate() {
        let Some(obj) = edit.as_object() else {
            errors.push(json!({
                "index": i,
                "code": "bad_params",
                "message": format!("edit at index {} must be an object", i),
            }));
            continue;
        };

        let category = obj.get("category").and_then(|v| v.as_str());
        let slot = obj.get("slot").and_then(|v| v.as_i64());
        let value = obj.get("value").and_then(|v| v.as_f64());

        let (cat, slot, value) = match resolve_slot_edit(category, slot, value) {
            Ok(v) => v,
            Err(e) => {
                errors.push(json!({
                    "index": i,
                    "code": e.code,
                    "message": e.message,
                }));
                continue;
            }
        };

        match upsert_slot(conn, &course_id, &student_id, cat, slot, value) {
            Ok(()) => updated += 1,
            Err(e) => errors.push(json!({
                "index": i,
                "code": e.code,
                "message": e.message,
            })),
        }
    }

    let rejected = errors.len();
    let mut result = json!({ "ok": true, "updated": updated });
    if rejected > 0 {
        let obj = result.as_object_mut().expect("result should be object");
        obj.insert("rejected".into(), json!(rejected));
        obj.insert("errors".into(), json!(errors));
    }

    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scores.get" => Some(handle_scores_get(state, req)),
        "scores.set" => Some(handle_scores_set(state, req)),
        "scores.bulkSet" => Some(handle_scores_bulk_set(state, req)),
        _ => None,
    }
}
