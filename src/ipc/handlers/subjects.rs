use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use serde_json::json;

fn parse_form_level(req: &Request) -> Result<Option<i64>, serde_json::Value> {
    match req.params.get("formLevel") {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(f) = v.as_i64() else {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "formLevel must be an integer",
                    None,
                ));
            };
            if !grading::is_valid_form(f) {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "formLevel must be 1-4",
                    Some(json!({ "formLevel": f })),
                ));
            }
            Ok(Some(f))
        }
    }
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let form_level = match parse_form_level(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Subjects applicable to a form come from the teacher-assignment table;
    // with no form filter, the standard report-card list is the answer.
    let subjects: Vec<String> = match (state.db.as_ref(), form_level) {
        (Some(conn), Some(f)) => {
            let mut stmt = match conn
                .prepare("SELECT DISTINCT subject FROM subject_teachers WHERE form_level = ?")
            {
                Ok(s) => s,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            let found = stmt
                .query_map([f], |r| r.get::<_, String>(0))
                .and_then(|it| it.collect::<Result<Vec<_>, _>>());
            match found {
                Ok(list) => {
                    // Keep report-card order rather than SQL order.
                    grading::STANDARD_SUBJECTS
                        .iter()
                        .filter(|s| list.iter().any(|x| x == *s))
                        .map(|s| s.to_string())
                        .collect()
                }
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            }
        }
        _ => grading::STANDARD_SUBJECTS
            .iter()
            .map(|s| s.to_string())
            .collect(),
    };

    ok(&req.id, json!({ "subjects": subjects }))
}

fn teacher_row(r: &rusqlite::Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "subject": r.get::<_, String>(0)?,
        "formLevel": r.get::<_, i64>(1)?,
        "teacherName": r.get::<_, String>(2)?
    }))
}

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let form_level = match parse_form_level(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let sql = format!(
        "SELECT subject, form_level, teacher_name FROM subject_teachers{}
         ORDER BY form_level, subject",
        if form_level.is_some() {
            " WHERE form_level = ?"
        } else {
            ""
        }
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match form_level {
        Some(f) => stmt
            .query_map([f], teacher_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([], teacher_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    };

    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teachers_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject = match req.params.get("subject").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subject", None),
    };
    if !grading::is_standard_subject(&subject) {
        return err(
            &req.id,
            "bad_params",
            "unknown subject",
            Some(json!({ "subject": subject })),
        );
    }
    let form_level = match req.params.get("formLevel").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing formLevel", None),
    };
    if !grading::is_valid_form(form_level) {
        return err(
            &req.id,
            "bad_params",
            "formLevel must be 1-4",
            Some(json!({ "formLevel": form_level })),
        );
    }
    let teacher_name = match req.params.get("teacherName").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing teacherName", None),
    };
    if teacher_name.is_empty() {
        return err(&req.id, "bad_params", "teacherName must not be empty", None);
    }

    let result = conn.execute(
        "INSERT INTO subject_teachers(id, subject, form_level, teacher_name, updated_at)
         VALUES(lower(hex(randomblob(16))), ?, ?, ?, ?)
         ON CONFLICT(subject, form_level) DO UPDATE SET
           teacher_name = excluded.teacher_name,
           updated_at = excluded.updated_at",
        (&subject, form_level, &teacher_name, Utc::now().to_rfc3339()),
    );

    match result {
        Ok(_) => {
            log::info!(
                "teacher updated: {} Form {} -> {}",
                subject,
                form_level,
                teacher_name
            );
            ok(&req.id, json!({ "subject": subject, "formLevel": form_level }))
        }
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subject_teachers" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "teachers.update" => Some(handle_teachers_update(state, req)),
        _ => None,
    }
}
