use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const MARKS_SAVE_MAX_ENTRIES: usize = 100;

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

/// A mark submission must be an integer (or integer string) within the
/// valid range. Nothing is written when any entry fails.
fn resolve_mark_value(subject: &str, raw: &serde_json::Value) -> Result<i64, HandlerErr> {
    let value = if let Some(n) = raw.as_i64() {
        n
    } else if let Some(s) = raw.as_str() {
        match s.trim().parse::<i64>() {
            Ok(n) => n,
            Err(_) => {
                return Err(HandlerErr {
                    code: "bad_params",
                    message: format!("mark for {} is not an integer", subject),
                    details: Some(json!({ "subject": subject, "value": s })),
                })
            }
        }
    } else {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!("mark for {} is not numeric", subject),
            details: Some(json!({ "subject": subject, "value": raw })),
        });
    };

    if !(grading::MARK_MIN..=grading::MARK_MAX).contains(&value) {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!(
                "mark for {} out of range {}-{}",
                subject,
                grading::MARK_MIN,
                grading::MARK_MAX
            ),
            details: Some(json!({ "subject": subject, "value": value })),
        });
    }
    Ok(value)
}

fn resolve_active_student(
    conn: &Connection,
    student_id: &str,
) -> Result<i64, HandlerErr> {
    let row: Option<(i64, String)> = conn
        .query_row(
            "SELECT form_level, status FROM students WHERE id = ?",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;

    let Some((form_level, status)) = row else {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: Some(json!({ "studentId": student_id })),
        });
    };
    if status != "active" {
        return Err(HandlerErr {
            code: "bad_params",
            message: "cannot enter marks for a withdrawn student".to_string(),
            details: Some(json!({ "studentId": student_id, "status": status })),
        });
    }
    Ok(form_level)
}

fn subject_applicable(
    conn: &Connection,
    subject: &str,
    form_level: i64,
) -> Result<bool, HandlerErr> {
    let found: Option<String> = conn
        .query_row(
            "SELECT id FROM subject_teachers WHERE subject = ? AND form_level = ?",
            (subject, form_level),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    Ok(found.is_some())
}

fn upsert_mark(
    conn: &Connection,
    student_id: &str,
    subject: &str,
    term: &str,
    academic_year: &str,
    form_level: i64,
    mark: i64,
    grade: &str,
) -> Result<(), HandlerErr> {
    let mark_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO marks(id, student_id, subject, term, academic_year, form_level, mark, grade, entered_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject, term, academic_year) DO UPDATE SET
           mark = excluded.mark,
           grade = excluded.grade,
           form_level = excluded.form_level,
           entered_at = excluded.entered_at",
        (
            &mark_id,
            student_id,
            subject,
            term,
            academic_year,
            form_level,
            mark,
            grade,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "marks" })),
    })?;
    Ok(())
}

fn handle_marks_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let term = match req.params.get("term").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => return err(&req.id, "bad_params", "missing term", None),
    };
    let academic_year = match req.params.get("academicYear").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => return err(&req.id, "bad_params", "missing academicYear", None),
    };
    let Some(entries) = req.params.get("marks").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing marks object", None);
    };
    if entries.is_empty() {
        return err(&req.id, "bad_params", "marks object is empty", None);
    }
    if entries.len() > MARKS_SAVE_MAX_ENTRIES {
        return err(
            &req.id,
            "bad_params",
            "too many mark entries",
            Some(json!({ "entries": entries.len(), "max": MARKS_SAVE_MAX_ENTRIES })),
        );
    }

    let form_level = match resolve_active_student(conn, &student_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // Validate every entry before any row is touched; a mixed batch must
    // write nothing.
    let mut resolved: Vec<(String, i64, &'static str)> = Vec::with_capacity(entries.len());
    for (subject, raw) in entries {
        // Blank cells in the entry grid arrive as null; skip them.
        if raw.is_null() {
            continue;
        }
        match subject_applicable(conn, subject, form_level) {
            Ok(true) => {}
            Ok(false) => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("subject {} not offered in form {}", subject, form_level),
                    Some(json!({ "subject": subject, "formLevel": form_level })),
                )
            }
            Err(e) => return e.response(&req.id),
        }
        let mark = match resolve_mark_value(subject, raw) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };
        resolved.push((
            subject.clone(),
            mark,
            grading::grade_for_mark(mark, form_level),
        ));
    }
    if resolved.is_empty() {
        return err(&req.id, "bad_params", "marks object is empty", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(tx) => tx,
        Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
    };
    for (subject, mark, grade) in &resolved {
        if let Err(e) = upsert_mark(
            &tx,
            &student_id,
            subject,
            &term,
            &academic_year,
            form_level,
            *mark,
            grade,
        ) {
            return e.response(&req.id);
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    log::info!(
        "saved {} marks for student {} ({} {})",
        resolved.len(),
        student_id,
        term,
        academic_year
    );
    ok(&req.id, json!({ "saved": resolved.len() }))
}

fn handle_marks_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let term = match req.params.get("term").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing term", None),
    };
    let academic_year = match req.params.get("academicYear").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing academicYear", None),
    };

    let exists: Option<String> = match conn
        .query_row("SELECT id FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let mut stmt = match conn.prepare(
        "SELECT subject, mark, grade FROM marks
         WHERE student_id = ? AND term = ? AND academic_year = ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&student_id, &term, &academic_year), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(list) => {
            let mut marks = serde_json::Map::new();
            for (subject, mark, grade) in list {
                marks.insert(subject, json!({ "mark": mark, "grade": grade }));
            }
            ok(&req.id, json!({ "marks": marks }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.save" => Some(handle_marks_save(state, req)),
        "marks.get" => Some(handle_marks_get(state, req)),
        _ => None,
    }
}
