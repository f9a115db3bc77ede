use crate::db;
use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{NaiveDate, Utc};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn parse_birth_date(raw: &str) -> Result<String, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|d| d.to_string())
        .map_err(|_| format!("birthDate must be YYYY-MM-DD, got {}", raw))
}

fn student_list_row(row: &rusqlite::Row) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let student_no: Option<String> = row.get(1)?;
    let last: String = row.get(2)?;
    let first: String = row.get(3)?;
    let form: i64 = row.get(4)?;
    let status: String = row.get(5)?;
    let mark_count: i64 = row.get(6)?;
    Ok(json!({
        "id": id,
        "studentNo": student_no,
        "displayName": format!("{} {}", first, last),
        "firstName": first,
        "lastName": last,
        "formLevel": form,
        "status": status,
        "markCount": mark_count
    }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let form_level = req.params.get("formLevel").and_then(|v| v.as_i64());
    if let Some(f) = form_level {
        if !grading::is_valid_form(f) {
            return err(
                &req.id,
                "bad_params",
                "formLevel must be 1-4",
                Some(json!({ "formLevel": f })),
            );
        }
    }

    // Marks count via correlated subquery so the UI can flag empty records.
    let sql = format!(
        "SELECT s.id, s.student_no, s.last_name, s.first_name, s.form_level, s.status,
                (SELECT COUNT(*) FROM marks m WHERE m.student_id = s.id) AS mark_count
         FROM students s
         WHERE s.status = 'active'{}
         ORDER BY s.last_name, s.first_name",
        if form_level.is_some() {
            " AND s.form_level = ?"
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
            .query_map([f], student_list_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([], student_list_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    };

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let row = conn
        .query_row(
            "SELECT id, student_no, first_name, last_name, birth_date, form_level,
                    guardian_name, guardian_phone, status, enrolled_at
             FROM students WHERE id = ?",
            [&student_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "studentNo": r.get::<_, Option<String>>(1)?,
                    "firstName": r.get::<_, String>(2)?,
                    "lastName": r.get::<_, String>(3)?,
                    "birthDate": r.get::<_, Option<String>>(4)?,
                    "formLevel": r.get::<_, i64>(5)?,
                    "guardianName": r.get::<_, Option<String>>(6)?,
                    "guardianPhone": r.get::<_, Option<String>>(7)?,
                    "status": r.get::<_, String>(8)?,
                    "enrolledAt": r.get::<_, Option<String>>(9)?
                }))
            },
        )
        .optional();

    match row {
        Ok(Some(student)) => ok(&req.id, json!({ "student": student })),
        Ok(None) => err(&req.id, "not_found", "student not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let first_name = match req.params.get("firstName").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing firstName", None),
    };
    let last_name = match req.params.get("lastName").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing lastName", None),
    };
    if first_name.is_empty() || last_name.is_empty() {
        return err(&req.id, "bad_params", "names must not be empty", None);
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

    let birth_date = match req.params.get("birthDate").and_then(|v| v.as_str()) {
        Some(raw) if !raw.trim().is_empty() => match parse_birth_date(raw.trim()) {
            Ok(d) => Some(d),
            Err(msg) => return err(&req.id, "bad_params", msg, None),
        },
        _ => None,
    };
    let guardian_name = req
        .params
        .get("guardianName")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let guardian_phone = req
        .params
        .get("guardianPhone")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let student_no = match db::next_student_serial(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(
            id, student_no, last_name, first_name, birth_date, form_level,
            guardian_name, guardian_phone, status, enrolled_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, 'active', ?)",
        (
            &student_id,
            &student_no,
            &last_name,
            &first_name,
            &birth_date,
            form_level,
            &guardian_name,
            &guardian_phone,
            Utc::now().to_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    log::info!(
        "student enrolled: {} {} (no {}, form {})",
        first_name,
        last_name,
        student_no,
        form_level
    );
    ok(
        &req.id,
        json!({ "studentId": student_id, "studentNo": student_no }),
    )
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

    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();

    if let Some(v) = patch.get("firstName").and_then(|v| v.as_str()) {
        let v = v.trim();
        if v.is_empty() {
            return err(&req.id, "bad_params", "firstName must not be empty", None);
        }
        sets.push("first_name = ?");
        values.push(v.to_string().into());
    }
    if let Some(v) = patch.get("lastName").and_then(|v| v.as_str()) {
        let v = v.trim();
        if v.is_empty() {
            return err(&req.id, "bad_params", "lastName must not be empty", None);
        }
        sets.push("last_name = ?");
        values.push(v.to_string().into());
    }
    if let Some(v) = patch.get("formLevel") {
        let Some(f) = v.as_i64() else {
            return err(&req.id, "bad_params", "formLevel must be an integer", None);
        };
        if !grading::is_valid_form(f) {
            return err(
                &req.id,
                "bad_params",
                "formLevel must be 1-4",
                Some(json!({ "formLevel": f })),
            );
        }
        sets.push("form_level = ?");
        values.push(f.into());
    }
    if let Some(v) = patch.get("status").and_then(|v| v.as_str()) {
        if v != "active" && v != "withdrawn" {
            return err(
                &req.id,
                "bad_params",
                "status must be one of: active, withdrawn",
                Some(json!({ "status": v })),
            );
        }
        sets.push("status = ?");
        values.push(v.to_string().into());
    }
    if let Some(v) = patch.get("birthDate").and_then(|v| v.as_str()) {
        match parse_birth_date(v.trim()) {
            Ok(d) => {
                sets.push("birth_date = ?");
                values.push(d.into());
            }
            Err(msg) => return err(&req.id, "bad_params", msg, None),
        }
    }
    if let Some(v) = patch.get("guardianName").and_then(|v| v.as_str()) {
        sets.push("guardian_name = ?");
        values.push(v.to_string().into());
    }
    if let Some(v) = patch.get("guardianPhone").and_then(|v| v.as_str()) {
        sets.push("guardian_phone = ?");
        values.push(v.to_string().into());
    }

    if sets.is_empty() {
        return err(&req.id, "bad_params", "patch contains no known fields", None);
    }

    sets.push("updated_at = ?");
    values.push(Utc::now().to_rfc3339().into());
    values.push(student_id.clone().into());

    let sql = format!("UPDATE students SET {} WHERE id = ?", sets.join(", "));
    match conn.execute(&sql, rusqlite::params_from_iter(values)) {
        Ok(_) => ok(&req.id, json!({ "studentId": student_id })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let name: Option<(String, String)> = match conn
        .query_row(
            "SELECT first_name, last_name FROM students WHERE id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((first, last)) = name else {
        return err(&req.id, "not_found", "student not found", None);
    };

    // Marks reference the student row, so they go first.
    let deleted_marks = match conn.execute("DELETE FROM marks WHERE student_id = ?", [&student_id])
    {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(e) = conn.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }

    log::info!(
        "student deleted: {} {} ({} marks removed)",
        first,
        last,
        deleted_marks
    );
    ok(&req.id, json!({ "deletedMarks": deleted_marks }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
