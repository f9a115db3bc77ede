use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value, Connection};
use serde_json::json;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn required_form(req: &Request) -> Result<i64, serde_json::Value> {
    let form_level = req
        .params
        .get("formLevel")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(&req.id, "bad_params", "missing formLevel", None))?;
    if !grading::is_valid_form(form_level) {
        return Err(err(
            &req.id,
            "bad_params",
            "formLevel must be 1-4",
            Some(json!({ "formLevel": form_level })),
        ));
    }
    Ok(form_level)
}

struct RankedStudent {
    id: String,
    name: String,
    average: f64,
    subjects_passed: i64,
}

fn ranked_students(
    conn: &Connection,
    form_level: i64,
    term: &str,
    academic_year: &str,
    subjects: Option<&[&str]>,
) -> Result<Vec<RankedStudent>, rusqlite::Error> {
    let mut sql = String::from(
        "SELECT s.id, s.first_name, s.last_name, AVG(m.mark) AS average,
                SUM(CASE WHEN m.mark >= 50 THEN 1 ELSE 0 END) AS passed
         FROM students s
         JOIN marks m ON m.student_id = s.id
         WHERE s.form_level = ? AND s.status = 'active'
           AND m.term = ? AND m.academic_year = ?",
    );
    let mut bind: Vec<Value> = vec![
        Value::Integer(form_level),
        Value::Text(term.to_string()),
        Value::Text(academic_year.to_string()),
    ];
    if let Some(subjects) = subjects {
        let placeholders = std::iter::repeat("?")
            .take(subjects.len())
            .collect::<Vec<_>>()
            .join(",");
        sql.push_str(&format!(" AND m.subject IN ({})", placeholders));
        for s in subjects {
            bind.push(Value::Text(s.to_string()));
        }
    }
    sql.push_str(" GROUP BY s.id ORDER BY average DESC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), |r| {
            let first: String = r.get(1)?;
            let last: String = r.get(2)?;
            Ok(RankedStudent {
                id: r.get(0)?,
                name: format!("{} {}", first, last),
                average: r.get(3)?,
                subjects_passed: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn english_passed(
    conn: &Connection,
    student_id: &str,
    term: &str,
    academic_year: &str,
) -> Result<bool, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT mark FROM marks
         WHERE student_id = ? AND subject = ? AND term = ? AND academic_year = ?",
    )?;
    let mut rows = stmt.query((student_id, grading::COMPULSORY_SUBJECT, term, academic_year))?;
    match rows.next()? {
        Some(row) => {
            let mark: i64 = row.get(0)?;
            Ok(mark >= grading::SUBJECT_PASS_MARK)
        }
        None => Ok(false),
    }
}

fn handle_rankings(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let form_level = match required_form(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term = match required_str(req, "term") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year = match required_str(req, "academicYear") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let ranked = match ranked_students(conn, form_level, &term, &academic_year, None) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut rows: Vec<serde_json::Value> = Vec::with_capacity(ranked.len());
    for (i, r) in ranked.iter().enumerate() {
        let english = match english_passed(conn, &r.id, &term, &academic_year) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let status = grading::overall_status(r.subjects_passed, english);
        rows.push(json!({
            "position": i + 1,
            "studentId": r.id,
            "name": r.name,
            "average": grading::round1(r.average),
            "grade": grading::grade_for_mark(r.average as i64, form_level),
            "subjectsPassed": r.subjects_passed,
            "englishPassed": english,
            "overallStatus": status.as_str()
        }));
    }

    ok(&req.id, json!({ "rankings": rows }))
}

fn handle_top_performers(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let category = match required_str(req, "category") {
        Ok(v) => v.to_ascii_lowercase(),
        Err(e) => return e,
    };
    let form_level = match required_form(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term = match required_str(req, "term") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year = match required_str(req, "academicYear") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let subjects = match category.as_str() {
        "overall" => None,
        other => match grading::department_subjects(other) {
            Some(list) => Some(list),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "category must be one of: overall, sciences, humanities, languages",
                    Some(json!({ "category": other })),
                )
            }
        },
    };

    let ranked = match ranked_students(conn, form_level, &term, &academic_year, subjects) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let performers: Vec<serde_json::Value> = ranked
        .iter()
        .take(10)
        .map(|r| {
            json!({
                "studentId": r.id,
                "name": r.name,
                "average": grading::round1(r.average),
                "grade": grading::grade_for_mark(r.average as i64, form_level),
                "excellenceArea": category
            })
        })
        .collect();

    ok(&req.id, json!({ "performers": performers }))
}

fn handle_subject_leaders(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !grading::is_standard_subject(&subject) {
        return err(
            &req.id,
            "bad_params",
            "unknown subject",
            Some(json!({ "subject": subject })),
        );
    }
    let term = match required_str(req, "term") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year = match required_str(req, "academicYear") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(10)
        .clamp(1, 100);

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.first_name, s.last_name, s.form_level, m.mark, m.grade
         FROM students s
         JOIN marks m ON m.student_id = s.id
         WHERE s.status = 'active' AND m.subject = ?
           AND m.term = ? AND m.academic_year = ?
         ORDER BY m.mark DESC
         LIMIT ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&subject, &term, &academic_year, limit), |r| {
            let first: String = r.get(1)?;
            let last: String = r.get(2)?;
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "name": format!("{} {}", first, last),
                "formLevel": r.get::<_, i64>(3)?,
                "mark": r.get::<_, i64>(4)?,
                "grade": r.get::<_, String>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(leaders) => ok(&req.id, json!({ "subject": subject, "leaders": leaders })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.rankings" => Some(handle_rankings(state, req)),
        "analytics.topPerformers" => Some(handle_top_performers(state, req)),
        "analytics.subjectLeaders" => Some(handle_subject_leaders(state, req)),
        _ => None,
    }
}
