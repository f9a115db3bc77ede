use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::pdf;
use crate::report;
use rusqlite::Connection;
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn report_err(req: &Request, e: report::ReportError) -> serde_json::Value {
    err(&req.id, &e.code, e.message, e.details)
}

fn handle_progress_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
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

    match report::compute_progress_model(conn, &student_id, &term, &academic_year) {
        Ok(model) => ok(&req.id, json!(model)),
        Err(e) => report_err(req, e),
    }
}

fn handle_class_summary_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
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
    let term = match required_str(req, "term") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year = match required_str(req, "academicYear") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match report::compute_class_summary(conn, form_level, &term, &academic_year) {
        Ok(model) => ok(&req.id, json!(model)),
        Err(e) => report_err(req, e),
    }
}

fn handle_export_pdf(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
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
    let out_path = match required_str(req, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };

    let model = match report::compute_progress_model(conn, &student_id, &term, &academic_year) {
        Ok(v) => v,
        Err(e) => return report_err(req, e),
    };
    let bytes = pdf::render_progress_report(&model);

    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return err(&req.id, "io_failed", e.to_string(), None);
            }
        }
    }
    if let Err(e) = std::fs::write(&out_path, &bytes) {
        return err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": out_path.to_string_lossy() })),
        );
    }

    log::info!(
        "exported report card for {} to {}",
        model.student.display_name,
        out_path.to_string_lossy()
    );
    ok(
        &req.id,
        json!({ "path": out_path.to_string_lossy(), "bytes": bytes.len() }),
    )
}

fn pdf_entry_name(form_level: i64, model: &report::ProgressModel) -> String {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect()
    };
    format!(
        "Form{}/{}_{}_{}.pdf",
        form_level,
        model.student.student_no.clone().unwrap_or_default(),
        sanitize(&model.student.last_name),
        sanitize(&model.student.first_name)
    )
}

fn handle_export_all_pdf(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
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
    let out_path = match required_str(req, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };

    // One PDF per student with marks in the term, across all forms.
    let mut reports: Vec<(i64, report::ProgressModel, Vec<u8>)> = Vec::new();
    for form_level in grading::FORM_LEVELS {
        let mut stmt = match conn.prepare(
            "SELECT id FROM students WHERE form_level = ? AND status = 'active'
             ORDER BY last_name, first_name",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let ids = match stmt
            .query_map([form_level], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        for id in ids {
            match report::compute_progress_model(conn, &id, &term, &academic_year) {
                Ok(model) => {
                    let bytes = pdf::render_progress_report(&model);
                    reports.push((form_level, model, bytes));
                }
                // Students without marks in the term simply have no card.
                Err(e) if e.code == "not_found" => continue,
                Err(e) => return report_err(req, e),
            }
        }
    }

    if reports.is_empty() {
        return err(
            &req.id,
            "not_found",
            format!("no marks recorded for any student in {} {}", term, academic_year),
            None,
        );
    }

    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return err(&req.id, "io_failed", e.to_string(), None);
            }
        }
    }
    let out_file = match std::fs::File::create(&out_path) {
        Ok(f) => f,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": out_path.to_string_lossy() })),
            )
        }
    };
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (form_level, model, bytes) in &reports {
        let entry = pdf_entry_name(*form_level, model);
        if let Err(e) = zip.start_file(entry, opts) {
            return err(&req.id, "io_failed", e.to_string(), None);
        }
        if let Err(e) = zip.write_all(bytes) {
            return err(&req.id, "io_failed", e.to_string(), None);
        }
    }
    if let Err(e) = zip.finish() {
        return err(&req.id, "io_failed", e.to_string(), None);
    }

    log::info!(
        "exported {} report cards to {}",
        reports.len(),
        out_path.to_string_lossy()
    );
    ok(
        &req.id,
        json!({ "path": out_path.to_string_lossy(), "reportCount": reports.len() }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.progressModel" => Some(handle_progress_model(state, req)),
        "reports.classSummaryModel" => Some(handle_class_summary_model(state, req)),
        "reports.exportPdf" => Some(handle_export_pdf(state, req)),
        "reports.exportAllPdf" => Some(handle_export_all_pdf(state, req)),
        _ => None,
    }
}
