use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;

use crate::grading;
use crate::grading::OverallStatus;

#[derive(Debug, Clone, Serialize)]
pub struct ReportError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ReportError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn db(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentHeader {
    pub student_id: String,
    pub student_no: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub form_level: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRow {
    pub subject: String,
    pub mark: Option<i64>,
    pub grade: Option<String>,
    /// In-form rank for the subject, "position/total". None when untaken.
    pub position: Option<String>,
    pub comment: String,
    pub teacher: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolInfo {
    pub school_name: String,
    pub school_address: String,
    pub school_phone: String,
    pub school_email: String,
    pub next_term_begins: String,
    pub boys_uniform: String,
    pub girls_uniform: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeInfo {
    pub pta_fund: String,
    pub sdf_fund: String,
    pub boarding_fee: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressModel {
    pub student: StudentHeader,
    pub term: String,
    pub academic_year: String,
    pub rows: Vec<SubjectRow>,
    pub position: i64,
    pub total_students: i64,
    pub average: f64,
    pub passed_subjects: i64,
    pub english_passed: bool,
    pub overall_status: String,
    pub status_reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate_points: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_grade: Option<String>,
    pub grading_key: String,
    pub form_teacher_comment: String,
    pub head_teacher_comment: String,
    pub school: SchoolInfo,
    pub fees: FeeInfo,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummaryRow {
    pub student_id: String,
    pub student_no: Option<String>,
    pub name: String,
    pub overall_status: String,
    pub passed_subjects: i64,
    pub english_passed: bool,
    pub average: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummaryModel {
    pub form_level: i64,
    pub term: String,
    pub academic_year: String,
    pub total_students: i64,
    pub passed_students: i64,
    pub failed_students: i64,
    pub pass_rate: f64,
    pub failed_english_only: i64,
    pub failed_insufficient_subjects: i64,
    pub failed_both: i64,
    pub students: Vec<ClassSummaryRow>,
}

pub fn load_student(conn: &Connection, student_id: &str) -> Result<StudentHeader, ReportError> {
    let row: Option<StudentHeader> = conn
        .query_row(
            "SELECT id, student_no, first_name, last_name, form_level
             FROM students WHERE id = ?",
            [student_id],
            |r| {
                let first: String = r.get(2)?;
                let last: String = r.get(3)?;
                Ok(StudentHeader {
                    student_id: r.get(0)?,
                    student_no: r.get(1)?,
                    display_name: format!("{} {}", first, last),
                    first_name: first,
                    last_name: last,
                    form_level: r.get(4)?,
                })
            },
        )
        .optional()
        .map_err(ReportError::db)?;
    row.ok_or_else(|| ReportError::new("not_found", "student not found"))
}

/// Marks for one student in one term: subject -> (mark, grade).
pub fn student_marks(
    conn: &Connection,
    student_id: &str,
    term: &str,
    academic_year: &str,
) -> Result<HashMap<String, (i64, String)>, ReportError> {
    let mut stmt = conn
        .prepare(
            "SELECT subject, mark, grade FROM marks
             WHERE student_id = ? AND term = ? AND academic_year = ?",
        )
        .map_err(ReportError::db)?;
    let rows = stmt
        .query_map((student_id, term, academic_year), |r| {
            Ok((r.get::<_, String>(0)?, (r.get::<_, i64>(1)?, r.get::<_, String>(2)?)))
        })
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        .map_err(ReportError::db)?;
    Ok(rows)
}

/// Active students of a form ranked by average mark, descending.
pub fn form_averages(
    conn: &Connection,
    form_level: i64,
    term: &str,
    academic_year: &str,
) -> Result<Vec<(String, f64)>, ReportError> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, AVG(m.mark) AS average
             FROM students s
             JOIN marks m ON m.student_id = s.id
             WHERE s.form_level = ? AND s.status = 'active'
               AND m.term = ? AND m.academic_year = ?
             GROUP BY s.id
             ORDER BY average DESC",
        )
        .map_err(ReportError::db)?;
    stmt.query_map((form_level, term, academic_year), |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(ReportError::db)
}

fn subject_position(
    conn: &Connection,
    student_id: &str,
    subject: &str,
    form_level: i64,
    term: &str,
    academic_year: &str,
) -> Result<Option<String>, ReportError> {
    let mut stmt = conn
        .prepare(
            "SELECT m.student_id
             FROM marks m
             JOIN students s ON s.id = m.student_id
             WHERE s.form_level = ? AND m.subject = ?
               AND m.term = ? AND m.academic_year = ?
             ORDER BY m.mark DESC",
        )
        .map_err(ReportError::db)?;
    let ids = stmt
        .query_map((form_level, subject, term, academic_year), |r| {
            r.get::<_, String>(0)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(ReportError::db)?;
    let total = ids.len();
    Ok(ids
        .iter()
        .position(|id| id == student_id)
        .map(|i| format!("{}/{}", i + 1, total)))
}

pub fn subject_teachers(
    conn: &Connection,
    form_level: i64,
) -> Result<HashMap<String, String>, ReportError> {
    let mut stmt = conn
        .prepare("SELECT subject, teacher_name FROM subject_teachers WHERE form_level = ?")
        .map_err(ReportError::db)?;
    stmt.query_map([form_level], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
    })
    .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
    .map_err(ReportError::db)
}

pub fn school_info(conn: &Connection) -> Result<SchoolInfo, ReportError> {
    conn.query_row(
        "SELECT school_name, school_address, school_phone, school_email,
                next_term_begins, boys_uniform, girls_uniform
         FROM school_settings WHERE id = 1",
        [],
        |r| {
            Ok(SchoolInfo {
                school_name: r.get::<_, Option<String>>(0)?.unwrap_or_default(),
                school_address: r.get::<_, Option<String>>(1)?.unwrap_or_default(),
                school_phone: r.get::<_, Option<String>>(2)?.unwrap_or_default(),
                school_email: r.get::<_, Option<String>>(3)?.unwrap_or_default(),
                next_term_begins: r.get::<_, Option<String>>(4)?.unwrap_or_default(),
                boys_uniform: r.get::<_, Option<String>>(5)?.unwrap_or_default(),
                girls_uniform: r.get::<_, Option<String>>(6)?.unwrap_or_default(),
            })
        },
    )
    .map_err(ReportError::db)
}

pub fn fee_info(conn: &Connection) -> Result<FeeInfo, ReportError> {
    conn.query_row(
        "SELECT pta_fund, sdf_fund, boarding_fee FROM school_fees WHERE id = 1",
        [],
        |r| {
            Ok(FeeInfo {
                pta_fund: r.get::<_, Option<String>>(0)?.unwrap_or_default(),
                sdf_fund: r.get::<_, Option<String>>(1)?.unwrap_or_default(),
                boarding_fee: r.get::<_, Option<String>>(2)?.unwrap_or_default(),
            })
        },
    )
    .map_err(ReportError::db)
}

/// The full progress-report view for one student and term. Derived on each
/// call, never persisted; contains no clock reads so repeated calls over
/// unchanged data yield identical models.
pub fn compute_progress_model(
    conn: &Connection,
    student_id: &str,
    term: &str,
    academic_year: &str,
) -> Result<ProgressModel, ReportError> {
    let student = load_student(conn, student_id)?;
    let marks = student_marks(conn, student_id, term, academic_year)?;
    if marks.is_empty() {
        return Err(ReportError::new(
            "not_found",
            format!(
                "no marks recorded for {} in {} {}",
                student.display_name, term, academic_year
            ),
        ));
    }

    let teachers = subject_teachers(conn, student.form_level)?;

    let mut rows = Vec::with_capacity(grading::STANDARD_SUBJECTS.len());
    for subject in grading::STANDARD_SUBJECTS {
        match marks.get(subject) {
            Some((mark, grade)) => {
                let position = subject_position(
                    conn,
                    student_id,
                    subject,
                    student.form_level,
                    term,
                    academic_year,
                )?;
                rows.push(SubjectRow {
                    subject: subject.to_string(),
                    mark: Some(*mark),
                    grade: Some(grade.clone()),
                    position,
                    comment: grading::teacher_comment(grade).to_string(),
                    teacher: teachers.get(subject).cloned(),
                });
            }
            None => rows.push(SubjectRow {
                subject: subject.to_string(),
                mark: None,
                grade: None,
                position: None,
                comment: "Not taken".to_string(),
                teacher: None,
            }),
        }
    }

    let rankings = form_averages(conn, student.form_level, term, academic_year)?;
    let total_students = rankings.len() as i64;
    let position = rankings
        .iter()
        .position(|(id, _)| id == student_id)
        .map(|i| i as i64 + 1)
        .unwrap_or(0);

    let mark_values: Vec<i64> = marks.values().map(|(m, _)| *m).collect();
    let passed_subjects = mark_values
        .iter()
        .filter(|m| **m >= grading::SUBJECT_PASS_MARK)
        .count() as i64;
    let english_passed = marks
        .get(grading::COMPULSORY_SUBJECT)
        .map(|(m, _)| *m >= grading::SUBJECT_PASS_MARK)
        .unwrap_or(false);
    let status = grading::overall_status(passed_subjects, english_passed);
    let average = grading::round1(
        mark_values.iter().sum::<i64>() as f64 / mark_values.len() as f64,
    );

    let (aggregate_points, average_grade) = if grading::is_junior_form(student.form_level) {
        let graded: Vec<(i64, String)> =
            marks.values().map(|(m, g)| (*m, g.clone())).collect();
        (
            None,
            Some(grading::junior_average_grade(&graded, status).to_string()),
        )
    } else {
        (
            Some(grading::aggregate_points(&mark_values, student.form_level)),
            None,
        )
    };

    let grading_key = grading::grading_key(student.form_level).to_string();
    let form_teacher_comment = grading::form_teacher_comment(status, passed_subjects, average);
    let head_teacher_comment = grading::head_teacher_comment(status).to_string();

    Ok(ProgressModel {
        grading_key,
        form_teacher_comment,
        head_teacher_comment,
        school: school_info(conn)?,
        fees: fee_info(conn)?,
        student,
        term: term.to_string(),
        academic_year: academic_year.to_string(),
        rows,
        position,
        total_students,
        average,
        passed_subjects,
        english_passed,
        overall_status: status.as_str().to_string(),
        status_reason: grading::status_reason(passed_subjects, english_passed),
        aggregate_points,
        average_grade,
    })
}

/// Pass/fail summary across one form. Students without marks in the term are
/// included as failures with zero averages, so the totals always cover the
/// whole class roll.
pub fn compute_class_summary(
    conn: &Connection,
    form_level: i64,
    term: &str,
    academic_year: &str,
) -> Result<ClassSummaryModel, ReportError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, student_no, first_name, last_name FROM students
             WHERE form_level = ? AND status = 'active'
             ORDER BY last_name, first_name",
        )
        .map_err(ReportError::db)?;
    let students = stmt
        .query_map([form_level], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, Option<String>>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(ReportError::db)?;

    let mut rows: Vec<ClassSummaryRow> = Vec::with_capacity(students.len());
    let mut passed_students = 0i64;
    let mut failed_english_only = 0i64;
    let mut failed_insufficient_subjects = 0i64;
    let mut failed_both = 0i64;

    for (id, student_no, first, last) in students {
        let marks = student_marks(conn, &id, term, academic_year)?;
        let mark_values: Vec<i64> = marks.values().map(|(m, _)| *m).collect();
        let passed = mark_values
            .iter()
            .filter(|m| **m >= grading::SUBJECT_PASS_MARK)
            .count() as i64;
        let english_passed = marks
            .get(grading::COMPULSORY_SUBJECT)
            .map(|(m, _)| *m >= grading::SUBJECT_PASS_MARK)
            .unwrap_or(false);
        let status = grading::overall_status(passed, english_passed);
        let average = if mark_values.is_empty() {
            0.0
        } else {
            grading::round1(mark_values.iter().sum::<i64>() as f64 / mark_values.len() as f64)
        };

        match status {
            OverallStatus::Pass => passed_students += 1,
            OverallStatus::Fail => {
                if passed >= grading::MIN_SUBJECT_PASSES {
                    failed_english_only += 1;
                } else if english_passed {
                    failed_insufficient_subjects += 1;
                } else {
                    failed_both += 1;
                }
            }
        }

        rows.push(ClassSummaryRow {
            student_id: id,
            student_no,
            name: format!("{} {}", first, last),
            overall_status: status.as_str().to_string(),
            passed_subjects: passed,
            english_passed,
            average,
        });
    }

    // Pass rows first, then alphabetically, matching the printed summary.
    rows.sort_by(|a, b| {
        (a.overall_status == "FAIL", &a.name).cmp(&(b.overall_status == "FAIL", &b.name))
    });

    let total_students = rows.len() as i64;
    let failed_students = total_students - passed_students;
    let pass_rate = if total_students > 0 {
        grading::round1(100.0 * passed_students as f64 / total_students as f64)
    } else {
        0.0
    };

    Ok(ClassSummaryModel {
        form_level,
        term: term.to_string(),
        academic_year: academic_year.to_string(),
        total_students,
        passed_students,
        failed_students,
        pass_rate,
        failed_english_only,
        failed_insufficient_subjects,
        failed_both,
        students: rows,
    })
}
