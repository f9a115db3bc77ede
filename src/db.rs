use rusqlite::Connection;
use std::path::Path;

use crate::grading;

pub const DB_FILE_NAME: &str = "school.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            student_no TEXT UNIQUE,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            birth_date TEXT,
            form_level INTEGER NOT NULL,
            guardian_name TEXT,
            guardian_phone TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            enrolled_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_form ON students(form_level)",
        [],
    )?;

    // Existing workspaces may predate the guardian contact columns.
    ensure_students_guardian_columns(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_teachers(
            id TEXT PRIMARY KEY,
            subject TEXT NOT NULL,
            form_level INTEGER NOT NULL,
            teacher_name TEXT NOT NULL,
            updated_at TEXT,
            UNIQUE(subject, form_level)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_teachers_form ON subject_teachers(form_level)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            term TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            form_level INTEGER NOT NULL,
            mark INTEGER NOT NULL,
            grade TEXT NOT NULL,
            entered_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, subject, term, academic_year)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_student ON marks(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_form_subject ON marks(form_level, subject)",
        [],
    )?;
    ensure_marks_entered_at(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS school_settings(
            id INTEGER PRIMARY KEY CHECK(id = 1),
            school_name TEXT,
            school_address TEXT,
            school_phone TEXT,
            school_email TEXT,
            next_term_begins TEXT,
            boys_uniform TEXT,
            girls_uniform TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS school_fees(
            id INTEGER PRIMARY KEY CHECK(id = 1),
            pta_fund TEXT,
            sdf_fund TEXT,
            boarding_fee TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS accounts(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'staff',
            created_at TEXT,
            last_login TEXT
        )",
        [],
    )?;

    seed_defaults(&conn)?;

    Ok(conn)
}

/// Seed reference data so a fresh workspace is usable immediately: one
/// settings row, one fees row, and a teacher assignment for every standard
/// subject in every form.
fn seed_defaults(conn: &Connection) -> anyhow::Result<()> {
    let settings_count: i64 =
        conn.query_row("SELECT COUNT(*) FROM school_settings", [], |r| r.get(0))?;
    if settings_count == 0 {
        conn.execute(
            "INSERT INTO school_settings(
                id, school_name, school_address, school_phone, school_email,
                next_term_begins, boys_uniform, girls_uniform
            ) VALUES(1, ?, ?, ?, ?, ?, ?, ?)",
            (
                "DEMO SECONDARY SCHOOL",
                "P.O. Box 123, Lilongwe, Malawi",
                "+265 1 234 5678",
                "demo@school.edu.mw",
                "To be announced",
                "White shirt, black trousers, black shoes",
                "White blouse, black skirt, black shoes",
            ),
        )?;
    }

    let fees_count: i64 = conn.query_row("SELECT COUNT(*) FROM school_fees", [], |r| r.get(0))?;
    if fees_count == 0 {
        conn.execute(
            "INSERT INTO school_fees(id, pta_fund, sdf_fund, boarding_fee)
             VALUES(1, ?, ?, ?)",
            ("MK 50,000", "MK 30,000", "MK 150,000"),
        )?;
    }

    let teacher_count: i64 =
        conn.query_row("SELECT COUNT(*) FROM subject_teachers", [], |r| r.get(0))?;
    if teacher_count == 0 {
        let mut stmt = conn.prepare(
            "INSERT INTO subject_teachers(id, subject, form_level, teacher_name)
             VALUES(lower(hex(randomblob(16))), ?, ?, ?)",
        )?;
        for form_level in grading::FORM_LEVELS {
            for subject in grading::STANDARD_SUBJECTS {
                stmt.execute((
                    subject,
                    form_level,
                    format!("{} Teacher F{}", subject, form_level),
                ))?;
            }
        }
    }

    Ok(())
}

/// Next zero-padded student serial ("0001", "0002", ...). Serials are
/// assigned once at enrollment and never reused.
pub fn next_student_serial(conn: &Connection) -> anyhow::Result<String> {
    let max_no: Option<i64> = conn.query_row(
        "SELECT MAX(CAST(student_no AS INTEGER)) FROM students",
        [],
        |r| r.get(0),
    )?;
    Ok(format!("{:04}", max_no.unwrap_or(0) + 1))
}

fn ensure_students_guardian_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "students", "guardian_name")? {
        conn.execute("ALTER TABLE students ADD COLUMN guardian_name TEXT", [])?;
    }
    if !table_has_column(conn, "students", "guardian_phone")? {
        conn.execute("ALTER TABLE students ADD COLUMN guardian_phone TEXT", [])?;
    }
    Ok(())
}

fn ensure_marks_entered_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "marks", "entered_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE marks ADD COLUMN entered_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_db_seeds_reference_data_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = open_db(dir.path()).expect("open db");

        let teachers: i64 = conn
            .query_row("SELECT COUNT(*) FROM subject_teachers", [], |r| r.get(0))
            .expect("count teachers");
        assert_eq!(teachers, 48);

        let name: String = conn
            .query_row(
                "SELECT school_name FROM school_settings WHERE id = 1",
                [],
                |r| r.get(0),
            )
            .expect("settings row");
        assert_eq!(name, "DEMO SECONDARY SCHOOL");

        drop(conn);
        let conn = open_db(dir.path()).expect("reopen db");
        let teachers: i64 = conn
            .query_row("SELECT COUNT(*) FROM subject_teachers", [], |r| r.get(0))
            .expect("count teachers");
        assert_eq!(teachers, 48, "reopening must not duplicate seeds");
    }

    #[test]
    fn student_serials_are_zero_padded_and_sequential() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = open_db(dir.path()).expect("open db");

        assert_eq!(next_student_serial(&conn).expect("serial"), "0001");
        conn.execute(
            "INSERT INTO students(id, student_no, last_name, first_name, form_level)
             VALUES('s1', '0001', 'Banda', 'Chikondi', 1)",
            [],
        )
        .expect("insert student");
        assert_eq!(next_student_serial(&conn).expect("serial"), "0002");

        conn.execute(
            "INSERT INTO students(id, student_no, last_name, first_name, form_level)
             VALUES('s2', '0041', 'Phiri', 'Mavuto', 2)",
            [],
        )
        .expect("insert student");
        assert_eq!(next_student_serial(&conn).expect("serial"), "0042");
    }

    #[test]
    fn marks_unique_key_rejects_duplicate_tuple() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = open_db(dir.path()).expect("open db");
        conn.execute(
            "INSERT INTO students(id, student_no, last_name, first_name, form_level)
             VALUES('s1', '0001', 'Banda', 'Chikondi', 1)",
            [],
        )
        .expect("insert student");

        conn.execute(
            "INSERT INTO marks(id, student_id, subject, term, academic_year, form_level, mark, grade)
             VALUES('m1', 's1', 'English', 'Term 1', '2024-2025', 1, 70, 'B')",
            [],
        )
        .expect("insert mark");
        let dup = conn.execute(
            "INSERT INTO marks(id, student_id, subject, term, academic_year, form_level, mark, grade)
             VALUES('m2', 's1', 'English', 'Term 1', '2024-2025', 1, 80, 'A')",
            [],
        );
        assert!(dup.is_err(), "duplicate (student, subject, term, year) row");
    }

    #[test]
    fn marks_require_an_existing_student() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = open_db(dir.path()).expect("open db");
        let orphan = conn.execute(
            "INSERT INTO marks(id, student_id, subject, term, academic_year, form_level, mark, grade)
             VALUES('m1', 'ghost', 'English', 'Term 1', '2024-2025', 1, 70, 'B')",
            [],
        );
        assert!(orphan.is_err(), "foreign key must reject orphan marks");
    }
}
