use serde::Serialize;

/// Report-card subject order. English is compulsory for promotion.
pub const STANDARD_SUBJECTS: [&str; 12] = [
    "Agriculture",
    "Biology",
    "Bible Knowledge",
    "Chemistry",
    "Chichewa",
    "Computer Studies",
    "English",
    "Geography",
    "History",
    "Life Skills/SOS",
    "Mathematics",
    "Physics",
];

pub const FORM_LEVELS: [i64; 4] = [1, 2, 3, 4];

pub const MARK_MIN: i64 = 0;
pub const MARK_MAX: i64 = 100;
pub const SUBJECT_PASS_MARK: i64 = 50;
pub const MIN_SUBJECT_PASSES: i64 = 6;
pub const COMPULSORY_SUBJECT: &str = "English";

const SCIENCES: [&str; 6] = [
    "Agriculture",
    "Biology",
    "Chemistry",
    "Computer Studies",
    "Mathematics",
    "Physics",
];
const HUMANITIES: [&str; 4] = ["Bible Knowledge", "Geography", "History", "Life Skills/SOS"];
const LANGUAGES: [&str; 2] = ["English", "Chichewa"];

pub fn is_valid_form(form_level: i64) -> bool {
    (1..=4).contains(&form_level)
}

pub fn is_junior_form(form_level: i64) -> bool {
    form_level <= 2
}

pub fn is_standard_subject(subject: &str) -> bool {
    STANDARD_SUBJECTS.contains(&subject)
}

/// Subjects belonging to an analytics department, or None for an unknown
/// category. "overall" is handled by the caller (no subject filter).
pub fn department_subjects(category: &str) -> Option<&'static [&'static str]> {
    match category {
        "sciences" => Some(&SCIENCES),
        "humanities" => Some(&HUMANITIES),
        "languages" => Some(&LANGUAGES),
        _ => None,
    }
}

/// Forms 1-2 use letter grades, forms 3-4 the MSCE numeric scale.
pub fn grade_for_mark(mark: i64, form_level: i64) -> &'static str {
    if is_junior_form(form_level) {
        match mark {
            80..=100 => "A",
            70..=79 => "B",
            60..=69 => "C",
            50..=59 => "D",
            _ => "F",
        }
    } else {
        match mark {
            75..=100 => "1",
            70..=74 => "2",
            65..=69 => "3",
            60..=64 => "4",
            55..=59 => "5",
            50..=54 => "6",
            45..=49 => "7",
            40..=44 => "8",
            _ => "9",
        }
    }
}

pub fn teacher_comment(grade: &str) -> &'static str {
    match grade {
        "1" | "2" => "Distinction",
        "3" => "Strong Credit",
        "4" | "5" | "6" => "Credit",
        "7" => "Pass",
        "8" => "Mere Pass",
        "9" => "Fail",
        "A" => "Excellent",
        "B" => "Very Good",
        "C" => "Good",
        "D" => "Average",
        "F" => "Fail",
        _ => "Needs Improvement",
    }
}

/// MSCE points for a grade; non-numeric grades count as 9.
pub fn grade_points(grade: &str) -> i64 {
    grade.parse::<i64>().unwrap_or(9)
}

/// Aggregate over the best six marks: MSCE points for senior forms, raw
/// marks for junior forms.
pub fn aggregate_points(marks: &[i64], form_level: i64) -> i64 {
    let mut sorted = marks.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    let best_six = &sorted[..sorted.len().min(6)];
    if is_junior_form(form_level) {
        best_six.iter().sum()
    } else {
        best_six
            .iter()
            .map(|m| grade_points(grade_for_mark(*m, form_level)))
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OverallStatus {
    Pass,
    Fail,
}

impl OverallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OverallStatus::Pass => "PASS",
            OverallStatus::Fail => "FAIL",
        }
    }
}

/// Promotion rule: at least six subject passes AND a pass in English.
pub fn overall_status(passed_subjects: i64, english_passed: bool) -> OverallStatus {
    if passed_subjects >= MIN_SUBJECT_PASSES && english_passed {
        OverallStatus::Pass
    } else {
        OverallStatus::Fail
    }
}

pub fn status_reason(passed_subjects: i64, english_passed: bool) -> String {
    if passed_subjects >= MIN_SUBJECT_PASSES && english_passed {
        "Passed 6 or more subjects including English".to_string()
    } else if passed_subjects >= MIN_SUBJECT_PASSES {
        "Failed English (English is mandatory for pass)".to_string()
    } else if english_passed {
        format!(
            "Passed only {} subjects (minimum 6 required)",
            passed_subjects
        )
    } else {
        format!(
            "Passed only {} subjects and failed English",
            passed_subjects
        )
    }
}

/// Junior-form average grade: the most frequent letter grade; ties are
/// broken by grading the truncated mean mark. A student who passed overall
/// never carries an F average: fall back to the most frequent passing grade.
pub fn junior_average_grade(rows: &[(i64, String)], status: OverallStatus) -> &'static str {
    if rows.is_empty() {
        return "F";
    }
    let grade = mode_grade(rows, &["A", "B", "C", "D", "F"]);
    if grade == "F" && status == OverallStatus::Pass {
        let passing: Vec<(i64, String)> = rows
            .iter()
            .filter(|(_, g)| matches!(g.as_str(), "A" | "B" | "C" | "D"))
            .cloned()
            .collect();
        if !passing.is_empty() {
            return mode_grade(&passing, &["A", "B", "C", "D"]);
        }
    }
    grade
}

fn mode_grade(rows: &[(i64, String)], ladder: &[&'static str]) -> &'static str {
    let mut best: Option<(&'static str, usize)> = None;
    let mut tied = false;
    for &candidate in ladder {
        let count = rows.iter().filter(|(_, g)| g.as_str() == candidate).count();
        if count == 0 {
            continue;
        }
        match best {
            Some((_, n)) if count > n => {
                best = Some((candidate, count));
                tied = false;
            }
            Some((_, n)) if count == n => tied = true,
            None => best = Some((candidate, count)),
            _ => {}
        }
    }
    match best {
        Some((grade, _)) if !tied => grade,
        _ => {
            let total: i64 = rows.iter().map(|(m, _)| m).sum();
            let mean = total / rows.len() as i64;
            grade_for_mark(mean, 1)
        }
    }
}

/// 1-decimal rounding used on report averages: `Int(10*x + 0.5) / 10`.
pub fn round1(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

pub fn grading_key(form_level: i64) -> &'static str {
    if is_junior_form(form_level) {
        "GRADING: A(80-100) B(70-79) C(60-69) D(50-59) F(0-49)"
    } else {
        "MSCE GRADING: 1(75-100) 2(70-74) 3(65-69) 4(60-64) 5(55-59) 6(50-54) 7(45-49) 8(40-44) 9(0-39)"
    }
}

pub fn form_teacher_comment(status: OverallStatus, passed_subjects: i64, average: f64) -> String {
    match status {
        OverallStatus::Pass => format!(
            "PASSED - Excellent performance! Passed {} subjects with {:.1}% average.",
            passed_subjects, average
        ),
        OverallStatus::Fail => {
            "FAILED - Needs improvement. Focus on weak subjects, especially English.".to_string()
        }
    }
}

pub fn head_teacher_comment(status: OverallStatus) -> &'static str {
    match status {
        OverallStatus::Pass => "PASSED - Well done. Keep up the good work.",
        OverallStatus::Fail => "FAILED - Extra effort required. Seek help from teachers.",
    }
}
