//! Direct PDF generation for report cards.
//!
//! Documents are assembled as raw PDF objects (catalog, page tree, Type1
//! Helvetica fonts, content streams) and serialized with byte-accurate xref
//! offsets. Output is fully deterministic: the same report model always
//! produces the same bytes.

use std::fmt::Write as _;

use crate::report::ProgressModel;

pub const A4_WIDTH: f64 = 595.28;
pub const A4_HEIGHT: f64 = 841.89;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource_name(self) -> &'static str {
        match self {
            Font::Regular => "/F1",
            Font::Bold => "/F2",
        }
    }
}

/// One page's content stream, built from text/line/rectangle operators.
#[derive(Debug, Default, Clone)]
pub struct PageContent {
    ops: String,
}

impl PageContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stroke_color(&mut self, r: f64, g: f64, b: f64) {
        let _ = writeln!(self.ops, "{:.3} {:.3} {:.3} RG", r, g, b);
    }

    pub fn set_fill_color(&mut self, r: f64, g: f64, b: f64) {
        let _ = writeln!(self.ops, "{:.3} {:.3} {:.3} rg", r, g, b);
    }

    pub fn set_line_width(&mut self, width: f64) {
        let _ = writeln!(self.ops, "{:.2} w", width);
    }

    pub fn stroke_rect(&mut self, x: f64, y: f64, w: f64, h: f64) {
        let _ = writeln!(self.ops, "{:.2} {:.2} {:.2} {:.2} re S", x, y, w, h);
    }

    pub fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64) {
        let _ = writeln!(self.ops, "{:.2} {:.2} {:.2} {:.2} re f", x, y, w, h);
    }

    pub fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64) {
        let _ = writeln!(self.ops, "{:.2} {:.2} m {:.2} {:.2} l S", x1, y1, x2, y2);
    }

    pub fn text(&mut self, font: Font, size: f64, x: f64, y: f64, value: &str) {
        let _ = writeln!(
            self.ops,
            "BT {} {:.1} Tf {:.2} {:.2} Td ({}) Tj ET",
            font.resource_name(),
            size,
            x,
            y,
            escape_text(value)
        );
    }

    /// Centered on the page using the Helvetica average-width approximation;
    /// adequate for headings.
    pub fn text_centered(&mut self, font: Font, size: f64, y: f64, value: &str) {
        let width = approx_text_width(value, size);
        self.text(font, size, (A4_WIDTH - width) / 2.0, y, value);
    }
}

fn approx_text_width(value: &str, size: f64) -> f64 {
    0.5 * size * value.chars().count() as f64
}

fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            // The base-font encoding is Latin-1; anything outside it degrades
            // to a placeholder rather than corrupting the stream.
            c if (c as u32) < 256 => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

/// Serialize pages into a complete PDF document.
///
/// Object layout: 1 catalog, 2 page tree, then (page, content) pairs, then
/// the two font objects referenced by every page.
pub fn write_document(pages: &[PageContent]) -> Vec<u8> {
    let page_count = pages.len();
    let font_regular_obj = 3 + 2 * page_count;
    let font_bold_obj = font_regular_obj + 1;

    let mut buf: Vec<u8> = Vec::new();
    let mut offsets: Vec<usize> = Vec::new();
    buf.extend_from_slice(b"%PDF-1.4\n");

    fn push_obj(buf: &mut Vec<u8>, offsets: &mut Vec<usize>, body: String) {
        offsets.push(buf.len());
        let num = offsets.len();
        buf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", num, body).as_bytes());
    }

    push_obj(
        &mut buf,
        &mut offsets,
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
    );

    let kids = (0..page_count)
        .map(|i| format!("{} 0 R", 3 + 2 * i))
        .collect::<Vec<_>>()
        .join(" ");
    push_obj(
        &mut buf,
        &mut offsets,
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids, page_count
        ),
    );

    for (i, page) in pages.iter().enumerate() {
        let content_obj = 4 + 2 * i;
        push_obj(
            &mut buf,
            &mut offsets,
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {:.2} {:.2}] \
                 /Resources << /Font << /F1 {} 0 R /F2 {} 0 R >> >> /Contents {} 0 R >>",
                A4_WIDTH, A4_HEIGHT, font_regular_obj, font_bold_obj, content_obj
            ),
        );
        push_obj(
            &mut buf,
            &mut offsets,
            format!(
                "<< /Length {} >>\nstream\n{}endstream",
                page.ops.len(),
                page.ops
            ),
        );
    }

    push_obj(
        &mut buf,
        &mut offsets,
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    );
    push_obj(
        &mut buf,
        &mut offsets,
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold >>".to_string(),
    );

    let xref_offset = buf.len();
    let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", offsets.len() + 1);
    for off in &offsets {
        let _ = writeln!(xref, "{:010} 00000 n ", off);
    }
    buf.extend_from_slice(xref.as_bytes());
    buf.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            offsets.len() + 1,
            xref_offset
        )
        .as_bytes(),
    );

    buf
}

const MARGIN_LEFT: f64 = 70.0;
const TABLE_COL_WIDTHS: [f64; 6] = [130.0, 45.0, 45.0, 55.0, 110.0, 90.0];
const TABLE_ROW_HEIGHT: f64 = 16.0;

/// Single-page A4 progress report: bordered frame, centered school header,
/// student block, marks table, grading key and footer. Mirrors the printed
/// report-card layout.
pub fn render_progress_report(model: &ProgressModel) -> Vec<u8> {
    let mut page = PageContent::new();

    // Nested colour frame around the card.
    page.set_stroke_color(0.0, 0.0, 1.0);
    page.set_line_width(4.0);
    page.stroke_rect(20.0, 20.0, A4_WIDTH - 40.0, A4_HEIGHT - 40.0);
    page.set_stroke_color(0.0, 0.5, 0.0);
    page.set_line_width(2.0);
    page.stroke_rect(30.0, 30.0, A4_WIDTH - 60.0, A4_HEIGHT - 60.0);
    page.set_stroke_color(1.0, 0.0, 0.0);
    page.set_line_width(1.0);
    page.stroke_rect(40.0, 40.0, A4_WIDTH - 80.0, A4_HEIGHT - 80.0);

    let mut y = A4_HEIGHT - 70.0;
    page.text_centered(Font::Bold, 16.0, y, &model.school.school_name);
    y -= 16.0;
    for part in model.school.school_address.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        page.text_centered(Font::Bold, 10.0, y, &part.to_uppercase());
        y -= 12.0;
    }
    y -= 6.0;
    page.text_centered(Font::Bold, 14.0, y, "PROGRESS REPORT");
    y -= 24.0;

    let serial = model.student.student_no.clone().unwrap_or_default();
    let position_extra = if let Some(grade) = &model.average_grade {
        format!("Average Grade: {}", grade)
    } else {
        format!(
            "Aggregate Points: {}",
            model.aggregate_points.unwrap_or_default()
        )
    };
    let info_rows: [(&str, String); 6] = [
        ("Serial No:", serial),
        ("Student Name:", model.student.display_name.clone()),
        (
            "Term:",
            model.term.replace("Term", "").trim().to_string(),
        ),
        ("Form:", model.student.form_level.to_string()),
        ("Year:", model.academic_year.clone()),
        (
            "Position:",
            format!(
                "{}/{}          {}",
                model.position, model.total_students, position_extra
            ),
        ),
    ];
    for (label, value) in info_rows {
        page.text(Font::Bold, 9.0, MARGIN_LEFT, y, label);
        page.text(Font::Bold, 9.0, MARGIN_LEFT + 90.0, y, &value);
        y -= 13.0;
    }
    y -= 8.0;

    y = draw_marks_table(&mut page, model, y);
    y -= 14.0;

    if let Some(points) = model.aggregate_points {
        page.text(
            Font::Bold,
            10.0,
            MARGIN_LEFT,
            y,
            &format!("Aggregate Points (Best Six): {}", points),
        );
        y -= 14.0;
    }

    page.text(Font::Bold, 8.0, MARGIN_LEFT, y, &model.grading_key);
    y -= 14.0;
    page.text(
        Font::Bold,
        8.0,
        MARGIN_LEFT,
        y,
        &format!("FORM TEACHER: {}", model.form_teacher_comment),
    );
    y -= 11.0;
    page.text(
        Font::Bold,
        8.0,
        MARGIN_LEFT,
        y,
        &format!("HEAD TEACHER: {}", model.head_teacher_comment),
    );
    y -= 13.0;
    page.text(
        Font::Bold,
        8.0,
        MARGIN_LEFT,
        y,
        "CLASS TEACHER SIGN: ________________________",
    );
    y -= 15.0;

    page.text(
        Font::Bold,
        8.0,
        MARGIN_LEFT,
        y,
        &format!("NEXT TERM BEGINS ON: {}", model.school.next_term_begins),
    );
    y -= 11.0;
    page.text(
        Font::Bold,
        8.0,
        MARGIN_LEFT,
        y,
        &format!(
            "FEES - PTA: {} | SDF: {} | Boarding: {}",
            model.fees.pta_fund, model.fees.sdf_fund, model.fees.boarding_fee
        ),
    );
    y -= 11.0;
    page.text(
        Font::Bold,
        8.0,
        MARGIN_LEFT,
        y,
        &format!("UNIFORM - Girls: {}", model.school.girls_uniform),
    );
    y -= 11.0;
    page.text(
        Font::Bold,
        8.0,
        MARGIN_LEFT,
        y,
        &format!("Boys: {}", model.school.boys_uniform),
    );

    write_document(&[page])
}

fn draw_marks_table(page: &mut PageContent, model: &ProgressModel, top: f64) -> f64 {
    let table_width: f64 = TABLE_COL_WIDTHS.iter().sum();
    let row_count = model.rows.len() + 1;
    let table_height = TABLE_ROW_HEIGHT * row_count as f64;
    let bottom = top - table_height;

    // Header band.
    page.set_fill_color(0.78, 0.88, 0.95);
    page.fill_rect(
        MARGIN_LEFT,
        top - TABLE_ROW_HEIGHT,
        table_width,
        TABLE_ROW_HEIGHT,
    );
    page.set_fill_color(0.0, 0.0, 0.0);

    page.set_stroke_color(0.0, 0.0, 0.0);
    page.set_line_width(0.75);
    for i in 0..=row_count {
        let y = top - TABLE_ROW_HEIGHT * i as f64;
        page.line(MARGIN_LEFT, y, MARGIN_LEFT + table_width, y);
    }
    let mut x = MARGIN_LEFT;
    page.line(x, top, x, bottom);
    for w in TABLE_COL_WIDTHS {
        x += w;
        page.line(x, top, x, bottom);
    }

    let headers = [
        "Subject",
        "Marks",
        "Grade",
        "Position",
        "Teachers Comment",
        "Signature",
    ];
    let text_y = |row: usize| top - TABLE_ROW_HEIGHT * (row as f64 + 1.0) + 4.5;
    let mut col_x = MARGIN_LEFT;
    for (i, header) in headers.iter().enumerate() {
        page.text(Font::Bold, 8.0, col_x + 3.0, text_y(0), header);
        col_x += TABLE_COL_WIDTHS[i];
    }

    for (row_idx, row) in model.rows.iter().enumerate() {
        let cells: [String; 6] = [
            row.subject.clone(),
            row.mark.map(|m| m.to_string()).unwrap_or_else(|| "--".into()),
            row.grade.clone().unwrap_or_else(|| "--".into()),
            row.position.clone().unwrap_or_else(|| "--".into()),
            row.comment.clone(),
            row.teacher
                .as_deref()
                .map(|t| t.chars().take(18).collect())
                .unwrap_or_else(|| "--".into()),
        ];
        let mut col_x = MARGIN_LEFT;
        for (i, cell) in cells.iter().enumerate() {
            page.text(Font::Regular, 8.0, col_x + 3.0, text_y(row_idx + 1), cell);
            col_x += TABLE_COL_WIDTHS[i];
        }
    }

    bottom
}
