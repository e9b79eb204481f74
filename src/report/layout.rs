//! Page layout for the clinical report, as plain data.
//!
//! Coordinates are PDF points with the origin at the bottom-left corner.
//! Nothing here touches the PDF library, so pagination is testable on its own.

use super::content::{
    wrap_text, Section, BRAND_SUBTITLE, BRAND_TITLE, DISCLAIMER_LINES, FIGURE_CAPTION,
    SIGNATURE_LINES,
};
use crate::models::scan::ScanRecord;

pub const PAGE_WIDTH: f32 = 612.0;
pub const PAGE_HEIGHT: f32 = 792.0;

const MARGIN_X: f32 = 50.0;
const HEADER_BAND_HEIGHT: f32 = 100.0;

/// Section titles and items need at least this much room from the bottom.
pub const SECTION_MIN_Y: f32 = 120.0;
pub const ITEM_MIN_Y: f32 = 100.0;
/// Lowest baseline for body text; keeps clear of the footer block.
pub const LINE_MIN_Y: f32 = 72.0;
/// Cursor position at the top of a continuation page.
pub const CONTINUATION_TOP_Y: f32 = PAGE_HEIGHT - 50.0;

pub const WRAP_WIDTH: usize = 90;
const SECTION_TITLE_GAP: f32 = 25.0;
const ITEM_BODY_OFFSET: f32 = 15.0;
const BODY_LEADING: f32 = 12.0;
const ITEM_GAP: f32 = 10.0;
const SECTION_GAP: f32 = 10.0;

pub const FIGURE_WIDTH: f32 = 300.0;
pub const FIGURE_HEIGHT: f32 = 225.0;

const FOOTER_RULE_Y: f32 = 60.0;
const FOOTER_LINE_YS: [f32; 2] = [45.0, 35.0];
const FOOTER_FONT_SIZE: f32 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color(pub f32, pub f32, pub f32);

impl Color {
    pub const BLACK: Color = Color(0.0, 0.0, 0.0);
    pub const WHITE: Color = Color(1.0, 1.0, 1.0);
    pub const TEAL: Color = Color(0.06, 0.3, 0.27);
    pub const CAPTION_GREY: Color = Color(0.3, 0.3, 0.3);
    pub const FOOTER_GREY: Color = Color(0.5, 0.5, 0.5);
    pub const RULE_GREY: Color = Color(0.8, 0.8, 0.8);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontStyle {
    Regular,
    Bold,
    Oblique,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    FillRect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        color: Color,
    },
    /// `x` is the left edge of the text (alignment already resolved).
    Text {
        text: String,
        x: f32,
        y: f32,
        size: f32,
        style: FontStyle,
        color: Color,
    },
    Line {
        from: (f32, f32),
        to: (f32, f32),
        thickness: f32,
        color: Color,
    },
    /// Where the scan image goes; aspect ratio already applied.
    Image {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub ops: Vec<DrawOp>,
}

impl Page {
    pub fn texts(&self) -> impl Iterator<Item = (&str, f32)> {
        self.ops.iter().filter_map(|op| match op {
            DrawOp::Text { text, y, .. } => Some((text.as_str(), *y)),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportLayout {
    pub pages: Vec<Page>,
}

/// Approximate Helvetica advance width in points, for right and center alignment.
pub fn text_width(text: &str, size: f32) -> f32 {
    let em: f32 = text
        .chars()
        .map(|c| match c {
            'i' | 'j' | 'l' | '.' | ',' | ':' | ';' | '\'' | '!' | '|' | ' ' => 0.278,
            'f' | 't' | 'r' | 'I' | '(' | ')' | '-' => 0.333,
            'm' | 'w' | 'M' | 'W' => 0.833,
            c if c.is_ascii_uppercase() => 0.667,
            _ => 0.556,
        })
        .sum();
    em * size
}

/// Cursor over a growing list of pages.
struct Composer {
    pages: Vec<Page>,
    y: f32,
}

impl Composer {
    fn new(start_y: f32) -> Self {
        Self {
            pages: vec![Page::default()],
            y: start_y,
        }
    }

    fn page(&mut self) -> &mut Page {
        if self.pages.is_empty() {
            self.pages.push(Page::default());
        }
        let last = self.pages.len() - 1;
        &mut self.pages[last]
    }

    fn push(&mut self, op: DrawOp) {
        self.page().ops.push(op);
    }

    fn text(
        &mut self,
        text: impl Into<String>,
        x: f32,
        y: f32,
        size: f32,
        style: FontStyle,
        color: Color,
    ) {
        self.push(DrawOp::Text {
            text: text.into(),
            x,
            y,
            size,
            style,
            color,
        });
    }

    fn break_page(&mut self) {
        self.pages.push(Page::default());
        self.y = CONTINUATION_TOP_Y;
    }

    /// Start a new page when the cursor is below `min_y`.
    fn ensure(&mut self, min_y: f32) {
        if self.y < min_y {
            self.break_page();
        }
    }

    fn section(&mut self, section: &Section<'_>) {
        self.ensure(SECTION_MIN_Y);
        self.text(section.title, MARGIN_X, self.y, 12.0, FontStyle::Bold, Color::TEAL);
        self.y -= SECTION_TITLE_GAP;

        for item in section.items {
            self.ensure(ITEM_MIN_Y);
            self.text(item.title, MARGIN_X, self.y, 10.0, FontStyle::Bold, Color::BLACK);

            self.y -= ITEM_BODY_OFFSET;
            for line in wrap_text(item.body, WRAP_WIDTH) {
                // An item may be longer than the page; continue it on the next one.
                self.ensure(LINE_MIN_Y);
                self.text(line, MARGIN_X, self.y, 10.0, FontStyle::Regular, Color::BLACK);
                self.y -= BODY_LEADING;
            }
            self.y -= ITEM_GAP;
        }
        self.y -= SECTION_GAP;
    }

    fn footer(&mut self) {
        self.push(DrawOp::Line {
            from: (MARGIN_X, FOOTER_RULE_Y),
            to: (PAGE_WIDTH - MARGIN_X, FOOTER_RULE_Y),
            thickness: 0.5,
            color: Color::RULE_GREY,
        });
        for (line, y) in DISCLAIMER_LINES.iter().zip(FOOTER_LINE_YS) {
            self.text(*line, MARGIN_X, y, FOOTER_FONT_SIZE, FontStyle::Regular, Color::FOOTER_GREY);
        }
        for (line, y) in SIGNATURE_LINES.iter().zip(FOOTER_LINE_YS) {
            let x = PAGE_WIDTH - MARGIN_X - text_width(line, FOOTER_FONT_SIZE);
            self.text(*line, x, y, FOOTER_FONT_SIZE, FontStyle::Regular, Color::FOOTER_GREY);
        }
    }
}

/// Fit `(w, h)` inside the figure box, centered, keeping aspect ratio.
fn fit_figure(image_dims: (u32, u32), box_x: f32, box_y: f32) -> DrawOp {
    let (w, h) = (image_dims.0.max(1) as f32, image_dims.1.max(1) as f32);
    let scale = (FIGURE_WIDTH / w).min(FIGURE_HEIGHT / h);
    let (width, height) = (w * scale, h * scale);
    DrawOp::Image {
        x: box_x + (FIGURE_WIDTH - width) / 2.0,
        y: box_y + (FIGURE_HEIGHT - height) / 2.0,
        width,
        height,
    }
}

/// Lay out the full report. `image_dims` is `None` when the scan image is
/// unavailable; the educational text then starts higher on the first page.
pub fn layout_report(
    record: &ScanRecord,
    image_dims: Option<(u32, u32)>,
    sections: &[Section<'_>],
) -> ReportLayout {
    let top = PAGE_HEIGHT;
    let mut c = Composer::new(top);

    // Header band
    c.push(DrawOp::FillRect {
        x: 0.0,
        y: top - HEADER_BAND_HEIGHT,
        width: PAGE_WIDTH,
        height: HEADER_BAND_HEIGHT,
        color: Color::TEAL,
    });
    c.text(BRAND_TITLE, MARGIN_X, top - 60.0, 24.0, FontStyle::Bold, Color::WHITE);
    c.text(BRAND_SUBTITLE, MARGIN_X, top - 80.0, 12.0, FontStyle::Regular, Color::WHITE);

    // Patient details
    c.text("Patient Details", MARGIN_X, top - 140.0, 14.0, FontStyle::Bold, Color::BLACK);
    let y = top - 170.0;
    let date = record.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let details = [
        format!("ID: {}", record.patient_id),
        format!("Name: {}", record.patient_name),
        format!("Date: {date}"),
    ];
    for (i, line) in details.into_iter().enumerate() {
        let line_y = y - 20.0 * i as f32;
        c.text(line, MARGIN_X, line_y, 12.0, FontStyle::Regular, Color::BLACK);
    }

    // Diagnosis
    c.text("AI Diagnostic Analysis", MARGIN_X, y - 80.0, 14.0, FontStyle::Bold, Color::BLACK);
    let diagnosis_lines = [
        format!("Condition: {}", record.diagnosis()),
        format!("Confidence: {:.1}%", record.confidence * 100.0),
        format!(
            "Biological Age Est: {} Years ({} estimate)",
            record.biological_age, record.biological_age_basis
        ),
        format!("Cardio Risk: {}", record.cardiovascular_risk),
    ];
    for (i, line) in diagnosis_lines.into_iter().enumerate() {
        let line_y = y - 110.0 - 20.0 * i as f32;
        c.text(line, MARGIN_X, line_y, 12.0, FontStyle::Regular, Color::BLACK);
    }

    // Figure
    c.y = match image_dims {
        Some(dims) => {
            let box_x = (PAGE_WIDTH - FIGURE_WIDTH) / 2.0;
            c.push(fit_figure(dims, box_x, y - 425.0));
            let caption_x = (PAGE_WIDTH - text_width(FIGURE_CAPTION, 9.0)) / 2.0;
            c.text(
                FIGURE_CAPTION,
                caption_x,
                y - 440.0,
                9.0,
                FontStyle::Oblique,
                Color::CAPTION_GREY,
            );
            y - 480.0
        }
        None => y - 200.0,
    };

    for section in sections {
        c.section(section);
    }

    c.footer();
    ReportLayout { pages: c.pages }
}
