//! Clinical PDF report for a stored scan.

pub mod content;
pub mod layout;
pub mod render;

use std::path::Path;

use image::DynamicImage;
use thiserror::Error;

use crate::models::scan::ScanRecord;
use content::EDUCATIONAL_SECTIONS;
use layout::layout_report;
use render::render_pdf;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("PDF generation failed: {0}")]
    Pdf(String),

    #[error("Report task failed: {0}")]
    Task(String),
}

/// Attachment name for a scan's report.
pub fn report_file_name(record: &ScanRecord) -> String {
    format!("report_{}.pdf", record.id)
}

/// Load the stored scan image. A missing or unreadable file yields `None`
/// and the report is laid out without the figure.
pub fn load_scan_image(path: &Path) -> Option<DynamicImage> {
    match image::open(path) {
        Ok(img) => Some(img),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Scan image unavailable for report");
            None
        }
    }
}

/// Build the full report for `record`.
pub fn generate_report(
    record: &ScanRecord,
    image: Option<&DynamicImage>,
) -> Result<Vec<u8>, ReportError> {
    let dims = image.map(|img| (img.width(), img.height()));
    let layout = layout_report(record, dims, &EDUCATIONAL_SECTIONS);
    let title = format!("RetiNet report {}", record.id);
    let bytes = render_pdf(&layout, &title, image)?;

    tracing::info!(
        scan_id = %record.id,
        pages = layout.pages.len(),
        with_image = image.is_some(),
        bytes = bytes.len(),
        "Report rendered"
    );
    Ok(bytes)
}
