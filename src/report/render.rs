use std::io::BufWriter;

use ::image::DynamicImage;
use printpdf::path::PaintMode;
use printpdf::*;

use super::layout::{self, DrawOp, FontStyle, ReportLayout, PAGE_HEIGHT, PAGE_WIDTH};
use super::ReportError;

/// Longest edge of the embedded scan; larger uploads are downscaled first.
const MAX_EMBED_EDGE: u32 = 1200;

/// PDF points → printpdf millimetres.
fn mm(pt: f32) -> Mm {
    Mm(pt * 25.4 / 72.0)
}

fn pdf_color(c: layout::Color) -> Color {
    Color::Rgb(Rgb::new(c.0, c.1, c.2, None))
}

struct Fonts {
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    oblique: IndirectFontRef,
}

impl Fonts {
    fn load(doc: &PdfDocumentReference) -> Result<Self, ReportError> {
        let font = |f: BuiltinFont| {
            doc.add_builtin_font(f)
                .map_err(|e| ReportError::Pdf(format!("PDF font error: {e}")))
        };
        Ok(Self {
            regular: font(BuiltinFont::Helvetica)?,
            bold: font(BuiltinFont::HelveticaBold)?,
            oblique: font(BuiltinFont::HelveticaOblique)?,
        })
    }

    fn get(&self, style: FontStyle) -> &IndirectFontRef {
        match style {
            FontStyle::Regular => &self.regular,
            FontStyle::Bold => &self.bold,
            FontStyle::Oblique => &self.oblique,
        }
    }
}

/// Draw a computed layout. `image` fills every `DrawOp::Image` slot.
pub fn render_pdf(
    layout: &ReportLayout,
    title: &str,
    image: Option<&DynamicImage>,
) -> Result<Vec<u8>, ReportError> {
    let (doc, page1, layer1) = PdfDocument::new(title, mm(PAGE_WIDTH), mm(PAGE_HEIGHT), "Layer 1");
    let fonts = Fonts::load(&doc)?;

    let embedded = image.map(|img| {
        let img = if img.width().max(img.height()) > MAX_EMBED_EDGE {
            img.thumbnail(MAX_EMBED_EDGE, MAX_EMBED_EDGE)
        } else {
            img.clone()
        };
        DynamicImage::ImageRgb8(img.to_rgb8())
    });

    for (index, page) in layout.pages.iter().enumerate() {
        let layer = if index == 0 {
            doc.get_page(page1).get_layer(layer1)
        } else {
            let name = format!("Page {}", index + 1);
            let (p, l) = doc.add_page(mm(PAGE_WIDTH), mm(PAGE_HEIGHT), name);
            doc.get_page(p).get_layer(l)
        };

        for op in &page.ops {
            match op {
                DrawOp::FillRect {
                    x,
                    y,
                    width,
                    height,
                    color,
                } => {
                    layer.set_fill_color(pdf_color(*color));
                    let rect = Rect::new(mm(*x), mm(*y), mm(x + width), mm(y + height))
                        .with_mode(PaintMode::Fill);
                    layer.add_rect(rect);
                }
                DrawOp::Text {
                    text,
                    x,
                    y,
                    size,
                    style,
                    color,
                } => {
                    layer.set_fill_color(pdf_color(*color));
                    layer.use_text(text.as_str(), *size, mm(*x), mm(*y), fonts.get(*style));
                }
                DrawOp::Line {
                    from,
                    to,
                    thickness,
                    color,
                } => {
                    layer.set_outline_color(pdf_color(*color));
                    layer.set_outline_thickness(*thickness);
                    layer.add_line(Line {
                        points: vec![
                            (Point::new(mm(from.0), mm(from.1)), false),
                            (Point::new(mm(to.0), mm(to.1)), false),
                        ],
                        is_closed: false,
                    });
                }
                DrawOp::Image {
                    x,
                    y,
                    width,
                    height,
                } => {
                    let Some(img) = embedded.as_ref() else {
                        continue;
                    };
                    let (px_w, px_h) = (img.width().max(1) as f32, img.height().max(1) as f32);
                    // At 72 dpi one pixel is one point.
                    Image::from_dynamic_image(img).add_to_layer(
                        layer.clone(),
                        ImageTransform {
                            translate_x: Some(mm(*x)),
                            translate_y: Some(mm(*y)),
                            scale_x: Some(width / px_w),
                            scale_y: Some(height / px_h),
                            dpi: Some(72.0),
                            ..Default::default()
                        },
                    );
                }
            }
        }
    }

    let mut buf = BufWriter::new(Vec::new());
    doc.save(&mut buf)
        .map_err(|e| ReportError::Pdf(format!("PDF save error: {e}")))?;
    buf.into_inner()
        .map_err(|e| ReportError::Pdf(format!("PDF buffer error: {e}")))
}
