//! PDF page rasterization via Google PDFium.
//!
//! Each lab-report page is rendered to PNG for the vision model.
//! `PdfiumRenderer` holds no library handle: the upstream `Pdfium` type is
//! `!Send`, so every call binds the library afresh (the OS caches the
//! `dlopen`, repeat binds are cheap).

use std::io::Cursor;

use image::ImageOutputFormat;
use pdfium_render::prelude::*;
use tracing::{debug, warn};

use super::types::PdfPageRenderer;
use super::ExtractionError;

/// Longest allowed side of a rendered page, in pixels.
const MAX_DIMENSION_PX: u32 = 4096;

const POINTS_PER_INCH: f32 = 72.0;

pub struct PdfiumRenderer;

impl PdfiumRenderer {
    /// Create a renderer, failing early if PDFium cannot be bound.
    pub fn new() -> Result<Self, ExtractionError> {
        bind_pdfium()?;
        Ok(Self)
    }
}

/// Bind the PDFium dynamic library.
///
/// Lookup: `PDFIUM_DYNAMIC_LIB_PATH`, then the executable's directory
/// (and `<exe_dir>/pdfium/lib`), then the system search path.
fn bind_pdfium() -> Result<Pdfium, ExtractionError> {
    let bind_error = |reason: String| ExtractionError::PdfRendering { page: 0, reason };

    if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        debug!(path = %path, "Binding PDFium from PDFIUM_DYNAMIC_LIB_PATH");
        return Pdfium::bind_to_library(&path)
            .map(Pdfium::new)
            .map_err(|e| bind_error(format!("Failed to load PDFium from {path}: {e}")));
    }

    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.to_path_buf()))
    {
        for dir in [exe_dir.clone(), exe_dir.join("pdfium").join("lib")] {
            let lib_path =
                Pdfium::pdfium_platform_library_name_at_path(dir.to_string_lossy().as_ref());
            if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
                debug!(dir = %dir.display(), "Bound PDFium next to executable");
                return Ok(Pdfium::new(bindings));
            }
        }
    }

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| {
            bind_error(format!(
                "PDFium library not found. Set PDFIUM_DYNAMIC_LIB_PATH or install PDFium: {e}"
            ))
        })
}

/// Password-protected uploads get their own error; anything else is a
/// rendering failure on page 0.
fn map_load_error(e: PdfiumError) -> ExtractionError {
    let msg = e.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        ExtractionError::PdfEncrypted
    } else {
        ExtractionError::PdfRendering {
            page: 0,
            reason: format!("Failed to load PDF: {msg}"),
        }
    }
}

/// Pixel size for a page of `width_points` x `height_points` at `dpi`,
/// scaled down (aspect preserved) so neither side exceeds
/// `MAX_DIMENSION_PX`. Both sides are at least 1.
fn target_dimensions(width_points: f32, height_points: f32, dpi: u32) -> (u32, u32) {
    let scale = dpi as f32 / POINTS_PER_INCH;
    let w = (width_points * scale).max(1.0);
    let h = (height_points * scale).max(1.0);

    let longest = w.max(h);
    let shrink = if longest > MAX_DIMENSION_PX as f32 {
        MAX_DIMENSION_PX as f32 / longest
    } else {
        1.0
    };

    let clamp = |v: f32| ((v * shrink) as u32).clamp(1, MAX_DIMENSION_PX);
    (clamp(w), clamp(h))
}

impl PdfPageRenderer for PdfiumRenderer {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, ExtractionError> {
        let pdfium = bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(map_load_error)?;
        Ok(document.pages().len() as usize)
    }

    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_number: usize,
        dpi: u32,
    ) -> Result<Vec<u8>, ExtractionError> {
        let render_error = |reason: String| ExtractionError::PdfRendering {
            page: page_number,
            reason,
        };

        let pdfium = bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(map_load_error)?;
        let pages = document.pages();

        let index = u16::try_from(page_number)
            .map_err(|_| render_error(format!("Page index {page_number} exceeds u16")))?;
        let page = pages.get(index).map_err(|_| {
            render_error(format!(
                "Page {page_number} out of range (document has {} pages)",
                pages.len()
            ))
        })?;

        let (width, height) = target_dimensions(page.width().value, page.height().value, dpi);
        if width == MAX_DIMENSION_PX || height == MAX_DIMENSION_PX {
            warn!(page = page_number, width, height, dpi, "Rendered page size capped");
        }

        let config = PdfRenderConfig::new()
            .set_target_width(width as i32)
            .set_maximum_height(height as i32);
        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| render_error(format!("Rendering failed: {e}")))?;

        let mut png = Cursor::new(Vec::new());
        bitmap
            .as_image()
            .write_to(&mut png, ImageOutputFormat::Png)
            .map_err(|e| ExtractionError::ImageProcessing(format!("PNG encoding failed: {e}")))?;
        let png = png.into_inner();

        debug!(page = page_number, width, height, bytes = png.len(), "Rendered PDF page");
        Ok(png)
    }
}

// ── Mock for testing ──────────────────────────────────────

/// Renderer returning a 1x1 PNG per page, for tests that must not depend
/// on the PDFium binary. `failing_on` makes one page fail to render.
pub struct MockPdfPageRenderer {
    page_count: usize,
    fail_on_page: Option<usize>,
}

impl MockPdfPageRenderer {
    pub fn new(page_count: usize) -> Self {
        Self {
            page_count,
            fail_on_page: None,
        }
    }

    pub fn failing_on(mut self, page_number: usize) -> Self {
        self.fail_on_page = Some(page_number);
        self
    }
}

impl PdfPageRenderer for MockPdfPageRenderer {
    fn page_count(&self, _pdf_bytes: &[u8]) -> Result<usize, ExtractionError> {
        Ok(self.page_count)
    }

    fn render_page(
        &self,
        _pdf_bytes: &[u8],
        page_number: usize,
        _dpi: u32,
    ) -> Result<Vec<u8>, ExtractionError> {
        if self.fail_on_page == Some(page_number) || page_number >= self.page_count {
            return Err(ExtractionError::PdfRendering {
                page: page_number,
                reason: format!("mock cannot render page {page_number}"),
            });
        }
        Ok(minimal_png())
    }
}

/// Minimal valid 1x1 PNG.
pub fn minimal_png() -> Vec<u8> {
    vec![
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, // signature
        0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52, // IHDR
        0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, // 1x1
        0x08, 0x02, 0x00, 0x00, 0x00, 0x90, 0x77, 0x53, // 8-bit RGB
        0xDE, //
        0x00, 0x00, 0x00, 0x0C, 0x49, 0x44, 0x41, 0x54, // IDAT
        0x08, 0xD7, 0x63, 0xF8, 0xCF, 0xC0, 0x00, 0x00, //
        0x00, 0x02, 0x00, 0x01, 0xE2, 0x21, 0xBC, 0x33, //
        0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, // IEND
        0xAE, 0x42, 0x60, 0x82,
    ]
}
