//! PDF page rasterization via Google PDFium.
//!
//! Each report PDF is loaded once and its pages rendered to PNG so the vision
//! model can read them. `PdfiumRenderer` holds no library handle: the upstream
//! `Pdfium` type is `!Send`, so each document binds the library again.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::ImageOutputFormat;
use pdfium_render::prelude::*;
use tracing::{debug, warn};

use super::ExtractionError;

/// Upper bound for either side of a rendered page.
const MAX_DIMENSION_PX: u32 = 4096;

const POINTS_PER_INCH: f32 = 72.0;

/// Rasterizes PDF pages. Implementations are blocking.
pub trait PdfPageRenderer: Send + Sync {
    /// Render the first `max_pages` pages to PNG bytes, in page order.
    /// A document with no pages is [`ExtractionError::NoPages`].
    fn render_pages(&self, pdf_bytes: &[u8], max_pages: usize, dpi: u32) -> Result<Vec<Vec<u8>>, ExtractionError>;
}

pub struct PdfiumRenderer;

impl PdfiumRenderer {
    /// Fails when the PDFium library cannot be bound.
    ///
    /// Lookup order: `PDFIUM_DYNAMIC_LIB_PATH`, the executable's directory
    /// (and its `pdfium/` or `lib/` subdirectory), then the system search path.
    pub fn new() -> Result<Self, ExtractionError> {
        bind_pdfium()?;
        Ok(Self)
    }
}

fn bind_pdfium() -> Result<Pdfium, ExtractionError> {
    if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        debug!(path = %path, "Binding PDFium from PDFIUM_DYNAMIC_LIB_PATH");
        let bindings = Pdfium::bind_to_library(&path).map_err(|e| ExtractionError::PdfRendering {
            page: 0,
            reason: format!("Failed to load PDFium from {path}: {e}"),
        })?;
        return Ok(Pdfium::new(bindings));
    }

    if let Some(exe_dir) = std::env::current_exe().ok().and_then(|exe| exe.parent().map(|p| p.to_path_buf())) {
        for dir in [exe_dir.clone(), exe_dir.join("pdfium"), exe_dir.join("lib")] {
            let lib_path = Pdfium::pdfium_platform_library_name_at_path(dir.to_string_lossy().as_ref());
            if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
                debug!(dir = %dir.display(), "Bound PDFium next to executable");
                return Ok(Pdfium::new(bindings));
            }
        }
    }

    let bindings = Pdfium::bind_to_system_library().map_err(|e| ExtractionError::PdfRendering {
        page: 0,
        reason: format!("PDFium library not found. Set PDFIUM_DYNAMIC_LIB_PATH or install PDFium: {e}"),
    })?;
    Ok(Pdfium::new(bindings))
}

fn map_load_error(e: PdfiumError) -> ExtractionError {
    let msg = e.to_string().to_lowercase();
    if msg.contains("password") || msg.contains("encrypt") {
        ExtractionError::PdfEncrypted
    } else {
        ExtractionError::PdfRendering {
            page: 0,
            reason: format!("Failed to load PDF: {e}"),
        }
    }
}

/// Pixel size of a rendered page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RenderSize {
    width: u32,
    height: u32,
    capped: bool,
}

/// Pixel size for a page at `dpi`, each side in `[1, MAX_DIMENSION_PX]`.
/// Oversized pages are scaled down with their aspect ratio kept.
fn render_dimensions(width_points: f32, height_points: f32, dpi: u32) -> RenderSize {
    let scale = dpi as f32 / POINTS_PER_INCH;
    let w = (width_points * scale).max(1.0);
    let h = (height_points * scale).max(1.0);

    let longest = w.max(h);
    if longest <= MAX_DIMENSION_PX as f32 {
        return RenderSize { width: w as u32, height: h as u32, capped: false };
    }
    let ratio = MAX_DIMENSION_PX as f32 / longest;
    RenderSize {
        width: ((w * ratio).round() as u32).clamp(1, MAX_DIMENSION_PX),
        height: ((h * ratio).round() as u32).clamp(1, MAX_DIMENSION_PX),
        capped: true,
    }
}

impl PdfPageRenderer for PdfiumRenderer {
    fn render_pages(&self, pdf_bytes: &[u8], max_pages: usize, dpi: u32) -> Result<Vec<Vec<u8>>, ExtractionError> {
        let pdfium = bind_pdfium()?;
        let document = pdfium.load_pdf_from_byte_slice(pdf_bytes, None).map_err(map_load_error)?;
        let pages = document.pages();

        let count = pages.len() as usize;
        if count == 0 {
            return Err(ExtractionError::NoPages);
        }
        if count > max_pages {
            warn!(count, max_pages, "PDF longer than page limit, extra pages skipped");
        }

        pages
            .iter()
            .take(max_pages)
            .enumerate()
            .map(|(index, page)| render_page(&page, index, dpi))
            .collect()
    }
}

fn render_page(page: &PdfPage, page_number: usize, dpi: u32) -> Result<Vec<u8>, ExtractionError> {
    let RenderSize { width, height, capped } = render_dimensions(page.width().value, page.height().value, dpi);
    if capped {
        warn!(page = page_number, width, height, "Page render capped at {MAX_DIMENSION_PX}px");
    }

    let config = PdfRenderConfig::new()
        .set_target_width(width as i32)
        .set_maximum_height(height as i32);
    let bitmap = page.render_with_config(&config).map_err(|e| ExtractionError::PdfRendering {
        page: page_number,
        reason: format!("Rendering failed: {e}"),
    })?;

    let mut cursor = Cursor::new(Vec::new());
    bitmap
        .as_image()
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| ExtractionError::ImageProcessing(format!("PNG encoding failed: {e}")))?;
    let png = cursor.into_inner();

    debug!(page = page_number, width, height, png_size = png.len(), "Rendered report page");
    Ok(png)
}

/// Renderer stub producing a 1x1 PNG for each of `page_count` pages.
pub struct MockPdfPageRenderer {
    page_count: usize,
    calls: AtomicUsize,
}

impl MockPdfPageRenderer {
    pub fn new(page_count: usize) -> Self {
        Self {
            page_count,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of documents rendered so far.
    pub fn render_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PdfPageRenderer for MockPdfPageRenderer {
    fn render_pages(&self, _pdf_bytes: &[u8], max_pages: usize, _dpi: u32) -> Result<Vec<Vec<u8>>, ExtractionError> {
        if self.page_count == 0 {
            return Err(ExtractionError::NoPages);
        }
        let rendered = self.page_count.min(max_pages);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![one_pixel_png(); rendered])
    }
}

fn one_pixel_png() -> Vec<u8> {
    vec![
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, // signature
        0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52, // IHDR
        0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, // 1x1
        0x08, 0x02, 0x00, 0x00, 0x00, 0x90, 0x77, 0x53, 0xDE, // 8-bit RGB + CRC
        0x00, 0x00, 0x00, 0x0C, 0x49, 0x44, 0x41, 0x54, // IDAT
        0x08, 0xD7, 0x63, 0xF8, 0xCF, 0xC0, 0x00, 0x00, //
        0x00, 0x02, 0x00, 0x01, 0xE2, 0x21, 0xBC, 0x33, //
        0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, // IEND
        0xAE, 0x42, 0x60, 0x82,
    ]
}
