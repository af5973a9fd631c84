//! Document converter: place a raster image on a PDF page via pdfium.
//!
//! Three tiers, tried in order:
//!
//! 1. **Native page**: a page exactly the image's size (1 px = 1 pt), the
//!    image filling it.
//! 2. **Fitted page**: the configured default page (US Letter), the image
//!    scaled to fit the fit box and centred. Used when tier 1 cannot embed,
//!    e.g. the image is larger than the largest page PDF allows.
//! 3. **Normalised**: the external tool flattens the input to PNG first,
//!    then tier 2 is retried. Used when the codec cannot decode the input.
//!
//! pdfium is not async-safe, so each attempt runs inside `spawn_blocking`.

use super::external::{ExternalConverter, ToolJob};
use super::strategy::Attempt;
use super::transient::TransientFiles;
use crate::config::DocumentPage;
use crate::error::{ConvertError, FailureCause};
use crate::format::Format;
use image::DynamicImage;
use pdfium_render::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Display name of the PDF library in user-facing errors.
pub const PDFIUM_NAME: &str = "PDFium";

/// Largest page edge PDF viewers accept (200 inches).
pub const MAX_PAGE_PT: f32 = 14_400.0;

/// Which tier produced the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentTier {
    Native,
    Fitted,
    Normalized,
}

/// Page size and image rectangle, in points, origin bottom-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub page_width: f32,
    pub page_height: f32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Page the size of the image. `None` if the image cannot get its own page.
pub fn native_placement(width_px: u32, height_px: u32) -> Option<Placement> {
    let (w, h) = (width_px as f32, height_px as f32);
    if w <= 0.0 || h <= 0.0 || w > MAX_PAGE_PT || h > MAX_PAGE_PT {
        return None;
    }
    Some(Placement {
        page_width: w,
        page_height: h,
        x: 0.0,
        y: 0.0,
        width: w,
        height: h,
    })
}

/// Scale the image into `page.fit_box_pt` (both ways, aspect kept) and
/// centre it on the page.
pub fn fit_placement(width_px: u32, height_px: u32, page: DocumentPage) -> Placement {
    let (w, h) = (width_px.max(1) as f32, height_px.max(1) as f32);
    let scale = (page.fit_box_pt / w).min(page.fit_box_pt / h);
    let (width, height) = (w * scale, h * scale);
    Placement {
        page_width: page.width_pt,
        page_height: page.height_pt,
        x: (page.width_pt - width) / 2.0,
        y: (page.height_pt - height) / 2.0,
        width,
        height,
    }
}

/// Embed `input` as a one-page PDF at `output`.
pub async fn convert_to_document(
    tool: &dyn ExternalConverter,
    attempt: &Attempt<'_>,
    page: DocumentPage,
    transient: &mut TransientFiles,
) -> Result<DocumentTier, ConvertError> {
    let (input, output) = (attempt.input, attempt.output);
    let first = embed(input.to_path_buf(), output.to_path_buf(), page, true).await;
    let first_err = match first {
        Ok(tier) => return Ok(tier),
        Err(e @ ConvertError::ToolUnavailable { .. }) => return Err(e),
        Err(e) => e,
    };
    warn!(
        "Embedding {} failed ({}), normalising with external tool",
        input.display(),
        first_err.detail().unwrap_or("unknown")
    );

    let normalized = super::unique_path(attempt.work_dir, "png");
    transient.track(&normalized);
    if let Err(e) = tool
        .run(&ToolJob::normalize(input, attempt.input_format, &normalized))
        .await
    {
        warn!("Normalising for document failed: {}", e);
        return Err(document_failure(&first_err, Some(&e)));
    }

    match embed(normalized, output.to_path_buf(), page, false).await {
        Ok(_) => Ok(DocumentTier::Normalized),
        Err(e) => Err(document_failure(&first_err, Some(&e))),
    }
}

fn document_failure(first: &ConvertError, last: Option<&ConvertError>) -> ConvertError {
    let mut detail = first.detail().unwrap_or_default().to_string();
    if let Some(last) = last {
        detail.push_str("; then: ");
        detail.push_str(last.detail().unwrap_or(&last.to_string()));
    }
    ConvertError::failed(FailureCause::Document, Format::Pdf.token(), detail)
}

/// Tiers 1 and 2 (or tier 2 only) on the blocking pool.
async fn embed(
    input: PathBuf,
    output: PathBuf,
    page: DocumentPage,
    try_native: bool,
) -> Result<DocumentTier, ConvertError> {
    tokio::task::spawn_blocking(move || embed_blocking(&input, &output, page, try_native))
        .await
        .map_err(|e| ConvertError::failed(FailureCause::Document, "pdf", format!("document task panicked: {e}")))?
}

fn embed_blocking(
    input: &Path,
    output: &Path,
    page: DocumentPage,
    try_native: bool,
) -> Result<DocumentTier, ConvertError> {
    let pdfium = bind_pdfium()?;
    let img = image::ImageReader::open(input)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| ConvertError::failed(FailureCause::DecodeUnsupported, "pdf", e.to_string()))?
        .decode()
        .map_err(|e| ConvertError::failed(FailureCause::DecodeUnsupported, "pdf", e.to_string()))?;
    let (w, h) = (img.width(), img.height());

    if try_native {
        match native_placement(w, h) {
            Some(p) => match write_pdf(&pdfium, &img, &p, output) {
                Ok(()) => {
                    info!("Embedded {}x{} image on a native-size page", w, h);
                    return Ok(DocumentTier::Native);
                }
                Err(e) => warn!("Native-size page failed: {:?}", e),
            },
            None => debug!("{}x{} image exceeds the page limit, fitting instead", w, h),
        }
    }

    let p = fit_placement(w, h, page);
    write_pdf(&pdfium, &img, &p, output)
        .map_err(|e| ConvertError::failed(FailureCause::Document, "pdf", format!("{e:?}")))?;
    info!(
        "Embedded {}x{} image fitted to {}x{} pt page",
        w, h, page.width_pt, page.height_pt
    );
    Ok(DocumentTier::Fitted)
}

fn write_pdf(pdfium: &Pdfium, img: &DynamicImage, p: &Placement, output: &Path) -> Result<(), PdfiumError> {
    let mut document = pdfium.create_new_pdf()?;
    {
        let mut pdf_page = document.pages_mut().create_page_at_end(PdfPagePaperSize::from_points(
            PdfPoints::new(p.page_width),
            PdfPoints::new(p.page_height),
        ))?;
        pdf_page.objects_mut().create_image_object(
            PdfPoints::new(p.x),
            PdfPoints::new(p.y),
            img,
            Some(PdfPoints::new(p.width)),
            Some(PdfPoints::new(p.height)),
        )?;
    }
    document.save_to_file(output)?;
    Ok(())
}

/// Bind to `PDFIUM_LIB_PATH`, a library next to the binary, or the system
/// library, in that order.
pub fn bind_pdfium() -> Result<Pdfium, ConvertError> {
    let bindings = match std::env::var_os("PDFIUM_LIB_PATH") {
        Some(p) if Path::new(&p).exists() => Pdfium::bind_to_library(Path::new(&p)),
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| {
        warn!("Failed to bind to pdfium: {:?}", e);
        ConvertError::ToolUnavailable {
            tool: PDFIUM_NAME.into(),
        }
    })?;
    Ok(Pdfium::new(bindings))
}

/// Whether a PDFium library can be bound.
pub fn pdfium_available() -> bool {
    bind_pdfium().is_ok()
}
