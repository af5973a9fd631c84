//! Pre-processing: flatten exotic inputs to a single-frame PNG.
//!
//! Layered (PSD, XCF), camera RAW, HEIF and multi-page document inputs are
//! handed to the external tool once to produce a plain raster the main
//! conversion can work from. A failure here is not fatal: the orchestrator
//! logs it and converts the original input directly.

use super::external::{ExternalConverter, ToolJob};
use super::transient::TransientFiles;
use crate::error::ConvertError;
use crate::format::Format;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Normalise `input` into a fresh PNG under `work_dir`.
///
/// The intermediate is registered with `transient` before the tool runs, so
/// a partial file is removed even when the tool fails.
pub async fn preprocess(
    tool: &dyn ExternalConverter,
    input: &Path,
    input_format: &Format,
    work_dir: &Path,
    transient: &mut TransientFiles,
) -> Result<PathBuf, ConvertError> {
    let normalized = super::unique_path(work_dir, "png");
    transient.track(&normalized);
    tool.run(&ToolJob::normalize(input, input_format, &normalized)).await?;
    debug!(
        "Normalised {} input {} → {}",
        input_format,
        input.display(),
        normalized.display()
    );
    Ok(normalized)
}
