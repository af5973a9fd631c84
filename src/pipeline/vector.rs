//! Raster-to-vector synthesis through a bitmap tracer.
//!
//! The external tool renders the raster to a bitmap (grayscale PGM or 1-bit
//! PBM) and potrace traces that bitmap into SVG, EPS, PS or AI. The
//! orchestrator runs the tiers grayscale trace, monochrome trace, direct
//! tool conversion, in that order (see [`super::strategy::plan`]).

use super::external::{ExternalConverter, ToolJob, ToolMode};
use super::strategy::Attempt;
use super::transient::TransientFiles;
use crate::error::ConvertError;
use tracing::debug;

/// One tracing tier: bitmap in `mode`, then trace into the attempt's output.
pub async fn trace_to_vector(
    tool: &dyn ExternalConverter,
    mode: ToolMode,
    attempt: &Attempt<'_>,
    transient: &mut TransientFiles,
) -> Result<(), ConvertError> {
    let ext = if mode == ToolMode::Monochrome { "pbm" } else { "pgm" };
    let bitmap = super::unique_path(attempt.work_dir, ext);
    transient.track(&bitmap);

    tool.run(&ToolJob::bitmap(attempt.input, attempt.input_format, &bitmap, mode))
        .await?;
    debug!("Rendered {:?} bitmap {}", mode, bitmap.display());
    tool.trace(&bitmap, attempt.output, attempt.target).await
}
