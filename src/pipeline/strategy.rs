//! Ordered fallback plans.
//!
//! A classification becomes a `Vec<Strategy>`; the orchestrator tries each
//! in turn until one produces output. All converters share one contract
//! ([`Strategy::attempt`]), so the fallback order is plain data that can be
//! asserted on without running anything.

use super::document::convert_to_document;
use super::external::{ExternalConverter, ToolJob, ToolMode};
use super::fast::{convert_fast, FastPathSettings};
use super::transient::{remove_if_exists, TransientFiles};
use super::vector::trace_to_vector;
use crate::classify::Classification;
use crate::config::DocumentPage;
use crate::error::ConvertError;
use crate::format::Format;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

/// One way of producing the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// In-process codec.
    FastPath,
    /// The external tool, straight to the target.
    ExternalTool,
    /// Grayscale bitmap, then trace.
    GrayscaleTrace,
    /// 1-bit bitmap, then trace.
    MonochromeTrace,
    /// pdfium page embedding (with its own internal tiers).
    Document,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Strategy::FastPath => "fast path",
            Strategy::ExternalTool => "external tool",
            Strategy::GrayscaleTrace => "grayscale trace",
            Strategy::MonochromeTrace => "monochrome trace",
            Strategy::Document => "document",
        };
        f.write_str(s)
    }
}

/// Everything one strategy attempt reads.
#[derive(Debug, Clone, Copy)]
pub struct Attempt<'a> {
    /// Original input, or the normalised intermediate.
    pub input: &'a Path,
    pub input_format: &'a Format,
    pub output: &'a Path,
    pub target: &'a Format,
    /// Where intermediates go.
    pub work_dir: &'a Path,
}

/// The converters a plan can call on.
#[derive(Clone, Copy)]
pub struct Stages<'a> {
    pub tool: &'a dyn ExternalConverter,
    pub fast: FastPathSettings,
    pub page: DocumentPage,
}

/// Build the fallback plan for a classification.
///
/// - document target → `[Document]`
/// - fast path → `[FastPath, ExternalTool]` (the only re-dispatch)
/// - vector target from a raster input, tracer installed →
///   `[GrayscaleTrace, MonochromeTrace, ExternalTool]`
/// - anything else → `[ExternalTool]`
pub fn plan(
    classification: &Classification,
    input: &Format,
    target: &Format,
    tracer_available: bool,
) -> Vec<Strategy> {
    if classification.use_document_converter {
        return vec![Strategy::Document];
    }
    if classification.use_fast_path {
        return vec![Strategy::FastPath, Strategy::ExternalTool];
    }
    if target.is_vector() && !input.is_vector() && tracer_available {
        return vec![
            Strategy::GrayscaleTrace,
            Strategy::MonochromeTrace,
            Strategy::ExternalTool,
        ];
    }
    vec![Strategy::ExternalTool]
}

impl Strategy {
    /// Try to produce `attempt.output`. Any error is a signal to move on to
    /// the next strategy.
    pub async fn attempt(
        self,
        stages: &Stages<'_>,
        attempt: &Attempt<'_>,
        transient: &mut TransientFiles,
    ) -> Result<(), ConvertError> {
        match self {
            Strategy::FastPath => {
                convert_fast(attempt.input, attempt.output, attempt.target, stages.fast).await?;
            }
            Strategy::ExternalTool => {
                let job = ToolJob::direct(attempt.input, attempt.input_format, attempt.output, attempt.target);
                stages.tool.run(&job).await?;
            }
            Strategy::GrayscaleTrace => {
                trace_to_vector(stages.tool, ToolMode::Grayscale, attempt, transient).await?;
            }
            Strategy::MonochromeTrace => {
                trace_to_vector(stages.tool, ToolMode::Monochrome, attempt, transient).await?;
            }
            Strategy::Document => {
                let tier = convert_to_document(stages.tool, attempt, stages.page, transient).await?;
                debug!("Document produced by {:?} tier", tier);
            }
        }
        Ok(())
    }
}

/// Run `plan` in order, returning the strategy that succeeded.
///
/// On total failure the last error is returned, except that a later
/// `ToolUnavailable` never hides an earlier, more specific failure.
pub async fn run_plan(
    plan: &[Strategy],
    stages: &Stages<'_>,
    attempt: &Attempt<'_>,
    transient: &mut TransientFiles,
) -> Result<Strategy, ConvertError> {
    let mut last_err: Option<ConvertError> = None;

    for (i, strategy) in plan.iter().copied().enumerate() {
        debug!("Attempting {} ({}/{})", strategy, i + 1, plan.len());
        match strategy.attempt(stages, attempt, transient).await {
            Ok(()) => return Ok(strategy),
            Err(e) => {
                warn!(
                    "{} failed for {}: {}",
                    strategy,
                    attempt.target,
                    e.detail().map(str::to_string).unwrap_or_else(|| e.to_string())
                );
                if let Err(io) = remove_if_exists(attempt.output) {
                    warn!("Could not remove partial output {}: {}", attempt.output.display(), io);
                }
                last_err = Some(match (last_err.take(), e) {
                    (Some(prev), ConvertError::ToolUnavailable { .. }) => prev,
                    (_, e) => e,
                });
            }
        }
    }

    Err(last_err.unwrap_or_else(|| ConvertError::Internal("empty conversion plan".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::ToolProbe;
    use crate::error::FailureCause;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn fast() -> Classification {
        Classification {
            use_fast_path: true,
            ..Default::default()
        }
    }

    #[test]
    fn document_plan() {
        let c = Classification {
            use_document_converter: true,
            ..Default::default()
        };
        assert_eq!(plan(&c, &Format::Png, &Format::Pdf, true), [Strategy::Document]);
    }

    #[test]
    fn fast_plan_falls_back_once_to_tool() {
        assert_eq!(
            plan(&fast(), &Format::Png, &Format::Jpeg, false),
            [Strategy::FastPath, Strategy::ExternalTool]
        );
    }

    #[test]
    fn vector_plan_order() {
        let c = Classification::default();
        assert_eq!(
            plan(&c, &Format::Png, &Format::Svg, true),
            [
                Strategy::GrayscaleTrace,
                Strategy::MonochromeTrace,
                Strategy::ExternalTool
            ]
        );
        // no tracer: straight to the tool
        assert_eq!(plan(&c, &Format::Png, &Format::Svg, false), [Strategy::ExternalTool]);
        // vector to vector needs no tracing
        assert_eq!(plan(&c, &Format::Eps, &Format::Svg, true), [Strategy::ExternalTool]);
    }

    /// Records calls and fails every `run` with a fixed error.
    struct FailingTool {
        calls: Mutex<Vec<String>>,
        unavailable: bool,
    }

    #[async_trait]
    impl ExternalConverter for FailingTool {
        fn is_available(&self) -> bool {
            !self.unavailable
        }
        fn tracer_available(&self) -> bool {
            false
        }
        async fn probe(&self) -> ToolProbe {
            ToolProbe::default()
        }
        async fn run(&self, job: &ToolJob) -> Result<(), ConvertError> {
            self.calls.lock().unwrap().push(format!("{:?}", job.mode));
            if self.unavailable {
                Err(ConvertError::ToolUnavailable { tool: "fake".into() })
            } else {
                Err(ConvertError::failed(FailureCause::ToolFailed, job.target.token(), "fake failure"))
            }
        }
        async fn trace(&self, _: &Path, _: &Path, _: &Format) -> Result<(), ConvertError> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn tool_absence_does_not_hide_codec_error() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("corrupt.png");
        std::fs::write(&input, b"garbage").unwrap();
        let output = dir.path().join("out.jpg");
        let tool = FailingTool {
            calls: Mutex::new(vec![]),
            unavailable: true,
        };
        let stages = Stages {
            tool: &tool,
            fast: FastPathSettings::default(),
            page: DocumentPage::default(),
        };
        let attempt = Attempt {
            input: &input,
            input_format: &Format::Png,
            output: &output,
            target: &Format::Jpeg,
            work_dir: dir.path(),
        };
        let mut transient = TransientFiles::new();
        let err = run_plan(
            &[Strategy::FastPath, Strategy::ExternalTool],
            &stages,
            &attempt,
            &mut transient,
        )
        .await
        .unwrap_err();
        assert_eq!(err.cause(), Some(FailureCause::DecodeUnsupported));
        assert_eq!(tool.calls.lock().unwrap().as_slice(), ["Direct"]);
    }

    #[tokio::test]
    async fn last_substantive_error_wins() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.png");
        std::fs::write(&input, b"garbage").unwrap();
        let output = dir.path().join("out.svg");
        let tool = FailingTool {
            calls: Mutex::new(vec![]),
            unavailable: false,
        };
        let stages = Stages {
            tool: &tool,
            fast: FastPathSettings::default(),
            page: DocumentPage::default(),
        };
        let attempt = Attempt {
            input: &input,
            input_format: &Format::Png,
            output: &output,
            target: &Format::Svg,
            work_dir: dir.path(),
        };
        let mut transient = TransientFiles::new();
        let err = run_plan(
            &[
                Strategy::GrayscaleTrace,
                Strategy::MonochromeTrace,
                Strategy::ExternalTool,
            ],
            &stages,
            &attempt,
            &mut transient,
        )
        .await
        .unwrap_err();
        assert_eq!(err.cause(), Some(FailureCause::ToolFailed));
        assert_eq!(
            tool.calls.lock().unwrap().as_slice(),
            ["Grayscale", "Monochrome", "Direct"]
        );
        // two bitmaps were registered for cleanup
        assert_eq!(transient.tracked().len(), 2);
    }

    #[tokio::test]
    async fn empty_plan_is_internal_error() {
        let dir = TempDir::new().unwrap();
        let tool = FailingTool {
            calls: Mutex::new(vec![]),
            unavailable: true,
        };
        let stages = Stages {
            tool: &tool,
            fast: FastPathSettings::default(),
            page: DocumentPage::default(),
        };
        let out = dir.path().join("o.png");
        let attempt = Attempt {
            input: &out,
            input_format: &Format::Png,
            output: &out,
            target: &Format::Png,
            work_dir: dir.path(),
        };
        let err = run_plan(&[], &stages, &attempt, &mut TransientFiles::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Internal(_)));
    }
}
