//! External-tool converter: ImageMagick (and potrace) as subprocesses.
//!
//! The orchestrator only sees the [`ExternalConverter`] trait. The production
//! implementation, [`MagickConverter`], locates `magick` (ImageMagick 7) or
//! `convert` (ImageMagick 6) on `PATH`, builds a per-target argument list,
//! and runs the tool under a timeout with `kill_on_drop`, so a hung
//! conversion is killed rather than leaked.
//!
//! An invocation fails when the tool exits non-zero, or when it leaves no
//! output file, or an empty one. Failure text is mapped to a
//! [`FailureCause`]; the raw stderr only goes to the log.

use crate::capabilities::{parse_format_list, parse_version, ToolInfo, ToolProbe};
use crate::config::ConverterConfig;
use crate::error::{ConvertError, FailureCause};
use crate::format::Format;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Display name of the conversion tool in user-facing errors.
pub const TOOL_NAME: &str = "ImageMagick";
/// Display name of the bitmap tracer.
pub const TRACER_NAME: &str = "potrace";

/// Rasterisation density for vector and document inputs.
const INPUT_DENSITY: &str = "150";
const ICON_SIZES: &str = "icon:auto-resize=256,128,64,48,32,16";

/// What an invocation of the tool is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolMode {
    /// Convert straight to the target format.
    Direct,
    /// Flatten an exotic input to a single-frame PNG.
    Normalize,
    /// Flatten to a grayscale PGM bitmap for tracing.
    Grayscale,
    /// Threshold to a 1-bit PBM bitmap for tracing.
    Monochrome,
}

/// One invocation of the external tool.
#[derive(Debug, Clone)]
pub struct ToolJob {
    pub input: PathBuf,
    pub input_format: Format,
    pub output: PathBuf,
    pub target: Format,
    pub mode: ToolMode,
}

impl ToolJob {
    pub fn direct(input: &Path, input_format: &Format, output: &Path, target: &Format) -> Self {
        Self {
            input: input.to_path_buf(),
            input_format: input_format.clone(),
            output: output.to_path_buf(),
            target: target.clone(),
            mode: ToolMode::Direct,
        }
    }

    pub fn normalize(input: &Path, input_format: &Format, output: &Path) -> Self {
        Self {
            input: input.to_path_buf(),
            input_format: input_format.clone(),
            output: output.to_path_buf(),
            target: Format::Png,
            mode: ToolMode::Normalize,
        }
    }

    /// Bitmap for the tracer. `mode` must be `Grayscale` or `Monochrome`.
    pub fn bitmap(input: &Path, input_format: &Format, output: &Path, mode: ToolMode) -> Self {
        let token = if mode == ToolMode::Monochrome { "pbm" } else { "pgm" };
        Self {
            input: input.to_path_buf(),
            input_format: input_format.clone(),
            output: output.to_path_buf(),
            target: Format::from_token(token),
            mode,
        }
    }
}

/// Capability interface over the external conversion tool.
///
/// Implementations must report failures as [`ConvertError`]: a missing
/// binary as `ToolUnavailable`, everything else as `ConversionFailed` with a
/// cause. A successful return means a non-empty output file exists.
#[async_trait]
pub trait ExternalConverter: Send + Sync {
    /// Whether the conversion tool is installed.
    fn is_available(&self) -> bool;

    /// Whether the bitmap tracer is installed.
    fn tracer_available(&self) -> bool;

    /// Identify the tool and list the formats it supports.
    async fn probe(&self) -> ToolProbe;

    /// Run one conversion.
    async fn run(&self, job: &ToolJob) -> Result<(), ConvertError>;

    /// Trace a PBM/PGM bitmap into vector `target` at `output`.
    async fn trace(&self, bitmap: &Path, output: &Path, target: &Format) -> Result<(), ConvertError>;
}

/// ImageMagick + potrace, invoked as subprocesses.
#[derive(Debug, Clone)]
pub struct MagickConverter {
    magick: Option<PathBuf>,
    potrace: Option<PathBuf>,
    timeout: Duration,
    quality: u8,
}

impl MagickConverter {
    /// Find the binaries, honouring explicit paths in `config`.
    pub fn locate(config: &ConverterConfig) -> Self {
        let magick = match &config.magick_path {
            Some(p) => which::which(p).ok(),
            None => which::which("magick")
                .or_else(|_| which::which("convert"))
                .ok(),
        };
        let potrace = match &config.potrace_path {
            Some(p) => which::which(p).ok(),
            None => which::which("potrace").ok(),
        };
        match &magick {
            Some(p) => debug!("Found {} at {}", TOOL_NAME, p.display()),
            None => warn!("{} not found; advanced formats are disabled", TOOL_NAME),
        }
        if potrace.is_none() {
            debug!("{} not found; raster-to-vector tracing is disabled", TRACER_NAME);
        }
        Self::with_paths(
            magick,
            potrace,
            Duration::from_secs(config.tool_timeout_secs),
            config.jpeg_quality,
        )
    }

    pub fn with_paths(
        magick: Option<PathBuf>,
        potrace: Option<PathBuf>,
        timeout: Duration,
        quality: u8,
    ) -> Self {
        Self {
            magick,
            potrace,
            timeout,
            quality,
        }
    }

    async fn list(&self, magick: &Path, args: &[&str]) -> Option<String> {
        let args: Vec<OsString> = args.iter().map(OsString::from).collect();
        match exec(magick, &args, self.timeout).await {
            Ok(out) if out.status.success() => Some(String::from_utf8_lossy(&out.stdout).into_owned()),
            Ok(out) => {
                warn!(
                    "{} {:?} exited with {}: {}",
                    TOOL_NAME,
                    args,
                    out.status,
                    String::from_utf8_lossy(&out.stderr).trim()
                );
                None
            }
            Err(e) => {
                warn!("{} {:?} failed: {}", TOOL_NAME, args, e.describe());
                None
            }
        }
    }
}

#[async_trait]
impl ExternalConverter for MagickConverter {
    fn is_available(&self) -> bool {
        self.magick.is_some()
    }

    fn tracer_available(&self) -> bool {
        self.potrace.is_some()
    }

    async fn probe(&self) -> ToolProbe {
        let tracer_available = self.tracer_available();
        let Some(magick) = self.magick.as_deref() else {
            return ToolProbe {
                tool: None,
                formats: Vec::new(),
                tracer_available,
            };
        };

        let version = self
            .list(magick, &["-version"])
            .await
            .and_then(|out| parse_version(&out));
        let formats = self
            .list(magick, &["-list", "format"])
            .await
            .map(|out| parse_format_list(&out))
            .unwrap_or_default();

        let name = magick
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "magick".to_string());
        info!(
            "Probed {} ({}): {} formats, tracer {}",
            name,
            version.as_deref().unwrap_or("unknown version"),
            formats.len(),
            if tracer_available { "available" } else { "missing" }
        );

        ToolProbe {
            tool: Some(ToolInfo {
                name,
                path: magick.to_path_buf(),
                version,
            }),
            formats,
            tracer_available,
        }
    }

    async fn run(&self, job: &ToolJob) -> Result<(), ConvertError> {
        let magick = self.magick.as_deref().ok_or_else(|| ConvertError::ToolUnavailable {
            tool: TOOL_NAME.into(),
        })?;
        let args = tool_args(job, self.quality);
        debug!("Running {} {:?}", magick.display(), args);

        let out = exec(magick, &args, self.timeout)
            .await
            .map_err(|e| e.into_error(TOOL_NAME, &job.target))?;
        check_exit(TOOL_NAME, &out, &job.target)?;
        super::verify_output(&job.output, &job.target).await?;
        Ok(())
    }

    async fn trace(&self, bitmap: &Path, output: &Path, target: &Format) -> Result<(), ConvertError> {
        let potrace = self.potrace.as_deref().ok_or_else(|| ConvertError::ToolUnavailable {
            tool: TRACER_NAME.into(),
        })?;
        let args = trace_args(bitmap, output, target).ok_or_else(|| {
            ConvertError::failed(
                FailureCause::EncodeUnsupported,
                target.token(),
                format!("{TRACER_NAME} has no backend for {target}"),
            )
        })?;
        debug!("Running {} {:?}", potrace.display(), args);

        let out = exec(potrace, &args, self.timeout)
            .await
            .map_err(|e| e.into_error(TRACER_NAME, target))?;
        check_exit(TRACER_NAME, &out, target)?;
        super::verify_output(output, target).await?;
        Ok(())
    }
}

// ── Argument templates ──────────────────────────────────────────────────────

/// Build the ImageMagick argument list for `job`.
pub fn tool_args(job: &ToolJob, quality: u8) -> Vec<OsString> {
    let input = &job.input_format;
    // Any input may hold several images (icon sizes, animation frames, HEIF
    // sequences). Without `[0]` a single-image target is split into
    // `out-0.ext`, `out-1.ext`, ... and `out.ext` never appears.
    let first_frame_only = match job.mode {
        ToolMode::Direct => !job.target.is_multi_page(),
        ToolMode::Normalize => *input != Format::Xcf,
        ToolMode::Grayscale | ToolMode::Monochrome => true,
    };

    let mut args: Vec<OsString> = Vec::new();
    if input.needs_density() {
        args.push("-density".into());
        args.push(INPUT_DENSITY.into());
    }
    args.push(frame_spec(&job.input, first_frame_only));

    match job.mode {
        ToolMode::Direct => {
            args.extend(target_args(&job.target, quality).into_iter().map(OsString::from));
            args.push(job.output.clone().into_os_string());
        }
        ToolMode::Normalize => {
            if *input == Format::Xcf {
                args.extend(["-background", "none", "-flatten"].map(OsString::from));
            }
            args.push(coder_spec("png", &job.output));
        }
        ToolMode::Grayscale => {
            args.extend(["-background", "white", "-flatten", "-colorspace", "Gray"].map(OsString::from));
            args.push(coder_spec("pgm", &job.output));
        }
        ToolMode::Monochrome => {
            args.extend(["-background", "white", "-flatten", "-monochrome"].map(OsString::from));
            args.push(coder_spec("pbm", &job.output));
        }
    }
    args
}

/// Per-target output options.
fn target_args(target: &Format, quality: u8) -> Vec<String> {
    match target {
        Format::Ico => vec!["-define".into(), ICON_SIZES.into()],
        Format::Ps | Format::Eps | Format::Ai => vec!["-compress".into(), "zip".into()],
        Format::Bmp => vec!["-compress".into(), "none".into()],
        Format::Tiff => vec!["-compress".into(), "lzw".into()],
        Format::Jpeg | Format::Webp | Format::Heic | Format::Heif | Format::Avif => {
            vec!["-quality".into(), quality.to_string()]
        }
        _ => Vec::new(),
    }
}

/// potrace arguments, or `None` when potrace cannot write `target`.
pub fn trace_args(bitmap: &Path, output: &Path, target: &Format) -> Option<Vec<OsString>> {
    let backend = match target {
        Format::Svg => "svg",
        Format::Eps => "eps",
        Format::Ps => "ps",
        Format::Ai => "pdf",
        _ => return None,
    };
    Some(vec![
        bitmap.as_os_str().to_os_string(),
        "-b".into(),
        backend.into(),
        "-o".into(),
        output.as_os_str().to_os_string(),
    ])
}

fn frame_spec(path: &Path, first_frame_only: bool) -> OsString {
    let mut spec = path.as_os_str().to_os_string();
    if first_frame_only {
        spec.push("[0]");
    }
    spec
}

fn coder_spec(coder: &str, path: &Path) -> OsString {
    let mut spec = OsString::from(format!("{coder}:"));
    spec.push(path.as_os_str());
    spec
}

// ── Process execution ───────────────────────────────────────────────────────

/// Map tool stderr to a failure cause.
pub fn classify_tool_error(stderr: &str) -> FailureCause {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("no encode delegate") {
        FailureCause::EncodeUnsupported
    } else if lower.contains("no decode delegate") || lower.contains("improper image header") {
        FailureCause::DecodeUnsupported
    } else {
        FailureCause::ToolFailed
    }
}

#[derive(Debug)]
enum ExecFailure {
    Spawn(std::io::Error),
    Wait(std::io::Error),
    TimedOut(Duration),
}

impl ExecFailure {
    fn describe(&self) -> String {
        match self {
            ExecFailure::Spawn(e) => format!("spawn failed: {e}"),
            ExecFailure::Wait(e) => format!("wait failed: {e}"),
            ExecFailure::TimedOut(d) => format!("killed after {}s", d.as_secs()),
        }
    }

    fn into_error(self, tool: &str, target: &Format) -> ConvertError {
        let detail = self.describe();
        warn!("{} {}", tool, detail);
        match self {
            ExecFailure::Spawn(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ConvertError::ToolUnavailable { tool: tool.into() }
            }
            ExecFailure::TimedOut(_) => ConvertError::failed(FailureCause::Timeout, target.token(), detail),
            _ => ConvertError::failed(FailureCause::ToolFailed, target.token(), detail),
        }
    }
}

/// Spawn `program` and wait for it, killing it if `timeout` elapses.
async fn exec(program: &Path, args: &[OsString], timeout: Duration) -> Result<Output, ExecFailure> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(ExecFailure::Spawn)?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(out)) => Ok(out),
        Ok(Err(e)) => Err(ExecFailure::Wait(e)),
        // dropping the wait future drops the child, which kills it
        Err(_) => Err(ExecFailure::TimedOut(timeout)),
    }
}

fn check_exit(tool: &str, out: &Output, target: &Format) -> Result<(), ConvertError> {
    if out.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&out.stderr);
    let cause = classify_tool_error(&stderr);
    warn!("{} exited with {} ({:?}): {}", tool, out.status, cause, stderr.trim());
    Err(ConvertError::failed(
        cause,
        target.token(),
        format!("{tool} exited with {}: {}", out.status, stderr.trim()),
    ))
}
