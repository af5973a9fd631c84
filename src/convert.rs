//! The conversion orchestrator.
//!
//! [`Converter`] owns the configuration, the external tool and the
//! capability table, and drives one file through:
//!
//! ```text
//! Received ─▶ Classified ─▶ (Preprocessing) ─▶ Converting ─▶ Verifying ─▶ Succeeded
//!     └──────────────┴───────────────┴────────────────┴─────────────┴─────▶ Failed
//! ```
//!
//! The staged input, every intermediate, and (on failure) the partial output
//! are deleted before the result is returned, on every path. Only a verified
//! output survives.

use crate::capabilities::{CapabilityTable, SharedCapabilities};
use crate::classify::classify;
use crate::config::ConverterConfig;
use crate::error::ConvertError;
use crate::format::Format;
use crate::output::{ConversionRequest, ConvertedFile};
use crate::pipeline::external::{ExternalConverter, MagickConverter};
use crate::pipeline::fast::FastPathSettings;
use crate::pipeline::input::{self, StagedFile};
use crate::pipeline::preprocess::preprocess;
use crate::pipeline::strategy::{self, Attempt, Stages};
use crate::pipeline::transient::TransientFiles;
use crate::pipeline::verify_output;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Where one conversion attempt is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionState {
    Received,
    Classified,
    Preprocessing,
    Converting,
    Verifying,
    Succeeded,
    Failed,
}

/// The conversion service.
///
/// Cheap to clone; clones share the tool and the capability table.
///
/// # Example
/// ```rust,no_run
/// use imgshift::{Converter, ConverterConfig, Format};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), imgshift::ConvertError> {
/// let converter = Converter::new(ConverterConfig::default()).await?;
/// let request = converter.stage("holiday.heic", &Format::Jpeg).await?;
/// let file = converter.convert(request).await?;
/// println!("{}", file.output_path.display());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Converter {
    config: Arc<ConverterConfig>,
    tool: Arc<dyn ExternalConverter>,
    capabilities: Arc<SharedCapabilities>,
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter")
            .field("config", &self.config)
            .field("tool_available", &self.tool.is_available())
            .finish()
    }
}

impl Converter {
    /// Locate ImageMagick/potrace, probe them, and prepare the directories.
    ///
    /// A missing tool only narrows the capability table; it is not an error.
    pub async fn new(config: ConverterConfig) -> Result<Self, ConvertError> {
        let tool = MagickConverter::locate(&config);
        let probe = tool.probe().await;
        let table = CapabilityTable::from_probe(&probe);
        Self::with_tool(config, Arc::new(tool), table)
    }

    /// Build a converter around a given tool and capability table.
    pub fn with_tool(
        config: ConverterConfig,
        tool: Arc<dyn ExternalConverter>,
        table: CapabilityTable,
    ) -> Result<Self, ConvertError> {
        for dir in [&config.upload_dir, &config.output_dir] {
            std::fs::create_dir_all(dir).map_err(|source| ConvertError::OutputWriteFailed {
                path: dir.clone(),
                source,
            })?;
        }
        info!(
            "Converter ready: tool {}, {} fast-path formats, {} advanced formats",
            if table.tool_available() { "available" } else { "missing" },
            table.report().fast_path_formats.len(),
            table.advanced_formats().len()
        );
        Ok(Self {
            config: Arc::new(config),
            tool,
            capabilities: Arc::new(SharedCapabilities::new(table)),
        })
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Current capability table.
    pub fn capabilities(&self) -> Arc<CapabilityTable> {
        self.capabilities.snapshot()
    }

    /// Re-probe the external tool and swap in the new table.
    ///
    /// Conversions already running keep the snapshot they started with.
    pub async fn refresh_capabilities(&self) -> Arc<CapabilityTable> {
        let probe = self.tool.probe().await;
        self.capabilities.replace(CapabilityTable::from_probe(&probe));
        info!("Capability table refreshed");
        self.capabilities.snapshot()
    }

    // ── Staging ──────────────────────────────────────────────────────────

    /// Stage a local path or URL as a request for `target`.
    pub async fn stage(&self, input: &str, target: &Format) -> Result<ConversionRequest, ConvertError> {
        let staged = input::stage(input, &self.config.upload_dir, self.config.download_timeout_secs).await?;
        staged.into_request(target).await
    }

    /// Stage uploaded bytes as a request for `target`.
    pub async fn stage_bytes(
        &self,
        bytes: &[u8],
        original_name: &str,
        mime: Option<&str>,
        target: &Format,
    ) -> Result<ConversionRequest, ConvertError> {
        let staged: StagedFile = input::stage_bytes(bytes, original_name, mime, &self.config.upload_dir).await?;
        staged.into_request(target).await
    }

    // ── Conversion ───────────────────────────────────────────────────────

    /// Convert one staged file.
    ///
    /// The request's input file is consumed: it is gone when this returns.
    pub async fn convert(&self, request: ConversionRequest) -> Result<ConvertedFile, ConvertError> {
        let id = Uuid::new_v4().simple().to_string();
        let id = &id[..8];
        let started = Instant::now();
        info!(
            "[{}] Converting {} ({} → {})",
            id, request.original_name, request.input_format, request.target_format
        );

        let mut transient = TransientFiles::new();
        transient.track(&request.input_path);
        let result = self.run_attempt(id, &request, &mut transient).await;

        match &result {
            Ok(file) => {
                transient.keep(&file.output_path);
                transition(id, ConversionState::Succeeded);
                info!(
                    "[{}] Produced {} ({} bytes, {}) in {}ms",
                    id,
                    file.output_path.display(),
                    file.size_bytes,
                    file.strategy,
                    started.elapsed().as_millis()
                );
            }
            Err(e) => {
                transition(id, ConversionState::Failed);
                warn!(
                    "[{}] {} failed: {}{}",
                    id,
                    request.original_name,
                    e,
                    e.detail().map(|d| format!(" ({d})")).unwrap_or_default()
                );
            }
        }
        drop(transient);
        result
    }

    /// Stage `input` and convert it in one call.
    pub async fn convert_path(&self, input: &str, target: &Format) -> Result<ConvertedFile, ConvertError> {
        let request = self.stage(input, target).await?;
        self.convert(request).await
    }

    async fn run_attempt(
        &self,
        id: &str,
        request: &ConversionRequest,
        transient: &mut TransientFiles,
    ) -> Result<ConvertedFile, ConvertError> {
        transition(id, ConversionState::Received);
        let target = &request.target_format;
        let input_format = &request.input_format;

        if input_format.is_malformed() {
            return Err(ConvertError::invalid_input(format!(
                "'{}' has an unrecognised type",
                request.original_name
            )));
        }
        check_input(&request.input_path, &request.original_name).await?;

        let caps = self.capabilities.snapshot();
        if target.is_malformed() || !caps.can_write(target) {
            return Err(ConvertError::UnsupportedConversion {
                from: input_format.to_string(),
                to: target.to_string(),
            });
        }

        let classification = classify(&caps, input_format, target);
        transition(id, ConversionState::Classified);
        debug!("[{}] {:?}", id, classification);

        let output = self.output_path(request);
        transient.track(&output);

        let mut source: PathBuf = request.input_path.clone();
        let mut source_format = input_format.clone();
        let mut preprocessed = false;
        if classification.needs_preprocessing {
            transition(id, ConversionState::Preprocessing);
            match preprocess(
                self.tool.as_ref(),
                &request.input_path,
                input_format,
                &self.config.upload_dir,
                transient,
            )
            .await
            {
                Ok(normalized) => {
                    source = normalized;
                    source_format = Format::Png;
                    preprocessed = true;
                }
                Err(e) => warn!(
                    "[{}] Pre-processing failed, converting original: {}",
                    id,
                    e.detail().map(str::to_string).unwrap_or_else(|| e.to_string())
                ),
            }
        }

        transition(id, ConversionState::Converting);
        let plan = strategy::plan(&classification, &source_format, target, caps.tracer_available());
        debug!("[{}] Plan: {:?}", id, plan);
        let stages = Stages {
            tool: self.tool.as_ref(),
            fast: FastPathSettings::from(self.config.as_ref()),
            page: self.config.document_page,
        };
        let attempt = Attempt {
            input: &source,
            input_format: &source_format,
            output: &output,
            target,
            work_dir: &self.config.upload_dir,
        };
        let used = strategy::run_plan(&plan, &stages, &attempt, transient).await?;

        transition(id, ConversionState::Verifying);
        let size_bytes = verify_output(&output, target).await?;

        Ok(ConvertedFile {
            output_path: output,
            output_format: target.clone(),
            size_bytes,
            strategy: used,
            preprocessed,
        })
    }

    /// `<output_dir>/<sanitised stem>-<unique>.<target>`
    fn output_path(&self, request: &ConversionRequest) -> PathBuf {
        let stem = sanitize_stem(request.stem());
        self.config.output_dir.join(format!(
            "{stem}-{}.{}",
            Uuid::new_v4().simple(),
            request.target_format.token()
        ))
    }
}

fn transition(id: &str, state: ConversionState) {
    debug!("[{}] → {:?}", id, state);
}

async fn check_input(path: &Path, name: &str) -> Result<(), ConvertError> {
    match tokio::fs::metadata(path).await {
        Ok(m) if m.is_file() && m.len() > 0 => Ok(()),
        Ok(_) => Err(ConvertError::invalid_input(format!("'{name}' is empty"))),
        Err(_) => Err(ConvertError::invalid_input(format!("'{name}' is missing or unreadable"))),
    }
}

/// Keep ASCII alphanumerics, `-` and `_`; everything else becomes `_`.
fn sanitize_stem(stem: &str) -> String {
    let s: String = stem
        .chars()
        .take(64)
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if s.trim_matches('_').is_empty() {
        "image".to_string()
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stems_are_sanitised() {
        assert_eq!(sanitize_stem("holiday photo (1)"), "holiday_photo__1_");
        assert_eq!(sanitize_stem("../../etc/passwd"), "______etc_passwd");
        assert_eq!(sanitize_stem("日本"), "image");
        assert_eq!(sanitize_stem("a-b_c"), "a-b_c");
    }

    #[test]
    fn output_names_are_unique_and_typed() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ConverterConfig::builder()
            .upload_dir(dir.path().join("u"))
            .output_dir(dir.path().join("o"))
            .build()
            .unwrap();
        let tool = Arc::new(MagickConverter::with_paths(None, None, std::time::Duration::from_secs(1), 90));
        let c = Converter::with_tool(config, tool, CapabilityTable::builtin()).unwrap();
        let req = ConversionRequest::new("x", "cat.png", Format::Png, Format::Webp);
        let a = c.output_path(&req);
        let b = c.output_path(&req);
        assert_ne!(a, b);
        assert!(a.starts_with(dir.path().join("o")));
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("cat-"));
        assert!(name.ends_with(".webp"));
    }
}
