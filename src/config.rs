//! Configuration types for the conversion service.
//!
//! All service behaviour is controlled through [`ConverterConfig`], built via
//! its [`ConverterConfigBuilder`]. Quality settings are service defaults, not
//! per-request options.

use crate::error::ConvertError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Hard ceiling on files per batch.
pub const MAX_BATCH_SIZE: usize = 20;

/// Configuration for a [`crate::Converter`].
///
/// Built via [`ConverterConfig::builder()`] or using
/// [`ConverterConfig::default()`].
///
/// # Example
/// ```rust
/// use imgshift::ConverterConfig;
///
/// let config = ConverterConfig::builder()
///     .upload_dir("/var/lib/imgshift/uploads")
///     .output_dir("/var/lib/imgshift/converted")
///     .tool_timeout_secs(60)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConverterConfig {
    /// Directory holding transient uploads and intermediates. Default: `uploads`.
    pub upload_dir: PathBuf,

    /// Directory holding produced artifacts (converted files, archives). Default: `converted`.
    pub output_dir: PathBuf,

    /// Per-invocation external-tool timeout in seconds. Default: 120.
    ///
    /// The child process is killed when the deadline passes and the attempt
    /// fails with [`crate::error::FailureCause::Timeout`].
    pub tool_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Maximum files per batch. Range: 1–20. Default: 20.
    pub max_batch_size: usize,

    /// How long produced artifacts are kept, in seconds. Default: 7200 (2 hours).
    pub retention_secs: u64,

    /// JPEG quality (1–100). Default: 90.
    pub jpeg_quality: u8,

    /// AVIF quality (1–100). Default: 90.
    pub avif_quality: u8,

    /// AVIF encoder speed (1 = slowest/best, 10 = fastest). Default: 6.
    pub avif_speed: u8,

    /// Explicit path to the ImageMagick binary. If None, searches `PATH`
    /// for `magick`, then `convert`.
    pub magick_path: Option<PathBuf>,

    /// Explicit path to `potrace`. If None, searches `PATH`.
    pub potrace_path: Option<PathBuf>,

    /// Page geometry used when an image cannot get a page of its own size.
    pub document_page: DocumentPage,

    /// Receives batch progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            output_dir: PathBuf::from("converted"),
            tool_timeout_secs: 120,
            download_timeout_secs: 120,
            max_batch_size: MAX_BATCH_SIZE,
            retention_secs: 2 * 60 * 60,
            jpeg_quality: 90,
            avif_quality: 90,
            avif_speed: 6,
            magick_path: None,
            potrace_path: None,
            document_page: DocumentPage::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConverterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterConfig")
            .field("upload_dir", &self.upload_dir)
            .field("output_dir", &self.output_dir)
            .field("tool_timeout_secs", &self.tool_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("max_batch_size", &self.max_batch_size)
            .field("retention_secs", &self.retention_secs)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("avif_quality", &self.avif_quality)
            .field("avif_speed", &self.avif_speed)
            .field("magick_path", &self.magick_path)
            .field("potrace_path", &self.potrace_path)
            .field("document_page", &self.document_page)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl ConverterConfig {
    /// Create a new builder for `ConverterConfig`.
    pub fn builder() -> ConverterConfigBuilder {
        ConverterConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConverterConfig`].
#[derive(Debug)]
pub struct ConverterConfigBuilder {
    config: ConverterConfig,
}

impl ConverterConfigBuilder {
    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn tool_timeout_secs(mut self, secs: u64) -> Self {
        self.config.tool_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn max_batch_size(mut self, n: usize) -> Self {
        self.config.max_batch_size = n.clamp(1, MAX_BATCH_SIZE);
        self
    }

    pub fn retention_secs(mut self, secs: u64) -> Self {
        self.config.retention_secs = secs;
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn avif_quality(mut self, q: u8) -> Self {
        self.config.avif_quality = q.clamp(1, 100);
        self
    }

    pub fn avif_speed(mut self, speed: u8) -> Self {
        self.config.avif_speed = speed.clamp(1, 10);
        self
    }

    pub fn magick_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.magick_path = Some(path.into());
        self
    }

    pub fn potrace_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.potrace_path = Some(path.into());
        self
    }

    pub fn document_page(mut self, page: DocumentPage) -> Self {
        self.config.document_page = page;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConverterConfig, ConvertError> {
        let c = &self.config;
        if c.tool_timeout_secs == 0 {
            return Err(ConvertError::InvalidConfig(
                "Tool timeout must be ≥ 1 second".into(),
            ));
        }
        if c.upload_dir.as_os_str().is_empty() || c.output_dir.as_os_str().is_empty() {
            return Err(ConvertError::InvalidConfig(
                "Upload and output directories must be set".into(),
            ));
        }
        if c.upload_dir == c.output_dir {
            // sweeping uploads would delete finished outputs and vice versa
            return Err(ConvertError::InvalidConfig(format!(
                "Upload and output directories must differ, both are {}",
                c.upload_dir.display()
            )));
        }
        let page = &c.document_page;
        if page.width_pt <= 0.0 || page.height_pt <= 0.0 || page.fit_box_pt <= 0.0 {
            return Err(ConvertError::InvalidConfig(format!(
                "Document page dimensions must be positive, got {}x{} (fit {})",
                page.width_pt, page.height_pt, page.fit_box_pt
            )));
        }
        Ok(self.config)
    }
}

/// Fallback page used by the document converter, in PDF points (1/72 inch).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DocumentPage {
    pub width_pt: f32,
    pub height_pt: f32,
    /// The image is scaled to fit a square of this size, centred on the page.
    pub fit_box_pt: f32,
}

impl Default for DocumentPage {
    /// US Letter with a 500 pt fit box.
    fn default() -> Self {
        Self {
            width_pt: 612.0,
            height_pt: 792.0,
            fit_box_pt: 500.0,
        }
    }
}
