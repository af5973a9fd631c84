//! # imgshift
//!
//! Convert images between formats: common raster formats in-process,
//! everything else through ImageMagick, and PDF output through pdfium.
//!
//! ## Why this crate?
//!
//! No single codec handles every format users upload. Decoding PNG, JPEG or
//! WebP in-process is fast and dependency-free; PSD, HEIC, camera RAW or EPS
//! need ImageMagick; vector targets need a tracer; PDF needs a document
//! library. This crate picks the right converter for each pair of formats,
//! falls back when one fails, and makes sure no intermediate file outlives
//! the request that created it.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Stage       copy path / bytes / URL into the upload dir (unique name)
//!  ├─ 2. Classify    fast path? document? pre-processing? (capability table)
//!  ├─ 3. Preprocess  flatten PSD / XCF / RAW / HEIC to PNG (ImageMagick)
//!  ├─ 4. Convert     ordered fallback plan: fast → tool, or trace tiers, or pdfium
//!  ├─ 5. Verify      output exists and is non-empty
//!  └─ 6. Clean up    input + intermediates deleted on every path
//! ```
//!
//! Batches run that pipeline once per file, sequentially, and never stop on a
//! single failure. Outputs can be bundled into a ZIP afterwards.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use imgshift::{Converter, ConverterConfig, Format};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let converter = Converter::new(ConverterConfig::default()).await?;
//!     let file = converter.convert_path("photo.heic", &Format::Jpeg).await?;
//!     println!("{} ({} bytes, {})", file.output_path.display(), file.size_bytes, file.strategy);
//!
//!     let inputs = vec!["a.png".to_string(), "b.gif".to_string()];
//!     let job = converter.stage_batch(&inputs, &Format::Webp).await?;
//!     let report = converter.run_batch(job).await?;
//!     eprintln!("{} of {} converted", report.successful(), report.total());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `imgshift` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! imgshift = { version = "0.1", default-features = false }
//! ```
//!
//! ## Runtime Dependencies
//!
//! | Program | Needed for |
//! |---------|------------|
//! | ImageMagick (`magick` or `convert`) | every non-fast-path format, pre-processing |
//! | potrace | traced SVG / EPS / PS / AI output from raster input |
//! | PDFium shared library | `pdf` targets |
//!
//! All three are optional. A missing program narrows what
//! [`Converter::capabilities`] reports instead of failing at startup.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod archive;
pub mod batch;
pub mod capabilities;
pub mod classify;
pub mod config;
pub mod convert;
pub mod error;
pub mod format;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod retention;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::BatchStream;
pub use capabilities::{CapabilityReport, CapabilityTable};
pub use config::{ConverterConfig, ConverterConfigBuilder, DocumentPage, MAX_BATCH_SIZE};
pub use convert::{ConversionState, Converter};
pub use error::{ConvertError, ErrorCategory, FailureCause};
pub use format::Format;
pub use output::{
    ArchiveOutput, ArchiveRequest, BatchEntry, BatchInput, BatchJob, BatchReport, BatchSummary,
    ConversionRequest, ConversionResult, ConvertedFile,
};
pub use pipeline::external::{ExternalConverter, MagickConverter};
pub use pipeline::strategy::Strategy;
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use retention::{sweep_expired, SweepReport};
