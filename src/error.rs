//! Error types for the imgshift library.
//!
//! One error type covers every way a single conversion can end badly:
//! [`ConvertError`]. It is returned as `Err(ConvertError)` from
//! [`crate::Converter::convert`] and folded into
//! [`crate::output::ConversionResult::Failure`] inside batch reports, so one
//! bad file never takes down a batch.
//!
//! ## What callers see vs. what the logs see
//!
//! `Display` renders *actionable guidance* ("try PNG or JPG instead"), never
//! raw ImageMagick stderr or codec internals. The raw text travels in the
//! `detail` field of [`ConvertError::ConversionFailed`] and is written to the
//! `tracing` log at the point of failure.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the imgshift library.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Missing or unreadable upload, or a type that is not an image at all.
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// Neither the in-process codec nor the external tool can write `to`.
    #[error("Converting {from} to {to} is not supported on this server.\nTry a common format such as PNG, JPG or WEBP.")]
    UnsupportedConversion { from: String, to: String },

    // ── Converter errors ──────────────────────────────────────────────────
    /// A required external program or library could not be located.
    #[error("{tool} is not available on this server, so this conversion cannot run.")]
    ToolUnavailable { tool: String },

    /// A converter ran and failed.
    ///
    /// `detail` holds the raw library/subprocess text for logging only.
    #[error("Conversion to {target} failed: {}", cause.guidance())]
    ConversionFailed {
        cause: FailureCause,
        target: String,
        detail: String,
    },

    /// A batch asked for more files than the configured limit.
    #[error("Too many files: {requested} submitted, at most {limit} are allowed per batch")]
    ResourceExhausted { requested: usize, limit: usize },

    // ── Archive errors ────────────────────────────────────────────────────
    /// Archive could not be produced (e.g. no referenced file still exists).
    #[error("Archive could not be created: {reason}")]
    ArchiveFailed { reason: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output/staging file.
    #[error("Failed to write '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why a converter run failed. Sub-causes of [`ConvertError::ConversionFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// The tool has no encoder for the target format ("no encode delegate").
    EncodeUnsupported,
    /// The input could not be decoded ("no decode delegate", corrupt data).
    DecodeUnsupported,
    /// The tool ran past the configured timeout and was killed.
    Timeout,
    /// The converter reported success but left no (or an empty) output file.
    EmptyOutput,
    /// The tool exited non-zero for an unrecognised reason.
    ToolFailed,
    /// The in-process codec rejected the image.
    Codec,
    /// Every document-embedding tier failed.
    Document,
}

impl FailureCause {
    /// User-facing guidance for this cause.
    pub fn guidance(&self) -> &'static str {
        match self {
            FailureCause::EncodeUnsupported => {
                "this server cannot write that format. Try PNG, JPG or WEBP instead."
            }
            FailureCause::DecodeUnsupported => {
                "the file could not be read. It may be corrupt or in a format this server cannot open."
            }
            FailureCause::Timeout => {
                "the conversion took too long and was stopped. Try a smaller image or a simpler target format."
            }
            FailureCause::EmptyOutput => {
                "the converter produced an empty file. Try a different target format."
            }
            FailureCause::ToolFailed => {
                "the image tool reported an error. Try PNG, JPG or WEBP instead."
            }
            FailureCause::Codec => "the image data could not be processed.",
            FailureCause::Document => {
                "the image could not be placed into a PDF. Convert it to PNG or JPG first."
            }
        }
    }
}

/// Coarse error category exposed in serialised results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    InvalidInput,
    UnsupportedConversion,
    ToolUnavailable,
    ConversionFailed,
    ResourceExhausted,
    Internal,
}

impl ConvertError {
    /// Shorthand for a [`ConvertError::ConversionFailed`].
    pub fn failed(cause: FailureCause, target: impl Into<String>, detail: impl Into<String>) -> Self {
        ConvertError::ConversionFailed {
            cause,
            target: target.into(),
            detail: detail.into(),
        }
    }

    /// Shorthand for a [`ConvertError::InvalidInput`].
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        ConvertError::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Category used in [`crate::output::ConversionResult::Failure`].
    pub fn category(&self) -> ErrorCategory {
        match self {
            ConvertError::InvalidInput { .. } => ErrorCategory::InvalidInput,
            ConvertError::UnsupportedConversion { .. } => ErrorCategory::UnsupportedConversion,
            ConvertError::ToolUnavailable { .. } => ErrorCategory::ToolUnavailable,
            ConvertError::ConversionFailed { .. } => ErrorCategory::ConversionFailed,
            ConvertError::ResourceExhausted { .. } => ErrorCategory::ResourceExhausted,
            ConvertError::ArchiveFailed { .. }
            | ConvertError::OutputWriteFailed { .. }
            | ConvertError::InvalidConfig(_)
            | ConvertError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// The sub-cause, for `ConversionFailed` errors.
    pub fn cause(&self) -> Option<FailureCause> {
        match self {
            ConvertError::ConversionFailed { cause, .. } => Some(*cause),
            _ => None,
        }
    }

    /// Raw diagnostic text, suitable for logs but not for end users.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ConvertError::ConversionFailed { detail, .. } => Some(detail),
            _ => None,
        }
    }
}
