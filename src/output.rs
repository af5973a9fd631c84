//! Request, result and report types.

use crate::error::{ConvertError, ErrorCategory, FailureCause};
use crate::format::Format;
use crate::pipeline::strategy::Strategy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One file waiting to be converted.
///
/// The file at `input_path` belongs to the single attempt that consumes this
/// request; it is deleted when that attempt ends, whatever the outcome. Build
/// requests through [`crate::pipeline::input`] so the staged copy lives in
/// the upload directory under a unique name.
#[derive(Debug)]
pub struct ConversionRequest {
    /// Staged, exclusively owned copy of the upload.
    pub input_path: PathBuf,
    /// Name the client gave the file; used for output naming and reports.
    pub original_name: String,
    /// Derived from extension, MIME type or content, in that order.
    pub input_format: Format,
    /// Normalised lowercase target token.
    pub target_format: Format,
}

impl ConversionRequest {
    pub fn new(
        input_path: impl Into<PathBuf>,
        original_name: impl Into<String>,
        input_format: Format,
        target_format: Format,
    ) -> Self {
        Self {
            input_path: input_path.into(),
            original_name: original_name.into(),
            input_format,
            target_format,
        }
    }

    /// Original name without its extension, for naming the output.
    pub fn stem(&self) -> &str {
        Path::new(&self.original_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("image")
    }
}

/// A successfully produced output file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertedFile {
    pub output_path: PathBuf,
    pub output_format: Format,
    pub size_bytes: u64,
    /// The converter that produced the file.
    pub strategy: Strategy,
    /// Whether the input was normalised by the pre-processing stage first.
    pub preprocessed: bool,
}

impl ConvertedFile {
    /// File name of the output, as handed to clients.
    pub fn file_name(&self) -> String {
        self.output_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Outcome of one conversion. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConversionResult {
    Success {
        output_path: PathBuf,
        output_format: Format,
    },
    Failure {
        category: ErrorCategory,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cause: Option<FailureCause>,
        /// User-facing message. Never raw tool output.
        message: String,
    },
}

impl ConversionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ConversionResult::Success { .. })
    }

    pub fn output_path(&self) -> Option<&Path> {
        match self {
            ConversionResult::Success { output_path, .. } => Some(output_path),
            ConversionResult::Failure { .. } => None,
        }
    }
}

impl From<&ConvertError> for ConversionResult {
    fn from(err: &ConvertError) -> Self {
        ConversionResult::Failure {
            category: err.category(),
            cause: err.cause(),
            message: err.to_string(),
        }
    }
}

impl From<Result<ConvertedFile, ConvertError>> for ConversionResult {
    fn from(result: Result<ConvertedFile, ConvertError>) -> Self {
        match result {
            Ok(file) => ConversionResult::Success {
                output_path: file.output_path,
                output_format: file.output_format,
            },
            Err(err) => ConversionResult::from(&err),
        }
    }
}

/// One slot of a batch.
#[derive(Debug)]
pub enum BatchInput {
    /// Staged and ready to convert.
    Ready(ConversionRequest),
    /// Rejected while staging; reported as a failure in its slot.
    Rejected {
        original_name: String,
        error: ConvertError,
    },
}

impl BatchInput {
    pub fn original_name(&self) -> &str {
        match self {
            BatchInput::Ready(r) => &r.original_name,
            BatchInput::Rejected { original_name, .. } => original_name,
        }
    }
}

/// An ordered set of uploads sharing one target format.
#[derive(Debug)]
pub struct BatchJob {
    target_format: Format,
    inputs: Vec<BatchInput>,
}

impl BatchJob {
    pub fn new(target_format: Format) -> Self {
        Self {
            target_format,
            inputs: Vec::new(),
        }
    }

    /// Add a staged request. Its target is replaced by the batch target.
    pub fn push(&mut self, mut request: ConversionRequest) {
        request.target_format = self.target_format.clone();
        self.inputs.push(BatchInput::Ready(request));
    }

    /// Record an upload that could not be staged.
    pub fn reject(&mut self, original_name: impl Into<String>, error: ConvertError) {
        self.inputs.push(BatchInput::Rejected {
            original_name: original_name.into(),
            error,
        });
    }

    pub fn target_format(&self) -> &Format {
        &self.target_format
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn into_inputs(self) -> Vec<BatchInput> {
        self.inputs
    }
}

/// One row of a batch report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub original_name: String,
    #[serde(flatten)]
    pub result: ConversionResult,
}

/// Ordered per-file outcomes of a batch.
///
/// Counts are computed from `entries` on demand, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub target_format: Format,
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn successful(&self) -> usize {
        self.entries.iter().filter(|e| e.result.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.successful()
    }

    /// Output paths of the successful entries, in batch order.
    pub fn output_paths(&self) -> Vec<PathBuf> {
        self.entries
            .iter()
            .filter_map(|e| e.result.output_path().map(Path::to_path_buf))
            .collect()
    }

    /// Aggregate counts for serialised summaries.
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            total: self.total(),
            successful: self.successful(),
            failed: self.failed(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Previously issued output references to bundle into one archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveRequest {
    pub references: Vec<PathBuf>,
    /// Desired archive name; `.zip` is appended when missing.
    pub name: String,
}

/// A built archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveOutput {
    pub path: PathBuf,
    /// Number of files written into the archive.
    pub entries: usize,
    /// References that no longer existed and were left out.
    pub skipped: Vec<PathBuf>,
}
