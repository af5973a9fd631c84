//! Batch coordinator: many files, one target, strictly one at a time.
//!
//! A batch never fails because one file failed. Each slot yields exactly one
//! [`BatchEntry`], in input order, so a batch of N inputs always reports N
//! results. Only an oversized batch is rejected as a whole
//! ([`ConvertError::ResourceExhausted`]), before anything is converted.
//!
//! [`Converter::run_batch`] waits for the whole report;
//! [`Converter::batch_stream`] yields entries as each file finishes.

use crate::convert::Converter;
use crate::error::ConvertError;
use crate::format::Format;
use crate::output::{BatchEntry, BatchInput, BatchJob, BatchReport, ConversionResult};
use crate::pipeline::transient::remove_if_exists;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::{info, warn};

/// A boxed stream of batch entries, in input order.
pub type BatchStream = Pin<Box<dyn Stream<Item = BatchEntry> + Send>>;

impl Converter {
    /// Stage paths or URLs into a batch for `target`.
    ///
    /// Inputs that cannot be staged take their slot as a rejected entry.
    pub async fn stage_batch(&self, inputs: &[String], target: &Format) -> Result<BatchJob, ConvertError> {
        check_size(inputs.len(), self.config().max_batch_size)?;
        let mut job = BatchJob::new(target.clone());
        for input in inputs {
            match self.stage(input, target).await {
                Ok(request) => job.push(request),
                Err(e) => {
                    warn!("Could not stage {}: {}", input, e);
                    job.reject(display_name(input), e);
                }
            }
        }
        Ok(job)
    }

    /// Convert every file in `job`, streaming entries as they complete.
    ///
    /// Files are converted sequentially; the next one starts only after the
    /// previous entry has been yielded.
    pub fn batch_stream(&self, job: BatchJob) -> Result<BatchStream, ConvertError> {
        let total = job.len();
        if let Err(e) = check_size(total, self.config().max_batch_size) {
            discard(job);
            return Err(e);
        }
        info!("Starting batch of {} files → {}", total, job.target_format());

        let callback = self.config().progress_callback.clone();
        if let Some(ref cb) = callback {
            cb.on_batch_start(total);
            if total == 0 {
                cb.on_batch_complete(0, 0);
            }
        }
        let successes = Arc::new(AtomicUsize::new(0));
        let this = self.clone();

        let s = stream::iter(job.into_inputs().into_iter().enumerate()).then(move |(i, input)| {
            let this = this.clone();
            let callback = callback.clone();
            let successes = Arc::clone(&successes);
            async move {
                let index = i + 1;
                let original_name = input.original_name().to_string();
                if let Some(ref cb) = callback {
                    cb.on_file_start(index, total, &original_name);
                }

                let result = match input {
                    BatchInput::Ready(request) => ConversionResult::from(this.convert(request).await),
                    BatchInput::Rejected { error, .. } => ConversionResult::from(&error),
                };

                match &result {
                    ConversionResult::Success { output_path, .. } => {
                        successes.fetch_add(1, Ordering::SeqCst);
                        if let Some(ref cb) = callback {
                            cb.on_file_complete(index, total, &display_name(&output_path.to_string_lossy()));
                        }
                    }
                    ConversionResult::Failure { message, .. } => {
                        if let Some(ref cb) = callback {
                            cb.on_file_error(index, total, message);
                        }
                    }
                }
                if index == total {
                    if let Some(ref cb) = callback {
                        cb.on_batch_complete(total, successes.load(Ordering::SeqCst));
                    }
                }

                BatchEntry {
                    original_name,
                    result,
                }
            }
        });

        Ok(Box::pin(s))
    }

    /// Convert every file in `job` and return the full report.
    pub async fn run_batch(&self, job: BatchJob) -> Result<BatchReport, ConvertError> {
        let target_format = job.target_format().clone();
        let entries: Vec<BatchEntry> = self.batch_stream(job)?.collect().await;
        let report = BatchReport {
            target_format,
            entries,
        };
        info!(
            "Batch done: {} total, {} converted, {} failed",
            report.total(),
            report.successful(),
            report.failed()
        );
        Ok(report)
    }
}

fn check_size(requested: usize, limit: usize) -> Result<(), ConvertError> {
    if requested > limit {
        return Err(ConvertError::ResourceExhausted { requested, limit });
    }
    Ok(())
}

/// Delete the staged inputs of a batch that will not run.
fn discard(job: BatchJob) {
    for input in job.into_inputs() {
        if let BatchInput::Ready(request) = input {
            if let Err(e) = remove_if_exists(&request.input_path) {
                warn!("Failed to remove staged upload {}: {}", request.input_path.display(), e);
            }
        }
    }
}

/// Last path or URL segment, for reports.
fn display_name(input: &str) -> String {
    let trimmed = input.split(['?', '#']).next().unwrap_or(input);
    Path::new(trimmed)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.to_string())
}
