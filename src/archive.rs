//! ZIP bundles of previously produced outputs.
//!
//! Only references that still exist are packed; the rest are reported as
//! skipped. A request that leaves nothing to pack is an error, never an empty
//! archive. Archives land in the output directory and expire with it.

use crate::convert::Converter;
use crate::error::ConvertError;
use crate::output::{ArchiveOutput, ArchiveRequest};
use crate::pipeline::transient::remove_if_exists;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

impl Converter {
    /// Bundle `request.references` into `<output_dir>/<name>.zip`.
    ///
    /// Relative references are resolved against the output directory and a
    /// file listed twice is packed once. The archive name is reserved
    /// atomically, so two requests for the same name get distinct archives.
    pub async fn build_archive(&self, request: ArchiveRequest) -> Result<ArchiveOutput, ConvertError> {
        let output_dir = self.config().output_dir.clone();

        let mut files = Vec::new();
        let mut skipped = Vec::new();
        for reference in request.references {
            let path = if reference.is_absolute() {
                reference.clone()
            } else {
                output_dir.join(&reference)
            };
            match tokio::fs::metadata(&path).await {
                Ok(m) if m.is_file() => {
                    if !files.contains(&path) {
                        files.push(path);
                    }
                }
                _ => {
                    debug!("Archive reference {} no longer exists", reference.display());
                    skipped.push(reference);
                }
            }
        }
        if files.is_empty() {
            return Err(ConvertError::ArchiveFailed {
                reason: "no valid files".into(),
            });
        }

        let entries = files.len();
        let name = request.name;
        let dest = tokio::task::spawn_blocking(move || {
            let (dest, out) = create_archive(&output_dir, &name)?;
            fill_or_remove(&files, out, &dest)?;
            Ok::<_, ConvertError>(dest)
        })
        .await
        .map_err(|e| ConvertError::Internal(format!("archive task panicked: {e}")))??;

        info!(
            "Archived {} files into {} ({} skipped)",
            entries,
            dest.display(),
            skipped.len()
        );
        Ok(ArchiveOutput {
            path: dest,
            entries,
            skipped,
        })
    }
}

/// Write `files` into a new ZIP at `dest`, deflated at the highest level.
///
/// `dest` must not exist yet. Entry names are the files' own names, suffixed
/// when two collide. A half-written archive is removed on error.
pub fn write_archive(files: &[PathBuf], dest: &Path) -> Result<(), ConvertError> {
    let out = create_new(dest).map_err(|source| ConvertError::OutputWriteFailed {
        path: dest.to_path_buf(),
        source,
    })?;
    fill_or_remove(files, out, dest)
}

fn fill_or_remove(files: &[PathBuf], out: File, dest: &Path) -> Result<(), ConvertError> {
    let result = write_entries(files, out);
    if result.is_err() {
        if let Err(e) = remove_if_exists(dest) {
            warn!("Failed to remove partial archive {}: {}", dest.display(), e);
        }
    }
    result
}

fn write_entries(files: &[PathBuf], out: File) -> Result<(), ConvertError> {
    let mut zip = ZipWriter::new(BufWriter::new(out));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9));

    let mut used = HashSet::new();
    for path in files {
        let name = entry_name(path, &mut used);
        zip.start_file(name.as_str(), options)
            .map_err(|e| archive_failed(&name, e))?;
        let mut src = File::open(path).map_err(|e| archive_failed(&name, e))?;
        std::io::copy(&mut src, &mut zip).map_err(|e| archive_failed(&name, e))?;
    }
    zip.finish()
        .map_err(|e| ConvertError::ArchiveFailed {
            reason: format!("could not finalise archive: {e}"),
        })?;
    Ok(())
}

fn archive_failed(entry: &str, e: impl std::fmt::Display) -> ConvertError {
    ConvertError::ArchiveFailed {
        reason: format!("could not add {entry}: {e}"),
    }
}

/// A file's name, made unique among `used`: `a.png`, `a-2.png`, `a-3.png`.
fn entry_name(path: &Path, used: &mut HashSet<String>) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    let compose = |n: usize| {
        let base = if n == 1 { stem.clone() } else { format!("{stem}-{n}") };
        match &ext {
            Some(ext) => format!("{base}.{ext}"),
            None => base,
        }
    };

    let mut n = 1;
    loop {
        let candidate = compose(n);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

fn create_new(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

/// Create `<dir>/<name>.zip`, or a uniquely suffixed sibling if the name is
/// taken. The file is created exclusively, never truncated.
fn create_archive(dir: &Path, name: &str) -> Result<(PathBuf, File), ConvertError> {
    let base = archive_base(name);
    let mut path = dir.join(format!("{base}.zip"));
    for _ in 0..8 {
        match create_new(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("{} is taken, picking another name", path.display());
                let suffix = Uuid::new_v4().simple().to_string();
                path = dir.join(format!("{base}-{}.zip", &suffix[..8]));
            }
            Err(source) => return Err(ConvertError::OutputWriteFailed { path, source }),
        }
    }
    Err(ConvertError::ArchiveFailed {
        reason: format!("no free archive name for '{base}'"),
    })
}

/// The requested name without `.zip`, restricted to `[A-Za-z0-9_-]`.
fn archive_base(name: &str) -> String {
    let trimmed = name.trim();
    let trimmed = trimmed
        .strip_suffix(".zip")
        .or_else(|| trimmed.strip_suffix(".ZIP"))
        .unwrap_or(trimmed);
    let base: String = trimmed
        .chars()
        .take(64)
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if base.trim_matches('_').is_empty() {
        "converted-images".to_string()
    } else {
        base
    }
}
