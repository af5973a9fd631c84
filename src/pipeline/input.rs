//! Upload staging: copy an upload into the upload directory.
//!
//! Every request gets its own uniquely named file under `upload_dir`, so two
//! conversions never touch the same path and the attempt can delete its
//! input freely. Local files are copied, never moved: the caller's original
//! is left alone. URLs are downloaded with `reqwest` under a timeout.
//!
//! [`StagedFile::into_request`] works out the input format (extension, then
//! MIME type, then magic bytes). If that fails, the staged copy is deleted
//! before the error is returned.

use super::transient::remove_if_exists;
use crate::error::ConvertError;
use crate::format::{derive_input_hint, Format};
use crate::output::ConversionRequest;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

/// Bytes read from the start of a file for format sniffing.
const SNIFF_LEN: usize = 64;

/// An upload copied into the upload directory.
#[derive(Debug)]
pub struct StagedFile {
    pub path: PathBuf,
    pub original_name: String,
    pub mime: Option<String>,
}

impl StagedFile {
    /// Turn the staged file into a request for `target`.
    pub async fn into_request(self, target: &Format) -> Result<ConversionRequest, ConvertError> {
        let head = read_head(&self.path).await;
        match derive_input_hint(Some(&self.original_name), self.mime.as_deref(), head.as_deref()) {
            Ok(input_format) => {
                debug!(
                    "Staged {} as {} ({} → {})",
                    self.original_name,
                    self.path.display(),
                    input_format,
                    target
                );
                Ok(ConversionRequest::new(self.path, self.original_name, input_format, target.clone()))
            }
            Err(e) => {
                discard(&self.path);
                Err(e)
            }
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Stage a path or URL.
pub async fn stage(input: &str, upload_dir: &Path, timeout_secs: u64) -> Result<StagedFile, ConvertError> {
    if is_url(input) {
        stage_url(input, upload_dir, timeout_secs).await
    } else {
        stage_local(Path::new(input), upload_dir).await
    }
}

/// Copy a local file into `upload_dir`.
pub async fn stage_local(path: &Path, upload_dir: &Path) -> Result<StagedFile, ConvertError> {
    let meta = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ConvertError::invalid_input(format!(
                "permission denied reading '{}'",
                path.display()
            )))
        }
        Err(_) => {
            return Err(ConvertError::invalid_input(format!(
                "file not found: '{}'",
                path.display()
            )))
        }
    };
    if !meta.is_file() {
        return Err(ConvertError::invalid_input(format!(
            "'{}' is not a regular file",
            path.display()
        )));
    }

    let original_name = file_name_of(path);
    let staged = staged_path(upload_dir, &original_name).await?;
    if let Err(e) = tokio::fs::copy(path, &staged).await {
        discard(&staged);
        return Err(ConvertError::invalid_input(format!(
            "could not read '{}': {}",
            path.display(),
            e
        )));
    }
    debug!("Staged local file {} → {}", path.display(), staged.display());
    Ok(StagedFile {
        path: staged,
        original_name,
        mime: None,
    })
}

/// Write uploaded bytes into `upload_dir`.
pub async fn stage_bytes(
    bytes: &[u8],
    original_name: &str,
    mime: Option<&str>,
    upload_dir: &Path,
) -> Result<StagedFile, ConvertError> {
    if bytes.is_empty() {
        return Err(ConvertError::invalid_input(format!("'{original_name}' is empty")));
    }
    let staged = staged_path(upload_dir, original_name).await?;
    write_staged(&staged, bytes).await?;
    Ok(StagedFile {
        path: staged,
        original_name: original_name.to_string(),
        mime: mime.map(str::to_string),
    })
}

/// Download a URL into `upload_dir`.
pub async fn stage_url(url: &str, upload_dir: &Path, timeout_secs: u64) -> Result<StagedFile, ConvertError> {
    info!("Downloading image from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ConvertError::Internal(format!("HTTP client: {e}")))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ConvertError::invalid_input(format!("download of {url} timed out after {timeout_secs}s"))
        } else {
            ConvertError::invalid_input(format!("download of {url} failed: {e}"))
        }
    })?;

    if !response.status().is_success() {
        return Err(ConvertError::invalid_input(format!(
            "download of {url} failed: HTTP {}",
            response.status()
        )));
    }

    let mime = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let filename = extract_filename(url);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ConvertError::invalid_input(format!("download of {url} failed: {e}")))?;

    let staged = stage_bytes(&bytes, &filename, mime.as_deref(), upload_dir).await?;
    info!("Downloaded {} bytes to: {}", bytes.len(), staged.path.display());
    Ok(staged)
}

/// Extract a reasonable filename from the URL path.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() {
                    return last.to_string();
                }
            }
        }
    }
    "download".to_string()
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string())
}

/// Unique path in `upload_dir` that keeps the upload's extension.
async fn staged_path(upload_dir: &Path, original_name: &str) -> Result<PathBuf, ConvertError> {
    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|source| ConvertError::OutputWriteFailed {
            path: upload_dir.to_path_buf(),
            source,
        })?;
    let ext = Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "upload".to_string());
    Ok(super::unique_path(upload_dir, &ext))
}

async fn read_head(path: &Path) -> Option<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await.ok()?;
    let mut buf = vec![0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) => return None,
        }
    }
    buf.truncate(filled);
    Some(buf)
}

/// Write `bytes` to `staged`, removing whatever was written if it fails.
async fn write_staged(staged: &Path, bytes: &[u8]) -> Result<(), ConvertError> {
    if let Err(source) = tokio::fs::write(staged, bytes).await {
        discard(staged);
        return Err(ConvertError::OutputWriteFailed {
            path: staged.to_path_buf(),
            source,
        });
    }
    Ok(())
}

fn discard(path: &Path) {
    if let Err(e) = remove_if_exists(path) {
        warn!("Failed to remove staged upload {}: {}", path.display(), e);
    }
}
