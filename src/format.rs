//! Format tokens: parsing, aliases, MIME mapping and input-hint derivation.
//!
//! A [`Format`] is the normalised, lowercase token a user asks for ("jpg",
//! "webp", "ico", …). Known formats get their own variant so policy code can
//! match on them; anything else is kept as [`Format::Other`] and left to the
//! capability table to accept or reject.

use crate::error::ConvertError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// A normalised image/document format token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Format {
    Jpeg,
    Png,
    Webp,
    Tiff,
    Avif,
    Gif,
    Bmp,
    Ico,
    Heic,
    Heif,
    Tga,
    Svg,
    Eps,
    Ps,
    Ai,
    Pdf,
    Psd,
    Xcf,
    Cr2,
    Nef,
    Arw,
    Dng,
    Djvu,
    /// A token with no dedicated variant, e.g. "jp2" or "cdr".
    Other(String),
}

/// Every format with a dedicated variant, in display order.
pub const KNOWN_FORMATS: &[Format] = &[
    Format::Jpeg,
    Format::Png,
    Format::Webp,
    Format::Tiff,
    Format::Avif,
    Format::Gif,
    Format::Bmp,
    Format::Ico,
    Format::Heic,
    Format::Heif,
    Format::Tga,
    Format::Svg,
    Format::Eps,
    Format::Ps,
    Format::Ai,
    Format::Pdf,
    Format::Psd,
    Format::Xcf,
    Format::Cr2,
    Format::Nef,
    Format::Arw,
    Format::Dng,
    Format::Djvu,
];

impl Format {
    /// Parse a user-supplied token. Case-insensitive; a leading dot is ignored.
    ///
    /// Never fails: unrecognised tokens become [`Format::Other`].
    pub fn from_token(token: &str) -> Format {
        let t = token.trim().trim_start_matches('.').to_ascii_lowercase();
        match t.as_str() {
            "jpg" | "jpeg" | "jpe" | "jfif" => Format::Jpeg,
            "png" => Format::Png,
            "webp" => Format::Webp,
            "tif" | "tiff" => Format::Tiff,
            "avif" => Format::Avif,
            "gif" => Format::Gif,
            "bmp" | "dib" => Format::Bmp,
            "ico" => Format::Ico,
            "heic" => Format::Heic,
            "heif" => Format::Heif,
            "tga" => Format::Tga,
            "svg" | "svgz" => Format::Svg,
            "eps" | "epsf" => Format::Eps,
            "ps" => Format::Ps,
            "ai" => Format::Ai,
            "pdf" => Format::Pdf,
            "psd" => Format::Psd,
            "xcf" => Format::Xcf,
            "cr2" => Format::Cr2,
            "nef" => Format::Nef,
            "arw" => Format::Arw,
            "dng" => Format::Dng,
            "djvu" | "djv" => Format::Djvu,
            _ => Format::Other(t),
        }
    }

    /// Canonical token, also used as the output file extension.
    pub fn token(&self) -> &str {
        match self {
            Format::Jpeg => "jpg",
            Format::Png => "png",
            Format::Webp => "webp",
            Format::Tiff => "tiff",
            Format::Avif => "avif",
            Format::Gif => "gif",
            Format::Bmp => "bmp",
            Format::Ico => "ico",
            Format::Heic => "heic",
            Format::Heif => "heif",
            Format::Tga => "tga",
            Format::Svg => "svg",
            Format::Eps => "eps",
            Format::Ps => "ps",
            Format::Ai => "ai",
            Format::Pdf => "pdf",
            Format::Psd => "psd",
            Format::Xcf => "xcf",
            Format::Cr2 => "cr2",
            Format::Nef => "nef",
            Format::Arw => "arw",
            Format::Dng => "dng",
            Format::Djvu => "djvu",
            Format::Other(t) => t,
        }
    }

    /// True for an empty or non-alphanumeric `Other` token.
    pub fn is_malformed(&self) -> bool {
        match self {
            Format::Other(t) => t.is_empty() || !t.chars().all(|c| c.is_ascii_alphanumeric()),
            _ => false,
        }
    }

    /// Vector outputs that can be synthesised by bitmap tracing.
    pub fn is_vector(&self) -> bool {
        matches!(self, Format::Svg | Format::Eps | Format::Ps | Format::Ai)
    }

    /// Formats that may hold several pages or frames; the first is used.
    pub fn is_multi_page(&self) -> bool {
        matches!(
            self,
            Format::Pdf | Format::Djvu | Format::Tiff | Format::Gif | Format::Ps | Format::Eps | Format::Ai
        )
    }

    /// Formats whose content must be rasterised at a chosen density.
    pub fn needs_density(&self) -> bool {
        matches!(self, Format::Svg | Format::Eps | Format::Ps | Format::Ai | Format::Pdf)
    }

    /// The `image` crate's format for this token, if it has one.
    pub fn image_format(&self) -> Option<image::ImageFormat> {
        use image::ImageFormat as F;
        Some(match self {
            Format::Jpeg => F::Jpeg,
            Format::Png => F::Png,
            Format::Webp => F::WebP,
            Format::Tiff => F::Tiff,
            Format::Avif => F::Avif,
            Format::Gif => F::Gif,
            Format::Bmp => F::Bmp,
            Format::Ico => F::Ico,
            Format::Tga => F::Tga,
            _ => return None,
        })
    }

    /// Inverse of [`Format::image_format`].
    pub fn from_image_format(f: image::ImageFormat) -> Option<Format> {
        use image::ImageFormat as F;
        Some(match f {
            F::Jpeg => Format::Jpeg,
            F::Png => Format::Png,
            F::WebP => Format::Webp,
            F::Tiff => Format::Tiff,
            F::Avif => Format::Avif,
            F::Gif => Format::Gif,
            F::Bmp => Format::Bmp,
            F::Ico => Format::Ico,
            F::Tga => Format::Tga,
            _ => return None,
        })
    }

    /// Map a declared MIME type to a format.
    ///
    /// Unknown `image/*` subtypes map to [`Format::Other`] so the external
    /// tool still gets a chance; unknown non-image types map to `None`.
    pub fn from_mime(mime: &str) -> Option<Format> {
        let mime = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        let f = match mime.as_str() {
            "image/jpeg" | "image/pjpeg" | "image/jpg" => Format::Jpeg,
            "image/png" | "image/x-png" => Format::Png,
            "image/webp" => Format::Webp,
            "image/tiff" | "image/tiff-fx" => Format::Tiff,
            "image/avif" => Format::Avif,
            "image/gif" => Format::Gif,
            "image/bmp" | "image/x-ms-bmp" | "image/x-bmp" => Format::Bmp,
            "image/x-icon" | "image/vnd.microsoft.icon" => Format::Ico,
            "image/heic" | "image/heic-sequence" => Format::Heic,
            "image/heif" | "image/heif-sequence" => Format::Heif,
            "image/x-tga" | "image/x-targa" => Format::Tga,
            "image/svg+xml" => Format::Svg,
            "application/postscript" => Format::Ps,
            "application/eps" | "image/x-eps" => Format::Eps,
            "application/pdf" => Format::Pdf,
            "application/illustrator" => Format::Ai,
            "application/cdr" | "application/x-cdr" => Format::Other("cdr".into()),
            "image/vnd.adobe.photoshop" | "application/x-photoshop" => Format::Psd,
            "image/x-xcf" => Format::Xcf,
            "image/x-canon-cr2" => Format::Cr2,
            "image/x-nikon-nef" => Format::Nef,
            "image/x-sony-arw" => Format::Arw,
            "image/x-adobe-dng" => Format::Dng,
            "image/vnd.djvu" | "image/x-djvu" => Format::Djvu,
            other => {
                let sub = other.strip_prefix("image/")?;
                let sub = sub.strip_prefix("x-").unwrap_or(sub);
                let f = Format::from_token(sub);
                if f.is_malformed() {
                    return None;
                }
                f
            }
        };
        Some(f)
    }

    /// Extension of `path` as a known format (never `Other`).
    pub fn from_path(path: &Path) -> Option<Format> {
        let ext = path.extension()?.to_str()?;
        match Format::from_token(ext) {
            Format::Other(_) => None,
            f => Some(f),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl From<String> for Format {
    fn from(s: String) -> Self {
        Format::from_token(&s)
    }
}

impl From<Format> for String {
    fn from(f: Format) -> Self {
        f.token().to_string()
    }
}

/// Work out what an upload is.
///
/// Checked in order: filename extension, declared MIME type, magic bytes.
/// Returns [`ConvertError::InvalidInput`] when none of them looks like an image.
pub fn derive_input_hint(
    file_name: Option<&str>,
    mime: Option<&str>,
    head: Option<&[u8]>,
) -> Result<Format, ConvertError> {
    if let Some(f) = file_name.and_then(|n| Format::from_path(Path::new(n))) {
        return Ok(f);
    }
    if let Some(f) = mime.and_then(Format::from_mime) {
        return Ok(f);
    }
    if let Some(f) = head
        .and_then(|bytes| image::guess_format(bytes).ok())
        .and_then(Format::from_image_format)
    {
        return Ok(f);
    }
    Err(ConvertError::invalid_input(format!(
        "'{}' ({}) is not a recognised image type",
        file_name.unwrap_or("upload"),
        mime.unwrap_or("no MIME type")
    )))
}
