//! Fast path: in-process decode and encode with the `image` crate.
//!
//! Decoding and encoding are CPU-bound, so the work runs on the blocking
//! pool via `spawn_blocking`, the same way page rendering is kept off the
//! async workers. Every failure here, including a codec panic (surfacing as
//! a `JoinError`), comes back as an ordinary [`ConvertError`] so the
//! orchestrator can fall back to the external tool.
//!
//! Output policy per target:
//!
//! | Target | Encoding |
//! |--------|----------|
//! | JPEG | baseline, quality from config (default 90), RGB |
//! | PNG  | default compression, adaptive filtering, non-interlaced |
//! | WEBP | lossless |
//! | TIFF | LZW |
//! | AVIF | quality/speed from config (default 90 / 6) |
//! | GIF  | real GIF (256-colour quantised), first frame |

use crate::config::ConverterConfig;
use crate::error::{ConvertError, FailureCause};
use crate::format::Format;
use image::codecs::avif::AvifEncoder;
use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, Frame, ImageReader};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tiff::encoder::{colortype, compression::Lzw, TiffEncoder};
use tracing::debug;

/// Encoder settings taken from [`ConverterConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FastPathSettings {
    pub jpeg_quality: u8,
    pub avif_quality: u8,
    pub avif_speed: u8,
}

impl From<&ConverterConfig> for FastPathSettings {
    fn from(c: &ConverterConfig) -> Self {
        Self {
            jpeg_quality: c.jpeg_quality,
            avif_quality: c.avif_quality,
            avif_speed: c.avif_speed,
        }
    }
}

impl Default for FastPathSettings {
    fn default() -> Self {
        Self::from(&ConverterConfig::default())
    }
}

/// Decode `input` and write it to `output` as `target`.
///
/// Returns the number of bytes written.
pub async fn convert_fast(
    input: &Path,
    output: &Path,
    target: &Format,
    settings: FastPathSettings,
) -> Result<u64, ConvertError> {
    let input = input.to_path_buf();
    let output = output.to_path_buf();
    let target = target.clone();
    let token = target.token().to_string();

    tokio::task::spawn_blocking(move || convert_fast_blocking(&input, &output, &target, settings))
        .await
        .map_err(|e| ConvertError::failed(FailureCause::Codec, token, format!("codec task panicked: {e}")))?
}

fn convert_fast_blocking(
    input: &Path,
    output: &Path,
    target: &Format,
    settings: FastPathSettings,
) -> Result<u64, ConvertError> {
    let img = decode(input, target)?;
    debug!(
        "Decoded {} → {}x{} {:?}",
        input.display(),
        img.width(),
        img.height(),
        img.color()
    );
    let bytes = encode(&img, target, settings)?;
    std::fs::write(output, &bytes).map_err(|source| ConvertError::OutputWriteFailed {
        path: PathBuf::from(output),
        source,
    })?;
    debug!("Encoded {} bytes of {} → {}", bytes.len(), target, output.display());
    Ok(bytes.len() as u64)
}

/// Decode an image, sniffing the actual format from its content.
pub fn decode(input: &Path, target: &Format) -> Result<DynamicImage, ConvertError> {
    let reader = ImageReader::open(input)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| ConvertError::failed(FailureCause::DecodeUnsupported, target.token(), e.to_string()))?;
    reader
        .decode()
        .map_err(|e| ConvertError::failed(FailureCause::DecodeUnsupported, target.token(), e.to_string()))
}

/// Encode `img` as `target` in memory.
pub fn encode(img: &DynamicImage, target: &Format, settings: FastPathSettings) -> Result<Vec<u8>, ConvertError> {
    let codec_err = |e: image::ImageError| {
        ConvertError::failed(FailureCause::Codec, target.token(), e.to_string())
    };
    let mut buf = Vec::new();

    match target {
        Format::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            let encoder = JpegEncoder::new_with_quality(&mut buf, settings.jpeg_quality);
            rgb.write_with_encoder(encoder).map_err(codec_err)?;
        }
        Format::Png => {
            let encoder =
                PngEncoder::new_with_quality(&mut buf, CompressionType::Default, FilterType::Adaptive);
            img.write_with_encoder(encoder).map_err(codec_err)?;
        }
        Format::Webp => {
            let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
            let encoder = WebPEncoder::new_lossless(&mut buf);
            rgba.write_with_encoder(encoder).map_err(codec_err)?;
        }
        Format::Avif => {
            let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
            let encoder =
                AvifEncoder::new_with_speed_quality(&mut buf, settings.avif_speed, settings.avif_quality);
            rgba.write_with_encoder(encoder).map_err(codec_err)?;
        }
        Format::Gif => {
            // trailer is written when the encoder drops
            let mut encoder = GifEncoder::new(&mut buf);
            encoder
                .encode_frame(Frame::new(img.to_rgba8()))
                .map_err(codec_err)?;
        }
        Format::Tiff => {
            let rgba = img.to_rgba8();
            let mut encoder = TiffEncoder::new(Cursor::new(&mut buf))
                .map_err(|e| ConvertError::failed(FailureCause::Codec, target.token(), e.to_string()))?;
            encoder
                .write_image_with_compression::<colortype::RGBA8, _>(
                    rgba.width(),
                    rgba.height(),
                    Lzw::default(),
                    rgba.as_raw(),
                )
                .map_err(|e| ConvertError::failed(FailureCause::Codec, target.token(), e.to_string()))?;
        }
        other => {
            return Err(ConvertError::failed(
                FailureCause::EncodeUnsupported,
                other.token(),
                format!("in-process codec cannot write {other}"),
            ))
        }
    }

    if buf.is_empty() {
        return Err(ConvertError::failed(
            FailureCause::EmptyOutput,
            target.token(),
            "encoder produced no bytes",
        ));
    }
    Ok(buf)
}
