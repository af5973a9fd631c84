//! Integration tests for the conversion pipeline.
//!
//! The external tool is replaced by `ScriptedTool`, which records every
//! invocation and fails on request, so fallback order, error propagation and
//! cleanup can be checked without ImageMagick installed. The tests at the end
//! use the real ImageMagick/PDFium and skip themselves when those are
//! missing.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use async_trait::async_trait;
use imgshift::capabilities::{ToolInfo, ToolProbe};
use imgshift::pipeline::document::pdfium_available;
use imgshift::pipeline::external::{ToolJob, ToolMode};
use imgshift::{
    ArchiveRequest, BatchJob, BatchProgressCallback, CapabilityTable, ConversionResult, ConvertError,
    Converter, ConverterConfig, ErrorCategory, ExternalConverter, FailureCause, Format, Strategy,
};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Stand-in for ImageMagick + potrace.
struct ScriptedTool {
    available: AtomicBool,
    tracer: bool,
    calls: Mutex<Vec<ToolMode>>,
    traces: AtomicUsize,
    /// Modes that fail, and with which cause.
    failures: Vec<(ToolMode, FailureCause)>,
    /// Succeed but leave a zero-byte file.
    empty_output: bool,
    /// Succeed with a small decodable PNG instead of placeholder bytes.
    png_output: bool,
}

impl ScriptedTool {
    fn installed() -> Self {
        Self {
            available: AtomicBool::new(true),
            tracer: true,
            calls: Mutex::new(Vec::new()),
            traces: AtomicUsize::new(0),
            failures: Vec::new(),
            empty_output: false,
            png_output: false,
        }
    }

    fn missing() -> Self {
        Self {
            available: AtomicBool::new(false),
            tracer: false,
            ..Self::installed()
        }
    }

    fn failing(mut self, mode: ToolMode, cause: FailureCause) -> Self {
        self.failures.push((mode, cause));
        self
    }

    fn calls(&self) -> Vec<ToolMode> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExternalConverter for ScriptedTool {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn tracer_available(&self) -> bool {
        self.is_available() && self.tracer
    }

    async fn probe(&self) -> ToolProbe {
        if !self.is_available() {
            return ToolProbe::default();
        }
        ToolProbe {
            tool: Some(ToolInfo {
                name: "ImageMagick".into(),
                path: PathBuf::from("/usr/bin/magick"),
                version: Some("7.1.1-scripted".into()),
            }),
            formats: Vec::new(),
            tracer_available: self.tracer,
        }
    }

    async fn run(&self, job: &ToolJob) -> Result<(), ConvertError> {
        self.calls.lock().unwrap().push(job.mode);
        if !self.is_available() {
            return Err(ConvertError::ToolUnavailable {
                tool: "ImageMagick".into(),
            });
        }
        if let Some((_, cause)) = self.failures.iter().find(|(m, _)| *m == job.mode) {
            // partial output, as a crashed tool would leave
            std::fs::write(&job.output, b"partial").unwrap();
            return Err(ConvertError::failed(
                *cause,
                job.target.token(),
                "scripted failure: magick: no decode delegate",
            ));
        }
        if self.png_output {
            image::RgbImage::from_pixel(6, 4, image::Rgb([10, 120, 200]))
                .save_with_format(&job.output, image::ImageFormat::Png)
                .unwrap();
            return Ok(());
        }
        let body: &[u8] = if self.empty_output { b"" } else { b"scripted output" };
        std::fs::write(&job.output, body).unwrap();
        Ok(())
    }

    async fn trace(&self, bitmap: &Path, output: &Path, _target: &Format) -> Result<(), ConvertError> {
        assert!(bitmap.exists(), "bitmap must exist when tracing");
        self.traces.fetch_add(1, Ordering::SeqCst);
        std::fs::write(output, b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>").unwrap();
        Ok(())
    }
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn uploads(&self) -> PathBuf {
        self.dir.path().join("uploads")
    }

    fn converted(&self) -> PathBuf {
        self.dir.path().join("converted")
    }

    fn config(&self) -> imgshift::ConverterConfigBuilder {
        ConverterConfig::builder()
            .upload_dir(self.uploads())
            .output_dir(self.converted())
            .tool_timeout_secs(5)
    }

    async fn converter(&self, tool: Arc<ScriptedTool>) -> Converter {
        self.converter_with(self.config().build().unwrap(), tool).await
    }

    async fn converter_with(&self, config: ConverterConfig, tool: Arc<ScriptedTool>) -> Converter {
        let table = CapabilityTable::from_probe(&tool.probe().await);
        Converter::with_tool(config, tool, table).unwrap()
    }

    /// A solid-colour PNG in the workspace (outside the upload dir).
    fn png(&self, name: &str, w: u32, h: u32) -> PathBuf {
        let path = self.dir.path().join(name);
        image::RgbImage::from_pixel(w, h, image::Rgb([200, 30, 30]))
            .save_with_format(&path, image::ImageFormat::Png)
            .unwrap();
        path
    }

    fn file(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn upload_count(&self) -> usize {
        count(&self.uploads())
    }

    fn output_count(&self) -> usize {
        count(&self.converted())
    }
}

fn count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

fn s(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

// ── Fast path ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn png_to_jpg_uses_fast_path() {
    let ws = Workspace::new();
    let tool = Arc::new(ScriptedTool::installed());
    let converter = ws.converter(tool.clone()).await;
    let input = ws.png("square.png", 100, 100);

    let file = converter.convert_path(&s(&input), &Format::Jpeg).await.unwrap();

    assert_eq!(file.strategy, Strategy::FastPath);
    assert!(!file.preprocessed);
    assert!(file.size_bytes > 0);
    assert!(file.file_name().starts_with("square-"));
    assert!(file.file_name().ends_with(".jpg"));
    let reader = image::ImageReader::open(&file.output_path)
        .unwrap()
        .with_guessed_format()
        .unwrap();
    assert_eq!(reader.format(), Some(image::ImageFormat::Jpeg));
    assert_eq!(image::image_dimensions(&file.output_path).unwrap(), (100, 100));

    assert!(tool.calls().is_empty(), "fast path must not call the tool");
    assert!(input.exists(), "caller's original must survive");
    assert_eq!(ws.upload_count(), 0);
}

#[tokio::test]
async fn gif_output_is_a_real_gif() {
    let ws = Workspace::new();
    let converter = ws.converter(Arc::new(ScriptedTool::missing())).await;
    let input = ws.png("frame.png", 32, 16);

    let file = converter.convert_path(&s(&input), &Format::Gif).await.unwrap();

    let bytes = std::fs::read(&file.output_path).unwrap();
    assert!(bytes.starts_with(b"GIF8"), "expected GIF signature");
    assert_eq!(image::image_dimensions(&file.output_path).unwrap(), (32, 16));
}

#[tokio::test]
async fn fast_path_failure_falls_back_to_tool() {
    let ws = Workspace::new();
    let tool = Arc::new(ScriptedTool::installed());
    let converter = ws.converter(tool.clone()).await;
    // a PNG name over bytes the codec cannot decode
    let input = ws.file("odd.png", b"\x89PNG but not really");

    let file = converter.convert_path(&s(&input), &Format::Webp).await.unwrap();

    assert_eq!(file.strategy, Strategy::ExternalTool);
    assert_eq!(tool.calls(), [ToolMode::Direct]);
    assert_eq!(ws.upload_count(), 0);
}

// ── Input validation ─────────────────────────────────────────────────────────

#[tokio::test]
async fn unrecognised_upload_is_invalid_input() {
    let ws = Workspace::new();
    let converter = ws.converter(Arc::new(ScriptedTool::installed())).await;

    let err = converter
        .stage_bytes(b"meeting notes", "notes.qqq", Some("text/plain"), &Format::Png)
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::InvalidInput);
    assert_eq!(ws.upload_count(), 0);
}

#[tokio::test]
async fn missing_tool_means_unsupported_target() {
    let ws = Workspace::new();
    let tool = Arc::new(ScriptedTool::missing());
    let converter = ws.converter(tool.clone()).await;
    let input = ws.png("logo.png", 8, 8);

    for target in [Format::Ico, Format::Svg, Format::from_token("jp2")] {
        let err = converter.convert_path(&s(&input), &target).await.unwrap_err();
        assert_eq!(
            err.category(),
            ErrorCategory::UnsupportedConversion,
            "target {target}: {err}"
        );
    }
    assert!(tool.calls().is_empty());
    assert_eq!(ws.upload_count(), 0);
    assert_eq!(ws.output_count(), 0);
}

// ── External tool ────────────────────────────────────────────────────────────

#[tokio::test]
async fn tool_timeout_reaches_caller_without_raw_text() {
    let ws = Workspace::new();
    let tool = Arc::new(ScriptedTool::installed().failing(ToolMode::Direct, FailureCause::Timeout));
    let converter = ws.converter(tool.clone()).await;
    let input = ws.png("icon.png", 64, 64);

    let err = converter.convert_path(&s(&input), &Format::Ico).await.unwrap_err();

    assert_eq!(err.cause(), Some(FailureCause::Timeout));
    assert!(!err.to_string().contains("delegate"), "raw tool text leaked: {err}");
    assert!(err.detail().unwrap().contains("scripted"));
    assert_eq!(ws.upload_count(), 0);
    assert_eq!(ws.output_count(), 0, "partial output must be removed");
}

#[tokio::test]
async fn empty_tool_output_is_a_failure() {
    let ws = Workspace::new();
    let tool = Arc::new(ScriptedTool {
        empty_output: true,
        ..ScriptedTool::installed()
    });
    let converter = ws.converter(tool).await;
    let input = ws.png("icon.png", 16, 16);

    let err = converter.convert_path(&s(&input), &Format::Bmp).await.unwrap_err();

    assert_eq!(err.cause(), Some(FailureCause::EmptyOutput));
    assert_eq!(ws.output_count(), 0);
    assert_eq!(ws.upload_count(), 0);
}

#[tokio::test]
async fn layered_input_is_preprocessed_first() {
    let ws = Workspace::new();
    let tool = Arc::new(ScriptedTool::installed());
    let converter = ws.converter(tool.clone()).await;
    let input = ws.file("poster.psd", b"8BPS\0\x01layered");

    let file = converter.convert_path(&s(&input), &Format::Jpeg).await.unwrap();

    assert!(file.preprocessed);
    assert_eq!(file.strategy, Strategy::ExternalTool);
    assert_eq!(tool.calls(), [ToolMode::Normalize, ToolMode::Direct]);
    assert_eq!(ws.upload_count(), 0, "normalised intermediate must be removed");
}

#[tokio::test]
async fn failed_preprocessing_converts_the_original() {
    let ws = Workspace::new();
    let tool = Arc::new(
        ScriptedTool::installed().failing(ToolMode::Normalize, FailureCause::DecodeUnsupported),
    );
    let converter = ws.converter(tool.clone()).await;
    let input = ws.file("raw.cr2", b"II*\0raw sensor data");

    let file = converter.convert_path(&s(&input), &Format::Webp).await.unwrap();

    assert!(!file.preprocessed);
    assert_eq!(tool.calls(), [ToolMode::Normalize, ToolMode::Direct]);
    assert_eq!(ws.upload_count(), 0);
}

// ── Vector synthesis ─────────────────────────────────────────────────────────

#[tokio::test]
async fn vector_tiers_run_in_order() {
    let ws = Workspace::new();
    let tool = Arc::new(ScriptedTool::installed().failing(ToolMode::Grayscale, FailureCause::ToolFailed));
    let converter = ws.converter(tool.clone()).await;
    let input = ws.png("sketch.png", 20, 20);

    let file = converter.convert_path(&s(&input), &Format::Svg).await.unwrap();

    assert_eq!(file.strategy, Strategy::MonochromeTrace);
    assert_eq!(tool.calls(), [ToolMode::Grayscale, ToolMode::Monochrome]);
    assert_eq!(tool.traces.load(Ordering::SeqCst), 1);
    assert!(std::fs::read_to_string(&file.output_path).unwrap().contains("<svg"));
    assert_eq!(ws.upload_count(), 0, "bitmaps must be removed");
}

#[tokio::test]
async fn vector_falls_through_to_direct_conversion() {
    let ws = Workspace::new();
    let tool = Arc::new(
        ScriptedTool::installed()
            .failing(ToolMode::Grayscale, FailureCause::ToolFailed)
            .failing(ToolMode::Monochrome, FailureCause::ToolFailed),
    );
    let converter = ws.converter(tool.clone()).await;
    let input = ws.png("sketch.png", 20, 20);

    let file = converter.convert_path(&s(&input), &Format::Eps).await.unwrap();

    assert_eq!(file.strategy, Strategy::ExternalTool);
    assert_eq!(
        tool.calls(),
        [ToolMode::Grayscale, ToolMode::Monochrome, ToolMode::Direct]
    );
    assert_eq!(tool.traces.load(Ordering::SeqCst), 0);
}

// ── Batch ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingCallback {
    events: Mutex<Vec<String>>,
}

impl BatchProgressCallback for RecordingCallback {
    fn on_batch_start(&self, total: usize) {
        self.events.lock().unwrap().push(format!("start {total}"));
    }
    fn on_file_start(&self, index: usize, _total: usize, name: &str) {
        self.events.lock().unwrap().push(format!("file {index} {name}"));
    }
    fn on_file_complete(&self, index: usize, _total: usize, _output_name: &str) {
        self.events.lock().unwrap().push(format!("ok {index}"));
    }
    fn on_file_error(&self, index: usize, _total: usize, _error: &str) {
        self.events.lock().unwrap().push(format!("err {index}"));
    }
    fn on_batch_complete(&self, total: usize, success_count: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("done {success_count}/{total}"));
    }
}

#[tokio::test]
async fn batch_reports_every_file_and_never_short_circuits() {
    let ws = Workspace::new();
    let callback = Arc::new(RecordingCallback::default());
    let config = ws
        .config()
        .progress_callback(callback.clone())
        .build()
        .unwrap();
    let converter = ws.converter_with(config, Arc::new(ScriptedTool::missing())).await;

    let inputs = vec![
        s(&ws.png("a.png", 10, 10)),
        s(&ws.file("broken.png", b"definitely not a png")),
        s(&ws.png("c.png", 12, 12)),
    ];
    let job = converter.stage_batch(&inputs, &Format::Webp).await.unwrap();
    let report = converter.run_batch(job).await.unwrap();

    assert_eq!(report.total(), 3);
    assert_eq!(report.successful(), 2);
    assert_eq!(report.failed(), 1);
    let names: Vec<_> = report.entries.iter().map(|e| e.original_name.as_str()).collect();
    assert_eq!(names, ["a.png", "broken.png", "c.png"]);
    match &report.entries[1].result {
        ConversionResult::Failure { category, cause, .. } => {
            assert_eq!(*category, ErrorCategory::ConversionFailed);
            assert_eq!(*cause, Some(FailureCause::DecodeUnsupported));
        }
        other => panic!("expected failure, got {other:?}"),
    }

    assert_eq!(ws.upload_count(), 0);
    assert_eq!(ws.output_count(), 2);
    assert_eq!(
        callback.events.lock().unwrap().as_slice(),
        [
            "start 3",
            "file 1 a.png",
            "ok 1",
            "file 2 broken.png",
            "err 2",
            "file 3 c.png",
            "ok 3",
            "done 2/3",
        ]
    );
}

#[tokio::test]
async fn empty_batch_still_completes() {
    let ws = Workspace::new();
    let callback = Arc::new(RecordingCallback::default());
    let config = ws
        .config()
        .progress_callback(callback.clone())
        .build()
        .unwrap();
    let converter = ws.converter_with(config, Arc::new(ScriptedTool::missing())).await;

    let job = converter.stage_batch(&[], &Format::Png).await.unwrap();
    let report = converter.run_batch(job).await.unwrap();

    assert_eq!(report.total(), 0);
    assert_eq!(
        callback.events.lock().unwrap().as_slice(),
        ["start 0", "done 0/0"]
    );
}

#[tokio::test]
async fn unstageable_batch_input_keeps_its_slot() {
    let ws = Workspace::new();
    let converter = ws.converter(Arc::new(ScriptedTool::missing())).await;
    let inputs = vec![
        s(&ws.dir.path().join("vanished.png")),
        s(&ws.png("ok.png", 4, 4)),
    ];

    let job = converter.stage_batch(&inputs, &Format::Png).await.unwrap();
    let report = converter.run_batch(job).await.unwrap();

    assert_eq!(report.summary().total, 2);
    assert_eq!(report.entries[0].original_name, "vanished.png");
    assert!(!report.entries[0].result.is_success());
    assert!(report.entries[1].result.is_success());
}

#[tokio::test]
async fn oversized_batch_is_rejected_and_cleaned_up() {
    let ws = Workspace::new();
    let converter = ws.converter(Arc::new(ScriptedTool::missing())).await;
    let input = s(&ws.png("one.png", 2, 2));

    let paths = vec![input.clone(); 21];
    let err = converter.stage_batch(&paths, &Format::Jpeg).await.unwrap_err();
    assert!(matches!(
        err,
        ConvertError::ResourceExhausted {
            requested: 21,
            limit: 20
        }
    ));
    assert_eq!(ws.upload_count(), 0, "nothing staged for a rejected batch");

    // a hand-assembled job over the limit is rejected too, and its uploads removed
    let mut job = BatchJob::new(Format::Jpeg);
    for _ in 0..21 {
        job.push(converter.stage(&input, &Format::Jpeg).await.unwrap());
    }
    assert_eq!(ws.upload_count(), 21);
    let err = converter.run_batch(job).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::ResourceExhausted);
    assert_eq!(ws.upload_count(), 0);
    assert_eq!(ws.output_count(), 0);
}

#[tokio::test]
async fn batch_stream_yields_in_input_order() {
    use futures::StreamExt;

    let ws = Workspace::new();
    let converter = ws.converter(Arc::new(ScriptedTool::missing())).await;
    let inputs: Vec<String> = (0..4).map(|i| s(&ws.png(&format!("p{i}.png"), 3, 3))).collect();

    let job = converter.stage_batch(&inputs, &Format::Tiff).await.unwrap();
    let names: Vec<String> = converter
        .batch_stream(job)
        .unwrap()
        .map(|entry| entry.original_name)
        .collect()
        .await;

    assert_eq!(names, ["p0.png", "p1.png", "p2.png", "p3.png"]);
}

// ── Archive ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn archive_contains_exactly_the_requested_files() {
    let ws = Workspace::new();
    let converter = ws.converter(Arc::new(ScriptedTool::missing())).await;
    let a = converter
        .convert_path(&s(&ws.png("a.png", 5, 5)), &Format::Webp)
        .await
        .unwrap();
    let b = converter
        .convert_path(&s(&ws.png("b.png", 5, 5)), &Format::Webp)
        .await
        .unwrap();

    let out = converter
        .build_archive(ArchiveRequest {
            references: vec![
                a.output_path.clone(),
                PathBuf::from(b.file_name()),
                ws.converted().join("expired.webp"),
            ],
            name: "holiday".into(),
        })
        .await
        .unwrap();

    assert_eq!(out.entries, 2);
    assert_eq!(out.skipped.len(), 1);
    assert_eq!(out.path, ws.converted().join("holiday.zip"));

    let mut zip = zip::ZipArchive::new(std::fs::File::open(&out.path).unwrap()).unwrap();
    assert_eq!(zip.len(), 2);
    let mut bytes = Vec::new();
    zip.by_name(&a.file_name()).unwrap().read_to_end(&mut bytes).unwrap();
    assert_eq!(bytes, std::fs::read(&a.output_path).unwrap());
}

#[tokio::test]
async fn archive_packs_a_repeated_reference_once() {
    let ws = Workspace::new();
    let converter = ws.converter(Arc::new(ScriptedTool::missing())).await;
    let a = converter
        .convert_path(&s(&ws.png("a.png", 5, 5)), &Format::Png)
        .await
        .unwrap();

    let out = converter
        .build_archive(ArchiveRequest {
            references: vec![a.output_path.clone(), PathBuf::from(a.file_name())],
            name: "twice".into(),
        })
        .await
        .unwrap();

    assert_eq!(out.entries, 1);
    let zip = zip::ZipArchive::new(std::fs::File::open(&out.path).unwrap()).unwrap();
    assert_eq!(zip.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_archives_with_one_name_never_collide() {
    for round in 0..20 {
        let ws = Workspace::new();
        let converter = ws.converter(Arc::new(ScriptedTool::missing())).await;
        let mine = converter
            .convert_path(&s(&ws.png("mine.png", 4, 4)), &Format::Png)
            .await
            .unwrap();
        let theirs = converter
            .convert_path(&s(&ws.png("theirs.png", 4, 4)), &Format::Png)
            .await
            .unwrap();

        let request = |file: &imgshift::ConvertedFile| ArchiveRequest {
            references: vec![file.output_path.clone()],
            name: "converted-images".into(),
        };
        let (c1, c2) = (converter.clone(), converter.clone());
        let (r1, r2) = (request(&mine), request(&theirs));
        let first = tokio::spawn(async move { c1.build_archive(r1).await });
        let second = tokio::spawn(async move { c2.build_archive(r2).await });
        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        assert_ne!(first.path, second.path, "round {round}: both got {:?}", first.path);
        for (out, file) in [(&first, &mine), (&second, &theirs)] {
            let mut zip = zip::ZipArchive::new(std::fs::File::open(&out.path).unwrap()).unwrap();
            assert_eq!(zip.len(), 1);
            assert!(zip.by_name(&file.file_name()).is_ok(), "round {round}: wrong contents");
        }
    }
}

#[tokio::test]
async fn archive_of_nothing_fails() {
    let ws = Workspace::new();
    let converter = ws.converter(Arc::new(ScriptedTool::missing())).await;

    for references in [vec![], vec![PathBuf::from("gone.png")]] {
        let err = converter
            .build_archive(ArchiveRequest {
                references,
                name: "empty".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::ArchiveFailed { .. }));
    }
    assert_eq!(ws.output_count(), 0, "no empty archive may be written");
}

// ── Document ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn pdf_without_pdfium_is_unavailable_and_clean() {
    if pdfium_available() {
        println!("SKIP: PDFium library is installed");
        return;
    }
    let ws = Workspace::new();
    let tool = Arc::new(ScriptedTool::installed());
    let converter = ws.converter(tool.clone()).await;
    let input = ws.png("page.png", 30, 20);

    let err = converter.convert_path(&s(&input), &Format::Pdf).await.unwrap_err();

    assert!(
        matches!(err, ConvertError::ToolUnavailable { ref tool } if tool == "PDFium"),
        "{err:?}"
    );
    assert!(tool.calls().is_empty(), "no normalising without a document library");
    assert_eq!(ws.upload_count(), 0);
    assert_eq!(ws.output_count(), 0);
}

#[tokio::test]
async fn undecodable_pdf_input_is_normalised_then_embedded() {
    if !pdfium_available() {
        println!("SKIP: PDFium library not found");
        return;
    }
    let ws = Workspace::new();
    let tool = Arc::new(ScriptedTool {
        png_output: true,
        ..ScriptedTool::installed()
    });
    let converter = ws.converter(tool.clone()).await;
    let input = ws.file("scan.png", b"\x89PNG but not really");

    let file = converter.convert_path(&s(&input), &Format::Pdf).await.unwrap();

    assert_eq!(file.strategy, Strategy::Document);
    assert_eq!(tool.calls(), [ToolMode::Normalize]);
    assert!(std::fs::read(&file.output_path).unwrap().starts_with(b"%PDF"));
    assert_eq!(ws.upload_count(), 0);
    assert_eq!(ws.output_count(), 1, "normalised intermediate must be removed");
}

#[tokio::test]
async fn every_document_tier_failing_is_a_document_failure() {
    if !pdfium_available() {
        println!("SKIP: PDFium library not found");
        return;
    }
    let ws = Workspace::new();
    // normalising "succeeds" but leaves bytes no codec can read
    let tool = Arc::new(ScriptedTool::installed());
    let converter = ws.converter(tool.clone()).await;
    let input = ws.file("scan.png", b"\x89PNG but not really");

    let err = converter.convert_path(&s(&input), &Format::Pdf).await.unwrap_err();

    assert_eq!(err.cause(), Some(FailureCause::Document));
    assert_eq!(tool.calls(), [ToolMode::Normalize]);
    assert_eq!(ws.upload_count(), 0);
    assert_eq!(ws.output_count(), 0);
}

// ── Capabilities ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn refresh_picks_up_a_newly_installed_tool() {
    let ws = Workspace::new();
    let tool = Arc::new(ScriptedTool::missing());
    let converter = ws.converter(tool.clone()).await;

    let before = converter.capabilities();
    assert!(!before.tool_available());
    assert!(!before.can_write(&Format::Ico));

    tool.available.store(true, Ordering::SeqCst);
    let after = converter.refresh_capabilities().await;

    assert!(after.tool_available());
    assert!(after.can_write(&Format::Ico));
    assert!(after.advanced_formats().contains(&"ico".to_string()));
    // the old snapshot is unchanged
    assert!(!before.tool_available());

    let input = ws.png("fav.png", 16, 16);
    let file = converter.convert_path(&s(&input), &Format::Ico).await.unwrap();
    assert_eq!(file.strategy, Strategy::ExternalTool);
}

// ── Retention ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn sweep_removes_expired_outputs() {
    let ws = Workspace::new();
    let config = ws.config().retention_secs(0).build().unwrap();
    let converter = ws.converter_with(config, Arc::new(ScriptedTool::missing())).await;
    converter
        .convert_path(&s(&ws.png("old.png", 4, 4)), &Format::Jpeg)
        .await
        .unwrap();
    assert_eq!(ws.output_count(), 1);

    let report = converter.sweep().await.unwrap();

    assert_eq!(report.removed.len(), 1);
    assert_eq!(ws.output_count(), 0);
}

// ── Real tools (skipped when missing) ────────────────────────────────────────

/// Skip this test unless ImageMagick is on PATH.
macro_rules! skip_unless_magick {
    () => {{
        if which::which("magick").is_err() && which::which("convert").is_err() {
            println!("SKIP: ImageMagick not installed");
            return;
        }
    }};
}

#[tokio::test]
async fn real_magick_writes_bmp() {
    skip_unless_magick!();
    let ws = Workspace::new();
    let converter = Converter::new(ws.config().build().unwrap()).await.unwrap();
    let input = ws.png("real.png", 40, 30);

    let file = converter.convert_path(&s(&input), &Format::Bmp).await.unwrap();

    assert_eq!(file.strategy, Strategy::ExternalTool);
    assert_eq!(image::image_dimensions(&file.output_path).unwrap(), (40, 30));
    assert_eq!(ws.upload_count(), 0);
}

#[tokio::test]
async fn real_pdfium_embeds_image() {
    if !pdfium_available() {
        println!("SKIP: PDFium library not found");
        return;
    }
    let ws = Workspace::new();
    let converter = ws.converter(Arc::new(ScriptedTool::missing())).await;
    let input = ws.png("page.png", 300, 200);

    let file = converter.convert_path(&s(&input), &Format::Pdf).await.unwrap();

    assert_eq!(file.strategy, Strategy::Document);
    let bytes = std::fs::read(&file.output_path).unwrap();
    assert!(bytes.starts_with(b"%PDF"));
}
