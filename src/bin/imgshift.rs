//! CLI binary for imgshift.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConverterConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use imgshift::{
    ArchiveRequest, BatchProgressCallback, BatchReport, Converter, ConverterConfig, Format,
    ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per file.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Start of the file currently being converted.
    current: Mutex<Option<Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_batch_start
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>2}/{len} files  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            current: Mutex::new(None),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed(&self) -> String {
        let ms = self
            .current
            .lock()
            .ok()
            .and_then(|mut t| t.take())
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);
        dim(&format!("{:.1}s", ms as f64 / 1000.0))
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Converting {total} files…"))
        ));
    }

    fn on_file_start(&self, _index: usize, _total: usize, name: &str) {
        if let Ok(mut t) = self.current.lock() {
            *t = Some(Instant::now());
        }
        self.bar.set_message(name.to_string());
    }

    fn on_file_complete(&self, index: usize, total: usize, output_name: &str) {
        self.bar.println(format!(
            "  {} {:>2}/{:<2}  {}  {}",
            green("✓"),
            index,
            total,
            output_name,
            self.elapsed(),
        ));
        self.bar.inc(1);
    }

    fn on_file_error(&self, index: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        // First line only; guidance text can run long.
        let msg = error.lines().next().unwrap_or(error);
        let msg = if msg.chars().count() > 80 {
            format!("{}\u{2026}", msg.chars().take(79).collect::<String>())
        } else {
            msg.to_string()
        };
        self.bar.println(format!(
            "  {} {:>2}/{:<2}  {}  {}",
            red("✗"),
            index,
            total,
            red(&msg),
            self.elapsed(),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total: usize, success_count: usize) {
        let failed = total.saturating_sub(success_count);
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} files converted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} files converted  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert one file
  imgshift convert photo.heic jpg

  # Convert a URL
  imgshift convert https://example.com/logo.png webp

  # Batch convert and bundle the results
  imgshift batch png *.gif --archive animations

  # Bundle earlier outputs
  imgshift archive holiday cat-1a2b.webp dog-3c4d.webp

  # What can this machine convert?
  imgshift capabilities --json

  # Delete outputs older than the retention window
  imgshift sweep

RUNTIME DEPENDENCIES:
  ImageMagick   `magick` (v7) or `convert` (v6) on PATH, for non-standard formats
  potrace       traced SVG / EPS / PS / AI output
  PDFium        shared library for PDF output

ENVIRONMENT VARIABLES:
  IMGSHIFT_UPLOAD_DIR     Directory for staged inputs (default: uploads)
  IMGSHIFT_OUTPUT_DIR     Directory for converted files (default: converted)
  IMGSHIFT_MAGICK         Path to the ImageMagick binary
  IMGSHIFT_POTRACE        Path to the potrace binary
  PDFIUM_LIB_PATH         Path to an existing libpdfium
  RUST_LOG                Override log filter
"#;

/// Convert images between formats.
#[derive(Parser, Debug)]
#[command(
    name = "imgshift",
    version,
    about = "Convert images between formats",
    long_about = "Convert images between formats. Common raster formats are converted in-process; \
everything else goes through ImageMagick, vector targets through potrace, and PDF output through \
PDFium.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Directory for staged inputs.
    #[arg(long, global = true, env = "IMGSHIFT_UPLOAD_DIR", default_value = "uploads")]
    upload_dir: PathBuf,

    /// Directory for converted files and archives.
    #[arg(long, global = true, env = "IMGSHIFT_OUTPUT_DIR", default_value = "converted")]
    output_dir: PathBuf,

    /// Per-invocation ImageMagick/potrace timeout in seconds.
    #[arg(long, global = true, env = "IMGSHIFT_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, global = true, env = "IMGSHIFT_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Path to the ImageMagick binary.
    #[arg(long, global = true, env = "IMGSHIFT_MAGICK")]
    magick: Option<PathBuf>,

    /// Path to the potrace binary.
    #[arg(long, global = true, env = "IMGSHIFT_POTRACE")]
    potrace: Option<PathBuf>,

    /// JPEG quality (1–100).
    #[arg(long, global = true, env = "IMGSHIFT_QUALITY", default_value_t = 90,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Output structured JSON instead of text.
    #[arg(long, global = true, env = "IMGSHIFT_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "IMGSHIFT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "IMGSHIFT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "IMGSHIFT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert one file or URL.
    Convert {
        /// Local path or HTTP/HTTPS URL.
        input: String,
        /// Target format (jpg, png, webp, svg, pdf, …).
        target: String,
    },
    /// Convert several files to one target format.
    Batch {
        /// Target format.
        target: String,
        /// Local paths or URLs (at most 20).
        #[arg(required = true)]
        inputs: Vec<String>,
        /// Bundle the successful outputs into `<NAME>.zip`.
        #[arg(long, value_name = "NAME")]
        archive: Option<String>,
    },
    /// Bundle earlier outputs into a ZIP.
    Archive {
        /// Archive name; `.zip` is appended when missing.
        name: String,
        /// Output files, relative to the output directory or absolute.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Show which formats this machine can convert.
    Capabilities,
    /// Delete artifacts older than the retention window.
    Sweep {
        /// Retention window in seconds.
        #[arg(long, env = "IMGSHIFT_RETENTION", default_value_t = 7200)]
        retention: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let common = &cli.common;

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let is_batch = matches!(cli.command, Command::Batch { .. });
    let show_progress = is_batch && !common.quiet && !common.no_progress && !common.json;
    let filter = if common.verbose {
        "debug"
    } else if common.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let retention = match cli.command {
        Command::Sweep { retention } => Some(retention),
        _ => None,
    };
    let config = build_config(common, progress_cb, retention)?;
    let converter = Converter::new(config)
        .await
        .context("Failed to initialise converter")?;

    match cli.command {
        Command::Convert { ref input, ref target } => {
            let target = parse_target(target)?;
            let file = converter
                .convert_path(input, &target)
                .await
                .context("Conversion failed")?;
            if common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&file).context("Failed to serialise output")?
                );
            } else {
                println!("{}", file.output_path.display());
                if !common.quiet {
                    eprintln!(
                        "{}  {}  {}  {}",
                        green("✔"),
                        bold(&file.file_name()),
                        dim(&format!("{} bytes", file.size_bytes)),
                        dim(&file.strategy.to_string()),
                    );
                }
            }
        }

        Command::Batch {
            ref target,
            ref inputs,
            ref archive,
        } => {
            let target = parse_target(target)?;
            let job = converter
                .stage_batch(inputs, &target)
                .await
                .context("Batch rejected")?;
            let report = converter.run_batch(job).await.context("Batch rejected")?;
            print_report(&report, common, show_progress)?;

            if let Some(name) = archive {
                if report.successful() == 0 {
                    anyhow::bail!("Nothing to archive: every file in the batch failed");
                }
                let out = converter
                    .build_archive(ArchiveRequest {
                        references: report.output_paths(),
                        name: name.clone(),
                    })
                    .await
                    .context("Archive failed")?;
                if !common.quiet {
                    eprintln!(
                        "{} archived {} files  →  {}",
                        green("✔"),
                        out.entries,
                        bold(&out.path.display().to_string())
                    );
                }
            }
        }

        Command::Archive { ref name, ref files } => {
            let out = converter
                .build_archive(ArchiveRequest {
                    references: files.clone(),
                    name: name.clone(),
                })
                .await
                .context("Archive failed")?;
            if common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&out).context("Failed to serialise output")?
                );
            } else {
                println!("{}", out.path.display());
                for skipped in &out.skipped {
                    eprintln!("  {} skipped missing {}", cyan("⚠"), skipped.display());
                }
            }
        }

        Command::Capabilities => {
            let report = converter.capabilities().report();
            if common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("Failed to serialise report")?
                );
            } else {
                match report.tool {
                    Some(ref tool) => println!(
                        "ImageMagick:  {} ({})",
                        tool.path.display(),
                        tool.version.as_deref().unwrap_or("unknown version")
                    ),
                    None => println!("ImageMagick:  {}", red("not found")),
                }
                println!(
                    "potrace:      {}",
                    if report.tracer_available { green("found") } else { red("not found") }
                );
                println!("Fast path:    {}", report.fast_path_formats.join(", "));
                println!("Advanced:     {}", report.advanced_formats.join(", "));
            }
        }

        Command::Sweep { .. } => {
            let report = converter.sweep().await.context("Sweep failed")?;
            if common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("Failed to serialise report")?
                );
            } else if !common.quiet {
                eprintln!(
                    "Removed {} expired files, kept {}",
                    report.removed.len(),
                    report.kept
                );
            }
        }
    }

    Ok(())
}

/// Map CLI args to `ConverterConfig`.
fn build_config(
    common: &CommonArgs,
    progress: Option<ProgressCallback>,
    retention: Option<u64>,
) -> Result<ConverterConfig> {
    let mut builder = ConverterConfig::builder()
        .upload_dir(&common.upload_dir)
        .output_dir(&common.output_dir)
        .tool_timeout_secs(common.timeout)
        .download_timeout_secs(common.download_timeout)
        .jpeg_quality(common.quality);

    if let Some(ref path) = common.magick {
        builder = builder.magick_path(path);
    }
    if let Some(ref path) = common.potrace {
        builder = builder.potrace_path(path);
    }
    if let Some(secs) = retention {
        builder = builder.retention_secs(secs);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse a target format token, rejecting ones that are not formats at all.
fn parse_target(s: &str) -> Result<Format> {
    let format = Format::from_token(s);
    if format.is_malformed() {
        anyhow::bail!("'{}' is not a valid target format", s);
    }
    Ok(format)
}

fn print_report(report: &BatchReport, common: &CommonArgs, show_progress: bool) -> Result<()> {
    if common.json {
        let value = serde_json::json!({
            "summary": report.summary(),
            "target_format": report.target_format,
            "entries": report.entries,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&value).context("Failed to serialise report")?
        );
        return Ok(());
    }

    for path in report.output_paths() {
        println!("{}", path.display());
    }
    // The progress callback already printed per-file lines and a summary.
    if !common.quiet && !show_progress {
        eprintln!(
            "Converted {}/{} files",
            report.successful(),
            report.total()
        );
        for entry in &report.entries {
            if let imgshift::ConversionResult::Failure { ref message, .. } = entry.result {
                let first = message.lines().next().unwrap_or(message);
                eprintln!("  {} {}: {}", red("✗"), entry.original_name, first);
            }
        }
    }
    Ok(())
}
