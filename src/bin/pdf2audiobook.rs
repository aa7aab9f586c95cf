//! CLI binary for pdf2audiobook.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `AudiobookConfig`, runs the conversion and prints a summary.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf2audiobook::{
    concatenate_directory, convert, inspect, AudiobookConfig, AudiobookProgressCallback,
    ChapterIndex, FigureKeyPolicy, ProgressCallback, SpeechBackend, VoiceProfile,
};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar over pages, with one log line per page and per chapter.
/// Pages finish out of order, so start times are tracked per page.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Extracting pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut t| t.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl AudiobookProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Narrating");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Starting narration of {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut t) = self.start_times.lock() {
            t.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, chunk_count: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<10}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{chunk_count:>3} chunks")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_chapter_complete(&self, chapter: u32, track: &Path) {
        self.bar.println(format!(
            "{} Chapter {}  →  {}",
            green("♪"),
            bold(&chapter.to_string()),
            track.display()
        ));
    }

    fn on_chapter_failed(&self, chapter: u32, failed_pages: &[usize]) {
        self.bar.println(format!(
            "{} Chapter {} not assembled  {}",
            red("✘"),
            bold(&chapter.to_string()),
            dim(&format!("failed pages: {failed_pages:?}")),
        ));
    }

    fn on_run_complete(&self, total_pages: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = total_pages.saturating_sub(success_count);
        if failed == 0 {
            eprintln!(
                "{} {} pages narrated successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages narrated  ({} failed)",
                if failed == total_pages { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Narrate a book with a local espeak-ng voice
  pdf2audiobook book.pdf --chapters chapters.yaml -o book-audio

  # Use an XTTS server with a cloned voice
  pdf2audiobook book.pdf --chapters chapters.yaml \
      --tts-endpoint http://localhost:8020/tts_to_audio/ \
      --speaker-wav /voices/narrator.wav --language en

  # Inspect PDF metadata (no API key needed)
  pdf2audiobook --inspect-only book.pdf

  # Re-join numbered WAV files in a directory (1.wav, 2.wav, 10.wav, ...)
  pdf2audiobook --concat book-audio/pages/12/audio --concat-output combined.wav

CHAPTER FILE (YAML, pages 1-indexed, bounds inclusive):
  - chapter_number: 1
    chapter_title_header: "1 Introduction"   # exact prefix stripped from each page
    chapter_title_footer: ""                 # exact suffix; empty = none
    chapter_start_page: 3
    chapter_end_page: 18

OUTPUT LAYOUT:
  <out>/pages/<n>/image/page.png
  <out>/pages/<n>/audio/<chunk>.wav
  <out>/pages/<n>/audio/combined.wav
  <out>/chapters/<k>.wav
  <out>/document.json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory containing libpdfium
"#;

/// Turn a PDF book into a chapter-segmented audiobook.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2audiobook",
    version,
    about = "Turn a PDF book into a chapter-segmented audiobook",
    long_about = "Clean each page of a PDF with a Vision Language Model, describe its figures \
once per book, synthesise the text with a speech engine, and join the audio into one track \
per chapter.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF file (or, with --concat, a directory of numbered WAV files).
    input: PathBuf,

    /// YAML chapter definitions.
    #[arg(long, env = "PDF2AUDIOBOOK_CHAPTERS", required_unless_present_any = ["inspect_only", "concat"])]
    chapters: Option<PathBuf>,

    /// Root directory for page images, audio and document.json.
    #[arg(short, long, env = "PDF2AUDIOBOOK_OUTPUT_DIR", default_value = "outputs")]
    output_dir: PathBuf,

    /// Vision model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Vision provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// XTTS-style synthesis endpoint. Uses local espeak-ng when unset.
    #[arg(long, env = "PDF2AUDIOBOOK_TTS_ENDPOINT")]
    tts_endpoint: Option<String>,

    /// Reference recording for voice cloning (path as seen by the TTS server).
    #[arg(long, env = "PDF2AUDIOBOOK_SPEAKER_WAV")]
    speaker_wav: Option<PathBuf>,

    /// Language tag passed to the speech engine.
    #[arg(long, env = "PDF2AUDIOBOOK_LANGUAGE", default_value = "en")]
    language: String,

    /// Pages processed concurrently.
    #[arg(short, long, env = "PDF2AUDIOBOOK_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Maximum characters per synthesis chunk.
    #[arg(long, env = "PDF2AUDIOBOOK_MAX_CHUNK_CHARS", default_value_t = 200)]
    max_chunk_chars: usize,

    /// How figure descriptions are deduplicated.
    #[arg(long, env = "PDF2AUDIOBOOK_FIGURE_KEY", value_enum, default_value = "name")]
    figure_key: FigureKeyArg,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2AUDIOBOOK_PASSWORD")]
    password: Option<String>,

    /// Max vision output tokens per call.
    #[arg(long, env = "PDF2AUDIOBOOK_MAX_TOKENS", default_value_t = 4000)]
    max_tokens: usize,

    /// Vision temperature (0.0–2.0).
    #[arg(long, env = "PDF2AUDIOBOOK_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per vision call.
    #[arg(long, env = "PDF2AUDIOBOOK_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Retries per synthesis chunk.
    #[arg(long, env = "PDF2AUDIOBOOK_SYNTHESIS_RETRIES", default_value_t = 2)]
    synthesis_retries: u32,

    /// Per-call vision timeout in seconds.
    #[arg(long, env = "PDF2AUDIOBOOK_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Per-chunk synthesis timeout in seconds.
    #[arg(long, env = "PDF2AUDIOBOOK_SYNTHESIS_TIMEOUT", default_value_t = 300)]
    synthesis_timeout: u64,

    /// Print the run result as JSON.
    #[arg(long, env = "PDF2AUDIOBOOK_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2AUDIOBOOK_NO_PROGRESS")]
    no_progress: bool,

    /// Print PDF metadata only, no conversion.
    #[arg(long)]
    inspect_only: bool,

    /// Concatenate the numbered WAV files in INPUT (a directory) and exit.
    #[arg(long)]
    concat: bool,

    /// File name written by --concat, inside the directory.
    #[arg(long, default_value = "combined.wav")]
    concat_output: String,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2AUDIOBOOK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2AUDIOBOOK_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum FigureKeyArg {
    /// One description per figure name across the whole book.
    Name,
    /// One description per figure name within each chapter.
    Chapter,
}

impl From<FigureKeyArg> for FigureKeyPolicy {
    fn from(v: FigureKeyArg) -> Self {
        match v {
            FigureKeyArg::Name => FigureKeyPolicy::Name,
            FigureKeyArg::Chapter => FigureKeyPolicy::ChapterAndName,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only && !cli.concat;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
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

    // ── Concat mode ──────────────────────────────────────────────────────
    if cli.concat {
        let track = tokio::task::spawn_blocking({
            let dir = cli.input.clone();
            let name = cli.concat_output.clone();
            move || concatenate_directory(&dir, &name)
        })
        .await
        .context("Concatenation task panicked")?
        .with_context(|| format!("Failed to concatenate {}", cli.input.display()))?;

        if !cli.quiet {
            eprintln!(
                "{} {} segments ({:.1}s)  →  {}",
                green("✔"),
                track.keys.len(),
                track.duration_secs(),
                bold(&track.path.display().to_string())
            );
        }
        return Ok(());
    }

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let meta = inspect(&cli.input).await.context("Failed to inspect PDF")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&meta).context("Failed to serialize metadata")?
            );
        } else {
            println!("File:         {}", cli.input.display());
            if let Some(ref t) = meta.title {
                println!("Title:        {}", t);
            }
            if let Some(ref a) = meta.author {
                println!("Author:       {}", a);
            }
            if let Some(ref s) = meta.subject {
                println!("Subject:      {}", s);
            }
            println!("Pages:        {}", meta.page_count);
            println!("PDF Version:  {}", meta.pdf_version);
            if let Some(ref p) = meta.producer {
                println!("Producer:     {}", p);
            }
            if let Some(ref c) = meta.creator {
                println!("Creator:      {}", c);
            }
        }
        return Ok(());
    }

    // ── Chapters + config ────────────────────────────────────────────────
    let chapter_file = cli
        .chapters
        .as_ref()
        .context("--chapters is required for conversion")?;
    let chapters = ChapterIndex::load(chapter_file)
        .with_context(|| format!("Failed to load chapters from {}", chapter_file.display()))?;

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn AudiobookProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Run conversion ───────────────────────────────────────────────────
    let output = convert(&cli.input, &chapters, &config)
        .await
        .context("Conversion failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if !cli.quiet {
        let s = &output.stats;
        eprintln!(
            "{}  {}/{} chapters  {}/{} pages  {} chunks  {} figures  {}ms  →  {}",
            if s.failed_chapters == 0 { green("✔") } else { cyan("⚠") },
            s.assembled_chapters,
            output.chapters.len(),
            s.processed_pages,
            s.total_pages,
            s.chunks_synthesised,
            s.figures_described,
            s.total_duration_ms,
            bold(&cli.output_dir.display().to_string()),
        );
        if s.synthesis_retries > 0 {
            eprintln!("   {}", dim(&format!("{} synthesis retries", s.synthesis_retries)));
        }
    }

    output
        .into_result()
        .context("Some chapters could not be assembled")?;
    Ok(())
}

/// Map CLI args to `AudiobookConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<AudiobookConfig> {
    let speech_backend = match cli.tts_endpoint {
        Some(ref endpoint) => SpeechBackend::Http {
            endpoint: endpoint.clone(),
        },
        None => SpeechBackend::Espeak,
    };

    let mut builder = AudiobookConfig::builder()
        .concurrency(cli.concurrency)
        .max_chunk_chars(cli.max_chunk_chars)
        .output_dir(&cli.output_dir)
        .voice(VoiceProfile {
            speaker_wav: cli.speaker_wav.clone(),
            language: cli.language.clone(),
        })
        .speech_backend(speech_backend)
        .figure_key(cli.figure_key.clone().into())
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .synthesis_retries(cli.synthesis_retries)
        .api_timeout_secs(cli.api_timeout)
        .synthesis_timeout_secs(cli.synthesis_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
