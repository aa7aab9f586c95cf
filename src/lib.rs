//! # pdf2audiobook
//!
//! Turn a PDF book into a chapter-segmented audiobook.
//!
//! ## Why this crate?
//!
//! Text pulled straight out of a PDF reads badly aloud: running headers
//! repeat on every page, extraction breaks words, figures are referenced but
//! never described, and symbols get spelled out as noise. Each page is
//! cleaned by a vision model looking at the rendered page, referenced
//! figures are described once per book, and the result is synthesised in
//! small chunks and stitched into one track per chapter.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF + chapters.yaml
//!  │
//!  ├─ 1. Input     validate the local file (or spill in-memory bytes)
//!  ├─ 2. Extract   text + PNG per chapter page via pdfium (spawn_blocking)
//!  ├─ 3. Segment   strip header/footer, find "Figure n.m", OCR cleanup
//!  ├─ 4. Figures   presence check + description, once per figure
//!  ├─ 5. Chunk     word-greedy chunks of ≤ max_chunk_chars
//!  ├─ 6. Speak     TTS per chunk → page track
//!  └─ 7. Assemble  page tracks → chapter track, once every page is done
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2audiobook::{convert, AudiobookConfig, ChapterIndex, SpeechBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let chapters = ChapterIndex::load("chapters.yaml")?;
//!     // Vision provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / ...
//!     let config = AudiobookConfig::builder()
//!         .speech_backend(SpeechBackend::Http {
//!             endpoint: "http://localhost:8020/tts_to_audio/".into(),
//!         })
//!         .output_dir("book-audio")
//!         .build()?;
//!     let output = convert("book.pdf", &chapters, &config).await?;
//!     for chapter in &output.chapters {
//!         println!("chapter {}: {:?}", chapter.number, chapter.status);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2audiobook` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdf2audiobook = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod chapters;
pub mod config;
pub mod convert;
pub mod coordinator;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use chapters::{Chapter, ChapterIndex};
pub use config::{AudiobookConfig, AudiobookConfigBuilder, FigureKeyPolicy, SpeechBackend, VoiceProfile};
pub use convert::{convert, convert_from_bytes, convert_sync, convert_with_chapter_file, inspect};
pub use coordinator::{ChapterBarrier, PipelineCoordinator};
pub use error::{AssemblyError, AudiobookError, ConfigError, PageError, ServiceError};
pub use output::{
    AudiobookOutput, AudiobookStats, ChapterResult, ChapterStatus, Document, DocumentMetadata,
    Figure, OutputLayout, PageRecord, PageResult, PageStage,
};
pub use pipeline::audio::{concatenate, concatenate_directory, AudioSegment, AudioTrack};
pub use pipeline::chunk::chunk_text;
pub use pipeline::figures::{FigureKey, FigureRegistry};
pub use pipeline::render::RawPage;
pub use pipeline::speech::{EspeakSynthesizer, HttpSynthesizer, SpeechSynthesizer};
pub use pipeline::vision::{LlmVision, PageImage, VisionCapability, VisionTask};
pub use progress::{AudiobookProgressCallback, NoopProgressCallback, ProgressCallback};
