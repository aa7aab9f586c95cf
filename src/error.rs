//! Error types for the pdf2audiobook library.
//!
//! Failures are split by blast radius:
//!
//! * [`AudiobookError`]: **Fatal**: nothing can be produced (bad input file,
//!   provider not configured, invalid chapter definitions). Returned as
//!   `Err(AudiobookError)` from the top-level `convert*` functions before any
//!   page work starts.
//!
//! * [`PageError`]: **Per page**: one page failed at one stage (transcription,
//!   figure description, synthesis, ...). Stored inside
//!   [`crate::output::PageResult`]; the chapter owning that page is then
//!   reported as failed instead of being assembled with a hole in it.
//!
//! * [`AssemblyError`]: audio concatenation failures, surfaced either as a
//!   [`PageError`] (page track) or as a failed chapter (chapter track).
//!
//! * [`ServiceError`]: what an external capability (vision model, speech
//!   synthesiser) reports back to the pipeline.
//!
//! * [`RaceLost`]: internal: a worker tried to commit a figure description
//!   that another worker had already committed.

use crate::output::Figure;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf2audiobook library.
#[derive(Debug, Error)]
pub enum AudiobookError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Text extraction or rasterisation failed for a page.
    #[error("Extraction failed for page {page}: {detail}")]
    ExtractionFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Chapter errors ────────────────────────────────────────────────────
    /// Chapter definitions are unusable; raised before any page is touched.
    #[error("Invalid chapter configuration: {0}")]
    Config(#[from] ConfigError),

    // ── Service errors ────────────────────────────────────────────────────
    /// The configured vision provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write a durable output artifact.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// At least one chapter could not be assembled.
    ///
    /// Returned by [`crate::output::AudiobookOutput::into_result`] when the
    /// caller wants to treat any chapter failure as an error.
    #[error("{failed}/{total} chapters failed (chapters {chapters:?})")]
    PartialFailure {
        failed: usize,
        total: usize,
        chapters: Vec<u32>,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Problems with the chapter definitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("chapter file '{path}' could not be read: {detail}")]
    Unreadable { path: PathBuf, detail: String },

    #[error("chapter file is not valid YAML: {0}")]
    Parse(String),

    #[error("no chapters defined")]
    Empty,

    #[error("chapter {chapter}: pages are 1-indexed, got start page 0")]
    ZeroPage { chapter: u32 },

    #[error("chapter {chapter}: start page {start} is after end page {end}")]
    InvertedRange { chapter: u32, start: usize, end: usize },

    #[error("chapter number {0} is defined more than once")]
    DuplicateChapter(u32),

    #[error("chapters {first} and {second} both claim page {page}")]
    Overlap { first: u32, second: u32, page: usize },

    #[error("chapter {chapter} ends at page {end} but the document has {total} pages")]
    BeyondDocument { chapter: u32, end: usize, total: usize },
}

/// A failure confined to a single page.
///
/// The coordinator records it together with the last stage the page reached
/// (see [`crate::output::PageFailure`]).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PageError {
    /// OCR cleanup failed or returned nothing usable.
    #[error("Page {page}: transcription failed: {detail}")]
    Transcription { page: usize, detail: String },

    /// Presence check or description of a referenced figure failed.
    #[error("Page {page}: figure {figure} could not be described: {detail}")]
    FigureDescription {
        page: usize,
        figure: String,
        detail: String,
    },

    /// Speech synthesis failed for a chunk after all attempts.
    #[error("Page {page}: synthesis of chunk {chunk} failed after {attempts} attempt(s): {detail}")]
    Synthesis {
        page: usize,
        chunk: usize,
        attempts: u32,
        detail: String,
    },

    /// The page produced no audio to concatenate.
    #[error("Page {page}: no audio segments to concatenate")]
    EmptyTrack { page: usize },

    /// A figure or synthesis call exceeded its time budget. A timed-out OCR
    /// cleanup is reported as [`PageError::Transcription`].
    #[error("Page {page}: {operation} timed out after {secs}s")]
    Timeout {
        page: usize,
        operation: String,
        secs: u64,
    },

    /// Audio decode/encode or file I/O failed.
    #[error("Page {page}: {detail}")]
    Io { page: usize, detail: String },
}

impl PageError {
    /// The 1-indexed page this error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::Transcription { page, .. }
            | PageError::FigureDescription { page, .. }
            | PageError::Synthesis { page, .. }
            | PageError::EmptyTrack { page }
            | PageError::Timeout { page, .. }
            | PageError::Io { page, .. } => *page,
        }
    }
}

/// Failures while building an audio track.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// Zero segments were supplied; no file is written.
    #[error("refusing to write '{path}': no audio segments to concatenate")]
    EmptyTrack { path: PathBuf },

    /// A segment decoded to zero samples.
    #[error("audio segment {key} contains no samples")]
    EmptySegment { key: usize },

    /// Segments of one track disagree on sample rate or channel count.
    #[error(
        "segment {key} is {found_rate} Hz / {found_channels} ch \
         but the track is {rate} Hz / {channels} ch"
    )]
    FormatMismatch {
        key: usize,
        rate: u32,
        channels: u16,
        found_rate: u32,
        found_channels: u16,
    },

    /// A file in a track directory has no numeric stem to order it by.
    #[error("'{path}' has no numeric track key")]
    UnkeyedTrack { path: PathBuf },

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What an external capability reports on failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The call itself failed (network, provider error, process exit status).
    #[error("request failed: {0}")]
    Request(String),

    /// The call succeeded but the response cannot be used.
    #[error("unusable response: {0}")]
    Unusable(String),
}

/// Returned by [`crate::pipeline::figures::FigureRegistry::insert_if_absent`]
/// when another worker committed the same figure key first.
#[derive(Debug, Clone, Error)]
#[error("figure {} was already described on page {}", existing.name, existing.page_number)]
pub struct RaceLost {
    /// The figure that won the race.
    pub existing: Figure,
}
