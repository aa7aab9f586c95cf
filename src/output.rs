//! Output types: the records produced per page and per chapter, the
//! assembled [`Document`], and the on-disk layout of durable artifacts.

use crate::chapters::Chapter;
use crate::error::{AudiobookError, PageError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A described illustration. Created once per dedup key, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Figure {
    /// Dotted figure number as referenced in the text, e.g. `"1.1"`.
    pub name: String,
    /// Page on which the figure was confirmed and described.
    pub page_number: usize,
    pub description: String,
}

/// Where a page is in its lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PageStage {
    Pending,
    Segmented,
    FiguresResolved,
    Chunked,
    Rendered,
    Concatenated,
    Done,
}

impl fmt::Display for PageStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PageStage::Pending => "pending",
            PageStage::Segmented => "segmented",
            PageStage::FiguresResolved => "figures resolved",
            PageStage::Chunked => "chunked",
            PageStage::Rendered => "rendered",
            PageStage::Concatenated => "concatenated",
            PageStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Frozen result of a successfully processed page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub number: usize,
    /// Figure descriptions followed by the cleaned page text; this is what was spoken.
    pub combined_text: String,
    pub image_reference: PathBuf,
    pub audio_reference: PathBuf,
    pub figures: Vec<Figure>,
    pub chunk_count: usize,
}

/// Why and where a page stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageFailure {
    /// Last stage the page completed before the error.
    pub stage: PageStage,
    pub error: PageError,
}

/// Outcome of processing one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-indexed page number.
    pub page_num: usize,
    /// Chapter owning the page.
    pub chapter: u32,
    /// Present when the page reached [`PageStage::Done`].
    pub record: Option<PageRecord>,
    /// Present when the page failed.
    pub failure: Option<PageFailure>,
    /// Wall-clock time spent on the page.
    pub duration_ms: u64,
    /// Extra synthesis attempts spent on transient failures.
    pub synthesis_retries: u32,
}

impl PageResult {
    pub fn is_done(&self) -> bool {
        self.record.is_some()
    }

    /// Final stage reached: `Done`, or the stage the page failed after.
    pub fn stage(&self) -> PageStage {
        match (&self.record, &self.failure) {
            (Some(_), _) => PageStage::Done,
            (None, Some(f)) => f.stage,
            (None, None) => PageStage::Pending,
        }
    }
}

/// Whether a chapter track was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChapterStatus {
    Assembled { track: PathBuf },
    Failed {
        /// Pages that failed or never reported back.
        failed_pages: Vec<usize>,
        reason: String,
    },
}

/// Outcome of assembling one chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterResult {
    pub number: u32,
    pub start_page: usize,
    pub end_page: usize,
    pub status: ChapterStatus,
}

impl ChapterResult {
    pub fn is_assembled(&self) -> bool {
        matches!(self.status, ChapterStatus::Assembled { .. })
    }

    pub fn track(&self) -> Option<&Path> {
        match &self.status {
            ChapterStatus::Assembled { track } => Some(track),
            ChapterStatus::Failed { .. } => None,
        }
    }
}

/// The assembled book, written to `document.json` once every page finished.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    /// Successfully processed pages, ascending by page number.
    pub pages: Vec<PageRecord>,
    pub chapters: Vec<Chapter>,
    /// Every figure described anywhere in the document.
    pub figures: Vec<Figure>,
}

/// Document-level metadata extracted from the PDF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}

/// Aggregate statistics for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudiobookStats {
    pub total_pages: usize,
    pub processed_pages: usize,
    pub failed_pages: usize,
    pub assembled_chapters: usize,
    pub failed_chapters: usize,
    pub chunks_synthesised: usize,
    pub figures_described: usize,
    pub synthesis_retries: u64,
    pub extract_duration_ms: u64,
    pub pipeline_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudiobookOutput {
    pub document: Document,
    /// Per-page outcomes, ascending by page number.
    pub pages: Vec<PageResult>,
    /// Per-chapter outcomes, ascending by chapter number.
    pub chapters: Vec<ChapterResult>,
    pub stats: AudiobookStats,
}

impl AudiobookOutput {
    /// Turn any failed chapter into [`AudiobookError::PartialFailure`].
    pub fn into_result(self) -> Result<Self, AudiobookError> {
        let failed: Vec<u32> = self
            .chapters
            .iter()
            .filter(|c| !c.is_assembled())
            .map(|c| c.number)
            .collect();
        if failed.is_empty() {
            Ok(self)
        } else {
            Err(AudiobookError::PartialFailure {
                failed: failed.len(),
                total: self.chapters.len(),
                chapters: failed,
            })
        }
    }
}

/// Paths of every durable artifact under one output root.
///
/// ```text
/// <root>/pages/<n>/image/page.png
/// <root>/pages/<n>/audio/<chunk>.wav
/// <root>/pages/<n>/audio/combined.wav
/// <root>/chapters/<k>.wav
/// <root>/document.json
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

/// File name of a page track inside its audio directory.
pub const PAGE_TRACK_NAME: &str = "combined.wav";

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn page_dir(&self, page: usize) -> PathBuf {
        self.root.join("pages").join(page.to_string())
    }

    pub fn page_image(&self, page: usize) -> PathBuf {
        self.page_dir(page).join("image").join("page.png")
    }

    pub fn page_audio_dir(&self, page: usize) -> PathBuf {
        self.page_dir(page).join("audio")
    }

    pub fn chunk_audio(&self, page: usize, chunk: usize) -> PathBuf {
        self.page_audio_dir(page).join(format!("{chunk}.wav"))
    }

    pub fn page_track(&self, page: usize) -> PathBuf {
        self.page_audio_dir(page).join(PAGE_TRACK_NAME)
    }

    pub fn chapter_track(&self, chapter: u32) -> PathBuf {
        self.root.join("chapters").join(format!("{chapter}.wav"))
    }

    pub fn document_json(&self) -> PathBuf {
        self.root.join("document.json")
    }
}
