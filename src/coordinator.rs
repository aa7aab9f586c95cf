//! Drives every page through the pipeline and assembles chapters.
//!
//! Pages run concurrently (`buffer_unordered(concurrency)`), each through
//!
//! ```text
//! Pending → Segmented → FiguresResolved → Chunked → Rendered → Concatenated → Done
//! ```
//!
//! or into a failure recorded with the last stage it completed. The only
//! state shared between page workers is the [`FigureRegistry`].
//!
//! Page outcomes are acked, one by one, into a [`ChapterBarrier`]. A chapter
//! is assembled only once every page in its range has acked as `Done`; a
//! single failed page fails the whole chapter. Every external call is
//! timeout-bounded, so every page eventually acks and the barrier never
//! waits forever. Pages that were never submitted are reported as failed
//! when the run ends.

use crate::chapters::{Chapter, ChapterIndex};
use crate::config::AudiobookConfig;
use crate::error::{AssemblyError, AudiobookError, PageError};
use crate::output::{
    AudiobookOutput, AudiobookStats, ChapterResult, ChapterStatus, Document, OutputLayout,
    PageFailure, PageRecord, PageResult, PageStage,
};
use crate::pipeline::audio::{self, AudioSegment, ChunkRenderer};
use crate::pipeline::chunk::chunk_text;
use crate::pipeline::figures::{FigureRegistry, FigureResolver};
use crate::pipeline::render::RawPage;
use crate::pipeline::segment::PageSegmenter;
use crate::pipeline::speech::SpeechSynthesizer;
use crate::pipeline::vision::{PageImage, VisionCapability};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// ── Chapter barrier ──────────────────────────────────────────────────────

/// What the barrier decided once a chapter's last page acked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarrierEvent {
    /// Every page is done; page tracks in ascending page order.
    Ready {
        chapter: Chapter,
        tracks: Vec<(usize, PathBuf)>,
    },
    /// At least one page failed or never reported.
    Failed {
        chapter: Chapter,
        failed_pages: Vec<usize>,
    },
}

#[derive(Debug)]
struct ChapterProgress {
    chapter: Chapter,
    done: BTreeMap<usize, PathBuf>,
    failed: BTreeSet<usize>,
    closed: bool,
}

impl ChapterProgress {
    fn acked(&self) -> usize {
        self.done.len() + self.failed.len()
    }

    fn close(&mut self) -> BarrierEvent {
        self.closed = true;
        let chapter = self.chapter.clone();
        let missing = chapter
            .pages()
            .filter(|p| !self.done.contains_key(p) && !self.failed.contains(p));
        let failed_pages: Vec<usize> = self
            .failed
            .iter()
            .copied()
            .chain(missing)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if failed_pages.is_empty() {
            BarrierEvent::Ready {
                chapter,
                tracks: std::mem::take(&mut self.done).into_iter().collect(),
            }
        } else {
            BarrierEvent::Failed {
                chapter,
                failed_pages,
            }
        }
    }
}

/// Counts page completions per chapter.
#[derive(Debug)]
pub struct ChapterBarrier {
    chapters: BTreeMap<u32, ChapterProgress>,
    owner: HashMap<usize, u32>,
}

impl ChapterBarrier {
    pub fn new(index: &ChapterIndex) -> Self {
        let mut chapters = BTreeMap::new();
        let mut owner = HashMap::new();
        for chapter in index.chapters() {
            for page in chapter.pages() {
                owner.insert(page, chapter.number);
            }
            chapters.insert(
                chapter.number,
                ChapterProgress {
                    chapter: chapter.clone(),
                    done: BTreeMap::new(),
                    failed: BTreeSet::new(),
                    closed: false,
                },
            );
        }
        Self { chapters, owner }
    }

    /// Record a page outcome: `Some(track)` when the page is done, `None` when it failed.
    ///
    /// Returns an event when this ack completes its chapter. Acks for unknown
    /// pages, repeated acks and acks into an already settled chapter are ignored.
    pub fn ack(&mut self, page: usize, track: Option<PathBuf>) -> Option<BarrierEvent> {
        let number = *self.owner.get(&page)?;
        let progress = self.chapters.get_mut(&number)?;
        if progress.closed || progress.done.contains_key(&page) || progress.failed.contains(&page) {
            return None;
        }

        match track {
            Some(path) => {
                progress.done.insert(page, path);
            }
            None => {
                progress.failed.insert(page);
            }
        }

        if progress.acked() == progress.chapter.page_count() {
            Some(progress.close())
        } else {
            None
        }
    }

    /// Settle every chapter still waiting on pages, as failed.
    pub fn drain_incomplete(&mut self) -> Vec<BarrierEvent> {
        self.chapters
            .values_mut()
            .filter(|p| !p.closed)
            .map(ChapterProgress::close)
            .collect()
    }
}

// ── Coordinator ──────────────────────────────────────────────────────────

type Assembly = (Chapter, JoinHandle<Result<PathBuf, AssemblyError>>);

/// Runs pages through segmentation, figure resolution, chunking, synthesis
/// and page assembly, then assembles chapter tracks.
pub struct PipelineCoordinator {
    config: AudiobookConfig,
    layout: OutputLayout,
    segmenter: PageSegmenter,
    resolver: FigureResolver,
    renderer: ChunkRenderer,
    registry: FigureRegistry,
}

impl PipelineCoordinator {
    pub fn new(
        config: AudiobookConfig,
        vision: Arc<dyn VisionCapability>,
        synth: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        let vision_policy = config.vision_policy();
        Self {
            layout: OutputLayout::new(&config.output_dir),
            segmenter: PageSegmenter::new(Arc::clone(&vision), vision_policy),
            resolver: FigureResolver::new(vision, vision_policy, config.figure_key),
            renderer: ChunkRenderer::new(synth, config.voice.clone(), config.synthesis_policy()),
            registry: FigureRegistry::new(),
            config,
        }
    }

    /// The figure registry shared by this coordinator's page workers.
    pub fn registry(&self) -> &FigureRegistry {
        &self.registry
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Process `pages` and assemble every chapter in `chapters`.
    ///
    /// Returns `Ok` even when pages or chapters failed; see
    /// [`AudiobookOutput::into_result`]. `Err` only for problems writing the
    /// output root or `document.json`.
    pub async fn run(&self, chapters: &ChapterIndex, pages: Vec<RawPage>) -> Result<AudiobookOutput, AudiobookError> {
        let start = Instant::now();
        let root = self.layout.root().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| AudiobookError::OutputWriteFailed { path: root, source })?;

        let mut work: Vec<(RawPage, Chapter)> = Vec::with_capacity(pages.len());
        for raw in pages {
            match chapters.resolve(raw.number) {
                Some(chapter) => work.push((raw, chapter.clone())),
                None => warn!("Page {} belongs to no chapter, skipping", raw.number),
            }
        }
        let total = work.len();
        info!(
            "Processing {} pages across {} chapters (concurrency {})",
            total,
            chapters.chapters().len(),
            self.config.concurrency
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_run_start(total);
        }

        let mut barrier = ChapterBarrier::new(chapters);
        let mut assemblies: Vec<Assembly> = Vec::new();
        let mut chapter_results: Vec<ChapterResult> = Vec::new();
        let mut page_results: Vec<PageResult> = Vec::with_capacity(total);

        let mut results = stream::iter(
            work.into_iter()
                .map(|(raw, chapter)| self.process_page(raw, chapter, total)),
        )
        .buffer_unordered(self.config.concurrency.max(1));

        while let Some(result) = results.next().await {
            let track = result.record.as_ref().map(|r| r.audio_reference.clone());
            if let Some(event) = barrier.ack(result.page_num, track) {
                self.settle(event, &mut assemblies, &mut chapter_results).await;
            }
            page_results.push(result);
        }

        for event in barrier.drain_incomplete() {
            self.settle(event, &mut assemblies, &mut chapter_results).await;
        }

        for (chapter, handle) in assemblies {
            let status = match handle.await {
                Ok(Ok(track)) => {
                    info!("Chapter {} assembled: {}", chapter.number, track.display());
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_chapter_complete(chapter.number, &track);
                    }
                    ChapterStatus::Assembled { track }
                }
                Ok(Err(e)) => self.assembly_failed(&chapter, e.to_string()).await,
                Err(e) => {
                    self.assembly_failed(&chapter, format!("assembly task panicked: {e}"))
                        .await
                }
            };
            chapter_results.push(ChapterResult {
                number: chapter.number,
                start_page: chapter.start_page,
                end_page: chapter.end_page,
                status,
            });
        }

        page_results.sort_by_key(|p| p.page_num);
        chapter_results.sort_by_key(|c| c.number);

        let records: Vec<PageRecord> = page_results.iter().filter_map(|p| p.record.clone()).collect();
        let document = Document {
            pages: records,
            chapters: chapters.chapters().to_vec(),
            figures: self.registry.snapshot(),
        };
        self.write_document(&document).await?;

        let processed = page_results.iter().filter(|p| p.is_done()).count();
        let assembled = chapter_results.iter().filter(|c| c.is_assembled()).count();
        let stats = AudiobookStats {
            total_pages: total,
            processed_pages: processed,
            failed_pages: total - processed,
            assembled_chapters: assembled,
            failed_chapters: chapter_results.len() - assembled,
            chunks_synthesised: document.pages.iter().map(|p| p.chunk_count).sum(),
            figures_described: document.figures.len(),
            synthesis_retries: page_results.iter().map(|p| p.synthesis_retries as u64).sum(),
            pipeline_duration_ms: start.elapsed().as_millis() as u64,
            ..Default::default()
        };

        info!(
            "Run complete: {}/{} pages, {}/{} chapters",
            processed,
            total,
            assembled,
            chapter_results.len()
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_run_complete(total, processed);
        }

        Ok(AudiobookOutput {
            document,
            pages: page_results,
            chapters: chapter_results,
            stats,
        })
    }

    /// Start assembly for a ready chapter, or record a failed one.
    async fn settle(
        &self,
        event: BarrierEvent,
        assemblies: &mut Vec<Assembly>,
        failed: &mut Vec<ChapterResult>,
    ) {
        match event {
            BarrierEvent::Ready { chapter, tracks } => {
                debug!("Chapter {}: all {} pages done", chapter.number, tracks.len());
                let output = self.layout.chapter_track(chapter.number);
                let handle = tokio::task::spawn_blocking(move || assemble_chapter(tracks, &output));
                assemblies.push((chapter, handle));
            }
            BarrierEvent::Failed {
                chapter,
                failed_pages,
            } => {
                warn!(
                    "Chapter {} not assembled: pages {:?} failed",
                    chapter.number, failed_pages
                );
                self.discard_chapter_track(chapter.number).await;
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_chapter_failed(chapter.number, &failed_pages);
                }
                let reason = format!(
                    "{} of {} pages failed",
                    failed_pages.len(),
                    chapter.page_count()
                );
                failed.push(ChapterResult {
                    number: chapter.number,
                    start_page: chapter.start_page,
                    end_page: chapter.end_page,
                    status: ChapterStatus::Failed {
                        failed_pages,
                        reason,
                    },
                });
            }
        }
    }

    async fn assembly_failed(&self, chapter: &Chapter, reason: String) -> ChapterStatus {
        self.discard_chapter_track(chapter.number).await;
        warn!("Chapter {} assembly failed: {}", chapter.number, reason);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_chapter_failed(chapter.number, &[]);
        }
        ChapterStatus::Failed {
            failed_pages: Vec::new(),
            reason,
        }
    }

    /// Remove a chapter track left by an earlier run into the same output
    /// root, so a failed chapter has no audio at its durable path.
    async fn discard_chapter_track(&self, chapter: u32) {
        let path = self.layout.chapter_track(chapter);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("Chapter {}: removed stale {}", chapter, path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Chapter {}: could not remove {}: {}", chapter, path.display(), e),
        }
    }

    async fn write_document(&self, document: &Document) -> Result<(), AudiobookError> {
        let path = self.layout.document_json();
        let json = serde_json::to_vec_pretty(document)
            .map_err(|e| AudiobookError::Internal(format!("document serialisation: {e}")))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|source| AudiobookError::OutputWriteFailed { path, source })
    }

    /// Run one page to completion or failure. Never panics, always returns.
    async fn process_page(&self, raw: RawPage, chapter: Chapter, total: usize) -> PageResult {
        let start = Instant::now();
        let page_num = raw.number;
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_page_start(page_num, total);
        }

        let mut stage = PageStage::Pending;
        let mut retries = 0u32;
        let outcome = self.drive_page(raw, &chapter, &mut stage, &mut retries).await;

        let (record, failure) = match outcome {
            Ok(record) => {
                debug!("Page {}: {}", page_num, PageStage::Done);
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_page_complete(page_num, total, record.chunk_count);
                }
                (Some(record), None)
            }
            Err(error) => {
                warn!("Page {} failed after stage '{}': {}", page_num, stage, error);
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_page_error(page_num, total, &error.to_string());
                }
                (None, Some(PageFailure { stage, error }))
            }
        };

        PageResult {
            page_num,
            chapter: chapter.number,
            record,
            failure,
            duration_ms: start.elapsed().as_millis() as u64,
            synthesis_retries: retries,
        }
    }

    async fn drive_page(
        &self,
        raw: RawPage,
        chapter: &Chapter,
        stage: &mut PageStage,
        retries: &mut u32,
    ) -> Result<PageRecord, PageError> {
        let number = raw.number;
        let advance = |stage: &mut PageStage, next: PageStage| {
            debug!("Page {}: {} → {}", number, stage, next);
            *stage = next;
        };

        let image_path = self.layout.page_image(number);
        write_file(number, &image_path, &raw.png).await?;
        let audio_dir = self.layout.page_audio_dir(number);
        if let Err(e) = tokio::fs::remove_dir_all(&audio_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(io_error(number, &audio_dir, e));
            }
        }
        let image = PageImage {
            path: image_path,
            png: raw.png,
        };

        let mut page = self
            .segmenter
            .segment(number, &raw.text, image, chapter.header(), chapter.footer())
            .await?;
        advance(stage, PageStage::Segmented);

        let figures = self.resolver.resolve(&page, chapter.number, &self.registry).await?;
        page.attach_figures(figures);
        advance(stage, PageStage::FiguresResolved);

        let chunks = chunk_text(&page.combined_text(), self.config.max_chunk_chars);
        advance(stage, PageStage::Chunked);

        let mut segments = Vec::with_capacity(chunks.len());
        for (key, chunk) in chunks.iter().enumerate() {
            let (segment, r) = self.renderer.render(number, key, chunk).await?;
            *retries += r;
            segments.push(segment);
        }
        advance(stage, PageStage::Rendered);

        let chunk_paths: Vec<PathBuf> = (0..segments.len())
            .map(|key| self.layout.chunk_audio(number, key))
            .collect();
        let track_path = self.layout.page_track(number);
        let output = track_path.clone();
        let written = tokio::task::spawn_blocking(move || write_page_audio(segments, &chunk_paths, &output))
            .await
            .map_err(|e| PageError::Io {
                page: number,
                detail: format!("page assembly task panicked: {e}"),
            })?;
        match written {
            Ok(()) => {}
            Err(AssemblyError::EmptyTrack { .. }) => return Err(PageError::EmptyTrack { page: number }),
            Err(e) => {
                return Err(PageError::Io {
                    page: number,
                    detail: e.to_string(),
                })
            }
        }
        advance(stage, PageStage::Concatenated);

        Ok(page.freeze(track_path, chunks.len()))
    }
}

/// Persist each chunk and the concatenated page track.
fn write_page_audio(segments: Vec<AudioSegment>, chunk_paths: &[PathBuf], track: &Path) -> Result<(), AssemblyError> {
    for (segment, path) in segments.iter().zip(chunk_paths) {
        segment.write_wav(path)?;
    }
    audio::concatenate(segments, track).map(|_| ())
}

/// Read page tracks back from disk and concatenate them in page order.
fn assemble_chapter(tracks: Vec<(usize, PathBuf)>, output: &Path) -> Result<PathBuf, AssemblyError> {
    let segments = tracks
        .iter()
        .map(|(page, path)| AudioSegment::from_wav_file(*page, path))
        .collect::<Result<Vec<_>, _>>()?;
    audio::concatenate(segments, output).map(|t| t.path)
}

async fn write_file(page: usize, path: &Path, bytes: &[u8]) -> Result<(), PageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(page, parent, e))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| io_error(page, path, e))
}

fn io_error(page: usize, path: &Path, e: std::io::Error) -> PageError {
    PageError::Io {
        page,
        detail: format!("{}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> ChapterIndex {
        ChapterIndex::new(vec![Chapter::new(1, 1, 1), Chapter::new(2, 2, 3)]).unwrap()
    }

    #[test]
    fn chapter_waits_for_every_page() {
        let mut barrier = ChapterBarrier::new(&index());

        assert_eq!(barrier.ack(3, Some("p3.wav".into())), None);
        match barrier.ack(2, Some("p2.wav".into())) {
            Some(BarrierEvent::Ready { chapter, tracks }) => {
                assert_eq!(chapter.number, 2);
                assert_eq!(
                    tracks,
                    vec![(2, PathBuf::from("p2.wav")), (3, PathBuf::from("p3.wav"))]
                );
            }
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[test]
    fn one_failed_page_fails_the_chapter() {
        let mut barrier = ChapterBarrier::new(&index());

        assert_eq!(barrier.ack(2, None), None);
        match barrier.ack(3, Some("p3.wav".into())) {
            Some(BarrierEvent::Failed {
                chapter,
                failed_pages,
            }) => {
                assert_eq!(chapter.number, 2);
                assert_eq!(failed_pages, vec![2]);
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn repeated_and_foreign_acks_are_ignored() {
        let mut barrier = ChapterBarrier::new(&index());

        assert_eq!(barrier.ack(2, Some("p2.wav".into())), None);
        assert_eq!(barrier.ack(2, None), None);
        assert_eq!(barrier.ack(99, Some("p99.wav".into())), None);
        assert!(matches!(
            barrier.ack(3, Some("p3.wav".into())),
            Some(BarrierEvent::Ready { .. })
        ));
        assert_eq!(barrier.ack(3, Some("again.wav".into())), None);
    }

    #[test]
    fn unreported_pages_fail_on_drain() {
        let mut barrier = ChapterBarrier::new(&index());
        assert!(matches!(
            barrier.ack(1, Some("p1.wav".into())),
            Some(BarrierEvent::Ready { .. })
        ));
        barrier.ack(3, Some("p3.wav".into()));

        let drained = barrier.drain_incomplete();
        assert_eq!(
            drained,
            vec![BarrierEvent::Failed {
                chapter: Chapter::new(2, 2, 3),
                failed_pages: vec![2],
            }]
        );
        assert!(barrier.drain_incomplete().is_empty());
    }
}
