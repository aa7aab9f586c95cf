//! Page segmentation: header/footer stripping, figure references, OCR cleanup.
//!
//! [`PageSegmenter::segment`] turns one extracted page into a [`Page`]:
//!
//! 1. strip the chapter's running header (exact prefix) and footer (exact suffix)
//! 2. collect `Figure <major>.<minor>` references in first-occurrence order
//! 3. ask the vision capability to clean the stripped text against the page image
//!
//! Nothing is written to disk here; directories belong to the coordinator.

use crate::error::PageError;
use crate::output::{Figure, PageRecord};
use crate::pipeline::call::{call_with_retry, CallFailure, CallPolicy};
use crate::pipeline::postprocess::clean_for_speech;
use crate::pipeline::vision::{PageImage, VisionCapability, VisionTask};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

static RE_FIGURE_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"Figure (\d+\.\d+)").unwrap());

/// Remove `header` from the start and `footer` from the end of `text`.
///
/// Matching is exact: a header that differs by a single character (or by
/// leading whitespace) is left in place. Empty patterns are ignored.
pub fn strip_header_footer<'a>(text: &'a str, header: Option<&str>, footer: Option<&str>) -> &'a str {
    let mut s = text;
    if let Some(h) = header.filter(|h| !h.is_empty()) {
        s = s.strip_prefix(h).unwrap_or(s);
    }
    if let Some(f) = footer.filter(|f| !f.is_empty()) {
        s = s.strip_suffix(f).unwrap_or(s);
    }
    s
}

/// Distinct figure names referenced in `text`, in first-occurrence order.
///
/// "See Figure 1.1 and Figure 2.10, then Figure 1.1 again" → `["1.1", "2.10"]`.
pub fn extract_figure_names(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in RE_FIGURE_REF.captures_iter(text) {
        let name = &caps[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// A page between extraction and freezing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// 1-indexed page number.
    pub number: usize,
    /// Extracted text with header and footer removed.
    pub raw_text: String,
    /// Speakable text returned by OCR cleanup.
    pub cleaned_text: String,
    pub image: PageImage,
    /// Figure names referenced on the page.
    pub figure_refs: Vec<String>,
    /// Figures first described on this page.
    pub figures: Vec<Figure>,
}

impl Page {
    /// Attach the figures resolved for this page. Called once.
    pub fn attach_figures(&mut self, figures: Vec<Figure>) {
        self.figures = figures;
    }

    /// The text that is actually spoken: figure descriptions, then the passage.
    pub fn combined_text(&self) -> String {
        if self.figures.is_empty() {
            return self.cleaned_text.clone();
        }
        let mut text = String::from("Description of images on page: ");
        for figure in &self.figures {
            text.push_str(&format!(
                "Figure {}: {}. ",
                figure.name,
                figure.description.trim_end_matches('.')
            ));
        }
        text.push_str("All images described. Continuing the main passage now: ");
        text.push_str(&self.cleaned_text);
        text
    }

    /// Freeze into the immutable record handed downstream.
    pub fn freeze(self, audio_reference: PathBuf, chunk_count: usize) -> PageRecord {
        PageRecord {
            number: self.number,
            combined_text: self.combined_text(),
            image_reference: self.image.path,
            audio_reference,
            figures: self.figures,
            chunk_count,
        }
    }
}

/// Produces [`Page`]s from raw extraction.
pub struct PageSegmenter {
    vision: Arc<dyn VisionCapability>,
    policy: CallPolicy,
}

impl PageSegmenter {
    pub fn new(vision: Arc<dyn VisionCapability>, policy: CallPolicy) -> Self {
        Self { vision, policy }
    }

    /// Segment one page.
    ///
    /// A failed, timed-out or empty cleanup on a page that has text is a
    /// [`PageError::Transcription`]; a page with no text at all skips the call.
    pub async fn segment(
        &self,
        number: usize,
        raw_text: &str,
        image: PageImage,
        header: Option<&str>,
        footer: Option<&str>,
    ) -> Result<Page, PageError> {
        let stripped = strip_header_footer(raw_text, header, footer);
        let figure_refs = extract_figure_names(stripped);
        debug!(
            "Page {}: stripped {} chars, {} figure reference(s)",
            number,
            raw_text.len() - stripped.len(),
            figure_refs.len()
        );

        let cleaned_text = if stripped.trim().is_empty() {
            String::new()
        } else {
            self.cleanup(number, stripped, &image).await?
        };

        Ok(Page {
            number,
            raw_text: stripped.to_string(),
            cleaned_text,
            image,
            figure_refs,
            figures: Vec::new(),
        })
    }

    async fn cleanup(&self, number: usize, text: &str, image: &PageImage) -> Result<String, PageError> {
        let task = VisionTask::CleanupPage {
            raw_text: text.to_string(),
        };
        let label = format!("page {number} {}", task.operation());

        let (response, _) = call_with_retry(&label, &self.policy, || self.vision.describe(image, &task))
            .await
            .map_err(|failure| match failure {
                CallFailure::TimedOut { secs } => PageError::Transcription {
                    page: number,
                    detail: format!("{} timed out after {}s", task.operation(), secs),
                },
                CallFailure::Exhausted { attempts, detail } => PageError::Transcription {
                    page: number,
                    detail: format!("{detail} (after {attempts} attempt(s))"),
                },
            })?;

        let cleaned = clean_for_speech(&response);
        if cleaned.is_empty() {
            return Err(PageError::Transcription {
                page: number,
                detail: "cleanup returned no speakable text".into(),
            });
        }
        Ok(cleaned)
    }
}
