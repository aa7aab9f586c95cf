//! Chapter definitions and page → chapter resolution.
//!
//! Chapters come from a YAML list such as:
//!
//! ```yaml
//! - chapter_number: 1
//!   chapter_title_header: "1 Introduction"
//!   chapter_title_footer: ""
//!   chapter_start_page: 3
//!   chapter_end_page: 18
//! ```
//!
//! Page numbers are 1-indexed and both bounds are inclusive. An empty
//! header/footer string means "nothing to strip".
//!
//! Every chapter is validated when the index is built: inverted ranges,
//! duplicate chapter numbers and overlapping ranges are all rejected, so
//! [`ChapterIndex::resolve`] can never see two candidates for one page.

use crate::error::ConfigError;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::path::Path;
use tracing::debug;

/// One chapter of the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    #[serde(rename = "chapter_number")]
    pub number: u32,

    /// Exact prefix stripped from every page of this chapter.
    #[serde(
        rename = "chapter_title_header",
        default,
        deserialize_with = "empty_as_none"
    )]
    pub title_header: Option<String>,

    /// Exact suffix stripped from every page of this chapter.
    #[serde(
        rename = "chapter_title_footer",
        default,
        deserialize_with = "empty_as_none"
    )]
    pub title_footer: Option<String>,

    #[serde(rename = "chapter_start_page")]
    pub start_page: usize,

    #[serde(rename = "chapter_end_page")]
    pub end_page: usize,
}

impl Chapter {
    pub fn new(number: u32, start_page: usize, end_page: usize) -> Self {
        Self {
            number,
            title_header: None,
            title_footer: None,
            start_page,
            end_page,
        }
    }

    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.title_header = Some(header.into()).filter(|h: &String| !h.is_empty());
        self
    }

    pub fn with_footer(mut self, footer: impl Into<String>) -> Self {
        self.title_footer = Some(footer.into()).filter(|f: &String| !f.is_empty());
        self
    }

    pub fn header(&self) -> Option<&str> {
        self.title_header.as_deref()
    }

    pub fn footer(&self) -> Option<&str> {
        self.title_footer.as_deref()
    }

    pub fn pages(&self) -> RangeInclusive<usize> {
        self.start_page..=self.end_page
    }

    pub fn contains(&self, page: usize) -> bool {
        self.pages().contains(&page)
    }

    pub fn page_count(&self) -> usize {
        self.end_page + 1 - self.start_page
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

/// Validated, start-page-ordered set of chapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterIndex {
    chapters: Vec<Chapter>,
}

impl ChapterIndex {
    /// Validate and index a list of chapters.
    pub fn new(mut chapters: Vec<Chapter>) -> Result<Self, ConfigError> {
        if chapters.is_empty() {
            return Err(ConfigError::Empty);
        }

        let mut seen = HashSet::new();
        for chapter in &chapters {
            if chapter.start_page == 0 {
                return Err(ConfigError::ZeroPage {
                    chapter: chapter.number,
                });
            }
            if chapter.start_page > chapter.end_page {
                return Err(ConfigError::InvertedRange {
                    chapter: chapter.number,
                    start: chapter.start_page,
                    end: chapter.end_page,
                });
            }
            if !seen.insert(chapter.number) {
                return Err(ConfigError::DuplicateChapter(chapter.number));
            }
        }

        chapters.sort_by_key(|c| (c.start_page, c.number));
        for pair in chapters.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.start_page <= prev.end_page {
                return Err(ConfigError::Overlap {
                    first: prev.number,
                    second: next.number,
                    page: next.start_page,
                });
            }
        }

        debug!("Chapter index built: {} chapters", chapters.len());
        Ok(Self { chapters })
    }

    /// Parse a YAML chapter list.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let chapters: Vec<Chapter> =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::new(chapters)
    }

    /// Read and parse a YAML chapter file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        Self::from_yaml_str(&contents)
    }

    /// The chapter owning `page`, if any.
    pub fn resolve(&self, page: usize) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.contains(page))
    }

    /// Look a chapter up by its number.
    pub fn get(&self, number: u32) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.number == number)
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    /// Every owned page, ascending.
    pub fn page_numbers(&self) -> Vec<usize> {
        self.chapters.iter().flat_map(|c| c.pages()).collect()
    }

    pub fn last_page(&self) -> usize {
        self.chapters.last().map(|c| c.end_page).unwrap_or(0)
    }

    /// Reject chapters that reach past the end of the document.
    pub fn check_against_document(&self, total_pages: usize) -> Result<(), ConfigError> {
        match self.chapters.iter().find(|c| c.end_page > total_pages) {
            Some(c) => Err(ConfigError::BeyondDocument {
                chapter: c.number,
                end: c.end_page,
                total: total_pages,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
- chapter_number: 2
  chapter_title_header: "Chapter Two"
  chapter_title_footer: ""
  chapter_start_page: 6
  chapter_end_page: 9
- chapter_number: 1
  chapter_title_header: ""
  chapter_title_footer: "Draft copy"
  chapter_start_page: 1
  chapter_end_page: 5
"#;

    #[test]
    fn loads_yaml_and_orders_by_start_page() {
        let index = ChapterIndex::from_yaml_str(YAML).unwrap();
        let numbers: Vec<u32> = index.chapters().iter().map(|c| c.number).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[test]
    fn empty_strip_strings_become_none() {
        let index = ChapterIndex::from_yaml_str(YAML).unwrap();
        let one = index.get(1).unwrap();
        assert_eq!(one.header(), None);
        assert_eq!(one.footer(), Some("Draft copy"));
        let two = index.get(2).unwrap();
        assert_eq!(two.header(), Some("Chapter Two"));
        assert_eq!(two.footer(), None);
    }

    #[test]
    fn missing_strip_keys_are_allowed() {
        let yaml = "- chapter_number: 1\n  chapter_start_page: 1\n  chapter_end_page: 2\n";
        let index = ChapterIndex::from_yaml_str(yaml).unwrap();
        assert_eq!(index.get(1).unwrap().header(), None);
    }

    #[test]
    fn resolves_inclusive_bounds() {
        let index = ChapterIndex::from_yaml_str(YAML).unwrap();
        assert_eq!(index.resolve(1).map(|c| c.number), Some(1));
        assert_eq!(index.resolve(5).map(|c| c.number), Some(1));
        assert_eq!(index.resolve(6).map(|c| c.number), Some(2));
        assert_eq!(index.resolve(9).map(|c| c.number), Some(2));
        assert!(index.resolve(10).is_none());
    }

    #[test]
    fn rejects_inverted_range() {
        let err = ChapterIndex::new(vec![Chapter::new(1, 5, 2)]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvertedRange {
                chapter: 1,
                start: 5,
                end: 2
            }
        );
    }

    #[test]
    fn rejects_overlapping_ranges() {
        let err =
            ChapterIndex::new(vec![Chapter::new(1, 1, 5), Chapter::new(2, 5, 8)]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Overlap {
                first: 1,
                second: 2,
                page: 5
            }
        );
    }

    #[test]
    fn rejects_duplicates_empty_and_zero() {
        assert_eq!(ChapterIndex::new(vec![]).unwrap_err(), ConfigError::Empty);
        assert_eq!(
            ChapterIndex::new(vec![Chapter::new(1, 1, 2), Chapter::new(1, 3, 4)]).unwrap_err(),
            ConfigError::DuplicateChapter(1)
        );
        assert_eq!(
            ChapterIndex::new(vec![Chapter::new(4, 0, 2)]).unwrap_err(),
            ConfigError::ZeroPage { chapter: 4 }
        );
    }

    #[test]
    fn single_page_chapter_is_valid() {
        let index = ChapterIndex::new(vec![Chapter::new(1, 3, 3)]).unwrap();
        assert_eq!(index.page_numbers(), vec![3]);
        assert_eq!(index.chapters()[0].page_count(), 1);
    }

    #[test]
    fn page_numbers_cover_every_chapter() {
        let index = ChapterIndex::new(vec![Chapter::new(2, 6, 7), Chapter::new(1, 2, 3)]).unwrap();
        assert_eq!(index.page_numbers(), vec![2, 3, 6, 7]);
        assert_eq!(index.last_page(), 7);
    }

    #[test]
    fn document_length_check() {
        let index = ChapterIndex::new(vec![Chapter::new(1, 1, 12)]).unwrap();
        assert!(index.check_against_document(12).is_ok());
        assert_eq!(
            index.check_against_document(10).unwrap_err(),
            ConfigError::BeyondDocument {
                chapter: 1,
                end: 12,
                total: 10
            }
        );
    }

    #[test]
    fn bad_yaml_is_a_parse_error() {
        let err = ChapterIndex::from_yaml_str("- chapter_number: one").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn unreadable_file() {
        let err = ChapterIndex::load("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Unreadable { .. }));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chapters.yaml");
        std::fs::write(&path, YAML).unwrap();
        let index = ChapterIndex::load(&path).unwrap();
        assert_eq!(index.chapters().len(), 2);
    }
}
