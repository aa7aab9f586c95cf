//! Pipeline stages for PDF-to-audiobook conversion.
//!
//! Each submodule implements one step; [`crate::coordinator`] wires them
//! together per page and per chapter.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ segment ──▶ figures ──▶ chunk ──▶ audio (page) ──▶ audio (chapter)
//! (path)    (pdfium)   (cleanup)   (dedup)     (text)    (TTS + concat)    (concat)
//! ```
//!
//! 1. [`input`]  : validate the local PDF (or spill in-memory bytes to a temp file)
//! 2. [`render`] : extract text and a PNG per page; runs in `spawn_blocking`
//! 3. [`segment`]: strip running header/footer, find figure references,
//!    OCR-clean the text against the page image
//! 4. [`figures`]: confirm and describe referenced figures once per document
//! 5. [`chunk`]  : split the spoken text into synthesis-sized chunks
//! 6. [`audio`]  : synthesise chunks and concatenate tracks in numeric order
//!
//! Supporting modules: [`call`] (timeouts and retries for every external
//! call), [`vision`] and [`speech`] (capability traits and backends),
//! [`encode`] (image bytes), [`postprocess`] (model output → speakable text).

pub mod audio;
pub mod call;
pub mod chunk;
pub mod encode;
pub mod figures;
pub mod input;
pub mod postprocess;
pub mod render;
pub mod segment;
pub mod speech;
pub mod vision;
