//! PDF extraction: raw text and a rasterised image for each selected page.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and blocks for the whole render. Extraction runs on Tokio's blocking
//! pool so the page workers' async threads never stall on it.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly. `max_rendered_pixels` caps the longest edge
//! regardless of physical size, which keeps memory bounded and figure labels
//! legible to the vision model.

use crate::config::AudiobookConfig;
use crate::error::AudiobookError;
use crate::output::DocumentMetadata;
use crate::pipeline::encode;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Text and image of one page as extracted from the PDF.
#[derive(Debug, Clone)]
pub struct RawPage {
    /// 1-indexed page number.
    pub number: usize,
    pub text: String,
    /// PNG-encoded rasterisation.
    pub png: Vec<u8>,
}

/// Bind to pdfium: `$PDFIUM_LIB_PATH`, then the working directory, then the system library.
pub fn bind_pdfium() -> Result<Pdfium, AudiobookError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir)),
        Err(_) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| AudiobookError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

fn open<'a>(
    pdfium: &'a Pdfium,
    pdf_path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, AudiobookError> {
    pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.to_ascii_lowercase().contains("password") {
            if password.is_some() {
                AudiobookError::WrongPassword {
                    path: pdf_path.to_path_buf(),
                }
            } else {
                AudiobookError::PasswordRequired {
                    path: pdf_path.to_path_buf(),
                }
            }
        } else {
            AudiobookError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: err_str,
            }
        }
    })
}

/// Extract the given 1-indexed pages, in the order given.
pub async fn extract_pages(
    pdf_path: &Path,
    config: &AudiobookConfig,
    pages: &[usize],
) -> Result<Vec<RawPage>, AudiobookError> {
    let path = pdf_path.to_path_buf();
    let max_pixels = config.max_rendered_pixels;
    let password = config.password.clone();
    let pages = pages.to_vec();

    tokio::task::spawn_blocking(move || extract_pages_blocking(&path, max_pixels, password.as_deref(), &pages))
        .await
        .map_err(|e| AudiobookError::Internal(format!("Extraction task panicked: {}", e)))?
}

fn extract_pages_blocking(
    pdf_path: &PathBuf,
    max_pixels: u32,
    password: Option<&str>,
    page_numbers: &[usize],
) -> Result<Vec<RawPage>, AudiobookError> {
    let pdfium = bind_pdfium()?;
    let document = open(&pdfium, pdf_path, password)?;
    let pages = document.pages();
    let total = pages.len() as usize;
    info!("PDF loaded: {} pages, extracting {}", total, page_numbers.len());

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut results = Vec::with_capacity(page_numbers.len());
    for &number in page_numbers {
        let failed = |detail: String| AudiobookError::ExtractionFailed { page: number, detail };
        if number == 0 || number > total {
            return Err(failed(format!("page is outside the document (1..={total})")));
        }

        let page = pages
            .get((number - 1) as u16)
            .map_err(|e| failed(format!("{:?}", e)))?;
        let text = page
            .text()
            .map_err(|e| failed(format!("text extraction: {:?}", e)))?
            .all();
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| failed(format!("rasterisation: {:?}", e)))?;
        let png = encode::png_bytes(&bitmap.as_image())
            .map_err(|e| failed(format!("PNG encoding: {}", e)))?;

        debug!(
            "Extracted page {}: {} chars of text, {} PNG bytes",
            number,
            text.len(),
            png.len()
        );
        results.push(RawPage { number, text, png });
    }

    Ok(results)
}

/// Read document metadata and page count without rendering anything.
pub async fn extract_metadata(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<DocumentMetadata, AudiobookError> {
    let path = pdf_path.to_path_buf();
    let pwd = password.map(|s| s.to_string());

    tokio::task::spawn_blocking(move || extract_metadata_blocking(&path, pwd.as_deref()))
        .await
        .map_err(|e| AudiobookError::Internal(format!("Metadata task panicked: {}", e)))?
}

fn extract_metadata_blocking(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<DocumentMetadata, AudiobookError> {
    let pdfium = bind_pdfium()?;
    let document = open(&pdfium, pdf_path, password)?;
    let metadata = document.metadata();

    let tag = |t: PdfDocumentMetadataTagType| -> Option<String> {
        metadata
            .get(t)
            .map(|m| m.value().trim().to_string())
            .filter(|v| !v.is_empty())
    };

    Ok(DocumentMetadata {
        title: tag(PdfDocumentMetadataTagType::Title),
        author: tag(PdfDocumentMetadataTagType::Author),
        subject: tag(PdfDocumentMetadataTagType::Subject),
        creator: tag(PdfDocumentMetadataTagType::Creator),
        producer: tag(PdfDocumentMetadataTagType::Producer),
        page_count: document.pages().len() as usize,
        pdf_version: format!("{:?}", document.version()),
    })
}
