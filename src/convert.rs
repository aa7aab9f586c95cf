//! Top-level entry points.
//!
//! [`convert`] validates the input and chapter ranges, resolves the vision
//! and speech backends, extracts every chapter page, and hands the pages to a
//! [`PipelineCoordinator`]. Chapter problems surface as
//! [`AudiobookError::Config`] before any page is extracted or any model is
//! called.

use crate::chapters::ChapterIndex;
use crate::config::AudiobookConfig;
use crate::coordinator::PipelineCoordinator;
use crate::error::AudiobookError;
use crate::output::{AudiobookOutput, DocumentMetadata};
use crate::pipeline::vision::{LlmVision, VisionCapability};
use crate::pipeline::{input, render, speech};
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Convert a PDF into per-page and per-chapter audio tracks.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(AudiobookOutput)` once every chapter is settled, even if some
/// chapters failed (check `output.chapters` or call
/// [`AudiobookOutput::into_result`]).
///
/// # Errors
/// Returns `Err(AudiobookError)` only for fatal errors:
/// - File not found / not a PDF / corrupt or encrypted PDF
/// - Chapter ranges reaching past the end of the document
/// - No vision provider configured
/// - Output directory or `document.json` not writable
pub async fn convert(
    pdf: impl AsRef<Path>,
    chapters: &ChapterIndex,
    config: &AudiobookConfig,
) -> Result<AudiobookOutput, AudiobookError> {
    let resolved = input::resolve_local(pdf)?;
    convert_resolved(resolved.path(), chapters, config).await
}

/// [`convert`] with chapters loaded from a YAML file.
pub async fn convert_with_chapter_file(
    pdf: impl AsRef<Path>,
    chapter_file: impl AsRef<Path>,
    config: &AudiobookConfig,
) -> Result<AudiobookOutput, AudiobookError> {
    let chapters = ChapterIndex::load(chapter_file)?;
    convert(pdf, &chapters, config).await
}

/// Convert PDF bytes held in memory.
///
/// The bytes are written to a managed temp file that is removed on return.
pub async fn convert_from_bytes(
    bytes: &[u8],
    chapters: &ChapterIndex,
    config: &AudiobookConfig,
) -> Result<AudiobookOutput, AudiobookError> {
    let resolved = input::spill_bytes(bytes)?;
    convert_resolved(resolved.path(), chapters, config).await
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    pdf: impl AsRef<Path>,
    chapters: &ChapterIndex,
    config: &AudiobookConfig,
) -> Result<AudiobookOutput, AudiobookError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| AudiobookError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(pdf, chapters, config))
}

/// Read PDF metadata without converting anything.
///
/// Needs neither a vision provider nor a speech backend.
pub async fn inspect(pdf: impl AsRef<Path>) -> Result<DocumentMetadata, AudiobookError> {
    let resolved = input::resolve_local(pdf)?;
    render::extract_metadata(resolved.path(), None).await
}

async fn convert_resolved(
    pdf_path: &Path,
    chapters: &ChapterIndex,
    config: &AudiobookConfig,
) -> Result<AudiobookOutput, AudiobookError> {
    let total_start = Instant::now();
    info!("Starting audiobook conversion: {}", pdf_path.display());

    // ── Step 1: Backends ─────────────────────────────────────────────────
    let vision = resolve_vision(config).await?;
    let synth = speech::from_config(config);

    // ── Step 2: Validate chapters against the document ───────────────────
    let metadata = render::extract_metadata(pdf_path, config.password.as_deref()).await?;
    chapters.check_against_document(metadata.page_count)?;
    info!(
        "PDF has {} pages; {} chapters cover {} of them",
        metadata.page_count,
        chapters.chapters().len(),
        chapters.page_numbers().len()
    );

    // ── Step 3: Extract text and images ──────────────────────────────────
    let extract_start = Instant::now();
    let pages = render::extract_pages(pdf_path, config, &chapters.page_numbers()).await?;
    let extract_duration_ms = extract_start.elapsed().as_millis() as u64;
    debug!("Extracted {} pages in {}ms", pages.len(), extract_duration_ms);

    // ── Step 4: Pages → page tracks → chapter tracks ─────────────────────
    let coordinator = PipelineCoordinator::new(config.clone(), vision, synth);
    let mut output = coordinator.run(chapters, pages).await?;

    output.stats.extract_duration_ms = extract_duration_ms;
    output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
    info!(
        "Conversion complete: {}/{} chapters in {}ms",
        output.stats.assembled_chapters,
        output.chapters.len(),
        output.stats.total_duration_ms
    );
    Ok(output)
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Pick the vision backend: an injected capability wins, otherwise wrap the
/// resolved LLM provider.
async fn resolve_vision(config: &AudiobookConfig) -> Result<Arc<dyn VisionCapability>, AudiobookError> {
    if let Some(ref vision) = config.vision {
        return Ok(Arc::clone(vision));
    }
    let provider = resolve_provider(config).await?;
    Ok(Arc::new(LlmVision::new(
        provider,
        config.temperature,
        config.max_tokens,
    )))
}

fn create_vision_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, AudiobookError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        AudiobookError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) with `config.model`; the
///    factory reads the matching API key from the environment.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** via [`ProviderFactory::from_env`].
async fn resolve_provider(config: &AudiobookConfig) -> Result<Arc<dyn LLMProvider>, AudiobookError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| AudiobookError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No vision provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
