//! Vision capability: OCR cleanup, figure description, figure presence.
//!
//! The three jobs we ask of a vision model form a closed set, modelled as
//! [`VisionTask`]. A backend implements [`VisionCapability`] once and receives
//! the task itself, so it can render prompts however its model prefers; the
//! default [`LlmVision`] renders them from [`crate::prompts`] and sends them
//! with the page image through an `edgequake-llm` provider.

use crate::error::ServiceError;
use crate::pipeline::encode;
use crate::prompts;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// A rasterised page: where it is stored and its PNG bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub path: PathBuf,
    pub png: Vec<u8>,
}

/// One request to the vision model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisionTask {
    /// Turn extracted page text into clean, speakable prose.
    CleanupPage { raw_text: String },
    /// Describe a figure in the context of its page.
    DescribeFigure { figure: String, page_text: String },
    /// Confirm that a referenced figure is actually drawn on the page.
    FigurePresent { figure: String },
}

impl VisionTask {
    /// Short label for logs and timeout errors.
    pub fn operation(&self) -> &'static str {
        match self {
            VisionTask::CleanupPage { .. } => "OCR cleanup",
            VisionTask::DescribeFigure { .. } => "figure description",
            VisionTask::FigurePresent { .. } => "figure presence check",
        }
    }

    /// Prompt text sent alongside the page image.
    pub fn prompt(&self) -> String {
        match self {
            VisionTask::CleanupPage { raw_text } => prompts::cleanup_prompt(raw_text),
            VisionTask::DescribeFigure { figure, page_text } => {
                prompts::figure_description_prompt(figure, page_text)
            }
            VisionTask::FigurePresent { figure } => prompts::figure_presence_prompt(figure),
        }
    }
}

/// `describe(image, task) → text`, possibly slow, possibly failing.
#[async_trait]
pub trait VisionCapability: Send + Sync {
    async fn describe(&self, image: &PageImage, task: &VisionTask) -> Result<String, ServiceError>;
}

/// [`VisionCapability`] backed by any `edgequake-llm` vision provider.
pub struct LlmVision {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl LlmVision {
    pub fn new(provider: Arc<dyn LLMProvider>, temperature: f32, max_tokens: usize) -> Self {
        Self {
            provider,
            options: CompletionOptions {
                temperature: Some(temperature),
                max_tokens: Some(max_tokens),
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl VisionCapability for LlmVision {
    async fn describe(&self, image: &PageImage, task: &VisionTask) -> Result<String, ServiceError> {
        let messages = vec![ChatMessage::user_with_images(
            &task.prompt(),
            vec![encode::image_data(&image.png)],
        )];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| ServiceError::Request(e.to_string()))?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            task.operation(),
            response.prompt_tokens,
            response.completion_tokens
        );

        let text = response.content.trim().to_string();
        if text.is_empty() {
            return Err(ServiceError::Unusable("model returned no text".into()));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_render_their_prompts() {
        let cleanup = VisionTask::CleanupPage {
            raw_text: "Tbe quick fox".into(),
        };
        assert!(cleanup.prompt().contains("Tbe quick fox"));
        assert_eq!(cleanup.operation(), "OCR cleanup");

        let describe = VisionTask::DescribeFigure {
            figure: "3.2".into(),
            page_text: "As Figure 3.2 shows".into(),
        };
        assert!(describe.prompt().contains("Figure 3.2"));
        assert!(describe.prompt().contains("As Figure 3.2 shows"));

        let present = VisionTask::FigurePresent {
            figure: "3.2".into(),
        };
        assert!(present.prompt().contains("True or False"));
        assert_eq!(present.operation(), "figure presence check");
    }
}
