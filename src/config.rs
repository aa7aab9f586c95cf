//! Configuration for a PDF-to-audiobook run.
//!
//! Every knob lives in [`AudiobookConfig`], built via its
//! [`AudiobookConfigBuilder`]. Chapter definitions are deliberately *not*
//! part of it: they describe the book, not the run, and are loaded separately
//! into a [`crate::chapters::ChapterIndex`].

use crate::error::AudiobookError;
use crate::pipeline::call::CallPolicy;
use crate::pipeline::speech::SpeechSynthesizer;
use crate::pipeline::vision::VisionCapability;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a PDF-to-audiobook conversion.
///
/// # Example
/// ```rust
/// use pdf2audiobook::AudiobookConfig;
///
/// let config = AudiobookConfig::builder()
///     .concurrency(8)
///     .max_chunk_chars(250)
///     .output_dir("book-audio")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct AudiobookConfig {
    /// Pages processed at the same time. Default: 4.
    ///
    /// Each in-flight page holds one vision call or one synthesis call at a
    /// time, so this bounds the load on both services.
    pub concurrency: usize,

    /// Maximum characters per synthesis chunk. Default: 200.
    ///
    /// Most neural TTS models degrade (or truncate) on long inputs; 200
    /// characters keeps each call to roughly one spoken sentence or two.
    pub max_chunk_chars: usize,

    /// Voice reference and language passed to every synthesis call.
    pub voice: VoiceProfile,

    /// Root directory for page images, audio tracks and `document.json`. Default: `outputs`.
    pub output_dir: PathBuf,

    /// Vision model identifier. Default provider model when `None`.
    pub model: Option<String>,

    /// Vision provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed vision capability. Takes precedence over every provider setting.
    pub vision: Option<Arc<dyn VisionCapability>>,

    /// Pre-constructed speech synthesiser. Takes precedence over `speech_backend`.
    pub synthesizer: Option<Arc<dyn SpeechSynthesizer>>,

    /// Which built-in synthesiser to use when `synthesizer` is `None`.
    pub speech_backend: SpeechBackend,

    /// Sampling temperature for vision calls. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens generated per vision call. Default: 4000.
    pub max_tokens: usize,

    /// Retries per vision call on transient failure. Default: 3.
    pub max_retries: u32,

    /// Retries per chunk when synthesis fails or returns empty audio. Default: 2.
    pub synthesis_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout for vision calls in seconds. Default: 120.
    ///
    /// A timed-out call fails its page; the chapter barrier never waits on it.
    pub api_timeout_secs: u64,

    /// Per-call timeout for synthesis in seconds. Default: 300.
    pub synthesis_timeout_secs: u64,

    /// Longest edge of rasterised page images in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// How figure descriptions are deduplicated. Default: [`FigureKeyPolicy::Name`].
    pub figure_key: FigureKeyPolicy,

    /// Receives per-page and per-chapter events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for AudiobookConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_chunk_chars: 200,
            voice: VoiceProfile::default(),
            output_dir: PathBuf::from("outputs"),
            model: None,
            provider_name: None,
            provider: None,
            vision: None,
            synthesizer: None,
            speech_backend: SpeechBackend::default(),
            temperature: 0.1,
            max_tokens: 4000,
            max_retries: 3,
            synthesis_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            synthesis_timeout_secs: 300,
            max_rendered_pixels: 2000,
            password: None,
            figure_key: FigureKeyPolicy::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AudiobookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudiobookConfig")
            .field("concurrency", &self.concurrency)
            .field("max_chunk_chars", &self.max_chunk_chars)
            .field("voice", &self.voice)
            .field("output_dir", &self.output_dir)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("vision", &self.vision.as_ref().map(|_| "<dyn VisionCapability>"))
            .field(
                "synthesizer",
                &self.synthesizer.as_ref().map(|_| "<dyn SpeechSynthesizer>"),
            )
            .field("speech_backend", &self.speech_backend)
            .field("max_retries", &self.max_retries)
            .field("synthesis_retries", &self.synthesis_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("synthesis_timeout_secs", &self.synthesis_timeout_secs)
            .field("figure_key", &self.figure_key)
            .finish()
    }
}

impl AudiobookConfig {
    /// Create a new builder for `AudiobookConfig`.
    pub fn builder() -> AudiobookConfigBuilder {
        AudiobookConfigBuilder {
            config: Self::default(),
        }
    }

    /// Timeout and retry budget for one vision call.
    pub fn vision_policy(&self) -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_secs(self.api_timeout_secs),
            max_retries: self.max_retries,
            backoff_ms: self.retry_backoff_ms,
        }
    }

    /// Timeout and retry budget for one synthesis call.
    pub fn synthesis_policy(&self) -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_secs(self.synthesis_timeout_secs),
            max_retries: self.synthesis_retries,
            backoff_ms: self.retry_backoff_ms,
        }
    }
}

/// Builder for [`AudiobookConfig`].
#[derive(Debug)]
pub struct AudiobookConfigBuilder {
    config: AudiobookConfig,
}

impl AudiobookConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_chunk_chars(mut self, n: usize) -> Self {
        self.config.max_chunk_chars = n;
        self
    }

    pub fn voice(mut self, voice: VoiceProfile) -> Self {
        self.config.voice = voice;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn vision(mut self, vision: Arc<dyn VisionCapability>) -> Self {
        self.config.vision = Some(vision);
        self
    }

    pub fn synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.config.synthesizer = Some(synthesizer);
        self
    }

    pub fn speech_backend(mut self, backend: SpeechBackend) -> Self {
        self.config.speech_backend = backend;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn synthesis_retries(mut self, n: u32) -> Self {
        self.config.synthesis_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn synthesis_timeout_secs(mut self, secs: u64) -> Self {
        self.config.synthesis_timeout_secs = secs;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn figure_key(mut self, policy: FigureKeyPolicy) -> Self {
        self.config.figure_key = policy;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AudiobookConfig, AudiobookError> {
        let c = &self.config;
        if c.max_chunk_chars == 0 {
            return Err(AudiobookError::InvalidConfig(
                "Chunk length must be ≥ 1 character".into(),
            ));
        }
        if c.api_timeout_secs == 0 || c.synthesis_timeout_secs == 0 {
            return Err(AudiobookError::InvalidConfig(
                "Timeouts must be ≥ 1 second".into(),
            ));
        }
        if c.voice.language.trim().is_empty() {
            return Err(AudiobookError::InvalidConfig(
                "Voice language tag must not be empty".into(),
            ));
        }
        if let SpeechBackend::Http { endpoint } = &c.speech_backend {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(AudiobookError::InvalidConfig(format!(
                    "Speech endpoint must be an HTTP(S) URL, got '{endpoint}'"
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Voice used for synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceProfile {
    /// Reference recording for voice-cloning engines; ignored by engines without cloning.
    pub speaker_wav: Option<PathBuf>,
    /// Language tag, e.g. `"en"`.
    pub language: String,
}

impl Default for VoiceProfile {
    fn default() -> Self {
        Self {
            speaker_wav: None,
            language: "en".to_string(),
        }
    }
}

/// Key under which figure descriptions are deduplicated.
///
/// `Name` treats every "Figure 1.1" in the document as the same figure, even
/// across chapters. `ChapterAndName` scopes the key to the owning chapter, for
/// books that restart figure numbering per chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FigureKeyPolicy {
    #[default]
    Name,
    ChapterAndName,
}

/// Built-in speech synthesis backends.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpeechBackend {
    /// Local `espeak-ng` process (default; needs no server).
    #[default]
    Espeak,
    /// XTTS-style HTTP server accepting `{text, speaker_wav, language}` and returning WAV.
    Http { endpoint: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = AudiobookConfig::default();
        assert_eq!(c.concurrency, 4);
        assert_eq!(c.max_chunk_chars, 200);
        assert_eq!(c.voice.language, "en");
        assert_eq!(c.figure_key, FigureKeyPolicy::Name);
        assert_eq!(c.speech_backend, SpeechBackend::Espeak);
    }

    #[test]
    fn builder_clamps_and_validates() {
        let c = AudiobookConfig::builder()
            .concurrency(0)
            .temperature(5.0)
            .build()
            .unwrap();
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.temperature, 2.0);

        assert!(AudiobookConfig::builder().max_chunk_chars(0).build().is_err());
        assert!(AudiobookConfig::builder().api_timeout_secs(0).build().is_err());
        assert!(AudiobookConfig::builder()
            .speech_backend(SpeechBackend::Http {
                endpoint: "localhost:8020".into()
            })
            .build()
            .is_err());
    }

    #[test]
    fn policies_follow_config() {
        let c = AudiobookConfig::builder()
            .api_timeout_secs(30)
            .synthesis_timeout_secs(90)
            .max_retries(1)
            .synthesis_retries(4)
            .build()
            .unwrap();
        assert_eq!(c.vision_policy().timeout, Duration::from_secs(30));
        assert_eq!(c.vision_policy().max_retries, 1);
        assert_eq!(c.synthesis_policy().timeout, Duration::from_secs(90));
        assert_eq!(c.synthesis_policy().max_retries, 4);
    }

    #[test]
    fn debug_hides_trait_objects() {
        let s = format!("{:?}", AudiobookConfig::default());
        assert!(s.contains("AudiobookConfig"));
        assert!(s.contains("concurrency"));
    }
}
