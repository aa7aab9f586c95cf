//! Speech synthesis capability: `synthesize(text, voice) → WAV bytes`.
//!
//! Two built-in backends:
//!
//! - [`HttpSynthesizer`]: an XTTS-style server: `POST {text, speaker_wav,
//!   language}` answered with a WAV body. Voice cloning happens server-side;
//!   `speaker_wav` is a path the server can read.
//! - [`EspeakSynthesizer`]: a local `espeak-ng --stdout` process. No voice
//!   cloning, but no server or GPU either.

use crate::config::{AudiobookConfig, SpeechBackend, VoiceProfile};
use crate::error::ServiceError;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

/// Render one chunk of text to WAV bytes.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &VoiceProfile) -> Result<Vec<u8>, ServiceError>;
}

/// Build the synthesiser a config asks for.
pub fn from_config(config: &AudiobookConfig) -> Arc<dyn SpeechSynthesizer> {
    if let Some(ref synth) = config.synthesizer {
        return Arc::clone(synth);
    }
    match &config.speech_backend {
        SpeechBackend::Espeak => Arc::new(EspeakSynthesizer::default()),
        SpeechBackend::Http { endpoint } => Arc::new(HttpSynthesizer::new(endpoint.clone())),
    }
}

// ── HTTP ─────────────────────────────────────────────────────────────────

/// Client for an XTTS-style synthesis server.
pub struct HttpSynthesizer {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    speaker_wav: Option<String>,
    language: &'a str,
}

impl HttpSynthesizer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, voice: &VoiceProfile) -> Result<Vec<u8>, ServiceError> {
        let request = SynthesisRequest {
            text,
            speaker_wav: voice
                .speaker_wav
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            language: &voice.language,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| ServiceError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ServiceError::Request(format!("HTTP {}", response.status())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ServiceError::Request(e.to_string()))?;
        debug!("Synthesised {} chars → {} bytes", text.len(), bytes.len());
        Ok(bytes.to_vec())
    }
}

// ── espeak-ng ────────────────────────────────────────────────────────────

/// Local `espeak-ng` (or compatible) process writing WAV to stdout.
pub struct EspeakSynthesizer {
    program: String,
    words_per_minute: u32,
}

impl Default for EspeakSynthesizer {
    fn default() -> Self {
        Self {
            program: "espeak-ng".to_string(),
            words_per_minute: 160,
        }
    }
}

impl EspeakSynthesizer {
    pub fn new(program: impl Into<String>, words_per_minute: u32) -> Self {
        Self {
            program: program.into(),
            words_per_minute,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for EspeakSynthesizer {
    async fn synthesize(&self, text: &str, voice: &VoiceProfile) -> Result<Vec<u8>, ServiceError> {
        let output = Command::new(&self.program)
            .arg("-v")
            .arg(&voice.language)
            .arg("-s")
            .arg(self.words_per_minute.to_string())
            .arg("--stdout")
            .arg(text)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ServiceError::Request(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(ServiceError::Request(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn request_body_shape() {
        let body = SynthesisRequest {
            text: "Hello.",
            speaker_wav: Some("/mount/speaker.wav".into()),
            language: "en",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["text"], "Hello.");
        assert_eq!(json["speaker_wav"], "/mount/speaker.wav");
        assert_eq!(json["language"], "en");

        let no_speaker = SynthesisRequest {
            text: "Hi",
            speaker_wav: None,
            language: "fr",
        };
        let json = serde_json::to_value(&no_speaker).unwrap();
        assert!(json.get("speaker_wav").is_none());
    }

    #[tokio::test]
    async fn missing_program_is_a_request_error() {
        let synth = EspeakSynthesizer::new("definitely-not-a-tts-binary", 160);
        let voice = VoiceProfile {
            speaker_wav: Some(PathBuf::from("ignored.wav")),
            language: "en".into(),
        };
        let err = synth.synthesize("hello", &voice).await.unwrap_err();
        assert!(matches!(err, ServiceError::Request(_)));
    }

    #[test]
    fn configured_synthesizer_wins() {
        struct Silent;
        #[async_trait]
        impl SpeechSynthesizer for Silent {
            async fn synthesize(&self, _: &str, _: &VoiceProfile) -> Result<Vec<u8>, ServiceError> {
                Ok(vec![])
            }
        }
        let synth: Arc<dyn SpeechSynthesizer> = Arc::new(Silent);
        let config = AudiobookConfig::builder()
            .synthesizer(Arc::clone(&synth))
            .build()
            .unwrap();
        assert!(Arc::ptr_eq(&from_config(&config), &synth));
    }
}
