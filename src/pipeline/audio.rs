//! Audio assembly: chunk synthesis, WAV decoding, ordered concatenation.
//!
//! Segments are decoded with `hound` into interleaved `f32` samples and
//! concatenated in ascending numeric key order: chunk index for a page
//! track, page number for a chapter track. Keys are parsed from file stems
//! (`"10.wav"` → 10), so `10.wav` always follows `2.wav`.
//!
//! Tracks are written once as 16-bit PCM and renamed into place. An existing
//! file at the output path is replaced, and zero segments is an error rather
//! than an empty file. Decoding and re-encoding a 16-bit track is lossless, so
//! a chapter track holds exactly the samples of its page tracks.

use crate::config::VoiceProfile;
use crate::error::{AssemblyError, PageError, ServiceError};
use crate::pipeline::call::{call_with_retry, CallFailure, CallPolicy};
use crate::pipeline::speech::SpeechSynthesizer;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::borrow::Cow;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// One decoded piece of audio with its ordering key.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    pub key: usize,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
}

impl AudioSegment {
    /// Decode WAV bytes as returned by a synthesiser.
    pub fn from_wav_bytes(key: usize, bytes: &[u8]) -> Result<Self, AssemblyError> {
        let bytes = repair_streamed_header(bytes);
        let reader = WavReader::new(Cursor::new(&*bytes))?;
        Self::decode(key, reader)
    }

    /// Decode a WAV file from disk.
    pub fn from_wav_file(key: usize, path: &Path) -> Result<Self, AssemblyError> {
        let reader = WavReader::open(path)?;
        Self::decode(key, reader)
    }

    fn decode<R: Read>(key: usize, mut reader: WavReader<R>) -> Result<Self, AssemblyError> {
        let spec = reader.spec();
        let samples = match spec.sample_format {
            SampleFormat::Int => {
                let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|sample| sample as f32 / max_val))
                    .collect::<Result<Vec<f32>, _>>()?
            }
            SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<f32>, _>>()?,
        };
        Ok(Self {
            key,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Write this segment alone as a 16-bit PCM WAV file.
    pub fn write_wav(&self, path: &Path) -> Result<(), AssemblyError> {
        write_pcm16(
            path,
            self.sample_rate,
            self.channels,
            std::iter::once(self.samples.as_slice()),
        )
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }
}

/// A written, concatenated track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrack {
    pub path: PathBuf,
    /// Segment keys in the order they were written.
    pub keys: Vec<usize>,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_count: usize,
}

impl AudioTrack {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.sample_count as f64 / (self.sample_rate as f64 * self.channels as f64)
    }
}

/// Numeric ordering key of a track file: its stem parsed as an integer.
pub fn track_key(path: &Path) -> Option<usize> {
    path.file_stem()?.to_str()?.parse().ok()
}

/// Concatenate `segments` in ascending key order into `output`.
pub fn concatenate(mut segments: Vec<AudioSegment>, output: &Path) -> Result<AudioTrack, AssemblyError> {
    let Some(first) = segments.first() else {
        return Err(AssemblyError::EmptyTrack {
            path: output.to_path_buf(),
        });
    };
    let (rate, channels) = (first.sample_rate, first.channels);

    segments.sort_by_key(|s| s.key);
    for s in &segments {
        if s.samples.is_empty() {
            return Err(AssemblyError::EmptySegment { key: s.key });
        }
        if s.sample_rate != rate || s.channels != channels {
            return Err(AssemblyError::FormatMismatch {
                key: s.key,
                rate,
                channels,
                found_rate: s.sample_rate,
                found_channels: s.channels,
            });
        }
    }

    write_pcm16(output, rate, channels, segments.iter().map(|s| s.samples.as_slice()))?;

    let track = AudioTrack {
        path: output.to_path_buf(),
        keys: segments.iter().map(|s| s.key).collect(),
        sample_rate: rate,
        channels,
        sample_count: segments.iter().map(|s| s.samples.len()).sum(),
    };
    debug!(
        "Wrote {} ({} segments, {:.1}s)",
        output.display(),
        track.keys.len(),
        track.duration_secs()
    );
    Ok(track)
}

/// Concatenate every numbered `*.wav` in `dir` into `dir/output_name`.
///
/// The output file itself is skipped, so re-running replaces it rather than
/// folding the previous result back in.
pub fn concatenate_directory(dir: &Path, output_name: &str) -> Result<AudioTrack, AssemblyError> {
    let io_err = |source| AssemblyError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut inputs: Vec<(usize, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
        if !is_wav || path.file_name().and_then(|n| n.to_str()) == Some(output_name) {
            continue;
        }
        let key = track_key(&path).ok_or_else(|| AssemblyError::UnkeyedTrack { path: path.clone() })?;
        inputs.push((key, path));
    }

    let segments = inputs
        .iter()
        .map(|(key, path)| AudioSegment::from_wav_file(*key, path))
        .collect::<Result<Vec<_>, _>>()?;
    concatenate(segments, &dir.join(output_name))
}

/// Renders chunks of text to audio through a [`SpeechSynthesizer`].
pub struct ChunkRenderer {
    synth: Arc<dyn SpeechSynthesizer>,
    voice: VoiceProfile,
    policy: CallPolicy,
}

impl ChunkRenderer {
    pub fn new(synth: Arc<dyn SpeechSynthesizer>, voice: VoiceProfile, policy: CallPolicy) -> Self {
        Self { synth, voice, policy }
    }

    /// Synthesise one chunk. Returns the segment and how many retries it took.
    ///
    /// Empty or undecodable audio counts as a failed attempt; after the retry
    /// budget the page fails with [`PageError::Synthesis`].
    pub async fn render(&self, page: usize, key: usize, text: &str) -> Result<(AudioSegment, u32), PageError> {
        let label = format!("page {page} chunk {key} synthesis");
        call_with_retry(&label, &self.policy, || async {
            let bytes = self.synth.synthesize(text, &self.voice).await?;
            if bytes.is_empty() {
                return Err(ServiceError::Unusable("synthesiser returned no audio".into()));
            }
            let segment = AudioSegment::from_wav_bytes(key, &bytes)
                .map_err(|e| ServiceError::Unusable(e.to_string()))?;
            if segment.samples.is_empty() {
                return Err(ServiceError::Unusable("synthesised audio has no samples".into()));
            }
            Ok::<_, ServiceError>(segment)
        })
        .await
        .map_err(|failure| match failure {
            CallFailure::TimedOut { secs } => PageError::Timeout {
                page,
                operation: format!("synthesis of chunk {key}"),
                secs,
            },
            CallFailure::Exhausted { attempts, detail } => PageError::Synthesis {
                page,
                chunk: key,
                attempts,
                detail,
            },
        })
    }
}

/// Inverse of the `1 << (bits - 1)` scaling in [`AudioSegment::decode`], so a
/// decoded 16-bit track re-encodes to the same samples.
fn to_pcm16(sample: f32) -> i16 {
    (sample * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Write `parts` to `path` via a `.part` sibling renamed into place, so a
/// failed write never leaves a truncated track at `path`.
fn write_pcm16<'a>(
    path: &Path,
    sample_rate: u32,
    channels: u16,
    parts: impl Iterator<Item = &'a [f32]>,
) -> Result<(), AssemblyError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| AssemblyError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let staging = staging_path(path);
    if let Err(e) = write_samples(&staging, spec, parts) {
        let _ = std::fs::remove_file(&staging);
        return Err(e);
    }
    std::fs::rename(&staging, path).map_err(|source| AssemblyError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_samples<'a>(
    path: &Path,
    spec: WavSpec,
    parts: impl Iterator<Item = &'a [f32]>,
) -> Result<(), AssemblyError> {
    let mut writer = WavWriter::create(path, spec)?;
    for part in parts {
        for &sample in part {
            writer.write_sample(to_pcm16(sample))?;
        }
    }
    writer.finalize()?;
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

/// Streaming encoders (`espeak-ng --stdout`) cannot seek back to fill in the
/// RIFF and data chunk sizes, and leave placeholders larger than the stream.
/// Clamp the data size to what is actually present.
fn repair_streamed_header(bytes: &[u8]) -> Cow<'_, [u8]> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Cow::Borrowed(bytes);
    }

    let mut block_align = 1usize;
    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = u32::from_le_bytes([bytes[pos + 4], bytes[pos + 5], bytes[pos + 6], bytes[pos + 7]]) as usize;
        let body = pos + 8;

        if id == b"fmt " && body + 14 <= bytes.len() {
            block_align = u16::from_le_bytes([bytes[body + 12], bytes[body + 13]]).max(1) as usize;
        }
        if id == b"data" {
            let available = bytes.len() - body;
            if size <= available {
                return Cow::Borrowed(bytes);
            }
            let data_len = available - available % block_align;
            let mut fixed = bytes[..body + data_len].to_vec();
            fixed[pos + 4..body].copy_from_slice(&(data_len as u32).to_le_bytes());
            let riff_len = (fixed.len() - 8) as u32;
            fixed[4..8].copy_from_slice(&riff_len.to_le_bytes());
            return Cow::Owned(fixed);
        }
        pos = body.saturating_add(size).saturating_add(size & 1);
    }
    Cow::Borrowed(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn wav_bytes(rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let spec = WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut buf = Vec::new();
        {
            let mut w = WavWriter::new(Cursor::new(&mut buf), spec).unwrap();
            for &s in samples {
                w.write_sample(s).unwrap();
            }
            w.finalize().unwrap();
        }
        buf
    }

    fn segment(key: usize, value: f32, len: usize) -> AudioSegment {
        AudioSegment {
            key,
            sample_rate: 16_000,
            channels: 1,
            samples: vec![value; len],
        }
    }

    fn read_i16(path: &Path) -> Vec<i16> {
        WavReader::open(path)
            .unwrap()
            .samples::<i16>()
            .map(|s| s.unwrap())
            .collect()
    }

    #[test]
    fn decodes_real_wav_bytes() {
        let bytes = wav_bytes(22_050, 1, &[0, 16_384, -16_384]);
        let seg = AudioSegment::from_wav_bytes(3, &bytes).unwrap();
        assert_eq!(seg.key, 3);
        assert_eq!(seg.sample_rate, 22_050);
        assert_eq!(seg.channels, 1);
        assert_eq!(seg.samples, vec![0.0, 0.5, -0.5]);
    }

    #[test]
    fn decodes_streamed_header() {
        let mut bytes = wav_bytes(22_050, 1, &[100, 200, 300, 400]);
        let data_pos = bytes.windows(4).position(|w| w == b"data").unwrap();
        bytes[data_pos + 4..data_pos + 8].copy_from_slice(&u32::MAX.to_le_bytes());
        bytes[4..8].copy_from_slice(&u32::MAX.to_le_bytes());

        let seg = AudioSegment::from_wav_bytes(0, &bytes).unwrap();
        assert_eq!(seg.samples.len(), 4);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(AudioSegment::from_wav_bytes(0, b"not a wav file").is_err());
    }

    #[test]
    fn keys_sort_numerically() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("track.wav");
        let segments = vec![segment(10, -0.5, 2), segment(1, 0.25, 2), segment(2, 0.5, 2)];

        let track = concatenate(segments, &out).unwrap();

        assert_eq!(track.keys, vec![1, 2, 10]);
        let samples = read_i16(&out);
        assert_eq!(samples.len(), 6);
        assert!(samples[0] > 0 && samples[0] < samples[2]);
        assert!(samples[4] < 0);
    }

    #[test]
    fn directory_concatenation_orders_by_stem_and_skips_output() {
        let dir = TempDir::new().unwrap();
        for (name, value) in [("10.wav", 3i16), ("2.wav", 2), ("1.wav", 1), ("combined.wav", 9)] {
            std::fs::write(dir.path().join(name), wav_bytes(8_000, 1, &[value * 1000])).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let track = concatenate_directory(dir.path(), "combined.wav").unwrap();

        assert_eq!(track.keys, vec![1, 2, 10]);
        assert_eq!(read_i16(&dir.path().join("combined.wav")).len(), 3);
    }

    #[test]
    fn unkeyed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("1.wav"), wav_bytes(8_000, 1, &[1])).unwrap();
        std::fs::write(dir.path().join("intro.wav"), wav_bytes(8_000, 1, &[1])).unwrap();

        let err = concatenate_directory(dir.path(), "out.wav").unwrap_err();
        assert!(matches!(err, AssemblyError::UnkeyedTrack { .. }));
    }

    #[test]
    fn zero_segments_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("empty.wav");
        let err = concatenate(Vec::new(), &out).unwrap_err();
        assert!(matches!(err, AssemblyError::EmptyTrack { .. }));
        assert!(!out.exists());
    }

    #[test]
    fn existing_output_is_overwritten() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("nested").join("track.wav");

        concatenate(vec![segment(1, 0.1, 100), segment(2, 0.1, 100)], &out).unwrap();
        let second = concatenate(vec![segment(1, 0.1, 10)], &out).unwrap();

        assert_eq!(second.sample_count, 10);
        assert_eq!(read_i16(&out).len(), 10);
    }

    #[test]
    fn mismatched_formats_are_rejected() {
        let dir = TempDir::new().unwrap();
        let mut odd = segment(2, 0.1, 4);
        odd.sample_rate = 44_100;
        let err = concatenate(vec![segment(1, 0.1, 4), odd], &dir.path().join("t.wav")).unwrap_err();
        match err {
            AssemblyError::FormatMismatch { key, found_rate, .. } => {
                assert_eq!(key, 2);
                assert_eq!(found_rate, 44_100);
            }
            other => panic!("expected FormatMismatch, got {other:?}"),
        }
    }

    #[test]
    fn pcm16_survives_repeated_reassembly() {
        let dir = TempDir::new().unwrap();
        let original = vec![i16::MIN, -19, -1, 0, 1, 19, 16_384, i16::MAX];
        let first = dir.path().join("1.wav");
        std::fs::write(&first, wav_bytes(16_000, 1, &original)).unwrap();

        let mut current = first;
        for generation in 2..6 {
            let next = dir.path().join(format!("{generation}.wav"));
            let seg = AudioSegment::from_wav_file(generation, &current).unwrap();
            concatenate(vec![seg], &next).unwrap();
            assert_eq!(read_i16(&next), original, "generation {generation}");
            current = next;
        }
    }

    #[test]
    fn chapter_samples_equal_page_samples_joined() {
        let dir = TempDir::new().unwrap();
        let p2 = dir.path().join("2.wav");
        let p3 = dir.path().join("3.wav");
        std::fs::write(&p2, wav_bytes(16_000, 1, &[19; 19])).unwrap();
        std::fs::write(&p3, wav_bytes(16_000, 1, &[7, -7, i16::MAX])).unwrap();

        let segments = vec![
            AudioSegment::from_wav_file(3, &p3).unwrap(),
            AudioSegment::from_wav_file(2, &p2).unwrap(),
        ];
        let out = dir.path().join("chapter.wav");
        concatenate(segments, &out).unwrap();

        assert_eq!(read_i16(&out), [read_i16(&p2), read_i16(&p3)].concat());
        assert!(!staging_path(&out).exists());
    }

    #[test]
    fn track_key_parses_stems() {
        assert_eq!(track_key(Path::new("audio/10.wav")), Some(10));
        assert_eq!(track_key(Path::new("combined.wav")), None);
    }

    struct FlakySynth {
        calls: AtomicUsize,
        good_after: usize,
    }

    #[async_trait]
    impl SpeechSynthesizer for FlakySynth {
        async fn synthesize(&self, _: &str, _: &VoiceProfile) -> Result<Vec<u8>, ServiceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.good_after {
                Ok(Vec::new())
            } else {
                Ok(wav_bytes(16_000, 1, &[1, 2, 3]))
            }
        }
    }

    fn renderer(good_after: usize, retries: u32) -> (ChunkRenderer, Arc<FlakySynth>) {
        let synth = Arc::new(FlakySynth {
            calls: AtomicUsize::new(0),
            good_after,
        });
        let policy = CallPolicy {
            timeout: Duration::from_secs(5),
            max_retries: retries,
            backoff_ms: 0,
        };
        (
            ChunkRenderer::new(synth.clone(), VoiceProfile::default(), policy),
            synth,
        )
    }

    #[tokio::test]
    async fn empty_audio_is_retried() {
        let (r, synth) = renderer(1, 2);
        let (seg, retries) = r.render(4, 0, "Hello there.").await.unwrap();
        assert_eq!(retries, 1);
        assert_eq!(seg.samples.len(), 3);
        assert_eq!(synth.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn persistent_empty_audio_fails_the_chunk() {
        let (r, _) = renderer(usize::MAX, 1);
        let err = r.render(4, 7, "Hello there.").await.unwrap_err();
        match err {
            PageError::Synthesis {
                page,
                chunk,
                attempts,
                ..
            } => assert_eq!((page, chunk, attempts), (4, 7, 2)),
            other => panic!("expected Synthesis, got {other:?}"),
        }
    }
}
