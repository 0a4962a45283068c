//! Audio transcription via an OpenAI-compatible speech-to-text endpoint.
//!
//! Files are decoded locally with symphonia to measure duration and to
//! re-encode as mono 16-bit WAV for upload. The working directory holds one
//! batch at a time, so every file is deleted once its outcome is known —
//! transcribed, rejected as too short, or failed.

use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use secrecy::ExposeSecret;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, error, info, warn};

use crate::config::TranscribeConfig;
use crate::error::TranscribeError;

/// Outcome for one audio file.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptionOutcome {
    /// Recognized speech.
    Text(String),
    /// Recording shorter than the configured minimum.
    TooShort { duration_secs: f64 },
}

/// Decoded audio ready for upload.
struct DecodedAudio {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: usize,
}

impl DecodedAudio {
    fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        let frames = self.samples.len() / self.channels;
        frames as f64 / self.sample_rate as f64
    }

    /// Downmix to mono by averaging channels.
    fn to_mono(&self) -> Vec<f32> {
        if self.channels <= 1 {
            return self.samples.clone();
        }
        self.samples
            .chunks(self.channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    }
}

/// Transcribes audio files through the configured cloud endpoint.
pub struct Transcriber {
    config: TranscribeConfig,
    client: reqwest::Client,
}

impl Transcriber {
    pub fn new(config: TranscribeConfig) -> Result<Self, TranscribeError> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", config.api_key.expose_secret());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|e| TranscribeError::Service(format!("invalid API key header: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| TranscribeError::Service(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Transcribe one file. The file is deleted before this returns, on
    /// every path.
    pub async fn transcribe_file(
        &self,
        path: &Path,
    ) -> Result<TranscriptionOutcome, TranscribeError> {
        let result = self.transcribe_inner(path).await;
        remove_quietly(path);
        result
    }

    async fn transcribe_inner(
        &self,
        path: &Path,
    ) -> Result<TranscriptionOutcome, TranscribeError> {
        let decoded = decode_audio(path)?;
        let duration = decoded.duration_secs();

        if duration < self.config.min_duration.as_secs_f64() {
            warn!(
                path = %path.display(),
                duration_secs = format!("{duration:.2}"),
                "Audio file is too short"
            );
            return Ok(TranscriptionOutcome::TooShort {
                duration_secs: duration,
            });
        }

        let wav_data = samples_to_wav(&decoded.to_mono(), decoded.sample_rate)?;
        debug!(bytes = wav_data.len(), "Encoded audio as WAV for upload");

        let text = self.upload(wav_data).await?;
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(TranscribeError::Unrecognized {
                path: path.to_path_buf(),
            });
        }

        info!(path = %path.display(), "Transcription successful");
        Ok(TranscriptionOutcome::Text(text))
    }

    async fn upload(&self, wav_data: Vec<u8>) -> Result<String, TranscribeError> {
        let base_url = self.config.base_url.trim_end_matches('/');
        let url = format!("{base_url}/audio/transcriptions");

        let audio_part = Part::bytes(wav_data)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| TranscribeError::Service(format!("failed to create audio part: {e}")))?;

        let form = Form::new()
            .part("file", audio_part)
            .text("model", self.config.model.clone())
            .text("response_format", "text")
            .text("temperature", "0");

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TranscribeError::Service(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error response".to_string());
            return Err(TranscribeError::Service(format!(
                "transcription failed with status {status}: {error_text}"
            )));
        }

        response
            .text()
            .await
            .map_err(|e| TranscribeError::Service(format!("failed to read response: {e}")))
    }
}

/// Decode an audio or video file into interleaved f32 samples.
fn decode_audio(path: &Path) -> Result<DecodedAudio, TranscribeError> {
    let decode_err = |reason: String| TranscribeError::Decode {
        path: path.to_path_buf(),
        reason,
    };

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| decode_err(format!("format detection failed: {e}")))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| decode_err("no decodable audio track".to_string()))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| decode_err("missing sample rate".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| decode_err(format!("decoder creation failed: {e}")))?;

    let mut samples = Vec::new();
    let mut channels = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // End of stream (also raised for chained streams, which we
            // treat as the end).
            Err(symphonia::core::errors::Error::IoError(_))
            | Err(symphonia::core::errors::Error::ResetRequired) => break,
            Err(e) => return Err(decode_err(format!("packet read failed: {e}"))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                channels = decoded.spec().channels.count();
                let mut sample_buf =
                    SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
                sample_buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(sample_buf.samples());
            }
            // Bad packets are skipped, decoding continues.
            Err(symphonia::core::errors::Error::IoError(_))
            | Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
            Err(e) => return Err(decode_err(format!("decode failed: {e}"))),
        }
    }

    if samples.is_empty() || channels == 0 {
        return Err(decode_err("no audio samples decoded".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

/// Encode mono f32 samples as an in-memory 16-bit WAV.
fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, TranscribeError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut buffer = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut buffer, spec)
            .map_err(|e| TranscribeError::Service(format!("failed to create WAV writer: {e}")))?;

        for &sample in samples {
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| TranscribeError::Service(format!("failed to write sample: {e}")))?;
        }

        writer
            .finalize()
            .map_err(|e| TranscribeError::Service(format!("failed to finalize WAV: {e}")))?;
    }

    Ok(buffer.into_inner())
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!(path = %path.display(), "Deleted processed audio file"),
        Err(e) => error!(path = %path.display(), error = %e, "Failed to delete audio file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, seconds: f64, sample_rate: u32) {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        let total = (seconds * sample_rate as f64) as usize;
        for i in 0..total {
            let t = i as f32 / sample_rate as f32;
            let sample = (t * 440.0 * 2.0 * std::f32::consts::PI).sin();
            writer.write_sample((sample * 20000.0) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn decode_reports_duration() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tone.wav");
        write_wav(&path, 2.0, 16000);

        let decoded = decode_audio(&path).unwrap();
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.sample_rate, 16000);
        assert!((decoded.duration_secs() - 2.0).abs() < 0.05);
    }

    #[test]
    fn decode_rejects_non_audio() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("junk.mp3");
        std::fs::write(&path, b"this is not audio at all").unwrap();

        assert!(matches!(
            decode_audio(&path),
            Err(TranscribeError::Decode { .. })
        ));
    }

    #[test]
    fn downmix_averages_channels() {
        let decoded = DecodedAudio {
            samples: vec![1.0, 0.0, 0.5, 0.5],
            sample_rate: 16000,
            channels: 2,
        };
        assert_eq!(decoded.to_mono(), vec![0.5, 0.5]);
    }

    #[test]
    fn wav_roundtrip_produces_riff_header() {
        let data = samples_to_wav(&[0.0_f32; 1600], 16000).unwrap();
        assert_eq!(&data[..4], b"RIFF");
        assert_eq!(&data[8..12], b"WAVE");
    }

    #[tokio::test]
    async fn short_file_is_rejected_and_deleted() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("short.wav");
        write_wav(&path, 1.0, 16000);

        let config = TranscribeConfig {
            api_key: secrecy::SecretString::from("test"),
            base_url: "http://127.0.0.1:1".to_string(),
            model: "whisper-1".to_string(),
            min_duration: std::time::Duration::from_secs(5),
        };
        let transcriber = Transcriber::new(config).unwrap();

        let outcome = transcriber.transcribe_file(&path).await.unwrap();
        assert!(matches!(
            outcome,
            TranscriptionOutcome::TooShort { duration_secs } if duration_secs < 5.0
        ));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn failed_upload_still_deletes_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("long.wav");
        write_wav(&path, 6.0, 16000);

        let config = TranscribeConfig {
            api_key: secrecy::SecretString::from("test"),
            base_url: "http://127.0.0.1:1".to_string(),
            model: "whisper-1".to_string(),
            min_duration: std::time::Duration::from_secs(5),
        };
        let transcriber = Transcriber::new(config).unwrap();

        let result = transcriber.transcribe_file(&path).await;
        assert!(result.is_err());
        assert!(!path.exists());
    }
}
