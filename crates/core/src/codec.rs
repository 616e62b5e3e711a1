use crate::{error::CodecError, protocol::Blob};
use base64::Engine;

/// Sample rate of the microphone frames sent upstream.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of the synthesized audio received from the session.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;
pub const OUTPUT_CHANNELS: u16 = 1;

const PCM16_SCALE: f32 = 32768.0;

/// A decoded block of audio ready to hand to an output device.
///
/// Samples are interleaved when `channels > 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBuffer {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }
}

/// A PCM16 payload tagged with its MIME type, as carried on the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedChunk {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl EncodedChunk {
    /// Encodes mono float samples captured at `sample_rate`.
    pub fn pcm16(samples: &[f32], sample_rate: u32) -> Self {
        Self {
            mime_type: format!("audio/pcm;rate={sample_rate}"),
            data: encode_pcm16(samples),
        }
    }

    pub fn to_blob(&self) -> Blob {
        Blob {
            mime_type: self.mime_type.clone(),
            data: encode_base64(&self.data),
        }
    }
}

/// Converts float samples to little-endian PCM16 bytes.
///
/// Samples are clamped to [-1, 1] first so out-of-range input saturates
/// instead of wrapping.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&sample| {
            let scaled = (sample.clamp(-1.0, 1.0) * PCM16_SCALE)
                .clamp(i16::MIN as f32, i16::MAX as f32);
            (scaled as i16).to_le_bytes()
        })
        .collect()
}

/// Interprets little-endian PCM16 bytes as a playable buffer.
///
/// Lossy on malformed input: a trailing odd byte, or a trailing partial
/// frame when `channels > 1`, is dropped rather than reported.
pub fn decode_pcm16(bytes: &[u8], sample_rate: u32, channels: u16) -> AudioBuffer {
    let channels = channels.max(1);
    let mut samples: Vec<f32> = bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / PCM16_SCALE)
        .collect();
    let whole_frames = samples.len() / channels as usize;
    samples.truncate(whole_frames * channels as usize);
    AudioBuffer {
        samples,
        sample_rate,
        channels,
    }
}

pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn decode_base64(text: &str) -> Result<Vec<u8>, CodecError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(text)?)
}
