//! Narrowband audio frame types and G.711 codec helpers
//!
//! The telephony transport carries 8kHz mono µ-law audio as base64 payloads.
//! Frames keep the raw companded bytes; PCM16 conversion is only done at the
//! edges that need linear samples (energy estimation, test fixtures).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Telephony sample rate (Hz). The transport only speaks narrowband.
pub const NARROWBAND_SAMPLE_RATE: u32 = 8000;

/// Audio encoding formats seen at the edges of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AudioEncoding {
    /// µ-law companded PCM (telephony narrowband)
    #[default]
    Mulaw,
    /// 16-bit signed PCM (little-endian)
    Pcm16,
    /// Compressed synthesis output (provider-dependent, e.g. MP3)
    Compressed,
}

/// One inbound or outbound media frame: µ-law bytes plus ordering metadata.
#[derive(Clone)]
pub struct AudioFrame {
    /// µ-law companded samples, one byte per sample
    pub payload: Arc<[u8]>,
    /// Frame sequence number for ordering
    pub sequence: u64,
    /// Timestamp when the frame was received/produced
    pub timestamp: Instant,
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("payload_len", &self.payload.len())
            .field("sequence", &self.sequence)
            .field("duration_ms", &self.duration_ms())
            .finish()
    }
}

impl AudioFrame {
    /// Create a frame from raw µ-law bytes
    pub fn new(payload: Vec<u8>, sequence: u64) -> Self {
        Self {
            payload: payload.into(),
            sequence,
            timestamp: Instant::now(),
        }
    }

    /// Decode a base64 media payload as received from the telephony stream
    pub fn from_base64(encoded: &str, sequence: u64) -> Result<Self, base64::DecodeError> {
        Ok(Self::new(BASE64.decode(encoded)?, sequence))
    }

    /// Encode the payload for the telephony stream
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.payload)
    }

    /// Frame duration at the narrowband rate (one byte per sample)
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.payload.len() as f64 / NARROWBAND_SAMPLE_RATE as f64)
    }

    /// Frame duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.duration().as_millis() as u64
    }

    /// Expand to linear PCM16 samples
    pub fn to_pcm16(&self) -> Vec<i16> {
        self.payload.iter().map(|&b| mulaw_decode(b)).collect()
    }

    /// Split into chunks of at most `chunk_bytes`, renumbering sequences
    pub fn split(&self, chunk_bytes: usize) -> Vec<AudioFrame> {
        let mut seq = self.sequence;
        self.payload
            .chunks(chunk_bytes)
            .map(|chunk| {
                let frame = AudioFrame::new(chunk.to_vec(), seq);
                seq += 1;
                frame
            })
            .collect()
    }
}

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32635;

/// Compand one linear PCM16 sample to µ-law (G.711)
pub fn mulaw_encode(sample: i16) -> u8 {
    let sign = if sample < 0 { 0x80u8 } else { 0 };
    let mut magnitude = (sample as i32).abs().min(MULAW_CLIP) + MULAW_BIAS;

    let mut exponent = 7u8;
    let mut mask = 0x4000;
    while exponent > 0 && magnitude & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = ((magnitude >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Expand one µ-law byte to linear PCM16 (G.711)
pub fn mulaw_decode(byte: u8) -> i16 {
    let byte = !byte;
    let sign = byte & 0x80;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = byte & 0x0F;

    let mut magnitude = ((mantissa as i32) << 3) + MULAW_BIAS;
    magnitude <<= exponent;
    magnitude -= MULAW_BIAS;

    if sign != 0 {
        -(magnitude as i16)
    } else {
        magnitude as i16
    }
}

/// Compand a PCM16 buffer to µ-law
pub fn pcm16_to_mulaw(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| mulaw_encode(s)).collect()
}

/// Expand a µ-law buffer to PCM16
pub fn mulaw_to_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().map(|&b| mulaw_decode(b)).collect()
}
