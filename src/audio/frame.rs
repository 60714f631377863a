//! Fixed-duration PCM frames handed to the transport
//!
//! The mix runs in f32; a frame is the byte encoding of exactly one pacing
//! interval in the bus's output format.

use bytes::Bytes;

use crate::protocol::PcmFormat;

/// Byte size of one frame.
///
/// `sample_rate / 1000 * frame_duration_ms * bytes_per_sample * channels`
pub fn frame_size(
    sample_rate: u32,
    frame_duration_ms: u32,
    bytes_per_sample: usize,
    channels: u16,
) -> usize {
    (sample_rate / 1000) as usize * frame_duration_ms as usize * bytes_per_sample * channels as usize
}

/// One pacing interval of mixed, format-converted PCM
#[derive(Clone, Debug)]
pub struct Frame {
    /// Interleaved PCM bytes in the bus output format
    data: Bytes,
    /// Frame sequence number
    sequence: u64,
    /// Stream timestamp in microseconds
    timestamp_us: u64,
}

impl Frame {
    pub fn new(data: Bytes, sequence: u64, timestamp_us: u64) -> Self {
        Self {
            data,
            sequence,
            timestamp_us,
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    /// Decode 16-bit frames back into samples
    pub fn to_i16(&self) -> Vec<i16> {
        self.data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    /// Decode 32-bit float frames back into samples
    pub fn to_f32(&self) -> Vec<f32> {
        self.data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }
}

/// Encode f32 samples into `out` using the PCM layout of `format`.
///
/// Returns the number of bytes written. 16-bit output saturates at the
/// integer range; no other limiting is applied.
pub fn encode_pcm(samples: &[f32], format: &PcmFormat, out: &mut [u8]) -> usize {
    match format.bits_per_sample {
        16 => {
            let count = samples.len().min(out.len() / 2);
            for (sample, dst) in samples[..count].iter().zip(out.chunks_exact_mut(2)) {
                // float -> int casts saturate
                let value = (sample * i16::MAX as f32) as i16;
                dst.copy_from_slice(&value.to_le_bytes());
            }
            count * 2
        }
        32 => {
            let count = samples.len().min(out.len() / 4);
            for (sample, dst) in samples[..count].iter().zip(out.chunks_exact_mut(4)) {
                dst.copy_from_slice(&sample.to_le_bytes());
            }
            count * 4
        }
        _ => 0,
    }
}
