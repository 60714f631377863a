//! Opus encoder wrapper for the UDP transport
//!
//! Encodes whole mix frames; Opus accepts 10, 20, 40 and 60 ms frames at
//! 8/12/16/24/48 kHz, mono or stereo.

use bytes::Bytes;
use opus::{Application, Channels, Encoder};

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::protocol::PcmFormat;

/// Sample rates libopus accepts
pub const OPUS_SAMPLE_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];

/// Largest packet we ask the encoder for
const MAX_OPUS_PACKET: usize = 4000;

/// Encoder settings
#[derive(Debug, Clone)]
pub struct OpusSettings {
    pub format: PcmFormat,
    pub frame_duration_ms: u32,
    pub bitrate: u32,
    pub fec: bool,
    pub packet_loss_perc: u8,
}

impl OpusSettings {
    pub fn from_config(format: PcmFormat, frame_duration_ms: u32, config: &TransportConfig) -> Self {
        Self {
            format,
            frame_duration_ms,
            bitrate: config.bitrate,
            fec: config.fec,
            packet_loss_perc: config.packet_loss_perc,
        }
    }

    /// Samples per channel in one frame
    pub fn frame_size(&self) -> usize {
        (self.format.sample_rate / 1000 * self.frame_duration_ms) as usize
    }
}

/// Opus encoder for mixed music/voice content
pub struct OpusFrameEncoder {
    encoder: Encoder,
    settings: OpusSettings,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
    /// Decode scratch for 16-bit frames
    pcm: Vec<i16>,
    /// Decode scratch for float frames
    pcm_float: Vec<f32>,
    frames_encoded: u64,
    bytes_produced: u64,
}

impl OpusFrameEncoder {
    pub fn new(settings: OpusSettings) -> Result<Self, TransportError> {
        let format = settings.format;
        if !OPUS_SAMPLE_RATES.contains(&format.sample_rate) {
            return Err(TransportError::UnsupportedFormat(format!(
                "Opus cannot encode {} Hz",
                format.sample_rate
            )));
        }
        let channels = match format.channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            n => {
                return Err(TransportError::UnsupportedFormat(format!(
                    "Opus cannot encode {} channels",
                    n
                )))
            }
        };
        if format.bits_per_sample != 16 && format.bits_per_sample != 32 {
            return Err(TransportError::UnsupportedFormat(format!(
                "Opus input must be 16-bit or float, got {}-bit",
                format.bits_per_sample
            )));
        }

        let mut encoder = Encoder::new(format.sample_rate, channels, Application::Audio)
            .map_err(|e| TransportError::EncoderInit(e.to_string()))?;

        encoder
            .set_bitrate(opus::Bitrate::Bits(settings.bitrate as i32))
            .map_err(|e| TransportError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;

        encoder
            .set_inband_fec(settings.fec)
            .map_err(|e| TransportError::EncoderInit(format!("Failed to set FEC: {}", e)))?;

        if settings.fec {
            encoder
                .set_packet_loss_perc(settings.packet_loss_perc as i32)
                .map_err(|e| TransportError::EncoderInit(format!("Failed to set packet loss: {}", e)))?;
        }

        Ok(Self {
            encoder,
            settings,
            encode_buffer: vec![0u8; MAX_OPUS_PACKET],
            pcm: Vec::new(),
            pcm_float: Vec::new(),
            frames_encoded: 0,
            bytes_produced: 0,
        })
    }

    /// Encode one frame of PCM bytes in the configured format
    pub fn encode(&mut self, frame: &[u8]) -> Result<Bytes, TransportError> {
        let bytes_per_sample = self.settings.format.bytes_per_sample();
        let expected = self.samples_per_frame() * bytes_per_sample;
        if frame.len() != expected {
            return Err(TransportError::InvalidFrameSize(frame.len()));
        }

        let size = if bytes_per_sample == 2 {
            self.pcm.clear();
            self.pcm
                .extend(frame.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])));
            self.encoder.encode(&self.pcm, &mut self.encode_buffer)
        } else {
            self.pcm_float.clear();
            self.pcm_float.extend(
                frame
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            );
            self.encoder.encode_float(&self.pcm_float, &mut self.encode_buffer)
        }
        .map_err(|e| TransportError::EncodingFailed(e.to_string()))?;

        self.frames_encoded += 1;
        self.bytes_produced += size as u64;

        Ok(Bytes::copy_from_slice(&self.encode_buffer[..size]))
    }

    /// Total samples per frame (all channels)
    pub fn samples_per_frame(&self) -> usize {
        self.settings.frame_size() * self.settings.format.channels as usize
    }

    pub fn settings(&self) -> &OpusSettings {
        &self.settings
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
            average_frame_size: if self.frames_encoded > 0 {
                self.bytes_produced as f32 / self.frames_encoded as f32
            } else {
                0.0
            },
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub average_frame_size: f32,
}
