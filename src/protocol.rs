//! Plain data types shared by the bus, the pump and the playlist components

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use crate::constants::{DEFAULT_VOLUME, MAX_VOLUME, MIN_VOLUME};
use crate::error::SourceError;

/// Interleaved PCM format description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PcmFormat {
    /// Samples per second per channel
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// 16 = signed little-endian integers, 32 = little-endian floats
    pub bits_per_sample: u16,
}

impl PcmFormat {
    pub const fn new(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
        }
    }

    /// 48 kHz / stereo / 16-bit, what voice transports expect
    pub const fn voice_default() -> Self {
        Self::new(48000, 2, 16)
    }

    /// Whether frames in this layout can be encoded: 16-bit integer or
    /// 32-bit float samples, non-zero rate and channel count
    pub fn is_encodable(&self) -> bool {
        self.sample_rate > 0 && self.channels > 0 && matches!(self.bits_per_sample, 16 | 32)
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.bits_per_sample as usize / 8
    }

    /// Samples (all channels) in one frame of `frame_duration_ms`
    pub fn samples_per_frame(&self, frame_duration_ms: u32) -> usize {
        (self.sample_rate / 1000) as usize * frame_duration_ms as usize * self.channels as usize
    }

    /// Bytes in one frame of `frame_duration_ms`
    pub fn frame_bytes(&self, frame_duration_ms: u32) -> usize {
        crate::audio::frame::frame_size(
            self.sample_rate,
            frame_duration_ms,
            self.bytes_per_sample(),
            self.channels,
        )
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self::voice_default()
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz/{} ch/{}-bit",
            self.sample_rate, self.channels, self.bits_per_sample
        )
    }
}

/// Opaque identifier of a layer, generated fresh for every constructed layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(Uuid);

impl LayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Immutable description of a track to play
///
/// Built once (by the playlist parser or directly) and never mutated; the
/// `with_*` methods consume and return a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    source: String,
    title: String,
    looping: bool,
    volume: f32,
    duration: Option<Duration>,
}

impl TrackDescriptor {
    /// Create a descriptor for a file path or absolute URI.
    ///
    /// The title defaults to the file stem of the locator.
    pub fn new(source: impl Into<String>) -> Result<Self, SourceError> {
        let source = source.into();
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(SourceError::InvalidLocator(source));
        }

        let source = trimmed.to_string();
        let title = default_title(&source);
        Ok(Self {
            source,
            title,
            looping: false,
            volume: DEFAULT_VOLUME,
            duration: None,
        })
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        if !title.trim().is_empty() {
            self.title = title.trim().to_string();
        }
        self
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Initial volume, clamped to the layer volume range
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = clamp_volume(volume);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Whether the locator is an http(s) URL
    pub fn is_remote(&self) -> bool {
        let lower = self.source.to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }
}

/// Clamp a volume into `[MIN_VOLUME, MAX_VOLUME]`; NaN maps to silence.
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        MIN_VOLUME
    } else {
        volume.clamp(MIN_VOLUME, MAX_VOLUME)
    }
}

fn default_title(source: &str) -> String {
    let last_segment = match url::Url::parse(source) {
        Ok(url) if url.scheme().len() > 1 => url
            .path_segments()
            .and_then(|segments| segments.last().map(str::to_string))
            .unwrap_or_default(),
        _ => source
            .rsplit(|c: char| c == '/' || c == '\\')
            .next()
            .unwrap_or(source)
            .to_string(),
    };

    let stem = Path::new(&last_segment)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");

    if stem.is_empty() {
        source.to_string()
    } else {
        stem.to_string()
    }
}

/// Snapshot of one active layer
#[derive(Debug, Clone, Serialize)]
pub struct LayerStatus {
    pub id: LayerId,
    pub title: String,
    pub source: String,
    pub volume: f32,
    pub looping: bool,
    pub position_frames: u64,
    pub length_frames: Option<u64>,
}

/// Lifecycle notifications published by a mix bus
#[derive(Debug, Clone, PartialEq)]
pub enum MixEvent {
    LayerAdded { id: LayerId, title: String },
    /// Removed by a caller (`remove_layer` / `stop_all`).
    LayerRemoved { id: LayerId },
    /// Played to the end; already out of the mix and disposed.
    LayerEnded { id: LayerId },
    /// The frame pump ended without being asked to stop. Published once per pump.
    StreamingStopped { reason: String },
}
