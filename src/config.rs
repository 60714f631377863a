//! Application configuration
//!
//! Loaded from a TOML file in the platform config directory; every section
//! falls back to defaults so a partial file is valid.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::Error;
use crate::protocol::PcmFormat;

/// Resampler interpolation quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplerQuality {
    /// Linear polynomial, no anti-aliasing filter
    Low,
    /// 64-tap windowed sinc
    #[default]
    Medium,
    /// 256-tap Blackman-Harris sinc with cubic table interpolation
    High,
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mix: MixConfig,
    pub pump: PumpConfig,
    pub transport: TransportConfig,
    pub playlist: PlaylistConfig,
}

/// Mix bus output format and layer defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MixConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub frame_duration_ms: u32,
    pub resampler_quality: ResamplerQuality,
    pub default_volume: f32,
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            bits_per_sample: DEFAULT_BITS_PER_SAMPLE,
            frame_duration_ms: DEFAULT_FRAME_DURATION_MS,
            resampler_quality: ResamplerQuality::default(),
            default_volume: DEFAULT_VOLUME,
        }
    }
}

impl MixConfig {
    pub fn format(&self) -> PcmFormat {
        PcmFormat::new(self.sample_rate, self.channels, self.bits_per_sample)
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_duration_ms as u64)
    }
}

/// Frame pump settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    /// Upper bound on waiting for an in-flight write during shutdown
    pub stop_timeout_ms: u64,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
        }
    }
}

impl PumpConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Transport sink settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Receiver address for the UDP transport
    pub target: SocketAddr,
    /// Opus bitrate in bits per second
    pub bitrate: u32,
    /// Enable Opus in-band forward error correction
    pub fec: bool,
    /// Expected packet loss percentage (FEC tuning)
    pub packet_loss_perc: u8,
    /// Frames a channel sink queues before writes block
    pub queue_frames: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            target: SocketAddr::from(([127, 0, 0, 1], DEFAULT_UDP_PORT)),
            bitrate: DEFAULT_BITRATE,
            fec: false,
            packet_loss_perc: 0,
            queue_frames: DEFAULT_SINK_QUEUE_FRAMES,
        }
    }
}

/// Playlist playback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistConfig {
    pub loop_playlist: bool,
    pub fetch_timeout_ms: u64,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            loop_playlist: false,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
        }
    }
}

impl PlaylistConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl AppConfig {
    /// Default config file location (`<config dir>/voice-mixbus/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "voice-mixbus").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default location, falling back to defaults when absent
    pub fn load_or_default() -> Result<Self, Error> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Write the config as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Check the mix format is something the pump and transports can carry
    pub fn validate(&self) -> Result<(), Error> {
        let mix = &self.mix;
        if mix.sample_rate == 0 || mix.sample_rate % 1000 != 0 {
            return Err(Error::Config(format!(
                "sample_rate must be a non-zero multiple of 1000, got {}",
                mix.sample_rate
            )));
        }
        if !(1..=8).contains(&mix.channels) {
            return Err(Error::Config(format!(
                "channels must be between 1 and 8, got {}",
                mix.channels
            )));
        }
        if mix.bits_per_sample != 16 && mix.bits_per_sample != 32 {
            return Err(Error::Config(format!(
                "bits_per_sample must be 16 or 32, got {}",
                mix.bits_per_sample
            )));
        }
        if !SUPPORTED_FRAME_DURATIONS_MS.contains(&mix.frame_duration_ms) {
            return Err(Error::Config(format!(
                "frame_duration_ms must be one of {:?}, got {}",
                SUPPORTED_FRAME_DURATIONS_MS, mix.frame_duration_ms
            )));
        }
        if !(MIN_VOLUME..=MAX_VOLUME).contains(&mix.default_volume) {
            return Err(Error::Config(format!(
                "default_volume must be within {}..={}, got {}",
                MIN_VOLUME, MAX_VOLUME, mix.default_volume
            )));
        }
        if self.transport.queue_frames == 0 {
            return Err(Error::Config("transport.queue_frames must be at least 1".into()));
        }
        Ok(())
    }
}
