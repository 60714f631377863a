//! # Voice MixBus
//!
//! Real-time multi-layer audio mixing for voice transports.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                                 CALLERS                                     │
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐         │
//! │  │ PlaylistSequencer│   │  add/remove API  │   │  live controls   │         │
//! │  │ (playlist::*)    │   │  (any task)      │   │  volume / loop   │         │
//! │  └────────┬─────────┘   └────────┬─────────┘   └────────┬─────────┘         │
//! │           │  LayerEnded ▲        │                      │                   │
//! └───────────┼─────────────┼────────┼──────────────────────┼───────────────────┘
//!             ▼             │        ▼                      ▼
//! ┌─────────────────────────┴───────────────────────────────────────────────────┐
//! │                           MixBus (mixer::bus)                               │
//! │  ┌──────────────────────────────────────────────────────────────────────┐   │
//! │  │   Mutex<HashMap<LayerId, Layer>>  -- the only shared mutable state   │   │
//! │  │                                                                      │   │
//! │  │  Layer A               Layer B               Layer C                 │   │
//! │  │  ┌──────────┐          ┌──────────┐          ┌──────────┐            │   │
//! │  │  │ Decoder  │          │ Decoder  │          │ Decoder  │            │   │
//! │  │  │ (symph.) │          │ (symph.) │          │ (memory) │            │   │
//! │  │  └────┬─────┘          └────┬─────┘          └────┬─────┘            │   │
//! │  │       ▼                     ▼                     ▼                  │   │
//! │  │  ┌──────────┐          ┌──────────┐          ┌──────────┐            │   │
//! │  │  │ Looping  │          │ Looping  │          │ Looping  │            │   │
//! │  │  └────┬─────┘          └────┬─────┘          └────┬─────┘            │   │
//! │  │       ▼                     ▼                     │ (format matches) │   │
//! │  │  ┌──────────┐          ┌──────────┐               │                  │   │
//! │  │  │ Resample │          │ Resample │               │                  │   │
//! │  │  └────┬─────┘          └────┬─────┘               │                  │   │
//! │  │       ▼ × volume            ▼ × volume            ▼ × volume         │   │
//! │  │  ┌────────────────────────────────────────────────────────────────┐  │   │
//! │  │  │                        Σ  (no limiting)                        │  │   │
//! │  │  └───────────────────────────────┬────────────────────────────────┘  │   │
//! │  └──────────────────────────────────┼───────────────────────────────────┘   │
//! └─────────────────────────────────────┼───────────────────────────────────────┘
//!                                       ▼
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                    FramePump (pump) - one task per bus                      │
//! │      read one frame (20 ms PCM) ──► await sink.write_frame ──► repeat      │
//! └─────────────────────────────────────┬───────────────────────────────────────┘
//!                                       ▼
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │              VoiceSink (transport) - ChannelSink / UdpOpusSink              │
//! │      Packets: [Seq|Timestamp|Opus Data]                                     │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod mixer;
pub mod playlist;
pub mod protocol;
pub mod pump;
pub mod transport;

pub use error::{Error, Result};
pub use mixer::{Layer, LayerHandle, MixBus};
pub use playlist::{PlaylistParser, PlaylistSequencer, SequencerState};
pub use protocol::{LayerId, MixEvent, PcmFormat, TrackDescriptor};

/// Application-wide constants
pub mod constants {
    /// Default sample rate of the mix bus
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Default bit depth of the PCM handed to the transport
    pub const DEFAULT_BITS_PER_SAMPLE: u16 = 16;

    /// Default frame duration in milliseconds
    pub const DEFAULT_FRAME_DURATION_MS: u32 = 20;

    /// Frame durations a transport is expected to accept
    pub const SUPPORTED_FRAME_DURATIONS_MS: [u32; 4] = [10, 20, 40, 60];

    /// Lowest layer volume
    pub const MIN_VOLUME: f32 = 0.0;

    /// Highest layer volume
    pub const MAX_VOLUME: f32 = 2.0;

    /// Volume a layer starts with when nothing else is requested
    pub const DEFAULT_VOLUME: f32 = 1.0;

    /// Default Opus bitrate in bits per second
    pub const DEFAULT_BITRATE: u32 = 128_000;

    /// Default UDP port for audio streaming
    pub const DEFAULT_UDP_PORT: u16 = 5000;

    /// How long bus shutdown waits for an in-flight frame write
    pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 1000;

    /// Default timeout for fetching remote playlists and media
    pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;

    /// Capacity of the bus event broadcast channel
    pub const EVENT_CHANNEL_CAPACITY: usize = 64;

    /// Frames buffered by a channel sink before writes block
    pub const DEFAULT_SINK_QUEUE_FRAMES: usize = 8;

    /// Frames pulled from a decoder per resampler refill
    pub const RESAMPLE_CHUNK_FRAMES: usize = 1024;

    /// Frames produced per resampler call
    pub const RESAMPLE_OUTPUT_FRAMES: usize = 256;
}
