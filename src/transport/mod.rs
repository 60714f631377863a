//! Voice transport sinks
//!
//! A sink accepts one frame at a time and completes the write once the
//! transport has taken it, which is what paces the frame pump.

pub mod channel;
#[cfg(feature = "udp")]
pub mod encoder;
#[cfg(feature = "udp")]
pub mod udp;

use async_trait::async_trait;

use crate::audio::frame::Frame;
use crate::error::TransportError;
use crate::protocol::PcmFormat;

pub use channel::{channel_sink, ChannelSink};
#[cfg(feature = "udp")]
pub use udp::UdpOpusSink;

/// Write-only destination for fixed-size PCM frames
#[async_trait]
pub trait VoiceSink: Send {
    /// PCM layout every frame must have
    fn format(&self) -> PcmFormat;

    /// Hand over exactly one frame; resolves once the transport accepted it
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Flush and release the transport. Called once when streaming stops.
    async fn close(&mut self) -> Result<(), TransportError>;
}
