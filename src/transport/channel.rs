//! In-process sink backed by a bounded channel
//!
//! Writes wait for channel capacity, so a slow consumer throttles the pump.
//! Useful for tests and for bridging frames into another transport.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::audio::frame::Frame;
use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::protocol::PcmFormat;
use crate::transport::VoiceSink;

/// Sending half handed to the pump
pub struct ChannelSink {
    tx: Option<mpsc::Sender<Frame>>,
    format: PcmFormat,
    frames_written: u64,
}

/// Create a sink and the receiver its frames arrive on
pub fn channel_sink(format: PcmFormat, capacity: usize) -> (ChannelSink, mpsc::Receiver<Frame>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sink = ChannelSink {
        tx: Some(tx),
        format,
        frames_written: 0,
    };
    (sink, rx)
}

impl ChannelSink {
    /// Sink queueing `config.queue_frames` frames
    pub fn from_config(format: PcmFormat, config: &TransportConfig) -> (Self, mpsc::Receiver<Frame>) {
        channel_sink(format, config.queue_frames)
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

#[async_trait]
impl VoiceSink for ChannelSink {
    fn format(&self) -> PcmFormat {
        self.format
    }

    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).await.map_err(|_| TransportError::Closed)?;
        self.frames_written += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // Dropping the sender ends the receiver's stream.
        self.tx.take();
        Ok(())
    }
}
