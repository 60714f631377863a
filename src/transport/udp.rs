//! Opus-over-UDP voice sink
//!
//! Packets: `[Seq u32 BE | Timestamp us u64 BE | Opus Data]`, one datagram
//! per frame. The sink releases one frame per frame interval, so the pump
//! upstream runs at real time through write backpressure.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::audio::frame::Frame;
use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::protocol::PcmFormat;
use crate::transport::encoder::{OpusFrameEncoder, OpusSettings};
use crate::transport::VoiceSink;

/// Packet header size in bytes
pub const HEADER_SIZE: usize = 12;

/// Maximum datagram size (MTU - IP/UDP headers)
pub const MAX_PACKET_SIZE: usize = 1472;

/// Sender statistics
#[derive(Debug, Clone, Default)]
pub struct SenderStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
}

/// Encodes frames with Opus and sends them to a single receiver
pub struct UdpOpusSink {
    socket: UdpSocket,
    target: SocketAddr,
    encoder: OpusFrameEncoder,
    format: PcmFormat,
    ticker: Interval,
    sequence: u32,
    stats: SenderStats,
}

impl UdpOpusSink {
    /// Bind an ephemeral local socket and prepare the encoder
    pub async fn connect(
        target: SocketAddr,
        format: PcmFormat,
        frame_duration_ms: u32,
        config: &TransportConfig,
    ) -> Result<Self, TransportError> {
        let encoder =
            OpusFrameEncoder::new(OpusSettings::from_config(format, frame_duration_ms, config))?;

        let bind_addr: SocketAddr = if target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        let mut ticker = interval(Duration::from_millis(frame_duration_ms as u64));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "UDP sink ready: {} -> {} ({}, {} ms frames)",
            socket.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            target,
            format,
            frame_duration_ms
        );

        Ok(Self {
            socket,
            target,
            encoder,
            format,
            ticker,
            sequence: 0,
            stats: SenderStats::default(),
        })
    }

    pub fn stats(&self) -> SenderStats {
        self.stats.clone()
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

/// Build one datagram
pub fn build_packet(sequence: u32, timestamp_us: u64, payload: &[u8]) -> Bytes {
    let mut packet = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    packet.put_u32(sequence);
    packet.put_u64(timestamp_us);
    packet.put_slice(payload);
    packet.freeze()
}

#[async_trait]
impl VoiceSink for UdpOpusSink {
    fn format(&self) -> PcmFormat {
        self.format
    }

    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.ticker.tick().await;

        let encoded = self.encoder.encode(frame.data())?;
        let packet = build_packet(self.sequence, frame.timestamp_us(), &encoded);
        if packet.len() > MAX_PACKET_SIZE {
            return Err(TransportError::SendFailed(format!(
                "Packet too large: {} bytes",
                packet.len()
            )));
        }

        self.socket
            .send_to(&packet, self.target)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        self.sequence = self.sequence.wrapping_add(1);
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += packet.len() as u64;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let encoder = self.encoder.stats();
        debug!(
            "UDP sink closed: {} packets, {:.1} KB sent, avg frame {:.0} bytes",
            self.stats.packets_sent,
            self.stats.bytes_sent as f64 / 1024.0,
            encoder.average_frame_size
        );
        Ok(())
    }
}
