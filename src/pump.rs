//! Frame pump: turns a continuous PCM source into paced transport writes
//!
//! One task per bus. Each iteration reads exactly one frame and awaits the
//! sink's write before reading the next, so cadence comes from the sink's
//! backpressure rather than a local timer.

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audio::frame::Frame;
use crate::error::PumpError;
use crate::protocol::PcmFormat;
use crate::transport::VoiceSink;

/// Continuous producer of PCM bytes in a fixed format
pub trait FrameSource: Send + 'static {
    /// Layout of the bytes written by `read_frame`
    fn format(&self) -> PcmFormat;

    /// Fill `buf` with the next frame; a return shorter than `buf.len()`
    /// ends the pump.
    fn read_frame(&mut self, buf: &mut [u8]) -> usize;
}

/// How a pump task finished
#[derive(Debug, Clone, PartialEq)]
pub enum PumpExit {
    /// Stopped through its cancellation flag
    Cancelled,
    /// The source could not supply a full frame
    SourceExhausted,
    /// Terminated by an error
    Failed(PumpError),
    /// Did not finish within the stop timeout and was aborted
    TimedOut,
}

impl fmt::Display for PumpExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PumpExit::Cancelled => write!(f, "cancelled"),
            PumpExit::SourceExhausted => write!(f, "source could not supply a full frame"),
            PumpExit::Failed(e) => write!(f, "{}", e),
            PumpExit::TimedOut => write!(f, "timed out while stopping"),
        }
    }
}

/// Handle to a running pump task
pub struct FramePump {
    cancel: Arc<AtomicBool>,
    frames_sent: Arc<AtomicU64>,
    handle: Option<JoinHandle<PumpExit>>,
}

impl FramePump {
    /// Validate the formats and spawn the pump task.
    ///
    /// `on_stopped` runs once, inside the task, if the pump ends for any
    /// reason other than cancellation. Must be called within a Tokio runtime.
    pub fn start<S, F>(
        mut source: S,
        mut sink: Box<dyn VoiceSink>,
        frame_duration_ms: u32,
        on_stopped: F,
    ) -> Result<Self, PumpError>
    where
        S: FrameSource,
        F: FnOnce(&PumpExit) + Send + 'static,
    {
        let format = source.format();
        if format != sink.format() {
            return Err(PumpError::FormatMismatch {
                source_format: format,
                sink_format: sink.format(),
            });
        }
        if !format.is_encodable() {
            return Err(PumpError::UnsupportedFormat(format));
        }

        let frame_bytes = format.frame_bytes(frame_duration_ms);
        if frame_bytes == 0 {
            return Err(PumpError::InvalidFrameDuration(frame_duration_ms));
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let frames_sent = Arc::new(AtomicU64::new(0));
        let frame_us = frame_duration_ms as u64 * 1000;

        let task_cancel = cancel.clone();
        let task_frames = frames_sent.clone();

        let handle = tokio::spawn(async move {
            info!("Frame pump started: {}, {} ms frames ({} bytes)", format, frame_duration_ms, frame_bytes);

            let mut buf = vec![0u8; frame_bytes];
            let mut sequence: u64 = 0;

            let exit = loop {
                if task_cancel.load(Ordering::SeqCst) {
                    break PumpExit::Cancelled;
                }

                let read = source.read_frame(&mut buf);
                if read < frame_bytes {
                    debug!(read, frame_bytes, "Frame source exhausted");
                    break PumpExit::SourceExhausted;
                }

                if task_cancel.load(Ordering::SeqCst) {
                    break PumpExit::Cancelled;
                }

                let frame = Frame::new(Bytes::copy_from_slice(&buf), sequence, sequence * frame_us);
                if let Err(e) = sink.write_frame(frame).await {
                    break PumpExit::Failed(PumpError::TransportWrite(e.to_string()));
                }

                sequence += 1;
                task_frames.store(sequence, Ordering::Relaxed);
            };

            if let Err(e) = sink.close().await {
                warn!("Failed to close transport sink: {}", e);
            }

            match &exit {
                PumpExit::Cancelled => info!("Frame pump finished after {} frames", sequence),
                PumpExit::Failed(e) => {
                    error!("Frame pump stopped after {} frames: {}", sequence, e);
                    on_stopped(&exit);
                }
                other => {
                    warn!("Frame pump ended after {} frames: {}", sequence, other);
                    on_stopped(&exit);
                }
            }
            exit
        });

        Ok(Self {
            cancel,
            frames_sent,
            handle: Some(handle),
        })
    }

    /// Ask the task to stop before its next read or write
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Shared cancellation flag, for owners that cannot await `stop`
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Cancel and wait up to `timeout` for the in-flight write to finish.
    ///
    /// Returns `None` if the pump was already stopped.
    pub async fn stop(&mut self, timeout: Duration) -> Option<PumpExit> {
        self.cancel();
        let mut handle = self.handle.take()?;

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(exit)) => Some(exit),
            Ok(Err(e)) => {
                error!("Frame pump task panicked: {}", e);
                Some(PumpExit::Failed(PumpError::TransportWrite(e.to_string())))
            }
            Err(_) => {
                warn!("Frame pump did not stop within {:?}, aborting", timeout);
                handle.abort();
                Some(PumpExit::TimedOut)
            }
        }
    }
}

impl Drop for FramePump {
    fn drop(&mut self) {
        self.cancel();
    }
}
