//! Decoded sample stream boundary
//!
//! A [`SampleSource`] is what a decoder hands to a layer: interleaved f32
//! samples in the source's native format, with a position and (when known)
//! a length in frames.

use std::sync::Arc;

use crate::error::SourceError;
use crate::protocol::{PcmFormat, TrackDescriptor};

/// Pull-based stream of interleaved f32 samples
pub trait SampleSource: Send {
    /// Native format of the decoded stream
    fn format(&self) -> PcmFormat;

    /// Fill `buf` with up to `buf.len()` interleaved samples.
    ///
    /// Returns the number of samples written; `0` means the stream is
    /// exhausted. Implementations only write whole frames.
    fn read(&mut self, buf: &mut [f32]) -> Result<usize, SourceError>;

    /// Rewind to the first frame
    fn seek_to_start(&mut self) -> Result<(), SourceError>;

    /// Whether `seek_to_start` can succeed
    fn is_seekable(&self) -> bool;

    /// Total length in frames, if the container reports one
    fn len_frames(&self) -> Option<u64>;

    /// Frames delivered since the start (or the last rewind)
    fn position_frames(&self) -> u64;
}

/// Opens a track's locator into a decoded stream.
///
/// Called on a blocking thread; implementations may do file or network I/O.
pub trait SourceOpener: Send + Sync {
    fn open(&self, track: &TrackDescriptor) -> Result<Box<dyn SampleSource>, SourceError>;
}

impl<F> SourceOpener for F
where
    F: Fn(&TrackDescriptor) -> Result<Box<dyn SampleSource>, SourceError> + Send + Sync,
{
    fn open(&self, track: &TrackDescriptor) -> Result<Box<dyn SampleSource>, SourceError> {
        self(track)
    }
}

/// In-memory seekable source over pre-decoded samples
#[derive(Clone)]
pub struct MemorySource {
    samples: Arc<[f32]>,
    format: PcmFormat,
    /// Read position in samples (not frames)
    position: usize,
    seekable: bool,
}

impl MemorySource {
    /// Wrap interleaved samples; a trailing partial frame is ignored.
    pub fn new(samples: impl Into<Arc<[f32]>>, format: PcmFormat) -> Self {
        Self {
            samples: samples.into(),
            format,
            position: 0,
            seekable: true,
        }
    }

    /// `frames` frames where every sample equals `value`
    pub fn constant(value: f32, frames: usize, format: PcmFormat) -> Self {
        Self::new(vec![value; frames * format.channels as usize], format)
    }

    /// Sine tone at `frequency` Hz on every channel
    pub fn sine(frequency: f32, amplitude: f32, frames: usize, format: PcmFormat) -> Self {
        let channels = format.channels as usize;
        let rate = format.sample_rate as f32;
        let mut samples = Vec::with_capacity(frames * channels);
        for i in 0..frames {
            let value = (i as f32 / rate * frequency * std::f32::consts::TAU).sin() * amplitude;
            samples.extend(std::iter::repeat(value).take(channels));
        }
        Self::new(samples, format)
    }

    /// Make `seek_to_start` fail, like a live network stream
    pub fn non_seekable(mut self) -> Self {
        self.seekable = false;
        self
    }

    fn usable_len(&self) -> usize {
        let channels = self.format.channels.max(1) as usize;
        self.samples.len() - self.samples.len() % channels
    }
}

impl SampleSource for MemorySource {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn read(&mut self, buf: &mut [f32]) -> Result<usize, SourceError> {
        let channels = self.format.channels.max(1) as usize;
        let remaining = self.usable_len().saturating_sub(self.position);
        let count = remaining.min(buf.len() - buf.len() % channels);

        buf[..count].copy_from_slice(&self.samples[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }

    fn seek_to_start(&mut self) -> Result<(), SourceError> {
        if !self.seekable {
            return Err(SourceError::Seek("memory source marked non-seekable".into()));
        }
        self.position = 0;
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        self.seekable
    }

    fn len_frames(&self) -> Option<u64> {
        Some((self.usable_len() / self.format.channels.max(1) as usize) as u64)
    }

    fn position_frames(&self) -> u64 {
        (self.position / self.format.channels.max(1) as usize) as u64
    }
}
