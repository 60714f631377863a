//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use voice_mixbus::audio::{Frame, MemorySource, SampleSource, SourceOpener};
use voice_mixbus::config::{MixConfig, PumpConfig};
use voice_mixbus::error::SourceError;
use voice_mixbus::transport::channel_sink;
use voice_mixbus::{MixBus, PcmFormat, TrackDescriptor};

/// 8 kHz mono keeps frames small: 160 samples per 20 ms
pub const FORMAT: PcmFormat = PcmFormat::new(8000, 1, 16);

pub fn mix_config() -> MixConfig {
    MixConfig {
        sample_rate: FORMAT.sample_rate,
        channels: FORMAT.channels,
        bits_per_sample: FORMAT.bits_per_sample,
        ..MixConfig::default()
    }
}

pub fn pump_config() -> PumpConfig {
    PumpConfig { stop_timeout_ms: 50 }
}

/// Counts how many sources were released
#[derive(Clone, Default)]
pub struct DropCounter(Arc<AtomicUsize>);

impl DropCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Memory source that bumps a counter when dropped
pub struct CountedSource {
    inner: MemorySource,
    drops: DropCounter,
}

impl Drop for CountedSource {
    fn drop(&mut self) {
        self.drops.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl SampleSource for CountedSource {
    fn format(&self) -> PcmFormat {
        self.inner.format()
    }

    fn read(&mut self, buf: &mut [f32]) -> Result<usize, SourceError> {
        self.inner.read(buf)
    }

    fn seek_to_start(&mut self) -> Result<(), SourceError> {
        self.inner.seek_to_start()
    }

    fn is_seekable(&self) -> bool {
        self.inner.is_seekable()
    }

    fn len_frames(&self) -> Option<u64> {
        self.inner.len_frames()
    }

    fn position_frames(&self) -> u64 {
        self.inner.position_frames()
    }
}

/// Opener for locators of the form `<value>@<frames>`: a constant signal of
/// `value` lasting `frames` frames. Anything else fails to open.
pub fn constant_opener(drops: DropCounter) -> Arc<dyn SourceOpener> {
    Arc::new(
        move |track: &TrackDescriptor| -> Result<Box<dyn SampleSource>, SourceError> {
            let parsed = track.source().split_once('@').and_then(|(value, frames)| {
                Some((value.parse::<f32>().ok()?, frames.parse::<usize>().ok()?))
            });
            let Some((value, frames)) = parsed else {
                return Err(SourceError::unavailable(track.source(), "no such track"));
            };

            Ok(Box::new(CountedSource {
                inner: MemorySource::constant(value, frames, FORMAT),
                drops: drops.clone(),
            }))
        },
    )
}

pub fn track(locator: &str) -> TrackDescriptor {
    TrackDescriptor::new(locator).unwrap()
}

/// Bus on a channel sink holding at most `queue` frames
pub fn bus_with_queue(queue: usize, drops: DropCounter) -> (Arc<MixBus>, mpsc::Receiver<Frame>) {
    let (sink, rx) = channel_sink(FORMAT, queue);
    let bus = MixBus::new(&mix_config(), &pump_config(), Box::new(sink), constant_opener(drops))
        .unwrap();
    (Arc::new(bus), rx)
}

/// Keep consuming frames so the pump never blocks
pub fn drain(mut rx: mpsc::Receiver<Frame>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move { while rx.recv().await.is_some() {} })
}
