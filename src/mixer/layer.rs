//! A single independently playing track in the mix
//!
//! Pipeline: decode -> loop -> (resample) -> volume. The layer is owned by
//! the bus once registered and is only ever read by the frame pump.

use tracing::{debug, trace, warn};

use crate::audio::looping::LoopingSource;
use crate::audio::resample::ResampleStage;
use crate::audio::source::{SampleSource, SourceOpener};
use crate::config::ResamplerQuality;
use crate::error::SourceError;
use crate::protocol::{clamp_volume, LayerId, LayerStatus, PcmFormat, TrackDescriptor};

/// Construction options for a [`Layer`]
#[derive(Debug, Clone, Copy)]
pub struct LayerOptions {
    /// Overrides the descriptor's loop flag when set
    pub loop_override: Option<bool>,
    /// Overrides the descriptor's initial volume when set
    pub volume: Option<f32>,
    /// Format the layer must produce
    pub target: PcmFormat,
    pub quality: ResamplerQuality,
}

impl LayerOptions {
    pub fn new(target: PcmFormat) -> Self {
        Self {
            loop_override: None,
            volume: None,
            target,
            quality: ResamplerQuality::default(),
        }
    }
}

/// One track's decode/loop/gain/convert pipeline
pub struct Layer {
    id: LayerId,
    track: TrackDescriptor,
    volume: f32,
    target: PcmFormat,
    source: Option<LoopingSource>,
    resampler: Option<ResampleStage>,
    /// A read failed; the layer ends regardless of looping
    failed: bool,
    /// The end notification was handed out
    end_signalled: bool,
    disposed: bool,
}

impl Layer {
    /// Open the track through `opener` and build the pipeline.
    ///
    /// Blocks on file or network I/O; run it off latency-sensitive threads.
    pub fn open(
        track: TrackDescriptor,
        opener: &dyn SourceOpener,
        options: LayerOptions,
    ) -> Result<Self, SourceError> {
        let source = opener.open(&track)?;
        Self::from_source(track, source, options)
    }

    /// Build the pipeline over an already opened stream
    pub fn from_source(
        track: TrackDescriptor,
        source: Box<dyn SampleSource>,
        options: LayerOptions,
    ) -> Result<Self, SourceError> {
        let native = source.format();
        if native.sample_rate == 0 || native.channels == 0 {
            return Err(SourceError::Unsupported(format!(
                "{}: invalid native format {}",
                track.source(),
                native
            )));
        }

        let looping = options.loop_override.unwrap_or(track.looping());
        let volume = clamp_volume(options.volume.unwrap_or(track.volume()));
        let source = LoopingSource::new(source, looping)?;

        let resampler = if ResampleStage::is_required(&native, &options.target) {
            debug!(
                track = %track.title(),
                from = %native,
                to = %options.target,
                "Inserting resample stage"
            );
            Some(ResampleStage::new(native, options.target, options.quality)?)
        } else {
            None
        };

        Ok(Self {
            id: LayerId::new(),
            track,
            volume,
            target: options.target,
            source: Some(source),
            resampler,
            failed: false,
            end_signalled: false,
            disposed: false,
        })
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn track(&self) -> &TrackDescriptor {
        &self.track
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Set the gain, clamped to `[MIN_VOLUME, MAX_VOLUME]`
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = clamp_volume(volume);
    }

    pub fn looping(&self) -> bool {
        self.source.as_ref().map_or(false, LoopingSource::looping)
    }

    /// Takes effect on the next read
    pub fn set_looping(&mut self, looping: bool) {
        if let Some(source) = self.source.as_mut() {
            source.set_looping(looping);
        }
    }

    pub fn has_resampler(&self) -> bool {
        self.resampler.is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Fill `out` with gain-applied samples in the target format.
    ///
    /// Returns the number of samples written; the rest of `out` is left
    /// untouched. Returns 0 once the layer has ended or been disposed.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        if self.disposed || self.end_signalled || self.failed {
            return 0;
        }
        let Some(source) = self.source.as_mut() else {
            return 0;
        };

        let result = match self.resampler.as_mut() {
            Some(resampler) => resampler.read(source, out),
            None => source.read(out),
        };

        let count = match result {
            Ok(count) => count,
            Err(e) => {
                warn!(layer = %self.id, track = %self.track.title(), error = %e, "Layer read failed");
                self.failed = true;
                return 0;
            }
        };

        if self.volume != 1.0 {
            for sample in &mut out[..count] {
                *sample *= self.volume;
            }
        }
        count
    }

    /// Poll for end of stream.
    ///
    /// True exactly once: the first time the decode position has reached the
    /// stream length (or a read failed) while looping is off.
    pub fn check_ended(&mut self) -> bool {
        if self.end_signalled || self.disposed {
            return false;
        }

        let ended = self.failed || (!self.looping() && self.source_at_end() && self.converter_drained());
        if ended {
            self.end_signalled = true;
            trace!(layer = %self.id, "Layer reached end of stream");
        }
        ended
    }

    fn source_at_end(&self) -> bool {
        match self.source.as_ref() {
            Some(source) => {
                source.is_exhausted()
                    || matches!(source.len_frames(), Some(len) if source.position_frames() >= len)
            }
            None => true,
        }
    }

    fn converter_drained(&self) -> bool {
        self.resampler.as_ref().map_or(true, ResampleStage::is_drained)
    }

    /// Release the decode stream, the loop wrapper and the resampler, in
    /// that order. Calling it again does nothing.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        if let Some(source) = self.source.take() {
            drop(source.into_inner());
        }
        self.resampler = None;
        debug!(layer = %self.id, track = %self.track.title(), "Layer disposed");
    }

    /// Snapshot for status listings
    pub fn status(&self) -> LayerStatus {
        LayerStatus {
            id: self.id,
            title: self.track.title().to_string(),
            source: self.track.source().to_string(),
            volume: self.volume,
            looping: self.looping(),
            position_frames: self.source.as_ref().map_or(0, LoopingSource::position_frames),
            length_frames: self.source.as_ref().and_then(LoopingSource::len_frames),
        }
    }

    pub fn target_format(&self) -> PcmFormat {
        self.target
    }
}

impl Drop for Layer {
    fn drop(&mut self) {
        self.dispose();
    }
}
