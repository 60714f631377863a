//! Sample rate and channel layout conversion.
//!
//! Converts a layer's native stream into the bus format. Channels are mapped
//! first, then a `rubato` resampler band-limits and converts the rate. The
//! resampler keeps its filter history across calls and across loop restarts,
//! so a looped stream stays continuous at the seam.

use rubato::{
    Async, FixedAsync, Indexing, PolynomialDegree, Resampler, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use crate::audio::looping::LoopingSource;
use crate::config::ResamplerQuality;
use crate::constants::{RESAMPLE_CHUNK_FRAMES, RESAMPLE_OUTPUT_FRAMES};
use crate::error::SourceError;
use crate::protocol::PcmFormat;

mod adapter {
    use rubato::audioadapter::{Adapter, AdapterMut};

    /// Borrowed per-channel input buffers
    pub struct PlanarSlice<'a> {
        buf: &'a [Vec<f32>],
        frames: usize,
    }

    impl<'a> PlanarSlice<'a> {
        pub fn new(buf: &'a [Vec<f32>], frames: usize) -> Self {
            Self { buf, frames }
        }
    }

    impl<'a> Adapter<'a, f32> for PlanarSlice<'a> {
        unsafe fn read_sample_unchecked(&self, channel: usize, frame: usize) -> f32 {
            self.buf[channel][frame]
        }

        fn channels(&self) -> usize {
            self.buf.len()
        }

        fn frames(&self) -> usize {
            self.frames
        }

        fn copy_from_channel_to_slice(&self, channel: usize, skip: usize, slice: &mut [f32]) -> usize {
            if channel >= self.buf.len() || skip >= self.frames {
                return 0;
            }
            let count = (self.frames - skip).min(slice.len());
            slice[..count].copy_from_slice(&self.buf[channel][skip..skip + count]);
            count
        }
    }

    /// Borrowed interleaved output buffer
    pub struct InterleavedMutSlice<'a> {
        buf: &'a mut [f32],
        channels: usize,
        frames: usize,
    }

    impl<'a> InterleavedMutSlice<'a> {
        pub fn new(buf: &'a mut [f32], channels: usize, frames: usize) -> Self {
            Self { buf, channels, frames }
        }
    }

    impl<'a> Adapter<'a, f32> for InterleavedMutSlice<'a> {
        unsafe fn read_sample_unchecked(&self, channel: usize, frame: usize) -> f32 {
            self.buf[frame * self.channels + channel]
        }

        fn channels(&self) -> usize {
            self.channels
        }

        fn frames(&self) -> usize {
            self.frames
        }
    }

    impl<'a> AdapterMut<'a, f32> for InterleavedMutSlice<'a> {
        unsafe fn write_sample_unchecked(&mut self, channel: usize, frame: usize, value: &f32) -> bool {
            self.buf[frame * self.channels + channel] = *value;
            false
        }
    }
}

/// Streaming converter from one PCM layout to another
pub struct ResampleStage {
    from_rate: u32,
    to_rate: u32,
    from_channels: usize,
    to_channels: usize,
    /// Absent when only the channel layout differs
    resampler: Option<Async<f32>>,
    /// Channel-mapped input waiting for the resampler, one buffer per channel
    input: Vec<Vec<f32>>,
    /// Converted interleaved samples not yet handed out
    pending: Vec<f32>,
    pending_pos: usize,
    /// Leading resampler output still owed to its filter delay
    delay_frames: usize,
    frames_in: u64,
    frames_out: u64,
    source_dry: bool,
    /// Raw read scratch at the source layout
    scratch: Vec<f32>,
    /// Channel-mapped scratch, interleaved
    mapped: Vec<f32>,
    /// Resampler output scratch, interleaved
    converted: Vec<f32>,
}

impl ResampleStage {
    pub fn new(from: PcmFormat, to: PcmFormat, quality: ResamplerQuality) -> Result<Self, SourceError> {
        let from_channels = from.channels.max(1) as usize;
        let to_channels = to.channels.max(1) as usize;

        let resampler = if from.sample_rate != to.sample_rate {
            let resampler = build_resampler(from.sample_rate, to.sample_rate, to_channels, quality)
                .map_err(|e| {
                    SourceError::Unsupported(format!(
                        "cannot resample {} Hz to {} Hz: {}",
                        from.sample_rate, to.sample_rate, e
                    ))
                })?;
            Some(resampler)
        } else {
            None
        };
        let delay_frames = resampler.as_ref().map_or(0, |r| r.output_delay());

        Ok(Self {
            from_rate: from.sample_rate,
            to_rate: to.sample_rate,
            from_channels,
            to_channels,
            resampler,
            input: vec![Vec::with_capacity(RESAMPLE_CHUNK_FRAMES * 2); to_channels],
            pending: Vec::new(),
            pending_pos: 0,
            delay_frames,
            frames_in: 0,
            frames_out: 0,
            source_dry: false,
            scratch: vec![0.0; RESAMPLE_CHUNK_FRAMES * from_channels],
            mapped: Vec::with_capacity(RESAMPLE_CHUNK_FRAMES * to_channels),
            converted: Vec::new(),
        })
    }

    /// Whether a stage is needed at all between these formats
    pub fn is_required(from: &PcmFormat, to: &PcmFormat) -> bool {
        from.sample_rate != to.sample_rate || from.channels != to.channels
    }

    /// Produce up to `out.len()` converted samples, pulling from `source`
    /// as needed. Short only when the source ran dry and everything
    /// buffered has been handed out.
    pub fn read(&mut self, source: &mut LoopingSource, out: &mut [f32]) -> Result<usize, SourceError> {
        let wanted = out.len() / self.to_channels * self.to_channels;
        let mut written = 0;

        while written < wanted {
            if self.pending_pos < self.pending.len() {
                let count = (self.pending.len() - self.pending_pos).min(wanted - written);
                out[written..written + count]
                    .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + count]);
                self.pending_pos += count;
                written += count;
                continue;
            }
            if !self.refill(source)? {
                break;
            }
        }

        Ok(written)
    }

    /// No converted output is left to hand out
    pub fn is_drained(&self) -> bool {
        let flushed = match self.resampler {
            Some(_) => self.frames_out >= self.expected_frames(),
            None => true,
        };
        self.source_dry && flushed && self.pending_pos >= self.pending.len()
    }

    pub fn ratio(&self) -> f64 {
        self.to_rate as f64 / self.from_rate as f64
    }

    /// Output length owed for the input consumed so far
    fn expected_frames(&self) -> u64 {
        let to = self.to_rate as u64;
        let from = self.from_rate.max(1) as u64;
        (self.frames_in * to + from - 1) / from
    }

    /// Refill `pending`. False once nothing more will come.
    fn refill(&mut self, source: &mut LoopingSource) -> Result<bool, SourceError> {
        self.pending.clear();
        self.pending_pos = 0;

        let Some(need) = self.resampler.as_ref().map(|r| r.input_frames_next()) else {
            if self.source_dry || self.fill(source)? == 0 {
                self.source_dry = true;
                return Ok(false);
            }
            self.pending.extend_from_slice(&self.mapped);
            return Ok(true);
        };

        if self.input[0].len() < need && !self.source_dry {
            if self.fill(source)? == 0 {
                self.source_dry = true;
            } else {
                deinterleave(&self.mapped, &mut self.input);
            }
            return Ok(true);
        }

        if self.source_dry && self.frames_out >= self.expected_frames() {
            return Ok(false);
        }
        self.convert_chunk()?;
        Ok(true)
    }

    /// Read one chunk from the source and channel-map it into `mapped`.
    fn fill(&mut self, source: &mut LoopingSource) -> Result<usize, SourceError> {
        let count = source.read(&mut self.scratch)?;
        let frames = count / self.from_channels;

        self.mapped.clear();
        for frame in self.scratch[..frames * self.from_channels].chunks_exact(self.from_channels) {
            map_channels(frame, self.to_channels, &mut self.mapped);
        }
        self.frames_in += frames as u64;
        Ok(frames)
    }

    /// Run the resampler once. After the source ran dry the missing input
    /// is zero-padded to flush the filter tail.
    fn convert_chunk(&mut self) -> Result<(), SourceError> {
        let ch = self.to_channels;
        let expected = self.expected_frames();
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(());
        };

        let need = resampler.input_frames_next();
        let available = self.input[0].len().min(need);
        let out_frames = resampler.output_frames_next();
        self.converted.resize(out_frames * ch, 0.0);

        let input = adapter::PlanarSlice::new(&self.input, available);
        let mut output = adapter::InterleavedMutSlice::new(&mut self.converted, ch, out_frames);
        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            partial_len: Some(available),
            active_channels_mask: None,
        };
        let partial = (available < need).then_some(&indexing);
        let (used_in, used_out) = resampler
            .process_into_buffer(&input, &mut output, partial)
            .map_err(|e| SourceError::Decode(format!("resampling failed: {}", e)))?;

        for channel in &mut self.input {
            channel.drain(..used_in.min(channel.len()));
        }

        let skip = self.delay_frames.min(used_out);
        self.delay_frames -= skip;
        let mut frames = used_out - skip;
        if self.source_dry {
            frames = frames.min(expected.saturating_sub(self.frames_out) as usize);
        }

        self.pending
            .extend_from_slice(&self.converted[skip * ch..(skip + frames) * ch]);
        self.frames_out += frames as u64;
        Ok(())
    }
}

fn build_resampler(
    from_rate: u32,
    to_rate: u32,
    channels: usize,
    quality: ResamplerQuality,
) -> Result<Async<f32>, rubato::ResamplerConstructionError> {
    let ratio = to_rate as f64 / from_rate as f64;

    let params = match quality {
        ResamplerQuality::Low => {
            return Async::<f32>::new_poly(
                ratio,
                1.0,
                PolynomialDegree::Linear,
                RESAMPLE_OUTPUT_FRAMES,
                channels,
                FixedAsync::Output,
            );
        }
        ResamplerQuality::Medium => SincInterpolationParameters {
            sinc_len: 64,
            f_cutoff: 0.91,
            oversampling_factor: 128,
            interpolation: SincInterpolationType::Linear,
            window: WindowFunction::Blackman2,
        },
        ResamplerQuality::High => SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            oversampling_factor: 256,
            interpolation: SincInterpolationType::Cubic,
            window: WindowFunction::BlackmanHarris2,
        },
    };

    Async::<f32>::new_sinc(
        ratio,
        1.0,
        &params,
        RESAMPLE_OUTPUT_FRAMES,
        channels,
        FixedAsync::Output,
    )
}

fn deinterleave(interleaved: &[f32], planar: &mut [Vec<f32>]) {
    let channels = planar.len();
    for frame in interleaved.chunks_exact(channels) {
        for (buf, sample) in planar.iter_mut().zip(frame) {
            buf.push(*sample);
        }
    }
}

/// Map one interleaved input frame onto `to_channels` output channels.
///
/// Mono fans out, anything to mono averages, otherwise channel `i` maps to
/// channel `i` with extras dropped or zero-filled.
fn map_channels(frame: &[f32], to_channels: usize, out: &mut Vec<f32>) {
    let from_channels = frame.len();
    if from_channels == to_channels {
        out.extend_from_slice(frame);
    } else if from_channels == 1 {
        out.extend(std::iter::repeat(frame[0]).take(to_channels));
    } else if to_channels == 1 {
        out.push(frame.iter().sum::<f32>() / from_channels as f32);
    } else {
        for c in 0..to_channels {
            out.push(frame.get(c).copied().unwrap_or(0.0));
        }
    }
}
