//! Loop wrapper that restarts a finite decoded stream at its first frame

use tracing::trace;

use crate::audio::source::SampleSource;
use crate::error::SourceError;

/// Presents a finite [`SampleSource`] as a possibly infinite stream
pub struct LoopingSource {
    inner: Box<dyn SampleSource>,
    looping: bool,
    /// Set when a non-looping read hit the end; cleared on rewind
    exhausted: bool,
    /// Number of times the stream wrapped
    loops: u64,
}

impl LoopingSource {
    /// Wrap a decoded stream.
    ///
    /// Fails if the stream cannot rewind, since looping may be switched on
    /// at any time after construction.
    pub fn new(inner: Box<dyn SampleSource>, looping: bool) -> Result<Self, SourceError> {
        if !inner.is_seekable() {
            return Err(SourceError::NotSeekable(format!("{}", inner.format())));
        }

        Ok(Self {
            inner,
            looping,
            exhausted: false,
            loops: 0,
        })
    }

    /// Fill `buf`, wrapping to the start as many times as needed while
    /// looping is enabled. A short read only happens at the end of a
    /// non-looping stream.
    pub fn read(&mut self, buf: &mut [f32]) -> Result<usize, SourceError> {
        // A toggle during this call applies to the next one.
        let looping = self.looping;
        let mut filled = 0;
        let mut rewound_without_data = false;

        while filled < buf.len() {
            let count = self.inner.read(&mut buf[filled..])?;
            if count > 0 {
                filled += count;
                rewound_without_data = false;
                self.exhausted = false;
                continue;
            }

            if !looping || rewound_without_data {
                // An empty stream would otherwise wrap forever.
                self.exhausted = true;
                break;
            }

            self.inner.seek_to_start()?;
            self.loops += 1;
            rewound_without_data = true;
            trace!(loops = self.loops, "Looped source to start");
        }

        Ok(filled)
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    /// Takes effect on the next [`read`](Self::read)
    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// The last read stopped at the end of a non-looping stream
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn loops(&self) -> u64 {
        self.loops
    }

    pub fn format(&self) -> crate::protocol::PcmFormat {
        self.inner.format()
    }

    pub fn len_frames(&self) -> Option<u64> {
        self.inner.len_frames()
    }

    pub fn position_frames(&self) -> u64 {
        self.inner.position_frames()
    }

    /// Hand back the decode stream so it can be released first
    pub fn into_inner(self) -> Box<dyn SampleSource> {
        self.inner
    }
}
