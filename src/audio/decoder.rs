//! Audio file decoding via Symphonia.
//!
//! Opens local files, `file://` URIs and http(s) URLs. Remote media is
//! downloaded into memory first so the stream stays seekable for looping.

use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use crate::audio::source::{SampleSource, SourceOpener};
use crate::constants::DEFAULT_FETCH_TIMEOUT_MS;
use crate::error::SourceError;
use crate::protocol::{PcmFormat, TrackDescriptor};

/// Decoded stream backed by a Symphonia format reader
pub struct SymphoniaSource {
    locator: String,
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    format: PcmFormat,
    n_frames: Option<u64>,
    /// Frames handed out since the start
    position: u64,
    /// Decoded samples not yet handed out
    pending: Vec<f32>,
    pending_pos: usize,
    sample_buf: Option<SampleBuffer<f32>>,
    /// Set once the reader reported end of stream
    finished: bool,
}

impl SymphoniaSource {
    /// Open a local file
    pub fn open_path(path: &Path) -> Result<Self, SourceError> {
        let locator = path.display().to_string();
        let file = File::open(path).map_err(|e| SourceError::unavailable(&locator, e))?;
        let extension = path.extension().and_then(|e| e.to_str()).map(str::to_string);
        Self::from_media(locator, Box::new(file), extension.as_deref())
    }

    /// Decode an in-memory encoded file
    pub fn from_bytes(
        locator: impl Into<String>,
        data: Vec<u8>,
        extension: Option<&str>,
    ) -> Result<Self, SourceError> {
        Self::from_media(locator.into(), Box::new(Cursor::new(data)), extension)
    }

    fn from_media(
        locator: String,
        media: Box<dyn MediaSource>,
        extension: Option<&str>,
    ) -> Result<Self, SourceError> {
        let mss = MediaSourceStream::new(media, Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| SourceError::unavailable(&locator, e))?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| SourceError::unavailable(&locator, "no decodable audio track"))?;

        let params = track.codec_params.clone();
        let track_id = track.id;

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| SourceError::Unsupported(format!("{}: unknown sample rate", locator)))?;
        let channels = params
            .channels
            .map(|c| c.count() as u16)
            .ok_or_else(|| SourceError::Unsupported(format!("{}: unknown channel layout", locator)))?;
        let bits_per_sample = params.bits_per_sample.unwrap_or(32) as u16;

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| SourceError::unavailable(&locator, e))?;

        debug!(
            source = %locator,
            sample_rate,
            channels,
            frames = ?params.n_frames,
            "Opened audio source"
        );

        Ok(Self {
            locator,
            reader,
            decoder,
            track_id,
            format: PcmFormat::new(sample_rate, channels, bits_per_sample),
            n_frames: params.n_frames,
            position: 0,
            pending: Vec::new(),
            pending_pos: 0,
            sample_buf: None,
            finished: false,
        })
    }

    /// Decode packets until some samples are pending or the stream ends
    fn decode_next(&mut self) -> Result<bool, SourceError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(SourceError::Decode(format!("{}: {}", self.locator, e))),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(msg)) => {
                    warn!(source = %self.locator, error = %msg, "Skipping corrupted audio packet");
                    continue;
                }
                Err(e) => return Err(SourceError::Decode(format!("{}: {}", self.locator, e))),
            };

            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            let required = decoded.capacity() * spec.channels.count();
            let too_small = self
                .sample_buf
                .as_ref()
                .map_or(true, |buf| buf.capacity() < required);
            if too_small {
                self.sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
            }

            if let Some(buf) = self.sample_buf.as_mut() {
                buf.copy_interleaved_ref(decoded);
                self.pending.clear();
                self.pending.extend_from_slice(buf.samples());
                self.pending_pos = 0;
            }
            return Ok(true);
        }
    }
}

impl SampleSource for SymphoniaSource {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn read(&mut self, buf: &mut [f32]) -> Result<usize, SourceError> {
        let channels = self.format.channels.max(1) as usize;
        let wanted = buf.len() - buf.len() % channels;
        let mut filled = 0;

        while filled < wanted {
            if self.pending_pos >= self.pending.len() {
                if self.finished || !self.decode_next()? {
                    self.finished = true;
                    break;
                }
            }

            let available = &self.pending[self.pending_pos..];
            let count = available.len().min(wanted - filled);
            buf[filled..filled + count].copy_from_slice(&available[..count]);
            self.pending_pos += count;
            filled += count;
        }

        self.position += (filled / channels) as u64;
        Ok(filled)
    }

    fn seek_to_start(&mut self) -> Result<(), SourceError> {
        self.reader
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: 0,
                    track_id: self.track_id,
                },
            )
            .map_err(|e| SourceError::Seek(format!("{}: {}", self.locator, e)))?;

        self.decoder.reset();
        self.pending.clear();
        self.pending_pos = 0;
        self.position = 0;
        self.finished = false;
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        // Files and downloaded buffers are both random access.
        true
    }

    fn len_frames(&self) -> Option<u64> {
        self.n_frames
    }

    fn position_frames(&self) -> u64 {
        self.position
    }
}

/// Default opener: decodes files and URLs with Symphonia
#[derive(Debug, Clone)]
pub struct SymphoniaOpener {
    fetch_timeout: Duration,
}

impl SymphoniaOpener {
    pub fn new(fetch_timeout: Duration) -> Self {
        Self { fetch_timeout }
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.fetch_timeout)
            .build()
            .map_err(|e| SourceError::unavailable(url, e))?;

        let response = client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| SourceError::unavailable(url, e))?;

        let body = response.bytes().map_err(|e| SourceError::unavailable(url, e))?;
        debug!(url, bytes = body.len(), "Downloaded remote media");
        Ok(body.to_vec())
    }
}

impl Default for SymphoniaOpener {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS))
    }
}

impl SourceOpener for SymphoniaOpener {
    fn open(&self, track: &TrackDescriptor) -> Result<Box<dyn SampleSource>, SourceError> {
        let locator = track.source();

        if track.is_remote() {
            let data = self.download(locator)?;
            let extension = url::Url::parse(locator).ok().and_then(|url| {
                Path::new(url.path())
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(str::to_string)
            });
            let source = SymphoniaSource::from_bytes(locator, data, extension.as_deref())?;
            return Ok(Box::new(source));
        }

        let path = local_path(locator)?;
        Ok(Box::new(SymphoniaSource::open_path(&path)?))
    }
}

/// Resolve a plain path or `file://` URI to a filesystem path
fn local_path(locator: &str) -> Result<PathBuf, SourceError> {
    match url::Url::parse(locator) {
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .map_err(|_| SourceError::InvalidLocator(locator.to_string())),
        Ok(url) if url.scheme().len() > 1 => Err(SourceError::unavailable(
            locator,
            format!("unsupported scheme {:?}", url.scheme()),
        )),
        _ => Ok(PathBuf::from(locator)),
    }
}
