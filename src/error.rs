//! Error types for the mixing pipeline

use thiserror::Error;

use crate::protocol::PcmFormat;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Pump error: {0}")]
    Pump(#[from] PumpError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Playlist error: {0}")]
    Playlist(#[from] PlaylistError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while opening or reading a decoded track
#[derive(Error, Debug)]
pub enum SourceError {
    /// The file or URL could not be opened or probed.
    #[error("Source unavailable: {locator}: {reason}")]
    Unavailable { locator: String, reason: String },

    #[error("Invalid locator: {0:?}")]
    InvalidLocator(String),

    /// Looping needs a rewindable stream; checked when the loop wrapper is built.
    #[error("Source is not seekable: {0}")]
    NotSeekable(String),

    #[error("Unsupported format: {0}")]
    Unsupported(String),

    #[error("Decoding failed: {0}")]
    Decode(String),

    #[error("Seek failed: {0}")]
    Seek(String),
}

impl SourceError {
    pub fn unavailable(locator: impl Into<String>, reason: impl ToString) -> Self {
        Self::Unavailable {
            locator: locator.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors that terminate a frame pump
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PumpError {
    #[error("Format mismatch: bus produces {source_format}, sink expects {sink_format}")]
    FormatMismatch {
        source_format: PcmFormat,
        sink_format: PcmFormat,
    },

    /// Only 16-bit and 32-bit float PCM with a non-zero rate and channel
    /// count can be carried.
    #[error("Unsupported PCM format: {0}")]
    UnsupportedFormat(PcmFormat),

    #[error("Invalid frame duration: {0} ms")]
    InvalidFrameDuration(u32),

    #[error("Transport write failed: {0}")]
    TransportWrite(String),
}

/// Transport sink errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Invalid frame size: {0} bytes")]
    InvalidFrameSize(usize),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Sink is closed")]
    Closed,
}

/// Playlist loading errors
#[derive(Error, Debug)]
pub enum PlaylistError {
    #[error("Failed to read playlist {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to fetch playlist: {0}")]
    Fetch(String),

    /// A single malformed line; parsing logs it and moves on.
    #[error("Line {line}: {reason}")]
    Anomaly { line: usize, reason: String },
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_unavailable_display() {
        let err = SourceError::unavailable("intro.mp3", "No such file");
        assert_eq!(err.to_string(), "Source unavailable: intro.mp3: No such file");
    }

    #[test]
    fn test_format_mismatch_display() {
        let err = PumpError::FormatMismatch {
            source_format: PcmFormat::new(44100, 2, 16),
            sink_format: PcmFormat::new(48000, 2, 16),
        };
        assert_eq!(
            err.to_string(),
            "Format mismatch: bus produces 44100 Hz/2 ch/16-bit, sink expects 48000 Hz/2 ch/16-bit"
        );
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = PumpError::TransportWrite("closed".into()).into();
        assert!(matches!(err, Error::Pump(PumpError::TransportWrite(_))));
    }
}
