//! Extended M3U playlist parsing
//!
//! Parsing is lenient: a missing header, a malformed `#EXTINF` line or an
//! unusable locator is logged and skipped, and the rest of the document
//! still parses.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::error::PlaylistError;
use crate::protocol::TrackDescriptor;

const HEADER: &str = "#EXTM3U";
const EXTINF: &str = "#EXTINF:";
const EXT_X: &str = "#EXT-X-";

/// Location relative locators are resolved against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistBase {
    /// Directory containing the playlist file
    Dir(PathBuf),
    /// URL of the playlist document itself
    Url(Url),
}

impl PlaylistBase {
    /// Base for a playlist loaded from `location` (file path or URL)
    pub fn for_location(location: &str) -> Option<Self> {
        if let Some(url) = parse_absolute_uri(location) {
            if url.scheme() == "file" {
                let path = url.to_file_path().ok()?;
                return path.parent().map(|dir| Self::Dir(dir.to_path_buf()));
            }
            return Some(Self::Url(url));
        }

        Path::new(location)
            .parent()
            .map(|dir| Self::Dir(dir.to_path_buf()))
    }
}

/// Turns playlist text into track descriptors
#[derive(Debug, Clone, Default)]
pub struct PlaylistParser {
    base: Option<PlaylistBase>,
}

impl PlaylistParser {
    /// Parser without a base; relative locators are kept as written
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(base: PlaylistBase) -> Self {
        Self { base: Some(base) }
    }

    pub fn with_base_dir(dir: impl Into<PathBuf>) -> Self {
        Self::with_base(PlaylistBase::Dir(dir.into()))
    }

    pub fn base(&self) -> Option<&PlaylistBase> {
        self.base.as_ref()
    }

    /// Parse a whole document.
    ///
    /// Tracks come back in document order. Empty or fully invalid input
    /// yields an empty list.
    pub fn parse(&self, text: &str) -> Vec<TrackDescriptor> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let normalized = text.replace("\r\n", "\n");

        let mut tracks = Vec::new();
        let mut pending: Option<ExtInf> = None;
        let mut saw_header = false;

        for (index, raw) in normalized.split(|c: char| c == '\n' || c == '\r').enumerate() {
            let line_no = index + 1;
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            if line.starts_with('#') {
                if starts_with_ignore_case(line, HEADER) {
                    saw_header = true;
                } else if starts_with_ignore_case(line, EXTINF) {
                    match parse_extinf(&line[EXTINF.len()..]) {
                        Ok(info) => pending = Some(info),
                        Err(reason) => {
                            report(&PlaylistError::Anomaly { line: line_no, reason });
                            pending = None;
                        }
                    }
                } else if starts_with_ignore_case(line, EXT_X) {
                    debug!(line = line_no, "Skipping directive {}", line);
                }
                continue;
            }

            // The title only ever applies to the very next locator.
            let info = pending.take();
            match self.track_for(line, info) {
                Ok(track) => tracks.push(track),
                Err(reason) => report(&PlaylistError::Anomaly { line: line_no, reason }),
            }
        }

        if !saw_header {
            debug!("Playlist has no {} header, parsed leniently", HEADER);
        }
        debug!("Parsed {} tracks", tracks.len());
        tracks
    }

    fn track_for(&self, locator: &str, info: Option<ExtInf>) -> Result<TrackDescriptor, String> {
        let resolved = self.resolve(locator)?;
        let mut track = TrackDescriptor::new(resolved).map_err(|e| e.to_string())?;

        if let Some(info) = info {
            if let Some(title) = info.title {
                track = track.with_title(title);
            }
            if let Some(duration) = info.duration {
                track = track.with_duration(duration);
            }
        }
        Ok(track)
    }

    /// Resolve a locator against the base, leaving absolute ones alone
    fn resolve(&self, locator: &str) -> Result<String, String> {
        if parse_absolute_uri(locator).is_some() || is_absolute_path(locator) {
            return Ok(locator.to_string());
        }

        match &self.base {
            Some(PlaylistBase::Dir(dir)) => {
                let relative = locator.replace('\\', "/");
                Ok(dir.join(relative).to_string_lossy().into_owned())
            }
            Some(PlaylistBase::Url(base)) => base
                .join(locator)
                .map(String::from)
                .map_err(|e| format!("cannot resolve '{}' against {}: {}", locator, base, e)),
            None => Ok(locator.to_string()),
        }
    }
}

/// Fields captured from an `#EXTINF` line
#[derive(Debug, Default)]
struct ExtInf {
    title: Option<String>,
    duration: Option<Duration>,
}

fn parse_extinf(body: &str) -> Result<ExtInf, String> {
    let Some((head, title)) = body.split_once(',') else {
        return Err(format!("#EXTINF without a title separator: '{}'", body));
    };

    // Attributes (`tvg-id="..."`) may follow the duration.
    let duration = head
        .split_whitespace()
        .next()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .map(Duration::from_secs_f64);

    let title = title.trim();
    Ok(ExtInf {
        title: (!title.is_empty()).then(|| title.to_string()),
        duration,
    })
}

/// An absolute URI; single-letter schemes are Windows drive letters
fn parse_absolute_uri(locator: &str) -> Option<Url> {
    Url::parse(locator).ok().filter(|url| url.scheme().len() > 1)
}

fn is_absolute_path(locator: &str) -> bool {
    locator.starts_with('/') || locator.starts_with('\\') || Path::new(locator).is_absolute()
}

fn starts_with_ignore_case(line: &str, prefix: &str) -> bool {
    line.len() >= prefix.len()
        && line.is_char_boundary(prefix.len())
        && line[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn report(anomaly: &PlaylistError) {
    warn!("Skipping playlist entry: {}", anomaly);
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEMO: &str = "#EXTM3U\n\
                        #EXTINF:-1,Intro Theme\n\
                        intro.mp3\n\
                        #EXTINF:-1,Main Theme\n\
                        main.mp3\n\
                        loop/track3.mp3\n";

    #[test]
    fn test_demo_document() {
        let tracks = PlaylistParser::with_base_dir("/playlists/demo").parse(DEMO);
        assert_eq!(tracks.len(), 3);

        assert_eq!(tracks[0].title(), "Intro Theme");
        assert_eq!(tracks[0].source(), "/playlists/demo/intro.mp3");
        assert_eq!(tracks[1].title(), "Main Theme");
        assert_eq!(tracks[1].source(), "/playlists/demo/main.mp3");
        assert_eq!(tracks[2].title(), "track3");
        assert_eq!(tracks[2].source(), "/playlists/demo/loop/track3.mp3");
        assert!(tracks.iter().all(|t| t.duration().is_none()));
    }

    #[test]
    fn test_line_endings() {
        let crlf = DEMO.replace('\n', "\r\n");
        let cr = DEMO.replace('\n', "\r");
        let parser = PlaylistParser::with_base_dir("/playlists/demo");
        assert_eq!(parser.parse(&crlf), parser.parse(DEMO));
        assert_eq!(parser.parse(&cr), parser.parse(DEMO));
    }

    #[test]
    fn test_missing_header_still_parses() {
        let tracks = PlaylistParser::new().parse("a.mp3\nb.mp3\n");
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].source(), "a.mp3");
    }

    #[test]
    fn test_empty_and_comment_only_documents() {
        assert!(PlaylistParser::new().parse("").is_empty());
        assert!(PlaylistParser::new().parse("#EXTM3U\n# just a comment\n\n").is_empty());
    }

    #[test]
    fn test_title_applies_to_next_locator_only() {
        let text = "#EXTINF:12.5,Named\n# comment in between\n#EXT-X-VERSION:3\nfirst.ogg\nsecond.ogg\n";
        let tracks = PlaylistParser::new().parse(text);
        assert_eq!(tracks[0].title(), "Named");
        assert_eq!(tracks[0].duration(), Some(Duration::from_millis(12_500)));
        assert_eq!(tracks[1].title(), "second");
    }

    #[test]
    fn test_title_keeps_text_after_first_comma() {
        let tracks = PlaylistParser::new().parse("#EXTINF:-1 tvg-id=\"x\",Artist, Song\nsong.mp3\n");
        assert_eq!(tracks[0].title(), "Artist, Song");
        assert!(tracks[0].duration().is_none());
    }

    #[test]
    fn test_malformed_extinf_skipped() {
        let tracks = PlaylistParser::new().parse("#EXTINF:no-comma\ntrack.mp3\n");
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title(), "track");
    }

    #[test]
    fn test_absolute_locators_untouched() {
        let text = "https://cdn.example.com/a.mp3\n/music/b.flac\n";
        let tracks = PlaylistParser::with_base_dir("/playlists").parse(text);
        assert_eq!(tracks[0].source(), "https://cdn.example.com/a.mp3");
        assert_eq!(tracks[1].source(), "/music/b.flac");
    }

    #[test]
    fn test_relative_to_url_base() {
        let base = PlaylistBase::for_location("https://radio.example.com/lists/night.m3u8").unwrap();
        let tracks = PlaylistParser::with_base(base).parse("../media/one.mp3\ntwo.mp3\n");
        assert_eq!(tracks[0].source(), "https://radio.example.com/media/one.mp3");
        assert_eq!(tracks[1].source(), "https://radio.example.com/lists/two.mp3");
        assert_eq!(tracks[1].title(), "two");
    }

    #[test]
    fn test_backslash_locators_normalized() {
        let tracks = PlaylistParser::with_base_dir("/playlists").parse("sub\\song.wav\n");
        assert_eq!(tracks[0].source(), "/playlists/sub/song.wav");
    }

    #[test]
    fn test_base_for_file_location() {
        assert_eq!(
            PlaylistBase::for_location("/playlists/demo/list.m3u"),
            Some(PlaylistBase::Dir(PathBuf::from("/playlists/demo")))
        );
    }

    #[test]
    fn test_bom_stripped() {
        let tracks = PlaylistParser::new().parse("\u{feff}#EXTM3U\n#EXTINF:3,Hello\nhello.mp3\n");
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title(), "Hello");
    }
}
