//! Playlist document loading from disk or http(s)

use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::error::PlaylistError;
use crate::playlist::parser::{PlaylistBase, PlaylistParser};
use crate::protocol::TrackDescriptor;

/// Raw playlist text plus where relative entries resolve
#[derive(Debug, Clone)]
pub struct PlaylistDocument {
    pub text: String,
    pub base: Option<PlaylistBase>,
}

impl PlaylistDocument {
    pub fn parse(&self) -> Vec<TrackDescriptor> {
        match &self.base {
            Some(base) => PlaylistParser::with_base(base.clone()),
            None => PlaylistParser::new(),
        }
        .parse(&self.text)
    }
}

/// Whether `location` looks like a playlist rather than a media file
pub fn is_playlist_location(location: &str) -> bool {
    let path = match Url::parse(location) {
        Ok(url) if url.scheme().len() > 1 => url.path().to_string(),
        _ => location.to_string(),
    };
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".m3u") || lower.ends_with(".m3u8")
}

/// Read a playlist from a file path, `file://` URI or http(s) URL
pub async fn fetch_playlist(location: &str, timeout: Duration) -> Result<PlaylistDocument, PlaylistError> {
    let base = PlaylistBase::for_location(location);

    let text = match Url::parse(location) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => download(url, timeout).await?,
        Ok(url) if url.scheme() == "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| PlaylistError::Fetch(format!("Invalid file URI: {}", location)))?;
            read_file(path).await?
        }
        _ => read_file(PathBuf::from(location)).await?,
    };

    debug!(location, bytes = text.len(), "Playlist loaded");
    Ok(PlaylistDocument { text, base })
}

/// Fetch and parse in one step
pub async fn load_playlist(location: &str, timeout: Duration) -> Result<Vec<TrackDescriptor>, PlaylistError> {
    let tracks = fetch_playlist(location, timeout).await?.parse();
    info!("Loaded playlist {} ({} tracks)", location, tracks.len());
    Ok(tracks)
}

async fn download(url: Url, timeout: Duration) -> Result<String, PlaylistError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| PlaylistError::Fetch(e.to_string()))?;

    let response = client
        .get(url.clone())
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| PlaylistError::Fetch(format!("{}: {}", url, e)))?;

    response
        .text()
        .await
        .map_err(|e| PlaylistError::Fetch(format!("{}: {}", url, e)))
}

async fn read_file(path: PathBuf) -> Result<String, PlaylistError> {
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| PlaylistError::Io {
            path: path.display().to_string(),
            source,
        })
}
