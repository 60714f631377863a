//! Playlist loading and sequential playback

pub mod fetch;
pub mod parser;
pub mod sequencer;

pub use fetch::{fetch_playlist, is_playlist_location, load_playlist, PlaylistDocument};
pub use parser::{PlaylistBase, PlaylistParser};
pub use sequencer::{Playlist, PlaylistSequencer, SequencerState};
