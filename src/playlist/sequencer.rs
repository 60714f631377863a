//! Sequential playlist playback on top of a mix bus
//!
//! The sequencer owns at most one layer at a time. When that layer ends it
//! adds the next track; tracks that fail to open are skipped.

use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::mixer::{LayerHandle, MixBus};
use crate::protocol::{LayerId, MixEvent, TrackDescriptor};

/// Sequencer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    /// No playlist loaded
    Idle,
    /// Playlist loaded, nothing played yet
    Ready,
    /// A layer for the current track is in the mix
    Playing,
    /// Ran past the last track of a non-looping playlist
    Finished,
}

/// Ordered tracks with a cursor
#[derive(Debug, Clone)]
pub struct Playlist {
    tracks: Vec<TrackDescriptor>,
    looping: bool,
    /// `None` before the first track, `Some(len)` once past the last
    cursor: Option<usize>,
}

impl Playlist {
    pub fn new(tracks: Vec<TrackDescriptor>, looping: bool) -> Self {
        Self {
            tracks,
            looping,
            cursor: None,
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn tracks(&self) -> &[TrackDescriptor] {
        &self.tracks
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn current(&self) -> Option<&TrackDescriptor> {
        self.cursor.and_then(|i| self.tracks.get(i))
    }

    /// Move to the next track, wrapping when looping.
    ///
    /// Returns `None` once the end is reached; the cursor then stays past
    /// the end until [`Playlist::rewind`].
    pub fn advance(&mut self) -> Option<usize> {
        if self.is_past_end() {
            return None;
        }

        let next = self.cursor.map_or(0, |i| i + 1);
        if next < self.tracks.len() {
            self.cursor = Some(next);
        } else if self.looping && !self.tracks.is_empty() {
            self.cursor = Some(0);
        } else {
            self.cursor = Some(self.tracks.len());
            return None;
        }
        self.cursor
    }

    pub fn is_past_end(&self) -> bool {
        self.cursor == Some(self.tracks.len())
    }

    pub fn rewind(&mut self) {
        self.cursor = None;
    }
}

struct SequencerInner {
    playlist: Option<Playlist>,
    current: Option<LayerHandle>,
}

/// Plays a playlist one track at a time through a [`MixBus`]
pub struct PlaylistSequencer {
    bus: Arc<MixBus>,
    inner: Mutex<SequencerInner>,
    state: watch::Sender<SequencerState>,
}

impl PlaylistSequencer {
    pub fn new(bus: Arc<MixBus>) -> Self {
        let (state, _) = watch::channel(SequencerState::Idle);
        Self {
            bus,
            inner: Mutex::new(SequencerInner {
                playlist: None,
                current: None,
            }),
            state,
        }
    }

    pub fn state(&self) -> SequencerState {
        *self.state.borrow()
    }

    /// Observe state transitions
    pub fn watch_state(&self) -> watch::Receiver<SequencerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SequencerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Sequencer {:?} -> {:?}", previous, state);
        }
    }

    /// Replace the playlist. Any layer the sequencer was playing is removed.
    pub async fn load(&self, tracks: Vec<TrackDescriptor>, looping: bool) {
        let mut inner = self.inner.lock().await;
        if let Some(handle) = inner.current.take() {
            self.bus.remove_layer(handle.id());
        }

        info!("Playlist loaded: {} tracks (loop: {})", tracks.len(), looping);
        inner.playlist = Some(Playlist::new(tracks, looping));
        self.set_state(SequencerState::Ready);
    }

    /// Start from the first track. Only acts in `Ready` or `Finished`.
    pub async fn play(&self) -> SequencerState {
        let mut inner = self.inner.lock().await;
        match self.state() {
            SequencerState::Ready | SequencerState::Finished => {
                if let Some(playlist) = inner.playlist.as_mut() {
                    playlist.rewind();
                }
                self.start_next(&mut inner).await;
            }
            SequencerState::Idle => warn!("No playlist loaded"),
            SequencerState::Playing => debug!("Already playing"),
        }
        self.state()
    }

    /// Advance after the layer `id` ended. Ignored unless it is the
    /// sequencer's current layer.
    pub async fn on_layer_ended(&self, id: LayerId) -> SequencerState {
        let mut inner = self.inner.lock().await;
        let is_current = inner.current.as_ref().map_or(false, |h| h.id() == id);
        if self.state() == SequencerState::Playing && is_current {
            inner.current = None;
            self.start_next(&mut inner).await;
        }
        self.state()
    }

    /// Remove the current layer and return to `Ready` (or `Idle` without a
    /// playlist)
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(handle) = inner.current.take() {
            self.bus.remove_layer(handle.id());
        }

        match inner.playlist.as_mut() {
            Some(playlist) => {
                playlist.rewind();
                self.set_state(SequencerState::Ready);
            }
            None => self.set_state(SequencerState::Idle),
        }
    }

    pub async fn current_track(&self) -> Option<TrackDescriptor> {
        let inner = self.inner.lock().await;
        if inner.current.is_none() {
            return None;
        }
        inner.playlist.as_ref()?.current().cloned()
    }

    /// Playlist cursor: `None` before the first track, the track count once
    /// playback ran past the end
    pub async fn position(&self) -> Option<usize> {
        self.inner.lock().await.playlist.as_ref()?.cursor()
    }

    pub async fn current_layer(&self) -> Option<LayerHandle> {
        self.inner.lock().await.current.clone()
    }

    /// Add the next playable track, skipping ones that fail to open.
    ///
    /// Gives up after one full pass of failures so a looping playlist of
    /// broken tracks ends instead of spinning.
    async fn start_next(&self, inner: &mut SequencerInner) {
        let Some(playlist) = inner.playlist.as_mut() else {
            self.set_state(SequencerState::Idle);
            return;
        };

        let mut attempts = 0;
        while attempts < playlist.len() {
            let Some(index) = playlist.advance() else {
                break;
            };
            attempts += 1;

            let track = playlist.tracks()[index].clone();
            let title = track.title().to_string();
            // Sequenced tracks play once; the playlist decides what repeats.
            match self.bus.add_layer(track, Some(false), None).await {
                Some(handle) => {
                    info!(index, track = %title, "Now playing");
                    inner.current = Some(handle);
                    self.set_state(SequencerState::Playing);
                    return;
                }
                None => warn!(index, track = %title, "Skipping track"),
            }
        }

        inner.current = None;
        info!("Playlist finished");
        self.set_state(SequencerState::Finished);
    }

    /// Drive advancement from the bus's `LayerEnded` events.
    ///
    /// The subscription is taken before the task is spawned, so no end
    /// event published after this call is missed.
    pub fn run(self: Arc<Self>) -> JoinHandle<()> {
        let mut events = self.bus.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(MixEvent::LayerEnded { id }) => {
                        self.on_layer_ended(id).await;
                    }
                    Ok(MixEvent::StreamingStopped { reason }) => {
                        warn!("Sequencer stopping: {}", reason);
                        break;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Sequencer missed {} bus events", skipped);
                        self.resync().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Treat a current layer that vanished from the bus as ended
    async fn resync(&self) {
        let current = self.current_layer().await;
        if let Some(handle) = current {
            if !self.bus.contains(handle.id()) {
                self.on_layer_ended(handle.id()).await;
            }
        }
    }
}
