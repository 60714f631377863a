//! Playlist sequencing against a live bus

mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use common::{bus_with_queue, drain, track, DropCounter};
use voice_mixbus::playlist::PlaylistParser;
use voice_mixbus::{MixBus, PlaylistSequencer, SequencerState};

/// 25 s of audio; never ends on its own during a test
const LONG_A: &str = "0.1@200000";
const LONG_B: &str = "0.2@200000";

/// Bus whose pump stalls after a couple of frames, so layers only end when
/// a test says so
fn stalled_bus() -> (Arc<MixBus>, tokio::sync::mpsc::Receiver<voice_mixbus::audio::Frame>) {
    bus_with_queue(1, DropCounter::default())
}

/// Simulate the current layer playing out
async fn end_current(bus: &MixBus, sequencer: &PlaylistSequencer) -> SequencerState {
    let handle = sequencer.current_layer().await.expect("a current layer");
    assert!(bus.remove_layer(handle.id()));
    sequencer.on_layer_ended(handle.id()).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_tracks_without_loop_finish() {
    let (bus, _rx) = stalled_bus();
    let sequencer = PlaylistSequencer::new(bus.clone());
    assert_eq!(sequencer.state(), SequencerState::Idle);
    assert_eq!(sequencer.position().await, None);

    sequencer.load(vec![track(LONG_A), track(LONG_B)], false).await;
    assert_eq!(sequencer.state(), SequencerState::Ready);

    assert_eq!(sequencer.play().await, SequencerState::Playing);
    assert_eq!(sequencer.current_track().await.unwrap().source(), LONG_A);
    assert_eq!(bus.layer_count(), 1);

    assert_eq!(end_current(&bus, &sequencer).await, SequencerState::Playing);
    assert_eq!(sequencer.current_track().await.unwrap().source(), LONG_B);
    assert_eq!(bus.layer_count(), 1);

    assert_eq!(end_current(&bus, &sequencer).await, SequencerState::Finished);
    assert!(sequencer.current_layer().await.is_none());
    assert!(sequencer.current_track().await.is_none());
    assert_eq!(bus.layer_count(), 0);
    assert_eq!(sequencer.position().await, Some(2));

    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_tracks_with_loop_return_to_first() {
    let (bus, _rx) = stalled_bus();
    let sequencer = PlaylistSequencer::new(bus.clone());

    sequencer.load(vec![track(LONG_A), track(LONG_B)], true).await;
    sequencer.play().await;
    end_current(&bus, &sequencer).await;

    assert_eq!(end_current(&bus, &sequencer).await, SequencerState::Playing);
    assert_eq!(sequencer.current_track().await.unwrap().source(), LONG_A);
    assert_eq!(bus.layer_count(), 1);

    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replay_after_finish_starts_over() {
    let (bus, _rx) = stalled_bus();
    let sequencer = PlaylistSequencer::new(bus.clone());

    sequencer.load(vec![track(LONG_A)], false).await;
    sequencer.play().await;
    assert_eq!(end_current(&bus, &sequencer).await, SequencerState::Finished);
    assert_eq!(sequencer.position().await, Some(1));

    assert_eq!(sequencer.play().await, SequencerState::Playing);
    assert_eq!(sequencer.position().await, Some(0));
    assert_eq!(sequencer.current_track().await.unwrap().source(), LONG_A);

    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unopenable_tracks_are_skipped() {
    let (bus, _rx) = stalled_bus();
    let sequencer = PlaylistSequencer::new(bus.clone());

    sequencer
        .load(vec![track("broken.mp3"), track(LONG_A), track("gone.ogg")], false)
        .await;
    assert_eq!(sequencer.play().await, SequencerState::Playing);
    assert_eq!(sequencer.current_track().await.unwrap().source(), LONG_A);

    // The last entry fails too, so the playlist is over.
    assert_eq!(end_current(&bus, &sequencer).await, SequencerState::Finished);
    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn looping_playlist_of_broken_tracks_finishes() {
    let (bus, _rx) = stalled_bus();
    let sequencer = PlaylistSequencer::new(bus.clone());

    sequencer.load(vec![track("a.mp3"), track("b.mp3")], true).await;
    assert_eq!(sequencer.play().await, SequencerState::Finished);
    assert_eq!(bus.layer_count(), 0);
    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_playlist_finishes_immediately() {
    let (bus, _rx) = stalled_bus();
    let sequencer = PlaylistSequencer::new(bus.clone());

    let tracks = PlaylistParser::new().parse("#EXTM3U\n# nothing here\n");
    sequencer.load(tracks, false).await;
    assert_eq!(sequencer.play().await, SequencerState::Finished);
    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn end_of_unrelated_layer_is_ignored() {
    let (bus, _rx) = stalled_bus();
    let sequencer = PlaylistSequencer::new(bus.clone());

    sequencer.load(vec![track(LONG_A), track(LONG_B)], false).await;
    sequencer.play().await;

    let other = bus.add_layer(track(LONG_B), Some(true), None).await.unwrap();
    assert_eq!(sequencer.on_layer_ended(other.id()).await, SequencerState::Playing);
    assert_eq!(sequencer.current_track().await.unwrap().source(), LONG_A);

    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_and_reload_release_the_current_layer() {
    let (bus, _rx) = stalled_bus();
    let sequencer = PlaylistSequencer::new(bus.clone());

    sequencer.load(vec![track(LONG_A)], false).await;
    sequencer.play().await;
    assert_eq!(bus.layer_count(), 1);

    sequencer.stop().await;
    assert_eq!(sequencer.state(), SequencerState::Ready);
    assert_eq!(bus.layer_count(), 0);

    sequencer.play().await;
    sequencer.load(vec![track(LONG_B)], false).await;
    assert_eq!(sequencer.state(), SequencerState::Ready);
    assert_eq!(bus.layer_count(), 0);

    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn driver_plays_short_tracks_to_the_end() {
    let (bus, rx) = bus_with_queue(4, DropCounter::default());
    let _drain = drain(rx);
    let sequencer = Arc::new(PlaylistSequencer::new(bus.clone()));
    let mut state = sequencer.watch_state();

    // Three short tracks of 2.5 frames each
    sequencer
        .load(vec![track("0.1@400"), track("0.2@400"), track("0.3@400")], false)
        .await;
    let driver = sequencer.clone().run();
    sequencer.play().await;

    timeout(Duration::from_secs(5), async {
        while *state.borrow_and_update() != SequencerState::Finished {
            state.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    assert_eq!(bus.layer_count(), 0);
    driver.abort();
    bus.shutdown().await;
}
