//! Mix Bus Player
//!
//! Plays playlists and audio files through one mix bus and streams the
//! result to a receiver over UDP (Opus).
//!
//! Usage: `mixbus-play <target-addr> <playlist-or-file>... [--loop]`

use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voice_mixbus::{
    config::AppConfig,
    playlist::{is_playlist_location, load_playlist},
    transport::UdpOpusSink,
    MixBus, MixEvent, PlaylistSequencer, SequencerState, TrackDescriptor,
};

struct Args {
    target: SocketAddr,
    inputs: Vec<String>,
    loop_playlist: bool,
}

fn parse_args() -> Result<Args> {
    let mut target = None;
    let mut inputs = Vec::new();
    let mut loop_playlist = false;

    for arg in std::env::args().skip(1) {
        if arg == "--loop" {
            loop_playlist = true;
        } else if target.is_none() {
            target = Some(
                arg.parse::<SocketAddr>()
                    .with_context(|| format!("Invalid target address: {}", arg))?,
            );
        } else {
            inputs.push(arg);
        }
    }

    let Some(target) = target else {
        bail!("Usage: mixbus-play <target-addr> <playlist-or-file>... [--loop]");
    };
    if inputs.is_empty() {
        bail!("No playlist or audio file given");
    }

    Ok(Args {
        target,
        inputs,
        loop_playlist,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Mix Bus Player");

    let args = parse_args()?;
    let mut config = AppConfig::load_or_default()?;
    config.transport.target = args.target;
    config.playlist.loop_playlist |= args.loop_playlist;

    let format = config.mix.format();
    let sink = UdpOpusSink::connect(
        config.transport.target,
        format,
        config.mix.frame_duration_ms,
        &config.transport,
    )
    .await?;

    let bus = Arc::new(MixBus::from_config(&config, Box::new(sink))?);
    let mut events = bus.subscribe();

    tracing::info!("Streaming {} to {}", format, config.transport.target);

    // Playlists go through the sequencer, plain files become looping layers.
    let mut playlist_tracks = Vec::new();
    let mut loose_layers = 0usize;
    for input in &args.inputs {
        if is_playlist_location(input) {
            match load_playlist(input, config.playlist.fetch_timeout()).await {
                Ok(tracks) => playlist_tracks.extend(tracks),
                Err(e) => tracing::warn!("Skipping playlist {}: {}", input, e),
            }
            continue;
        }

        let track = TrackDescriptor::new(input.as_str())?.with_volume(config.mix.default_volume);
        if let Some(handle) = bus.add_layer(track, Some(true), None).await {
            tracing::info!("Layer {} playing ({})", handle.title(), handle.id());
            loose_layers += 1;
        }
    }

    let sequencer = Arc::new(PlaylistSequencer::new(bus.clone()));
    let mut state = sequencer.watch_state();
    let driver = if playlist_tracks.is_empty() {
        None
    } else {
        let tracks = playlist_tracks
            .into_iter()
            .map(|t| t.with_volume(config.mix.default_volume))
            .collect();
        sequencer.load(tracks, config.playlist.loop_playlist).await;
        let driver = sequencer.clone().run();
        sequencer.play().await;
        Some(driver)
    };

    if driver.is_none() && loose_layers == 0 {
        bus.shutdown().await;
        bail!("Nothing playable");
    }

    tracing::info!("Playing - press Ctrl+C to stop");

    let mut stats = tokio::time::interval(Duration::from_secs(10));
    stats.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            changed = state.changed(), if driver.is_some() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow();
                if current == SequencerState::Finished && loose_layers == 0 {
                    tracing::info!("Playlist finished");
                    break;
                }
            }
            event = events.recv() => {
                if let Ok(MixEvent::StreamingStopped { reason }) = event {
                    tracing::error!("Streaming stopped: {}", reason);
                    break;
                }
            }
            _ = stats.tick() => {
                tracing::info!(
                    "Stats: {} frames sent, {} active layers",
                    bus.frames_sent(),
                    bus.layer_count()
                );
                for layer in bus.layers() {
                    tracing::debug!(
                        "  {} [{}] vol {:.2} loop {} at {}",
                        layer.title,
                        layer.id,
                        layer.volume,
                        layer.looping,
                        layer.position_frames
                    );
                }
            }
        }
    }

    if let Some(driver) = driver {
        sequencer.stop().await;
        driver.abort();
    }
    bus.shutdown().await;

    tracing::info!("Mix Bus Player stopped");
    Ok(())
}
