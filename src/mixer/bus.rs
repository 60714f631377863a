//! Mix bus: the set of active layers and the summed stream built from them
//!
//! The active-layer map sits behind one mutex. The pump reads and sums
//! layers while holding it, and every insert or removal takes it, so a layer
//! is either fully in the mix or fully out of it. Layers leaving the map are
//! disposed after the lock is released.
//!
//! A mixing pass decodes every layer under that lock, including local file
//! reads (remote tracks are fully fetched when opened). Callers on async
//! tasks that add or remove layers can therefore wait up to one pass.

use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::audio::decoder::SymphoniaOpener;
use crate::audio::frame::encode_pcm;
use crate::audio::source::SourceOpener;
use crate::config::{AppConfig, MixConfig, PumpConfig, ResamplerQuality};
use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::error::PumpError;
use crate::mixer::layer::{Layer, LayerOptions};
use crate::protocol::{LayerId, LayerStatus, MixEvent, PcmFormat, TrackDescriptor};
use crate::pump::{FramePump, FrameSource, PumpExit};
use crate::transport::VoiceSink;

/// Returned by a successful add; identifies the layer for later control
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerHandle {
    id: LayerId,
    title: String,
}

impl LayerHandle {
    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}

/// State shared between the bus handle and its pump task
struct BusShared {
    format: PcmFormat,
    layers: Mutex<HashMap<LayerId, Layer>>,
    events: broadcast::Sender<MixEvent>,
}

impl BusShared {
    fn publish(&self, event: MixEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// The pump's view of the bus
struct BusOutput {
    shared: Arc<BusShared>,
    mix: Vec<f32>,
    scratch: Vec<f32>,
}

impl BusOutput {
    fn new(shared: Arc<BusShared>) -> Self {
        Self {
            shared,
            mix: Vec::new(),
            scratch: Vec::new(),
        }
    }
}

impl FrameSource for BusOutput {
    fn format(&self) -> PcmFormat {
        self.shared.format
    }

    /// Sum one frame from every active layer. With no layers this is silence,
    /// so the pump always gets a full frame.
    fn read_frame(&mut self, buf: &mut [u8]) -> usize {
        let Self { shared, mix, scratch } = self;
        let samples = buf.len() / shared.format.bytes_per_sample().max(1);

        mix.clear();
        mix.resize(samples, 0.0);
        scratch.resize(samples, 0.0);

        let ended: Vec<Layer> = {
            let mut layers = shared.layers.lock();
            let mut ended_ids = Vec::new();

            for (id, layer) in layers.iter_mut() {
                let count = layer.read(&mut scratch[..samples]);
                for (acc, sample) in mix.iter_mut().zip(&scratch[..count]) {
                    *acc += *sample;
                }
                if layer.check_ended() {
                    ended_ids.push(*id);
                }
            }

            ended_ids
                .into_iter()
                .filter_map(|id| layers.remove(&id))
                .collect()
        };

        for mut layer in ended {
            let id = layer.id();
            layer.dispose();
            debug!(layer = %id, track = %layer.track().title(), "Layer ended");
            shared.publish(MixEvent::LayerEnded { id });
        }

        encode_pcm(mix, &shared.format, buf)
    }
}

/// Multi-layer mixer bound to one voice sink
///
/// Construction starts the frame pump. Call [`MixBus::shutdown`] to stop it
/// and release every layer; dropping the bus only signals the pump to stop.
pub struct MixBus {
    shared: Arc<BusShared>,
    opener: Arc<dyn SourceOpener>,
    quality: ResamplerQuality,
    frame_duration_ms: u32,
    stop_timeout: Duration,
    pump: Mutex<Option<FramePump>>,
    streaming: Arc<AtomicBool>,
}

impl MixBus {
    /// Create the bus and start its pump on `sink`.
    ///
    /// Fails if the sink's format differs from the mix format or cannot be
    /// encoded. Must be called within a Tokio runtime.
    pub fn new(
        mix: &MixConfig,
        pump: &PumpConfig,
        sink: Box<dyn VoiceSink>,
        opener: Arc<dyn SourceOpener>,
    ) -> Result<Self, PumpError> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(BusShared {
            format: mix.format(),
            layers: Mutex::new(HashMap::new()),
            events,
        });

        let streaming = Arc::new(AtomicBool::new(true));
        let on_stopped = {
            let streaming = streaming.clone();
            let events = shared.events.clone();
            move |exit: &PumpExit| {
                streaming.store(false, Ordering::SeqCst);
                warn!("Streaming stopped: {}", exit);
                let _ = events.send(MixEvent::StreamingStopped {
                    reason: exit.to_string(),
                });
            }
        };

        let pump_handle = FramePump::start(
            BusOutput::new(shared.clone()),
            sink,
            mix.frame_duration_ms,
            on_stopped,
        )?;

        info!(
            "Mix bus started: {}, {} ms frames",
            shared.format, mix.frame_duration_ms
        );

        Ok(Self {
            shared,
            opener,
            quality: mix.resampler_quality,
            frame_duration_ms: mix.frame_duration_ms,
            stop_timeout: pump.stop_timeout(),
            pump: Mutex::new(Some(pump_handle)),
            streaming,
        })
    }

    /// Bus decoding files and URLs with symphonia
    pub fn from_config(config: &AppConfig, sink: Box<dyn VoiceSink>) -> Result<Self, PumpError> {
        let opener = Arc::new(SymphoniaOpener::new(config.playlist.fetch_timeout()));
        Self::new(&config.mix, &config.pump, sink, opener)
    }

    pub fn format(&self) -> PcmFormat {
        self.shared.format
    }

    pub fn frame_duration_ms(&self) -> u32 {
        self.frame_duration_ms
    }

    /// Whether the pump is still delivering frames
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    pub fn frames_sent(&self) -> u64 {
        self.pump.lock().as_ref().map_or(0, FramePump::frames_sent)
    }

    /// Receive layer lifecycle and streaming notifications
    pub fn subscribe(&self) -> broadcast::Receiver<MixEvent> {
        self.shared.events.subscribe()
    }

    /// Open `track` and start mixing it.
    ///
    /// Opening runs on the blocking pool. Returns `None` (after logging)
    /// when the track cannot be played.
    pub async fn add_layer(
        &self,
        track: TrackDescriptor,
        loop_override: Option<bool>,
        volume: Option<f32>,
    ) -> Option<LayerHandle> {
        let options = LayerOptions {
            loop_override,
            volume,
            target: self.shared.format,
            quality: self.quality,
        };
        let opener = self.opener.clone();
        let title = track.title().to_string();

        let opened =
            tokio::task::spawn_blocking(move || Layer::open(track, &*opener, options)).await;

        match opened {
            Ok(Ok(layer)) => self.insert_layer(layer),
            Ok(Err(e)) => {
                warn!(track = %title, error = %e, "Could not play track");
                None
            }
            Err(e) => {
                error!(track = %title, "Layer construction panicked: {}", e);
                None
            }
        }
    }

    /// Register an already built layer.
    ///
    /// The layer is disposed and `None` returned if it targets another
    /// format or its id is already registered.
    pub fn insert_layer(&self, mut layer: Layer) -> Option<LayerHandle> {
        if layer.target_format() != self.shared.format {
            warn!(
                layer = %layer.id(),
                "Rejecting layer built for {} on a {} bus",
                layer.target_format(),
                self.shared.format
            );
            layer.dispose();
            return None;
        }

        let handle = LayerHandle {
            id: layer.id(),
            title: layer.track().title().to_string(),
        };

        let rejected = {
            let mut layers = self.shared.layers.lock();
            match layers.entry(handle.id) {
                Entry::Occupied(_) => Some(layer),
                Entry::Vacant(slot) => {
                    slot.insert(layer);
                    // Published under the lock so it precedes any LayerEnded.
                    self.shared.publish(MixEvent::LayerAdded {
                        id: handle.id,
                        title: handle.title.clone(),
                    });
                    None
                }
            }
        };

        if let Some(mut layer) = rejected {
            warn!(layer = %handle.id, "Layer id already registered");
            layer.dispose();
            return None;
        }

        debug!(layer = %handle.id, track = %handle.title, "Layer added");
        Some(handle)
    }

    /// Take a layer out of the mix and dispose it. False if `id` is unknown.
    pub fn remove_layer(&self, id: LayerId) -> bool {
        let removed = self.shared.layers.lock().remove(&id);
        match removed {
            Some(mut layer) => {
                layer.dispose();
                debug!(layer = %id, "Layer removed");
                self.shared.publish(MixEvent::LayerRemoved { id });
                true
            }
            None => false,
        }
    }

    /// Remove and dispose every active layer; returns how many there were
    pub fn stop_all(&self) -> usize {
        let drained: Vec<Layer> = {
            let mut layers = self.shared.layers.lock();
            layers.drain().map(|(_, layer)| layer).collect()
        };

        let count = drained.len();
        for mut layer in drained {
            let id = layer.id();
            layer.dispose();
            self.shared.publish(MixEvent::LayerRemoved { id });
        }

        if count > 0 {
            debug!("Stopped {} layers", count);
        }
        count
    }

    /// False if `id` is unknown
    pub fn set_volume(&self, id: LayerId, volume: f32) -> bool {
        match self.shared.layers.lock().get_mut(&id) {
            Some(layer) => {
                layer.set_volume(volume);
                true
            }
            None => false,
        }
    }

    /// False if `id` is unknown
    pub fn set_looping(&self, id: LayerId, looping: bool) -> bool {
        match self.shared.layers.lock().get_mut(&id) {
            Some(layer) => {
                layer.set_looping(looping);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: LayerId) -> bool {
        self.shared.layers.lock().contains_key(&id)
    }

    pub fn layer_count(&self) -> usize {
        self.shared.layers.lock().len()
    }

    /// Snapshot of the active layers, ordered by title
    pub fn layers(&self) -> Vec<LayerStatus> {
        let mut status: Vec<LayerStatus> =
            self.shared.layers.lock().values().map(Layer::status).collect();
        status.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        status
    }

    /// Stop the pump, wait for its in-flight write (bounded by the configured
    /// timeout), then dispose every layer.
    pub async fn shutdown(&self) {
        let pump = self.pump.lock().take();
        if let Some(mut pump) = pump {
            pump.cancel();
            match pump.stop(self.stop_timeout).await {
                Some(PumpExit::Failed(e)) => debug!("Pump had already failed: {}", e),
                Some(exit) => debug!("Pump stopped: {:?}", exit),
                None => {}
            }
        }
        self.streaming.store(false, Ordering::SeqCst);

        let removed = self.stop_all();
        info!("Mix bus shut down ({} layers released)", removed);
    }
}
