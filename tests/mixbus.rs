//! Bus, layers and pump working together

mod common;

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

use common::{bus_with_queue, constant_opener, drain, mix_config, pump_config, track, DropCounter};
use voice_mixbus::error::PumpError;
use voice_mixbus::transport::channel_sink;
use voice_mixbus::{LayerId, MixBus, MixEvent, PcmFormat};

const WAIT: Duration = Duration::from_secs(5);

fn level(value: f32) -> i16 {
    (value * i16::MAX as f32) as i16
}

async fn next_event(events: &mut broadcast::Receiver<MixEvent>) -> MixEvent {
    timeout(WAIT, events.recv()).await.unwrap().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remove_unknown_id_leaves_active_set_alone() {
    let drops = DropCounter::default();
    let (bus, rx) = bus_with_queue(2, drops.clone());
    let _drain = drain(rx);

    bus.add_layer(track("0.1@8000"), Some(true), None).await.unwrap();
    assert_eq!(bus.layer_count(), 1);

    assert!(!bus.remove_layer(LayerId::new()));
    assert_eq!(bus.layer_count(), 1);

    bus.shutdown().await;
    assert_eq!(drops.count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn same_track_added_twice_gets_two_layers() {
    let drops = DropCounter::default();
    let (bus, rx) = bus_with_queue(2, drops.clone());
    let _drain = drain(rx);

    let first = bus.add_layer(track("0.1@8000"), Some(true), None).await.unwrap();
    let second = bus.add_layer(track("0.1@8000"), Some(true), None).await.unwrap();

    assert_ne!(first.id(), second.id());
    assert!(bus.contains(first.id()));
    assert!(bus.contains(second.id()));
    assert_eq!(bus.layer_count(), 2);

    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_all_disposes_every_layer_once() {
    let drops = DropCounter::default();
    let (bus, rx) = bus_with_queue(2, drops.clone());
    let _drain = drain(rx);

    assert_eq!(bus.stop_all(), 0);

    for _ in 0..3 {
        bus.add_layer(track("0.2@8000"), Some(true), None).await.unwrap();
    }
    assert_eq!(bus.stop_all(), 3);
    assert_eq!(bus.layer_count(), 0);
    assert_eq!(drops.count(), 3);

    // Nothing left to release, so shutdown adds no disposals.
    assert_eq!(bus.stop_all(), 0);
    bus.shutdown().await;
    assert_eq!(drops.count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unplayable_track_is_reported_not_added() {
    let drops = DropCounter::default();
    let (bus, rx) = bus_with_queue(2, drops.clone());
    let _drain = drain(rx);

    assert!(bus.add_layer(track("missing.mp3"), None, None).await.is_none());
    assert_eq!(bus.layer_count(), 0);
    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn layers_are_summed_without_limiting() {
    let (bus, mut rx) = bus_with_queue(1, DropCounter::default());

    bus.add_layer(track("0.25@80000"), Some(true), None).await.unwrap();
    let second = bus.add_layer(track("0.25@80000"), Some(true), None).await.unwrap();

    // 0.5 of full scale once both layers are in the mix
    let both = (0.5f32 * i16::MAX as f32) as i16;
    let found = timeout(WAIT, async {
        while let Some(frame) = rx.recv().await {
            if frame.to_i16().iter().all(|s| *s == both) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap();
    assert!(found);

    assert!(bus.remove_layer(second.id()));
    let one = (0.25f32 * i16::MAX as f32) as i16;
    let found = timeout(WAIT, async {
        while let Some(frame) = rx.recv().await {
            if frame.to_i16().iter().all(|s| *s == one) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap();
    assert!(found);

    let _drain = drain(rx);
    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gain_above_unity_saturates_in_the_sink_format() {
    let (bus, mut rx) = bus_with_queue(1, DropCounter::default());
    bus.add_layer(track("0.8@80000"), Some(true), Some(2.0)).await.unwrap();

    let found = timeout(WAIT, async {
        while let Some(frame) = rx.recv().await {
            if frame.to_i16().iter().all(|s| *s == i16::MAX) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap();
    assert!(found);

    let _drain = drain(rx);
    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ended_layer_is_gone_before_notification() {
    let drops = DropCounter::default();
    let (bus, rx) = bus_with_queue(2, drops.clone());
    let mut events = bus.subscribe();
    let _drain = drain(rx);

    // One and a half frames of audio
    let handle = bus.add_layer(track("0.3@240"), Some(false), None).await.unwrap();

    loop {
        match next_event(&mut events).await {
            MixEvent::LayerEnded { id } => {
                assert_eq!(id, handle.id());
                assert!(!bus.contains(id));
                assert_eq!(drops.count(), 1);
                break;
            }
            MixEvent::LayerAdded { .. } => {}
            other => panic!("unexpected event {:?}", other),
        }
    }

    // Ending is reported once; removing afterwards finds nothing.
    assert!(!bus.remove_layer(handle.id()));
    bus.shutdown().await;
    assert_eq!(drops.count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn looping_layer_outlives_its_source() {
    let (bus, rx) = bus_with_queue(4, DropCounter::default());
    let mut events = bus.subscribe();
    let _drain = drain(rx);

    // 10 ms of audio, looping under a stream of 20 ms frames
    let handle = bus.add_layer(track("0.1@80"), Some(true), None).await.unwrap();
    let start = bus.frames_sent();

    timeout(WAIT, async {
        while bus.frames_sent() < start + 50 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert!(bus.contains(handle.id()));
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, MixEvent::LayerEnded { .. }));
    }

    // Turning looping off lets it finish.
    assert!(bus.set_looping(handle.id(), false));
    loop {
        if let MixEvent::LayerEnded { id } = next_event(&mut events).await {
            assert_eq!(id, handle.id());
            break;
        }
    }
    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transport_failure_reported_once() {
    let (bus, rx) = bus_with_queue(1, DropCounter::default());
    let mut events = bus.subscribe();
    drop(rx);

    let event = next_event(&mut events).await;
    assert!(matches!(event, MixEvent::StreamingStopped { .. }));
    assert!(!bus.is_streaming());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));

    // Layers can still be managed and shutdown still completes.
    bus.add_layer(track("0.1@100"), None, None).await.unwrap();
    bus.shutdown().await;
    assert_eq!(bus.layer_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removed_layer_is_absent_from_later_frames() {
    let (bus, mut rx) = bus_with_queue(1, DropCounter::default());

    bus.add_layer(track("0.25@80000"), Some(true), None).await.unwrap();
    let loud = bus.add_layer(track("0.5@80000"), Some(true), None).await.unwrap();

    let both = level(0.75);
    let mixed = timeout(WAIT, async {
        while let Some(frame) = rx.recv().await {
            if frame.to_i16().iter().all(|s| *s == both) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap();
    assert!(mixed);

    assert!(bus.remove_layer(loud.id()));

    // One frame queued in the sink plus one held by the pump were mixed
    // before the removal.
    for _ in 0..2 {
        rx.recv().await.unwrap();
    }

    let quiet = level(0.25);
    for _ in 0..20 {
        let frame = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert!(frame.to_i16().iter().all(|s| *s == quiet), "removed layer still mixed");
    }

    let _drain = drain(rx);
    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_and_removes_keep_the_set_consistent() {
    const TASKS: usize = 8;
    const ROUNDS: usize = 10;

    let drops = DropCounter::default();
    let (bus, rx) = bus_with_queue(1, drops.clone());
    let _drain = drain(rx);

    let workers: Vec<_> = (0..TASKS)
        .map(|_| {
            let bus = bus.clone();
            tokio::spawn(async move {
                for _ in 0..ROUNDS {
                    let kept = bus.add_layer(track("0.01@8000"), Some(true), None).await;
                    let dropped = bus.add_layer(track("0.01@8000"), Some(true), None).await;
                    assert!(kept.is_some());
                    assert!(bus.remove_layer(dropped.unwrap().id()));
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for worker in workers {
        worker.await.unwrap();
    }

    assert_eq!(bus.layer_count(), TASKS * ROUNDS);
    assert_eq!(drops.count(), TASKS * ROUNDS);
    assert!(bus.frames_sent() > 0);

    bus.shutdown().await;
    assert_eq!(bus.layer_count(), 0);
    assert_eq!(drops.count(), 2 * TASKS * ROUNDS);
}

#[tokio::test]
async fn unencodable_bus_format_fails_at_start() {
    let mut mix = mix_config();
    mix.bits_per_sample = 24;
    let format = PcmFormat::new(mix.sample_rate, mix.channels, 24);
    let (sink, _rx) = channel_sink(format, 1);

    let result = MixBus::new(
        &mix,
        &pump_config(),
        Box::new(sink),
        constant_opener(DropCounter::default()),
    );
    assert!(matches!(result, Err(PumpError::UnsupportedFormat(f)) if f == format));
}
