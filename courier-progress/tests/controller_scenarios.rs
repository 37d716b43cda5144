mod common;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use common::{approx, Call, Harness};
use courier_core::{
    ChatId, ContentKind, Direction, FileId, FileSnapshot, MessageId, RemoteState, TransferEntity,
    TransferError, TransferEvent, TransferMetadata, TransferState,
};

fn document(id: i32) -> TransferEntity {
    TransferEntity::new(FileId(id), ContentKind::Document)
}

fn idle() -> TransferMetadata {
    TransferMetadata {
        size: 1000,
        ..Default::default()
    }
}

fn active_send(bytes_done: u64) -> TransferMetadata {
    TransferMetadata {
        size: 1000,
        bytes_done,
        is_active: true,
        direction: Direction::Send,
        ..Default::default()
    }
}

#[test]
fn test_progress_sequence_to_completion() {
    let mut h = Harness::new();
    let file = FileId(1);
    h.controller.bind(Some(document(1)), idle());
    assert_eq!(h.controller.current_state(), TransferState::Paused);
    h.observer.clear();

    h.manager.emit_state(file, RemoteState::Active);
    h.manager.emit_progress(file, 0.0);
    h.manager.emit_progress(file, 0.4);
    h.manager.emit_state(file, RemoteState::Completed);
    h.pump();

    assert_eq!(h.observer.visuals(), vec![0.0, 0.4, 1.0]);
    assert_eq!(h.controller.current_state(), TransferState::Completed);
}

#[test]
fn test_completed_ignores_trailing_progress() {
    let mut h = Harness::new();
    let file = FileId(2);
    h.controller.bind(Some(document(2)), idle());
    h.manager.emit_state(file, RemoteState::Active);
    h.manager.emit_progress(file, 0.5);
    h.manager.emit_state(file, RemoteState::Completed);
    h.pump();
    let notified = h.observer.count();

    for raw in [0.97, 0.2, 1.0, 0.5] {
        h.manager.emit_progress(file, raw);
    }
    h.manager.emit_state(file, RemoteState::Completed);
    h.manager.emit_state(file, RemoteState::Active);
    h.pump();

    assert_eq!(h.controller.current_visual_progress(), 1.0);
    assert_eq!(h.controller.current_state(), TransferState::Completed);
    assert_eq!(h.observer.count(), notified);
}

#[test]
fn test_duplicate_events_do_not_double_notify() {
    let mut h = Harness::new();
    let file = FileId(3);
    h.controller.bind(Some(document(3)), idle());
    h.observer.clear();

    h.manager.emit_state(file, RemoteState::Active);
    h.manager.emit_state(file, RemoteState::Active);
    h.manager.emit_progress(file, 0.3);
    h.manager.emit_progress(file, 0.3);
    h.manager.emit_progress(file, 0.25);
    h.pump();

    assert_eq!(h.observer.visuals(), vec![0.0, 0.3]);
    assert!(approx(h.controller.view().raw, 0.3));
}

#[test]
fn test_small_progress_steps_are_coalesced() {
    let mut h = Harness::new();
    let file = FileId(4);
    h.controller.bind(Some(document(4)), idle());
    h.manager.emit_state(file, RemoteState::Active);
    h.pump();
    h.observer.clear();

    for step in 1..=100 {
        h.manager.emit_progress(file, step as f32 * 0.001);
    }
    h.pump();

    // 0.1 total movement at a 0.01 threshold
    assert!(h.observer.count() <= 10, "got {} redraws", h.observer.count());
    assert!(approx(h.controller.current_visual_progress(), 0.1));
}

#[test]
fn test_generation_blending_scenario() {
    let mut h = Harness::new();
    let file = FileId(5);
    let entity = TransferEntity::new(file, ContentKind::Video);
    h.controller.bind(Some(entity), active_send(0));
    assert_eq!(h.controller.current_state(), TransferState::InProgress);

    let sink = h.controller.event_sink().unwrap();
    sink.post(TransferEvent::Generation { file_id: file, progress: 0.5, done: false })
        .unwrap();
    h.pump();
    let generating = h.controller.current_visual_progress();
    assert!(approx(generating, 0.175));

    sink.post(TransferEvent::Generation { file_id: file, progress: 1.0, done: true })
        .unwrap();
    h.manager.emit_progress(file, 0.2);
    h.pump();
    let uploading = h.controller.current_visual_progress();
    assert!(approx(uploading, 0.48));

    let visuals = h.observer.visuals();
    assert!(visuals.windows(2).all(|w| w[1] >= w[0]), "{:?}", visuals);
}

#[test]
fn test_photo_send_does_not_blend() {
    let mut h = Harness::new();
    let file = FileId(6);
    h.controller
        .bind(Some(TransferEntity::new(file, ContentKind::Photo)), active_send(0));
    let sink = h.controller.event_sink().unwrap();
    sink.post(TransferEvent::Generation { file_id: file, progress: 0.9, done: false })
        .unwrap();
    h.manager.emit_progress(file, 0.2);
    h.pump();

    assert!(approx(h.controller.current_visual_progress(), 0.2));
}

#[test]
fn test_same_file_rebind_preserves_state() {
    let mut h = Harness::new();
    let file = FileId(7);
    h.controller.bind(
        Some(document(7).with_message(ChatId(1), MessageId(10))),
        idle(),
    );
    h.manager.emit_state(file, RemoteState::Active);
    h.manager.emit_progress(file, 0.6);
    h.pump();
    h.manager.clear();
    let before = h.controller.view();

    h.controller.bind(
        Some(document(7).with_message(ChatId(1), MessageId(11))),
        TransferMetadata {
            size: 2000,
            ..Default::default()
        },
    );

    assert_eq!(h.controller.view(), before);
    assert!(h.manager.calls().is_empty());
    assert_eq!(h.controller.entity().unwrap().message_id, Some(MessageId(11)));
    assert_eq!(h.controller.metadata().size, 2000);
}

#[test]
fn test_different_file_resubscribes_exactly_once() {
    let mut h = Harness::new();
    h.controller.bind(Some(document(8)), idle());
    h.manager.clear();

    h.controller.bind(Some(document(9)), idle());

    assert_eq!(
        h.manager.calls(),
        vec![Call::Unsubscribe(FileId(8)), Call::Subscribe(FileId(9))]
    );
}

#[test]
fn test_bind_none_unsubscribes_and_resets() {
    let mut h = Harness::new();
    let file = FileId(10);
    h.controller.bind(Some(document(10)), idle());
    h.manager.emit_state(file, RemoteState::Active);
    h.manager.emit_progress(file, 0.7);
    h.pump();

    h.controller.bind(None, TransferMetadata::default());
    assert_eq!(h.manager.count(Call::Unsubscribe(file)), 1);
    assert_eq!(h.controller.current_state(), TransferState::Paused);
    assert_eq!(h.controller.current_visual_progress(), 0.0);

    h.controller.bind(None, TransferMetadata::default());
    assert_eq!(h.manager.count(Call::Unsubscribe(file)), 1);
}

#[test]
fn test_activate_dispatch_table() {
    let mut h = Harness::new();
    let file = FileId(11);
    let opened = Arc::new(Mutex::new(Vec::new()));
    let sink = opened.clone();
    h.controller.set_open_handler(Box::new(move |entity: &TransferEntity, path: Option<&Path>| {
        sink.lock()
            .unwrap()
            .push((entity.file_id, path.map(|p| p.to_path_buf())));
    }));
    h.controller.bind(Some(document(11)), idle());
    h.manager.clear();

    h.controller.on_activate();
    assert_eq!(h.manager.calls(), vec![Call::Start(file)]);
    // Nothing changes until the manager acknowledges.
    assert_eq!(h.controller.current_state(), TransferState::Paused);

    h.manager.emit_state(file, RemoteState::Active);
    h.pump();
    h.manager.clear();
    h.controller.on_activate();
    assert_eq!(h.manager.calls(), vec![Call::Cancel(file)]);
    assert_eq!(h.controller.current_state(), TransferState::InProgress);

    h.manager.emit_state(file, RemoteState::Cancelled);
    h.pump();
    assert_eq!(h.controller.current_state(), TransferState::Failed);
    h.manager.clear();
    h.controller.on_activate();
    assert_eq!(h.manager.calls(), vec![Call::Retry(file)]);

    h.manager.emit(TransferEvent::state_changed(
        file,
        RemoteState::Completed,
        FileSnapshot {
            size: 1000,
            bytes_done: 1000,
            local_path: Some(PathBuf::from("/tmp/report.pdf")),
        },
    ));
    h.pump();
    h.manager.clear();
    h.controller.on_activate();
    assert!(h.manager.calls().is_empty());
    assert_eq!(
        *opened.lock().unwrap(),
        vec![(file, Some(PathBuf::from("/tmp/report.pdf")))]
    );
}

#[test]
fn test_failure_preserves_progress_and_retry_restarts_from_last_raw() {
    let mut h = Harness::new();
    let file = FileId(12);
    h.controller.bind(Some(document(12)), idle());
    h.manager.emit_state(file, RemoteState::Active);
    h.manager.emit_progress(file, 0.45);
    h.manager.emit_state(
        file,
        RemoteState::Failed {
            reason: "connection reset".to_string(),
        },
    );
    h.pump();

    assert_eq!(h.controller.current_state(), TransferState::Failed);
    assert!(approx(h.controller.current_visual_progress(), 0.45));
    assert!(matches!(
        h.controller.last_error(),
        Some(TransferError::TransferFailed { reason, .. }) if reason == "connection reset"
    ));

    // Second failure looks the same to the renderer.
    h.manager.emit_progress(file, 0.5);
    h.manager.emit_state(file, RemoteState::Active);
    h.pump();
    assert_eq!(h.controller.current_state(), TransferState::InProgress);
    assert!(approx(h.controller.current_visual_progress(), 0.5));
    h.manager.emit_state(file, RemoteState::Failed { reason: "again".to_string() });
    h.pump();
    assert_eq!(h.controller.current_state(), TransferState::Failed);
    assert_eq!(h.controller.view().failure_count, 2);
}

#[test]
fn test_eviction_returns_to_paused() {
    let mut h = Harness::new();
    let file = FileId(13);
    h.controller.bind(
        Some(document(13)),
        TransferMetadata {
            size: 1000,
            bytes_done: 1000,
            is_complete: true,
            ..Default::default()
        },
    );
    assert_eq!(h.controller.current_state(), TransferState::Completed);
    assert_eq!(h.controller.current_visual_progress(), 1.0);

    h.manager.emit_state(file, RemoteState::Evicted);
    h.pump();
    assert_eq!(h.controller.current_state(), TransferState::Paused);
    assert_eq!(h.controller.current_visual_progress(), 0.0);
}

#[test]
fn test_local_message_promotion_keeps_progress() {
    let mut h = Harness::new();
    let file = FileId(14);
    h.controller.bind(
        Some(document(14).with_message(ChatId(5), MessageId(-1))),
        active_send(600),
    );
    assert!(approx(h.controller.current_visual_progress(), 0.6));
    h.manager.clear();

    let sink = h.controller.event_sink().unwrap();
    sink.post(TransferEvent::MessageResolved {
        file_id: file,
        provisional: MessageId(-1),
        resolved: MessageId(9001),
        success: true,
    })
    .unwrap();
    h.pump();

    assert_eq!(h.controller.current_state(), TransferState::InProgress);
    assert!(approx(h.controller.current_visual_progress(), 0.6));
    assert_eq!(h.controller.entity().unwrap().message_id, Some(MessageId(9001)));
    assert!(h.manager.calls().is_empty());

    h.manager.emit_progress(file, 0.8);
    h.pump();
    assert!(approx(h.controller.current_visual_progress(), 0.8));

    h.controller.on_activate();
    assert_eq!(h.manager.calls(), vec![Call::Cancel(file)]);
}

#[test]
fn test_failed_promotion_moves_to_failed() {
    let mut h = Harness::new();
    let file = FileId(15);
    h.controller.bind(
        Some(document(15).with_message(ChatId(5), MessageId(-2))),
        active_send(900),
    );

    h.controller.rebind_message(MessageId(-2), MessageId(-3), false);

    assert_eq!(h.controller.current_state(), TransferState::Failed);
    assert_eq!(h.controller.entity().unwrap().message_id, Some(MessageId(-3)));
    assert_eq!(
        h.controller.last_error(),
        Some(&TransferError::RebindFailed {
            file_id: file,
            provisional: MessageId(-2),
        })
    );

    // A duplicate of the same resolution is harmless.
    h.controller.rebind_message(MessageId(-2), MessageId(-3), false);
    assert_eq!(h.controller.view().failure_count, 1);
}

#[test]
fn test_stale_events_after_rebinding_are_discarded() {
    let mut h = Harness::new();
    let first = FileId(16);
    h.controller.bind(Some(document(16)), idle());
    let stale = h.manager.sink(first).unwrap();

    h.controller.bind(Some(document(17)), idle());
    stale.post(TransferEvent::state_changed(first, RemoteState::Active, FileSnapshot::default()))
        .unwrap();
    h.pump();
    assert_eq!(h.controller.current_state(), TransferState::Paused);

    // Back to the first file: the old registration still must not leak in.
    h.controller.bind(Some(document(16)), idle());
    stale.post(TransferEvent::state_changed(first, RemoteState::Completed, FileSnapshot::default()))
        .unwrap();
    h.pump();
    assert_eq!(h.controller.current_state(), TransferState::Paused);

    h.manager.emit_state(first, RemoteState::Active);
    h.pump();
    assert_eq!(h.controller.current_state(), TransferState::InProgress);
}

#[test]
fn test_drop_releases_subscriptions() {
    let h = Harness::new();
    let manager = h.manager.clone();
    let mut controller = h.controller;
    controller.bind(
        Some(TransferEntity::new(FileId(18), ContentKind::VoiceNote)),
        idle(),
    );
    drop(controller);

    let calls = manager.calls();
    assert_eq!(
        calls,
        vec![
            Call::Subscribe(FileId(18)),
            Call::TrackAdd(FileId(18)),
            Call::TrackRemove(FileId(18)),
            Call::Unsubscribe(FileId(18)),
        ]
    );
}

#[test]
fn test_refused_subscription_stays_paused() {
    let mut h = Harness::new();
    h.manager
        .refuse_subscribe
        .store(true, std::sync::atomic::Ordering::SeqCst);
    h.controller.bind(
        Some(document(19)),
        TransferMetadata {
            size: 10,
            bytes_done: 5,
            is_active: true,
            ..Default::default()
        },
    );

    assert_eq!(h.controller.current_state(), TransferState::Paused);
    assert!(h.controller.subscription().is_empty());
    assert!(h.controller.event_sink().is_none());
}

#[test]
fn test_refused_start_surfaces_as_failed() {
    let mut h = Harness::new();
    h.manager
        .refuse_start
        .store(true, std::sync::atomic::Ordering::SeqCst);
    h.controller.bind(Some(document(20)), idle());
    h.controller.on_activate();

    assert_eq!(h.controller.current_state(), TransferState::Failed);
    assert!(h.controller.last_error().unwrap().to_string().contains("storage full"));
}

#[test]
fn test_playback_and_streaming_updates() {
    let mut h = Harness::new();
    let file = FileId(21);
    h.controller.bind(
        Some(TransferEntity::new(file, ContentKind::Audio)),
        TransferMetadata {
            size: 1000,
            bytes_done: 1000,
            is_complete: true,
            ..Default::default()
        },
    );
    h.observer.clear();

    let tracks = h.manager.track_sink(file).unwrap();
    tracks.post(TransferEvent::Playback { file_id: file, playing: true }).unwrap();
    tracks.post(TransferEvent::Playback { file_id: file, playing: true }).unwrap();
    h.manager.emit(TransferEvent::Streaming { file_id: file, available: 0.3 });
    h.manager.emit(TransferEvent::Streaming { file_id: file, available: 0.1 });
    h.pump();

    let view = h.controller.view();
    assert!(view.playing);
    assert!(approx(view.streamed, 0.3));
    assert_eq!(h.observer.count(), 2);
}

#[test]
fn test_refused_subscription_is_retried_on_rebind() {
    let mut h = Harness::new();
    let file = FileId(22);
    h.manager
        .refuse_subscribe
        .store(true, std::sync::atomic::Ordering::SeqCst);
    h.controller.bind(Some(document(22)), idle());
    assert!(h.controller.subscription().is_empty());

    h.manager
        .refuse_subscribe
        .store(false, std::sync::atomic::Ordering::SeqCst);
    h.controller.bind(Some(document(22)), idle());
    assert_eq!(h.manager.count(Call::Subscribe(file)), 1);
    assert!(h.controller.event_sink().is_some());

    h.controller.on_activate();
    assert_eq!(h.manager.count(Call::Start(file)), 1);
    h.manager.emit_state(file, RemoteState::Active);
    h.pump();
    assert_eq!(h.controller.current_state(), TransferState::InProgress);
}

#[test]
fn test_activate_subscribes_before_starting() {
    let mut h = Harness::new();
    let file = FileId(23);
    h.manager
        .refuse_subscribe
        .store(true, std::sync::atomic::Ordering::SeqCst);
    h.controller.bind(Some(document(23)), idle());

    // Still refused: no start is sent into the void.
    h.controller.on_activate();
    assert_eq!(h.controller.current_state(), TransferState::Failed);
    assert_eq!(h.manager.count(Call::Start(file)), 0);

    h.manager
        .refuse_subscribe
        .store(false, std::sync::atomic::Ordering::SeqCst);
    h.manager.clear();
    h.controller.on_activate();
    assert_eq!(
        h.manager.calls(),
        vec![Call::Subscribe(file), Call::Retry(file)]
    );
}

#[test]
fn test_direction_is_fixed_for_a_binding() {
    let mut h = Harness::new();
    let file = FileId(24);
    h.controller
        .bind(Some(TransferEntity::new(file, ContentKind::Video)), active_send(0));
    h.controller.bind(
        Some(TransferEntity::new(file, ContentKind::Video)),
        TransferMetadata {
            size: 1000,
            direction: Direction::Receive,
            ..Default::default()
        },
    );
    assert_eq!(h.controller.metadata().direction, Direction::Send);

    let sink = h.controller.event_sink().unwrap();
    sink.post(TransferEvent::Generation { file_id: file, progress: 0.5, done: false })
        .unwrap();
    h.pump();
    assert!(approx(h.controller.current_visual_progress(), 0.175));
}
