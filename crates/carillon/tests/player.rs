//! End-to-end transport and lifecycle tests against an in-memory sound bank

mod common;

use std::sync::Arc;
use std::time::Duration;

use carillon::{
    ErrorKind, LifecycleEvent, LoadMode, MemoryBank, MidiPlayer, PlayerConfig, PlayerError,
    Second, Sequence, TransportState,
};
use common::*;

#[tokio::test]
async fn test_natural_end_reports_started_then_stopped() {
    let dir = tempfile::tempdir().unwrap();
    // Half a beat at 120 bpm: 250 ms
    let notes = [(0, 0, 60, true), (240, 0, 60, false)];
    let path = write_midi(dir.path(), "short.mid", 120.0, &[&notes]);

    let player = memory_player();
    let mut events = player
        .setup(path.to_str().unwrap(), &programs(&["0"]))
        .await
        .unwrap();
    assert_eq!(player.transport_state(), TransportState::Stopped);
    assert!((player.longest_track().unwrap().0 - 0.25).abs() < 1e-9);

    player.play().unwrap();
    assert_eq!(
        drain(&mut events).await,
        vec![LifecycleEvent::Started, LifecycleEvent::Stopped]
    );
    assert_eq!(player.transport_state(), TransportState::Released);
    assert_eq!(
        player.play().unwrap_err().kind(),
        ErrorKind::IllegalStateTransition
    );
}

#[tokio::test]
async fn test_pause_freezes_position_and_resume_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let notes = held_note(0, 64, 8);
    let path = write_midi(dir.path(), "long.mid", 120.0, &[&notes]);

    let player = memory_player();
    let mut events = player
        .setup(path.to_str().unwrap(), &programs(&["0"]))
        .await
        .unwrap();

    player.play().unwrap();
    assert_eq!(next_event(&mut events).await, Some(LifecycleEvent::Started));
    tokio::time::sleep(Duration::from_millis(30)).await;

    player.pause().unwrap();
    assert_eq!(next_event(&mut events).await, Some(LifecycleEvent::Paused));
    let frozen = player.position().unwrap();
    assert!(frozen.0 > 0.0);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(player.position().unwrap(), frozen);

    // Pausing twice is not a transition
    assert_eq!(
        player.pause().unwrap_err().kind(),
        ErrorKind::IllegalStateTransition
    );

    player.play().unwrap();
    assert_eq!(next_event(&mut events).await, Some(LifecycleEvent::Started));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(player.position().unwrap().0 > frozen.0);

    player.stop().unwrap();
    assert_eq!(drain(&mut events).await, vec![LifecycleEvent::Stopped]);
}

#[tokio::test]
async fn test_stop_rewinds_and_ends_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let notes = held_note(0, 64, 8);
    let path = write_midi(dir.path(), "long.mid", 120.0, &[&notes]);

    let player = memory_player();
    let mut events = player
        .setup(path.to_str().unwrap(), &programs(&["0"]))
        .await
        .unwrap();

    player.play().unwrap();
    assert_eq!(next_event(&mut events).await, Some(LifecycleEvent::Started));
    tokio::time::sleep(Duration::from_millis(30)).await;

    player.stop().unwrap();
    // The monitor has not run yet on this single-threaded runtime
    assert_eq!(player.transport_state(), TransportState::Stopped);
    assert_eq!(player.get_current_position().unwrap(), "0");

    assert_eq!(drain(&mut events).await, vec![LifecycleEvent::Stopped]);
    assert_eq!(player.transport_state(), TransportState::Released);
    assert!(matches!(
        player.play(),
        Err(PlayerError::IllegalState {
            state: TransportState::Released,
            ..
        })
    ));
}

#[tokio::test]
async fn test_play_right_after_stop_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let notes = held_note(0, 64, 8);
    let path = write_midi(dir.path(), "long.mid", 120.0, &[&notes]);

    let player = memory_player();
    let mut events = player
        .setup(path.to_str().unwrap(), &programs(&["0"]))
        .await
        .unwrap();

    player.play().unwrap();
    assert_eq!(next_event(&mut events).await, Some(LifecycleEvent::Started));

    player.stop().unwrap();
    // Before the monitor has had a chance to tick
    let err = player.play().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalStateTransition);
    assert_eq!(player.transport_state(), TransportState::Stopped);

    assert_eq!(drain(&mut events).await, vec![LifecycleEvent::Stopped]);
    assert_eq!(player.transport_state(), TransportState::Released);
}

#[tokio::test]
async fn test_downbeat_note_reaches_the_output() {
    let dir = tempfile::tempdir().unwrap();
    let notes = held_note(0, 60, 8);
    let path = write_midi(dir.path(), "downbeat.mid", 120.0, &[&notes]);

    let player = memory_player();
    let mut events = player
        .setup(path.to_str().unwrap(), &programs(&["0"]))
        .await
        .unwrap();
    let mut tap = player.take_output_tap().unwrap();
    assert_eq!(drain_peak(&mut tap), 0.0);

    player.play().unwrap();
    assert_eq!(next_event(&mut events).await, Some(LifecycleEvent::Started));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(drain_peak(&mut tap) > 0.0, "note at beat 0 was skipped");

    player.release().unwrap();
    assert_eq!(drain(&mut events).await, vec![LifecycleEvent::Stopped]);
}

#[tokio::test]
async fn test_note_on_seek_target_reaches_the_output() {
    let dir = tempfile::tempdir().unwrap();
    // Silent for four beats, then one beat of note
    let notes = [(4 * PPQ as u32, 0, 60, true), (PPQ as u32, 0, 60, false)];
    let path = write_midi(dir.path(), "late.mid", 120.0, &[&notes]);

    let player = memory_player();
    let mut events = player
        .setup(path.to_str().unwrap(), &programs(&["0"]))
        .await
        .unwrap();
    let mut tap = player.take_output_tap().unwrap();

    player.play().unwrap();
    assert_eq!(next_event(&mut events).await, Some(LifecycleEvent::Started));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(drain_peak(&mut tap), 0.0);

    // Beat 4 at 120 bpm
    player.seek_to("2000").unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(drain_peak(&mut tap) > 0.0, "note at the seek target was skipped");

    player.release().unwrap();
    assert_eq!(drain(&mut events).await, vec![LifecycleEvent::Stopped]);
}

#[tokio::test]
async fn test_release_while_playing() {
    let dir = tempfile::tempdir().unwrap();
    let notes = held_note(0, 64, 8);
    let path = write_midi(dir.path(), "long.mid", 120.0, &[&notes]);

    let player = memory_player();
    let mut events = player
        .setup(path.to_str().unwrap(), &programs(&["0"]))
        .await
        .unwrap();

    player.play().unwrap();
    assert_eq!(next_event(&mut events).await, Some(LifecycleEvent::Started));

    player.release().unwrap();
    assert_eq!(player.transport_state(), TransportState::Released);
    assert_eq!(
        player.play().unwrap_err().kind(),
        ErrorKind::IllegalStateTransition
    );
    assert_eq!(
        player.release().unwrap_err().kind(),
        ErrorKind::IllegalStateTransition
    );
    assert_eq!(drain(&mut events).await, vec![LifecycleEvent::Stopped]);
}

#[tokio::test]
async fn test_seek_moves_player_time_through_tempo_map() {
    let dir = tempfile::tempdir().unwrap();
    let notes = held_note(0, 64, 8);
    // 90 bpm: 1.5 beats per second
    let path = write_midi(dir.path(), "slow.mid", 90.0, &[&notes]);

    let player = memory_player();
    let _events = player
        .setup(path.to_str().unwrap(), &programs(&["0"]))
        .await
        .unwrap();

    // The file stores 666666 us per quarter, not exactly 90 bpm
    let expected = Sequence::load(&path, LoadMode::ChannelsToTracks)
        .unwrap()
        .beats_for_seconds(Second(2.0));
    assert!((expected.0 - 3.0).abs() < 1e-5);

    player.seek_to("2000").unwrap();
    assert!((player.position().unwrap().0 - expected.0).abs() < 1e-9);
    assert!((player.elapsed().unwrap().0 - 2.0).abs() < 1e-9);
    assert_eq!(player.transport_state(), TransportState::Stopped);

    for bad in ["soon", "-5", "NaN"] {
        assert_eq!(
            player.seek_to(bad).unwrap_err().kind(),
            ErrorKind::InvalidArguments,
            "{}",
            bad
        );
    }

    player.release().unwrap();
}

#[tokio::test]
async fn test_setup_twice_needs_release_between() {
    let dir = tempfile::tempdir().unwrap();
    let notes = held_note(0, 64, 4);
    let path = write_midi(dir.path(), "song.mid", 120.0, &[&notes]);
    let path = path.to_str().unwrap();

    let player = memory_player();
    let mut first = player.setup(path, &programs(&["0"])).await.unwrap();

    assert!(matches!(
        player.setup(path, &programs(&["0"])).await,
        Err(PlayerError::SessionActive)
    ));

    player.release().unwrap();
    assert_eq!(drain(&mut first).await, vec![LifecycleEvent::Stopped]);

    let mut second = player.setup(path, &programs(&["1"])).await.unwrap();
    assert_eq!(player.transport_state(), TransportState::Stopped);
    player.play().unwrap();
    assert_eq!(next_event(&mut second).await, Some(LifecycleEvent::Started));
    player.release().unwrap();
}

#[tokio::test]
async fn test_tracks_split_by_channel() {
    let dir = tempfile::tempdir().unwrap();
    let notes = [
        (0, 0, 60, true),
        (0, 1, 64, true),
        (0, 9, 36, true),
        (480, 0, 60, false),
        (0, 1, 64, false),
        (0, 9, 36, false),
    ];
    let path = write_midi(dir.path(), "mixed.mid", 120.0, &[&notes]);

    let player = memory_player();
    let _events = player
        .setup(path.to_str().unwrap(), &programs(&["0", "24"]))
        .await
        .unwrap();

    assert_eq!(player.track_count().unwrap(), 3);
    assert_eq!(player.mixer().unwrap().channel_count(), 2);
    player.release().unwrap();
}

#[tokio::test]
async fn test_missing_sound_bank() {
    let dir = tempfile::tempdir().unwrap();
    let notes = held_note(0, 64, 1);
    let path = write_midi(dir.path(), "song.mid", 120.0, &[&notes]);

    let config = PlayerConfig {
        soundbank_name: "absent.sf2".to_string(),
        soundbank_dirs: vec![dir.path().to_path_buf()],
        ..test_config()
    };
    let player = MidiPlayer::new(config);

    let err = player
        .setup(path.to_str().unwrap(), &programs(&["0"]))
        .await
        .unwrap_err();
    assert!(matches!(err, PlayerError::MissingSoundBank(_)));
    assert_eq!(err.kind(), ErrorKind::MissingResource);
    assert_eq!(player.transport_state(), TransportState::Released);
}

#[tokio::test]
async fn test_missing_preset_fails_setup() {
    let dir = tempfile::tempdir().unwrap();
    let notes = held_note(0, 64, 1);
    let path = write_midi(dir.path(), "song.mid", 120.0, &[&notes]);

    let player = MidiPlayer::with_bank_provider(
        test_config(),
        Arc::new(MemoryBank::with_programs("piano only", [0])),
    );

    let err = player
        .setup(path.to_str().unwrap(), &programs(&["0", "40"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NativeResource);
    assert_eq!(player.transport_state(), TransportState::Released);

    // The failed attempt left nothing behind
    let _events = player
        .setup(path.to_str().unwrap(), &programs(&["0"]))
        .await
        .unwrap();
    player.release().unwrap();
}

#[tokio::test]
async fn test_unreadable_file_fails_setup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.mid");
    std::fs::write(&path, b"not a midi file").unwrap();

    let player = memory_player();
    let err = player
        .setup(path.to_str().unwrap(), &programs(&["0"]))
        .await
        .unwrap_err();
    assert!(matches!(err, PlayerError::Sequence(_)));
}
