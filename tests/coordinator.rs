//! End-to-end coordinator tests against the scripted driver and encoder.

use multicam::capture::mock::{MockDriver, MockEncoder};
use multicam::recorder::{CameraEvent, CameraSpec, CoordinatorConfig, SessionCoordinator};
use multicam::{CoordinatorHandle, SessionState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

fn config() -> CoordinatorConfig {
    CoordinatorConfig {
        output_dir: "/videos".to_string(),
        ..CoordinatorConfig::default()
    }
}

fn spawn(
    config: CoordinatorConfig,
    cameras: &[CameraSpec],
) -> (CoordinatorHandle, Arc<MockDriver>, Arc<MockEncoder>) {
    let driver = MockDriver::new();
    let encoder = MockEncoder::new();
    let handle = SessionCoordinator::spawn(config, cameras, driver.clone(), encoder.clone());
    (handle, driver, encoder)
}

fn two_cameras() -> Vec<CameraSpec> {
    vec![
        CameraSpec::new("front", "cam-0"),
        CameraSpec::new("back", "cam-1"),
    ]
}

/// Let every in-flight message round-trip without advancing the paused
/// clock.
async fn settle() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}

fn drain(rx: &mut broadcast::Receiver<CameraEvent>) -> Vec<CameraEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn test_open_all_dedupes_physical_ids_and_caps() {
    let cameras = vec![
        CameraSpec::new("front", "cam-0"),
        CameraSpec::new("left", "cam-2"),
        CameraSpec::new("right", "cam-2"),
        CameraSpec::new("back", "cam-1"),
    ];
    let (handle, driver, _encoder) = spawn(config(), &cameras);

    let retained = handle.open_all(&["front", "left", "right", "back"]).await;
    assert_eq!(retained, vec!["front", "left", "back"]);
    settle().await;

    // the duplicate key never touched the driver
    assert_eq!(driver.open_count("cam-2"), 1);
    assert_eq!(driver.open_physical_ids().len(), 3);
    assert_eq!(handle.session_state("front"), Some(SessionState::Previewing));
    assert_eq!(handle.session_state("left"), Some(SessionState::Previewing));
    assert_eq!(handle.session_state("right"), Some(SessionState::Closed));
    assert_eq!(handle.connected_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_open_all_respects_device_cap() {
    let cameras = vec![
        CameraSpec::new("a", "cam-0"),
        CameraSpec::new("b", "cam-1"),
        CameraSpec::new("c", "cam-2"),
    ];
    let config = CoordinatorConfig {
        max_open_devices: 2,
        ..config()
    };
    let (handle, driver, _encoder) = spawn(config, &cameras);

    let retained = handle.open_all(&["a", "b", "c"]).await;
    assert_eq!(retained, vec!["a", "b"]);
    settle().await;
    assert_eq!(driver.open_count("cam-2"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_synchronized_start_waits_for_every_session() {
    let (handle, driver, encoder) = spawn(config(), &two_cameras());
    let mut events = handle.subscribe();
    handle.open_all(&["front", "back"]).await;
    settle().await;
    drain(&mut events);

    assert!(handle.start_recording().await);
    settle().await;

    assert!(handle.is_recording());
    assert_eq!(handle.session_state("front"), Some(SessionState::Recording));
    assert_eq!(handle.session_state("back"), Some(SessionState::Recording));
    // no sink started before both sessions reconfigured
    assert_eq!(encoder.recording_count(), 2);
    assert_eq!(encoder.started_count(), 2);
    // each device got a second, record-capable session
    assert_eq!(driver.session_count("cam-0"), 2);
    assert_eq!(driver.session_count("cam-1"), 2);

    let events = drain(&mut events);
    assert!(events
        .iter()
        .any(|event| matches!(event, CameraEvent::RecordingStarted)));
}

#[tokio::test(start_paused = true)]
async fn test_start_requires_active_cameras_and_rejects_double_start() {
    let (handle, _driver, _encoder) = spawn(config(), &two_cameras());
    assert!(!handle.start_recording().await);

    handle.open_all(&["front", "back"]).await;
    settle().await;
    assert!(handle.start_recording().await);
    settle().await;
    assert!(!handle.start_recording().await);
}

#[tokio::test(start_paused = true)]
async fn test_prepare_failure_rolls_back_every_sink() {
    let (handle, _driver, encoder) = spawn(config(), &two_cameras());
    handle.open_all(&["front", "back"]).await;
    settle().await;

    encoder.fail_prepare("back", multicam::CameraError::DriverServiceFault, 1);
    assert!(!handle.start_recording().await);
    settle().await;

    assert!(!handle.is_recording());
    // the sink prepared before the failure was released again
    assert_eq!(encoder.live_count(), 0);
    assert_eq!(handle.session_state("front"), Some(SessionState::Previewing));
    assert_eq!(handle.session_state("back"), Some(SessionState::Previewing));
}

#[tokio::test(start_paused = true)]
async fn test_encoder_start_failure_drops_that_camera_to_preview() {
    let (handle, _driver, encoder) = spawn(config(), &two_cameras());
    let mut events = handle.subscribe();
    handle.open_all(&["front", "back"]).await;
    settle().await;
    drain(&mut events);

    encoder.fail_start("back", multicam::CameraError::DriverServiceFault, 1);
    assert!(handle.start_recording().await);
    settle().await;

    // the recording runs with the camera that did start
    assert!(handle.is_recording());
    assert_eq!(handle.session_state("front"), Some(SessionState::Recording));
    assert_eq!(encoder.recording_count(), 1);

    // the failed camera fell back to preview; nothing points at the
    // released target
    assert_eq!(handle.session_state("back"), Some(SessionState::Previewing));
    assert_eq!(encoder.live_count(), 1);
    let events = drain(&mut events);
    assert!(events.iter().any(|event| matches!(
        event,
        CameraEvent::Error { key, .. } if key == "back"
    )));
}

#[tokio::test(start_paused = true)]
async fn test_open_all_while_recording_stops_it_first() {
    let (handle, _driver, encoder) = spawn(config(), &two_cameras());
    handle.open_all(&["front", "back"]).await;
    settle().await;
    assert!(handle.start_recording().await);
    settle().await;
    assert!(handle.is_recording());

    let retained = handle.open_all(&["front"]).await;
    assert_eq!(retained, vec!["front"]);
    settle().await;

    // the previous recording's sinks were finalized, not leaked
    assert!(!handle.is_recording());
    assert_eq!(encoder.recording_count(), 0);
    assert_eq!(encoder.live_count(), 0);
    assert_eq!(handle.session_state("front"), Some(SessionState::Previewing));
}

#[tokio::test(start_paused = true)]
async fn test_all_configures_failing_abandons_the_start() {
    let (handle, driver, encoder) = spawn(config(), &two_cameras());
    handle.open_all(&["front", "back"]).await;
    settle().await;

    driver.fail_configure("cam-0", multicam::CameraError::SessionConfigureFailed, 1);
    driver.fail_configure("cam-1", multicam::CameraError::SessionConfigureFailed, 1);
    assert!(handle.start_recording().await);
    settle().await;

    assert!(!handle.is_recording());
    // no sink is left holding encoder resources
    assert_eq!(encoder.live_count(), 0);
    assert_eq!(encoder.recording_count(), 0);
    assert_eq!(handle.session_state("front"), Some(SessionState::Error));
    assert_eq!(handle.session_state("back"), Some(SessionState::Error));
    // the failed sessions released their devices and the snapshot agrees
    assert_eq!(handle.connected_count(), 0);
    assert!(driver.open_physical_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_starts_the_ready_subset() {
    let cameras = vec![
        CameraSpec::new("front", "cam-0"),
        CameraSpec::new("back", "cam-1"),
        CameraSpec::new("left", "cam-2"),
        CameraSpec::new("right", "cam-3"),
    ];
    let (handle, driver, encoder) = spawn(config(), &cameras);
    handle.open_all(&["front", "back", "left", "right"]).await;
    settle().await;

    driver.hang_configure("cam-3");
    assert!(handle.start_recording().await);
    settle().await;

    // three sessions are ready, one never configures; nothing starts yet
    assert!(!handle.is_recording());
    assert_eq!(encoder.recording_count(), 0);

    time::sleep(Duration::from_millis(3100)).await;
    settle().await;

    assert!(handle.is_recording());
    assert_eq!(handle.session_state("front"), Some(SessionState::Recording));
    assert_eq!(handle.session_state("back"), Some(SessionState::Recording));
    assert_eq!(handle.session_state("left"), Some(SessionState::Recording));
    assert_eq!(encoder.recording_count(), 3);
    // the straggler's sink was released, only started targets stay live
    assert_eq!(encoder.live_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_pending_start_cancels_the_barrier() {
    let (handle, driver, encoder) = spawn(config(), &two_cameras());
    handle.open_all(&["front", "back"]).await;
    settle().await;

    driver.hang_configure("cam-0");
    driver.hang_configure("cam-1");
    assert!(handle.start_recording().await);
    settle().await;

    handle.stop_recording().await;
    settle().await;
    assert!(!handle.is_recording());
    assert_eq!(encoder.live_count(), 0);

    // the timeout firing later must not start anything
    time::sleep(Duration::from_millis(3100)).await;
    settle().await;
    assert!(!handle.is_recording());
    assert_eq!(encoder.recording_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_finalizes_sinks_and_returns_to_preview() {
    let (handle, _driver, encoder) = spawn(config(), &two_cameras());
    let mut events = handle.subscribe();
    handle.open_all(&["front", "back"]).await;
    settle().await;
    assert!(handle.start_recording().await);
    settle().await;
    assert!(handle.is_recording());
    drain(&mut events);

    handle.stop_recording().await;
    settle().await;

    assert!(!handle.is_recording());
    assert_eq!(encoder.recording_count(), 0);
    assert_eq!(encoder.live_count(), 0);
    assert_eq!(handle.session_state("front"), Some(SessionState::Previewing));
    assert_eq!(handle.session_state("back"), Some(SessionState::Previewing));
    let events = drain(&mut events);
    assert!(events
        .iter()
        .any(|event| matches!(event, CameraEvent::RecordingStopped)));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_exhaustion_until_manual_reconnect() {
    let cameras = vec![CameraSpec::new("front", "cam-0")];
    let config = CoordinatorConfig {
        max_reconnect_attempts: 2,
        ..config()
    };
    let (handle, driver, _encoder) = spawn(config, &cameras);

    driver.fail_open("cam-0", multicam::CameraError::DeviceBusy, 3);
    handle.open_all(&["front"]).await;
    settle().await;
    assert_eq!(
        handle.session_state("front"),
        Some(SessionState::Reconnecting)
    );

    time::sleep(Duration::from_millis(2100)).await;
    settle().await;
    assert_eq!(
        handle.session_state("front"),
        Some(SessionState::Reconnecting)
    );

    time::sleep(Duration::from_millis(2100)).await;
    settle().await;
    assert_eq!(handle.session_state("front"), Some(SessionState::GivenUp));
    assert_eq!(driver.open_count("cam-0"), 3);

    // no further attempts happen on their own
    time::sleep(Duration::from_millis(10_000)).await;
    settle().await;
    assert_eq!(driver.open_count("cam-0"), 3);

    // an explicit reconnect resets the budget and succeeds
    assert!(handle.reconnect("front").await);
    settle().await;
    assert_eq!(handle.session_state("front"), Some(SessionState::Previewing));
    assert_eq!(driver.open_count("cam-0"), 4);
}

#[tokio::test(start_paused = true)]
async fn test_terminal_error_does_not_reconnect() {
    let cameras = vec![CameraSpec::new("front", "cam-0")];
    let (handle, driver, _encoder) = spawn(config(), &cameras);

    driver.fail_open("cam-0", multicam::CameraError::PermissionDenied, 1);
    handle.open_all(&["front"]).await;
    settle().await;
    assert_eq!(handle.session_state("front"), Some(SessionState::Error));

    time::sleep(Duration::from_millis(10_000)).await;
    settle().await;
    assert_eq!(driver.open_count("cam-0"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_mid_recording_reconnects_and_resumes() {
    let cameras = vec![CameraSpec::new("front", "cam-0")];
    let (handle, driver, encoder) = spawn(config(), &cameras);
    handle.open_all(&["front"]).await;
    settle().await;
    assert!(handle.start_recording().await);
    settle().await;
    assert!(handle.is_recording());

    driver.emit_disconnected("cam-0");
    settle().await;
    assert_eq!(
        handle.session_state("front"),
        Some(SessionState::Reconnecting)
    );

    time::sleep(Duration::from_millis(2100)).await;
    settle().await;
    // the record target is still attached, so the session resumes recording
    assert_eq!(handle.session_state("front"), Some(SessionState::Recording));
    assert_eq!(encoder.recording_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_segment_rotation_touches_only_its_own_camera() {
    let (handle, driver, encoder) = spawn(config(), &two_cameras());
    let mut events = handle.subscribe();
    handle.open_all(&["front", "back"]).await;
    settle().await;
    assert!(handle.start_recording().await);
    settle().await;
    drain(&mut events);

    let front_target = encoder.target_for("front").unwrap();
    let back_target = encoder.target_for("back").unwrap();
    let back_sessions = driver.session_count("cam-1");

    encoder.emit_segment_limit(front_target);
    settle().await;

    // front rotated to a fresh target and is encoding again
    assert!(!encoder.is_encoding(front_target));
    let rotated = encoder.target_for("front_seg001").unwrap();
    assert!(encoder.is_encoding(rotated));
    assert_eq!(handle.session_state("front"), Some(SessionState::Recording));
    assert!(handle.is_recording());

    // back never stopped and its session was not rebuilt
    assert!(encoder.is_encoding(back_target));
    assert_eq!(driver.session_count("cam-1"), back_sessions);

    let paths = encoder.prepared_paths();
    assert!(paths
        .iter()
        .any(|path| path.to_string_lossy().ends_with("_front_seg001.mp4")));

    let events = drain(&mut events);
    assert!(events.iter().any(|event| matches!(
        event,
        CameraEvent::SegmentSwitch { key, segment_index: 1 } if key == "front"
    )));
}

#[tokio::test(start_paused = true)]
async fn test_take_picture_staggers_captures() {
    let cameras = vec![
        CameraSpec::new("front", "cam-0"),
        CameraSpec::new("left", "cam-1"),
        CameraSpec::new("back", "cam-2"),
    ];
    let (handle, driver, _encoder) = spawn(config(), &cameras);
    let mut events = handle.subscribe();
    handle.open_all(&["front", "left", "back"]).await;
    settle().await;
    drain(&mut events);

    let base = time::Instant::now();
    assert_eq!(handle.take_picture().await, 3);
    time::sleep(Duration::from_millis(700)).await;
    settle().await;

    let times = driver.still_capture_times();
    assert_eq!(times.len(), 3);
    assert_eq!(times[0] - base, Duration::from_millis(0));
    assert_eq!(times[1] - base, Duration::from_millis(300));
    assert_eq!(times[2] - base, Duration::from_millis(600));

    let captured = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, CameraEvent::StillCaptured { .. }))
        .count();
    assert_eq!(captured, 3);
}

#[tokio::test(start_paused = true)]
async fn test_take_picture_skips_disconnected_cameras() {
    let (handle, driver, _encoder) = spawn(config(), &two_cameras());
    handle.open_all(&["front", "back"]).await;
    settle().await;

    driver.emit_disconnected("cam-1");
    settle().await;

    assert_eq!(handle.take_picture().await, 2);
    time::sleep(Duration::from_millis(700)).await;
    settle().await;
    // only the connected camera actually captured
    assert_eq!(driver.still_capture_times().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_all_tears_everything_down() {
    let (handle, driver, encoder) = spawn(config(), &two_cameras());
    handle.open_all(&["front", "back"]).await;
    settle().await;
    assert!(handle.start_recording().await);
    settle().await;

    handle.close_all().await;
    settle().await;

    assert!(!handle.is_recording());
    assert!(handle.active_keys().is_empty());
    assert_eq!(handle.session_state("front"), Some(SessionState::Closed));
    assert_eq!(handle.session_state("back"), Some(SessionState::Closed));
    assert!(driver.open_physical_ids().is_empty());
    assert_eq!(encoder.live_count(), 0);
}
