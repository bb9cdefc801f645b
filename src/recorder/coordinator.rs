//! Session coordinator
//!
//! Owns the keyed collections of device sessions and recording sinks and
//! drives the synchronized start/stop-recording barrier. The coordinator
//! runs as a single task; device completions, driver events, and timer
//! expirations are all marshalled into its queue, so barrier state is never
//! touched from two tasks at once.

use super::sink::RecordingSink;
use super::state::{CameraEvent, CameraSpec, CameraStatus, CoordinatorConfig, RecorderStatus};
use crate::capture::{CaptureDriver, DeviceHandle, DriverEvent, EncoderBackend, EncoderEvent, OutputTarget, TargetArena};
use crate::error::CameraError;
use crate::session::{DeviceSession, RecoveryAction, SessionEvent, SessionState};
use chrono::Local;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;

enum Command {
    OpenAll {
        keys: Vec<String>,
        reply: oneshot::Sender<Vec<String>>,
    },
    StartRecording {
        reply: oneshot::Sender<bool>,
    },
    StopRecording {
        reply: oneshot::Sender<()>,
    },
    TakePicture {
        reply: oneshot::Sender<usize>,
    },
    Reconnect {
        key: String,
        reply: oneshot::Sender<bool>,
    },
    CloseAll {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

enum Internal {
    BarrierTimeout { barrier_id: u64 },
    CaptureDue { key: String },
    Driver(DriverEvent),
    Encoder(EncoderEvent),
}

/// Pending synchronized recording start: released once every expected
/// session has reconfigured (or failed out), or when the timeout fires.
struct StartBarrier {
    id: u64,
    expected: usize,
    configured: usize,
    keys: Vec<String>,
    ready: HashSet<String>,
    failed: HashSet<String>,
    timeout: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BarrierStep {
    Untouched,
    Resolve,
    Abandon,
}

/// Coordinates N device sessions and their recording sinks.
pub struct SessionCoordinator {
    config: CoordinatorConfig,
    sessions: HashMap<String, DeviceSession>,
    sinks: HashMap<String, RecordingSink>,
    active_keys: Vec<String>,
    is_recording: bool,
    barrier: Option<StartBarrier>,
    barrier_seq: u64,
    pending_segment_restart: HashSet<String>,
    events_tx: broadcast::Sender<CameraEvent>,
    status: Arc<RwLock<RecorderStatus>>,
    internal_tx: mpsc::UnboundedSender<Internal>,
}

/// Cloneable handle to a running coordinator task.
#[derive(Clone)]
pub struct CoordinatorHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    events_tx: broadcast::Sender<CameraEvent>,
    status: Arc<RwLock<RecorderStatus>>,
}

impl SessionCoordinator {
    /// Build the sessions and sinks for `cameras` and spawn the coordinator
    /// task. The returned handle is the only way to talk to it.
    pub fn spawn(
        config: CoordinatorConfig,
        cameras: &[CameraSpec],
        driver: Arc<dyn CaptureDriver>,
        encoder: Arc<dyn EncoderBackend>,
    ) -> CoordinatorHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(256);
        let status = Arc::new(RwLock::new(RecorderStatus::default()));
        let arena = TargetArena::new();

        let mut sessions = HashMap::new();
        let mut sinks = HashMap::new();
        for spec in cameras {
            sessions.insert(
                spec.key.clone(),
                DeviceSession::new(
                    spec.key.clone(),
                    spec.physical_id.clone(),
                    Arc::clone(&driver),
                    arena.clone(),
                    session_tx.clone(),
                    config.retry_policy(),
                ),
            );
            sinks.insert(
                spec.key.clone(),
                RecordingSink::new(
                    spec.key.clone(),
                    config.record_width,
                    config.record_height,
                    Arc::clone(&encoder),
                ),
            );
        }
        tracing::info!("coordinator configured with {} camera(s)", sessions.len());

        // marshal spontaneous driver/encoder events onto the coordinator task
        let mut driver_events = driver.events();
        let tx = internal_tx.clone();
        tokio::spawn(async move {
            loop {
                match driver_events.recv().await {
                    Ok(event) => {
                        if tx.send(Internal::Driver(event)).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("driver event stream lagged, {skipped} event(s) dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        let mut encoder_events = encoder.events();
        let tx = internal_tx.clone();
        tokio::spawn(async move {
            loop {
                match encoder_events.recv().await {
                    Ok(event) => {
                        if tx.send(Internal::Encoder(event)).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("encoder event stream lagged, {skipped} event(s) dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let coordinator = Self {
            config,
            sessions,
            sinks,
            active_keys: Vec::new(),
            is_recording: false,
            barrier: None,
            barrier_seq: 0,
            pending_segment_restart: HashSet::new(),
            events_tx: events_tx.clone(),
            status: Arc::clone(&status),
            internal_tx,
        };
        tokio::spawn(coordinator.run(cmd_rx, session_rx, internal_rx));

        CoordinatorHandle {
            cmd_tx,
            events_tx,
            status,
        }
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut session_rx: mpsc::UnboundedReceiver<SessionEvent>,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        if !self.handle_command(cmd) {
                            break;
                        }
                    }
                    // all handles dropped
                    None => break,
                },
                Some(event) = session_rx.recv() => self.handle_session_event(event),
                Some(msg) = internal_rx.recv() => self.handle_internal(msg),
                else => break,
            }
            self.publish_status();
        }
        self.close_all();
        self.publish_status();
        tracing::debug!("coordinator task stopped");
    }

    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::OpenAll { keys, reply } => {
                let retained = self.open_all(&keys);
                let _ = reply.send(retained);
            }
            Command::StartRecording { reply } => {
                let _ = reply.send(self.start_recording());
            }
            Command::StopRecording { reply } => {
                self.stop_recording();
                let _ = reply.send(());
            }
            Command::TakePicture { reply } => {
                let _ = reply.send(self.take_picture());
            }
            Command::Reconnect { key, reply } => {
                let _ = reply.send(self.reconnect(&key));
            }
            Command::CloseAll { reply } => {
                self.close_all();
                let _ = reply.send(());
            }
            Command::Shutdown => return false,
        }
        true
    }

    /// Open the requested cameras, deduplicated by physical id (the first
    /// key wins) and capped at `max_open_devices`. Skipped keys are neither
    /// opened nor tracked as active.
    fn open_all(&mut self, requested: &[String]) -> Vec<String> {
        if self.is_recording || self.barrier.is_some() {
            tracing::warn!("open requested while recording, stopping the current recording");
            self.stop_recording();
        }
        self.active_keys.clear();
        let mut seen_physical = HashSet::new();
        for key in requested {
            if self.active_keys.len() >= self.config.max_open_devices {
                tracing::warn!(
                    "device cap {} reached, skipping remaining keys",
                    self.config.max_open_devices
                );
                break;
            }
            let Some(session) = self.sessions.get_mut(key) else {
                tracing::warn!("camera {key} is not configured, skipping");
                continue;
            };
            if !seen_physical.insert(session.physical_id().to_string()) {
                tracing::debug!(
                    "camera {key} shares physical device {} with an active key, skipping",
                    session.physical_id()
                );
                continue;
            }
            self.active_keys.push(key.clone());
            session.open();
        }
        tracing::info!("requested open cameras: {:?}", self.active_keys);
        self.active_keys.clone()
    }

    /// Prepare every active sink, attach targets, and arm the start
    /// barrier. Atomic: if any sink fails to prepare, everything already
    /// prepared is released and no recording state is left behind.
    fn start_recording(&mut self) -> bool {
        if self.is_recording {
            tracing::warn!("already recording");
            return false;
        }
        if self.barrier.is_some() {
            tracing::warn!("a recording start is already pending");
            return false;
        }
        if self.active_keys.is_empty() {
            tracing::error!("no active cameras for recording");
            return false;
        }

        // one timestamp for the whole batch so files group together
        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let output_dir = PathBuf::from(&self.config.output_dir);
        let keys = self.active_keys.clone();
        tracing::info!("starting recording with timestamp {timestamp}");

        for key in &keys {
            let Some(sink) = self.sinks.get_mut(key) else {
                continue;
            };
            if let Err(error) = sink.prepare(&output_dir, &timestamp) {
                tracing::error!("failed to prepare recording for camera {key}: {error}");
                for k in &keys {
                    if let Some(sink) = self.sinks.get_mut(k) {
                        sink.release();
                    }
                }
                return false;
            }
        }

        for key in &keys {
            let target = self.sinks.get(key).and_then(|sink| sink.target());
            if let Some(session) = self.sessions.get_mut(key) {
                if let Some(target) = target {
                    session.attach_record_target(target);
                }
                session.recreate_session();
            }
        }

        self.barrier_seq += 1;
        let barrier_id = self.barrier_seq;
        let timeout = self.config.barrier_timeout();
        let tx = self.internal_tx.clone();
        let handle = tokio::spawn(async move {
            time::sleep(timeout).await;
            let _ = tx.send(Internal::BarrierTimeout { barrier_id });
        });
        self.barrier = Some(StartBarrier {
            id: barrier_id,
            expected: keys.len(),
            configured: 0,
            keys,
            ready: HashSet::new(),
            failed: HashSet::new(),
            timeout: handle,
        });
        true
    }

    /// Cancel any pending start, release every sink, and drop every session
    /// back to preview-only. Idempotent.
    fn stop_recording(&mut self) {
        tracing::debug!("stop recording requested, is_recording={}", self.is_recording);
        if let Some(barrier) = self.barrier.take() {
            tracing::debug!("cancelling pending recording start");
            barrier.timeout.abort();
        }
        self.pending_segment_restart.clear();

        let keys = self.active_keys.clone();
        for key in &keys {
            if let Some(sink) = self.sinks.get_mut(key) {
                sink.release();
            }
        }
        for key in &keys {
            if let Some(session) = self.sessions.get_mut(key) {
                if session.has_record_target() {
                    session.detach_record_target();
                    session.recreate_session();
                }
            }
        }
        if self.is_recording {
            self.emit(CameraEvent::RecordingStopped);
            tracing::info!("all cameras stopped recording");
        }
        self.is_recording = false;
    }

    /// Issue still captures across the active cameras, staggered to respect
    /// the hardware concurrency ceiling. Returns how many were scheduled.
    fn take_picture(&mut self) -> usize {
        if self.active_keys.is_empty() {
            tracing::error!("no active cameras for taking picture");
            return 0;
        }
        let stagger = self.config.capture_stagger();
        for (i, key) in self.active_keys.iter().enumerate() {
            let delay = stagger * i as u32;
            let key = key.clone();
            let tx = self.internal_tx.clone();
            tokio::spawn(async move {
                time::sleep(delay).await;
                let _ = tx.send(Internal::CaptureDue { key });
            });
        }
        self.active_keys.len()
    }

    fn reconnect(&mut self, key: &str) -> bool {
        let Some(session) = self.sessions.get_mut(key) else {
            tracing::warn!("reconnect requested for unknown camera {key}");
            return false;
        };
        tracing::info!("manual reconnect for camera {key}");
        session.reconnect();
        true
    }

    fn close_all(&mut self) {
        self.stop_recording();
        let keys: Vec<String> = self.sessions.keys().cloned().collect();
        for key in &keys {
            if let Some(session) = self.sessions.get_mut(key) {
                session.close();
            }
        }
        for sink in self.sinks.values_mut() {
            sink.release();
        }
        for key in &keys {
            self.emit_status(key, CameraStatus::Closed);
        }
        self.active_keys.clear();
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::OpenResolved { key, epoch, result } => {
                let current = self
                    .sessions
                    .get(&key)
                    .map_or(false, |session| session.epoch_matches(epoch));
                if !current {
                    tracing::debug!("camera {key}: stale open completion dropped");
                    return;
                }
                match result {
                    Ok(device) => {
                        if let Some(session) = self.sessions.get_mut(&key) {
                            session.handle_opened(device);
                        }
                        self.emit_status(&key, CameraStatus::Opened);
                    }
                    Err(error) => {
                        self.emit_error(&key, error);
                        self.handle_session_failure(&key, error);
                    }
                }
            }
            SessionEvent::ConfigureResolved { key, epoch, result } => {
                let current = self
                    .sessions
                    .get(&key)
                    .map_or(false, |session| session.epoch_matches(epoch));
                if !current {
                    tracing::debug!("camera {key}: stale configure completion dropped");
                    return;
                }
                match result {
                    Ok(handle) => {
                        let recording = match self.sessions.get_mut(&key) {
                            Some(session) => {
                                session.handle_configured(handle);
                                session.state() == SessionState::Recording
                            }
                            None => return,
                        };
                        self.emit_status(
                            &key,
                            if recording {
                                CameraStatus::Recording
                            } else {
                                CameraStatus::PreviewStarted
                            },
                        );
                        self.on_session_configured(&key);
                    }
                    Err(error) => {
                        if let Some(session) = self.sessions.get_mut(&key) {
                            session.handle_configure_failed();
                        }
                        tracing::debug!("camera {key}: configure failed: {error}");
                        self.emit_error(&key, CameraError::SessionConfigureFailed);
                        self.on_session_configure_failed(&key);
                    }
                }
            }
            SessionEvent::ReconnectDue { key, epoch } => {
                if let Some(session) = self.sessions.get_mut(&key) {
                    session.handle_reconnect_due(epoch);
                }
            }
            SessionEvent::StillResolved { key, result } => match result {
                Ok(frame) => {
                    tracing::debug!(
                        "camera {key}: still frame captured ({}x{})",
                        frame.width,
                        frame.height
                    );
                    self.emit(CameraEvent::StillCaptured { key });
                }
                Err(error) => {
                    tracing::warn!("camera {key}: still capture failed: {error}");
                    self.emit_error(&key, error);
                }
            },
        }
    }

    fn handle_internal(&mut self, msg: Internal) {
        match msg {
            Internal::BarrierTimeout { barrier_id } => {
                if self.barrier.as_ref().map(|barrier| barrier.id) != Some(barrier_id) {
                    return;
                }
                tracing::warn!(
                    "session configuration timeout, starting recording with available cameras"
                );
                if let Some(barrier) = self.barrier.take() {
                    self.launch_recording(&barrier.keys, &barrier.ready);
                }
            }
            Internal::CaptureDue { key } => match self.sessions.get(&key) {
                Some(session) if session.is_connected() => {
                    tracing::debug!("taking picture with camera {key}");
                    session.take_still();
                }
                _ => tracing::warn!("camera {key} not available for taking picture"),
            },
            Internal::Driver(DriverEvent::Disconnected { device }) => {
                self.handle_device_failure(device, CameraError::DeviceDisconnected);
            }
            Internal::Driver(DriverEvent::Fault { device, error }) => {
                self.handle_device_failure(device, error);
            }
            Internal::Encoder(EncoderEvent::SegmentLimitReached { target }) => {
                self.handle_segment_limit(target);
            }
        }
    }

    fn handle_device_failure(&mut self, device: DeviceHandle, error: CameraError) {
        let Some(key) = self
            .sessions
            .iter()
            .find(|(_, session)| session.device_handle() == Some(device))
            .map(|(key, _)| key.clone())
        else {
            tracing::debug!("event for unknown device handle {device:?} dropped");
            return;
        };
        self.emit_error(&key, error);
        self.handle_session_failure(&key, error);
    }

    fn handle_session_failure(&mut self, key: &str, error: CameraError) {
        let action = match self.sessions.get_mut(key) {
            Some(session) => session.fail(error),
            None => return,
        };
        match action {
            RecoveryAction::Scheduled { attempt } => {
                self.emit_status(key, CameraStatus::Reconnecting { attempt });
            }
            RecoveryAction::GaveUp => {
                self.emit_status(key, CameraStatus::GivenUp);
            }
            RecoveryAction::Terminal => {}
        }
        // a session that failed outright can no longer satisfy the barrier
        match self.note_barrier_failure(key) {
            BarrierStep::Resolve => self.resolve_barrier(),
            BarrierStep::Abandon => self.abandon_barrier(),
            BarrierStep::Untouched => {}
        }
    }

    fn on_session_configured(&mut self, key: &str) {
        // a sink waiting on segment rotation resumes as soon as its session
        // is back on the new target
        if self.pending_segment_restart.remove(key) {
            match self.sinks.get_mut(key).map(|sink| sink.start()) {
                Some(Ok(())) => {
                    tracing::debug!("camera {key}: next segment recording started");
                }
                Some(Err(error)) => {
                    tracing::warn!("camera {key}: failed to resume after segment switch");
                    self.emit_error(key, error);
                    if let Some(session) = self.sessions.get_mut(key) {
                        session.detach_record_target();
                        session.recreate_session();
                    }
                }
                None => {}
            }
        }
        match self.note_barrier_configured(key) {
            BarrierStep::Resolve => self.resolve_barrier(),
            BarrierStep::Abandon => self.abandon_barrier(),
            BarrierStep::Untouched => {}
        }
    }

    fn on_session_configure_failed(&mut self, key: &str) {
        if self.pending_segment_restart.remove(key) {
            tracing::warn!("camera {key}: session lost during segment rotation, dropping its recording");
            if let Some(sink) = self.sinks.get_mut(key) {
                sink.release();
            }
            if let Some(session) = self.sessions.get_mut(key) {
                session.detach_record_target();
            }
        }
        match self.note_barrier_failure(key) {
            BarrierStep::Resolve => self.resolve_barrier(),
            BarrierStep::Abandon => self.abandon_barrier(),
            BarrierStep::Untouched => {}
        }
    }

    fn note_barrier_configured(&mut self, key: &str) -> BarrierStep {
        let Some(barrier) = self.barrier.as_mut() else {
            return BarrierStep::Untouched;
        };
        if !barrier.keys.iter().any(|k| k == key) {
            return BarrierStep::Untouched;
        }
        if !barrier.ready.insert(key.to_string()) {
            return BarrierStep::Untouched;
        }
        barrier.configured += 1;
        tracing::debug!(
            "session configured: {}/{}",
            barrier.configured,
            barrier.expected
        );
        if barrier.configured >= barrier.expected {
            BarrierStep::Resolve
        } else {
            BarrierStep::Untouched
        }
    }

    fn note_barrier_failure(&mut self, key: &str) -> BarrierStep {
        let Some(barrier) = self.barrier.as_mut() else {
            return BarrierStep::Untouched;
        };
        if !barrier.keys.iter().any(|k| k == key) || barrier.ready.contains(key) {
            return BarrierStep::Untouched;
        }
        if !barrier.failed.insert(key.to_string()) {
            return BarrierStep::Untouched;
        }
        barrier.expected = barrier.expected.saturating_sub(1);
        tracing::debug!(
            "session failed during start, adjusted expected count: {}/{}",
            barrier.configured,
            barrier.expected
        );
        if barrier.expected == 0 {
            BarrierStep::Abandon
        } else if barrier.configured >= barrier.expected {
            BarrierStep::Resolve
        } else {
            BarrierStep::Untouched
        }
    }

    fn resolve_barrier(&mut self) {
        let Some(barrier) = self.barrier.take() else {
            return;
        };
        barrier.timeout.abort();
        tracing::debug!("all expected sessions configured, starting recording");
        self.launch_recording(&barrier.keys, &barrier.ready);
    }

    fn abandon_barrier(&mut self) {
        let Some(barrier) = self.barrier.take() else {
            return;
        };
        barrier.timeout.abort();
        tracing::error!("all sessions failed to configure, abandoning recording start");
        for key in &barrier.keys {
            if let Some(sink) = self.sinks.get_mut(key) {
                sink.release();
            }
            if let Some(session) = self.sessions.get_mut(key) {
                session.detach_record_target();
            }
        }
        self.is_recording = false;
    }

    /// Release the pending begin action: start every sink whose session
    /// reconfigured in time. Sinks of sessions that never made it are
    /// released and those sessions fall back to preview; a session that
    /// configures after this point is not added to the recording.
    fn launch_recording(&mut self, keys: &[String], ready: &HashSet<String>) {
        for key in keys {
            if ready.contains(key) {
                continue;
            }
            tracing::warn!("camera {key} not configured in time, excluded from recording");
            if let Some(sink) = self.sinks.get_mut(key) {
                sink.release();
            }
            if let Some(session) = self.sessions.get_mut(key) {
                session.detach_record_target();
                session.recreate_session();
            }
        }

        let mut started = 0usize;
        let mut start_failures = Vec::new();
        for key in keys {
            if !ready.contains(key) {
                continue;
            }
            match self.sinks.get_mut(key).map(|sink| sink.start()) {
                Some(Ok(())) => started += 1,
                Some(Err(error)) => start_failures.push((key.clone(), error)),
                None => {}
            }
        }
        // a failed start released the sink; its session must not stay bound
        // to the dead target or report itself as recording
        for (key, error) in start_failures {
            tracing::warn!("camera {key}: encoder failed to start, excluded from recording");
            self.emit_error(&key, error);
            if let Some(session) = self.sessions.get_mut(&key) {
                session.detach_record_target();
                session.recreate_session();
            }
        }

        if started > 0 {
            self.is_recording = true;
            tracing::info!("{started} camera(s) started recording");
            self.emit(CameraEvent::RecordingStarted);
        } else {
            tracing::error!("failed to start recording on any camera");
            for key in keys {
                if let Some(sink) = self.sinks.get_mut(key) {
                    sink.release();
                }
                if let Some(session) = self.sessions.get_mut(key) {
                    if session.has_record_target() {
                        session.detach_record_target();
                        session.recreate_session();
                    }
                }
            }
            self.is_recording = false;
        }
    }

    /// One key's segment limit: rotate that sink and reconfigure only that
    /// key's session. Recording on the other keys is untouched.
    fn handle_segment_limit(&mut self, target: OutputTarget) {
        let Some(key) = self
            .sinks
            .iter()
            .find(|(_, sink)| sink.target() == Some(target))
            .map(|(key, _)| key.clone())
        else {
            tracing::debug!("segment limit for unknown target {} dropped", target.id);
            return;
        };

        let (rotated, segment_index) = match self.sinks.get_mut(&key) {
            Some(sink) => (sink.rotate_segment(), sink.segment_index()),
            None => return,
        };
        let Some(new_target) = rotated else {
            tracing::error!("camera {key}: segment rotation failed, recording dropped");
            if let Some(session) = self.sessions.get_mut(&key) {
                session.detach_record_target();
                session.recreate_session();
            }
            return;
        };

        // announce the switch before any frame can hit the new file
        self.emit(CameraEvent::SegmentSwitch {
            key: key.clone(),
            segment_index,
        });
        if let Some(session) = self.sessions.get_mut(&key) {
            session.attach_record_target(new_target);
            session.recreate_session();
        }
        self.pending_segment_restart.insert(key);
    }

    fn emit(&self, event: CameraEvent) {
        let _ = self.events_tx.send(event);
    }

    fn emit_status(&self, key: &str, status: CameraStatus) {
        tracing::info!("camera {key}: {status}");
        self.emit(CameraEvent::Status {
            key: key.to_string(),
            status,
        });
    }

    fn emit_error(&self, key: &str, error: CameraError) {
        tracing::error!("camera {key}: {error}");
        self.emit(CameraEvent::Error {
            key: key.to_string(),
            error,
        });
    }

    fn publish_status(&self) {
        let mut status = self.status.write();
        status.is_recording = self.is_recording;
        status.active_keys = self.active_keys.clone();
        status.states = self
            .sessions
            .iter()
            .map(|(key, session)| (key.clone(), session.state()))
            .collect();
    }
}

impl CoordinatorHandle {
    /// Open the requested cameras; returns the keys actually retained after
    /// physical-id deduplication and the open-device cap.
    pub async fn open_all(&self, keys: &[&str]) -> Vec<String> {
        let keys = keys.iter().map(|key| key.to_string()).collect();
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::OpenAll { keys, reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Begin a synchronized recording across all active cameras. Returns
    /// false if a recording is already running or no camera is active.
    pub async fn start_recording(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::StartRecording { reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn stop_recording(&self) {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::StopRecording { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Staggered still capture on every active camera; returns how many
    /// captures were scheduled.
    pub async fn take_picture(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::TakePicture { reply }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Force a close/open cycle for one camera, resetting its reconnect
    /// budget.
    pub async fn reconnect(&self, key: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::Reconnect {
            key: key.to_string(),
            reply,
        };
        if self.cmd_tx.send(cmd).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn close_all(&self) {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::CloseAll { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Stop the coordinator task. Sessions and sinks are released on the
    /// way out.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }

    pub fn is_recording(&self) -> bool {
        self.status.read().is_recording
    }

    pub fn active_keys(&self) -> Vec<String> {
        self.status.read().active_keys.clone()
    }

    pub fn session_state(&self, key: &str) -> Option<SessionState> {
        self.status.read().states.get(key).copied()
    }

    pub fn connected_count(&self) -> usize {
        self.status.read().connected_count()
    }

    pub fn has_connected(&self) -> bool {
        self.status.read().has_connected()
    }

    /// Subscribe to coordinator events.
    pub fn subscribe(&self) -> broadcast::Receiver<CameraEvent> {
        self.events_tx.subscribe()
    }
}
