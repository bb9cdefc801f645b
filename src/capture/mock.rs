//! Scripted in-memory driver and encoder backends
//!
//! Deterministic stand-ins for the hardware capture driver and encoder,
//! used by the test suite. Failures are scripted per physical id and
//! consumed one per attempt; `hang_configure` makes a device's session
//! creation never complete, which is how barrier timeouts are exercised.

use super::{
    CaptureDriver, DeviceHandle, DriverEvent, EncoderBackend, EncoderEvent, OutputTarget,
    SessionHandle, StillFrame, TargetArena, TargetKind,
};
use crate::error::CameraError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;

#[derive(Default)]
struct DriverState {
    next_handle: u64,
    open_failures: HashMap<String, VecDeque<CameraError>>,
    configure_failures: HashMap<String, VecDeque<CameraError>>,
    hang_configure: HashSet<String>,
    devices: HashMap<DeviceHandle, String>,
    sessions: HashMap<SessionHandle, DeviceHandle>,
    open_calls: Vec<String>,
    session_calls: Vec<(String, Vec<OutputTarget>)>,
    still_calls: Vec<(SessionHandle, Instant)>,
}

/// Scripted capture driver.
pub struct MockDriver {
    state: Mutex<DriverState>,
    events_tx: broadcast::Sender<DriverEvent>,
}

impl MockDriver {
    pub fn new() -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            state: Mutex::new(DriverState::default()),
            events_tx,
        })
    }

    /// Make the next `times` open attempts for `physical_id` fail.
    pub fn fail_open(&self, physical_id: &str, error: CameraError, times: usize) {
        let mut state = self.state.lock();
        let queue = state.open_failures.entry(physical_id.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(error);
        }
    }

    /// Make the next `times` session creations for `physical_id` fail.
    pub fn fail_configure(&self, physical_id: &str, error: CameraError, times: usize) {
        let mut state = self.state.lock();
        let queue = state
            .configure_failures
            .entry(physical_id.to_string())
            .or_default();
        for _ in 0..times {
            queue.push_back(error);
        }
    }

    /// Make session creation for `physical_id` never complete.
    pub fn hang_configure(&self, physical_id: &str) {
        self.state
            .lock()
            .hang_configure
            .insert(physical_id.to_string());
    }

    /// Number of open attempts seen for `physical_id`.
    pub fn open_count(&self, physical_id: &str) -> usize {
        self.state
            .lock()
            .open_calls
            .iter()
            .filter(|id| id.as_str() == physical_id)
            .count()
    }

    /// Physical ids of currently open devices.
    pub fn open_physical_ids(&self) -> Vec<String> {
        self.state.lock().devices.values().cloned().collect()
    }

    /// Number of sessions created on `physical_id`.
    pub fn session_count(&self, physical_id: &str) -> usize {
        self.state
            .lock()
            .session_calls
            .iter()
            .filter(|(id, _)| id.as_str() == physical_id)
            .count()
    }

    /// Timestamps of still-capture requests, in call order.
    pub fn still_capture_times(&self) -> Vec<Instant> {
        self.state
            .lock()
            .still_calls
            .iter()
            .map(|(_, at)| *at)
            .collect()
    }

    /// Push a disconnect event for the open device backing `physical_id`.
    pub fn emit_disconnected(&self, physical_id: &str) {
        let device = {
            let state = self.state.lock();
            state
                .devices
                .iter()
                .find(|(_, id)| id.as_str() == physical_id)
                .map(|(device, _)| *device)
        };
        if let Some(device) = device {
            let _ = self.events_tx.send(DriverEvent::Disconnected { device });
        }
    }

    /// Push a fault event for the open device backing `physical_id`.
    pub fn emit_fault(&self, physical_id: &str, error: CameraError) {
        let device = {
            let state = self.state.lock();
            state
                .devices
                .iter()
                .find(|(_, id)| id.as_str() == physical_id)
                .map(|(device, _)| *device)
        };
        if let Some(device) = device {
            let _ = self.events_tx.send(DriverEvent::Fault { device, error });
        }
    }
}

#[async_trait]
impl CaptureDriver for MockDriver {
    async fn open_device(&self, physical_id: &str) -> Result<DeviceHandle, CameraError> {
        let mut state = self.state.lock();
        state.open_calls.push(physical_id.to_string());
        if let Some(queue) = state.open_failures.get_mut(physical_id) {
            if let Some(error) = queue.pop_front() {
                return Err(error);
            }
        }
        state.next_handle += 1;
        let device = DeviceHandle(state.next_handle);
        state.devices.insert(device, physical_id.to_string());
        Ok(device)
    }

    async fn close_device(&self, device: DeviceHandle) {
        self.state.lock().devices.remove(&device);
    }

    async fn create_session(
        &self,
        device: DeviceHandle,
        targets: &[OutputTarget],
    ) -> Result<SessionHandle, CameraError> {
        {
            let mut state = self.state.lock();
            let Some(physical_id) = state.devices.get(&device).cloned() else {
                return Err(CameraError::DeviceDisconnected);
            };
            state
                .session_calls
                .push((physical_id.clone(), targets.to_vec()));
            if !state.hang_configure.contains(&physical_id) {
                if let Some(queue) = state.configure_failures.get_mut(&physical_id) {
                    if let Some(error) = queue.pop_front() {
                        return Err(error);
                    }
                }
                state.next_handle += 1;
                let session = SessionHandle(state.next_handle);
                state.sessions.insert(session, device);
                return Ok(session);
            }
        }
        // scripted to hang: this session never configures
        std::future::pending::<()>().await;
        Err(CameraError::SessionConfigureFailed)
    }

    async fn submit_repeating_request(
        &self,
        session: SessionHandle,
        _targets: &[OutputTarget],
    ) -> Result<(), CameraError> {
        if self.state.lock().sessions.contains_key(&session) {
            Ok(())
        } else {
            Err(CameraError::SessionConfigureFailed)
        }
    }

    async fn close_session(&self, session: SessionHandle) {
        self.state.lock().sessions.remove(&session);
    }

    async fn request_still_capture(
        &self,
        session: SessionHandle,
    ) -> Result<StillFrame, CameraError> {
        let mut state = self.state.lock();
        if !state.sessions.contains_key(&session) {
            return Err(CameraError::DeviceDisconnected);
        }
        state.still_calls.push((session, Instant::now()));
        Ok(StillFrame {
            width: 2,
            height: 2,
            data: vec![0; 16],
        })
    }

    fn events(&self) -> broadcast::Receiver<DriverEvent> {
        self.events_tx.subscribe()
    }
}

#[derive(Default)]
struct EncoderState {
    fail_prepare: HashMap<String, VecDeque<CameraError>>,
    fail_start: HashMap<String, VecDeque<CameraError>>,
    prepared: Vec<(OutputTarget, PathBuf)>,
    started: Vec<OutputTarget>,
    live: HashSet<OutputTarget>,
    recording: HashSet<OutputTarget>,
}

/// Scripted encoder backend.
pub struct MockEncoder {
    state: Mutex<EncoderState>,
    arena: TargetArena,
    events_tx: broadcast::Sender<EncoderEvent>,
}

impl MockEncoder {
    pub fn new() -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            state: Mutex::new(EncoderState::default()),
            arena: TargetArena::new(),
            events_tx,
        })
    }

    /// Make the next `times` prepares whose file name contains `needle` fail.
    pub fn fail_prepare(&self, needle: &str, error: CameraError, times: usize) {
        let mut state = self.state.lock();
        let queue = state.fail_prepare.entry(needle.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(error);
        }
    }

    /// Make the next `times` starts whose file name contains `needle` fail.
    pub fn fail_start(&self, needle: &str, error: CameraError, times: usize) {
        let mut state = self.state.lock();
        let queue = state.fail_start.entry(needle.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(error);
        }
    }

    /// Paths prepared so far, in order.
    pub fn prepared_paths(&self) -> Vec<PathBuf> {
        self.state
            .lock()
            .prepared
            .iter()
            .map(|(_, path)| path.clone())
            .collect()
    }

    /// Targets that have been started, in order (rotations start the same
    /// sink again on a new target).
    pub fn started_count(&self) -> usize {
        self.state.lock().started.len()
    }

    /// Targets prepared and not yet released.
    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Targets currently encoding.
    pub fn recording_count(&self) -> usize {
        self.state.lock().recording.len()
    }

    pub fn is_encoding(&self, target: OutputTarget) -> bool {
        self.state.lock().recording.contains(&target)
    }

    /// The live target most recently prepared for a file name containing
    /// `needle`, if any.
    pub fn target_for(&self, needle: &str) -> Option<OutputTarget> {
        let state = self.state.lock();
        state
            .prepared
            .iter()
            .rev()
            .find(|(target, path)| {
                state.live.contains(target)
                    && path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| name.contains(needle))
            })
            .map(|(target, _)| *target)
    }

    /// Push a segment-limit event for `target`.
    pub fn emit_segment_limit(&self, target: OutputTarget) {
        let _ = self
            .events_tx
            .send(EncoderEvent::SegmentLimitReached { target });
    }
}

impl EncoderBackend for MockEncoder {
    fn prepare(&self, path: &Path, width: u32, height: u32) -> Result<OutputTarget, CameraError> {
        let mut state = self.state.lock();
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        let scripted = state
            .fail_prepare
            .iter_mut()
            .find(|(needle, queue)| name.contains(needle.as_str()) && !queue.is_empty())
            .and_then(|(_, queue)| queue.pop_front());
        if let Some(error) = scripted {
            return Err(error);
        }
        debug_assert!(width > 0 && height > 0);
        let target = self.arena.create(TargetKind::Record);
        state.prepared.push((target, path.to_path_buf()));
        state.live.insert(target);
        Ok(target)
    }

    fn start(&self, target: OutputTarget) -> Result<(), CameraError> {
        let mut state = self.state.lock();
        if !state.live.contains(&target) {
            return Err(CameraError::DriverServiceFault);
        }
        let name = state
            .prepared
            .iter()
            .rev()
            .find(|(prepared, _)| *prepared == target)
            .and_then(|(_, path)| path.file_name().and_then(|name| name.to_str()))
            .unwrap_or_default()
            .to_string();
        let scripted = state
            .fail_start
            .iter_mut()
            .find(|(needle, queue)| name.contains(needle.as_str()) && !queue.is_empty())
            .and_then(|(_, queue)| queue.pop_front());
        if let Some(error) = scripted {
            return Err(error);
        }
        state.started.push(target);
        state.recording.insert(target);
        Ok(())
    }

    fn stop(&self, target: OutputTarget) {
        self.state.lock().recording.remove(&target);
    }

    fn release(&self, target: OutputTarget) {
        let mut state = self.state.lock();
        state.recording.remove(&target);
        state.live.remove(&target);
    }

    fn events(&self) -> broadcast::Receiver<EncoderEvent> {
        self.events_tx.subscribe()
    }
}
