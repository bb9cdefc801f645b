//! Device session state machine
//!
//! A `DeviceSession` owns one hardware device: open/close lifecycle,
//! capture-session configuration, and the bounded reconnect loop. All
//! methods run on the coordinator task; driver I/O is spawned and completes
//! through [`SessionEvent`] messages carrying the session's `epoch`. A
//! completion whose epoch no longer matches is stale and must be dropped:
//! that is the cancellation mechanism that keeps a closed session from
//! being resurrected by a late open ("zombie open").

use super::state::{RetryPolicy, SessionState};
use crate::capture::{
    CaptureDriver, DeviceHandle, OutputTarget, SessionHandle, StillFrame, TargetArena, TargetKind,
};
use crate::error::CameraError;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Completion messages sent back to the coordinator task.
#[derive(Debug)]
pub enum SessionEvent {
    OpenResolved {
        key: String,
        epoch: u64,
        result: Result<DeviceHandle, CameraError>,
    },
    ConfigureResolved {
        key: String,
        epoch: u64,
        result: Result<SessionHandle, CameraError>,
    },
    ReconnectDue {
        key: String,
        epoch: u64,
    },
    StillResolved {
        key: String,
        result: Result<StillFrame, CameraError>,
    },
}

/// What a session did in response to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// A reconnect was scheduled (attempt number, 1-based).
    Scheduled { attempt: u32 },

    /// The attempt budget is exhausted; only an external `reconnect()`
    /// will revive this session.
    GaveUp,

    /// Terminal error, no automatic recovery.
    Terminal,
}

/// State machine for one logical camera key bound to one physical device.
pub struct DeviceSession {
    key: String,
    physical_id: String,
    state: SessionState,
    device: Option<DeviceHandle>,
    session: Option<SessionHandle>,
    preview_target: Option<OutputTarget>,
    record_target: Option<OutputTarget>,
    reconnect_attempts: u32,
    auto_reconnect: bool,
    epoch: u64,
    reconnect_task: Option<JoinHandle<()>>,
    retry: RetryPolicy,
    driver: Arc<dyn CaptureDriver>,
    arena: TargetArena,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl DeviceSession {
    pub(crate) fn new(
        key: String,
        physical_id: String,
        driver: Arc<dyn CaptureDriver>,
        arena: TargetArena,
        events_tx: mpsc::UnboundedSender<SessionEvent>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            key,
            physical_id,
            state: SessionState::Closed,
            device: None,
            session: None,
            preview_target: None,
            record_target: None,
            reconnect_attempts: 0,
            auto_reconnect: false,
            epoch: 0,
            reconnect_task: None,
            retry,
            driver,
            arena,
            events_tx,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn physical_id(&self) -> &str {
        &self.physical_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.device.is_some()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn has_record_target(&self) -> bool {
        self.record_target.is_some()
    }

    pub(crate) fn device_handle(&self) -> Option<DeviceHandle> {
        self.device
    }

    pub(crate) fn epoch_matches(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    /// Request the driver to open the physical device. Completion arrives as
    /// an `OpenResolved` event.
    pub fn open(&mut self) {
        if self.device.is_some() || self.state == SessionState::Opening {
            tracing::debug!("camera {}: open ignored, already {:?}", self.key, self.state);
            return;
        }
        self.auto_reconnect = true;
        self.state = SessionState::Opening;
        tracing::debug!("camera {}: opening device {}", self.key, self.physical_id);

        let driver = Arc::clone(&self.driver);
        let physical_id = self.physical_id.clone();
        let key = self.key.clone();
        let epoch = self.epoch;
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = driver.open_device(&physical_id).await;
            let _ = tx.send(SessionEvent::OpenResolved { key, epoch, result });
        });
    }

    pub(crate) fn handle_opened(&mut self, device: DeviceHandle) {
        self.device = Some(device);
        self.reconnect_attempts = 0;
        self.state = SessionState::Open;
        tracing::debug!("camera {} opened", self.key);
        self.configure();
    }

    /// Build a capture session against the current preview target (and the
    /// record target if one is attached) and submit the repeating request.
    /// Bumps the epoch so any configure still in flight becomes stale.
    pub fn configure(&mut self) {
        let Some(device) = self.device else {
            tracing::warn!("camera {}: configure without an open device", self.key);
            return;
        };

        self.epoch += 1;
        let preview = self.arena.create(TargetKind::Preview);
        self.preview_target = Some(preview);
        let mut targets = vec![preview];
        if let Some(record) = self.record_target {
            targets.push(record);
        }
        self.state = SessionState::ConfiguringSession;
        tracing::debug!(
            "camera {}: creating capture session with {} target(s)",
            self.key,
            targets.len()
        );

        let driver = Arc::clone(&self.driver);
        let key = self.key.clone();
        let epoch = self.epoch;
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result: Result<SessionHandle, CameraError> = async {
                let session = driver.create_session(device, &targets).await?;
                driver.submit_repeating_request(session, &targets).await?;
                Ok(session)
            }
            .await;
            let _ = tx.send(SessionEvent::ConfigureResolved { key, epoch, result });
        });
    }

    pub(crate) fn handle_configured(&mut self, session: SessionHandle) {
        self.session = Some(session);
        self.state = if self.record_target.is_some() {
            SessionState::Recording
        } else {
            SessionState::Previewing
        };
        tracing::debug!("camera {}: session configured ({:?})", self.key, self.state);
    }

    /// Session configuration failures do not self-retry. The device handle
    /// is released as well, so the session reads as disconnected until an
    /// external reconnect.
    pub(crate) fn handle_configure_failed(&mut self) {
        self.session = None;
        self.teardown_handles();
        self.state = SessionState::Error;
    }

    /// Record a borrow of a sink's record target. Takes effect on the next
    /// `recreate_session()` because the driver binds targets only at
    /// session-creation time.
    pub fn attach_record_target(&mut self, target: OutputTarget) {
        tracing::debug!("camera {}: record target {} attached", self.key, target.id);
        self.record_target = Some(target);
    }

    pub fn detach_record_target(&mut self) {
        if self.record_target.take().is_some() {
            tracing::debug!("camera {}: record target detached", self.key);
        }
    }

    /// Tear down the current session handle and configure again with
    /// whatever targets are attached. The single mechanism for entering and
    /// leaving recording, and for mid-recording segment rotation.
    pub fn recreate_session(&mut self) {
        if self.device.is_none() {
            tracing::debug!("camera {}: recreate skipped, device not open", self.key);
            return;
        }
        if let Some(session) = self.session.take() {
            let driver = Arc::clone(&self.driver);
            tokio::spawn(async move {
                driver.close_session(session).await;
            });
        }
        self.preview_target = None;
        self.configure();
    }

    /// Classify a device-level failure and either schedule a reconnect or
    /// park the session in a terminal state.
    pub(crate) fn fail(&mut self, error: CameraError) -> RecoveryAction {
        // any open or configure still in flight belongs to the dead device
        self.epoch += 1;
        self.teardown_handles();
        if matches!(
            error,
            CameraError::AccessDenied | CameraError::PermissionDenied
        ) {
            self.auto_reconnect = false;
        }
        if error.is_retryable() && self.auto_reconnect {
            self.schedule_reconnect()
        } else {
            self.state = SessionState::Error;
            RecoveryAction::Terminal
        }
    }

    fn schedule_reconnect(&mut self) -> RecoveryAction {
        if self.reconnect_attempts >= self.retry.max_attempts {
            tracing::error!(
                "camera {}: max reconnect attempts reached ({}), giving up",
                self.key,
                self.retry.max_attempts
            );
            self.auto_reconnect = false;
            self.state = SessionState::GivenUp;
            return RecoveryAction::GaveUp;
        }

        self.reconnect_attempts += 1;
        let attempt = self.reconnect_attempts;
        self.state = SessionState::Reconnecting;
        tracing::debug!(
            "camera {}: scheduling reconnect attempt {}/{} in {:?}",
            self.key,
            attempt,
            self.retry.max_attempts,
            self.retry.delay
        );

        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
        let delay = self.retry.delay;
        let key = self.key.clone();
        let epoch = self.epoch;
        let tx = self.events_tx.clone();
        self.reconnect_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(SessionEvent::ReconnectDue { key, epoch });
        }));
        RecoveryAction::Scheduled { attempt }
    }

    /// A scheduled reconnect came due; reopen unless it was cancelled.
    pub(crate) fn handle_reconnect_due(&mut self, epoch: u64) {
        if !self.epoch_matches(epoch) {
            tracing::debug!("camera {}: stale reconnect dropped", self.key);
            return;
        }
        tracing::debug!(
            "camera {}: attempting reconnect ({}/{})",
            self.key,
            self.reconnect_attempts,
            self.retry.max_attempts
        );
        self.open();
    }

    fn teardown_handles(&mut self) {
        // handles may already be invalid; the driver swallows teardown errors
        let session = self.session.take();
        let device = self.device.take();
        if session.is_some() || device.is_some() {
            let driver = Arc::clone(&self.driver);
            tokio::spawn(async move {
                if let Some(session) = session {
                    driver.close_session(session).await;
                }
                if let Some(device) = device {
                    driver.close_device(device).await;
                }
            });
        }
        self.preview_target = None;
    }

    /// Cancel any pending reconnect, tear down session and device handles,
    /// release the preview target. Safe from any state.
    pub fn close(&mut self) {
        self.epoch += 1;
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
        self.auto_reconnect = false;
        self.reconnect_attempts = 0;
        self.teardown_handles();
        // a released sink target must not survive into the next configure
        self.record_target = None;
        self.state = SessionState::Closed;
        tracing::debug!("camera {} closed", self.key);
    }

    /// External reset: zero the attempt counter and force a fresh
    /// close/open cycle.
    pub fn reconnect(&mut self) {
        tracing::debug!("camera {}: manual reconnect requested", self.key);
        self.close();
        self.open();
    }

    /// Issue a still-capture request on the current session.
    pub fn take_still(&self) {
        let Some(session) = self.session else {
            tracing::warn!("camera {}: no active session for still capture", self.key);
            return;
        };
        let driver = Arc::clone(&self.driver);
        let key = self.key.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = driver.request_still_capture(session).await;
            let _ = tx.send(SessionEvent::StillResolved { key, result });
        });
    }
}
