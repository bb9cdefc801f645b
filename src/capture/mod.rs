//! Capture driver and encoder interfaces
//!
//! Platform-agnostic capability traits the core is written against. A real
//! deployment plugs in a hardware capture driver and an encoder backend;
//! tests use the scripted mocks in [`mock`].

pub mod mock;

use crate::error::CameraError;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Opaque handle to an open capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u64);

/// Opaque handle to a configured capture session on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u64);

/// What an output target slot is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Preview,
    Record,
}

/// An indexed output-target slot a capture session writes frames into.
///
/// Targets are plain slot identifiers: attaching one to a session never
/// transfers ownership. A session owns its preview target; a record target
/// stays owned by the recording sink that allocated it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputTarget {
    pub id: u64,
    pub kind: TargetKind,
}

/// Allocator for output-target slots. Clones share one counter, so every
/// slot handed out through the same allocator gets a unique id.
#[derive(Clone, Default)]
pub struct TargetArena {
    next: Arc<AtomicU64>,
}

impl TargetArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh target slot.
    pub fn create(&self, kind: TargetKind) -> OutputTarget {
        OutputTarget {
            id: self.next.fetch_add(1, Ordering::Relaxed) + 1,
            kind,
        }
    }
}

/// A single captured still frame.
#[derive(Debug, Clone)]
pub struct StillFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Spontaneous device-level events pushed by the driver.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    /// The device went away (typically transient resource exhaustion).
    Disconnected { device: DeviceHandle },

    /// The driver reported a device fault.
    Fault {
        device: DeviceHandle,
        error: CameraError,
    },
}

/// Events pushed by the encoder backend.
#[derive(Debug, Clone)]
pub enum EncoderEvent {
    /// The current segment hit its size/duration limit; the owning sink must
    /// rotate to the next file before frames can flow again.
    SegmentLimitReached { target: OutputTarget },
}

/// Hardware capture driver.
///
/// All calls are fire-and-forget from the coordinator's point of view: the
/// core spawns them and observes completion asynchronously. Teardown calls
/// are infallible by contract: handles may already be invalid and the
/// driver swallows those errors.
#[async_trait]
pub trait CaptureDriver: Send + Sync {
    async fn open_device(&self, physical_id: &str) -> Result<DeviceHandle, CameraError>;

    async fn close_device(&self, device: DeviceHandle);

    /// Create a capture session with the given output targets bound to it.
    /// Targets are bound only at session-creation time; changing the target
    /// set requires tearing the session down and creating a new one.
    async fn create_session(
        &self,
        device: DeviceHandle,
        targets: &[OutputTarget],
    ) -> Result<SessionHandle, CameraError>;

    /// Start streaming frames into the session's targets.
    async fn submit_repeating_request(
        &self,
        session: SessionHandle,
        targets: &[OutputTarget],
    ) -> Result<(), CameraError>;

    async fn close_session(&self, session: SessionHandle);

    async fn request_still_capture(&self, session: SessionHandle)
        -> Result<StillFrame, CameraError>;

    /// Subscribe to spontaneous device events (disconnects, faults).
    fn events(&self) -> broadcast::Receiver<DriverEvent>;
}

/// Encoder/writer backend producing one video file per prepared target.
pub trait EncoderBackend: Send + Sync {
    /// Allocate encoder resources and an output target for the given file.
    fn prepare(&self, path: &Path, width: u32, height: u32) -> Result<OutputTarget, CameraError>;

    /// Begin encoding frames arriving on a prepared target.
    fn start(&self, target: OutputTarget) -> Result<(), CameraError>;

    /// Finalize the target's output file. Best-effort.
    fn stop(&self, target: OutputTarget);

    /// Release the target's encoder resources. Best-effort.
    fn release(&self, target: OutputTarget);

    /// Subscribe to encoder events (segment limits).
    fn events(&self) -> broadcast::Receiver<EncoderEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_allocates_unique_ids() {
        let arena = TargetArena::new();
        let a = arena.create(TargetKind::Preview);
        let b = arena.create(TargetKind::Record);
        let c = arena.create(TargetKind::Preview);

        assert_ne!(a.id, b.id);
        assert_ne!(b.id, c.id);
        assert_eq!(a.kind, TargetKind::Preview);
        assert_eq!(b.kind, TargetKind::Record);
    }

    #[test]
    fn test_arena_clones_share_counter() {
        let arena = TargetArena::new();
        let clone = arena.clone();
        let a = arena.create(TargetKind::Preview);
        let b = clone.create(TargetKind::Preview);
        assert_ne!(a.id, b.id);
    }
}
