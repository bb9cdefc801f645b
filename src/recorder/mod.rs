//! Recording layer: per-camera sinks and the session coordinator.

mod coordinator;
mod sink;
mod state;

pub use coordinator::{CoordinatorHandle, SessionCoordinator};
pub use sink::{RecordingSink, SinkState};
pub use state::{
    CameraEvent, CameraSpec, CameraStatus, ConfigError, CoordinatorConfig, RecorderStatus,
};
