//! Multicam - lockstep multi-camera capture and recording core.
//!
//! This crate coordinates N camera devices as keyed sessions, each driving
//! a preview stream and, on demand, a synchronized video recording. The
//! heart of it is [`recorder::SessionCoordinator`], a single task that owns
//! every session and sink; talk to it through a [`recorder::CoordinatorHandle`].

pub mod capture;
pub mod error;
pub mod recorder;
pub mod session;

pub use error::CameraError;
pub use recorder::{
    CameraEvent, CameraSpec, CameraStatus, CoordinatorConfig, CoordinatorHandle,
    SessionCoordinator,
};
pub use session::SessionState;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging for binaries and examples embedding the crate.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "multicam=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
