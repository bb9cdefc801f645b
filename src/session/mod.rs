//! Per-device session management
//!
//! One [`DeviceSession`] wraps one hardware capture device: its state
//! machine, its preview target, and its reconnection policy.

pub mod device;
pub mod state;

pub use device::{DeviceSession, RecoveryAction, SessionEvent};
pub use state::{RetryPolicy, SessionState};
