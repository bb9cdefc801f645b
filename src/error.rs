//! Error types and handling
//!
//! Camera error taxonomy shared by the driver interface, the per-device
//! session state machine, and the coordinator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by the capture driver or encoder backend.
///
/// Retryable kinds schedule a bounded reconnection; terminal kinds park the
/// session in `Error`/`GivenUp` until an explicit external `reconnect()`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CameraError {
    #[error("device is in use by another client")]
    DeviceBusy,

    #[error("too many capture devices open")]
    DeviceLimitExceeded,

    #[error("device disabled by policy")]
    DeviceDisabled,

    #[error("fatal device fault")]
    FatalDeviceFault,

    #[error("capture driver service fault")]
    DriverServiceFault,

    #[error("device access denied")]
    AccessDenied,

    #[error("camera permission denied")]
    PermissionDenied,

    #[error("capture session configuration failed")]
    SessionConfigureFailed,

    #[error("device disconnected")]
    DeviceDisconnected,
}

impl CameraError {
    /// Whether a session hitting this error should schedule an automatic
    /// reconnect. Disconnects are typically transient resource exhaustion;
    /// permission and policy failures never recover on their own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CameraError::DeviceBusy
                | CameraError::DeviceLimitExceeded
                | CameraError::DriverServiceFault
                | CameraError::DeviceDisconnected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(CameraError::DeviceBusy.is_retryable());
        assert!(CameraError::DeviceLimitExceeded.is_retryable());
        assert!(CameraError::DriverServiceFault.is_retryable());
        assert!(CameraError::DeviceDisconnected.is_retryable());

        assert!(!CameraError::DeviceDisabled.is_retryable());
        assert!(!CameraError::FatalDeviceFault.is_retryable());
        assert!(!CameraError::AccessDenied.is_retryable());
        assert!(!CameraError::PermissionDenied.is_retryable());
        assert!(!CameraError::SessionConfigureFailed.is_retryable());
    }
}
