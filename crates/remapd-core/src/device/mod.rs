// Remapd Device Session Manager
// Stable identity resolution, exclusive grabs and hotplug recovery

mod backoff;
mod resolve;

#[cfg(feature = "pure-rust")]
mod session;

use std::fmt;
use std::path::PathBuf;

pub use backoff::Backoff;
pub use resolve::{is_virtual_device, DeviceResolver};

#[cfg(feature = "pure-rust")]
pub use session::{list_host_devices, DeviceSessionManager, HostDevice};

use crate::input::{DeviceId, RawEvent};

/// Errors raised while acquiring or reading physical devices
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Missing, busy or not permitted; retried with backoff
    #[error("Device '{id}' unavailable: {reason}")]
    DeviceUnavailable { id: String, reason: String },

    #[error("No input device could be acquired")]
    NoDevices,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Acquisition state of a configured device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionState {
    Acquired,
    Reconnecting,
    Unavailable(String),
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionState::Acquired => f.write_str("acquired"),
            AcquisitionState::Reconnecting => f.write_str("reconnecting"),
            AcquisitionState::Unavailable(reason) => write!(f, "unavailable ({reason})"),
        }
    }
}

/// What a reader thread reports to the actor
#[derive(Debug, Clone)]
pub enum DeviceNotice {
    Acquired {
        device: DeviceId,
        path: PathBuf,
        name: String,
    },
    Event {
        device: DeviceId,
        event: RawEvent,
    },
    Lost {
        device: DeviceId,
        reason: String,
    },
    Unavailable {
        device: DeviceId,
        reason: String,
    },
}

/// Delivers notices to the actor; false once the actor is gone
pub type NoticeSink = std::sync::Arc<dyn Fn(DeviceNotice) -> bool + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquisition_state_display() {
        assert_eq!(AcquisitionState::Acquired.to_string(), "acquired");
        assert_eq!(
            AcquisitionState::Unavailable("permission denied".into()).to_string(),
            "unavailable (permission denied)"
        );
    }
}
