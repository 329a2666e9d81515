// Remapd Core Library
// Event-processing engine for the physical-to-virtual remap daemon

pub mod compile;
pub mod control;
pub mod daemon;
pub mod device;
pub mod input;
pub mod key;
pub mod layer;
pub mod macros;
pub mod output;
pub mod profile;
pub mod settings;
pub mod state;

pub use compile::{compile, CompileError, MacroLimits};
pub use control::{Command, ControlBackend, ControlError, ControlServer};
pub use daemon::{
    ApplyReport, DaemonError, DaemonHandle, DeviceStatus, DiagnosticEvent, Engine,
    Flow, Message, StatusReport,
};
pub use device::{AcquisitionState, Backoff, DeviceError, DeviceNotice, DeviceResolver};
pub use input::{DeviceId, DeviceKey, KeyTransition, RawEvent};
pub use key::{Key, KeyError};
pub use layer::{LayerChange, LayerEngine};
pub use macros::{MacroScheduler, MacroTimer, ManualTimer, RunId, ThreadTimer};
pub use output::{OutputDevice, OutputError, OutputSink, RecordingDevice};
pub use profile::{CompiledProfile, ProfileDocument, ProfileError, ProfileLoader};
pub use settings::{DaemonSettings, SettingsError};
pub use state::{Emission, PressedStateTracker, Source};

#[cfg(feature = "pure-rust")]
pub use device::{list_host_devices, DeviceSessionManager, HostDevice};
#[cfg(feature = "pure-rust")]
pub use output::VirtualDevice;
