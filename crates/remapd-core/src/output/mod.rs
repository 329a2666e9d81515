// Remapd Output Layer
// Single writer to the virtual device

mod recording;
mod sink;

#[cfg(feature = "pure-rust")]
mod uinput;

pub use recording::{OutputRecord, RecordingDevice};
pub use sink::OutputSink;

#[cfg(feature = "pure-rust")]
pub use uinput::VirtualDevice;

use crate::Key;

/// Error types for output operations
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("Failed to create virtual device: {0}")]
    DeviceCreation(String),

    /// A write to the virtual device failed; the daemon cannot continue
    #[error("Output device failure: {0}")]
    OutputDeviceFailure(String),
}

/// Backend receiving synthesized events
pub trait OutputDevice: Send {
    fn emit_key(&mut self, key: Key, down: bool) -> Result<(), OutputError>;

    fn emit_relative(&mut self, axis: u16, value: i32) -> Result<(), OutputError>;
}

impl<T: OutputDevice + ?Sized> OutputDevice for Box<T> {
    fn emit_key(&mut self, key: Key, down: bool) -> Result<(), OutputError> {
        (**self).emit_key(key, down)
    }

    fn emit_relative(&mut self, axis: u16, value: i32) -> Result<(), OutputError> {
        (**self).emit_relative(axis, value)
    }
}
