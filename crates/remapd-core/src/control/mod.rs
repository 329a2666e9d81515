// Remapd Control Plane
// Unix socket line protocol for profile switching and diagnostics

mod client;
mod protocol;
mod server;

use std::sync::mpsc::Receiver;

pub use client::{send_command, stream_command};
pub use protocol::{error_line, is_final_line, ok_line, Command};
pub use server::ControlServer;

use crate::compile::CompileError;
use crate::profile::ProfileError;

/// Errors raised while handling control commands
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// The command line could not be understood; the connection stays open
    #[error("malformed command: {0}")]
    ControlChannelError(String),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("daemon unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An error line returned by the daemon
    #[error("{0}")]
    Remote(String),
}

impl ControlError {
    /// Short tag used on `error <kind>: ...` lines
    pub fn kind(&self) -> &'static str {
        match self {
            ControlError::ControlChannelError(_) => "control",
            ControlError::Profile(_) => "profile",
            ControlError::Compile(CompileError::ProfileValidation { .. }) => "validation",
            ControlError::Compile(CompileError::MacroConfig { .. }) => "macro_config",
            ControlError::Unavailable(_) => "unavailable",
            ControlError::Io(_) => "io",
            ControlError::Remote(_) => "remote",
        }
    }
}

/// What the control server needs from the daemon.
///
/// Methods run on connection threads and may block on file I/O and
/// on round trips to the actor.
pub trait ControlBackend: Send + Sync {
    /// Load, compile and apply a profile, then persist it as active
    fn set_profile(&self, id: &str) -> Result<String, ControlError>;

    /// Recompile the active profile from disk and apply it
    fn reload(&self) -> Result<String, ControlError>;

    /// One line per configured device
    fn list_devices(&self) -> Result<Vec<String>, ControlError>;

    fn status(&self) -> Result<String, ControlError>;

    /// Feed of formatted diagnostic events; ends when the daemon stops
    fn subscribe(&self) -> Result<Receiver<String>, ControlError>;
}
