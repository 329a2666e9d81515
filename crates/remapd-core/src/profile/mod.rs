// Remapd Profiles
// On-disk profile documents, their loader and the compiled in-memory form

pub mod compiled;
pub mod loader;
pub mod schema;

pub use compiled::{Activation, BindAction, CompiledProfile, Layer, MacroDefinition, MacroStep};
pub use loader::ProfileLoader;
pub use schema::{
    ActionKind, BindingDocument, LayerDocument, MacroDocument, MacroStepDocument, MacroStepKind,
    ProfileDocument, ReleaseBehavior,
};

/// Errors raised while locating or parsing profile documents
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(String),

    #[error("Profile not found: {0}")]
    NotFound(String),

    #[error("No active profile is set")]
    NoActiveProfile,

    #[error("Invalid profile id '{0}': use letters, digits, '-' or '_'")]
    InvalidId(String),
}
