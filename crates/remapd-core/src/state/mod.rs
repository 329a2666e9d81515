// Remapd State
// Pressed-state tracking for physical and synthetic keys

mod tracker;

pub use tracker::{Emission, PhysicalKey, PressedStateTracker, Source};
