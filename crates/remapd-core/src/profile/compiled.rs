// Remapd Compiled Profile
// Immutable executable form of a profile, swapped as a whole unit

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use regex::Regex;
use smallvec::SmallVec;

use super::ReleaseBehavior;
use crate::Key;

/// Output keys of a chord; most chords are one to three keys
pub type ChordKeys = SmallVec<[Key; 4]>;

/// When a layer takes part in resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// Always active, consulted last
    Base,
    /// Active while every listed physical key is held
    Hold(SmallVec<[Key; 2]>),
}

/// Resolved behavior of one physical key
#[derive(Debug, Clone)]
pub enum BindAction {
    /// Emit the physical key unchanged
    PassThrough,
    /// Swallow the key
    Disable,
    /// Hold these synthetic keys for as long as the physical key is down
    Chord(ChordKeys),
    /// Start a macro run on press
    Macro(Arc<MacroDefinition>),
}

impl BindAction {
    /// Synthetic keys a held physical key justifies under this action
    pub fn held_keys(&self, physical: Key) -> ChordKeys {
        match self {
            BindAction::PassThrough => smallvec::smallvec![physical],
            BindAction::Chord(keys) => keys.clone(),
            BindAction::Disable | BindAction::Macro(_) => ChordKeys::new(),
        }
    }

    /// Short diagnostic label
    pub fn describe(&self) -> String {
        match self {
            BindAction::PassThrough => "passthrough".to_string(),
            BindAction::Disable => "disabled".to_string(),
            BindAction::Chord(keys) => {
                let names: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
                format!("chord {}", names.join("+"))
            }
            BindAction::Macro(def) => format!("macro {}", def.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacroStep {
    Down(Key),
    Up(Key),
    Wait(Duration),
}

/// Immutable macro body, shared by reference between bindings and runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroDefinition {
    pub id: String,
    pub steps: Vec<MacroStep>,
    /// Number of passes, at least 1
    pub repeat_count: u32,
    pub repeat_delay: Duration,
    pub on_release: ReleaseBehavior,
}

#[derive(Debug, Clone)]
pub struct Layer {
    pub id: String,
    pub name: String,
    pub priority: i32,
    pub activation: Activation,
    pub bindings: HashMap<Key, BindAction>,
}

impl Layer {
    pub fn is_base(&self) -> bool {
        matches!(self.activation, Activation::Base)
    }

    /// Whether the hold condition is met by `held`
    pub fn is_satisfied_by(&self, held: &HashSet<Key>) -> bool {
        match &self.activation {
            Activation::Base => true,
            Activation::Hold(keys) => keys.iter().all(|k| held.contains(k)),
        }
    }
}

/// Output of the action compiler for one profile
#[derive(Debug, Clone)]
pub struct CompiledProfile {
    pub id: String,
    pub name: String,
    /// Stable identities of the devices to grab
    pub input_devices: Vec<String>,
    process_patterns: Vec<Regex>,
    /// Descending priority; the base layer is always last
    layers: Vec<Layer>,
    macros: IndexMap<String, Arc<MacroDefinition>>,
    triggers: HashSet<Key>,
}

impl CompiledProfile {
    /// Assemble a profile; `layers` must already be validated
    pub(crate) fn new(
        id: String,
        name: String,
        input_devices: Vec<String>,
        process_patterns: Vec<Regex>,
        mut layers: Vec<Layer>,
        macros: IndexMap<String, Arc<MacroDefinition>>,
    ) -> Self {
        layers.sort_by(|a, b| {
            a.is_base()
                .cmp(&b.is_base())
                .then_with(|| b.priority.cmp(&a.priority))
        });
        let triggers = layers
            .iter()
            .filter_map(|layer| match &layer.activation {
                Activation::Hold(keys) => Some(keys.iter().copied()),
                Activation::Base => None,
            })
            .flatten()
            .collect();
        Self {
            id,
            name,
            input_devices,
            process_patterns,
            layers,
            macros,
            triggers,
        }
    }

    /// Layers in resolution order
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    pub fn base_layer_index(&self) -> usize {
        self.layers.len() - 1
    }

    /// Physical keys that act as layer holds and never reach the output
    pub fn is_trigger(&self, key: Key) -> bool {
        self.triggers.contains(&key)
    }

    pub fn macro_by_id(&self, id: &str) -> Option<&Arc<MacroDefinition>> {
        self.macros.get(id)
    }

    pub fn macros(&self) -> impl Iterator<Item = &Arc<MacroDefinition>> {
        self.macros.values()
    }

    /// Whether an app-watcher process name selects this profile
    pub fn matches_process(&self, process_name: &str) -> bool {
        self.process_patterns.iter().any(|re| re.is_match(process_name))
    }
}
