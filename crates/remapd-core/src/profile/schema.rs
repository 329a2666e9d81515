// Remapd Profile Schema - TOML with Serde
// Declarative profile document as stored on disk

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use super::ProfileError;

/// Root of a profile file (`profiles/<id>.toml`)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileDocument {
    /// Stable identifier, also the file stem
    pub id: String,

    /// Human readable name
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Stable identities of the devices this profile grabs
    #[serde(default)]
    pub input_devices: Vec<String>,

    /// Process-name patterns consumed by the app watcher
    #[serde(default)]
    pub match_process_names: Vec<String>,

    /// Marks the fallback profile
    #[serde(default)]
    pub is_default: bool,

    /// Ordered layer list; exactly one must be a base layer
    #[serde(default)]
    pub layers: Vec<LayerDocument>,

    /// Macro library
    #[serde(default)]
    pub macros: Vec<MacroDocument>,
}

/// One layer of bindings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LayerDocument {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Keys that must all be held for the layer to be active
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hold_modifiers: Vec<String>,

    /// Single-key shorthand for `hold_modifiers`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_modifier: Option<String>,

    /// Resolution priority; defaults to the layer's position in the list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    #[serde(default)]
    pub bindings: Vec<BindingDocument>,
}

impl LayerDocument {
    /// Hold modifier names, merging the shorthand form
    pub fn hold_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.hold_modifiers.iter().map(String::as_str).collect();
        if let Some(single) = &self.hold_modifier {
            keys.push(single.as_str());
        }
        keys
    }

    pub fn is_base(&self) -> bool {
        self.hold_modifiers.is_empty() && self.hold_modifier.is_none()
    }
}

/// Binding kind as written in profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionKind {
    Key,
    Chord,
    Macro,
    Passthrough,
    Disabled,
}

/// A single physical key binding
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BindingDocument {
    /// Physical key name
    pub input: String,

    pub action: ActionKind,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_keys: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub macro_id: Option<String>,
}

/// What releasing the originating key does to a running macro
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReleaseBehavior {
    #[default]
    Cancel,
    Continue,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MacroDocument {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default = "default_repeat_count")]
    pub repeat_count: u32,

    #[serde(default)]
    pub repeat_delay_ms: u64,

    #[serde(default)]
    pub on_release: ReleaseBehavior,

    #[serde(default)]
    pub steps: Vec<MacroStepDocument>,
}

fn default_repeat_count() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MacroStepKind {
    KeyDown,
    KeyUp,
    KeyPress,
    Delay,
    Text,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MacroStepDocument {
    #[serde(rename = "type")]
    pub kind: MacroStepKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ProfileDocument {
    /// Parse a profile from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ProfileError> {
        toml::from_str(content).map_err(|e| ProfileError::Parse(e.to_string()))
    }

    /// Serialize back to TOML
    pub fn to_toml(&self) -> Result<String, ProfileError> {
        toml::to_string_pretty(self).map_err(|e| ProfileError::Parse(e.to_string()))
    }

    /// Profile with a single empty base layer
    pub fn empty(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: Some("Default profile - no remapping".to_string()),
            input_devices: Vec::new(),
            match_process_names: Vec::new(),
            is_default: true,
            layers: vec![LayerDocument {
                id: "base".to_string(),
                name: "Base Layer".to_string(),
                hold_modifiers: Vec::new(),
                hold_modifier: None,
                priority: None,
                bindings: Vec::new(),
            }],
            macros: Vec::new(),
        }
    }
}
