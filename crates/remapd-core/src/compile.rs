// Remapd Action Compiler
// Validates a profile document and lowers it into a CompiledProfile

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use regex::Regex;
use smallvec::SmallVec;

use crate::key::{ascii_key, validate_key};
use crate::profile::{
    ActionKind, Activation, BindAction, BindingDocument, CompiledProfile, Layer, LayerDocument,
    MacroDefinition, MacroDocument, MacroStep, MacroStepKind, ProfileDocument,
};
use crate::Key;

/// Bounds applied to macros at compile time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacroLimits {
    pub max_repeat: u32,
    pub max_repeat_delay: Duration,
    pub max_step_delay: Duration,
    /// Upper bound on steps after `text` expansion
    pub max_steps: usize,
}

impl Default for MacroLimits {
    fn default() -> Self {
        Self {
            max_repeat: 100,
            max_repeat_delay: Duration::from_millis(5_000),
            max_step_delay: Duration::from_millis(60_000),
            max_steps: 1024,
        }
    }
}

/// Compilation failures; every problem found is reported at once
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("profile '{profile}' failed validation: {}", .issues.join("; "))]
    ProfileValidation { profile: String, issues: Vec<String> },

    #[error("profile '{profile}' has invalid macro configuration: {}", .issues.join("; "))]
    MacroConfig { profile: String, issues: Vec<String> },
}

impl CompileError {
    pub fn issues(&self) -> &[String] {
        match self {
            CompileError::ProfileValidation { issues, .. } | CompileError::MacroConfig { issues, .. } => {
                issues
            }
        }
    }
}

#[derive(Default)]
struct Issues {
    profile: Vec<String>,
    macros: Vec<String>,
}

impl Issues {
    fn profile(&mut self, message: String) {
        self.profile.push(message);
    }

    fn macro_config(&mut self, message: String) {
        self.macros.push(message);
    }

    fn into_result(self, profile_id: &str) -> Result<(), CompileError> {
        if !self.profile.is_empty() {
            let mut issues = self.profile;
            issues.extend(self.macros);
            return Err(CompileError::ProfileValidation {
                profile: profile_id.to_string(),
                issues,
            });
        }
        if !self.macros.is_empty() {
            return Err(CompileError::MacroConfig {
                profile: profile_id.to_string(),
                issues: self.macros,
            });
        }
        Ok(())
    }
}

/// Compile a profile document with the given macro bounds
pub fn compile(doc: &ProfileDocument, limits: &MacroLimits) -> Result<CompiledProfile, CompileError> {
    let mut issues = Issues::default();

    let macros = compile_macros(&doc.macros, limits, &mut issues);
    let layers = compile_layers(&doc.layers, &macros, &mut issues);
    check_layer_conflicts(&layers, &mut issues);

    let mut process_patterns = Vec::with_capacity(doc.match_process_names.len());
    for pattern in &doc.match_process_names {
        match Regex::new(pattern) {
            Ok(re) => process_patterns.push(re),
            Err(e) => issues.profile(format!("process pattern '{pattern}': {e}")),
        }
    }

    issues.into_result(&doc.id)?;

    log::debug!(
        "Compiled profile '{}': {} layers, {} macros",
        doc.id,
        layers.len(),
        macros.len()
    );

    Ok(CompiledProfile::new(
        doc.id.clone(),
        doc.name.clone(),
        doc.input_devices.clone(),
        process_patterns,
        layers,
        macros,
    ))
}

fn compile_macros(
    docs: &[MacroDocument],
    limits: &MacroLimits,
    issues: &mut Issues,
) -> IndexMap<String, Arc<MacroDefinition>> {
    let mut macros = IndexMap::with_capacity(docs.len());
    for doc in docs {
        if macros.contains_key(&doc.id) {
            issues.profile(format!("duplicate macro id '{}'", doc.id));
            continue;
        }
        if let Some(def) = compile_macro(doc, limits, issues) {
            macros.insert(doc.id.clone(), Arc::new(def));
        }
    }
    macros
}

fn compile_macro(doc: &MacroDocument, limits: &MacroLimits, issues: &mut Issues) -> Option<MacroDefinition> {
    let ctx = format!("macro '{}'", doc.id);
    let before = issues.profile.len() + issues.macros.len();

    if doc.repeat_count == 0 || doc.repeat_count > limits.max_repeat {
        issues.macro_config(format!(
            "{ctx}: repeat_count {} outside 1..={}",
            doc.repeat_count, limits.max_repeat
        ));
    }
    let repeat_delay = Duration::from_millis(doc.repeat_delay_ms);
    if doc.repeat_count > 1 && doc.repeat_delay_ms == 0 {
        issues.macro_config(format!(
            "{ctx}: repeat_delay_ms must be at least 1 when repeating"
        ));
    }
    if repeat_delay > limits.max_repeat_delay {
        issues.macro_config(format!(
            "{ctx}: repeat_delay_ms {} exceeds {}",
            doc.repeat_delay_ms,
            limits.max_repeat_delay.as_millis()
        ));
    }

    let mut steps = Vec::with_capacity(doc.steps.len());
    for (index, step) in doc.steps.iter().enumerate() {
        let step_ctx = format!("{ctx} step {}", index + 1);
        match step.kind {
            MacroStepKind::KeyDown | MacroStepKind::KeyUp | MacroStepKind::KeyPress => {
                let Some(name) = step.key.as_deref() else {
                    issues.profile(format!("{step_ctx}: {} needs a key", step.kind));
                    continue;
                };
                let key = match validate_key(name) {
                    Ok(key) => key,
                    Err(e) => {
                        issues.profile(format!("{step_ctx}: {e}"));
                        continue;
                    }
                };
                match step.kind {
                    MacroStepKind::KeyDown => steps.push(MacroStep::Down(key)),
                    MacroStepKind::KeyUp => steps.push(MacroStep::Up(key)),
                    _ => {
                        steps.push(MacroStep::Down(key));
                        steps.push(MacroStep::Up(key));
                    }
                }
            }
            MacroStepKind::Delay => {
                let ms = step.delay_ms.unwrap_or(0);
                let delay = Duration::from_millis(ms);
                if ms == 0 || delay > limits.max_step_delay {
                    issues.macro_config(format!(
                        "{step_ctx}: delay_ms {ms} outside 1..={}",
                        limits.max_step_delay.as_millis()
                    ));
                    continue;
                }
                steps.push(MacroStep::Wait(delay));
            }
            MacroStepKind::Text => {
                let text = step.text.as_deref().unwrap_or_default();
                if text.is_empty() {
                    issues.profile(format!("{step_ctx}: text step is empty"));
                    continue;
                }
                let shift = Key::from(42);
                for ch in text.chars() {
                    match ascii_key(ch) {
                        Some((key, true)) => steps.extend([
                            MacroStep::Down(shift),
                            MacroStep::Down(key),
                            MacroStep::Up(key),
                            MacroStep::Up(shift),
                        ]),
                        Some((key, false)) => {
                            steps.extend([MacroStep::Down(key), MacroStep::Up(key)])
                        }
                        None => issues.profile(format!(
                            "{step_ctx}: character {ch:?} cannot be typed"
                        )),
                    }
                }
            }
        }
    }

    if steps.len() > limits.max_steps {
        issues.macro_config(format!(
            "{ctx}: {} steps exceeds the limit of {}",
            steps.len(),
            limits.max_steps
        ));
    }

    if issues.profile.len() + issues.macros.len() != before {
        return None;
    }
    if steps.is_empty() {
        log::warn!("{ctx} has no steps");
    }

    Some(MacroDefinition {
        id: doc.id.clone(),
        steps,
        repeat_count: doc.repeat_count,
        repeat_delay,
        on_release: doc.on_release,
    })
}

fn compile_layers(
    docs: &[LayerDocument],
    macros: &IndexMap<String, Arc<MacroDefinition>>,
    issues: &mut Issues,
) -> Vec<Layer> {
    let base_count = docs.iter().filter(|l| l.is_base()).count();
    if base_count != 1 {
        issues.profile(format!(
            "expected exactly one base layer (no hold modifiers), found {base_count}"
        ));
    }

    let mut seen_ids = HashSet::new();
    let mut layers = Vec::with_capacity(docs.len());
    for (position, doc) in docs.iter().enumerate() {
        if !seen_ids.insert(doc.id.as_str()) {
            issues.profile(format!("duplicate layer id '{}'", doc.id));
            continue;
        }
        let ctx = format!("layer '{}'", doc.id);

        let activation = if doc.is_base() {
            Activation::Base
        } else {
            let mut hold: SmallVec<[Key; 2]> = SmallVec::new();
            for name in doc.hold_keys() {
                match validate_key(name) {
                    Ok(key) if !hold.contains(&key) => hold.push(key),
                    Ok(_) => {}
                    Err(e) => issues.profile(format!("{ctx} hold modifier: {e}")),
                }
            }
            Activation::Hold(hold)
        };

        let mut bindings = HashMap::with_capacity(doc.bindings.len());
        for binding in &doc.bindings {
            let input = match validate_key(&binding.input) {
                Ok(key) => key,
                Err(e) => {
                    issues.profile(format!("{ctx}: {e}"));
                    continue;
                }
            };
            let Some(action) = compile_binding(binding, macros, &ctx, issues) else {
                continue;
            };
            if bindings.insert(input, action).is_some() {
                issues.profile(format!("{ctx}: key {input} is bound more than once"));
            }
        }

        layers.push(Layer {
            id: doc.id.clone(),
            name: if doc.name.is_empty() { doc.id.clone() } else { doc.name.clone() },
            priority: doc.priority.unwrap_or(position as i32),
            activation,
            bindings,
        });
    }
    layers
}

fn compile_binding(
    binding: &BindingDocument,
    macros: &IndexMap<String, Arc<MacroDefinition>>,
    ctx: &str,
    issues: &mut Issues,
) -> Option<BindAction> {
    let ctx = format!("{ctx} binding {}", binding.input);
    match binding.action {
        ActionKind::Key | ActionKind::Chord => {
            if binding.output_keys.is_empty() {
                issues.profile(format!("{ctx}: {} needs at least one output key", binding.action));
                return None;
            }
            let mut keys = SmallVec::new();
            let mut ok = true;
            for name in &binding.output_keys {
                match validate_key(name) {
                    Ok(key) if !keys.contains(&key) => keys.push(key),
                    Ok(_) => {}
                    Err(e) => {
                        issues.profile(format!("{ctx}: output {e}"));
                        ok = false;
                    }
                }
            }
            ok.then_some(BindAction::Chord(keys))
        }
        ActionKind::Macro => {
            let Some(id) = binding.macro_id.as_deref() else {
                issues.profile(format!("{ctx}: macro binding needs a macro_id"));
                return None;
            };
            match macros.get(id) {
                Some(def) => Some(BindAction::Macro(Arc::clone(def))),
                None => {
                    issues.profile(format!("{ctx}: macro '{id}' not found"));
                    None
                }
            }
        }
        ActionKind::Passthrough => Some(BindAction::PassThrough),
        ActionKind::Disabled => Some(BindAction::Disable),
    }
}

fn check_layer_conflicts(layers: &[Layer], issues: &mut Issues) {
    let triggers: HashSet<Key> = layers
        .iter()
        .filter_map(|l| match &l.activation {
            Activation::Hold(keys) => Some(keys.iter().copied()),
            Activation::Base => None,
        })
        .flatten()
        .collect();

    for layer in layers {
        if let Activation::Hold(keys) = &layer.activation {
            if keys.is_empty() {
                issues.profile(format!("layer '{}' has no valid hold modifier", layer.id));
            }
        }
        let mut bound_triggers: Vec<Key> = layer
            .bindings
            .keys()
            .filter(|k| triggers.contains(k))
            .copied()
            .collect();
        bound_triggers.sort();
        for key in bound_triggers {
            issues.profile(format!(
                "layer '{}': key {key} is a layer hold modifier and cannot be bound",
                layer.id
            ));
        }
    }

    let holds: Vec<&Layer> = layers.iter().filter(|l| !l.is_base()).collect();
    for (i, a) in holds.iter().enumerate() {
        for b in &holds[i + 1..] {
            if a.priority != b.priority {
                continue;
            }
            let (Activation::Hold(ka), Activation::Hold(kb)) = (&a.activation, &b.activation) else {
                continue;
            };
            let overlapping_hold = ka.iter().any(|k| kb.contains(k));
            let shared_binding = a.bindings.keys().any(|k| b.bindings.contains_key(k));
            if overlapping_hold || shared_binding {
                issues.profile(format!(
                    "layers '{}' and '{}' have equal priority {} and can apply to the same key",
                    a.id, b.id, a.priority
                ));
            }
        }
    }
}
