// Remapd Layer Engine
// Active layer computation, key resolution and the layer-exit sweep

use std::collections::HashSet;

use smallvec::SmallVec;

use crate::profile::{BindAction, CompiledProfile};
use crate::state::{Emission, PressedStateTracker, Source};
use crate::Key;

/// Indices into `CompiledProfile::layers()`, in resolution order
pub type ActiveLayers = SmallVec<[usize; 4]>;

static IMPLICIT_PASSTHROUGH: BindAction = BindAction::PassThrough;

/// Outcome of resolving one physical key
#[derive(Debug, Clone, Copy)]
pub struct Resolved<'a> {
    /// Layer that defined the binding; None for the implicit passthrough
    pub layer: Option<usize>,
    pub action: &'a BindAction,
}

/// Layers whose activation condition is met by `held`, base layer last
pub fn active_layers(profile: &CompiledProfile, held: &HashSet<Key>) -> ActiveLayers {
    profile
        .layers()
        .iter()
        .enumerate()
        .filter(|(_, layer)| layer.is_satisfied_by(held))
        .map(|(index, _)| index)
        .collect()
}

/// First active layer binding `key` wins; unbound keys pass through
pub fn resolve<'a>(profile: &'a CompiledProfile, active: &[usize], key: Key) -> Resolved<'a> {
    for &index in active {
        if let Some(action) = profile.layer(index).and_then(|l| l.bindings.get(&key)) {
            return Resolved {
                layer: Some(index),
                action,
            };
        }
    }
    Resolved {
        layer: None,
        action: &IMPLICIT_PASSTHROUGH,
    }
}

/// Change in the active set caused by one transition
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LayerChange {
    pub entered: ActiveLayers,
    pub exited: ActiveLayers,
}

impl LayerChange {
    pub fn is_empty(&self) -> bool {
        self.entered.is_empty() && self.exited.is_empty()
    }
}

/// Tracks the active layer set across transitions
#[derive(Debug, Default, Clone)]
pub struct LayerEngine {
    active: ActiveLayers,
}

impl LayerEngine {
    pub fn new(profile: &CompiledProfile) -> Self {
        Self {
            active: active_layers(profile, &HashSet::new()),
        }
    }

    pub fn active(&self) -> &[usize] {
        &self.active
    }

    /// Recompute the active set from the held keys
    pub fn update(&mut self, profile: &CompiledProfile, held: &HashSet<Key>) -> LayerChange {
        let next = active_layers(profile, held);
        let change = LayerChange {
            entered: next.iter().filter(|i| !self.active.contains(i)).copied().collect(),
            exited: self.active.iter().filter(|i| !next.contains(i)).copied().collect(),
        };
        self.active = next;
        change
    }

    pub fn resolve<'a>(&self, profile: &'a CompiledProfile, key: Key) -> Resolved<'a> {
        resolve(profile, &self.active, key)
    }

    /// Ids of the active layers, for diagnostics
    pub fn active_ids<'a>(&self, profile: &'a CompiledProfile) -> Vec<&'a str> {
        self.active
            .iter()
            .filter_map(|i| profile.layer(*i))
            .map(|l| l.id.as_str())
            .collect()
    }
}

/// Release everything held by physical keys bound through a layer that just exited.
///
/// The physical keys stay down but produce nothing until pressed again.
pub fn sweep_exited(tracker: &mut PressedStateTracker, exited: &[usize]) -> Vec<Emission> {
    if exited.is_empty() {
        return Vec::new();
    }
    let stale: Vec<_> = tracker
        .held_physical()
        .filter(|(_, state)| state.origin.is_some_and(|o| exited.contains(&o)))
        .map(|(dk, _)| dk)
        .collect();

    let mut out = Vec::new();
    for dk in stale {
        log::debug!("Layer exit releases output held by {dk}");
        out.extend(tracker.release_source(Source::Physical(dk)));
        tracker.set_origin(dk, None);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{compile, MacroLimits};
    use crate::input::{DeviceId, DeviceKey};
    use crate::profile::ProfileDocument;
    use std::time::Instant;

    const A: Key = Key(30);
    const M: Key = Key(50);
    const N: Key = Key(49);
    const X: Key = Key(45);
    const Y: Key = Key(21);

    fn profile() -> CompiledProfile {
        let doc = ProfileDocument::from_toml(
            r#"
id = "layers"
name = "Layers"

[[layers]]
id = "base"
[[layers.bindings]]
input = "A"
action = "key"
output_keys = ["X"]

[[layers]]
id = "m"
hold_modifier = "M"
priority = 1
[[layers.bindings]]
input = "A"
action = "key"
output_keys = ["Y"]

[[layers]]
id = "mn"
hold_modifiers = ["M", "N"]
priority = 2
[[layers.bindings]]
input = "A"
action = "disabled"
"#,
        )
        .unwrap();
        compile(&doc, &MacroLimits::default()).unwrap()
    }

    fn held(keys: &[Key]) -> HashSet<Key> {
        keys.iter().copied().collect()
    }

    #[test]
    fn test_base_only_when_nothing_held() {
        let p = profile();
        let active = active_layers(&p, &held(&[]));
        assert_eq!(active.as_slice(), &[p.base_layer_index()]);
        let r = resolve(&p, &active, A);
        assert!(matches!(r.action, BindAction::Chord(keys) if keys.as_slice() == [X]));
    }

    #[test]
    fn test_highest_priority_wins() {
        let p = profile();
        let active = active_layers(&p, &held(&[M]));
        assert!(matches!(resolve(&p, &active, A).action, BindAction::Chord(k) if k.as_slice() == [Y]));

        let active = active_layers(&p, &held(&[M, N]));
        assert_eq!(active.len(), 3);
        assert!(matches!(resolve(&p, &active, A).action, BindAction::Disable));
    }

    #[test]
    fn test_unbound_key_passes_through() {
        let p = profile();
        let active = active_layers(&p, &held(&[]));
        let r = resolve(&p, &active, Key(48));
        assert!(r.layer.is_none());
        assert!(matches!(r.action, BindAction::PassThrough));
    }

    #[test]
    fn test_engine_reports_changes() {
        let p = profile();
        let mut engine = LayerEngine::new(&p);
        let change = engine.update(&p, &held(&[M]));
        assert_eq!(change.entered.len(), 1);
        assert!(change.exited.is_empty());
        assert_eq!(engine.active_ids(&p), vec!["m", "base"]);

        let change = engine.update(&p, &held(&[]));
        assert_eq!(change.exited.len(), 1);
        assert!(engine.update(&p, &held(&[])).is_empty());
    }

    #[test]
    fn test_sweep_releases_keys_from_exited_layer() {
        let p = profile();
        let mut engine = LayerEngine::new(&p);
        let mut tracker = PressedStateTracker::new();
        let a = DeviceKey::new(DeviceId(0), A);

        engine.update(&p, &held(&[M]));
        tracker.on_physical_down(a, Instant::now());
        let r = engine.resolve(&p, A);
        tracker.set_origin(a, r.layer);
        tracker.hold(Source::Physical(a), &r.action.held_keys(A));
        assert_eq!(tracker.synthetic_down(), vec![Y]);

        let change = engine.update(&p, &held(&[A]));
        assert_eq!(sweep_exited(&mut tracker, &change.exited), vec![Emission::Up(Y)]);
        assert!(tracker.is_physical_down(a));
        assert!(tracker.synthetic_down().is_empty());
        assert_eq!(tracker.on_physical_up(a), Some(vec![]));
    }
}
