// Remapd End-to-End Scenarios
//
// Drive the event actor the way device readers and the control plane do,
// with a recording output device and a hand-fired macro timer.
//
// Run with: cargo test --test scenarios

use std::sync::Arc;

use remapd_core::macros::ManualTimer;
use remapd_core::{
    compile, CompiledProfile, DeviceId, Engine, Key, KeyTransition, MacroLimits, Message,
    OutputSink, ProfileDocument, RawEvent, RecordingDevice,
};

// =========================================================================
// Test Helpers
// =========================================================================

const A: Key = Key(30);
const B: Key = Key(48);
const C: Key = Key(46);
const D: Key = Key(32);
const M: Key = Key(50);
const N: Key = Key(49);
const S: Key = Key(31);
const X: Key = Key(45);
const Y: Key = Key(21);
const CTRL: Key = Key(29);
const SHIFT: Key = Key(42);

struct Harness {
    engine: Engine,
    output: RecordingDevice,
    timer: ManualTimer,
}

impl Harness {
    fn new(toml: &str) -> Self {
        let output = RecordingDevice::new();
        let timer = ManualTimer::new();
        let engine = Engine::new(
            profile(toml),
            OutputSink::new(Box::new(output.clone())),
            Box::new(timer.clone()),
        );
        Self {
            engine,
            output,
            timer,
        }
    }

    fn send(&mut self, device: usize, key: Key, transition: KeyTransition) {
        self.engine
            .handle(Message::Input {
                device: DeviceId(device),
                event: RawEvent::key(key, transition),
            })
            .unwrap();
    }

    fn press(&mut self, key: Key) {
        self.send(0, key, KeyTransition::Press);
    }

    fn release(&mut self, key: Key) {
        self.send(0, key, KeyTransition::Release);
    }

    /// Fire the oldest pending macro tick; false when none is pending
    fn tick(&mut self) -> bool {
        let Some(tick) = self.timer.pop() else {
            return false;
        };
        self.engine
            .handle(Message::MacroTick {
                run: tick.run,
                generation: tick.generation,
            })
            .unwrap();
        true
    }

    fn lose_device(&mut self, device: usize) {
        self.engine
            .handle(Message::DeviceLost {
                device: DeviceId(device),
                reason: "No such device".to_string(),
            })
            .unwrap();
    }

    /// Synthetic keys the output device and the tracker agree are down
    fn assert_consistent(&self) {
        let mut tracked = self.engine.tracker().synthetic_down();
        let mut device = self.engine.sink().down_keys();
        tracked.sort();
        device.sort();
        assert_eq!(tracked, device, "tracker and output device disagree");
    }

    fn assert_balanced(&self) {
        let mut down = std::collections::HashSet::new();
        for (key, pressed) in self.output.keys() {
            if pressed {
                assert!(down.insert(key), "{key} pressed twice without a release");
            } else {
                assert!(down.remove(&key), "{key} released while up");
            }
        }
        assert!(down.is_empty(), "keys left down: {down:?}");
    }
}

fn profile(toml: &str) -> Arc<CompiledProfile> {
    let doc = ProfileDocument::from_toml(toml).unwrap();
    Arc::new(compile(&doc, &MacroLimits::default()).unwrap())
}

const A_TO_X: &str = r#"
id = "a-to-x"
name = "A to X"
[[layers]]
id = "base"
[[layers.bindings]]
input = "A"
action = "key"
output_keys = ["X"]
"#;

const A_TO_Y: &str = r#"
id = "a-to-y"
name = "A to Y"
[[layers]]
id = "base"
[[layers.bindings]]
input = "A"
action = "key"
output_keys = ["Y"]
"#;

const LAYERED: &str = r#"
id = "layered"
name = "Layered"

[[layers]]
id = "base"
[[layers.bindings]]
input = "A"
action = "key"
output_keys = ["X"]
[[layers.bindings]]
input = "B"
action = "macro"
macro_id = "tap-c"
[[layers.bindings]]
input = "N"
action = "chord"
output_keys = ["CTRL", "S"]

[[layers]]
id = "m"
hold_modifier = "M"
priority = 1
[[layers.bindings]]
input = "A"
action = "key"
output_keys = ["Y"]
[[layers.bindings]]
input = "N"
action = "disabled"

[[macros]]
id = "tap-c"
on_release = "continue"
[[macros.steps]]
type = "key_down"
key = "C"
[[macros.steps]]
type = "delay"
delay_ms = 20
[[macros.steps]]
type = "key_up"
key = "C"
[[macros.steps]]
type = "key_press"
key = "D"
"#;

const SHIFTED: &str = r#"
id = "shifted"
name = "Shifted"
[[layers]]
id = "base"
[[layers.bindings]]
input = "A"
action = "chord"
output_keys = ["SHIFT", "X"]
[[layers.bindings]]
input = "B"
action = "macro"
macro_id = "hold-shift"

[[macros]]
id = "hold-shift"
[[macros.steps]]
type = "key_down"
key = "SHIFT"
[[macros.steps]]
type = "key_down"
key = "C"
[[macros.steps]]
type = "delay"
delay_ms = 500
[[macros.steps]]
type = "key_up"
key = "C"
[[macros.steps]]
type = "key_up"
key = "SHIFT"
"#;

const LAYER_MACRO: &str = r#"
id = "layer-macro"
name = "Layer Macro"

[[layers]]
id = "base"

[[layers]]
id = "l"
hold_modifier = "M"
priority = 1
[[layers.bindings]]
input = "B"
action = "macro"
macro_id = "hold-c"

[[macros]]
id = "hold-c"
on_release = "continue"
[[macros.steps]]
type = "key_down"
key = "C"
[[macros.steps]]
type = "delay"
delay_ms = 1000
[[macros.steps]]
type = "key_up"
key = "C"
"#;

// =========================================================================
// Scenarios
// =========================================================================

#[test]
fn test_single_key_remap() {
    let mut h = Harness::new(A_TO_X);
    h.press(A);
    assert_eq!(h.output.keys(), vec![(X, true)]);
    h.release(A);
    assert_eq!(h.output.keys(), vec![(X, true), (X, false)]);
    assert!(h.engine.tracker().is_idle());
}

#[test]
fn test_unbound_keys_pass_through() {
    let mut h = Harness::new(A_TO_X);
    h.press(S);
    h.release(S);
    assert_eq!(h.output.keys(), vec![(S, true), (S, false)]);
}

#[test]
fn test_layer_exit_releases_keys_pressed_in_layer() {
    let mut h = Harness::new(LAYERED);
    h.press(M);
    assert!(h.output.keys().is_empty(), "layer trigger is consumed");

    h.press(A);
    assert_eq!(h.output.keys(), vec![(Y, true)]);

    h.release(M);
    assert_eq!(h.output.keys(), vec![(Y, true), (Y, false)]);

    // Still physically held, but no longer justified by any layer
    h.release(A);
    assert_eq!(h.output.keys(), vec![(Y, true), (Y, false)]);

    h.output.clear();
    h.press(A);
    h.release(A);
    assert_eq!(h.output.keys(), vec![(X, true), (X, false)]);
    h.assert_consistent();
}

#[test]
fn test_layer_exit_cancels_macro_started_in_layer() {
    let mut h = Harness::new(LAYER_MACRO);
    h.press(M);
    h.press(B);
    assert_eq!(h.output.keys(), vec![(C, true)]);

    h.release(M);
    assert_eq!(h.output.keys(), vec![(C, true), (C, false)]);
    assert_eq!(h.engine.macro_runs(), 0);
    assert!(h.timer.pending().is_empty());
    h.assert_consistent();

    // B is still held but no longer bound; its release emits nothing
    h.release(B);
    h.assert_balanced();
    assert!(h.engine.tracker().is_idle());
}

#[test]
fn test_layer_exit_cancels_continuing_macro_after_origin_release() {
    let mut h = Harness::new(LAYER_MACRO);
    h.press(M);
    h.press(B);
    h.release(B);
    assert_eq!(h.engine.macro_runs(), 1);

    h.release(M);
    assert_eq!(h.output.keys(), vec![(C, true), (C, false)]);
    assert_eq!(h.engine.macro_runs(), 0);
}

#[test]
fn test_disabled_binding_swallows_key() {
    let mut h = Harness::new(LAYERED);
    h.press(M);
    h.press(N);
    h.release(N);
    h.release(M);
    assert!(h.output.keys().is_empty());
}

#[test]
fn test_chord_presses_in_order_and_releases_in_reverse() {
    let mut h = Harness::new(LAYERED);
    h.press(N);
    h.release(N);
    assert_eq!(
        h.output.keys(),
        vec![(CTRL, true), (S, true), (S, false), (CTRL, false)]
    );
}

#[test]
fn test_macro_runs_to_completion_after_release() {
    let mut h = Harness::new(LAYERED);
    h.press(B);
    h.release(B);
    assert_eq!(h.output.keys(), vec![(C, true)]);
    assert_eq!(h.engine.macro_runs(), 1);

    assert!(h.tick());
    assert_eq!(
        h.output.keys(),
        vec![(C, true), (C, false), (D, true), (D, false)]
    );
    assert_eq!(h.engine.macro_runs(), 0);
    assert!(!h.tick());
}

#[test]
fn test_macro_repress_restarts_run() {
    let mut h = Harness::new(LAYERED);
    h.press(B);
    h.release(B);
    h.press(B);
    assert_eq!(h.output.keys(), vec![(C, true), (C, false), (C, true)]);
    assert_eq!(h.engine.macro_runs(), 1);
    assert_eq!(h.timer.cancelled().len(), 1);
    assert_eq!(h.timer.pending().len(), 1);

    h.release(B);
    while h.tick() {}
    h.assert_balanced();
    assert_eq!(h.engine.macro_runs(), 0);
}

#[test]
fn test_macro_cancel_on_release_balances_downs() {
    let mut h = Harness::new(SHIFTED);
    h.press(B);
    assert_eq!(h.output.keys(), vec![(SHIFT, true), (C, true)]);
    h.release(B);
    assert_eq!(
        h.output.keys(),
        vec![(SHIFT, true), (C, true), (C, false), (SHIFT, false)]
    );
    assert_eq!(h.engine.macro_runs(), 0);
    assert!(h.timer.pending().is_empty());
}

#[test]
fn test_macro_and_chord_share_a_key() {
    let mut h = Harness::new(SHIFTED);
    h.press(A);
    h.press(B);
    // SHIFT is already down for the chord; the macro only adds C
    assert_eq!(h.output.keys(), vec![(SHIFT, true), (X, true), (C, true)]);

    h.release(B);
    assert_eq!(
        h.output.keys(),
        vec![(SHIFT, true), (X, true), (C, true), (C, false)]
    );
    assert_eq!(h.engine.tracker().refcount(SHIFT), 1);

    h.release(A);
    h.assert_balanced();
}

#[test]
fn test_hot_unplug_force_releases_device_keys() {
    let mut h = Harness::new(LAYERED);
    h.send(0, A, KeyTransition::Press);
    h.send(1, N, KeyTransition::Press);
    assert_eq!(h.output.keys(), vec![(X, true), (CTRL, true), (S, true)]);

    h.lose_device(0);
    assert_eq!(
        h.output.keys(),
        vec![(X, true), (CTRL, true), (S, true), (X, false)]
    );

    // Release arriving after reconnect is ignored
    h.send(0, A, KeyTransition::Release);
    h.send(1, N, KeyTransition::Release);
    h.assert_balanced();
    assert!(h.engine.tracker().is_idle());
}

#[test]
fn test_hot_unplug_of_layer_trigger_exits_layer() {
    let mut h = Harness::new(LAYERED);
    h.send(0, M, KeyTransition::Press);
    h.send(1, A, KeyTransition::Press);
    assert_eq!(h.output.keys(), vec![(Y, true)]);

    h.lose_device(0);
    assert_eq!(h.output.keys(), vec![(Y, true), (Y, false)]);
    h.send(1, A, KeyTransition::Release);
    h.assert_balanced();
}

#[test]
fn test_profile_swap_to_equivalent_profile_emits_nothing() {
    let mut h = Harness::new(A_TO_X);
    h.press(A);
    let report = h.engine.set_profile(profile(&A_TO_X.replace("a-to-x", "a-to-x-copy"))).unwrap();
    assert_eq!(report.previous, "a-to-x");
    assert_eq!(report.profile, "a-to-x-copy");
    assert_eq!((report.released, report.pressed), (0, 0));
    assert_eq!(h.output.keys(), vec![(X, true)]);

    h.release(A);
    assert_eq!(h.output.keys(), vec![(X, true), (X, false)]);
}

#[test]
fn test_profile_swap_moves_held_keys() {
    let mut h = Harness::new(A_TO_X);
    h.press(A);
    let report = h.engine.set_profile(profile(A_TO_Y)).unwrap();
    assert_eq!((report.released, report.pressed), (1, 1));
    assert_eq!(h.output.keys(), vec![(X, true), (X, false), (Y, true)]);

    h.release(A);
    h.assert_balanced();
}

#[test]
fn test_profile_swap_cancels_macros() {
    let mut h = Harness::new(LAYERED);
    h.press(B);
    let report = h.engine.set_profile(profile(A_TO_X)).unwrap();
    assert_eq!(report.cancelled_macros, 1);
    assert!(h.timer.pending().is_empty());

    // B is held physically; the new profile passes it through
    assert_eq!(report.pressed, 1);
    assert_eq!(h.output.keys(), vec![(C, true), (C, false), (B, true)]);
    h.release(B);
    h.assert_balanced();
}

/// Small deterministic generator so failures reproduce
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn pick<T: Copy>(&mut self, items: &[T]) -> T {
        items[(self.next() % items.len() as u64) as usize]
    }
}

#[test]
fn test_no_stuck_keys_over_random_sequences() {
    let keys = [A, B, M, N, S];
    let profiles = [profile(LAYERED), profile(SHIFTED), profile(A_TO_Y), profile(LAYER_MACRO)];

    for seed in 1..=40u64 {
        let mut rng = XorShift(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1);
        let mut h = Harness::new(LAYERED);

        for _ in 0..300 {
            let device = (rng.next() % 2) as usize;
            match rng.next() % 20 {
                0..=8 => h.send(device, rng.pick(&keys), KeyTransition::Press),
                9..=16 => h.send(device, rng.pick(&keys), KeyTransition::Release),
                17 => {
                    h.tick();
                }
                18 => h.lose_device(device),
                _ => {
                    let next = Arc::clone(&profiles[(rng.next() % profiles.len() as u64) as usize]);
                    h.engine.set_profile(next).unwrap();
                }
            }
            h.assert_consistent();
        }

        let held: Vec<_> = h.engine.tracker().held_physical().map(|(dk, _)| dk).collect();
        for dk in held {
            h.send(dk.device.0, dk.key, KeyTransition::Release);
        }
        while h.tick() {}

        h.assert_consistent();
        assert!(h.engine.sink().down_keys().is_empty(), "seed {seed}: keys stuck down");
        assert!(h.engine.tracker().is_idle(), "seed {seed}: tracker not idle");
        h.assert_balanced();
    }
}

#[test]
fn test_shutdown_releases_everything() {
    let mut h = Harness::new(SHIFTED);
    h.press(A);
    h.press(B);
    let output = h.output.clone();
    let (tx, rx) = std::sync::mpsc::channel();
    tx.send(Message::Shutdown).unwrap();
    h.engine.run(rx).unwrap();

    let mut down = std::collections::HashSet::new();
    for (key, pressed) in output.keys() {
        if pressed {
            down.insert(key);
        } else {
            down.remove(&key);
        }
    }
    assert!(down.is_empty());
}
