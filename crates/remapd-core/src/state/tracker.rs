// Remapd Pressed-State Tracker
// Physical key table plus reference-counted synthetic keys

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Instant;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::input::{DeviceId, DeviceKey};
use crate::macros::RunId;
use crate::Key;

/// Logical holder of synthetic keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Physical(DeviceKey),
    Macro(RunId),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Physical(dk) => write!(f, "{dk}"),
            Source::Macro(run) => write!(f, "{run}"),
        }
    }
}

/// A synthetic key transition to be written to the output device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Emission {
    Down(Key),
    Up(Key),
}

impl Emission {
    pub fn key(self) -> Key {
        match self {
            Emission::Down(key) | Emission::Up(key) => key,
        }
    }

    pub fn is_down(self) -> bool {
        matches!(self, Emission::Down(_))
    }
}

impl fmt::Display for Emission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Emission::Down(key) => write!(f, "down {key}"),
            Emission::Up(key) => write!(f, "up {key}"),
        }
    }
}

/// A held physical key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalKey {
    pub pressed_at: Instant,
    /// Index of the layer whose binding produced this key's output
    pub origin: Option<usize>,
}

type Held = SmallVec<[Key; 4]>;

/// Authoritative record of physical and synthetic key state.
///
/// A synthetic key is down iff its reference count is non-zero. Each
/// source contributes at most one reference per key, so releasing a
/// source always balances what it pressed.
#[derive(Debug, Default)]
pub struct PressedStateTracker {
    /// Insertion order is press order
    physical: IndexMap<DeviceKey, PhysicalKey>,
    holdings: HashMap<Source, Held>,
    /// Insertion order is the order keys went down
    refcounts: IndexMap<Key, u32>,
}

impl PressedStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a physical press; false when the key was already down
    pub fn on_physical_down(&mut self, key: DeviceKey, at: Instant) -> bool {
        if self.physical.contains_key(&key) {
            return false;
        }
        self.physical.insert(
            key,
            PhysicalKey {
                pressed_at: at,
                origin: None,
            },
        );
        true
    }

    /// Record a physical release and drop everything it held.
    ///
    /// Returns None when the key was not down.
    pub fn on_physical_up(&mut self, key: DeviceKey) -> Option<Vec<Emission>> {
        self.physical.shift_remove(&key)?;
        Some(self.release_source(Source::Physical(key)))
    }

    pub fn set_origin(&mut self, key: DeviceKey, layer: Option<usize>) {
        if let Some(state) = self.physical.get_mut(&key) {
            state.origin = layer;
        }
    }

    pub fn physical(&self, key: DeviceKey) -> Option<&PhysicalKey> {
        self.physical.get(&key)
    }

    pub fn is_physical_down(&self, key: DeviceKey) -> bool {
        self.physical.contains_key(&key)
    }

    /// Add `source`'s reference to each key, emitting downs for newly pressed keys
    pub fn hold(&mut self, source: Source, keys: &[Key]) -> Vec<Emission> {
        let mut out = Vec::new();
        let held = self.holdings.entry(source).or_default();
        for &key in keys {
            if held.contains(&key) {
                continue;
            }
            held.push(key);
            let count = self.refcounts.entry(key).or_insert(0);
            *count += 1;
            if *count == 1 {
                out.push(Emission::Down(key));
            }
        }
        out
    }

    /// Drop one key held by `source`; Some(Up) when it was the last reference
    pub fn release_key_from(&mut self, source: Source, key: Key) -> Option<Emission> {
        let held = self.holdings.get_mut(&source)?;
        let pos = held.iter().position(|k| *k == key)?;
        held.remove(pos);
        if held.is_empty() {
            self.holdings.remove(&source);
        }
        self.decrement(key)
    }

    /// Drop every key held by `source`, in reverse press order
    pub fn release_source(&mut self, source: Source) -> Vec<Emission> {
        let Some(held) = self.holdings.remove(&source) else {
            return Vec::new();
        };
        held.into_iter()
            .rev()
            .filter_map(|key| self.decrement(key))
            .collect()
    }

    fn decrement(&mut self, key: Key) -> Option<Emission> {
        let count = self.refcounts.get_mut(&key)?;
        *count -= 1;
        if *count == 0 {
            self.refcounts.shift_remove(&key);
            Some(Emission::Up(key))
        } else {
            None
        }
    }

    /// Keys held by a source
    pub fn holdings(&self, source: Source) -> &[Key] {
        self.holdings.get(&source).map(|h| h.as_slice()).unwrap_or(&[])
    }

    /// Held physical keys in press order
    pub fn held_physical(&self) -> impl Iterator<Item = (DeviceKey, &PhysicalKey)> + '_ {
        self.physical.iter().map(|(dk, state)| (*dk, state))
    }

    /// Key codes held on any device, used for layer activation
    pub fn held_codes(&self) -> HashSet<Key> {
        self.physical.keys().map(|dk| dk.key).collect()
    }

    pub fn device_keys(&self, device: DeviceId) -> Vec<DeviceKey> {
        self.physical
            .keys()
            .filter(|dk| dk.device == device)
            .copied()
            .collect()
    }

    /// Synthetic keys currently down, in press order
    pub fn synthetic_down(&self) -> Vec<Key> {
        self.refcounts.keys().copied().collect()
    }

    pub fn refcount(&self, key: Key) -> u32 {
        self.refcounts.get(&key).copied().unwrap_or(0)
    }

    /// Forget every physical key and release every synthetic key
    pub fn reset(&mut self) -> Vec<Emission> {
        self.physical.clear();
        self.holdings.clear();
        let released: Vec<Emission> = self.refcounts.keys().rev().map(|k| Emission::Up(*k)).collect();
        self.refcounts.clear();
        released
    }

    pub fn is_idle(&self) -> bool {
        self.physical.is_empty() && self.refcounts.is_empty()
    }
}
