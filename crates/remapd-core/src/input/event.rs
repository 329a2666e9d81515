// Remapd Input Layer - Raw Events
// Device-scoped event records handed from reader threads to the actor

use std::fmt;
use std::time::Instant;

use crate::Key;

/// EV_SYN event type code
pub const EV_SYN: u16 = 0x00;
/// EV_KEY event type code
pub const EV_KEY: u16 = 0x01;
/// EV_REL event type code
pub const EV_REL: u16 = 0x02;

/// Check if an event is a key event.
pub fn is_key_event(event_type: u16) -> bool {
    event_type == EV_KEY
}

/// Check if an event is a relative-axis event (pointer motion, wheel).
pub fn is_relative_event(event_type: u16) -> bool {
    event_type == EV_REL
}

/// Slot of a grabbed device in the session table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub usize);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// A physical key is identified by its device and code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    pub device: DeviceId,
    pub key: Key,
}

impl DeviceKey {
    pub fn new(device: DeviceId, key: Key) -> Self {
        Self { device, key }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device, self.key)
    }
}

/// Key event value as reported by evdev
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTransition {
    Release,
    Press,
    /// Autorepeat, ignored by the state machine
    Repeat,
}

impl KeyTransition {
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(KeyTransition::Release),
            1 => Some(KeyTransition::Press),
            2 => Some(KeyTransition::Repeat),
            _ => None,
        }
    }

    pub fn value(self) -> i32 {
        match self {
            KeyTransition::Release => 0,
            KeyTransition::Press => 1,
            KeyTransition::Repeat => 2,
        }
    }

    pub fn is_down(self) -> bool {
        self == KeyTransition::Press
    }
}

/// One event read from a grabbed device
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawEvent {
    Key {
        key: Key,
        transition: KeyTransition,
        at: Instant,
    },
    /// Relative axis movement forwarded unchanged
    Relative { axis: u16, value: i32 },
}

impl RawEvent {
    /// Decode an evdev (type, code, value) triple; SYN and unknown types yield None
    pub fn from_parts(event_type: u16, code: u16, value: i32) -> Option<Self> {
        if is_key_event(event_type) {
            KeyTransition::from_value(value).map(|transition| RawEvent::Key {
                key: Key::from(code),
                transition,
                at: Instant::now(),
            })
        } else if is_relative_event(event_type) {
            Some(RawEvent::Relative { axis: code, value })
        } else {
            None
        }
    }

    pub fn key(key: Key, transition: KeyTransition) -> Self {
        RawEvent::Key {
            key,
            transition,
            at: Instant::now(),
        }
    }
}
