// Remapd Input Layer
// Raw events and physical key identities

mod event;

pub use event::{
    is_key_event, is_relative_event, DeviceId, DeviceKey, KeyTransition, RawEvent, EV_KEY, EV_REL,
    EV_SYN,
};
