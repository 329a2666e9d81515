// Remapd uinput Output
// Virtual device creation and raw event emission

use evdev::uinput::VirtualDeviceBuilder;
use evdev::{AttributeSet, EventType, InputEvent, RelativeAxisType};

use super::{OutputDevice, OutputError};
use crate::Key;

/// Virtual uinput device receiving every synthesized event
pub struct VirtualDevice {
    device: evdev::uinput::VirtualDevice,
}

impl VirtualDevice {
    /// Create the virtual device with keyboard keys, mouse buttons and relative axes
    pub fn new(name: &str) -> Result<Self, OutputError> {
        let mut keys = AttributeSet::new();
        // Standard keyboard keys
        for code in 0..256u16 {
            keys.insert(evdev::Key::new(code));
        }
        // Mouse buttons
        for code in 0x110..0x120u16 {
            keys.insert(evdev::Key::new(code));
        }
        // Extended keys
        for code in 0x160..0x2c0u16 {
            keys.insert(evdev::Key::new(code));
        }

        let mut axes = AttributeSet::new();
        for axis in [
            RelativeAxisType::REL_X,
            RelativeAxisType::REL_Y,
            RelativeAxisType::REL_WHEEL,
            RelativeAxisType::REL_HWHEEL,
        ] {
            axes.insert(axis);
        }

        let creation = |e: std::io::Error| OutputError::DeviceCreation(e.to_string());
        let device = VirtualDeviceBuilder::new()
            .map_err(creation)?
            .name(name)
            .with_keys(&keys)
            .map_err(creation)?
            .with_relative_axes(&axes)
            .map_err(creation)?
            .build()
            .map_err(creation)?;

        log::info!("Created virtual device '{name}'");
        Ok(Self { device })
    }

    fn write(&mut self, event: InputEvent) -> Result<(), OutputError> {
        // SYN event is required for the kernel to process the event
        let syn = InputEvent::new(EventType::SYNCHRONIZATION, 0, 0);
        self.device
            .emit(&[event, syn])
            .map_err(|e| OutputError::OutputDeviceFailure(e.to_string()))
    }
}

impl OutputDevice for VirtualDevice {
    fn emit_key(&mut self, key: Key, down: bool) -> Result<(), OutputError> {
        self.write(InputEvent::new(EventType::KEY, key.code(), i32::from(down)))
    }

    fn emit_relative(&mut self, axis: u16, value: i32) -> Result<(), OutputError> {
        self.write(InputEvent::new(EventType::RELATIVE, axis, value))
    }
}
