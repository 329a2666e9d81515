// Remapd Output Sink
// Ordered, at-most-once emission with release-all on teardown

use indexmap::IndexSet;

use super::{OutputDevice, OutputError};
use crate::state::Emission;
use crate::Key;

/// Funnels every synthesized transition to one device in order.
///
/// The sink keeps its own down set so a key is never pressed twice
/// without a release in between, whatever the caller sends.
pub struct OutputSink {
    device: Box<dyn OutputDevice>,
    down: IndexSet<Key>,
    emitted: u64,
}

impl OutputSink {
    pub fn new(device: Box<dyn OutputDevice>) -> Self {
        Self {
            device,
            down: IndexSet::new(),
            emitted: 0,
        }
    }

    /// Write one transition; Ok(false) when it was a duplicate and dropped
    pub fn emit(&mut self, emission: Emission) -> Result<bool, OutputError> {
        match emission {
            Emission::Down(key) => {
                if self.down.contains(&key) {
                    log::warn!("Dropping duplicate down for {key}");
                    return Ok(false);
                }
                self.device.emit_key(key, true)?;
                self.down.insert(key);
            }
            Emission::Up(key) => {
                if !self.down.contains(&key) {
                    log::warn!("Dropping up for {key}, which is not down");
                    return Ok(false);
                }
                self.device.emit_key(key, false)?;
                self.down.shift_remove(&key);
            }
        }
        self.emitted += 1;
        log::trace!("emit {emission}");
        Ok(true)
    }

    /// Write transitions in order, stopping at the first failure
    pub fn emit_all(&mut self, emissions: &[Emission]) -> Result<(), OutputError> {
        for emission in emissions {
            self.emit(*emission)?;
        }
        Ok(())
    }

    /// Forward a relative axis event (pointer motion, wheel)
    pub fn forward_relative(&mut self, axis: u16, value: i32) -> Result<(), OutputError> {
        self.device.emit_relative(axis, value)
    }

    /// Release every key the device still sees as down, newest first.
    ///
    /// Keeps going after a failed write and reports the first error.
    pub fn release_all(&mut self) -> Result<usize, OutputError> {
        let mut released = 0;
        let mut first_error = None;
        while let Some(key) = self.down.pop() {
            match self.device.emit_key(key, false) {
                Ok(()) => released += 1,
                Err(e) => {
                    log::error!("Failed to release {key}: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }
        if released > 0 {
            log::info!("Released {released} synthetic keys");
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(released),
        }
    }

    pub fn is_down(&self, key: Key) -> bool {
        self.down.contains(&key)
    }

    /// Keys the device currently has down, in press order
    pub fn down_keys(&self) -> Vec<Key> {
        self.down.iter().copied().collect()
    }

    /// Number of transitions written so far
    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

impl Drop for OutputSink {
    fn drop(&mut self) {
        if !self.down.is_empty() {
            let _ = self.release_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{OutputRecord, RecordingDevice};

    const X: Key = Key(45);
    const Y: Key = Key(21);

    #[test]
    fn test_at_most_once() {
        let device = RecordingDevice::new();
        let mut sink = OutputSink::new(Box::new(device.clone()));
        assert!(sink.emit(Emission::Down(X)).unwrap());
        assert!(!sink.emit(Emission::Down(X)).unwrap());
        assert!(sink.emit(Emission::Up(X)).unwrap());
        assert!(!sink.emit(Emission::Up(X)).unwrap());
        assert_eq!(device.keys(), vec![(X, true), (X, false)]);
        assert_eq!(sink.emitted(), 2);
    }

    #[test]
    fn test_release_all_newest_first() {
        let device = RecordingDevice::new();
        let mut sink = OutputSink::new(Box::new(device.clone()));
        sink.emit_all(&[Emission::Down(X), Emission::Down(Y)]).unwrap();
        assert_eq!(sink.release_all().unwrap(), 2);
        assert_eq!(device.keys()[2..], [(Y, false), (X, false)]);
        assert!(sink.down_keys().is_empty());
    }

    #[test]
    fn test_drop_releases() {
        let device = RecordingDevice::new();
        {
            let mut sink = OutputSink::new(Box::new(device.clone()));
            sink.emit(Emission::Down(X)).unwrap();
        }
        assert_eq!(device.keys(), vec![(X, true), (X, false)]);
    }

    #[test]
    fn test_failure_propagates() {
        let device = RecordingDevice::new();
        let mut sink = OutputSink::new(Box::new(device.clone()));
        device.fail_writes(true);
        assert!(matches!(
            sink.emit(Emission::Down(X)),
            Err(OutputError::OutputDeviceFailure(_))
        ));
        assert!(!sink.is_down(X));
    }

    #[test]
    fn test_relative_forwarded() {
        let device = RecordingDevice::new();
        let mut sink = OutputSink::new(Box::new(device.clone()));
        sink.forward_relative(0, 5).unwrap();
        assert_eq!(device.records(), vec![OutputRecord::Relative { axis: 0, value: 5 }]);
    }
}
