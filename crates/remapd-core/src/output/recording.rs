use std::sync::Arc;

use parking_lot::Mutex;

use super::{OutputDevice, OutputError};
use crate::Key;

/// One event written to a RecordingDevice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputRecord {
    Key { key: Key, down: bool },
    Relative { axis: u16, value: i32 },
}

#[derive(Default)]
struct Recorded {
    records: Vec<OutputRecord>,
    fail: bool,
}

/// In-memory output device for dry runs and tests.
///
/// Clones share the same record, so a test can keep one handle while
/// the sink owns another.
#[derive(Clone, Default)]
pub struct RecordingDevice {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<OutputRecord> {
        self.inner.lock().records.clone()
    }

    /// Key events only, as (key, down)
    pub fn keys(&self) -> Vec<(Key, bool)> {
        self.inner
            .lock()
            .records
            .iter()
            .filter_map(|r| match r {
                OutputRecord::Key { key, down } => Some((*key, *down)),
                OutputRecord::Relative { .. } => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.inner.lock().records.clear();
    }

    /// Make every following write fail
    pub fn fail_writes(&self, fail: bool) {
        self.inner.lock().fail = fail;
    }
}

impl OutputDevice for RecordingDevice {
    fn emit_key(&mut self, key: Key, down: bool) -> Result<(), OutputError> {
        let mut inner = self.inner.lock();
        if inner.fail {
            return Err(OutputError::OutputDeviceFailure(format!("write of {key} rejected")));
        }
        inner.records.push(OutputRecord::Key { key, down });
        Ok(())
    }

    fn emit_relative(&mut self, axis: u16, value: i32) -> Result<(), OutputError> {
        let mut inner = self.inner.lock();
        if inner.fail {
            return Err(OutputError::OutputDeviceFailure("relative write rejected".to_string()));
        }
        inner.records.push(OutputRecord::Relative { axis, value });
        Ok(())
    }
}
