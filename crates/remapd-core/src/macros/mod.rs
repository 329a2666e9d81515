// Remapd Macro Scheduler
// Macro runs owned by the actor, advanced by timer ticks

mod scheduler;
mod timer;

use std::fmt;
use std::time::Instant;

pub use scheduler::{MacroRun, MacroScheduler};
pub use timer::{ManualTimer, ScheduledTick, ThreadTimer};

/// Identity of one macro execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "macro#{}", self.0)
    }
}

/// Wakes a suspended run once its deadline passes.
///
/// Implementations deliver `(run, generation)` back to the actor; the
/// scheduler drops ticks whose generation no longer matches the run.
pub trait MacroTimer: Send {
    fn schedule(&self, run: RunId, generation: u64, deadline: Instant);

    /// Forget pending wakeups for a run
    fn cancel(&self, run: RunId);
}
