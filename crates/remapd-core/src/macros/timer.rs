use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use super::{MacroTimer, RunId};

/// A wakeup request recorded by a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScheduledTick {
    pub deadline: Instant,
    pub run: RunId,
    pub generation: u64,
}

/// Callback used by the timer thread; returns false once the receiver is gone
pub type TickSink = Box<dyn Fn(RunId, u64) -> bool + Send>;

#[derive(Default)]
struct TimerState {
    pending: BinaryHeap<Reverse<ScheduledTick>>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<TimerState>,
    wake: Condvar,
}

/// Deadline heap serviced by a dedicated thread.
///
/// Only the run being waited on is suspended; the actor keeps
/// processing input while ticks are pending.
pub struct ThreadTimer {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadTimer {
    pub fn spawn(sink: TickSink) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(TimerState::default()),
            wake: Condvar::new(),
        });
        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("remapd-macro-timer".to_string())
            .spawn(move || run_timer(&worker, sink))?;
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }
}

fn run_timer(shared: &Shared, sink: TickSink) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        let Some(Reverse(next)) = state.pending.peek().copied() else {
            shared.wake.wait(&mut state);
            continue;
        };
        if next.deadline > Instant::now() {
            shared.wake.wait_until(&mut state, next.deadline);
            continue;
        }
        state.pending.pop();
        let delivered = parking_lot::MutexGuard::unlocked(&mut state, || sink(next.run, next.generation));
        if !delivered {
            log::debug!("Macro timer receiver closed, stopping");
            break;
        }
    }
}

impl MacroTimer for ThreadTimer {
    fn schedule(&self, run: RunId, generation: u64, deadline: Instant) {
        let mut state = self.shared.state.lock();
        state.pending.push(Reverse(ScheduledTick {
            deadline,
            run,
            generation,
        }));
        self.shared.wake.notify_one();
    }

    fn cancel(&self, run: RunId) {
        let mut state = self.shared.state.lock();
        state.pending.retain(|Reverse(tick)| tick.run != run);
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.wake.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[derive(Default)]
struct ManualState {
    pending: VecDeque<ScheduledTick>,
    cancelled: Vec<RunId>,
}

/// Timer that only records requests; tests fire ticks by hand
#[derive(Clone, Default)]
pub struct ManualTimer {
    state: Arc<Mutex<ManualState>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Oldest pending tick
    pub fn pop(&self) -> Option<ScheduledTick> {
        self.state.lock().pending.pop_front()
    }

    pub fn pending(&self) -> Vec<ScheduledTick> {
        self.state.lock().pending.iter().copied().collect()
    }

    pub fn cancelled(&self) -> Vec<RunId> {
        self.state.lock().cancelled.clone()
    }
}

impl MacroTimer for ManualTimer {
    fn schedule(&self, run: RunId, generation: u64, deadline: Instant) {
        self.state.lock().pending.push_back(ScheduledTick {
            deadline,
            run,
            generation,
        });
    }

    fn cancel(&self, run: RunId) {
        let mut state = self.state.lock();
        state.pending.retain(|tick| tick.run != run);
        state.cancelled.push(run);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_thread_timer_fires_in_deadline_order() {
        let (tx, rx) = mpsc::channel();
        let timer = ThreadTimer::spawn(Box::new(move |run, generation| tx.send((run, generation)).is_ok())).unwrap();
        let now = Instant::now();
        timer.schedule(RunId(2), 1, now + Duration::from_millis(40));
        timer.schedule(RunId(1), 7, now + Duration::from_millis(5));

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), (RunId(1), 7));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), (RunId(2), 1));
    }

    #[test]
    fn test_thread_timer_cancel() {
        let (tx, rx) = mpsc::channel();
        let timer = ThreadTimer::spawn(Box::new(move |run, generation| tx.send((run, generation)).is_ok())).unwrap();
        timer.schedule(RunId(1), 1, Instant::now() + Duration::from_millis(30));
        timer.cancel(RunId(1));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_manual_timer_records() {
        let timer = ManualTimer::new();
        timer.schedule(RunId(1), 1, Instant::now());
        timer.schedule(RunId(2), 1, Instant::now());
        timer.cancel(RunId(1));
        assert_eq!(timer.pending().len(), 1);
        assert_eq!(timer.pop().unwrap().run, RunId(2));
        assert_eq!(timer.cancelled(), vec![RunId(1)]);
    }
}
