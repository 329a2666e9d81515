use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{MacroTimer, RunId};
use crate::input::DeviceKey;
use crate::profile::{MacroDefinition, MacroStep, ReleaseBehavior};
use crate::state::{Emission, PressedStateTracker, Source};

/// A live execution of a macro definition
#[derive(Debug)]
pub struct MacroRun {
    pub id: RunId,
    pub origin: DeviceKey,
    /// Layer whose binding started the run
    pub layer: Option<usize>,
    pub definition: Arc<MacroDefinition>,
    cursor: usize,
    /// Passes left after the current one
    remaining: u32,
    /// Bumped on every suspension; ticks carrying an older value are stale
    generation: u64,
}

enum Advance {
    Suspended(Duration),
    Finished,
}

/// Owns every live MacroRun; all methods run on the actor thread
pub struct MacroScheduler {
    timer: Box<dyn MacroTimer>,
    runs: HashMap<RunId, MacroRun>,
    by_origin: HashMap<DeviceKey, RunId>,
    next_id: u64,
}

impl MacroScheduler {
    pub fn new(timer: Box<dyn MacroTimer>) -> Self {
        Self {
            timer,
            runs: HashMap::new(),
            by_origin: HashMap::new(),
            next_id: 1,
        }
    }

    /// Start a run for `origin`, cancelling one it already owns
    pub fn dispatch(
        &mut self,
        origin: DeviceKey,
        layer: Option<usize>,
        definition: Arc<MacroDefinition>,
        tracker: &mut PressedStateTracker,
    ) -> Vec<Emission> {
        let mut out = Vec::new();
        if let Some(previous) = self.by_origin.get(&origin).copied() {
            log::debug!("Re-press of {origin} restarts {previous}");
            out.extend(self.cancel(previous, tracker));
        }

        let id = RunId(self.next_id);
        self.next_id += 1;
        log::debug!("Starting {id} ('{}') for {origin}", definition.id);

        let remaining = definition.repeat_count.saturating_sub(1);
        self.runs.insert(
            id,
            MacroRun {
                id,
                origin,
                layer,
                definition,
                cursor: 0,
                remaining,
                generation: 0,
            },
        );
        self.by_origin.insert(origin, id);
        out.extend(self.advance(id, tracker));
        out
    }

    /// Resume a suspended run; stale or unknown ticks do nothing
    pub fn on_tick(
        &mut self,
        run: RunId,
        generation: u64,
        tracker: &mut PressedStateTracker,
    ) -> Vec<Emission> {
        match self.runs.get(&run) {
            Some(state) if state.generation == generation => self.advance(run, tracker),
            Some(_) => {
                log::trace!("Ignoring stale tick for {run}");
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    /// The originating key went up
    pub fn on_origin_release(
        &mut self,
        origin: DeviceKey,
        tracker: &mut PressedStateTracker,
    ) -> Vec<Emission> {
        let Some(id) = self.by_origin.get(&origin).copied() else {
            return Vec::new();
        };
        let behavior = self
            .runs
            .get(&id)
            .map(|r| r.definition.on_release)
            .unwrap_or_default();
        match behavior {
            ReleaseBehavior::Cancel => self.cancel(id, tracker),
            ReleaseBehavior::Continue => Vec::new(),
        }
    }

    /// Stop a run and release whatever it left down
    pub fn cancel(&mut self, id: RunId, tracker: &mut PressedStateTracker) -> Vec<Emission> {
        let Some(run) = self.runs.remove(&id) else {
            return Vec::new();
        };
        if self.by_origin.get(&run.origin) == Some(&id) {
            self.by_origin.remove(&run.origin);
        }
        self.timer.cancel(id);
        let released = tracker.release_source(Source::Macro(id));
        log::debug!(
            "Cancelled {id} ('{}') at step {}, released {} keys",
            run.definition.id,
            run.cursor,
            released.len()
        );
        released
    }

    /// Cancel every live run (profile swap, shutdown)
    pub fn cancel_all(&mut self, tracker: &mut PressedStateTracker) -> Vec<Emission> {
        let mut ids: Vec<RunId> = self.runs.keys().copied().collect();
        ids.sort();
        ids.into_iter()
            .flat_map(|id| self.cancel(id, tracker))
            .collect()
    }

    /// Cancel runs started by bindings of layers that just deactivated,
    /// whatever their release behavior
    pub fn cancel_from_layers(
        &mut self,
        exited: &[usize],
        tracker: &mut PressedStateTracker,
    ) -> Vec<Emission> {
        if exited.is_empty() {
            return Vec::new();
        }
        let mut ids: Vec<RunId> = self
            .runs
            .values()
            .filter(|r| r.layer.is_some_and(|l| exited.contains(&l)))
            .map(|r| r.id)
            .collect();
        ids.sort();
        ids.into_iter()
            .flat_map(|id| self.cancel(id, tracker))
            .collect()
    }

    pub fn is_running(&self, id: RunId) -> bool {
        self.runs.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    fn advance(&mut self, id: RunId, tracker: &mut PressedStateTracker) -> Vec<Emission> {
        let mut out = Vec::new();
        let Some(run) = self.runs.get_mut(&id) else {
            return out;
        };

        let outcome = loop {
            let Some(step) = run.definition.steps.get(run.cursor) else {
                if run.remaining == 0 {
                    break Advance::Finished;
                }
                run.remaining -= 1;
                run.cursor = 0;
                if !run.definition.repeat_delay.is_zero() {
                    break Advance::Suspended(run.definition.repeat_delay);
                }
                if run.definition.steps.is_empty() {
                    break Advance::Finished;
                }
                continue;
            };
            run.cursor += 1;
            match *step {
                MacroStep::Down(key) => out.extend(tracker.hold(Source::Macro(id), &[key])),
                MacroStep::Up(key) => out.extend(tracker.release_key_from(Source::Macro(id), key)),
                MacroStep::Wait(delay) => break Advance::Suspended(delay),
            }
        };

        match outcome {
            Advance::Suspended(delay) => {
                run.generation += 1;
                self.timer.schedule(id, run.generation, Instant::now() + delay);
            }
            Advance::Finished => {
                let origin = run.origin;
                self.runs.remove(&id);
                if self.by_origin.get(&origin) == Some(&id) {
                    self.by_origin.remove(&origin);
                }
                out.extend(tracker.release_source(Source::Macro(id)));
                log::debug!("{id} finished");
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::DeviceId;
    use crate::macros::ManualTimer;
    use crate::Key;

    const B: Key = Key(48);
    const C: Key = Key(46);

    fn definition(steps: Vec<MacroStep>, repeat_count: u32, on_release: ReleaseBehavior) -> Arc<MacroDefinition> {
        Arc::new(MacroDefinition {
            id: "m".to_string(),
            steps,
            repeat_count,
            repeat_delay: Duration::from_millis(5),
            on_release,
        })
    }

    fn tap_c() -> Vec<MacroStep> {
        vec![
            MacroStep::Down(C),
            MacroStep::Wait(Duration::from_millis(10)),
            MacroStep::Up(C),
        ]
    }

    fn origin() -> DeviceKey {
        DeviceKey::new(DeviceId(0), B)
    }

    #[test]
    fn test_runs_to_completion_via_ticks() {
        let timer = ManualTimer::new();
        let mut sched = MacroScheduler::new(Box::new(timer.clone()));
        let mut tracker = PressedStateTracker::new();

        let out = sched.dispatch(origin(), None, definition(tap_c(), 1, ReleaseBehavior::Cancel), &mut tracker);
        assert_eq!(out, vec![Emission::Down(C)]);
        let tick = timer.pop().unwrap();
        assert_eq!(tick.generation, 1);

        let out = sched.on_tick(tick.run, tick.generation, &mut tracker);
        assert_eq!(out, vec![Emission::Up(C)]);
        assert!(sched.is_empty());
        assert!(tracker.synthetic_down().is_empty());
    }

    #[test]
    fn test_repress_cancels_and_restarts() {
        let timer = ManualTimer::new();
        let mut sched = MacroScheduler::new(Box::new(timer.clone()));
        let mut tracker = PressedStateTracker::new();
        let def = definition(tap_c(), 1, ReleaseBehavior::Cancel);

        sched.dispatch(origin(), None, Arc::clone(&def), &mut tracker);
        let first = timer.pop().unwrap();
        let out = sched.dispatch(origin(), None, def, &mut tracker);
        assert_eq!(out, vec![Emission::Up(C), Emission::Down(C)]);
        assert!(!sched.is_running(first.run));
        assert_eq!(timer.cancelled(), vec![first.run]);

        // stale tick from the first run does nothing
        assert!(sched.on_tick(first.run, first.generation, &mut tracker).is_empty());
        assert_eq!(tracker.refcount(C), 1);
    }

    #[test]
    fn test_release_cancels_by_default() {
        let timer = ManualTimer::new();
        let mut sched = MacroScheduler::new(Box::new(timer.clone()));
        let mut tracker = PressedStateTracker::new();
        sched.dispatch(origin(), None, definition(tap_c(), 1, ReleaseBehavior::Cancel), &mut tracker);
        assert_eq!(sched.on_origin_release(origin(), &mut tracker), vec![Emission::Up(C)]);
        assert!(sched.is_empty());
    }

    #[test]
    fn test_continue_survives_release() {
        let timer = ManualTimer::new();
        let mut sched = MacroScheduler::new(Box::new(timer.clone()));
        let mut tracker = PressedStateTracker::new();
        sched.dispatch(origin(), None, definition(tap_c(), 2, ReleaseBehavior::Continue), &mut tracker);
        assert!(sched.on_origin_release(origin(), &mut tracker).is_empty());
        assert_eq!(sched.len(), 1);

        // first pass ends, then the repeat delay suspends the run
        let tick = timer.pop().unwrap();
        assert_eq!(sched.on_tick(tick.run, tick.generation, &mut tracker), vec![Emission::Up(C)]);
        let tick = timer.pop().unwrap();
        assert_eq!(sched.on_tick(tick.run, tick.generation, &mut tracker), vec![Emission::Down(C)]);
        let tick = timer.pop().unwrap();
        assert_eq!(sched.on_tick(tick.run, tick.generation, &mut tracker), vec![Emission::Up(C)]);
        assert!(sched.is_empty());
        assert!(timer.pop().is_none());
    }

    #[test]
    fn test_completion_releases_unbalanced_downs() {
        let timer = ManualTimer::new();
        let mut sched = MacroScheduler::new(Box::new(timer));
        let mut tracker = PressedStateTracker::new();
        let out = sched.dispatch(
            origin(),
            None,
            definition(vec![MacroStep::Down(C)], 1, ReleaseBehavior::Cancel),
            &mut tracker,
        );
        assert_eq!(out, vec![Emission::Down(C), Emission::Up(C)]);
    }

    #[test]
    fn test_cancel_all() {
        let timer = ManualTimer::new();
        let mut sched = MacroScheduler::new(Box::new(timer));
        let mut tracker = PressedStateTracker::new();
        sched.dispatch(origin(), None, definition(tap_c(), 1, ReleaseBehavior::Cancel), &mut tracker);
        sched.dispatch(
            DeviceKey::new(DeviceId(1), B),
            None,
            definition(vec![MacroStep::Down(Key(30)), MacroStep::Wait(Duration::from_millis(1))], 1, ReleaseBehavior::Cancel),
            &mut tracker,
        );
        let out = sched.cancel_all(&mut tracker);
        assert_eq!(out, vec![Emission::Up(C), Emission::Up(Key(30))]);
        assert!(sched.is_empty());
    }

    #[test]
    fn test_layer_exit_cancels_continue_runs() {
        let timer = ManualTimer::new();
        let mut sched = MacroScheduler::new(Box::new(timer.clone()));
        let mut tracker = PressedStateTracker::new();
        sched.dispatch(origin(), Some(1), definition(tap_c(), 1, ReleaseBehavior::Continue), &mut tracker);
        let other = DeviceKey::new(DeviceId(1), B);
        let hold_a = vec![MacroStep::Down(Key(30)), MacroStep::Wait(Duration::from_millis(1))];
        sched.dispatch(other, None, definition(hold_a, 1, ReleaseBehavior::Continue), &mut tracker);

        assert!(sched.cancel_from_layers(&[2], &mut tracker).is_empty());
        assert_eq!(sched.cancel_from_layers(&[1], &mut tracker), vec![Emission::Up(C)]);
        assert_eq!(sched.len(), 1);
        assert_eq!(timer.pending().len(), 1);
        assert_eq!(tracker.synthetic_down(), vec![Key(30)]);
    }
}
