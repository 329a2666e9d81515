// Remapd Daemon Actor
// Single owner of ActiveState; every mutation arrives as a Message

use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::compile::{compile, CompileError, MacroLimits};
use crate::control::{ControlBackend, ControlError};
use crate::device::{AcquisitionState, DeviceError, DeviceNotice};
use crate::input::{DeviceId, DeviceKey, KeyTransition, RawEvent};
use crate::layer::{sweep_exited, LayerEngine};
use crate::macros::{MacroScheduler, MacroTimer, RunId};
use crate::output::{OutputError, OutputSink};
use crate::profile::{BindAction, CompiledProfile, ProfileError, ProfileLoader};
use crate::state::{Emission, PressedStateTracker, Source};
use crate::Key;

/// How long a control request waits for the actor
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Top-level daemon errors
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Output(#[from] OutputError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Control(#[from] ControlError),
}

/// Everything the actor reacts to
pub enum Message {
    Input {
        device: DeviceId,
        event: RawEvent,
    },
    DeviceAcquired {
        device: DeviceId,
        path: PathBuf,
        name: String,
    },
    DeviceLost {
        device: DeviceId,
        reason: String,
    },
    DeviceUnavailable {
        device: DeviceId,
        reason: String,
    },
    MacroTick {
        run: RunId,
        generation: u64,
    },
    SetProfile {
        profile: Arc<CompiledProfile>,
        reply: Sender<ApplyReport>,
    },
    CurrentProfile {
        reply: Sender<String>,
    },
    ListDevices {
        reply: Sender<Vec<DeviceStatus>>,
    },
    Status {
        reply: Sender<StatusReport>,
    },
    Subscribe {
        events: Sender<String>,
    },
    Shutdown,
}

impl From<DeviceNotice> for Message {
    fn from(notice: DeviceNotice) -> Self {
        match notice {
            DeviceNotice::Acquired { device, path, name } => Message::DeviceAcquired { device, path, name },
            DeviceNotice::Event { device, event } => Message::Input { device, event },
            DeviceNotice::Lost { device, reason } => Message::DeviceLost { device, reason },
            DeviceNotice::Unavailable { device, reason } => Message::DeviceUnavailable { device, reason },
        }
    }
}

/// Result of a profile swap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub previous: String,
    pub profile: String,
    pub released: usize,
    pub pressed: usize,
    pub cancelled_macros: usize,
}

impl fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "profile={} previous={} released={} pressed={} cancelled_macros={}",
            self.profile, self.previous, self.released, self.pressed, self.cancelled_macros
        )
    }
}

/// A configured device as seen by the actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub id: DeviceId,
    pub stable_id: String,
    pub state: AcquisitionState,
    pub path: Option<PathBuf>,
    pub name: Option<String>,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} state={:?}", self.id, self.stable_id, self.state.to_string())?;
        if let Some(path) = &self.path {
            write!(f, " path={}", path.display())?;
        }
        if let Some(name) = &self.name {
            write!(f, " name={name:?}")?;
        }
        Ok(())
    }
}

/// Snapshot for the `status` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub profile: String,
    pub active_layers: Vec<String>,
    pub held_physical: usize,
    pub synthetic_down: Vec<Key>,
    pub macro_runs: usize,
    pub events: u64,
    pub uptime: Duration,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let down: Vec<String> = self.synthetic_down.iter().map(|k| k.to_string()).collect();
        write!(
            f,
            "profile={} layers={} held={} down=[{}] macros={} events={} uptime={}s",
            self.profile,
            self.active_layers.join(","),
            self.held_physical,
            down.join(","),
            self.macro_runs,
            self.events,
            self.uptime.as_secs()
        )
    }
}

/// One resolved input, as shown by `test_event_stream`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEvent {
    pub source: String,
    pub transition: &'static str,
    pub layer: Option<String>,
    pub action: String,
    pub emitted: Vec<Emission>,
}

impl fmt::Display for DiagnosticEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let emitted: Vec<String> = self.emitted.iter().map(|e| e.to_string()).collect();
        write!(
            f,
            "{} {} layer={} action={:?} emit=[{}]",
            self.source,
            self.transition,
            self.layer.as_deref().unwrap_or("-"),
            self.action,
            emitted.join(", ")
        )
    }
}

/// Whether the run loop keeps going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// The event-processing actor.
///
/// Owns the compiled profile, the tracker, the layer engine, the macro
/// runs and the output sink. Nothing else touches them.
pub struct Engine {
    profile: Arc<CompiledProfile>,
    layers: LayerEngine,
    tracker: PressedStateTracker,
    macros: MacroScheduler,
    sink: OutputSink,
    devices: IndexMap<DeviceId, DeviceStatus>,
    subscribers: Vec<Sender<String>>,
    started: Instant,
    events: u64,
}

impl Engine {
    pub fn new(profile: Arc<CompiledProfile>, sink: OutputSink, timer: Box<dyn MacroTimer>) -> Self {
        let layers = LayerEngine::new(&profile);
        Self {
            profile,
            layers,
            tracker: PressedStateTracker::new(),
            macros: MacroScheduler::new(timer),
            sink,
            devices: IndexMap::new(),
            subscribers: Vec::new(),
            started: Instant::now(),
            events: 0,
        }
    }

    /// Add the devices of the startup profile, in slot order
    pub fn register_devices(&mut self, stable_ids: &[String]) {
        for (index, stable_id) in stable_ids.iter().enumerate() {
            self.devices.insert(
                DeviceId(index),
                DeviceStatus {
                    id: DeviceId(index),
                    stable_id: stable_id.clone(),
                    state: AcquisitionState::Reconnecting,
                    path: None,
                    name: None,
                },
            );
        }
    }

    pub fn profile(&self) -> &Arc<CompiledProfile> {
        &self.profile
    }

    pub fn tracker(&self) -> &PressedStateTracker {
        &self.tracker
    }

    pub fn sink(&self) -> &OutputSink {
        &self.sink
    }

    pub fn macro_runs(&self) -> usize {
        self.macros.len()
    }

    /// Process one message; an Err means the output device failed
    pub fn handle(&mut self, message: Message) -> Result<Flow, DaemonError> {
        match message {
            Message::Input { device, event } => self.on_input(device, event)?,
            Message::DeviceAcquired { device, path, name } => {
                let record = self.device_entry(device);
                record.state = AcquisitionState::Acquired;
                record.path = Some(path);
                record.name = Some(name);
            }
            Message::DeviceLost { device, reason } => self.on_device_lost(device, &reason)?,
            Message::DeviceUnavailable { device, reason } => {
                let record = self.device_entry(device);
                if record.state != AcquisitionState::Unavailable(reason.clone()) {
                    log::warn!("Device {} unavailable: {reason}", record.stable_id);
                }
                record.state = AcquisitionState::Unavailable(reason);
            }
            Message::MacroTick { run, generation } => {
                let emitted = self.macros.on_tick(run, generation, &mut self.tracker);
                self.sink.emit_all(&emitted)?;
            }
            Message::SetProfile { profile, reply } => {
                let report = self.set_profile(profile)?;
                let _ = reply.send(report);
            }
            Message::CurrentProfile { reply } => {
                let _ = reply.send(self.profile.id.clone());
            }
            Message::ListDevices { reply } => {
                let _ = reply.send(self.devices.values().cloned().collect());
            }
            Message::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Message::Subscribe { events } => self.subscribers.push(events),
            Message::Shutdown => return Ok(Flow::Stop),
        }
        Ok(Flow::Continue)
    }

    fn device_entry(&mut self, device: DeviceId) -> &mut DeviceStatus {
        self.devices.entry(device).or_insert_with(|| DeviceStatus {
            id: device,
            stable_id: device.to_string(),
            state: AcquisitionState::Reconnecting,
            path: None,
            name: None,
        })
    }

    fn on_input(&mut self, device: DeviceId, event: RawEvent) -> Result<(), DaemonError> {
        self.events += 1;
        match event {
            RawEvent::Relative { axis, value } => {
                self.sink.forward_relative(axis, value)?;
                Ok(())
            }
            RawEvent::Key { key, transition, at } => {
                let dk = DeviceKey::new(device, key);
                match transition {
                    KeyTransition::Press => self.on_press(dk, at),
                    KeyTransition::Release => self.on_release(dk),
                    KeyTransition::Repeat => Ok(()),
                }
            }
        }
    }

    fn on_press(&mut self, dk: DeviceKey, at: Instant) -> Result<(), DaemonError> {
        if !self.tracker.on_physical_down(dk, at) {
            log::trace!("Duplicate press of {dk} ignored");
            return Ok(());
        }
        self.layers.update(&self.profile, &self.tracker.held_codes());

        if self.profile.is_trigger(dk.key) {
            log::debug!("{dk} pressed: layer trigger");
            self.publish(dk, "press", None, "layer trigger".to_string(), &[]);
            return Ok(());
        }

        let resolved = self.layers.resolve(&self.profile, dk.key);
        let layer = resolved.layer;
        let action = resolved.action.clone();
        self.tracker.set_origin(dk, layer);

        let emitted = match &action {
            BindAction::PassThrough | BindAction::Chord(_) => {
                self.tracker.hold(Source::Physical(dk), &action.held_keys(dk.key))
            }
            BindAction::Disable => Vec::new(),
            BindAction::Macro(definition) => {
                self.macros.dispatch(dk, layer, Arc::clone(definition), &mut self.tracker)
            }
        };
        log::debug!("{dk} pressed: {} -> {} emissions", action.describe(), emitted.len());
        self.sink.emit_all(&emitted)?;
        let layer_id = layer.and_then(|i| self.profile.layer(i)).map(|l| l.id.clone());
        self.publish(dk, "press", layer_id, action.describe(), &emitted);
        Ok(())
    }

    fn on_release(&mut self, dk: DeviceKey) -> Result<(), DaemonError> {
        let Some(mut emitted) = self.tracker.on_physical_up(dk) else {
            log::trace!("Release of {dk}, which is not down, ignored");
            return Ok(());
        };
        emitted.extend(self.macros.on_origin_release(dk, &mut self.tracker));

        let change = self.layers.update(&self.profile, &self.tracker.held_codes());
        if !change.exited.is_empty() {
            log::debug!("Release of {dk} deactivated {} layers", change.exited.len());
        }
        emitted.extend(self.macros.cancel_from_layers(&change.exited, &mut self.tracker));
        emitted.extend(sweep_exited(&mut self.tracker, &change.exited));

        self.sink.emit_all(&emitted)?;
        self.publish(dk, "release", None, "release".to_string(), &emitted);
        Ok(())
    }

    fn on_device_lost(&mut self, device: DeviceId, reason: &str) -> Result<(), DaemonError> {
        let held = self.tracker.device_keys(device);
        let record = self.device_entry(device);
        log::warn!(
            "Device {} lost ({reason}); force-releasing {} held keys",
            record.stable_id,
            held.len()
        );
        record.state = AcquisitionState::Reconnecting;
        record.path = None;
        for dk in held {
            self.on_release(dk)?;
        }
        Ok(())
    }

    /// Swap in a new profile.
    ///
    /// Synthetic keys the new profile does not justify are released before
    /// the swap; keys it newly justifies are pressed after it. Macro runs
    /// are cancelled.
    pub fn set_profile(&mut self, next: Arc<CompiledProfile>) -> Result<ApplyReport, DaemonError> {
        let previous = self.profile.id.clone();
        let cancelled_macros = self.macros.len();

        let mut released = self.macros.cancel_all(&mut self.tracker);

        // Resolve every held physical key against the new profile
        let held_codes = self.tracker.held_codes();
        let mut next_layers = LayerEngine::new(&next);
        next_layers.update(&next, &held_codes);
        let held: Vec<DeviceKey> = self.tracker.held_physical().map(|(dk, _)| dk).collect();
        let mut plan = Vec::with_capacity(held.len());
        for dk in held {
            if next.is_trigger(dk.key) {
                plan.push((dk, None, Vec::new()));
                continue;
            }
            let resolved = next_layers.resolve(&next, dk.key);
            let keys = match resolved.action {
                BindAction::PassThrough | BindAction::Chord(_) => resolved.action.held_keys(dk.key).to_vec(),
                BindAction::Disable | BindAction::Macro(_) => Vec::new(),
            };
            plan.push((dk, resolved.layer, keys));
        }

        for (dk, _, keys) in &plan {
            let source = Source::Physical(*dk);
            let stale: Vec<Key> = self
                .tracker
                .holdings(source)
                .iter()
                .filter(|k| !keys.contains(k))
                .copied()
                .collect();
            for key in stale.into_iter().rev() {
                released.extend(self.tracker.release_key_from(source, key));
            }
        }
        let released_count = released.len();
        self.sink.emit_all(&released)?;

        self.profile = next;
        self.layers = next_layers;

        let mut pressed = Vec::new();
        for (dk, layer, keys) in &plan {
            self.tracker.set_origin(*dk, *layer);
            pressed.extend(self.tracker.hold(Source::Physical(*dk), keys));
        }
        self.sink.emit_all(&pressed)?;

        let report = ApplyReport {
            previous,
            profile: self.profile.id.clone(),
            released: released_count,
            pressed: pressed.len(),
            cancelled_macros,
        };
        log::info!("Applied {report}");
        Ok(report)
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            profile: self.profile.id.clone(),
            active_layers: self
                .layers
                .active_ids(&self.profile)
                .into_iter()
                .map(str::to_string)
                .collect(),
            held_physical: self.tracker.held_physical().count(),
            synthetic_down: self.tracker.synthetic_down(),
            macro_runs: self.macros.len(),
            events: self.events,
            uptime: self.started.elapsed(),
        }
    }

    pub fn devices(&self) -> Vec<DeviceStatus> {
        self.devices.values().cloned().collect()
    }

    fn publish(
        &mut self,
        dk: DeviceKey,
        transition: &'static str,
        layer: Option<String>,
        action: String,
        emitted: &[Emission],
    ) {
        if self.subscribers.is_empty() {
            return;
        }
        let line = DiagnosticEvent {
            source: dk.to_string(),
            transition,
            layer,
            action,
            emitted: emitted.to_vec(),
        }
        .to_string();
        self.subscribers.retain(|s| s.send(line.clone()).is_ok());
    }

    /// Cancel macro runs, release every synthetic key, then drop subscribers
    pub fn shutdown(&mut self) -> Result<(), DaemonError> {
        let mut released = self.macros.cancel_all(&mut self.tracker);
        released.extend(self.tracker.reset());
        let result = self.sink.emit_all(&released);
        let leftover = self.sink.release_all();
        self.subscribers.clear();
        result?;
        leftover?;
        log::info!("All synthetic keys released");
        Ok(())
    }

    /// Drain messages until Shutdown or until every sender is gone.
    ///
    /// An output failure stops processing; the release sequence still runs.
    pub fn run(mut self, inbox: Receiver<Message>) -> Result<(), DaemonError> {
        log::info!("Event loop started with profile '{}'", self.profile.id);
        let mut outcome = Ok(());
        while let Ok(message) = inbox.recv() {
            match self.handle(message) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(e) => {
                    log::error!("{e}");
                    outcome = Err(e);
                    break;
                }
            }
        }
        let released = self.shutdown();
        outcome.and(released)
    }
}

/// Control-plane view of a running daemon.
///
/// Profile reads and compilation happen on the calling thread; only the
/// finished profile crosses into the actor.
#[derive(Clone)]
pub struct DaemonHandle {
    inbox: Sender<Message>,
    loader: ProfileLoader,
    limits: MacroLimits,
    /// Held across apply and persist so `active_profile` names the running profile
    switching: Arc<Mutex<()>>,
}

impl DaemonHandle {
    pub fn new(inbox: Sender<Message>, loader: ProfileLoader, limits: MacroLimits) -> Self {
        Self {
            inbox,
            loader,
            limits,
            switching: Arc::new(Mutex::new(())),
        }
    }

    fn request<T>(&self, build: impl FnOnce(Sender<T>) -> Message) -> Result<T, ControlError> {
        let (tx, rx) = mpsc::channel();
        self.inbox
            .send(build(tx))
            .map_err(|_| ControlError::Unavailable("daemon is shutting down".to_string()))?;
        rx.recv_timeout(REPLY_TIMEOUT)
            .map_err(|_| ControlError::Unavailable("daemon did not answer".to_string()))
    }

    fn apply(&self, id: &str) -> Result<ApplyReport, ControlError> {
        let document = self.loader.load_profile(id)?;
        let compiled = compile(&document, &self.limits)?;
        self.request(|reply| Message::SetProfile {
            profile: Arc::new(compiled),
            reply,
        })
    }

    pub fn shutdown(&self) {
        let _ = self.inbox.send(Message::Shutdown);
    }
}

impl ControlBackend for DaemonHandle {
    fn set_profile(&self, id: &str) -> Result<String, ControlError> {
        let _switching = self.switching.lock();
        let report = self.apply(id)?;
        self.loader.set_active_profile(&report.profile)?;
        Ok(report.to_string())
    }

    fn reload(&self) -> Result<String, ControlError> {
        let _switching = self.switching.lock();
        let current = self.request(|reply| Message::CurrentProfile { reply })?;
        Ok(self.apply(&current)?.to_string())
    }

    fn list_devices(&self) -> Result<Vec<String>, ControlError> {
        let devices = self.request(|reply| Message::ListDevices { reply })?;
        Ok(devices.iter().map(|d| d.to_string()).collect())
    }

    fn status(&self) -> Result<String, ControlError> {
        Ok(self.request(|reply| Message::Status { reply })?.to_string())
    }

    fn subscribe(&self) -> Result<Receiver<String>, ControlError> {
        let (tx, rx) = mpsc::channel();
        self.inbox
            .send(Message::Subscribe { events: tx })
            .map_err(|_| ControlError::Unavailable("daemon is shutting down".to_string()))?;
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile;
    use crate::macros::ManualTimer;
    use crate::output::RecordingDevice;
    use crate::profile::ProfileDocument;

    const A: Key = Key(30);
    const X: Key = Key(45);

    fn profile(toml: &str) -> Arc<CompiledProfile> {
        let doc = ProfileDocument::from_toml(toml).unwrap();
        Arc::new(compile(&doc, &MacroLimits::default()).unwrap())
    }

    fn engine(toml: &str) -> (Engine, RecordingDevice) {
        let device = RecordingDevice::new();
        let sink = OutputSink::new(Box::new(device.clone()));
        let engine = Engine::new(profile(toml), sink, Box::new(ManualTimer::new()));
        (engine, device)
    }

    const BASE_A_TO_X: &str = r#"
id = "p"
name = "P"
[[layers]]
id = "base"
[[layers.bindings]]
input = "A"
action = "key"
output_keys = ["X"]
"#;

    fn key(engine: &mut Engine, code: Key, transition: KeyTransition) {
        engine
            .handle(Message::Input {
                device: DeviceId(0),
                event: RawEvent::key(code, transition),
            })
            .unwrap();
    }

    #[test]
    fn test_repeat_and_duplicate_events_ignored() {
        let (mut e, out) = engine(BASE_A_TO_X);
        key(&mut e, A, KeyTransition::Press);
        key(&mut e, A, KeyTransition::Repeat);
        key(&mut e, A, KeyTransition::Press);
        key(&mut e, A, KeyTransition::Release);
        key(&mut e, A, KeyTransition::Release);
        assert_eq!(out.keys(), vec![(X, true), (X, false)]);
    }

    #[test]
    fn test_subscribers_receive_resolved_events() {
        let (mut e, _out) = engine(BASE_A_TO_X);
        let (tx, rx) = mpsc::channel();
        e.handle(Message::Subscribe { events: tx }).unwrap();
        key(&mut e, A, KeyTransition::Press);
        let line = rx.try_recv().unwrap();
        assert_eq!(line, "dev0:A press layer=base action=\"chord X\" emit=[down X]");

        drop(rx);
        key(&mut e, A, KeyTransition::Release);
        assert!(e.subscribers.is_empty());
    }

    #[test]
    fn test_device_states_follow_notices() {
        let (mut e, _out) = engine(BASE_A_TO_X);
        e.register_devices(&["usb-pad".to_string()]);
        e.handle(DeviceNotice::Unavailable { device: DeviceId(0), reason: "permission denied".into() }.into())
            .unwrap();
        assert_eq!(e.devices()[0].state, AcquisitionState::Unavailable("permission denied".into()));
        e.handle(
            DeviceNotice::Acquired {
                device: DeviceId(0),
                path: PathBuf::from("/dev/input/event4"),
                name: "Pad".into(),
            }
            .into(),
        )
        .unwrap();
        let status = &e.devices()[0];
        assert_eq!(status.state, AcquisitionState::Acquired);
        assert_eq!(
            status.to_string(),
            "dev0 usb-pad state=\"acquired\" path=/dev/input/event4 name=\"Pad\""
        );
    }

    #[test]
    fn test_output_failure_is_fatal() {
        let (mut e, out) = engine(BASE_A_TO_X);
        out.fail_writes(true);
        let result = e.handle(Message::Input {
            device: DeviceId(0),
            event: RawEvent::key(A, KeyTransition::Press),
        });
        assert!(matches!(result, Err(DaemonError::Output(_))));
    }

    #[test]
    fn test_status_report() {
        let (mut e, _out) = engine(BASE_A_TO_X);
        key(&mut e, A, KeyTransition::Press);
        let status = e.status();
        assert_eq!(status.profile, "p");
        assert_eq!(status.active_layers, vec!["base".to_string()]);
        assert_eq!(status.synthetic_down, vec![X]);
        assert!(status.to_string().starts_with("profile=p layers=base held=1 down=[X] macros=0 events=1"));
    }

    #[test]
    fn test_run_releases_on_shutdown() {
        let (mut e, out) = engine(BASE_A_TO_X);
        key(&mut e, A, KeyTransition::Press);
        let (tx, rx) = mpsc::channel();
        tx.send(Message::Shutdown).unwrap();
        e.run(rx).unwrap();
        assert_eq!(out.keys(), vec![(X, true), (X, false)]);
    }

    #[test]
    fn test_handle_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ProfileLoader::new(Some(dir.path().to_path_buf()));
        loader.save_profile(&ProfileDocument::empty("other", "Other")).unwrap();

        let (e, _out) = engine(BASE_A_TO_X);
        let (tx, rx) = mpsc::channel();
        let handle = DaemonHandle::new(tx, loader.clone(), MacroLimits::default());
        let actor = std::thread::spawn(move || e.run(rx));

        assert!(handle.status().unwrap().starts_with("profile=p"));
        let reply = handle.set_profile("other").unwrap();
        assert!(reply.starts_with("profile=other previous=p"), "{reply}");
        assert_eq!(loader.active_profile_id().unwrap().as_deref(), Some("other"));
        assert!(handle.reload().unwrap().starts_with("profile=other previous=other"));
        assert_eq!(handle.set_profile("ghost").unwrap_err().kind(), "profile");

        handle.shutdown();
        actor.join().unwrap().unwrap();
    }

    #[test]
    fn test_concurrent_switches_persist_the_running_profile() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ProfileLoader::new(Some(dir.path().to_path_buf()));
        for id in ["left", "right"] {
            loader.save_profile(&ProfileDocument::empty(id, id)).unwrap();
        }

        let (e, _out) = engine(BASE_A_TO_X);
        let (tx, rx) = mpsc::channel();
        let handle = DaemonHandle::new(tx, loader.clone(), MacroLimits::default());
        let actor = std::thread::spawn(move || e.run(rx));

        let switchers: Vec<_> = (0..8)
            .map(|i| {
                let handle = handle.clone();
                std::thread::spawn(move || {
                    let id = if i % 2 == 0 { "left" } else { "right" };
                    for _ in 0..5 {
                        handle.set_profile(id).unwrap();
                    }
                })
            })
            .collect();
        for switcher in switchers {
            switcher.join().unwrap();
        }

        let running = handle.request(|reply| Message::CurrentProfile { reply }).unwrap();
        assert_eq!(loader.active_profile_id().unwrap(), Some(running));

        handle.shutdown();
        actor.join().unwrap().unwrap();
    }
}
