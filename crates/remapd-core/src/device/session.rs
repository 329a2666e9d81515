// Remapd Device Sessions
// One poll-driven reader thread per grabbed device

use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use evdev::Device;

use super::{is_virtual_device, Backoff, DeviceError, DeviceNotice, DeviceResolver, NoticeSink};
use crate::input::{DeviceId, RawEvent};

/// Poll timeout; bounds how long shutdown takes to be noticed
const POLL_TIMEOUT_MS: i32 = 200;

/// An input device present on the host, for `--list-devices`
#[derive(Debug, Clone)]
pub struct HostDevice {
    pub path: PathBuf,
    pub name: String,
    pub stable_ids: Vec<String>,
}

/// Enumerate host input devices, skipping our own virtual device
pub fn list_host_devices(resolver: &DeviceResolver, virtual_name: &str) -> Vec<HostDevice> {
    let mut devices: Vec<HostDevice> = evdev::enumerate()
        .filter_map(|(path, device)| {
            let name = device.name().unwrap_or("Unknown").to_string();
            if is_virtual_device(&name, virtual_name) {
                return None;
            }
            let stable_ids = resolver.stable_ids_for(&path);
            Some(HostDevice {
                path,
                name,
                stable_ids,
            })
        })
        .collect();
    devices.sort_by(|a, b| a.path.cmp(&b.path));
    devices
}

fn named_devices() -> Vec<(PathBuf, String)> {
    evdev::enumerate()
        .map(|(path, device)| (path, device.name().unwrap_or("").to_string()))
        .collect()
}

/// Resolve, open and exclusively grab a device
fn acquire(resolver: &DeviceResolver, stable_id: &str) -> Result<(PathBuf, Device), DeviceError> {
    let unavailable = |reason: String| DeviceError::DeviceUnavailable {
        id: stable_id.to_string(),
        reason,
    };
    let path = resolver.resolve(stable_id, named_devices())?;
    let mut device = Device::open(&path).map_err(|e| unavailable(e.to_string()))?;
    // A previous instance may have died holding the grab
    let _ = device.ungrab();
    device.grab().map_err(|e| unavailable(format!("grab failed: {e}")))?;
    Ok((path, device))
}

struct Reader {
    stable_id: String,
    handle: JoinHandle<()>,
}

/// Owns the reader threads of every configured device
pub struct DeviceSessionManager {
    readers: Vec<Reader>,
    shutdown: Arc<AtomicBool>,
}

impl DeviceSessionManager {
    /// Grab every configured device and start its reader.
    ///
    /// Devices that fail now keep retrying in the background; an error is
    /// returned only when none could be acquired.
    pub fn start(
        stable_ids: &[String],
        resolver: DeviceResolver,
        backoff: Backoff,
        sink: NoticeSink,
    ) -> Result<Self, DeviceError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut readers = Vec::with_capacity(stable_ids.len());
        let mut acquired = 0;

        for (index, stable_id) in stable_ids.iter().enumerate() {
            let id = DeviceId(index);
            let initial = match acquire(&resolver, stable_id) {
                Ok((path, device)) => {
                    let name = device.name().unwrap_or("Unknown").to_string();
                    log::info!("Grabbed {stable_id} ({name}) at {}", path.display());
                    acquired += 1;
                    sink(DeviceNotice::Acquired { device: id, path, name });
                    Some(device)
                }
                Err(e) => {
                    log::warn!("{e}");
                    sink(DeviceNotice::Unavailable {
                        device: id,
                        reason: e.to_string(),
                    });
                    None
                }
            };

            let worker = ReaderLoop {
                id,
                stable_id: stable_id.clone(),
                resolver: resolver.clone(),
                backoff: backoff.clone(),
                sink: Arc::clone(&sink),
                shutdown: Arc::clone(&shutdown),
            };
            let handle = thread::Builder::new()
                .name(format!("remapd-reader-{index}"))
                .spawn(move || worker.run(initial))?;
            readers.push(Reader {
                stable_id: stable_id.clone(),
                handle,
            });
        }

        if acquired == 0 {
            let manager = Self { readers, shutdown };
            manager.stop();
            return Err(DeviceError::NoDevices);
        }
        Ok(Self { readers, shutdown })
    }

    /// Stop every reader and release the grabs
    pub fn stop(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for reader in self.readers {
            if reader.handle.join().is_err() {
                log::error!("Reader for {} panicked", reader.stable_id);
            }
        }
    }
}

struct ReaderLoop {
    id: DeviceId,
    stable_id: String,
    resolver: DeviceResolver,
    backoff: Backoff,
    sink: NoticeSink,
    shutdown: Arc<AtomicBool>,
}

impl ReaderLoop {
    fn run(mut self, mut device: Option<Device>) {
        let mut ever_acquired = device.is_some();
        while !self.stopping() {
            let Some(mut current) = device.take() else {
                let delay = self.backoff.next_delay();
                if !self.sleep(delay) {
                    break;
                }
                match acquire(&self.resolver, &self.stable_id) {
                    Ok((path, dev)) => {
                        let name = dev.name().unwrap_or("Unknown").to_string();
                        log::info!("Re-acquired {} at {}", self.stable_id, path.display());
                        if !(self.sink)(DeviceNotice::Acquired { device: self.id, path, name }) {
                            break;
                        }
                        self.backoff.reset();
                        ever_acquired = true;
                        device = Some(dev);
                    }
                    Err(e) => {
                        log::debug!("Retry for {} failed: {e}", self.stable_id);
                        if !ever_acquired {
                            (self.sink)(DeviceNotice::Unavailable {
                                device: self.id,
                                reason: e.to_string(),
                            });
                        }
                    }
                }
                continue;
            };

            match self.read(&mut current) {
                Ok(()) => {
                    let _ = current.ungrab();
                    break;
                }
                Err(reason) => {
                    log::warn!("Lost {}: {reason}", self.stable_id);
                    if !(self.sink)(DeviceNotice::Lost { device: self.id, reason }) {
                        break;
                    }
                }
            }
        }
        log::debug!("Reader for {} stopped", self.stable_id);
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Sleep in short slices so shutdown is not delayed; false when stopping
    fn sleep(&self, total: Duration) -> bool {
        let until = Instant::now() + total;
        while Instant::now() < until {
            if self.stopping() {
                return false;
            }
            thread::sleep(Duration::from_millis(50).min(until.saturating_duration_since(Instant::now())));
        }
        !self.stopping()
    }

    /// Forward events until shutdown (Ok) or a read failure (Err)
    fn read(&self, device: &mut Device) -> Result<(), String> {
        let mut pollfd = libc::pollfd {
            fd: device.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        while !self.stopping() {
            pollfd.revents = 0;
            let ready = unsafe { libc::poll(&mut pollfd, 1, POLL_TIMEOUT_MS) };
            if ready < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.to_string());
            }
            if ready == 0 {
                continue;
            }
            if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
                return Err("device disconnected".to_string());
            }

            let events = match device.fetch_events() {
                Ok(events) => events,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e.to_string()),
            };
            for event in events {
                let Some(raw) = RawEvent::from_parts(event.event_type().0, event.code(), event.value()) else {
                    continue;
                };
                if !(self.sink)(DeviceNotice::Event { device: self.id, event: raw }) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}
