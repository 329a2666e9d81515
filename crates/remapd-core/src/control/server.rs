// Remapd Control Server
// Accept loop plus one thread per connection

use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::protocol::{error_line, ok_line, Command};
use super::{ControlBackend, ControlError};

const ACCEPT_POLL_MS: i32 = 200;
const STREAM_POLL: Duration = Duration::from_millis(200);

/// Listening control socket
pub struct ControlServer {
    path: PathBuf,
    listener: UnixListener,
}

impl ControlServer {
    /// Bind the socket, replacing a stale file, and restrict it to the owner
    pub fn bind(path: &Path) -> Result<Self, ControlError> {
        if path.exists() {
            if UnixStream::connect(path).is_ok() {
                return Err(ControlError::Unavailable(format!(
                    "another daemon is listening on {}",
                    path.display()
                )));
            }
            log::debug!("Removing stale socket {}", path.display());
            fs::remove_file(path)?;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(path)?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        log::info!("Control socket listening on {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            listener,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run the accept loop on its own thread until `shutdown` is set
    pub fn spawn(
        self,
        backend: Arc<dyn ControlBackend>,
        shutdown: Arc<AtomicBool>,
    ) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("remapd-control".to_string())
            .spawn(move || self.serve(backend, shutdown))
    }

    fn serve(self, backend: Arc<dyn ControlBackend>, shutdown: Arc<AtomicBool>) {
        let mut pollfd = libc::pollfd {
            fd: self.listener.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let mut next_conn = 0usize;

        while !shutdown.load(Ordering::SeqCst) {
            pollfd.revents = 0;
            let ready = unsafe { libc::poll(&mut pollfd, 1, ACCEPT_POLL_MS) };
            if ready < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                log::error!("Control socket poll failed: {err}");
                break;
            }
            if ready == 0 {
                continue;
            }

            match self.listener.accept() {
                Ok((stream, _)) => {
                    next_conn += 1;
                    let backend = Arc::clone(&backend);
                    let shutdown = Arc::clone(&shutdown);
                    let spawned = thread::Builder::new()
                        .name(format!("remapd-conn-{next_conn}"))
                        .spawn(move || {
                            if let Err(e) = handle_connection(stream, backend.as_ref(), &shutdown) {
                                log::debug!("Control connection closed: {e}");
                            }
                        });
                    if let Err(e) = spawned {
                        log::warn!("Failed to spawn control connection thread: {e}");
                    }
                }
                Err(e) => log::warn!("Control accept failed: {e}"),
            }
        }

        let _ = fs::remove_file(&self.path);
        log::debug!("Control server stopped");
    }
}

fn write_line(out: &mut impl Write, line: &str) -> io::Result<()> {
    out.write_all(line.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()
}

/// Serve commands on one connection until the client disconnects
pub(crate) fn handle_connection(
    stream: UnixStream,
    backend: &dyn ControlBackend,
    shutdown: &AtomicBool,
) -> io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut out = stream;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(_) => {
                let err = ControlError::ControlChannelError("command is not valid UTF-8".to_string());
                log::warn!("Rejected control command: {err}");
                write_line(&mut out, &error_line(&err))?;
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                log::warn!("Rejected control command {line:?}: {e}");
                write_line(&mut out, &error_line(&e))?;
                continue;
            }
        };
        log::debug!("Control command: {command}");

        let result = match command {
            Command::Ping => Ok("pong".to_string()),
            Command::SetProfile(id) => backend.set_profile(&id),
            Command::Reload => backend.reload(),
            Command::Status => backend.status(),
            Command::ListDevices => backend.list_devices().and_then(|lines| {
                for device in &lines {
                    write_line(&mut out, &format!("device {device}"))?;
                }
                Ok(format!("{} devices", lines.len()))
            }),
            Command::TestEventStream => {
                let events = match backend.subscribe() {
                    Ok(events) => events,
                    Err(e) => {
                        write_line(&mut out, &error_line(&e))?;
                        continue;
                    }
                };
                write_line(&mut out, &ok_line("streaming"))?;
                loop {
                    match events.recv_timeout(STREAM_POLL) {
                        Ok(event) => write_line(&mut out, &format!("event {event}"))?,
                        Err(RecvTimeoutError::Timeout) => {
                            if shutdown.load(Ordering::SeqCst) || peer_closed(&out) {
                                return Ok(());
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => return Ok(()),
                    }
                }
            }
        };

        match result {
            Ok(detail) => write_line(&mut out, &ok_line(&detail))?,
            Err(e) => {
                log::warn!("Control command failed: {e}");
                write_line(&mut out, &error_line(&e))?;
            }
        }
    }
    Ok(())
}

/// Non-blocking check for an orderly shutdown by the client
fn peer_closed(stream: &UnixStream) -> bool {
    let mut byte = 0u8;
    let n = unsafe {
        libc::recv(
            stream.as_raw_fd(),
            (&mut byte as *mut u8).cast(),
            1,
            libc::MSG_PEEK | libc::MSG_DONTWAIT,
        )
    };
    n == 0
}
