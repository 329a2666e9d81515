// Remapd Daemon
// Grabs the configured devices and remaps them onto a virtual device

use std::path::PathBuf;
use std::process::ExitCode;

#[cfg(feature = "pure-rust")]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "pure-rust")]
use std::sync::mpsc;
#[cfg(feature = "pure-rust")]
use std::sync::Arc;

#[cfg(feature = "pure-rust")]
use anyhow::Context;
#[cfg(feature = "pure-rust")]
use clap::Parser;

#[cfg(feature = "pure-rust")]
use remapd_core::{
    compile, list_host_devices, CompiledProfile, ControlBackend, ControlServer, DaemonError,
    DaemonHandle, DaemonSettings, DeviceNotice, DeviceResolver, DeviceSessionManager, Engine, Message,
    OutputSink, ProfileDocument, ProfileError, ProfileLoader, ThreadTimer, VirtualDevice,
};

/// Physical-to-virtual input remap daemon
#[derive(Parser, Debug)]
#[command(name = "remapd")]
#[command(version)]
#[command(about = "Remaps grabbed input devices onto a virtual device", long_about = None)]
struct Args {
    /// Configuration directory (default: ~/.config/remapd)
    #[arg(long, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Profile to start with instead of the active one
    #[arg(short, long, value_name = "ID")]
    profile: Option<String>,

    /// Control socket path
    #[arg(long, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// List input devices and their stable ids, then exit
    #[arg(long)]
    list_devices: bool,

    /// Compile the profile, report problems and exit
    #[arg(long)]
    check_profile: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Process exit statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Clean = 0,
    Startup = 1,
    OutputFailure = 2,
}

impl From<Exit> for ExitCode {
    fn from(exit: Exit) -> Self {
        ExitCode::from(exit as u8)
    }
}

/// Main application state
#[cfg(feature = "pure-rust")]
struct Application {
    args: Args,
    settings: DaemonSettings,
    loader: ProfileLoader,
}

#[cfg(feature = "pure-rust")]
impl Application {
    fn new(args: Args) -> anyhow::Result<Self> {
        let config_dir = args
            .config_dir
            .clone()
            .unwrap_or_else(ProfileLoader::default_config_dir);
        let settings = DaemonSettings::load(&config_dir)
            .with_context(|| format!("loading settings from {}", config_dir.display()))?;
        let mut loader = ProfileLoader::new(Some(config_dir));
        if let Some(dir) = &settings.profiles_dir {
            loader = loader.with_profiles_dir(dir.clone());
        }
        Ok(Self {
            args,
            settings,
            loader,
        })
    }

    fn list_devices(&self) {
        let resolver = DeviceResolver::default();
        let devices = list_host_devices(&resolver, &self.settings.virtual_device_name);
        println!("Found {} input device(s):", devices.len());
        for device in &devices {
            println!("  {} {}", device.path.display(), device.name);
            for id in &device.stable_ids {
                println!("      id: {id}");
            }
        }
    }

    /// The requested profile, or the active one; writes a default profile on first start
    fn startup_document(&self) -> anyhow::Result<ProfileDocument> {
        if let Some(id) = &self.args.profile {
            return Ok(self.loader.load_profile(id)?);
        }
        match self.loader.load_active_profile() {
            Ok(doc) => Ok(doc),
            Err(ProfileError::NoActiveProfile) if self.loader.list_profiles()?.is_empty() => {
                let doc = ProfileDocument::empty("default", "Default Profile");
                let path = self.loader.save_profile(&doc)?;
                self.loader.set_active_profile(&doc.id)?;
                log::info!("Created default profile at {}", path.display());
                Ok(doc)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn compile_startup_profile(&self) -> anyhow::Result<CompiledProfile> {
        let doc = self.startup_document()?;
        let compiled = compile(&doc, &self.settings.macro_limits())
            .with_context(|| format!("compiling profile '{}'", doc.id))?;
        Ok(compiled)
    }

    fn check_profile(&self) -> Exit {
        match self.compile_startup_profile() {
            Ok(profile) => {
                println!(
                    "Profile '{}' is valid: {} layers, {} macros, {} devices",
                    profile.id,
                    profile.layers().len(),
                    profile.macros().count(),
                    profile.input_devices.len()
                );
                Exit::Clean
            }
            Err(e) => {
                eprintln!("{e:#}");
                Exit::Startup
            }
        }
    }

    /// Run until a signal or an output failure
    fn run(&self) -> Exit {
        let profile = match self.compile_startup_profile() {
            Ok(profile) => Arc::new(profile),
            Err(e) => {
                log::error!("{e:#}");
                return Exit::Startup;
            }
        };
        let output = match VirtualDevice::new(&self.settings.virtual_device_name) {
            Ok(device) => device,
            Err(e) => {
                log::error!("{e}");
                return Exit::Startup;
            }
        };

        let (inbox, events) = mpsc::channel::<Message>();

        let timer_inbox = inbox.clone();
        let timer = match ThreadTimer::spawn(Box::new(move |run, generation| {
            timer_inbox.send(Message::MacroTick { run, generation }).is_ok()
        })) {
            Ok(timer) => timer,
            Err(e) => {
                log::error!("Failed to start macro timer: {e}");
                return Exit::Startup;
            }
        };

        let device_ids = profile.input_devices.clone();
        let sink = OutputSink::new(Box::new(output));
        let mut engine = Engine::new(Arc::clone(&profile), sink, Box::new(timer));
        engine.register_devices(&device_ids);

        let device_inbox = inbox.clone();
        let sessions = match DeviceSessionManager::start(
            &device_ids,
            DeviceResolver::default(),
            self.settings.reconnect_backoff(),
            Arc::new(move |notice: DeviceNotice| device_inbox.send(notice.into()).is_ok()),
        ) {
            Ok(sessions) => sessions,
            Err(e) => {
                log::error!("{e} (profile '{}' lists {} devices)", profile.id, device_ids.len());
                return Exit::Startup;
            }
        };

        let socket = self
            .args
            .socket
            .clone()
            .unwrap_or_else(|| self.settings.socket_path());
        let server = match ControlServer::bind(&socket) {
            Ok(server) => server,
            Err(e) => {
                log::error!("{e}");
                sessions.stop();
                return Exit::Startup;
            }
        };
        let handle = DaemonHandle::new(
            inbox.clone(),
            self.loader.clone(),
            self.settings.macro_limits(),
        );
        let stopping = Arc::new(AtomicBool::new(false));
        let backend: Arc<dyn ControlBackend> = Arc::new(handle.clone());
        let control = match server.spawn(backend, Arc::clone(&stopping)) {
            Ok(control) => Some(control),
            Err(e) => {
                log::warn!("Control server unavailable: {e}");
                None
            }
        };

        spawn_signal_thread(handle);
        drop(inbox);

        log::info!("remapd running with profile '{}'", profile.id);
        let result = engine.run(events);

        stopping.store(true, Ordering::SeqCst);
        sessions.stop();
        if let Some(control) = control {
            let _ = control.join();
        }

        match result {
            Ok(()) => {
                log::info!("Clean shutdown");
                Exit::Clean
            }
            Err(DaemonError::Output(e)) => {
                log::error!("Output device failed: {e}");
                Exit::OutputFailure
            }
            Err(e) => {
                log::error!("{e}");
                Exit::OutputFailure
            }
        }
    }
}

/// SIGINT/SIGTERM post a Shutdown message to the actor
#[cfg(feature = "pure-rust")]
fn spawn_signal_thread(handle: DaemonHandle) {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    match Signals::new([SIGINT, SIGTERM]) {
        Ok(mut signals) => {
            std::thread::spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    log::info!("Received signal {signal}, shutting down");
                    handle.shutdown();
                }
            });
        }
        Err(e) => log::warn!("Could not install signal handlers: {e}"),
    }
}

#[cfg(feature = "pure-rust")]
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp_millis()
        .init();
}

#[cfg(feature = "pure-rust")]
fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let app = match Application::new(args) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return Exit::Startup.into();
        }
    };

    if app.args.list_devices {
        app.list_devices();
        return Exit::Clean.into();
    }
    if app.args.check_profile {
        return app.check_profile().into();
    }
    app.run().into()
}

// Stub for when pure-rust feature is not enabled
#[cfg(not(feature = "pure-rust"))]
fn main() -> ExitCode {
    eprintln!("Error: remapd requires the 'pure-rust' feature to be enabled.");
    ExitCode::from(Exit::Startup as u8)
}
