// Remapd Control Client
// Talks to a running remapd over its control socket

use std::path::PathBuf;
use std::process::ExitCode;

#[cfg(feature = "pure-rust")]
use clap::{Parser, Subcommand};

#[cfg(feature = "pure-rust")]
use remapd_core::control::{send_command, stream_command};
#[cfg(feature = "pure-rust")]
use remapd_core::key::key_categories;
#[cfg(feature = "pure-rust")]
use remapd_core::{Command, DaemonSettings, ProfileLoader};

/// Control client for remapd
#[derive(Parser, Debug)]
#[command(name = "remapctl")]
#[command(version)]
#[command(about = "Switch profiles and inspect a running remapd", long_about = None)]
struct Args {
    /// Configuration directory (default: ~/.config/remapd)
    #[arg(long, value_name = "DIR", global = true)]
    config_dir: Option<PathBuf>,

    /// Control socket path (default: from settings)
    #[arg(long, value_name = "PATH", global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Action {
    /// Apply a profile and make it the active one
    SetProfile { id: String },
    /// Recompile the current profile from disk and apply it
    Reload,
    /// Show configured devices and their acquisition state
    ListDevices,
    /// Print resolved input events until interrupted
    #[command(alias = "events")]
    TestEventStream,
    /// Show active profile, layers and held keys
    Status,
    /// Check that the daemon answers
    Ping,
    /// List profiles on disk (does not contact the daemon)
    Profiles,
    /// List key names usable in profiles (does not contact the daemon)
    Keys,
}

impl Action {
    /// Socket command for actions the daemon handles
    #[cfg(feature = "pure-rust")]
    fn command(&self) -> Option<Command> {
        match self {
            Action::SetProfile { id } => Some(Command::SetProfile(id.clone())),
            Action::Reload => Some(Command::Reload),
            Action::ListDevices => Some(Command::ListDevices),
            Action::TestEventStream => Some(Command::TestEventStream),
            Action::Status => Some(Command::Status),
            Action::Ping => Some(Command::Ping),
            Action::Profiles | Action::Keys => None,
        }
    }
}

#[cfg(feature = "pure-rust")]
fn run(args: Args) -> anyhow::Result<()> {
    let config_dir = args
        .config_dir
        .unwrap_or_else(ProfileLoader::default_config_dir);
    let settings = DaemonSettings::load(&config_dir)?;

    match &args.command {
        Action::Keys => {
            for (category, names) in key_categories() {
                println!("{category}:");
                println!("  {}", names.join(" "));
            }
            return Ok(());
        }
        Action::Profiles => {
            let mut loader = ProfileLoader::new(Some(config_dir));
            if let Some(dir) = &settings.profiles_dir {
                loader = loader.with_profiles_dir(dir.clone());
            }
            let active = loader.active_profile_id()?;
            for id in loader.list_profiles()? {
                let marker = if active.as_deref() == Some(id.as_str()) { "*" } else { " " };
                println!("{marker} {id}");
            }
            return Ok(());
        }
        _ => {}
    }

    let Some(command) = args.command.command() else {
        return Ok(());
    };
    let socket = args.socket.unwrap_or_else(|| settings.socket_path());

    if command == Command::TestEventStream {
        stream_command(&socket, &command, |line| {
            println!("{line}");
            true
        })?;
        return Ok(());
    }

    for line in send_command(&socket, &command)? {
        println!("{line}");
    }
    Ok(())
}

#[cfg(feature = "pure-rust")]
fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::from(1)
        }
    }
}

// Stub for when pure-rust feature is not enabled
#[cfg(not(feature = "pure-rust"))]
fn main() -> ExitCode {
    eprintln!("Error: remapctl requires the 'pure-rust' feature to be enabled.");
    ExitCode::from(1)
}
