// Remapd Control Protocol
// Line commands and response formatting

use std::fmt;
use std::str::FromStr;

use super::ControlError;

/// A parsed control command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetProfile(String),
    Reload,
    ListDevices,
    TestEventStream,
    Status,
    Ping,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetProfile(_) => "set_profile",
            Command::Reload => "reload",
            Command::ListDevices => "list_devices",
            Command::TestEventStream => "test_event_stream",
            Command::Status => "status",
            Command::Ping => "ping",
        }
    }
}

impl FromStr for Command {
    type Err = ControlError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let Some(verb) = parts.next() else {
            return Err(ControlError::ControlChannelError("empty command".to_string()));
        };
        let arg = parts.next();
        if parts.next().is_some() {
            return Err(ControlError::ControlChannelError(format!(
                "too many arguments for '{verb}'"
            )));
        }

        let no_arg = |command: Command| match arg {
            None => Ok(command),
            Some(_) => Err(ControlError::ControlChannelError(format!(
                "'{verb}' takes no arguments"
            ))),
        };

        match verb {
            "set_profile" => arg
                .map(|id| Command::SetProfile(id.to_string()))
                .ok_or_else(|| ControlError::ControlChannelError("usage: set_profile <id>".to_string())),
            "reload" => no_arg(Command::Reload),
            "list_devices" => no_arg(Command::ListDevices),
            "test_event_stream" => no_arg(Command::TestEventStream),
            "status" => no_arg(Command::Status),
            "ping" => no_arg(Command::Ping),
            other => Err(ControlError::ControlChannelError(format!(
                "unknown command '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetProfile(id) => write!(f, "set_profile {id}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Final line of a response
pub fn ok_line(detail: &str) -> String {
    if detail.is_empty() {
        "ok".to_string()
    } else {
        format!("ok {detail}")
    }
}

/// Final line for a failed command; multi-line messages are folded
pub fn error_line(error: &ControlError) -> String {
    let message = error.to_string().replace('\n', "; ");
    format!("error {}: {message}", error.kind())
}

/// Whether a response line ends the response
pub fn is_final_line(line: &str) -> bool {
    line == "ok" || line.starts_with("ok ") || line.starts_with("error ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!("set_profile gaming".parse::<Command>().unwrap(), Command::SetProfile("gaming".into()));
        assert_eq!("  reload ".parse::<Command>().unwrap(), Command::Reload);
        assert_eq!("list_devices".parse::<Command>().unwrap(), Command::ListDevices);
        assert_eq!("test_event_stream".parse::<Command>().unwrap(), Command::TestEventStream);
        assert_eq!("ping".parse::<Command>().unwrap(), Command::Ping);
    }

    #[test]
    fn test_malformed_commands() {
        for line in ["", "set_profile", "reload now", "set_profile a b", "explode"] {
            let err = line.parse::<Command>().unwrap_err();
            assert_eq!(err.kind(), "control", "{line:?}");
        }
    }

    #[test]
    fn test_command_display_round_trips() {
        let cmd = Command::SetProfile("work".into());
        assert_eq!(cmd.to_string().parse::<Command>().unwrap(), cmd);
    }

    #[test]
    fn test_response_lines() {
        assert_eq!(ok_line(""), "ok");
        assert_eq!(ok_line("pong"), "ok pong");
        let err = ControlError::ControlChannelError("bad\nthing".into());
        assert_eq!(error_line(&err), "error control: malformed command: bad; thing");
        assert!(is_final_line("ok"));
        assert!(is_final_line("error profile: missing"));
        assert!(!is_final_line("device dev0 acquired"));
        assert!(!is_final_line("okay"));
    }
}
