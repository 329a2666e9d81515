// Remapd Control Client
// Used by remapctl to send one command and collect the response

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use super::protocol::{is_final_line, Command};
use super::ControlError;

fn connect(socket: &Path, command: &Command) -> Result<(UnixStream, BufReader<UnixStream>), ControlError> {
    let mut stream = UnixStream::connect(socket).map_err(|e| {
        ControlError::Unavailable(format!("cannot connect to {}: {e}", socket.display()))
    })?;
    writeln!(stream, "{command}")?;
    stream.flush()?;
    let reader = BufReader::new(stream.try_clone()?);
    Ok((stream, reader))
}

/// Send a command and return every response line, final line included.
///
/// An `error ...` final line becomes `ControlError::Remote`.
pub fn send_command(socket: &Path, command: &Command) -> Result<Vec<String>, ControlError> {
    let (_stream, reader) = connect(socket, command)?;
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let done = is_final_line(&line);
        if done && line.starts_with("error ") {
            return Err(ControlError::Remote(line));
        }
        lines.push(line);
        if done {
            return Ok(lines);
        }
    }
    Err(ControlError::Unavailable("connection closed before a response".to_string()))
}

/// Send a streaming command and hand each line to `on_line` until it returns false
/// or the daemon closes the stream
pub fn stream_command<F>(socket: &Path, command: &Command, mut on_line: F) -> Result<(), ControlError>
where
    F: FnMut(&str) -> bool,
{
    let (_stream, reader) = connect(socket, command)?;
    for line in reader.lines() {
        let line = line?;
        if line.starts_with("error ") {
            return Err(ControlError::Remote(line));
        }
        if !on_line(&line) {
            break;
        }
    }
    Ok(())
}
