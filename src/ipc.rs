//! Newline-delimited JSON over local sockets (named pipes on Windows).

use crate::{Result, SnipError};
use interprocess::local_socket::{LocalSocketListener, LocalSocketStream};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::io::{BufRead, BufReader, Write};
use std::thread;
use tracing::{debug, error, info, warn};

/// Connects, writes one message, and disconnects.
pub fn send_message<T: Serialize>(pipe_name: &str, message: &T) -> Result<()> {
    let mut connection = LocalSocketStream::connect(pipe_name)
        .map_err(|e| SnipError::Ipc(format!("Failed to connect to pipe {}: {}", pipe_name, e)))?;

    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    connection
        .write_all(line.as_bytes())
        .and_then(|_| connection.flush())
        .map_err(|e| SnipError::Ipc(format!("Failed to write message to pipe {}: {}", pipe_name, e)))?;

    Ok(())
}

/// Binds `pipe_name` and hands every well-formed message to `callback` from a
/// background thread. Returns once the socket is bound.
pub fn listen<T, F>(pipe_name: &str, mut callback: F) -> Result<()>
where
    T: DeserializeOwned + Debug,
    F: FnMut(T) -> Result<()> + Send + 'static,
{
    let listener = LocalSocketListener::bind(pipe_name)
        .map_err(|e| SnipError::Ipc(format!("Failed to bind to socket {}: {}", pipe_name, e)))?;

    info!(pipe = pipe_name, "IPC listener started");
    let pipe_name = pipe_name.to_string();

    thread::spawn(move || {
        for connection_result in listener.incoming() {
            let connection = match connection_result {
                Ok(connection) => connection,
                Err(e) => {
                    error!(pipe = %pipe_name, error = ?e, "Error accepting IPC connection");
                    continue;
                }
            };

            for line_result in BufReader::new(connection).lines() {
                let line = match line_result {
                    Ok(line) => line,
                    Err(e) => {
                        error!(pipe = %pipe_name, error = ?e, "Error reading from IPC connection");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<T>(&line) {
                    Ok(message) => {
                        debug!(?message, "Received IPC message");
                        if let Err(e) = callback(message) {
                            error!(error = %e, "Error handling IPC message");
                        }
                    }
                    Err(e) => error!(line = %line, error = ?e, "Error parsing IPC message"),
                }
            }
        }
        warn!(pipe = %pipe_name, "IPC listener loop has exited");
    });

    Ok(())
}
