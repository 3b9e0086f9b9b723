//! Request/response bridge over a local socket.
//!
//! The daemon listens on `flick.sock` in the runtime directory. Each line a
//! client writes is one JSON [`Request`]; the daemon answers every line with
//! exactly one JSON [`Response`] line. A line that does not parse gets a
//! `RuntimeBridge` error response and the connection stays open.

use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;
use std::thread;

use interprocess::local_socket::{
    traits::{ListenerExt, Stream as _},
    GenericFilePath, Listener, ListenerOptions, Stream, ToFsName,
};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::commands::{App, Request, Response};
use crate::error::{FlickError, FlickResult, WireError};

/// The socket name for Flick IPC.
pub const SOCKET_NAME: &str = "flick.sock";

/// Get the socket path for the current platform.
pub fn socket_path() -> String {
    #[cfg(target_os = "windows")]
    {
        format!("@{}", SOCKET_NAME)
    }
    #[cfg(not(target_os = "windows"))]
    {
        if let Some(runtime_dir) = dirs::runtime_dir() {
            runtime_dir.join(SOCKET_NAME).to_string_lossy().into_owned()
        } else if let Some(cache_dir) = dirs::cache_dir() {
            cache_dir.join(SOCKET_NAME).to_string_lossy().into_owned()
        } else {
            format!("/tmp/{}", SOCKET_NAME)
        }
    }
}

fn bridge_error(context: &str, e: impl std::fmt::Display) -> FlickError {
    FlickError::RuntimeBridge(format!("{}: {}", context, e))
}

/// A running bridge listener. Dropping it removes the socket file.
pub struct BridgeServer {
    path: String,
}

impl BridgeServer {
    /// Start listening at `path`, serving requests with `app` on `runtime`.
    pub fn start(app: Arc<App>, runtime: Handle, path: &str) -> FlickResult<Self> {
        // Clean up old socket file if it exists (Unix only)
        #[cfg(not(target_os = "windows"))]
        {
            let _ = std::fs::remove_file(path);
        }

        let name = path
            .to_fs_name::<GenericFilePath>()
            .map_err(|e| bridge_error("invalid socket name", e))?;
        let listener = ListenerOptions::new()
            .name(name)
            .create_sync()
            .map_err(|e| bridge_error("failed to listen", e))?;

        thread::Builder::new()
            .name("flick-bridge".to_string())
            .spawn(move || listener_loop(listener, app, runtime))
            .map_err(|e| bridge_error("failed to start listener thread", e))?;

        info!(path = %path, "bridge listening");
        Ok(Self {
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for BridgeServer {
    fn drop(&mut self) {
        #[cfg(not(target_os = "windows"))]
        {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn listener_loop(listener: Listener, app: Arc<App>, runtime: Handle) {
    for conn in listener.incoming().filter_map(|c| c.ok()) {
        let app = app.clone();
        let runtime = runtime.clone();
        thread::spawn(move || serve_connection(conn, &app, &runtime));
    }
}

fn serve_connection(conn: Stream, app: &App, runtime: &Handle) {
    let mut reader = BufReader::new(conn);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(%e, "bridge connection closed");
                break;
            }
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(trimmed) {
            Ok(request) => runtime.block_on(app.handle(request)),
            Err(e) => {
                warn!(%e, "malformed bridge request");
                Response::Error(WireError::from(&bridge_error("malformed request", e)))
            }
        };

        let mut out = match serde_json::to_string(&response) {
            Ok(out) => out,
            Err(e) => {
                warn!(%e, "failed to encode bridge response");
                break;
            }
        };
        out.push('\n');

        if reader.get_mut().write_all(out.as_bytes()).is_err() {
            break;
        }
    }
}

/// A client connection to a running daemon.
pub struct BridgeClient {
    reader: BufReader<Stream>,
}

impl BridgeClient {
    pub fn connect(path: &str) -> FlickResult<Self> {
        let name = path
            .to_fs_name::<GenericFilePath>()
            .map_err(|e| bridge_error("invalid socket name", e))?;
        let stream = Stream::connect(name).map_err(|e| bridge_error("no daemon listening", e))?;
        Ok(Self {
            reader: BufReader::new(stream),
        })
    }

    /// Send one request and wait for its response.
    pub fn send(&mut self, request: &Request) -> FlickResult<Response> {
        let line = serde_json::to_string(request)?;
        self.send_line(&line)
    }

    fn send_line(&mut self, line: &str) -> FlickResult<Response> {
        self.reader
            .get_mut()
            .write_all(format!("{}\n", line).as_bytes())
            .map_err(|e| bridge_error("failed to send request", e))?;

        let mut reply = String::new();
        let read = self
            .reader
            .read_line(&mut reply)
            .map_err(|e| bridge_error("failed to read response", e))?;
        if read == 0 {
            return Err(FlickError::RuntimeBridge(
                "daemon closed the connection".to_string(),
            ));
        }

        Ok(serde_json::from_str(reply.trim())?)
    }
}
