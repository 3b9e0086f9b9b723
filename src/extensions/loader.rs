//! Dynamic loader for native extension modules.
//!
//! Every invocation is independent: the module is loaded, its `run` entry
//! point is called once and the library is closed again. No handle outlives
//! the call, so an update or delete never races a cached library.
//!
//! With [`Isolation::Process`] the call happens in a short-lived worker
//! process (the host binary re-executed with [`WORKER_ARG`]), so a crash in
//! extension code ends the worker and never the host.
//!
//! A panic cannot unwind across the `extern "C"` entry point; it aborts the
//! process that made the call. Modules built with
//! [`extension_entry!`](crate::extension_entry) catch their own panics and
//! report them as an error string. Anything else that goes wrong inside a
//! module only stays contained under process isolation.

use std::ffi::{c_char, CStr};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use libloading::Library;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::Isolation;
use crate::error::{FlickError, FlickResult};

/// Hidden subcommand the host binary uses to run one module in a worker.
pub const WORKER_ARG: &str = "__run-module";

/// Exported entry point every module provides.
pub const ENTRY_SYMBOL: &[u8] = b"run";

/// Optional export that releases the string returned by [`ENTRY_SYMBOL`].
pub const FREE_SYMBOL: &[u8] = b"free_string";

/// Prefix of the line a worker prints to report its outcome.
const OUTCOME_MARKER: &str = "FLICK_OUTCOME ";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

type EntryFn = unsafe extern "C" fn() -> *mut c_char;
type FreeFn = unsafe extern "C" fn(*mut c_char);

/// Lifecycle of a single invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
    Invoking,
    Completed,
    Failed(String),
}

/// Loader settings.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub isolation: Isolation,
    /// Binary used for workers; the running executable when `None`.
    pub worker_exe: Option<PathBuf>,
    /// Upper bound on a worker's run time.
    pub timeout: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            isolation: Isolation::Process,
            worker_exe: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// What a worker reports back to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct WorkerOutcome {
    ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl WorkerOutcome {
    /// The host wraps `error` in [`FlickError::LibLoading`], so a loading
    /// error travels as its bare message.
    fn from_result(result: &FlickResult<()>) -> Self {
        match result {
            Ok(()) => Self {
                ok: true,
                error: None,
            },
            Err(FlickError::LibLoading(message)) => Self {
                ok: false,
                error: Some(message.clone()),
            },
            Err(e) => Self {
                ok: false,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Tracks and logs the state of one invocation.
struct Invocation<'a> {
    id: &'a str,
    state: LoadState,
}

impl<'a> Invocation<'a> {
    fn new(id: &'a str) -> Self {
        Self {
            id,
            state: LoadState::Unloaded,
        }
    }

    fn advance(&mut self, next: LoadState) {
        debug!(id = %self.id, from = ?self.state, to = ?next, "invocation state");
        self.state = next;
    }

    fn finish(mut self, result: FlickResult<()>) -> (LoadState, FlickResult<()>) {
        match &result {
            Ok(()) => self.advance(LoadState::Completed),
            Err(e) => self.advance(LoadState::Failed(e.to_string())),
        }
        (self.state, result)
    }
}

/// Loads and invokes extension modules.
#[derive(Debug, Clone, Default)]
pub struct DynamicLoader {
    config: LoaderConfig,
}

impl DynamicLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Invoke the module at `module` once. Blocks until the call returns.
    pub fn invoke(&self, id: &str, module: &Path) -> FlickResult<()> {
        let (state, result) = self.invoke_traced(id, module);
        match &result {
            Ok(()) => info!(id = %id, "extension completed"),
            Err(e) => warn!(id = %id, %e, ?state, "extension failed"),
        }
        result
    }

    fn invoke_traced(&self, id: &str, module: &Path) -> (LoadState, FlickResult<()>) {
        let mut invocation = Invocation::new(id);

        if !module.is_file() {
            let err = FlickError::LibLoading(format!(
                "module for '{}' not found at {}",
                id,
                module.display()
            ));
            return invocation.finish(Err(err));
        }

        let result = match self.config.isolation {
            Isolation::InProcess => call_module(module, &mut invocation),
            Isolation::Process => self.call_in_worker(module, &mut invocation),
        };
        invocation.finish(result)
    }

    fn call_in_worker(&self, module: &Path, invocation: &mut Invocation<'_>) -> FlickResult<()> {
        let exe = match &self.config.worker_exe {
            Some(exe) => exe.clone(),
            None => std::env::current_exe()?,
        };

        invocation.advance(LoadState::Loading);
        let mut child = Command::new(&exe)
            .arg(WORKER_ARG)
            .arg(module)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                FlickError::LibLoading(format!("failed to start worker {}: {}", exe.display(), e))
            })?;
        invocation.advance(LoadState::Invoking);

        // Drain both pipes so a chatty module cannot block on a full buffer.
        let stdout = child.stdout.take().map(|out| {
            thread::spawn(move || {
                BufReader::new(out)
                    .lines()
                    .map_while(Result::ok)
                    .filter_map(|line| {
                        line.strip_prefix(OUTCOME_MARKER)
                            .and_then(|json| serde_json::from_str::<WorkerOutcome>(json).ok())
                    })
                    .last()
            })
        });
        let stderr = child.stderr.take().map(|mut err| {
            thread::spawn(move || {
                let mut text = String::new();
                let _ = err.read_to_string(&mut text);
                text
            })
        });

        let deadline = Instant::now() + self.config.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(FlickError::LibLoading(format!(
                    "extension '{}' timed out after {}s",
                    invocation.id,
                    self.config.timeout.as_secs()
                )));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let outcome = stdout.and_then(|handle| handle.join().ok()).flatten();
        let diagnostics = stderr
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        match outcome {
            Some(WorkerOutcome { ok: true, .. }) if status.success() => Ok(()),
            Some(WorkerOutcome {
                error: Some(message),
                ..
            }) => Err(FlickError::LibLoading(message)),
            _ => Err(FlickError::LibLoading(format!(
                "worker for '{}' exited with {}: {}",
                invocation.id,
                status,
                diagnostics.trim()
            ))),
        }
    }
}

/// Load `path`, call its entry point once and close it again.
fn call_module(path: &Path, invocation: &mut Invocation<'_>) -> FlickResult<()> {
    invocation.advance(LoadState::Loading);
    // SAFETY: loading runs the library's initializers; modules are installed
    // only after checksum verification.
    let lib = unsafe { Library::new(path) }?;

    // SAFETY: the signatures are the documented extension ABI.
    let entry: EntryFn = unsafe { *lib.get::<EntryFn>(ENTRY_SYMBOL)? };
    let free: Option<FreeFn> = unsafe { lib.get::<FreeFn>(FREE_SYMBOL).ok().map(|sym| *sym) };
    invocation.advance(LoadState::Loaded);

    invocation.advance(LoadState::Invoking);
    // SAFETY: `entry` points into `lib`, which stays open until after the call.
    let ptr = unsafe { entry() };

    let result = if ptr.is_null() {
        Err(FlickError::LibLoading(
            "extension returned a null result".to_string(),
        ))
    } else {
        // SAFETY: the ABI returns a NUL-terminated string owned by the module.
        let message = unsafe { CStr::from_ptr(ptr) }
            .to_string_lossy()
            .into_owned();
        match free {
            // SAFETY: handing the pointer back to the allocator that made it.
            Some(free) => unsafe { free(ptr) },
            None => debug!("module exports no free_string, result string leaked"),
        }

        if message.is_empty() {
            Ok(())
        } else {
            Err(FlickError::LibLoading(message))
        }
    };

    lib.close()?;
    result
}

/// Entry point of a worker process: run one module and report the outcome.
pub fn worker_main(module: &Path) -> ExitCode {
    let mut invocation = Invocation::new("worker");
    let result = call_module(module, &mut invocation);
    let outcome = WorkerOutcome::from_result(&result);

    match serde_json::to_string(&outcome) {
        Ok(json) => println!("{}{}", OUTCOME_MARKER, json),
        Err(e) => eprintln!("failed to encode outcome: {}", e),
    }

    if result.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
