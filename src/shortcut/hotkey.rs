//! Global hotkey management for Flick.
//!
//! This module registers the configured shortcut with the OS through the
//! `global-hotkey` crate and forwards presses to a trigger callback.
//!
//! Two background threads are involved:
//! - the registration thread owns the `GlobalHotKeyManager` and serves
//!   rebind requests sent over a channel;
//! - the listener thread reads hotkey events and fires the trigger.
//!
//! The trigger runs on the listener thread, so it must hand work off and
//! return immediately.

use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use global_hotkey::{hotkey::HotKey, GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use tracing::{debug, info, warn};

use crate::error::{FlickError, FlickResult};

/// Something that can move the global shortcut from one binding to another.
pub trait ShortcutBinder: Send + Sync {
    /// Unregister `old` (if set) and register `new` (if set).
    ///
    /// On failure the previous binding stays registered.
    fn rebind(&self, old: &str, new: &str) -> FlickResult<()>;
}

/// Callback fired on every press of the registered shortcut.
pub type Trigger = Arc<dyn Fn() + Send + Sync>;

/// No binding registered.
const NO_HOTKEY: u32 = 0;

enum HotkeyCommand {
    Rebind {
        old: String,
        new: String,
        reply: Sender<FlickResult<()>>,
    },
}

/// Handle to the hotkey threads.
pub struct HotkeyService {
    commands: Mutex<Sender<HotkeyCommand>>,
}

impl HotkeyService {
    /// Start the hotkey threads. Nothing is registered until the first
    /// [`ShortcutBinder::rebind`].
    pub fn start(trigger: Trigger) -> FlickResult<Self> {
        let active = Arc::new(AtomicU32::new(NO_HOTKEY));
        let (tx, rx) = mpsc::channel::<HotkeyCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<FlickResult<()>>();

        let registered = active.clone();
        thread::Builder::new()
            .name("flick-hotkey".to_string())
            .spawn(move || {
                // The manager has to stay on the thread that created it.
                let manager = match GlobalHotKeyManager::new() {
                    Ok(manager) => {
                        let _ = ready_tx.send(Ok(()));
                        manager
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.into()));
                        return;
                    }
                };

                for command in rx {
                    match command {
                        HotkeyCommand::Rebind { old, new, reply } => {
                            let result = rebind_on(&manager, &registered, &old, &new);
                            let _ = reply.send(result);
                        }
                    }
                }
                debug!("hotkey registration thread stopped");
            })
            .map_err(|e| FlickError::ShortcutRegistration(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|e| FlickError::ShortcutRegistration(e.to_string()))??;

        let listening = active;
        thread::Builder::new()
            .name("flick-hotkey-events".to_string())
            .spawn(move || {
                let events = GlobalHotKeyEvent::receiver();
                while let Ok(event) = events.recv() {
                    let current = listening.load(Ordering::Acquire);
                    if current != NO_HOTKEY
                        && event.id == current
                        && event.state == HotKeyState::Pressed
                    {
                        trigger();
                    }
                }
            })
            .map_err(|e| FlickError::ShortcutRegistration(e.to_string()))?;

        Ok(Self {
            commands: Mutex::new(tx),
        })
    }
}

impl ShortcutBinder for HotkeyService {
    fn rebind(&self, old: &str, new: &str) -> FlickResult<()> {
        let (reply_tx, reply_rx) = mpsc::channel();
        {
            let commands = self
                .commands
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            commands
                .send(HotkeyCommand::Rebind {
                    old: old.to_string(),
                    new: new.to_string(),
                    reply: reply_tx,
                })
                .map_err(|_| {
                    FlickError::ShortcutRegistration("hotkey thread is not running".to_string())
                })?;
        }

        reply_rx.recv().map_err(|_| {
            FlickError::ShortcutRegistration("hotkey thread dropped the request".to_string())
        })?
    }
}

/// Binder for processes without a hotkey service (the CLI, headless
/// daemons). Checks that bindings parse, registers nothing.
#[derive(Debug, Default)]
pub struct DetachedBinder;

impl ShortcutBinder for DetachedBinder {
    fn rebind(&self, _old: &str, new: &str) -> FlickResult<()> {
        if !new.is_empty() {
            parse(new)?;
        }
        debug!(binding = %new, "no hotkey service, binding stored only");
        Ok(())
    }
}

fn parse(binding: &str) -> FlickResult<HotKey> {
    Ok(HotKey::from_str(binding)?)
}

fn rebind_on(
    manager: &GlobalHotKeyManager,
    active: &AtomicU32,
    old: &str,
    new: &str,
) -> FlickResult<()> {
    let previous = if old.is_empty() { None } else { parse(old).ok() };

    if let Some(hotkey) = previous {
        if let Err(e) = manager.unregister(hotkey) {
            warn!(binding = %old, %e, "failed to unregister previous shortcut");
        }
    }
    active.store(NO_HOTKEY, Ordering::Release);

    if new.is_empty() {
        info!("global shortcut cleared");
        return Ok(());
    }

    let registered = parse(new).and_then(|hotkey| {
        manager.register(hotkey)?;
        Ok(hotkey)
    });

    match registered {
        Ok(hotkey) => {
            active.store(hotkey.id(), Ordering::Release);
            info!(binding = %new, "registered global shortcut");
            Ok(())
        }
        Err(e) => {
            warn!(binding = %new, %e, "failed to register shortcut, restoring previous");
            if let Some(hotkey) = previous {
                if manager.register(hotkey).is_ok() {
                    active.store(hotkey.id(), Ordering::Release);
                }
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_registration_forms() {
        assert!(parse("Control+Shift+Space").is_ok());
        assert!(parse("Command+A").is_ok());
        assert!(parse("CommandOrControl+Shift+Space").is_ok());

        let err = parse("Control+NotAKey").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ShortcutRegistration);
    }

    #[test]
    fn test_detached_binder_validates() {
        let binder = DetachedBinder;
        assert!(binder.rebind("", "Control+Shift+Space").is_ok());
        assert!(binder.rebind("Control+Shift+Space", "").is_ok());
        assert!(binder.rebind("", "Control+NotAKey").is_err());
    }

    #[test]
    fn test_same_binding_same_id() {
        let a = parse("Control+Shift+Space").unwrap();
        let b = parse("control+shift+space").unwrap();
        assert_eq!(a.id(), b.id());
    }
}
