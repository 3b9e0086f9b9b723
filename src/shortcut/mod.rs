//! Global shortcut: key names, capture, and OS registration.

pub mod hotkey;
pub mod keys;
pub mod recorder;

pub use hotkey::{DetachedBinder, HotkeyService, ShortcutBinder, Trigger};
pub use recorder::{CapturedShortcut, KeyEvent, ShortcutRecorder};
