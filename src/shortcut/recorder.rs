//! Shortcut capture from a raw key-event stream.
//!
//! The recorder tracks the keys currently held. Each release evaluates the
//! held set; a valid combination is emitted once, anything else is dropped.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::keys;

/// A raw key event from the input source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "code", rename_all = "lowercase")]
pub enum KeyEvent {
    Pressed(String),
    Released(String),
}

/// A validated key combination in both presentation forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedShortcut {
    /// Canonical key names, modifiers first.
    pub keys: Vec<String>,
    /// For user feedback, e.g. `Ctrl+⇧+A`.
    pub display: String,
    /// For the hotkey subsystem and `Config::shortcut`, e.g. `Control+Shift+A`.
    pub registration: String,
}

impl CapturedShortcut {
    fn from_held(held: &[String]) -> Self {
        let (mut ordered, rest): (Vec<String>, Vec<String>) =
            held.iter().cloned().partition(|k| keys::is_modifier(k));
        ordered.extend(rest);

        Self {
            display: keys::to_display(ordered.as_slice()),
            registration: keys::to_registration(ordered.as_slice()),
            keys: ordered,
        }
    }
}

/// Held-key state machine.
#[derive(Debug, Default)]
pub struct ShortcutRecorder {
    held: Vec<String>,
}

impl ShortcutRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical names of the keys currently held, in press order.
    pub fn held(&self) -> &[String] {
        &self.held
    }

    /// Feed one raw event; returns a shortcut when a release completes a
    /// valid combination.
    pub fn feed(&mut self, event: KeyEvent) -> Option<CapturedShortcut> {
        match event {
            KeyEvent::Pressed(code) => {
                let key = keys::normalize(&code);
                if !self.held.contains(&key) {
                    self.held.push(key);
                }
                None
            }
            KeyEvent::Released(code) => {
                let key = keys::normalize(&code);
                let captured = if keys::is_shortcut(self.held.as_slice()) {
                    Some(CapturedShortcut::from_held(&self.held))
                } else {
                    debug!(held = ?self.held, "discarding key combination");
                    None
                };

                self.held.retain(|k| k != &key);
                if captured.is_some() {
                    // Remaining keys belong to the finished combination.
                    self.held.clear();
                }
                captured
            }
        }
    }

    pub fn reset(&mut self) {
        self.held.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: &str) -> KeyEvent {
        KeyEvent::Pressed(code.to_string())
    }

    fn release(code: &str) -> KeyEvent {
        KeyEvent::Released(code.to_string())
    }

    #[test]
    fn test_captures_on_release() {
        let mut recorder = ShortcutRecorder::new();
        assert!(recorder.feed(press("ControlLeft")).is_none());
        assert!(recorder.feed(press("ShiftLeft")).is_none());
        assert!(recorder.feed(press("KeyA")).is_none());

        let captured = recorder.feed(release("KeyA")).unwrap();
        assert_eq!(captured.keys, vec!["Control", "Shift", "A"]);
        assert_eq!(captured.display, "Ctrl+⇧+A");
        assert_eq!(captured.registration, "Control+Shift+A");

        // Releasing the modifiers afterwards does not produce another capture
        assert!(recorder.feed(release("ShiftLeft")).is_none());
        assert!(recorder.feed(release("ControlLeft")).is_none());
        assert!(recorder.held().is_empty());
    }

    #[test]
    fn test_modifiers_sorted_first() {
        let mut recorder = ShortcutRecorder::new();
        recorder.feed(press("Space"));
        recorder.feed(press("MetaLeft"));
        let captured = recorder.feed(release("MetaLeft")).unwrap();
        assert_eq!(captured.registration, "Command+Space");
        assert_eq!(captured.display, "⌘+Space");
    }

    #[test]
    fn test_invalid_combinations_discarded() {
        let mut recorder = ShortcutRecorder::new();
        recorder.feed(press("KeyA"));
        recorder.feed(press("KeyB"));
        assert!(recorder.feed(release("KeyB")).is_none());
        assert_eq!(recorder.held(), &["A".to_string()]);
        assert!(recorder.feed(release("KeyA")).is_none());

        recorder.feed(press("ShiftLeft"));
        assert!(recorder.feed(release("ShiftLeft")).is_none());
        assert!(recorder.held().is_empty());
    }

    #[test]
    fn test_repeated_press_is_ignored() {
        let mut recorder = ShortcutRecorder::new();
        recorder.feed(press("AltLeft"));
        recorder.feed(press("AltLeft"));
        recorder.feed(press("Digit1"));
        assert_eq!(recorder.held().len(), 2);
    }

    #[test]
    fn test_key_event_wire_format() {
        let event: KeyEvent = serde_json::from_str(r#"{"type":"pressed","code":"KeyA"}"#).unwrap();
        assert_eq!(event, press("KeyA"));
    }
}
