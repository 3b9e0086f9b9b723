//! Key names: normalization and the two presentation forms.
//!
//! Raw key codes (`KeyA`, `Digit1`, `ControlLeft`) are first reduced to a
//! canonical key name (`A`, `1`, `Control`). Canonical names are then rendered
//! either for display (`Ctrl`, `⇧`, `↑`) or for registration with the global
//! hotkey subsystem (`Control`, `Shift`, `Command`).

/// Canonical names of modifier keys.
pub const MODIFIERS: [&str; 4] = ["Meta", "Shift", "Alt", "Control"];

/// Modifier spellings accepted in a registration string (compared uppercase).
const REGISTRATION_MODIFIERS: [&str; 13] = [
    "META",
    "COMMAND",
    "CMD",
    "SUPER",
    "SHIFT",
    "ALT",
    "OPTION",
    "CONTROL",
    "CTRL",
    "COMMANDORCONTROL",
    "COMMANDORCTRL",
    "CMDORCTRL",
    "CMDORCONTROL",
];

/// Canonical key name → display glyph.
const DISPLAY_TABLE: &[(&str, &str)] = &[
    (" ", "Space"),
    ("Minus", "-"),
    ("Equal", "="),
    ("Plus", "+"),
    ("Comma", ","),
    ("Period", "."),
    ("IntlBackslash", "§"),
    ("Slash", "/"),
    ("Backslash", "\\"),
    ("Enter", "↵"),
    ("ArrowUp", "↑"),
    ("ArrowDown", "↓"),
    ("ArrowLeft", "←"),
    ("ArrowRight", "→"),
    ("Escape", "Esc"),
    ("Command", "⌘"),
    ("Meta", "⌘"),
    ("Control", "Ctrl"),
    ("Alt", "⌥"),
    ("Shift", "⇧"),
];

/// Canonical key name → registration token.
const REGISTRATION_TABLE: &[(&str, &str)] = &[
    ("Meta", "Command"),
    ("IntlBackslash", "§"),
    (" ", "Space"),
];

/// Keys that exist in left and right variants.
const SIDED: [&str; 5] = ["Control", "Shift", "Alt", "Meta", "OS"];

fn lookup(table: &'static [(&'static str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Reduce a raw key code to its canonical key name.
pub fn normalize(code: &str) -> String {
    if let Some(rest) = code.strip_prefix("Key") {
        if rest.len() == 1 && rest.chars().all(|c| c.is_ascii_alphabetic()) {
            return rest.to_string();
        }
    }

    if let Some(rest) = code.strip_prefix("Digit") {
        if rest.len() == 1 && rest.chars().all(|c| c.is_ascii_digit()) {
            return rest.to_string();
        }
    }

    for suffix in ["Left", "Right"] {
        if let Some(rest) = code.strip_suffix(suffix) {
            if SIDED.contains(&rest) {
                return if rest == "OS" { "Meta" } else { rest }.to_string();
            }
        }
    }

    code.to_string()
}

pub fn is_modifier(key: &str) -> bool {
    MODIFIERS.contains(&key)
}

/// Whether the canonical keys form a shortcut: at least one modifier and at
/// least one non-modifier key.
pub fn is_shortcut<S: AsRef<str>>(keys: &[S]) -> bool {
    let has_modifier = keys.iter().any(|k| is_modifier(k.as_ref()));
    let has_key = keys.iter().any(|k| !is_modifier(k.as_ref()));
    has_modifier && has_key
}

pub fn display_key(key: &str) -> String {
    lookup(DISPLAY_TABLE, key).unwrap_or(key).to_string()
}

pub fn registration_key(key: &str) -> String {
    lookup(REGISTRATION_TABLE, key).unwrap_or(key).to_string()
}

pub fn to_display<S: AsRef<str>>(keys: &[S]) -> String {
    keys.iter()
        .map(|k| display_key(k.as_ref()))
        .collect::<Vec<_>>()
        .join("+")
}

pub fn to_registration<S: AsRef<str>>(keys: &[S]) -> String {
    keys.iter()
        .map(|k| registration_key(k.as_ref()))
        .collect::<Vec<_>>()
        .join("+")
}

fn is_registration_modifier(token: &str) -> bool {
    REGISTRATION_MODIFIERS.contains(&token.to_ascii_uppercase().as_str())
}

/// Whether a stored binding is acceptable: empty (unset), or a `+`-joined
/// registration string with at least one modifier and one other key.
pub fn is_valid_binding(binding: &str) -> bool {
    if binding.is_empty() {
        return true;
    }

    let tokens: Vec<&str> = binding.split('+').map(str::trim).collect();
    if tokens.iter().any(|t| t.is_empty()) {
        return false;
    }

    tokens.iter().any(|t| is_registration_modifier(t))
        && tokens.iter().any(|t| !is_registration_modifier(t))
}

/// Render a stored registration binding for display.
pub fn binding_to_display(binding: &str) -> String {
    binding
        .split('+')
        .map(|token| {
            let canonical = match token.to_ascii_uppercase().as_str() {
                "COMMAND" | "CMD" | "SUPER" | "META" => "Meta",
                "CONTROL" | "CTRL" => "Control",
                "OPTION" | "ALT" => "Alt",
                "SHIFT" => "Shift",
                "SPACE" => " ",
                _ => token,
            };
            display_key(canonical)
        })
        .collect::<Vec<_>>()
        .join("+")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_shortcut() {
        assert!(is_shortcut(&["Control", "KeyA"]));
        assert!(!is_shortcut(&["KeyA", "KeyB"]));
        assert!(!is_shortcut(&["Shift"]));
        assert!(!is_shortcut::<&str>(&[]));
        assert!(is_shortcut(&["Meta", "Shift", "Space"]));
    }

    #[test]
    fn test_letter_key_round_trip() {
        let key = normalize("KeyA");
        assert_eq!(key, "A");
        assert_eq!(display_key(&key), "A");
        assert_eq!(registration_key(&key), "A");
    }

    #[test]
    fn test_left_control_round_trip() {
        let key = normalize("ControlLeft");
        assert_eq!(key, "Control");
        assert_eq!(display_key(&key), "Ctrl");
        assert_eq!(registration_key(&key), "Control");
    }

    #[test]
    fn test_normalize_keeps_logical_identity() {
        assert_eq!(normalize("Digit7"), "7");
        assert_eq!(normalize("ShiftRight"), "Shift");
        assert_eq!(normalize("MetaLeft"), "Meta");
        assert_eq!(normalize("OSRight"), "Meta");
        // Arrow keys are not sided modifiers
        assert_eq!(normalize("ArrowLeft"), "ArrowLeft");
        assert_eq!(normalize("Keyboard"), "Keyboard");
        assert_eq!(normalize("Space"), "Space");
    }

    #[test]
    fn test_rendering_tables_are_independent() {
        assert_eq!(display_key("Meta"), "⌘");
        assert_eq!(registration_key("Meta"), "Command");
        assert_eq!(display_key("ArrowUp"), "↑");
        assert_eq!(registration_key("ArrowUp"), "ArrowUp");
        assert_eq!(display_key(" "), "Space");
        assert_eq!(registration_key(" "), "Space");
    }

    #[test]
    fn test_join_forms() {
        let keys = ["Control", "Shift", "Enter"];
        assert_eq!(to_display(&keys), "Ctrl+⇧+↵");
        assert_eq!(to_registration(&keys), "Control+Shift+Enter");
    }

    #[test]
    fn test_valid_binding() {
        assert!(is_valid_binding(""));
        assert!(is_valid_binding("CommandOrControl+Shift+Space"));
        assert!(is_valid_binding("Command+A"));
        assert!(!is_valid_binding("A+B"));
        assert!(!is_valid_binding("Shift"));
        assert!(!is_valid_binding("Shift++A"));
    }

    #[test]
    fn test_binding_to_display() {
        assert_eq!(binding_to_display("Command+Shift+Space"), "⌘+⇧+Space");
        assert_eq!(binding_to_display("Control+A"), "Ctrl+A");
    }
}
