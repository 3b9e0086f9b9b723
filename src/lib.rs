//! Flick - quick actions behind a global shortcut.
//!
//! Flick installs small native extensions from a remote registry and runs
//! them on demand: from the CLI, over the local command bridge, or when the
//! global shortcut is pressed.
//!
//! # Architecture
//!
//! - [`error`] - Closed error taxonomy shared by every component
//! - [`extensions`] - Manifests, on-disk store, registry client, installer,
//!   loader, lifecycle manager and update orchestration
//! - [`config`] - User config (`config.json`) and host settings (`flick.toml`)
//! - [`shortcut`] - Key normalization, shortcut capture, global hotkey
//! - [`platform`] - Autostart and host self-update collaborators
//! - [`commands`] - The command surface ([`commands::App`])
//! - [`bridge`] - Line-delimited JSON over a local socket
//! - [`cli`] - Command-line front end
//! - [`sdk`] - The native ABI extensions export
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use flick::{commands::App, config::Settings, platform, shortcut::DetachedBinder};
//!
//! let settings = Settings::load()?;
//! let app = App::from_settings(&settings, Arc::new(DetachedBinder), platform::system_autostart())?;
//! for ext in app.get_installed_extensions().await? {
//!     println!("{} {}", ext.id(), ext.manifest.version);
//! }
//! ```

pub mod bridge;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod extensions;
pub mod platform;
pub mod sdk;
pub mod shortcut;

// Re-export commonly used types for convenience
pub use commands::{App, Request, Response};
pub use config::{Config, Settings};
pub use error::{ErrorKind, FlickError, FlickResult};
pub use extensions::{ExtensionManager, ExtensionManifest, InstalledExtension};
