//! # gatelink-settings
//!
//! Layered configuration for the gatelink gateway client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`GatelinkSettings::default()`]
//! 2. **User file** — `~/.gatelink/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `GATELINK_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, is_websocket_url, load_settings, load_settings_from_path, settings_path};
pub use types::*;
