//! # lumen-settings
//!
//! Layered configuration for the lumen client:
//! 1. **Compiled defaults** ([`LumenSettings::default()`])
//! 2. **User file** `~/.lumen/settings.json`, deep-merged over defaults
//! 3. **Environment variables** `LUMEN_*` (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
