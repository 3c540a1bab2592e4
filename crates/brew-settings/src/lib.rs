//! # brew-settings
//!
//! Configuration for the kettle server, loaded from three layers,
//! lowest priority first:
//! 1. **Compiled defaults**: [`BrewSettings::default()`]
//! 2. **User file**: `~/.brew/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `BREW_*` overrides (highest priority)
//!
//! The binary applies CLI flags on top of the loaded value and then calls
//! [`BrewSettings::validate`].

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
