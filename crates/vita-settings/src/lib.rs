//! Configuration for the vita runtime.
//!
//! [`load_settings`] starts from [`VitaSettings::default()`], folds in
//! `~/.vita/settings.json` when present, then lets `VITA_*` environment
//! variables win over both. The result is checked before it is returned.
//!
//! ```no_run
//! let settings = vita_settings::load_settings()?;
//! println!("model: {}", settings.provider.model);
//! # Ok::<(), vita_settings::SettingsError>(())
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
