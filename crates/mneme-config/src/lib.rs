//! Configuration system for the mneme memory store.
//!
//! Provides TOML-based configuration with:
//! - A `[memory]` section for the durable store, index artifact and lock bounds
//! - An `[embedding]` section describing the provider chain (remote, local, fallback)
//! - A `[logging]` section consumed by [`init_logging`]
//! - Config file layering (user config dir + project-local overrides)
//! - Environment overrides applied after all files (`MNEME_EMBED_URL`, ...)

pub mod discovery;
pub mod error;
pub mod logging;
pub mod types;

pub use discovery::{
    LoadedConfig, load_config, load_config_file, load_config_with_options, save_config,
    user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use logging::init_logging;
pub use types::*;
