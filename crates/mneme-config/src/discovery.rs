//! Locating config files and merging them into one `MnemeConfig`.
//!
//! Layers, lowest precedence first:
//! 1. `~/.config/mneme/config.toml` (user config)
//! 2. `./mneme.toml` (project-local)
//! 3. `MNEME_*` environment variables

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{ConfigError, MnemeConfig, Result};

/// Project-local config file, looked up in the project directory.
const PROJECT_CONFIG_FILE: &str = "mneme.toml";

/// User config file inside the user config directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Application name for platform directory resolution.
const APP_NAME: &str = "mneme";

/// Overrides the platform config directory when set and non-empty.
const CONFIG_DIR_ENV: &str = "MNEME_CONFIG_DIR";

/// One candidate config file and whether it contributed.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// Candidate file.
    pub path: PathBuf,
    /// True if the file existed and parsed.
    pub loaded: bool,
}

/// The merged config plus what went into it.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Effective configuration.
    pub config: MnemeConfig,
    /// Every candidate checked, lowest precedence first.
    pub sources: Vec<ConfigSource>,
    /// Non-fatal problems: unparsable layers, plaintext keys.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Files that actually contributed.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Discover, merge and env-override every layer.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Like [`load_config`], with an explicit user config directory.
///
/// `config_dir` overrides both `MNEME_CONFIG_DIR` and the platform default.
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let mut config = MnemeConfig::new();
    let mut sources = Vec::new();
    let mut warnings = Vec::new();

    let user_config = match config_dir {
        Some(dir) => Some(dir.join(USER_CONFIG_FILE)),
        None => user_config_path(),
    };
    if let Some(path) = user_config {
        sources.push(load_layer(&mut config, &path, &mut warnings)?);
    }

    let project_path = project_dir
        .map(|d| d.join(PROJECT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    sources.push(load_layer(&mut config, &project_path, &mut warnings)?);

    check_plaintext_keys(&config, &mut warnings);

    config.apply_env_overrides();

    Ok(LoadedConfig {
        config,
        sources,
        warnings,
    })
}

/// Parse a single file. No layering, no env overrides.
pub fn load_config_file(path: &Path) -> Result<MnemeConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    MnemeConfig::from_toml(&contents)
}

/// Write `config` as TOML, creating parent directories.
pub fn save_config(config: &MnemeConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFile {
            path: parent.display().to_string(),
            source: e,
        })?;
    }

    let contents = config.to_toml()?;
    std::fs::write(path, contents).map_err(|e| ConfigError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(())
}

/// Get the user config file path for mneme.
pub fn user_config_path() -> Option<PathBuf> {
    user_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// Get the user config directory for mneme.
///
/// Checks `MNEME_CONFIG_DIR` first, then falls back to the platform default.
pub fn user_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Merge `path` into `config` if it exists. Parse errors become warnings.
fn load_layer(
    config: &mut MnemeConfig,
    path: &Path,
    warnings: &mut Vec<String>,
) -> Result<ConfigSource> {
    if !path.is_file() {
        return Ok(ConfigSource {
            path: path.to_path_buf(),
            loaded: false,
        });
    }

    match load_config_file(path) {
        Ok(layer) => {
            debug!(path = %path.display(), "Loaded config layer");
            config.merge(layer);
            Ok(ConfigSource {
                path: path.to_path_buf(),
                loaded: true,
            })
        }
        Err(e) => {
            warnings.push(format!("Failed to load {}: {}", path.display(), e));
            Ok(ConfigSource {
                path: path.to_path_buf(),
                loaded: false,
            })
        }
    }
}

/// Check for plaintext tokens in the config and emit warnings.
fn check_plaintext_keys(config: &MnemeConfig, warnings: &mut Vec<String>) {
    if let Some(ref embedding) = config.embedding
        && embedding.has_plaintext_api_key()
    {
        warnings.push(
            "[embedding.remote] contains a plaintext api_key. \
             Consider setting MNEME_EMBED_API_KEY instead."
                .to_string(),
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
