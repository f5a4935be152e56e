//! TOML configuration loading.
//!
//! Every key is optional; missing keys keep the firmware defaults of
//! [`CaptureConfig`]. Markers may be given as byte arrays or as fills:
//!
//! ```toml
//! frame_length = 1024
//! header = { fill = 0xbf, len = 12 }
//! footer = [239, 239, 239, 239, 239, 239, 239, 239, 239, 239, 239, 239, 239, 239, 239, 239]
//! spacers = [{ offset = 20, len = 16, fill = 0 }, { offset = 804, len = 16, fill = 0 }]
//!
//! [chunk]
//! blocks_per_chunk = 10
//! overlap_blocks = 2
//! ```

use anyhow::{Context, Result};
use fleye_core::CaptureConfig;
use std::path::Path;
use tracing::debug;

/// File looked up in the working directory when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "fleye.toml";

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<CaptureConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Load config from the given path, the default location, or built-in defaults
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<CaptureConfig> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_path = Path::new(DEFAULT_CONFIG_FILE);
    if default_path.exists() {
        debug!("Using config file {}", default_path.display());
        return load_config(default_path);
    }

    Ok(CaptureConfig::default())
}

fn parse_config(content: &str) -> Result<CaptureConfig> {
    Ok(toml::from_str(content)?)
}
