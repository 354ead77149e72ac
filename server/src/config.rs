use std::{fs, path::Path};

use anyhow::{Context, Result};
use kadht_logic::config::SystemConfig;

/// Loads a `SystemConfig` from a TOML file, falling back to `Default` for
/// any section the file omits.
pub fn load_config(path: &Path) -> Result<SystemConfig> {
    let content = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config: SystemConfig = toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}
