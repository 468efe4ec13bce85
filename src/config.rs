//! Resolver configuration, read from TOML.
//!
//! ```toml
//! [resolver]
//! scratch_dir = "/var/lib/distro-fetch/boot"
//!
//! [resolver.tools]
//! depmod = "/sbin/depmod"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_SCRATCH_DIR: &str = "/var/tmp";

/// External programs the synthesizer runs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ToolPaths {
    pub rpm2cpio: String,
    pub cpio: String,
    pub depmod: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            rpm2cpio: "rpm2cpio".to_string(),
            cpio: "cpio".to_string(),
            depmod: "depmod".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Where fetched and synthesized media are written.
    pub scratch_dir: PathBuf,
    pub tools: ToolPaths,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            scratch_dir: PathBuf::from(DEFAULT_SCRATCH_DIR),
            tools: ToolPaths::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigToml {
    resolver: Option<ResolverToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResolverToml {
    scratch_dir: Option<PathBuf>,
    tools: Option<ToolPaths>,
}

pub fn load_config(path: &Path) -> Result<ResolverConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading resolver config '{}'", path.display()))?;
    parse_config(&text).with_context(|| format!("parsing resolver config '{}'", path.display()))
}

pub fn parse_config(text: &str) -> Result<ResolverConfig> {
    let parsed: ConfigToml = toml::from_str(text)?;
    let Some(resolver) = parsed.resolver else {
        return Ok(ResolverConfig::default());
    };

    let scratch_dir = resolver
        .scratch_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SCRATCH_DIR));
    if scratch_dir.as_os_str().is_empty() {
        anyhow::bail!("resolver.scratch_dir must not be empty");
    }

    Ok(ResolverConfig {
        scratch_dir,
        tools: resolver.tools.unwrap_or_default(),
    })
}
