//! Preflight checks for media synthesis.
//!
//! Validates that the host has the external tools the legacy SUSE pipeline
//! shells out to, before any package is downloaded.
//!
//! # Example
//!
//! ```rust
//! use distro_fetch::config::ToolPaths;
//! use distro_fetch::preflight::{check_synthesis_tools, command_exists};
//!
//! if !command_exists("depmod") {
//!     println!("kmod not installed");
//! }
//!
//! if let Err(e) = check_synthesis_tools(&ToolPaths::default()) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Result};

use crate::config::ToolPaths;

/// Check if a command exists on the host system.
///
/// Absolute and relative paths are checked as-is, bare names through PATH.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Check that specific tools are available.
///
/// Each tuple is (command, package providing it). On failure the error
/// lists every missing tool with its package.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<_> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Check the tools used to rebuild a SUSE paravirt initrd.
pub fn check_synthesis_tools(paths: &ToolPaths) -> Result<()> {
    check_required_tools(&[
        (paths.rpm2cpio.as_str(), "rpm"),
        (paths.cpio.as_str(), "cpio"),
        (paths.depmod.as_str(), "kmod"),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_exists() {
        assert!(command_exists("sh"));
        assert!(!command_exists("definitely_not_a_real_command_12345"));
    }

    #[test]
    fn test_check_required_tools_success() {
        let tools = &[("sh", "coreutils"), ("cat", "coreutils")];
        assert!(check_required_tools(tools).is_ok());
    }

    #[test]
    fn test_check_synthesis_tools_names_missing_packages() {
        let paths = ToolPaths {
            rpm2cpio: "nonexistent_rpm2cpio_xyz".to_string(),
            cpio: "cat".to_string(),
            depmod: "nonexistent_depmod_xyz".to_string(),
        };
        let err = check_synthesis_tools(&paths).unwrap_err().to_string();
        assert!(err.contains("nonexistent_rpm2cpio_xyz (install: rpm)"));
        assert!(err.contains("nonexistent_depmod_xyz (install: kmod)"));
        assert!(!err.contains("cpio)"));
    }
}
