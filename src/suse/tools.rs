//! External tools the synthesizer depends on.
//!
//! The pipeline only talks to [`MediaTools`], so hosts can swap the
//! shell-outs in [`HostTools`] for library implementations.

use std::path::Path;

use tempfile::Builder;
use walkdir::WalkDir;

use crate::config::ToolPaths;
use crate::error::{Error, IoContext, Result};
use crate::preflight;
use crate::process::Cmd;

pub trait MediaTools {
    /// Verify the tools are usable before any package is downloaded.
    fn preflight(&self) -> Result<()> {
        Ok(())
    }

    /// Extract the payload of `rpm` into `dest`. Intermediate files go in
    /// `work_dir`, which is outside `dest`.
    fn unpack_rpm(&self, rpm: &Path, dest: &Path, work_dir: &Path) -> Result<()>;

    /// Generate module dependency files for `version` under `root`.
    fn generate_module_index(&self, root: &Path, system_map: &Path, version: &str) -> Result<()>;

    /// Append every entry under `root` to the newc cpio `archive`.
    fn append_cpio(&self, archive: &Path, root: &Path) -> Result<()>;
}

/// [`MediaTools`] backed by `rpm2cpio`, `cpio` and `depmod`.
#[derive(Debug, Clone, Default)]
pub struct HostTools {
    paths: ToolPaths,
}

impl HostTools {
    pub fn new(paths: ToolPaths) -> Self {
        Self { paths }
    }
}

impl MediaTools for HostTools {
    fn preflight(&self) -> Result<()> {
        preflight::check_synthesis_tools(&self.paths)
            .map_err(|e| Error::tool("preflight", format!("{e:#}")))
    }

    fn unpack_rpm(&self, rpm: &Path, dest: &Path, work_dir: &Path) -> Result<()> {
        let payload = Builder::new()
            .prefix("payload.")
            .suffix(".cpio")
            .tempfile_in(work_dir)
            .io_context(|| format!("creating payload file in {}", work_dir.display()))?;

        Cmd::new(&self.paths.rpm2cpio)
            .arg_path(rpm)
            .stdout_file(payload.path())
            .error_msg("Is the rpm package installed?")
            .run()?;

        Cmd::new(&self.paths.cpio)
            .args(["--quiet", "-idm"])
            .stdin_file(payload.path())
            .current_dir(dest)
            .run()?;
        Ok(())
    }

    fn generate_module_index(&self, root: &Path, system_map: &Path, version: &str) -> Result<()> {
        Cmd::new(&self.paths.depmod)
            .args(["-a", "-b"])
            .arg_path(root)
            .arg("-F")
            .arg_path(system_map)
            .arg(version)
            .error_msg("Is kmod installed?")
            .run()?;
        Ok(())
    }

    fn append_cpio(&self, archive: &Path, root: &Path) -> Result<()> {
        // cpio runs inside `root`, so the archive path must not be relative.
        let archive = std::path::absolute(archive)
            .io_context(|| format!("resolving {}", archive.display()))?;
        let list = cpio_file_list(root)?;
        Cmd::new(&self.paths.cpio)
            .args(["--quiet", "-o", "-H", "newc", "-A", "-F"])
            .arg_path(&archive)
            .stdin_bytes(list.into_bytes())
            .current_dir(root)
            .run()?;
        Ok(())
    }
}

/// `find .` equivalent: `.` then every entry as `./<relative>`, sorted.
pub(crate) fn cpio_file_list(root: &Path) -> Result<String> {
    let mut list = String::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io {
            context: format!("walking {}", root.display()),
            source: e.into(),
        })?;
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if rel.as_os_str().is_empty() {
            list.push_str(".\n");
        } else {
            list.push_str(&format!("./{}\n", rel.display()));
        }
    }
    Ok(list)
}
