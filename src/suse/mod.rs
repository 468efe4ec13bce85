//! Paravirt kernel synthesis for SUSE trees that predate `vmlinuz-xen`.
//!
//! openSUSE 10.2 and earlier ship no xen installer initrd. One is built
//! from two packages instead: the xen kernel package supplies the kernel
//! and its modules, and the `install-initrd` package supplies a generic
//! base initrd plus the list of modules the installer needs. The listed
//! modules are merged into the base image as an extra cpio segment.

pub mod index;
pub mod tools;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, IoContext, Result};
use crate::fetch::scratch::staging_dir;
use crate::fetch::FetchSession;

pub use index::{find_rpms, RpmNames};
pub use tools::{HostTools, MediaTools};

const STAGING_PREFIX: &str = "distro-fetch-cpio.";
const INSTALL_INITRD_DIR: &str = "usr/lib/install-initrd";
const PROGRESS_STEPS: u64 = 11;

/// Kernel and initrd written to the scratch dir. Both are still tracked by
/// the session they were created in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedKernel {
    pub kernel: PathBuf,
    pub initrd: PathBuf,
}

/// Boot argument pointing the SUSE installer at its tree.
pub fn install_arg(location: &str) -> String {
    format!("install={location}")
}

/// The kernel release carried by a package's `System.map-<release>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelRelease {
    base: String,
    build: String,
    flavor: String,
}

impl KernelRelease {
    /// Parse `2.6.18.2-34-xen` into its version, build and flavor.
    pub fn parse(release: &str) -> Option<Self> {
        let mut parts = release.splitn(3, '-');
        let base = parts.next().filter(|s| !s.is_empty())?;
        let build = parts.next().filter(|s| !s.is_empty())?;
        let flavor = parts.next().filter(|s| !s.is_empty())?;
        Some(Self {
            base: base.to_string(),
            build: build.to_string(),
            flavor: flavor.to_string(),
        })
    }

    /// Find the release from the `System.map-*` file in a kernel `boot` dir.
    pub fn from_boot_dir(boot: &Path) -> Result<Self> {
        let mut names: Vec<String> = fs::read_dir(boot)
            .io_context(|| format!("listing {}", boot.display()))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with("System.map-"))
            .collect();
        names.sort();

        let name = names.pop().ok_or_else(|| {
            Error::tool("kernel package", format!("no System.map in {}", boot.display()))
        })?;
        let release = &name["System.map-".len()..];
        Self::parse(release).ok_or_else(|| {
            Error::tool("kernel package", format!("unrecognised kernel release '{release}'"))
        })
    }

    pub fn version(&self) -> String {
        format!("{}-{}-{}", self.base, self.build, self.flavor)
    }

    /// Directory name the installer loads updated modules from.
    pub fn override_name(&self) -> String {
        format!("{}-override-{}", self.base, self.flavor)
    }

    pub fn flavor(&self) -> &str {
        &self.flavor
    }
}

/// Build a paravirt kernel and initrd from the packages in a SUSE tree.
///
/// Every download and staging directory is removed before this returns,
/// whatever the outcome. On success the two results are tracked by
/// `session`, which the caller releases.
pub fn synthesize(
    session: &mut FetchSession<'_>,
    tools: &dyn MediaTools,
    arch: &str,
) -> Result<SynthesizedKernel> {
    info!(location = session.location(), arch, "building paravirt initrd from packages");

    let listing = session.acquire(index::LISTING_PATH)?;
    let names = index::read_listing(&listing, arch);
    session.discard(&listing);
    let names = names?;

    let kernel_rpm = session.acquire(&names.kernel)?;
    let initrd_rpm = match session.acquire(&names.install_initrd) {
        Ok(path) => path,
        Err(e) => {
            session.discard(&kernel_rpm);
            return Err(e);
        }
    };

    let built = build(session, tools, &kernel_rpm, &initrd_rpm);
    session.discard(&kernel_rpm);
    session.discard(&initrd_rpm);
    built
}

fn build(
    session: &mut FetchSession<'_>,
    tools: &dyn MediaTools,
    kernel_rpm: &Path,
    initrd_rpm: &Path,
) -> Result<SynthesizedKernel> {
    session.progress().start(Some(PROGRESS_STEPS), "Building initrd");
    session.progress().update(1);

    let staging = staging_dir(session.scratch_dir(), STAGING_PREFIX)?;
    let cpiodir = staging.path();

    let kernel_dir = cpiodir.join("kernel");
    create_dir(&kernel_dir)?;
    tools.unpack_rpm(kernel_rpm, &kernel_dir, cpiodir)?;
    session.progress().update(2);

    let release = KernelRelease::from_boot_dir(&kernel_dir.join("boot"))?;
    let version = release.version();
    debug!(%version, "found kernel release");
    let modules = index_modules(&kernel_dir.join("lib/modules"));
    session.progress().update(3);

    let package_dir = cpiodir.join("installinitrd");
    create_dir(&package_dir)?;
    tools.unpack_rpm(initrd_rpm, &package_dir, cpiodir)?;
    session.progress().update(4);

    let flavor_dir = package_dir.join(INSTALL_INITRD_DIR).join(release.flavor());
    let wanted = read_module_list(&flavor_dir.join("module.list"))?;
    session.progress().update(5);

    let image = cpiodir.join("initrd.img");
    gunzip(&package_dir.join(INSTALL_INITRD_DIR).join("initrd-base.gz"), &image)?;
    session.progress().update(6);

    let root = cpiodir.join("initrd");
    let module_dir = stage_module_tree(&root, &release)?;
    copy_file(&flavor_dir.join("module.config"), &module_dir.join("module.config"))?;
    session.progress().update(7);

    for name in &wanted {
        match modules.get(name) {
            Some(src) => copy_file(src, &module_dir.join(name))?,
            None => debug!(module = %name, "listed module not in kernel package"),
        }
    }
    session.progress().update(8);

    let system_map = kernel_dir.join("boot").join(format!("System.map-{version}"));
    tools.generate_module_index(&root, &system_map, &version)?;
    session.progress().update(9);

    tools.append_cpio(&image, &root)?;
    session.progress().update(10);

    let compressed = cpiodir.join("initrd.img.gz");
    gzip(&image, &compressed)?;
    session.progress().end(PROGRESS_STEPS);

    let mut initrd_file =
        File::open(&compressed).io_context(|| format!("opening {}", compressed.display()))?;
    let initrd = session.save_temp(&mut initrd_file, "initrd.img")?;
    debug!(path = %initrd.display(), "saved initrd");

    let vmlinuz = kernel_dir.join("boot").join(format!("vmlinuz-{version}"));
    let mut kernel_file =
        File::open(&vmlinuz).io_context(|| format!("opening {}", vmlinuz.display()))?;
    let kernel = session.save_temp(&mut kernel_file, "vmlinuz")?;
    debug!(path = %kernel.display(), "saved kernel");

    if let Err(e) = staging.close() {
        warn!(error = %e, "failed to remove initrd staging directory");
    }
    Ok(SynthesizedKernel { kernel, initrd })
}

/// Every `.ko` under `dir`, keyed by file name.
fn index_modules(dir: &Path) -> BTreeMap<String, PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            name.ends_with(".ko").then(|| (name, entry.into_path()))
        })
        .collect()
}

fn read_module_list(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).io_context(|| format!("opening {}", path.display()))?;
    let mut names = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.io_context(|| format!("reading {}", path.display()))?;
        let name = line.trim();
        if !name.is_empty() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

/// Lay out the module tree appended to the base initrd. Returns the
/// directory the modules go in.
fn stage_module_tree(root: &Path, release: &KernelRelease) -> Result<PathBuf> {
    let override_name = release.override_name();
    let modules_root = root.join("lib/modules");
    let module_dir = modules_root.join(&override_name).join("initrd");
    let version_dir = modules_root.join(release.version());
    for dir in [&module_dir, &version_dir] {
        fs::create_dir_all(dir).io_context(|| format!("creating {}", dir.display()))?;
    }

    let updates = version_dir.join("updates");
    symlink(format!("../{override_name}"), &updates)
        .io_context(|| format!("linking {}", updates.display()))?;
    let modules_link = root.join("modules");
    symlink(format!("lib/modules/{override_name}/initrd"), &modules_link)
        .io_context(|| format!("linking {}", modules_link.display()))?;
    Ok(module_dir)
}

fn create_dir(dir: &Path) -> Result<()> {
    fs::create_dir(dir).io_context(|| format!("creating {}", dir.display()))
}

fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst)
        .map(|_| ())
        .io_context(|| format!("copying {} to {}", src.display(), dst.display()))
}

fn gunzip(src: &Path, dst: &Path) -> Result<()> {
    let input = File::open(src).io_context(|| format!("opening {}", src.display()))?;
    let mut output = File::create(dst).io_context(|| format!("creating {}", dst.display()))?;
    io::copy(&mut GzDecoder::new(input), &mut output)
        .io_context(|| format!("decompressing {}", src.display()))?;
    Ok(())
}

fn gzip(src: &Path, dst: &Path) -> Result<()> {
    let mut input = File::open(src).io_context(|| format!("opening {}", src.display()))?;
    let output = File::create(dst).io_context(|| format!("creating {}", dst.display()))?;
    let mut encoder = GzEncoder::new(output, Compression::best());
    io::copy(&mut input, &mut encoder).io_context(|| format!("compressing {}", src.display()))?;
    encoder
        .finish()
        .io_context(|| format!("finishing {}", dst.display()))?;
    Ok(())
}
