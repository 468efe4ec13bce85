//! Distribution families and their media layouts.
//!
//! Each family is a variant of the closed [`Family`] enum. A family knows
//! how to recognise its own install tree ([`Family::probe`]) and builds a
//! [`DistroDescriptor`]: the immutable path policy the media locator walks.

pub mod classify;
pub mod locate;
pub mod sun;

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::arch::{folds_to_i386, OsType, VirtType};
use crate::error::{IoContext, Result};
use crate::fetch::FetchSession;
use crate::treeinfo::TreeMetadata;

pub use classify::classify;
pub use locate::{locate_boot_iso, locate_kernel};

/// Every distribution family this crate can recognise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Fedora,
    Rhel,
    CentOs,
    ScientificLinux,
    Suse,
    Debian,
    Ubuntu,
    Mandriva,
    Solaris,
    OpenSolaris,
    Generic,
}

impl Family {
    /// Heuristic probe order. The first family to accept a tree wins.
    pub const PROBE_ORDER: [Family; 11] = [
        Family::Fedora,
        Family::Rhel,
        Family::CentOs,
        Family::ScientificLinux,
        Family::Suse,
        Family::Debian,
        Family::Ubuntu,
        Family::Mandriva,
        Family::Solaris,
        Family::OpenSolaris,
        Family::Generic,
    ];

    /// Families recognised from the tree metadata `family` field, in match
    /// order, with the substring that selects them.
    const METADATA_PATTERNS: [(&'static str, Family); 4] = [
        ("Fedora", Family::Fedora),
        ("CentOS", Family::CentOs),
        ("Red Hat Enterprise Linux", Family::Rhel),
        ("Scientific Linux", Family::ScientificLinux),
    ];

    pub fn name(self) -> &'static str {
        match self {
            Family::Fedora => "Fedora",
            Family::Rhel => "Red Hat Enterprise Linux",
            Family::CentOs => "CentOS",
            Family::ScientificLinux => "Scientific Linux",
            Family::Suse => "SUSE",
            Family::Debian => "Debian",
            Family::Ubuntu => "Ubuntu",
            Family::Mandriva => "Mandriva",
            Family::Solaris => "Solaris",
            Family::OpenSolaris => "OpenSolaris",
            Family::Generic => "Generic",
        }
    }

    /// Short key a caller's distro hint is matched against.
    pub fn hint_key(self) -> Option<&'static str> {
        match self {
            Family::Fedora => Some("fedora"),
            Family::Rhel => Some("rhel"),
            Family::CentOs => Some("centos"),
            Family::ScientificLinux => Some("sl"),
            Family::Suse => Some("suse"),
            Family::Debian => Some("debian"),
            Family::Ubuntu => Some("ubuntu"),
            Family::Mandriva => Some("mandriva"),
            Family::Solaris | Family::OpenSolaris => Some("solaris"),
            Family::Generic => None,
        }
    }

    /// Whether a caller's hint (`"fedora"`, `"fedora9"`, `"RHEL5"`) names
    /// this family. Generic never matches a hint.
    pub fn matches_hint(self, hint: &str) -> bool {
        let Some(key) = self.hint_key() else {
            return false;
        };
        let hint = hint.trim().to_ascii_lowercase();
        let hint = match self {
            Family::OpenSolaris => hint.strip_prefix("open").unwrap_or(&hint),
            _ => hint.as_str(),
        };
        match hint.strip_prefix(key) {
            Some(rest) => rest.is_empty() || !rest.starts_with(|c: char| c.is_ascii_alphabetic()),
            None => false,
        }
    }

    pub fn os_type(self) -> OsType {
        match self {
            Family::Solaris | Family::OpenSolaris => OsType::Solaris,
            _ => OsType::Linux,
        }
    }

    /// Families that only ship fully virtualized install media.
    pub fn fully_virt_only(self) -> bool {
        matches!(self, Family::Ubuntu | Family::Mandriva)
    }

    pub fn from_metadata_family(family: &str) -> Option<Family> {
        Self::METADATA_PATTERNS
            .iter()
            .find(|(pattern, _)| family.contains(pattern))
            .map(|(_, f)| *f)
    }

    /// Check whether the tree behind `session` belongs to this family.
    ///
    /// Returns the family's descriptor for the tree when it does. `metadata`
    /// is only consulted by [`Family::Generic`].
    pub fn probe(
        self,
        session: &mut FetchSession<'_>,
        ctx: &TreeContext,
        metadata: Option<&TreeMetadata>,
    ) -> Result<Option<DistroDescriptor>> {
        if self.fully_virt_only() && VirtType::is_paravirt(ctx.virt_type) {
            debug!(family = self.name(), "family has no paravirt install media");
            return Ok(None);
        }

        let accepted = match self {
            Family::Fedora => has_marker(session, self, &["Fedora"]),
            Family::Rhel => has_marker(session, self, &["Server", "Client", "RedHat"]),
            Family::CentOs => has_marker(session, self, &["CentOS"]),
            Family::ScientificLinux => has_marker(session, self, &["SL"]),
            Family::Suse => has_marker(session, self, &["directory.yast"]),
            Family::Debian => return probe_debian(session, ctx),
            Family::Ubuntu => {
                let manifest = format!("{DEBIAN_PREFIX}/MANIFEST");
                session.has_file(&manifest)
                    && fetch_and_match(session, &manifest, installer_regex(self))?
            }
            Family::Mandriva => {
                session.has_file("VERSION")
                    && fetch_and_match(session, "VERSION", installer_regex(self))?
            }
            Family::Solaris | Family::OpenSolaris => {
                let layout = sun::layout(self);
                has_marker(session, self, &[layout.kernel])
            }
            Family::Generic => {
                let descriptor =
                    DistroDescriptor::new(self, ctx).with_optional_metadata(metadata.cloned());
                let found = locate::locate_kernel(session.fetcher(), &descriptor).is_ok()
                    || locate::locate_boot_iso(session.fetcher(), &descriptor).is_ok();
                return Ok(found.then_some(descriptor));
            }
        };

        if accepted {
            debug!(family = self.name(), "Detected a {} distro", self.name());
            Ok(Some(DistroDescriptor::new(self, ctx)))
        } else {
            Ok(None)
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the caller told us about the tree and the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeContext {
    /// Location string the tree was opened from.
    pub location: String,
    pub virt_type: Option<VirtType>,
    /// Normalized guest architecture.
    pub arch: String,
}

impl TreeContext {
    pub fn new(location: &str, virt_type: Option<VirtType>, arch: &str) -> Self {
        Self {
            location: location.to_string(),
            virt_type,
            arch: arch.to_string(),
        }
    }
}

/// A kernel and initrd, relative to the tree root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelPaths {
    pub kernel: String,
    pub initrd: String,
}

impl KernelPaths {
    pub fn new(kernel: impl Into<String>, initrd: impl Into<String>) -> Self {
        Self {
            kernel: kernel.into(),
            initrd: initrd.into(),
        }
    }
}

/// The selected family's path policy for one tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistroDescriptor {
    family: Family,
    virt_type: Option<VirtType>,
    arch: String,
    hvm_kernel_paths: Vec<KernelPaths>,
    xen_kernel_paths: Vec<KernelPaths>,
    boot_iso_paths: Vec<String>,
    metadata: Option<TreeMetadata>,
}

impl DistroDescriptor {
    pub fn new(family: Family, ctx: &TreeContext) -> Self {
        Self::with_prefix(family, ctx, DEBIAN_PREFIX)
    }

    fn with_prefix(family: Family, ctx: &TreeContext, debian_prefix: &str) -> Self {
        let layout = Layout::for_family(family, ctx, debian_prefix);
        Self {
            family,
            virt_type: ctx.virt_type,
            arch: ctx.arch.clone(),
            hvm_kernel_paths: layout.hvm,
            xen_kernel_paths: layout.xen,
            boot_iso_paths: layout.iso,
            metadata: None,
        }
    }

    pub fn with_metadata(self, metadata: TreeMetadata) -> Self {
        self.with_optional_metadata(Some(metadata))
    }

    fn with_optional_metadata(mut self, metadata: Option<TreeMetadata>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn name(&self) -> &'static str {
        self.family.name()
    }

    pub fn os_type(&self) -> OsType {
        self.family.os_type()
    }

    pub fn virt_type(&self) -> Option<VirtType> {
        self.virt_type
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn metadata(&self) -> Option<&TreeMetadata> {
        self.metadata.as_ref()
    }

    /// Candidate kernel/initrd pairs for this descriptor's virt type, in
    /// preference order.
    pub fn kernel_candidates(&self) -> &[KernelPaths] {
        if VirtType::is_paravirt(self.virt_type) {
            &self.xen_kernel_paths
        } else {
            &self.hvm_kernel_paths
        }
    }

    pub fn boot_iso_candidates(&self) -> &[String] {
        &self.boot_iso_paths
    }

    /// Paravirt kernels for this family come from package synthesis when the
    /// tree ships none.
    pub fn uses_legacy_synthesis(&self) -> bool {
        self.family == Family::Suse && VirtType::is_paravirt(self.virt_type)
    }
}

const DEBIAN_PREFIX: &str = "current/images";
const DEBIAN_DAILY_PREFIX: &str = "images/daily";

const RED_HAT_ISO: &str = "images/boot.iso";
const RED_HAT_HVM: (&str, &str) = ("images/pxeboot/vmlinuz", "images/pxeboot/initrd.img");
const RED_HAT_XEN: (&str, &str) = ("images/xen/vmlinuz", "images/xen/initrd.img");

struct Layout {
    hvm: Vec<KernelPaths>,
    xen: Vec<KernelPaths>,
    iso: Vec<String>,
}

impl Layout {
    fn for_family(family: Family, ctx: &TreeContext, debian_prefix: &str) -> Self {
        let pair = |(k, i): (&str, &str)| KernelPaths::new(k, i);
        match family {
            Family::Fedora | Family::Rhel | Family::CentOs => Layout {
                hvm: vec![pair(RED_HAT_HVM)],
                xen: vec![pair(RED_HAT_XEN)],
                iso: vec![RED_HAT_ISO.to_string()],
            },
            Family::ScientificLinux => Layout {
                hvm: vec![
                    pair(RED_HAT_HVM),
                    pair(("images/SL/pxeboot/vmlinuz", "images/SL/pxeboot/initrd.img")),
                ],
                xen: vec![pair(RED_HAT_XEN)],
                iso: vec![RED_HAT_ISO.to_string(), "images/SL/boot.iso".to_string()],
            },
            Family::Suse => {
                let arch = suse_tree_arch(&ctx.arch);
                Layout {
                    hvm: vec![KernelPaths::new(
                        format!("boot/{arch}/loader/linux"),
                        format!("boot/{arch}/loader/initrd"),
                    )],
                    xen: vec![KernelPaths::new(
                        format!("boot/{arch}/vmlinuz-xen"),
                        format!("boot/{arch}/initrd-xen"),
                    )],
                    iso: vec!["boot/boot.iso".to_string()],
                }
            }
            Family::Debian | Family::Ubuntu => {
                let tree_arch = debian_tree_arch(&ctx.location);
                let installer = if family == Family::Ubuntu {
                    "ubuntu-installer"
                } else {
                    "debian-installer"
                };
                let hvm_root = format!("{debian_prefix}/netboot/{installer}/{tree_arch}");
                let xen = if family == Family::Ubuntu {
                    Vec::new()
                } else {
                    vec![KernelPaths::new(
                        format!("{debian_prefix}/netboot/xen/vmlinuz"),
                        format!("{debian_prefix}/netboot/xen/initrd.gz"),
                    )]
                };
                Layout {
                    hvm: vec![KernelPaths::new(
                        format!("{hvm_root}/linux"),
                        format!("{hvm_root}/initrd.gz"),
                    )],
                    xen,
                    iso: vec![format!("{debian_prefix}/netboot/mini.iso")],
                }
            }
            Family::Mandriva => Layout {
                hvm: vec![pair(("isolinux/alt0/vmlinuz", "isolinux/alt0/all.rdz"))],
                xen: Vec::new(),
                iso: vec!["install/images/boot.iso".to_string()],
            },
            Family::Solaris | Family::OpenSolaris => {
                let layout = sun::layout(family);
                let kernel = vec![pair((layout.kernel, layout.initrd))];
                Layout {
                    hvm: kernel.clone(),
                    xen: kernel,
                    iso: vec![sun::BOOT_ISO.to_string()],
                }
            }
            Family::Generic => Layout {
                hvm: vec![pair(RED_HAT_HVM)],
                xen: vec![pair(RED_HAT_XEN)],
                iso: vec![
                    RED_HAT_ISO.to_string(),
                    "boot/boot.iso".to_string(),
                    format!("{DEBIAN_PREFIX}/netboot/mini.iso"),
                    "install/images/boot.iso".to_string(),
                ],
            },
        }
    }
}

/// SUSE publishes every 32-bit x86 flavour under `i386`.
pub fn suse_tree_arch(arch: &str) -> String {
    if folds_to_i386(arch) {
        "i386".to_string()
    } else {
        arch.to_string()
    }
}

/// Debian trees carry their arch in the installer directory name.
pub fn debian_tree_arch(location: &str) -> &'static str {
    if location.contains("installer-amd64") {
        "amd64"
    } else {
        "i386"
    }
}

fn installer_regex(family: Family) -> &'static Regex {
    static DEBIAN_RE: OnceLock<Regex> = OnceLock::new();
    static UBUNTU_RE: OnceLock<Regex> = OnceLock::new();
    static MANDRIVA_RE: OnceLock<Regex> = OnceLock::new();
    match family {
        Family::Ubuntu => UBUNTU_RE.get_or_init(|| {
            Regex::new(r"ubuntu-installer").expect("invalid Ubuntu manifest regex")
        }),
        Family::Mandriva => MANDRIVA_RE
            .get_or_init(|| Regex::new(r"Mandriva").expect("invalid Mandriva VERSION regex")),
        _ => DEBIAN_RE.get_or_init(|| {
            Regex::new(r"debian-installer").expect("invalid Debian manifest regex")
        }),
    }
}

fn has_marker(session: &FetchSession<'_>, family: Family, markers: &[&str]) -> bool {
    match markers.iter().find(|m| session.has_file(m)) {
        Some(marker) => {
            debug!(family = family.name(), marker, "found marker file");
            true
        }
        None => false,
    }
}

fn probe_debian(session: &mut FetchSession<'_>, ctx: &TreeContext) -> Result<Option<DistroDescriptor>> {
    let prefix = if session.has_file(&format!("{DEBIAN_PREFIX}/MANIFEST")) {
        DEBIAN_PREFIX
    } else if session.has_file(&format!("{DEBIAN_DAILY_PREFIX}/MANIFEST")) {
        DEBIAN_DAILY_PREFIX
    } else {
        debug!("Doesn't look like a Debian distro");
        return Ok(None);
    };

    let manifest = format!("{prefix}/MANIFEST");
    if fetch_and_match(session, &manifest, installer_regex(Family::Debian))? {
        debug!("Detected a Debian distro");
        Ok(Some(DistroDescriptor::with_prefix(Family::Debian, ctx, prefix)))
    } else {
        Ok(None)
    }
}

/// Fetch `path` and report whether any line matches `regex`. The fetched
/// copy is always deleted.
fn fetch_and_match(session: &mut FetchSession<'_>, path: &str, regex: &Regex) -> Result<bool> {
    let local = session.acquire(path)?;
    let matched = (|| -> Result<bool> {
        let file = File::open(&local).io_context(|| format!("opening {}", local.display()))?;
        for line in BufReader::new(file).lines() {
            let line = line.io_context(|| format!("reading {}", local.display()))?;
            if regex.is_match(&line) {
                return Ok(true);
            }
        }
        Ok(false)
    })();
    session.discard(&local);
    matched
}
