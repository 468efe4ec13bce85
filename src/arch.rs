//! Guest architecture and virtualization type handling.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

fn x86_32_regex() -> &'static Regex {
    static X86_32_RE: OnceLock<Regex> = OnceLock::new();
    X86_32_RE.get_or_init(|| Regex::new(r"^i[3-9]86").expect("invalid x86 arch regex"))
}

/// Virtualization type the install media is wanted for.
///
/// `None` in an `Option<VirtType>` means unconstrained, which resolves the
/// same media as [`VirtType::FullyVirt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VirtType {
    /// Hardware virtualization (`hvm`).
    FullyVirt,
    /// Paravirtualization (`xen`).
    Paravirt,
}

impl VirtType {
    pub fn as_str(self) -> &'static str {
        match self {
            VirtType::FullyVirt => "hvm",
            VirtType::Paravirt => "xen",
        }
    }

    pub fn is_paravirt(virt: Option<VirtType>) -> bool {
        virt == Some(VirtType::Paravirt)
    }
}

impl fmt::Display for VirtType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VirtType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hvm" | "fullyvirt" | "fv" => Ok(VirtType::FullyVirt),
            "xen" | "paravirt" | "pv" => Ok(VirtType::Paravirt),
            other => Err(format!(
                "unsupported virt type '{other}' (expected 'hvm' or 'xen')"
            )),
        }
    }
}

/// Operating system type reported with resolved kernel media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsType {
    Linux,
    Solaris,
}

impl OsType {
    pub fn as_str(self) -> &'static str {
        match self {
            OsType::Linux => "linux",
            OsType::Solaris => "solaris",
        }
    }
}

impl fmt::Display for OsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize an architecture string.
///
/// `i386` through `i986` collapse to `i686` and `amd64` becomes `x86_64`.
/// Anything else is returned trimmed but otherwise unchanged. Idempotent.
pub fn normalize_arch(arch: &str) -> String {
    let arch = arch.trim();
    let lowered = arch.to_ascii_lowercase();
    if x86_32_regex().is_match(&lowered) {
        "i686".to_string()
    } else if lowered == "amd64" {
        "x86_64".to_string()
    } else {
        arch.to_string()
    }
}

/// Normalized architecture of the machine we are running on.
pub fn host_arch() -> String {
    normalize_arch(std::env::consts::ARCH)
}

/// Use the requested arch when given, the host arch otherwise.
pub fn resolve_arch(requested: Option<&str>) -> String {
    match requested {
        Some(arch) if !arch.trim().is_empty() => normalize_arch(arch),
        _ => host_arch(),
    }
}

/// Whether a tree that publishes 32-bit x86 media under `i386` should use
/// that directory for `arch` (`i486`..`i986`).
pub fn folds_to_i386(arch: &str) -> bool {
    let arch = arch.trim().to_ascii_lowercase();
    let bytes = arch.as_bytes();
    bytes.len() >= 4
        && bytes[0] == b'i'
        && (b'4'..=b'9').contains(&bytes[1])
        && &bytes[2..4] == b"86"
}
