//! Package discovery in a SUSE tree's recursive directory listing.
//!
//! Old SUSE trees ship `ls-lR.gz`, the output of `ls -lR` over the tree:
//!
//! ```text
//! ./suse/i586:
//! total 123456
//! -rw-r--r-- 1 root root 15630412 Nov 29 2006 kernel-xen-2.6.18.2-34.i586.rpm
//!
//! ./suse/noarch:
//! ```
//!
//! Package file names are not predictable, so the listing is the only way
//! to find them.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::OnceLock;

use flate2::read::GzDecoder;
use regex::Regex;
use tracing::debug;

use crate::error::{Error, IoContext, Result};

/// Tree-relative path of the listing.
pub const LISTING_PATH: &str = "ls-lR.gz";

/// Tree-relative paths of the two packages the synthesizer needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpmNames {
    pub kernel: String,
    pub install_initrd: String,
}

fn kernel_xen_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^kernel-xen-\d.*\.rpm$").expect("invalid kernel-xen regex"))
}

fn kernel_xenpae_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^kernel-xenpae-\d.*\.rpm$").expect("invalid kernel-xenpae regex")
    })
}

fn install_initrd_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^install-initrd-\d.*\.rpm$").expect("invalid install-initrd regex")
    })
}

/// Package directories searched for `arch`. 32-bit trees may only carry
/// i586 or i686 builds.
pub fn search_arches(arch: &str) -> Vec<String> {
    let mut arches = vec![arch.to_string()];
    if arch == "i386" {
        arches.extend(["i586".to_string(), "i686".to_string()]);
    }
    arches
}

/// Decompress and scan a fetched listing.
pub fn read_listing(path: &Path, arch: &str) -> Result<RpmNames> {
    let file = File::open(path).io_context(|| format!("opening {}", path.display()))?;
    find_rpms(BufReader::new(GzDecoder::new(file)), arch)
}

/// Scan `ls -lR` output for the xen kernel and install-initrd packages
/// under `suse/<arch>`. The last matching entry wins.
pub fn find_rpms<R: BufRead>(listing: R, arch: &str) -> Result<RpmNames> {
    let headers: Vec<String> = search_arches(arch)
        .iter()
        .map(|a| format!("./suse/{a}:"))
        .collect();
    let kernel_re = if arch == "i386" {
        kernel_xenpae_regex()
    } else {
        kernel_xen_regex()
    };

    let mut kernel = None;
    let mut install_initrd = None;
    let mut dir: Option<String> = None;

    for (index, line) in listing.lines().enumerate() {
        let line = line.map_err(|e| Error::RpmIndexParse {
            detail: format!("reading listing: {e}"),
        })?;

        let Some(current) = dir.as_deref() else {
            if headers.iter().any(|h| *h == line) {
                // "./suse/i586:" -> "suse/i586"
                dir = Some(line[2..line.len() - 1].to_string());
            }
            continue;
        };

        if line.trim().is_empty() {
            dir = None;
            continue;
        }
        if line.starts_with("total") {
            continue;
        }

        let filename = line.split_whitespace().nth(8).ok_or_else(|| Error::RpmIndexParse {
            detail: format!("line {}: malformed entry '{line}'", index + 1),
        })?;
        if install_initrd_regex().is_match(filename) {
            install_initrd = Some(format!("{current}/{filename}"));
        } else if kernel_re.is_match(filename) {
            kernel = Some(format!("{current}/{filename}"));
        }
    }

    let kernel = kernel.ok_or_else(|| Error::RpmIndexParse {
        detail: "unable to determine kernel RPM path".to_string(),
    })?;
    let install_initrd = install_initrd.ok_or_else(|| Error::RpmIndexParse {
        detail: "unable to determine install-initrd RPM path".to_string(),
    })?;
    debug!(%kernel, %install_initrd, "found packages in listing");
    Ok(RpmNames {
        kernel,
        install_initrd,
    })
}
