//! Solaris and OpenSolaris installer command lines.
//!
//! Sun installers take the kernel path as the first word of the command
//! line, followed by kernel options and `-B` boot properties. Solaris also
//! needs to be told where its install media lives.

use std::net::{IpAddr, ToSocketAddrs};

use tracing::debug;

use super::Family;
use crate::resolve::GuestHints;

pub const BOOT_ISO: &str = "images/solarisdvd.iso";

/// Kernel and boot archive paths of a Sun install tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SunLayout {
    pub kernel: &'static str,
    pub initrd: &'static str,
}

const SOLARIS: SunLayout = SunLayout {
    kernel: "boot/platform/i86xpv/kernel/unix",
    initrd: "boot/x86.miniroot",
};

const OPENSOLARIS: SunLayout = SunLayout {
    kernel: "platform/i86xpv/kernel/unix",
    initrd: "boot/x86.microroot",
};

pub fn layout(family: Family) -> SunLayout {
    match family {
        Family::OpenSolaris => OPENSOLARIS,
        _ => SOLARIS,
    }
}

/// Extra arguments split the way the Sun kernel expects them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SunArgs {
    /// Single-letter kernel options, concatenated (`-v -s` becomes `vs`).
    pub kernel_opts: String,
    /// Bare words passed through to the kernel.
    pub kernel_args: Vec<String>,
    /// Argument of the last `-m` flag.
    pub smf_args: Option<String>,
    /// `-B` boot properties, in order.
    pub boot_props: Vec<String>,
}

pub fn parse_extra_args(extra: &str) -> SunArgs {
    let mut parsed = SunArgs::default();
    let mut words = extra.split_whitespace();
    while let Some(word) = words.next() {
        match word {
            "-B" => {
                if let Some(prop) = words.next() {
                    parsed.boot_props.push(prop.to_string());
                }
            }
            "-m" => {
                if let Some(smf) = words.next() {
                    parsed.smf_args = Some(smf.to_string());
                }
            }
            opt if opt.starts_with('-') => parsed.kernel_opts.push_str(&opt[1..]),
            arg => parsed.kernel_args.push(arg.to_string()),
        }
    }
    parsed
}

/// Name lookups needed for NFS installs.
pub trait HostResolver {
    fn resolve(&self, host: &str) -> Option<IpAddr>;
}

/// Resolves through the system resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    fn resolve(&self, host: &str) -> Option<IpAddr> {
        (host, 0)
            .to_socket_addrs()
            .ok()?
            .next()
            .map(|addr| addr.ip())
    }
}

/// Full installer command line for a Sun family.
pub fn install_cmdline(
    family: Family,
    location: &str,
    guest: &GuestHints,
    resolver: &dyn HostResolver,
) -> String {
    let args = parse_extra_args(guest.extra_args.as_deref().unwrap_or_default());
    match family {
        Family::OpenSolaris => opensolaris_cmdline(&args),
        _ => solaris_cmdline(&args, location, guest, resolver),
    }
}

fn opensolaris_cmdline(args: &SunArgs) -> String {
    let mut words = vec![format!("/{}", OPENSOLARIS.kernel)];
    if !args.kernel_opts.is_empty() {
        words.push(format!("-{}", args.kernel_opts));
    }
    if !args.boot_props.is_empty() {
        words.push("-B".to_string());
        words.push(args.boot_props.join(","));
    }
    words.join(" ")
}

fn solaris_cmdline(
    args: &SunArgs,
    location: &str,
    guest: &GuestHints,
    resolver: &dyn HostResolver,
) -> String {
    // The loader path drops the leading "boot/".
    let kernel = SOLARIS.kernel.strip_prefix("boot").unwrap_or(SOLARIS.kernel);
    let mut words = vec![kernel.to_string()];
    if !args.kernel_opts.is_empty() {
        words.push(format!("-{}", args.kernel_opts));
    }
    if !args.boot_props.is_empty() {
        words.push("-B".to_string());
        words.push(args.boot_props.join(","));
    }

    let mut netmask = None;
    for arg in &args.kernel_args {
        match arg.strip_prefix("subnet-mask=") {
            Some(mask) => netmask = Some(mask.to_string()),
            None => words.push(arg.clone()),
        }
    }

    words.push("-".to_string());
    if !guest.graphics_enabled {
        words.push("nowin".to_string());
    }
    words.extend(install_media_args(location, guest, netmask.as_deref(), resolver));
    words.join(" ")
}

fn install_media_args(
    location: &str,
    guest: &GuestHints,
    netmask: Option<&str>,
    resolver: &dyn HostResolver,
) -> Vec<String> {
    let Some(export) = location.strip_prefix("nfs:") else {
        return vec!["-B".to_string(), "install_media=cdrom".to_string()];
    };

    let Some(guest_ip) = guest.name.as_deref().and_then(|name| resolver.resolve(name)) else {
        debug!("guest name does not resolve, installer will use DHCP");
        return vec!["dhcp".to_string()];
    };

    let (server, path) = export.split_once(':').unwrap_or((export, ""));
    let server = resolver
        .resolve(server)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| server.to_string());

    let mut props = vec![
        format!("install_media={server}:{path}"),
        format!("host-ip={guest_ip}"),
    ];
    if let Some(mask) = netmask {
        props.push(format!("subnet-mask={mask}"));
    }
    if let Some(route) = guest.default_route.as_deref() {
        props.push(format!("router-ip={route}"));
    }
    if let Some(mac) = guest.mac_address.as_deref() {
        props.push(format!("boot-mac={}", boot_mac(mac)));
    }
    vec!["-B".to_string(), props.join(",")]
}

/// The Solaris loader wants MAC octets without leading zeros.
fn boot_mac(mac: &str) -> String {
    mac.split(':')
        .map(|octet| match octet.strip_prefix('0') {
            Some(rest) if !rest.is_empty() => rest,
            _ => octet,
        })
        .collect::<Vec<_>>()
        .join(":")
}
