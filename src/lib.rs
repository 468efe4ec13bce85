//! Resolve installation sources into bootable installer media.
//!
//! Given an install tree (an HTTP/FTP/NFS URL or a local path), this crate
//! works out which distribution the tree belongs to and fetches what a
//! virtual machine needs to start its installer: a kernel/initrd pair plus
//! boot arguments, or a boot ISO.
//!
//! - **Classification** - tree metadata (`.treeinfo`) first, then per-family
//!   marker files in a fixed priority order
//! - **Media location** - per-family path tables for fully virtualized and
//!   paravirtualized guests
//! - **Legacy synthesis** - rebuilds a xen installer initrd from packages for
//!   SUSE trees that ship none
//! - **Fetch sessions** - every temporary file is removed unless handed to
//!   the caller
//!
//! # Architecture
//!
//! ```text
//! Resolver (resolve)
//!     │
//!     ├── FetcherProvider ── Fetcher (fetch; transports supplied by the host)
//!     ├── classify ───────── treeinfo, Family probes (distro)
//!     ├── locate_kernel / locate_boot_iso (distro::locate)
//!     └── suse::synthesize ─ MediaTools (rpm2cpio, cpio, depmod)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use distro_fetch::{AcquireRequest, GuestHints, NoProgress, Resolver, ResolverConfig, VirtType};
//!
//! let resolver = Resolver::new(ResolverConfig::default());
//! let request = AcquireRequest::new("/srv/trees/fedora-9")
//!     .virt_type(VirtType::FullyVirt)
//!     .arch("x86_64");
//! let media = resolver.acquire_kernel(&request, &GuestHints::default(), &mut NoProgress)?;
//! println!("{} {} {}", media.kernel.display(), media.initrd.display(), media.cmdline);
//! # Ok::<(), distro_fetch::Error>(())
//! ```

pub mod arch;
pub mod config;
pub mod distro;
pub mod error;
pub mod fetch;
pub mod preflight;
pub mod process;
pub mod resolve;
pub mod suse;
pub mod treeinfo;

#[cfg(test)]
mod testing;

pub use arch::{normalize_arch, OsType, VirtType};
pub use config::{load_config, ResolverConfig, ToolPaths};
pub use distro::{DistroDescriptor, Family};
pub use error::{Error, MediaKind, Result};
pub use fetch::{FetchError, FetchSession, Fetcher, FetcherKind, FetcherProvider, NoProgress, Progress};
pub use resolve::{AcquireRequest, BootIsoMedia, GuestHints, KernelMedia, Resolver};
pub use treeinfo::{MetadataParseError, TreeMetadata};
