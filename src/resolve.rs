//! Kernel and boot-disk acquisition.
//!
//! [`Resolver`] ties the pieces together: it sanitizes the location, opens
//! a fetcher for it, classifies the tree, locates the media and fetches it
//! into the scratch dir. Every call runs inside one [`FetchSession`], so a
//! failure at any step leaves neither partial downloads nor a mounted
//! location behind.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::arch::{resolve_arch, OsType, VirtType};
use crate::config::ResolverConfig;
use crate::distro::sun::{self, HostResolver, SystemResolver};
use crate::distro::{
    classify, locate_boot_iso, locate_kernel, suse_tree_arch, DistroDescriptor, Family,
    KernelPaths, TreeContext,
};
use crate::error::{Error, IoContext, Result};
use crate::fetch::scratch::remove_quietly;
use crate::fetch::{
    sanitize_location, FetchSession, FetcherKind, FetcherProvider, LocalProvider, Progress,
};
use crate::suse::{self, HostTools, MediaTools};

/// Where to look and what for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireRequest {
    pub location: String,
    pub virt_type: Option<VirtType>,
    pub distro_hint: Option<String>,
    /// Guest architecture. Defaults to the host's.
    pub arch: Option<String>,
    /// Overrides the configured scratch dir.
    pub scratch_dir: Option<PathBuf>,
}

impl AcquireRequest {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            virt_type: None,
            distro_hint: None,
            arch: None,
            scratch_dir: None,
        }
    }

    pub fn virt_type(mut self, virt_type: VirtType) -> Self {
        self.virt_type = Some(virt_type);
        self
    }

    pub fn distro_hint(mut self, hint: impl Into<String>) -> Self {
        self.distro_hint = Some(hint.into());
        self
    }

    pub fn arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }
}

/// What the guest brings to the installer command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestHints {
    /// Guest host name, resolved for Solaris NFS installs.
    pub name: Option<String>,
    /// Extra kernel arguments, appended verbatim.
    pub extra_args: Option<String>,
    pub graphics_enabled: bool,
    pub mac_address: Option<String>,
    /// Default router of the guest's network.
    pub default_route: Option<String>,
}

/// A kernel/initrd pair in the scratch dir, owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelMedia {
    pub kernel: PathBuf,
    pub initrd: PathBuf,
    pub cmdline: String,
    pub os_type: OsType,
    pub distro: Family,
}

impl KernelMedia {
    /// Delete both files.
    pub fn remove_files(&self) {
        remove_quietly(&self.kernel);
        remove_quietly(&self.initrd);
    }
}

/// A boot ISO in the scratch dir, owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootIsoMedia {
    pub iso: PathBuf,
    pub distro: Family,
}

impl BootIsoMedia {
    pub fn remove_files(&self) {
        remove_quietly(&self.iso);
    }
}

pub struct Resolver {
    config: ResolverConfig,
    provider: Box<dyn FetcherProvider>,
    tools: Box<dyn MediaTools>,
    host_resolver: Box<dyn HostResolver>,
}

impl Resolver {
    /// A resolver that reads local trees and shells out for synthesis.
    pub fn new(config: ResolverConfig) -> Self {
        let tools = HostTools::new(config.tools.clone());
        Self {
            config,
            provider: Box::new(LocalProvider),
            tools: Box::new(tools),
            host_resolver: Box::new(SystemResolver),
        }
    }

    pub fn with_provider(mut self, provider: impl FetcherProvider + 'static) -> Self {
        self.provider = Box::new(provider);
        self
    }

    pub fn with_tools(mut self, tools: impl MediaTools + 'static) -> Self {
        self.tools = Box::new(tools);
        self
    }

    pub fn with_host_resolver(mut self, resolver: impl HostResolver + 'static) -> Self {
        self.host_resolver = Box::new(resolver);
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Fetch a kernel and initrd able to boot the tree's installer.
    pub fn acquire_kernel(
        &self,
        request: &AcquireRequest,
        guest: &GuestHints,
        progress: &mut dyn Progress,
    ) -> Result<KernelMedia> {
        let (mut session, ctx) = self.open(request, progress)?;
        let descriptor = classify(&mut session, &ctx, request.distro_hint.as_deref())?;

        let (kernel, initrd, base_arg) = match locate_kernel(session.fetcher(), &descriptor) {
            Ok(paths) => {
                let (kernel, initrd) = fetch_pair(&mut session, &paths)?;
                (kernel, initrd, self.boot_arg(&descriptor, &ctx, guest))
            }
            Err(e) if e.is_media_not_found() && descriptor.uses_legacy_synthesis() => {
                debug!("no xen kernel in tree, synthesizing one from packages");
                self.tools.preflight()?;
                let built = suse::synthesize(
                    &mut session,
                    self.tools.as_ref(),
                    &suse_tree_arch(descriptor.arch()),
                )?;
                (built.kernel, built.initrd, Some(suse::install_arg(&ctx.location)))
            }
            Err(e) => return Err(e),
        };

        let cmdline = match descriptor.os_type() {
            OsType::Solaris => base_arg.unwrap_or_default(),
            OsType::Linux => join_args(base_arg.as_deref(), guest.extra_args.as_deref()),
        };

        let kernel = session.release(&kernel);
        let initrd = session.release(&initrd);
        session.close();

        info!(
            distro = descriptor.name(),
            kernel = %kernel.display(),
            initrd = %initrd.display(),
            "acquired installer kernel"
        );
        Ok(KernelMedia {
            kernel,
            initrd,
            cmdline,
            os_type: descriptor.os_type(),
            distro: descriptor.family(),
        })
    }

    /// Fetch the tree's bootable installer ISO.
    pub fn acquire_boot_disk(
        &self,
        request: &AcquireRequest,
        progress: &mut dyn Progress,
    ) -> Result<BootIsoMedia> {
        let (mut session, ctx) = self.open(request, progress)?;
        let descriptor = classify(&mut session, &ctx, request.distro_hint.as_deref())?;

        let path = locate_boot_iso(session.fetcher(), &descriptor)?;
        let iso = session.acquire(&path)?;
        let iso = session.release(&iso);
        session.close();

        info!(distro = descriptor.name(), iso = %iso.display(), "acquired boot ISO");
        Ok(BootIsoMedia {
            iso,
            distro: descriptor.family(),
        })
    }

    fn open<'p>(
        &self,
        request: &AcquireRequest,
        progress: &'p mut dyn Progress,
    ) -> Result<(FetchSession<'p>, TreeContext)> {
        let invalid = |reason: String| Error::InvalidInstallLocation {
            location: request.location.clone(),
            reason,
        };

        let location = sanitize_location(&request.location).map_err(|e| invalid(e.to_string()))?;
        let kind = FetcherKind::for_location(&location);
        let scratch_dir: &Path = request
            .scratch_dir
            .as_deref()
            .unwrap_or(&self.config.scratch_dir);
        // External tools run with their own working directories.
        let scratch_dir = std::path::absolute(scratch_dir)
            .io_context(|| format!("resolving scratch dir {}", scratch_dir.display()))?;
        debug!(%location, ?kind, scratch_dir = %scratch_dir.display(), "opening install location");

        let fetcher = self
            .provider
            .open(kind, &location, &scratch_dir)
            .map_err(|e| invalid(e.to_string()))?;
        let session = FetchSession::open(fetcher, progress)?;

        let arch = resolve_arch(request.arch.as_deref());
        Ok((session, TreeContext::new(&location, request.virt_type, &arch)))
    }

    /// Boot argument pointing the installer at its tree.
    fn boot_arg(
        &self,
        descriptor: &DistroDescriptor,
        ctx: &TreeContext,
        guest: &GuestHints,
    ) -> Option<String> {
        match descriptor.os_type() {
            OsType::Solaris => Some(sun::install_cmdline(
                descriptor.family(),
                &ctx.location,
                guest,
                self.host_resolver.as_ref(),
            )),
            // Local trees are mounted by the installer itself.
            OsType::Linux if ctx.location.starts_with('/') => None,
            OsType::Linux => Some(format!("method={}", ctx.location)),
        }
    }
}

/// Fetch a kernel then its initrd. A failed initrd takes the kernel with it.
fn fetch_pair(session: &mut FetchSession<'_>, paths: &KernelPaths) -> Result<(PathBuf, PathBuf)> {
    let kernel = session.acquire(&paths.kernel)?;
    match session.acquire(&paths.initrd) {
        Ok(initrd) => Ok((kernel, initrd)),
        Err(e) => {
            session.discard(&kernel);
            Err(e)
        }
    }
}

fn join_args(base: Option<&str>, extra: Option<&str>) -> String {
    [base, extra]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::NoProgress;
    use crate::suse::fixtures::{suse_10_2_tree, FakeTools};
    use crate::testing::{scratch_entries, MemoryFetcher, MemoryProvider};
    use std::fs;
    use std::net::IpAddr;

    const FEDORA_LOCATION: &str = "http://mirror/fedora/9/os/";

    fn resolver(tree: MemoryFetcher) -> Resolver {
        Resolver::new(ResolverConfig::default())
            .with_provider(MemoryProvider::new(tree))
            .with_tools(FakeTools::default())
    }

    fn fedora_tree(scratch: &Path) -> MemoryFetcher {
        MemoryFetcher::new(FEDORA_LOCATION, scratch)
            .with_file("Fedora", "")
            .with_file("images/pxeboot/vmlinuz", "hvm-kernel")
            .with_file("images/pxeboot/initrd.img", "hvm-initrd")
    }

    fn request(location: &str, scratch: &Path) -> AcquireRequest {
        AcquireRequest::new(location).scratch_dir(scratch).arch("x86_64")
    }

    #[test]
    fn fedora_http_tree_end_to_end() {
        let scratch = tempfile::tempdir().unwrap();
        let tree = fedora_tree(scratch.path());
        let log = tree.log();

        let media = resolver(tree)
            .acquire_kernel(
                &request(FEDORA_LOCATION, scratch.path()).virt_type(VirtType::FullyVirt),
                &GuestHints::default(),
                &mut NoProgress,
            )
            .unwrap();

        assert_eq!(media.distro, Family::Fedora);
        assert_eq!(media.os_type, OsType::Linux);
        assert_eq!(media.cmdline, "method=http://mirror/fedora/9/os/");
        assert_eq!(fs::read_to_string(&media.kernel).unwrap(), "hvm-kernel");
        assert_eq!(fs::read_to_string(&media.initrd).unwrap(), "hvm-initrd");
        assert_eq!(log.borrow().opened_kind, Some(FetcherKind::Http));
        assert_eq!(log.borrow().cleaned, 1);

        media.remove_files();
        assert!(scratch_entries(scratch.path()).is_empty());
    }

    #[test]
    fn extra_args_follow_method_and_local_paths_omit_it() {
        let scratch = tempfile::tempdir().unwrap();
        let guest = GuestHints {
            extra_args: Some(" ks=http://host/ks.cfg ".to_string()),
            ..GuestHints::default()
        };

        let media = resolver(fedora_tree(scratch.path()))
            .acquire_kernel(&request(FEDORA_LOCATION, scratch.path()), &guest, &mut NoProgress)
            .unwrap();
        assert_eq!(
            media.cmdline,
            "method=http://mirror/fedora/9/os/ ks=http://host/ks.cfg"
        );

        let media = resolver(fedora_tree(scratch.path()))
            .acquire_kernel(&request("/srv/fedora.iso", scratch.path()), &guest, &mut NoProgress)
            .unwrap();
        assert_eq!(media.cmdline, "ks=http://host/ks.cfg");
    }

    #[test]
    fn initrd_failure_removes_fetched_kernel() {
        let scratch = tempfile::tempdir().unwrap();
        let tree = MemoryFetcher::new(FEDORA_LOCATION, scratch.path())
            .with_file("Fedora", "")
            .with_file("images/pxeboot/vmlinuz", "hvm-kernel")
            .failing_on("images/pxeboot/initrd.img");
        let log = tree.log();

        let err = resolver(tree)
            .acquire_kernel(
                &request(FEDORA_LOCATION, scratch.path()),
                &GuestHints::default(),
                &mut NoProgress,
            )
            .unwrap_err();

        assert!(matches!(err, Error::Fetch(_)));
        assert_eq!(
            log.borrow().acquired,
            vec!["images/pxeboot/vmlinuz", "images/pxeboot/initrd.img"]
        );
        assert_eq!(log.borrow().cleaned, 1);
        assert!(scratch_entries(scratch.path()).is_empty());
    }

    #[test]
    fn paravirt_fedora_without_xen_images_is_media_not_found() {
        let scratch = tempfile::tempdir().unwrap();
        let err = resolver(fedora_tree(scratch.path()))
            .acquire_kernel(
                &request(FEDORA_LOCATION, scratch.path()).virt_type(VirtType::Paravirt),
                &GuestHints::default(),
                &mut NoProgress,
            )
            .unwrap_err();
        assert!(err.is_media_not_found());
        assert!(scratch_entries(scratch.path()).is_empty());
    }

    #[test]
    fn metadata_family_wins_over_heuristic_markers() {
        let scratch = tempfile::tempdir().unwrap();
        let tree = fedora_tree(scratch.path())
            .with_file(".treeinfo", "[general]\nfamily = Fedora\n")
            .with_file("CentOS", "");
        let media = resolver(tree)
            .acquire_kernel(
                &request(FEDORA_LOCATION, scratch.path()).distro_hint("centos"),
                &GuestHints::default(),
                &mut NoProgress,
            )
            .unwrap();
        assert_eq!(media.distro, Family::Fedora);
    }

    #[test]
    fn ubuntu_and_mandriva_refuse_paravirt() {
        let scratch = tempfile::tempdir().unwrap();
        let ubuntu = MemoryFetcher::new("http://mirror/ubuntu/", scratch.path())
            .with_file("current/images/MANIFEST", "ubuntu-installer/amd64\n")
            .with_file("current/images/netboot/ubuntu-installer/i386/linux", "k")
            .with_file("current/images/netboot/ubuntu-installer/i386/initrd.gz", "i");
        let mandriva = MemoryFetcher::new("http://mirror/mandriva/", scratch.path())
            .with_file("VERSION", "Mandriva Linux 2008.1 i586\n")
            .with_file("isolinux/alt0/vmlinuz", "k")
            .with_file("isolinux/alt0/all.rdz", "i");

        for (tree, location, hint) in [
            (ubuntu.clone(), "http://mirror/ubuntu/", "ubuntu"),
            (mandriva.clone(), "http://mirror/mandriva/", "mandriva"),
        ] {
            let err = resolver(tree)
                .acquire_kernel(
                    &request(location, scratch.path())
                        .virt_type(VirtType::Paravirt)
                        .distro_hint(hint),
                    &GuestHints::default(),
                    &mut NoProgress,
                )
                .unwrap_err();
            assert!(matches!(err, Error::NoDistroFound { .. }), "{hint}: {err}");
        }

        let media = resolver(ubuntu)
            .acquire_kernel(
                &request("http://mirror/ubuntu/", scratch.path()).virt_type(VirtType::FullyVirt),
                &GuestHints::default(),
                &mut NoProgress,
            )
            .unwrap();
        assert_eq!(media.distro, Family::Ubuntu);
        assert_eq!(media.cmdline, "method=http://mirror/ubuntu/");
    }

    #[test]
    fn suse_10_2_paravirt_is_synthesized() {
        let scratch = tempfile::tempdir().unwrap();
        let tree = suse_10_2_tree("http://mirror/suse/10.2/", scratch.path());
        let guest = GuestHints {
            extra_args: Some("textmode=1".to_string()),
            ..GuestHints::default()
        };

        let media = resolver(tree)
            .acquire_kernel(
                &AcquireRequest::new("http://mirror/suse/10.2/")
                    .scratch_dir(scratch.path())
                    .arch("i686")
                    .virt_type(VirtType::Paravirt),
                &guest,
                &mut NoProgress,
            )
            .unwrap();

        assert_eq!(media.distro, Family::Suse);
        assert_eq!(media.cmdline, "install=http://mirror/suse/10.2/ textmode=1");
        assert_eq!(fs::read_to_string(&media.kernel).unwrap(), "vmlinuz-bytes");
        assert!(media.initrd.exists());

        let mut left = scratch_entries(scratch.path());
        left.retain(|p| *p != media.kernel && *p != media.initrd);
        assert!(left.is_empty(), "leftover scratch files: {left:?}");
    }

    #[test]
    fn relative_scratch_dir_yields_absolute_media() {
        let scratch = tempfile::tempdir_in(".").unwrap();
        let relative = Path::new(".").join(scratch.path().file_name().unwrap());
        let tree = suse_10_2_tree("http://mirror/suse/10.2/", &relative);

        let media = resolver(tree)
            .acquire_kernel(
                &AcquireRequest::new("http://mirror/suse/10.2/")
                    .scratch_dir(&relative)
                    .arch("i686")
                    .virt_type(VirtType::Paravirt),
                &GuestHints::default(),
                &mut NoProgress,
            )
            .unwrap();

        assert!(media.kernel.is_absolute(), "{}", media.kernel.display());
        assert!(media.initrd.is_absolute(), "{}", media.initrd.display());
        assert_eq!(fs::read_to_string(&media.kernel).unwrap(), "vmlinuz-bytes");
        assert_eq!(
            scratch_entries(&relative).len(),
            2,
            "only the kernel and initrd stay in the scratch dir"
        );
    }

    #[test]
    fn suse_with_xen_kernel_is_fetched_directly() {
        let scratch = tempfile::tempdir().unwrap();
        let tree = MemoryFetcher::new("http://mirror/suse/11.0/", scratch.path())
            .with_file("directory.yast", "")
            .with_file("boot/i386/vmlinuz-xen", "xen-kernel")
            .with_file("boot/i386/initrd-xen", "xen-initrd");
        let media = resolver(tree)
            .acquire_kernel(
                &AcquireRequest::new("http://mirror/suse/11.0/")
                    .scratch_dir(scratch.path())
                    .arch("i586")
                    .virt_type(VirtType::Paravirt),
                &GuestHints::default(),
                &mut NoProgress,
            )
            .unwrap();
        assert_eq!(fs::read_to_string(&media.kernel).unwrap(), "xen-kernel");
        assert_eq!(media.cmdline, "method=http://mirror/suse/11.0/");
    }

    #[test]
    fn unreachable_locations_are_invalid() {
        let scratch = tempfile::tempdir().unwrap();
        let tree = fedora_tree(scratch.path()).failing_prepare();
        let err = resolver(tree)
            .acquire_kernel(
                &request("nfs:server:/export/fedora", scratch.path()),
                &GuestHints::default(),
                &mut NoProgress,
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInstallLocation { .. }));

        let err = resolver(fedora_tree(scratch.path()))
            .acquire_boot_disk(&request("nfs://server", scratch.path()), &mut NoProgress)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInstallLocation { .. }));
    }

    #[test]
    fn nfs_uris_are_sanitized_before_opening() {
        let scratch = tempfile::tempdir().unwrap();
        let tree = fedora_tree(scratch.path());
        let log = tree.log();
        let media = resolver(tree)
            .acquire_kernel(
                &request("nfs://server/export/fedora", scratch.path()),
                &GuestHints::default(),
                &mut NoProgress,
            )
            .unwrap();
        assert_eq!(media.cmdline, "method=nfs:server:/export/fedora");
        assert_eq!(log.borrow().opened_kind, Some(FetcherKind::Nfs));
    }

    #[test]
    fn boot_disk_from_debian_tree() {
        let scratch = tempfile::tempdir().unwrap();
        let tree = MemoryFetcher::new("http://mirror/debian/", scratch.path())
            .with_file("current/images/MANIFEST", "mini.iso: debian-installer image\n")
            .with_file("current/images/netboot/mini.iso", "iso-bytes");
        let media = resolver(tree)
            .acquire_boot_disk(
                &request(
                    "http://mirror/debian/dists/etch/main/installer-amd64/",
                    scratch.path(),
                ),
                &mut NoProgress,
            )
            .unwrap();
        assert_eq!(media.distro, Family::Debian);
        assert_eq!(fs::read_to_string(&media.iso).unwrap(), "iso-bytes");
        media.remove_files();
        assert!(scratch_entries(scratch.path()).is_empty());
    }

    struct NoNames;

    impl HostResolver for NoNames {
        fn resolve(&self, _host: &str) -> Option<IpAddr> {
            None
        }
    }

    #[test]
    fn solaris_kernel_gets_installer_cmdline() {
        let scratch = tempfile::tempdir().unwrap();
        let tree = MemoryFetcher::new("nfs:sol:/export/sol10", scratch.path())
            .with_file("boot/platform/i86xpv/kernel/unix", "unix")
            .with_file("boot/x86.miniroot", "miniroot");
        let guest = GuestHints {
            name: Some("guest1".to_string()),
            extra_args: Some("-v".to_string()),
            graphics_enabled: true,
            ..GuestHints::default()
        };
        let media = resolver(tree)
            .with_host_resolver(NoNames)
            .acquire_kernel(
                &request("nfs:sol:/export/sol10", scratch.path()).virt_type(VirtType::Paravirt),
                &guest,
                &mut NoProgress,
            )
            .unwrap();
        assert_eq!(media.distro, Family::Solaris);
        assert_eq!(media.os_type, OsType::Solaris);
        assert_eq!(media.cmdline, "/platform/i86xpv/kernel/unix -v - dhcp");
    }

    #[test]
    fn local_directory_trees_use_the_built_in_fetcher() {
        let tree = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        fs::create_dir_all(tree.path().join("images/pxeboot")).unwrap();
        fs::write(tree.path().join("CentOS"), "").unwrap();
        fs::write(tree.path().join("images/pxeboot/vmlinuz"), "k").unwrap();
        fs::write(tree.path().join("images/pxeboot/initrd.img"), "i").unwrap();

        let config = ResolverConfig {
            scratch_dir: scratch.path().to_path_buf(),
            ..ResolverConfig::default()
        };
        let location = tree.path().to_string_lossy().to_string();
        let media = Resolver::new(config)
            .acquire_kernel(
                &AcquireRequest::new(location).arch("i386"),
                &GuestHints::default(),
                &mut NoProgress,
            )
            .unwrap();
        assert_eq!(media.distro, Family::CentOs);
        assert_eq!(media.cmdline, "");
        assert!(media.kernel.starts_with(scratch.path()));
    }
}
