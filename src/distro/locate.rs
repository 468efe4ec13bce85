//! Media locator: turns a descriptor into concrete tree-relative paths.

use tracing::debug;

use super::{DistroDescriptor, KernelPaths};
use crate::arch::VirtType;
use crate::error::{Error, MediaKind, Result};
use crate::fetch::Fetcher;
use crate::treeinfo::ImageSet;

/// Find the kernel/initrd pair for the descriptor's virt type.
///
/// A matching `images-<tag>` section in the tree metadata is authoritative.
/// Otherwise the first candidate pair whose kernel and initrd both exist
/// wins.
pub fn locate_kernel(fetcher: &dyn Fetcher, descriptor: &DistroDescriptor) -> Result<KernelPaths> {
    if let Some((kernel, initrd)) = metadata_images(descriptor, kernel_tag(descriptor))
        .and_then(ImageSet::kernel_pair)
    {
        debug!(kernel, initrd, "using kernel paths from tree metadata");
        return Ok(KernelPaths::new(kernel, initrd));
    }

    descriptor
        .kernel_candidates()
        .iter()
        .find(|pair| fetcher.has_file(&pair.kernel) && fetcher.has_file(&pair.initrd))
        .cloned()
        .ok_or_else(|| not_found(descriptor, MediaKind::Kernel))
}

/// Find the boot ISO. Metadata wins, then the first existing candidate.
pub fn locate_boot_iso(fetcher: &dyn Fetcher, descriptor: &DistroDescriptor) -> Result<String> {
    if let Some(iso) = metadata_images(descriptor, descriptor.arch())
        .and_then(|set| set.boot_iso.as_deref())
    {
        debug!(iso, "using boot ISO path from tree metadata");
        return Ok(iso.to_string());
    }

    descriptor
        .boot_iso_candidates()
        .iter()
        .find(|path| fetcher.has_file(path))
        .cloned()
        .ok_or_else(|| not_found(descriptor, MediaKind::BootIso))
}

fn kernel_tag(descriptor: &DistroDescriptor) -> &str {
    if VirtType::is_paravirt(descriptor.virt_type()) {
        "xen"
    } else {
        descriptor.arch()
    }
}

/// The images section for `tag`, falling back to the tree's own declared
/// arch for non-xen lookups.
fn metadata_images<'d>(descriptor: &'d DistroDescriptor, tag: &str) -> Option<&'d ImageSet> {
    let metadata = descriptor.metadata()?;
    let found = metadata.images(tag).or_else(|| {
        if tag == "xen" {
            None
        } else {
            metadata.arch().and_then(|arch| metadata.images(arch))
        }
    });
    if found.is_none() {
        let sections: Vec<&str> = metadata.image_tags().collect();
        debug!(tag, ?sections, "no matching images section in tree metadata");
    }
    found
}

fn not_found(descriptor: &DistroDescriptor, media: MediaKind) -> Error {
    Error::MediaNotFound {
        distro: descriptor.name().to_string(),
        virt_type: descriptor.virt_type(),
        media,
    }
}
