//! Distro classification: tree metadata first, then heuristic probes in a
//! fixed priority order.

use tracing::{debug, info, warn};

use super::{DistroDescriptor, Family, TreeContext};
use crate::error::{Error, Result};
use crate::fetch::FetchSession;
use crate::treeinfo::read_metadata;

/// Pick the one family the tree behind `session` belongs to.
///
/// A recognised metadata `family` wins outright. Otherwise each family's
/// probe runs in [`Family::PROBE_ORDER`], restricted to the families the
/// hint names, and the first to accept the tree is returned. Generic is
/// always tried last.
pub fn classify(
    session: &mut FetchSession<'_>,
    ctx: &TreeContext,
    hint: Option<&str>,
) -> Result<DistroDescriptor> {
    let metadata = match read_metadata(session) {
        Ok(metadata) => metadata,
        Err(Error::MetadataParse(e)) => {
            warn!(error = %e, "ignoring malformed tree metadata, falling back to heuristics");
            None
        }
        Err(e) => return Err(e),
    };

    if let Some(metadata) = metadata.as_ref() {
        if let Some(family) = Family::from_metadata_family(metadata.family()) {
            info!(
                family = family.name(),
                version = ?metadata.version(),
                "Detected a {} distro from tree metadata",
                family.name()
            );
            return Ok(DistroDescriptor::new(family, ctx).with_metadata(metadata.clone()));
        }
        debug!(family = metadata.family(), "unrecognised metadata family");
    }

    for family in candidates(hint) {
        if let Some(descriptor) = family.probe(session, ctx, metadata.as_ref())? {
            info!(family = family.name(), location = %ctx.location, "classified install tree");
            return Ok(descriptor);
        }
    }

    Err(Error::NoDistroFound {
        location: ctx.location.clone(),
    })
}

/// Families to probe, in priority order.
fn candidates(hint: Option<&str>) -> impl Iterator<Item = Family> + '_ {
    Family::PROBE_ORDER.into_iter().filter(move |family| match hint {
        None => true,
        Some(_) if *family == Family::Generic => true,
        Some(hint) => family.matches_hint(hint),
    })
}
