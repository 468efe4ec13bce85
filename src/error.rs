//! Error taxonomy for install-tree resolution.
//!
//! Only [`Error::MetadataParse`] is ever downgraded (to a heuristic fallback)
//! inside the crate. Everything else unwinds to the caller after the fetch
//! session has rolled back its temporary files.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::arch::VirtType;
use crate::fetch::FetchError;
use crate::treeinfo::MetadataParseError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// What a media lookup was trying to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Kernel,
    BootIso,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Kernel => write!(f, "kernel"),
            MediaKind::BootIso => write!(f, "boot ISO"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid install location '{location}': {reason}")]
    InvalidInstallLocation { location: String, reason: String },

    #[error("could not find an installable distribution at '{location}'")]
    NoDistroFound { location: String },

    #[error("couldn't find {} {media} for {distro} tree", virt_label(.virt_type))]
    MediaNotFound {
        distro: String,
        virt_type: Option<VirtType>,
        media: MediaKind,
    },

    #[error(transparent)]
    MetadataParse(#[from] MetadataParseError),

    #[error("failed to parse RPM package listing: {detail}")]
    RpmIndexParse { detail: String },

    #[error("{tool} failed: {detail}")]
    SynthesisTool { tool: String, detail: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Media lookups failing is an expected outcome the caller may recover
    /// from (another family, another mirror).
    pub fn is_media_not_found(&self) -> bool {
        matches!(self, Error::MediaNotFound { .. })
    }

    pub(crate) fn tool(tool: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::SynthesisTool {
            tool: tool.into(),
            detail: detail.into(),
        }
    }
}

fn virt_label(virt_type: &Option<VirtType>) -> &'static str {
    match virt_type {
        Some(virt) => virt.as_str(),
        None => "any",
    }
}

/// `with_context` for plain I/O results, in the manner of `anyhow::Context`.
pub(crate) trait IoContext<T> {
    fn io_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|source| Error::Io {
            context: f().into(),
            source,
        })
    }
}
