//! Fetcher capability consumed by the resolution engine.
//!
//! Transport clients (HTTP, FTP, NFS mounts) live outside this crate. They
//! plug in by implementing [`Fetcher`] and being handed out by a
//! [`FetcherProvider`]. The only built-in transport is [`DirectFetcher`],
//! which reads an install tree that is already a local directory.

pub mod direct;
pub mod scratch;
pub mod session;

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use direct::DirectFetcher;
pub use session::FetchSession;

/// Failure reported by a [`Fetcher`]. Propagated unchanged by the engine.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("'{path}' not found at {location}")]
    NotFound { location: String, path: String },

    #[error("failed to fetch '{path}' from {location}: {source}")]
    Transport {
        location: String,
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("{location}: {reason}")]
    Location { location: String, reason: String },

    #[error("failed to write temporary file in '{}': {source}", dir.display())]
    Scratch {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Observer for long-running transfers. Has no effect on control flow.
pub trait Progress {
    fn start(&mut self, size: Option<u64>, text: &str);
    fn update(&mut self, current: u64);
    fn end(&mut self, total: u64);
}

/// Progress sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn start(&mut self, _size: Option<u64>, _text: &str) {}
    fn update(&mut self, _current: u64) {}
    fn end(&mut self, _total: u64) {}
}

/// Access to one install tree.
///
/// Paths handed to a fetcher are relative to the tree root.
pub trait Fetcher {
    /// Human-readable source identifier, used in generated boot arguments.
    fn location(&self) -> &str;

    /// Directory temporary files are written into.
    fn scratch_dir(&self) -> &Path;

    /// Mount or connect. Called once before any other access.
    fn prepare_location(&mut self) -> Result<(), FetchError> {
        Ok(())
    }

    /// Unmount or disconnect. Called once, whatever the outcome.
    fn cleanup_location(&mut self) -> Result<(), FetchError> {
        Ok(())
    }

    fn has_file(&self, path: &str) -> bool;

    /// Copy `path` into a new uniquely named file in the scratch dir.
    fn acquire_file(&self, path: &str, progress: &mut dyn Progress) -> Result<PathBuf, FetchError>;

    /// Persist a byte stream as a uniquely named file in the scratch dir.
    fn save_temp(&self, reader: &mut dyn Read, suggested_name: &str) -> Result<PathBuf, FetchError> {
        scratch::persist_reader(self.scratch_dir(), suggested_name, reader)
    }
}

/// Which transport a location calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetcherKind {
    Http,
    Ftp,
    /// NFS export, mounted locally for the session.
    Nfs,
    /// Local directory read in place.
    Direct,
    /// Anything else (ISO image, block device), mounted as a last resort.
    Mounted,
}

impl FetcherKind {
    pub fn for_location(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            FetcherKind::Http
        } else if location.starts_with("ftp://") {
            FetcherKind::Ftp
        } else if location.starts_with("nfs://") || location.starts_with("nfs:") {
            FetcherKind::Nfs
        } else if Path::new(location).is_dir() {
            FetcherKind::Direct
        } else {
            FetcherKind::Mounted
        }
    }
}

/// Hands out a fetcher for a location. Implemented by the host application.
pub trait FetcherProvider {
    fn open(
        &self,
        kind: FetcherKind,
        location: &str,
        scratch_dir: &Path,
    ) -> Result<Box<dyn Fetcher>, FetchError>;
}

/// Provider that only understands local directories.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalProvider;

impl FetcherProvider for LocalProvider {
    fn open(
        &self,
        kind: FetcherKind,
        location: &str,
        scratch_dir: &Path,
    ) -> Result<Box<dyn Fetcher>, FetchError> {
        match kind {
            FetcherKind::Direct => Ok(Box::new(DirectFetcher::new(location, scratch_dir))),
            other => Err(FetchError::Location {
                location: location.to_string(),
                reason: format!("no {other:?} fetcher available"),
            }),
        }
    }
}

/// Whether `location` names a network install source rather than a path.
pub fn is_network_location(location: &str) -> bool {
    (location.starts_with("http://")
        || location.starts_with("https://")
        || location.starts_with("ftp://")
        || location.starts_with("nfs:"))
        && !Path::new(location).exists()
}

/// Canonicalize a location into the form installers expect.
///
/// `nfs://server/path` becomes `nfs:server:/path`. Other locations pass
/// through untouched.
pub fn sanitize_location(location: &str) -> Result<String, FetchError> {
    let Some(rest) = location.strip_prefix("nfs://") else {
        return Ok(location.to_string());
    };

    let Some(index) = rest.find('/') else {
        return Err(FetchError::Location {
            location: location.to_string(),
            reason: "invalid NFS format: no path specified".to_string(),
        });
    };

    let (server, path) = rest.split_at(index);
    let server = server.strip_suffix(':').unwrap_or(server);
    Ok(format!("nfs:{server}:{path}"))
}
