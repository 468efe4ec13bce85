//! One resolution's worth of access to an install tree.
//!
//! A [`FetchSession`] brackets the fetcher between `prepare_location` and
//! `cleanup_location`, and tracks every temporary file it hands out. Files
//! still tracked when the session ends are deleted, so an error anywhere in
//! a resolution leaves no partial downloads behind. Files the caller wants
//! to keep are explicitly [`release`](FetchSession::release)d.

use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::scratch::remove_quietly;
use super::{Fetcher, Progress};
use crate::error::{Error, Result};

pub struct FetchSession<'p> {
    fetcher: Box<dyn Fetcher>,
    progress: &'p mut dyn Progress,
    temp_files: Vec<PathBuf>,
    prepared: bool,
}

impl<'p> FetchSession<'p> {
    /// Prepare the fetcher's location and start tracking temp files.
    ///
    /// A location that cannot be prepared is reported as
    /// [`Error::InvalidInstallLocation`].
    pub fn open(mut fetcher: Box<dyn Fetcher>, progress: &'p mut dyn Progress) -> Result<Self> {
        if let Err(e) = fetcher.prepare_location() {
            return Err(Error::InvalidInstallLocation {
                location: fetcher.location().to_string(),
                reason: e.to_string(),
            });
        }
        debug!(location = fetcher.location(), "prepared install location");
        Ok(Self {
            fetcher,
            progress,
            temp_files: Vec::new(),
            prepared: true,
        })
    }

    pub fn fetcher(&self) -> &dyn Fetcher {
        self.fetcher.as_ref()
    }

    pub fn location(&self) -> &str {
        self.fetcher.location()
    }

    pub fn scratch_dir(&self) -> &Path {
        self.fetcher.scratch_dir()
    }

    pub fn progress(&mut self) -> &mut dyn Progress {
        &mut *self.progress
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.fetcher.has_file(path)
    }

    /// Fetch `path` into a tracked temp file.
    pub fn acquire(&mut self, path: &str) -> Result<PathBuf> {
        let local = self.fetcher.acquire_file(path, &mut *self.progress)?;
        debug!(path, local = %local.display(), "acquired file");
        self.temp_files.push(local.clone());
        Ok(local)
    }

    /// Persist a stream into a tracked temp file.
    pub fn save_temp(&mut self, reader: &mut dyn Read, suggested_name: &str) -> Result<PathBuf> {
        let local = self.fetcher.save_temp(reader, suggested_name)?;
        self.temp_files.push(local.clone());
        Ok(local)
    }

    /// Delete a tracked temp file now.
    pub fn discard(&mut self, path: &Path) {
        self.temp_files.retain(|p| p != path);
        remove_quietly(path);
    }

    /// Stop tracking `path`; the caller now owns the file.
    pub fn release(&mut self, path: &Path) -> PathBuf {
        self.temp_files.retain(|p| p != path);
        path.to_path_buf()
    }

    /// Temp files that would be deleted if the session ended now.
    #[cfg(test)]
    pub(crate) fn tracked(&self) -> &[PathBuf] {
        &self.temp_files
    }

    /// Delete every tracked temp file.
    pub fn rollback(&mut self) {
        for path in self.temp_files.drain(..) {
            debug!(path = %path.display(), "removing temporary file");
            remove_quietly(&path);
        }
    }

    /// End the session: roll back leftovers and clean up the location.
    pub fn close(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        self.rollback();
        if self.prepared {
            self.prepared = false;
            if let Err(e) = self.fetcher.cleanup_location() {
                warn!(location = self.fetcher.location(), error = %e, "failed to clean up install location");
            }
        }
    }
}

impl Drop for FetchSession<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::NoProgress;
    use crate::testing::MemoryFetcher;

    #[test]
    fn acquired_files_are_removed_unless_released() {
        let scratch = tempfile::tempdir().unwrap();
        let fetcher = MemoryFetcher::new("http://mirror/os/", scratch.path())
            .with_file("a", "alpha")
            .with_file("b", "beta");
        let log = fetcher.log();
        let mut progress = NoProgress;

        let mut session = FetchSession::open(Box::new(fetcher), &mut progress).unwrap();
        let a = session.acquire("a").unwrap();
        let b = session.acquire("b").unwrap();
        let kept = session.release(&b);
        assert_eq!(session.tracked(), &[a.clone()]);
        session.close();

        assert!(!a.exists());
        assert!(kept.exists());
        assert_eq!(log.borrow().prepared, 1);
        assert_eq!(log.borrow().cleaned, 1);
    }

    #[test]
    fn drop_cleans_up_location_once() {
        let scratch = tempfile::tempdir().unwrap();
        let fetcher = MemoryFetcher::new("http://mirror/os/", scratch.path()).with_file("a", "x");
        let log = fetcher.log();
        let mut progress = NoProgress;
        {
            let mut session = FetchSession::open(Box::new(fetcher), &mut progress).unwrap();
            session.acquire("a").unwrap();
        }
        assert_eq!(log.borrow().cleaned, 1);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn prepare_failure_is_invalid_location() {
        let scratch = tempfile::tempdir().unwrap();
        let fetcher = MemoryFetcher::new("nfs:server:/os", scratch.path()).failing_prepare();
        let log = fetcher.log();
        let mut progress = NoProgress;
        let err = FetchSession::open(Box::new(fetcher), &mut progress)
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidInstallLocation { .. }));
        assert_eq!(log.borrow().cleaned, 0);
    }

    #[test]
    fn discard_removes_immediately() {
        let scratch = tempfile::tempdir().unwrap();
        let fetcher = MemoryFetcher::new("http://mirror/os/", scratch.path()).with_file("a", "x");
        let mut progress = NoProgress;
        let mut session = FetchSession::open(Box::new(fetcher), &mut progress).unwrap();
        let a = session.acquire("a").unwrap();
        session.discard(&a);
        assert!(!a.exists());
        assert!(session.tracked().is_empty());
    }
}
