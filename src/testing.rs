//! In-memory install trees for tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::fetch::scratch::persist_reader;
use crate::fetch::{FetchError, Fetcher, FetcherKind, FetcherProvider, Progress};

#[derive(Debug, Default)]
pub(crate) struct FetchLog {
    pub prepared: usize,
    pub cleaned: usize,
    pub acquired: Vec<String>,
    pub opened_kind: Option<FetcherKind>,
}

#[derive(Clone)]
pub(crate) struct MemoryFetcher {
    location: String,
    scratch_dir: PathBuf,
    files: BTreeMap<String, Vec<u8>>,
    failing: BTreeSet<String>,
    fail_prepare: bool,
    log: Rc<RefCell<FetchLog>>,
}

impl MemoryFetcher {
    pub fn new(location: &str, scratch_dir: &Path) -> Self {
        Self {
            location: location.to_string(),
            scratch_dir: scratch_dir.to_path_buf(),
            files: BTreeMap::new(),
            failing: BTreeSet::new(),
            fail_prepare: false,
            log: Rc::default(),
        }
    }

    pub fn with_file(mut self, path: &str, contents: impl AsRef<[u8]>) -> Self {
        self.files
            .insert(path.to_string(), contents.as_ref().to_vec());
        self
    }

    pub fn with_files(mut self, paths: &[&str]) -> Self {
        for path in paths {
            self.files.insert(path.to_string(), path.as_bytes().to_vec());
        }
        self
    }

    /// `path` exists but fetching it fails with a transport error.
    pub fn failing_on(mut self, path: &str) -> Self {
        self.failing.insert(path.to_string());
        self
    }

    pub fn failing_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    pub fn log(&self) -> Rc<RefCell<FetchLog>> {
        Rc::clone(&self.log)
    }
}

impl Fetcher for MemoryFetcher {
    fn location(&self) -> &str {
        &self.location
    }

    fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    fn prepare_location(&mut self) -> Result<(), FetchError> {
        if self.fail_prepare {
            return Err(FetchError::Location {
                location: self.location.clone(),
                reason: "mount failed".to_string(),
            });
        }
        self.log.borrow_mut().prepared += 1;
        Ok(())
    }

    fn cleanup_location(&mut self) -> Result<(), FetchError> {
        self.log.borrow_mut().cleaned += 1;
        Ok(())
    }

    fn has_file(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.failing.contains(path)
    }

    fn acquire_file(&self, path: &str, progress: &mut dyn Progress) -> Result<PathBuf, FetchError> {
        self.log.borrow_mut().acquired.push(path.to_string());
        if self.failing.contains(path) {
            return Err(FetchError::Transport {
                location: self.location.clone(),
                path: path.to_string(),
                source: io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"),
            });
        }
        let Some(contents) = self.files.get(path) else {
            return Err(FetchError::NotFound {
                location: self.location.clone(),
                path: path.to_string(),
            });
        };
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        progress.start(Some(contents.len() as u64), &name);
        let local = persist_reader(&self.scratch_dir, &name, &mut contents.as_slice())?;
        progress.end(contents.len() as u64);
        Ok(local)
    }
}

/// Provider that always hands out a clone of one [`MemoryFetcher`].
pub(crate) struct MemoryProvider {
    fetcher: MemoryFetcher,
}

impl MemoryProvider {
    pub fn new(fetcher: MemoryFetcher) -> Self {
        Self { fetcher }
    }
}

impl FetcherProvider for MemoryProvider {
    fn open(
        &self,
        kind: FetcherKind,
        location: &str,
        scratch_dir: &Path,
    ) -> Result<Box<dyn Fetcher>, FetchError> {
        let mut fetcher = self.fetcher.clone();
        fetcher.location = location.to_string();
        fetcher.scratch_dir = scratch_dir.to_path_buf();
        fetcher.log.borrow_mut().opened_kind = Some(kind);
        Ok(Box::new(fetcher))
    }
}

/// Files left in a scratch directory.
pub(crate) fn scratch_entries(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|rd| rd.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default();
    entries.sort();
    entries
}
