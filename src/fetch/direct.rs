//! Fetcher for install trees that are already a local directory.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use super::scratch::{persist_reader, ProgressReader};
use super::{FetchError, Fetcher, Progress};

#[derive(Debug, Clone)]
pub struct DirectFetcher {
    location: String,
    root: PathBuf,
    scratch_dir: PathBuf,
}

impl DirectFetcher {
    pub fn new(location: &str, scratch_dir: &Path) -> Self {
        Self {
            location: location.to_string(),
            root: PathBuf::from(location),
            scratch_dir: scratch_dir.to_path_buf(),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl Fetcher for DirectFetcher {
    fn location(&self) -> &str {
        &self.location
    }

    fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    fn prepare_location(&mut self) -> Result<(), FetchError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(FetchError::Location {
                location: self.location.clone(),
                reason: "not a directory".to_string(),
            })
        }
    }

    fn has_file(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }

    fn acquire_file(&self, path: &str, progress: &mut dyn Progress) -> Result<PathBuf, FetchError> {
        let source = self.resolve(path);
        let file = File::open(&source).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                FetchError::NotFound {
                    location: self.location.clone(),
                    path: path.to_string(),
                }
            } else {
                FetchError::Transport {
                    location: self.location.clone(),
                    path: path.to_string(),
                    source: e,
                }
            }
        })?;
        let size = file.metadata().ok().map(|m| m.len());
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        progress.start(size, &format!("Retrieving file {name}..."));
        let mut reader = ProgressReader::new(file, progress);
        let local = persist_reader(&self.scratch_dir, &name, &mut reader)?;
        let total = reader.bytes_read();
        progress.end(total);
        Ok(local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::NoProgress;
    use std::fs;

    fn tree() -> (tempfile::TempDir, tempfile::TempDir) {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("images/pxeboot")).unwrap();
        fs::write(root.path().join("images/pxeboot/vmlinuz"), "kernel").unwrap();
        (root, tempfile::tempdir().unwrap())
    }

    #[test]
    fn acquires_into_scratch() {
        let (root, scratch) = tree();
        let location = root.path().to_string_lossy().to_string();
        let mut fetcher = DirectFetcher::new(&location, scratch.path());
        fetcher.prepare_location().unwrap();

        assert!(fetcher.has_file("images/pxeboot/vmlinuz"));
        assert!(!fetcher.has_file("images/pxeboot/initrd.img"));

        let local = fetcher
            .acquire_file("images/pxeboot/vmlinuz", &mut NoProgress)
            .unwrap();
        assert!(local.starts_with(scratch.path()));
        assert_eq!(fs::read_to_string(&local).unwrap(), "kernel");
    }

    #[test]
    fn missing_file_is_not_found() {
        let (root, scratch) = tree();
        let location = root.path().to_string_lossy().to_string();
        let fetcher = DirectFetcher::new(&location, scratch.path());
        let err = fetcher
            .acquire_file("images/boot.iso", &mut NoProgress)
            .unwrap_err();
        assert!(matches!(err, FetchError::NotFound { .. }));
    }

    #[test]
    fn prepare_rejects_non_directories() {
        let scratch = tempfile::tempdir().unwrap();
        let mut fetcher = DirectFetcher::new("/definitely/not/a/tree", scratch.path());
        assert!(fetcher.prepare_location().is_err());
    }
}
