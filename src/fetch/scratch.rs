//! Uniquely named temporary files and directories in the scratch dir.
//!
//! Names carry a random suffix, so concurrent resolutions that share one
//! scratch directory never collide.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tempfile::{Builder, TempDir};
use tracing::warn;

use super::{FetchError, Progress};

fn scratch_error(dir: &Path) -> impl FnOnce(io::Error) -> FetchError + '_ {
    move |source| FetchError::Scratch {
        dir: dir.to_path_buf(),
        source,
    }
}

/// Copy `reader` into a new file named `<suggested_name>.<random>` in `dir`.
///
/// The file survives this call. On error nothing is left behind.
pub fn persist_reader(
    dir: &Path,
    suggested_name: &str,
    reader: &mut dyn Read,
) -> Result<PathBuf, FetchError> {
    let mut file = Builder::new()
        .prefix(&format!("{suggested_name}."))
        .tempfile_in(dir)
        .map_err(scratch_error(dir))?;
    io::copy(reader, file.as_file_mut()).map_err(scratch_error(dir))?;
    let (_, path) = file
        .keep()
        .map_err(|e| scratch_error(dir)(e.error))?;
    Ok(path)
}

/// Create a staging directory that is removed when dropped.
pub fn staging_dir(dir: &Path, prefix: &str) -> Result<TempDir, FetchError> {
    Builder::new()
        .prefix(prefix)
        .tempdir_in(dir)
        .map_err(scratch_error(dir))
}

/// Delete a scratch file, tolerating one that is already gone.
pub(crate) fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove temporary file");
        }
    }
}

/// [`Read`] adapter that reports bytes read to a [`Progress`].
pub struct ProgressReader<'a, R> {
    inner: R,
    progress: &'a mut dyn Progress,
    read: u64,
}

impl<'a, R: Read> ProgressReader<'a, R> {
    pub fn new(inner: R, progress: &'a mut dyn Progress) -> Self {
        Self {
            inner,
            progress,
            read: 0,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.read
    }
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read += n as u64;
        self.progress.update(self.read);
        Ok(n)
    }
}
