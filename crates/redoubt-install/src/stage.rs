//! Atomic placement of verified artifacts.
//!
//! Content is written to a temporary file in the destination directory and
//! renamed over the final path only on [`StagedFile::commit`]. Until then
//! the previous installation, if any, is untouched; a staged file dropped
//! without committing is deleted.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;

const CHUNK_SIZE: usize = 8192;

/// A single point in time by which a whole install must finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(budget),
        }
    }

    /// No deadline.
    pub const fn none() -> Self {
        Self { at: None }
    }

    /// Time left, or `None` when unbounded. Zero once expired.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }
}

/// Errors while staging or committing a file.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// The deadline passed before the file was committed.
    #[error("deadline expired while writing")]
    DeadlineExpired,

    /// Filesystem failure.
    #[error("staging I/O error: {0}")]
    IoError(#[from] io::Error),
}

/// A file being written next to its final location.
#[derive(Debug)]
pub struct StagedFile {
    temp: NamedTempFile,
    final_path: PathBuf,
    written: u64,
}

impl StagedFile {
    /// Start staging content for `final_path`.
    ///
    /// The destination directory is created if missing.
    pub fn create(final_path: &Path) -> Result<Self, StageError> {
        let dir = final_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        if final_path.is_dir() {
            return Err(StageError::IoError(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} is a directory", final_path.display()),
            )));
        }

        let temp = tempfile::Builder::new()
            .prefix(".redoubt-")
            .suffix(".partial")
            .tempfile_in(dir)?;
        tracing::debug!(temp = %temp.path().display(), "staging file created");
        Ok(Self {
            temp,
            final_path: final_path.to_path_buf(),
            written: 0,
        })
    }

    /// Path of the temporary file.
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Where the file will land on commit.
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Copy `reader` into the staged file, checking `deadline` between chunks.
    pub fn write_from<R: Read>(
        &mut self,
        mut reader: R,
        deadline: &Deadline,
    ) -> Result<u64, StageError> {
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            if deadline.is_expired() {
                return Err(StageError::DeadlineExpired);
            }
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.temp.write_all(&buf[..n])?;
            self.written += n as u64;
        }
        Ok(self.written)
    }

    /// Make the file executable, flush it to disk, and rename it into place.
    pub fn commit(mut self, deadline: &Deadline) -> Result<PathBuf, StageError> {
        self.temp.flush()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            self.temp
                .as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o755))?;
        }
        self.temp.as_file().sync_all()?;

        if deadline.is_expired() {
            return Err(StageError::DeadlineExpired);
        }

        let final_path = self.final_path;
        self.temp
            .persist(&final_path)
            .map_err(|e| StageError::IoError(e.error))?;
        sync_parent(&final_path);
        tracing::info!(path = %final_path.display(), bytes = self.written, "installed");
        Ok(final_path)
    }
}

#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = std::fs::File::open(dir).and_then(|d| d.sync_all()) {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to sync install directory");
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}
