//! # Upload Staging
//!
//! The model reads audio from a path, so each upload is written to its own
//! temp file for the duration of one request.
//!
//! ## Lifecycle:
//! 1. [`StagedFile::create`] writes the bytes to a uniquely named file
//!    (`upload-XXXXXX.<suffix>`). If the write fails, the half-written file is
//!    removed before the error is returned.
//! 2. The handler passes [`StagedFile::path`] to the model.
//! 3. [`StagedFile::cleanup`] removes the file exactly once. A file that is
//!    already gone is not an error and a failed removal is only logged, so
//!    cleanup never changes the response.
//!
//! If a `StagedFile` is dropped without `cleanup` (a panic unwinding through
//! the handler), `Drop` performs the same removal.
//!
//! ## Rust Concepts:
//! - **RAII**: the file's lifetime is tied to a value; dropping it removes the file
//! - **Option::take()**: guarantees the removal runs at most once

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::TempPath;

const PREFIX: &str = "upload-";

/// One upload written to disk.
#[derive(Debug)]
pub struct StagedFile {
    path: Option<TempPath>,
}

impl StagedFile {
    /// Write `bytes` to a new temp file ending in `suffix`.
    ///
    /// ## Parameters:
    /// - **bytes**: upload content, written verbatim
    /// - **suffix**: extension including the dot (".wav")
    /// - **dir**: staging directory, `None` for the OS temp dir
    pub fn create(bytes: &[u8], suffix: &str, dir: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(PREFIX).suffix(suffix);

        let mut file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(bytes)?;
        file.flush()?;

        Ok(Self {
            path: Some(file.into_temp_path()),
        })
    }

    /// Where the staged bytes live.
    pub fn path(&self) -> &Path {
        // `path` is only emptied by `cleanup(self)` and `drop`, after which
        // no `&self` exists.
        self.path.as_deref().unwrap_or(Path::new(""))
    }

    /// Remove the file now.
    pub fn cleanup(mut self) {
        if let Some(path) = self.path.take() {
            remove(path);
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            remove(path);
        }
    }
}

fn remove(path: TempPath) {
    let shown: PathBuf = path.to_path_buf();
    match path.close() {
        Ok(()) => tracing::debug!("Removed staged file {}", shown.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!("Staged file {} was already gone", shown.display())
        }
        Err(e) => tracing::warn!("Could not remove staged file {}: {}", shown.display(), e),
    }
}
