//! Writer exclusivity for a share.
//!
//! Cross-platform (fs2) advisory lock on `<dir>/<name>.lock`:
//! - Exclusive: держит единственный писатель региона, пока жив Share.
//! - читатели lock-файл не трогают.
//!
//! Lock is released on Drop.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use super::ShareError;

pub struct WriterLock {
    file: std::fs::File,
    path: PathBuf,
}

impl WriterLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        // fs2 unlock errors on drop are ignored deliberately.
        let _ = self.file.unlock();
    }
}

fn open_lock_file(path: &Path) -> Result<std::fs::File> {
    let f = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("open lock file {}", path.display()))?;
    Ok(f)
}

/// Try to take the writer lock. WriterBusy if another Share already holds it.
pub fn try_acquire_writer(name: &str, path: &Path) -> Result<WriterLock> {
    let file = open_lock_file(path)?;
    if file.try_lock_exclusive().is_err() {
        return Err(ShareError::WriterBusy {
            name: name.to_string(),
            lock: path.display().to_string(),
        }
        .into());
    }
    Ok(WriterLock {
        file,
        path: path.to_path_buf(),
    })
}
