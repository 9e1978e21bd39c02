//! Run-scoped scratch storage for IO-bound workloads.
//!
//! The backing file is created at Start and deleted as soon as the owning
//! `ScratchResource` is dropped (Stop, Complete, Error or task removal).

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::worker::state::TaskId;

/// Temporary file exclusively owned by one run of one task.
#[derive(Debug)]
pub struct ScratchResource {
    path: TempPath,
    len: u64,
}

impl ScratchResource {
    /// Create a zero-filled scratch file of `len` bytes inside `dir`.
    pub fn create(dir: &Path, task_id: TaskId, len: u64) -> std::io::Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(&format!("worker-{task_id}-"))
            .suffix(".scratch")
            .tempfile_in(dir)?;
        file.as_file().set_len(len)?;

        Ok(Self {
            path: file.into_temp_path(),
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Cheap handle the run loop can use without holding the task lock.
    pub fn handle(&self) -> ScratchHandle {
        ScratchHandle {
            path: self.path.to_path_buf(),
            len: self.len,
        }
    }
}

/// Path and size of a scratch file. IO through a handle fails once the
/// owning resource has been released.
#[derive(Debug, Clone)]
pub struct ScratchHandle {
    path: PathBuf,
    len: u64,
}

impl ScratchHandle {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read up to `len` bytes at `offset`. Returns the number of bytes read.
    pub async fn read_at(&self, offset: u64, len: usize) -> std::io::Result<usize> {
        let mut file = OpenOptions::new().read(true).open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buffer = vec![0u8; len];
        file.read(&mut buffer).await
    }

    /// Write `data` at `offset`.
    pub async fn write_at(&self, offset: u64, data: &[u8]) -> std::io::Result<()> {
        let mut file = OpenOptions::new().write(true).open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await
    }
}
