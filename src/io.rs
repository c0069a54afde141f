//! File I/O for log groups and the tablespace collaborator seam.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{LogError, Result};
use crate::log::Lsn;

/// Tag distinguishing the kinds of log I/O on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoCompletion {
    /// A regular log buffer write.
    NormalWrite,
    /// A checkpoint record write for the given group.
    CheckpointWrite(u32),
}

/// The ring of equally sized files backing one log group.
///
/// Callers address bytes by their real offset within the group; a write
/// or read never crosses a file boundary (the group geometry splits
/// I/Os beforehand).
pub struct LogSpace {
    dir: PathBuf,
    files: Vec<Mutex<File>>,
    file_size: u64,
}

impl LogSpace {
    /// Creates or opens the file ring under `dir`.
    ///
    /// Missing files are created and extended to `file_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be created, opened or sized.
    pub fn open(dir: &Path, n_files: u32, file_size: u64) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| {
            LogError::Io(format!(
                "Failed to create log directory {}: {e}",
                dir.display()
            ))
        })?;

        let mut files = Vec::with_capacity(n_files as usize);
        for i in 0..n_files {
            let path = dir.join(format!("redo{i:02}"));
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .map_err(|e| {
                    LogError::Io(format!("Failed to open log file {}: {e}", path.display()))
                })?;

            let len = file
                .metadata()
                .map_err(|e| {
                    LogError::Io(format!("Failed to stat log file {}: {e}", path.display()))
                })?
                .len();
            if len < file_size {
                file.set_len(file_size).map_err(|e| {
                    LogError::Io(format!("Failed to size log file {}: {e}", path.display()))
                })?;
            }

            files.push(Mutex::new(file));
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            file_size,
        })
    }

    /// Returns the directory holding the file ring.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `buf` at a real offset within the group.
    ///
    /// # Errors
    ///
    /// Returns an error if the write crosses a file boundary or fails.
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let (file_no, in_file) = self.locate(offset, buf.len() as u64)?;

        let mut file = self.files[file_no].lock();
        file.seek(SeekFrom::Start(in_file))
            .map_err(|e| LogError::Io(format!("Failed to seek log file {file_no}: {e}")))?;
        file.write_all(buf)
            .map_err(|e| LogError::Io(format!("Failed to write log file {file_no}: {e}")))?;

        Ok(())
    }

    /// Reads `buf.len()` bytes from a real offset within the group.
    ///
    /// # Errors
    ///
    /// Returns an error if the read crosses a file boundary or fails.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let (file_no, in_file) = self.locate(offset, buf.len() as u64)?;

        let mut file = self.files[file_no].lock();
        file.seek(SeekFrom::Start(in_file))
            .map_err(|e| LogError::Io(format!("Failed to seek log file {file_no}: {e}")))?;
        file.read_exact(buf)
            .map_err(|e| LogError::Io(format!("Failed to read log file {file_no}: {e}")))?;

        Ok(())
    }

    /// Syncs every file of the ring to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if any fsync fails.
    pub fn flush(&self) -> Result<()> {
        for (i, file) in self.files.iter().enumerate() {
            file.lock()
                .sync_all()
                .map_err(|e| LogError::Io(format!("Failed to sync log file {i}: {e}")))?;
        }
        Ok(())
    }

    fn locate(&self, offset: u64, len: u64) -> Result<(usize, u64)> {
        let file_no = (offset / self.file_size) as usize;
        let in_file = offset % self.file_size;

        if file_no >= self.files.len() || in_file + len > self.file_size {
            return Err(LogError::Io(format!(
                "log I/O of {len} bytes at group offset {offset} falls outside the file ring"
            )));
        }
        Ok((file_no, in_file))
    }
}

/// Tablespace-side collaborator of the log engine.
///
/// The engine only ever asks the tablespace layer to flush files, stamp
/// the flushed LSN into data files, re-emit file-name records before a
/// checkpoint, and close everything at shutdown.
pub trait Tablespaces: Send + Sync {
    /// Flushes all data files to disk.
    fn flush_data_files(&self) -> Result<()> {
        Ok(())
    }

    /// Flushes all log files to disk.
    fn flush_log_files(&self) -> Result<()> {
        Ok(())
    }

    /// Stamps the flushed LSN into the data file headers at shutdown.
    fn write_flushed_lsn(&self, _lsn: Lsn) -> Result<()> {
        Ok(())
    }

    /// Re-emits tablespace-name records ahead of a checkpoint.
    ///
    /// Returns true if records were written to the log, in which case
    /// the engine appends a checkpoint marker and adopts the advanced
    /// LSN as its flush target.
    fn names_clear(&self, _flush_lsn: Lsn, _do_write: bool) -> bool {
        false
    }

    /// Closes all tablespace files.
    fn close_all(&self) -> Result<()> {
        Ok(())
    }
}

/// Tablespace collaborator with nothing to manage; used when the log
/// engine runs standalone.
pub struct NoTablespaces;

impl Tablespaces for NoTablespaces {}
