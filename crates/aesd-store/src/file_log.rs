use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::seek::{self, SeekTo};

/// Unbounded, append-only log kept in a plain file.
///
/// Record boundaries and the running total of concatenated bytes are kept
/// in memory so absolute and seek-by-command addressing never rescan the
/// file. Existing content is indexed line by line on open.
#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    file: File,
    record_lens: Vec<usize>,
    total_len: u64,
    remove_on_exit: bool,
}

impl FileLog {
    /// Open (or create) the log at `path`.
    ///
    /// With `remove_on_exit`, [`FileLog::teardown`] deletes the file.
    pub fn open(path: &Path, remove_on_exit: bool) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let (record_lens, total_len) = index_lines(&mut file)?;

        info!(path = %path.display(), records = record_lens.len(), total_len, "file log opened");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            record_lens,
            total_len,
            remove_on_exit,
        })
    }

    /// Append one record. Returns the offset it was written at.
    pub fn append(&mut self, record: &[u8]) -> StoreResult<u64> {
        let offset = self.total_len;
        if let Err(e) = self.file.write_all(record).and_then(|()| self.file.flush()) {
            self.rollback(offset);
            return Err(e.into());
        }
        self.record_lens.push(record.len());
        self.total_len += record.len() as u64;
        debug!(offset, len = record.len(), "file log append");
        Ok(offset)
    }

    /// Drop whatever a failed append left past `offset`. If the file cannot
    /// be truncated, the in-memory index is rebuilt from its contents.
    fn rollback(&mut self, offset: u64) {
        match self.file.set_len(offset) {
            Ok(()) => debug!(offset, "file log append rolled back"),
            Err(e) => {
                warn!(offset, error = %e, "cannot truncate file log; reindexing");
                match index_lines(&mut self.file) {
                    Ok((record_lens, total_len)) => {
                        self.record_lens = record_lens;
                        self.total_len = total_len;
                    }
                    Err(e) => warn!(error = %e, "cannot reindex file log"),
                }
            }
        }
    }

    /// Fill `buf` from absolute `offset`. Returns 0 at or past the end.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> StoreResult<usize> {
        if offset >= self.total_len || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min((self.total_len - offset) as usize);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf[..want])?;
        Ok(want)
    }

    pub fn translate(&self, request: SeekTo) -> StoreResult<u64> {
        seek::translate_lengths(self.record_lens.iter().copied(), usize::MAX, request)
    }

    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    pub fn record_count(&self) -> usize {
        self.record_lens.len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the backing file if it was opened as transient.
    pub fn teardown(&mut self) -> StoreResult<()> {
        if !self.remove_on_exit {
            debug!(path = %self.path.display(), "file log kept");
            return Ok(());
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "file log removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "file log already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Record lengths and total size of the lines already in `file`.
fn index_lines(file: &mut File) -> StoreResult<(Vec<usize>, u64)> {
    let mut existing = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut existing)?;
    let record_lens = existing
        .split_inclusive(|b| *b == b'\n')
        .map(<[u8]>::len)
        .collect();
    Ok((record_lens, existing.len() as u64))
}
