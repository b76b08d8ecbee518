use std::io::SeekFrom;

use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::ring::{Record, RecordRing};
use crate::seek::{self, SeekTo};

/// Control commands accepted by [`DeviceFile::ioctl`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Reposition to `(record index, offset in record)`.
    SeekTo(SeekTo),
}

/// Character-device-style log: a [`RecordRing`] plus the partial write
/// that has not yet seen its terminating newline.
///
/// These are the entry points a device host shim calls: `open`, `release`,
/// `read`, `write`, and the per-handle `llseek`/`ioctl` on [`DeviceFile`].
/// All locking is the caller's responsibility.
#[derive(Debug, Default)]
pub struct LogDevice {
    ring: RecordRing,
    pending: Vec<u8>,
}

impl LogDevice {
    pub fn new(capacity: usize) -> StoreResult<Self> {
        Ok(Self {
            ring: RecordRing::new(capacity)?,
            pending: Vec::new(),
        })
    }

    /// Open a new handle positioned at the start of the log.
    pub fn open(&self) -> DeviceFile {
        debug!("device open");
        DeviceFile { pos: 0 }
    }

    /// Release a handle. Handles carry no shared state, so this only logs.
    pub fn release(&self, file: DeviceFile) {
        debug!(pos = file.pos, "device release");
    }

    /// Read up to `count` bytes starting at global `offset`.
    ///
    /// A read never crosses a record boundary; callers loop until an empty
    /// result, which signals end of log.
    pub fn read(&self, offset: u64, count: usize) -> Vec<u8> {
        match self.ring.locate(offset) {
            Some((record, within)) => {
                let available = &record.as_bytes()[within..];
                available[..available.len().min(count)].to_vec()
            }
            None => Vec::new(),
        }
    }

    /// Like [`LogDevice::read`], but fills `buf` and returns the byte count.
    pub fn read_into(&self, offset: u64, buf: &mut [u8]) -> usize {
        match self.ring.locate(offset) {
            Some((record, within)) => {
                let available = &record.as_bytes()[within..];
                let n = available.len().min(buf.len());
                buf[..n].copy_from_slice(&available[..n]);
                n
            }
            None => 0,
        }
    }

    /// Buffer `bytes` until a newline is seen, then commit everything
    /// accumulated through the newline as one record.
    ///
    /// Returns the number of bytes consumed: through the first newline when
    /// one is present, otherwise all of `bytes` (which stay buffered).
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        match bytes.iter().position(|b| *b == b'\n') {
            Some(newline) => {
                let consumed = newline + 1;
                self.pending.extend_from_slice(&bytes[..consumed]);
                let record = Record::new(std::mem::take(&mut self.pending));
                let len = record.len();
                if let Some(evicted) = self.ring.append(record) {
                    debug!(evicted = evicted.len(), "evicted oldest record");
                }
                debug!(len, records = self.ring.len(), "record committed");
                consumed
            }
            None => {
                self.pending.extend_from_slice(bytes);
                bytes.len()
            }
        }
    }

    /// Resolve `(record index, offset)` to an absolute offset.
    pub fn translate(&self, request: SeekTo) -> StoreResult<u64> {
        seek::translate(&self.ring, request)
    }

    /// Length of the oldest-first concatenation of all live records.
    pub fn total_len(&self) -> u64 {
        self.ring.total_len()
    }

    /// Oldest-first concatenation of all live records.
    pub fn contents(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_len() as usize);
        for record in self.ring.iter() {
            out.extend_from_slice(record.as_bytes());
        }
        out
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> + '_ {
        self.ring.iter()
    }

    pub fn ring(&self) -> &RecordRing {
        &self.ring
    }

    /// Bytes written since the last committed newline.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Drop all records and any partial write.
    pub fn clear(&mut self) -> usize {
        self.pending.clear();
        self.ring.clear()
    }
}

/// Per-open handle onto a [`LogDevice`], holding its own read position.
#[derive(Debug)]
pub struct DeviceFile {
    pos: u64,
}

impl DeviceFile {
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Read from the current position and advance past the returned bytes.
    pub fn read(&mut self, device: &LogDevice, count: usize) -> Vec<u8> {
        let data = device.read(self.pos, count);
        self.pos += data.len() as u64;
        data
    }

    pub fn write(&mut self, device: &mut LogDevice, bytes: &[u8]) -> usize {
        device.write(bytes)
    }

    /// Reposition relative to the start, current position, or end of the
    /// concatenated log.
    pub fn llseek(&mut self, device: &LogDevice, from: SeekFrom) -> StoreResult<u64> {
        let total_len = device.total_len();
        let requested: i128 = match from {
            SeekFrom::Start(pos) => pos as i128,
            SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
            SeekFrom::End(delta) => total_len as i128 + delta as i128,
        };
        if requested < 0 || requested > total_len as i128 {
            return Err(StoreError::InvalidPosition { requested, total_len });
        }
        self.pos = requested as u64;
        Ok(self.pos)
    }

    pub fn ioctl(&mut self, device: &LogDevice, command: DeviceCommand) -> StoreResult<u64> {
        match command {
            DeviceCommand::SeekTo(request) => {
                self.pos = device.translate(request)?;
                debug!(index = request.index, offset = request.offset, pos = self.pos, "seek to");
                Ok(self.pos)
            }
        }
    }
}
