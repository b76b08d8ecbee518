use crate::device::LogDevice;
use crate::error::StoreResult;
use crate::file_log::FileLog;
use crate::seek::SeekTo;

/// Backing store behind the network service.
///
/// Implementations perform no locking of their own; every call is made with
/// the service's single access lock held.
pub trait LogBackend: Send {
    /// Short name used in logs.
    fn kind(&self) -> &'static str;

    /// Commit one newline-terminated record.
    fn append(&mut self, record: &[u8]) -> StoreResult<()>;

    /// Fill `buf` starting at absolute `offset` of the concatenated log.
    ///
    /// Returns 0 at or beyond the end. May return fewer bytes than `buf`
    /// holds without being at the end.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> StoreResult<usize>;

    /// Resolve `(record index, offset in record)` to an absolute offset.
    fn translate(&self, request: SeekTo) -> StoreResult<u64>;

    /// Length of the concatenated log.
    fn total_len(&self) -> u64;

    /// Whether the periodic timestamp writer applies to this backing.
    fn accepts_timestamps(&self) -> bool {
        false
    }

    /// Release storage at shutdown.
    fn teardown(&mut self) -> StoreResult<()>;
}

impl LogBackend for LogDevice {
    fn kind(&self) -> &'static str {
        "ring"
    }

    fn append(&mut self, record: &[u8]) -> StoreResult<()> {
        let mut rest = record;
        while !rest.is_empty() {
            let consumed = self.write(rest);
            rest = &rest[consumed..];
        }
        Ok(())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> StoreResult<usize> {
        Ok(self.read_into(offset, buf))
    }

    fn translate(&self, request: SeekTo) -> StoreResult<u64> {
        LogDevice::translate(self, request)
    }

    fn total_len(&self) -> u64 {
        LogDevice::total_len(self)
    }

    fn teardown(&mut self) -> StoreResult<()> {
        let released = self.clear();
        tracing::debug!(released, "ring cleared");
        Ok(())
    }
}

impl LogBackend for FileLog {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn append(&mut self, record: &[u8]) -> StoreResult<()> {
        FileLog::append(self, record).map(|_| ())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> StoreResult<usize> {
        FileLog::read_at(self, offset, buf)
    }

    fn translate(&self, request: SeekTo) -> StoreResult<u64> {
        FileLog::translate(self, request)
    }

    fn total_len(&self) -> u64 {
        FileLog::total_len(self)
    }

    fn accepts_timestamps(&self) -> bool {
        true
    }

    fn teardown(&mut self) -> StoreResult<()> {
        FileLog::teardown(self)
    }
}
