use std::fmt;

use crate::error::{StoreError, StoreResult};

/// Number of slots in a ring when no capacity is configured.
pub const DEFAULT_CAPACITY: usize = 10;

/// One committed unit of data. Immutable once constructed.
#[derive(Clone, PartialEq, Eq)]
pub struct Record {
    data: Box<[u8]>,
}

impl Record {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into().into_boxed_slice(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consume the record and hand back its payload.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data.into_vec()
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("len", &self.data.len())
            .field("data", &String::from_utf8_lossy(&self.data))
            .finish()
    }
}

/// Fixed-capacity circular array of records with overwrite-oldest eviction.
///
/// Slots between the read cursor (oldest live record) and the write cursor
/// (next slot to fill) hold live records. When `full`, every slot is live
/// and both cursors point at the same slot.
///
/// The ring owns its payloads, but never drops one implicitly on overwrite:
/// [`RecordRing::append`] hands the displaced record back to the caller.
/// Any locking is the caller's responsibility.
pub struct RecordRing {
    slots: Vec<Option<Record>>,
    write_cursor: usize,
    read_cursor: usize,
    full: bool,
}

impl RecordRing {
    /// Create an empty ring with `capacity` slots.
    pub fn new(capacity: usize) -> StoreResult<Self> {
        if capacity == 0 {
            return Err(StoreError::ZeroCapacity);
        }
        Ok(Self {
            slots: (0..capacity).map(|_| None).collect(),
            write_cursor: 0,
            read_cursor: 0,
            full: false,
        })
    }

    /// Store `record` at the write cursor.
    ///
    /// Returns the record that was displaced when the ring was already full,
    /// `None` otherwise. Exactly one record is returned per call once full.
    pub fn append(&mut self, record: Record) -> Option<Record> {
        let was_full = self.full;
        let evicted = self.slots[self.write_cursor].replace(record);
        debug_assert_eq!(evicted.is_some(), was_full);

        self.write_cursor = self.advance(self.write_cursor);
        if was_full {
            self.read_cursor = self.advance(self.read_cursor);
        }
        self.full = self.write_cursor == self.read_cursor;
        evicted
    }

    /// Find the record holding byte `offset` of the oldest-first
    /// concatenation of all live records.
    ///
    /// Returns the record and the offset within it, or `None` when `offset`
    /// is not less than [`RecordRing::total_len`].
    pub fn locate(&self, offset: u64) -> Option<(&Record, usize)> {
        self.locate_index(offset)
            .and_then(|(index, within)| self.get(index).map(|record| (record, within)))
    }

    /// Like [`RecordRing::locate`], but reports the logical index (0 is the
    /// oldest live record) instead of a reference.
    pub fn locate_index(&self, offset: u64) -> Option<(usize, usize)> {
        let mut consumed: u64 = 0;
        for (index, record) in self.iter().enumerate() {
            let len = record.len() as u64;
            if consumed + len > offset {
                return Some((index, (offset - consumed) as usize));
            }
            consumed += len;
        }
        None
    }

    /// Live record at logical `index`, oldest first.
    pub fn get(&self, index: usize) -> Option<&Record> {
        if index >= self.len() {
            return None;
        }
        self.slots[self.physical(index)].as_ref()
    }

    /// Live records in commit order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Record> + '_ {
        (0..self.len()).filter_map(move |index| self.slots[self.physical(index)].as_ref())
    }

    /// Release every live payload and reset to empty. Returns how many
    /// records were released.
    pub fn clear(&mut self) -> usize {
        let released = self.slots.iter_mut().filter_map(Option::take).count();
        self.write_cursor = 0;
        self.read_cursor = 0;
        self.full = false;
        released
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        if self.full {
            self.capacity()
        } else {
            (self.write_cursor + self.capacity() - self.read_cursor) % self.capacity()
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.full && self.write_cursor == self.read_cursor
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Sum of the lengths of all live records.
    pub fn total_len(&self) -> u64 {
        self.iter().map(|record| record.len() as u64).sum()
    }

    /// Physical slot of the next append.
    pub fn write_cursor(&self) -> usize {
        self.write_cursor
    }

    /// Physical slot of the oldest live record.
    pub fn read_cursor(&self) -> usize {
        self.read_cursor
    }

    fn advance(&self, cursor: usize) -> usize {
        (cursor + 1) % self.capacity()
    }

    fn physical(&self, logical: usize) -> usize {
        (self.read_cursor + logical) % self.capacity()
    }
}

impl Default for RecordRing {
    fn default() -> Self {
        Self {
            slots: (0..DEFAULT_CAPACITY).map(|_| None).collect(),
            write_cursor: 0,
            read_cursor: 0,
            full: false,
        }
    }
}

impl fmt::Debug for RecordRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordRing")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("write_cursor", &self.write_cursor)
            .field("read_cursor", &self.read_cursor)
            .field("full", &self.full)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ring_with(capacity: usize, lines: &[&str]) -> RecordRing {
        let mut ring = RecordRing::new(capacity).unwrap();
        for line in lines {
            ring.append(Record::new(line.as_bytes()));
        }
        ring
    }

    fn concat(ring: &RecordRing) -> Vec<u8> {
        ring.iter().flat_map(|r| r.as_bytes().to_vec()).collect()
    }

    #[test]
    fn zero_capacity_rejected() {
        assert!(matches!(RecordRing::new(0), Err(StoreError::ZeroCapacity)));
    }

    #[test]
    fn empty_ring() {
        let ring = RecordRing::default();
        assert_eq!(ring.capacity(), DEFAULT_CAPACITY);
        assert!(ring.is_empty());
        assert!(!ring.is_full());
        assert_eq!(ring.len(), 0);
        assert_eq!(ring.total_len(), 0);
        assert!(ring.locate(0).is_none());
    }

    #[test]
    fn append_until_full() {
        let mut ring = RecordRing::new(3).unwrap();
        assert!(ring.append(Record::new("a\n")).is_none());
        assert!(ring.append(Record::new("b\n")).is_none());
        assert!(!ring.is_full());
        assert!(ring.append(Record::new("c\n")).is_none());
        assert!(ring.is_full());
        assert_eq!(ring.write_cursor(), ring.read_cursor());
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn overwrite_returns_oldest() {
        let mut ring = ring_with(3, &["aa\n", "bb\n", "cc\n"]);
        let evicted = ring.append(Record::new("dd\n")).expect("ring was full");
        assert_eq!(evicted.as_bytes(), b"aa\n");
        assert_eq!(concat(&ring), b"bb\ncc\ndd\n");
        assert_eq!(ring.total_len(), 9);

        let (record, within) = ring.locate(0).unwrap();
        assert_eq!(record.as_bytes()[within], b'b');
    }

    #[test]
    fn locate_across_records() {
        let ring = ring_with(10, &["hello\n", "world\n"]);
        let (record, within) = ring.locate(7).unwrap();
        assert_eq!(record.as_bytes(), b"world\n");
        assert_eq!(within, 1);
        assert_eq!(ring.locate_index(5), Some((0, 5)));
        assert_eq!(ring.locate_index(6), Some((1, 0)));
        assert!(ring.locate(12).is_none());
    }

    #[test]
    fn locate_after_wrap_follows_read_cursor() {
        let ring = ring_with(2, &["one\n", "two\n", "three\n"]);
        assert_eq!(ring.read_cursor(), 1);
        assert_eq!(ring.locate_index(0), Some((0, 0)));
        assert_eq!(ring.get(0).unwrap().as_bytes(), b"two\n");
        assert_eq!(ring.locate(4).unwrap().0.as_bytes(), b"three\n");
    }

    #[test]
    fn clear_releases_everything() {
        let mut ring = ring_with(2, &["x\n", "y\n", "z\n"]);
        assert_eq!(ring.clear(), 2);
        assert!(ring.is_empty());
        assert_eq!(ring.write_cursor(), 0);
        assert_eq!(ring.read_cursor(), 0);
        assert!(ring.append(Record::new("w\n")).is_none());
        assert_eq!(concat(&ring), b"w\n");
    }

    #[test]
    fn record_debug_is_readable() {
        let dbg = format!("{:?}", Record::new("hi\n"));
        assert!(dbg.contains("len: 3"));
    }

    proptest! {
        #[test]
        fn locate_matches_naive_concatenation(
            records in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..16), 1..=10),
        ) {
            let mut ring = RecordRing::new(10).unwrap();
            let mut naive: Vec<(usize, usize)> = Vec::new();
            for (index, data) in records.iter().enumerate() {
                prop_assert!(ring.append(Record::new(data.clone())).is_none());
                naive.extend((0..data.len()).map(|within| (index, within)));
            }
            for (offset, expected) in naive.iter().enumerate() {
                prop_assert_eq!(ring.locate_index(offset as u64), Some(*expected));
            }
            prop_assert!(ring.locate(naive.len() as u64).is_none());
        }

        #[test]
        fn ring_keeps_last_n_records(
            capacity in 1usize..8,
            records in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..8), 0..32),
        ) {
            let mut ring = RecordRing::new(capacity).unwrap();
            for (count, data) in records.iter().enumerate() {
                let evicted = ring.append(Record::new(data.clone()));
                if count >= capacity {
                    let expected = &records[count - capacity];
                    prop_assert_eq!(evicted.map(Record::into_bytes), Some(expected.clone()));
                } else {
                    prop_assert!(evicted.is_none());
                }
            }
            let start = records.len().saturating_sub(capacity);
            let kept: Vec<Vec<u8>> = ring.iter().map(|r| r.as_bytes().to_vec()).collect();
            prop_assert_eq!(kept, records[start..].to_vec());
            prop_assert_eq!(ring.is_full(), records.len() >= capacity);
        }
    }
}
