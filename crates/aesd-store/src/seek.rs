//! Seek-by-command: addressing a byte by `(record index, offset in record)`.
//!
//! Indices are logical: index 0 is the oldest live record, regardless of
//! which physical slot it occupies. Summation always follows oldest-first
//! order, so translation stays correct after the ring wraps.

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::ring::RecordRing;

/// A `(record index, intra-record offset)` seek request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeekTo {
    pub index: usize,
    pub offset: usize,
}

impl SeekTo {
    pub fn new(index: usize, offset: usize) -> Self {
        Self { index, offset }
    }
}

/// Translate a seek request against a sequence of record lengths given in
/// oldest-first order.
///
/// `limit` bounds the index space (the ring capacity, or `usize::MAX` for
/// unbounded logs). Rejection never has side effects.
pub fn translate_lengths<I>(lengths: I, limit: usize, request: SeekTo) -> StoreResult<u64>
where
    I: IntoIterator<Item = usize>,
{
    let SeekTo { index, offset } = request;
    if index >= limit {
        return Err(StoreError::IndexOutOfRange { index, limit });
    }

    let mut preceding: u64 = 0;
    for (position, len) in lengths.into_iter().enumerate() {
        if position == index {
            if offset >= len {
                return Err(StoreError::OffsetOutOfRange { index, offset, len });
            }
            return Ok(preceding + offset as u64);
        }
        preceding += len as u64;
    }
    Err(StoreError::EmptySlot { index })
}

/// Translate a seek request against the live records of `ring`.
pub fn translate(ring: &RecordRing, request: SeekTo) -> StoreResult<u64> {
    translate_lengths(ring.iter().map(|r| r.len()), ring.capacity(), request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::Record;
    use proptest::prelude::*;

    fn ring_with(capacity: usize, lines: &[&str]) -> RecordRing {
        let mut ring = RecordRing::new(capacity).unwrap();
        for line in lines {
            ring.append(Record::new(line.as_bytes()));
        }
        ring
    }

    #[test]
    fn translate_second_record() {
        let ring = ring_with(10, &["hello\n", "world\n"]);
        assert_eq!(translate(&ring, SeekTo::new(1, 2)).unwrap(), 8);
        assert_eq!(translate(&ring, SeekTo::new(0, 0)).unwrap(), 0);
    }

    #[test]
    fn rejects_index_beyond_capacity() {
        let ring = ring_with(3, &["a\n"]);
        let err = translate(&ring, SeekTo::new(3, 0)).unwrap_err();
        assert!(matches!(err, StoreError::IndexOutOfRange { index: 3, limit: 3 }));
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn rejects_empty_slot() {
        let ring = ring_with(3, &["a\n"]);
        let err = translate(&ring, SeekTo::new(1, 0)).unwrap_err();
        assert!(matches!(err, StoreError::EmptySlot { index: 1 }));
    }

    #[test]
    fn rejects_offset_past_record() {
        let ring = ring_with(3, &["abc\n"]);
        let err = translate(&ring, SeekTo::new(0, 4)).unwrap_err();
        assert!(matches!(err, StoreError::OffsetOutOfRange { len: 4, .. }));
    }

    #[test]
    fn rejection_leaves_ring_untouched() {
        let ring = ring_with(2, &["a\n", "b\n", "c\n"]);
        let before = (ring.write_cursor(), ring.read_cursor(), ring.len(), ring.total_len());
        assert!(translate(&ring, SeekTo::new(5, 0)).is_err());
        assert!(translate(&ring, SeekTo::new(0, 9)).is_err());
        let after = (ring.write_cursor(), ring.read_cursor(), ring.len(), ring.total_len());
        assert_eq!(before, after);
    }

    #[test]
    fn wrapped_ring_uses_logical_order() {
        // Physical slot 0 now holds "dddd\n", the newest record.
        let ring = ring_with(3, &["a\n", "bb\n", "ccc\n", "dddd\n"]);
        assert_eq!(ring.read_cursor(), 1);
        assert_eq!(translate(&ring, SeekTo::new(0, 0)).unwrap(), 0);
        assert_eq!(translate(&ring, SeekTo::new(2, 1)).unwrap(), 3 + 4 + 1);
    }

    #[test]
    fn unbounded_lengths() {
        let lengths = vec![3usize; 50];
        assert_eq!(
            translate_lengths(lengths.clone(), usize::MAX, SeekTo::new(40, 2)).unwrap(),
            122
        );
        assert!(matches!(
            translate_lengths(lengths, usize::MAX, SeekTo::new(50, 0)),
            Err(StoreError::EmptySlot { index: 50 })
        ));
    }

    proptest! {
        #[test]
        fn seek_then_locate_agrees(
            capacity in 1usize..6,
            records in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..10), 1..20),
            pick in any::<prop::sample::Index>(),
            within in any::<prop::sample::Index>(),
        ) {
            let mut ring = RecordRing::new(capacity).unwrap();
            for data in &records {
                ring.append(Record::new(data.clone()));
            }
            let index = pick.index(ring.len());
            let target = ring.get(index).unwrap().clone();
            let offset = within.index(target.len());

            let absolute = translate(&ring, SeekTo::new(index, offset)).unwrap();
            let (record, found) = ring.locate(absolute).unwrap();
            prop_assert_eq!(record, &target);
            prop_assert_eq!(found, offset);
            prop_assert_eq!(ring.locate_index(absolute), Some((index, offset)));
        }
    }
}
