//! Storage engine for aesd.
//!
//! A bounded log of newline-terminated records, held in a fixed-capacity
//! ring that overwrites its oldest record once full, plus an unbounded
//! plain-file variant.
//!
//! # Components
//!
//! - [`RecordRing`] -- circular array of [`Record`]s with explicit eviction
//! - [`seek`] -- `(record index, offset)` to absolute offset translation
//! - [`LogDevice`] / [`DeviceFile`] -- character-device-style read/write/seek
//!   entry points over a ring
//! - [`FileLog`] -- append-only file log with an in-memory record index
//!
//! Both backings implement [`LogBackend`], the seam used by the network
//! service.
//!
//! # Design Rules
//!
//! 1. Records are immutable once committed.
//! 2. Overwriting a full ring returns the displaced record; it is never
//!    dropped silently inside the ring.
//! 3. Record indices are logical: 0 is always the oldest live record.
//! 4. Invalid seek requests are rejected without touching any state.
//! 5. Nothing in this crate locks; callers serialize access.

pub mod device;
pub mod error;
pub mod file_log;
pub mod ring;
pub mod seek;
pub mod traits;

pub use device::{DeviceCommand, DeviceFile, LogDevice};
pub use error::{StoreError, StoreResult};
pub use file_log::FileLog;
pub use ring::{Record, RecordRing, DEFAULT_CAPACITY};
pub use seek::SeekTo;
pub use traits::LogBackend;
