//! The *buffers* module holds the two tiers a station keeps its
//! frames in:
//!
//! *  The ring buffer: a fixed number of in-memory frame slots
//! recycled oldest first.  Recycling a slot is announced to an
//! observer before its bytes are reused so readers still positioned
//! on it can move elsewhere.
//! *  The segment store: the same frames appended to numbered files
//! on disk.  When the number of files exceeds the configured limit
//! the oldest is deleted, again after telling an observer.
//!
//! Frames are fixed size (the station's record length) and carry a
//! wrapping 24 bit sequence number.
//!
pub mod error;
pub mod inventory;
pub mod ring;
pub mod segments;

pub use self::error::*;
pub use self::ring::*;
pub use self::segments::*;
