//! The *stationio* module ties a station's frame stores to its
//! readers.
//!
//! A StationIO owns the station's ring buffer, segment store and
//! monitor.  Every record the acquisition side commits goes through
//! it: into a ring slot, onto disk and into the monitor, and then it
//! is offered to each attached cursor.  Cursors are the per client
//! read positions; SELECT, TIME, DATA and FETCH position them and
//! deliver() pulls the framed output (`SL` + six hex digits of
//! sequence + the record) one chunk at a time.
//!
//! When the ring recycles a frame a cursor is parked on, the cursor
//! moves to the same record on disk.  When the disk segment it reads
//! is deleted, it moves to the next segment and the rest of the frame
//! in progress is sent as zeros so the client stays frame aligned.
//!
//! The StationRegistry holds every station served, shared with the
//! acquisition side through reference counted cells.
//!
pub mod cursor;
pub mod error;
pub mod registry;
pub mod station_io;

pub use self::cursor::*;
pub use self::error::*;
pub use self::registry::*;
pub use self::station_io::*;
