//! The *monitor* module keeps the bookkeeping behind INFO requests
//! and time based positioning:
//!
//! *  StreamSelector / StreamFilter: the SELECT patterns of a client.
//! *  TimeWindow: the TIME bounds of a client.
//! *  StreamMonitor: per substream begin/end times, record numbers,
//! segment boundaries and gaps of what a station has buffered.
//! *  StationMonitor: all substreams of a station plus its sequence
//! range; persisted in the station's `buffer.xml` snapshot.
//! *  ConnectionMonitor: per client, per station progress and
//! counters.
//! *  MasterMonitor: server identity, capabilities and the INFO, CAT
//! and error documents.
//!
pub mod connection;
pub mod error;
pub mod master;
pub mod selector;
pub mod station;
pub mod stream;
pub mod window;

pub use self::connection::*;
pub use self::error::*;
pub use self::master::*;
pub use self::selector::*;
pub use self::station::*;
pub use self::stream::*;
pub use self::window::*;
