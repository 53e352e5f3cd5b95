//! The *server* module is the single threaded event loop of the
//! daemon.
//!
//! Each pass builds a poll set from the listening socket, the pipes
//! of running plugins and the client sockets, waits for at most the
//! poll timeout and then:
//!
//! *  Services plugins whose pipes are readable (all of them once a
//! second, so timeouts and restarts happen without input) and
//! routes their packets into the stations.
//! *  Reads client commands and writes queued responses and frames
//! without blocking; a client that cannot take more simply waits
//! for the next pass.
//! *  Accepts new clients subject to the connection limits.
//!
//! Shutdown is requested through a StopHandle.
//!
pub mod fdset;
pub mod manager;

pub use self::fdset::*;
pub use self::manager::*;
