//! The *connection* module speaks the SeedLink protocol with one
//! client.
//!
//! Clients send ASCII command lines terminated by CR and/or LF:
//!
//! *   HELLO - server software and organization, two lines.
//! *   STATION sta [net] - switch to multi-station mode and add a
//! station.  OK or ERROR.
//! *   SELECT [pattern] - add a stream selector, or clear them all.
//! *   DATA [seq [time]] / FETCH [seq [time]] - where to start;
//! FETCH ends once the client has caught up.
//! *   TIME begin [end] - time window (window extraction clients).
//! *   END - handshaking is over; send data.
//! *   CAT - station list.
//! *   INFO level - XML document wrapped in Mini-SEED records,
//! each prefixed with `SLINFO *` (more follow) or `SLINFO  ` (last).
//! *   BATCH - suppress OK/ERROR replies until END.
//! *   BYE - disconnect.
//!
//! Data frames are `SL` + six hex digits of sequence number + the
//! record.  When every requested station has finished, `END` is
//! sent.
//!
//! The Connection here holds protocol state only; the server moves
//! bytes between it and the socket.
//!
pub mod command;
pub mod connection;

pub use self::command::*;
pub use self::connection::*;
