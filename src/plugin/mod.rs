//! The *plugin* module runs and supervises acquisition plugins.
//!
//! A plugin is any program that writes framed packets to descriptor
//! 63.  Each packet is a fixed 60 byte header (packet type, station
//! and channel ids, time, clock correction and quality, data size)
//! followed by the payload the type calls for: int32 samples with or
//! without a start time, a gap or flush notice, log text, or a
//! complete Mini-SEED record.
//!
//! Plugins are started through the shell, restarted when they die
//! or misbehave, and stopped with SIGTERM followed by SIGKILL.
//!
pub mod packet;
pub mod supervisor;
pub mod timer;

pub use self::packet::*;
pub use self::supervisor::*;
pub use self::timer::*;
