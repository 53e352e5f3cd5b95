use crate::buffers::FrameId;
use crate::monitor::ConnectionMonitor;
use crate::sequence::Sequence;
use std::fs::File;

/// Key of a cursor attached to a StationIO.
pub type CursorId = u64;

///
/// Where a request wants playback to start.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataStart {
    /// Only records committed from now on.
    Live,
    /// The oldest record still buffered.
    All,
    /// Resume at a sequence number.
    Seq(Sequence),
    /// Resume at a sequence number, but not before a time.
    SeqTime(Sequence, chrono::NaiveDateTime),
}

///
/// One client's read position in one station.  A cursor reads from
/// the ring (`buffer_queue`) or, when it lags behind the ring, from
/// a segment file (`file_queue` at byte offset `file_pos`).  A frame
/// may go out in several chunks; `bufpos` is the offset inside the
/// frame being sent.
///
#[derive(Debug)]
pub struct StationCursor {
    pub(crate) monitor: ConnectionMonitor,
    pub(crate) prefix: String,
    pub(crate) active: bool,
    pub(crate) ready: bool,
    pub(crate) seq: Sequence,
    pub(crate) buffer_queue: Option<FrameId>,
    pub(crate) file_queue: Option<u64>,
    pub(crate) file_pos: u64,
    pub(crate) reader: Option<File>,
    pub(crate) bufpos: usize,
    pub(crate) discard: bool,
    /// Requests that were too far behind and went to the live edge.
    pub(crate) late_starts: u32,
}

impl StationCursor {
    pub fn new(host: &str, port: u16, station_key: &str) -> StationCursor {
        StationCursor {
            monitor: ConnectionMonitor::new(host, port),
            prefix: format!("{}:{} : {} : ", host, port, station_key),
            active: false,
            ready: false,
            seq: Sequence::default(),
            buffer_queue: None,
            file_queue: None,
            file_pos: 0,
            reader: None,
            bufpos: 0,
            discard: false,
            late_starts: 0,
        }
    }

    pub fn monitor(&self) -> &ConnectionMonitor {
        &self.monitor
    }
    ///
    /// True while a request is in force on this cursor.
    ///
    pub fn active(&self) -> bool {
        self.active
    }
    ///
    /// True when there is (or may be) something to send.
    ///
    pub fn ready(&self) -> bool {
        self.ready
    }
    pub fn sequence(&self) -> Sequence {
        self.seq
    }
    ///
    /// True while part of a frame has been handed out; the rest must
    /// follow before anything else goes to the client.
    ///
    pub fn mid_frame(&self) -> bool {
        self.bufpos != 0
    }
    pub fn late_starts(&self) -> u32 {
        self.late_starts
    }

    pub(crate) fn close_file(&mut self) {
        self.reader = None;
    }

    pub(crate) fn reset_queue(&mut self) {
        self.close_file();
        self.buffer_queue = None;
        self.file_queue = None;
        self.file_pos = 0;
        self.seq = Sequence::default();
        self.bufpos = 0;
        self.discard = false;
    }
    ///
    /// Drop the current request: nothing queued, nothing to send,
    /// monitor back to a fresh state (selectors survive).
    ///
    pub(crate) fn stop(&mut self) {
        self.active = false;
        self.ready = false;
        self.reset_queue();
        self.monitor.reset();
    }
}
