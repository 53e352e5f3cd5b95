use super::cursor::{CursorId, DataStart, StationCursor};
use super::error::StationResult;
use crate::buffers::inventory::segment_name;
use crate::buffers::{
    FrameId, NullSegmentObserver, RingBuffer, RingObserver, Segment, SegmentObserver,
    SegmentStore, StoreError,
};
use crate::monitor::{InfoLevel, StationMonitor};
use crate::sequence::Sequence;
use crate::xmldoc::XmlElement;
use chrono::NaiveDateTime;
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Precedes the sequence number of every frame sent to a client.
pub const SIGNATURE: &str = "SL";
/// Largest piece of a frame handed out by one delivery step.
pub const CHUNK_SIZE: usize = 512;
/// Monitor snapshot inside the station directory.
pub const STATE_FILE: &str = "buffer.xml";
/// Segment directory inside the station directory.
pub const SEGMENT_DIR: &str = "segments";

///
/// Sizing and policy of one station's buffer.
///
#[derive(Debug, Clone)]
pub struct StationParams {
    pub key: String,
    pub directory: PathBuf,
    pub record_length: usize,
    pub buffers: usize,
    pub blanks: usize,
    pub segments: usize,
    pub segsize: usize,
    pub seq_gap_limit: u32,
    pub load_headers: bool,
    pub request_log: bool,
}

///
/// Outcome of one delivery step for a cursor.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Bytes were appended to the output.
    Data,
    /// Caught up with the live edge; waiting for new records.
    Drained,
    /// The request is complete and the cursor went inactive.
    Finished,
}

enum Step {
    Retry,
    Done(Delivery),
}

///
/// Read only view of the two frame stores used to position cursors.
///
struct Stores<'a> {
    ring: &'a RingBuffer,
    segments: &'a SegmentStore,
    seq_gap_limit: u32,
}

impl<'a> Stores<'a> {
    fn find_in_ring(&self, sx: &mut StationCursor, seq: Sequence) -> bool {
        match self.ring.find(seq) {
            Some(frame) => {
                sx.close_file();
                sx.buffer_queue = Some(frame);
                sx.file_queue = None;
                sx.seq = seq;
                true
            }
            None => false,
        }
    }
    ///
    /// Position `sx` on `seq` inside a segment file.  A cursor that is
    /// part way through the frame keeps its offset.
    ///
    fn find_in_segments(&self, sx: &mut StationCursor, seq: Sequence) -> bool {
        match self.segments.find(seq) {
            Some((id, offset)) => {
                sx.close_file();
                sx.buffer_queue = self.ring.first();
                sx.file_queue = Some(id);
                sx.file_pos = offset + sx.bufpos as u64;
                sx.seq = seq;
                true
            }
            None => false,
        }
    }

    fn find_oldest(&self, sx: &mut StationCursor) {
        sx.close_file();
        sx.buffer_queue = self.ring.first();
        sx.file_queue = None;
        sx.file_pos = 0;
        if let Some(segment) = self.segments.first() {
            sx.file_queue = Some(segment.id());
            sx.seq = segment.sequence();
            self.find_in_ring(sx, segment.sequence());
        } else if let Some(seq) = self.ring.first().and_then(|f| self.ring.sequence(f)) {
            sx.seq = seq;
        } else {
            info!("{}no packets in queue", sx.prefix);
            sx.seq = self.ring.end_seq();
            return;
        }
        info!("{}oldest packet {}", sx.prefix, sx.seq);
    }
    ///
    /// Position `sx` on `seq`: memory first, then disk, then the live
    /// edge.  A sequence that is no longer buffered restarts from the
    /// oldest record, unless that is more than seq_gap_limit records
    /// away; then the cursor waits at the live edge and false is
    /// returned.
    ///
    fn find_packet(&self, sx: &mut StationCursor, seq: Sequence) -> bool {
        if self.find_in_ring(sx, seq) || self.find_in_segments(sx, seq) {
            return true;
        }
        if seq == self.ring.end_seq() {
            sx.seq = seq;
            return true;
        }
        self.find_oldest(sx);
        let lag = sx.seq.distance_from(seq);
        if lag > self.seq_gap_limit {
            sx.close_file();
            sx.buffer_queue = None;
            sx.file_queue = None;
            sx.seq = self.ring.end_seq();
            sx.late_starts += 1;
            warn!(
                "{}packet {} not found, sequence difference {} is too large; resuming transmission from the next packet ({})",
                sx.prefix, seq, lag, sx.seq
            );
            return false;
        }
        warn!("{}packet {} not found, starting at {}", sx.prefix, seq, sx.seq);
        true
    }
}

///
/// Moves cursors off a ring frame that is about to be recycled.
///
fn redirect_evicted(
    cursors: &mut BTreeMap<CursorId, StationCursor>,
    stores: &Stores,
    frame: FrameId,
) {
    let seq = match stores.ring.sequence(frame) {
        Some(seq) => seq,
        None => return,
    };
    let next = stores.ring.next(frame);
    for sx in cursors.values_mut() {
        if sx.buffer_queue != Some(frame) {
            continue;
        }
        if sx.file_queue.is_none() {
            debug!("{}deleting active buffer, seq = {}", sx.prefix, seq);
            if !stores.find_in_segments(sx, seq) {
                sx.discard = true;
                sx.seq.increment();
            }
        }
        sx.buffer_queue = next;
    }
}

struct SegmentEvictions<'a> {
    monitor: &'a mut StationMonitor,
    cursors: &'a mut BTreeMap<CursorId, StationCursor>,
}

impl<'a> SegmentObserver for SegmentEvictions<'a> {
    fn segment_evicted(&mut self, evicted: &Segment, next: Option<&Segment>) {
        self.monitor.delete_oldest_segment();
        if let Some(next) = next {
            self.monitor.set_begin_seq(next.sequence());
        }
        for sx in self.cursors.values_mut() {
            if sx.file_queue == Some(evicted.id()) {
                debug!("{}deleting active file segment, seq = {}", sx.prefix, sx.seq);
                sx.close_file();
                sx.file_queue = next.map(|s| s.id());
                sx.file_pos = 0;
                sx.discard = true;
            }
        }
    }
}

///
/// The ring's observer while a frame is acquired and committed.  It
/// borrows the parts of the StationIO the callbacks touch; the first
/// store error is kept for the caller.
///
struct StationObserver<'a> {
    segments: &'a mut SegmentStore,
    monitor: &'a mut StationMonitor,
    cursors: &'a mut BTreeMap<CursorId, StationCursor>,
    current_segment: &'a mut Option<u64>,
    counter: &'a mut u64,
    segsize: usize,
    error: Option<StoreError>,
}

impl<'a> StationObserver<'a> {
    fn store(&mut self, data: &[u8]) -> Result<(), StoreError> {
        let full = match *self.current_segment {
            None => true,
            Some(id) => self
                .segments
                .segment(id)
                .map_or(true, |s| s.records() >= self.segsize),
        };
        if full {
            let rotating = self.current_segment.is_some();
            if let Some(id) = self.current_segment.take() {
                self.segments.release_file(id);
            }
            let mut evictions = SegmentEvictions {
                monitor: &mut *self.monitor,
                cursors: &mut *self.cursors,
            };
            *self.current_segment = self.segments.get_file(*self.counter, &mut evictions)?;
            if rotating {
                self.monitor.new_segment();
            }
        }
        match *self.current_segment {
            Some(id) => self.segments.store(id, data),
            None => Ok(()),
        }
    }
}

impl<'a> RingObserver for StationObserver<'a> {
    fn frame_evicted(&mut self, ring: &RingBuffer, frame: FrameId) {
        let stores = Stores {
            ring,
            segments: &*self.segments,
            seq_gap_limit: 0,
        };
        redirect_evicted(self.cursors, &stores, frame);
    }

    fn frame_committed(&mut self, ring: &RingBuffer, frame: FrameId) {
        let seq = match ring.sequence(frame) {
            Some(seq) => seq,
            None => return,
        };
        let data = ring.data(frame);
        let stored = self.store(data);
        *self.counter += 1;
        if let Err(e) = stored {
            self.error.get_or_insert(e);
        }

        self.monitor.add_packet(seq, data);
        self.monitor.set_end_seq(seq.next());

        for sx in self.cursors.values_mut() {
            if !sx.active {
                continue;
            }
            if sx.buffer_queue.is_none() {
                if sx.monitor.match_packet(data) {
                    debug!("{}first buffer in queue, seq = {}", sx.prefix, seq);
                    sx.buffer_queue = Some(frame);
                } else {
                    sx.monitor.check_seq(seq);
                    continue;
                }
            }
            sx.ready = true;
        }
    }
}

///
/// One station's buffer and everyone reading it.  Committed frames go
/// to the ring, the segment files and the monitor; attached cursors
/// are kept positioned as frames are evicted from either tier.
///
#[derive(Debug)]
pub struct StationIO {
    key: String,
    directory: PathBuf,
    buffers: usize,
    blanks: usize,
    segsize: usize,
    seq_gap_limit: u32,
    load_headers: bool,
    request_log: bool,
    ring: RingBuffer,
    segments: SegmentStore,
    monitor: StationMonitor,
    cursors: BTreeMap<CursorId, StationCursor>,
    next_cursor: CursorId,
    current_segment: Option<u64>,
    counter: u64,
}

impl StationIO {
    pub fn new(params: &StationParams, monitor: StationMonitor) -> StationIO {
        StationIO {
            key: params.key.clone(),
            directory: params.directory.clone(),
            buffers: params.buffers,
            blanks: params.blanks,
            segsize: params.segsize,
            seq_gap_limit: params.seq_gap_limit,
            load_headers: params.load_headers,
            request_log: params.request_log,
            ring: RingBuffer::new(params.buffers, params.record_length),
            segments: SegmentStore::new(
                &params.directory.join(SEGMENT_DIR),
                params.record_length,
                params.segments,
            ),
            monitor,
            cursors: BTreeMap::new(),
            next_cursor: 0,
            current_segment: None,
            counter: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
    pub fn monitor(&self) -> &StationMonitor {
        &self.monitor
    }
    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }
    pub fn segments(&self) -> &SegmentStore {
        &self.segments
    }
    pub fn frame_size(&self) -> usize {
        self.ring.frame_size()
    }
    pub fn ipaccess(&self, ip: IpAddr) -> bool {
        self.monitor.ipaccess(ip)
    }
    /// Should requests for this station be logged?
    pub fn request_log(&self) -> bool {
        self.request_log
    }
    /// Unwrapped number of records ever committed.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    fn state_file(&self) -> PathBuf {
        self.directory.join(STATE_FILE)
    }

    fn observer(&mut self) -> (&mut RingBuffer, StationObserver<'_>) {
        (
            &mut self.ring,
            StationObserver {
                segments: &mut self.segments,
                monitor: &mut self.monitor,
                cursors: &mut self.cursors,
                current_segment: &mut self.current_segment,
                counter: &mut self.counter,
                segsize: self.segsize,
                error: None,
            },
        )
    }
    ///
    /// Commit one record.  It is copied into a ring slot (recycling
    /// the oldest frame if needed), appended to the current segment
    /// file and offered to every active cursor.  Returns the record's
    /// sequence number.
    ///
    pub fn commit(&mut self, data: &[u8]) -> StationResult<Sequence> {
        let seq = self.ring.end_seq();
        let (ring, mut observer) = self.observer();
        let frame = ring.get_buffer(&mut observer);
        {
            let slot = ring.frame_mut(frame);
            let n = data.len().min(slot.len());
            slot[..n].copy_from_slice(&data[..n]);
            slot[n..].iter_mut().for_each(|b| *b = 0);
        }
        ring.queue_buffer(frame, &mut observer);
        match observer.error {
            Some(e) => Err(e.into()),
            None => Ok(seq),
        }
    }
    ///
    /// Grow the ring by `count` frames.
    ///
    pub fn enlarge(&mut self, count: usize) {
        self.ring.enlarge(count);
        self.buffers += count;
        info!("{}: memory buffer enlarged to {} records", self.key, self.buffers);
    }

    pub fn save_state(&self) -> StationResult<()> {
        let path = self.state_file();
        info!("saving disk buffer description to '{}'", path.display());
        self.monitor.save_state(&path)?;
        Ok(())
    }

    fn load_headers(&mut self) -> StationResult<()> {
        let monitor = &mut self.monitor;
        let ids: Vec<u64> = self.segments.iter().map(|s| s.id()).collect();
        for (i, id) in ids.iter().enumerate() {
            let mut seq = Sequence::from_counter(*id);
            self.segments.read_records(*id, 0, &mut |frame| {
                monitor.add_packet(seq, frame);
                monitor.set_end_seq(seq.next());
                seq.increment();
            })?;
            if i + 1 < ids.len() {
                monitor.new_segment();
            }
        }
        Ok(())
    }
    ///
    /// Bring the station back after a restart: rebuild the segment
    /// list, restore the monitor from its snapshot (or from the
    /// record headers when the snapshot is missing or bad) and reload
    /// the most recent records into memory.  After an unclean
    /// shutdown `blanks` empty records are appended.
    ///
    pub fn restore_state(&mut self) -> StationResult<()> {
        info!(
            "trying to read disk buffer segments from '{}/'...",
            self.segments.directory().display()
        );
        self.counter = self.segments.restore_state(&mut NullSegmentObserver)?;
        self.current_segment = self.segments.last().map(|s| s.id());
        info!(
            "...{} records in {} files",
            self.segments.n_records(),
            self.segments.n_files()
        );

        let state = self.state_file();
        let mut recover = false;
        if state.exists() {
            info!("reading disk buffer description from '{}'", state.display());
            if let Err(e) = self.monitor.restore_state(&state) {
                error!("{}", e);
                self.monitor.reset();
                recover = true;
            }
            fs::remove_file(&state).map_err(|e| StoreError::CannotDeleteFile {
                path: state.clone(),
                source: e,
            })?;
        } else if self.counter != 0 {
            info!("cannot find '{}'", state.display());
            recover = true;
        }

        if recover && self.load_headers {
            info!("scanning disk buffer of station {}", self.key);
            self.load_headers()?;
        }

        info!(
            "trying to load up to {} most recent records into memory...",
            self.buffers
        );
        let wanted = self.counter.saturating_sub(self.buffers as u64);
        let found = self
            .segments
            .iter()
            .position(|s| s.id() <= wanted && wanted < s.id() + s.records() as u64);
        let (start, from) = match found {
            Some(p) => (wanted, p),
            None => (self.segments.first().map_or(0, |s| s.id()), 0),
        };
        self.ring.init_seq(Sequence::from_counter(start));
        let ring = &mut self.ring;
        for segment in self.segments.iter().skip(from) {
            let skip = start.saturating_sub(segment.id()) as usize;
            self.segments
                .read_records(segment.id(), skip, &mut |frame| ring.load_frame(frame))?;
        }
        info!(
            "...{} records loaded",
            self.ring.end_seq().distance_from(Sequence::from_counter(start))
        );

        if !recover {
            return Ok(());
        }

        info!("creating {} empty records", self.blanks);
        let blanks = self.blanks;
        let (ring, mut observer) = self.observer();
        ring.create_blank_buffers(blanks, &mut observer);
        if let Some(e) = observer.error {
            return Err(e.into());
        }
        if let Some(first) = self.segments.first() {
            self.monitor.set_begin_seq(first.sequence());
        }
        self.monitor.set_end_seq(self.ring.end_seq());
        Ok(())
    }

    ///
    /// Register a new reader for the client at `host:port`.
    ///
    pub fn attach(&mut self, host: &str, port: u16) -> CursorId {
        let id = self.next_cursor;
        self.next_cursor += 1;
        self.cursors
            .insert(id, StationCursor::new(host, port, &self.key));
        id
    }

    pub fn detach(&mut self, id: CursorId) {
        self.cursors.remove(&id);
    }

    pub fn cursor(&self, id: CursorId) -> Option<&StationCursor> {
        self.cursors.get(&id)
    }

    pub fn ready(&self, id: CursorId) -> bool {
        self.cursors.get(&id).map_or(false, |c| c.ready)
    }

    pub fn active(&self, id: CursorId) -> bool {
        self.cursors.get(&id).map_or(false, |c| c.active)
    }

    pub fn mid_frame(&self, id: CursorId) -> bool {
        self.cursors.get(&id).map_or(false, |c| c.mid_frame())
    }

    fn split(
        &mut self,
        id: CursorId,
    ) -> Option<(Stores<'_>, &StationMonitor, &mut StationCursor)> {
        let stores = Stores {
            ring: &self.ring,
            segments: &self.segments,
            seq_gap_limit: self.seq_gap_limit,
        };
        let sx = self.cursors.get_mut(&id)?;
        Some((stores, &self.monitor, sx))
    }
    ///
    /// Cancel whatever the cursor was doing; used when a request for
    /// it turns out to be malformed.
    ///
    pub fn reset_cursor(&mut self, id: CursorId) {
        if let Some(sx) = self.cursors.get_mut(&id) {
            sx.stop();
        }
    }
    ///
    /// SELECT: without a pattern the selectors are cleared, otherwise
    /// the pattern is added.  False if the pattern is invalid.
    ///
    pub fn select(&mut self, id: CursorId, pattern: Option<&str>) -> bool {
        let sx = match self.cursors.get_mut(&id) {
            Some(sx) => sx,
            None => return false,
        };
        sx.stop();
        match pattern {
            None => {
                sx.monitor.clear_selectors();
                true
            }
            Some(text) => sx.monitor.add_selector(text),
        }
    }
    ///
    /// TIME: send what falls inside [begin, end], waiting for data
    /// that is not there yet.  False if the window is inverted.
    ///
    pub fn time(&mut self, id: CursorId, begin: NaiveDateTime, end: Option<NaiveDateTime>) -> bool {
        let (stores, monitor, sx) = match self.split(id) {
            Some(parts) => parts,
            None => return false,
        };
        sx.stop();
        sx.monitor.set_begin_time(begin, None, monitor);
        if let Some(end) = end {
            sx.monitor.set_end_time(end, monitor);
        }
        if !sx.monitor.time_valid() {
            sx.monitor.reset();
            return false;
        }
        sx.monitor.set_realtime(true);
        if !sx.monitor.end_of_data() {
            if let Some(seq) = sx.monitor.begin_seq() {
                stores.find_packet(sx, seq);
            }
        }
        sx.active = true;
        sx.ready = true;
        true
    }
    ///
    /// DATA (`realtime`) or FETCH: start playback at `start`.  FETCH
    /// finishes once the live edge is reached.
    ///
    pub fn data(&mut self, id: CursorId, start: DataStart, realtime: bool) {
        let (stores, monitor, sx) = match self.split(id) {
            Some(parts) => parts,
            None => return,
        };
        sx.stop();
        match start {
            DataStart::Live => {
                sx.seq = stores.ring.end_seq();
                sx.monitor.set_begin_seq(Some(sx.seq), true);
            }
            DataStart::All => {
                stores.find_oldest(sx);
                sx.monitor.set_begin_seq(Some(sx.seq), true);
                sx.ready = true;
            }
            DataStart::Seq(seq) => {
                let valid = stores.find_packet(sx, seq);
                sx.monitor.set_begin_seq(Some(seq), valid);
                sx.ready = valid;
            }
            DataStart::SeqTime(seq, t) => {
                sx.monitor.set_begin_time(t, Some(seq), monitor);
                if let Some(begin) = sx.monitor.begin_seq() {
                    stores.find_packet(sx, begin);
                }
                sx.ready = true;
            }
        }
        sx.monitor.set_realtime(realtime);
        sx.active = true;
    }
    ///
    /// Append the next piece of output for cursor `id` to `out`:
    /// a signature and the start of a frame, the rest of a frame, or
    /// nothing when the cursor has caught up or finished.
    ///
    pub fn deliver(&mut self, id: CursorId, out: &mut Vec<u8>) -> StationResult<Delivery> {
        loop {
            if let Step::Done(result) = self.step(id, out)? {
                return Ok(result);
            }
        }
    }

    fn step(&mut self, id: CursorId, out: &mut Vec<u8>) -> StationResult<Step> {
        let ring = &self.ring;
        let segments = &self.segments;
        let sx = match self.cursors.get_mut(&id) {
            Some(sx) => sx,
            None => return Ok(Step::Done(Delivery::Finished)),
        };
        let frame_size = ring.frame_size();
        let size = CHUNK_SIZE.min(frame_size - sx.bufpos);

        if sx.bufpos == 0 {
            sx.discard = false;
        }
        if sx.discard {
            out.resize(out.len() + size, 0);
            sx.bufpos = (sx.bufpos + size) % frame_size;
            return Ok(Step::Done(Delivery::Data));
        }

        if sx.monitor.end_of_data() {
            sx.close_file();
            sx.buffer_queue = None;
            sx.file_queue = None;
        }

        if let (Some(frame), Some(_)) = (sx.buffer_queue, sx.file_queue) {
            if ring.sequence(frame) == Some(sx.seq) {
                debug!("{}switching to memory buffer, seq = {}", sx.prefix, sx.seq);
                sx.close_file();
                sx.file_queue = None;
            }
        }

        let mut chunk = [0u8; CHUNK_SIZE];
        let data: &[u8] = if let Some(segment) = sx.file_queue {
            if read_chunk(segments, frame_size, sx, segment, &mut chunk[..size])? {
                &chunk[..size]
            } else {
                sx.close_file();
                sx.file_pos = 0;
                sx.file_queue = segments.next(segment).map(|s| s.id());
                if sx.file_queue.is_none() {
                    error!("{}end of file segments, seq = {}", sx.prefix, sx.seq);
                    match sx.buffer_queue.and_then(|f| ring.sequence(f)) {
                        Some(seq) => error!("{}first buffer in queue has seq = {}", sx.prefix, seq),
                        None => error!("{}no buffers in queue", sx.prefix),
                    }
                }
                return Ok(Step::Retry);
            }
        } else if let Some(frame) = sx.buffer_queue {
            if let Some(seq) = ring.sequence(frame) {
                sx.seq = seq;
            }
            &ring.data(frame)[sx.bufpos..sx.bufpos + size]
        } else {
            sx.ready = false;
            if sx.monitor.end_of_data() {
                info!("{}end of time window", sx.prefix);
                sx.active = false;
                return Ok(Step::Done(Delivery::Finished));
            }
            if !sx.monitor.realtime() {
                info!("{}end of data", sx.prefix);
                sx.monitor.set_eod(true);
                sx.active = false;
                return Ok(Step::Done(Delivery::Finished));
            }
            return Ok(Step::Done(Delivery::Drained));
        };

        if sx.bufpos == 0 {
            sx.monitor.check_seq(sx.seq);
            if sx.monitor.match_packet(data) {
                sx.monitor.count_packet();
                out.extend_from_slice(format!("{}{}", SIGNATURE, sx.seq).as_bytes());
            } else {
                sx.seq.increment();
                if sx.file_queue.is_none() {
                    sx.buffer_queue = sx.buffer_queue.and_then(|f| ring.next(f));
                } else {
                    sx.file_pos += (frame_size - size) as u64;
                }
                return Ok(Step::Retry);
            }
        }

        out.extend_from_slice(data);
        sx.bufpos = (sx.bufpos + size) % frame_size;
        if sx.bufpos == 0 {
            sx.seq.increment();
            if sx.file_queue.is_none() {
                sx.buffer_queue = sx.buffer_queue.and_then(|f| ring.next(f));
            }
        }
        Ok(Step::Done(Delivery::Data))
    }
    ///
    /// The station element of an INFO document, with this station's
    /// connections at the connections level and above.
    ///
    pub fn info(&self, level: InfoLevel, ip: IpAddr) -> Option<XmlElement> {
        let mut element = self.monitor.getinfo(level, ip)?;
        if level >= InfoLevel::Connections {
            for sx in self.cursors.values() {
                sx.monitor.getinfo(&mut element);
            }
        }
        Some(element)
    }

    pub fn cat_line(&self, ip: IpAddr) -> Option<String> {
        self.monitor.cat_line(ip)
    }
    ///
    /// One line for the periodic statistics log.
    ///
    pub fn stats(&self) -> String {
        format!(
            "{}: {} records in memory, {} records in {} segments, seq {}..{}, {} readers",
            self.key,
            self.ring.n_records(),
            self.segments.n_records(),
            self.segments.n_files(),
            self.monitor.begin_seq(),
            self.monitor.end_seq(),
            self.cursors.len()
        )
    }
}

///
/// Read the next chunk of the cursor's segment file into `buf`,
/// opening the file if needed.  False at end of file.
///
fn read_chunk(
    segments: &SegmentStore,
    frame_size: usize,
    sx: &mut StationCursor,
    segment: u64,
    buf: &mut [u8],
) -> StationResult<bool> {
    let path: PathBuf = segments
        .segment(segment)
        .map(|s| s.path().to_path_buf())
        .unwrap_or_else(|| segments.directory().join(segment_name(segment)));
    if sx.reader.is_none() {
        let file = segments.open_reader(segment)?;
        sx.seq = Sequence::from_counter(segment + sx.file_pos / frame_size as u64);
        debug!("{}opening file segment {}, seq = {}", sx.prefix, segment_name(segment), sx.seq);
        sx.reader = Some(file);
    }
    let reader = match sx.reader.as_mut() {
        Some(reader) => reader,
        None => return Ok(false),
    };
    reader
        .seek(SeekFrom::Start(sx.file_pos))
        .map_err(|e| StoreError::CannotReadFile {
            path: path.clone(),
            source: e,
        })?;
    let mut got = 0;
    while got < buf.len() {
        match reader.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(StoreError::CannotReadFile { path, source: e }.into()),
        }
    }
    if got == 0 {
        return Ok(false);
    }
    if got != buf.len() {
        return Err(StoreError::BadFileFormat { path }.into());
    }
    sx.file_pos += got as u64;
    Ok(true)
}

/// Directory of a station's files under the server's file base.
pub fn station_directory(filebase: &Path, key: &str) -> PathBuf {
    filebase.join(key)
}

#[cfg(test)]
mod station_io_test {
    use super::*;
    use crate::acl::IpAcl;
    use crate::mseed::RecordBuilder;
    use crate::timeutil::parse_time;
    use chrono::Duration;
    use tempfile::TempDir;

    const RECLEN: usize = 512;

    fn params(dir: &Path, buffers: usize, segments: usize, segsize: usize) -> StationParams {
        StationParams {
            key: "GE.APE".to_string(),
            directory: dir.to_path_buf(),
            record_length: RECLEN,
            buffers,
            blanks: 2,
            segments,
            segsize,
            seq_gap_limit: 100,
            load_headers: true,
            request_log: true,
        }
    }

    fn monitor() -> StationMonitor {
        let mut m = StationMonitor::new("APE", "GE", "Apirathos", IpAcl::default());
        m.configure_stream_check(true, "", 0).unwrap();
        m
    }

    fn station(p: &StationParams) -> StationIO {
        fs::create_dir_all(p.directory.join(SEGMENT_DIR)).unwrap();
        StationIO::new(p, monitor())
    }

    fn t(sec: i64) -> NaiveDateTime {
        parse_time("2021/03/04 05:00:00").unwrap() + Duration::seconds(sec)
    }

    fn builder(channel: &str) -> RecordBuilder {
        RecordBuilder::new("GE", "APE", "", channel, RECLEN)
    }

    // n-th record of a stream: 10 samples at 1 Hz starting at 10 * n s.
    fn record(b: &mut RecordBuilder, n: i64) -> Vec<u8> {
        b.data_record(&t(n * 10), 1.0, &[n as i32; 10], None).0
    }

    fn fill(io: &mut StationIO, b: &mut RecordBuilder, count: i64) -> Vec<Vec<u8>> {
        (0..count)
            .map(|n| {
                let r = record(b, n);
                io.commit(&r).unwrap();
                r
            })
            .collect()
    }

    fn drain_bytes(io: &mut StationIO, id: CursorId) -> (Vec<u8>, Delivery) {
        let mut out = Vec::new();
        let last = loop {
            match io.deliver(id, &mut out).unwrap() {
                Delivery::Data => continue,
                other => break other,
            }
        };
        (out, last)
    }

    // Deliver until the cursor stops producing; split into (seq, frame).
    fn drain(io: &mut StationIO, id: CursorId) -> (Vec<(String, Vec<u8>)>, Delivery) {
        let (out, last) = drain_bytes(io, id);
        let frames = out
            .chunks(8 + RECLEN)
            .map(|c| {
                assert_eq!(&c[..2], b"SL");
                (String::from_utf8(c[2..8].to_vec()).unwrap(), c[8..].to_vec())
            })
            .collect();
        (frames, last)
    }

    fn seqs(frames: &[(String, Vec<u8>)]) -> Vec<String> {
        frames.iter().map(|(s, _)| s.clone()).collect()
    }

    #[test]
    fn commit_numbers_and_stores() {
        let dir = TempDir::new().unwrap();
        let p = params(dir.path(), 4, 10, 3);
        let mut io = station(&p);
        let mut b = builder("BHZ");
        for n in 0..7 {
            assert_eq!(io.commit(&record(&mut b, n)).unwrap(), Sequence::new(n as u32));
        }
        assert_eq!(io.counter(), 7);
        assert_eq!(io.ring().n_records(), 4);
        assert_eq!(io.segments().n_records(), 7);
        assert_eq!(io.segments().n_files(), 3);
        assert_eq!(io.monitor().end_seq(), Sequence::new(7));
    }

    #[test]
    fn evicted_frame_read_from_segments() {
        let dir = TempDir::new().unwrap();
        let p = params(dir.path(), 4, 10, 100);
        let mut io = station(&p);
        let mut b = builder("BHZ");
        let records = fill(&mut io, &mut b, 4);
        let id = io.attach("client", 1000);
        io.data(id, DataStart::Seq(Sequence::new(0)), false);
        assert!(io.ready(id));

        // evicts seq 0 while the cursor sits on it
        let fifth = record(&mut b, 4);
        io.commit(&fifth).unwrap();
        assert_eq!(io.ring().first().and_then(|f| io.ring().sequence(f)), Some(Sequence::new(1)));

        let (frames, last) = drain(&mut io, id);
        assert_eq!(seqs(&frames), vec!["000000", "000001", "000002", "000003", "000004"]);
        assert_eq!(frames[0].1, records[0]);
        assert_eq!(frames[4].1, fifth);
        assert_eq!(last, Delivery::Finished);
        assert!(!io.active(id));
    }

    #[test]
    fn data_all_stays_subscribed() {
        let dir = TempDir::new().unwrap();
        let p = params(dir.path(), 20, 10, 100);
        let mut io = station(&p);
        let mut b = builder("BHZ");
        fill(&mut io, &mut b, 10);
        let id = io.attach("client", 1000);
        io.data(id, DataStart::All, true);

        let (frames, last) = drain(&mut io, id);
        let expected: Vec<String> = (0..10).map(|n| format!("{:06X}", n)).collect();
        assert_eq!(seqs(&frames), expected);
        assert_eq!(last, Delivery::Drained);
        assert!(io.active(id));
        assert!(!io.ready(id));

        io.commit(&record(&mut b, 10)).unwrap();
        assert!(io.ready(id));
        let (frames, _) = drain(&mut io, id);
        assert_eq!(seqs(&frames), vec!["00000A"]);
    }

    #[test]
    fn fetch_all_finishes() {
        let dir = TempDir::new().unwrap();
        let p = params(dir.path(), 20, 10, 100);
        let mut io = station(&p);
        let mut b = builder("BHZ");
        fill(&mut io, &mut b, 10);
        let id = io.attach("client", 1000);
        io.data(id, DataStart::All, false);
        let (frames, last) = drain(&mut io, id);
        assert_eq!(frames.len(), 10);
        assert_eq!(last, Delivery::Finished);
        assert!(io.cursor(id).unwrap().monitor().end_of_data());
    }

    #[test]
    fn live_start_waits_for_new_records() {
        let dir = TempDir::new().unwrap();
        let p = params(dir.path(), 8, 10, 100);
        let mut io = station(&p);
        let mut b = builder("BHZ");
        fill(&mut io, &mut b, 3);
        let id = io.attach("client", 1000);
        io.data(id, DataStart::Live, true);
        assert!(!io.ready(id));
        let (frames, last) = drain(&mut io, id);
        assert!(frames.is_empty());
        assert_eq!(last, Delivery::Drained);
        io.commit(&record(&mut b, 3)).unwrap();
        let (frames, _) = drain(&mut io, id);
        assert_eq!(seqs(&frames), vec!["000003"]);
    }

    // Lagging too far behind is not an error: playback resumes at
    // the live edge.
    #[test]
    fn far_behind_resumes_live() {
        let dir = TempDir::new().unwrap();
        let mut p = params(dir.path(), 4, 2, 2);
        p.seq_gap_limit = 3;
        let mut io = station(&p);
        let mut b = builder("BHZ");
        fill(&mut io, &mut b, 20);
        assert_eq!(io.segments().first().map(|s| s.id()), Some(16));

        let id = io.attach("client", 1000);
        io.data(id, DataStart::Seq(Sequence::new(2)), true);
        assert!(io.active(id));
        assert!(!io.ready(id));
        assert!(!io.cursor(id).unwrap().monitor().begin_seq_valid());
        let (frames, _) = drain(&mut io, id);
        assert!(frames.is_empty());

        io.commit(&record(&mut b, 20)).unwrap();
        let (frames, _) = drain(&mut io, id);
        assert_eq!(seqs(&frames), vec!["000014"]);
    }

    // The lag is reported when the request is placed, not again as
    // the cursor goes on delivering.
    #[test]
    fn far_behind_reported_once() {
        let dir = TempDir::new().unwrap();
        let mut p = params(dir.path(), 4, 2, 2);
        p.seq_gap_limit = 3;
        let mut io = station(&p);
        let mut b = builder("BHZ");
        fill(&mut io, &mut b, 20);
        let id = io.attach("client", 1000);
        assert_eq!(io.cursor(id).unwrap().late_starts(), 0);

        io.data(id, DataStart::Seq(Sequence::new(2)), true);
        assert_eq!(io.cursor(id).unwrap().late_starts(), 1);
        for n in 20..25 {
            drain(&mut io, id);
            io.commit(&record(&mut b, n)).unwrap();
        }
        let (frames, _) = drain(&mut io, id);
        assert_eq!(seqs(&frames), vec!["000018"]);
        assert_eq!(io.cursor(id).unwrap().late_starts(), 1);
        assert_eq!(io.cursor(id).unwrap().monitor().sequence_gaps(), 0);
    }

    #[test]
    fn missing_seq_within_limit_starts_at_oldest() {
        let dir = TempDir::new().unwrap();
        let p = params(dir.path(), 4, 2, 2);
        let mut io = station(&p);
        let mut b = builder("BHZ");
        fill(&mut io, &mut b, 20);
        let id = io.attach("client", 1000);
        io.data(id, DataStart::Seq(Sequence::new(2)), false);
        assert!(io.ready(id));
        let (frames, last) = drain(&mut io, id);
        assert_eq!(seqs(&frames), vec!["000010", "000011", "000012", "000013"]);
        assert_eq!(last, Delivery::Finished);
    }

    #[test]
    fn segment_eviction_moves_reader() {
        let dir = TempDir::new().unwrap();
        let p = params(dir.path(), 2, 2, 2);
        let mut io = station(&p);
        let mut b = builder("BHZ");
        fill(&mut io, &mut b, 4);
        let id = io.attach("client", 1000);
        io.data(id, DataStart::Seq(Sequence::new(0)), false);

        let mut out = Vec::new();
        assert_eq!(io.deliver(id, &mut out).unwrap(), Delivery::Data);
        assert_eq!(&out[..8], b"SL000000");

        // seq 4 opens a third segment and the one being read goes
        for n in 4..6 {
            io.commit(&record(&mut b, n)).unwrap();
        }
        let (frames, last) = drain(&mut io, id);
        assert_eq!(seqs(&frames), vec!["000002", "000003", "000004", "000005"]);
        assert_eq!(last, Delivery::Finished);
        assert_eq!(io.cursor(id).unwrap().monitor().sequence_gaps(), 1);
        assert_eq!(io.monitor().begin_seq(), Sequence::new(2));
    }

    // Records twice the chunk size go out in two deliveries, so a
    // cursor can be caught half way through a frame.
    const LONG: usize = 2 * CHUNK_SIZE;

    fn long_station(dir: &Path, buffers: usize, segments: usize, segsize: usize) -> StationIO {
        let mut p = params(dir, buffers, segments, segsize);
        p.record_length = LONG;
        station(&p)
    }

    #[test]
    fn evicted_mid_frame_continues_from_disk() {
        let dir = TempDir::new().unwrap();
        let mut io = long_station(dir.path(), 4, 10, 100);
        let mut b = RecordBuilder::new("GE", "APE", "", "BHZ", LONG);
        let records = fill(&mut io, &mut b, 4);
        let id = io.attach("client", 1000);
        io.data(id, DataStart::Seq(Sequence::new(0)), false);

        let mut out = Vec::new();
        assert_eq!(io.deliver(id, &mut out).unwrap(), Delivery::Data);
        assert_eq!(out.len(), 8 + CHUNK_SIZE);
        assert!(io.cursor(id).unwrap().mid_frame());

        // seq 0 leaves the ring with half of it sent
        io.commit(&record(&mut b, 4)).unwrap();
        assert_eq!(io.deliver(id, &mut out).unwrap(), Delivery::Data);
        assert!(!io.cursor(id).unwrap().mid_frame());
        assert_eq!(out.len(), 8 + LONG);
        assert_eq!(&out[..8], b"SL000000");
        assert_eq!(&out[8..], &records[0][..]);

        let (rest, last) = drain_bytes(&mut io, id);
        let heads: Vec<&[u8]> = rest.chunks(8 + LONG).map(|f| &f[..8]).collect();
        let expected: [&[u8]; 4] = [b"SL000001", b"SL000002", b"SL000003", b"SL000004"];
        assert_eq!(heads, expected);
        assert_eq!(&rest[8..8 + LONG], &records[1][..]);
        assert_eq!(last, Delivery::Finished);
    }

    #[test]
    fn segment_lost_mid_frame_padded_with_zeros() {
        let dir = TempDir::new().unwrap();
        let mut io = long_station(dir.path(), 2, 2, 2);
        let mut b = RecordBuilder::new("GE", "APE", "", "BHZ", LONG);
        let records = fill(&mut io, &mut b, 4);
        let id = io.attach("client", 1000);
        io.data(id, DataStart::Seq(Sequence::new(0)), false);

        let mut out = Vec::new();
        assert_eq!(io.deliver(id, &mut out).unwrap(), Delivery::Data);
        assert_eq!(&out[..8], b"SL000000");

        // seq 4 opens a third segment and the one being read goes
        for n in 4..6 {
            io.commit(&record(&mut b, n)).unwrap();
        }
        let (rest, last) = drain_bytes(&mut io, id);
        out.extend_from_slice(&rest);
        assert_eq!(last, Delivery::Finished);
        assert_eq!(out.len(), 5 * (8 + LONG));

        let first = &out[..8 + LONG];
        assert_eq!(&first[8..8 + CHUNK_SIZE], &records[0][..CHUNK_SIZE]);
        assert!(first[8 + CHUNK_SIZE..].iter().all(|&x| x == 0));
        let heads: Vec<&[u8]> = out.chunks(8 + LONG).map(|f| &f[..8]).collect();
        let expected: [&[u8]; 5] =
            [b"SL000000", b"SL000002", b"SL000003", b"SL000004", b"SL000005"];
        assert_eq!(heads, expected);
        assert_eq!(&out[2 * (8 + LONG) - LONG..2 * (8 + LONG)], &records[2][..]);
    }

    #[test]
    fn select_filters_streams() {
        let dir = TempDir::new().unwrap();
        let p = params(dir.path(), 20, 10, 100);
        let mut io = station(&p);
        let mut z = builder("BHZ");
        let mut n = builder("BHN");
        for i in 0..3 {
            io.commit(&record(&mut z, i)).unwrap();
            io.commit(&record(&mut n, i)).unwrap();
        }
        let id = io.attach("client", 1000);
        assert!(io.select(id, Some("bhz")));
        assert!(!io.select(id, Some("B*Z")));
        io.data(id, DataStart::All, false);
        let (frames, _) = drain(&mut io, id);
        assert_eq!(seqs(&frames), vec!["000000", "000002", "000004"]);
        assert_eq!(io.cursor(id).unwrap().monitor().txcount(), 3);
    }

    #[test]
    fn time_window_ends() {
        let dir = TempDir::new().unwrap();
        let p = params(dir.path(), 20, 10, 100);
        let mut io = station(&p);
        let mut b = builder("BHZ");
        fill(&mut io, &mut b, 10);
        let id = io.attach("client", 1000);
        assert!(!io.time(id, t(45), Some(t(25))));
        assert!(io.time(id, t(25), Some(t(45))));
        let (frames, last) = drain(&mut io, id);
        assert_eq!(seqs(&frames), vec!["000002", "000003", "000004"]);
        assert_eq!(last, Delivery::Finished);
        assert!(!io.active(id));
    }

    #[test]
    fn restart_continues_sequence() {
        let dir = TempDir::new().unwrap();
        let p = params(dir.path(), 4, 5, 3);
        let mut b = builder("BHZ");
        {
            let mut io = station(&p);
            io.restore_state().unwrap();
            fill(&mut io, &mut b, 7);
            io.save_state().unwrap();
        }
        let mut io = station(&p);
        io.restore_state().unwrap();
        assert!(!dir.path().join(STATE_FILE).exists());
        assert_eq!(io.counter(), 7);
        assert_eq!(io.ring().end_seq(), Sequence::new(7));
        assert_eq!(io.ring().n_records(), 4);
        assert_eq!(io.segments().n_records(), 7);
        assert_eq!(io.monitor().end_seq(), Sequence::new(7));
        assert_eq!(io.commit(&record(&mut b, 7)).unwrap(), Sequence::new(7));

        let id = io.attach("client", 1000);
        io.data(id, DataStart::All, false);
        let (frames, _) = drain(&mut io, id);
        assert_eq!(frames.len(), 8);
    }

    #[test]
    fn unclean_restart_rescans_and_pads() {
        let dir = TempDir::new().unwrap();
        let p = params(dir.path(), 4, 5, 3);
        let mut b = builder("BHZ");
        {
            let mut io = station(&p);
            fill(&mut io, &mut b, 7);
        }
        let mut io = station(&p);
        io.restore_state().unwrap();
        assert_eq!(io.ring().end_seq(), Sequence::new(9));
        assert_eq!(io.monitor().end_seq(), Sequence::new(9));
        assert_eq!(io.monitor().begin_seq(), Sequence::new(0));
        assert_eq!(io.segments().n_records(), 9);
        assert_eq!(io.monitor().streams().count(), 1);

        // blank records are never sent
        let id = io.attach("client", 1000);
        io.data(id, DataStart::All, false);
        let (frames, _) = drain(&mut io, id);
        assert_eq!(frames.len(), 7);
    }

    #[test]
    fn corrupt_snapshot_is_recovered() {
        let dir = TempDir::new().unwrap();
        let p = params(dir.path(), 4, 5, 3);
        let mut b = builder("BHZ");
        {
            let mut io = station(&p);
            fill(&mut io, &mut b, 5);
        }
        fs::write(dir.path().join(STATE_FILE), "<buffer begin_seq=").unwrap();
        let mut io = station(&p);
        io.restore_state().unwrap();
        assert_eq!(io.ring().end_seq(), Sequence::new(7));
        assert!(!dir.path().join(STATE_FILE).exists());
    }

    #[test]
    fn info_lists_connections() {
        let dir = TempDir::new().unwrap();
        let p = params(dir.path(), 4, 5, 3);
        let mut io = station(&p);
        io.attach("10.0.0.1", 1234);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let e = io.info(InfoLevel::Connections, ip).unwrap();
        assert_eq!(e.children().iter().filter(|c| c.name() == "connection").count(), 1);
        let e = io.info(InfoLevel::Stations, ip).unwrap();
        assert!(e.children().is_empty());
    }
}
