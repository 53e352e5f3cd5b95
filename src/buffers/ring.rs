use crate::sequence::Sequence;
use std::collections::VecDeque;

/// Index of a slot in the ring's arena.  Stays valid for the life of
/// the ring; enlarging only appends slots.
pub type FrameId = usize;

///
/// Receives the ring's lifecycle events.  Both calls get the ring
/// itself so the observer can look at the frame and its neighbours.
///
pub trait RingObserver {
    ///
    /// `frame` (the oldest committed frame) is about to be recycled.
    /// Its data, sequence and successor are still readable.
    ///
    fn frame_evicted(&mut self, ring: &RingBuffer, frame: FrameId);
    ///
    /// `frame` was just committed as the newest frame.
    ///
    fn frame_committed(&mut self, ring: &RingBuffer, frame: FrameId);
}

///
/// An observer that ignores everything; used while reloading frames
/// at startup, before anyone can be reading.
///
pub struct NullObserver;

impl RingObserver for NullObserver {
    fn frame_evicted(&mut self, _ring: &RingBuffer, _frame: FrameId) {}
    fn frame_committed(&mut self, _ring: &RingBuffer, _frame: FrameId) {}
}

#[derive(Debug)]
struct Slot {
    data: Box<[u8]>,
    seq: Option<Sequence>,
    prev: Option<FrameId>,
    next: Option<FrameId>,
}

impl Slot {
    fn new(frame_size: usize) -> Slot {
        Slot {
            data: vec![0u8; frame_size].into_boxed_slice(),
            seq: None,
            prev: None,
            next: None,
        }
    }
}

///
/// Fixed capacity in-memory frame buffer.  Committed frames form a
/// doubly linked window from oldest to newest; slots that are not
/// in the window wait on a free list.  When no slot is free the
/// oldest committed frame is recycled.
///
/// The oldest frame's sequence is always `end_seq - n_records`.
///
#[derive(Debug)]
pub struct RingBuffer {
    frame_size: usize,
    slots: Vec<Slot>,
    free: VecDeque<FrameId>,
    first: Option<FrameId>,
    last: Option<FrameId>,
    pending: Option<FrameId>,
    end_seq: Sequence,
    used: usize,
}

impl RingBuffer {
    ///
    /// Create a ring of `capacity` slots of `frame_size` bytes.
    /// Fewer than two slots cannot hold a frame while another is
    /// being filled.
    ///
    pub fn new(capacity: usize, frame_size: usize) -> RingBuffer {
        assert!(capacity >= 2, "ring buffer needs at least two slots");
        RingBuffer {
            frame_size,
            slots: (0..capacity).map(|_| Slot::new(frame_size)).collect(),
            free: (0..capacity).collect(),
            first: None,
            last: None,
            pending: None,
            end_seq: Sequence::default(),
            used: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }
    pub fn n_records(&self) -> usize {
        self.used
    }
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }
    /// Oldest committed frame.
    pub fn first(&self) -> Option<FrameId> {
        self.first
    }
    /// Newest committed frame.
    pub fn last(&self) -> Option<FrameId> {
        self.last
    }
    pub fn next(&self, frame: FrameId) -> Option<FrameId> {
        self.slots[frame].next
    }
    pub fn sequence(&self, frame: FrameId) -> Option<Sequence> {
        self.slots[frame].seq
    }
    pub fn data(&self, frame: FrameId) -> &[u8] {
        &self.slots[frame].data
    }
    ///
    /// Sequence number the next committed frame will get.
    ///
    pub fn end_seq(&self) -> Sequence {
        self.end_seq
    }
    ///
    /// Sequence of the oldest retained frame, or end_seq when the
    /// ring is empty.
    ///
    pub fn begin_seq(&self) -> Sequence {
        self.end_seq - self.used as u32
    }
    ///
    /// Set the sequence the next committed frame gets.  Only
    /// meaningful on an empty ring.
    ///
    pub fn init_seq(&mut self, seq: Sequence) {
        debug_assert!(self.used == 0);
        self.end_seq = seq;
    }
    ///
    /// Locate the frame carrying `seq`.
    ///
    pub fn find(&self, seq: Sequence) -> Option<FrameId> {
        let offset = seq.distance_from(self.begin_seq()) as usize;
        if offset >= self.used {
            return None;
        }
        // walk from whichever end is closer
        if offset <= self.used / 2 {
            let mut frame = self.first;
            for _ in 0..offset {
                frame = frame.and_then(|f| self.slots[f].next);
            }
            frame
        } else {
            let mut frame = self.last;
            for _ in 0..(self.used - 1 - offset) {
                frame = frame.and_then(|f| self.slots[f].prev);
            }
            frame
        }
    }
    ///
    /// Obtain a slot to fill.  If none is free the oldest committed
    /// frame is announced to `observer` and then recycled.  Calling
    /// again before queue_buffer returns the same slot.
    ///
    pub fn get_buffer(&mut self, observer: &mut dyn RingObserver) -> FrameId {
        if let Some(pending) = self.pending {
            return pending;
        }
        let frame = match self.free.pop_front() {
            Some(frame) => frame,
            None => match self.first {
                Some(oldest) => {
                    observer.frame_evicted(self, oldest);
                    self.unlink_first();
                    oldest
                }
                None => panic!("ring buffer has neither free nor committed slots"),
            },
        };
        self.pending = Some(frame);
        frame
    }
    ///
    /// Mutable access to the slot handed out by get_buffer.
    ///
    pub fn frame_mut(&mut self, frame: FrameId) -> &mut [u8] {
        debug_assert_eq!(Some(frame), self.pending);
        &mut self.slots[frame].data
    }
    ///
    /// Commit the slot obtained from get_buffer: it gets the next
    /// sequence number, becomes the newest frame and `observer` is
    /// told about it.
    ///
    pub fn queue_buffer(&mut self, frame: FrameId, observer: &mut dyn RingObserver) {
        assert_eq!(Some(frame), self.pending, "queued a frame that was not handed out");
        self.pending = None;
        self.link_last(frame);
        observer.frame_committed(self, frame);
    }
    ///
    /// Append a frame without any notification.  Used to reload
    /// frames from disk at startup.
    ///
    pub fn load_frame(&mut self, data: &[u8]) {
        let frame = self.get_buffer(&mut NullObserver);
        let n = data.len().min(self.frame_size);
        let slot = &mut self.slots[frame].data;
        slot[..n].copy_from_slice(&data[..n]);
        slot[n..].iter_mut().for_each(|b| *b = 0);
        self.pending = None;
        self.link_last(frame);
    }
    ///
    /// Commit `count` zero-filled frames.  Blank frames never match
    /// a client's selection; they pad the sequence space after an
    /// unclean shutdown.
    ///
    pub fn create_blank_buffers(&mut self, count: usize, observer: &mut dyn RingObserver) {
        for _ in 0..count {
            let frame = self.get_buffer(observer);
            self.frame_mut(frame).iter_mut().for_each(|b| *b = 0);
            self.queue_buffer(frame, observer);
        }
    }
    ///
    /// Add `count` free slots.  Existing frame ids stay valid.
    ///
    pub fn enlarge(&mut self, count: usize) {
        for _ in 0..count {
            self.free.push_back(self.slots.len());
            self.slots.push(Slot::new(self.frame_size));
        }
    }

    fn link_last(&mut self, frame: FrameId) {
        let seq = self.end_seq;
        self.end_seq.increment();
        let slot = &mut self.slots[frame];
        slot.seq = Some(seq);
        slot.prev = self.last;
        slot.next = None;
        match self.last {
            Some(last) => self.slots[last].next = Some(frame),
            None => self.first = Some(frame),
        }
        self.last = Some(frame);
        self.used += 1;
    }

    fn unlink_first(&mut self) {
        if let Some(oldest) = self.first {
            let next = self.slots[oldest].next;
            match next {
                Some(n) => self.slots[n].prev = None,
                None => self.last = None,
            }
            self.first = next;
            let slot = &mut self.slots[oldest];
            slot.seq = None;
            slot.next = None;
            slot.prev = None;
            self.used -= 1;
        }
    }
}
