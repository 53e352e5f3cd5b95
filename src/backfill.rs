//! Reordering of late packets before they are committed.
//!
//! A channel whose next packet does not follow on from the last one
//! committed holds that packet back for a while: a delayed packet may
//! still arrive to fill the hole.  Packets leave the buffer in time
//! order, either once the hole is filled or when the buffered span
//! reaches the capacity, in which case the hole is accepted as a real
//! gap.
//!
use crate::timeutil::tdiff_us;
use chrono::NaiveDateTime;
use log::debug;
use std::collections::VecDeque;

///
/// Anything that can sit in a backfilling buffer.
///
pub trait Timed {
    fn start_time(&self) -> NaiveDateTime;
    fn end_time(&self) -> NaiveDateTime;
    fn sample_rate(&self) -> f64;
}

///
/// True if `start` leaves a hole of at least one sample after `last`.
///
fn has_gap(start: &NaiveDateTime, last: &NaiveDateTime, rate: f64) -> bool {
    tdiff_us(start, last) as f64 * 1e-6 * rate >= 1.0
}

#[derive(Debug)]
pub struct Backfilling<P> {
    name: String,
    capacity: f64,
    buffer: VecDeque<(u64, P)>,
    last_commit: Option<NaiveDateTime>,
    current: Option<u64>,
    next_id: u64,
}

impl<P: Timed> Backfilling<P> {
    ///
    /// `capacity` is in seconds; zero or less turns reordering off.
    /// `name` only labels log messages.
    ///
    pub fn new(name: &str, capacity: f64) -> Backfilling<P> {
        Backfilling {
            name: name.to_string(),
            capacity,
            buffer: VecDeque::new(),
            last_commit: None,
            current: None,
            next_id: 0,
        }
    }

    pub fn enabled(&self) -> bool {
        self.capacity > 0.0
    }
    pub fn len(&self) -> usize {
        self.buffer.len()
    }
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
    pub fn last_commit(&self) -> Option<NaiveDateTime> {
        self.last_commit
    }
    ///
    /// Move the end of committed data forward; used when samples
    /// without time stamps continue the last committed packet.
    ///
    pub fn advance(&mut self, t: NaiveDateTime) {
        if self.last_commit.is_some() {
            self.last_commit = Some(t);
        }
    }
    ///
    /// The packet most recently held back by push(), while it is
    /// still buffered.  Untimed samples that follow it belong to it.
    ///
    pub fn current_mut(&mut self) -> Option<&mut P> {
        let id = self.current?;
        self.buffer
            .iter_mut()
            .find(|(i, _)| *i == id)
            .map(|(_, p)| p)
    }
    ///
    /// Offer a packet.  Returns the packets to commit now, in
    /// order; possibly none if `packet` was held back.
    ///
    pub fn push(&mut self, packet: P) -> Vec<P> {
        if !self.enabled() {
            return vec![packet];
        }
        self.current = None;
        let last = match self.last_commit {
            Some(t) => t,
            None => {
                self.last_commit = Some(packet.end_time());
                return vec![packet];
            }
        };
        if has_gap(&packet.start_time(), &last, packet.sample_rate()) {
            let gap = tdiff_us(&packet.start_time(), &last) as f64 * 1e-6;
            let id = self.insert(packet);
            self.current = Some(id);
            debug!(
                "{} data queued (currently {} pkts) due to a gap of {}s",
                self.name,
                self.buffer.len(),
                gap
            );
            return self.sync();
        }
        if packet.end_time() < last {
            debug!("{} sent out-of-order record, buffer too small?", self.name);
            return vec![packet];
        }
        self.last_commit = Some(packet.end_time());
        let mut out = vec![packet];
        out.extend(self.sync());
        out
    }
    ///
    /// Release everything still buffered, gaps or not.
    ///
    pub fn flush(&mut self) -> Vec<P> {
        self.current = None;
        let out: Vec<P> = self.buffer.drain(..).map(|(_, p)| p).collect();
        if let Some(p) = out.last() {
            self.last_commit = Some(p.end_time());
        }
        out
    }

    // Sorted by end time; equal end times keep arrival order.
    fn insert(&mut self, packet: P) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let end = packet.end_time();
        let at = self
            .buffer
            .iter()
            .position(|(_, p)| p.end_time() > end)
            .unwrap_or(self.buffer.len());
        self.buffer.insert(at, (id, packet));
        id
    }

    fn release(&mut self, out: &mut Vec<P>) {
        if let Some((id, p)) = self.buffer.pop_front() {
            if self.current == Some(id) {
                self.current = None;
            }
            self.last_commit = Some(p.end_time());
            out.push(p);
        }
    }

    fn span(&self) -> f64 {
        match (self.buffer.front(), self.buffer.back()) {
            (Some((_, first)), Some((_, last))) => {
                tdiff_us(&last.end_time(), &first.start_time()) as f64 * 1e-6
            }
            _ => 0.0,
        }
    }

    ///
    /// Release what can go now; needed after the current packet grew.
    ///
    pub fn sync(&mut self) -> Vec<P> {
        let mut out = Vec::new();
        while !self.buffer.is_empty() && self.span() >= self.capacity {
            self.release(&mut out);
            debug!(
                "{} trimming buffer to its capacity (still {} pkts)",
                self.name,
                self.buffer.len()
            );
        }
        while let (Some((_, first)), Some(last)) = (self.buffer.front(), self.last_commit) {
            if has_gap(&first.start_time(), &last, first.sample_rate()) {
                break;
            }
            self.release(&mut out);
            debug!(
                "{} flushed continuous records from buffer (still {} pkts)",
                self.name,
                self.buffer.len()
            );
        }
        out
    }
}
