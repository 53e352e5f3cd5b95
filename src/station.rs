//! Turns what plugins send into records committed to a station.
//!
//! Mini-SEED records are committed as they are, optionally through
//! a per stream backfilling buffer.  Raw samples go through a
//! channel encoder per configured input, which keeps the sample
//! clock, cuts records as they fill and reports time jumps.  Log
//! text becomes `LOG` records.
//!
use crate::backfill::{Backfilling, Timed};
use crate::mseed::{PacketKind, RecordBuilder, RecordView};
use crate::plugin::{Payload, PluginPacket};
use crate::stationio::SharedStation;
use crate::timeutil::tdiff_us;
use chrono::{Duration, NaiveDateTime};
use log::{error, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Channel name of plugin log records.
pub const LOG_CHANNEL: &str = "LOG";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("unsupported Mini-SEED packet size ({0} instead of {1})")]
    RecordSize(usize, usize),
}

///
/// A plugin input and the stream its samples become.
///
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelParams {
    pub input: String,
    pub location: String,
    pub channel: String,
    pub rate: f64,
}

///
/// What a Station needs besides its StationIO.  `proc_gap_warn`
/// is in microseconds, `backfill_capacity` in seconds.
///
#[derive(Debug, Clone, PartialEq)]
pub struct IngestParams {
    pub network: String,
    pub name: String,
    pub record_length: usize,
    pub backfill_capacity: f64,
    pub proc_gap_warn: i64,
    pub channels: Vec<ChannelParams>,
}

fn samples_duration(n: usize, rate: f64) -> Duration {
    if rate <= 0.0 {
        return Duration::zero();
    }
    Duration::microseconds((n as f64 * 1e6 / rate).round() as i64)
}

#[derive(Debug)]
struct RawPacket {
    start: NaiveDateTime,
    rate: f64,
    usec_correction: i32,
    timing_quality: i32,
    samples: Vec<i32>,
    flush: bool,
}

impl Timed for RawPacket {
    fn start_time(&self) -> NaiveDateTime {
        self.start
    }
    fn end_time(&self) -> NaiveDateTime {
        self.start + samples_duration(self.samples.len(), self.rate)
    }
    fn sample_rate(&self) -> f64 {
        self.rate
    }
}

#[derive(Debug)]
struct MseedPacket {
    data: Vec<u8>,
    start: NaiveDateTime,
    end: NaiveDateTime,
    rate: f64,
}

impl Timed for MseedPacket {
    fn start_time(&self) -> NaiveDateTime {
        self.start
    }
    fn end_time(&self) -> NaiveDateTime {
        self.end
    }
    fn sample_rate(&self) -> f64 {
        self.rate
    }
}

///
/// Packs the samples of one input into records.  `start` is the
/// time of the first pending sample.
///
#[derive(Debug)]
struct ChannelEncoder {
    label: String,
    builder: RecordBuilder,
    rate: f64,
    gap_warn: i64,
    start: Option<NaiveDateTime>,
    pending: Vec<i32>,
    timing: Option<(i32, i32)>,
    backfilling: Backfilling<RawPacket>,
}

impl ChannelEncoder {
    fn new(label: String, builder: RecordBuilder, rate: f64, gap_warn: i64, backfill: f64) -> ChannelEncoder {
        ChannelEncoder {
            backfilling: Backfilling::new(&label, backfill),
            label,
            builder,
            rate,
            gap_warn,
            start: None,
            pending: Vec::new(),
            timing: None,
        }
    }

    fn next_time(&self) -> Option<NaiveDateTime> {
        self.start
            .map(|s| s + samples_duration(self.pending.len(), self.rate))
    }

    fn warn_gap(&self, gap: i64, how: &str) {
        if self.gap_warn != 0 && gap.abs() >= self.gap_warn {
            warn!(
                "{} time gap {:.6} seconds ({})",
                self.label,
                gap as f64 / 1e6,
                how
            );
        }
    }

    fn emit(&mut self, out: &mut Vec<Vec<u8>>) {
        let start = match self.start {
            Some(s) if !self.pending.is_empty() => s,
            _ => return,
        };
        let (rec, n) = self
            .builder
            .data_record(&start, self.rate, &self.pending, self.timing);
        self.pending.drain(..n);
        self.start = Some(start + samples_duration(n, self.rate));
        out.push(rec);
    }

    fn flush(&mut self, out: &mut Vec<Vec<u8>>) {
        while !self.pending.is_empty() {
            self.emit(out);
        }
    }
    ///
    /// Samples continuing the stream.  Dropped if the stream has no
    /// time yet.
    ///
    fn push(&mut self, samples: &[i32], out: &mut Vec<Vec<u8>>) {
        if self.start.is_none() {
            return;
        }
        self.pending.extend_from_slice(samples);
        while self.pending.len() >= self.builder.sample_capacity() {
            self.emit(out);
        }
    }
    ///
    /// Samples with a time stamp.  A stamp more than half a sample
    /// off the running clock closes the pending record and restarts
    /// the clock there.
    ///
    fn send_data(&mut self, t: NaiveDateTime, correction: i32, quality: i32, samples: &[i32], out: &mut Vec<Vec<u8>>) {
        self.timing = Some((correction, quality));
        match self.next_time() {
            Some(expected) => {
                let gap = tdiff_us(&t, &expected);
                self.warn_gap(gap, "detected");
                let half = if self.rate > 0.0 { 0.5e6 / self.rate } else { 0.0 };
                if gap.abs() as f64 > half {
                    self.flush(out);
                    self.start = Some(t);
                }
            }
            None => self.start = Some(t),
        }
        self.push(samples, out);
    }

    fn send_packet(&mut self, p: RawPacket, out: &mut Vec<Vec<u8>>) {
        self.send_data(p.start, p.usec_correction, p.timing_quality, &p.samples, out);
        if p.flush {
            self.flush(out);
        }
    }
    ///
    /// `count` samples are missing: close the pending record and
    /// move the clock on.
    ///
    fn add_ticks(&mut self, count: i32, correction: i32, quality: i32, out: &mut Vec<Vec<u8>>) {
        self.flush(out);
        self.timing = Some((correction, quality));
        if let Some(s) = self.start {
            let skip = samples_duration(count.max(0) as usize, self.rate);
            self.start = Some(s + skip);
            self.warn_gap(skip.num_microseconds().unwrap_or(i64::MAX), "explicit");
        }
    }
}

///
/// The acquisition side of one station.
///
#[derive(Debug)]
pub struct Station {
    key: String,
    io: SharedStation,
    params: IngestParams,
    encoders: BTreeMap<String, ChannelEncoder>,
    ignored: BTreeSet<String>,
    log_builder: RecordBuilder,
    mseed_backfilling: BTreeMap<String, Backfilling<MseedPacket>>,
    minbufs: usize,
}

impl Station {
    pub fn new(io: SharedStation, params: IngestParams) -> Station {
        let key = io.borrow().key().to_string();
        Station {
            log_builder: RecordBuilder::new(
                &params.network,
                &params.name,
                "",
                LOG_CHANNEL,
                params.record_length,
            ),
            key,
            io,
            params,
            encoders: BTreeMap::new(),
            ignored: BTreeSet::new(),
            mseed_backfilling: BTreeMap::new(),
            minbufs: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
    pub fn io(&self) -> &SharedStation {
        &self.io
    }

    fn commit(&self, records: Vec<Vec<u8>>) {
        let mut io = self.io.borrow_mut();
        for rec in records {
            if let Err(e) = io.commit(&rec) {
                error!("{}: {}", self.key, e);
            }
        }
    }
    ///
    /// The encoder of a configured input, created on first use.
    /// A station keeps at least three ring frames per encoder.
    ///
    fn encoder(&mut self, plugin: &str, input: &str) -> Option<&mut ChannelEncoder> {
        if !self.encoders.contains_key(input) {
            let chan = match self.params.channels.iter().find(|c| c.input == input) {
                Some(c) => c.clone(),
                None => {
                    if self.ignored.insert(input.to_string()) {
                        warn!("{} channel {} ignored", plugin, input);
                    }
                    return None;
                }
            };
            self.minbufs += 3;
            {
                let mut io = self.io.borrow_mut();
                let have = io.ring().capacity();
                if have < self.minbufs {
                    io.enlarge(self.minbufs - have);
                    info!(
                        "increased the number of buffers for station {} to {}",
                        self.key, self.minbufs
                    );
                }
            }
            let builder = RecordBuilder::new(
                &self.params.network,
                &self.params.name,
                &chan.location,
                &chan.channel,
                self.params.record_length,
            );
            let encoder = ChannelEncoder::new(
                format!("{} : {}", self.key, input),
                builder,
                chan.rate,
                self.params.proc_gap_warn,
                self.params.backfill_capacity,
            );
            self.encoders.insert(input.to_string(), encoder);
        }
        self.encoders.get_mut(input)
    }
    ///
    /// Handle one packet from plugin `plugin`.  An error means the
    /// plugin is sending something this station cannot take.
    ///
    pub fn handle(&mut self, plugin: &str, packet: &PluginPacket) -> Result<(), IngestError> {
        let mut out = Vec::new();
        let input = packet.channel.as_str();
        match &packet.payload {
            Payload::Mseed(rec) => {
                if rec.len() != self.params.record_length {
                    return Err(IngestError::RecordSize(rec.len(), self.params.record_length));
                }
                self.send_mseed(rec, &mut out);
            }
            Payload::Log { time, text } => {
                let n = text.len().min(self.log_builder.text_capacity());
                out.push(self.log_builder.text_record(time, &text[..n]));
            }
            Payload::RawTime {
                time,
                usec_correction,
                timing_quality,
                samples,
            } => {
                if let Some(enc) = self.encoder(plugin, input) {
                    let p = RawPacket {
                        start: *time,
                        rate: enc.rate,
                        usec_correction: *usec_correction,
                        timing_quality: *timing_quality,
                        samples: samples.clone(),
                        flush: false,
                    };
                    for p in enc.backfilling.push(p) {
                        enc.send_packet(p, &mut out);
                    }
                }
            }
            Payload::Raw(samples) => {
                if let Some(enc) = self.encoder(plugin, input) {
                    if let Some(current) = enc.backfilling.current_mut() {
                        current.samples.extend_from_slice(samples);
                        for p in enc.backfilling.sync() {
                            enc.send_packet(p, &mut out);
                        }
                    } else {
                        enc.push(samples, &mut out);
                        if let Some(t) = enc.next_time() {
                            enc.backfilling.advance(t);
                        }
                    }
                }
            }
            Payload::Gap {
                usec_correction,
                timing_quality,
                count,
            } => {
                if let Some(enc) = self.encoder(plugin, input) {
                    enc.add_ticks(*count, *usec_correction, *timing_quality, &mut out);
                }
            }
            Payload::Flush => {
                if let Some(enc) = self.encoder(plugin, input) {
                    match enc.backfilling.current_mut() {
                        Some(current) => current.flush = true,
                        None => enc.flush(&mut out),
                    }
                }
            }
        }
        self.commit(out);
        Ok(())
    }

    fn send_mseed(&mut self, rec: &[u8], out: &mut Vec<Vec<u8>>) {
        let view = RecordView::new(rec);
        let timed = match (view.packet_kind(), view.start_time(), view.end_time()) {
            (Some(PacketKind::Data), Some(start), Some(end)) => Some((start, end)),
            _ => None,
        };
        let (start, end) = match timed {
            Some(t) if self.params.backfill_capacity > 0.0 => t,
            _ => {
                out.push(rec.to_vec());
                return;
            }
        };
        let id = format!("{}{}", view.location(), view.channel());
        let capacity = self.params.backfill_capacity;
        let label = format!("{} channel {}", self.key, id);
        let bf = self
            .mseed_backfilling
            .entry(id)
            .or_insert_with(|| Backfilling::new(&label, capacity));
        let p = MseedPacket {
            data: rec.to_vec(),
            start,
            end,
            rate: view.sample_rate(),
        };
        out.extend(bf.push(p).into_iter().map(|p| p.data));
    }
    ///
    /// Commit everything held back: backfilling buffers, gaps and
    /// all, and partly filled records.  Used at shutdown.
    ///
    pub fn flush(&mut self) {
        let mut out = Vec::new();
        for enc in self.encoders.values_mut() {
            for p in enc.backfilling.flush() {
                enc.send_packet(p, &mut out);
            }
            enc.flush(&mut out);
        }
        for bf in self.mseed_backfilling.values_mut() {
            out.extend(bf.flush().into_iter().map(|p| p.data));
        }
        self.commit(out);
    }
}
