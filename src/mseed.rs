//!
//! Mini-SEED glue.  The server treats records as opaque frames
//! except for the fixed section of the data header, which it reads
//! to route, select and time-window packets.  It also builds its own
//! records for raw plugin samples, plugin log messages and the
//! INFO/CAT responses.
//!
//! Records are written big-endian.  Headers are read in either byte
//! order; the order is guessed from the plausibility of the year.
//!
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use std::cmp::Ordering;
use std::fmt;

/// Length of the fixed section of the data header.
pub const FSDH_LEN: usize = 48;
/// Number of leading bytes needed to classify a record.
pub const HEADER_LEN: usize = 64;
/// Offset of the payload in records we build.
pub const DATA_OFFSET: usize = 64;
/// Record length used unless a station says otherwise.
pub const DEFAULT_RECLEN: usize = 512;

const ENCODING_ASCII: u8 = 0;
const ENCODING_INT32: u8 = 3;
const MAX_BLOCKETTES: usize = 32;

///
/// The kind of payload a record carries.  The letter is what
/// selectors use after the dot.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PacketKind {
    Data,
    Detection,
    Calibration,
    Timing,
    Message,
    Blockette,
}

impl PacketKind {
    pub fn from_letter(c: char) -> Option<PacketKind> {
        match c.to_ascii_uppercase() {
            'D' => Some(PacketKind::Data),
            'E' => Some(PacketKind::Detection),
            'C' => Some(PacketKind::Calibration),
            'T' => Some(PacketKind::Timing),
            'L' => Some(PacketKind::Message),
            'O' => Some(PacketKind::Blockette),
            _ => None,
        }
    }
    pub fn letter(self) -> char {
        match self {
            PacketKind::Data => 'D',
            PacketKind::Detection => 'E',
            PacketKind::Calibration => 'C',
            PacketKind::Timing => 'T',
            PacketKind::Message => 'L',
            PacketKind::Blockette => 'O',
        }
    }
}
///
/// Identifies a substream within a station: location, channel and
/// packet kind.
///
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamDescriptor {
    pub location: String,
    pub channel: String,
    pub kind: PacketKind,
}

impl StreamDescriptor {
    pub fn new(location: &str, channel: &str, kind: PacketKind) -> StreamDescriptor {
        StreamDescriptor {
            location: location.to_string(),
            channel: channel.to_string(),
            kind,
        }
    }
}

impl PartialOrd for StreamDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StreamDescriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.location
            .cmp(&other.location)
            .then_with(|| self.channel.cmp(&other.channel))
            .then_with(|| self.kind.cmp(&other.kind))
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}.{}", self.location, self.channel, self.kind.letter())
    }
}

///
/// Read-only view of a record header.  Accessors return None or
/// empty strings rather than failing when fields are malformed.
///
pub struct RecordView<'a> {
    data: &'a [u8],
    big_endian: bool,
}

impl<'a> RecordView<'a> {
    pub fn new(data: &'a [u8]) -> RecordView<'a> {
        let big_endian = if data.len() >= FSDH_LEN {
            let year = u16::from_be_bytes([data[20], data[21]]);
            (1900..=2100).contains(&year)
        } else {
            true
        };
        RecordView { data, big_endian }
    }
    ///
    /// Blank frames (recovery padding) start with a zero byte and
    /// match no selector.
    ///
    pub fn is_blank(&self) -> bool {
        self.data.first().map_or(true, |b| *b == 0)
    }

    fn valid(&self) -> bool {
        self.data.len() >= FSDH_LEN && !self.is_blank()
    }

    fn u16_at(&self, offset: usize) -> u16 {
        let b = [self.data[offset], self.data[offset + 1]];
        if self.big_endian {
            u16::from_be_bytes(b)
        } else {
            u16::from_le_bytes(b)
        }
    }

    fn i16_at(&self, offset: usize) -> i16 {
        self.u16_at(offset) as i16
    }

    fn i32_at(&self, offset: usize) -> i32 {
        let b = [
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ];
        if self.big_endian {
            i32::from_be_bytes(b)
        } else {
            i32::from_le_bytes(b)
        }
    }

    fn text(&self, from: usize, len: usize) -> String {
        if self.data.len() < from + len {
            return String::new();
        }
        String::from_utf8_lossy(&self.data[from..from + len])
            .trim()
            .to_string()
    }

    pub fn station(&self) -> String {
        self.text(8, 5)
    }
    pub fn location(&self) -> String {
        self.text(13, 2)
    }
    pub fn channel(&self) -> String {
        self.text(15, 3)
    }
    pub fn network(&self) -> String {
        self.text(18, 2)
    }
    ///
    /// The 6 digit record number at the start of the header.
    ///
    pub fn record_number(&self) -> Option<u32> {
        if !self.valid() {
            return None;
        }
        std::str::from_utf8(&self.data[0..6])
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
    }

    pub fn num_samples(&self) -> u16 {
        if !self.valid() {
            return 0;
        }
        self.u16_at(30)
    }

    fn rate_factors(&self) -> (i16, i16) {
        if !self.valid() {
            return (0, 0);
        }
        (self.i16_at(32), self.i16_at(34))
    }

    pub fn sample_rate(&self) -> f64 {
        let (fact, mult) = self.rate_factors();
        let (f, m) = (fact as f64, mult as f64);
        match (fact.cmp(&0), mult.cmp(&0)) {
            (Ordering::Greater, Ordering::Greater) => f * m,
            (Ordering::Greater, Ordering::Less) => -f / m,
            (Ordering::Less, Ordering::Greater) => -m / f,
            (Ordering::Less, Ordering::Less) => 1.0 / (f * m),
            _ => 0.0,
        }
    }
    ///
    /// Iterate the blockette chain yielding (offset, type).  Stops at
    /// the end of the chain, on a pointer that leaves the record or
    /// after a bounded number of hops.
    ///
    fn blockettes(&self) -> Vec<(usize, u16)> {
        let mut result = Vec::new();
        if !self.valid() {
            return result;
        }
        let mut offset = self.u16_at(46) as usize;
        while offset >= FSDH_LEN
            && offset + 4 <= self.data.len()
            && result.len() < MAX_BLOCKETTES
        {
            let kind = self.u16_at(offset);
            result.push((offset, kind));
            let next = self.u16_at(offset + 2) as usize;
            if next <= offset {
                break;
            }
            offset = next;
        }
        result
    }
    ///
    /// Start time of the first sample including the blockette 1001
    /// microsecond offset and any time correction not yet applied.
    ///
    pub fn start_time(&self) -> Option<NaiveDateTime> {
        if !self.valid() {
            return None;
        }
        let year = self.u16_at(20) as i32;
        let doy = self.u16_at(22) as u32;
        let (hour, minute, second) = (
            self.data[24] as u32,
            self.data[25] as u32,
            self.data[26] as u32,
        );
        let fract = self.u16_at(28) as i64;
        let base = NaiveDate::from_yo_opt(year, doy)?.and_hms_opt(hour, minute, second.min(59))?;
        let mut usec = fract * 100 + if second == 60 { 1_000_000 } else { 0 };
        for (offset, kind) in self.blockettes() {
            if kind == 1001 && offset + 6 <= self.data.len() {
                usec += self.data[offset + 5] as i8 as i64;
            }
        }
        let activity = self.data[36];
        let correction = self.i32_at(40) as i64;
        if activity & 0x02 == 0 && correction != 0 {
            usec += correction * 100;
        }
        Some(base + Duration::microseconds(usec))
    }
    ///
    /// Time just after the last sample.  Records without a sample
    /// rate end where they start.
    ///
    pub fn end_time(&self) -> Option<NaiveDateTime> {
        let start = self.start_time()?;
        let rate = self.sample_rate();
        if rate <= 0.0 {
            return Some(start);
        }
        let span = (self.num_samples() as f64 * 1_000_000.0 / rate) as i64;
        Some(start + Duration::microseconds(span))
    }
    ///
    /// Classify the record by its blockettes and header fields.
    ///
    pub fn packet_kind(&self) -> Option<PacketKind> {
        if !self.valid() {
            return None;
        }
        for (_, kind) in self.blockettes() {
            match kind {
                200 | 201 => return Some(PacketKind::Detection),
                300 | 310 | 320 | 390 => return Some(PacketKind::Calibration),
                500 => return Some(PacketKind::Timing),
                _ => {}
            }
        }
        let (fact, _) = self.rate_factors();
        let n = self.num_samples();
        if n != 0 && fact == 0 {
            Some(PacketKind::Message)
        } else if n == 0 {
            Some(PacketKind::Blockette)
        } else {
            Some(PacketKind::Data)
        }
    }

    pub fn stream(&self) -> Option<StreamDescriptor> {
        let kind = self.packet_kind()?;
        Some(StreamDescriptor {
            location: self.location(),
            channel: self.channel(),
            kind,
        })
    }
}

fn sample_rate_factors(rate: f64) -> (i16, i16) {
    if rate <= 0.0 {
        return (0, 0);
    }
    if rate >= 1.0 {
        if rate.fract() == 0.0 && rate <= i16::MAX as f64 {
            return (rate as i16, 1);
        }
        if rate * 100.0 <= i16::MAX as f64 {
            return ((rate * 100.0).round() as i16, -100);
        }
        return (rate.round().min(i16::MAX as f64) as i16, 1);
    }
    let period = 1.0 / rate;
    if (period - period.round()).abs() < 1e-9 && period <= i16::MAX as f64 {
        (-(period.round() as i16), 1)
    } else {
        (-(period.round().min(i16::MAX as f64) as i16), 1)
    }
}

fn put_text(rec: &mut [u8], from: usize, len: usize, value: &str) {
    let bytes = value.as_bytes();
    for i in 0..len {
        rec[from + i] = *bytes.get(i).unwrap_or(&b' ');
    }
}

///
/// Builds records for one stream, numbering them as it goes.
///
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    network: String,
    station: String,
    location: String,
    channel: String,
    reclen: usize,
    recno: u32,
}

impl RecordBuilder {
    ///
    /// `reclen` must be a power of two large enough for the header.
    ///
    pub fn new(network: &str, station: &str, location: &str, channel: &str, reclen: usize) -> RecordBuilder {
        assert!(reclen.is_power_of_two() && reclen > DATA_OFFSET);
        RecordBuilder {
            network: network.to_string(),
            station: station.to_string(),
            location: location.to_string(),
            channel: channel.to_string(),
            reclen,
            recno: 1,
        }
    }

    pub fn record_length(&self) -> usize {
        self.reclen
    }
    pub fn sample_capacity(&self) -> usize {
        (self.reclen - DATA_OFFSET) / 4
    }
    pub fn text_capacity(&self) -> usize {
        self.reclen - DATA_OFFSET
    }

    fn header(
        &mut self,
        rec: &mut [u8],
        start: &NaiveDateTime,
        nsamples: usize,
        rate: f64,
        encoding: u8,
        timing: Option<(i32, i32)>,
    ) {
        let recno = format!("{:06}", self.recno % 1_000_000);
        self.recno = (self.recno + 1) % 1_000_000;
        rec[0..6].copy_from_slice(recno.as_bytes());
        rec[6] = b'D';
        rec[7] = b' ';
        put_text(rec, 8, 5, &self.station);
        put_text(rec, 13, 2, &self.location);
        put_text(rec, 15, 3, &self.channel);
        put_text(rec, 18, 2, &self.network);

        let usec = start.nanosecond().min(999_999_999) / 1000;
        rec[20..22].copy_from_slice(&(start.year() as u16).to_be_bytes());
        rec[22..24].copy_from_slice(&(start.ordinal() as u16).to_be_bytes());
        rec[24] = start.hour() as u8;
        rec[25] = start.minute() as u8;
        rec[26] = start.second() as u8;
        rec[27] = 0;
        rec[28..30].copy_from_slice(&((usec / 100) as u16).to_be_bytes());
        rec[30..32].copy_from_slice(&(nsamples as u16).to_be_bytes());
        let (fact, mult) = sample_rate_factors(rate);
        rec[32..34].copy_from_slice(&fact.to_be_bytes());
        rec[34..36].copy_from_slice(&mult.to_be_bytes());
        rec[36] = 0;
        rec[37] = 0;
        rec[38] = 0;
        rec[39] = if timing.is_some() { 2 } else { 1 };
        if let Some((correction_us, _)) = timing {
            rec[36] = 0x02;
            rec[40..44].copy_from_slice(&(correction_us / 100).to_be_bytes());
        }
        rec[44..46].copy_from_slice(&(DATA_OFFSET as u16).to_be_bytes());
        rec[46..48].copy_from_slice(&(FSDH_LEN as u16).to_be_bytes());

        // blockette 1000
        let next = if timing.is_some() { FSDH_LEN + 8 } else { 0 };
        rec[48..50].copy_from_slice(&1000u16.to_be_bytes());
        rec[50..52].copy_from_slice(&(next as u16).to_be_bytes());
        rec[52] = encoding;
        rec[53] = 1;
        rec[54] = self.reclen.trailing_zeros() as u8;
        rec[55] = 0;

        if let Some((_, quality)) = timing {
            rec[56..58].copy_from_slice(&1001u16.to_be_bytes());
            rec[58..60].copy_from_slice(&0u16.to_be_bytes());
            rec[60] = quality.clamp(0, 100) as u8;
            rec[61] = (usec % 100) as u8;
            rec[62] = 0;
            rec[63] = 0;
        }
    }
    ///
    /// Build a data record holding as many of `samples` as fit.
    /// Returns the record and the number of samples consumed.
    ///
    /// `timing` carries the plugin's (usec correction, timing quality)
    /// when known; a negative quality means unknown.
    ///
    pub fn data_record(
        &mut self,
        start: &NaiveDateTime,
        rate: f64,
        samples: &[i32],
        timing: Option<(i32, i32)>,
    ) -> (Vec<u8>, usize) {
        let n = samples.len().min(self.sample_capacity());
        let mut rec = vec![0u8; self.reclen];
        let timing = timing.filter(|(_, q)| *q >= 0);
        self.header(&mut rec, start, n, rate, ENCODING_INT32, timing);
        for (i, s) in samples[..n].iter().enumerate() {
            let at = DATA_OFFSET + i * 4;
            rec[at..at + 4].copy_from_slice(&s.to_be_bytes());
        }
        (rec, n)
    }
    ///
    /// Build an ASCII record.  Text beyond text_capacity is dropped;
    /// callers split long text first.
    ///
    pub fn text_record(&mut self, time: &NaiveDateTime, text: &[u8]) -> Vec<u8> {
        let n = text.len().min(self.text_capacity());
        let mut rec = vec![0u8; self.reclen];
        self.header(&mut rec, time, n, 0.0, ENCODING_ASCII, None);
        rec[DATA_OFFSET..DATA_OFFSET + n].copy_from_slice(&text[..n]);
        rec
    }
    ///
    /// Split arbitrary text into as many ASCII records as needed.
    ///
    pub fn text_records(&mut self, time: &NaiveDateTime, text: &[u8]) -> Vec<Vec<u8>> {
        let cap = self.text_capacity();
        if text.is_empty() {
            return vec![self.text_record(time, text)];
        }
        text.chunks(cap)
            .map(|chunk| self.text_record(time, chunk))
            .collect()
    }
}
