use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::os::unix::io::RawFd;
use thiserror::Error;

/// Descriptor on which a plugin writes its packets.
pub const PLUGIN_FD: RawFd = 63;
/// Bytes of station id in the header.
pub const PLUGIN_SIDLEN: usize = 10;
/// Bytes of channel id in the header.
pub const PLUGIN_CIDLEN: usize = 10;
/// Largest payload a plugin may send.
pub const PLUGIN_MAX_DATA_BYTES: usize = 4000;
/// Size of the fixed header.
pub const PLUGIN_HEADER_LEN: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("invalid data size ({0})")]
    InvalidSize(i32),
    #[error("invalid data type ({0})")]
    UnknownType(i32),
    #[error("invalid time {0}")]
    InvalidTime(String),
}

pub type PacketResult<T> = Result<T, PacketError>;

///
/// The packet type tag in the header.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    RawDataTime = 8,
    RawData = 9,
    RawDataGap = 10,
    RawDataFlush = 11,
    Log = 12,
    Mseed = 13,
}

impl TryFrom<i32> for PacketType {
    type Error = PacketError;

    fn try_from(v: i32) -> PacketResult<PacketType> {
        match v {
            8 => Ok(PacketType::RawDataTime),
            9 => Ok(PacketType::RawData),
            10 => Ok(PacketType::RawDataGap),
            11 => Ok(PacketType::RawDataFlush),
            12 => Ok(PacketType::Log),
            13 => Ok(PacketType::Mseed),
            other => Err(PacketError::UnknownType(other)),
        }
    }
}

///
/// Time as plugins send it: year, day of year, time of day.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketTime {
    pub year: i32,
    pub yday: i32,
    pub hour: i32,
    pub minute: i32,
    pub second: i32,
    pub usec: i32,
}

impl PacketTime {
    pub fn from_datetime(t: &NaiveDateTime) -> PacketTime {
        use chrono::{Datelike, Timelike};
        PacketTime {
            year: t.year(),
            yday: t.ordinal() as i32,
            hour: t.hour() as i32,
            minute: t.minute() as i32,
            second: t.second() as i32,
            usec: (t.nanosecond() / 1000) as i32,
        }
    }

    pub fn to_datetime(&self) -> PacketResult<NaiveDateTime> {
        let bad = || PacketError::InvalidTime(format!("{:?}", self));
        if !(0..24).contains(&self.hour)
            || !(0..60).contains(&self.minute)
            || !(0..=60).contains(&self.second)
            || !(0..1_000_000).contains(&self.usec)
        {
            return Err(bad());
        }
        let day = NaiveDate::from_yo_opt(self.year, self.yday as u32).ok_or_else(bad)?;
        let midnight = day.and_hms_opt(0, 0, 0).ok_or_else(bad)?;
        Ok(midnight
            + Duration::seconds(
                self.hour as i64 * 3600 + self.minute as i64 * 60 + self.second as i64,
            )
            + Duration::microseconds(self.usec as i64))
    }
}

///
/// The fixed packet header, in the plugin host's byte order.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub packtype: i32,
    pub station: String,
    pub channel: String,
    pub time: PacketTime,
    pub usec_correction: i32,
    pub timing_quality: i32,
    pub data_size: i32,
}

fn int_at(buf: &[u8], at: usize) -> i32 {
    i32::from_ne_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn id_at(buf: &[u8], at: usize, len: usize) -> String {
    let raw = &buf[at..at + len];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(len);
    String::from_utf8_lossy(&raw[..end]).trim().to_string()
}

fn put_id(buf: &mut [u8], at: usize, len: usize, id: &str) {
    let bytes = id.as_bytes();
    let n = bytes.len().min(len);
    buf[at..at + n].copy_from_slice(&bytes[..n]);
}

impl PacketHeader {
    pub fn parse(buf: &[u8; PLUGIN_HEADER_LEN]) -> PacketHeader {
        PacketHeader {
            packtype: int_at(buf, 0),
            station: id_at(buf, 4, PLUGIN_SIDLEN),
            channel: id_at(buf, 4 + PLUGIN_SIDLEN, PLUGIN_CIDLEN),
            time: PacketTime {
                year: int_at(buf, 24),
                yday: int_at(buf, 28),
                hour: int_at(buf, 32),
                minute: int_at(buf, 36),
                second: int_at(buf, 40),
                usec: int_at(buf, 44),
            },
            usec_correction: int_at(buf, 48),
            timing_quality: int_at(buf, 52),
            data_size: int_at(buf, 56),
        }
    }

    pub fn encode(&self) -> [u8; PLUGIN_HEADER_LEN] {
        let mut buf = [0u8; PLUGIN_HEADER_LEN];
        let ints = [
            (0, self.packtype),
            (24, self.time.year),
            (28, self.time.yday),
            (32, self.time.hour),
            (36, self.time.minute),
            (40, self.time.second),
            (44, self.time.usec),
            (48, self.usec_correction),
            (52, self.timing_quality),
            (56, self.data_size),
        ];
        for (at, v) in ints.iter() {
            buf[*at..*at + 4].copy_from_slice(&v.to_ne_bytes());
        }
        put_id(&mut buf, 4, PLUGIN_SIDLEN, &self.station);
        put_id(&mut buf, 4 + PLUGIN_SIDLEN, PLUGIN_CIDLEN, &self.channel);
        buf
    }

    pub fn kind(&self) -> PacketResult<PacketType> {
        PacketType::try_from(self.packtype)
    }
    ///
    /// Payload bytes that follow this header.  Sample packets count
    /// samples in data_size, text and record packets count bytes.
    ///
    pub fn payload_len(&self) -> PacketResult<usize> {
        let bytes = match self.kind()? {
            PacketType::RawDataTime | PacketType::RawData => self.data_size.checked_mul(4),
            PacketType::Log | PacketType::Mseed => Some(self.data_size),
            PacketType::RawDataGap | PacketType::RawDataFlush => Some(0),
        };
        match bytes {
            Some(n) if n >= 0 && n as usize <= PLUGIN_MAX_DATA_BYTES => Ok(n as usize),
            _ => Err(PacketError::InvalidSize(self.data_size)),
        }
    }
}

///
/// What a plugin can send.
///
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Samples starting at a given time.
    RawTime {
        time: NaiveDateTime,
        usec_correction: i32,
        timing_quality: i32,
        samples: Vec<i32>,
    },
    /// Samples continuing the previous ones.
    Raw(Vec<i32>),
    /// `count` samples are missing.
    Gap {
        usec_correction: i32,
        timing_quality: i32,
        count: i32,
    },
    /// Send out what is pending for the channel.
    Flush,
    Log {
        time: NaiveDateTime,
        text: Vec<u8>,
    },
    /// A complete Mini-SEED record.
    Mseed(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PluginPacket {
    pub station: String,
    pub channel: String,
    pub payload: Payload,
}

fn samples(data: &[u8]) -> Vec<i32> {
    data.chunks_exact(4)
        .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

impl PluginPacket {
    pub fn decode(head: &PacketHeader, data: &[u8]) -> PacketResult<PluginPacket> {
        let payload = match head.kind()? {
            PacketType::RawDataTime => Payload::RawTime {
                time: head.time.to_datetime()?,
                usec_correction: head.usec_correction,
                timing_quality: head.timing_quality,
                samples: samples(data),
            },
            PacketType::RawData => Payload::Raw(samples(data)),
            PacketType::RawDataGap => Payload::Gap {
                usec_correction: head.usec_correction,
                timing_quality: head.timing_quality,
                count: head.data_size,
            },
            PacketType::RawDataFlush => Payload::Flush,
            PacketType::Log => Payload::Log {
                time: head.time.to_datetime()?,
                text: data.to_vec(),
            },
            PacketType::Mseed => Payload::Mseed(data.to_vec()),
        };
        Ok(PluginPacket {
            station: head.station.clone(),
            channel: head.channel.clone(),
            payload,
        })
    }
    ///
    /// The bytes a plugin would write for this packet.
    ///
    pub fn encode(&self) -> Vec<u8> {
        let mut head = PacketHeader {
            packtype: 0,
            station: self.station.clone(),
            channel: self.channel.clone(),
            time: PacketTime::default(),
            usec_correction: 0,
            timing_quality: -1,
            data_size: 0,
        };
        let mut data = Vec::new();
        match &self.payload {
            Payload::RawTime {
                time,
                usec_correction,
                timing_quality,
                samples,
            } => {
                head.packtype = PacketType::RawDataTime as i32;
                head.time = PacketTime::from_datetime(time);
                head.usec_correction = *usec_correction;
                head.timing_quality = *timing_quality;
                head.data_size = samples.len() as i32;
                samples.iter().for_each(|s| data.extend_from_slice(&s.to_ne_bytes()));
            }
            Payload::Raw(samples) => {
                head.packtype = PacketType::RawData as i32;
                head.data_size = samples.len() as i32;
                samples.iter().for_each(|s| data.extend_from_slice(&s.to_ne_bytes()));
            }
            Payload::Gap {
                usec_correction,
                timing_quality,
                count,
            } => {
                head.packtype = PacketType::RawDataGap as i32;
                head.usec_correction = *usec_correction;
                head.timing_quality = *timing_quality;
                head.data_size = *count;
            }
            Payload::Flush => head.packtype = PacketType::RawDataFlush as i32,
            Payload::Log { time, text } => {
                head.packtype = PacketType::Log as i32;
                head.time = PacketTime::from_datetime(time);
                head.data_size = text.len() as i32;
                data.extend_from_slice(text);
            }
            Payload::Mseed(rec) => {
                head.packtype = PacketType::Mseed as i32;
                head.data_size = rec.len() as i32;
                data.extend_from_slice(rec);
            }
        }
        let mut out = head.encode().to_vec();
        out.extend_from_slice(&data);
        out
    }
}

///
/// Reassembles packets from the bytes read off a plugin pipe.
///
#[derive(Debug, Default)]
pub struct PacketReader {
    buf: Vec<u8>,
}

impl PacketReader {
    pub fn new() -> PacketReader {
        PacketReader::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
    ///
    /// The next complete packet, if there is one.  A header with a
    /// bad size or type is an error; the stream cannot be resynced
    /// after that.
    ///
    pub fn next_packet(&mut self) -> PacketResult<Option<PluginPacket>> {
        if self.buf.len() < PLUGIN_HEADER_LEN {
            return Ok(None);
        }
        let mut raw = [0u8; PLUGIN_HEADER_LEN];
        raw.copy_from_slice(&self.buf[..PLUGIN_HEADER_LEN]);
        let head = PacketHeader::parse(&raw);
        let len = head.payload_len()?;
        if self.buf.len() < PLUGIN_HEADER_LEN + len {
            return Ok(None);
        }
        let packet = PluginPacket::decode(&head, &self.buf[PLUGIN_HEADER_LEN..PLUGIN_HEADER_LEN + len]);
        self.buf.drain(..PLUGIN_HEADER_LEN + len);
        packet.map(Some)
    }
}

#[cfg(test)]
mod packet_test {
    use super::*;
    use crate::timeutil::parse_time;

    fn t() -> NaiveDateTime {
        parse_time("2023/02/03 04:05:06").unwrap() + Duration::microseconds(250)
    }

    #[test]
    fn header_layout() {
        let p = PluginPacket {
            station: "APE".to_string(),
            channel: "Z".to_string(),
            payload: Payload::RawTime {
                time: t(),
                usec_correction: 5,
                timing_quality: 80,
                samples: vec![1, -2, 3],
            },
        };
        let bytes = p.encode();
        assert_eq!(bytes.len(), PLUGIN_HEADER_LEN + 12);
        assert_eq!(int_at(&bytes, 0), 8);
        assert_eq!(&bytes[4..7], b"APE");
        assert_eq!(bytes[7], 0);
        assert_eq!(bytes[14], b'Z');
        assert_eq!(int_at(&bytes, 24), 2023);
        assert_eq!(int_at(&bytes, 28), 34);
        assert_eq!(int_at(&bytes, 44), 250);
        assert_eq!(int_at(&bytes, 56), 3);
    }

    #[test]
    fn reader_reassembles() {
        let packets = vec![
            PluginPacket {
                station: "APE".to_string(),
                channel: "Z".to_string(),
                payload: Payload::Raw(vec![7; 20]),
            },
            PluginPacket {
                station: "APE".to_string(),
                channel: String::new(),
                payload: Payload::Log {
                    time: t(),
                    text: b"hello".to_vec(),
                },
            },
            PluginPacket {
                station: "APE".to_string(),
                channel: "N".to_string(),
                payload: Payload::Gap {
                    usec_correction: 0,
                    timing_quality: -1,
                    count: 100,
                },
            },
            PluginPacket {
                station: "APE".to_string(),
                channel: "N".to_string(),
                payload: Payload::Flush,
            },
        ];
        let stream: Vec<u8> = packets.iter().flat_map(|p| p.encode()).collect();
        let mut r = PacketReader::new();
        let mut got = Vec::new();
        // odd sized pieces
        for piece in stream.chunks(7) {
            r.feed(piece);
            while let Some(p) = r.next_packet().unwrap() {
                got.push(p);
            }
        }
        assert_eq!(got, packets);
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn oversized_rejected() {
        let head = PacketHeader {
            packtype: PacketType::RawData as i32,
            station: "APE".to_string(),
            channel: "Z".to_string(),
            time: PacketTime::default(),
            usec_correction: 0,
            timing_quality: -1,
            data_size: 1001,
        };
        let mut r = PacketReader::new();
        r.feed(&head.encode());
        assert_eq!(r.next_packet(), Err(PacketError::InvalidSize(1001)));

        let mut head = head;
        head.data_size = -1;
        assert_eq!(head.payload_len(), Err(PacketError::InvalidSize(-1)));
        head.packtype = 3;
        assert_eq!(head.payload_len(), Err(PacketError::UnknownType(3)));
    }

    #[test]
    fn bad_time_rejected() {
        let pt = PacketTime {
            year: 2020,
            yday: 400,
            ..PacketTime::default()
        };
        assert!(pt.to_datetime().is_err());
        assert_eq!(PacketTime::from_datetime(&t()).to_datetime(), Ok(t()));
    }
}
