use super::error::{MonitorError, MonitorResult};
use super::master::InfoLevel;
use super::selector::StreamFilter;
use super::stream::{DataGap, DataSegment, StreamMonitor};
use crate::acl::IpAcl;
use crate::mseed::{PacketKind, RecordView, StreamDescriptor};
use crate::sequence::Sequence;
use crate::timeutil::parse_time;
use crate::xmldoc::{parse_document, XmlDocument, XmlElement};
use chrono::NaiveDateTime;
use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::net::IpAddr;
use std::path::Path;

///
/// Everything the server knows about what one station has
/// buffered: the sequence range, and, when stream checking is on,
/// a StreamMonitor for each substream seen.
///
#[derive(Debug)]
pub struct StationMonitor {
    name: String,
    network: String,
    description: String,
    access: IpAcl,
    begin_seq: Sequence,
    end_seq: Sequence,
    segment_count: usize,
    stream_check: bool,
    gap_treshold: i64,
    gap_pattern: Option<Regex>,
    streams: BTreeMap<StreamDescriptor, StreamMonitor>,
}

impl StationMonitor {
    pub fn new(name: &str, network: &str, description: &str, access: IpAcl) -> StationMonitor {
        StationMonitor {
            name: name.to_string(),
            network: network.to_string(),
            description: description.to_string(),
            access,
            begin_seq: Sequence::default(),
            end_seq: Sequence::default(),
            segment_count: 1,
            stream_check: false,
            gap_treshold: 0,
            gap_pattern: None,
            streams: BTreeMap::new(),
        }
    }
    ///
    /// Enable or disable per stream tracking.  Gap checking applies
    /// to data streams whose location+channel matches `pattern`
    /// (case insensitive); an empty pattern or zero treshold
    /// disables it.
    ///
    pub fn configure_stream_check(
        &mut self,
        enabled: bool,
        pattern: &str,
        treshold_us: i64,
    ) -> MonitorResult<()> {
        self.stream_check = enabled;
        self.gap_pattern = None;
        if !enabled || pattern.is_empty() {
            self.gap_treshold = 0;
            return Ok(());
        }
        self.gap_treshold = treshold_us;
        if treshold_us == 0 {
            return Ok(());
        }
        self.gap_pattern = Some(RegexBuilder::new(pattern).case_insensitive(true).build()?);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn network(&self) -> &str {
        &self.network
    }
    pub fn description(&self) -> &str {
        &self.description
    }
    pub fn stream_check(&self) -> bool {
        self.stream_check
    }
    pub fn begin_seq(&self) -> Sequence {
        self.begin_seq
    }
    pub fn end_seq(&self) -> Sequence {
        self.end_seq
    }
    pub fn set_begin_seq(&mut self, seq: Sequence) {
        self.begin_seq = seq;
    }
    pub fn set_end_seq(&mut self, seq: Sequence) {
        self.end_seq = seq;
    }
    pub fn streams(&self) -> impl Iterator<Item = (&StreamDescriptor, &StreamMonitor)> {
        self.streams.iter()
    }
    pub fn ipaccess(&self, ip: IpAddr) -> bool {
        self.access.check(ip)
    }
    ///
    /// Forget everything; used when the snapshot cannot be trusted.
    ///
    pub fn reset(&mut self) {
        self.begin_seq = Sequence::default();
        self.end_seq = Sequence::default();
        self.segment_count = 1;
        self.streams.clear();
    }

    pub fn add_packet(&mut self, seq: Sequence, data: &[u8]) {
        if !self.stream_check {
            return;
        }
        let view = RecordView::new(data);
        let stream = match view.stream() {
            Some(s) => s,
            None => return,
        };
        let (start, end) = match (view.start_time(), view.end_time()) {
            (Some(s), Some(e)) => (s, e),
            _ => return,
        };
        let rate_defined = view.sample_rate() > 0.0;
        let recno = view.record_number().unwrap_or(0);
        let is_data = stream.kind == PacketKind::Data;
        let treshold = self.gap_treshold;
        let gap_check = is_data
            && self
                .gap_pattern
                .as_ref()
                .map_or(false, |rx| rx.is_match(&format!("{}{}", stream.location, stream.channel)));
        self.streams
            .entry(stream)
            .or_insert_with(|| StreamMonitor::new(gap_check, treshold))
            .add_packet(start, end, rate_defined, is_data, recno, seq);
    }

    pub fn new_segment(&mut self) {
        if !self.stream_check {
            return;
        }
        for s in self.streams.values_mut() {
            s.new_segment();
        }
        self.segment_count += 1;
    }

    pub fn delete_oldest_segment(&mut self) {
        if !self.stream_check {
            return;
        }
        let count = self.segment_count;
        self.streams.retain(|_, s| {
            s.delete_oldest_segment(count);
            !s.empty()
        });
        self.segment_count = self.segment_count.saturating_sub(1).max(1);
    }
    ///
    /// Sequence at which a client selecting `filter` should start to
    /// see data from `t` on.  With `seqstart` (a resume point) the
    /// later of the two positions wins.
    ///
    pub fn time_to_seq(
        &self,
        t: &NaiveDateTime,
        seqstart: Option<Sequence>,
        filter: &StreamFilter,
    ) -> Sequence {
        let mut result = self.end_seq;
        let mut distance: Option<u32> = None;
        for (descr, stream) in &self.streams {
            if !filter.matches(descr) {
                continue;
            }
            if distance.is_none() {
                distance = Some(self.end_seq.distance_from(self.begin_seq));
                result = self.begin_seq;
            }
            if let Some(seq) = stream.time_to_seq(t) {
                let d = seq.distance_from(self.begin_seq);
                if distance.map_or(true, |best| d < best) {
                    distance = Some(d);
                    result = seq;
                }
            }
        }
        if let Some(start) = seqstart {
            if self.end_seq.distance_from(start) < self.end_seq.distance_from(result) {
                return start;
            }
        }
        result
    }
    ///
    /// Less if `t` precedes all selected streams, Greater if it
    /// follows all of them, Equal otherwise (or when unknown).
    ///
    pub fn time_cmp(&self, t: &NaiveDateTime, filter: &StreamFilter) -> Ordering {
        let mut result = Ordering::Equal;
        for (descr, stream) in &self.streams {
            if !filter.matches(descr) {
                continue;
            }
            let d = stream.time_cmp(t);
            if result == Ordering::Equal {
                result = d;
            }
            if d == Ordering::Equal || d != result {
                return Ordering::Equal;
            }
        }
        result
    }
    ///
    /// The CAT line for this station, if `ip` may see it.
    ///
    pub fn cat_line(&self, ip: IpAddr) -> Option<String> {
        if !self.ipaccess(ip) {
            return None;
        }
        Some(format!("{:>2} {:<5} {}\n", self.network, self.name, self.description))
    }
    ///
    /// The station element of an INFO document.  Connections are
    /// added by the caller, which owns them.
    ///
    pub fn getinfo(&self, level: InfoLevel, ip: IpAddr) -> Option<XmlElement> {
        if !self.ipaccess(ip) {
            return None;
        }
        let mut child = XmlElement::new("station");
        child
            .attr("name", &self.name)
            .attr("network", &self.network)
            .attr("description", &self.description)
            .attr("begin_seq", &self.begin_seq.to_string())
            .attr("end_seq", &self.end_seq.to_string())
            .attr("stream_check", if self.stream_check { "enabled" } else { "disabled" });
        let wants_streams = (level >= InfoLevel::Streams && level <= InfoLevel::Gaps)
            || level == InfoLevel::All;
        if wants_streams && self.stream_check {
            for (descr, stream) in &self.streams {
                let s = child.child("stream");
                s.attr("location", &descr.location)
                    .attr("seedname", &descr.channel)
                    .attr("type", &descr.kind.letter().to_string());
                stream.getinfo(s, level >= InfoLevel::Gaps);
            }
        }
        Some(child)
    }

    pub fn state_document(&self) -> XmlDocument {
        let mut root = XmlElement::new("buffer");
        root.attr("begin_seq", &self.begin_seq.to_string())
            .attr("end_seq", &self.end_seq.to_string())
            .attr("segment_count", &self.segment_count.to_string())
            .attr("stream_check", if self.stream_check { "enabled" } else { "disabled" });
        for (descr, stream) in &self.streams {
            let s = root.child("stream");
            s.attr("location", &descr.location)
                .attr("seedname", &descr.channel)
                .attr("type", &descr.kind.letter().to_string());
            stream.getstate(s);
        }
        XmlDocument::new(root)
    }

    pub fn save_state(&self, path: &Path) -> MonitorResult<()> {
        fs::write(path, self.state_document().to_string()).map_err(|e| {
            MonitorError::CannotWriteState {
                path: path.to_path_buf(),
                source: e,
            }
        })
    }
    ///
    /// Load a snapshot written by save_state.  On error the monitor
    /// may be partly updated; callers reset() it.
    ///
    pub fn restore_state(&mut self, path: &Path) -> MonitorResult<()> {
        let text = fs::read_to_string(path).map_err(|e| MonitorError::CannotReadState {
            path: path.to_path_buf(),
            source: e,
        })?;
        let root = parse_document(&text).map_err(|e| MonitorError::BadStateXml {
            path: path.to_path_buf(),
            source: e,
        })?;
        let state = StateReader { path };
        if root.name() != "buffer" {
            return Err(state.bad(format!("unexpected root element <{}>", root.name())));
        }
        self.begin_seq = state.seq(&root, "begin_seq")?.unwrap_or_default();
        self.end_seq = state.seq(&root, "end_seq")?.unwrap_or_default();
        self.segment_count = state.number(&root, "segment_count")?.max(1) as usize;
        // stream checking stays as configured; streams saved while it
        // was on are dropped if it has been turned off since
        self.streams.clear();
        if !self.stream_check {
            return Ok(());
        }
        for e in root.children().iter().filter(|e| e.name() == "stream") {
            let (descr, stream) = state.stream(e)?;
            self.streams.insert(descr, stream);
        }
        Ok(())
    }
}

struct StateReader<'a> {
    path: &'a Path,
}

impl<'a> StateReader<'a> {
    fn bad(&self, reason: String) -> MonitorError {
        MonitorError::BadState {
            path: self.path.to_path_buf(),
            reason,
        }
    }
    fn attr<'e>(&self, e: &'e XmlElement, name: &str) -> MonitorResult<&'e str> {
        e.attribute(name)
            .ok_or_else(|| self.bad(format!("<{}> lacks attribute {}", e.name(), name)))
    }
    fn seq(&self, e: &XmlElement, name: &str) -> MonitorResult<Option<Sequence>> {
        let text = self.attr(e, name)?;
        if text == "unset" {
            return Ok(None);
        }
        Sequence::parse_hex(text)
            .map(Some)
            .ok_or_else(|| self.bad(format!("bad sequence {}=\"{}\"", name, text)))
    }
    fn number(&self, e: &XmlElement, name: &str) -> MonitorResult<i64> {
        let text = self.attr(e, name)?;
        text.trim()
            .parse::<i64>()
            .map_err(|_| self.bad(format!("bad number {}=\"{}\"", name, text)))
    }
    fn time(&self, e: &XmlElement, name: &str) -> MonitorResult<Option<NaiveDateTime>> {
        let text = self.attr(e, name)?;
        if text.is_empty() {
            return Ok(None);
        }
        parse_time(text)
            .map(Some)
            .ok_or_else(|| self.bad(format!("bad time {}=\"{}\"", name, text)))
    }
    fn gaps(&self, e: &XmlElement) -> MonitorResult<Vec<DataGap>> {
        let mut gaps = Vec::new();
        for g in e.children().iter().filter(|g| g.name() == "gap") {
            match (self.time(g, "begin_time")?, self.time(g, "end_time")?) {
                (Some(begin_time), Some(end_time)) => gaps.push(DataGap {
                    begin_time,
                    end_time,
                }),
                _ => return Err(self.bad("gap without times".to_string())),
            }
        }
        Ok(gaps)
    }
    fn stream(&self, e: &XmlElement) -> MonitorResult<(StreamDescriptor, StreamMonitor)> {
        let kind_text = self.attr(e, "type")?;
        let kind = kind_text
            .chars()
            .next()
            .and_then(PacketKind::from_letter)
            .ok_or_else(|| self.bad(format!("bad stream type \"{}\"", kind_text)))?;
        let descr = StreamDescriptor::new(self.attr(e, "location")?, self.attr(e, "seedname")?, kind);

        let mut segments = VecDeque::new();
        for s in e.children().iter().filter(|s| s.name() == "segment") {
            segments.push_back(DataSegment {
                end_time: self.time(s, "end_time")?,
                end_recno: self.number(s, "end_recno")? as u32,
                end_seq: self.seq(s, "end_seq")?,
                gaps: self.gaps(s)?,
            });
        }
        if segments.is_empty() {
            segments.push_back(DataSegment {
                end_time: self.time(e, "end_time")?,
                end_recno: self.number(e, "end_recno")? as u32,
                end_seq: self.seq(e, "end_seq")?,
                gaps: Vec::new(),
            });
        }
        let stream = StreamMonitor {
            begin_time: self.time(e, "begin_time")?,
            begin_recno: self.number(e, "begin_recno")? as u32,
            begin_seq: self.seq(e, "begin_seq")?,
            gap_check: self.attr(e, "gap_check")? == "enabled",
            gap_treshold: self.number(e, "gap_treshold")?,
            segments,
        };
        Ok((descr, stream))
    }
}

#[cfg(test)]
mod station_monitor_test {
    use super::*;
    use crate::mseed::RecordBuilder;
    use chrono::Duration;

    fn t(sec: i64) -> NaiveDateTime {
        parse_time("2020/01/01 00:00:00").unwrap() + Duration::seconds(sec)
    }

    fn monitor() -> StationMonitor {
        let mut m = StationMonitor::new("APE", "GE", "Apirathos", IpAcl::default());
        m.configure_stream_check(true, "BH.", 10_000).unwrap();
        m
    }

    fn feed(m: &mut StationMonitor, b: &mut RecordBuilder, start: i64, seq: u32) {
        // 10 samples at 1 Hz
        let (rec, _) = b.data_record(&t(start), 1.0, &[0; 10], None);
        m.add_packet(Sequence::new(seq), &rec);
        m.set_end_seq(Sequence::new(seq + 1));
    }

    fn ip() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[test]
    fn tracks_streams_and_gaps() {
        let mut m = monitor();
        let mut bhz = RecordBuilder::new("GE", "APE", "", "BHZ", 512);
        let mut lhz = RecordBuilder::new("GE", "APE", "", "LHZ", 512);
        feed(&mut m, &mut bhz, 0, 0);
        feed(&mut m, &mut lhz, 0, 1);
        feed(&mut m, &mut bhz, 30, 2);
        feed(&mut m, &mut lhz, 30, 3);
        let streams: Vec<_> = m.streams().collect();
        assert_eq!(2, streams.len());
        let bhz_gaps = streams[0].1.gaps().count();
        let lhz_gaps = streams[1].1.gaps().count();
        assert_eq!("BHZ", streams[0].0.channel);
        // only BHZ matches the gap pattern
        assert_eq!((1, 0), (bhz_gaps, lhz_gaps));
    }
    #[test]
    fn blank_and_disabled_are_ignored() {
        let mut m = StationMonitor::new("APE", "GE", "", IpAcl::default());
        let mut b = RecordBuilder::new("GE", "APE", "", "BHZ", 512);
        feed(&mut m, &mut b, 0, 0);
        assert_eq!(0, m.streams().count());
        let mut m = monitor();
        m.add_packet(Sequence::new(0), &[0u8; 512]);
        assert_eq!(0, m.streams().count());
    }
    #[test]
    fn time_lookup() {
        let mut m = monitor();
        let mut b = RecordBuilder::new("GE", "APE", "", "BHZ", 512);
        feed(&mut m, &mut b, 0, 0);
        m.new_segment();
        feed(&mut m, &mut b, 10, 1);
        m.new_segment();
        feed(&mut m, &mut b, 20, 2);
        let all = StreamFilter::default();
        assert_eq!(Sequence::new(0), m.time_to_seq(&t(3), None, &all));
        assert_eq!(Sequence::new(1), m.time_to_seq(&t(13), None, &all));
        assert_eq!(Sequence::new(2), m.time_to_seq(&t(13), Some(Sequence::new(2)), &all));
        assert_eq!(Ordering::Less, m.time_cmp(&t(-5), &all));
        assert_eq!(Ordering::Greater, m.time_cmp(&t(100), &all));
        assert_eq!(Ordering::Equal, m.time_cmp(&t(15), &all));
        let mut none = StreamFilter::default();
        none.add_selector("XYZ");
        assert_eq!(m.end_seq(), m.time_to_seq(&t(3), None, &none));
    }
    #[test]
    fn segment_deletion_drops_empty_streams() {
        let mut m = monitor();
        let mut b = RecordBuilder::new("GE", "APE", "", "BHZ", 512);
        feed(&mut m, &mut b, 0, 0);
        m.new_segment();
        m.delete_oldest_segment();
        assert_eq!(0, m.streams().count());
    }
    #[test]
    fn cat_and_info() {
        let m = StationMonitor::new("APE", "GE", "Apirathos", IpAcl::parse(&["10.0.0.0/8"]).unwrap());
        assert_eq!(None, m.cat_line(ip()));
        assert_eq!(None, m.getinfo(InfoLevel::Stations, ip()));
        let m = StationMonitor::new("APE", "GE", "Apirathos", IpAcl::default());
        assert_eq!(Some("GE APE   Apirathos\n".to_string()), m.cat_line(ip()));
        let e = m.getinfo(InfoLevel::Stations, ip()).unwrap();
        assert_eq!(Some("GE"), e.attribute("network"));
        assert_eq!(Some("000000"), e.attribute("end_seq"));
    }
    #[test]
    fn state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buffer.xml");
        let mut m = monitor();
        let mut b = RecordBuilder::new("GE", "APE", "", "BHZ", 512);
        feed(&mut m, &mut b, 0, 0);
        m.new_segment();
        feed(&mut m, &mut b, 30, 1);
        m.set_begin_seq(Sequence::new(0));
        m.save_state(&path).unwrap();

        let mut r = monitor();
        r.restore_state(&path).unwrap();
        assert_eq!(m.begin_seq(), r.begin_seq());
        assert_eq!(m.end_seq(), r.end_seq());
        assert!(r.stream_check());
        let a: Vec<_> = m.streams().collect();
        let b: Vec<_> = r.streams().collect();
        assert_eq!(a, b);
    }
    #[test]
    fn configured_stream_check_wins_over_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buffer.xml");
        let mut m = monitor();
        let mut b = RecordBuilder::new("GE", "APE", "", "BHZ", 512);
        feed(&mut m, &mut b, 0, 0);
        m.save_state(&path).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("stream_check=\"enabled\""));

        let mut r = StationMonitor::new("APE", "GE", "Apirathos", IpAcl::default());
        r.configure_stream_check(false, "", 0).unwrap();
        r.restore_state(&path).unwrap();
        assert!(!r.stream_check());
        assert_eq!(m.end_seq(), r.end_seq());
        assert_eq!(0, r.streams().count());
    }
    #[test]
    fn bad_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buffer.xml");
        fs::write(&path, "<buffer begin_seq=\"zz\" end_seq=\"0\" segment_count=\"1\" stream_check=\"enabled\"/>").unwrap();
        let mut m = monitor();
        assert!(matches!(m.restore_state(&path), Err(MonitorError::BadState { .. })));
        fs::write(&path, "<buffer").unwrap();
        assert!(matches!(m.restore_state(&path), Err(MonitorError::BadStateXml { .. })));
        assert!(matches!(
            m.restore_state(&dir.path().join("missing.xml")),
            Err(MonitorError::CannotReadState { .. })
        ));
    }
    #[test]
    fn bad_pattern() {
        let mut m = StationMonitor::new("APE", "GE", "", IpAcl::default());
        assert!(m.configure_stream_check(true, "(", 100).is_err());
    }
}
