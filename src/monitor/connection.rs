use super::selector::StreamFilter;
use super::station::StationMonitor;
use super::stream::seq_text;
use super::window::TimeWindow;
use crate::mseed::{RecordView, StreamDescriptor};
use crate::sequence::Sequence;
use crate::timeutil::format_time;
use crate::xmldoc::XmlElement;
use chrono::{NaiveDateTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeSet;

///
/// Progress and counters of one client on one station: what it
/// selected, where it started, what it has been sent.  Also decides
/// which records the client gets and when a bounded time window is
/// exhausted.
///
#[derive(Debug, Clone)]
pub struct ConnectionMonitor {
    host: String,
    port: u16,
    ctime: NaiveDateTime,
    filter: StreamFilter,
    window: TimeWindow,
    begin_seq: Option<Sequence>,
    current_seq: Option<Sequence>,
    sequence_gaps: u64,
    txcount: u64,
    begin_seq_valid: bool,
    realtime: bool,
    eod: bool,
    check_eod: bool,
    stream_set: BTreeSet<StreamDescriptor>,
}

impl ConnectionMonitor {
    pub fn new(host: &str, port: u16) -> ConnectionMonitor {
        ConnectionMonitor {
            host: host.to_string(),
            port,
            ctime: Utc::now().naive_utc(),
            filter: StreamFilter::default(),
            window: TimeWindow::default(),
            begin_seq: None,
            current_seq: None,
            sequence_gaps: 0,
            txcount: 0,
            begin_seq_valid: false,
            realtime: true,
            eod: false,
            check_eod: false,
            stream_set: BTreeSet::new(),
        }
    }

    pub fn filter(&self) -> &StreamFilter {
        &self.filter
    }
    pub fn add_selector(&mut self, text: &str) -> bool {
        self.filter.add_selector(text)
    }
    pub fn have_selectors(&self) -> bool {
        self.filter.have_selectors()
    }
    pub fn clear_selectors(&mut self) {
        self.filter.clear();
    }
    pub fn time_valid(&self) -> bool {
        self.window.valid()
    }
    pub fn begin_seq(&self) -> Option<Sequence> {
        self.begin_seq
    }
    pub fn begin_seq_valid(&self) -> bool {
        self.begin_seq_valid
    }
    pub fn txcount(&self) -> u64 {
        self.txcount
    }
    pub fn sequence_gaps(&self) -> u64 {
        self.sequence_gaps
    }
    pub fn set_realtime(&mut self, value: bool) {
        self.realtime = value;
    }
    pub fn realtime(&self) -> bool {
        self.realtime
    }
    pub fn set_eod(&mut self, value: bool) {
        self.eod = value;
    }
    pub fn end_of_data(&self) -> bool {
        self.eod
    }

    pub fn set_begin_seq(&mut self, seq: Option<Sequence>, valid: bool) {
        self.begin_seq = seq;
        self.begin_seq_valid = valid;
        self.current_seq = if valid { seq } else { None };
    }
    ///
    /// Start the window at `t`.  Without a resume point the start
    /// sequence comes from the station's stream bookkeeping; with
    /// one, the start is only valid if the bookkeeping agrees.
    ///
    pub fn set_begin_time(
        &mut self,
        t: NaiveDateTime,
        seqstart: Option<Sequence>,
        station: &StationMonitor,
    ) {
        self.window.set_begin_time(t);
        if station.time_cmp(&t, &self.filter) == Ordering::Greater {
            self.begin_seq = None;
            self.current_seq = None;
        } else {
            let seq = station.time_to_seq(&t, seqstart, &self.filter);
            self.begin_seq = Some(seq);
            self.begin_seq_valid = seqstart.map_or(true, |s| s == seq);
            self.current_seq = Some(seqstart.unwrap_or(seq));
        }
    }

    pub fn set_end_time(&mut self, t: NaiveDateTime, station: &StationMonitor) {
        self.window.set_end_time(t);
        self.check_eod = true;
        self.eod |= station.time_cmp(&t, &self.filter) == Ordering::Less;
    }
    ///
    /// Note the sequence of a record passing by; anything other than
    /// the expected one counts as a gap.
    ///
    pub fn check_seq(&mut self, seq: Sequence) {
        if let Some(expected) = self.current_seq {
            if seq != expected {
                self.sequence_gaps += 1;
            }
        }
        self.current_seq = Some(seq.next());
    }

    pub fn count_packet(&mut self) {
        self.txcount += 1;
    }
    ///
    /// Should the record in `data` be sent?  Records past the end of
    /// a bounded window are refused and retire their stream; once
    /// every stream seen inside the window has retired the client
    /// has reached end of data.
    ///
    pub fn match_packet(&mut self, data: &[u8]) -> bool {
        let view = RecordView::new(data);
        if view.is_blank() {
            return false;
        }
        let stream = match view.stream() {
            Some(s) => s,
            None => return false,
        };
        if !self.filter.matches(&stream) {
            return false;
        }
        if let Some(end) = view.end_time() {
            if self.window.time_cmp(&end) == Ordering::Less {
                return false;
            }
        }
        if self.check_eod && !self.eod {
            let begins_inside = view
                .start_time()
                .map_or(true, |b| self.window.time_cmp(&b) != Ordering::Greater);
            if begins_inside {
                self.stream_set.insert(stream);
            } else {
                self.stream_set.remove(&stream);
                if self.stream_set.is_empty() {
                    self.eod = true;
                }
                return false;
            }
        }
        true
    }
    ///
    /// Back to the state of a fresh request; selectors are kept.
    ///
    pub fn reset(&mut self) {
        self.window.reset();
        self.stream_set.clear();
        self.realtime = true;
        self.eod = false;
        self.check_eod = false;
        self.begin_seq = None;
        self.current_seq = None;
    }

    pub fn getinfo(&self, parent: &mut XmlElement) {
        let child = parent.child("connection");
        child
            .attr("host", &self.host)
            .attr("port", &self.port.to_string())
            .attr("ctime", &format_time(&self.ctime))
            .attr("begin_seq", &seq_text(self.begin_seq))
            .attr("current_seq", &seq_text(self.current_seq))
            .attr("sequence_gaps", &self.sequence_gaps.to_string())
            .attr("txcount", &self.txcount.to_string())
            .attr("begin_seq_valid", if self.begin_seq_valid { "yes" } else { "no" })
            .attr("realtime", if self.realtime { "yes" } else { "no" })
            .attr("end_of_data", if self.eod { "yes" } else { "no" });
        self.window.getinfo(child);
        self.filter.getinfo(child);
    }
}

#[cfg(test)]
mod connection_monitor_test {
    use super::*;
    use crate::acl::IpAcl;
    use crate::mseed::RecordBuilder;
    use crate::timeutil::parse_time;
    use chrono::Duration;

    fn t(sec: i64) -> NaiveDateTime {
        parse_time("2020/01/01 00:00:00").unwrap() + Duration::seconds(sec)
    }

    fn rec(b: &mut RecordBuilder, start: i64) -> Vec<u8> {
        b.data_record(&t(start), 1.0, &[0; 10], None).0
    }

    fn station() -> StationMonitor {
        let mut m = StationMonitor::new("APE", "GE", "", IpAcl::default());
        m.configure_stream_check(true, "", 0).unwrap();
        m
    }

    #[test]
    fn sequence_gaps_counted() {
        let mut c = ConnectionMonitor::new("h", 1);
        c.set_begin_seq(Some(Sequence::new(5)), true);
        c.check_seq(Sequence::new(5));
        c.check_seq(Sequence::new(6));
        assert_eq!(0, c.sequence_gaps());
        c.check_seq(Sequence::new(9));
        assert_eq!(1, c.sequence_gaps());
    }
    #[test]
    fn filter_and_window() {
        let mut c = ConnectionMonitor::new("h", 1);
        let mut bhz = RecordBuilder::new("GE", "APE", "", "BHZ", 512);
        let mut bhn = RecordBuilder::new("GE", "APE", "", "BHN", 512);
        assert!(c.add_selector("BHZ"));
        assert!(c.match_packet(&rec(&mut bhz, 0)));
        assert!(!c.match_packet(&rec(&mut bhn, 0)));
        assert!(!c.match_packet(&[0u8; 512]));
        c.set_begin_time(t(100), None, &station());
        // ends before the window begins
        assert!(!c.match_packet(&rec(&mut bhz, 50)));
        // overlaps the begin
        assert!(c.match_packet(&rec(&mut bhz, 95)));
    }
    #[test]
    fn end_of_data_after_all_streams_pass_window() {
        let st = station();
        let mut c = ConnectionMonitor::new("h", 1);
        let mut bhz = RecordBuilder::new("GE", "APE", "", "BHZ", 512);
        let mut bhn = RecordBuilder::new("GE", "APE", "", "BHN", 512);
        c.set_begin_time(t(0), None, &st);
        c.set_end_time(t(100), &st);
        assert!(c.time_valid());
        assert!(c.match_packet(&rec(&mut bhz, 0)));
        assert!(c.match_packet(&rec(&mut bhn, 0)));
        assert!(!c.match_packet(&rec(&mut bhz, 150)));
        assert!(!c.end_of_data());
        assert!(!c.match_packet(&rec(&mut bhn, 150)));
        assert!(c.end_of_data());
        c.reset();
        assert!(!c.end_of_data());
        assert!(!c.have_selectors());
    }
    #[test]
    fn begin_time_positions_sequence() {
        let mut st = station();
        let mut b = RecordBuilder::new("GE", "APE", "", "BHZ", 512);
        for i in 0..3u32 {
            st.add_packet(Sequence::new(i), &rec(&mut b, i as i64 * 10));
            st.set_end_seq(Sequence::new(i + 1));
            st.new_segment();
        }
        let mut c = ConnectionMonitor::new("h", 1);
        c.set_begin_time(t(15), None, &st);
        assert_eq!(Some(Sequence::new(1)), c.begin_seq());
        assert!(c.begin_seq_valid());
        c.set_begin_time(t(500), None, &st);
        assert_eq!(None, c.begin_seq());
    }
    #[test]
    fn info_element() {
        let mut c = ConnectionMonitor::new("10.0.0.1", 4000);
        c.add_selector("BHZ.D");
        c.count_packet();
        let mut parent = XmlElement::new("station");
        c.getinfo(&mut parent);
        let e = &parent.children()[0];
        assert_eq!(Some("10.0.0.1"), e.attribute("host"));
        assert_eq!(Some("1"), e.attribute("txcount"));
        assert_eq!(Some("unset"), e.attribute("begin_seq"));
        assert_eq!(Some("??BHZ.D"), e.children()[0].attribute("pattern"));
    }
}
