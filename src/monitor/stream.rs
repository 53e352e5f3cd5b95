use crate::sequence::Sequence;
use crate::timeutil::{format_time, tdiff_us};
use crate::xmldoc::XmlElement;
use chrono::NaiveDateTime;
use std::cmp::Ordering;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataGap {
    pub begin_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
}

///
/// What one substream contributed to one disk segment: where it
/// ended and the gaps seen on the way.  `end_seq` and `end_recno`
/// are the values expected next.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSegment {
    pub end_time: Option<NaiveDateTime>,
    pub end_recno: u32,
    pub end_seq: Option<Sequence>,
    pub gaps: Vec<DataGap>,
}

impl DataSegment {
    fn empty() -> DataSegment {
        DataSegment {
            end_time: None,
            end_recno: 0,
            end_seq: None,
            gaps: Vec::new(),
        }
    }
    fn continuing(prev: &DataSegment) -> DataSegment {
        DataSegment {
            gaps: Vec::new(),
            ..prev.clone()
        }
    }
}

///
/// Tracks the buffered extent of one substream of a station.  Its
/// segment list follows the station's disk segments so the extent
/// shrinks when the oldest segment is deleted.
///
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMonitor {
    pub(crate) begin_time: Option<NaiveDateTime>,
    pub(crate) begin_recno: u32,
    pub(crate) begin_seq: Option<Sequence>,
    pub(crate) gap_check: bool,
    pub(crate) gap_treshold: i64,
    pub(crate) segments: VecDeque<DataSegment>,
}

impl StreamMonitor {
    pub fn new(gap_check: bool, gap_treshold: i64) -> StreamMonitor {
        let mut segments = VecDeque::new();
        segments.push_back(DataSegment::empty());
        StreamMonitor {
            begin_time: None,
            begin_recno: 0,
            begin_seq: None,
            gap_check,
            gap_treshold,
            segments,
        }
    }

    fn current(&self) -> &DataSegment {
        // never empty: new() starts with one and deletion keeps one
        &self.segments[self.segments.len() - 1]
    }
    fn current_mut(&mut self) -> &mut DataSegment {
        let last = self.segments.len() - 1;
        &mut self.segments[last]
    }

    pub fn begin_time(&self) -> Option<NaiveDateTime> {
        self.begin_time
    }
    pub fn end_time(&self) -> Option<NaiveDateTime> {
        self.current().end_time
    }
    pub fn gap_check(&self) -> bool {
        self.gap_check
    }
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
    pub fn gaps(&self) -> impl Iterator<Item = &DataGap> {
        self.segments.iter().flat_map(|s| s.gaps.iter())
    }
    ///
    /// Account for a record.  `rate` of zero means the record has no
    /// sampling rate and its end is its start.
    ///
    pub fn add_packet(
        &mut self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        rate_defined: bool,
        is_data: bool,
        recno: u32,
        seq: Sequence,
    ) {
        if self.begin_seq.is_none() {
            self.begin_time = Some(start);
            self.begin_recno = recno;
            self.begin_seq = Some(seq);
        } else if self.gap_check && rate_defined && is_data {
            if let Some(prev_end) = self.current().end_time {
                let td = tdiff_us(&prev_end, &start);
                if td < -self.gap_treshold || td > self.gap_treshold {
                    self.current_mut().gaps.push(DataGap {
                        begin_time: prev_end,
                        end_time: start,
                    });
                }
            }
        }
        let current = self.current_mut();
        current.end_time = Some(if rate_defined { end } else { start });
        current.end_recno = (recno + 1) % 1_000_000;
        current.end_seq = Some(seq.next());
    }
    ///
    /// First sequence to send for data at or after `t`: the start of
    /// the earliest segment that ends after `t`.
    ///
    pub fn time_to_seq(&self, t: &NaiveDateTime) -> Option<Sequence> {
        let mut result = self.begin_seq;
        for s in &self.segments {
            if let Some(end) = s.end_time {
                if tdiff_us(&end, t) > 0 {
                    break;
                }
            }
            if s.end_seq.is_some() {
                result = s.end_seq;
            }
        }
        result
    }

    pub fn time_cmp(&self, t: &NaiveDateTime) -> Ordering {
        let begin = match (self.begin_seq, self.begin_time) {
            (Some(_), Some(b)) => b,
            _ => return Ordering::Equal,
        };
        if tdiff_us(t, &begin) < 0 {
            return Ordering::Less;
        }
        match self.current().end_time {
            Some(end) if tdiff_us(t, &end) > 0 => Ordering::Greater,
            _ => Ordering::Equal,
        }
    }

    pub fn new_segment(&mut self) {
        let next = DataSegment::continuing(self.current());
        self.segments.push_back(next);
    }
    ///
    /// Drop the oldest segment when the station drops its oldest
    /// disk segment.  Streams that appeared later than that segment
    /// have fewer segments and are left alone.
    ///
    pub fn delete_oldest_segment(&mut self, station_segment_count: usize) {
        if station_segment_count > self.segments.len() {
            return;
        }
        let oldest = if self.segments.len() > 1 {
            self.segments.pop_front()
        } else {
            self.segments.front().cloned()
        };
        if let Some(oldest) = oldest {
            self.begin_time = oldest.end_time;
            self.begin_recno = oldest.end_recno;
            self.begin_seq = oldest.end_seq;
        }
    }
    ///
    /// Nothing of the stream is left in the buffer.
    ///
    pub fn empty(&self) -> bool {
        self.begin_seq == self.current().end_seq
    }

    fn describe(&self, child: &mut XmlElement) {
        child
            .attr("begin_time", &self.begin_time.map_or_else(String::new, |t| format_time(&t)))
            .attr("end_time", &self.end_time().map_or_else(String::new, |t| format_time(&t)))
            .attr("begin_recno", &format!("{:06}", self.begin_recno))
            .attr("end_recno", &format!("{:06}", self.current().end_recno));
    }

    pub fn getinfo(&self, child: &mut XmlElement, with_gaps: bool) {
        self.describe(child);
        child
            .attr("gap_check", if self.gap_check { "enabled" } else { "disabled" })
            .attr("gap_treshold", &self.gap_treshold.to_string());
        if with_gaps {
            for g in self.gaps() {
                child
                    .child("gap")
                    .attr("begin_time", &format_time(&g.begin_time))
                    .attr("end_time", &format_time(&g.end_time));
            }
        }
    }

    pub fn getstate(&self, child: &mut XmlElement) {
        self.describe(child);
        child
            .attr("begin_seq", &seq_text(self.begin_seq))
            .attr("end_seq", &seq_text(self.current().end_seq))
            .attr("gap_check", if self.gap_check { "enabled" } else { "disabled" })
            .attr("gap_treshold", &self.gap_treshold.to_string());
        for s in &self.segments {
            let seg = child.child("segment");
            seg.attr("end_time", &s.end_time.map_or_else(String::new, |t| format_time(&t)))
                .attr("end_recno", &format!("{:06}", s.end_recno))
                .attr("end_seq", &seq_text(s.end_seq));
            for g in &s.gaps {
                seg.child("gap")
                    .attr("begin_time", &format_time(&g.begin_time))
                    .attr("end_time", &format_time(&g.end_time));
            }
        }
    }
}

pub(crate) fn seq_text(seq: Option<Sequence>) -> String {
    seq.map_or_else(|| "unset".to_string(), |s| s.to_string())
}

#[cfg(test)]
mod stream_test {
    use super::*;
    use crate::timeutil::parse_time;
    use chrono::Duration;

    fn t(sec: i64) -> NaiveDateTime {
        parse_time("2020/01/01 00:00:00").unwrap() + Duration::seconds(sec)
    }

    fn add(m: &mut StreamMonitor, start: i64, seq: u32) {
        m.add_packet(t(start), t(start + 10), true, true, seq, Sequence::new(seq));
    }

    #[test]
    fn extent_and_gaps() {
        let mut m = StreamMonitor::new(true, 10_000);
        add(&mut m, 0, 0);
        add(&mut m, 10, 1);
        add(&mut m, 30, 2);
        assert_eq!(Some(t(0)), m.begin_time());
        assert_eq!(Some(t(40)), m.end_time());
        let gaps: Vec<_> = m.gaps().collect();
        assert_eq!(1, gaps.len());
        assert_eq!(t(20), gaps[0].begin_time);
        assert_eq!(t(30), gaps[0].end_time);
    }
    #[test]
    fn no_gaps_without_check() {
        let mut m = StreamMonitor::new(false, 10_000);
        add(&mut m, 0, 0);
        add(&mut m, 50, 1);
        assert_eq!(0, m.gaps().count());
    }
    #[test]
    fn time_positioning_by_segment() {
        let mut m = StreamMonitor::new(false, 0);
        add(&mut m, 0, 0);
        add(&mut m, 10, 1);
        m.new_segment();
        add(&mut m, 20, 2);
        add(&mut m, 30, 3);
        m.new_segment();
        add(&mut m, 40, 4);
        assert_eq!(Some(Sequence::new(0)), m.time_to_seq(&t(5)));
        assert_eq!(Some(Sequence::new(2)), m.time_to_seq(&t(25)));
        assert_eq!(Some(Sequence::new(4)), m.time_to_seq(&t(45)));
        assert_eq!(Ordering::Less, m.time_cmp(&t(-1)));
        assert_eq!(Ordering::Equal, m.time_cmp(&t(49)));
        assert_eq!(Ordering::Greater, m.time_cmp(&t(51)));
    }
    #[test]
    fn oldest_segment_deletion() {
        let mut m = StreamMonitor::new(false, 0);
        add(&mut m, 0, 0);
        m.new_segment();
        add(&mut m, 10, 1);
        m.delete_oldest_segment(2);
        assert_eq!(Some(t(10)), m.begin_time());
        assert_eq!(Some(Sequence::new(1)), m.begin_seq);
        assert!(!m.empty());
        m.new_segment();
        m.delete_oldest_segment(2);
        assert!(m.empty());
    }
    #[test]
    fn younger_stream_keeps_its_segments() {
        let mut m = StreamMonitor::new(false, 0);
        add(&mut m, 0, 7);
        m.delete_oldest_segment(3);
        assert_eq!(Some(Sequence::new(7)), m.begin_seq);
    }
}
