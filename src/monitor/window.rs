use crate::timeutil::{format_time, tdiff_us};
use crate::xmldoc::XmlElement;
use chrono::NaiveDateTime;
use std::cmp::Ordering;

///
/// A client's time window.  Without a begin time the window is
/// unbounded on both sides.
///
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeWindow {
    begin: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
}

impl TimeWindow {
    pub fn set_begin_time(&mut self, t: NaiveDateTime) {
        self.begin = Some(t);
    }
    pub fn set_end_time(&mut self, t: NaiveDateTime) {
        self.end = Some(t);
    }
    pub fn begin_time(&self) -> Option<NaiveDateTime> {
        self.begin
    }
    pub fn end_time(&self) -> Option<NaiveDateTime> {
        self.end
    }
    pub fn reset(&mut self) {
        self.begin = None;
        self.end = None;
    }
    ///
    /// A window is usable when it has no begin, no end, or ends no
    /// earlier than it begins.
    ///
    pub fn valid(&self) -> bool {
        match (self.begin, self.end) {
            (Some(b), Some(e)) => tdiff_us(&e, &b) >= 0,
            _ => true,
        }
    }
    ///
    /// Where `t` lies relative to the window: Less before the begin,
    /// Greater after the end.
    ///
    pub fn time_cmp(&self, t: &NaiveDateTime) -> Ordering {
        let begin = match self.begin {
            Some(b) => b,
            None => return Ordering::Equal,
        };
        if tdiff_us(t, &begin) < 0 {
            return Ordering::Less;
        }
        match self.end {
            Some(e) if tdiff_us(t, &e) > 0 => Ordering::Greater,
            _ => Ordering::Equal,
        }
    }

    pub fn getinfo(&self, parent: &mut XmlElement) {
        if let Some(begin) = self.begin {
            let end = self.end.map_or_else(|| "unset".to_string(), |e| format_time(&e));
            parent
                .child("window")
                .attr("begin_time", &format_time(&begin))
                .attr("end_time", &end);
        }
    }
}
