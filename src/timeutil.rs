//!
//! Time helpers shared by the monitors, the command parser and the
//! state snapshot.  All times are UTC and carried as chrono
//! `NaiveDateTime`.
//!
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

///
/// Format a time the way the state snapshot and INFO documents
/// carry it: `YYYY/MM/DD hh:mm:ss.ffff` with 1/10000 second
/// resolution.
///
pub fn format_time(t: &NaiveDateTime) -> String {
    format!(
        "{:04}/{:02}/{:02} {:02}:{:02}:{:02}.{:04}",
        t.year(),
        t.month(),
        t.day(),
        t.hour(),
        t.minute(),
        t.second(),
        t.nanosecond().min(999_999_999) / 100_000
    )
}
///
/// Inverse of format_time.  The fraction is optional.
///
pub fn parse_time(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    let (date, clock) = text.split_once(' ')?;
    let mut d = date.split('/').map(|s| s.trim().parse::<u32>());
    let year = d.next()?.ok()?;
    let month = d.next()?.ok()?;
    let day = d.next()?.ok()?;
    let (hms, fract) = match clock.split_once('.') {
        Some((hms, f)) => (hms, f.trim().parse::<u32>().ok()?),
        None => (clock, 0),
    };
    let mut c = hms.split(':').map(|s| s.trim().parse::<u32>());
    let hour = c.next()?.ok()?;
    let minute = c.next()?.ok()?;
    let second = c.next()?.ok()?;
    NaiveDate::from_ymd_opt(year as i32, month, day)?.and_hms_micro_opt(
        hour,
        minute,
        second,
        fract.checked_mul(100)?,
    )
}
///
/// Parse the comma separated time used by the TIME and DATA
/// commands: `year,month,day,hour,minute,second`.
///
pub fn parse_command_time(text: &str) -> Option<NaiveDateTime> {
    let fields: Vec<i64> = text
        .split(',')
        .map(|f| f.trim().parse::<i64>())
        .collect::<Result<_, _>>()
        .ok()?;
    if fields.len() != 6 {
        return None;
    }
    let (year, month, day) = (fields[0], fields[1], fields[2]);
    let (hour, minute, second) = (fields[3], fields[4], fields[5]);
    if !(1900..=2099).contains(&year)
        || !(1..=12).contains(&month)
        || !(1..=31).contains(&day)
        || !(0..=23).contains(&hour)
        || !(0..=59).contains(&minute)
        || !(0..=59).contains(&second)
    {
        return None;
    }
    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?.and_hms_opt(
        hour as u32,
        minute as u32,
        second as u32,
    )
}
///
/// `a - b` in microseconds.
///
pub fn tdiff_us(a: &NaiveDateTime, b: &NaiveDateTime) -> i64 {
    (*a - *b).num_microseconds().unwrap_or(i64::MAX)
}

#[cfg(test)]
mod time_test {
    use super::*;

    #[test]
    fn format_parse() {
        let t = NaiveDate::from_ymd_opt(2024, 3, 5)
            .and_then(|d| d.and_hms_micro_opt(6, 7, 8, 123_400))
            .unwrap();
        let s = format_time(&t);
        assert_eq!("2024/03/05 06:07:08.1234", s);
        assert_eq!(Some(t), parse_time(&s));
        assert_eq!(
            NaiveDate::from_ymd_opt(2024, 3, 5).and_then(|d| d.and_hms_opt(6, 7, 8)),
            parse_time("2024/03/05 06:07:08")
        );
    }
    #[test]
    fn command_time() {
        assert_eq!(
            NaiveDate::from_ymd_opt(2020, 1, 2).and_then(|d| d.and_hms_opt(3, 4, 5)),
            parse_command_time("2020,1,2,3,4,5")
        );
        assert_eq!(None, parse_command_time("2020,2,30,0,0,0"));
        assert_eq!(None, parse_command_time("2020,1,2,3,4"));
        assert_eq!(None, parse_command_time("1800,1,2,3,4,5"));
        assert_eq!(None, parse_command_time("2020,1,2,24,0,0"));
        assert_eq!(None, parse_command_time("a,b,c,d,e,f"));
    }
    #[test]
    fn difference() {
        let a = parse_time("2020/01/01 00:00:01.0000").unwrap();
        let b = parse_time("2020/01/01 00:00:00.5000").unwrap();
        assert_eq!(500_000, tdiff_us(&a, &b));
        assert_eq!(-500_000, tdiff_us(&b, &a));
    }
}
