use crate::mseed::{PacketKind, StreamDescriptor};
use crate::xmldoc::XmlElement;
use std::fmt;
use std::str::FromStr;

const LOCLEN: usize = 2;
const CHLEN: usize = 3;
/// Most selectors one client may have on one station.
pub const MAX_SELECTORS: usize = 100;

///
/// One SELECT pattern: `[!][LL]CCC[.T]` or just `[!]T`.  `?` matches
/// any character; a missing type matches every kind of packet.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSelector {
    negative: bool,
    location: [u8; LOCLEN],
    channel: [u8; CHLEN],
    kind: Option<PacketKind>,
}

fn parse_kind(text: Option<&str>) -> Result<Option<PacketKind>, ()> {
    match text {
        None => Ok(None),
        Some("?") => Ok(None),
        Some(t) if t.len() == 1 => t
            .chars()
            .next()
            .and_then(PacketKind::from_letter)
            .map(Some)
            .ok_or(()),
        Some(_) => Err(()),
    }
}

fn template_match(template: &[u8], value: &str) -> bool {
    let value = value.as_bytes();
    template.iter().enumerate().all(|(i, t)| {
        let c = value.get(i).copied().unwrap_or(b' ');
        *t == b'?' || *t == c
    })
}

impl FromStr for StreamSelector {
    type Err = ();

    fn from_str(text: &str) -> Result<StreamSelector, ()> {
        let (negative, rest) = match text.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let (name, kind) = match rest.split_once('.') {
            Some((name, kind)) => (name, Some(kind)),
            None => (rest, None),
        };
        if !name
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'?')
        {
            return Err(());
        }
        let mut location = *b"??";
        let mut channel = *b"???";
        let kind = if name.len() == LOCLEN + CHLEN {
            location.copy_from_slice(&name.as_bytes()[..LOCLEN]);
            channel.copy_from_slice(&name.as_bytes()[LOCLEN..]);
            parse_kind(kind)?
        } else if name.len() == CHLEN {
            channel.copy_from_slice(name.as_bytes());
            parse_kind(kind)?
        } else if kind.is_none() && !name.is_empty() {
            // bare packet type
            parse_kind(Some(name))?
        } else {
            return Err(());
        };
        Ok(StreamSelector {
            negative,
            location,
            channel,
            kind,
        })
    }
}

impl StreamSelector {
    pub fn negative(&self) -> bool {
        self.negative
    }

    pub fn matches(&self, stream: &StreamDescriptor) -> bool {
        self.kind.map_or(true, |k| k == stream.kind)
            && template_match(&self.location, &stream.location)
            && template_match(&self.channel, &stream.channel)
    }
}

impl fmt::Display for StreamSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}.{}",
            if self.negative { "!" } else { "" },
            String::from_utf8_lossy(&self.location),
            String::from_utf8_lossy(&self.channel),
            self.kind.map_or('?', |k| k.letter())
        )
    }
}

///
/// The selectors of one client on one station.  Negative selectors
/// exclude; positive ones are or'ed together.  With no positive
/// selector everything not excluded passes.
///
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamFilter {
    selectors: Vec<StreamSelector>,
}

impl StreamFilter {
    ///
    /// Add a selector.  Fails for a malformed pattern or when the
    /// filter is full.
    ///
    pub fn add_selector(&mut self, text: &str) -> bool {
        if self.selectors.len() >= MAX_SELECTORS {
            return false;
        }
        match text.to_ascii_uppercase().parse::<StreamSelector>() {
            Ok(s) => {
                self.selectors.push(s);
                true
            }
            Err(()) => false,
        }
    }
    pub fn have_selectors(&self) -> bool {
        !self.selectors.is_empty()
    }
    pub fn clear(&mut self) {
        self.selectors.clear();
    }

    pub fn matches(&self, stream: &StreamDescriptor) -> bool {
        let mut default_rule = true;
        let mut result = false;
        for s in &self.selectors {
            if s.negative() {
                if s.matches(stream) {
                    return false;
                }
            } else {
                default_rule = false;
                result |= s.matches(stream);
            }
        }
        default_rule || result
    }

    pub fn getinfo(&self, parent: &mut XmlElement) {
        for s in &self.selectors {
            parent.child("selector").attr("pattern", &s.to_string());
        }
    }
}

#[cfg(test)]
mod selector_test {
    use super::*;

    fn sd(loc: &str, chan: &str, kind: PacketKind) -> StreamDescriptor {
        StreamDescriptor::new(loc, chan, kind)
    }

    #[test]
    fn parse_forms() {
        let s: StreamSelector = "00BHZ.D".parse().unwrap();
        assert_eq!("00BHZ.D", s.to_string());
        let s: StreamSelector = "BH?".parse().unwrap();
        assert_eq!("??BH?.?", s.to_string());
        let s: StreamSelector = "!L".parse().unwrap();
        assert!(s.negative());
        assert_eq!("!?????.L", s.to_string());
        assert!("BHZ.X".parse::<StreamSelector>().is_err());
        assert!("BH".parse::<StreamSelector>().is_err());
        assert!("BHZZ.D".parse::<StreamSelector>().is_err());
        assert!("bhz".parse::<StreamSelector>().is_err());
        assert!(".D".parse::<StreamSelector>().is_err());
    }
    #[test]
    fn wildcard_and_blank_location() {
        let s: StreamSelector = "BHZ.D".parse().unwrap();
        assert!(s.matches(&sd("", "BHZ", PacketKind::Data)));
        assert!(s.matches(&sd("10", "BHZ", PacketKind::Data)));
        assert!(!s.matches(&sd("", "BHZ", PacketKind::Message)));
        let s: StreamSelector = "10BH?".parse().unwrap();
        assert!(s.matches(&sd("10", "BHN", PacketKind::Timing)));
        assert!(!s.matches(&sd("", "BHN", PacketKind::Data)));
    }
    #[test]
    fn filter_rules() {
        let mut f = StreamFilter::default();
        assert!(f.matches(&sd("", "LOG", PacketKind::Message)));
        assert!(f.add_selector("!LOG"));
        assert!(!f.matches(&sd("", "LOG", PacketKind::Message)));
        assert!(f.matches(&sd("", "BHZ", PacketKind::Data)));
        assert!(f.add_selector("bhz.d"));
        assert!(f.add_selector("HHZ.D"));
        assert!(f.matches(&sd("", "BHZ", PacketKind::Data)));
        assert!(f.matches(&sd("", "HHZ", PacketKind::Data)));
        assert!(!f.matches(&sd("", "BHN", PacketKind::Data)));
        assert!(!f.add_selector("B?Z.Q"));
        f.clear();
        assert!(!f.have_selectors());
    }
    #[test]
    fn filter_is_bounded() {
        let mut f = StreamFilter::default();
        for _ in 0..MAX_SELECTORS {
            assert!(f.add_selector("BHZ"));
        }
        assert!(!f.add_selector("BHZ"));
    }
}
