//!
//! Packet sequence numbers.  Every frame committed to a station's
//! buffer gets the next number in a 24 bit space that wraps
//! around.  Clients see the number as six upper case hex digits
//! following the `SL` frame signature and use it to resume.
//!
//! Because the space wraps, numbers are compared by the forward
//! distance between them rather than by magnitude: `0xFFFFFE` comes
//! before `0x000001`.
//!
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};

///
/// A 24 bit wrapping packet sequence number.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Sequence(u32);

impl Sequence {
    /// Number of significant bits.
    pub const BITS: u32 = 24;
    /// Mask applied after every arithmetic step.
    pub const MASK: u32 = (1 << Self::BITS) - 1;
    /// Number of hex digits used on the wire.
    pub const DIGITS: usize = 6;

    ///
    /// Create a sequence number; values outside the 24 bit space
    /// are folded into it.
    ///
    pub fn new(value: u32) -> Sequence {
        Sequence(value & Self::MASK)
    }
    ///
    /// Fold an unbounded 64 bit record counter into the
    /// sequence space.
    ///
    pub fn from_counter(counter: u64) -> Sequence {
        Sequence((counter & Self::MASK as u64) as u32)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    pub fn increment(&mut self) {
        self.0 = (self.0 + 1) & Self::MASK;
    }

    pub fn next(self) -> Sequence {
        self + 1
    }
    ///
    /// Number of steps needed to go forward from `from` to `self`.
    ///
    pub fn distance_from(self, from: Sequence) -> u32 {
        self.0.wrapping_sub(from.0) & Self::MASK
    }
    ///
    /// Compare two numbers in the wrapping space.  `other` is
    /// considered later than `self` when it can be reached going
    /// forward by less than half of the space.
    ///
    pub fn compare(self, other: Sequence) -> Ordering {
        let forward = other.distance_from(self);
        if forward == 0 {
            Ordering::Equal
        } else if forward < (1 << (Self::BITS - 1)) {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    }
    ///
    /// Parse the hex form used by the DATA and FETCH commands.
    /// Returns None for anything that is not 1 to 6 hex digits.
    ///
    pub fn parse_hex(text: &str) -> Option<Sequence> {
        if text.is_empty() || text.len() > Self::DIGITS {
            return None;
        }
        u32::from_str_radix(text, 16).ok().map(Sequence::new)
    }
}

impl Add<u32> for Sequence {
    type Output = Sequence;
    fn add(self, rhs: u32) -> Sequence {
        Sequence(self.0.wrapping_add(rhs) & Self::MASK)
    }
}

impl Sub<u32> for Sequence {
    type Output = Sequence;
    fn sub(self, rhs: u32) -> Sequence {
        Sequence(self.0.wrapping_sub(rhs) & Self::MASK)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06X}", self.0)
    }
}
