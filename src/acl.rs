//!
//! IPv4 access lists.  Entries are `a.b.c.d`, `a.b.c.d/bits` or
//! `a.b.c.d/m.m.m.m`.  An empty list admits everyone.
//!
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
#[error("invalid access list entry '{0}'")]
pub struct AclError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AclEntry {
    address: u32,
    mask: u32,
}

impl FromStr for AclEntry {
    type Err = AclError;

    fn from_str(s: &str) -> Result<AclEntry, AclError> {
        let bad = || AclError(s.to_string());
        let (addr, mask) = match s.split_once('/') {
            Some((addr, mask)) => {
                let mask = if mask.contains('.') {
                    u32::from(mask.parse::<Ipv4Addr>().map_err(|_| bad())?)
                } else {
                    let bits = mask.parse::<u32>().map_err(|_| bad())?;
                    if bits > 32 {
                        return Err(bad());
                    }
                    if bits == 0 {
                        0
                    } else {
                        u32::MAX << (32 - bits)
                    }
                };
                (addr, mask)
            }
            None => (s, u32::MAX),
        };
        let address = u32::from(addr.trim().parse::<Ipv4Addr>().map_err(|_| bad())?);
        Ok(AclEntry { address, mask })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpAcl {
    entries: Vec<AclEntry>,
}

impl IpAcl {
    ///
    /// Build a list from its textual entries.  Entries may also be
    /// separated by commas or blanks within one string.
    ///
    pub fn parse<S: AsRef<str>>(items: &[S]) -> Result<IpAcl, AclError> {
        let mut entries = Vec::new();
        for item in items {
            for word in item
                .as_ref()
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|w| !w.is_empty())
            {
                entries.push(word.parse::<AclEntry>()?);
            }
        }
        Ok(IpAcl { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    ///
    /// Is `ip` admitted?  IPv6 peers only match through their
    /// IPv4-mapped form.
    ///
    pub fn check(&self, ip: IpAddr) -> bool {
        if self.entries.is_empty() {
            return true;
        }
        let v4 = match ip {
            IpAddr::V4(a) => Some(a),
            IpAddr::V6(a) => a.to_ipv4_mapped(),
        };
        match v4 {
            Some(a) => {
                let a = u32::from(a);
                self.entries
                    .iter()
                    .any(|e| a & e.mask == e.address & e.mask)
            }
            None => false,
        }
    }
    ///
    /// Like check() but an empty list admits nobody.  Used for the
    /// trusted host list.
    ///
    pub fn contains(&self, ip: IpAddr) -> bool {
        !self.entries.is_empty() && self.check(ip)
    }
}

impl fmt::Display for IpAcl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self
            .entries
            .iter()
            .map(|e| format!("{}/{}", Ipv4Addr::from(e.address), Ipv4Addr::from(e.mask)))
            .collect();
        write!(f, "{}", items.join(" "))
    }
}

#[cfg(test)]
mod acl_test {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn empty_admits_all() {
        let acl = IpAcl::default();
        assert!(acl.check(ip("10.1.2.3")));
        assert!(!acl.contains(ip("10.1.2.3")));
    }
    #[test]
    fn forms() {
        let acl = IpAcl::parse(&["192.168.1.7", "10.0.0.0/8", "172.16.0.0/255.255.0.0"]).unwrap();
        assert!(acl.check(ip("192.168.1.7")));
        assert!(!acl.check(ip("192.168.1.8")));
        assert!(acl.check(ip("10.200.3.4")));
        assert!(acl.check(ip("172.16.9.9")));
        assert!(!acl.check(ip("172.17.0.1")));
        assert!(acl.check(ip("::ffff:10.0.0.1")));
        assert!(!acl.check(ip("::1")));
    }
    #[test]
    fn separators_within_one_entry() {
        let acl = IpAcl::parse(&["127.0.0.1, 10.0.0.0/8"]).unwrap();
        assert!(acl.check(ip("127.0.0.1")));
        assert!(acl.check(ip("10.0.0.1")));
    }
    #[test]
    fn rejects_garbage() {
        assert!(IpAcl::parse(&["10.0.0/8"]).is_err());
        assert!(IpAcl::parse(&["10.0.0.0/33"]).is_err());
        assert!(IpAcl::parse(&["host.example"]).is_err());
    }
    #[test]
    fn zero_bits_matches_everything() {
        let acl = IpAcl::parse(&["0.0.0.0/0"]).unwrap();
        assert!(acl.check(ip("8.8.8.8")));
    }
}
