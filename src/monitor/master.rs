use crate::acl::IpAcl;
use crate::mseed::RecordBuilder;
use crate::timeutil::format_time;
use crate::xmldoc::{XmlDocument, XmlElement};
use chrono::{NaiveDateTime, Utc};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Channel name of INFO records.
pub const INFO_STREAM: &str = "INF";
/// Channel name of records answering a refused INFO request.
pub const ERROR_STREAM: &str = "ERR";

///
/// How much an INFO request reveals; each level includes the ones
/// before it.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InfoLevel {
    Id,
    Capabilities,
    Stations,
    Streams,
    Gaps,
    Connections,
    All,
}

impl InfoLevel {
    pub const ALL_LEVELS: [InfoLevel; 7] = [
        InfoLevel::Id,
        InfoLevel::Capabilities,
        InfoLevel::Stations,
        InfoLevel::Streams,
        InfoLevel::Gaps,
        InfoLevel::Connections,
        InfoLevel::All,
    ];

    pub fn name(self) -> &'static str {
        match self {
            InfoLevel::Id => "id",
            InfoLevel::Capabilities => "capabilities",
            InfoLevel::Stations => "stations",
            InfoLevel::Streams => "streams",
            InfoLevel::Gaps => "gaps",
            InfoLevel::Connections => "connections",
            InfoLevel::All => "all",
        }
    }
}

impl FromStr for InfoLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<InfoLevel, String> {
        InfoLevel::ALL_LEVELS
            .iter()
            .copied()
            .find(|l| l.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown INFO level '{}'", s))
    }
}

impl fmt::Display for InfoLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone)]
struct Capability {
    name: String,
    restricted: bool,
}

///
/// Server wide identity and the builders of the INFO, CAT and error
/// responses.  Responses are wrapped in ASCII Mini-SEED records of
/// the server's record length.
///
#[derive(Debug)]
pub struct MasterMonitor {
    reclen: usize,
    software: String,
    organization: String,
    trusted: IpAcl,
    started: NaiveDateTime,
    capabilities: Vec<Capability>,
}

impl MasterMonitor {
    pub fn new(reclen: usize, software: &str, organization: &str, trusted: IpAcl) -> MasterMonitor {
        MasterMonitor {
            reclen,
            software: software.to_string(),
            organization: organization.to_string(),
            trusted,
            started: Utc::now().naive_utc(),
            capabilities: Vec::new(),
        }
    }
    ///
    /// Advertise a capability.  Restricted ones are only listed to
    /// trusted hosts.
    ///
    pub fn add_capability(&mut self, name: &str, restricted: bool) {
        self.capabilities.push(Capability {
            name: name.to_string(),
            restricted,
        });
    }

    pub fn software(&self) -> &str {
        &self.software
    }
    pub fn organization(&self) -> &str {
        &self.organization
    }
    pub fn iptrusted(&self, ip: IpAddr) -> bool {
        self.trusted.contains(ip)
    }

    fn root(&self) -> XmlElement {
        let mut root = XmlElement::new("seedlink");
        root.attr("software", &self.software)
            .attr("organization", &self.organization)
            .attr("started", &format_time(&self.started));
        root
    }
    ///
    /// The INFO document for `level`.  `stations` are the station
    /// elements visible to the client; they are only included from
    /// the stations level on.
    ///
    pub fn info_document<I>(&self, level: InfoLevel, ip: IpAddr, stations: I) -> XmlDocument
    where
        I: IntoIterator<Item = XmlElement>,
    {
        let mut root = self.root();
        if level == InfoLevel::Capabilities || level == InfoLevel::All {
            let trusted = self.iptrusted(ip);
            for c in self.capabilities.iter().filter(|c| !c.restricted || trusted) {
                root.child("capability").attr("name", &c.name);
            }
        }
        if level >= InfoLevel::Stations {
            for s in stations {
                root.add_child(s);
            }
        }
        XmlDocument::new(root)
    }
    ///
    /// The document sent instead of a refused INFO request.
    ///
    pub fn error_document(&self) -> XmlDocument {
        XmlDocument::new(self.root())
    }

    pub fn records(&self, channel: &str, text: &str) -> Vec<Vec<u8>> {
        let mut builder = RecordBuilder::new("", "", "", channel, self.reclen);
        builder.text_records(&Utc::now().naive_utc(), text.as_bytes())
    }

    pub fn info_out<I>(&self, level: InfoLevel, ip: IpAddr, stations: I) -> Vec<Vec<u8>>
    where
        I: IntoIterator<Item = XmlElement>,
    {
        self.records(INFO_STREAM, &self.info_document(level, ip, stations).to_string())
    }

    pub fn error_out(&self) -> Vec<Vec<u8>> {
        self.records(ERROR_STREAM, &self.error_document().to_string())
    }
    ///
    /// The CAT response: one line per visible station.
    ///
    pub fn cat_out<I>(&self, lines: I) -> Vec<Vec<u8>>
    where
        I: IntoIterator<Item = String>,
    {
        let text: String = lines.into_iter().collect();
        self.records(INFO_STREAM, &text)
    }
}
