use super::command::{describe, parse_request, station_scoped, tokenize, CommandError, Request};
use crate::monitor::{InfoLevel, MasterMonitor};
use crate::stationio::{
    CursorId, Delivery, SharedStation, StationRegistry, StationResult, SIGNATURE,
};
use log::{debug, error, info, warn};
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;

/// Longest command line accepted.
pub const CMDLEN: usize = 100;

///
/// What every connection shares: server identity and the stations.
///
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub master: Rc<MasterMonitor>,
    pub stations: Rc<StationRegistry>,
    pub default_network: String,
    pub request_log: bool,
}

///
/// What a particular client may do, decided from its address when
/// it connects.  An `info_level` of None refuses INFO entirely.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Privileges {
    pub info_level: Option<InfoLevel>,
    pub window_extraction: bool,
}

///
/// A client's cursor on one requested station.  Dropping the link
/// detaches the cursor.
///
#[derive(Debug)]
struct StationLink {
    key: String,
    station: SharedStation,
    cursor: CursorId,
}

impl StationLink {
    fn new(station: SharedStation, host: &str, port: u16) -> StationLink {
        let (key, cursor) = {
            let mut s = station.borrow_mut();
            (s.key().to_string(), s.attach(host, port))
        };
        StationLink {
            key,
            station,
            cursor,
        }
    }
    fn ready(&self) -> bool {
        self.station.borrow().ready(self.cursor)
    }
    fn active(&self) -> bool {
        self.station.borrow().active(self.cursor)
    }
    fn mid_frame(&self) -> bool {
        self.station.borrow().mid_frame(self.cursor)
    }
}

impl Drop for StationLink {
    fn drop(&mut self) {
        if let Ok(mut s) = self.station.try_borrow_mut() {
            s.detach(self.cursor);
        }
    }
}

///
/// The protocol state of one client, independent of the socket.
/// The owner feeds received bytes to input() and sends what
/// pending_output() holds, refilling it with produce() while
/// wants_write() says there is more.
///
/// Until the client names a station it talks to the default station
/// (uni-station mode).  The first STATION command switches to
/// multi-station mode: every STATION adds a station, the following
/// SELECT/TIME/DATA/FETCH configure it, and END starts delivery from
/// all of them in turn.
///
#[derive(Debug)]
pub struct Connection {
    host: String,
    port: u16,
    ip: IpAddr,
    prefix: String,
    context: ConnectionContext,
    privileges: Privileges,
    links: Vec<StationLink>,
    current: Option<usize>,
    rotation: Option<usize>,
    cmdbuf: Vec<u8>,
    outbuf: Vec<u8>,
    multi: bool,
    handshaking_done: bool,
    batch: bool,
    invalid: bool,
}

impl Connection {
    pub fn new(context: &ConnectionContext, addr: SocketAddr, privileges: Privileges) -> Connection {
        let host = addr.ip().to_string();
        let port = addr.port();
        let mut links = Vec::new();
        if let Some(default) = context.stations.default_station() {
            links.push(StationLink::new(default, &host, port));
        }
        let current = if links.is_empty() { None } else { Some(0) };
        Connection {
            prefix: format!("{}:{} : ", host, port),
            host,
            port,
            ip: addr.ip(),
            context: context.clone(),
            privileges,
            links,
            current,
            rotation: None,
            cmdbuf: Vec::with_capacity(CMDLEN),
            outbuf: Vec::new(),
            multi: false,
            handshaking_done: false,
            batch: false,
            invalid: false,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }
    pub fn port(&self) -> u16 {
        self.port
    }
    pub fn ip(&self) -> IpAddr {
        self.ip
    }
    /// Prefix of this connection's log lines.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
    /// Keys of the stations this client has requested.
    pub fn stations(&self) -> Vec<String> {
        self.links.iter().map(|l| l.key.clone()).collect()
    }
    pub fn multi_station(&self) -> bool {
        self.multi
    }
    pub fn handshaking_done(&self) -> bool {
        self.handshaking_done
    }

    ///
    /// Consume bytes received from the client, executing each
    /// complete command line.  Returns true when the client asked to
    /// disconnect.
    ///
    pub fn input(&mut self, data: &[u8]) -> bool {
        let data = match data.iter().position(|&b| b == 0) {
            Some(n) => &data[..n],
            None => data,
        };
        self.cmdbuf.extend_from_slice(data);
        while let Some(end) = self.cmdbuf.iter().position(|&b| b == b'\r' || b == b'\n') {
            let line: Vec<u8> = self.cmdbuf.drain(..=end).collect();
            let text = String::from_utf8_lossy(&line[..end]).into_owned();
            if self.request(&text) {
                self.cmdbuf.clear();
                return true;
            }
        }
        if self.cmdbuf.len() >= CMDLEN {
            warn!("{}command buffer overflow", self.prefix);
            self.cmdbuf.clear();
        }
        false
    }

    fn respond(&mut self, text: &str) {
        if self.batch {
            return;
        }
        self.outbuf.extend_from_slice(text.as_bytes());
        self.handshaking_done = false;
    }

    fn request_ok(&self, prefix: &str, words: &[&str], rlog: bool) {
        if rlog {
            info!("{}{}", prefix, describe(words));
        }
    }

    fn request_invalid(&mut self, prefix: &str, words: &[&str], reason: Option<&CommandError>) {
        warn!("{}invalid request: {}", prefix, words.join(" "));
        if let Some(e) = reason {
            debug!("{}{}", prefix, e);
        }
        if self.batch {
            error!("{}BATCH mode: request failed", prefix);
        }
        self.respond("ERROR\r\n");
    }

    fn station_prefix(&self, link: usize) -> String {
        format!("{}{} : ", self.prefix, self.links[link].key)
    }

    fn request(&mut self, line: &str) -> bool {
        let words = tokenize(line);
        if words.is_empty() {
            return false;
        }
        let prefix = self.prefix.clone();
        let rlog = self.context.request_log;
        let request = match parse_request(&words, self.privileges.window_extraction) {
            Ok(request) => request,
            Err(e) => {
                let mut prefix = prefix;
                if station_scoped(words[0]) && !self.invalid {
                    if let Some(c) = self.current {
                        let link = &self.links[c];
                        link.station.borrow_mut().reset_cursor(link.cursor);
                        prefix = self.station_prefix(c);
                    }
                }
                self.request_invalid(&prefix, &words, Some(&e));
                return false;
            }
        };
        match request {
            Request::Bye => {
                self.request_ok(&prefix, &words, rlog);
                return true;
            }
            Request::End => {
                self.request_ok(&prefix, &words, rlog);
                self.handshaking_done = true;
                self.batch = false;
            }
            Request::Hello => {
                self.request_ok(&prefix, &words, rlog);
                let ident = format!(
                    "{}\r\n{}\r\n",
                    self.context.master.software(),
                    self.context.master.organization()
                );
                self.respond(&ident);
            }
            Request::Batch => {
                self.request_ok(&prefix, &words, rlog);
                self.respond("OK\r\n");
                self.batch = true;
            }
            Request::Cat => {
                self.request_ok(&prefix, &words, rlog);
                let lines = self.context.stations.cat_lines(self.ip);
                for rec in self.context.master.cat_out(lines) {
                    self.outbuf.extend_from_slice(&rec);
                }
                self.outbuf.extend_from_slice(b"END");
            }
            Request::Info(level) => self.command_info(&prefix, &words, &level),
            Request::Station { name, network } => {
                self.command_station(&prefix, &words, &name, network.as_deref())
            }
            other => self.station_request(&words, other),
        }
        false
    }

    fn command_info(&mut self, prefix: &str, words: &[&str], level: &str) {
        let max = match self.privileges.info_level {
            Some(max) => max,
            None => {
                self.request_invalid(prefix, words, None);
                return;
            }
        };
        self.request_ok(prefix, words, self.context.request_log);
        let master = &self.context.master;
        let records = match level.parse::<InfoLevel>() {
            Ok(level) if level <= max => {
                let stations = self.context.stations.info(level, self.ip);
                master.info_out(level, self.ip, stations)
            }
            _ => master.error_out(),
        };
        let last = records.len().saturating_sub(1);
        for (i, rec) in records.iter().enumerate() {
            let more = if i == last { ' ' } else { '*' };
            self.outbuf
                .extend_from_slice(format!("{}INFO {}", SIGNATURE, more).as_bytes());
            self.outbuf.extend_from_slice(rec);
        }
    }

    fn command_station(&mut self, prefix: &str, words: &[&str], name: &str, network: Option<&str>) {
        let network = network.unwrap_or(&self.context.default_network).to_string();
        self.request_ok(prefix, words, self.context.request_log);
        let station = match self.context.stations.find(&network, name) {
            Some(s) => s,
            None => {
                warn!("{}no such station", prefix);
                self.invalid = true;
                self.request_invalid(prefix, words, None);
                return;
            }
        };
        if !station.borrow().ipaccess(self.ip) {
            warn!("{}access violation", prefix);
            self.invalid = true;
            self.request_invalid(prefix, words, None);
            return;
        }
        self.invalid = false;
        self.respond("OK\r\n");

        if !self.multi {
            if let Some(c) = self.current.take() {
                debug!("{}dropping default station {}", prefix, self.links[c].key);
                self.links.remove(c);
                self.rotation = None;
            }
        }
        let key = station.borrow().key().to_string();
        match self.links.iter().position(|l| l.key == key) {
            Some(p) => {
                info!("{}station already requested", prefix);
                self.current = Some(p);
            }
            None => {
                self.links.push(StationLink::new(station, &self.host, self.port));
                self.current = Some(self.links.len() - 1);
            }
        }
        self.multi = true;
    }

    fn station_request(&mut self, words: &[&str], request: Request) {
        let current = match self.current {
            Some(c) if !self.invalid => c,
            _ => {
                let prefix = self.prefix.clone();
                self.request_invalid(&prefix, words, None);
                return;
            }
        };
        let prefix = self.station_prefix(current);
        let station = self.links[current].station.clone();
        let cursor = self.links[current].cursor;
        let rlog = self.context.request_log && station.borrow().request_log();
        match request {
            Request::Select(pattern) => {
                if station.borrow_mut().select(cursor, pattern.as_deref()) {
                    self.request_ok(&prefix, words, rlog);
                    self.respond("OK\r\n");
                } else {
                    self.request_invalid(&prefix, words, None);
                }
            }
            Request::Time { begin, end } => {
                if station.borrow_mut().time(cursor, begin, end) {
                    self.request_ok(&prefix, words, rlog);
                    self.started();
                } else {
                    self.request_invalid(&prefix, words, None);
                }
            }
            Request::Data { start, realtime } => {
                station.borrow_mut().data(cursor, start, realtime);
                self.request_ok(&prefix, words, rlog);
                self.started();
            }
            other => {
                debug!("{}unexpected station request {:?}", prefix, other);
                self.request_invalid(&prefix, words, None);
            }
        }
    }
    ///
    /// A station was told where to start.  In multi-station mode the
    /// client gets OK and goes on with the handshake; otherwise data
    /// starts flowing right away.
    ///
    fn started(&mut self) {
        if self.multi {
            self.respond("OK\r\n");
        } else {
            self.handshaking_done = true;
        }
    }

    fn any_ready(&self) -> bool {
        self.links.iter().any(|l| l.ready())
    }
    fn any_active(&self) -> bool {
        self.links.iter().any(|l| l.active())
    }
    ///
    /// True if there is output waiting or produce() could make some.
    ///
    pub fn wants_write(&self) -> bool {
        !self.outbuf.is_empty() || (self.handshaking_done && self.any_ready())
    }
    ///
    /// Add the next unit of record data to the output.  Stations take
    /// turns: each call serves the next ready station after the one
    /// served last.  When the last active station finishes, `END`
    /// is added.
    ///
    pub fn produce(&mut self) -> StationResult<()> {
        if !self.handshaking_done || self.links.is_empty() {
            return Ok(());
        }
        let n = self.links.len();
        while self.any_ready() {
            // a frame started on one link is finished before moving on
            let next = match self.rotation {
                Some(r) if self.links[r].ready() && self.links[r].mid_frame() => r,
                Some(r) => (r + 1) % n,
                None => 0,
            };
            self.rotation = Some(next);
            let link = &self.links[next];
            if !link.ready() {
                continue;
            }
            let result = link
                .station
                .borrow_mut()
                .deliver(link.cursor, &mut self.outbuf)?;
            match result {
                Delivery::Data => break,
                Delivery::Drained => {}
                Delivery::Finished => {
                    if !self.any_active() {
                        self.outbuf.extend_from_slice(b"END");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn pending_output(&self) -> &[u8] {
        &self.outbuf
    }
    ///
    /// `n` bytes of pending output were sent.
    ///
    pub fn consume_output(&mut self, n: usize) {
        let n = n.min(self.outbuf.len());
        self.outbuf.drain(..n);
    }
}

#[cfg(test)]
mod connection_test {
    use super::*;
    use crate::acl::IpAcl;
    use crate::monitor::StationMonitor;
    use crate::mseed::{RecordBuilder, RecordView, DATA_OFFSET};
    use crate::stationio::{StationIO, StationParams, SEGMENT_DIR};
    use crate::timeutil::parse_time;
    use chrono::{Duration, NaiveDateTime};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const RECLEN: usize = 512;
    const FRAME: usize = 8 + RECLEN;

    fn t(sec: i64) -> NaiveDateTime {
        parse_time("2022/06/01 00:00:00").unwrap() + Duration::seconds(sec)
    }

    fn make_station(dir: &Path, name: &str, access: IpAcl, reclen: usize) -> StationIO {
        let key = format!("GE.{}", name);
        let p = StationParams {
            key: key.clone(),
            directory: dir.join(&key),
            record_length: reclen,
            buffers: 50,
            blanks: 0,
            segments: 5,
            segsize: 100,
            seq_gap_limit: 1000,
            load_headers: true,
            request_log: true,
        };
        fs::create_dir_all(p.directory.join(SEGMENT_DIR)).unwrap();
        let mut m = StationMonitor::new(name, "GE", &format!("{} station", name), access);
        m.configure_stream_check(true, "", 0).unwrap();
        StationIO::new(&p, m)
    }

    struct Fixture {
        _dir: TempDir,
        context: ConnectionContext,
        stations: Vec<SharedStation>,
        builders: Vec<RecordBuilder>,
        counts: Vec<i64>,
    }

    impl Fixture {
        fn new(names: &[&str]) -> Fixture {
            Fixture::with_record_length(names, RECLEN)
        }

        fn with_record_length(names: &[&str], reclen: usize) -> Fixture {
            let dir = TempDir::new().unwrap();
            let mut registry = StationRegistry::new();
            let mut stations = Vec::new();
            let mut builders = Vec::new();
            for name in names {
                let access = if *name == "SECR" {
                    IpAcl::parse(&["10.0.0.0/8"]).unwrap()
                } else {
                    IpAcl::default()
                };
                let io = make_station(dir.path(), name, access, reclen);
                stations.push(registry.register(io).unwrap());
                builders.push(RecordBuilder::new("GE", name, "", "BHZ", reclen));
            }
            let mut master = MasterMonitor::new(RECLEN, "SeedLink v3.1 (test)", "Test Org", IpAcl::default());
            master.add_capability("dialup", false);
            let context = ConnectionContext {
                master: Rc::new(master),
                stations: Rc::new(registry),
                default_network: "GE".to_string(),
                request_log: true,
            };
            let counts = vec![0; names.len()];
            Fixture {
                _dir: dir,
                context,
                stations,
                builders,
                counts,
            }
        }

        fn commit(&mut self, station: usize, count: i64) {
            for _ in 0..count {
                let n = self.counts[station];
                let (rec, _) = self.builders[station].data_record(&t(n * 10), 1.0, &[7; 10], None);
                self.stations[station].borrow_mut().commit(&rec).unwrap();
                self.counts[station] += 1;
            }
        }

        fn connect(&self, wx: bool) -> Connection {
            let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
            Connection::new(
                &self.context,
                addr,
                Privileges {
                    info_level: Some(InfoLevel::Connections),
                    window_extraction: wx,
                },
            )
        }
    }

    // Everything the connection would send until it runs dry.
    fn collect(conn: &mut Connection) -> Vec<u8> {
        let mut sent = Vec::new();
        while conn.wants_write() {
            if conn.pending_output().is_empty() {
                conn.produce().unwrap();
                if conn.pending_output().is_empty() {
                    break;
                }
            }
            sent.extend_from_slice(conn.pending_output());
            let n = conn.pending_output().len();
            conn.consume_output(n);
        }
        sent
    }

    fn frames(data: &[u8]) -> Vec<(String, String)> {
        data.chunks(FRAME)
            .map(|f| {
                let v = RecordView::new(&f[8..]);
                (String::from_utf8_lossy(&f[..8]).into_owned(), v.station())
            })
            .collect()
    }

    #[test]
    fn hello_reports_identity() {
        let f = Fixture::new(&["APE"]);
        let mut c = f.connect(false);
        assert!(!c.input(b"HELLO\r\n"));
        assert_eq!(collect(&mut c), b"SeedLink v3.1 (test)\r\nTest Org\r\n".to_vec());
    }

    #[test]
    fn hello_then_data_all() {
        let mut f = Fixture::new(&["APE"]);
        f.commit(0, 10);
        let mut c = f.connect(false);
        c.input(b"HELLO\r\nDATA ALL\r\n");
        let sent = collect(&mut c);
        let ident = b"SeedLink v3.1 (test)\r\nTest Org\r\n".len();
        let data = &sent[ident..];
        assert_eq!(data.len(), 10 * FRAME);
        let seqs: Vec<String> = frames(data).into_iter().map(|(s, _)| s).collect();
        let expected: Vec<String> = (0..10).map(|n| format!("SL{:06X}", n)).collect();
        assert_eq!(seqs, expected);
        // subscribed for more, no END
        assert!(!sent.ends_with(b"END"));
    }

    #[test]
    fn fetch_all_ends() {
        let mut f = Fixture::new(&["APE"]);
        f.commit(0, 10);
        let mut c = f.connect(false);
        c.input(b"FETCH ALL\r\n");
        let sent = collect(&mut c);
        assert_eq!(sent.len(), 10 * FRAME + 3);
        assert!(sent.ends_with(b"END"));
    }

    #[test]
    fn partial_lines_are_buffered() {
        let f = Fixture::new(&["APE"]);
        let mut c = f.connect(false);
        c.input(b"HEL");
        assert!(!c.wants_write());
        c.input(b"LO\n");
        assert!(c.wants_write());
        assert!(c.input(b"BYE\r\n"));
    }

    #[test]
    fn overlong_command_dropped() {
        let f = Fixture::new(&["APE"]);
        let mut c = f.connect(false);
        c.input(&[b'X'; CMDLEN + 10]);
        c.input(b"\r\n");
        assert!(collect(&mut c).is_empty());
    }

    #[test]
    fn errors_keep_connection() {
        let f = Fixture::new(&["APE"]);
        let mut c = f.connect(false);
        assert!(!c.input(b"FOO\r\nDATA ZZZ\r\nTIME 2020,1,1,0,0,0\r\nSELECT B*Z\r\n"));
        assert_eq!(collect(&mut c), b"ERROR\r\nERROR\r\nERROR\r\nERROR\r\n".to_vec());
    }

    #[test]
    fn station_handshake() {
        let mut f = Fixture::new(&["APE", "KWP"]);
        f.commit(1, 2);
        let mut c = f.connect(false);
        c.input(b"STATION KWP GE\r\nSELECT BHZ\r\nFETCH ALL\r\n");
        assert!(c.multi_station());
        assert_eq!(c.stations(), vec!["GE.KWP".to_string()]);
        assert!(!c.handshaking_done());
        assert_eq!(collect(&mut c), b"OK\r\nOK\r\nOK\r\n".to_vec());
        c.input(b"END\r\n");
        let sent = collect(&mut c);
        assert_eq!(sent.len(), 2 * FRAME + 3);
        assert_eq!(frames(&sent[..2 * FRAME])[0].1, "KWP");
    }

    #[test]
    fn unknown_station_blocks_commands() {
        let f = Fixture::new(&["APE"]);
        let mut c = f.connect(false);
        c.input(b"STATION NONE\r\nDATA\r\n");
        assert_eq!(collect(&mut c), b"ERROR\r\nERROR\r\n".to_vec());
        c.input(b"STATION SECR\r\n");
        assert_eq!(collect(&mut c), b"ERROR\r\n".to_vec());
    }

    #[test]
    fn forbidden_station_refused() {
        let f = Fixture::new(&["APE", "SECR"]);
        let mut c = f.connect(false);
        c.input(b"STATION SECR GE\r\n");
        assert_eq!(collect(&mut c), b"ERROR\r\n".to_vec());
        c.input(b"CAT\r\n");
        let sent = collect(&mut c);
        assert!(sent.ends_with(b"END"));
        let text = String::from_utf8_lossy(&sent[DATA_OFFSET..RECLEN]).into_owned();
        assert!(text.contains("APE"));
        assert!(!text.contains("SECR"));
    }

    #[test]
    fn batch_suppresses_responses() {
        let mut f = Fixture::new(&["APE", "KWP"]);
        f.commit(0, 1);
        let mut c = f.connect(false);
        c.input(b"BATCH\r\nSTATION APE\r\nFETCH ALL\r\nSTATION XXX\r\n");
        assert_eq!(collect(&mut c), b"OK\r\n".to_vec());
        c.input(b"STATION APE\r\nFETCH ALL\r\nEND\r\n");
        let sent = collect(&mut c);
        assert_eq!(sent.len(), FRAME + 3);
    }

    // Split an INFO response into its records; checks the
    // continuation markers and returns the concatenated text.
    fn info_text(sent: &[u8]) -> (String, Vec<String>) {
        let recs: Vec<&[u8]> = sent.chunks(FRAME).collect();
        let mut text = String::new();
        let mut channels = Vec::new();
        for (i, r) in recs.iter().enumerate() {
            let marker: &[u8] = if i + 1 == recs.len() { b"SLINFO  " } else { b"SLINFO *" };
            assert_eq!(&r[..8], marker);
            let view = RecordView::new(&r[8..]);
            let n = view.num_samples() as usize;
            text.push_str(&String::from_utf8_lossy(&r[8 + DATA_OFFSET..8 + DATA_OFFSET + n]));
            channels.push(view.channel());
        }
        (text, channels)
    }

    #[test]
    fn info_levels() {
        let mut f = Fixture::new(&["APE"]);
        f.commit(0, 1);
        let mut c = f.connect(false);
        c.input(b"INFO STREAMS\r\n");
        let (text, channels) = info_text(&collect(&mut c));
        assert!(channels.iter().all(|ch| ch == "INF"));
        assert!(text.contains("<station"));
        assert!(text.contains("seedname=\"BHZ\""));

        c.input(b"INFO ALL\r\n");
        let (_, channels) = info_text(&collect(&mut c));
        assert!(channels.iter().all(|ch| ch == "ERR"));

        c.input(b"INFO NOPE\r\n");
        let (_, channels) = info_text(&collect(&mut c));
        assert!(channels.iter().all(|ch| ch == "ERR"));
    }

    #[test]
    fn info_disabled() {
        let f = Fixture::new(&["APE"]);
        let addr: SocketAddr = "127.0.0.1:40001".parse().unwrap();
        let mut c = Connection::new(
            &f.context,
            addr,
            Privileges {
                info_level: None,
                window_extraction: false,
            },
        );
        c.input(b"INFO ID\r\n");
        assert_eq!(collect(&mut c), b"ERROR\r\n".to_vec());
    }

    #[test]
    fn round_robin_over_stations() {
        let mut f = Fixture::new(&["AAA", "BBB", "CCC"]);
        for s in 0..3 {
            f.commit(s, 5);
        }
        let mut c = f.connect(false);
        c.input(b"STATION AAA\r\nDATA ALL\r\nSTATION BBB\r\nDATA ALL\r\nSTATION CCC\r\nDATA ALL\r\n");
        collect(&mut c);
        c.input(b"END\r\n");
        let mut order = Vec::new();
        for _ in 0..9 {
            c.produce().unwrap();
            let out = c.pending_output().to_vec();
            assert_eq!(out.len(), FRAME);
            order.push(frames(&out)[0].1.clone());
            c.consume_output(out.len());
        }
        assert_eq!(
            order,
            vec!["AAA", "BBB", "CCC", "AAA", "BBB", "CCC", "AAA", "BBB", "CCC"]
        );
    }

    // Frames larger than a delivery chunk still reach the client whole
    // when several stations take turns.
    #[test]
    fn round_robin_keeps_long_frames_whole() {
        const LONG: usize = 8 + 1024;
        let mut f = Fixture::with_record_length(&["AAA", "BBB"], 1024);
        f.commit(0, 2);
        f.commit(1, 2);
        let mut c = f.connect(false);
        c.input(b"STATION AAA\r\nDATA ALL\r\nSTATION BBB\r\nDATA ALL\r\n");
        collect(&mut c);
        c.input(b"END\r\n");
        let sent = collect(&mut c);
        assert_eq!(sent.len(), 4 * LONG);
        let heads: Vec<(String, String)> = sent
            .chunks(LONG)
            .map(|f| {
                let v = RecordView::new(&f[8..]);
                (String::from_utf8_lossy(&f[..8]).into_owned(), v.station())
            })
            .collect();
        let expected: Vec<(String, String)> = vec![
            ("SL000000", "AAA"),
            ("SL000000", "BBB"),
            ("SL000001", "AAA"),
            ("SL000001", "BBB"),
        ]
        .into_iter()
        .map(|(s, n)| (s.to_string(), n.to_string()))
        .collect();
        assert_eq!(heads, expected);
    }

    #[test]
    fn drained_station_skipped() {
        let mut f = Fixture::new(&["AAA", "BBB"]);
        f.commit(0, 1);
        f.commit(1, 3);
        let mut c = f.connect(false);
        c.input(b"STATION AAA\r\nDATA ALL\r\nSTATION BBB\r\nDATA ALL\r\nEND\r\n");
        let sent = collect(&mut c);
        let stations: Vec<String> = frames(&sent[16..]).into_iter().map(|(_, s)| s).collect();
        assert_eq!(stations, vec!["AAA", "BBB", "BBB", "BBB"]);
        f.commit(0, 1);
        let sent = collect(&mut c);
        assert_eq!(frames(&sent)[0].1, "AAA");
    }

    #[test]
    fn disconnect_detaches() {
        let f = Fixture::new(&["APE"]);
        let c = f.connect(false);
        let ip = c.ip();
        let count = |f: &Fixture| {
            f.stations[0]
                .borrow()
                .info(InfoLevel::Connections, ip)
                .unwrap()
                .children()
                .len()
        };
        assert_eq!(count(&f), 1);
        drop(c);
        assert_eq!(count(&f), 0);
    }
}
