use super::fdset::Fdset;
use crate::acquisition::Acquisition;
use crate::connection::{Connection, ConnectionContext, Privileges};
use crate::monitor::InfoLevel;
use crate::plugin::Timer;
use crate::signals::StopHandle;
use crate::stationio::StationError;
use log::{error, info, warn};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use sysinfo::{ProcessExt, System, SystemExt};
use thiserror::Error;

/// Frames sent to one client per loop pass before others get a turn.
const MAX_WRITE_ROUNDS: usize = 64;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot bind port {0}: {1}")]
    Bind(u16, #[source] io::Error),
    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),
    #[error("{0}")]
    Station(#[from] StationError),
    #[error("{0}")]
    Io(#[from] io::Error),
}

pub type ServerResult<T> = Result<T, ServerError>;

///
/// Server wide settings.  Zero connection limits mean unlimited, a
/// zero `stats_interval` turns periodic statistics off and an
/// `info` level of None refuses INFO.
///
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub port: u16,
    pub connections: usize,
    pub connections_per_ip: usize,
    pub poll_timeout_ms: i32,
    pub stats_interval: u64,
    pub info: Option<InfoLevel>,
    pub info_trusted: Option<InfoLevel>,
    pub window_extraction: bool,
    pub window_extraction_trusted: bool,
}

impl Default for ServerSettings {
    fn default() -> ServerSettings {
        ServerSettings {
            port: 18000,
            connections: 0,
            connections_per_ip: 0,
            poll_timeout_ms: 100,
            stats_interval: 600,
            info: Some(InfoLevel::Capabilities),
            info_trusted: Some(InfoLevel::All),
            window_extraction: false,
            window_extraction_trusted: true,
        }
    }
}

#[derive(Debug)]
struct Client {
    stream: TcpStream,
    conn: Connection,
    open: bool,
}

impl Client {
    fn close(&mut self, why: &str) {
        if self.open {
            info!("{}{}", self.conn.prefix(), why);
            self.open = false;
        }
    }
    ///
    /// Read what the client sent and run its commands.
    ///
    fn read(&mut self) {
        let mut buf = [0u8; 1024];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return self.close("connection closed"),
                Ok(n) => {
                    if self.conn.input(&buf[..n]) {
                        return self.close("connection closed by client");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return self.close(&format!("read error: {}", e)),
            }
        }
    }
    ///
    /// Send pending output, making more as the socket takes it.
    ///
    fn write(&mut self) {
        for _ in 0..MAX_WRITE_ROUNDS {
            if self.conn.pending_output().is_empty() {
                if let Err(e) = self.conn.produce() {
                    error!("{}{}", self.conn.prefix(), e);
                    return self.close("connection closed after station error");
                }
                if self.conn.pending_output().is_empty() {
                    return;
                }
            }
            match self.stream.write(self.conn.pending_output()) {
                Ok(0) => return self.close("connection closed"),
                Ok(n) => self.conn.consume_output(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return self.close(&format!("write error: {}", e)),
            }
        }
    }
}

fn log_memory() {
    let mut system = System::new();
    let pid = match sysinfo::get_current_pid() {
        Ok(pid) => pid,
        Err(_) => return,
    };
    if system.refresh_process(pid) {
        if let Some(p) = system.get_process(pid) {
            info!("memory in use: {} kB", p.memory());
        }
    }
}

///
/// The event loop.  Each pass polls the listening socket, the plugin
/// pipes and the clients, then accepts connections, routes plugin
/// packets into the stations and moves data to the clients.  Nothing
/// but the poll blocks.
///
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    context: ConnectionContext,
    settings: ServerSettings,
    clients: Vec<Client>,
    per_ip: BTreeMap<IpAddr, usize>,
    blocked: BTreeMap<IpAddr, usize>,
}

impl Server {
    ///
    /// Listen on every interface at `settings.port` (0 picks a free
    /// port).
    ///
    pub fn bind(settings: ServerSettings, context: ConnectionContext) -> ServerResult<Server> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), settings.port);
        let listener = TcpListener::bind(addr).map_err(|e| ServerError::Bind(settings.port, e))?;
        listener.set_nonblocking(true)?;
        info!("listening on port {}", listener.local_addr()?.port());
        Ok(Server {
            listener,
            context,
            settings,
            clients: Vec::new(),
            per_ip: BTreeMap::new(),
            blocked: BTreeMap::new(),
        })
    }

    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
    pub fn n_clients(&self) -> usize {
        self.clients.len()
    }

    fn privileges(&self, ip: IpAddr) -> Privileges {
        let trusted = self.context.master.iptrusted(ip);
        Privileges {
            info_level: if trusted {
                self.settings.info_trusted
            } else {
                self.settings.info
            },
            window_extraction: self.settings.window_extraction
                || (trusted && self.settings.window_extraction_trusted),
        }
    }

    fn over_limit(&self, ip: IpAddr) -> bool {
        let s = &self.settings;
        (s.connections > 0 && self.clients.len() >= s.connections)
            || (s.connections_per_ip > 0
                && self.per_ip.get(&ip).copied().unwrap_or(0) >= s.connections_per_ip)
    }

    fn accept(&mut self) {
        loop {
            let (stream, addr) = match self.listener.accept() {
                Ok(c) => c,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("accept: {}", e);
                    return;
                }
            };
            let ip = addr.ip();
            if self.over_limit(ip) {
                let n = self.blocked.entry(ip).or_insert(0);
                *n += 1;
                if *n == 1 {
                    warn!("too many connections from {}, refusing", ip);
                }
                continue;
            }
            if let Err(e) = stream.set_nonblocking(true) {
                error!("{}: {}", addr, e);
                continue;
            }
            let conn = Connection::new(&self.context, addr, self.privileges(ip));
            info!("{}new connection", conn.prefix());
            *self.per_ip.entry(ip).or_insert(0) += 1;
            self.clients.push(Client {
                stream,
                conn,
                open: true,
            });
        }
    }

    fn remove_closed(&mut self) {
        let (open, closed): (Vec<Client>, Vec<Client>) =
            self.clients.drain(..).partition(|c| c.open);
        self.clients = open;
        for c in closed {
            let ip = c.conn.ip();
            if let Some(n) = self.per_ip.get_mut(&ip) {
                *n -= 1;
                if *n == 0 {
                    self.per_ip.remove(&ip);
                }
            }
            if let Some(n) = self.blocked.remove(&ip) {
                info!("blocked {} connections from {}", n, ip);
            }
        }
    }
    ///
    /// One pass of the loop.  `tick` is set once a second.
    ///
    fn iteration(&mut self, acquisition: &mut Acquisition, tick: bool) -> ServerResult<()> {
        let mut fds = Fdset::new();
        let listen_slot = fds.add(self.listener.as_raw_fd(), true, false);
        acquisition.register(&mut fds);
        let client_slots: Vec<usize> = self
            .clients
            .iter()
            .map(|c| fds.add(c.stream.as_raw_fd(), true, c.conn.wants_write()))
            .collect();
        fds.poll(self.settings.poll_timeout_ms)
            .map_err(ServerError::Poll)?;

        acquisition.dispatch(&fds, tick);

        for (client, slot) in self.clients.iter_mut().zip(client_slots) {
            if fds.readable(slot) {
                client.read();
            }
            if client.open && client.conn.wants_write() {
                client.write();
            }
        }
        self.remove_closed();

        if fds.readable(listen_slot) {
            self.accept();
        }
        Ok(())
    }
    ///
    /// Run until `stop` says so, then shut down: plugins first, then
    /// whatever the stations hold back is committed, clients are
    /// dropped and every station saves its state.
    ///
    pub fn run(&mut self, acquisition: &mut Acquisition, stop: &StopHandle) -> ServerResult<()> {
        let mut tick = Timer::from_secs(1);
        let mut stats = Timer::from_secs(self.settings.stats_interval);
        while !stop.stop_requested() {
            if stop.take_restart() {
                acquisition.restart();
            }
            let ticked = tick.expired();
            if ticked {
                tick.reset();
            }
            self.iteration(acquisition, ticked)?;
            if self.settings.stats_interval > 0 && stats.expired() {
                stats.reset();
                self.context.stations.log_stats();
                log_memory();
            }
        }
        self.shutdown(acquisition);
        Ok(())
    }

    fn shutdown(&mut self, acquisition: &mut Acquisition) {
        info!("terminating program");
        acquisition.terminate();
        while acquisition.running() {
            let mut fds = Fdset::new();
            acquisition.register(&mut fds);
            if let Err(e) = fds.poll(self.settings.poll_timeout_ms) {
                error!("poll failed: {}", e);
            }
            acquisition.dispatch(&fds, true);
        }
        acquisition.flush();
        for c in self.clients.iter_mut() {
            c.close("server shutting down");
        }
        self.remove_closed();
        self.context.stations.save_state();
    }
}

#[cfg(test)]
mod manager_test {
    use super::*;
    use crate::acl::IpAcl;
    use crate::monitor::MasterMonitor;
    use crate::stationio::StationRegistry;
    use std::rc::Rc;

    fn context(trusted: &[&str]) -> ConnectionContext {
        ConnectionContext {
            master: Rc::new(MasterMonitor::new(
                512,
                "SeedLink v3.1",
                "test",
                IpAcl::parse(trusted).unwrap(),
            )),
            stations: Rc::new(StationRegistry::new()),
            default_network: "XX".to_string(),
            request_log: false,
        }
    }

    fn settings() -> ServerSettings {
        ServerSettings {
            port: 0,
            ..ServerSettings::default()
        }
    }

    #[test]
    fn trusted_hosts_get_more() {
        let server = Server::bind(settings(), context(&["127.0.0.1"])).unwrap();
        let local = server.privileges("127.0.0.1".parse().unwrap());
        assert_eq!(local.info_level, Some(InfoLevel::All));
        assert!(local.window_extraction);
        let remote = server.privileges("10.1.2.3".parse().unwrap());
        assert_eq!(remote.info_level, Some(InfoLevel::Capabilities));
        assert!(!remote.window_extraction);
    }

    #[test]
    fn limits_refuse_connections() {
        let mut s = settings();
        s.connections_per_ip = 1;
        let mut server = Server::bind(s, context(&[])).unwrap();
        let addr = server.local_addr().unwrap();
        let mut acquisition = Acquisition::new(vec![], vec![]);
        let _first = TcpStream::connect(("127.0.0.1", addr.port())).unwrap();
        let _second = TcpStream::connect(("127.0.0.1", addr.port())).unwrap();
        for _ in 0..20 {
            server.iteration(&mut acquisition, true).unwrap();
        }
        assert_eq!(server.n_clients(), 1);
        assert_eq!(server.blocked.get(&"127.0.0.1".parse().unwrap()), Some(&1));
    }

    #[test]
    fn closed_clients_removed() {
        let mut server = Server::bind(settings(), context(&[])).unwrap();
        let addr = server.local_addr().unwrap();
        let mut acquisition = Acquisition::new(vec![], vec![]);
        let client = TcpStream::connect(("127.0.0.1", addr.port())).unwrap();
        for _ in 0..20 {
            server.iteration(&mut acquisition, false).unwrap();
            if server.n_clients() == 1 {
                break;
            }
        }
        assert_eq!(server.n_clients(), 1);
        drop(client);
        for _ in 0..20 {
            server.iteration(&mut acquisition, false).unwrap();
            if server.n_clients() == 0 {
                break;
            }
        }
        assert_eq!(server.n_clients(), 0);
        assert!(server.per_ip.is_empty());
    }
}
