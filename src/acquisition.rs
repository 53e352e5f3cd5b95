//! The acquisition side of the server: the plugins and the stations
//! their packets are routed to.
//!
use crate::plugin::{Plugin, PluginPacket, PluginParams};
use crate::server::Fdset;
use crate::station::Station;
use log::{error, info};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug)]
pub struct Acquisition {
    plugins: Vec<Plugin>,
    slots: Vec<Option<usize>>,
    stations: BTreeMap<String, Station>,
    unknown: BTreeSet<String>,
    packets: Vec<PluginPacket>,
}

impl Acquisition {
    pub fn new(plugins: Vec<PluginParams>, stations: Vec<Station>) -> Acquisition {
        Acquisition {
            plugins: plugins.into_iter().map(Plugin::new).collect(),
            slots: Vec::new(),
            stations: stations
                .into_iter()
                .map(|s| (s.key().to_string(), s))
                .collect(),
            unknown: BTreeSet::new(),
            packets: Vec::new(),
        }
    }

    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }
    pub fn station(&self, key: &str) -> Option<&Station> {
        self.stations.get(key)
    }

    pub fn start(&mut self) {
        for p in self.plugins.iter_mut() {
            p.start();
        }
    }
    ///
    /// Add the open plugin pipes to the poll set.
    ///
    pub fn register(&mut self, fds: &mut Fdset) {
        self.slots = self
            .plugins
            .iter()
            .map(|p| p.fd().map(|fd| fds.add(fd, true, false)))
            .collect();
    }
    ///
    /// Service every plugin whose pipe polled readable, or all of
    /// them on a `tick`, and route the packets they produced.
    ///
    pub fn dispatch(&mut self, fds: &Fdset, tick: bool) {
        for i in 0..self.plugins.len() {
            let ready = self
                .slots
                .get(i)
                .copied()
                .flatten()
                .map_or(false, |slot| fds.readable(slot));
            if ready || tick {
                self.service(i);
            }
        }
    }

    fn service(&mut self, index: usize) {
        let plugin = &mut self.plugins[index];
        self.packets.clear();
        plugin.service(&mut self.packets);
        for packet in self.packets.drain(..) {
            let station = match self.stations.get_mut(&packet.station) {
                Some(s) => s,
                None => {
                    if self.unknown.insert(packet.station.clone()) {
                        error!("[{}] unknown station {}", plugin.name(), packet.station);
                    }
                    continue;
                }
            };
            if let Err(e) = station.handle(plugin.name(), &packet) {
                error!("[{}] {}", plugin.name(), e);
                plugin.shutdown(false);
                break;
            }
        }
    }
    ///
    /// Stop every plugin and start it again right away.
    ///
    pub fn restart(&mut self) {
        info!("restarting plugins");
        for p in self.plugins.iter_mut() {
            p.shutdown(true);
        }
    }
    ///
    /// Stop every plugin for good.
    ///
    pub fn terminate(&mut self) {
        for p in self.plugins.iter_mut() {
            p.terminate();
        }
    }
    /// True while any plugin process is still around.
    pub fn running(&self) -> bool {
        self.plugins.iter().any(|p| p.running())
    }
    ///
    /// Commit everything the stations still hold back.
    ///
    pub fn flush(&mut self) {
        for s in self.stations.values_mut() {
            s.flush();
        }
    }
}
