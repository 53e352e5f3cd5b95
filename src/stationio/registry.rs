use super::error::StationResult;
use super::station_io::StationIO;
use crate::monitor::InfoLevel;
use crate::xmldoc::XmlElement;
use log::{error, info};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::rc::Rc;

/// A station as shared between its acquisition side and its readers.
pub type SharedStation = Rc<RefCell<StationIO>>;

///
/// All stations served, looked up by network and station code.  The
/// first station registered is the default one that clients talk
/// to until they issue STATION.
///
#[derive(Debug, Default)]
pub struct StationRegistry {
    stations: BTreeMap<(String, String), SharedStation>,
    default: Option<SharedStation>,
}

impl StationRegistry {
    pub fn new() -> StationRegistry {
        StationRegistry::default()
    }
    ///
    /// Add a station.  None if one with the same network and code
    /// is already registered.
    ///
    pub fn register(&mut self, io: StationIO) -> Option<SharedStation> {
        let key = (
            io.monitor().network().to_string(),
            io.monitor().name().to_string(),
        );
        if self.stations.contains_key(&key) {
            return None;
        }
        let shared = Rc::new(RefCell::new(io));
        if self.default.is_none() {
            self.default = Some(shared.clone());
        }
        self.stations.insert(key, shared.clone());
        Some(shared)
    }

    pub fn find(&self, network: &str, name: &str) -> Option<SharedStation> {
        self.stations
            .get(&(network.to_string(), name.to_string()))
            .cloned()
    }

    pub fn default_station(&self) -> Option<SharedStation> {
        self.default.clone()
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }
    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SharedStation> {
        self.stations.values()
    }
    ///
    /// Station elements for an INFO document, as seen from `ip`.
    ///
    pub fn info(&self, level: InfoLevel, ip: IpAddr) -> Vec<XmlElement> {
        self.iter()
            .filter_map(|s| s.borrow().info(level, ip))
            .collect()
    }

    pub fn cat_lines(&self, ip: IpAddr) -> Vec<String> {
        self.iter()
            .filter_map(|s| s.borrow().cat_line(ip))
            .collect()
    }

    pub fn restore_state(&self) -> StationResult<()> {
        for s in self.iter() {
            let mut station = s.borrow_mut();
            info!("restoring station {}", station.key());
            station.restore_state()?;
        }
        Ok(())
    }
    ///
    /// Write every station's snapshot.  A failure is logged and the
    /// remaining stations are still saved.
    ///
    pub fn save_state(&self) {
        for s in self.iter() {
            let station = s.borrow();
            if let Err(e) = station.save_state() {
                error!("{}: {}", station.key(), e);
            }
        }
    }

    pub fn log_stats(&self) {
        for s in self.iter() {
            info!("{}", s.borrow().stats());
        }
    }
}
