//! The configuration file.
//!
//! A TOML document with a `[server]` table of global settings, a
//! `[[plugin]]` array of acquisition plugins and a `[[station]]`
//! array of stations.  Station settings left out default to the
//! server's.  For example:
//!
//! ```toml
//! [server]
//! port = 18000
//! filebase = "/var/lib/seedlink"
//! organization = "GEOFON"
//! trusted = ["127.0.0.1", "10.0.0.0/8"]
//!
//! [[plugin]]
//! name = "chain0"
//! cmd = "/usr/lib/seedlink/chain_plugin -f chain0.xml"
//! timeout = 600
//!
//! [[station]]
//! id = "APE"
//! network = "GE"
//! backfill_buffer = 60.0
//!
//! [[station.channel]]
//! input = "Z"
//! location = "00"
//! channel = "BHZ"
//! rate = 20.0
//! ```
//!
//! Everything is checked when the file is loaded; a bad value is a
//! ConfigError and the server does not start.
//!
use crate::acl::IpAcl;
use crate::monitor::{InfoLevel, MasterMonitor, StationMonitor};
use crate::plugin::PluginParams;
use crate::server::ServerSettings;
use crate::station::{ChannelParams, IngestParams, Station};
use crate::stationio::{station_directory, StationIO, StationParams, StationRegistry, SEGMENT_DIR};
use regex::RegexBuilder;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// What HELLO reports as the first line.
pub const SOFTWARE_ID: &str = concat!(
    "SeedLink v3.1 (",
    env!("CARGO_PKG_NAME"),
    " ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

pub const DEFAULT_CONFIG_FILE: &str = "/etc/seedlink/seedlink.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {0}: {1}")]
    CannotRead(PathBuf, #[source] io::Error),
    #[error("syntax error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{0} = {1} is out of range")]
    Range(String, String),
    #[error("{0}: {1}")]
    Invalid(String, String),
    #[error("duplicate {0} '{1}'")]
    Duplicate(&'static str, String),
    #[error("cannot use directory {0}: {1}")]
    Directory(PathBuf, #[source] io::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub port: u16,
    pub filebase: PathBuf,
    pub organization: String,
    pub network: String,
    pub record_length: usize,
    pub buffers: usize,
    pub blanks: usize,
    pub segments: usize,
    pub segsize: usize,
    pub connections: usize,
    pub connections_per_ip: usize,
    pub seq_gap_limit: u32,
    pub plugin_timeout: u64,
    pub plugin_start_retry: u64,
    pub plugin_shutdown_wait: u64,
    pub backfill_buffer: f64,
    /// Milliseconds.
    pub proc_gap_warn: u64,
    pub request_log: bool,
    pub stream_check: bool,
    pub gap_check_pattern: String,
    /// Microseconds.
    pub gap_treshold: i64,
    pub info: String,
    pub info_trusted: String,
    pub trusted: Vec<String>,
    pub access: Vec<String>,
    pub window_extraction: bool,
    pub window_extraction_trusted: bool,
    pub lockfile: String,
    pub poll_timeout_ms: i32,
    pub stats_interval: u64,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            port: 18000,
            filebase: PathBuf::from("/var/lib/seedlink"),
            organization: whoami::hostname(),
            network: "XX".to_string(),
            record_length: 512,
            buffers: 100,
            blanks: 10,
            segments: 50,
            segsize: 1000,
            connections: 0,
            connections_per_ip: 0,
            seq_gap_limit: 100_000,
            plugin_timeout: 0,
            plugin_start_retry: 60,
            plugin_shutdown_wait: 10,
            backfill_buffer: 0.0,
            proc_gap_warn: 10,
            request_log: true,
            stream_check: true,
            gap_check_pattern: String::new(),
            gap_treshold: 10_000,
            info: "capabilities".to_string(),
            info_trusted: "all".to_string(),
            trusted: Vec::new(),
            access: Vec::new(),
            window_extraction: false,
            window_extraction_trusted: true,
            lockfile: String::new(),
            poll_timeout_ms: 100,
            stats_interval: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginConfig {
    pub name: String,
    pub cmd: String,
    pub timeout: Option<u64>,
    pub start_retry: Option<u64>,
    pub shutdown_wait: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    pub input: String,
    #[serde(default)]
    pub location: String,
    pub channel: String,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StationConfig {
    pub id: String,
    pub name: Option<String>,
    pub network: Option<String>,
    #[serde(default)]
    pub description: String,
    pub buffers: Option<usize>,
    pub blanks: Option<usize>,
    pub segments: Option<usize>,
    pub segsize: Option<usize>,
    pub backfill_buffer: Option<f64>,
    pub stream_check: Option<bool>,
    pub gap_check_pattern: Option<String>,
    pub gap_treshold: Option<i64>,
    pub request_log: Option<bool>,
    pub proc_gap_warn: Option<u64>,
    pub access: Option<Vec<String>>,
    #[serde(default)]
    pub channel: Vec<ChannelConfig>,
}

///
/// A station with every setting filled in.
///
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStation {
    pub id: String,
    pub name: String,
    pub network: String,
    pub description: String,
    pub buffers: usize,
    pub blanks: usize,
    pub segments: usize,
    pub segsize: usize,
    pub backfill_buffer: f64,
    pub stream_check: bool,
    pub gap_check_pattern: String,
    pub gap_treshold: i64,
    pub request_log: bool,
    pub proc_gap_warn: u64,
    pub access: Vec<String>,
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub plugin: Vec<PluginConfig>,
    pub station: Vec<StationConfig>,
}

fn check_range<T: PartialOrd + ToString>(key: &str, value: T, min: T, max: T) -> ConfigResult<()> {
    if value < min || value > max {
        return Err(ConfigError::Range(key.to_string(), value.to_string()));
    }
    Ok(())
}

fn info_level(key: &str, value: &str) -> ConfigResult<Option<InfoLevel>> {
    if value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|e| ConfigError::Invalid(key.to_string(), e))
}

fn acl(key: &str, items: &[String]) -> ConfigResult<IpAcl> {
    IpAcl::parse(items).map_err(|e| ConfigError::Invalid(key.to_string(), e.to_string()))
}

// Create `dir` if needed and make sure files can be made there.
fn probe_directory(dir: &Path) -> ConfigResult<()> {
    let fail = |e| ConfigError::Directory(dir.to_path_buf(), e);
    fs::create_dir_all(dir).map_err(fail)?;
    let probe = dir.join(".probe");
    File::create(&probe).map_err(fail)?;
    fs::remove_file(&probe).map_err(fail)?;
    Ok(())
}

impl Config {
    pub fn load(path: &Path) -> ConfigResult<Config> {
        let text =
            fs::read_to_string(path).map_err(|e| ConfigError::CannotRead(path.to_path_buf(), e))?;
        Config::parse(&text)
    }

    pub fn parse(text: &str) -> ConfigResult<Config> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn resolve(&self, st: &StationConfig) -> ResolvedStation {
        let s = &self.server;
        ResolvedStation {
            id: st.id.clone(),
            name: st.name.clone().unwrap_or_else(|| st.id.clone()),
            network: st.network.clone().unwrap_or_else(|| s.network.clone()),
            description: st.description.clone(),
            buffers: st.buffers.unwrap_or(s.buffers),
            blanks: st.blanks.unwrap_or(s.blanks),
            segments: st.segments.unwrap_or(s.segments),
            segsize: st.segsize.unwrap_or(s.segsize),
            backfill_buffer: st.backfill_buffer.unwrap_or(s.backfill_buffer),
            stream_check: st.stream_check.unwrap_or(s.stream_check),
            gap_check_pattern: st
                .gap_check_pattern
                .clone()
                .unwrap_or_else(|| s.gap_check_pattern.clone()),
            gap_treshold: st.gap_treshold.unwrap_or(s.gap_treshold),
            request_log: st.request_log.unwrap_or(s.request_log),
            proc_gap_warn: st.proc_gap_warn.unwrap_or(s.proc_gap_warn),
            access: st.access.clone().unwrap_or_else(|| s.access.clone()),
            channels: st.channel.clone(),
        }
    }

    pub fn stations(&self) -> Vec<ResolvedStation> {
        self.station.iter().map(|st| self.resolve(st)).collect()
    }

    fn validate_station(st: &ResolvedStation) -> ConfigResult<()> {
        let key = |k: &str| format!("station {} {}", st.id, k);
        if st.id.is_empty() || st.id.contains('/') || st.id.starts_with('.') {
            return Err(ConfigError::Invalid("station id".to_string(), format!("'{}'", st.id)));
        }
        if st.name.is_empty() || st.name.len() > 5 {
            return Err(ConfigError::Invalid(key("name"), st.name.clone()));
        }
        if st.network.len() > 2 {
            return Err(ConfigError::Invalid(key("network"), st.network.clone()));
        }
        check_range(&key("buffers"), st.buffers, 10, 100_000)?;
        check_range(&key("blanks"), st.blanks, 0, 100)?;
        check_range(&key("segments"), st.segments, 2, 1000)?;
        check_range(&key("segsize"), st.segsize, 10, 100_000)?;
        check_range(&key("backfill_buffer"), st.backfill_buffer, 0.0, 86400.0)?;
        if st.gap_treshold < 100 {
            return Err(ConfigError::Range(key("gap_treshold"), st.gap_treshold.to_string()));
        }
        if !st.gap_check_pattern.is_empty() {
            RegexBuilder::new(&st.gap_check_pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| ConfigError::Invalid(key("gap_check_pattern"), e.to_string()))?;
        }
        acl(&key("access"), &st.access)?;
        let mut inputs = BTreeSet::new();
        for c in st.channels.iter() {
            if !inputs.insert(c.input.as_str()) {
                return Err(ConfigError::Duplicate("channel input", format!("{}:{}", st.id, c.input)));
            }
            if c.location.len() > 2 || c.channel.is_empty() || c.channel.len() > 3 {
                return Err(ConfigError::Invalid(
                    key("channel"),
                    format!("{}.{}", c.location, c.channel),
                ));
            }
            if !(c.rate > 0.0) {
                return Err(ConfigError::Range(key("channel rate"), c.rate.to_string()));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let s = &self.server;
        if !s.record_length.is_power_of_two() {
            return Err(ConfigError::Range("record_length".to_string(), s.record_length.to_string()));
        }
        check_range("record_length", s.record_length, 128, 4096)?;
        check_range("seq_gap_limit", s.seq_gap_limit, 0, 1 << 24)?;
        check_range("poll_timeout_ms", s.poll_timeout_ms, 1, 1000)?;
        if s.network.len() > 2 {
            return Err(ConfigError::Invalid("network".to_string(), s.network.clone()));
        }
        info_level("info", &s.info)?;
        info_level("info_trusted", &s.info_trusted)?;
        acl("trusted", &s.trusted)?;

        let mut names = BTreeSet::new();
        for p in self.plugin.iter() {
            if p.name.is_empty() || p.cmd.is_empty() {
                return Err(ConfigError::Invalid("plugin".to_string(), p.name.clone()));
            }
            if !names.insert(p.name.as_str()) {
                return Err(ConfigError::Duplicate("plugin", p.name.clone()));
            }
        }

        let mut ids = BTreeSet::new();
        let mut codes = BTreeSet::new();
        for st in self.stations() {
            Config::validate_station(&st)?;
            if !ids.insert(st.id.clone()) {
                return Err(ConfigError::Duplicate("station", st.id));
            }
            if !codes.insert((st.network.clone(), st.name.clone())) {
                return Err(ConfigError::Duplicate("station", format!("{}.{}", st.network, st.name)));
            }
        }
        Ok(())
    }

    pub fn lockfile(&self) -> Option<PathBuf> {
        if self.server.lockfile.is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.server.lockfile))
        }
    }

    pub fn server_settings(&self) -> ServerSettings {
        let s = &self.server;
        ServerSettings {
            port: s.port,
            connections: s.connections,
            connections_per_ip: s.connections_per_ip,
            poll_timeout_ms: s.poll_timeout_ms,
            stats_interval: s.stats_interval,
            info: info_level("info", &s.info).unwrap_or(None),
            info_trusted: info_level("info_trusted", &s.info_trusted).unwrap_or(None),
            window_extraction: s.window_extraction,
            window_extraction_trusted: s.window_extraction_trusted,
        }
    }

    pub fn plugin_params(&self) -> Vec<PluginParams> {
        let s = &self.server;
        self.plugin
            .iter()
            .map(|p| PluginParams {
                name: p.name.clone(),
                cmd: p.cmd.clone(),
                timeout: p.timeout.unwrap_or(s.plugin_timeout),
                start_retry: p.start_retry.unwrap_or(s.plugin_start_retry),
                shutdown_wait: p.shutdown_wait.unwrap_or(s.plugin_shutdown_wait),
            })
            .collect()
    }
    ///
    /// Server identity and advertised capabilities.  Capabilities
    /// only trusted hosts may use are restricted: they are listed to
    /// trusted hosts alone.
    ///
    pub fn master_monitor(&self) -> ConfigResult<MasterMonitor> {
        let s = &self.server;
        let mut master = MasterMonitor::new(
            s.record_length,
            SOFTWARE_ID,
            &s.organization,
            acl("trusted", &s.trusted)?,
        );
        master.add_capability("dialup", false);
        master.add_capability("multistation", false);
        if s.window_extraction || s.window_extraction_trusted {
            master.add_capability("window-extraction", !s.window_extraction);
        }
        let untrusted = info_level("info", &s.info)?;
        let trusted = info_level("info_trusted", &s.info_trusted)?;
        for level in InfoLevel::ALL_LEVELS.iter() {
            let open = untrusted.map_or(false, |l| *level <= l);
            let restricted = trusted.map_or(false, |l| *level <= l);
            if open || restricted {
                master.add_capability(&format!("info:{}", level), !open);
            }
        }
        Ok(master)
    }
    ///
    /// Set up every station: directories are created and probed,
    /// and each station is registered for the clients and given its
    /// acquisition side.
    ///
    pub fn build_stations(&self) -> ConfigResult<(StationRegistry, Vec<Station>)> {
        let s = &self.server;
        let mut registry = StationRegistry::new();
        let mut stations = Vec::new();
        for st in self.stations() {
            let directory = station_directory(&s.filebase, &st.id);
            probe_directory(&directory)?;
            probe_directory(&directory.join(SEGMENT_DIR))?;

            let mut monitor =
                StationMonitor::new(&st.name, &st.network, &st.description, acl("access", &st.access)?);
            monitor
                .configure_stream_check(st.stream_check, &st.gap_check_pattern, st.gap_treshold)
                .map_err(|e| ConfigError::Invalid(format!("station {}", st.id), e.to_string()))?;
            let params = StationParams {
                key: st.id.clone(),
                directory,
                record_length: s.record_length,
                buffers: st.buffers,
                blanks: st.blanks,
                segments: st.segments,
                segsize: st.segsize,
                seq_gap_limit: s.seq_gap_limit,
                load_headers: st.stream_check,
                request_log: st.request_log,
            };
            let shared = registry
                .register(StationIO::new(&params, monitor))
                .ok_or_else(|| ConfigError::Duplicate("station", format!("{}.{}", st.network, st.name)))?;
            let ingest = IngestParams {
                network: st.network.clone(),
                name: st.name.clone(),
                record_length: s.record_length,
                backfill_capacity: st.backfill_buffer,
                proc_gap_warn: st.proc_gap_warn as i64 * 1000,
                channels: st
                    .channels
                    .iter()
                    .map(|c| ChannelParams {
                        input: c.input.clone(),
                        location: c.location.clone(),
                        channel: c.channel.clone(),
                        rate: c.rate,
                    })
                    .collect(),
            };
            stations.push(Station::new(shared, ingest));
        }
        Ok((registry, stations))
    }
}
