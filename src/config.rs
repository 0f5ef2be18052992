
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use parking_lot::RwLock;

use crate::addr::MulticastAddress;
use crate::group::{FilterMode, GroupFilterState};
use crate::handler::ReportStyle;
use crate::report::DEFAULT_MAX_REPORT_SIZE;

#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: Arc<PathBuf>,
    config: Arc<RwLock<Option<Config>>>,
    broadcast: tokio::sync::broadcast::Sender<()>,
}

impl ConfigManager {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            config_path: Arc::new(path.as_ref().to_path_buf()),
            config: Arc::new(RwLock::new(None)),
            broadcast: tokio::sync::broadcast::channel(1).0,
        }
    }

    pub fn path(&self) -> &Path {
        self.config_path.as_ref()
    }

    /// Reads the file again. Subscribers are notified only when the
    /// contents changed; an invalid file leaves the previous config in place.
    pub async fn load(&self) -> Result<bool, std::io::Error> {
        tokio::task::block_in_place(|| self.load_blocking())
    }

    pub fn load_blocking(&self) -> Result<bool, std::io::Error> {
        let config = Some(Config::from_file(self.config_path.as_ref())?);
        let orig = std::mem::replace(&mut *self.config.write(), config.clone());
        let changed = orig != config;
        if changed {
            let _ = self.broadcast.send(());
        }
        Ok(changed)
    }

    pub fn get(&self) -> Option<Config> {
        self.config.read().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.config.read().is_some()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.broadcast.subscribe()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    pub global: GlobalConfig,

    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(file)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, std::io::Error> {
        let config: Config = toml::from_str(content).map_err(std::io::Error::other)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), std::io::Error> {
        if self.global.robustness == 0 {
            return Err(std::io::Error::other("robustness must be at least 1"));
        }
        // header plus one source-less record
        if self.global.max_report_size < 16 {
            return Err(std::io::Error::other("max_report_size too small for any report"));
        }
        self.filters().map(|_| ())
    }

    /// Desired filter per group. Later entries for the same group win.
    pub fn filters(&self) -> Result<BTreeMap<MulticastAddress, GroupFilterState>, std::io::Error> {
        let mut filters = BTreeMap::new();
        for group in &self.groups {
            let addr = MulticastAddress::new(group.group).map_err(std::io::Error::other)?;
            if addr.is_reserved() {
                return Err(std::io::Error::other(format!("{} is reserved and cannot be configured", addr)));
            }
            let state = GroupFilterState::new(group.mode.into(), group.sources.iter().copied().collect());
            filters.insert(addr, state);
        }
        Ok(filters)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GlobalConfig {
    /// interface the daemon runs IGMP on
    pub interface: String,

    /// number of times each unsolicited report is sent
    #[serde(default = "default_robustness")]
    pub robustness: u8,

    #[serde(default = "default_unsolicited_report_interval_ms")]
    pub unsolicited_report_interval_ms: u64,

    /// IGMP payload bytes per report
    #[serde(default = "default_max_report_size")]
    pub max_report_size: usize,

    #[serde(default)]
    pub report_style: ReportStyle,
}

fn default_robustness() -> u8 {
    2
}

fn default_unsolicited_report_interval_ms() -> u64 {
    1000
}

fn default_max_report_size() -> usize {
    DEFAULT_MAX_REPORT_SIZE
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FilterModeConfig {
    Include,

    /// receive from all sources except those listed
    #[default]
    Exclude,
}

impl From<FilterModeConfig> for FilterMode {
    fn from(value: FilterModeConfig) -> Self {
        match value {
            FilterModeConfig::Include => FilterMode::Include,
            FilterModeConfig::Exclude => FilterMode::Exclude,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GroupConfig {
    pub group: Ipv4Addr,

    #[serde(default)]
    pub mode: FilterModeConfig,

    #[serde(default)]
    pub sources: Vec<Ipv4Addr>,
}
