use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;
use crate::scheduler::SchedulerConfig;
use crate::view::{SortKey, SortOrder};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub peercast: PeercastConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub update: UpdateConfig,
    #[serde(default)]
    pub view: ViewConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeercastConfig {
    /// Port of the local PeerCast instance (playlist/stream URLs).
    #[serde(default = "default_peercast_port")]
    pub port: u16,
    /// PeerCast executable to start with epcyp.  Empty disables it.
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_true")]
    pub exit_on_quit: bool,
    /// Run `path` through `mono` (PeerCastStation on macOS/Linux).
    #[serde(default)]
    pub use_mono: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default)]
    pub path: String,
    /// Argument template; `$x` is replaced by the stream URL.
    #[serde(default = "default_player_args")]
    pub args: String,
    /// BBS browser executable used to open contact URLs.
    #[serde(default)]
    pub bbs: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    #[serde(default)]
    pub auto_update: bool,
    /// Minimum seconds between two fetches, manual or automatic.
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,
    /// Seconds between automatic fetches.
    #[serde(default = "default_countdown_ticks")]
    pub countdown_ticks: u32,
    /// Per-source network timeout.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewConfig {
    #[serde(default = "default_sort_key")]
    pub sort_key: SortKey,
    #[serde(default)]
    pub sort_order: SortOrder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// External notifier.  With an empty `command` notifications only go to the
/// log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_notify_command")]
    pub command: String,
}

/// Where the settings store keeps favorites and the YP list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_favorites_file")]
    pub favorites_file: PathBuf,
    #[serde(default = "default_yp_file")]
    pub yp_file: PathBuf,
}

impl Default for PeercastConfig {
    fn default() -> Self {
        Self {
            port: default_peercast_port(),
            path: String::new(),
            exit_on_quit: true,
            use_mono: false,
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            args: default_player_args(),
            bbs: String::new(),
        }
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            auto_update: false,
            min_interval_secs: default_min_interval_secs(),
            countdown_ticks: default_countdown_ticks(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            sort_key: default_sort_key(),
            sort_order: SortOrder::Desc,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            command: default_notify_command(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            favorites_file: default_favorites_file(),
            yp_file: default_yp_file(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_peercast_port() -> u16 {
    7144
}

fn default_player_args() -> String {
    "\"$x\"".to_string()
}

fn default_min_interval_secs() -> u64 {
    SchedulerConfig::default().min_interval_secs
}

fn default_countdown_ticks() -> u32 {
    SchedulerConfig::default().countdown_ticks
}

fn default_fetch_timeout_secs() -> u64 {
    5
}

fn default_sort_key() -> SortKey {
    SortKey::Listeners
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7145
}

fn default_notify_command() -> String {
    if cfg!(target_os = "linux") {
        "notify-send".to_string()
    } else {
        String::new()
    }
}

fn default_favorites_file() -> PathBuf {
    platform::config_dir().join("favorites.json")
}

fn default_yp_file() -> PathBuf {
    platform::config_dir().join("yp_list.json")
}

impl UpdateConfig {
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            min_interval_secs: self.min_interval_secs,
            countdown_ticks: self.countdown_ticks,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load `path`, writing defaults there first if it does not exist.
    pub fn load_from(config_path: &std::path::Path) -> anyhow::Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, config_path: &std::path::Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
