//! Server configuration: the title catalog, protocol timings and the seed
//! data for the in-memory identity store.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// One configured title family.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TitleConfig {
    /// Client-side title/version string (`VERS`).
    pub vers: String,
    /// Version string used by the dedicated hosts of this family, if any.
    #[serde(default)]
    pub dedicated_vers: Option<String>,
    /// One of the clients hosts the game.
    #[serde(default)]
    pub p2p: bool,
    /// Players may join a game after it started.
    #[serde(default = "default_true")]
    pub midgame_join: bool,
    /// Parameter updates from the host replace the game (map rotation).
    #[serde(default)]
    pub map_rotation: bool,
    /// Personas are put in the title's room on selection.
    #[serde(default)]
    pub auto_room: bool,
}

impl TitleConfig {
    /// True for the client version and for the dedicated-host version.
    pub fn matches(&self, vers: &str) -> bool {
        self.vers == vers || self.dedicated_vers.as_deref() == Some(vers)
    }

    /// Every version string of this family.
    pub fn family(&self) -> Vec<String> {
        let mut vers = vec![self.vers.clone()];
        if let Some(dedicated) = &self.dedicated_vers {
            vers.push(dedicated.clone());
        }
        vers
    }
}

fn default_true() -> bool {
    true
}

/// Fixed delays and intervals. All values are in milliseconds on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Pause between matchmaking passes of a `gsea` task.
    pub search_interval_ms: u64,
    /// Wait before a rotated game is announced.
    pub rotation_delay_ms: u64,
    /// Wait between a game update and the `+ses` that follows it.
    pub settle_delay_ms: u64,
    /// Age after which an unhosted dedicated-host game nobody plays in is
    /// ended by the sweep.
    pub idle_game_grace_ms: u64,
    /// Attempts to find a spawned game before `gpsc` gives up.
    pub provisioning_retries: u32,
    pub provisioning_interval_ms: u64,
    pub sweep_interval_ms: u64,
    /// Period of the server's `~png` keepalive.
    pub keepalive_interval_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            search_interval_ms: 15_000,
            rotation_delay_ms: 2_000,
            settle_delay_ms: 100,
            idle_game_grace_ms: 90_000,
            provisioning_retries: 5,
            provisioning_interval_ms: 500,
            sweep_interval_ms: 30_000,
            keepalive_interval_ms: 20_000,
        }
    }
}

impl Timings {
    pub fn search_interval(&self) -> Duration {
        Duration::from_millis(self.search_interval_ms)
    }

    pub fn rotation_delay(&self) -> Duration {
        Duration::from_millis(self.rotation_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn idle_game_grace(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.idle_game_grace_ms as i64)
    }

    pub fn provisioning_interval(&self) -> Duration {
        Duration::from_millis(self.provisioning_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

/// Seed account for the in-memory identity store.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountSeed {
    pub name: String,
    /// Plain text; compared as-is by `auth`.
    pub pass: String,
    #[serde(default = "default_loc")]
    pub loc: String,
    #[serde(default)]
    pub mail: Option<String>,
    #[serde(default)]
    pub banned: bool,
    /// Personas created with the account.
    #[serde(default)]
    pub personas: Vec<String>,
}

fn default_loc() -> String {
    "enUS".to_string()
}

/// Root of the JSON configuration file. Every section is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub titles: Vec<TitleConfig>,
    pub timings: Timings,
    pub accounts: Vec<AccountSeed>,
    /// Addresses refused game creation and joins.
    pub blacklist: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            titles: vec![
                TitleConfig {
                    vers: "PSP/NHL07".to_string(),
                    dedicated_vers: None,
                    p2p: true,
                    midgame_join: false,
                    map_rotation: false,
                    auto_room: true,
                },
                TitleConfig {
                    vers: "PSP/MOHGPS071".to_string(),
                    dedicated_vers: Some("PSP/MOHGPS071UHS".to_string()),
                    p2p: false,
                    midgame_join: true,
                    map_rotation: true,
                    auto_room: false,
                },
                TitleConfig {
                    vers: "WII/MOHA08".to_string(),
                    dedicated_vers: None,
                    p2p: false,
                    midgame_join: true,
                    map_rotation: false,
                    auto_room: false,
                },
            ],
            timings: Timings::default(),
            accounts: Vec::new(),
            blacklist: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("title {0} is configured twice")]
    DuplicateTitle(String),
}

impl ServerConfig {
    /// Reads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for title in &self.titles {
            for vers in title.family() {
                if !seen.insert(vers.clone()) {
                    return Err(ConfigError::DuplicateTitle(vers));
                }
            }
        }
        Ok(())
    }

    /// Family containing `vers`.
    pub fn title(&self, vers: &str) -> Option<&TitleConfig> {
        self.titles.iter().find(|t| t.matches(vers))
    }

    /// Versions sharing a family with `vers`; just `vers` when unknown.
    pub fn related_vers(&self, vers: &str) -> Vec<String> {
        self.title(vers)
            .map(TitleConfig::family)
            .unwrap_or_else(|| vec![vers.to_string()])
    }

    /// Unknown titles are treated as dedicated-host titles.
    pub fn is_p2p(&self, vers: &str) -> bool {
        self.title(vers).map(|t| t.p2p).unwrap_or(false)
    }

    pub fn midgame_join_allowed(&self, vers: &str) -> bool {
        self.title(vers).map(|t| t.midgame_join).unwrap_or(true)
    }

    pub fn uses_map_rotation(&self, vers: &str) -> bool {
        self.title(vers).map(|t| t.map_rotation).unwrap_or(false)
    }

    pub fn requires_room(&self, vers: &str) -> bool {
        self.title(vers).map(|t| t.auto_room).unwrap_or(false)
    }
}
