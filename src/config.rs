use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::UserRoom;
use crate::error::ChatError;
use crate::session::RevealPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "config/hubchat.json";

const USER_ENV: &str = "HUBCHAT_USER";
const ROOM_ENV: &str = "HUBCHAT_ROOM";
/// A relay on an ephemeral port records a new address on every start.
const MAX_BOOTSTRAP_NODES: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Multiaddrs dialed at startup, e.g. a relay node on another machine.
    pub bootstrap_nodes: Vec<String>,
    pub listen_addr: String,
    /// Rooms map to the gossipsub topic `{topic_prefix}/{room}`.
    pub topic_prefix: String,
    /// Discover peers on the local network.
    pub mdns: bool,
    /// Countdown tick period.
    pub tick_millis: u64,
    pub reveal_policy: RevealPolicy,
    pub user: Option<String>,
    pub room: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bootstrap_nodes: Vec::new(),
            listen_addr: "/ip4/0.0.0.0/tcp/0".to_string(),
            topic_prefix: "hubchat".to_string(),
            mdns: true,
            tick_millis: 1000,
            reveal_policy: RevealPolicy::default(),
            user: None,
            room: None,
        }
    }
}

impl AppConfig {
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(user) = lookup(USER_ENV).filter(|v| !v.trim().is_empty()) {
            self.user = Some(user);
        }
        if let Some(room) = lookup(ROOM_ENV).filter(|v| !v.trim().is_empty()) {
            self.room = Some(room);
        }
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_millis.max(1))
    }

    /// Resolves the session identity, command line first, then config.
    pub fn user_room(
        &self,
        cli_user: Option<String>,
        cli_room: Option<String>,
    ) -> Result<UserRoom, ChatError> {
        let user = pick(cli_user, self.user.clone())
            .ok_or_else(|| ChatError::Config(format!("no user given (--user or {USER_ENV})")))?;
        let room = pick(cli_room, self.room.clone())
            .ok_or_else(|| ChatError::Config(format!("no room given (--room or {ROOM_ENV})")))?;
        Ok(UserRoom { user, room })
    }
}

fn pick(first: Option<String>, second: Option<String>) -> Option<String> {
    first
        .into_iter()
        .chain(second)
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}

pub fn save_config(path: &str, config: &AppConfig) -> Result<(), ChatError> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)?;
    Ok(())
}

/// Makes the relay address `entry` the first bootstrap node in the config at
/// `path`, keeping the newest [`MAX_BOOTSTRAP_NODES`]. Returns whether the
/// file was rewritten.
pub fn persist_bootstrap_node(path: &str, entry: &str) -> bool {
    let mut config = load_config(path);
    if config.bootstrap_nodes.first().map(String::as_str) == Some(entry) {
        log::debug!("Relay address {entry} already first in {path}");
        return false;
    }

    config.bootstrap_nodes.retain(|node| node != entry);
    config.bootstrap_nodes.insert(0, entry.to_string());
    config.bootstrap_nodes.truncate(MAX_BOOTSTRAP_NODES);

    match save_config(path, &config) {
        Ok(()) => {
            log::info!("Relay address {entry} written to {path}");
            true
        }
        Err(err) => {
            log::error!("Failed to record relay address in {path}: {err}");
            false
        }
    }
}
