//! Load config from file and environment.

use flic2_core::{BdAddr, SessionConfig};
use serde::Deserialize;
use std::path::PathBuf;

/// Daemon configuration. File: ~/.config/flic2/config.toml or /etc/flic2/config.toml.
/// Env overrides: FLIC2_BRIDGE, FLIC2_STORE, FLIC2_LOG, FLIC2_FIRMWARE_URL.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Link bridge, host:port (default 127.0.0.1:5191).
    #[serde(default = "default_bridge")]
    pub bridge: String,
    /// Device records (default ~/.local/share/flic2/buttons.json).
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    /// off, error, warn, info, debug or trace (default info).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_firmware_url")]
    pub firmware_url: String,
    /// Unpaired buttons to pair with at startup.
    #[serde(default)]
    pub pair: Vec<BdAddr>,
    /// Delay before redialing a wanted button after its link dropped (default 5000).
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_bridge() -> String {
    "127.0.0.1:5191".to_string()
}
fn default_store_path() -> PathBuf {
    let base = std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("/var/lib"));
    base.join("flic2/buttons.json")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_firmware_url() -> String {
    "https://api.flic.io/api/v1/buttons/versions/firmware2".to_string()
}
fn default_reconnect_delay_ms() -> u64 {
    5000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bridge: default_bridge(),
            store_path: default_store_path(),
            log_level: default_log_level(),
            firmware_url: default_firmware_url(),
            pair: Vec::new(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            session: SessionConfig::default(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |k| std::env::var(k).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("FLIC2_BRIDGE") {
        c.bridge = s;
    }
    if let Some(s) = var("FLIC2_STORE") {
        c.store_path = PathBuf::from(s);
    }
    if let Some(s) = var("FLIC2_LOG") {
        c.log_level = s;
    }
    if let Some(s) = var("FLIC2_FIRMWARE_URL") {
        c.firmware_url = s;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/flic2/config.toml"));
    }
    out.push(PathBuf::from("/etc/flic2/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                match toml::from_str::<Config>(&s) {
                    Ok(c) => return Some(c),
                    Err(e) => eprintln!("ignoring {}: {e}", p.display()),
                }
            }
            break;
        }
    }
    None
}
