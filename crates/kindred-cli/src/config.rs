//! TOML-based CLI configuration.
//!
//! Stored at `~/.config/kindred/config.toml`:
//! - `[engine]` -- cooling window and countdown cadence handed to the
//!   progression engine
//! - `[store]` -- optional data-directory override for the SQLite database

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use kindred_core::EngineConfig;

/// Engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_cooling_hours")]
    pub cooling_hours: u64,
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

/// Storage location settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSection {
    /// Override for the default `~/.config/kindred` data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// Application configuration, serialized to/from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub store: StoreSection,
}

fn default_cooling_hours() -> u64 {
    24
}
fn default_tick_secs() -> u64 {
    1
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            cooling_hours: default_cooling_hours(),
            tick_secs: default_tick_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineSection::default(),
            store: StoreSection::default(),
        }
    }
}

/// `~/.config/kindred`, created on first use.
pub fn data_dir() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let dir = dirs::config_dir()
        .ok_or("could not determine config directory")?
        .join("kindred");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

impl Config {
    fn path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk or write and return the default.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = Self::path()?;
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let cfg: Config = toml::from_str(&content)?;
                Ok(cfg)
            }
            Err(_) => {
                let cfg = Self::default();
                cfg.save()?;
                Ok(cfg)
            }
        }
    }

    /// Persist to disk.
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(Self::path()?, content)?;
        Ok(())
    }

    /// Where the SQLite database lives.
    pub fn db_path(&self) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let dir = match &self.store.data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                dir.clone()
            }
            None => data_dir()?,
        };
        Ok(dir.join("kindred.db"))
    }

    /// Engine configuration derived from this file.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            cooling_window: chrono::Duration::hours(self.engine.cooling_hours as i64),
            tick_interval: std::time::Duration::from_secs(self.engine.tick_secs.max(1)),
        }
    }

    /// Get a config value as a string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        match current {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by dot-separated key and persist. Unknown keys
    /// are rejected rather than silently inserted.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), Box<dyn std::error::Error>> {
        let mut json = serde_json::to_value(&*self)?;
        let mut parts = key.split('.').peekable();
        let mut current = &mut json;
        while let Some(part) = parts.next() {
            let obj = current
                .as_object_mut()
                .ok_or_else(|| format!("unknown config key: {key}"))?;
            let existing = obj
                .get_mut(part)
                .ok_or_else(|| format!("unknown config key: {key}"))?;
            if parts.peek().is_none() {
                *existing = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(value.parse()?),
                    serde_json::Value::Number(_) => {
                        serde_json::Value::Number(value.parse::<u64>()?.into())
                    }
                    serde_json::Value::Null | serde_json::Value::String(_) => {
                        serde_json::Value::String(value.to_string())
                    }
                    _ => return Err(format!("config key '{key}' is not a scalar").into()),
                };
                break;
            }
            current = existing;
        }
        *self = serde_json::from_value(json)?;
        self.save()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_roundtrips_through_toml() {
        let cfg = Config::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.engine.cooling_hours, 24);
        assert_eq!(parsed.engine.tick_secs, 1);
        assert!(parsed.store.data_dir.is_none());
    }

    #[test]
    fn engine_config_maps_units() {
        let mut cfg = Config::default();
        cfg.engine.cooling_hours = 1;
        cfg.engine.tick_secs = 0; // clamped to 1
        let engine = cfg.engine_config();
        assert_eq!(engine.cooling_window, chrono::Duration::hours(1));
        assert_eq!(engine.tick_interval, std::time::Duration::from_secs(1));
    }

    #[test]
    fn get_supports_dot_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("engine.cooling_hours").as_deref(), Some("24"));
        assert!(cfg.get("engine.missing").is_none());
    }
}
