use std::{fmt::Display, str::FromStr, time::Duration};

use anyhow::{Context, bail};

use crate::rooms::{broadcast::BroadcastSettings, msg::MessageLimits};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryBackend {
    None,
    Memory { capacity: usize },
    Sqlite { url: String },
}

impl HistoryBackend {
    pub fn name(&self) -> &'static str {
        use HistoryBackend::*;
        match self {
            None => "none",
            Memory { .. } => "memory",
            Sqlite { .. } => "sqlite",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub default_room: String,
    pub history: HistoryBackend,
    pub limits: MessageLimits,
    pub outbox_capacity: usize,
    pub max_dropped: u32,
    pub room_queue_capacity: usize,
    pub backfill_limit: usize,
    pub store_timeout: Duration,
    pub room_sweep: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let settings = BroadcastSettings::default();
        Self {
            bind_addr: "0.0.0.0:8080".to_owned(),
            default_room: "chatroom".to_owned(),
            history: HistoryBackend::None,
            limits: settings.limits,
            outbox_capacity: settings.outbox_capacity,
            max_dropped: settings.max_dropped,
            room_queue_capacity: settings.room_queue_capacity,
            backfill_limit: settings.backfill_limit,
            store_timeout: settings.store_timeout,
            room_sweep: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Reads the process environment (and `.env`, if main loaded it).
    pub fn from_env() -> anyhow::Result<Config> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
        let defaults = Config::default();

        let database_url = lookup("DATABASE_URL");
        let implied = if database_url.is_some() { "sqlite" } else { "none" };
        let backend = lookup("HISTORY_BACKEND").unwrap_or_else(|| implied.to_owned());
        let history = match backend.as_str() {
            "none" => HistoryBackend::None,
            "memory" => HistoryBackend::Memory {
                capacity: parse_or(&lookup, "HISTORY_MEMORY_CAPACITY", 500)?,
            },
            "sqlite" => HistoryBackend::Sqlite {
                url: database_url.context("HISTORY_BACKEND=sqlite needs DATABASE_URL")?,
            },
            other => bail!("HISTORY_BACKEND: unknown backend {other:?}"),
        };

        let limits = MessageLimits {
            max_nickname_chars: parse_or(&lookup, "MAX_NICKNAME_CHARS", defaults.limits.max_nickname_chars)?,
            max_text_bytes: parse_or(&lookup, "MAX_TEXT_BYTES", defaults.limits.max_text_bytes)?,
            max_image_bytes: parse_or(&lookup, "MAX_IMAGE_BYTES", defaults.limits.max_image_bytes)?,
        };

        Ok(Config {
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            default_room: lookup("DEFAULT_ROOM").unwrap_or(defaults.default_room),
            history,
            limits,
            outbox_capacity: parse_or(&lookup, "OUTBOX_CAPACITY", defaults.outbox_capacity)?,
            max_dropped: parse_or(&lookup, "MAX_DROPPED", defaults.max_dropped)?,
            room_queue_capacity: parse_or(&lookup, "ROOM_QUEUE_CAPACITY", defaults.room_queue_capacity)?,
            backfill_limit: parse_or(&lookup, "BACKFILL_LIMIT", defaults.backfill_limit)?,
            store_timeout: Duration::from_millis(parse_or(
                &lookup,
                "STORE_TIMEOUT_MS",
                defaults.store_timeout.as_millis() as u64,
            )?),
            room_sweep: Duration::from_secs(parse_or(&lookup, "ROOM_SWEEP_SECS", defaults.room_sweep.as_secs())?),
        })
    }

    pub fn broadcast_settings(&self) -> BroadcastSettings {
        BroadcastSettings {
            limits: self.limits.clone(),
            outbox_capacity: self.outbox_capacity,
            max_dropped: self.max_dropped,
            room_queue_capacity: self.room_queue_capacity,
            backfill_limit: self.backfill_limit,
            store_timeout: self.store_timeout,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key}: cannot parse {raw:?}: {e}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config(&[]).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.default_room, "chatroom");
        assert_eq!(config.history, HistoryBackend::None);
        assert_eq!(config.limits.max_image_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn database_url_implies_sqlite() {
        let config = config(&[("DATABASE_URL", "sqlite://chat.db")]).unwrap();
        assert_eq!(config.history, HistoryBackend::Sqlite { url: "sqlite://chat.db".into() });
    }

    #[test]
    fn memory_backend_reads_capacity() {
        let config = config(&[("HISTORY_BACKEND", "memory"), ("HISTORY_MEMORY_CAPACITY", "12")]).unwrap();
        assert_eq!(config.history, HistoryBackend::Memory { capacity: 12 });
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = config(&[("OUTBOX_CAPACITY", "lots")]).unwrap_err();
        assert!(err.to_string().contains("OUTBOX_CAPACITY"));

        assert!(config(&[("HISTORY_BACKEND", "redis")]).is_err());
        assert!(config(&[("HISTORY_BACKEND", "sqlite")]).is_err());
    }

    #[test]
    fn settings_follow_config() {
        let config = config(&[("MAX_DROPPED", "3"), ("STORE_TIMEOUT_MS", "250")]).unwrap();
        let settings = config.broadcast_settings();
        assert_eq!(settings.max_dropped, 3);
        assert_eq!(settings.store_timeout, Duration::from_millis(250));
    }
}
