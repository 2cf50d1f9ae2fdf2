use std::path::PathBuf;

use crate::{Error, Result};

/// Logical chunk size clients are expected to use: 8 MiB (spec.md §6).
pub const CHUNK_SIZE_BYTES: u64 = 8192 * 1024;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_secret: Option<String>,
    pub discord_bot_token: String,
    pub discord_channel_id: String,
    pub discord_backup_channel_id: Option<String>,
    pub port: u16,
    pub debug: bool,
    pub database_path: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let api_secret = non_empty(std::env::var("API_SECRET").ok());
        let discord_bot_token = require_env("DISCORD_BOT_TOKEN")?;
        let discord_channel_id = require_env("DISCORD_CHANNEL_ID")?;
        let discord_backup_channel_id = non_empty(std::env::var("DISCORD_BACKUP_CHANNEL_ID").ok());

        let port = match std::env::var("PORT").ok() {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| Error::InvalidConfig {
                message: format!("PORT must be a valid port number, got {raw:?}"),
            })?,
            None => 3000,
        };

        let debug = matches!(
            std::env::var("DEBUG").ok().as_deref(),
            Some("1") | Some("true") | Some("TRUE") | Some("yes")
        );

        let database_path = std::env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./neko.db"));

        let config = Self {
            api_secret,
            discord_bot_token,
            discord_channel_id,
            discord_backup_channel_id,
            port,
            debug,
            database_path,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.discord_bot_token.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "DISCORD_BOT_TOKEN must not be empty".to_string(),
            });
        }
        if self.discord_channel_id.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "DISCORD_CHANNEL_ID must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| Error::InvalidConfig {
        message: format!("missing required environment variable {key}"),
    })
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "API_SECRET",
            "DISCORD_BOT_TOKEN",
            "DISCORD_CHANNEL_ID",
            "DISCORD_BACKUP_CHANNEL_ID",
            "PORT",
            "DEBUG",
            "DATABASE_PATH",
        ] {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn missing_bot_token_is_invalid_config() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe { std::env::set_var("DISCORD_CHANNEL_ID", "123") };
        let err = AppConfig::from_env().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
        clear_env();
    }

    #[test]
    fn defaults_apply_when_optional_vars_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe {
            std::env::set_var("DISCORD_BOT_TOKEN", "tok");
            std::env::set_var("DISCORD_CHANNEL_ID", "123");
        }
        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.port, 3000);
        assert!(!cfg.debug);
        assert!(cfg.api_secret.is_none());
        assert!(cfg.discord_backup_channel_id.is_none());
        clear_env();
    }
}
