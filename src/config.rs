use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value '{value}' for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Settings read from the environment (and `.env`) at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub database_url: String,
    pub data_dir: PathBuf,
    // No ballot means no election is running
    pub ballot: Option<String>,
    // Overrides the default third-of-members threshold
    pub quorum: Option<usize>,
    pub session_idle: Duration,
    pub rich_text: bool,
}

fn parse_number(name: &'static str, value: String) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
        value,
    })
}

fn parse_bool(name: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value,
            reason: "expected true or false".to_string(),
        }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let discord_token = lookup("DISCORD_TOKEN")
            .filter(|token| !token.trim().is_empty())
            .ok_or(ConfigError::Missing("DISCORD_TOKEN"))?;

        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| "sqlite:memberbot.db".to_string());
        let data_dir = PathBuf::from(lookup("DATA_DIR").unwrap_or_else(|| "data".to_string()));

        let ballot = lookup("BALLOT")
            .map(|ballot| ballot.trim().to_string())
            .filter(|ballot| !ballot.is_empty());

        let quorum = lookup("QUORUM")
            .map(|value| parse_number("QUORUM", value).map(|n| n as usize))
            .transpose()?;

        let idle_minutes = lookup("SESSION_IDLE_MINUTES")
            .map(|value| parse_number("SESSION_IDLE_MINUTES", value))
            .transpose()?
            .unwrap_or(60);

        let rich_text = lookup("RICH_TEXT")
            .map(|value| parse_bool("RICH_TEXT", value))
            .transpose()?
            .unwrap_or(true);

        Ok(Self {
            discord_token,
            database_url,
            data_dir,
            ballot,
            quorum,
            session_idle: Duration::from_secs(idle_minutes * 60),
            rich_text,
        })
    }
}
