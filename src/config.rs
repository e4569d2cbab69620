use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub players: PlayersConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub https: Option<HttpsConfig>,
    /// Base used to absolutize live-state media URLs when a request has no Host header.
    pub public_url: Option<String>,
    pub media_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpsConfig {
    pub enabled: bool,
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub timezone: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: "Asia/Kolkata".to_string(),
        }
    }
}

impl ScheduleConfig {
    pub fn tz(&self) -> Result<chrono_tz::Tz> {
        self.timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid schedule timezone '{}': {}", self.timezone, e))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayersConfig {
    /// Zero disables the stale-connection reaper.
    pub heartbeat_timeout_secs: u64,
    pub reaper_interval_secs: u64,
    pub default_entry_duration_secs: u32,
}

impl Default for PlayersConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 180,
            reaper_interval_secs: 30,
            default_entry_duration_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
        let config: Config = toml::from_str(&content)?;
        config.schedule.tz()?;
        Ok(config)
    }

    pub fn media_dir(&self) -> &str {
        self.server.media_dir.as_deref().unwrap_or("uploads")
    }

    pub fn default_template() -> &'static str {
        r#"[server]
host = "0.0.0.0"
port = 4000
# Optional: base URL used to absolutize player media URLs in live previews.
# public_url = "https://signage.example.com/"
# Optional: directory served under /uploads (defaults to "./uploads").
# media_dir = "./uploads"

[server.https]
enabled = false
cert_path = "certs/cert.pem"
key_path = "certs/key.pem"

[database]
# URL for the SQLite database. Ensure the directory exists.
url = "sqlite://marquee.db"

[schedule]
# Every schedule is evaluated in this IANA time zone, regardless of the host zone.
timezone = "Asia/Kolkata"

[players]
# Connections silent for longer than this are closed. 0 waits forever.
heartbeat_timeout_secs = 180
reaper_interval_secs = 30
# Seconds a playlist entry plays when it does not carry its own duration.
default_entry_duration_secs = 5

[logging]
level = "info"
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template_parses() {
        let config: Config = toml::from_str(Config::default_template()).unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.schedule.tz().unwrap(), chrono_tz::Asia::Kolkata);
        assert_eq!(config.players.heartbeat_timeout_secs, 180);
        assert_eq!(config.media_dir(), "uploads");
    }

    #[test]
    fn test_optional_sections_fall_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
[server]
host = "127.0.0.1"
port = 8080

[database]
url = "sqlite://test.db"

[logging]
level = "debug"
"#,
        )
        .unwrap();
        assert_eq!(config.schedule.timezone, "Asia/Kolkata");
        assert_eq!(config.players.default_entry_duration_secs, 5);
    }

    #[test]
    fn test_unknown_timezone_is_rejected() {
        let schedule = ScheduleConfig {
            timezone: "Mars/Olympus_Mons".to_string(),
        };
        assert!(schedule.tz().is_err());
    }
}
