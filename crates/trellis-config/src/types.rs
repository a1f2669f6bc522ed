//! Configuration sections.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener and per-session queue settings.
    pub server: ServerSection,
    /// Field limits and reserved titles.
    pub limits: LimitsSection,
    /// Activity window and retention.
    pub activity: ActivitySection,
    /// Credential acceptance.
    pub auth: AuthSection,
    /// Log level and format.
    pub logging: LoggingSection,
}

/// `[server]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Address the gateway binds.
    pub listen: String,
    /// Outbound frames a session may queue before it is dropped as a
    /// slow consumer.
    pub outbound_queue_depth: usize,
    /// Seconds a fresh connection gets to present its hello frame.
    pub handshake_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7420".to_string(),
            outbound_queue_depth: 64,
            handshake_timeout_secs: 10,
        }
    }
}

/// `[limits]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    /// Maximum title length in characters.
    pub max_title_len: usize,
    /// Maximum description length.
    pub max_desc_len: usize,
    /// Maximum number of tags per task.
    pub max_tags: usize,
    /// Maximum length of one tag.
    pub max_tag_len: usize,
    /// Maximum comment length.
    pub max_comment_len: usize,
    /// Titles no task may take, compared case-insensitively.
    pub reserved_titles: Vec<String>,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_title_len: 200,
            max_desc_len: 1000,
            max_tags: 10,
            max_tag_len: 50,
            max_comment_len: 500,
            reserved_titles: vec![
                "todo".to_string(),
                "in progress".to_string(),
                "done".to_string(),
            ],
        }
    }
}

/// `[activity]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivitySection {
    /// Records kept in the in-memory rolling window.
    pub ring_size: usize,
    /// Default age threshold for the prune command, in days.
    pub retention_days: u32,
}

impl Default for ActivitySection {
    fn default() -> Self {
        Self {
            ring_size: 20,
            retention_days: 90,
        }
    }
}

/// `[auth]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Seconds a token stays acceptable after issue.
    pub token_ttl_secs: u64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            token_ttl_secs: 3600,
        }
    }
}

/// Log output shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// `[logging]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Filter directive, e.g. `info` or `trellis_gateway=debug,info`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_sections_give_working_defaults() {
        let config: Config = toml::from_str("[server]\n[limits]\n").unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:7420");
        assert_eq!(config.limits.max_title_len, 200);
        assert_eq!(config.activity.ring_size, 20);
    }

    #[test]
    fn sections_override_independently() {
        let config: Config = toml::from_str(
            r#"
            [server]
            listen = "0.0.0.0:9000"

            [activity]
            ring_size = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert_eq!(config.server.outbound_queue_depth, 64);
        assert_eq!(config.activity.ring_size, 50);
        assert_eq!(config.activity.retention_days, 90);
    }

    #[test]
    fn log_format_parses_lowercase() {
        let config: Config = toml::from_str("[logging]\nformat = \"json\"\n").unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
    }
}
