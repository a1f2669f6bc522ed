//! Config loading, environment overrides and validation.

use std::path::Path;

use thiserror::Error;

use crate::types::Config;

/// Configuration failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// Offending path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for the expected shape.
    #[error("cannot parse {path}: {source}")]
    Parse {
        /// Offending path.
        path: String,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range.
    #[error("invalid configuration: {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Load configuration.
///
/// Missing file means defaults. `TRELLIS_LISTEN` and `TRELLIS_LOG`
/// override the listen address and the log filter after the file is
/// applied.
///
/// # Errors
///
/// [`ConfigError`] on unreadable/unparsable files or out-of-range
/// values.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) if path.exists() => {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
            toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?
        },
        _ => Config::default(),
    };

    if let Ok(listen) = std::env::var("TRELLIS_LISTEN")
        && !listen.is_empty()
    {
        config.server.listen = listen;
    }
    if let Ok(level) = std::env::var("TRELLIS_LOG")
        && !level.is_empty()
    {
        config.logging.level = level;
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.server.outbound_queue_depth == 0 {
        return Err(ConfigError::Invalid {
            field: "server.outbound_queue_depth",
            reason: "must be at least 1".to_string(),
        });
    }
    if config.server.handshake_timeout_secs == 0 {
        return Err(ConfigError::Invalid {
            field: "server.handshake_timeout_secs",
            reason: "must be at least 1".to_string(),
        });
    }
    if config.activity.ring_size == 0 {
        return Err(ConfigError::Invalid {
            field: "activity.ring_size",
            reason: "must be at least 1".to_string(),
        });
    }
    if config.limits.max_title_len == 0 || config.limits.max_comment_len == 0 {
        return Err(ConfigError::Invalid {
            field: "limits",
            reason: "length limits must be at least 1".to_string(),
        });
    }
    if config.server.listen.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::Invalid {
            field: "server.listen",
            reason: format!("{} is not a socket address", config.server.listen),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_defaults() {
        let config = load(None).unwrap();
        assert_eq!(config.activity.ring_size, 20);
    }

    #[test]
    fn zero_queue_depth_is_rejected() {
        let config: Config =
            toml::from_str("[server]\noutbound_queue_depth = 0\n").unwrap();
        assert!(matches!(
            validate(&config),
            Err(ConfigError::Invalid {
                field: "server.outbound_queue_depth",
                ..
            })
        ));
    }

    #[test]
    fn bad_listen_address_is_rejected() {
        let config: Config = toml::from_str("[server]\nlisten = \"nowhere\"\n").unwrap();
        assert!(matches!(
            validate(&config),
            Err(ConfigError::Invalid {
                field: "server.listen",
                ..
            })
        ));
    }
}
