use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::giveaway::scheduler::DEFAULT_SWEEP_INTERVAL;

pub const DATA_DIR_VAR: &str = "GIVEAWAY_DATA_DIR";
pub const SWEEP_INTERVAL_VAR: &str = "GIVEAWAY_SWEEP_INTERVAL_SECS";
pub const DISCORD_TOKEN_VAR: &str = "DISCORD_TOKEN";

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Config {
    // Directory with the giveaway tables.
    pub data_dir: PathBuf,
    pub sweep_interval: Duration,
    pub discord_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Config::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = lookup(DATA_DIR_VAR)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let sweep_interval = match lookup(SWEEP_INTERVAL_VAR) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(seconds) if seconds > 0 => Duration::from_secs(seconds),
                _ => {
                    let message = format!(
                        "{} must be a positive amount of seconds, got '{}'.",
                        SWEEP_INTERVAL_VAR, raw
                    );
                    return Err(Error::Config(message));
                }
            },
            None => DEFAULT_SWEEP_INTERVAL,
        };

        let discord_token = lookup(DISCORD_TOKEN_VAR).filter(|value| !value.trim().is_empty());

        Ok(Config {
            data_dir,
            sweep_interval,
            discord_token,
        })
    }

    pub fn require_discord_token(&self) -> Result<&str> {
        match &self.discord_token {
            Some(token) => Ok(token.as_str()),
            None => {
                let message = format!("Expected a {} in the environment.", DISCORD_TOKEN_VAR);
                Err(Error::Config(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    use crate::config::Config;
    use crate::error::Error;

    fn lookup_in(values: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let values = values
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<String, String>>();
        move |name| values.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_in(&[])).unwrap();

        assert_eq!(config.data_dir, PathBuf::from("."));
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.discord_token, None);
        assert_eq!(config.require_discord_token().is_err(), true);
    }

    #[test]
    fn test_read_values() {
        let config = Config::from_lookup(lookup_in(&[
            ("GIVEAWAY_DATA_DIR", "/var/lib/giveaways"),
            ("GIVEAWAY_SWEEP_INTERVAL_SECS", "5"),
            ("DISCORD_TOKEN", "token"),
        ]))
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/giveaways"));
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.require_discord_token().unwrap(), "token");
    }

    #[test]
    fn test_get_error_for_invalid_interval() {
        for raw in ["0", "-3", "soon"] {
            let result = Config::from_lookup(lookup_in(&[("GIVEAWAY_SWEEP_INTERVAL_SECS", raw)]));
            assert_eq!(result.is_err(), true);
            assert_eq!(
                result.unwrap_err(),
                Error::Config(format!(
                    "GIVEAWAY_SWEEP_INTERVAL_SECS must be a positive amount of seconds, got '{}'.",
                    raw
                ))
            );
        }
    }
}
