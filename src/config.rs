//! Runtime configuration.
//!
//! Values come from [`Config::default`] or from the environment through
//! [`Config::from_env`]. Missing variables fall back to the defaults; a
//! variable that is present but malformed is an error.
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `INTERRUTTORE_BUTTON` | `button` | `mainSwitch` |
//! | `INTERRUTTORE_CHANNEL_CAPACITY` | `channel_capacity` | `64` |
//! | `INTERRUTTORE_LEADERBOARD_LIMIT` | `leaderboard_limit` | `10` |
//! | `INTERRUTTORE_DEFAULT_NAME` | `default_display_name` | `Anonymous` |

use std::{env, fmt::Display, str::FromStr};

use tracing::info;

use crate::error::{Error, Result};

pub const DEFAULT_BUTTON: &str = "mainSwitch";
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;
pub const DEFAULT_DISPLAY_NAME: &str = "Anonymous";

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// Button the client sessions act on.
    pub button: String,
    /// Queue depth of every subscription.
    pub channel_capacity: usize,
    /// Rows fetched by the leaderboard panel.
    pub leaderboard_limit: usize,
    /// Name given to a profile created by its first click.
    pub default_display_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            button: DEFAULT_BUTTON.to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            leaderboard_limit: DEFAULT_LEADERBOARD_LIMIT,
            default_display_name: DEFAULT_DISPLAY_NAME.to_string(),
        }
    }
}

impl Config {
    /// Loads the configuration from `INTERRUTTORE_*` variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            button: try_load(&lookup, "INTERRUTTORE_BUTTON", defaults.button)?,
            channel_capacity: try_load(
                &lookup,
                "INTERRUTTORE_CHANNEL_CAPACITY",
                defaults.channel_capacity,
            )?,
            leaderboard_limit: try_load(
                &lookup,
                "INTERRUTTORE_LEADERBOARD_LIMIT",
                defaults.leaderboard_limit,
            )?,
            default_display_name: try_load(
                &lookup,
                "INTERRUTTORE_DEFAULT_NAME",
                defaults.default_display_name,
            )?,
        })
    }

    pub fn with_button(mut self, button: impl Into<String>) -> Self {
        self.button = button.into();
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_leaderboard_limit(mut self, limit: usize) -> Self {
        self.leaderboard_limit = limit;
        self
    }

    pub fn with_default_display_name(mut self, name: impl Into<String>) -> Self {
        self.default_display_name = name.into();
        self
    }
}

fn try_load<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| Error::Config {
            key: key.to_string(),
            reason: e.to_string(),
        }),
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}
