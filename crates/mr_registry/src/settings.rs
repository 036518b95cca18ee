//! Registry settings.

use crate::errors::Result;
use crate::types::MrMode;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What `close` does with registrations that are still live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosePolicy {
    /// Refuse to close and hand the registry back.
    #[default]
    Reject,
    /// Remove every remaining entry and drop its native handle.
    ///
    /// The handles never reach the caller, so any provider resource they
    /// stand for is not deregistered unless the handle type does so on drop.
    Drain,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub mode: MrMode,
    pub close_policy: ClosePolicy,
}

impl RegistryConfig {
    /// Environment variables with this prefix override file settings,
    /// e.g. `FABRIC_MR_MODE=caller_supplied`.
    pub const ENV_PREFIX: &'static str = "FABRIC_MR";

    pub fn new(mode: MrMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn with_close_policy(mut self, close_policy: ClosePolicy) -> Self {
        self.close_policy = close_policy;
        self
    }

    /// Load from an optional config file layered under the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(Environment::with_prefix(Self::ENV_PREFIX));

        Ok(builder.build()?.try_deserialize()?)
    }
}
