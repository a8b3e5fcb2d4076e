//! Behavior knobs for operations, with environment and config file support.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set with `with_*` methods or struct fields
//! 2. **Environment variables**: values from `SETTLE_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: [`OperationConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Values | Maps to |
//! |----------|--------|---------|
//! | `SETTLE_LATE_CANCEL` | `ignore`, `record` | `late_cancel` |
//! | `SETTLE_UNHANDLED` | `panic`, `log` | `unhandled` |

use core::fmt;
use core::str::FromStr;

use crate::error::{ConfigError, Result};

/// Environment variable name for the late-cancel policy.
pub const ENV_LATE_CANCEL: &str = "SETTLE_LATE_CANCEL";
/// Environment variable name for the unhandled-failure policy.
pub const ENV_UNHANDLED: &str = "SETTLE_UNHANDLED";

/// What `cancel` does once the operation has already settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "config-file", derive(serde::Deserialize))]
#[cfg_attr(feature = "config-file", serde(rename_all = "lowercase"))]
pub enum LateCancel {
    /// The call is a no-op; the status keeps its settled value.
    #[default]
    Ignore,
    /// The status is overwritten with `Cancelled`. Nothing already dispatched
    /// is undone or re-triggered.
    Record,
}

impl FromStr for LateCancel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ignore" => Ok(Self::Ignore),
            "record" => Ok(Self::Record),
            _ => Err(ConfigError::InvalidValue {
                var: ENV_LATE_CANCEL,
                value: s.to_string(),
                expected: "ignore|record",
            }),
        }
    }
}

impl fmt::Display for LateCancel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ignore => f.write_str("ignore"),
            Self::Record => f.write_str("record"),
        }
    }
}

/// What a registration call does when the handler it runs immediately fails
/// and no `catch` is registered.
///
/// Settling calls never consult this: they always hand the failure back to
/// their caller as [`Unhandled`](crate::Unhandled).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "config-file", derive(serde::Deserialize))]
#[cfg_attr(feature = "config-file", serde(rename_all = "lowercase"))]
pub enum UnhandledPolicy {
    /// Panic out of the registration call.
    #[default]
    Panic,
    /// Emit an `error!` event and drop the failure.
    Log,
}

impl FromStr for UnhandledPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "panic" => Ok(Self::Panic),
            "log" => Ok(Self::Log),
            _ => Err(ConfigError::InvalidValue {
                var: ENV_UNHANDLED,
                value: s.to_string(),
                expected: "panic|log",
            }),
        }
    }
}

impl fmt::Display for UnhandledPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Panic => f.write_str("panic"),
            Self::Log => f.write_str("log"),
        }
    }
}

/// Per-operation behavior configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OperationConfig {
    /// Policy for `cancel` after settlement.
    pub late_cancel: LateCancel,
    /// Policy for unhandled handler failures inside registration calls.
    pub unhandled: UnhandledPolicy,
}

impl OperationConfig {
    /// Returns the defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Sets the late-cancel policy.
    #[must_use]
    pub const fn with_late_cancel(mut self, late_cancel: LateCancel) -> Self {
        self.late_cancel = late_cancel;
        self
    }

    /// Sets the unhandled-failure policy.
    #[must_use]
    pub const fn with_unhandled(mut self, unhandled: UnhandledPolicy) -> Self {
        self.unhandled = unhandled;
        self
    }
}

/// Apply environment variable overrides to an [`OperationConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut OperationConfig) -> Result<()> {
    if let Some(val) = read_env(ENV_LATE_CANCEL) {
        config.late_cancel = val.parse()?;
    }
    if let Some(val) = read_env(ENV_UNHANDLED) {
        config.unhandled = val.parse()?;
    }
    Ok(())
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable operation configuration.
///
/// ```toml
/// [operation]
/// late_cancel = "record"
/// unhandled = "log"
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct SettleTomlConfig {
    /// Operation settings.
    #[serde(default)]
    pub operation: OperationToml,
}

/// Operation section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct OperationToml {
    /// Late-cancel policy.
    pub late_cancel: Option<LateCancel>,
    /// Unhandled-failure policy.
    pub unhandled: Option<UnhandledPolicy>,
}

/// Apply a parsed TOML config to an [`OperationConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut OperationConfig, toml: &SettleTomlConfig) {
    if let Some(v) = toml.operation.late_cancel {
        config.late_cancel = v;
    }
    if let Some(v) = toml.operation.unhandled {
        config.unhandled = v;
    }
}

/// Parse a TOML string into a [`SettleTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<SettleTomlConfig> {
    toml::from_str(toml_str).map_err(|e| ConfigError::Toml(e.to_string()))
}

/// Read and parse a TOML file into a [`SettleTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<SettleTomlConfig> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_toml_str(&content)
}

/// Load a config from defaults, an optional TOML file, then the environment.
///
/// Programmatic overrides are applied by the caller on the returned value.
#[cfg(feature = "config-file")]
pub fn load(path: Option<&std::path::Path>) -> Result<OperationConfig> {
    let mut config = OperationConfig::default();
    if let Some(path) = path {
        apply_toml_config(&mut config, &parse_toml_file(path)?);
    }
    apply_env_overrides(&mut config)?;
    Ok(config)
}

// =========================================================================
// Tests
// =========================================================================
