//! Env-var parsing helpers shared by the config sections.

use std::str::FromStr;

use crate::error::ConfigError;

/// Read an env var, treating unset and empty as absent.
pub(crate) fn optional_env(var: &'static str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

/// Read a required env var; unset or empty is a fatal config error.
pub(crate) fn required_env(var: &'static str) -> Result<String, ConfigError> {
    optional_env(var).ok_or(ConfigError::MissingVar(var))
}

/// Read a string env var with a default.
pub(crate) fn parse_string_env(var: &'static str, default: &str) -> String {
    optional_env(var).unwrap_or_else(|| default.to_string())
}

/// Read and parse an env var with a default for the unset case.
pub(crate) fn parse_env<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(var) {
        Some(raw) => raw.parse().map_err(|e| ConfigError::InvalidVar {
            var,
            reason: format!("{}", e),
        }),
        None => Ok(default),
    }
}
