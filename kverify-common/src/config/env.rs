//! Environment variable overrides with type safety.
//!
//! Every getter returns `None` when the variable is unset, so the caller
//! keeps the value from the config file. Invalid values are collected
//! rather than failing on the first one, so all issues can be reported at
//! once.

use std::collections::HashMap;
use std::env;
use thiserror::Error;

/// Prefix for every override variable.
pub const ENV_OVERRIDE_PREFIX: &str = "KVERIFY_";

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    /// Invalid value for a variable.
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    /// Value out of valid range.
    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },
}

/// Type-safe environment variable parser.
pub struct EnvParser {
    prefix: &'static str,
    /// Fixed lookup table; the process environment is used when `None`.
    source: Option<HashMap<String, String>>,
    errors: Vec<EnvError>,
}

impl EnvParser {
    /// Create a parser reading the process environment.
    pub fn new() -> Self {
        Self {
            prefix: ENV_OVERRIDE_PREFIX,
            source: None,
            errors: Vec::new(),
        }
    }

    /// Create a parser reading from a fixed set of variables.
    pub fn with_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            prefix: ENV_OVERRIDE_PREFIX,
            source: Some(
                vars.into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
            errors: Vec::new(),
        }
    }

    /// Get all accumulated errors.
    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    /// Check if any errors occurred.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Take ownership of errors.
    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    /// Get the full variable name with prefix.
    pub fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn lookup(&self, var_name: &str) -> Option<String> {
        match &self.source {
            Some(vars) => vars.get(var_name).cloned(),
            None => env::var(var_name).ok(),
        }
    }

    /// Get a string value. An empty value counts as set.
    pub fn get_string(&mut self, name: &str) -> Option<String> {
        self.lookup(&self.var_name(name))
    }

    /// Get an optional string; an empty value clears it (`Some(None)`).
    pub fn get_optional_string(&mut self, name: &str) -> Option<Option<String>> {
        self.lookup(&self.var_name(name))
            .map(|value| if value.is_empty() { None } else { Some(value) })
    }

    /// Get a boolean value.
    ///
    /// Accepts: 1, true, yes, on (for true)
    ///          0, false, no, off, "" (for false)
    pub fn get_bool(&mut self, name: &str) -> Option<bool> {
        let var_name = self.var_name(name);
        let value = self.lookup(&var_name)?;
        match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" | "" => Some(false),
            _ => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "boolean (true/false/1/0/yes/no)".to_string(),
                    value,
                });
                None
            }
        }
    }

    /// Get a u64 value with range validation.
    pub fn get_u64_range(&mut self, name: &str, min: u64, max: u64) -> Option<u64> {
        let var_name = self.var_name(name);
        let value = self.lookup(&var_name)?;
        match value.trim().parse::<u64>() {
            Ok(n) if n >= min && n <= max => Some(n),
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var: var_name,
                    value: n.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
                None
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "unsigned 64-bit integer".to_string(),
                    value,
                });
                None
            }
        }
    }

    /// Get a comma-separated list of strings.
    pub fn get_string_list(&mut self, name: &str) -> Option<Vec<String>> {
        let value = self.lookup(&self.var_name(name))?;
        Some(
            value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}
