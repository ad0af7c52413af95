//! Log verbosity model.
//!
//! The broker exposes a four-step verbosity ladder in its configuration;
//! the daemon maps it onto a tracing filter at startup.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogLevel {
    Nothing,
    Errors,
    ErrorsAndWarnings,
    #[default]
    Everything,
}

impl LogLevel {
    /// Directive string for a tracing env-filter.
    pub fn filter_str(self) -> &'static str {
        match self {
            LogLevel::Nothing => "off",
            LogLevel::Errors => "error",
            LogLevel::ErrorsAndWarnings => "warn",
            LogLevel::Everything => "info",
        }
    }

    /// Parse a level from either a name or its numeric form (0-3).
    pub fn from_arg(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "0" | "nothing" => Ok(LogLevel::Nothing),
            "1" | "errors" => Ok(LogLevel::Errors),
            "2" | "errors-and-warnings" => Ok(LogLevel::ErrorsAndWarnings),
            "3" | "everything" => Ok(LogLevel::Everything),
            other => Err(format!(
                "unknown log level {other:?} (expected nothing, errors, errors-and-warnings, everything or 0-3)"
            )),
        }
    }
}
