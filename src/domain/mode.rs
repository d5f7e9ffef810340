use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Filter sensitivity. Stronger modes conceal at lower scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Light,
    #[default]
    Medium,
    Strong,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown filter mode: {0}")]
pub struct UnknownMode(pub String);

impl Mode {
    /// Minimum score at which a fragment gets concealed.
    pub fn threshold(self) -> f64 {
        match self {
            Mode::Light => 0.9,
            Mode::Medium => 0.7,
            Mode::Strong => 0.5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Light => "light",
            Mode::Medium => "medium",
            Mode::Strong => "strong",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Mode::Light),
            "medium" => Ok(Mode::Medium),
            "strong" => Ok(Mode::Strong),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}
