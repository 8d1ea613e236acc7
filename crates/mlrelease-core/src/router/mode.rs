//! Serving modes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::RouteError;

/// How a request is routed across the `prod` and `candidate` aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServingMode {
    #[default]
    Prod,
    Candidate,
    Canary,
    Shadow,
}

impl ServingMode {
    pub const ALL: [ServingMode; 4] = [
        ServingMode::Prod,
        ServingMode::Candidate,
        ServingMode::Canary,
        ServingMode::Shadow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServingMode::Prod => "prod",
            ServingMode::Candidate => "candidate",
            ServingMode::Canary => "canary",
            ServingMode::Shadow => "shadow",
        }
    }

    /// Parse an optional mode selector. Absent or blank means `prod`.
    pub fn parse_optional(raw: Option<&str>) -> Result<Self, RouteError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(ServingMode::Prod),
            Some(s) => s.parse(),
        }
    }
}

impl fmt::Display for ServingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServingMode {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prod" => Ok(ServingMode::Prod),
            "candidate" => Ok(ServingMode::Candidate),
            "canary" => Ok(ServingMode::Canary),
            "shadow" => Ok(ServingMode::Shadow),
            _ => Err(RouteError::UnknownMode(s.to_string())),
        }
    }
}
