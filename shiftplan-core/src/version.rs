//! Schema versions and persisted instance metadata.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShiftplanError};

/// Dotted numeric version such as `2.4.1`. Trailing zero components are not
/// significant: `1.2` and `1.2.0` are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaVersion {
    parts: Vec<u64>,
    raw: String,
}

impl SchemaVersion {
    pub fn parse(s: &str) -> Result<Self> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(ShiftplanError::InvalidVersion(s.to_string()));
        }
        let parts = raw
            .split('.')
            .map(|p| p.parse::<u64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| ShiftplanError::InvalidVersion(s.to_string()))?;
        Ok(Self {
            parts,
            raw: raw.to_string(),
        })
    }

    pub fn parts(&self) -> &[u64] {
        &self.parts
    }

    fn significant(&self) -> &[u64] {
        let len = self
            .parts
            .iter()
            .rposition(|p| *p != 0)
            .map_or(0, |i| i + 1);
        &self.parts[..len]
    }
}

impl FromStr for SchemaVersion {
    type Err = ShiftplanError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SchemaVersion {
    type Error = ShiftplanError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<SchemaVersion> for String {
    fn from(v: SchemaVersion) -> Self {
        v.raw
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Ord for SchemaVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.significant().cmp(other.significant())
    }
}

impl PartialOrd for SchemaVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SchemaVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SchemaVersion {}

/// Classification of a database instance, consulted by the upgrade policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceKind {
    #[default]
    Development,
    Test,
    Staging,
    Production,
}

impl FromStr for InstanceKind {
    type Err = ShiftplanError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(InstanceKind::Development),
            "test" => Ok(InstanceKind::Test),
            "staging" => Ok(InstanceKind::Staging),
            "production" | "prod" => Ok(InstanceKind::Production),
            _ => Err(ShiftplanError::ConfigError(format!(
                "Invalid instance kind '{}'. Use 'development', 'test', 'staging', or 'production'.",
                s
            ))),
        }
    }
}

impl fmt::Display for InstanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceKind::Development => "development",
            InstanceKind::Test => "test",
            InstanceKind::Staging => "staging",
            InstanceKind::Production => "production",
        };
        f.write_str(s)
    }
}

/// Version and instance metadata persisted in the target database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbInfo {
    pub version: SchemaVersion,
    pub instance_kind: InstanceKind,
    pub updated_on: Option<DateTime<Utc>>,
}
