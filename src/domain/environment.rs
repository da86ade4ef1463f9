//! Deployment environments and their variables.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Replacement value shown for secret variables when secrets are not revealed
pub const SECRET_MASK: &str = "********";

/// The fixed environment ladder, ordered `dev < qa < uat < prod`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentId {
    Dev,
    Qa,
    Uat,
    Prod,
}

impl EnvironmentId {
    /// Every environment, in promotion order
    pub const ALL: [EnvironmentId; 4] = [
        EnvironmentId::Dev,
        EnvironmentId::Qa,
        EnvironmentId::Uat,
        EnvironmentId::Prod,
    ];

    /// Position in the ladder
    pub fn index(&self) -> usize {
        match self {
            Self::Dev => 0,
            Self::Qa => 1,
            Self::Uat => 2,
            Self::Prod => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Qa => "qa",
            Self::Uat => "uat",
            Self::Prod => "prod",
        }
    }

    /// Default display label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Dev => "Development",
            Self::Qa => "QA",
            Self::Uat => "UAT",
            Self::Prod => "Production",
        }
    }
}

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for EnvironmentId {
    type Err = EnvironmentParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" => Ok(Self::Dev),
            "qa" => Ok(Self::Qa),
            "uat" => Ok(Self::Uat),
            "prod" => Ok(Self::Prod),
            other => Err(EnvironmentParseError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown environment '{0}' (expected dev, qa, uat or prod)")]
pub struct EnvironmentParseError(pub String);

/// A configuration variable in an environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvVariable {
    pub value: String,
    pub is_secret: bool,
    pub description: Option<String>,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

impl EnvVariable {
    /// Copy with the value masked if the variable is secret
    pub fn redacted(&self) -> Self {
        if !self.is_secret {
            return self.clone();
        }
        Self {
            value: SECRET_MASK.to_string(),
            ..self.clone()
        }
    }
}

/// Input for setting a variable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableInput {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub is_secret: bool,
    #[serde(default)]
    pub description: Option<String>,
}

impl VariableInput {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            is_secret: false,
            description: None,
        }
    }

    pub fn secret(mut self) -> Self {
        self.is_secret = true;
        self
    }
}

/// Per-tenant configuration of one environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub tenant_id: String,
    pub environment: EnvironmentId,
    pub label: String,
    pub description: String,
    pub variables: BTreeMap<String, EnvVariable>,
    pub is_locked: bool,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EnvironmentConfig {
    /// A freshly provisioned, unlocked environment
    pub fn provision(tenant_id: &str, environment: EnvironmentId) -> Self {
        let now = Utc::now();
        Self {
            tenant_id: tenant_id.to_string(),
            environment,
            label: environment.label().to_string(),
            description: String::new(),
            variables: BTreeMap::new(),
            is_locked: false,
            locked_by: None,
            locked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy with every secret value masked
    pub fn redacted(&self) -> Self {
        Self {
            variables: self
                .variables
                .iter()
                .map(|(k, v)| (k.clone(), v.redacted()))
                .collect(),
            ..self.clone()
        }
    }
}
