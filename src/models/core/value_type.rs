//! # Value Types
//!
//! Types attached to job inputs, parameters and outputs. A plain data type is
//! written as its name (`int`, `model`, `dataset`); a reference to another
//! job's output is written `job_output<TYPE>`. The textual form is parsed once
//! at the boundary and carried as [`ValueType`] everywhere else.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

const JOB_OUTPUT_PREFIX: &str = "job_output<";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueType {
    /// A value supplied directly by the caller
    Data(String),
    /// The uuid of a [`JobOutput`](super::job_output::JobOutput) with the wrapped type
    JobOutput(String),
}

impl ValueType {
    pub fn data(name: impl Into<String>) -> Self {
        Self::Data(name.into())
    }

    pub fn job_output(name: impl Into<String>) -> Self {
        Self::JobOutput(name.into())
    }

    /// The underlying data type name, with any `job_output<..>` wrapper removed
    pub fn inner(&self) -> &str {
        match self {
            Self::Data(name) | Self::JobOutput(name) => name,
        }
    }

    pub fn is_job_output(&self) -> bool {
        matches!(self, Self::JobOutput(_))
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data(name) => write!(f, "{name}"),
            Self::JobOutput(name) => write!(f, "job_output<{name}>"),
        }
    }
}

impl FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("Empty value type".to_string());
        }

        if let Some(rest) = s.strip_prefix(JOB_OUTPUT_PREFIX) {
            let inner = rest
                .strip_suffix('>')
                .ok_or_else(|| format!("Invalid value type: {s}"))?;
            if inner.is_empty() || inner.contains(['<', '>']) {
                return Err(format!("Invalid value type: {s}"));
            }
            return Ok(Self::JobOutput(inner.to_string()));
        }

        if s.contains(['<', '>', ':']) {
            return Err(format!("Invalid value type: {s}"));
        }
        Ok(Self::Data(s.to_string()))
    }
}

impl Serialize for ValueType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ValueType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A typed value bound to a job input, serialised as `{"value": .., "type": ..}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputValue {
    pub value: Value,
    #[serde(rename = "type")]
    pub value_type: ValueType,
}

impl InputValue {
    pub fn new(value: impl Into<Value>, value_type: ValueType) -> Self {
        Self {
            value: value.into(),
            value_type,
        }
    }

    /// Binds an input to the output with the given uuid
    pub fn from_output(output_uuid: uuid::Uuid, output_type: &str) -> Self {
        Self {
            value: Value::String(output_uuid.to_string()),
            value_type: ValueType::job_output(output_type),
        }
    }
}
