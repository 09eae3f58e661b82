//! Job parameters and job-instance identity
//!
//! Parameters are split into identifying entries, which decide which
//! [`JobInstance`](super::JobInstance) a launch belongs to, and
//! non-identifying entries, which may change freely between attempts.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A typed parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ParameterValue {
    /// Text value
    String(String),
    /// Signed integer value
    Long(i64),
    /// Floating point value
    Double(f64),
    /// Timestamp value
    Date(DateTime<Utc>),
}

impl ParameterValue {
    fn type_tag(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Long(_) => "long",
            Self::Double(_) => "double",
            Self::Date(_) => "date",
        }
    }

    /// Borrow the value as text if it is a string parameter
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Long(v) => write!(f, "{v}"),
            // `{:?}` keeps a trailing `.0` so 1 and 1.0 stay distinguishable
            Self::Double(v) => write!(f, "{v:?}"),
            Self::Date(d) => f.write_str(&d.to_rfc3339()),
        }
    }
}

/// A single launch parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    /// The parameter value
    pub value: ParameterValue,
    /// Whether the parameter takes part in job-instance identity
    pub identifying: bool,
}

/// Named parameters supplied at each launch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobParameters {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    /// Create an empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a builder
    pub fn builder() -> JobParametersBuilder {
        JobParametersBuilder::default()
    }

    /// Look up a parameter
    pub fn get(&self, name: &str) -> Option<&JobParameter> {
        self.parameters.get(name)
    }

    /// Look up a string parameter value
    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|p| p.value.as_str())
    }

    /// Look up a long parameter value
    pub fn get_long(&self, name: &str) -> Option<i64> {
        match self.get(name).map(|p| &p.value) {
            Some(ParameterValue::Long(v)) => Some(*v),
            _ => None,
        }
    }

    /// Interpret a string parameter as a boolean flag (`"true"`, case-insensitive)
    pub fn get_flag(&self, name: &str) -> bool {
        self.get_string(name)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Whether there are no parameters
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Iterate over all parameters in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &JobParameter)> {
        self.parameters.iter()
    }

    /// Only the identifying parameters
    pub fn identifying(&self) -> JobParameters {
        JobParameters {
            parameters: self
                .parameters
                .iter()
                .filter(|(_, p)| p.identifying)
                .map(|(k, p)| (k.clone(), p.clone()))
                .collect(),
        }
    }

    /// Stable hash of the identifying parameters.
    ///
    /// Hex SHA-256 over the identifying entries in name order. Every name,
    /// type tag and value is length-prefixed, so no choice of text can make
    /// two different parameter sets encode alike. Non-identifying entries
    /// never change the key.
    pub fn job_key(&self) -> String {
        fn field(hasher: &mut Sha256, bytes: &[u8]) {
            hasher.update((bytes.len() as u64).to_be_bytes());
            hasher.update(bytes);
        }

        let mut hasher = Sha256::new();
        for (name, param) in self.parameters.iter().filter(|(_, p)| p.identifying) {
            field(&mut hasher, name.as_bytes());
            field(&mut hasher, param.value.type_tag().as_bytes());
            field(&mut hasher, param.value.to_string().as_bytes());
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

/// Builder for [`JobParameters`]
#[derive(Debug, Default)]
pub struct JobParametersBuilder {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParametersBuilder {
    /// Add an identifying string parameter
    pub fn add_string(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_string_with(name, value, true)
    }

    /// Add a string parameter with explicit identifying flag
    pub fn add_string_with(
        self,
        name: impl Into<String>,
        value: impl Into<String>,
        identifying: bool,
    ) -> Self {
        self.add(name, ParameterValue::String(value.into()), identifying)
    }

    /// Add an identifying long parameter
    pub fn add_long(self, name: impl Into<String>, value: i64) -> Self {
        self.add(name, ParameterValue::Long(value), true)
    }

    /// Add an identifying double parameter
    pub fn add_double(self, name: impl Into<String>, value: f64) -> Self {
        self.add(name, ParameterValue::Double(value), true)
    }

    /// Add an identifying date parameter
    pub fn add_date(self, name: impl Into<String>, value: DateTime<Utc>) -> Self {
        self.add(name, ParameterValue::Date(value), true)
    }

    /// Add any parameter
    pub fn add(
        mut self,
        name: impl Into<String>,
        value: ParameterValue,
        identifying: bool,
    ) -> Self {
        self.parameters
            .insert(name.into(), JobParameter { value, identifying });
        self
    }

    /// Finish building
    pub fn build(self) -> JobParameters {
        JobParameters {
            parameters: self.parameters,
        }
    }
}
