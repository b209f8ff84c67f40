//! Scenario files.
//!
//! A scenario declares named source collections with their initial entries
//! and a sequence of steps to replay against one aggregate view. Scenarios
//! are written in TOML or JSON, picked by file extension.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Errors from loading, validating or replaying a scenario.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("unsupported scenario format: {0} (expected .toml or .json)")]
    UnsupportedFormat(String),

    #[error("scenario declares no sources")]
    NoSources,

    #[error("duplicate source name `{0}`")]
    DuplicateSource(String),

    #[error("unknown source `{0}`")]
    UnknownSource(String),

    #[error("flush on `{0}` without a matching buffer")]
    UnbalancedFlush(String),

    #[error("expected view {expected}, found {actual}")]
    ExpectationFailed { expected: String, actual: String },

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A complete scenario.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Source collections, created before the first step.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    /// Steps, replayed in order.
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One named source collection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    /// Initial entries, present before the view exists.
    #[serde(default)]
    pub entries: BTreeMap<String, Value>,
    /// Attach the source when the view is constructed.
    #[serde(default)]
    pub attach: bool,
}

/// A single replay step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Attach { source: String },
    Detach { source: String },
    DetachAll,
    Add { source: String, key: String, value: Value },
    Update { source: String, key: String, value: Value },
    Set { source: String, key: String, value: Value },
    Remove { source: String, key: String },
    Clear { source: String },
    /// Start holding back the source's notifications.
    Buffer { source: String },
    /// Release the most recent buffer on the source.
    Flush { source: String },
    /// Fail unless the view holds exactly `entries`.
    Expect {
        #[serde(default)]
        entries: BTreeMap<String, Value>,
    },
}

impl Step {
    /// The source this step operates on, if any.
    pub fn source(&self) -> Option<&str> {
        match self {
            Self::Attach { source }
            | Self::Detach { source }
            | Self::Add { source, .. }
            | Self::Update { source, .. }
            | Self::Set { source, .. }
            | Self::Remove { source, .. }
            | Self::Clear { source }
            | Self::Buffer { source }
            | Self::Flush { source } => Some(source),
            Self::DetachAll | Self::Expect { .. } => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attach { source } => write!(f, "attach {source}"),
            Self::Detach { source } => write!(f, "detach {source}"),
            Self::DetachAll => f.write_str("detach all"),
            Self::Add { source, key, value } => write!(f, "{source}.add({key}, {value})"),
            Self::Update { source, key, value } => write!(f, "{source}.update({key}, {value})"),
            Self::Set { source, key, value } => write!(f, "{source}.set({key}, {value})"),
            Self::Remove { source, key } => write!(f, "{source}.remove({key})"),
            Self::Clear { source } => write!(f, "{source}.clear()"),
            Self::Buffer { source } => write!(f, "buffer {source}"),
            Self::Flush { source } => write!(f, "flush {source}"),
            Self::Expect { entries } => write!(f, "expect {} entries", entries.len()),
        }
    }
}

impl ScenarioConfig {
    /// Load a scenario from a `.toml` or `.json` file.
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let text = std::fs::read_to_string(path)?;
        match extension.as_str() {
            "toml" => Self::from_toml_str(&text),
            "json" => Self::from_json_str(&text),
            _ => Err(ScenarioError::UnsupportedFormat(path.display().to_string())),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ScenarioError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Check source names and buffer/flush pairing without running anything.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.sources.is_empty() {
            return Err(ScenarioError::NoSources);
        }
        let mut names = BTreeSet::new();
        for source in &self.sources {
            if !names.insert(source.name.as_str()) {
                return Err(ScenarioError::DuplicateSource(source.name.clone()));
            }
        }

        let mut open: BTreeMap<&str, usize> = BTreeMap::new();
        for step in &self.steps {
            let Some(source) = step.source() else {
                continue;
            };
            if !names.contains(source) {
                return Err(ScenarioError::UnknownSource(source.to_string()));
            }
            match step {
                Step::Buffer { .. } => *open.entry(source).or_default() += 1,
                Step::Flush { .. } => {
                    let depth = open.entry(source).or_default();
                    if *depth == 0 {
                        return Err(ScenarioError::UnbalancedFlush(source.to_string()));
                    }
                    *depth -= 1;
                }
                _ => {}
            }
        }
        Ok(())
    }
}
