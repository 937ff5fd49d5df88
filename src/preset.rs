//! Metric watcher setups, read from JSON files or the presets built into the binary.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AwsSettingsBuilder;
use crate::metrics::{upsert_dimensions, Dimension, MetricSelector};

#[derive(RustEmbed)]
#[folder = "presets/"]
struct BuiltinPresets;

const PRESET_EXTENSION: &str = ".json";

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid setup: {0}")]
    Json(#[from] serde_json::Error),
    #[error("preset '{name}' not found. Available presets: {available}")]
    UnknownPreset { name: String, available: String },
    #[error("invalid dimension spec: {0}")]
    InvalidDimensionSpec(String),
}

/// Everything needed to build a metric watcher.
///
/// The JSON shape is `{namespace, dimensions_list, metric_name, metric_id,
/// metric_unit}` plus optional `aws_*` credentials.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricWatcherSetup {
    #[serde(flatten)]
    pub selector: MetricSelector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_access_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_secret_access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_session_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_region_name: Option<String>,
}

impl fmt::Debug for MetricWatcherSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricWatcherSetup")
            .field("selector", &self.selector)
            .field("aws_access_key_id", &self.aws_access_key_id)
            .field("aws_secret_access_key", &self.aws_secret_access_key.as_ref().map(|_| "***"))
            .field("aws_session_token", &self.aws_session_token.as_ref().map(|_| "***"))
            .field("aws_region_name", &self.aws_region_name)
            .finish()
    }
}

impl FromStr for MetricWatcherSetup {
    type Err = SetupError;

    fn from_str(json: &str) -> Result<Self, Self::Err> {
        Ok(serde_json::from_str(json)?)
    }
}

impl MetricWatcherSetup {
    pub fn new(selector: MetricSelector) -> Self {
        Self {
            selector,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_session_token: None,
            aws_region_name: None,
        }
    }

    pub fn from_json(path: &Path) -> Result<Self, SetupError> {
        let contents = std::fs::read_to_string(path)?;
        contents.parse()
    }

    /// Load one of the presets embedded in the binary.
    pub fn from_preset(name: &str) -> Result<Self, SetupError> {
        let file = BuiltinPresets::get(&format!("{}{}", name, PRESET_EXTENSION)).ok_or_else(|| {
            SetupError::UnknownPreset {
                name: name.to_string(),
                available: available_presets().join(", "),
            }
        })?;
        Ok(serde_json::from_slice(&file.data)?)
    }

    /// Apply `Name:Value` specs: existing names are updated in place, new ones appended.
    ///
    /// Nothing is changed if any spec is malformed.
    pub fn upsert_dimensions(&mut self, specs: &[String]) -> Result<(), SetupError> {
        let updates = specs
            .iter()
            .map(|spec| spec.parse::<Dimension>().map_err(SetupError::InvalidDimensionSpec))
            .collect::<Result<Vec<_>, _>>()?;
        upsert_dimensions(&mut self.selector.dimensions, updates);
        Ok(())
    }

    /// A settings builder seeded with the credentials stored in the setup.
    pub fn aws_settings_builder(&self) -> AwsSettingsBuilder {
        AwsSettingsBuilder::new()
            .region(self.aws_region_name.clone())
            .access_key_id(self.aws_access_key_id.clone())
            .secret_access_key(self.aws_secret_access_key.clone())
            .session_token(self.aws_session_token.clone())
    }
}

/// Names of the built-in presets, sorted.
pub fn available_presets() -> Vec<String> {
    let mut names: Vec<String> = BuiltinPresets::iter()
        .filter_map(|file| file.strip_suffix(PRESET_EXTENSION).map(str::to_string))
        .collect();
    names.sort();
    names
}
