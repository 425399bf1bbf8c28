//! Weaver configuration (weft.toml / weft.json)

use crate::advice::{Advice, AdviceSpec};
use crate::error::ConfigError;
use crate::matcher::AdviceRegistry;
use crate::mixin::{Mixin, MixinSpec};
use crate::nesting::DEFAULT_RUNTIME_CLASS;
use crate::pipeline::WeavingMode;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Everything the pipeline needs besides the class byte provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeaverConfig {
    /// Initial weaving mode
    #[serde(default)]
    pub mode: WeavingMode,

    /// Dotted name of the nesting flag class
    #[serde(default = "default_runtime_class")]
    pub runtime_class: String,

    /// Classes whose dotted names start with one of these are never woven
    #[serde(default = "default_excluded_prefixes")]
    pub excluded_prefixes: Vec<String>,

    /// Run the structural verifier on woven classes
    #[serde(default = "default_verify_output")]
    pub verify_output: bool,

    /// Advice declarations, in weaving order
    #[serde(default)]
    pub advice: Vec<AdviceSpec>,

    /// Mixin declarations
    #[serde(default)]
    pub mixins: Vec<MixinSpec>,
}

fn default_runtime_class() -> String {
    DEFAULT_RUNTIME_CLASS.to_string()
}

fn default_excluded_prefixes() -> Vec<String> {
    vec!["weft.".to_string()]
}

fn default_verify_output() -> bool {
    true
}

impl Default for WeaverConfig {
    fn default() -> Self {
        Self {
            mode: WeavingMode::default(),
            runtime_class: default_runtime_class(),
            excluded_prefixes: default_excluded_prefixes(),
            verify_output: default_verify_output(),
            advice: Vec::new(),
            mixins: Vec::new(),
        }
    }
}

impl WeaverConfig {
    /// Load from a `.toml` or `.json` file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            Some("json") => Self::from_json_str(&content),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }

    /// Parse TOML
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Parse JSON
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Validate every declaration and build the registry
    ///
    /// The first invalid declaration fails the whole configuration.
    pub fn build_registry(&self) -> Result<AdviceRegistry, ConfigError> {
        let advice = self
            .advice
            .iter()
            .cloned()
            .map(Advice::from_spec)
            .collect::<Result<Vec<_>, _>>()?;
        let mixins = self
            .mixins
            .iter()
            .cloned()
            .map(Mixin::from_spec)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(AdviceRegistry::new(advice, mixins))
    }
}
