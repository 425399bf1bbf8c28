//! Mixin declarations

use crate::error::{DeclarationError, DeclarationResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static CLASS_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\p{L}_$][\p{L}\p{N}_$]*(\.[\p{L}_$][\p{L}\p{N}_$]*)*$")
        .expect("class name regex")
});

/// Structural description of a mixin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixinSpec {
    /// Exact name of the class (or ancestor) that receives the mixin
    pub target: String,
    /// Interface added to the target
    pub interface: String,
    /// Class implementing the interface, with a public no-arg constructor
    pub implementation: String,
}

impl MixinSpec {
    /// Describe a mixin
    pub fn new(
        target: impl Into<String>,
        interface: impl Into<String>,
        implementation: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            interface: interface.into(),
            implementation: implementation.into(),
        }
    }

    /// Validate into a [`Mixin`]
    pub fn build(self) -> DeclarationResult<Mixin> {
        Mixin::from_spec(self)
    }
}

/// A validated mixin; all names are dotted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mixin {
    target: String,
    interface: String,
    implementation: String,
}

impl Mixin {
    /// Validate a structural description
    pub fn from_spec(spec: MixinSpec) -> DeclarationResult<Self> {
        if spec.target.contains(['*', '|', '/']) {
            return Err(DeclarationError::WildcardMixinTarget(spec.target));
        }
        for name in [&spec.target, &spec.interface, &spec.implementation] {
            if !CLASS_NAME.is_match(name) {
                return Err(DeclarationError::InvalidType(name.clone()));
            }
        }
        Ok(Self {
            target: spec.target,
            interface: spec.interface,
            implementation: spec.implementation,
        })
    }

    /// Target class name
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Interface name
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Implementation class name
    pub fn implementation(&self) -> &str {
        &self.implementation
    }
}
