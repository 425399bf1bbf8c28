//! Error types for the weaving engine

use crate::advice::CallbackRole;
use thiserror::Error;
use weft_bytecode::{ClassFileError, DecodeError, EncodeError, VerifyError};

/// Invalid advice or mixin declarations, reported at startup
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeclarationError {
    /// Two callbacks declared for the same role
    #[error("Advice '{advice}' declares more than one {role} callback")]
    AmbiguousCallback {
        /// Advice name
        advice: String,
        /// Callback role
        role: CallbackRole,
    },

    /// Binding kind not allowed for the callback role
    #[error("Advice '{advice}': {role} callback cannot bind {binding} (parameter {index})")]
    InvalidBinding {
        /// Advice name
        advice: String,
        /// Callback role
        role: CallbackRole,
        /// Binding kind
        binding: &'static str,
        /// Zero-based parameter position
        index: usize,
    },

    /// Return value or thrown binding declared after the first parameter
    #[error("Advice '{advice}': {role} callback must bind {binding} as its first parameter")]
    BindingNotFirst {
        /// Advice name
        advice: String,
        /// Callback role
        role: CallbackRole,
        /// Binding kind
        binding: &'static str,
    },

    /// `on_throw` or `on_after` returns a value
    #[error("Advice '{advice}': {role} callback must return void")]
    NonVoidReturn {
        /// Advice name
        advice: String,
        /// Callback role
        role: CallbackRole,
    },

    /// `is_enabled` does not return boolean
    #[error("Advice '{advice}': is_enabled callback must return boolean")]
    IsEnabledNotBoolean {
        /// Advice name
        advice: String,
    },

    /// Traveler bound without a value-returning `on_before`
    #[error("Advice '{advice}': {role} callback binds the traveler but on_before returns nothing")]
    TravelerWithoutBefore {
        /// Advice name
        advice: String,
        /// Callback role
        role: CallbackRole,
    },

    /// Declared parameter type incompatible with its binding
    #[error("Advice '{advice}': {role} parameter {index} has type {found}, expected {expected}")]
    InvalidParameterType {
        /// Advice name
        advice: String,
        /// Callback role
        role: CallbackRole,
        /// Zero-based parameter position
        index: usize,
        /// Declared type
        found: String,
        /// Type the binding requires
        expected: &'static str,
    },

    /// Pattern that cannot be compiled
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// Pattern as written
        pattern: String,
        /// Why compilation failed
        reason: String,
    },

    /// Type name that cannot be parsed
    #[error("Invalid type name '{0}'")]
    InvalidType(String),

    /// Mixin target given as a pattern
    #[error("Mixin target '{0}' must be an exact class name")]
    WildcardMixinTarget(String),
}

/// Failure while weaving a single class
///
/// These never escape the pipeline; they are logged and the original bytes
/// are returned.
#[derive(Debug, Error)]
pub enum TransformError {
    /// Class bytes could not be parsed
    #[error("Class file error: {0}")]
    ClassFile(#[from] ClassFileError),

    /// A structure inside the class could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Woven class no longer fits the class file format
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Woven output failed structural verification
    #[error("Verification failed: {0}")]
    Verify(#[from] VerifyError),

    /// A method or class shape the weaver cannot handle
    #[error("Unsupported in {method}: {reason}")]
    Unsupported {
        /// `Owner.name(descriptor)` of the method
        method: String,
        /// What the weaver cannot handle
        reason: String,
    },

    /// Weaving panicked
    #[error("Weaver panicked: {0}")]
    Panic(String),
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    /// Failed to parse JSON
    #[error("Failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),

    /// Unknown file extension
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// An advice or mixin declaration is invalid
    #[error("Invalid declaration: {0}")]
    Declaration(#[from] DeclarationError),
}

/// Result type for declaration building
pub type DeclarationResult<T> = Result<T, DeclarationError>;

/// Result type for weaving
pub type TransformResult<T> = Result<T, TransformError>;
