//! Weft weaving engine
//!
//! Rewrites JVM classes as they are loaded so matched methods run advice
//! callbacks around their original bodies:
//! - **Model**: type descriptors and a per-loader hierarchy resolver
//!   (`types`, `hierarchy`)
//! - **Matching**: patterns, advice and mixin declarations, class plans
//!   (`pattern`, `advice`, `mixin`, `matcher`)
//! - **Weaving**: wrapper IR, bytecode generation and mixins (`weave`)
//! - **Pipeline**: per-loader transformers behind a never-failing entry
//!   point (`transformer`, `pipeline`)
//!
//! # Example
//!
//! ```rust,ignore
//! use weft_engine::{AdviceSpec, CallbackRole, CallbackSpec, WeaverConfig, TransformPipeline};
//!
//! let mut config = WeaverConfig::default();
//! config.advice.push(
//!     AdviceSpec::new("java.util.List", "add")
//!         .callback(CallbackSpec::new(CallbackRole::OnBefore, "demo.Probe", "before")),
//! );
//! let pipeline = TransformPipeline::from_config(&config, provider)?;
//! let bytes = pipeline.transform(loader, "java.util.ArrayList", &original);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod advice;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod matcher;
pub mod mixin;
pub mod nesting;
pub mod pattern;
pub mod pipeline;
pub mod stats;
pub mod transformer;
pub mod types;
pub mod weave;

pub use advice::{Advice, AdviceSpec, BindingKind, CallbackRole, CallbackSpec, Modifier};
pub use config::WeaverConfig;
pub use error::{ConfigError, DeclarationError, TransformError};
pub use hierarchy::{ClassBytesProvider, ClassSource, HierarchyResolver, NoClassBytes};
pub use matcher::{AdviceRegistry, ClassPlan, MatchedAdvice};
pub use mixin::{Mixin, MixinSpec};
pub use nesting::{NestingRegistry, DEFAULT_RUNTIME_CLASS};
pub use pattern::{build_pattern, Pattern};
pub use pipeline::{TransformPipeline, WeavingMode};
pub use stats::{StatsSnapshot, WeavingStats};
pub use transformer::{Transformer, Woven};
pub use types::{LoaderId, MethodDescriptor, TypeDescriptor};
