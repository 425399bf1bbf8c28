//! Transform pipeline
//!
//! The entry point the host calls for every class definition. It never fails
//! and never panics outward: whenever a class is excluded, unmatched or cannot
//! be woven, the caller gets its own bytes back.

use crate::config::WeaverConfig;
use crate::error::{ConfigError, TransformError};
use crate::hierarchy::{ClassBytesProvider, HierarchyResolver};
use crate::matcher::AdviceRegistry;
use crate::nesting::{NestingRegistry, DEFAULT_RUNTIME_CLASS};
use crate::stats::{Outcome, StatsSnapshot, WeavingStats};
use crate::transformer::Transformer;
use crate::types::{dotted, loader_label, LoaderId};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::borrow::Cow;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Whether the pipeline rewrites classes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeavingMode {
    /// Matching classes are woven
    #[default]
    Enabled,
    /// Every class passes through
    Disabled,
}

impl WeavingMode {
    fn to_u8(self) -> u8 {
        match self {
            WeavingMode::Enabled => 0,
            WeavingMode::Disabled => 1,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => WeavingMode::Enabled,
            _ => WeavingMode::Disabled,
        }
    }
}

/// Routes class definitions to per-loader transformers
pub struct TransformPipeline {
    registry: Arc<AdviceRegistry>,
    resolver: Arc<HierarchyResolver>,
    nesting: Arc<NestingRegistry>,
    transformers: DashMap<LoaderId, Arc<Transformer>>,
    bootstrap: OnceCell<Arc<Transformer>>,
    excluded_prefixes: Vec<String>,
    runtime_class: String,
    verify_output: bool,
    mode: AtomicU8,
    stats: WeavingStats,
}

impl TransformPipeline {
    /// Pipeline with default settings
    pub fn new(registry: AdviceRegistry, provider: Arc<dyn ClassBytesProvider>) -> Self {
        Self {
            registry: Arc::new(registry),
            resolver: Arc::new(HierarchyResolver::new(provider)),
            nesting: Arc::new(NestingRegistry::new()),
            transformers: DashMap::new(),
            bootstrap: OnceCell::new(),
            excluded_prefixes: vec!["weft.".to_string()],
            runtime_class: DEFAULT_RUNTIME_CLASS.to_string(),
            verify_output: true,
            mode: AtomicU8::new(WeavingMode::Enabled.to_u8()),
            stats: WeavingStats::new(),
        }
    }

    /// Pipeline built from a configuration
    pub fn from_config(config: &WeaverConfig, provider: Arc<dyn ClassBytesProvider>) -> Result<Self, ConfigError> {
        let registry = config.build_registry()?;
        let pipeline = Self::new(registry, provider)
            .with_excluded_prefixes(config.excluded_prefixes.clone())
            .with_runtime_class(&config.runtime_class)
            .with_verification(config.verify_output);
        pipeline.set_mode(config.mode);
        info!(
            advice = pipeline.registry.advice().len(),
            mixins = pipeline.registry.mixins().len(),
            mode = ?config.mode,
            "Weaver configured"
        );
        Ok(pipeline)
    }

    /// Replace the excluded class-name prefixes
    pub fn with_excluded_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.excluded_prefixes = prefixes;
        self
    }

    /// Set the dotted name of the nesting flag class
    pub fn with_runtime_class(mut self, runtime_class: &str) -> Self {
        self.runtime_class = runtime_class.to_string();
        self
    }

    /// Enable or disable structural verification of woven output
    pub fn with_verification(mut self, verify_output: bool) -> Self {
        self.verify_output = verify_output;
        self
    }

    /// Weave `bytes` if anything applies, otherwise return them unchanged
    ///
    /// `class_name` may be dotted or internal.
    pub fn transform<'a>(&self, loader: Option<LoaderId>, class_name: &str, bytes: &'a [u8]) -> Cow<'a, [u8]> {
        if self.mode() == WeavingMode::Disabled {
            return Cow::Borrowed(bytes);
        }
        let class_name = dotted(class_name);
        if self.is_excluded(&class_name) {
            return Cow::Borrowed(bytes);
        }

        let start = Instant::now();
        let transformer = self.transformer(loader);
        let result = catch_unwind(AssertUnwindSafe(|| transformer.transform(bytes)))
            .unwrap_or_else(|payload| Err(TransformError::Panic(panic_message(payload.as_ref()))));

        match result {
            Ok(Some(woven)) => {
                self.stats.record(Outcome::Woven, start.elapsed());
                self.stats.record_changes(woven.summary.methods, woven.summary.mixins);
                Cow::Owned(woven.bytes)
            }
            Ok(None) => {
                self.stats.record(Outcome::PassedThrough, start.elapsed());
                Cow::Borrowed(bytes)
            }
            Err(e) => {
                error!(
                    class = %class_name,
                    loader = %loader_label(loader),
                    error = %e,
                    "Failed to weave class, keeping original bytes"
                );
                self.stats.record(Outcome::Failed, start.elapsed());
                Cow::Borrowed(bytes)
            }
        }
    }

    fn is_excluded(&self, class_name: &str) -> bool {
        self.excluded_prefixes.iter().any(|p| class_name.starts_with(p.as_str()))
    }

    /// Transformer for `loader`, created on first use
    pub fn transformer(&self, loader: Option<LoaderId>) -> Arc<Transformer> {
        match loader {
            None => self.bootstrap.get_or_init(|| Arc::new(self.create_transformer(None))).clone(),
            Some(id) => self
                .transformers
                .entry(id)
                .or_insert_with(|| Arc::new(self.create_transformer(Some(id))))
                .clone(),
        }
    }

    fn create_transformer(&self, loader: Option<LoaderId>) -> Transformer {
        Transformer::new(
            loader,
            self.registry.clone(),
            self.resolver.clone(),
            self.nesting.clone(),
            &self.runtime_class,
        )
        .with_verification(self.verify_output)
    }

    /// Forget everything held for an unreachable loader
    pub fn loader_unloaded(&self, loader: LoaderId) {
        self.transformers.remove(&loader);
        self.resolver.evict_loader(loader);
        self.nesting.evict_loader(loader);
        info!(loader = %loader, "Released weaving state for loader");
    }

    /// Number of per-loader transformers (the bootstrap one excluded)
    pub fn transformer_count(&self) -> usize {
        self.transformers.len()
    }

    /// Shared hierarchy resolver
    pub fn resolver(&self) -> &HierarchyResolver {
        &self.resolver
    }

    /// Current mode
    pub fn mode(&self) -> WeavingMode {
        WeavingMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    /// Switch mode
    pub fn set_mode(&self, mode: WeavingMode) {
        self.mode.store(mode.to_u8(), Ordering::Release);
    }

    /// Resume weaving
    pub fn enable(&self) {
        self.set_mode(WeavingMode::Enabled);
    }

    /// Pass every class through
    pub fn disable(&self) {
        self.set_mode(WeavingMode::Disabled);
    }

    /// Counter snapshot
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
