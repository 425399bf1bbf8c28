//! Per-loader class transformer

use crate::error::TransformResult;
use crate::hierarchy::HierarchyResolver;
use crate::matcher::AdviceRegistry;
use crate::nesting::NestingRegistry;
use crate::types::{internal, loader_label, LoaderId, TypeDescriptor};
use crate::weave::{weave_class, WeaveContext, WeaveSummary};
use std::sync::Arc;
use tracing::debug;
use weft_bytecode::{verify_class, ClassFile};

/// Output of a successful weave
#[derive(Debug, Clone)]
pub struct Woven {
    /// Re-encoded class bytes
    pub bytes: Vec<u8>,
    /// What changed
    pub summary: WeaveSummary,
}

/// Weaves classes defined through one loader
pub struct Transformer {
    loader: Option<LoaderId>,
    registry: Arc<AdviceRegistry>,
    resolver: Arc<HierarchyResolver>,
    nesting: Arc<NestingRegistry>,
    runtime_class: String,
    verify_output: bool,
}

impl Transformer {
    /// Create a transformer for `loader`
    ///
    /// `runtime_class` is the dotted name of the nesting flag class.
    pub fn new(
        loader: Option<LoaderId>,
        registry: Arc<AdviceRegistry>,
        resolver: Arc<HierarchyResolver>,
        nesting: Arc<NestingRegistry>,
        runtime_class: &str,
    ) -> Self {
        Self {
            loader,
            registry,
            resolver,
            nesting,
            runtime_class: internal(runtime_class),
            verify_output: true,
        }
    }

    /// Enable or disable structural verification of woven output
    pub fn with_verification(mut self, verify_output: bool) -> Self {
        self.verify_output = verify_output;
        self
    }

    /// Loader this transformer serves
    pub fn loader(&self) -> Option<LoaderId> {
        self.loader
    }

    /// Weave `bytes`, or return `None` when nothing applies
    pub fn transform(&self, bytes: &[u8]) -> TransformResult<Option<Woven>> {
        if self.registry.is_empty() {
            return Ok(None);
        }
        let mut class = ClassFile::decode(bytes)?;
        if class.is_interface() {
            return Ok(None);
        }

        let descriptor = Arc::new(TypeDescriptor::from_class_file(&class)?);
        self.resolver.register(self.loader, descriptor.clone());
        let hierarchy = self.resolver.get_hierarchy(descriptor.name(), self.loader);
        let plan = self.registry.plan(&descriptor, &hierarchy);
        if plan.is_empty() {
            return Ok(None);
        }

        let ctx = WeaveContext {
            loader: self.loader,
            resolver: &self.resolver,
            nesting: &self.nesting,
            runtime_class: &self.runtime_class,
        };
        let summary = weave_class(&mut class, &plan, &ctx)?;
        if summary.is_empty() {
            return Ok(None);
        }
        if self.verify_output {
            verify_class(&class)?;
        }

        debug!(
            class = descriptor.name(),
            loader = %loader_label(self.loader),
            methods = summary.methods,
            mixins = summary.mixins,
            "Woven class"
        );
        Ok(Some(Woven {
            bytes: class.encode()?,
            summary,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::{AdviceSpec, CallbackRole, CallbackSpec};
    use crate::hierarchy::NoClassBytes;
    use crate::nesting::DEFAULT_RUNTIME_CLASS;
    use weft_bytecode::{access, op, CodeAttribute};

    fn transformer(advice: Vec<AdviceSpec>) -> Transformer {
        let advice = advice.into_iter().map(|a| a.build().unwrap()).collect();
        Transformer::new(
            Some(LoaderId(1)),
            Arc::new(AdviceRegistry::new(advice, vec![])),
            Arc::new(HierarchyResolver::new(Arc::new(NoClassBytes))),
            Arc::new(NestingRegistry::new()),
            DEFAULT_RUNTIME_CLASS,
        )
    }

    fn class_bytes(flags: u16) -> Vec<u8> {
        let mut class = ClassFile::new("demo/Service", Some("java/lang/Object"));
        class.access_flags = flags;
        let code = CodeAttribute::new(1, 1, vec![op::ICONST_1, op::IRETURN]);
        class.add_method(access::PUBLIC, "ready", "()Z", Some(&code)).unwrap();
        class.encode().unwrap()
    }

    fn probe() -> AdviceSpec {
        AdviceSpec::new("demo.Service", "ready")
            .capture_nested(false)
            .callback(CallbackSpec::new(CallbackRole::OnAfter, "demo.Probe", "after"))
    }

    #[test]
    fn test_transform_matching_class() {
        let transformer = transformer(vec![probe()]);
        let woven = transformer.transform(&class_bytes(access::PUBLIC | access::SUPER)).unwrap().unwrap();
        assert_eq!(woven.summary.methods, 1);

        let class = ClassFile::decode(&woven.bytes).unwrap();
        assert!(class.find_method("ready$weft$original", "()Z").is_some());
        assert_eq!(transformer.nesting.len(), 1);
        // The class itself plus the unresolvable java.lang.Object sentinel
        assert_eq!(transformer.resolver.len(), 2);
    }

    #[test]
    fn test_interfaces_pass_through() {
        let transformer = transformer(vec![probe()]);
        let bytes = class_bytes(access::PUBLIC | access::INTERFACE | access::ABSTRACT);
        assert!(transformer.transform(&bytes).unwrap().is_none());
    }

    #[test]
    fn test_unmatched_class_passes_through() {
        let transformer = transformer(vec![AdviceSpec::new("demo.Other", "*")]);
        assert!(transformer.transform(&class_bytes(access::PUBLIC)).unwrap().is_none());
    }

    #[test]
    fn test_garbage_is_an_error() {
        let transformer = transformer(vec![probe()]);
        assert!(transformer.transform(&[0xCA, 0xFE]).is_err());
    }
}
