//! Weaving one class file
//!
//! Each advised method is split in two. The original declaration keeps its
//! name, descriptor, access flags (minus `synchronized`) and every attribute
//! except `Code`, which is replaced by a generated wrapper. The original
//! `Code` attribute moves, untouched, to a private synthetic delegate that
//! the wrapper invokes.

use super::codegen::generate_wrapper;
use super::ir::{build_wrap_ir, delegate_name};
use super::mixin::apply_mixins;
use crate::error::TransformResult;
use crate::hierarchy::HierarchyResolver;
use crate::matcher::ClassPlan;
use crate::nesting::NestingRegistry;
use crate::types::{dotted, LoaderId, MethodDescriptor};
use tracing::{debug, warn};
use weft_bytecode::{access, attr, ClassFile, MemberInfo};

/// Shared state a class is woven against
pub struct WeaveContext<'a> {
    /// Loader defining the class
    pub loader: Option<LoaderId>,
    /// Resolver for mixin interfaces
    pub resolver: &'a HierarchyResolver,
    /// Nesting slot allocator
    pub nesting: &'a NestingRegistry,
    /// Internal name of the nesting runtime class
    pub runtime_class: &'a str,
}

/// What weaving changed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WeaveSummary {
    /// Methods wrapped
    pub methods: usize,
    /// Mixins attached
    pub mixins: usize,
}

impl WeaveSummary {
    /// Whether the class was left as is
    pub fn is_empty(&self) -> bool {
        self.methods == 0 && self.mixins == 0
    }
}

/// Apply `plan` to `class` in place
pub fn weave_class(class: &mut ClassFile, plan: &ClassPlan, ctx: &WeaveContext<'_>) -> TransformResult<WeaveSummary> {
    let mut summary = WeaveSummary::default();
    // Forwarders added by mixins are not advised
    let original_methods = class.methods.len();

    if !plan.mixins.is_empty() {
        summary.mixins = apply_mixins(class, &plan.mixins, ctx.resolver, ctx.loader)?;
    }
    if plan.advice.is_empty() {
        return Ok(summary);
    }

    let owner = class.name()?.to_string();
    let class_name = dotted(&owner);
    let with_frames = class.requires_stack_maps();

    for index in 0..original_methods {
        let pool = &class.constant_pool;
        let method = &class.methods[index];
        let name = method.name(pool)?.to_string();
        let descriptor = method.descriptor(pool)?.to_string();
        let flags = method.access_flags;

        let matched = plan.advice_for(&MethodDescriptor::from_jvm(&name, &descriptor, flags)?);
        if matched.is_empty() {
            continue;
        }
        if name == "<init>" || name == "<clinit>" {
            debug!(class = %class_name, method = %name, "Skipping initializer");
            continue;
        }
        let Some(code_index) = method.attribute_position(pool, attr::CODE) else {
            continue;
        };
        let delegate = delegate_name(&name);
        if class.find_method(&delegate, &descriptor).is_some() {
            warn!(class = %class_name, method = %name, "Delegate name already taken, not weaving method");
            continue;
        }

        let slots = matched
            .iter()
            .map(|m| {
                (!m.advice.capture_nested()).then(|| ctx.nesting.slot(ctx.loader, &class_name, m.id))
            })
            .collect();
        let ir = build_wrap_ir(&owner, &name, &descriptor, flags, &matched, slots)?;
        let wrapper = generate_wrapper(&ir, &mut class.constant_pool, ctx.runtime_class, with_frames)?;

        let original_code = class.methods[index].attributes.remove(code_index);
        let keep = flags & (access::STATIC | access::SYNCHRONIZED | access::STRICT | access::VARARGS);
        let delegate_method = MemberInfo {
            access_flags: keep | access::PRIVATE | access::SYNTHETIC,
            name_index: class.constant_pool.add_utf8(&delegate),
            descriptor_index: class.methods[index].descriptor_index,
            attributes: vec![original_code],
        };

        let method = &mut class.methods[index];
        method.access_flags &= !access::SYNCHRONIZED;
        method.set_code(&mut class.constant_pool, &wrapper)?;
        class.methods.push(delegate_method);

        debug!(
            class = %class_name,
            method = %name,
            advice = ?ir.advice_names,
            "Wrapped method"
        );
        summary.methods += 1;
    }
    Ok(summary)
}
