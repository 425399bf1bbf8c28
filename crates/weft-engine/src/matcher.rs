//! Advice registry and matching
//!
//! Matching runs in two stages. The class-level stage, computed once per
//! woven class, keeps the advice whose class pattern matches the class or one
//! of its ancestors, and the mixins that apply. The method-level stage then
//! filters that plan per method.

use crate::advice::{Advice, Binding, Modifier, ParameterPattern};
use crate::mixin::Mixin;
use crate::types::{MethodDescriptor, TypeDescriptor};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use weft_bytecode::{access, FieldType};

/// An advice together with its position in the registry
#[derive(Debug, Clone)]
pub struct MatchedAdvice {
    /// Registry position, stable for the registry's lifetime
    pub id: usize,
    /// The advice
    pub advice: Arc<Advice>,
}

/// What applies to one class
#[derive(Debug, Clone, Default)]
pub struct ClassPlan {
    /// Advice matching at class level, in declaration order
    pub advice: Vec<MatchedAdvice>,
    /// Mixins to attach
    pub mixins: Vec<Arc<Mixin>>,
}

impl ClassPlan {
    /// Whether nothing applies
    pub fn is_empty(&self) -> bool {
        self.advice.is_empty() && self.mixins.is_empty()
    }

    /// Advice matching `method`, in declaration order
    pub fn advice_for(&self, method: &MethodDescriptor) -> Vec<MatchedAdvice> {
        self.advice
            .iter()
            .filter(|m| is_method_level_match(&m.advice, method))
            .cloned()
            .collect()
    }
}

/// All advice and mixins known to a pipeline
#[derive(Debug, Default)]
pub struct AdviceRegistry {
    advice: Vec<Arc<Advice>>,
    mixins: Vec<Arc<Mixin>>,
}

impl AdviceRegistry {
    /// Create a registry; declaration order is preserved
    pub fn new(advice: Vec<Advice>, mixins: Vec<Mixin>) -> Self {
        Self {
            advice: advice.into_iter().map(Arc::new).collect(),
            mixins: mixins.into_iter().map(Arc::new).collect(),
        }
    }

    /// Registered advice
    pub fn advice(&self) -> &[Arc<Advice>] {
        &self.advice
    }

    /// Registered mixins
    pub fn mixins(&self) -> &[Arc<Mixin>] {
        &self.mixins
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.advice.is_empty() && self.mixins.is_empty()
    }

    /// Compute the class-level plan
    ///
    /// Interfaces are never woven and always get an empty plan.
    pub fn plan(&self, class: &TypeDescriptor, hierarchy: &[Arc<TypeDescriptor>]) -> ClassPlan {
        if class.is_interface() {
            return ClassPlan::default();
        }
        let advice = self
            .advice
            .iter()
            .enumerate()
            .filter(|(_, a)| is_class_level_match(a, class, hierarchy))
            .map(|(id, a)| MatchedAdvice {
                id,
                advice: a.clone(),
            })
            .collect();
        let mixins = self
            .mixins
            .iter()
            .filter(|m| is_mixin_match(m, class, hierarchy))
            .cloned()
            .collect();
        ClassPlan { advice, mixins }
    }
}

/// Whether the advice's class pattern matches the class or any ancestor
pub fn is_class_level_match(advice: &Advice, class: &TypeDescriptor, hierarchy: &[Arc<TypeDescriptor>]) -> bool {
    let pattern = advice.class_pattern();
    pattern.matches(class.name()) || hierarchy.iter().any(|t| pattern.matches(t.name()))
}

/// Whether the advice applies to `method`
pub fn is_method_level_match(advice: &Advice, method: &MethodDescriptor) -> bool {
    let excluded = access::ABSTRACT | access::NATIVE | access::BRIDGE | access::SYNTHETIC;
    if method.modifiers() & excluded != 0 {
        return false;
    }
    if !advice.method_pattern().matches(method.name()) {
        return false;
    }
    if !arguments_match(advice.parameter_patterns(), method.argument_types()) {
        return false;
    }
    if let Some(pattern) = advice.return_pattern() {
        if !pattern.matches(method.return_type()) {
            return false;
        }
    }
    let modifiers_ok = advice.modifiers().iter().all(|m| match m {
        Modifier::Public => method.modifiers() & access::PUBLIC != 0,
        Modifier::Static => method.is_static(),
        Modifier::NotStatic => !method.is_static(),
    });
    modifiers_ok && bindings_compatible(advice, method)
}

fn arguments_match(patterns: &[ParameterPattern], arguments: &[String]) -> bool {
    for (i, pattern) in patterns.iter().enumerate() {
        match pattern {
            ParameterPattern::Rest => return true,
            ParameterPattern::Type(pattern) => match arguments.get(i) {
                Some(argument) if pattern.matches(argument) => {}
                _ => return false,
            },
        }
    }
    patterns.len() == arguments.len()
}

fn bindings_compatible(advice: &Advice, method: &MethodDescriptor) -> bool {
    for callback in advice.callbacks() {
        for parameter in &callback.parameters {
            let source = match parameter.binding {
                Binding::Receiver => {
                    if method.is_static() {
                        return false;
                    }
                    continue;
                }
                Binding::ReturnValue => {
                    if method.is_void() {
                        return false;
                    }
                    FieldType::from_java_name(method.return_type()).ok()
                }
                Binding::Argument(k) => match method.argument_types().get(k) {
                    Some(name) => FieldType::from_java_name(name).ok(),
                    None => return false,
                },
                // Reference sources, already checked at declaration
                _ => continue,
            };
            let Some(source) = source else {
                return false;
            };
            // Primitives are boxed into reference parameters, never converted
            if parameter.ty.is_primitive() && source != parameter.ty {
                return false;
            }
        }
    }
    true
}

/// Whether the mixin applies to `class`
///
/// The target must be the class or an ancestor, nothing in the hierarchy may
/// implement the mixin interface yet, and no superclass may itself match the
/// target (that superclass receives the mixin instead).
pub fn is_mixin_match(mixin: &Mixin, class: &TypeDescriptor, hierarchy: &[Arc<TypeDescriptor>]) -> bool {
    if class.is_interface() {
        return false;
    }
    let target = mixin.target();
    let hits_target = class.name() == target || hierarchy.iter().any(|t| t.name() == target);
    if !hits_target {
        return false;
    }

    let interface = mixin.interface();
    if class.name() == interface
        || class.interface_names().iter().any(|i| i == interface)
        || hierarchy.iter().any(|t| t.name() == interface)
    {
        return false;
    }

    let by_name: FxHashMap<&str, &TypeDescriptor> =
        hierarchy.iter().map(|t| (t.name(), t.as_ref())).collect();
    let superclasses = hierarchy.iter().filter(|t| !t.is_interface());
    for superclass in superclasses {
        let mut visited = FxHashSet::default();
        if reaches(superclass, target, &by_name, &mut visited) {
            return false;
        }
    }
    true
}

/// Whether `start` is `target` or reaches it through its interfaces
fn reaches<'a>(
    start: &'a TypeDescriptor,
    target: &str,
    by_name: &FxHashMap<&'a str, &'a TypeDescriptor>,
    visited: &mut FxHashSet<&'a str>,
) -> bool {
    if start.name() == target {
        return true;
    }
    if !visited.insert(start.name()) {
        return false;
    }
    start.interface_names().iter().any(|name| {
        name == target
            || by_name
                .get(name.as_str())
                .map(|t| reaches(*t, target, by_name, visited))
                .unwrap_or(false)
    })
}
