//! Wrapper IR
//!
//! The body of a wrapper method is described as a small tree of statements
//! before any bytecode is produced. Codegen lowers it to JVM instructions;
//! the simulator executes it directly.
//!
//! A wrapper has three phases, each a list of [`Step`]s:
//!
//! * `entry` runs before the original body, in declaration order
//! * `on_return` runs after a normal return, in reverse order
//! * `on_throw` runs after the original body threw, in reverse order
//!
//! Every step's `guarded` statements run under their own catch-all; the
//! first advice failure is recorded and thrown once all steps have run.
//! `finally` statements run regardless of failures.

use crate::advice::{Binding, Callback, CallbackRole};
use crate::error::{TransformError, TransformResult};
use crate::matcher::MatchedAdvice;
use weft_bytecode::{access, FieldType, MethodType};

/// Suffix appended to a method name to form its delegate
pub const DELEGATE_SUFFIX: &str = "$weft$original";

/// Name of the delegate holding the original body of `method_name`
pub fn delegate_name(method_name: &str) -> String {
    format!("{}{}", method_name, DELEGATE_SUFFIX)
}

/// Value passed to a callback parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// `this`
    Receiver,
    /// Method argument at this index
    Argument(usize),
    /// All arguments boxed into `Object[]`
    ArgumentArray,
    /// Method name as a string constant
    MethodName,
    /// Value returned by the original body
    ReturnValue,
    /// Throwable raised by the original body
    Thrown,
    /// Traveler of the advice at this position
    Traveler(usize),
}

/// A callback argument with the parameter type it is passed as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arg {
    /// Source value
    pub operand: Operand,
    /// Declared parameter type
    pub ty: FieldType,
}

/// A static callback invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdviceCall {
    /// Position of the advice in the method's advice list
    pub advice: usize,
    /// Role of the callback
    pub role: CallbackRole,
    /// Owner class, internal form
    pub owner: String,
    /// Static method name
    pub name: String,
    /// JVM descriptor
    pub descriptor: String,
    /// Arguments in order
    pub args: Vec<Arg>,
    /// Return type, `None` for void
    pub returns: Option<FieldType>,
}

/// Wrapper statements
///
/// `advice` is the index of the owning advice in the wrapper's advice list;
/// `slot` is that advice's nesting slot.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Stmt {
    /// `prior = enter(slot)`
    EnterNesting { advice: usize, slot: u32 },
    /// `if prior >= 0 { exit(slot, prior) }`
    ExitNesting { advice: usize, slot: u32 },
    /// `enabled = value`
    SetEnabled { advice: usize, value: bool },
    /// `enabled = call(...)`
    CheckEnabled { advice: usize, call: AdviceCall },
    /// `if enabled { body }`
    IfEnabled { advice: usize, body: Vec<Stmt> },
    /// `if prior == 0 { body }`
    IfNotNested { advice: usize, body: Vec<Stmt> },
    /// `if fail == null { body }`
    IfNoFailure { body: Vec<Stmt> },
    /// Invoke a callback, optionally keeping its result as the traveler
    Invoke { call: AdviceCall, store_traveler: bool },
}

/// One guarded unit of a phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Advice the step belongs to
    pub advice: usize,
    /// Statements run under a catch-all
    pub guarded: Vec<Stmt>,
    /// Statements run after `guarded`, whether or not it failed
    pub finally: Vec<Stmt>,
}

/// Complete description of one wrapper method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapIr {
    /// Declaring class, internal form
    pub owner: String,
    /// Method name
    pub method_name: String,
    /// Parameter and return types
    pub method_type: MethodType,
    /// Whether the method is static
    pub is_static: bool,
    /// Name of the delegate method
    pub delegate_name: String,
    /// Diagnostic names of the applied advice, in declaration order
    pub advice_names: Vec<String>,
    /// Traveler type per advice
    pub travelers: Vec<Option<FieldType>>,
    /// Nesting slot per advice that does not capture nested calls
    pub nesting_slots: Vec<Option<u32>>,
    /// Steps before the original body
    pub entry: Vec<Step>,
    /// Steps after a normal return
    pub on_return: Vec<Step>,
    /// Steps after the original body threw
    pub on_throw: Vec<Step>,
}

impl WrapIr {
    /// Number of advice applied
    pub fn advice_count(&self) -> usize {
        self.advice_names.len()
    }
}

/// Build the wrapper IR for one method
///
/// `nesting_slots` must hold one entry per advice: the slot for advice with
/// `capture_nested == false`, `None` otherwise.
pub fn build_wrap_ir(
    owner: &str,
    method_name: &str,
    descriptor: &str,
    access_flags: u16,
    advice: &[MatchedAdvice],
    nesting_slots: Vec<Option<u32>>,
) -> TransformResult<WrapIr> {
    let method_type = MethodType::parse(descriptor)?;
    let is_static = access_flags & access::STATIC != 0;
    let context = || format!("{}.{}{}", owner, method_name, descriptor);
    if nesting_slots.len() != advice.len() {
        return Err(TransformError::Unsupported {
            method: context(),
            reason: "nesting slot count does not match advice count".to_string(),
        });
    }

    let mut entry = Vec::new();
    let mut return_phases = Vec::with_capacity(advice.len());
    let mut throw_phases = Vec::with_capacity(advice.len());
    let mut travelers = Vec::with_capacity(advice.len());

    for (i, matched) in advice.iter().enumerate() {
        let decl = &matched.advice;
        let slot = nesting_slots[i];
        let call = |callback: &Callback| {
            lower_call(i, callback, &method_type, is_static).map_err(|reason| TransformError::Unsupported {
                method: context(),
                reason: format!("advice '{}': {}", decl.name(), reason),
            })
        };

        travelers.push(decl.traveler_type().cloned());

        let mut gated = Vec::new();
        match decl.callback(CallbackRole::IsEnabled) {
            Some(callback) => gated.push(Stmt::CheckEnabled {
                advice: i,
                call: call(callback)?,
            }),
            None => gated.push(Stmt::SetEnabled {
                advice: i,
                value: true,
            }),
        }
        if let Some(callback) = decl.callback(CallbackRole::OnBefore) {
            let call = call(callback)?;
            let store_traveler = call.returns.is_some();
            gated.push(Stmt::IfEnabled {
                advice: i,
                body: vec![Stmt::Invoke {
                    call,
                    store_traveler,
                }],
            });
        }
        let guarded = match slot {
            Some(slot) => vec![
                Stmt::EnterNesting { advice: i, slot },
                Stmt::IfNotNested {
                    advice: i,
                    body: gated,
                },
            ],
            None => gated,
        };
        entry.push(Step {
            advice: i,
            guarded,
            finally: Vec::new(),
        });

        let exit = slot
            .map(|slot| vec![Stmt::ExitNesting { advice: i, slot }])
            .unwrap_or_default();
        let after = decl.callback(CallbackRole::OnAfter).map(&call).transpose()?;
        for (role, phases) in [
            (CallbackRole::OnReturn, &mut return_phases),
            (CallbackRole::OnThrow, &mut throw_phases),
        ] {
            let mut phase = Vec::new();
            if let Some(callback) = decl.callback(role) {
                phase.push(Step {
                    advice: i,
                    guarded: vec![Stmt::IfNoFailure {
                        body: vec![Stmt::IfEnabled {
                            advice: i,
                            body: vec![Stmt::Invoke {
                                call: call(callback)?,
                                store_traveler: false,
                            }],
                        }],
                    }],
                    finally: Vec::new(),
                });
            }
            let after_step = Step {
                advice: i,
                guarded: after
                    .iter()
                    .map(|call| Stmt::IfEnabled {
                        advice: i,
                        body: vec![Stmt::Invoke {
                            call: call.clone(),
                            store_traveler: false,
                        }],
                    })
                    .collect(),
                finally: exit.clone(),
            };
            if !after_step.guarded.is_empty() || !after_step.finally.is_empty() {
                phase.push(after_step);
            }
            phases.push(phase);
        }
    }

    Ok(WrapIr {
        owner: owner.to_string(),
        method_name: method_name.to_string(),
        method_type,
        is_static,
        delegate_name: delegate_name(method_name),
        advice_names: advice.iter().map(|m| m.advice.name().to_string()).collect(),
        travelers,
        nesting_slots,
        entry,
        on_return: return_phases.into_iter().rev().flatten().collect(),
        on_throw: throw_phases.into_iter().rev().flatten().collect(),
    })
}

fn lower_call(
    advice: usize,
    callback: &Callback,
    method_type: &MethodType,
    is_static: bool,
) -> Result<AdviceCall, String> {
    let mut args = Vec::with_capacity(callback.parameters.len());
    for parameter in &callback.parameters {
        let operand = match parameter.binding {
            Binding::Receiver if is_static => {
                return Err("receiver bound in a static method".to_string());
            }
            Binding::Receiver => Operand::Receiver,
            Binding::Argument(k) if k >= method_type.parameters.len() => {
                return Err(format!("argument {} out of range", k));
            }
            Binding::Argument(k) => Operand::Argument(k),
            Binding::ArgumentArray => Operand::ArgumentArray,
            Binding::MethodName => Operand::MethodName,
            Binding::ReturnValue if method_type.return_type.is_none() => {
                return Err("return value bound in a void method".to_string());
            }
            Binding::ReturnValue => Operand::ReturnValue,
            Binding::Thrown => Operand::Thrown,
            Binding::Traveler => Operand::Traveler(advice),
        };
        args.push(Arg {
            operand,
            ty: parameter.ty.clone(),
        });
    }
    Ok(AdviceCall {
        advice,
        role: callback.role,
        owner: callback.owner.clone(),
        name: callback.name.clone(),
        descriptor: callback.descriptor(),
        args,
        returns: callback.return_type.clone(),
    })
}

/// Static type of an operand within `ir`
pub fn operand_type(ir: &WrapIr, operand: Operand) -> FieldType {
    match operand {
        Operand::Receiver => FieldType::class(ir.owner.clone()),
        Operand::Argument(k) => ir.method_type.parameters[k].clone(),
        Operand::ArgumentArray => FieldType::Array(Box::new(FieldType::object())),
        Operand::MethodName => FieldType::class("java/lang/String"),
        Operand::ReturnValue => ir
            .method_type
            .return_type
            .clone()
            .unwrap_or_else(FieldType::object),
        Operand::Thrown => FieldType::class("java/lang/Throwable"),
        Operand::Traveler(i) => ir.travelers[i].clone().unwrap_or_else(FieldType::object),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::{AdviceSpec, BindingKind, CallbackSpec};
    use std::sync::Arc;

    fn matched(id: usize, spec: AdviceSpec) -> MatchedAdvice {
        MatchedAdvice {
            id,
            advice: Arc::new(spec.build().unwrap()),
        }
    }

    fn full(name: &str) -> AdviceSpec {
        AdviceSpec::new("*", "*")
            .named(name)
            .callback(CallbackSpec::new(CallbackRole::OnBefore, "demo.Probe", "before").returns("long"))
            .callback(
                CallbackSpec::new(CallbackRole::OnReturn, "demo.Probe", "ret")
                    .param(BindingKind::ReturnValue, "java.lang.Object")
                    .param(BindingKind::Traveler, "long"),
            )
            .callback(
                CallbackSpec::new(CallbackRole::OnThrow, "demo.Probe", "thrown")
                    .param(BindingKind::Thrown, "java.lang.Throwable"),
            )
            .callback(CallbackSpec::new(CallbackRole::OnAfter, "demo.Probe", "after"))
    }

    #[test]
    fn test_phase_order() {
        let advice = vec![matched(0, full("a")), matched(1, full("b"))];
        let ir = build_wrap_ir("demo/C", "size", "()I", access::PUBLIC, &advice, vec![None, None]).unwrap();

        let owners = |steps: &[Step]| steps.iter().map(|s| s.advice).collect::<Vec<_>>();
        assert_eq!(owners(&ir.entry), vec![0, 1]);
        assert_eq!(owners(&ir.on_return), vec![1, 1, 0, 0]);
        assert_eq!(owners(&ir.on_throw), vec![1, 1, 0, 0]);
        assert_eq!(ir.delegate_name, "size$weft$original");
        assert_eq!(ir.travelers, vec![Some(FieldType::Long), Some(FieldType::Long)]);
    }

    #[test]
    fn test_nesting_wraps_entry_and_restores_in_finally() {
        let advice = vec![matched(0, full("a").capture_nested(false))];
        let ir = build_wrap_ir("demo/C", "run", "()V", 0, &advice, vec![Some(7)]).unwrap();

        assert!(matches!(ir.entry[0].guarded[0], Stmt::EnterNesting { slot: 7, .. }));
        assert!(matches!(ir.entry[0].guarded[1], Stmt::IfNotNested { .. }));
        let last = ir.on_throw.last().unwrap();
        assert_eq!(last.finally, vec![Stmt::ExitNesting { advice: 0, slot: 7 }]);
    }

    #[test]
    fn test_operand_lowering() {
        let spec = AdviceSpec::new("*", "*").callback(
            CallbackSpec::new(CallbackRole::OnBefore, "demo.Probe", "before")
                .param(BindingKind::Receiver, "java.lang.Object")
                .param(BindingKind::Argument, "java.lang.Object")
                .param(BindingKind::Argument, "int")
                .param(BindingKind::MethodName, "java.lang.String"),
        );
        let ir = build_wrap_ir("demo/C", "put", "(JI)V", 0, &[matched(0, spec)], vec![None]).unwrap();
        let Stmt::IfEnabled { body, .. } = &ir.entry[0].guarded[1] else {
            panic!("expected on_before under the enabled check");
        };
        let Stmt::Invoke { call, store_traveler } = &body[0] else {
            panic!("expected an invocation");
        };
        assert!(!store_traveler);
        let operands: Vec<Operand> = call.args.iter().map(|a| a.operand).collect();
        assert_eq!(
            operands,
            vec![Operand::Receiver, Operand::Argument(0), Operand::Argument(1), Operand::MethodName]
        );
        assert_eq!(call.descriptor, "(Ljava/lang/Object;Ljava/lang/Object;ILjava/lang/String;)V");
        assert_eq!(operand_type(&ir, Operand::Argument(0)), FieldType::Long);
    }

    #[test]
    fn test_receiver_in_static_method_is_rejected() {
        let spec = AdviceSpec::new("*", "*").callback(
            CallbackSpec::new(CallbackRole::OnBefore, "demo.Probe", "before")
                .param(BindingKind::Receiver, "java.lang.Object"),
        );
        let result = build_wrap_ir("demo/C", "run", "()V", access::STATIC, &[matched(0, spec)], vec![None]);
        assert!(matches!(result, Err(TransformError::Unsupported { .. })));
    }
}
