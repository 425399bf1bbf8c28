//! Executable model of a wrapper
//!
//! [`run`] interprets a [`WrapIr`] the way the generated bytecode behaves:
//! same step order, same guards, same failure bookkeeping and the same
//! thread-local nesting flags (see [`crate::nesting`]). Callbacks are
//! dispatched to an [`AdviceRuntime`]; the original body is a closure that
//! may call back into [`run`] to model recursion.
//!
//! Boxing and casts are transparent here: values pass through unchanged.

use super::ir::{AdviceCall, Operand, Step, Stmt, WrapIr};
use crate::nesting;
use std::fmt;
use std::sync::Arc;

/// A heap object; throwables are heap objects too
#[derive(Debug, PartialEq)]
pub struct HeapObject {
    /// Runtime class, dotted
    pub class_name: String,
    /// Detail message for throwables
    pub message: Option<String>,
}

impl HeapObject {
    /// A plain object
    pub fn new(class_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            class_name: class_name.into(),
            message: None,
        })
    }

    /// A throwable with a message
    pub fn throwable(class_name: impl Into<String>, message: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            class_name: class_name.into(),
            message: Some(message.into()),
        })
    }
}

/// A thrown throwable; identity is the `Arc` pointer
pub type Thrown = Arc<HeapObject>;

/// A runtime value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// No value (void return)
    Void,
    /// `null`
    Null,
    /// `boolean`
    Boolean(bool),
    /// `int` and smaller integral types
    Int(i32),
    /// `long`
    Long(i64),
    /// `float`
    Float(f32),
    /// `double`
    Double(f64),
    /// `java.lang.String`
    Str(String),
    /// Any other object
    Object(Arc<HeapObject>),
    /// `Object[]`
    Array(Vec<Value>),
}

impl Value {
    fn is_true(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Int(i) => *i != 0,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => f.write_str("void"),
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Long(l) => write!(f, "{}L", l),
            Value::Float(x) => write!(f, "{}f", x),
            Value::Double(x) => write!(f, "{}d", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Object(o) => write!(f, "{}@{:p}", o.class_name, Arc::as_ptr(o)),
            Value::Array(items) => write!(f, "Object[{}]", items.len()),
        }
    }
}

/// Dispatches callback invocations
pub trait AdviceRuntime {
    /// Invoke the static callback described by `call`
    fn invoke(&mut self, call: &AdviceCall, args: Vec<Value>) -> Result<Value, Thrown>;
}

/// Receiver and arguments of one call to the woven method
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    /// `this`, absent for static methods
    pub receiver: Option<Value>,
    /// Arguments in order
    pub arguments: Vec<Value>,
}

impl Invocation {
    /// Invocation of an instance method
    pub fn instance(receiver: Value, arguments: Vec<Value>) -> Self {
        Self {
            receiver: Some(receiver),
            arguments,
        }
    }

    /// Invocation of a static method
    pub fn static_call(arguments: Vec<Value>) -> Self {
        Self {
            receiver: None,
            arguments,
        }
    }
}

/// The original body: receives the runtime so it can re-enter woven code
pub type Body<'b, R> = dyn FnMut(&mut R, &Invocation) -> Result<Value, Thrown> + 'b;

struct Locals {
    result: Value,
    exc: Option<Thrown>,
    fail: Option<Thrown>,
    enabled: Vec<bool>,
    prior: Vec<i32>,
    traveler: Vec<Value>,
}

impl Locals {
    fn record(&mut self, failure: Thrown) {
        if self.fail.is_none() {
            self.fail = Some(failure);
        }
    }
}

/// Run the wrapper described by `ir`
pub fn run<R: AdviceRuntime>(
    ir: &WrapIr,
    runtime: &mut R,
    invocation: &Invocation,
    body: &mut Body<'_, R>,
) -> Result<Value, Thrown> {
    let count = ir.advice_count();
    let mut locals = Locals {
        result: Value::Void,
        exc: None,
        fail: None,
        enabled: vec![false; count],
        prior: vec![-1; count],
        traveler: vec![Value::Null; count],
    };
    let mut ctx = Context {
        ir,
        invocation,
        locals: &mut locals,
    };

    let mut entered = true;
    for step in &ir.entry {
        if let Err(failure) = ctx.exec_all(runtime, &step.guarded) {
            ctx.locals.record(failure);
            ctx.locals.enabled[step.advice] = false;
            entered = false;
            break;
        }
    }

    if entered {
        match body(runtime, invocation) {
            Ok(value) => ctx.locals.result = value,
            Err(thrown) => {
                ctx.locals.exc = Some(thrown);
                ctx.unwind(runtime, &ir.on_throw);
                if let Some(fail) = ctx.locals.fail.take() {
                    return Err(fail);
                }
                return Err(ctx.locals.exc.take().unwrap_or_else(|| HeapObject::new("java.lang.Throwable")));
            }
        }
    }

    ctx.unwind(runtime, &ir.on_return);
    match ctx.locals.fail.take() {
        Some(fail) => Err(fail),
        None => Ok(std::mem::replace(&mut ctx.locals.result, Value::Void)),
    }
}

struct Context<'c> {
    ir: &'c WrapIr,
    invocation: &'c Invocation,
    locals: &'c mut Locals,
}

impl Context<'_> {
    fn unwind<R: AdviceRuntime>(&mut self, runtime: &mut R, steps: &[Step]) {
        for step in steps {
            if let Err(failure) = self.exec_all(runtime, &step.guarded) {
                self.locals.record(failure);
            }
            // The only finally statement is a flag restore, which cannot fail
            let _ = self.exec_all(runtime, &step.finally);
        }
    }

    fn exec_all<R: AdviceRuntime>(&mut self, runtime: &mut R, stmts: &[Stmt]) -> Result<(), Thrown> {
        for stmt in stmts {
            self.exec(runtime, stmt)?;
        }
        Ok(())
    }

    fn exec<R: AdviceRuntime>(&mut self, runtime: &mut R, stmt: &Stmt) -> Result<(), Thrown> {
        match stmt {
            Stmt::EnterNesting { advice, slot } => {
                self.locals.prior[*advice] = nesting::enter(*slot);
            }
            Stmt::ExitNesting { advice, slot } => {
                let prior = self.locals.prior[*advice];
                if prior >= 0 {
                    nesting::exit(*slot, prior);
                }
            }
            Stmt::SetEnabled { advice, value } => {
                self.locals.enabled[*advice] = *value;
            }
            Stmt::CheckEnabled { advice, call } => {
                let value = self.call(runtime, call)?;
                self.locals.enabled[*advice] = value.is_true();
            }
            Stmt::IfEnabled { advice, body } => {
                if self.locals.enabled[*advice] {
                    self.exec_all(runtime, body)?;
                }
            }
            Stmt::IfNotNested { advice, body } => {
                if self.locals.prior[*advice] == 0 {
                    self.exec_all(runtime, body)?;
                }
            }
            Stmt::IfNoFailure { body } => {
                if self.locals.fail.is_none() {
                    self.exec_all(runtime, body)?;
                }
            }
            Stmt::Invoke {
                call,
                store_traveler,
            } => {
                let value = self.call(runtime, call)?;
                if *store_traveler {
                    self.locals.traveler[call.advice] = value;
                }
            }
        }
        Ok(())
    }

    fn call<R: AdviceRuntime>(&self, runtime: &mut R, call: &AdviceCall) -> Result<Value, Thrown> {
        let args = call.args.iter().map(|arg| self.operand(arg.operand)).collect();
        runtime.invoke(call, args)
    }

    fn operand(&self, operand: Operand) -> Value {
        let arguments = &self.invocation.arguments;
        match operand {
            Operand::Receiver => self.invocation.receiver.clone().unwrap_or(Value::Null),
            Operand::Argument(k) => arguments.get(k).cloned().unwrap_or(Value::Null),
            Operand::ArgumentArray => Value::Array(arguments.clone()),
            Operand::MethodName => Value::Str(self.ir.method_name.clone()),
            Operand::ReturnValue => self.locals.result.clone(),
            Operand::Thrown => self
                .locals
                .exc
                .clone()
                .map(Value::Object)
                .unwrap_or(Value::Null),
            Operand::Traveler(i) => self.locals.traveler[i].clone(),
        }
    }
}
