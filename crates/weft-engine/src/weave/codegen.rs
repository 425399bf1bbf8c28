//! Wrapper IR to JVM bytecode
//!
//! The wrapper's locals are all initialized in a fixed prologue, so every
//! frame has the same locals and only the operand stack differs: empty at
//! branch targets, a single throwable at handlers. Each branch target and
//! handler gets a full frame.
//!
//! Local layout: receiver and parameters, then `result` (non-void methods
//! only), `exc`, `fail`, then per advice `enabled`, `prior` (advice with a
//! nesting slot) and `traveler` (advice whose `on_before` returns a value).

use super::ir::{operand_type, AdviceCall, Operand, Step, Stmt, WrapIr};
use crate::error::{TransformError, TransformResult};
use crate::nesting::{ENTER_DESCRIPTOR, ENTER_METHOD, EXIT_DESCRIPTOR, EXIT_METHOD};
use std::collections::BTreeMap;
use weft_bytecode::{
    attr, op, Attribute, ByteWriter, CodeAttribute, ConstantPool, ExceptionHandler, FieldType,
    StackMapTable, VerificationType,
};

/// Index of a code position that is not known yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Label(usize);

/// Operand stack at a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StackShape {
    Empty,
    Throwable,
}

#[derive(Debug, Default)]
struct Locals {
    result: Option<u16>,
    exc: u16,
    fail: u16,
    enabled: Vec<u16>,
    prior: Vec<Option<u16>>,
    traveler: Vec<Option<u16>>,
    count: u16,
}

/// Generate the body of the wrapper described by `ir`
///
/// `runtime_class` is the internal name of the class holding the nesting
/// flags. Frames are emitted when `with_frames` is set.
pub fn generate_wrapper(
    ir: &WrapIr,
    pool: &mut ConstantPool,
    runtime_class: &str,
    with_frames: bool,
) -> TransformResult<CodeAttribute> {
    let mut generator = WrapperGenerator::new(ir, pool, runtime_class)?;
    generator.generate()?;
    generator.finish(with_frames)
}

struct WrapperGenerator<'a> {
    ir: &'a WrapIr,
    pool: &'a mut ConstantPool,
    runtime_class: &'a str,
    writer: ByteWriter,
    locals: Locals,
    frame_locals: Vec<VerificationType>,
    throwable: VerificationType,
    /// Bound label positions
    label_positions: Vec<Option<usize>>,
    /// Branches to patch: (instruction position, target)
    pending_jumps: Vec<(usize, Label)>,
    /// Protected ranges: (start, end, handler)
    handlers: Vec<(usize, usize, Label)>,
    frames: BTreeMap<usize, StackShape>,
    max_stack: u16,
}

impl<'a> WrapperGenerator<'a> {
    fn new(ir: &'a WrapIr, pool: &'a mut ConstantPool, runtime_class: &'a str) -> TransformResult<Self> {
        let mut locals = Locals::default();
        let mut frame_locals = Vec::new();
        let mut next: u32 = 0;
        let mut allocate = |size: u16| {
            let slot = next;
            next += size as u32;
            slot
        };

        if !ir.is_static {
            allocate(1);
            frame_locals.push(VerificationType::Object(pool.add_class(&ir.owner)));
        }
        for parameter in &ir.method_type.parameters {
            allocate(parameter.slot_size());
            frame_locals.push(verification_type(pool, parameter));
        }
        if let Some(ty) = &ir.method_type.return_type {
            locals.result = Some(allocate(ty.slot_size()) as u16);
            frame_locals.push(verification_type(pool, ty));
        }
        let throwable = VerificationType::Object(pool.add_class("java/lang/Throwable"));
        locals.exc = allocate(1) as u16;
        frame_locals.push(throwable.clone());
        locals.fail = allocate(1) as u16;
        frame_locals.push(throwable.clone());

        for i in 0..ir.advice_count() {
            locals.enabled.push(allocate(1) as u16);
            frame_locals.push(VerificationType::Integer);
            let prior = ir.nesting_slots.get(i).copied().flatten().map(|_| {
                frame_locals.push(VerificationType::Integer);
                allocate(1) as u16
            });
            locals.prior.push(prior);
            let traveler = ir.travelers.get(i).cloned().flatten().map(|ty| {
                frame_locals.push(verification_type(pool, &ty));
                allocate(ty.slot_size()) as u16
            });
            locals.traveler.push(traveler);
        }

        locals.count = u16::try_from(next).map_err(|_| unsupported(ir, "too many locals"))?;
        Ok(Self {
            ir,
            pool,
            runtime_class,
            writer: ByteWriter::new(),
            locals,
            frame_locals,
            throwable,
            label_positions: Vec::new(),
            pending_jumps: Vec::new(),
            handlers: Vec::new(),
            frames: BTreeMap::new(),
            max_stack: 2,
        })
    }

    fn generate(&mut self) -> TransformResult<()> {
        let ir = self.ir;
        self.emit_prologue();

        let unwind = self.new_label();
        for step in &ir.entry {
            let next = self.new_label();
            let failed = self.new_label();
            self.emit_guarded(&step.guarded, next, failed)?;
            self.bind(failed, StackShape::Empty)?;
            self.push_int(0);
            self.store(&FieldType::Int, self.locals.enabled[step.advice]);
            self.jump(op::GOTO, unwind);
            self.bind(next, StackShape::Empty)?;
        }

        let body_start = self.position();
        self.emit_delegate_call();
        let body_end = self.position();
        let throw_handler = self.new_label();
        self.handlers.push((body_start, body_end, throw_handler));

        // Normal return
        self.bind(unwind, StackShape::Empty)?;
        for step in &ir.on_return {
            self.emit_unwind_step(step)?;
        }
        let ret = self.new_label();
        self.emit_throw_failure(ret);
        self.bind(ret, StackShape::Empty)?;
        match (&ir.method_type.return_type, self.locals.result) {
            (Some(ty), Some(slot)) => {
                self.load(ty, slot);
                self.emit(return_opcode(Some(ty)));
            }
            _ => self.emit(return_opcode(None)),
        }

        // Original body threw
        self.bind(throw_handler, StackShape::Throwable)?;
        self.store(&FieldType::object(), self.locals.exc);
        for step in &ir.on_throw {
            self.emit_unwind_step(step)?;
        }
        let rethrow = self.new_label();
        self.emit_throw_failure(rethrow);
        self.bind(rethrow, StackShape::Empty)?;
        self.load(&FieldType::object(), self.locals.exc);
        self.emit(op::ATHROW);
        Ok(())
    }

    fn emit_prologue(&mut self) {
        let ir = self.ir;
        if let (Some(ty), Some(slot)) = (&ir.method_type.return_type, self.locals.result) {
            self.push_default(ty);
            self.store(ty, slot);
        }
        for slot in [self.locals.exc, self.locals.fail] {
            self.emit(op::ACONST_NULL);
            self.store(&FieldType::object(), slot);
        }
        for i in 0..ir.advice_count() {
            self.push_int(0);
            self.store(&FieldType::Int, self.locals.enabled[i]);
            if let Some(slot) = self.locals.prior[i] {
                self.push_int(-1);
                self.store(&FieldType::Int, slot);
            }
            if let (Some(ty), Some(slot)) = (&ir.travelers[i], self.locals.traveler[i]) {
                self.push_default(ty);
                self.store(ty, slot);
            }
        }
    }

    /// `if (fail != null) throw fail;`
    fn emit_throw_failure(&mut self, otherwise: Label) {
        self.load(&FieldType::object(), self.locals.fail);
        self.jump(op::IFNULL, otherwise);
        self.load(&FieldType::object(), self.locals.fail);
        self.emit(op::ATHROW);
    }

    /// Emit `guarded` under a catch-all that keeps the first failure
    ///
    /// Control continues at `done` on success and at `failed` once a failure
    /// has been recorded. Neither label is bound here.
    fn emit_guarded(&mut self, guarded: &[Stmt], done: Label, failed: Label) -> TransformResult<()> {
        let start = self.position();
        self.emit_stmts(guarded)?;
        let end = self.position();
        self.jump(op::GOTO, done);
        if start == end {
            return Ok(());
        }

        let handler = self.new_label();
        self.handlers.push((start, end, handler));
        self.bind(handler, StackShape::Throwable)?;
        let keep_first = self.new_label();
        self.load(&FieldType::object(), self.locals.fail);
        self.jump(op::IFNONNULL, keep_first);
        self.store(&FieldType::object(), self.locals.fail);
        self.jump(op::GOTO, failed);
        self.bind(keep_first, StackShape::Throwable)?;
        self.emit(op::POP);
        self.jump(op::GOTO, failed);
        Ok(())
    }

    fn emit_unwind_step(&mut self, step: &Step) -> TransformResult<()> {
        if !step.guarded.is_empty() {
            let finally = self.new_label();
            self.emit_guarded(&step.guarded, finally, finally)?;
            self.bind(finally, StackShape::Empty)?;
        }
        self.emit_stmts(&step.finally)
    }

    fn emit_stmts(&mut self, stmts: &[Stmt]) -> TransformResult<()> {
        for stmt in stmts {
            self.emit_stmt(stmt)?;
        }
        Ok(())
    }

    fn emit_stmt(&mut self, stmt: &Stmt) -> TransformResult<()> {
        match stmt {
            Stmt::EnterNesting { advice, slot } => {
                let prior = self.prior_slot(*advice)?;
                self.push_slot_id(*slot)?;
                let runtime = self.runtime_class;
                self.invoke_static(runtime, ENTER_METHOD, ENTER_DESCRIPTOR);
                self.store(&FieldType::Int, prior);
            }
            Stmt::ExitNesting { advice, slot } => {
                let prior = self.prior_slot(*advice)?;
                let skip = self.new_label();
                self.load(&FieldType::Int, prior);
                self.jump(op::IFLT, skip);
                self.push_slot_id(*slot)?;
                self.load(&FieldType::Int, prior);
                let runtime = self.runtime_class;
                self.invoke_static(runtime, EXIT_METHOD, EXIT_DESCRIPTOR);
                self.bind(skip, StackShape::Empty)?;
            }
            Stmt::SetEnabled { advice, value } => {
                self.push_int(*value as i32);
                self.store(&FieldType::Int, self.locals.enabled[*advice]);
            }
            Stmt::CheckEnabled { advice, call } => {
                self.emit_call(call)?;
                self.store(&FieldType::Int, self.locals.enabled[*advice]);
            }
            Stmt::IfEnabled { advice, body } => {
                let skip = self.new_label();
                self.load(&FieldType::Int, self.locals.enabled[*advice]);
                self.jump(op::IFEQ, skip);
                self.emit_stmts(body)?;
                self.bind(skip, StackShape::Empty)?;
            }
            Stmt::IfNotNested { advice, body } => {
                let prior = self.prior_slot(*advice)?;
                let skip = self.new_label();
                self.load(&FieldType::Int, prior);
                self.jump(op::IFNE, skip);
                self.emit_stmts(body)?;
                self.bind(skip, StackShape::Empty)?;
            }
            Stmt::IfNoFailure { body } => {
                let skip = self.new_label();
                self.load(&FieldType::object(), self.locals.fail);
                self.jump(op::IFNONNULL, skip);
                self.emit_stmts(body)?;
                self.bind(skip, StackShape::Empty)?;
            }
            Stmt::Invoke {
                call,
                store_traveler,
            } => {
                self.emit_call(call)?;
                match (&call.returns, self.locals.traveler[call.advice]) {
                    (Some(ty), Some(slot)) if *store_traveler => self.store(ty, slot),
                    (Some(ty), _) if ty.slot_size() == 2 => self.emit(op::POP2),
                    (Some(_), _) => self.emit(op::POP),
                    (None, _) => {}
                }
            }
        }
        Ok(())
    }

    fn emit_call(&mut self, call: &AdviceCall) -> TransformResult<()> {
        let mut depth = 0u16;
        for arg in &call.args {
            let source = operand_type(self.ir, arg.operand);
            self.note_stack(depth + 5);
            self.emit_operand(arg.operand)?;
            self.emit_conversion(&source, &arg.ty)?;
            depth += arg.ty.slot_size();
        }
        self.note_stack(depth.max(call.returns.as_ref().map_or(0, FieldType::slot_size)));
        self.invoke_static(&call.owner, &call.name, &call.descriptor);
        Ok(())
    }

    fn emit_operand(&mut self, operand: Operand) -> TransformResult<()> {
        let ir = self.ir;
        match operand {
            Operand::Receiver => self.load(&FieldType::object(), 0),
            Operand::Argument(k) => {
                let ty = &ir.method_type.parameters[k];
                self.load(ty, self.argument_slot(k));
            }
            Operand::ArgumentArray => {
                let parameters = &ir.method_type.parameters;
                self.push_int(parameters.len() as i32);
                let object = self.pool.add_class("java/lang/Object");
                self.emit(op::ANEWARRAY);
                self.writer.emit_u16(object);
                for (k, ty) in parameters.iter().enumerate() {
                    self.emit(op::DUP);
                    self.push_int(k as i32);
                    self.load(ty, self.argument_slot(k));
                    self.emit_conversion(ty, &FieldType::object())?;
                    self.emit(op::AASTORE);
                }
            }
            Operand::MethodName => {
                let index = self.pool.add_string(&ir.method_name);
                self.emit_ldc(index);
            }
            Operand::ReturnValue => match (&ir.method_type.return_type, self.locals.result) {
                (Some(ty), Some(slot)) => self.load(ty, slot),
                _ => return Err(unsupported(ir, "return value of a void method")),
            },
            Operand::Thrown => self.load(&FieldType::object(), self.locals.exc),
            Operand::Traveler(i) => match (&ir.travelers[i], self.locals.traveler[i]) {
                (Some(ty), Some(slot)) => self.load(ty, slot),
                _ => self.emit(op::ACONST_NULL),
            },
        }
        Ok(())
    }

    /// Convert the value on top of the stack from `source` to `target`
    fn emit_conversion(&mut self, source: &FieldType, target: &FieldType) -> TransformResult<()> {
        if source == target {
            return Ok(());
        }
        let object = FieldType::object();
        match (source.is_primitive(), target.is_primitive()) {
            (true, false) => {
                let Some(box_class) = source.box_class() else {
                    return Err(unsupported(self.ir, "primitive without a box class"));
                };
                let boxed = FieldType::class(box_class);
                let descriptor = format!("({}){}", source.descriptor(), boxed.descriptor());
                self.invoke_static(box_class, "valueOf", &descriptor);
                if *target != boxed && *target != object {
                    self.emit_checkcast(target);
                }
            }
            (false, false) => {
                if *target != object {
                    self.emit_checkcast(target);
                }
            }
            _ => {
                return Err(unsupported(
                    self.ir,
                    &format!("cannot pass {} as {}", source.java_name(), target.java_name()),
                ));
            }
        }
        Ok(())
    }

    fn emit_checkcast(&mut self, target: &FieldType) {
        let index = self.pool.add_class(&class_reference(target));
        self.emit(op::CHECKCAST);
        self.writer.emit_u16(index);
    }

    fn emit_delegate_call(&mut self) {
        let ir = self.ir;
        let mut slots = 0u16;
        if !ir.is_static {
            self.load(&FieldType::object(), 0);
            slots += 1;
        }
        for (k, ty) in ir.method_type.parameters.iter().enumerate() {
            self.load(ty, self.argument_slot(k));
            slots += ty.slot_size();
        }
        self.note_stack(slots);

        let descriptor = ir.method_type.descriptor();
        let index = self.pool.add_method_ref(&ir.owner, &ir.delegate_name, &descriptor);
        self.emit(if ir.is_static {
            op::INVOKESTATIC
        } else {
            op::INVOKESPECIAL
        });
        self.writer.emit_u16(index);

        if let (Some(ty), Some(slot)) = (&ir.method_type.return_type, self.locals.result) {
            self.note_stack(ty.slot_size());
            self.store(ty, slot);
        }
    }

    fn finish(mut self, with_frames: bool) -> TransformResult<CodeAttribute> {
        let len = self.writer.offset();
        if len > u16::MAX as usize {
            return Err(unsupported(self.ir, "wrapper body too large"));
        }

        for (source, target) in std::mem::take(&mut self.pending_jumps) {
            let target = self.resolve(target)?;
            let offset = i16::try_from(target as i64 - source as i64)
                .map_err(|_| unsupported(self.ir, "branch offset out of range"))?;
            self.writer.patch_i16(source + 1, offset);
        }

        let mut exception_table = Vec::with_capacity(self.handlers.len());
        for &(start, end, handler) in &self.handlers {
            exception_table.push(ExceptionHandler {
                start_pc: start as u16,
                end_pc: end as u16,
                handler_pc: self.resolve(handler)? as u16,
                catch_type: 0,
            });
        }

        let mut attributes = Vec::new();
        if with_frames && !self.frames.is_empty() {
            let table = StackMapTable::from_full_frames(self.frames.iter().map(|(&offset, shape)| {
                let stack = match shape {
                    StackShape::Empty => Vec::new(),
                    StackShape::Throwable => vec![self.throwable.clone()],
                };
                (offset as u16, self.frame_locals.clone(), stack)
            }));
            attributes.push(Attribute::new(self.pool, attr::STACK_MAP_TABLE, table.encode()));
        }

        Ok(CodeAttribute {
            max_stack: self.max_stack,
            max_locals: self.locals.count,
            code: self.writer.into_bytes(),
            exception_table,
            attributes,
        })
    }

    // Labels and frames

    fn new_label(&mut self) -> Label {
        self.label_positions.push(None);
        Label(self.label_positions.len() - 1)
    }

    fn bind(&mut self, label: Label, shape: StackShape) -> TransformResult<()> {
        let position = self.position();
        self.label_positions[label.0] = Some(position);
        match self.frames.insert(position, shape) {
            Some(previous) if previous != shape => {
                Err(unsupported(self.ir, "conflicting frames at one offset"))
            }
            _ => Ok(()),
        }
    }

    fn resolve(&self, label: Label) -> TransformResult<usize> {
        self.label_positions[label.0].ok_or_else(|| unsupported(self.ir, "unbound label"))
    }

    fn jump(&mut self, opcode: u8, target: Label) {
        self.pending_jumps.push((self.position(), target));
        self.emit(opcode);
        self.writer.emit_i16(0);
    }

    // Instructions

    fn position(&self) -> usize {
        self.writer.offset()
    }

    fn emit(&mut self, opcode: u8) {
        self.writer.emit_u8(opcode);
    }

    fn note_stack(&mut self, depth: u16) {
        self.max_stack = self.max_stack.max(depth);
    }

    fn argument_slot(&self, k: usize) -> u16 {
        let receiver = if self.ir.is_static { 0 } else { 1 };
        receiver
            + self.ir.method_type.parameters[..k]
                .iter()
                .map(FieldType::slot_size)
                .sum::<u16>()
    }

    fn prior_slot(&self, advice: usize) -> TransformResult<u16> {
        self.locals
            .prior
            .get(advice)
            .copied()
            .flatten()
            .ok_or_else(|| unsupported(self.ir, "nesting statement without a slot"))
    }

    fn push_slot_id(&mut self, slot: u32) -> TransformResult<()> {
        let value = i32::try_from(slot).map_err(|_| unsupported(self.ir, "nesting slot out of range"))?;
        self.push_int(value);
        Ok(())
    }

    fn push_int(&mut self, value: i32) {
        match value {
            -1..=5 => self.emit((op::ICONST_0 as i32 + value) as u8),
            v if i8::try_from(v).is_ok() => {
                self.emit(op::BIPUSH);
                self.writer.emit_u8(v as i8 as u8);
            }
            v if i16::try_from(v).is_ok() => {
                self.emit(op::SIPUSH);
                self.writer.emit_i16(v as i16);
            }
            v => {
                let index = self.pool.add_integer(v);
                self.emit_ldc(index);
            }
        }
    }

    fn emit_ldc(&mut self, index: u16) {
        if index <= u8::MAX as u16 {
            self.emit(op::LDC);
            self.writer.emit_u8(index as u8);
        } else {
            self.emit(op::LDC_W);
            self.writer.emit_u16(index);
        }
    }

    fn push_default(&mut self, ty: &FieldType) {
        self.emit(match ty {
            FieldType::Long => op::LCONST_0,
            FieldType::Float => op::FCONST_0,
            FieldType::Double => op::DCONST_0,
            FieldType::Object(_) | FieldType::Array(_) => op::ACONST_NULL,
            _ => op::ICONST_0,
        });
    }

    fn load(&mut self, ty: &FieldType, index: u16) {
        emit_load(&mut self.writer, ty, index);
    }

    fn store(&mut self, ty: &FieldType, index: u16) {
        emit_local(&mut self.writer, op::ISTORE, op::ISTORE_0, kind(ty), index);
    }

    fn invoke_static(&mut self, owner: &str, name: &str, descriptor: &str) {
        let index = self.pool.add_method_ref(owner, name, descriptor);
        self.emit(op::INVOKESTATIC);
        self.writer.emit_u16(index);
    }
}

/// Load local `index` of type `ty`, using the short or `wide` forms as needed
pub(super) fn emit_load(writer: &mut ByteWriter, ty: &FieldType, index: u16) {
    emit_local(writer, op::ILOAD, op::ILOAD_0, kind(ty), index);
}

fn emit_local(writer: &mut ByteWriter, base: u8, short_base: u8, kind: u8, index: u16) {
    if index <= 3 {
        writer.emit_u8(short_base + kind * 4 + index as u8);
    } else if index <= u8::MAX as u16 {
        writer.emit_u8(base + kind);
        writer.emit_u8(index as u8);
    } else {
        writer.emit_u8(op::WIDE);
        writer.emit_u8(base + kind);
        writer.emit_u16(index);
    }
}

/// Return instruction for a method returning `ty`
pub(super) fn return_opcode(ty: Option<&FieldType>) -> u8 {
    match ty {
        Some(ty) => op::IRETURN + kind(ty),
        None => op::RETURN,
    }
}

/// Offset of a type's opcode from the `int` form (`iload` .. `aload`)
fn kind(ty: &FieldType) -> u8 {
    match ty {
        FieldType::Long => 1,
        FieldType::Float => 2,
        FieldType::Double => 3,
        FieldType::Object(_) | FieldType::Array(_) => 4,
        _ => 0,
    }
}

/// Name used in a `Class` constant: internal name, or descriptor for arrays
fn class_reference(ty: &FieldType) -> String {
    match ty {
        FieldType::Object(name) => name.clone(),
        other => other.descriptor(),
    }
}

fn verification_type(pool: &mut ConstantPool, ty: &FieldType) -> VerificationType {
    match ty {
        FieldType::Long => VerificationType::Long,
        FieldType::Float => VerificationType::Float,
        FieldType::Double => VerificationType::Double,
        FieldType::Object(_) | FieldType::Array(_) => VerificationType::Object(pool.add_class(&class_reference(ty))),
        _ => VerificationType::Integer,
    }
}

fn unsupported(ir: &WrapIr, reason: &str) -> TransformError {
    TransformError::Unsupported {
        method: format!("{}.{}{}", ir.owner, ir.method_name, ir.method_type.descriptor()),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::{AdviceSpec, BindingKind, CallbackRole, CallbackSpec};
    use crate::matcher::MatchedAdvice;
    use crate::weave::ir::build_wrap_ir;
    use std::sync::Arc;
    use weft_bytecode::{access, instructions, verify_code};

    const RUNTIME: &str = "weft/runtime/NestingFlags";

    fn advice(spec: AdviceSpec) -> Vec<MatchedAdvice> {
        vec![MatchedAdvice {
            id: 0,
            advice: Arc::new(spec.build().unwrap()),
        }]
    }

    fn timer() -> AdviceSpec {
        AdviceSpec::new("*", "*")
            .callback(CallbackSpec::new(CallbackRole::OnBefore, "demo.Timer", "start").returns("long"))
            .callback(
                CallbackSpec::new(CallbackRole::OnReturn, "demo.Timer", "stop")
                    .param(BindingKind::ReturnValue, "java.lang.Object")
                    .param(BindingKind::Traveler, "long"),
            )
            .callback(
                CallbackSpec::new(CallbackRole::OnThrow, "demo.Timer", "failed")
                    .param(BindingKind::Thrown, "java.lang.Throwable"),
            )
    }

    fn opcodes(code: &CodeAttribute) -> Vec<u8> {
        instructions(&code.code).map(|i| i.unwrap().opcode).collect()
    }

    #[test]
    fn test_wrapper_is_structurally_valid() {
        let mut pool = ConstantPool::new();
        let ir = build_wrap_ir("demo/C", "size", "(I)I", access::PUBLIC, &advice(timer()), vec![None]).unwrap();
        let code = generate_wrapper(&ir, &mut pool, RUNTIME, true).unwrap();

        verify_code(&code, &pool, true).unwrap();
        // this, k, result, exc, fail, enabled, traveler (long)
        assert_eq!(code.max_locals, 8);
        assert!(code.stack_map(&pool).unwrap().is_some());
        // entry guard, body, on_return guard, on_throw guard
        assert_eq!(code.exception_table.len(), 4);
        assert!(opcodes(&code).contains(&op::INVOKESPECIAL));
    }

    #[test]
    fn test_primitive_return_is_boxed() {
        let mut pool = ConstantPool::new();
        let ir = build_wrap_ir("demo/C", "size", "()I", access::PUBLIC, &advice(timer()), vec![None]).unwrap();
        let code = generate_wrapper(&ir, &mut pool, RUNTIME, true).unwrap();

        let boxed = instructions(&code.code).map(|i| i.unwrap()).any(|insn| {
            insn.opcode == op::INVOKESTATIC
                && pool.member_ref(insn.operand_u16(&code.code).unwrap()).unwrap()
                    == ("java/lang/Integer", "valueOf", "(I)Ljava/lang/Integer;")
        });
        assert!(boxed);
    }

    fn trace() -> AdviceSpec {
        AdviceSpec::new("*", "*")
            .capture_nested(false)
            .callback(
                CallbackSpec::new(CallbackRole::OnBefore, "demo.Trace", "enter")
                    .param(BindingKind::ArgumentArray, "java.lang.Object[]"),
            )
            .callback(CallbackSpec::new(CallbackRole::OnAfter, "demo.Trace", "exit"))
    }

    #[test]
    fn test_static_void_without_frames() {
        let mut pool = ConstantPool::new();
        let ir = build_wrap_ir("demo/C", "log", "(JLjava/lang/String;)V", access::STATIC, &advice(trace()), vec![Some(3)])
            .unwrap();
        let code = generate_wrapper(&ir, &mut pool, RUNTIME, false).unwrap();

        verify_code(&code, &pool, false).unwrap();
        assert!(code.stack_map(&pool).unwrap().is_none());
        let ops = opcodes(&code);
        assert!(ops.contains(&op::ANEWARRAY));
        assert!(ops.contains(&op::INVOKESTATIC));
        assert!(!ops.contains(&op::INVOKESPECIAL));
        // j, s, exc, fail, enabled, prior
        assert_eq!(code.max_locals, 7);
    }

    #[test]
    fn test_wide_locals() {
        let mut pool = ConstantPool::new();
        let descriptor = format!("({})V", "J".repeat(130));
        let ir = build_wrap_ir("demo/C", "many", &descriptor, 0, &advice(trace()), vec![Some(1)]).unwrap();
        let code = generate_wrapper(&ir, &mut pool, RUNTIME, true).unwrap();
        verify_code(&code, &pool, true).unwrap();
        assert!(opcodes(&code).contains(&op::WIDE));
    }
}
