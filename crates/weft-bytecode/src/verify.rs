//! Structural verification of method bodies
//!
//! This is not the JVM's type checker. It checks the properties the weaver
//! can break by construction: instruction boundaries, branch and handler
//! targets, constant pool reference kinds, local variable bounds and frame
//! placement.

use crate::class::ClassFile;
use crate::code::CodeAttribute;
use crate::constants::{Constant, ConstantPool};
use crate::encoder::DecodeError;
use crate::opcode::{instructions, op, Instruction};
use rustc_hash::FxHashSet;

/// Structural verification errors
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Instructions could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Code array empty or too long
    #[error("Invalid code length {0}")]
    InvalidCodeLength(usize),

    /// Branch to a position that is not an instruction start
    #[error("Invalid jump target {target} at offset {offset}")]
    InvalidJumpTarget {
        /// Absolute target position
        target: i64,
        /// Offset of the branch instruction
        offset: usize,
    },

    /// Exception table entry with bad bounds
    #[error("Invalid exception handler #{index}: {reason}")]
    InvalidHandler {
        /// Position in the exception table
        index: usize,
        /// Which bound is wrong
        reason: &'static str,
    },

    /// Constant pool reference of the wrong kind
    #[error("Invalid constant pool reference: index {index} at offset {offset}")]
    InvalidConstantRef {
        /// Constant pool index
        index: u16,
        /// Offset of the referencing instruction
        offset: usize,
    },

    /// Local variable index out of bounds
    #[error("Invalid local variable reference: index {index} (max {max}) at offset {offset}")]
    InvalidLocalRef {
        /// Local variable slot
        index: usize,
        /// Declared `max_locals`
        max: usize,
        /// Offset of the instruction
        offset: usize,
    },

    /// Execution falls off the end of the code
    #[error("Execution falls off end of method at offset {0}")]
    FallOffEnd(usize),

    /// Branch target or handler without a stack map frame
    #[error("Missing stack map frame at offset {0}")]
    MissingFrame(usize),

    /// Stack map frame placed inside an instruction
    #[error("Stack map frame at offset {0} is not an instruction boundary")]
    MisplacedFrame(usize),

    /// Method in error, with context
    #[error("In method {method}: {source}")]
    Method {
        /// Method name and descriptor
        method: String,
        /// Underlying failure
        #[source]
        source: Box<VerifyError>,
    },
}

/// Verify every method body of a class
pub fn verify_class(class: &ClassFile) -> Result<(), VerifyError> {
    let pool = &class.constant_pool;
    for method in &class.methods {
        if let Some(code) = method.code(pool)? {
            verify_code(&code, pool, class.requires_stack_maps()).map_err(|e| {
                let name = method.name(pool).unwrap_or("?");
                let descriptor = method.descriptor(pool).unwrap_or("?");
                VerifyError::Method {
                    method: format!("{}{}", name, descriptor),
                    source: Box::new(e),
                }
            })?;
        }
    }
    Ok(())
}

/// Verify a single method body
pub fn verify_code(
    code: &CodeAttribute,
    pool: &ConstantPool,
    requires_frames: bool,
) -> Result<(), VerifyError> {
    let bytes = &code.code;
    if bytes.is_empty() || bytes.len() > u16::MAX as usize {
        return Err(VerifyError::InvalidCodeLength(bytes.len()));
    }

    let decoded: Vec<Instruction> = instructions(bytes).collect::<Result<_, _>>()?;
    let boundaries: FxHashSet<usize> = decoded.iter().map(|i| i.pc).collect();

    let frame_offsets: FxHashSet<usize> = match code.stack_map(pool)? {
        Some(table) => table.offsets().into_iter().map(|o| o as usize).collect(),
        None => FxHashSet::default(),
    };
    for &offset in &frame_offsets {
        if !boundaries.contains(&offset) {
            return Err(VerifyError::MisplacedFrame(offset));
        }
    }

    for insn in &decoded {
        for target in insn.branch_targets(bytes) {
            if target < 0 || !boundaries.contains(&(target as usize)) {
                return Err(VerifyError::InvalidJumpTarget {
                    target,
                    offset: insn.pc,
                });
            }
            if requires_frames && !frame_offsets.contains(&(target as usize)) {
                return Err(VerifyError::MissingFrame(target as usize));
            }
        }
        // The instruction after a goto, return or throw starts a new block
        let next = insn.pc + insn.len;
        if requires_frames
            && insn.is_unconditional_transfer()
            && next < bytes.len()
            && !frame_offsets.contains(&next)
        {
            return Err(VerifyError::MissingFrame(next));
        }
        check_constant_ref(insn, bytes, pool)?;
        check_local_ref(insn, bytes, code.max_locals as usize)?;
    }

    if let Some(last) = decoded.last() {
        if !last.is_unconditional_transfer() {
            return Err(VerifyError::FallOffEnd(last.pc));
        }
    }

    for (index, handler) in code.exception_table.iter().enumerate() {
        let start = handler.start_pc as usize;
        let end = handler.end_pc as usize;
        let target = handler.handler_pc as usize;
        if start >= end {
            return Err(VerifyError::InvalidHandler {
                index,
                reason: "empty range",
            });
        }
        if !boundaries.contains(&start) || !(boundaries.contains(&end) || end == bytes.len()) {
            return Err(VerifyError::InvalidHandler {
                index,
                reason: "range not on instruction boundaries",
            });
        }
        if !boundaries.contains(&target) {
            return Err(VerifyError::InvalidHandler {
                index,
                reason: "handler not on an instruction boundary",
            });
        }
        if handler.catch_type != 0 && pool.class_name(handler.catch_type).is_err() {
            return Err(VerifyError::InvalidHandler {
                index,
                reason: "catch type is not a class",
            });
        }
        if requires_frames && !frame_offsets.contains(&target) {
            return Err(VerifyError::MissingFrame(target));
        }
    }

    Ok(())
}

fn check_constant_ref(insn: &Instruction, code: &[u8], pool: &ConstantPool) -> Result<(), VerifyError> {
    let index = match insn.opcode {
        op::LDC => code[insn.pc + 1] as u16,
        op::LDC_W | op::LDC2_W | op::GETSTATIC..=op::INVOKEDYNAMIC | op::NEW | op::ANEWARRAY
        | op::CHECKCAST | op::INSTANCEOF | op::MULTIANEWARRAY => {
            insn.operand_u16(code).unwrap_or(0)
        }
        _ => return Ok(()),
    };

    let ok = match (insn.opcode, pool.get(index)) {
        (_, Err(_)) => false,
        (op::LDC | op::LDC_W, Ok(constant)) => matches!(
            constant,
            Constant::Integer(_)
                | Constant::Float(_)
                | Constant::String(_)
                | Constant::Class(_)
                | Constant::MethodType(_)
                | Constant::MethodHandle { .. }
                | Constant::Dynamic { .. }
        ),
        (op::LDC2_W, Ok(constant)) => matches!(
            constant,
            Constant::Long(_) | Constant::Double(_) | Constant::Dynamic { .. }
        ),
        (op::GETSTATIC..=op::PUTFIELD, Ok(constant)) => matches!(constant, Constant::FieldRef { .. }),
        (op::INVOKEVIRTUAL, Ok(constant)) => matches!(constant, Constant::MethodRef { .. }),
        (op::INVOKESPECIAL | op::INVOKESTATIC, Ok(constant)) => matches!(
            constant,
            Constant::MethodRef { .. } | Constant::InterfaceMethodRef { .. }
        ),
        (op::INVOKEINTERFACE, Ok(constant)) => {
            matches!(constant, Constant::InterfaceMethodRef { .. })
        }
        (op::INVOKEDYNAMIC, Ok(constant)) => matches!(constant, Constant::InvokeDynamic { .. }),
        (_, Ok(constant)) => matches!(constant, Constant::Class(_)),
    };

    if ok {
        Ok(())
    } else {
        Err(VerifyError::InvalidConstantRef {
            index,
            offset: insn.pc,
        })
    }
}

fn check_local_ref(insn: &Instruction, code: &[u8], max_locals: usize) -> Result<(), VerifyError> {
    let (index, wide_value) = match insn.opcode {
        op::ILOAD..=op::ALOAD | op::ISTORE..=op::ASTORE | op::IINC | op::RET => {
            let index = code[insn.pc + 1] as usize;
            (index, insn.opcode == op::LLOAD
                || insn.opcode == op::DLOAD
                || insn.opcode == op::LSTORE
                || insn.opcode == op::DSTORE)
        }
        // xload_<n>: iload, lload, fload, dload, aload in groups of four
        op::ILOAD_0..=op::ALOAD_3 => {
            let rel = (insn.opcode - op::ILOAD_0) as usize;
            ((rel % 4), matches!(rel / 4, 1 | 3))
        }
        // xstore_<n>
        op::ISTORE_0..=op::ASTORE_3 => {
            let rel = (insn.opcode - op::ISTORE_0) as usize;
            ((rel % 4), matches!(rel / 4, 1 | 3))
        }
        op::WIDE => {
            let modified = code[insn.pc + 1];
            let index = u16::from_be_bytes([code[insn.pc + 2], code[insn.pc + 3]]) as usize;
            (index, matches!(modified, op::LLOAD | op::DLOAD | op::LSTORE | op::DSTORE))
        }
        _ => return Ok(()),
    };

    let needed = index + if wide_value { 2 } else { 1 };
    if needed > max_locals {
        return Err(VerifyError::InvalidLocalRef {
            index,
            max: max_locals,
            offset: insn.pc,
        });
    }
    Ok(())
}
