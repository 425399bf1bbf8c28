//! JVM instruction set
//!
//! Opcode values (JVMS §6.5) and an instruction walker that knows the length
//! of every instruction, including the padded `tableswitch`/`lookupswitch`
//! forms and `wide` prefixes.

use crate::encoder::DecodeError;

/// Opcode values
#[allow(missing_docs)]
pub mod op {
    pub const NOP: u8 = 0x00;
    pub const ACONST_NULL: u8 = 0x01;
    pub const ICONST_M1: u8 = 0x02;
    pub const ICONST_0: u8 = 0x03;
    pub const ICONST_1: u8 = 0x04;
    pub const ICONST_2: u8 = 0x05;
    pub const ICONST_3: u8 = 0x06;
    pub const ICONST_4: u8 = 0x07;
    pub const ICONST_5: u8 = 0x08;
    pub const LCONST_0: u8 = 0x09;
    pub const FCONST_0: u8 = 0x0b;
    pub const DCONST_0: u8 = 0x0e;
    pub const BIPUSH: u8 = 0x10;
    pub const SIPUSH: u8 = 0x11;
    pub const LDC: u8 = 0x12;
    pub const LDC_W: u8 = 0x13;
    pub const LDC2_W: u8 = 0x14;
    pub const ILOAD: u8 = 0x15;
    pub const LLOAD: u8 = 0x16;
    pub const FLOAD: u8 = 0x17;
    pub const DLOAD: u8 = 0x18;
    pub const ALOAD: u8 = 0x19;
    pub const ILOAD_0: u8 = 0x1a;
    pub const LLOAD_0: u8 = 0x1e;
    pub const FLOAD_0: u8 = 0x22;
    pub const DLOAD_0: u8 = 0x26;
    pub const ALOAD_0: u8 = 0x2a;
    pub const ALOAD_3: u8 = 0x2d;
    pub const IALOAD: u8 = 0x2e;
    pub const SALOAD: u8 = 0x35;
    pub const ISTORE: u8 = 0x36;
    pub const LSTORE: u8 = 0x37;
    pub const FSTORE: u8 = 0x38;
    pub const DSTORE: u8 = 0x39;
    pub const ASTORE: u8 = 0x3a;
    pub const ISTORE_0: u8 = 0x3b;
    pub const ASTORE_3: u8 = 0x4e;
    pub const IASTORE: u8 = 0x4f;
    pub const AASTORE: u8 = 0x53;
    pub const SASTORE: u8 = 0x56;
    pub const POP: u8 = 0x57;
    pub const POP2: u8 = 0x58;
    pub const DUP: u8 = 0x59;
    pub const SWAP: u8 = 0x5f;
    pub const IADD: u8 = 0x60;
    pub const IINC: u8 = 0x84;
    pub const IFEQ: u8 = 0x99;
    pub const IFNE: u8 = 0x9a;
    pub const IFLT: u8 = 0x9b;
    pub const IFGE: u8 = 0x9c;
    pub const IFGT: u8 = 0x9d;
    pub const IFLE: u8 = 0x9e;
    pub const IF_ICMPEQ: u8 = 0x9f;
    pub const IF_ACMPNE: u8 = 0xa6;
    pub const GOTO: u8 = 0xa7;
    pub const JSR: u8 = 0xa8;
    pub const RET: u8 = 0xa9;
    pub const TABLESWITCH: u8 = 0xaa;
    pub const LOOKUPSWITCH: u8 = 0xab;
    pub const IRETURN: u8 = 0xac;
    pub const LRETURN: u8 = 0xad;
    pub const FRETURN: u8 = 0xae;
    pub const DRETURN: u8 = 0xaf;
    pub const ARETURN: u8 = 0xb0;
    pub const RETURN: u8 = 0xb1;
    pub const GETSTATIC: u8 = 0xb2;
    pub const PUTSTATIC: u8 = 0xb3;
    pub const GETFIELD: u8 = 0xb4;
    pub const PUTFIELD: u8 = 0xb5;
    pub const INVOKEVIRTUAL: u8 = 0xb6;
    pub const INVOKESPECIAL: u8 = 0xb7;
    pub const INVOKESTATIC: u8 = 0xb8;
    pub const INVOKEINTERFACE: u8 = 0xb9;
    pub const INVOKEDYNAMIC: u8 = 0xba;
    pub const NEW: u8 = 0xbb;
    pub const NEWARRAY: u8 = 0xbc;
    pub const ANEWARRAY: u8 = 0xbd;
    pub const ARRAYLENGTH: u8 = 0xbe;
    pub const ATHROW: u8 = 0xbf;
    pub const CHECKCAST: u8 = 0xc0;
    pub const INSTANCEOF: u8 = 0xc1;
    pub const MONITORENTER: u8 = 0xc2;
    pub const MONITOREXIT: u8 = 0xc3;
    pub const WIDE: u8 = 0xc4;
    pub const MULTIANEWARRAY: u8 = 0xc5;
    pub const IFNULL: u8 = 0xc6;
    pub const IFNONNULL: u8 = 0xc7;
    pub const GOTO_W: u8 = 0xc8;
    pub const JSR_W: u8 = 0xc9;
    pub const BREAKPOINT: u8 = 0xca;
    pub const IMPDEP1: u8 = 0xfe;
    pub const IMPDEP2: u8 = 0xff;
}

/// One decoded instruction position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Byte offset of the opcode
    pub pc: usize,
    /// Opcode byte
    pub opcode: u8,
    /// Total length including operands and padding
    pub len: usize,
}

impl Instruction {
    /// Read an unsigned 16-bit operand at `pc + 1`
    pub fn operand_u16(&self, code: &[u8]) -> Option<u16> {
        let hi = *code.get(self.pc + 1)?;
        let lo = *code.get(self.pc + 2)?;
        Some(u16::from_be_bytes([hi, lo]))
    }

    /// Branch targets of this instruction (absolute offsets)
    pub fn branch_targets(&self, code: &[u8]) -> Vec<i64> {
        let pc = self.pc as i64;
        match self.opcode {
            op::IFEQ..=op::JSR | op::IFNULL | op::IFNONNULL => {
                let offset = read_i16(code, self.pc + 1).unwrap_or(0) as i64;
                vec![pc + offset]
            }
            op::GOTO_W | op::JSR_W => {
                let offset = read_i32(code, self.pc + 1).unwrap_or(0) as i64;
                vec![pc + offset]
            }
            op::TABLESWITCH => {
                let base = switch_operands_start(self.pc);
                let mut targets = Vec::new();
                let default = read_i32(code, base).unwrap_or(0) as i64;
                targets.push(pc + default);
                let low = read_i32(code, base + 4).unwrap_or(0) as i64;
                let high = read_i32(code, base + 8).unwrap_or(0) as i64;
                for i in 0..(high - low + 1).max(0) as usize {
                    targets.push(pc + read_i32(code, base + 12 + i * 4).unwrap_or(0) as i64);
                }
                targets
            }
            op::LOOKUPSWITCH => {
                let base = switch_operands_start(self.pc);
                let mut targets = Vec::new();
                let default = read_i32(code, base).unwrap_or(0) as i64;
                targets.push(pc + default);
                let pairs = read_i32(code, base + 4).unwrap_or(0).max(0) as usize;
                for i in 0..pairs {
                    targets.push(pc + read_i32(code, base + 12 + i * 8).unwrap_or(0) as i64);
                }
                targets
            }
            _ => Vec::new(),
        }
    }

    /// Whether control never falls through to the next instruction
    pub fn is_unconditional_transfer(&self) -> bool {
        matches!(
            self.opcode,
            op::GOTO
                | op::GOTO_W
                | op::ATHROW
                | op::RET
                | op::TABLESWITCH
                | op::LOOKUPSWITCH
                | op::IRETURN..=op::RETURN
        )
    }
}

/// Compute the length of the instruction starting at `pc`
pub fn instruction_length(code: &[u8], pc: usize) -> Result<usize, DecodeError> {
    let opcode = *code.get(pc).ok_or(DecodeError::UnexpectedEnd(pc))?;
    let len = match opcode {
        op::BIPUSH | op::LDC | op::ILOAD..=op::ALOAD | op::ISTORE..=op::ASTORE | op::RET
        | op::NEWARRAY => 2,
        op::SIPUSH | op::LDC_W | op::LDC2_W | op::IINC | op::IFEQ..=op::JSR | op::GETSTATIC
        ..=op::INVOKESTATIC | op::NEW | op::ANEWARRAY | op::CHECKCAST | op::INSTANCEOF
        | op::IFNULL | op::IFNONNULL => 3,
        op::MULTIANEWARRAY => 4,
        op::INVOKEINTERFACE | op::INVOKEDYNAMIC | op::GOTO_W | op::JSR_W => 5,
        op::WIDE => {
            let modified = *code.get(pc + 1).ok_or(DecodeError::UnexpectedEnd(pc + 1))?;
            match modified {
                op::IINC => 6,
                op::ILOAD..=op::ALOAD | op::ISTORE..=op::ASTORE | op::RET => 4,
                other => return Err(invalid(other, pc + 1)),
            }
        }
        op::TABLESWITCH => {
            let base = switch_operands_start(pc);
            let low = read_i32(code, base + 4).ok_or(DecodeError::UnexpectedEnd(base + 4))?;
            let high = read_i32(code, base + 8).ok_or(DecodeError::UnexpectedEnd(base + 8))?;
            if high < low {
                return Err(DecodeError::Malformed {
                    what: "tableswitch",
                    detail: format!("high {} < low {} at {}", high, low, pc),
                });
            }
            let entries = (high as i64 - low as i64 + 1) as usize;
            base + 12 + entries * 4 - pc
        }
        op::LOOKUPSWITCH => {
            let base = switch_operands_start(pc);
            let pairs = read_i32(code, base + 4).ok_or(DecodeError::UnexpectedEnd(base + 4))?;
            if pairs < 0 {
                return Err(DecodeError::Malformed {
                    what: "lookupswitch",
                    detail: format!("negative pair count at {}", pc),
                });
            }
            base + 8 + pairs as usize * 8 - pc
        }
        0xcb..=0xfd => return Err(invalid(opcode, pc)),
        _ => 1,
    };

    if pc + len > code.len() {
        return Err(DecodeError::UnexpectedEnd(code.len()));
    }
    Ok(len)
}

/// Iterator over the instructions of a code array
pub struct Instructions<'a> {
    code: &'a [u8],
    pc: usize,
    failed: bool,
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<Instruction, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pc >= self.code.len() {
            return None;
        }
        match instruction_length(self.code, self.pc) {
            Ok(len) => {
                let insn = Instruction {
                    pc: self.pc,
                    opcode: self.code[self.pc],
                    len,
                };
                self.pc += len;
                Some(Ok(insn))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Walk the instructions of a code array
pub fn instructions(code: &[u8]) -> Instructions<'_> {
    Instructions {
        code,
        pc: 0,
        failed: false,
    }
}

/// Offset of the first 4-byte-aligned operand after a switch opcode
fn switch_operands_start(pc: usize) -> usize {
    (pc + 4) & !3
}

fn read_i16(code: &[u8], at: usize) -> Option<i16> {
    Some(i16::from_be_bytes([*code.get(at)?, *code.get(at + 1)?]))
}

fn read_i32(code: &[u8], at: usize) -> Option<i32> {
    let bytes = code.get(at..at + 4)?;
    Some(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn invalid(opcode: u8, pc: usize) -> DecodeError {
    DecodeError::Malformed {
        what: "instruction",
        detail: format!("invalid opcode {:#04x} at {}", opcode, pc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_lengths() {
        // aload_0; invokevirtual #2; ireturn
        let code = [op::ALOAD_0, op::INVOKEVIRTUAL, 0, 2, op::IRETURN];
        let lens: Vec<_> = instructions(&code).map(|i| i.unwrap().len).collect();
        assert_eq!(lens, vec![1, 3, 1]);
    }

    #[test]
    fn test_tableswitch_padding_depends_on_position() {
        // nop; tableswitch at pc 1 -> operands start at 4
        let mut code = vec![op::NOP, op::TABLESWITCH, 0, 0];
        code.extend_from_slice(&20i32.to_be_bytes()); // default
        code.extend_from_slice(&0i32.to_be_bytes()); // low
        code.extend_from_slice(&1i32.to_be_bytes()); // high
        code.extend_from_slice(&20i32.to_be_bytes());
        code.extend_from_slice(&21i32.to_be_bytes());
        assert_eq!(instruction_length(&code, 1).unwrap(), code.len() - 1);

        let insn = Instruction {
            pc: 1,
            opcode: op::TABLESWITCH,
            len: code.len() - 1,
        };
        assert_eq!(insn.branch_targets(&code), vec![21, 21, 22]);
    }

    #[test]
    fn test_wide_forms() {
        let code = [op::WIDE, op::IINC, 0, 1, 0, 5, op::WIDE, op::ALOAD, 1, 0];
        let lens: Vec<_> = instructions(&code).map(|i| i.unwrap().len).collect();
        assert_eq!(lens, vec![6, 4]);
    }

    #[test]
    fn test_truncated_instruction() {
        let code = [op::INVOKESTATIC, 0];
        assert!(instruction_length(&code, 0).is_err());
    }

    #[test]
    fn test_branch_target() {
        // goto -3 from pc 3
        let code = [op::NOP, op::NOP, op::NOP, op::GOTO, 0xFF, 0xFD];
        let insn = instructions(&code).nth(3).unwrap().unwrap();
        assert_eq!(insn.branch_targets(&code), vec![0]);
        assert!(insn.is_unconditional_transfer());
    }
}
