//! The `Code` attribute (JVMS §4.7.3)

use crate::class::{attr, decode_attributes, encode_attributes, Attribute};
use crate::constants::ConstantPool;
use crate::encoder::{checked_u16, ByteReader, ByteWriter, DecodeError, EncodeError};
use crate::frame::StackMapTable;

/// One exception table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Start of the protected range (inclusive)
    pub start_pc: u16,
    /// End of the protected range (exclusive)
    pub end_pc: u16,
    /// Handler entry point
    pub handler_pc: u16,
    /// `Class` index of the caught type, 0 catches everything
    pub catch_type: u16,
}

/// Decoded `Code` attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAttribute {
    /// Maximum operand stack depth
    pub max_stack: u16,
    /// Number of local variable slots
    pub max_locals: u16,
    /// Instruction bytes
    pub code: Vec<u8>,
    /// Exception table in priority order
    pub exception_table: Vec<ExceptionHandler>,
    /// Nested attributes (StackMapTable, LineNumberTable, ...)
    pub attributes: Vec<Attribute>,
}

impl CodeAttribute {
    /// Create a code attribute without handlers or nested attributes
    pub fn new(max_stack: u16, max_locals: u16, code: Vec<u8>) -> Self {
        Self {
            max_stack,
            max_locals,
            code,
            exception_table: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Decode the attribute body
    pub fn decode(info: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = ByteReader::new(info);
        let max_stack = reader.read_u16()?;
        let max_locals = reader.read_u16()?;
        let code_len = reader.read_u32()? as usize;
        let code = reader.read_bytes(code_len)?;

        let handler_count = reader.read_u16()?;
        let mut exception_table = Vec::with_capacity(handler_count as usize);
        for _ in 0..handler_count {
            exception_table.push(ExceptionHandler {
                start_pc: reader.read_u16()?,
                end_pc: reader.read_u16()?,
                handler_pc: reader.read_u16()?,
                catch_type: reader.read_u16()?,
            });
        }

        let attributes = decode_attributes(&mut reader)?;
        if !reader.is_at_end() {
            return Err(DecodeError::TrailingBytes("Code attribute"));
        }

        Ok(Self {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    /// Encode the attribute body
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut writer = ByteWriter::with_capacity(self.code.len() + 32);
        writer.emit_u16(self.max_stack);
        writer.emit_u16(self.max_locals);
        // code_length is a u4 but must stay below 65536
        writer.emit_u32(checked_u16("code bytes", self.code.len(), u16::MAX)? as u32);
        writer.emit_bytes(&self.code);
        writer.emit_count("exception handlers", self.exception_table.len())?;
        for handler in &self.exception_table {
            writer.emit_u16(handler.start_pc);
            writer.emit_u16(handler.end_pc);
            writer.emit_u16(handler.handler_pc);
            writer.emit_u16(handler.catch_type);
        }
        encode_attributes(&self.attributes, &mut writer)?;
        Ok(writer.into_bytes())
    }

    /// Decode the nested StackMapTable, if any
    pub fn stack_map(&self, pool: &ConstantPool) -> Result<Option<StackMapTable>, DecodeError> {
        for attribute in &self.attributes {
            if attribute.name(pool)? == attr::STACK_MAP_TABLE {
                return StackMapTable::decode(&attribute.info).map(Some);
            }
        }
        Ok(None)
    }

    /// Insert straight-line instructions before the existing code
    ///
    /// `prefix` must be a multiple of four bytes long so switch padding in
    /// the original code stays valid, and must not branch. Every offset held
    /// in the exception table and the nested attributes moves by the prefix
    /// length. Type annotations carry offsets in a form that is not worth
    /// rewriting and are dropped.
    pub fn insert_prefix(&mut self, prefix: &[u8], pool: &ConstantPool) -> Result<(), DecodeError> {
        if prefix.len() % 4 != 0 {
            return Err(DecodeError::Malformed {
                what: "code prefix",
                detail: format!("length {} is not a multiple of 4", prefix.len()),
            });
        }
        let shift = prefix.len();
        if self.code.len() + shift > u16::MAX as usize {
            return Err(DecodeError::Malformed {
                what: "code prefix",
                detail: "method body would exceed 65535 bytes".to_string(),
            });
        }
        let shift = shift as u16;

        let mut code = Vec::with_capacity(self.code.len() + prefix.len());
        code.extend_from_slice(prefix);
        code.extend_from_slice(&self.code);
        self.code = code;

        for handler in &mut self.exception_table {
            handler.start_pc += shift;
            handler.end_pc += shift;
            handler.handler_pc += shift;
        }

        let mut kept = Vec::with_capacity(self.attributes.len());
        for mut attribute in std::mem::take(&mut self.attributes) {
            match attribute.name(pool)? {
                attr::STACK_MAP_TABLE => {
                    let mut table = StackMapTable::decode(&attribute.info)?;
                    table.shift(shift);
                    attribute.info = table.encode();
                }
                attr::LINE_NUMBER_TABLE => {
                    shift_table(&mut attribute.info, 4, shift)?;
                }
                attr::LOCAL_VARIABLE_TABLE | attr::LOCAL_VARIABLE_TYPE_TABLE => {
                    shift_table(&mut attribute.info, 10, shift)?;
                }
                attr::RUNTIME_VISIBLE_TYPE_ANNOTATIONS
                | attr::RUNTIME_INVISIBLE_TYPE_ANNOTATIONS => continue,
                _ => {}
            }
            kept.push(attribute);
        }
        self.attributes = kept;
        Ok(())
    }
}

/// Shift the leading `start_pc` of each fixed-size entry in a u16-counted table
fn shift_table(info: &mut [u8], entry_len: usize, shift: u16) -> Result<(), DecodeError> {
    let count = ByteReader::new(info).read_u16()? as usize;
    if info.len() != 2 + count * entry_len {
        return Err(DecodeError::Malformed {
            what: "debug table",
            detail: format!("{} entries do not fit {} bytes", count, info.len()),
        });
    }
    for i in 0..count {
        let at = 2 + i * entry_len;
        let start = u16::from_be_bytes([info[at], info[at + 1]]);
        info[at..at + 2].copy_from_slice(&(start + shift).to_be_bytes());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{StackMapFrame, VerificationType};
    use crate::opcode::op;

    fn line_numbers(entries: &[(u16, u16)]) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.emit_u16(entries.len() as u16);
        for (pc, line) in entries {
            writer.emit_u16(*pc);
            writer.emit_u16(*line);
        }
        writer.into_bytes()
    }

    #[test]
    fn test_insert_prefix_shifts_tables() {
        let mut pool = ConstantPool::new();
        let mut code = CodeAttribute::new(1, 1, vec![op::ICONST_0, op::IRETURN]);
        code.exception_table.push(ExceptionHandler {
            start_pc: 0,
            end_pc: 1,
            handler_pc: 1,
            catch_type: 0,
        });
        code.attributes.push(Attribute::new(
            &mut pool,
            attr::LINE_NUMBER_TABLE,
            line_numbers(&[(0, 10), (1, 11)]),
        ));
        let frames = StackMapTable {
            frames: vec![StackMapFrame::SameLocals1StackItem {
                offset_delta: 1,
                stack: VerificationType::Integer,
            }],
        };
        code.attributes
            .push(Attribute::new(&mut pool, attr::STACK_MAP_TABLE, frames.encode()));
        code.attributes.push(Attribute::new(
            &mut pool,
            attr::RUNTIME_VISIBLE_TYPE_ANNOTATIONS,
            vec![0, 0],
        ));

        code.insert_prefix(&[op::NOP; 4], &pool).unwrap();

        assert_eq!(&code.code[4..], &[op::ICONST_0, op::IRETURN]);
        assert_eq!(code.exception_table[0].start_pc, 4);
        assert_eq!(code.exception_table[0].handler_pc, 5);
        assert_eq!(code.attributes.len(), 2);
        assert_eq!(code.attributes[0].info, line_numbers(&[(4, 10), (5, 11)]));
        assert_eq!(code.stack_map(&pool).unwrap().unwrap().offsets(), vec![5]);
    }

    #[test]
    fn test_oversized_body_does_not_encode() {
        let mut code = CodeAttribute::new(0, 0, vec![op::NOP; 65_535]);
        assert!(code.encode().is_ok());
        code.code.push(op::RETURN);
        assert!(matches!(code.encode(), Err(EncodeError::LimitExceeded { what: "code bytes", .. })));
    }

    #[test]
    fn test_prefix_must_be_aligned() {
        let pool = ConstantPool::new();
        let mut code = CodeAttribute::new(0, 0, vec![op::RETURN]);
        assert!(code.insert_prefix(&[op::NOP; 3], &pool).is_err());
    }
}
