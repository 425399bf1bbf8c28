//! StackMapTable attribute (JVMS §4.7.4)
//!
//! Frames are decoded into [`StackMapFrame`] values that keep their
//! `offset_delta`. On encoding, the most compact legal form is chosen again,
//! so shifting a table never has to worry about a delta outgrowing its
//! original frame kind.

use crate::encoder::{ByteReader, ByteWriter, DecodeError};

/// A verification type in a stack map frame
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VerificationType {
    /// Unusable slot
    Top,
    /// `int` and smaller primitives
    Integer,
    /// `float`
    Float,
    /// `double` (occupies one entry, two slots)
    Double,
    /// `long` (occupies one entry, two slots)
    Long,
    /// `null`
    Null,
    /// `this` before the super constructor ran
    UninitializedThis,
    /// Reference to the class at the given constant pool index
    Object(u16),
    /// Object created by the `new` at the given code offset
    Uninitialized(u16),
}

impl VerificationType {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        let tag = reader.read_u8()?;
        Ok(match tag {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object(reader.read_u16()?),
            8 => VerificationType::Uninitialized(reader.read_u16()?),
            other => {
                return Err(DecodeError::Malformed {
                    what: "verification type",
                    detail: format!("unknown tag {}", other),
                })
            }
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        match self {
            VerificationType::Top => writer.emit_u8(0),
            VerificationType::Integer => writer.emit_u8(1),
            VerificationType::Float => writer.emit_u8(2),
            VerificationType::Double => writer.emit_u8(3),
            VerificationType::Long => writer.emit_u8(4),
            VerificationType::Null => writer.emit_u8(5),
            VerificationType::UninitializedThis => writer.emit_u8(6),
            VerificationType::Object(index) => {
                writer.emit_u8(7);
                writer.emit_u16(*index);
            }
            VerificationType::Uninitialized(offset) => {
                writer.emit_u8(8);
                writer.emit_u16(*offset);
            }
        }
    }

    fn shift(&mut self, inserted: u16) {
        if let VerificationType::Uninitialized(offset) = self {
            *offset += inserted;
        }
    }
}

/// One stack map frame
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)] // fields are the class file format's own names
pub enum StackMapFrame {
    /// Same locals as the previous frame, empty stack
    Same { offset_delta: u16 },
    /// Same locals, one stack item
    SameLocals1StackItem {
        offset_delta: u16,
        stack: VerificationType,
    },
    /// Last `chopped` locals removed, empty stack
    Chop { offset_delta: u16, chopped: u8 },
    /// Locals appended, empty stack
    Append {
        offset_delta: u16,
        locals: Vec<VerificationType>,
    },
    /// Full frame
    Full {
        offset_delta: u16,
        locals: Vec<VerificationType>,
        stack: Vec<VerificationType>,
    },
}

impl StackMapFrame {
    /// The frame's offset delta
    pub fn offset_delta(&self) -> u16 {
        match self {
            StackMapFrame::Same { offset_delta }
            | StackMapFrame::SameLocals1StackItem { offset_delta, .. }
            | StackMapFrame::Chop { offset_delta, .. }
            | StackMapFrame::Append { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta,
        }
    }

    fn offset_delta_mut(&mut self) -> &mut u16 {
        match self {
            StackMapFrame::Same { offset_delta }
            | StackMapFrame::SameLocals1StackItem { offset_delta, .. }
            | StackMapFrame::Chop { offset_delta, .. }
            | StackMapFrame::Append { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => offset_delta,
        }
    }

    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        let frame_type = reader.read_u8()?;
        let frame = match frame_type {
            0..=63 => StackMapFrame::Same {
                offset_delta: frame_type as u16,
            },
            64..=127 => StackMapFrame::SameLocals1StackItem {
                offset_delta: (frame_type - 64) as u16,
                stack: VerificationType::decode(reader)?,
            },
            247 => StackMapFrame::SameLocals1StackItem {
                offset_delta: reader.read_u16()?,
                stack: VerificationType::decode(reader)?,
            },
            248..=250 => StackMapFrame::Chop {
                offset_delta: reader.read_u16()?,
                chopped: 251 - frame_type,
            },
            251 => StackMapFrame::Same {
                offset_delta: reader.read_u16()?,
            },
            252..=254 => {
                let offset_delta = reader.read_u16()?;
                let count = (frame_type - 251) as usize;
                let mut locals = Vec::with_capacity(count);
                for _ in 0..count {
                    locals.push(VerificationType::decode(reader)?);
                }
                StackMapFrame::Append {
                    offset_delta,
                    locals,
                }
            }
            255 => {
                let offset_delta = reader.read_u16()?;
                let locals = decode_types(reader)?;
                let stack = decode_types(reader)?;
                StackMapFrame::Full {
                    offset_delta,
                    locals,
                    stack,
                }
            }
            reserved => {
                return Err(DecodeError::Malformed {
                    what: "stack map frame",
                    detail: format!("reserved frame type {}", reserved),
                })
            }
        };
        Ok(frame)
    }

    fn encode(&self, writer: &mut ByteWriter) {
        match self {
            StackMapFrame::Same { offset_delta } => {
                if *offset_delta < 64 {
                    writer.emit_u8(*offset_delta as u8);
                } else {
                    writer.emit_u8(251);
                    writer.emit_u16(*offset_delta);
                }
            }
            StackMapFrame::SameLocals1StackItem {
                offset_delta,
                stack,
            } => {
                if *offset_delta < 64 {
                    writer.emit_u8(64 + *offset_delta as u8);
                } else {
                    writer.emit_u8(247);
                    writer.emit_u16(*offset_delta);
                }
                stack.encode(writer);
            }
            StackMapFrame::Chop {
                offset_delta,
                chopped,
            } => {
                writer.emit_u8(251 - chopped);
                writer.emit_u16(*offset_delta);
            }
            StackMapFrame::Append {
                offset_delta,
                locals,
            } => {
                writer.emit_u8(251 + locals.len() as u8);
                writer.emit_u16(*offset_delta);
                for local in locals {
                    local.encode(writer);
                }
            }
            StackMapFrame::Full {
                offset_delta,
                locals,
                stack,
            } => {
                writer.emit_u8(255);
                writer.emit_u16(*offset_delta);
                encode_types(locals, writer);
                encode_types(stack, writer);
            }
        }
    }

    fn types_mut(&mut self) -> Vec<&mut VerificationType> {
        match self {
            StackMapFrame::Same { .. } | StackMapFrame::Chop { .. } => Vec::new(),
            StackMapFrame::SameLocals1StackItem { stack, .. } => vec![stack],
            StackMapFrame::Append { locals, .. } => locals.iter_mut().collect(),
            StackMapFrame::Full { locals, stack, .. } => {
                locals.iter_mut().chain(stack.iter_mut()).collect()
            }
        }
    }
}

/// Decoded contents of a `StackMapTable` attribute
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackMapTable {
    /// Frames in code order
    pub frames: Vec<StackMapFrame>,
}

impl StackMapTable {
    /// Decode the attribute body
    pub fn decode(info: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = ByteReader::new(info);
        let count = reader.read_u16()?;
        let mut frames = Vec::with_capacity(count as usize);
        for _ in 0..count {
            frames.push(StackMapFrame::decode(&mut reader)?);
        }
        if !reader.is_at_end() {
            return Err(DecodeError::TrailingBytes("StackMapTable"));
        }
        Ok(Self { frames })
    }

    /// Encode the attribute body
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.emit_u16(self.frames.len() as u16);
        for frame in &self.frames {
            frame.encode(&mut writer);
        }
        writer.into_bytes()
    }

    /// Build a table of full frames from absolute offsets
    ///
    /// Offsets must be strictly increasing.
    pub fn from_full_frames(
        frames: impl IntoIterator<Item = (u16, Vec<VerificationType>, Vec<VerificationType>)>,
    ) -> Self {
        let mut previous: Option<u16> = None;
        let mut out = Vec::new();
        for (offset, locals, stack) in frames {
            let offset_delta = match previous {
                None => offset,
                Some(prev) => offset - prev - 1,
            };
            previous = Some(offset);
            out.push(StackMapFrame::Full {
                offset_delta,
                locals,
                stack,
            });
        }
        Self { frames: out }
    }

    /// Absolute code offsets the frames apply to
    pub fn offsets(&self) -> Vec<u32> {
        let mut offsets = Vec::with_capacity(self.frames.len());
        let mut previous: Option<u32> = None;
        for frame in &self.frames {
            let delta = frame.offset_delta() as u32;
            let offset = match previous {
                None => delta,
                Some(prev) => prev + delta + 1,
            };
            offsets.push(offset);
            previous = Some(offset);
        }
        offsets
    }

    /// Adjust the table for `inserted` bytes placed before the original code
    ///
    /// Only the first frame's delta is absolute, so moving it moves every
    /// frame. `Uninitialized` offsets are absolute and move individually.
    pub fn shift(&mut self, inserted: u16) {
        if let Some(first) = self.frames.first_mut() {
            *first.offset_delta_mut() += inserted;
        }
        for frame in &mut self.frames {
            for ty in frame.types_mut() {
                ty.shift(inserted);
            }
        }
    }
}

fn decode_types(reader: &mut ByteReader<'_>) -> Result<Vec<VerificationType>, DecodeError> {
    let count = reader.read_u16()?;
    let mut types = Vec::with_capacity(count as usize);
    for _ in 0..count {
        types.push(VerificationType::decode(reader)?);
    }
    Ok(types)
}

fn encode_types(types: &[VerificationType], writer: &mut ByteWriter) {
    writer.emit_u16(types.len() as u16);
    for ty in types {
        ty.encode(writer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_compact_forms() {
        // same(5), same_locals_1_stack_item(3, int), chop 1 (10), append [int] (2)
        let info = [0, 4, 5, 67, 1, 250, 0, 10, 252, 0, 2, 1];
        let table = StackMapTable::decode(&info).unwrap();
        assert_eq!(table.frames.len(), 4);
        assert_eq!(table.offsets(), vec![5, 9, 20, 23]);
        assert_eq!(table.encode(), info.to_vec());
    }

    #[test]
    fn test_shift_promotes_to_extended_form() {
        let mut table = StackMapTable {
            frames: vec![
                StackMapFrame::Same { offset_delta: 60 },
                StackMapFrame::SameLocals1StackItem {
                    offset_delta: 2,
                    stack: VerificationType::Uninitialized(4),
                },
            ],
        };
        table.shift(12);
        assert_eq!(table.offsets(), vec![72, 75]);

        let encoded = table.encode();
        // Delta 72 no longer fits frame type 0..63
        assert_eq!(&encoded[2..5], &[251, 0, 72]);

        let decoded = StackMapTable::decode(&encoded).unwrap();
        assert_eq!(
            decoded.frames[1],
            StackMapFrame::SameLocals1StackItem {
                offset_delta: 2,
                stack: VerificationType::Uninitialized(16),
            }
        );
    }

    #[test]
    fn test_full_frames_from_absolute_offsets() {
        let table = StackMapTable::from_full_frames(vec![
            (0, vec![VerificationType::Integer], vec![]),
            (7, vec![VerificationType::Integer], vec![VerificationType::Object(3)]),
        ]);
        assert_eq!(table.frames[1].offset_delta(), 6);
        assert_eq!(table.offsets(), vec![0, 7]);
    }

    #[test]
    fn test_reserved_frame_type() {
        assert!(StackMapTable::decode(&[0, 1, 200]).is_err());
    }
}
