//! Constant pool for class files

use crate::encoder::{checked_u16, decode_modified_utf8, ByteReader, ByteWriter, DecodeError, EncodeError};
use rustc_hash::FxHashMap;

/// Constant pool tags (JVMS §4.4)
#[allow(missing_docs)]
pub mod tags {
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELD_REF: u8 = 9;
    pub const METHOD_REF: u8 = 10;
    pub const INTERFACE_METHOD_REF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
    pub const METHOD_HANDLE: u8 = 15;
    pub const METHOD_TYPE: u8 = 16;
    pub const DYNAMIC: u8 = 17;
    pub const INVOKE_DYNAMIC: u8 = 18;
    pub const MODULE: u8 = 19;
    pub const PACKAGE: u8 = 20;
}

/// A single constant pool entry
///
/// Floating point values are kept as raw bits so entries can be hashed and
/// re-encoded exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)] // fields are the class file format's own index names
pub enum Constant {
    /// Modified UTF-8 text
    Utf8(String),
    /// `int` literal
    Integer(i32),
    /// `float` literal (raw IEEE bits)
    Float(u32),
    /// `long` literal, occupies two slots
    Long(i64),
    /// `double` literal (raw IEEE bits), occupies two slots
    Double(u64),
    /// Class reference (name index)
    Class(u16),
    /// String literal (utf8 index)
    String(u16),
    /// Field reference
    FieldRef { class: u16, name_and_type: u16 },
    /// Class method reference
    MethodRef { class: u16, name_and_type: u16 },
    /// Interface method reference
    InterfaceMethodRef { class: u16, name_and_type: u16 },
    /// Name and descriptor pair
    NameAndType { name: u16, descriptor: u16 },
    /// Method handle
    MethodHandle { kind: u8, reference: u16 },
    /// Method type (descriptor index)
    MethodType(u16),
    /// Dynamically computed constant
    Dynamic { bootstrap: u16, name_and_type: u16 },
    /// Invokedynamic call site
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    /// Module name
    Module(u16),
    /// Package name
    Package(u16),
    /// Slot 0 and the upper half of long/double entries
    Unusable,
}

impl Constant {
    /// Whether this entry takes two constant pool slots
    pub fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }

    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        let offset = reader.offset();
        let tag = reader.read_u8()?;
        let constant = match tag {
            tags::UTF8 => {
                let len = reader.read_u16()? as usize;
                let start = reader.offset();
                let bytes = reader.read_slice(len)?;
                let text = decode_modified_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8(start))?;
                Constant::Utf8(text)
            }
            tags::INTEGER => Constant::Integer(reader.read_i32()?),
            tags::FLOAT => Constant::Float(reader.read_u32()?),
            tags::LONG => Constant::Long(reader.read_u64()? as i64),
            tags::DOUBLE => Constant::Double(reader.read_u64()?),
            tags::CLASS => Constant::Class(reader.read_u16()?),
            tags::STRING => Constant::String(reader.read_u16()?),
            tags::FIELD_REF => Constant::FieldRef {
                class: reader.read_u16()?,
                name_and_type: reader.read_u16()?,
            },
            tags::METHOD_REF => Constant::MethodRef {
                class: reader.read_u16()?,
                name_and_type: reader.read_u16()?,
            },
            tags::INTERFACE_METHOD_REF => Constant::InterfaceMethodRef {
                class: reader.read_u16()?,
                name_and_type: reader.read_u16()?,
            },
            tags::NAME_AND_TYPE => Constant::NameAndType {
                name: reader.read_u16()?,
                descriptor: reader.read_u16()?,
            },
            tags::METHOD_HANDLE => Constant::MethodHandle {
                kind: reader.read_u8()?,
                reference: reader.read_u16()?,
            },
            tags::METHOD_TYPE => Constant::MethodType(reader.read_u16()?),
            tags::DYNAMIC => Constant::Dynamic {
                bootstrap: reader.read_u16()?,
                name_and_type: reader.read_u16()?,
            },
            tags::INVOKE_DYNAMIC => Constant::InvokeDynamic {
                bootstrap: reader.read_u16()?,
                name_and_type: reader.read_u16()?,
            },
            tags::MODULE => Constant::Module(reader.read_u16()?),
            tags::PACKAGE => Constant::Package(reader.read_u16()?),
            tag => return Err(DecodeError::InvalidConstantTag { tag, offset }),
        };
        Ok(constant)
    }

    fn encode(&self, writer: &mut ByteWriter) -> Result<(), EncodeError> {
        match self {
            Constant::Utf8(text) => {
                writer.emit_u8(tags::UTF8);
                writer.emit_utf8(text)?;
            }
            Constant::Integer(value) => {
                writer.emit_u8(tags::INTEGER);
                writer.emit_i32(*value);
            }
            Constant::Float(bits) => {
                writer.emit_u8(tags::FLOAT);
                writer.emit_u32(*bits);
            }
            Constant::Long(value) => {
                writer.emit_u8(tags::LONG);
                writer.emit_u64(*value as u64);
            }
            Constant::Double(bits) => {
                writer.emit_u8(tags::DOUBLE);
                writer.emit_u64(*bits);
            }
            Constant::Class(index) => {
                writer.emit_u8(tags::CLASS);
                writer.emit_u16(*index);
            }
            Constant::String(index) => {
                writer.emit_u8(tags::STRING);
                writer.emit_u16(*index);
            }
            Constant::FieldRef { class, name_and_type } => {
                writer.emit_u8(tags::FIELD_REF);
                writer.emit_u16(*class);
                writer.emit_u16(*name_and_type);
            }
            Constant::MethodRef { class, name_and_type } => {
                writer.emit_u8(tags::METHOD_REF);
                writer.emit_u16(*class);
                writer.emit_u16(*name_and_type);
            }
            Constant::InterfaceMethodRef { class, name_and_type } => {
                writer.emit_u8(tags::INTERFACE_METHOD_REF);
                writer.emit_u16(*class);
                writer.emit_u16(*name_and_type);
            }
            Constant::NameAndType { name, descriptor } => {
                writer.emit_u8(tags::NAME_AND_TYPE);
                writer.emit_u16(*name);
                writer.emit_u16(*descriptor);
            }
            Constant::MethodHandle { kind, reference } => {
                writer.emit_u8(tags::METHOD_HANDLE);
                writer.emit_u8(*kind);
                writer.emit_u16(*reference);
            }
            Constant::MethodType(index) => {
                writer.emit_u8(tags::METHOD_TYPE);
                writer.emit_u16(*index);
            }
            Constant::Dynamic { bootstrap, name_and_type } => {
                writer.emit_u8(tags::DYNAMIC);
                writer.emit_u16(*bootstrap);
                writer.emit_u16(*name_and_type);
            }
            Constant::InvokeDynamic { bootstrap, name_and_type } => {
                writer.emit_u8(tags::INVOKE_DYNAMIC);
                writer.emit_u16(*bootstrap);
                writer.emit_u16(*name_and_type);
            }
            Constant::Module(index) => {
                writer.emit_u8(tags::MODULE);
                writer.emit_u16(*index);
            }
            Constant::Package(index) => {
                writer.emit_u8(tags::PACKAGE);
                writer.emit_u16(*index);
            }
            Constant::Unusable => {}
        }
        Ok(())
    }
}

/// Class file constant pool
///
/// Index 0 is reserved; `long` and `double` entries are followed by an
/// [`Constant::Unusable`] placeholder, so indices here match class file
/// indices exactly.
#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: Vec<Constant>,
    lookup: FxHashMap<Constant, u16>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    /// Create a constant pool holding only the reserved slot 0
    pub fn new() -> Self {
        Self {
            entries: vec![Constant::Unusable],
            lookup: FxHashMap::default(),
        }
    }

    /// Number of slots including slot 0
    ///
    /// This is the `constant_pool_count` value once the pool is encoded; a
    /// pool larger than `u16::MAX` slots cannot be encoded.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Get an entry by index
    pub fn get(&self, index: u16) -> Result<&Constant, DecodeError> {
        match self.entries.get(index as usize) {
            Some(Constant::Unusable) | None => Err(DecodeError::Malformed {
                what: "constant pool reference",
                detail: format!("index {} is not a usable entry", index),
            }),
            Some(constant) => Ok(constant),
        }
    }

    /// Get the text of a `Utf8` entry
    pub fn utf8(&self, index: u16) -> Result<&str, DecodeError> {
        match self.get(index)? {
            Constant::Utf8(text) => Ok(text),
            other => Err(mismatch("Utf8", index, other)),
        }
    }

    /// Get the internal name referenced by a `Class` entry
    pub fn class_name(&self, index: u16) -> Result<&str, DecodeError> {
        match self.get(index)? {
            Constant::Class(name) => self.utf8(*name),
            other => Err(mismatch("Class", index, other)),
        }
    }

    /// Resolve a `NameAndType` entry to `(name, descriptor)`
    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str), DecodeError> {
        match self.get(index)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            other => Err(mismatch("NameAndType", index, other)),
        }
    }

    /// Resolve a field or method reference to `(owner, name, descriptor)`
    pub fn member_ref(&self, index: u16) -> Result<(&str, &str, &str), DecodeError> {
        match self.get(index)? {
            Constant::FieldRef { class, name_and_type }
            | Constant::MethodRef { class, name_and_type }
            | Constant::InterfaceMethodRef { class, name_and_type } => {
                let owner = self.class_name(*class)?;
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok((owner, name, descriptor))
            }
            other => Err(mismatch("member reference", index, other)),
        }
    }

    /// Add an entry, reusing an identical existing entry when present
    ///
    /// Once the pool has run out of indices, new entries get `u16::MAX` and
    /// [`ConstantPool::encode`] fails, so a full pool is never written out.
    pub fn add(&mut self, constant: Constant) -> u16 {
        if let Some(&index) = self.lookup.get(&constant) {
            return index;
        }
        let index = u16::try_from(self.entries.len()).unwrap_or(u16::MAX);
        let wide = constant.is_wide();
        self.lookup.insert(constant.clone(), index);
        self.entries.push(constant);
        if wide {
            self.entries.push(Constant::Unusable);
        }
        index
    }

    /// Add (or find) a `Utf8` entry
    pub fn add_utf8(&mut self, text: &str) -> u16 {
        self.add(Constant::Utf8(text.to_string()))
    }

    /// Add (or find) a `Class` entry for an internal name
    pub fn add_class(&mut self, internal_name: &str) -> u16 {
        let name = self.add_utf8(internal_name);
        self.add(Constant::Class(name))
    }

    /// Add (or find) a `String` literal entry
    pub fn add_string(&mut self, text: &str) -> u16 {
        let utf8 = self.add_utf8(text);
        self.add(Constant::String(utf8))
    }

    /// Add (or find) an `Integer` entry
    pub fn add_integer(&mut self, value: i32) -> u16 {
        self.add(Constant::Integer(value))
    }

    /// Add (or find) a `NameAndType` entry
    pub fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name = self.add_utf8(name);
        let descriptor = self.add_utf8(descriptor);
        self.add(Constant::NameAndType { name, descriptor })
    }

    /// Add (or find) a field reference
    pub fn add_field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.add_class(owner);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.add(Constant::FieldRef { class, name_and_type })
    }

    /// Add (or find) a class method reference
    pub fn add_method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.add_class(owner);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.add(Constant::MethodRef { class, name_and_type })
    }

    /// Add (or find) an interface method reference
    pub fn add_interface_method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.add_class(owner);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.add(Constant::InterfaceMethodRef { class, name_and_type })
    }

    /// Iterate over `(index, entry)` pairs, skipping reserved slots
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, c)| !matches!(c, Constant::Unusable))
            .map(|(i, c)| (i as u16, c))
    }

    /// Decode the constant pool (count followed by entries)
    pub fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        let count = reader.read_u16()?;
        if count == 0 {
            return Err(DecodeError::Malformed {
                what: "constant pool",
                detail: "constant_pool_count must be at least 1".to_string(),
            });
        }

        let mut pool = ConstantPool::new();
        pool.entries.reserve(count as usize);
        while pool.entries.len() < count as usize {
            let constant = Constant::decode(reader)?;
            let index = pool.entries.len() as u16;
            let wide = constant.is_wide();
            // First occurrence wins so re-added constants resolve to the original slot
            pool.lookup.entry(constant.clone()).or_insert(index);
            pool.entries.push(constant);
            if wide {
                pool.entries.push(Constant::Unusable);
            }
        }

        if pool.entries.len() != count as usize {
            return Err(DecodeError::Malformed {
                what: "constant pool",
                detail: "wide constant overruns constant_pool_count".to_string(),
            });
        }
        Ok(pool)
    }

    /// Encode the constant pool (count followed by entries)
    pub fn encode(&self, writer: &mut ByteWriter) -> Result<(), EncodeError> {
        writer.emit_u16(checked_u16("constant pool slots", self.count(), u16::MAX)?);
        for constant in &self.entries[1..] {
            constant.encode(writer)?;
        }
        Ok(())
    }
}

fn mismatch(expected: &str, index: u16, found: &Constant) -> DecodeError {
    DecodeError::Malformed {
        what: "constant pool reference",
        detail: format!("index {} should be {}, found {:?}", index, expected, found),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_reuses_entries() {
        let mut pool = ConstantPool::new();
        let a = pool.add_class("java/lang/Object");
        let b = pool.add_class("java/lang/Object");
        assert_eq!(a, b);
        assert_eq!(pool.class_name(a).unwrap(), "java/lang/Object");
        // utf8 + class
        assert_eq!(pool.count(), 3);
    }

    #[test]
    fn test_wide_entries_take_two_slots() {
        let mut pool = ConstantPool::new();
        let long = pool.add(Constant::Long(7));
        let next = pool.add_utf8("x");
        assert_eq!(long, 1);
        assert_eq!(next, 3);
        assert!(pool.get(2).is_err());
    }

    #[test]
    fn test_member_ref_resolution() {
        let mut pool = ConstantPool::new();
        let index = pool.add_method_ref("java/util/List", "add", "(Ljava/lang/Object;)Z");
        let (owner, name, descriptor) = pool.member_ref(index).unwrap();
        assert_eq!(owner, "java/util/List");
        assert_eq!(name, "add");
        assert_eq!(descriptor, "(Ljava/lang/Object;)Z");
    }

    #[test]
    fn test_encode_decode() {
        let mut pool = ConstantPool::new();
        pool.add_string("hello");
        pool.add(Constant::Double(1.5f64.to_bits()));
        pool.add_integer(-3);

        let mut writer = ByteWriter::new();
        pool.encode(&mut writer).unwrap();
        let bytes = writer.into_bytes();
        let decoded = ConstantPool::decode(&mut ByteReader::new(&bytes)).unwrap();

        assert_eq!(decoded.count(), pool.count());
        // utf8, string, double (two slots), integer
        assert_eq!(decoded.get(5).unwrap(), &Constant::Integer(-3));
    }

    #[test]
    fn test_full_pool_does_not_encode() {
        let mut pool = ConstantPool::new();
        for i in 0..65_534 {
            pool.add_integer(i);
        }
        assert_eq!(pool.count(), 65_535);
        pool.encode(&mut ByteWriter::new()).unwrap();

        let overflow = pool.add_integer(-1);
        assert_eq!(overflow, u16::MAX);
        assert!(matches!(
            pool.encode(&mut ByteWriter::new()),
            Err(EncodeError::LimitExceeded { count: 65_536, .. })
        ));
    }

    #[test]
    fn test_wrong_kind_is_reported() {
        let mut pool = ConstantPool::new();
        let utf8 = pool.add_utf8("x");
        assert!(pool.class_name(utf8).is_err());
    }
}
