//! Class file structure (JVMS §4.1)

use crate::code::CodeAttribute;
use crate::constants::ConstantPool;
use crate::encoder::{checked_u32, ByteReader, ByteWriter, DecodeError, EncodeError};
use thiserror::Error;

/// Class file magic number
pub const MAGIC: u32 = 0xCAFE_BABE;

/// Highest class file major version understood (Java 23)
pub const MAX_MAJOR_VERSION: u16 = 67;

/// First major version that requires StackMapTable frames (Java 6)
pub const STACK_MAP_MAJOR_VERSION: u16 = 50;

/// Access flags for classes, fields and methods
#[allow(missing_docs)]
pub mod access {
    pub const PUBLIC: u16 = 0x0001;
    pub const PRIVATE: u16 = 0x0002;
    pub const PROTECTED: u16 = 0x0004;
    pub const STATIC: u16 = 0x0008;
    pub const FINAL: u16 = 0x0010;
    pub const SUPER: u16 = 0x0020;
    pub const SYNCHRONIZED: u16 = 0x0020;
    pub const VOLATILE: u16 = 0x0040;
    pub const BRIDGE: u16 = 0x0040;
    pub const TRANSIENT: u16 = 0x0080;
    pub const VARARGS: u16 = 0x0080;
    pub const NATIVE: u16 = 0x0100;
    pub const INTERFACE: u16 = 0x0200;
    pub const ABSTRACT: u16 = 0x0400;
    pub const STRICT: u16 = 0x0800;
    pub const SYNTHETIC: u16 = 0x1000;
    pub const ANNOTATION: u16 = 0x2000;
    pub const ENUM: u16 = 0x4000;
    pub const MODULE: u16 = 0x8000;
}

/// Well-known attribute names
#[allow(missing_docs)]
pub mod attr {
    pub const CODE: &str = "Code";
    pub const STACK_MAP_TABLE: &str = "StackMapTable";
    pub const LINE_NUMBER_TABLE: &str = "LineNumberTable";
    pub const LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
    pub const LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";
    pub const RUNTIME_VISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeVisibleTypeAnnotations";
    pub const RUNTIME_INVISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeInvisibleTypeAnnotations";
    pub const EXCEPTIONS: &str = "Exceptions";
    pub const SIGNATURE: &str = "Signature";
}

/// Class file decoding errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClassFileError {
    /// Decode error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected 0xCAFEBABE, got {0:#010x}")]
    BadMagic(u32),

    /// Unsupported version
    #[error("Unsupported class file version {major}.{minor} (max: {MAX_MAJOR_VERSION})")]
    UnsupportedVersion {
        /// Major version found
        major: u16,
        /// Minor version found
        minor: u16,
    },
}

/// An attribute kept as raw bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Constant pool index of the attribute name
    pub name_index: u16,
    /// Attribute body
    pub info: Vec<u8>,
}

impl Attribute {
    /// Build an attribute, adding its name to the pool
    pub fn new(pool: &mut ConstantPool, name: &str, info: Vec<u8>) -> Self {
        Self {
            name_index: pool.add_utf8(name),
            info,
        }
    }

    /// The attribute's name
    pub fn name<'p>(&self, pool: &'p ConstantPool) -> Result<&'p str, DecodeError> {
        pool.utf8(self.name_index)
    }

    pub(crate) fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        let name_index = reader.read_u16()?;
        let len = reader.read_u32()? as usize;
        let info = reader.read_bytes(len)?;
        Ok(Self { name_index, info })
    }

    pub(crate) fn encode(&self, writer: &mut ByteWriter) -> Result<(), EncodeError> {
        writer.emit_u16(self.name_index);
        writer.emit_u32(checked_u32("attribute bytes", self.info.len())?);
        writer.emit_bytes(&self.info);
        Ok(())
    }
}

pub(crate) fn decode_attributes(reader: &mut ByteReader<'_>) -> Result<Vec<Attribute>, DecodeError> {
    let count = reader.read_u16()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        attributes.push(Attribute::decode(reader)?);
    }
    Ok(attributes)
}

pub(crate) fn encode_attributes(attributes: &[Attribute], writer: &mut ByteWriter) -> Result<(), EncodeError> {
    writer.emit_count("attributes", attributes.len())?;
    for attribute in attributes {
        attribute.encode(writer)?;
    }
    Ok(())
}

/// A field or method declaration; both share the same layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    /// Access flags
    pub access_flags: u16,
    /// Name index
    pub name_index: u16,
    /// Descriptor index
    pub descriptor_index: u16,
    /// Attributes
    pub attributes: Vec<Attribute>,
}

/// Field declaration
pub type FieldInfo = MemberInfo;

/// Method declaration
pub type MethodInfo = MemberInfo;

impl MemberInfo {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            access_flags: reader.read_u16()?,
            name_index: reader.read_u16()?,
            descriptor_index: reader.read_u16()?,
            attributes: decode_attributes(reader)?,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) -> Result<(), EncodeError> {
        writer.emit_u16(self.access_flags);
        writer.emit_u16(self.name_index);
        writer.emit_u16(self.descriptor_index);
        encode_attributes(&self.attributes, writer)
    }

    /// Member name
    pub fn name<'p>(&self, pool: &'p ConstantPool) -> Result<&'p str, DecodeError> {
        pool.utf8(self.name_index)
    }

    /// Member descriptor
    pub fn descriptor<'p>(&self, pool: &'p ConstantPool) -> Result<&'p str, DecodeError> {
        pool.utf8(self.descriptor_index)
    }

    /// Whether any of `flags` is set
    pub fn has_flag(&self, flags: u16) -> bool {
        self.access_flags & flags != 0
    }

    /// Position of the first attribute called `name`
    pub fn attribute_position(&self, pool: &ConstantPool, name: &str) -> Option<usize> {
        self.attributes
            .iter()
            .position(|a| a.name(pool).map(|n| n == name).unwrap_or(false))
    }

    /// Decode the `Code` attribute, if present
    pub fn code(&self, pool: &ConstantPool) -> Result<Option<CodeAttribute>, DecodeError> {
        match self.attribute_position(pool, attr::CODE) {
            Some(index) => CodeAttribute::decode(&self.attributes[index].info).map(Some),
            None => Ok(None),
        }
    }

    /// Replace (or add) the `Code` attribute
    pub fn set_code(&mut self, pool: &mut ConstantPool, code: &CodeAttribute) -> Result<(), EncodeError> {
        let info = code.encode()?;
        match self.attribute_position(pool, attr::CODE) {
            Some(index) => self.attributes[index].info = info,
            None => self.attributes.push(Attribute::new(pool, attr::CODE, info)),
        }
        Ok(())
    }
}

/// A decoded class file
#[derive(Debug, Clone)]
pub struct ClassFile {
    /// Minor version
    pub minor_version: u16,
    /// Major version
    pub major_version: u16,
    /// Constant pool
    pub constant_pool: ConstantPool,
    /// Class access flags
    pub access_flags: u16,
    /// `Class` index of this class
    pub this_class: u16,
    /// `Class` index of the superclass, 0 for `java/lang/Object`
    pub super_class: u16,
    /// `Class` indices of the direct superinterfaces
    pub interfaces: Vec<u16>,
    /// Fields
    pub fields: Vec<FieldInfo>,
    /// Methods
    pub methods: Vec<MethodInfo>,
    /// Class attributes
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Create an empty public class (Java 8 version)
    pub fn new(name: &str, super_name: Option<&str>) -> Self {
        let mut constant_pool = ConstantPool::new();
        let this_class = constant_pool.add_class(name);
        let super_class = super_name.map(|s| constant_pool.add_class(s)).unwrap_or(0);
        Self {
            minor_version: 0,
            major_version: 52,
            constant_pool,
            access_flags: access::PUBLIC | access::SUPER,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Decode a class file
    pub fn decode(data: &[u8]) -> Result<Self, ClassFileError> {
        let mut reader = ByteReader::new(data);

        let magic = reader.read_u32()?;
        if magic != MAGIC {
            return Err(ClassFileError::BadMagic(magic));
        }

        let minor_version = reader.read_u16()?;
        let major_version = reader.read_u16()?;
        if major_version > MAX_MAJOR_VERSION || major_version < 45 {
            return Err(ClassFileError::UnsupportedVersion {
                major: major_version,
                minor: minor_version,
            });
        }

        let constant_pool = ConstantPool::decode(&mut reader)?;
        let access_flags = reader.read_u16()?;
        let this_class = reader.read_u16()?;
        let super_class = reader.read_u16()?;

        let interface_count = reader.read_u16()?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            interfaces.push(reader.read_u16()?);
        }

        let field_count = reader.read_u16()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(MemberInfo::decode(&mut reader)?);
        }

        let method_count = reader.read_u16()?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            methods.push(MemberInfo::decode(&mut reader)?);
        }

        let attributes = decode_attributes(&mut reader)?;
        if !reader.is_at_end() {
            return Err(DecodeError::TrailingBytes("class file").into());
        }

        // Validate the references every consumer relies on
        constant_pool.class_name(this_class)?;
        if super_class != 0 {
            constant_pool.class_name(super_class)?;
        }

        Ok(Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// Encode to class file bytes
    ///
    /// Fails when a table has outgrown its class file count field, for
    /// example a constant pool past 65535 slots.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut writer = ByteWriter::with_capacity(1024);
        writer.emit_u32(MAGIC);
        writer.emit_u16(self.minor_version);
        writer.emit_u16(self.major_version);
        self.constant_pool.encode(&mut writer)?;
        writer.emit_u16(self.access_flags);
        writer.emit_u16(self.this_class);
        writer.emit_u16(self.super_class);
        writer.emit_count("interfaces", self.interfaces.len())?;
        for interface in &self.interfaces {
            writer.emit_u16(*interface);
        }
        writer.emit_count("fields", self.fields.len())?;
        for field in &self.fields {
            field.encode(&mut writer)?;
        }
        writer.emit_count("methods", self.methods.len())?;
        for method in &self.methods {
            method.encode(&mut writer)?;
        }
        encode_attributes(&self.attributes, &mut writer)?;
        Ok(writer.into_bytes())
    }

    /// Internal name of this class
    pub fn name(&self) -> Result<&str, DecodeError> {
        self.constant_pool.class_name(self.this_class)
    }

    /// Internal name of the superclass, `None` for `java/lang/Object`
    pub fn super_name(&self) -> Result<Option<&str>, DecodeError> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.constant_pool.class_name(self.super_class).map(Some)
    }

    /// Internal names of the direct superinterfaces
    pub fn interface_names(&self) -> Result<Vec<&str>, DecodeError> {
        self.interfaces
            .iter()
            .map(|&index| self.constant_pool.class_name(index))
            .collect()
    }

    /// Whether this is an interface
    pub fn is_interface(&self) -> bool {
        self.access_flags & access::INTERFACE != 0
    }

    /// Whether methods in this class must carry StackMapTable frames
    pub fn requires_stack_maps(&self) -> bool {
        self.major_version >= STACK_MAP_MAJOR_VERSION
    }

    /// Add a direct superinterface unless already present
    pub fn add_interface(&mut self, internal_name: &str) -> bool {
        let index = self.constant_pool.add_class(internal_name);
        if self.interfaces.contains(&index) {
            return false;
        }
        self.interfaces.push(index);
        true
    }

    /// Add a field declaration
    pub fn add_field(&mut self, access_flags: u16, name: &str, descriptor: &str) -> &mut FieldInfo {
        let field = MemberInfo {
            access_flags,
            name_index: self.constant_pool.add_utf8(name),
            descriptor_index: self.constant_pool.add_utf8(descriptor),
            attributes: Vec::new(),
        };
        self.fields.push(field);
        let last = self.fields.len() - 1;
        &mut self.fields[last]
    }

    /// Add a method declaration with an optional body
    pub fn add_method(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        code: Option<&CodeAttribute>,
    ) -> Result<&mut MethodInfo, EncodeError> {
        let mut method = MemberInfo {
            access_flags,
            name_index: self.constant_pool.add_utf8(name),
            descriptor_index: self.constant_pool.add_utf8(descriptor),
            attributes: Vec::new(),
        };
        if let Some(code) = code {
            method.set_code(&mut self.constant_pool, code)?;
        }
        self.methods.push(method);
        let last = self.methods.len() - 1;
        Ok(&mut self.methods[last])
    }

    /// Find a method by name and descriptor
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| {
            m.name(&self.constant_pool).map(|n| n == name).unwrap_or(false)
                && m.descriptor(&self.constant_pool).map(|d| d == descriptor).unwrap_or(false)
        })
    }

    /// Whether a field with this name exists
    pub fn has_field(&self, name: &str) -> bool {
        self.fields
            .iter()
            .any(|f| f.name(&self.constant_pool).map(|n| n == name).unwrap_or(false))
    }
}
