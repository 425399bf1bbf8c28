//! JVM class file model
//!
//! This crate decodes and encodes class files, models the pieces the weaver
//! rewrites (constant pool, descriptors, `Code` attributes and their stack map
//! frames) and provides a structural verifier for generated method bodies.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod class;
pub mod code;
pub mod constants;
pub mod descriptor;
pub mod encoder;
pub mod frame;
pub mod opcode;
pub mod verify;

pub use class::{access, attr, Attribute, ClassFile, ClassFileError, FieldInfo, MemberInfo, MethodInfo};
pub use code::{CodeAttribute, ExceptionHandler};
pub use constants::{Constant, ConstantPool};
pub use descriptor::{FieldType, MethodType};
pub use encoder::{ByteReader, ByteWriter, DecodeError, EncodeError};
pub use frame::{StackMapFrame, StackMapTable, VerificationType};
pub use opcode::{instruction_length, instructions, op, Instruction};
pub use verify::{verify_class, verify_code, VerifyError};
