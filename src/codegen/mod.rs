//! Class-file model: reading, writing, and assembling JVM bytecode
//!
//! This module handles parsing class files into a mutable model, the instruction
//! decoder used by the rewriter, and the code builder used for synthesized bodies.

pub mod attribute;
pub mod class;
pub mod code;
pub mod constpool;
pub mod defs;
pub mod descriptor;
pub mod error;
pub mod field;
pub mod frame;
pub mod instruction;
pub mod method;
pub mod opcodes;
pub mod reader;
pub mod writer;

// Re-export commonly used types
pub use attribute::{AttributeInfo, CodeAttribute, ExceptionTableEntry};
pub use class::ClassFile;
pub use code::{CodeBuilder, Label, Type};
pub use constpool::{Constant, ConstantPool, MemberRef};
pub use descriptor::{FieldType, MethodDescriptor};
pub use error::{BytecodeError, ClassReadError, ConstPoolError, DescriptorError};
pub use field::FieldInfo;
pub use method::MethodInfo;
pub use writer::{class_file_to_bytes, ClassfileWritable};
