//! Specific error types for class-file reading and code generation

use thiserror::Error;

/// Errors that can occur during constant pool operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConstPoolError {
    #[error("Constant pool is out of space")]
    OutOfSpace,
    #[error("Invalid constant pool index: {0}")]
    InvalidIndex(u16),
    #[error("Constant pool entry {index} is not a {expected}")]
    UnexpectedKind { index: u16, expected: &'static str },
}

/// Errors that can occur while parsing class-file bytes
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassReadError {
    #[error("Unexpected end of data at byte {offset}")]
    UnexpectedEof { offset: usize },
    #[error("Bad magic number: {0:#010x}")]
    BadMagic(u32),
    #[error("Unknown constant pool tag {tag} at index {index}")]
    UnknownConstantTag { tag: u8, index: u16 },
    #[error("Invalid modified UTF-8 in constant {index}")]
    InvalidUtf8 { index: u16 },
    #[error("{count} trailing bytes after class end")]
    TrailingBytes { count: usize },
    #[error("Unknown opcode {opcode:#04x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },
    #[error("Malformed attribute {name}: {reason}")]
    MalformedAttribute { name: String, reason: String },
    #[error("Constant pool error: {0}")]
    ConstPool(#[from] ConstPoolError),
}

/// Errors that can occur during descriptor parsing
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("Invalid type descriptor: {descriptor}")]
    InvalidTypeDescriptor { descriptor: String },
    #[error("Invalid method descriptor: {descriptor}")]
    InvalidMethodDescriptor { descriptor: String },
}

/// Errors that can occur during bytecode generation and relocation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BytecodeError {
    #[error("Constant pool error: {0}")]
    ConstPool(#[from] ConstPoolError),
    #[error("Stack underflow at offset {offset}")]
    StackUnderflow { offset: usize },
    #[error("Branch target too far: {offset}")]
    BranchTooFar { offset: i64 },
    #[error("Label {0} was never bound")]
    UnboundLabel(usize),
    #[error("Method code exceeds 65535 bytes")]
    CodeTooLarge,
    #[error("Unsupported instruction {name} at offset {offset}")]
    Unsupported { name: &'static str, offset: usize },
    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),
    #[error("Malformed code: {0}")]
    Malformed(#[from] ClassReadError),
}

/// Generic result type for constant pool operations
pub type ConstPoolResult<T> = Result<T, ConstPoolError>;

/// Generic result type for class reading
pub type ReadResult<T> = Result<T, ClassReadError>;

/// Generic result type for bytecode operations
pub type BytecodeResult<T> = Result<T, BytecodeError>;
