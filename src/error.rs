use thiserror::Error;

use crate::codegen::error::{BytecodeError, ConstPoolError};

/// Result type for classenhance operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for enhancement and key-class generation
///
/// Every variant is fatal for the class being processed; no partial output is
/// produced alongside an error.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed class {class}: {message}")]
    Malformed { class: String, message: String },

    #[error("Class {class} has no member `{member}` described by its metadata")]
    MissingMember { class: String, member: String },

    #[error("Unsupported construct in {class}.{member}: {reason}")]
    Unsupported {
        class: String,
        member: String,
        reason: String,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Constant pool of {class}: {source}")]
    ConstPool {
        class: String,
        #[source]
        source: ConstPoolError,
    },

    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    pub fn malformed(class: impl Into<String>, message: impl ToString) -> Self {
        Self::Malformed { class: class.into(), message: message.to_string() }
    }

    pub fn missing_member(class: impl Into<String>, member: impl Into<String>) -> Self {
        Self::MissingMember { class: class.into(), member: member.into() }
    }

    pub fn unsupported(class: impl Into<String>, member: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unsupported { class: class.into(), member: member.into(), reason: reason.into() }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    pub fn const_pool(class: impl Into<String>, source: ConstPoolError) -> Self {
        Self::ConstPool { class: class.into(), source }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Attach class and member context to a bytecode-level failure
    pub fn from_bytecode(class: &str, member: &str, err: BytecodeError) -> Self {
        match err {
            BytecodeError::ConstPool(source) => Self::const_pool(class, source),
            BytecodeError::Malformed(read) => Self::malformed(class, format!("{}: {}", member, read)),
            BytecodeError::Descriptor(d) => Self::malformed(class, format!("{}: {}", member, d)),
            BytecodeError::BranchTooFar { .. } | BytecodeError::CodeTooLarge | BytecodeError::Unsupported { .. } => {
                Self::unsupported(class, member, err.to_string())
            }
            BytecodeError::StackUnderflow { .. } | BytecodeError::UnboundLabel(_) => {
                Self::internal(format!("{}.{}: {}", class, member, err))
            }
        }
    }
}
