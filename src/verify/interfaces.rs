use crate::codegen::class::ClassFile;
use crate::codegen::constpool::Constant;

use super::constant_pool::{check_index, ConstantPoolVerifyError};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum InterfacesVerifyError {
    #[error("Invalid constant pool index {0}")]
    InvalidConstantPoolIndex(u16),
    #[error("Invalid constant pool index type {0}")]
    InvalidConstantPoolIndexType(u16),
    #[error("Interface {0} is listed twice")]
    Duplicate(String),
}

pub type Result<T> = std::result::Result<T, InterfacesVerifyError>;

/// Verify the interfaces table
pub fn verify(class_file: &ClassFile) -> Result<()> {
    let pool = &class_file.constant_pool;
    let mut seen = Vec::with_capacity(class_file.interfaces.len());
    for &interface in &class_file.interfaces {
        check_index(pool, interface, |c| matches!(c, Constant::Class(_))).map_err(|e| match e {
            ConstantPoolVerifyError::InvalidConstantPoolIndexType(i) => InterfacesVerifyError::InvalidConstantPoolIndexType(i),
            _ => InterfacesVerifyError::InvalidConstantPoolIndex(interface),
        })?;
        let name = pool.class_name(interface).unwrap_or_default();
        if seen.contains(&name) {
            return Err(InterfacesVerifyError::Duplicate(name.to_string()));
        }
        seen.push(name);
    }
    Ok(())
}
