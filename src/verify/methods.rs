use std::collections::HashSet;

use crate::codegen::class::ClassFile;
use crate::codegen::constpool::Constant;
use crate::codegen::defs::{access_flags, attribute_names, STATIC_INITIALIZER_METHOD_NAME};
use crate::codegen::descriptor::MethodDescriptor;
use crate::codegen::instruction::decode;
use crate::codegen::method::MethodInfo;

use super::constant_pool::check_index;
use super::method_access_flags;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum MethodVerifyError {
    #[error("Invalid constant pool index {0}")]
    InvalidConstantPoolIndex(u16),
    #[error("Invalid method descriptor `{0}`")]
    InvalidDescriptor(String),
    #[error("Invalid method access flags: 0x{0:04x}")]
    InvalidMethodAccessFlags(u16),
    #[error("Method {0} must have a Code attribute unless abstract or native")]
    MissingCodeAttribute(String),
    #[error("Abstract or native method {0} must not have a Code attribute")]
    ForbiddenCodeAttribute(String),
    #[error("Duplicate method {0}{1}")]
    DuplicateMethod(String, String),
    #[error("Method {0} has an invalid Code attribute: {1}")]
    InvalidCode(String, String),
}

pub type Result<T> = std::result::Result<T, MethodVerifyError>;

/// Verify the methods table
pub fn verify(class_file: &ClassFile) -> Result<()> {
    let pool = &class_file.constant_pool;
    let mut seen = HashSet::new();
    for method in &class_file.methods {
        method_access_flags::verify(class_file, method)
            .map_err(|method_access_flags::MethodAccessFlagsError::Invalid(bits)| MethodVerifyError::InvalidMethodAccessFlags(bits))?;
        for index in [method.name_index, method.descriptor_index] {
            check_index(pool, index, |c| matches!(c, Constant::Utf8(_)))
                .map_err(|_| MethodVerifyError::InvalidConstantPoolIndex(index))?;
        }
        let name = method.name(pool).unwrap_or_default();
        let descriptor = method.descriptor(pool).unwrap_or_default();
        let parsed =
            MethodDescriptor::parse(descriptor).map_err(|_| MethodVerifyError::InvalidDescriptor(descriptor.to_string()))?;
        if !seen.insert((name, descriptor)) {
            return Err(MethodVerifyError::DuplicateMethod(name.to_string(), descriptor.to_string()));
        }
        verify_code(class_file, method, name, &parsed)?;
    }
    Ok(())
}

fn verify_code(class_file: &ClassFile, method: &MethodInfo, name: &str, descriptor: &MethodDescriptor) -> Result<()> {
    let pool = &class_file.constant_pool;
    let code_attributes = method.attributes.iter().filter(|a| a.name(pool) == Some(attribute_names::CODE)).count();
    let bodiless = method.access_flags & (access_flags::ACC_ABSTRACT | access_flags::ACC_NATIVE) != 0;
    match (bodiless, code_attributes) {
        (true, 0) => return Ok(()),
        (true, _) => return Err(MethodVerifyError::ForbiddenCodeAttribute(name.to_string())),
        (false, 0) => return Err(MethodVerifyError::MissingCodeAttribute(name.to_string())),
        (false, 1) => {}
        (false, _) => return Err(MethodVerifyError::InvalidCode(name.to_string(), "duplicate Code attribute".into())),
    }
    let invalid = |reason: String| MethodVerifyError::InvalidCode(name.to_string(), reason);
    let Some(code) = method.code(pool).map_err(|e| invalid(e.to_string()))? else {
        return Err(MethodVerifyError::MissingCodeAttribute(name.to_string()));
    };
    if code.code.is_empty() || code.code.len() > u16::MAX as usize {
        return Err(invalid(format!("code length {}", code.code.len())));
    }
    decode(&code.code).map_err(|e| invalid(e.to_string()))?;
    let is_static = method.access_flags & access_flags::ACC_STATIC != 0 || name == STATIC_INITIALIZER_METHOD_NAME;
    let needed = descriptor.arg_slots() + u16::from(!is_static);
    if code.max_locals < needed {
        return Err(invalid(format!("max_locals {} is below the {} argument slots", code.max_locals, needed)));
    }
    let length = code.code.len() as u16;
    for entry in &code.exception_table {
        if entry.start_pc >= entry.end_pc || entry.end_pc > length || entry.handler_pc >= length {
            return Err(invalid(format!(
                "exception range {}..{} -> {} is out of bounds",
                entry.start_pc, entry.end_pc, entry.handler_pc
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::defs::access_flags::*;
    use crate::codegen::{CodeAttribute, ConstantPool};

    fn method(pool: &mut ConstantPool, access: u16, name: &str, descriptor: &str) -> MethodInfo {
        MethodInfo::new(access, pool.add_utf8(name).unwrap(), pool.add_utf8(descriptor).unwrap())
    }

    #[test]
    fn concrete_methods_need_code() {
        let mut class = ClassFile::new();
        let m = method(&mut class.constant_pool, ACC_PUBLIC, "run", "()V");
        class.methods.push(m);
        assert_eq!(verify(&class), Err(MethodVerifyError::MissingCodeAttribute("run".into())));

        let code = CodeAttribute::new(0, 1, vec![crate::codegen::opcodes::RETURN]);
        class.methods[0].set_code(&mut class.constant_pool, code).unwrap();
        assert_eq!(verify(&class), Ok(()));
    }

    #[test]
    fn max_locals_must_cover_arguments() {
        let mut class = ClassFile::new();
        let mut m = method(&mut class.constant_pool, ACC_PUBLIC, "set", "(J)V");
        let code = CodeAttribute::new(0, 2, vec![crate::codegen::opcodes::RETURN]);
        m.set_code(&mut class.constant_pool, code).unwrap();
        class.methods.push(m);
        assert!(matches!(verify(&class), Err(MethodVerifyError::InvalidCode(..))));
    }
}
