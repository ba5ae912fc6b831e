use std::collections::HashSet;

use crate::codegen::class::ClassFile;
use crate::codegen::constpool::Constant;
use crate::codegen::defs::{access_flags, attribute_names};
use crate::codegen::descriptor::FieldType;

use super::constant_pool::check_index;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum FieldVerifyError {
    #[error("Invalid constant pool index {0}")]
    InvalidConstantPoolIndex(u16),
    #[error("Invalid field descriptor `{0}`")]
    InvalidDescriptor(String),
    #[error("Invalid field access flags: 0x{0:04x}")]
    InvalidFieldAccessFlags(u16),
    #[error("Duplicate field {0}")]
    DuplicateField(String),
    #[error("ConstantValue on non-static field {0}")]
    ConstantValueOnNonStatic(String),
}

pub type Result<T> = std::result::Result<T, FieldVerifyError>;

pub fn verify(class_file: &ClassFile) -> Result<()> {
    let pool = &class_file.constant_pool;
    let mut seen = HashSet::new();
    for field in &class_file.fields {
        for index in [field.name_index, field.descriptor_index] {
            check_index(pool, index, |c| matches!(c, Constant::Utf8(_)))
                .map_err(|_| FieldVerifyError::InvalidConstantPoolIndex(index))?;
        }
        let name = field.name(pool).unwrap_or_default();
        let descriptor = field.descriptor(pool).unwrap_or_default();
        FieldType::parse(descriptor).map_err(|_| FieldVerifyError::InvalidDescriptor(descriptor.to_string()))?;
        verify_access_flags(class_file, field.access_flags)?;
        if !seen.insert((name, descriptor)) {
            return Err(FieldVerifyError::DuplicateField(name.to_string()));
        }
        let constant_value = field
            .attributes
            .iter()
            .any(|a| a.name(pool) == Some(attribute_names::CONSTANT_VALUE));
        if constant_value && field.access_flags & access_flags::ACC_STATIC == 0 {
            return Err(FieldVerifyError::ConstantValueOnNonStatic(name.to_string()));
        }
    }
    Ok(())
}

fn verify_access_flags(class_file: &ClassFile, flags: u16) -> Result<()> {
    if (flags & access_flags::VISIBILITY_MASK).count_ones() > 1 {
        return Err(FieldVerifyError::InvalidFieldAccessFlags(flags));
    }
    if class_file.access_flags & access_flags::ACC_INTERFACE != 0 {
        let must = access_flags::ACC_PUBLIC | access_flags::ACC_STATIC | access_flags::ACC_FINAL;
        let illegal = access_flags::ACC_PRIVATE
            | access_flags::ACC_PROTECTED
            | access_flags::ACC_VOLATILE
            | access_flags::ACC_TRANSIENT
            | access_flags::ACC_ENUM;
        if flags & must != must || flags & illegal != 0 {
            return Err(FieldVerifyError::InvalidFieldAccessFlags(flags));
        }
    } else if flags & access_flags::ACC_FINAL != 0 && flags & access_flags::ACC_VOLATILE != 0 {
        return Err(FieldVerifyError::InvalidFieldAccessFlags(flags));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::defs::access_flags::*;

    #[test]
    fn duplicate_fields_are_rejected() {
        let mut class = ClassFile::new();
        class.add_field(ACC_PRIVATE, "x", "I").unwrap();
        assert!(verify(&class).is_ok());
        let again = class.fields[0].clone();
        class.fields.push(again);
        assert_eq!(verify(&class), Err(FieldVerifyError::DuplicateField("x".into())));
    }

    #[test]
    fn final_volatile_is_rejected() {
        let mut class = ClassFile::new();
        class.add_field(ACC_FINAL | ACC_VOLATILE, "x", "I").unwrap();
        assert!(matches!(verify(&class), Err(FieldVerifyError::InvalidFieldAccessFlags(_))));
    }
}
