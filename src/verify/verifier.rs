use crate::codegen::class::ClassFile;
use crate::codegen::constpool::Constant;
use crate::codegen::defs::{access_flags, major_versions};

use super::constant_pool::check_index;
use super::{class_access_flags, constant_pool, fields, interfaces, methods};

pub type VerifyResult<T> = Result<T, VerifyError>;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum VerifyError {
    #[error("Unsupported class file version {0}")]
    UnsupportedVersion(u16),
    #[error("Invalid this_class index {0}")]
    InvalidThisClass(u16),
    #[error("Invalid super_class index {0}")]
    InvalidSuperClass(u16),
    #[error(transparent)]
    ConstantPool(#[from] constant_pool::ConstantPoolVerifyError),
    #[error(transparent)]
    ClassAccessFlags(#[from] class_access_flags::ClassAccessFlagsError),
    #[error(transparent)]
    Interfaces(#[from] interfaces::InterfacesVerifyError),
    #[error(transparent)]
    Fields(#[from] fields::FieldVerifyError),
    #[error(transparent)]
    Methods(#[from] methods::MethodVerifyError),
}

/// Structural sanity checks over a class file, run on every class the enhancer emits
pub fn verify(class_file: &ClassFile) -> VerifyResult<()> {
    if !(major_versions::JAVA_1_1..=major_versions::JAVA_21).contains(&class_file.major_version) {
        return Err(VerifyError::UnsupportedVersion(class_file.major_version));
    }
    constant_pool::verify(class_file)?;
    verify_this_class(class_file)?;
    class_access_flags::verify(class_file, class_file.name().ok())?;
    verify_super_class(class_file)?;
    interfaces::verify(class_file)?;
    fields::verify(class_file)?;
    methods::verify(class_file)?;
    Ok(())
}

fn verify_this_class(class_file: &ClassFile) -> VerifyResult<()> {
    check_index(&class_file.constant_pool, class_file.this_class, |c| matches!(c, Constant::Class(_)))
        .map_err(|_| VerifyError::InvalidThisClass(class_file.this_class))
}

fn verify_super_class(class_file: &ClassFile) -> VerifyResult<()> {
    let super_class = class_file.super_class;
    let is_interface = class_file.access_flags & access_flags::ACC_INTERFACE != 0;
    // only java/lang/Object has no superclass
    if !is_interface && super_class == 0 {
        return Ok(());
    }
    check_index(&class_file.constant_pool, super_class, |c| matches!(c, Constant::Class(_)))
        .map_err(|_| VerifyError::InvalidSuperClass(super_class))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::defs::access_flags::*;

    fn empty_class() -> ClassFile {
        let mut class = ClassFile::new();
        class.access_flags = ACC_PUBLIC | ACC_SUPER;
        class.this_class = class.constant_pool.add_class("p/A").unwrap();
        class.super_class = class.constant_pool.add_class("java/lang/Object").unwrap();
        class
    }

    #[test]
    fn minimal_class_passes() {
        assert_eq!(verify(&empty_class()), Ok(()));
    }

    #[test]
    fn this_class_must_be_a_class_constant() {
        let mut class = empty_class();
        class.this_class = class.constant_pool.add_utf8("p/A").unwrap();
        assert_eq!(verify(&class), Err(VerifyError::InvalidThisClass(class.this_class)));
    }

    #[test]
    fn future_versions_are_rejected() {
        let mut class = empty_class();
        class.major_version = 99;
        assert_eq!(verify(&class), Err(VerifyError::UnsupportedVersion(99)));
    }
}
