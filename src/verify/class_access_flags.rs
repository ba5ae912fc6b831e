use crate::codegen::class::ClassFile;
use crate::codegen::defs::access_flags;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ClassAccessFlagsError {
    #[error("Invalid class access flags: 0x{0:04x}")]
    Invalid(u16),
}

pub type Result<T> = std::result::Result<T, ClassAccessFlagsError>;

/// Verify the class access flags
pub fn verify(class_file: &ClassFile, class_name: Option<&str>) -> Result<()> {
    let flags = class_file.access_flags;
    let has = |bit: u16| flags & bit != 0;

    if has(access_flags::ACC_ANNOTATION) && !has(access_flags::ACC_INTERFACE) {
        return Err(ClassAccessFlagsError::Invalid(flags));
    }

    if has(access_flags::ACC_INTERFACE) {
        // package-info is the only interface allowed without ACC_ABSTRACT
        if !has(access_flags::ACC_ABSTRACT) {
            let package_info = class_name.is_some_and(|full| full.rsplit('/').next() == Some("package-info"));
            if !package_info {
                return Err(ClassAccessFlagsError::Invalid(flags));
            }
        }
        if has(access_flags::ACC_FINAL)
            || has(access_flags::ACC_SUPER)
            || has(access_flags::ACC_ENUM)
            || has(access_flags::ACC_MODULE)
        {
            return Err(ClassAccessFlagsError::Invalid(flags));
        }
    } else if has(access_flags::ACC_FINAL) && has(access_flags::ACC_ABSTRACT) {
        return Err(ClassAccessFlagsError::Invalid(flags));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::defs::access_flags::*;

    #[test]
    fn abstract_final_class_is_invalid() {
        let mut class = ClassFile::new();
        class.access_flags = ACC_PUBLIC | ACC_SUPER | ACC_ABSTRACT;
        assert!(verify(&class, Some("p/A")).is_ok());
        class.access_flags |= ACC_FINAL;
        assert_eq!(verify(&class, Some("p/A")), Err(ClassAccessFlagsError::Invalid(class.access_flags)));
    }

    #[test]
    fn interfaces_must_be_abstract_except_package_info() {
        let mut class = ClassFile::new();
        class.access_flags = ACC_INTERFACE;
        assert!(verify(&class, Some("p/A")).is_err());
        assert!(verify(&class, Some("p/package-info")).is_ok());
    }
}
