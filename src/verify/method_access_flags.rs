use crate::codegen::class::ClassFile;
use crate::codegen::defs::access_flags;
use crate::codegen::method::MethodInfo;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum MethodAccessFlagsError {
    #[error("Invalid method access flags: 0x{0:04x}")]
    Invalid(u16),
}

pub type Result<T> = std::result::Result<T, MethodAccessFlagsError>;

/// Verify method access flags
pub fn verify(class_file: &ClassFile, method: &MethodInfo) -> Result<()> {
    let flags = method.access_flags;
    let visibility = (flags & access_flags::VISIBILITY_MASK).count_ones();
    if visibility > 1 {
        return Err(MethodAccessFlagsError::Invalid(flags));
    }

    let class_is_interface = class_file.access_flags & access_flags::ACC_INTERFACE != 0;
    if class_is_interface
        && flags & (access_flags::ACC_PROTECTED | access_flags::ACC_FINAL | access_flags::ACC_SYNCHRONIZED | access_flags::ACC_NATIVE)
            != 0
    {
        return Err(MethodAccessFlagsError::Invalid(flags));
    }

    if flags & access_flags::ACC_ABSTRACT != 0
        && flags
            & (access_flags::ACC_PRIVATE
                | access_flags::ACC_STATIC
                | access_flags::ACC_FINAL
                | access_flags::ACC_SYNCHRONIZED
                | access_flags::ACC_NATIVE
                | access_flags::ACC_STRICT)
            != 0
    {
        return Err(MethodAccessFlagsError::Invalid(flags));
    }

    Ok(())
}
