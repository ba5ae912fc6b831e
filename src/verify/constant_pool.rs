use crate::codegen::class::ClassFile;
use crate::codegen::constpool::{Constant, ConstantPool};
use crate::codegen::defs::attribute_names;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConstantPoolVerifyError {
    #[error("Invalid constant pool index {0}")]
    InvalidConstantPoolIndex(u16),
    #[error("Invalid constant pool index type {0}")]
    InvalidConstantPoolIndexType(u16),
    #[error("BootstrapMethods attribute not defined")]
    BootstrapMethodsNotDefined,
}

pub type Result<T> = std::result::Result<T, ConstantPoolVerifyError>;

/// Verify that every constant refers to entries of the right kind
pub fn verify(class_file: &ClassFile) -> Result<()> {
    let pool = &class_file.constant_pool;
    let has_bootstrap = class_file
        .attributes
        .iter()
        .any(|a| a.name(pool) == Some(attribute_names::BOOTSTRAP_METHODS));
    for (index, constant) in pool.iter() {
        match constant {
            Constant::Class(name) | Constant::Module(name) | Constant::Package(name) | Constant::String(name) => {
                expect(pool, index, *name, is_utf8)?
            }
            Constant::MethodType(descriptor) => expect(pool, index, *descriptor, is_utf8)?,
            Constant::FieldRef(class, nat) | Constant::MethodRef(class, nat) | Constant::InterfaceMethodRef(class, nat) => {
                expect(pool, index, *class, |c| matches!(c, Constant::Class(_)))?;
                expect(pool, index, *nat, |c| matches!(c, Constant::NameAndType(..)))?;
            }
            Constant::NameAndType(name, descriptor) => {
                expect(pool, index, *name, is_utf8)?;
                expect(pool, index, *descriptor, is_utf8)?;
            }
            Constant::MethodHandle(_, reference) => expect(pool, index, *reference, |c| {
                matches!(c, Constant::FieldRef(..) | Constant::MethodRef(..) | Constant::InterfaceMethodRef(..))
            })?,
            Constant::Dynamic(_, nat) | Constant::InvokeDynamic(_, nat) => {
                if !has_bootstrap {
                    return Err(ConstantPoolVerifyError::BootstrapMethodsNotDefined);
                }
                expect(pool, index, *nat, |c| matches!(c, Constant::NameAndType(..)))?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn is_utf8(constant: &Constant) -> bool {
    matches!(constant, Constant::Utf8(_))
}

fn expect(pool: &ConstantPool, owner: u16, target: u16, kind: impl Fn(&Constant) -> bool) -> Result<()> {
    match pool.get(target) {
        Ok(c) if kind(c) => Ok(()),
        Ok(_) => Err(ConstantPoolVerifyError::InvalidConstantPoolIndexType(owner)),
        Err(_) => Err(ConstantPoolVerifyError::InvalidConstantPoolIndex(owner)),
    }
}

/// Check that `index` names a constant accepted by `kind`
pub(crate) fn check_index(pool: &ConstantPool, index: u16, kind: impl Fn(&Constant) -> bool) -> Result<()> {
    expect(pool, index, index, kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dangling_class_name_is_rejected() {
        let mut class = ClassFile::new();
        class.this_class = class.constant_pool.add_class("p/A").unwrap();
        assert_eq!(verify(&class), Ok(()));
        class.constant_pool.constants.push(Constant::Class(99));
        assert_eq!(verify(&class), Err(ConstantPoolVerifyError::InvalidConstantPoolIndex(3)));
    }

    #[test]
    fn invoke_dynamic_needs_bootstrap_methods() {
        let mut class = ClassFile::new();
        let nat = class.constant_pool.add_name_and_type("run", "()V").unwrap();
        class.constant_pool.add(Constant::InvokeDynamic(0, nat)).unwrap();
        assert_eq!(verify(&class), Err(ConstantPoolVerifyError::BootstrapMethodsNotDefined));
    }
}
