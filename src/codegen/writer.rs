//! Trait-based serialization for classfile structures

use std::io::Write;

use super::class::ClassFile;
use super::constpool::ConstantPool;

/// An object which can be written into a classfile.
pub trait ClassfileWritable {
    /// Writes the bytes of this object into the given buffer.
    fn write_to_classfile<W: Write>(&self, buffer: &mut W) -> std::io::Result<()>;

    /// Writes the bytes of this object into a newly created buffer.
    fn to_classfile_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write_to_classfile(&mut buffer);
        buffer
    }
}

impl ClassfileWritable for ClassFile {
    fn write_to_classfile<W: Write>(&self, buffer: &mut W) -> std::io::Result<()> {
        buffer.write_all(&self.magic.to_be_bytes())?;
        buffer.write_all(&self.minor_version.to_be_bytes())?;
        buffer.write_all(&self.major_version.to_be_bytes())?;

        self.constant_pool.write_to_classfile(buffer)?;

        buffer.write_all(&self.access_flags.to_be_bytes())?;
        buffer.write_all(&self.this_class.to_be_bytes())?;
        buffer.write_all(&self.super_class.to_be_bytes())?;

        buffer.write_all(&(self.interfaces.len() as u16).to_be_bytes())?;
        for interface in &self.interfaces {
            buffer.write_all(&interface.to_be_bytes())?;
        }

        buffer.write_all(&(self.fields.len() as u16).to_be_bytes())?;
        for field in &self.fields {
            buffer.write_all(&field.to_bytes())?;
        }

        buffer.write_all(&(self.methods.len() as u16).to_be_bytes())?;
        for method in &self.methods {
            buffer.write_all(&method.to_bytes())?;
        }

        buffer.write_all(&(self.attributes.len() as u16).to_be_bytes())?;
        for attribute in &self.attributes {
            buffer.write_all(&attribute.to_bytes())?;
        }
        Ok(())
    }
}

impl ClassfileWritable for ConstantPool {
    fn write_to_classfile<W: Write>(&self, buffer: &mut W) -> std::io::Result<()> {
        buffer.write_all(&self.to_bytes())
    }
}

pub fn class_file_to_bytes(class_file: &ClassFile) -> Vec<u8> {
    class_file.to_classfile_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::defs::access_flags::*;

    #[test]
    fn written_class_parses_back() {
        let mut class = ClassFile::new();
        class.access_flags = ACC_PUBLIC | ACC_SUPER;
        class.this_class = class.constant_pool.add_class("p/Point").unwrap();
        class.super_class = class.constant_pool.add_class("java/lang/Object").unwrap();
        class.add_field(ACC_PRIVATE, "x", "I").unwrap();
        class.add_interface("java/io/Serializable").unwrap();

        let bytes = class_file_to_bytes(&class);
        assert_eq!(&bytes[..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
        let parsed = ClassFile::parse(&bytes).unwrap();
        assert_eq!(parsed.name().unwrap(), "p/Point");
        assert_eq!(parsed.super_name().unwrap(), Some("java/lang/Object"));
        assert!(parsed.has_field("x", "I"));
        assert!(parsed.implements("java/io/Serializable"));
        assert_eq!(class_file_to_bytes(&parsed), bytes);
    }

    #[test]
    fn bad_magic_is_reported() {
        let err = ClassFile::parse(&[0, 0, 0, 0, 0, 0, 0, 0]).unwrap_err();
        assert_eq!(err, crate::codegen::error::ClassReadError::BadMagic(0));
    }
}
