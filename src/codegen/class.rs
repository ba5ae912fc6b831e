//! Core classfile structure: ClassFile

use super::attribute::AttributeInfo;
use super::constpool::ConstantPool;
use super::defs::{JAVA_1_8, MAGIC};
use super::error::{ClassReadError, ConstPoolResult, ReadResult};
use super::field::FieldInfo;
use super::method::MethodInfo;
use super::reader::ByteReader;

#[derive(Debug, Clone, PartialEq)]
pub struct ClassFile {
    pub magic: u32,
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub attributes: Vec<AttributeInfo>,
}

impl Default for ClassFile {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassFile {
    pub fn new() -> Self {
        Self {
            magic: MAGIC,
            minor_version: 0,
            major_version: JAVA_1_8,
            constant_pool: ConstantPool::new(),
            access_flags: 0,
            this_class: 0,
            super_class: 0,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Parse a complete class file
    pub fn parse(bytes: &[u8]) -> ReadResult<ClassFile> {
        let mut reader = ByteReader::new(bytes);
        let magic = reader.u4()?;
        if magic != MAGIC {
            return Err(ClassReadError::BadMagic(magic));
        }
        let minor_version = reader.u2()?;
        let major_version = reader.u2()?;
        let constant_pool = ConstantPool::parse(&mut reader)?;
        let access_flags = reader.u2()?;
        let this_class = reader.u2()?;
        let super_class = reader.u2()?;
        let interface_count = reader.u2()?;
        let interfaces = (0..interface_count).map(|_| reader.u2()).collect::<ReadResult<Vec<_>>>()?;
        let field_count = reader.u2()?;
        let fields = (0..field_count).map(|_| FieldInfo::parse(&mut reader)).collect::<ReadResult<Vec<_>>>()?;
        let method_count = reader.u2()?;
        let methods = (0..method_count).map(|_| MethodInfo::parse(&mut reader)).collect::<ReadResult<Vec<_>>>()?;
        let attributes = AttributeInfo::parse_list(&mut reader)?;
        if !reader.is_empty() {
            return Err(ClassReadError::TrailingBytes { count: reader.remaining() });
        }
        let class = ClassFile {
            magic,
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        };
        // Header references must resolve before anyone asks for names.
        class.name()?;
        class.super_name()?;
        class.interface_names()?;
        Ok(class)
    }

    /// Internal name of this class
    pub fn name(&self) -> ConstPoolResult<&str> {
        self.constant_pool.class_name(self.this_class)
    }

    /// Internal name of the superclass, `None` for `java/lang/Object`
    pub fn super_name(&self) -> ConstPoolResult<Option<&str>> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.constant_pool.class_name(self.super_class).map(Some)
    }

    pub fn interface_names(&self) -> ConstPoolResult<Vec<&str>> {
        self.interfaces.iter().map(|&i| self.constant_pool.class_name(i)).collect()
    }

    pub fn has_access(&self, flag: u16) -> bool {
        self.access_flags & flag != 0
    }

    pub fn find_field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name(&self.constant_pool).ok() == Some(name))
    }

    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| {
            m.name(&self.constant_pool).ok() == Some(name)
                && m.descriptor(&self.constant_pool).ok() == Some(descriptor)
        })
    }

    pub fn find_method_index(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.methods.iter().position(|m| {
            m.name(&self.constant_pool).ok() == Some(name)
                && m.descriptor(&self.constant_pool).ok() == Some(descriptor)
        })
    }

    pub fn has_method(&self, name: &str, descriptor: &str) -> bool {
        self.find_method(name, descriptor).is_some()
    }

    pub fn has_field(&self, name: &str, descriptor: &str) -> bool {
        self.fields.iter().any(|f| {
            f.name(&self.constant_pool).ok() == Some(name)
                && f.descriptor(&self.constant_pool).ok() == Some(descriptor)
        })
    }

    pub fn implements(&self, interface: &str) -> bool {
        self.interfaces
            .iter()
            .any(|&i| self.constant_pool.class_name(i).ok() == Some(interface))
    }

    /// Append an interface unless already present
    pub fn add_interface(&mut self, interface: &str) -> ConstPoolResult<bool> {
        if self.implements(interface) {
            return Ok(false);
        }
        let index = self.constant_pool.add_class(interface)?;
        self.interfaces.push(index);
        Ok(true)
    }

    pub fn add_field(&mut self, access_flags: u16, name: &str, descriptor: &str) -> ConstPoolResult<()> {
        let name_index = self.constant_pool.add_utf8(name)?;
        let descriptor_index = self.constant_pool.add_utf8(descriptor)?;
        self.fields.push(FieldInfo::new(access_flags, name_index, descriptor_index));
        Ok(())
    }
}
