//! Constant pool and constants for Java class files
//!
//! Indices are 1-based as in the class-file format. `Long` and `Double` occupy two
//! slots; the second slot holds [`Constant::Unusable`]. New entries are deduplicated
//! against existing ones so that appending never disturbs an index already in use.

use std::collections::HashMap;

use super::error::{ClassReadError, ConstPoolError, ConstPoolResult, ReadResult};
use super::reader::ByteReader;

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    String(u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    InterfaceMethodRef(u16, u16),
    NameAndType(u16, u16),
    MethodHandle(u8, u16),
    MethodType(u16),
    Dynamic(u16, u16),
    InvokeDynamic(u16, u16),
    Module(u16),
    Package(u16),
    /// Second slot of a `Long` or `Double`
    Unusable,
}

mod constant_tags {
    pub const CONSTANT_UTF8: u8 = 1;
    pub const CONSTANT_INTEGER: u8 = 3;
    pub const CONSTANT_FLOAT: u8 = 4;
    pub const CONSTANT_LONG: u8 = 5;
    pub const CONSTANT_DOUBLE: u8 = 6;
    pub const CONSTANT_CLASS: u8 = 7;
    pub const CONSTANT_STRING: u8 = 8;
    pub const CONSTANT_FIELDREF: u8 = 9;
    pub const CONSTANT_METHODREF: u8 = 10;
    pub const CONSTANT_INTERFACEMETHODREF: u8 = 11;
    pub const CONSTANT_NAMEANDTYPE: u8 = 12;
    pub const CONSTANT_METHODHANDLE: u8 = 15;
    pub const CONSTANT_METHODTYPE: u8 = 16;
    pub const CONSTANT_DYNAMIC: u8 = 17;
    pub const CONSTANT_INVOKEDYNAMIC: u8 = 18;
    pub const CONSTANT_MODULE: u8 = 19;
    pub const CONSTANT_PACKAGE: u8 = 20;
}

impl Constant {
    /// Number of pool slots this constant occupies
    pub fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        use constant_tags::*;
        let mut bytes = Vec::new();
        match self {
            Constant::Utf8(value) => {
                bytes.push(CONSTANT_UTF8);
                let encoded = encode_modified_utf8(value);
                bytes.extend_from_slice(&(encoded.len() as u16).to_be_bytes());
                bytes.extend_from_slice(&encoded);
            }
            Constant::Integer(value) => {
                bytes.push(CONSTANT_INTEGER);
                bytes.extend_from_slice(&value.to_be_bytes());
            }
            Constant::Float(value) => {
                bytes.push(CONSTANT_FLOAT);
                bytes.extend_from_slice(&value.to_bits().to_be_bytes());
            }
            Constant::Long(value) => {
                bytes.push(CONSTANT_LONG);
                bytes.extend_from_slice(&value.to_be_bytes());
            }
            Constant::Double(value) => {
                bytes.push(CONSTANT_DOUBLE);
                bytes.extend_from_slice(&value.to_bits().to_be_bytes());
            }
            Constant::Class(name_index) => {
                bytes.push(CONSTANT_CLASS);
                bytes.extend_from_slice(&name_index.to_be_bytes());
            }
            Constant::String(string_index) => {
                bytes.push(CONSTANT_STRING);
                bytes.extend_from_slice(&string_index.to_be_bytes());
            }
            Constant::FieldRef(class_index, name_and_type_index) => {
                bytes.push(CONSTANT_FIELDREF);
                bytes.extend_from_slice(&class_index.to_be_bytes());
                bytes.extend_from_slice(&name_and_type_index.to_be_bytes());
            }
            Constant::MethodRef(class_index, name_and_type_index) => {
                bytes.push(CONSTANT_METHODREF);
                bytes.extend_from_slice(&class_index.to_be_bytes());
                bytes.extend_from_slice(&name_and_type_index.to_be_bytes());
            }
            Constant::InterfaceMethodRef(class_index, name_and_type_index) => {
                bytes.push(CONSTANT_INTERFACEMETHODREF);
                bytes.extend_from_slice(&class_index.to_be_bytes());
                bytes.extend_from_slice(&name_and_type_index.to_be_bytes());
            }
            Constant::NameAndType(name_index, descriptor_index) => {
                bytes.push(CONSTANT_NAMEANDTYPE);
                bytes.extend_from_slice(&name_index.to_be_bytes());
                bytes.extend_from_slice(&descriptor_index.to_be_bytes());
            }
            Constant::MethodHandle(reference_kind, reference_index) => {
                bytes.push(CONSTANT_METHODHANDLE);
                bytes.push(*reference_kind);
                bytes.extend_from_slice(&reference_index.to_be_bytes());
            }
            Constant::MethodType(descriptor_index) => {
                bytes.push(CONSTANT_METHODTYPE);
                bytes.extend_from_slice(&descriptor_index.to_be_bytes());
            }
            Constant::Dynamic(bootstrap_method_attr_index, name_and_type_index) => {
                bytes.push(CONSTANT_DYNAMIC);
                bytes.extend_from_slice(&bootstrap_method_attr_index.to_be_bytes());
                bytes.extend_from_slice(&name_and_type_index.to_be_bytes());
            }
            Constant::InvokeDynamic(bootstrap_method_attr_index, name_and_type_index) => {
                bytes.push(CONSTANT_INVOKEDYNAMIC);
                bytes.extend_from_slice(&bootstrap_method_attr_index.to_be_bytes());
                bytes.extend_from_slice(&name_and_type_index.to_be_bytes());
            }
            Constant::Module(name_index) => {
                bytes.push(CONSTANT_MODULE);
                bytes.extend_from_slice(&name_index.to_be_bytes());
            }
            Constant::Package(name_index) => {
                bytes.push(CONSTANT_PACKAGE);
                bytes.extend_from_slice(&name_index.to_be_bytes());
            }
            Constant::Unusable => {}
        }
        bytes
    }

    fn parse(reader: &mut ByteReader<'_>, index: u16) -> ReadResult<Constant> {
        use constant_tags::*;
        let tag = reader.u1()?;
        let constant = match tag {
            CONSTANT_UTF8 => {
                let len = reader.u2()? as usize;
                let raw = reader.bytes(len)?;
                Constant::Utf8(
                    decode_modified_utf8(raw).ok_or(ClassReadError::InvalidUtf8 { index })?,
                )
            }
            CONSTANT_INTEGER => Constant::Integer(reader.u4()? as i32),
            CONSTANT_FLOAT => Constant::Float(f32::from_bits(reader.u4()?)),
            CONSTANT_LONG => Constant::Long(reader.u8()? as i64),
            CONSTANT_DOUBLE => Constant::Double(f64::from_bits(reader.u8()?)),
            CONSTANT_CLASS => Constant::Class(reader.u2()?),
            CONSTANT_STRING => Constant::String(reader.u2()?),
            CONSTANT_FIELDREF => Constant::FieldRef(reader.u2()?, reader.u2()?),
            CONSTANT_METHODREF => Constant::MethodRef(reader.u2()?, reader.u2()?),
            CONSTANT_INTERFACEMETHODREF => Constant::InterfaceMethodRef(reader.u2()?, reader.u2()?),
            CONSTANT_NAMEANDTYPE => Constant::NameAndType(reader.u2()?, reader.u2()?),
            CONSTANT_METHODHANDLE => Constant::MethodHandle(reader.u1()?, reader.u2()?),
            CONSTANT_METHODTYPE => Constant::MethodType(reader.u2()?),
            CONSTANT_DYNAMIC => Constant::Dynamic(reader.u2()?, reader.u2()?),
            CONSTANT_INVOKEDYNAMIC => Constant::InvokeDynamic(reader.u2()?, reader.u2()?),
            CONSTANT_MODULE => Constant::Module(reader.u2()?),
            CONSTANT_PACKAGE => Constant::Package(reader.u2()?),
            tag => return Err(ClassReadError::UnknownConstantTag { tag, index }),
        };
        Ok(constant)
    }
}

/// A symbolic field or method reference resolved from the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub owner: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    /// Slot `i` of this vector is pool index `i + 1`
    pub(crate) constants: Vec<Constant>,
    lookup: HashMap<Vec<u8>, u16>,
}

impl PartialEq for ConstantPool {
    fn eq(&self, other: &Self) -> bool {
        self.constants == other.constants
    }
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `constant_pool_count` header value
    pub fn count(&self) -> u16 {
        (self.constants.len() + 1) as u16
    }

    pub fn get(&self, index: u16) -> ConstPoolResult<&Constant> {
        if index == 0 {
            return Err(ConstPoolError::InvalidIndex(index));
        }
        match self.constants.get(index as usize - 1) {
            Some(Constant::Unusable) | None => Err(ConstPoolError::InvalidIndex(index)),
            Some(constant) => Ok(constant),
        }
    }

    /// Iterate over `(index, constant)` pairs, skipping unusable slots
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> {
        self.constants
            .iter()
            .enumerate()
            .filter(|(_, c)| !matches!(c, Constant::Unusable))
            .map(|(i, c)| ((i + 1) as u16, c))
    }

    pub fn add(&mut self, constant: Constant) -> ConstPoolResult<u16> {
        let key = constant.to_bytes();
        if let Some(&index) = self.lookup.get(&key) {
            return Ok(index);
        }
        if self.constants.len() + constant.width() > u16::MAX as usize - 1 {
            return Err(ConstPoolError::OutOfSpace);
        }
        let index = self.push(constant);
        self.lookup.insert(key, index);
        Ok(index)
    }

    fn push(&mut self, constant: Constant) -> u16 {
        let index = (self.constants.len() + 1) as u16;
        let wide = constant.width() == 2;
        self.constants.push(constant);
        if wide {
            self.constants.push(Constant::Unusable);
        }
        index
    }

    pub fn add_utf8(&mut self, value: &str) -> ConstPoolResult<u16> {
        if encode_modified_utf8(value).len() > u16::MAX as usize {
            return Err(ConstPoolError::OutOfSpace);
        }
        self.add(Constant::Utf8(value.to_string()))
    }
    pub fn add_class(&mut self, name: &str) -> ConstPoolResult<u16> {
        let name_index = self.add_utf8(name)?;
        self.add(Constant::Class(name_index))
    }
    pub fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> ConstPoolResult<u16> {
        let name_index = self.add_utf8(name)?;
        let descriptor_index = self.add_utf8(descriptor)?;
        self.add(Constant::NameAndType(name_index, descriptor_index))
    }
    pub fn add_field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> ConstPoolResult<u16> {
        let class_index = self.add_class(class)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        self.add(Constant::FieldRef(class_index, name_and_type_index))
    }
    pub fn add_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> ConstPoolResult<u16> {
        let class_index = self.add_class(class)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        self.add(Constant::MethodRef(class_index, name_and_type_index))
    }
    pub fn add_interface_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> ConstPoolResult<u16> {
        let class_index = self.add_class(class)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        self.add(Constant::InterfaceMethodRef(class_index, name_and_type_index))
    }
    pub fn add_string(&mut self, value: &str) -> ConstPoolResult<u16> {
        let utf8_index = self.add_utf8(value)?;
        self.add(Constant::String(utf8_index))
    }
    pub fn add_integer(&mut self, value: i32) -> ConstPoolResult<u16> {
        self.add(Constant::Integer(value))
    }
    pub fn add_long(&mut self, value: i64) -> ConstPoolResult<u16> {
        self.add(Constant::Long(value))
    }

    pub fn utf8(&self, index: u16) -> ConstPoolResult<&str> {
        match self.get(index)? {
            Constant::Utf8(value) => Ok(value),
            _ => Err(ConstPoolError::UnexpectedKind { index, expected: "Utf8" }),
        }
    }

    /// Internal name of the class at `index`
    pub fn class_name(&self, index: u16) -> ConstPoolResult<&str> {
        match self.get(index)? {
            Constant::Class(name_index) => self.utf8(*name_index),
            _ => Err(ConstPoolError::UnexpectedKind { index, expected: "Class" }),
        }
    }

    pub fn name_and_type(&self, index: u16) -> ConstPoolResult<(&str, &str)> {
        match self.get(index)? {
            Constant::NameAndType(name, descriptor) => Ok((self.utf8(*name)?, self.utf8(*descriptor)?)),
            _ => Err(ConstPoolError::UnexpectedKind { index, expected: "NameAndType" }),
        }
    }

    /// Resolve a Fieldref, Methodref or InterfaceMethodref
    pub fn member_ref(&self, index: u16) -> ConstPoolResult<MemberRef<'_>> {
        let (class_index, nat_index) = match self.get(index)? {
            Constant::FieldRef(c, nat)
            | Constant::MethodRef(c, nat)
            | Constant::InterfaceMethodRef(c, nat) => (*c, *nat),
            _ => return Err(ConstPoolError::UnexpectedKind { index, expected: "member reference" }),
        };
        let (name, descriptor) = self.name_and_type(nat_index)?;
        Ok(MemberRef { owner: self.class_name(class_index)?, name, descriptor })
    }

    /// Parse the pool that follows the version header
    pub fn parse(reader: &mut ByteReader<'_>) -> ReadResult<ConstantPool> {
        let count = reader.u2()?;
        let mut pool = ConstantPool::new();
        let mut index = 1u16;
        while index < count {
            let constant = Constant::parse(reader, index)?;
            let key = constant.to_bytes();
            let width = constant.width() as u16;
            let stored = pool.push(constant);
            pool.lookup.entry(key).or_insert(stored);
            index = index.saturating_add(width);
        }
        Ok(pool)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.count().to_be_bytes());
        for constant in &self.constants {
            bytes.extend_from_slice(&constant.to_bytes());
        }
        bytes
    }
}

/// Encode a string in the JVM's modified UTF-8
pub fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

/// Decode modified UTF-8; `None` on a malformed sequence
pub fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b & 0x80 == 0 {
            if b == 0 {
                return None;
            }
            units.push(b as u16);
            i += 1;
        } else if b & 0xE0 == 0xC0 {
            let b2 = *bytes.get(i + 1)?;
            if b2 & 0xC0 != 0x80 {
                return None;
            }
            units.push((((b & 0x1F) as u16) << 6) | (b2 & 0x3F) as u16);
            i += 2;
        } else if b & 0xF0 == 0xE0 {
            let b2 = *bytes.get(i + 1)?;
            let b3 = *bytes.get(i + 2)?;
            if b2 & 0xC0 != 0x80 || b3 & 0xC0 != 0x80 {
                return None;
            }
            units.push((((b & 0x0F) as u16) << 12) | (((b2 & 0x3F) as u16) << 6) | (b3 & 0x3F) as u16);
            i += 3;
        } else {
            return None;
        }
    }
    // Unpaired surrogates survive as U+FFFD; identifiers never contain them.
    Some(String::from_utf16_lossy(&units))
}
