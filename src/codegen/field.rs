//! FieldInfo structure and serialization

use super::attribute::AttributeInfo;
use super::constpool::ConstantPool;
use super::error::{ConstPoolResult, ReadResult};
use super::reader::ByteReader;

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

impl FieldInfo {
    pub fn new(access_flags: u16, name_index: u16, descriptor_index: u16) -> Self {
        Self { access_flags, name_index, descriptor_index, attributes: Vec::new() }
    }

    pub fn name<'a>(&self, constant_pool: &'a ConstantPool) -> ConstPoolResult<&'a str> {
        constant_pool.utf8(self.name_index)
    }

    pub fn descriptor<'a>(&self, constant_pool: &'a ConstantPool) -> ConstPoolResult<&'a str> {
        constant_pool.utf8(self.descriptor_index)
    }

    pub fn parse(reader: &mut ByteReader<'_>) -> ReadResult<FieldInfo> {
        Ok(FieldInfo {
            access_flags: reader.u2()?,
            name_index: reader.u2()?,
            descriptor_index: reader.u2()?,
            attributes: AttributeInfo::parse_list(reader)?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.access_flags.to_be_bytes());
        bytes.extend_from_slice(&self.name_index.to_be_bytes());
        bytes.extend_from_slice(&self.descriptor_index.to_be_bytes());
        bytes.extend_from_slice(&(self.attributes.len() as u16).to_be_bytes());
        for attribute in &self.attributes {
            bytes.extend_from_slice(&attribute.to_bytes());
        }
        bytes
    }
}
