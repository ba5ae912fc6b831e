//! Attributes and exception table structures for Java class files
//!
//! Attributes are kept as raw `(name_index, info)` pairs. Only the ones the enhancer
//! rewrites (`Code` and its offset-bearing children) get a structured form.

use super::constpool::ConstantPool;
use super::defs::attribute_names;
use super::error::{ClassReadError, ConstPoolResult, ReadResult};
use super::reader::ByteReader;

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeInfo {
    pub name_index: u16,
    pub info: Vec<u8>,
}

impl AttributeInfo {
    pub fn new(name_index: u16, info: Vec<u8>) -> Self {
        Self { name_index, info }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.name_index.to_be_bytes());
        bytes.extend_from_slice(&(self.info.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&self.info);
        bytes
    }

    /// The attribute's name, or `None` when the index does not name a Utf8 entry
    pub fn name<'a>(&self, constant_pool: &'a ConstantPool) -> Option<&'a str> {
        constant_pool.utf8(self.name_index).ok()
    }

    pub fn parse(reader: &mut ByteReader<'_>) -> ReadResult<AttributeInfo> {
        let name_index = reader.u2()?;
        let len = reader.u4()? as usize;
        let info = reader.bytes(len)?.to_vec();
        Ok(AttributeInfo { name_index, info })
    }

    pub fn parse_list(reader: &mut ByteReader<'_>) -> ReadResult<Vec<AttributeInfo>> {
        let count = reader.u2()?;
        (0..count).map(|_| AttributeInfo::parse(reader)).collect()
    }
}

/// First attribute in `attributes` with the given name
pub fn find_attribute<'a>(
    attributes: &'a [AttributeInfo],
    constant_pool: &ConstantPool,
    name: &str,
) -> Option<&'a AttributeInfo> {
    attributes.iter().find(|a| a.name(constant_pool) == Some(name))
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub attributes: Vec<AttributeInfo>,
}

impl CodeAttribute {
    pub fn new(max_stack: u16, max_locals: u16, code: Vec<u8>) -> Self {
        Self {
            max_stack,
            max_locals,
            code,
            exception_table: Vec::new(),
            attributes: Vec::new(),
        }
    }

    pub fn parse(info: &[u8]) -> ReadResult<CodeAttribute> {
        let mut reader = ByteReader::new(info);
        let max_stack = reader.u2()?;
        let max_locals = reader.u2()?;
        let code_len = reader.u4()? as usize;
        let code = reader.bytes(code_len)?.to_vec();
        let entries = reader.u2()?;
        let mut exception_table = Vec::with_capacity(entries as usize);
        for _ in 0..entries {
            exception_table.push(ExceptionTableEntry {
                start_pc: reader.u2()?,
                end_pc: reader.u2()?,
                handler_pc: reader.u2()?,
                catch_type: reader.u2()?,
            });
        }
        let attributes = AttributeInfo::parse_list(&mut reader)?;
        if !reader.is_empty() {
            return Err(ClassReadError::MalformedAttribute {
                name: attribute_names::CODE.to_string(),
                reason: format!("{} trailing bytes", reader.remaining()),
            });
        }
        Ok(CodeAttribute { max_stack, max_locals, code, exception_table, attributes })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.max_stack.to_be_bytes());
        bytes.extend_from_slice(&self.max_locals.to_be_bytes());
        bytes.extend_from_slice(&(self.code.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&self.code);
        bytes.extend_from_slice(&(self.exception_table.len() as u16).to_be_bytes());
        for entry in &self.exception_table {
            bytes.extend_from_slice(&entry.to_bytes());
        }
        bytes.extend_from_slice(&(self.attributes.len() as u16).to_be_bytes());
        for attribute in &self.attributes {
            bytes.extend_from_slice(&attribute.to_bytes());
        }
        bytes
    }

    /// Wrap this code body as a `Code` attribute
    pub fn into_attribute(self, constant_pool: &mut ConstantPool) -> ConstPoolResult<AttributeInfo> {
        let name_index = constant_pool.add_utf8(attribute_names::CODE)?;
        Ok(AttributeInfo::new(name_index, self.to_bytes()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

impl ExceptionTableEntry {
    pub fn new(start_pc: u16, end_pc: u16, handler_pc: u16, catch_type: u16) -> Self {
        Self { start_pc, end_pc, handler_pc, catch_type }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.start_pc.to_be_bytes());
        bytes.extend_from_slice(&self.end_pc.to_be_bytes());
        bytes.extend_from_slice(&self.handler_pc.to_be_bytes());
        bytes.extend_from_slice(&self.catch_type.to_be_bytes());
        bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumberEntry {
    pub start_pc: u16,
    pub line_number: u16,
}

/// Parse a LineNumberTable payload
pub fn parse_line_numbers(info: &[u8]) -> ReadResult<Vec<LineNumberEntry>> {
    let mut reader = ByteReader::new(info);
    let count = reader.u2()?;
    (0..count)
        .map(|_| Ok(LineNumberEntry { start_pc: reader.u2()?, line_number: reader.u2()? }))
        .collect()
}

pub fn line_numbers_to_bytes(entries: &[LineNumberEntry]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&(entries.len() as u16).to_be_bytes());
    for e in entries {
        bytes.extend_from_slice(&e.start_pc.to_be_bytes());
        bytes.extend_from_slice(&e.line_number.to_be_bytes());
    }
    bytes
}

/// One row of a LocalVariableTable or LocalVariableTypeTable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariableEntry {
    pub start_pc: u16,
    pub length: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub index: u16,
}

pub fn parse_local_variables(info: &[u8]) -> ReadResult<Vec<LocalVariableEntry>> {
    let mut reader = ByteReader::new(info);
    let count = reader.u2()?;
    (0..count)
        .map(|_| {
            Ok(LocalVariableEntry {
                start_pc: reader.u2()?,
                length: reader.u2()?,
                name_index: reader.u2()?,
                descriptor_index: reader.u2()?,
                index: reader.u2()?,
            })
        })
        .collect()
}

pub fn local_variables_to_bytes(entries: &[LocalVariableEntry]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&(entries.len() as u16).to_be_bytes());
    for e in entries {
        bytes.extend_from_slice(&e.start_pc.to_be_bytes());
        bytes.extend_from_slice(&e.length.to_be_bytes());
        bytes.extend_from_slice(&e.name_index.to_be_bytes());
        bytes.extend_from_slice(&e.descriptor_index.to_be_bytes());
        bytes.extend_from_slice(&e.index.to_be_bytes());
    }
    bytes
}
