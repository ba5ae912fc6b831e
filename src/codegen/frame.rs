//! StackMapTable frames (JVMS 4.7.4)

use super::attribute::AttributeInfo;
use super::constpool::ConstantPool;
use super::defs::attribute_names;
use super::error::{ClassReadError, ConstPoolResult, ReadResult};
use super::reader::ByteReader;

/// VerificationTypeInfo as defined in JVMS 4.7.4
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    Object(u16),        // cpool index to CONSTANT_Class
    Uninitialized(u16), // offset of the `new` instruction
}

impl VerificationType {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        match self {
            VerificationType::Top => bytes.push(0),
            VerificationType::Integer => bytes.push(1),
            VerificationType::Float => bytes.push(2),
            VerificationType::Double => bytes.push(3),
            VerificationType::Long => bytes.push(4),
            VerificationType::Null => bytes.push(5),
            VerificationType::UninitializedThis => bytes.push(6),
            VerificationType::Object(cp_index) => {
                bytes.push(7);
                bytes.extend_from_slice(&cp_index.to_be_bytes());
            }
            VerificationType::Uninitialized(offset) => {
                bytes.push(8);
                bytes.extend_from_slice(&offset.to_be_bytes());
            }
        }
        bytes
    }

    fn parse(reader: &mut ByteReader<'_>) -> ReadResult<VerificationType> {
        Ok(match reader.u1()? {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object(reader.u2()?),
            8 => VerificationType::Uninitialized(reader.u2()?),
            tag => return Err(malformed(format!("verification type tag {}", tag))),
        })
    }

    /// Long and Double take two local slots but one entry in a frame
    pub fn is_wide(&self) -> bool {
        matches!(self, VerificationType::Long | VerificationType::Double)
    }
}

/// StackMapFrame variants as defined in JVMS 4.7.4
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackMapFrame {
    Same { offset_delta: u16 },
    SameLocals1StackItem { offset_delta: u16, stack: VerificationType },
    SameLocals1StackItemExtended { offset_delta: u16, stack: VerificationType },
    Chop { k: u8, offset_delta: u16 },          // k in {1,2,3}
    SameExtended { offset_delta: u16 },
    Append { k: u8, offset_delta: u16, locals: Vec<VerificationType> }, // k in {1,2,3}
    Full { offset_delta: u16, locals: Vec<VerificationType>, stack: Vec<VerificationType> },
}

impl StackMapFrame {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        match self {
            StackMapFrame::Same { offset_delta } => {
                if *offset_delta <= 63 {
                    bytes.push(*offset_delta as u8);
                } else {
                    bytes.push(251); // same_frame_extended
                    bytes.extend_from_slice(&offset_delta.to_be_bytes());
                }
            }
            StackMapFrame::SameLocals1StackItem { offset_delta, stack } => {
                if *offset_delta <= 63 {
                    bytes.push(64 + *offset_delta as u8);
                } else {
                    bytes.push(247); // same_locals_1_stack_item_frame_extended
                    bytes.extend_from_slice(&offset_delta.to_be_bytes());
                }
                bytes.extend_from_slice(&stack.to_bytes());
            }
            StackMapFrame::SameLocals1StackItemExtended { offset_delta, stack } => {
                bytes.push(247);
                bytes.extend_from_slice(&offset_delta.to_be_bytes());
                bytes.extend_from_slice(&stack.to_bytes());
            }
            StackMapFrame::Chop { k, offset_delta } => {
                bytes.push(251 - *k);
                bytes.extend_from_slice(&offset_delta.to_be_bytes());
            }
            StackMapFrame::SameExtended { offset_delta } => {
                bytes.push(251);
                bytes.extend_from_slice(&offset_delta.to_be_bytes());
            }
            StackMapFrame::Append { k, offset_delta, locals } => {
                bytes.push(251 + *k);
                bytes.extend_from_slice(&offset_delta.to_be_bytes());
                for l in locals {
                    bytes.extend_from_slice(&l.to_bytes());
                }
            }
            StackMapFrame::Full { offset_delta, locals, stack } => {
                bytes.push(255);
                bytes.extend_from_slice(&offset_delta.to_be_bytes());
                bytes.extend_from_slice(&(locals.len() as u16).to_be_bytes());
                for l in locals {
                    bytes.extend_from_slice(&l.to_bytes());
                }
                bytes.extend_from_slice(&(stack.len() as u16).to_be_bytes());
                for s in stack {
                    bytes.extend_from_slice(&s.to_bytes());
                }
            }
        }
        bytes
    }

    fn parse(reader: &mut ByteReader<'_>) -> ReadResult<StackMapFrame> {
        let frame_type = reader.u1()?;
        Ok(match frame_type {
            0..=63 => StackMapFrame::Same { offset_delta: frame_type as u16 },
            64..=127 => StackMapFrame::SameLocals1StackItem {
                offset_delta: (frame_type - 64) as u16,
                stack: VerificationType::parse(reader)?,
            },
            247 => StackMapFrame::SameLocals1StackItemExtended {
                offset_delta: reader.u2()?,
                stack: VerificationType::parse(reader)?,
            },
            248..=250 => StackMapFrame::Chop { k: 251 - frame_type, offset_delta: reader.u2()? },
            251 => StackMapFrame::SameExtended { offset_delta: reader.u2()? },
            252..=254 => {
                let k = frame_type - 251;
                let offset_delta = reader.u2()?;
                let locals = (0..k).map(|_| VerificationType::parse(reader)).collect::<ReadResult<_>>()?;
                StackMapFrame::Append { k, offset_delta, locals }
            }
            255 => {
                let offset_delta = reader.u2()?;
                let n_locals = reader.u2()?;
                let locals = (0..n_locals).map(|_| VerificationType::parse(reader)).collect::<ReadResult<_>>()?;
                let n_stack = reader.u2()?;
                let stack = (0..n_stack).map(|_| VerificationType::parse(reader)).collect::<ReadResult<_>>()?;
                StackMapFrame::Full { offset_delta, locals, stack }
            }
            other => return Err(malformed(format!("reserved frame type {}", other))),
        })
    }

    pub fn offset_delta(&self) -> u16 {
        match self {
            StackMapFrame::Same { offset_delta }
            | StackMapFrame::SameLocals1StackItem { offset_delta, .. }
            | StackMapFrame::SameLocals1StackItemExtended { offset_delta, .. }
            | StackMapFrame::Chop { offset_delta, .. }
            | StackMapFrame::SameExtended { offset_delta }
            | StackMapFrame::Append { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta,
        }
    }

    pub fn set_offset_delta(&mut self, delta: u16) {
        match self {
            StackMapFrame::Same { offset_delta }
            | StackMapFrame::SameLocals1StackItem { offset_delta, .. }
            | StackMapFrame::SameLocals1StackItemExtended { offset_delta, .. }
            | StackMapFrame::Chop { offset_delta, .. }
            | StackMapFrame::SameExtended { offset_delta }
            | StackMapFrame::Append { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta = delta,
        }
    }

    /// Every verification type carried by the frame
    pub fn types_mut(&mut self) -> Vec<&mut VerificationType> {
        match self {
            StackMapFrame::SameLocals1StackItem { stack, .. }
            | StackMapFrame::SameLocals1StackItemExtended { stack, .. } => vec![stack],
            StackMapFrame::Append { locals, .. } => locals.iter_mut().collect(),
            StackMapFrame::Full { locals, stack, .. } => locals.iter_mut().chain(stack.iter_mut()).collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StackMapTable {
    pub frames: Vec<StackMapFrame>,
}

impl StackMapTable {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    pub fn parse(info: &[u8]) -> ReadResult<StackMapTable> {
        let mut reader = ByteReader::new(info);
        let count = reader.u2()?;
        let frames = (0..count).map(|_| StackMapFrame::parse(&mut reader)).collect::<ReadResult<_>>()?;
        if !reader.is_empty() {
            return Err(malformed(format!("{} trailing bytes", reader.remaining())));
        }
        Ok(StackMapTable { frames })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(self.frames.len() as u16).to_be_bytes());
        for f in &self.frames {
            bytes.extend_from_slice(&f.to_bytes());
        }
        bytes
    }

    /// Bytecode offset of every frame, in order
    pub fn absolute_offsets(&self) -> Vec<u32> {
        let mut offsets = Vec::with_capacity(self.frames.len());
        let mut prev: Option<u32> = None;
        for frame in &self.frames {
            let delta = frame.offset_delta() as u32;
            let offset = match prev {
                None => delta,
                Some(p) => p + delta + 1,
            };
            offsets.push(offset);
            prev = Some(offset);
        }
        offsets
    }

    /// Build a table from frames tagged with absolute offsets, which must be strictly increasing
    pub fn from_absolute(frames: Vec<(u32, StackMapFrame)>) -> Option<StackMapTable> {
        let mut out = Vec::with_capacity(frames.len());
        let mut prev: Option<u32> = None;
        for (offset, mut frame) in frames {
            let delta = match prev {
                None => offset,
                Some(p) if offset > p => offset - p - 1,
                Some(_) => return None,
            };
            frame.set_offset_delta(u16::try_from(delta).ok()?);
            out.push(frame);
            prev = Some(offset);
        }
        Some(StackMapTable { frames: out })
    }
}

/// Helper to build an AttributeInfo for StackMapTable
pub fn make_stack_map_attribute(constant_pool: &mut ConstantPool, table: &StackMapTable) -> ConstPoolResult<AttributeInfo> {
    let name_index = constant_pool.add_utf8(attribute_names::STACK_MAP_TABLE)?;
    Ok(AttributeInfo::new(name_index, table.to_bytes()))
}

fn malformed(reason: String) -> ClassReadError {
    ClassReadError::MalformedAttribute { name: attribute_names::STACK_MAP_TABLE.to_string(), reason }
}
