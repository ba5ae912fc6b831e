//! Instruction decoding, re-encoding and code relocation
//!
//! The enhancer patches most sites in place with same-length instructions. Only
//! insertions (initializer blocks, the pre-serialize call) shift code, and those go
//! through [`insert_fragments`], which re-lays out the method and remaps every
//! offset-bearing structure.

use tracing::warn;

use super::attribute::{
    line_numbers_to_bytes, local_variables_to_bytes, parse_line_numbers, parse_local_variables, AttributeInfo,
    CodeAttribute,
};
use super::constpool::ConstantPool;
use super::defs::attribute_names;
use super::error::{BytecodeError, BytecodeResult, ClassReadError, ReadResult};
use super::frame::{StackMapTable, VerificationType};
use super::opcodes::*;
use super::reader::ByteReader;

/// Largest legal `code_length`
pub const MAX_CODE_LENGTH: usize = 65535;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operands {
    /// Operand bytes copied verbatim
    Fixed(Vec<u8>),
    /// 16-bit relative branch, stored as an absolute target
    Branch(u32),
    /// 32-bit relative branch (`goto_w`, `jsr_w`)
    WideBranch(u32),
    TableSwitch { default: u32, low: i32, targets: Vec<u32> },
    LookupSwitch { default: u32, pairs: Vec<(i32, u32)> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub offset: u32,
    pub opcode: u8,
    pub operands: Operands,
}

impl Instruction {
    pub fn name(&self) -> &'static str {
        opcode_name(self.opcode)
    }

    fn fixed(&self) -> &[u8] {
        match &self.operands {
            Operands::Fixed(bytes) => bytes,
            _ => &[],
        }
    }

    /// Constant-pool operand, for instructions that carry one
    pub fn cp_index(&self) -> Option<u16> {
        let b = self.fixed();
        match self.opcode {
            LDC => b.first().map(|&i| i as u16),
            LDC_W | LDC2_W | GETSTATIC | PUTSTATIC | GETFIELD | PUTFIELD | INVOKEVIRTUAL | INVOKESPECIAL
            | INVOKESTATIC | INVOKEINTERFACE | INVOKEDYNAMIC | NEW | ANEWARRAY | CHECKCAST | INSTANCEOF
            | MULTIANEWARRAY => Some(u16::from_be_bytes([*b.first()?, *b.get(1)?])),
            _ => None,
        }
    }

    /// Value pushed by an integer-constant instruction
    pub fn push_value(&self) -> Option<i32> {
        let b = self.fixed();
        match self.opcode {
            ICONST_M1..=ICONST_5 => Some(self.opcode as i32 - ICONST_0 as i32),
            BIPUSH => b.first().map(|&v| v as i8 as i32),
            SIPUSH => Some(i16::from_be_bytes([*b.first()?, *b.get(1)?]) as i32),
            _ => None,
        }
    }

    /// Every absolute branch target of this instruction
    pub fn targets(&self) -> Vec<u32> {
        match &self.operands {
            Operands::Fixed(_) => Vec::new(),
            Operands::Branch(t) | Operands::WideBranch(t) => vec![*t],
            Operands::TableSwitch { default, targets, .. } => {
                std::iter::once(*default).chain(targets.iter().copied()).collect()
            }
            Operands::LookupSwitch { default, pairs } => {
                std::iter::once(*default).chain(pairs.iter().map(|(_, t)| *t)).collect()
            }
        }
    }

    /// Encoded length if the instruction starts at `at`
    pub fn encoded_len(&self, at: u32) -> usize {
        let pad = switch_padding(at);
        match &self.operands {
            Operands::Fixed(bytes) => 1 + bytes.len(),
            Operands::Branch(_) => 3,
            Operands::WideBranch(_) => 5,
            Operands::TableSwitch { targets, .. } => 1 + pad + 12 + 4 * targets.len(),
            Operands::LookupSwitch { pairs, .. } => 1 + pad + 8 + 8 * pairs.len(),
        }
    }

    /// Encode at `at`, translating targets through `map`
    pub fn encode(&self, at: u32, map: &dyn Fn(u32) -> Option<u32>, out: &mut Vec<u8>) -> BytecodeResult<()> {
        let rel = |target: u32| -> BytecodeResult<i64> {
            let new = map(target)
                .ok_or_else(|| bad_code(format!("branch target {} is not an instruction boundary", target)))?;
            Ok(new as i64 - at as i64)
        };
        out.push(self.opcode);
        match &self.operands {
            Operands::Fixed(bytes) => out.extend_from_slice(bytes),
            Operands::Branch(t) => {
                let off = rel(*t)?;
                let off = i16::try_from(off).map_err(|_| BytecodeError::BranchTooFar { offset: off })?;
                out.extend_from_slice(&off.to_be_bytes());
            }
            Operands::WideBranch(t) => out.extend_from_slice(&wide_offset(rel(*t)?)?.to_be_bytes()),
            Operands::TableSwitch { default, low, targets } => {
                out.resize(out.len() + switch_padding(at), 0);
                out.extend_from_slice(&wide_offset(rel(*default)?)?.to_be_bytes());
                out.extend_from_slice(&low.to_be_bytes());
                let high = *low + targets.len() as i32 - 1;
                out.extend_from_slice(&high.to_be_bytes());
                for t in targets {
                    out.extend_from_slice(&wide_offset(rel(*t)?)?.to_be_bytes());
                }
            }
            Operands::LookupSwitch { default, pairs } => {
                out.resize(out.len() + switch_padding(at), 0);
                out.extend_from_slice(&wide_offset(rel(*default)?)?.to_be_bytes());
                out.extend_from_slice(&(pairs.len() as i32).to_be_bytes());
                for (key, t) in pairs {
                    out.extend_from_slice(&key.to_be_bytes());
                    out.extend_from_slice(&wide_offset(rel(*t)?)?.to_be_bytes());
                }
            }
        }
        Ok(())
    }
}

fn wide_offset(off: i64) -> BytecodeResult<i32> {
    i32::try_from(off).map_err(|_| BytecodeError::BranchTooFar { offset: off })
}

/// Padding after a switch opcode at `at` so that operands start 4-byte aligned
pub fn switch_padding(at: u32) -> usize {
    ((4 - (at as usize + 1) % 4) % 4) as usize
}

/// Operand length of fixed-size instructions; `None` for switches and `wide`
fn fixed_operand_len(opcode: u8) -> Option<usize> {
    Some(match opcode {
        BIPUSH | LDC | ILOAD..=ALOAD | ISTORE..=ASTORE | RET | NEWARRAY => 1,
        SIPUSH | LDC_W | LDC2_W | IINC | IFEQ..=JSR | IFNULL | IFNONNULL | GETSTATIC..=INVOKESTATIC | NEW
        | ANEWARRAY | CHECKCAST | INSTANCEOF => 2,
        MULTIANEWARRAY => 3,
        INVOKEINTERFACE | INVOKEDYNAMIC | GOTO_W | JSR_W => 4,
        TABLESWITCH | LOOKUPSWITCH | WIDE => return None,
        _ => 0,
    })
}

fn bad_code(reason: String) -> ClassReadError {
    ClassReadError::MalformedAttribute { name: attribute_names::CODE.to_string(), reason }
}

fn absolute(base: usize, off: i64, len: usize) -> ReadResult<u32> {
    let target = base as i64 + off;
    if target < 0 || target >= len as i64 {
        return Err(bad_code(format!("branch at {} leaves the method (target {})", base, target)));
    }
    Ok(target as u32)
}

/// Decode a complete code array
pub fn decode(code: &[u8]) -> ReadResult<Vec<Instruction>> {
    let mut reader = ByteReader::new(code);
    let mut out = Vec::new();
    while !reader.is_empty() {
        let pc = reader.position();
        let opcode = reader.u1()?;
        if !is_valid_opcode(opcode) {
            return Err(ClassReadError::UnknownOpcode { opcode, offset: pc });
        }
        let operands = match opcode {
            _ if is_short_branch(opcode) => Operands::Branch(absolute(pc, reader.i2()? as i64, code.len())?),
            GOTO_W | JSR_W => Operands::WideBranch(absolute(pc, reader.i4()? as i64, code.len())?),
            TABLESWITCH => {
                reader.align4()?;
                let default = absolute(pc, reader.i4()? as i64, code.len())?;
                let low = reader.i4()?;
                let high = reader.i4()?;
                if high < low {
                    return Err(bad_code(format!("tableswitch at {} has high < low", pc)));
                }
                let count = (high as i64 - low as i64 + 1) as usize;
                if count * 4 > reader.remaining() {
                    return Err(ClassReadError::UnexpectedEof { offset: reader.position() });
                }
                let targets = (0..count)
                    .map(|_| absolute(pc, reader.i4()? as i64, code.len()))
                    .collect::<ReadResult<Vec<_>>>()?;
                Operands::TableSwitch { default, low, targets }
            }
            LOOKUPSWITCH => {
                reader.align4()?;
                let default = absolute(pc, reader.i4()? as i64, code.len())?;
                let npairs = reader.i4()?;
                if npairs < 0 || npairs as usize * 8 > reader.remaining() {
                    return Err(bad_code(format!("lookupswitch at {} has bad pair count", pc)));
                }
                let pairs = (0..npairs)
                    .map(|_| Ok((reader.i4()?, absolute(pc, reader.i4()? as i64, code.len())?)))
                    .collect::<ReadResult<Vec<_>>>()?;
                Operands::LookupSwitch { default, pairs }
            }
            WIDE => {
                let inner = reader.u1()?;
                let len = if inner == IINC { 4 } else { 2 };
                let mut bytes = vec![inner];
                bytes.extend_from_slice(reader.bytes(len)?);
                Operands::Fixed(bytes)
            }
            _ => {
                let len = fixed_operand_len(opcode).unwrap_or(0);
                Operands::Fixed(reader.bytes(len)?.to_vec())
            }
        };
        out.push(Instruction { offset: pc as u32, opcode, operands });
    }
    Ok(out)
}

/// Old-to-new offset translation produced by a relocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetMap {
    old: Vec<u32>,
    new: Vec<u32>,
    /// Start of the fragment inserted before each instruction (or the instruction itself)
    entry: Vec<u32>,
    old_len: u32,
    new_len: u32,
}

impl OffsetMap {
    fn position(&self, old: u32) -> Option<usize> {
        self.old.binary_search(&old).ok()
    }

    /// Where control that used to reach `old` now arrives; inserted code runs first
    pub fn target(&self, old: u32) -> Option<u32> {
        if old == self.old_len {
            return Some(self.new_len);
        }
        self.position(old).map(|i| self.entry[i])
    }

    /// New offset of the instruction itself
    pub fn instruction(&self, old: u32) -> Option<u32> {
        if old == self.old_len {
            return Some(self.new_len);
        }
        self.position(old).map(|i| self.new[i])
    }

    pub fn new_len(&self) -> u32 {
        self.new_len
    }
}

/// A straight-line code fragment to run before the instruction at `at`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insertion {
    pub at: u32,
    pub fragment: Vec<u8>,
    /// Operand-stack depth the fragment needs on top of whatever is already there
    pub max_stack: u16,
}

/// Lay out `instructions` with fragments inserted, returning the new code and offset map
pub fn relocate(instructions: &[Instruction], old_len: u32, insertions: &[Insertion]) -> BytecodeResult<(Vec<u8>, OffsetMap)> {
    for ins in insertions {
        if decode(&ins.fragment)?.iter().any(|i| !matches!(i.operands, Operands::Fixed(_))) {
            return Err(BytecodeError::Unsupported { name: "branch in inserted fragment", offset: ins.at as usize });
        }
        if instructions.binary_search_by_key(&ins.at, |i| i.offset).is_err() {
            return Err(bad_code(format!("insertion point {} is not an instruction boundary", ins.at)).into());
        }
    }

    let mut old = Vec::with_capacity(instructions.len());
    let mut new = Vec::with_capacity(instructions.len());
    let mut entry = Vec::with_capacity(instructions.len());
    let mut cursor: usize = 0;
    for instr in instructions {
        entry.push(cursor as u32);
        cursor += insertions.iter().filter(|i| i.at == instr.offset).map(|i| i.fragment.len()).sum::<usize>();
        old.push(instr.offset);
        new.push(cursor as u32);
        cursor += instr.encoded_len(cursor as u32);
        if cursor > MAX_CODE_LENGTH {
            return Err(BytecodeError::CodeTooLarge);
        }
    }
    let map = OffsetMap { old, new, entry, old_len, new_len: cursor as u32 };

    let mut code = Vec::with_capacity(cursor);
    for (i, instr) in instructions.iter().enumerate() {
        for ins in insertions.iter().filter(|ins| ins.at == instr.offset) {
            code.extend_from_slice(&ins.fragment);
        }
        debug_assert_eq!(code.len() as u32, map.new[i]);
        instr.encode(map.new[i], &|t| map.target(t), &mut code)?;
    }
    Ok((code, map))
}

/// Insert fragments into a method body, remapping everything that carries an offset.
///
/// Exception ranges, line numbers, local-variable ranges and stack-map frames that
/// pointed at an insertion point now point at the start of the inserted code.
/// Type annotations inside the body cannot be remapped and are dropped.
pub fn insert_fragments(
    code: &mut CodeAttribute,
    constant_pool: &ConstantPool,
    insertions: &[Insertion],
) -> BytecodeResult<OffsetMap> {
    let instructions = decode(&code.code)?;
    let (new_code, map) = relocate(&instructions, code.code.len() as u32, insertions)?;

    let remap = |old: u16| -> BytecodeResult<u16> {
        map.target(old as u32)
            .map(|t| t as u16)
            .ok_or_else(|| bad_code(format!("offset {} is not an instruction boundary", old)).into())
    };

    for entry in &mut code.exception_table {
        entry.start_pc = remap(entry.start_pc)?;
        entry.end_pc = remap(entry.end_pc)?;
        entry.handler_pc = remap(entry.handler_pc)?;
    }

    let mut kept = Vec::with_capacity(code.attributes.len());
    for attribute in code.attributes.drain(..) {
        let name = attribute.name(constant_pool).unwrap_or("").to_string();
        let info = match name.as_str() {
            attribute_names::STACK_MAP_TABLE => {
                let table = StackMapTable::parse(&attribute.info)?;
                let offsets = table.absolute_offsets();
                let mut frames = Vec::with_capacity(offsets.len());
                for (offset, mut frame) in offsets.into_iter().zip(table.frames) {
                    for ty in frame.types_mut() {
                        if let VerificationType::Uninitialized(at) = ty {
                            *at = map
                                .instruction(*at as u32)
                                .ok_or_else(|| bad_code(format!("uninitialized type refers to {}", at)))?
                                as u16;
                        }
                    }
                    let target = map
                        .target(offset)
                        .ok_or_else(|| bad_code(format!("frame at {} is not an instruction boundary", offset)))?;
                    frames.push((target, frame));
                }
                StackMapTable::from_absolute(frames)
                    .ok_or_else(|| bad_code("stack map frames out of order".to_string()))?
                    .to_bytes()
            }
            attribute_names::LINE_NUMBER_TABLE => {
                let mut lines = parse_line_numbers(&attribute.info)?;
                for line in &mut lines {
                    line.start_pc = remap(line.start_pc)?;
                }
                line_numbers_to_bytes(&lines)
            }
            attribute_names::LOCAL_VARIABLE_TABLE | attribute_names::LOCAL_VARIABLE_TYPE_TABLE => {
                let mut vars = parse_local_variables(&attribute.info)?;
                for var in &mut vars {
                    let start = remap(var.start_pc)?;
                    let end = map
                        .target(var.start_pc as u32 + var.length as u32)
                        .ok_or_else(|| bad_code(format!("local {} ends off an instruction", var.index)))?;
                    var.start_pc = start;
                    var.length = (end - start as u32) as u16;
                }
                local_variables_to_bytes(&vars)
            }
            attribute_names::RUNTIME_VISIBLE_TYPE_ANNOTATIONS
            | attribute_names::RUNTIME_INVISIBLE_TYPE_ANNOTATIONS => {
                warn!(attribute = %name, "dropping type annotations from relocated method body");
                continue;
            }
            _ => attribute.info,
        };
        kept.push(AttributeInfo::new(attribute.name_index, info));
    }
    code.attributes = kept;

    let extra = insertions.iter().map(|i| i.max_stack).max().unwrap_or(0);
    code.max_stack = code.max_stack.saturating_add(extra);
    code.code = new_code;
    Ok(map)
}

/// Render code as `offset: mnemonic` lines, for logs and test failure output
pub fn disassemble(code: &[u8]) -> Vec<String> {
    match decode(code) {
        Ok(instructions) => instructions
            .iter()
            .map(|i| match &i.operands {
                Operands::Fixed(b) if b.is_empty() => format!("{:>5}: {}", i.offset, i.name()),
                Operands::Fixed(b) => format!("{:>5}: {} {:?}", i.offset, i.name(), b),
                _ => format!("{:>5}: {} -> {:?}", i.offset, i.name(), i.targets()),
            })
            .collect(),
        Err(e) => vec![format!("<undecodable: {}>", e)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // iload_0; ifeq +5; iconst_1; ireturn; iconst_0; ireturn
    const BRANCHY: [u8; 8] = [ILOAD_0, IFEQ, 0, 5, ICONST_1, IRETURN, ICONST_0, IRETURN];

    #[test]
    fn decodes_branch_targets_as_absolute() {
        let instrs = decode(&BRANCHY).unwrap();
        assert_eq!(instrs.len(), 6);
        assert_eq!(instrs[1].operands, Operands::Branch(6));
        assert_eq!(instrs[4].offset, 6);
    }

    #[test]
    fn unknown_opcode_is_an_error() {
        assert_eq!(decode(&[0xca]), Err(ClassReadError::UnknownOpcode { opcode: 0xca, offset: 0 }));
    }

    #[test]
    fn insertion_shifts_branches_to_fragment_start() {
        let instrs = decode(&BRANCHY).unwrap();
        let insertion = Insertion { at: 6, fragment: vec![NOP, NOP], max_stack: 0 };
        let (code, map) = relocate(&instrs, BRANCHY.len() as u32, &[insertion]).unwrap();
        assert_eq!(code, vec![ILOAD_0, IFEQ, 0, 5, ICONST_1, IRETURN, NOP, NOP, ICONST_0, IRETURN]);
        assert_eq!(map.target(6), Some(6));
        assert_eq!(map.instruction(6), Some(8));
        assert_eq!(map.target(8), Some(10));
    }

    #[test]
    fn tableswitch_padding_is_recomputed() {
        // iload_0; tableswitch (2 pad bytes) default +19, low 0, high 0, [+19]; return
        let mut code = vec![ILOAD_0, TABLESWITCH, 0, 0];
        code.extend_from_slice(&19i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&19i32.to_be_bytes());
        code.push(RETURN);
        assert_eq!(code.len(), 21);
        let instrs = decode(&code).unwrap();
        assert_eq!(instrs[1].operands, Operands::TableSwitch { default: 20, low: 0, targets: vec![20] });

        let insertion = Insertion { at: 0, fragment: vec![NOP], max_stack: 0 };
        let (out, map) = relocate(&instrs, code.len() as u32, &[insertion]).unwrap();
        // The switch moves from 1 to 2 and its padding shrinks from 2 bytes to 1.
        assert_eq!(out[2], TABLESWITCH);
        assert_eq!(out.len(), code.len());
        assert_eq!(map.instruction(20), Some(20));
        let again = decode(&out).unwrap();
        assert_eq!(again[2].targets(), vec![20, 20]);
    }

    #[test]
    fn fragments_with_branches_are_refused() {
        let instrs = decode(&BRANCHY).unwrap();
        let insertion = Insertion { at: 0, fragment: vec![GOTO, 0, 0], max_stack: 0 };
        assert!(matches!(
            relocate(&instrs, BRANCHY.len() as u32, &[insertion]),
            Err(BytecodeError::Unsupported { .. })
        ));
    }
}
