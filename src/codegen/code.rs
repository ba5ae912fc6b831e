//! Code generation buffer for synthesized method bodies
//!
//! Modelled on javac's `Code`: instructions are emitted one at a time while a typed
//! [`State`] follows the operand stack and locals. Branches go through [`Label`]s and
//! are patched when the body is finished. When stack maps are required, every bound
//! label gets a full frame built from the merged state of the paths reaching it.

use std::collections::BTreeMap;

use super::attribute::CodeAttribute;
use super::constpool::ConstantPool;
use super::defs::{access_flags::ACC_STATIC, CONSTRUCTOR_METHOD_NAME, JAVA_LANG_OBJECT};
use super::descriptor::{FieldType, MethodDescriptor};
use super::error::{BytecodeError, BytecodeResult};
use super::frame::{make_stack_map_attribute, StackMapFrame, StackMapTable, VerificationType};
use super::opcodes;

/// Type of one stack entry or local slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Top,
    Int,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    /// Internal name, or a descriptor for array types
    Object(String),
    /// Offset of the `new` that created the value
    Uninitialized(u32),
}

impl Type {
    pub fn width(&self) -> u16 {
        match self {
            Type::Long | Type::Double => 2,
            _ => 1,
        }
    }

    pub fn of(field_type: &FieldType) -> Type {
        match field_type {
            FieldType::Long => Type::Long,
            FieldType::Float => Type::Float,
            FieldType::Double => Type::Double,
            FieldType::Object(name) => Type::Object(name.clone()),
            FieldType::Array(_) => Type::Object(field_type.to_descriptor()),
            _ => Type::Int,
        }
    }

    pub fn object(name: &str) -> Type {
        Type::Object(name.to_string())
    }

    fn is_reference(&self) -> bool {
        matches!(self, Type::Null | Type::Object(_) | Type::UninitializedThis | Type::Uninitialized(_))
    }

    fn to_verification(&self, pool: &mut ConstantPool) -> BytecodeResult<VerificationType> {
        Ok(match self {
            Type::Top => VerificationType::Top,
            Type::Int => VerificationType::Integer,
            Type::Float => VerificationType::Float,
            Type::Long => VerificationType::Long,
            Type::Double => VerificationType::Double,
            Type::Null => VerificationType::Null,
            Type::UninitializedThis => VerificationType::UninitializedThis,
            Type::Object(name) => VerificationType::Object(pool.add_class(name)?),
            Type::Uninitialized(offset) => VerificationType::Uninitialized(*offset as u16),
        })
    }
}

/// Stack and locals at one program point
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct State {
    pub stack: Vec<Type>,
    /// One entry per slot; the slot after a long or double holds `Top`
    pub locals: Vec<Type>,
}

impl State {
    /// Operand stack depth in slots
    pub fn stacksize(&self) -> u16 {
        self.stack.iter().map(Type::width).sum()
    }

    fn push(&mut self, t: Type) {
        self.stack.push(t);
    }

    fn pop(&mut self, offset: usize) -> BytecodeResult<Type> {
        self.stack.pop().ok_or(BytecodeError::StackUnderflow { offset })
    }

    fn set_local(&mut self, index: u16, t: Type) {
        let index = index as usize;
        let width = t.width() as usize;
        if self.locals.len() < index + width {
            self.locals.resize(index + width, Type::Top);
        }
        self.locals[index] = t;
        if width == 2 {
            self.locals[index + 1] = Type::Top;
        }
    }

    /// Least upper bound of two states reaching the same point
    fn merge(&self, other: &State) -> State {
        let len = self.locals.len().max(other.locals.len());
        let locals = (0..len)
            .map(|i| match (self.locals.get(i), other.locals.get(i)) {
                (Some(a), Some(b)) if a == b => a.clone(),
                _ => Type::Top,
            })
            .collect();
        let stack = self
            .stack
            .iter()
            .zip(&other.stack)
            .map(|(a, b)| match (a, b) {
                _ if a == b => a.clone(),
                (Type::Null, r) | (r, Type::Null) if r.is_reference() => r.clone(),
                _ if a.is_reference() && b.is_reference() => Type::object(JAVA_LANG_OBJECT),
                _ => Type::Top,
            })
            .collect();
        State { stack, locals }
    }

    fn frame(&self, pool: &mut ConstantPool, offset_delta: u16) -> BytecodeResult<StackMapFrame> {
        let mut locals = Vec::new();
        let mut i = 0;
        let last = self.locals.iter().rposition(|t| *t != Type::Top).map_or(0, |p| p + 1);
        while i < last {
            let t = &self.locals[i];
            locals.push(t.to_verification(pool)?);
            i += t.width() as usize;
        }
        let stack = self.stack.iter().map(|t| t.to_verification(pool)).collect::<BytecodeResult<_>>()?;
        Ok(StackMapFrame::Full { offset_delta, locals, stack })
    }
}

/// A jump target inside one [`CodeBuilder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug, Default)]
struct LabelInfo {
    offset: Option<u32>,
    state: Option<State>,
}

#[derive(Debug)]
struct Fixup {
    /// Offset of the branching instruction
    instr: u32,
    /// Where the offset operand is written
    at: usize,
    label: Label,
    wide: bool,
}

/// Assembler for one method body
pub struct CodeBuilder<'a> {
    pool: &'a mut ConstantPool,
    this_class: String,
    code: Vec<u8>,
    state: State,
    alive: bool,
    max_stack: u16,
    max_locals: u16,
    need_stack_map: bool,
    labels: Vec<LabelInfo>,
    fixups: Vec<Fixup>,
    frames: BTreeMap<u32, State>,
}

impl<'a> CodeBuilder<'a> {
    pub fn new(pool: &'a mut ConstantPool, this_class: &str, need_stack_map: bool, locals: Vec<Type>) -> Self {
        let max_locals = locals.len() as u16;
        Self {
            pool,
            this_class: this_class.to_string(),
            code: Vec::with_capacity(64),
            state: State { stack: Vec::new(), locals },
            alive: true,
            max_stack: 0,
            max_locals,
            need_stack_map,
            labels: Vec::new(),
            fixups: Vec::new(),
            frames: BTreeMap::new(),
        }
    }

    /// Builder whose initial locals are the receiver and arguments of a method
    pub fn for_method(
        pool: &'a mut ConstantPool,
        this_class: &str,
        need_stack_map: bool,
        access_flags: u16,
        name: &str,
        descriptor: &str,
    ) -> BytecodeResult<Self> {
        let md = MethodDescriptor::parse(descriptor)?;
        let mut state = State::default();
        let mut next = 0u16;
        if access_flags & ACC_STATIC == 0 {
            let this = if name == CONSTRUCTOR_METHOD_NAME { Type::UninitializedThis } else { Type::object(this_class) };
            state.set_local(0, this);
            next = 1;
        }
        for p in &md.params {
            state.set_local(next, Type::of(p));
            next += p.slots();
        }
        Ok(Self::new(pool, this_class, need_stack_map, state.locals))
    }

    /// Constant pool shared with the class being built
    pub fn pool(&mut self) -> &mut ConstantPool {
        &mut *self.pool
    }

    pub fn cur_cp(&self) -> u32 {
        self.code.len() as u32
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    fn touch_stack(&mut self) {
        self.max_stack = self.max_stack.max(self.state.stacksize());
    }

    fn emit1(&mut self, b: u8) {
        self.code.push(b);
    }

    fn emit2(&mut self, v: u16) {
        self.code.extend_from_slice(&v.to_be_bytes());
    }

    fn emit4(&mut self, v: i32) {
        self.code.extend_from_slice(&v.to_be_bytes());
    }

    fn pop_n(&mut self, n: usize) -> BytecodeResult<()> {
        let at = self.code.len();
        for _ in 0..n {
            self.state.pop(at)?;
        }
        Ok(())
    }

    /// Emit an instruction without operands, applying its stack effect
    pub fn emitop(&mut self, op: u8) -> BytecodeResult<()> {
        use opcodes::*;
        let at = self.code.len();
        let unsupported = || BytecodeError::Unsupported { name: opcode_name(op), offset: at };
        match op {
            NOP => {}
            ACONST_NULL => self.state.push(Type::Null),
            ICONST_M1..=ICONST_5 => self.state.push(Type::Int),
            LCONST_0 | LCONST_1 => self.state.push(Type::Long),
            FCONST_0..=FCONST_2 => self.state.push(Type::Float),
            DCONST_0 | DCONST_1 => self.state.push(Type::Double),
            POP => {
                self.state.pop(at)?;
            }
            POP2 => {
                if self.state.pop(at)?.width() == 1 {
                    self.state.pop(at)?;
                }
            }
            DUP => {
                let top = self.state.stack.last().cloned().ok_or(BytecodeError::StackUnderflow { offset: at })?;
                self.state.push(top);
            }
            DUP2 => {
                let top = self.state.pop(at)?;
                if top.width() == 2 {
                    self.state.push(top.clone());
                    self.state.push(top);
                } else {
                    let below = self.state.pop(at)?;
                    for t in [below.clone(), top.clone(), below, top] {
                        self.state.push(t);
                    }
                }
            }
            SWAP => {
                let a = self.state.pop(at)?;
                let b = self.state.pop(at)?;
                self.state.push(a);
                self.state.push(b);
            }
            IADD | ISUB | IMUL | IDIV | IREM | ISHL | ISHR | IUSHR | IAND | IOR | IXOR | LCMP | FCMPL | FCMPG
            | DCMPL | DCMPG => {
                self.pop_n(2)?;
                self.state.push(Type::Int);
            }
            LADD | LSUB | LMUL | LAND | LOR | LXOR | LSHL | LSHR | LUSHR => {
                self.pop_n(2)?;
                self.state.push(Type::Long);
            }
            INEG => {}
            L2I | F2I | D2I => {
                self.state.pop(at)?;
                self.state.push(Type::Int);
            }
            I2L => {
                self.state.pop(at)?;
                self.state.push(Type::Long);
            }
            I2B | I2C | I2S => {}
            ARRAYLENGTH => {
                self.state.pop(at)?;
                self.state.push(Type::Int);
            }
            IALOAD | BALOAD | CALOAD | SALOAD => {
                self.pop_n(2)?;
                self.state.push(Type::Int);
            }
            AALOAD => {
                self.state.pop(at)?;
                let array = self.state.pop(at)?;
                let element = match array {
                    Type::Object(desc) if desc.starts_with('[') => {
                        FieldType::parse(&desc[1..]).map(|t| Type::of(&t)).unwrap_or(Type::object(JAVA_LANG_OBJECT))
                    }
                    _ => Type::object(JAVA_LANG_OBJECT),
                };
                self.state.push(element);
            }
            IASTORE | LASTORE | FASTORE | DASTORE | AASTORE | BASTORE | CASTORE | SASTORE => self.pop_n(3)?,
            MONITORENTER | MONITOREXIT => {
                self.state.pop(at)?;
            }
            IRETURN | LRETURN | FRETURN | DRETURN | ARETURN | ATHROW => {
                self.state.pop(at)?;
                self.alive = false;
            }
            RETURN => self.alive = false,
            _ => return Err(unsupported()),
        }
        self.emit1(op);
        self.touch_stack();
        Ok(())
    }

    /// Push an int constant with the shortest encoding
    pub fn iconst(&mut self, value: i32) -> BytecodeResult<()> {
        match value {
            -1..=5 => return self.emitop((opcodes::ICONST_0 as i32 + value) as u8),
            -128..=127 => {
                self.emit1(opcodes::BIPUSH);
                self.emit1(value as i8 as u8);
            }
            -32768..=32767 => {
                self.emit1(opcodes::SIPUSH);
                self.emit2(value as i16 as u16);
            }
            _ => {
                let index = self.pool.add_integer(value)?;
                self.ldc_index(index);
            }
        }
        self.state.push(Type::Int);
        self.touch_stack();
        Ok(())
    }

    fn ldc_index(&mut self, index: u16) {
        if index <= u8::MAX as u16 {
            self.emit1(opcodes::LDC);
            self.emit1(index as u8);
        } else {
            self.emit1(opcodes::LDC_W);
            self.emit2(index);
        }
    }

    pub fn ldc_string(&mut self, value: &str) -> BytecodeResult<()> {
        let index = self.pool.add_string(value)?;
        self.ldc_index(index);
        self.state.push(Type::object("java/lang/String"));
        self.touch_stack();
        Ok(())
    }

    /// Push a class literal (class-file version 49 and later)
    pub fn ldc_class(&mut self, class_operand: &str) -> BytecodeResult<()> {
        let index = self.pool.add_class(class_operand)?;
        self.ldc_index(index);
        self.state.push(Type::object("java/lang/Class"));
        self.touch_stack();
        Ok(())
    }

    pub fn load(&mut self, field_type: &FieldType, index: u16) -> BytecodeResult<()> {
        self.local_op(field_type.load_opcode(), index)?;
        let t = match self.state.locals.get(index as usize) {
            Some(t) if *t != Type::Top => t.clone(),
            _ => Type::of(field_type),
        };
        self.state.push(t);
        self.touch_stack();
        Ok(())
    }

    pub fn aload(&mut self, index: u16) -> BytecodeResult<()> {
        self.load(&FieldType::object(JAVA_LANG_OBJECT), index)
    }

    /// Store the stack top into a local, typing the slot with the stored value
    pub fn store(&mut self, field_type: &FieldType, index: u16) -> BytecodeResult<()> {
        self.local_op(field_type.store_opcode(), index)?;
        let t = self.state.pop(self.code.len())?;
        self.max_locals = self.max_locals.max(index + t.width());
        self.state.set_local(index, t);
        Ok(())
    }

    /// `xload n` / `xstore n` using the compact forms for slots 0 to 3
    fn local_op(&mut self, base: u8, index: u16) -> BytecodeResult<()> {
        use opcodes::*;
        let compact = match base {
            ILOAD => ILOAD_0,
            LLOAD => LLOAD_0,
            FLOAD => FLOAD_0,
            DLOAD => DLOAD_0,
            ALOAD => ALOAD_0,
            ISTORE => ISTORE_0,
            LSTORE => LSTORE_0,
            FSTORE => FSTORE_0,
            DSTORE => DSTORE_0,
            _ => ASTORE_0,
        };
        if index <= 3 {
            self.emit1(compact + index as u8);
        } else if index <= u8::MAX as u16 {
            self.emit1(base);
            self.emit1(index as u8);
        } else {
            self.emit1(WIDE);
            self.emit1(base);
            self.emit2(index);
        }
        Ok(())
    }

    fn field_op(&mut self, op: u8, owner: &str, name: &str, descriptor: &str) -> BytecodeResult<()> {
        use opcodes::*;
        let index = self.pool.add_field_ref(owner, name, descriptor)?;
        let ty = Type::of(&FieldType::parse(descriptor)?);
        let at = self.code.len();
        match op {
            GETSTATIC => self.state.push(ty),
            PUTSTATIC => {
                self.state.pop(at)?;
            }
            GETFIELD => {
                self.state.pop(at)?;
                self.state.push(ty);
            }
            _ => self.pop_n(2)?,
        }
        self.emit1(op);
        self.emit2(index);
        self.touch_stack();
        Ok(())
    }

    pub fn getstatic(&mut self, owner: &str, name: &str, descriptor: &str) -> BytecodeResult<()> {
        self.field_op(opcodes::GETSTATIC, owner, name, descriptor)
    }

    pub fn putstatic(&mut self, owner: &str, name: &str, descriptor: &str) -> BytecodeResult<()> {
        self.field_op(opcodes::PUTSTATIC, owner, name, descriptor)
    }

    pub fn getfield(&mut self, owner: &str, name: &str, descriptor: &str) -> BytecodeResult<()> {
        self.field_op(opcodes::GETFIELD, owner, name, descriptor)
    }

    pub fn putfield(&mut self, owner: &str, name: &str, descriptor: &str) -> BytecodeResult<()> {
        self.field_op(opcodes::PUTFIELD, owner, name, descriptor)
    }

    fn invoke(&mut self, op: u8, owner: &str, name: &str, descriptor: &str) -> BytecodeResult<()> {
        use opcodes::*;
        let md = MethodDescriptor::parse(descriptor)?;
        let index = if op == INVOKEINTERFACE {
            self.pool.add_interface_method_ref(owner, name, descriptor)?
        } else {
            self.pool.add_method_ref(owner, name, descriptor)?
        };
        let at = self.code.len();
        self.pop_n(md.params.len())?;
        if op != INVOKESTATIC {
            let receiver = self.state.pop(at)?;
            if op == INVOKESPECIAL && name == CONSTRUCTOR_METHOD_NAME {
                let initialized = match &receiver {
                    Type::UninitializedThis => Type::object(&self.this_class),
                    _ => Type::object(owner),
                };
                for slot in self.state.stack.iter_mut().chain(self.state.locals.iter_mut()) {
                    if *slot == receiver {
                        *slot = initialized.clone();
                    }
                }
            }
        }
        if let Some(ret) = &md.ret {
            self.state.push(Type::of(ret));
        }
        self.emit1(op);
        self.emit2(index);
        if op == INVOKEINTERFACE {
            self.emit1(md.arg_slots() as u8 + 1);
            self.emit1(0);
        }
        self.touch_stack();
        Ok(())
    }

    pub fn invokevirtual(&mut self, owner: &str, name: &str, descriptor: &str) -> BytecodeResult<()> {
        self.invoke(opcodes::INVOKEVIRTUAL, owner, name, descriptor)
    }

    pub fn invokespecial(&mut self, owner: &str, name: &str, descriptor: &str) -> BytecodeResult<()> {
        self.invoke(opcodes::INVOKESPECIAL, owner, name, descriptor)
    }

    pub fn invokestatic(&mut self, owner: &str, name: &str, descriptor: &str) -> BytecodeResult<()> {
        self.invoke(opcodes::INVOKESTATIC, owner, name, descriptor)
    }

    pub fn invokeinterface(&mut self, owner: &str, name: &str, descriptor: &str) -> BytecodeResult<()> {
        self.invoke(opcodes::INVOKEINTERFACE, owner, name, descriptor)
    }

    /// `new C`; the value stays uninitialized until its constructor runs
    pub fn new_object(&mut self, class: &str) -> BytecodeResult<()> {
        let index = self.pool.add_class(class)?;
        let at = self.cur_cp();
        self.emit1(opcodes::NEW);
        self.emit2(index);
        self.state.push(Type::Uninitialized(at));
        self.touch_stack();
        Ok(())
    }

    /// Array of `element`, sized by the int on the stack
    pub fn new_array(&mut self, element: &FieldType) -> BytecodeResult<()> {
        let at = self.code.len();
        self.state.pop(at)?;
        match element.class_operand() {
            Some(class) => {
                let index = self.pool.add_class(&class)?;
                self.emit1(opcodes::ANEWARRAY);
                self.emit2(index);
            }
            None => {
                let atype = match element {
                    FieldType::Boolean => 4,
                    FieldType::Char => 5,
                    FieldType::Float => 6,
                    FieldType::Double => 7,
                    FieldType::Byte => 8,
                    FieldType::Short => 9,
                    FieldType::Int => 10,
                    _ => 11,
                };
                self.emit1(opcodes::NEWARRAY);
                self.emit1(atype);
            }
        }
        self.state.push(Type::Object(format!("[{}", element)));
        self.touch_stack();
        Ok(())
    }

    /// `class_operand` is an internal name or an array descriptor
    pub fn checkcast(&mut self, class_operand: &str) -> BytecodeResult<()> {
        let index = self.pool.add_class(class_operand)?;
        self.state.pop(self.code.len())?;
        self.emit1(opcodes::CHECKCAST);
        self.emit2(index);
        self.state.push(Type::object(class_operand));
        Ok(())
    }

    pub fn instanceof(&mut self, class_operand: &str) -> BytecodeResult<()> {
        let index = self.pool.add_class(class_operand)?;
        self.state.pop(self.code.len())?;
        self.emit1(opcodes::INSTANCEOF);
        self.emit2(index);
        self.state.push(Type::Int);
        Ok(())
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(LabelInfo::default());
        Label(self.labels.len() - 1)
    }

    /// Record `state` as reaching `label`
    fn reach(&mut self, label: Label, state: State) {
        let info = &mut self.labels[label.0];
        info.state = Some(match info.state.take() {
            Some(prev) => prev.merge(&state),
            None => state,
        });
    }

    /// Conditional or unconditional jump to `label`
    pub fn branch(&mut self, op: u8, label: Label) -> BytecodeResult<()> {
        use opcodes::*;
        let at = self.code.len();
        let pops = match op {
            GOTO => 0,
            IFEQ..=IFLE | IFNULL | IFNONNULL => 1,
            IF_ICMPEQ..=IF_ACMPNE => 2,
            _ => return Err(BytecodeError::Unsupported { name: opcode_name(op), offset: at }),
        };
        self.pop_n(pops)?;
        let state = self.state.clone();
        self.reach(label, state);
        self.fixups.push(Fixup { instr: at as u32, at: at + 1, label, wide: false });
        self.emit1(op);
        self.emit2(0);
        if op == GOTO {
            self.alive = false;
        }
        Ok(())
    }

    /// `tableswitch` over `low..low + targets.len()` on the int at the stack top
    pub fn tableswitch(&mut self, low: i32, default: Label, targets: &[Label]) -> BytecodeResult<()> {
        let at = self.code.len();
        self.state.pop(at)?;
        let state = self.state.clone();
        self.emit1(opcodes::TABLESWITCH);
        while self.code.len() % 4 != 0 {
            self.emit1(0);
        }
        self.reach(default, state.clone());
        self.fixups.push(Fixup { instr: at as u32, at: self.code.len(), label: default, wide: true });
        self.emit4(0);
        self.emit4(low);
        self.emit4(low + targets.len() as i32 - 1);
        for &target in targets {
            self.reach(target, state.clone());
            self.fixups.push(Fixup { instr: at as u32, at: self.code.len(), label: target, wide: true });
            self.emit4(0);
        }
        self.alive = false;
        Ok(())
    }

    /// Bind `label` to the current offset
    pub fn bind(&mut self, label: Label) {
        let offset = self.cur_cp();
        let reaching = self.labels[label.0].state.clone();
        let state = match (self.alive, reaching) {
            (true, Some(jumped)) => jumped.merge(&self.state),
            (true, None) => self.state.clone(),
            (false, Some(jumped)) => jumped,
            // Unreachable label: keep the last known state
            (false, None) => self.state.clone(),
        };
        self.labels[label.0].offset = Some(offset);
        self.state = state.clone();
        self.alive = true;
        let merged = match self.frames.remove(&offset) {
            Some(existing) => existing.merge(&state),
            None => state,
        };
        self.frames.insert(offset, merged);
    }

    fn patch(&mut self) -> BytecodeResult<()> {
        for fixup in &self.fixups {
            let target = self.labels[fixup.label.0].offset.ok_or(BytecodeError::UnboundLabel(fixup.label.0))?;
            let off = target as i64 - fixup.instr as i64;
            if fixup.wide {
                let v = i32::try_from(off).map_err(|_| BytecodeError::BranchTooFar { offset: off })?;
                self.code[fixup.at..fixup.at + 4].copy_from_slice(&v.to_be_bytes());
            } else {
                let v = i16::try_from(off).map_err(|_| BytecodeError::BranchTooFar { offset: off })?;
                self.code[fixup.at..fixup.at + 2].copy_from_slice(&v.to_be_bytes());
            }
        }
        Ok(())
    }

    /// Finish the body as a `Code` attribute
    pub fn into_code(mut self) -> BytecodeResult<CodeAttribute> {
        self.patch()?;
        if self.code.len() > super::instruction::MAX_CODE_LENGTH {
            return Err(BytecodeError::CodeTooLarge);
        }
        let max_locals = self.max_locals.max(self.state.locals.len() as u16);
        let mut code = CodeAttribute::new(self.max_stack, max_locals, std::mem::take(&mut self.code));
        if self.need_stack_map {
            let frames = std::mem::take(&mut self.frames)
                .into_iter()
                .filter(|(offset, _)| *offset < code.code.len() as u32)
                .map(|(offset, state)| Ok((offset, state.frame(self.pool, 0)?)))
                .collect::<BytecodeResult<Vec<_>>>()?;
            if !frames.is_empty() {
                let table = StackMapTable::from_absolute(frames).ok_or(BytecodeError::CodeTooLarge)?;
                code.attributes.push(make_stack_map_attribute(self.pool, &table)?);
            }
        }
        Ok(code)
    }

    /// Finish straight-line code meant to be spliced into another body
    pub fn into_fragment(self) -> BytecodeResult<(Vec<u8>, u16)> {
        if !self.fixups.is_empty() {
            return Err(BytecodeError::Unsupported { name: "branch in fragment", offset: 0 });
        }
        Ok((self.code, self.max_stack))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::defs::access_flags::*;
    use crate::codegen::instruction::decode;
    use crate::codegen::opcodes::*;

    #[test]
    fn tracks_max_stack_and_locals() {
        let mut pool = ConstantPool::new();
        let mut b = CodeBuilder::for_method(&mut pool, "p/A", false, ACC_STATIC, "f", "(JI)J").unwrap();
        b.load(&FieldType::Long, 0).unwrap();
        b.load(&FieldType::Int, 2).unwrap();
        b.emitop(I2L).unwrap();
        b.emitop(LADD).unwrap();
        b.emitop(LRETURN).unwrap();
        let code = b.into_code().unwrap();
        assert_eq!(code.code, vec![LLOAD_0, ILOAD_2, I2L, LADD, LRETURN]);
        assert_eq!(code.max_stack, 4);
        assert_eq!(code.max_locals, 3);
        assert!(code.attributes.is_empty());
    }

    #[test]
    fn branches_are_patched_and_framed() {
        let mut pool = ConstantPool::new();
        let mut b = CodeBuilder::for_method(&mut pool, "p/A", true, ACC_PUBLIC, "g", "(I)I").unwrap();
        let zero = b.new_label();
        b.load(&FieldType::Int, 1).unwrap();
        b.branch(IFEQ, zero).unwrap();
        b.iconst(1).unwrap();
        b.emitop(IRETURN).unwrap();
        b.bind(zero);
        b.iconst(0).unwrap();
        b.emitop(IRETURN).unwrap();
        let code = b.into_code().unwrap();
        let instrs = decode(&code.code).unwrap();
        assert_eq!(instrs[1].targets(), vec![6]);
        let table = StackMapTable::parse(&code.attributes[0].info).unwrap();
        assert_eq!(table.absolute_offsets(), vec![6]);
        match &table.frames[0] {
            StackMapFrame::Full { locals, stack, .. } => {
                assert_eq!(locals.len(), 2);
                assert_eq!(locals[1], VerificationType::Integer);
                assert!(stack.is_empty());
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn constructor_call_initializes_receiver() {
        let mut pool = ConstantPool::new();
        let mut b = CodeBuilder::for_method(&mut pool, "p/A", true, ACC_PUBLIC, "<init>", "()V").unwrap();
        assert_eq!(b.state().locals[0], Type::UninitializedThis);
        b.aload(0).unwrap();
        b.invokespecial("java/lang/Object", "<init>", "()V").unwrap();
        assert_eq!(b.state().locals[0], Type::object("p/A"));
        b.new_object("p/B").unwrap();
        b.emitop(DUP).unwrap();
        b.invokespecial("p/B", "<init>", "()V").unwrap();
        assert_eq!(b.state().stack, vec![Type::object("p/B")]);
    }

    #[test]
    fn iconst_picks_shortest_form() {
        let mut pool = ConstantPool::new();
        let mut b = CodeBuilder::new(&mut pool, "p/A", false, Vec::new());
        b.iconst(3).unwrap();
        b.iconst(100).unwrap();
        b.iconst(1000).unwrap();
        b.iconst(100_000).unwrap();
        let (code, max_stack) = b.into_fragment().unwrap();
        assert_eq!(&code[..6], &[ICONST_3, BIPUSH, 100, SIPUSH, 0x03, 0xe8]);
        assert_eq!(code[6], LDC);
        assert_eq!(max_stack, 4);
    }

    #[test]
    fn unbound_label_is_an_error() {
        let mut pool = ConstantPool::new();
        let mut b = CodeBuilder::new(&mut pool, "p/A", false, Vec::new());
        let l = b.new_label();
        b.branch(GOTO, l).unwrap();
        assert_eq!(b.into_code().unwrap_err(), BytecodeError::UnboundLabel(0));
    }
}
