//! Emission helpers shared by the structure and accessor passes

use crate::codegen::descriptor::FieldType;
use crate::codegen::error::BytecodeResult;
use crate::codegen::opcodes::*;
use crate::codegen::{ClassFile, CodeBuilder, Label, MethodInfo};
use crate::error::{Error, Result};
use crate::metadata::MemberDescriptor;
use crate::naming::{FieldKind, MemberRole, NamingPolicy, StateManagerCall, TypeRole};

use super::plan::EnhancementPlan;

pub const BIT_SET: &str = "java/util/BitSet";
/// Slots of the detached-state array
pub const DETACHED_LOADED: i32 = 2;
pub const DETACHED_DIRTY: i32 = 3;

/// Read-only view over the plan and naming policy while bodies are emitted
pub struct Emitter<'p> {
    pub plan: &'p EnhancementPlan,
    pub policy: &'p NamingPolicy,
}

impl<'p> Emitter<'p> {
    pub fn new(plan: &'p EnhancementPlan, policy: &'p NamingPolicy) -> Self {
        Self { plan, policy }
    }

    pub fn class_name(&self) -> &str {
        &self.plan.class_name
    }

    /// Assemble a method and append it to `class`
    pub fn add_method<F>(&self, class: &mut ClassFile, access: u16, name: &str, descriptor: &str, body: F) -> Result<()>
    where
        F: FnOnce(&Self, &mut CodeBuilder<'_>) -> BytecodeResult<()>,
    {
        let this = self.class_name();
        let code = {
            let mut b = CodeBuilder::for_method(
                &mut class.constant_pool,
                this,
                self.plan.need_stack_map,
                access,
                name,
                descriptor,
            )
            .map_err(|e| Error::from_bytecode(this, name, e))?;
            body(self, &mut b).map_err(|e| Error::from_bytecode(this, name, e))?;
            b.into_code().map_err(|e| Error::from_bytecode(this, name, e))?
        };
        let pool = &mut class.constant_pool;
        let name_index = pool.add_utf8(name).map_err(|e| Error::const_pool(this, e))?;
        let descriptor_index = pool.add_utf8(descriptor).map_err(|e| Error::const_pool(this, e))?;
        let mut method = MethodInfo::new(access, name_index, descriptor_index);
        method.set_code(pool, code).map_err(|e| Error::const_pool(this, e))?;
        tracing::debug!(class = %this, method = %name, descriptor = %descriptor, "synthesized method");
        class.methods.push(method);
        Ok(())
    }

    /// Push a contract field of `this` (local 0)
    pub fn this_field(&self, b: &mut CodeBuilder<'_>, role: MemberRole) -> BytecodeResult<()> {
        let spec = self.policy.member(role);
        b.aload(0)?;
        b.getfield(self.class_name(), &spec.name, &spec.descriptor)
    }

    pub fn state_manager(&self, b: &mut CodeBuilder<'_>) -> BytecodeResult<()> {
        self.this_field(b, MemberRole::StateManagerField)
    }

    /// Jump to `label` when the state manager is null
    pub fn if_no_state_manager(&self, b: &mut CodeBuilder<'_>, label: Label) -> BytecodeResult<()> {
        self.state_manager(b)?;
        b.branch(IFNULL, label)
    }

    pub fn call_state_manager(&self, b: &mut CodeBuilder<'_>, call: StateManagerCall) -> BytecodeResult<()> {
        let (name, descriptor) = self.policy.state_manager_method(call);
        b.invokeinterface(self.policy.type_name(TypeRole::StateManager), &name, &descriptor)
    }

    /// `inheritedFieldCount + relative`, the absolute index of a member
    pub fn push_index(&self, b: &mut CodeBuilder<'_>, relative: usize) -> BytecodeResult<()> {
        let count = self.policy.member(MemberRole::InheritedFieldCountField);
        b.getstatic(self.class_name(), &count.name, &count.descriptor)?;
        b.iconst(relative as i32)?;
        b.emitop(IADD)
    }

    pub fn invoke_self(&self, b: &mut CodeBuilder<'_>, role: MemberRole) -> BytecodeResult<()> {
        let spec = self.policy.member(role);
        b.invokevirtual(self.class_name(), &spec.name, &spec.descriptor)
    }

    /// `aload_0; invokevirtual isDetached`
    pub fn is_detached(&self, b: &mut CodeBuilder<'_>) -> BytecodeResult<()> {
        b.aload(0)?;
        self.invoke_self(b, MemberRole::IsDetached)
    }

    /// Push the BitSet in `detachedState[slot]`
    pub fn detached_bits(&self, b: &mut CodeBuilder<'_>, slot: i32) -> BytecodeResult<()> {
        self.this_field(b, MemberRole::DetachedStateField)?;
        b.iconst(slot)?;
        b.emitop(AALOAD)?;
        b.checkcast(BIT_SET)
    }

    /// `new class(message); athrow`
    pub fn throw_new(&self, b: &mut CodeBuilder<'_>, class: &str, message: &str) -> BytecodeResult<()> {
        b.new_object(class)?;
        b.emitop(DUP)?;
        b.ldc_string(message)?;
        b.invokespecial(class, "<init>", "(Ljava/lang/String;)V")?;
        b.emitop(ATHROW)
    }

    /// Cast a value returned as `Object` back to the member's type
    pub fn cast_from_object(&self, b: &mut CodeBuilder<'_>, field_type: &FieldType) -> BytecodeResult<()> {
        if FieldKind::of(field_type) != FieldKind::Object {
            return Ok(());
        }
        match field_type.class_operand() {
            Some(class) if class != "java/lang/Object" => b.checkcast(&class),
            _ => Ok(()),
        }
    }

    /// Push the current value of `member` on `this` (local 0), bypassing interception
    pub fn raw_value(&self, b: &mut CodeBuilder<'_>, member: &MemberDescriptor) -> BytecodeResult<()> {
        b.aload(0)?;
        match self.plan.property(&member.name) {
            Some(p) if member.is_abstract => b.invokevirtual(self.class_name(), &p.getter, &p.getter_descriptor),
            Some(p) => b.invokespecial(self.class_name(), &p.raw_getter, &p.getter_descriptor),
            None => b.getfield(self.class_name(), &member.name, &member.descriptor()),
        }
    }

    /// Store the value on the stack top into `member`; `this` must sit below it
    pub fn raw_store(&self, b: &mut CodeBuilder<'_>, member: &MemberDescriptor) -> BytecodeResult<()> {
        match self.plan.property(&member.name) {
            Some(p) if member.is_abstract => b.invokevirtual(self.class_name(), &p.setter, &p.setter_descriptor),
            Some(p) => b.invokespecial(self.class_name(), &p.raw_setter, &p.setter_descriptor),
            None => b.putfield(self.class_name(), &member.name, &member.descriptor()),
        }
    }
}
