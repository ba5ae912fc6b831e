//! Per-member accessors
//!
//! Field members get four static methods: raw getter/setter doing the direct access,
//! and public getter/setter wrapping them in the member's read/write policy. For a
//! property member the user's getter and setter bodies move into raw instance
//! accessors and fresh policy bodies take their original names.

use crate::codegen::defs::access_flags::*;
use crate::codegen::descriptor::object_descriptor;
use crate::codegen::error::BytecodeResult;
use crate::codegen::instruction::decode;
use crate::codegen::opcodes::*;
use crate::codegen::defs::attribute_names;
use crate::codegen::{AttributeInfo, ClassFile, CodeBuilder};
use crate::error::{Error, Result};
use crate::metadata::{AccessPolicy, MemberDescriptor};
use crate::naming::{AccessorKind, FieldKind, MemberRole, StateManagerCall, TypeRole};

use super::emit::{Emitter, BIT_SET, DETACHED_DIRTY, DETACHED_LOADED};
use super::plan::PropertyPlan;

/// How a policy body reaches the raw accessors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Receiver {
    /// Static accessor; the instance is argument 0
    Static,
    /// Instance method of a property; `this` is local 0
    Instance,
}

struct RawAccess<'m> {
    receiver: Receiver,
    member: &'m MemberDescriptor,
    getter: String,
    setter: String,
}

impl RawAccess<'_> {
    fn get(&self, e: &Emitter<'_>, b: &mut CodeBuilder<'_>) -> BytecodeResult<()> {
        let this = e.class_name();
        let value = self.member.descriptor();
        b.aload(0)?;
        match self.receiver {
            Receiver::Static => b.invokestatic(this, &self.getter, &format!("({}){}", object_descriptor(this), value)),
            Receiver::Instance => b.invokespecial(this, &self.getter, &format!("(){}", value)),
        }
    }

    /// Push the new value argument
    fn argument(&self, b: &mut CodeBuilder<'_>) -> BytecodeResult<()> {
        b.load(&self.member.field_type, 1)
    }

    fn set(&self, e: &Emitter<'_>, b: &mut CodeBuilder<'_>) -> BytecodeResult<()> {
        let this = e.class_name();
        let value = self.member.descriptor();
        b.aload(0)?;
        self.argument(b)?;
        match self.receiver {
            Receiver::Static => b.invokestatic(this, &self.setter, &format!("({}{})V", object_descriptor(this), value)),
            Receiver::Instance => b.invokespecial(this, &self.setter, &format!("({})V", value)),
        }
    }
}

/// Emit accessors for every member of the plan
pub fn synthesize(class: &mut ClassFile, e: &Emitter<'_>) -> Result<()> {
    for member in &e.plan.members {
        match e.plan.property(&member.name) {
            Some(_) if member.is_abstract => {
                tracing::debug!(class = %e.class_name(), member = %member.name, "abstract property left alone");
            }
            Some(property) => property_accessors(class, e, property)?,
            None => field_accessors(class, e, member)?,
        }
    }
    Ok(())
}

fn field_accessors(class: &mut ClassFile, e: &Emitter<'_>, member: &MemberDescriptor) -> Result<()> {
    let this = e.class_name().to_string();
    let owner = object_descriptor(&this);
    let value = member.descriptor();
    let getter_descriptor = format!("({}){}", owner, value);
    let setter_descriptor = format!("({}{})V", owner, value);
    let visibility = e.plan.field_access.get(&member.name).copied().unwrap_or(0) & VISIBILITY_MASK;
    let raw = RawAccess {
        receiver: Receiver::Static,
        member,
        getter: e.policy.accessor_name(AccessorKind::RawGetter, &member.name),
        setter: e.policy.accessor_name(AccessorKind::RawSetter, &member.name),
    };

    if !class.has_method(&raw.getter, &getter_descriptor) {
        e.add_method(class, ACC_PRIVATE | ACC_STATIC, &raw.getter, &getter_descriptor, |e, b| {
            b.aload(0)?;
            b.getfield(e.class_name(), &member.name, &value)?;
            b.emitop(member.field_type.return_opcode())
        })?;
    }
    if !class.has_method(&raw.setter, &setter_descriptor) {
        e.add_method(class, ACC_PRIVATE | ACC_STATIC, &raw.setter, &setter_descriptor, |e, b| {
            b.aload(0)?;
            b.load(&member.field_type, 1)?;
            b.putfield(e.class_name(), &member.name, &value)?;
            b.emitop(RETURN)
        })?;
    }

    let getter = e.policy.accessor_name(AccessorKind::PublicGetter, &member.name);
    if !class.has_method(&getter, &getter_descriptor) {
        e.add_method(class, visibility | ACC_STATIC | ACC_FINAL, &getter, &getter_descriptor, |e, b| {
            policy_getter(e, b, &raw)
        })?;
    }
    let setter = e.policy.accessor_name(AccessorKind::PublicSetter, &member.name);
    if !class.has_method(&setter, &setter_descriptor) {
        e.add_method(class, visibility | ACC_STATIC | ACC_FINAL, &setter, &setter_descriptor, |e, b| {
            policy_setter(e, b, &raw)
        })?;
    }
    Ok(())
}

/// Read with interception.
///
/// Checked: `flags > 0`, then a state manager, then not loaded. Mediated skips the
/// flags test. Any failed test falls through to the raw read.
fn policy_getter(e: &Emitter<'_>, b: &mut CodeBuilder<'_>, raw: &RawAccess<'_>) -> BytecodeResult<()> {
    let member = raw.member;
    let ret = member.field_type.return_opcode();
    if member.read == AccessPolicy::Normal {
        raw.get(e, b)?;
        return b.emitop(ret);
    }
    let direct = b.new_label();
    if member.read == AccessPolicy::Checked {
        e.this_field(b, MemberRole::FlagsField)?;
        b.branch(IFLE, direct)?;
    }
    e.if_no_state_manager(b, direct)?;
    e.state_manager(b)?;
    b.aload(0)?;
    e.push_index(b, member.relative_index)?;
    e.call_state_manager(b, StateManagerCall::IsLoaded)?;
    b.branch(IFNE, direct)?;

    let kind = FieldKind::of(&member.field_type);
    e.state_manager(b)?;
    b.aload(0)?;
    e.push_index(b, member.relative_index)?;
    raw.get(e, b)?;
    e.call_state_manager(b, StateManagerCall::GetField(kind))?;
    e.cast_from_object(b, &member.field_type)?;
    b.emitop(ret)?;

    b.bind(direct);
    if e.plan.detachable {
        detached_read_check(e, b, member)?;
    }
    raw.get(e, b)?;
    b.emitop(ret)
}

/// A detached instance may only read members it was detached with or has since set
fn detached_read_check(e: &Emitter<'_>, b: &mut CodeBuilder<'_>, member: &MemberDescriptor) -> BytecodeResult<()> {
    let ok = b.new_label();
    e.is_detached(b)?;
    b.branch(IFEQ, ok)?;
    for slot in [DETACHED_LOADED, DETACHED_DIRTY] {
        e.detached_bits(b, slot)?;
        e.push_index(b, member.relative_index)?;
        b.invokevirtual(BIT_SET, "get", "(I)Z")?;
        b.branch(IFNE, ok)?;
    }
    if e.plan.detach_listener {
        let listener = e.policy.type_name(TypeRole::DetachListener);
        b.invokestatic(listener, "getInstance", &format!("(){}", object_descriptor(listener)))?;
        b.aload(0)?;
        b.ldc_string(&member.name)?;
        b.invokevirtual(listener, "undetachedFieldAccess", "(Ljava/lang/Object;Ljava/lang/String;)V")?;
    } else {
        let message = format!(
            "You have just attempted to access field \"{}\" yet this field was not detached when you detached the object. Either dont access this field, or detach it when detaching the object.",
            member.name
        );
        e.throw_new(b, e.policy.type_name(TypeRole::FieldNotDetachedException), &message)?;
    }
    b.bind(ok);
    Ok(())
}

/// Write with interception. Checked mediates when `flags != 0`
fn policy_setter(e: &Emitter<'_>, b: &mut CodeBuilder<'_>, raw: &RawAccess<'_>) -> BytecodeResult<()> {
    let member = raw.member;
    if member.write == AccessPolicy::Normal {
        raw.set(e, b)?;
        return b.emitop(RETURN);
    }
    let direct = b.new_label();
    if member.write == AccessPolicy::Checked {
        e.this_field(b, MemberRole::FlagsField)?;
        b.branch(IFEQ, direct)?;
    }
    e.if_no_state_manager(b, direct)?;
    e.state_manager(b)?;
    b.aload(0)?;
    e.push_index(b, member.relative_index)?;
    raw.get(e, b)?;
    raw.argument(b)?;
    e.call_state_manager(b, StateManagerCall::SetField(FieldKind::of(&member.field_type)))?;
    b.emitop(RETURN)?;

    b.bind(direct);
    raw.set(e, b)?;
    if e.plan.detachable {
        let done = b.new_label();
        e.is_detached(b)?;
        b.branch(IFEQ, done)?;
        e.detached_bits(b, DETACHED_DIRTY)?;
        e.push_index(b, member.relative_index)?;
        b.invokevirtual(BIT_SET, "set", "(I)V")?;
        b.bind(done);
    }
    b.emitop(RETURN)
}

/// Move the user getter/setter bodies to raw accessors and emit policy bodies in their place
fn property_accessors(class: &mut ClassFile, e: &Emitter<'_>, property: &PropertyPlan) -> Result<()> {
    let member = &property.member;
    let raw = RawAccess {
        receiver: Receiver::Instance,
        member,
        getter: property.raw_getter.clone(),
        setter: property.raw_setter.clone(),
    };
    let access = member.visibility.access_flags();

    if !class.has_method(&property.raw_getter, &property.getter_descriptor) {
        let (original_access, kept) =
            move_body(class, e, &property.getter, &property.getter_descriptor, &property.raw_getter, access)?;
        e.add_method(class, original_access, &property.getter, &property.getter_descriptor, |e, b| {
            policy_getter(e, b, &raw)
        })?;
        attach(class, kept);
    }
    if !class.has_method(&property.raw_setter, &property.setter_descriptor) {
        let (original_access, kept) =
            move_body(class, e, &property.setter, &property.setter_descriptor, &property.raw_setter, access)?;
        e.add_method(class, original_access, &property.setter, &property.setter_descriptor, |e, b| {
            policy_setter(e, b, &raw)
        })?;
        attach(class, kept);
    }
    Ok(())
}

fn attach(class: &mut ClassFile, attributes: Vec<AttributeInfo>) {
    if let Some(method) = class.methods.last_mut() {
        method.attributes.extend(attributes);
    }
}

/// Rename the user method `name` to `raw_name`, returning its original access flags
/// and the attributes (annotations, signature) that stay with the public name
fn move_body(
    class: &mut ClassFile,
    e: &Emitter<'_>,
    name: &str,
    descriptor: &str,
    raw_name: &str,
    raw_access: u16,
) -> Result<(u16, Vec<AttributeInfo>)> {
    let this = e.class_name();
    let index = class
        .find_method_index(name, descriptor)
        .ok_or_else(|| Error::missing_member(this, format!("{}{}", name, descriptor)))?;
    let pool = &class.constant_pool;
    let method = &class.methods[index];
    let code = method
        .code(pool)
        .map_err(|err| Error::malformed(this, err))?
        .ok_or_else(|| Error::unsupported(this, name, "property accessor has no code"))?;
    let instructions = decode(&code.code).map_err(|err| Error::malformed(this, err))?;
    if instructions.iter().any(|i| matches!(i.opcode, JSR | JSR_W | RET)) {
        return Err(Error::unsupported(this, name, "property accessor uses jsr/ret subroutines"));
    }

    let original_access = method.access_flags;
    let mut kept = Vec::new();
    let mut moved = Vec::new();
    for attribute in &method.attributes {
        match attribute.name(pool) {
            Some(attribute_names::CODE) | Some(attribute_names::EXCEPTIONS) => kept.push(attribute.clone()),
            _ => moved.push(attribute.clone()),
        }
    }
    let name_index = class.constant_pool.add_utf8(raw_name).map_err(|err| Error::const_pool(this, err))?;
    let method = &mut class.methods[index];
    method.name_index = name_index;
    method.access_flags = raw_access;
    method.attributes = kept;
    tracing::debug!(class = %this, from = %name, to = %raw_name, "moved property body");
    Ok((original_access, moved))
}
