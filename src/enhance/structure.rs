//! Structural augmentation: contract interfaces, fields and methods
//!
//! Everything here is driven by the plan's `missing_*` lists, so a member that is
//! already present with the exact name and descriptor is never touched again.

use crate::codegen::defs::access_flags::*;
use crate::codegen::defs::{CONSTRUCTOR_METHOD_NAME, STATIC_INITIALIZER_METHOD_NAME, VOID_METHOD_DESCRIPTOR};
use crate::codegen::descriptor::FieldType;
use crate::codegen::error::{BytecodeError, BytecodeResult};
use crate::codegen::opcodes::*;
use crate::codegen::{ClassFile, CodeBuilder, ConstantPool, Label};
use crate::error::{Error, Result};
use crate::naming::{FieldKind, MemberRole, MemberSpec, StateManagerCall, TypeRole};

use super::emit::{Emitter, DETACHED_DIRTY};

const ILLEGAL_ARGUMENT: &str = "java/lang/IllegalArgumentException";
const ILLEGAL_STATE: &str = "java/lang/IllegalStateException";
const CLASS_CAST: &str = "java/lang/ClassCastException";

/// Add the contract's interfaces, fields and methods to `class`
pub fn augment(class: &mut ClassFile, e: &Emitter<'_>) -> Result<()> {
    let plan = e.plan;
    let name = e.class_name().to_string();
    for interface in &plan.contract.interfaces {
        if class.add_interface(interface).map_err(|err| Error::const_pool(&name, err))? {
            tracing::debug!(class = %name, interface = %interface, "added interface");
        }
    }
    for field in &plan.missing_fields {
        class
            .add_field(field.access, &field.name, &field.descriptor)
            .map_err(|err| Error::const_pool(&name, err))?;
        tracing::debug!(class = %name, field = %field.name, "added field");
    }
    if plan.needs_default_constructor() {
        let super_name = plan.super_name.clone();
        e.add_method(class, ACC_PUBLIC, CONSTRUCTOR_METHOD_NAME, VOID_METHOD_DESCRIPTOR, |_, b| {
            b.aload(0)?;
            b.invokespecial(&super_name, CONSTRUCTOR_METHOD_NAME, VOID_METHOD_DESCRIPTOR)?;
            b.emitop(RETURN)
        })?;
    }
    for role in MemberRole::ALL {
        if role.is_field() {
            continue;
        }
        let spec = e.policy.member(role);
        if !plan.missing_methods.iter().any(|m| m.name == spec.name && m.descriptor == spec.descriptor) {
            continue;
        }
        emit_role(class, e, role, &spec)?;
    }
    if !class.has_method(STATIC_INITIALIZER_METHOD_NAME, VOID_METHOD_DESCRIPTOR) {
        e.add_method(class, ACC_STATIC, STATIC_INITIALIZER_METHOD_NAME, VOID_METHOD_DESCRIPTOR, |e, b| {
            initializer_block(e, b)?;
            b.emitop(RETURN)
        })?;
    }
    Ok(())
}

fn emit_role(class: &mut ClassFile, e: &Emitter<'_>, role: MemberRole, spec: &MemberSpec) -> Result<()> {
    e.add_method(class, spec.access, &spec.name, &spec.descriptor, |e, b| match role {
        MemberRole::IsDetached => is_detached(e, b),
        MemberRole::IsDirty => state_query(e, b, StateManagerCall::IsDirty, e.plan.detachable),
        MemberRole::IsNew => state_query(e, b, StateManagerCall::IsNew, false),
        MemberRole::IsDeleted => state_query(e, b, StateManagerCall::IsDeleted, false),
        MemberRole::IsPersistent => state_query(e, b, StateManagerCall::IsPersistent, false),
        MemberRole::IsTransactional => state_query(e, b, StateManagerCall::IsTransactional, false),
        MemberRole::GetObjectId => object_query(e, b, StateManagerCall::GetObjectId, Some(0)),
        MemberRole::GetVersion => object_query(e, b, StateManagerCall::GetVersion, Some(1)),
        MemberRole::GetTransactionalObjectId => object_query(e, b, StateManagerCall::GetTransactionalObjectId, None),
        MemberRole::GetPersistenceManager => object_query(e, b, StateManagerCall::GetPersistenceManager, None),
        MemberRole::MakeDirty => make_dirty(e, b),
        MemberRole::PreSerialize => pre_serialize(e, b),
        MemberRole::ReplaceStateManager => replace_state_manager(e, b),
        MemberRole::ReplaceFlags => replace_flags(e, b),
        MemberRole::ReplaceDetachedState => replace_detached_state(e, b),
        MemberRole::ProvideField => provide_field(e, b),
        MemberRole::ReplaceField => replace_field(e, b),
        MemberRole::GetManagedFieldCount => managed_field_count(e, b),
        MemberRole::NewInstance => new_instance(e, b, false),
        MemberRole::NewInstanceWithIdentity => new_instance(e, b, true),
        MemberRole::NewObjectIdInstance => new_object_id(e, b),
        MemberRole::CopyKeyFieldsFromObjectId => copy_key_fields(e, b),
        _ => Err(BytecodeError::Unsupported { name: "contract field", offset: 0 }),
    })
}

fn is_detached(e: &Emitter<'_>, b: &mut CodeBuilder<'_>) -> BytecodeResult<()> {
    if !e.plan.detachable {
        b.iconst(0)?;
        return b.emitop(IRETURN);
    }
    let not_detached = b.new_label();
    e.state_manager(b)?;
    b.branch(IFNONNULL, not_detached)?;
    e.this_field(b, MemberRole::DetachedStateField)?;
    b.branch(IFNULL, not_detached)?;
    b.iconst(1)?;
    b.emitop(IRETURN)?;
    b.bind(not_detached);
    b.iconst(0)?;
    b.emitop(IRETURN)
}

/// `sm == null ? <fallback> : sm.<call>(this)` for boolean state queries
fn state_query(e: &Emitter<'_>, b: &mut CodeBuilder<'_>, call: StateManagerCall, detached_dirty: bool) -> BytecodeResult<()> {
    let no_sm = b.new_label();
    e.if_no_state_manager(b, no_sm)?;
    e.state_manager(b)?;
    b.aload(0)?;
    e.call_state_manager(b, call)?;
    b.emitop(IRETURN)?;
    b.bind(no_sm);
    let not_dirty = b.new_label();
    if detached_dirty {
        e.is_detached(b)?;
        b.branch(IFEQ, not_dirty)?;
        e.detached_bits(b, DETACHED_DIRTY)?;
        b.invokevirtual(super::emit::BIT_SET, "length", "()I")?;
        b.branch(IFLE, not_dirty)?;
        b.iconst(1)?;
        b.emitop(IRETURN)?;
    }
    b.bind(not_dirty);
    b.iconst(0)?;
    b.emitop(IRETURN)
}

/// Object-valued query; detached instances answer from `detachedState[slot]`
fn object_query(
    e: &Emitter<'_>,
    b: &mut CodeBuilder<'_>,
    call: StateManagerCall,
    detached_slot: Option<i32>,
) -> BytecodeResult<()> {
    let no_sm = b.new_label();
    e.if_no_state_manager(b, no_sm)?;
    e.state_manager(b)?;
    b.aload(0)?;
    e.call_state_manager(b, call)?;
    b.emitop(ARETURN)?;
    b.bind(no_sm);
    let none = b.new_label();
    if let (true, Some(slot)) = (e.plan.detachable, detached_slot) {
        e.is_detached(b)?;
        b.branch(IFEQ, none)?;
        e.this_field(b, MemberRole::DetachedStateField)?;
        b.iconst(slot)?;
        b.emitop(AALOAD)?;
        b.emitop(ARETURN)?;
    }
    b.bind(none);
    b.emitop(ACONST_NULL)?;
    b.emitop(ARETURN)
}

fn make_dirty(e: &Emitter<'_>, b: &mut CodeBuilder<'_>) -> BytecodeResult<()> {
    let done = b.new_label();
    e.if_no_state_manager(b, done)?;
    e.state_manager(b)?;
    b.aload(0)?;
    b.aload(1)?;
    e.call_state_manager(b, StateManagerCall::MakeDirty)?;
    b.bind(done);
    b.emitop(RETURN)
}

fn pre_serialize(e: &Emitter<'_>, b: &mut CodeBuilder<'_>) -> BytecodeResult<()> {
    let done = b.new_label();
    e.if_no_state_manager(b, done)?;
    e.state_manager(b)?;
    b.aload(0)?;
    e.call_state_manager(b, StateManagerCall::PreSerialize)?;
    b.bind(done);
    b.emitop(RETURN)
}

fn replace_state_manager(e: &Emitter<'_>, b: &mut CodeBuilder<'_>) -> BytecodeResult<()> {
    let sm = e.policy.member(MemberRole::StateManagerField);
    let flags = e.policy.member(MemberRole::FlagsField);
    let this = e.class_name();
    let unset = b.new_label();
    e.if_no_state_manager(b, unset)?;
    b.aload(0)?;
    e.state_manager(b)?;
    b.aload(0)?;
    b.aload(1)?;
    e.call_state_manager(b, StateManagerCall::ReplacingStateManager)?;
    b.putfield(this, &sm.name, &sm.descriptor)?;
    b.emitop(RETURN)?;
    b.bind(unset);
    b.aload(0)?;
    b.aload(1)?;
    b.putfield(this, &sm.name, &sm.descriptor)?;
    b.aload(0)?;
    b.iconst(1)?;
    b.putfield(this, &flags.name, &flags.descriptor)?;
    b.emitop(RETURN)
}

fn replace_flags(e: &Emitter<'_>, b: &mut CodeBuilder<'_>) -> BytecodeResult<()> {
    let flags = e.policy.member(MemberRole::FlagsField);
    let done = b.new_label();
    e.if_no_state_manager(b, done)?;
    b.aload(0)?;
    e.state_manager(b)?;
    b.aload(0)?;
    e.call_state_manager(b, StateManagerCall::ReplacingFlags)?;
    b.putfield(e.class_name(), &flags.name, &flags.descriptor)?;
    b.bind(done);
    b.emitop(RETURN)
}

fn replace_detached_state(e: &Emitter<'_>, b: &mut CodeBuilder<'_>) -> BytecodeResult<()> {
    let state = e.policy.member(MemberRole::DetachedStateField);
    let ok = b.new_label();
    e.state_manager(b)?;
    b.branch(IFNONNULL, ok)?;
    e.throw_new(b, ILLEGAL_STATE, "state manager is null")?;
    b.bind(ok);
    b.aload(0)?;
    e.state_manager(b)?;
    b.aload(0)?;
    e.this_field(b, MemberRole::DetachedStateField)?;
    e.call_state_manager(b, StateManagerCall::ReplacingDetachedState)?;
    b.putfield(e.class_name(), &state.name, &state.descriptor)?;
    b.emitop(RETURN)
}

/// Guard plus `tableswitch` on `index - inheritedFieldCount`; one arm per own member
fn field_dispatch<F>(e: &Emitter<'_>, b: &mut CodeBuilder<'_>, role: MemberRole, mut arm: F) -> BytecodeResult<()>
where
    F: FnMut(&mut CodeBuilder<'_>, usize) -> BytecodeResult<()>,
{
    let ok = b.new_label();
    e.state_manager(b)?;
    b.branch(IFNONNULL, ok)?;
    e.throw_new(b, ILLEGAL_STATE, "state manager is null")?;
    b.bind(ok);

    let count = e.plan.members.len();
    let default = b.new_label();
    if count > 0 {
        let inherited = e.policy.member(MemberRole::InheritedFieldCountField);
        let arms: Vec<Label> = (0..count).map(|_| b.new_label()).collect();
        b.load(&FieldType::Int, 1)?;
        b.getstatic(e.class_name(), &inherited.name, &inherited.descriptor)?;
        b.emitop(ISUB)?;
        b.tableswitch(0, default, &arms)?;
        for (i, label) in arms.into_iter().enumerate() {
            b.bind(label);
            arm(b, i)?;
            b.emitop(RETURN)?;
        }
    }
    b.bind(default);
    if e.plan.is_root() {
        e.throw_new(b, ILLEGAL_ARGUMENT, "out of field index")
    } else {
        let spec = e.policy.member(role);
        b.aload(0)?;
        b.load(&FieldType::Int, 1)?;
        b.invokespecial(&e.plan.super_name, &spec.name, &spec.descriptor)?;
        b.emitop(RETURN)
    }
}

fn provide_field(e: &Emitter<'_>, b: &mut CodeBuilder<'_>) -> BytecodeResult<()> {
    field_dispatch(e, b, MemberRole::ProvideField, |b, i| {
        let member = &e.plan.members[i];
        e.state_manager(b)?;
        b.aload(0)?;
        b.load(&FieldType::Int, 1)?;
        e.raw_value(b, member)?;
        e.call_state_manager(b, StateManagerCall::ProvidedField(FieldKind::of(&member.field_type)))
    })
}

fn replace_field(e: &Emitter<'_>, b: &mut CodeBuilder<'_>) -> BytecodeResult<()> {
    field_dispatch(e, b, MemberRole::ReplaceField, |b, i| {
        let member = &e.plan.members[i];
        b.aload(0)?;
        e.state_manager(b)?;
        b.aload(0)?;
        b.load(&FieldType::Int, 1)?;
        e.call_state_manager(b, StateManagerCall::ReplacingField(FieldKind::of(&member.field_type)))?;
        e.cast_from_object(b, &member.field_type)?;
        e.raw_store(b, member)
    })
}

fn managed_field_count(e: &Emitter<'_>, b: &mut CodeBuilder<'_>) -> BytecodeResult<()> {
    let own = e.plan.members.len() as i32;
    match &e.plan.persistent_superclass {
        Some(parent) => {
            let spec = e.policy.member(MemberRole::GetManagedFieldCount);
            b.invokestatic(parent, &spec.name, &spec.descriptor)?;
            b.iconst(own)?;
            b.emitop(IADD)?;
        }
        None => b.iconst(own)?,
    }
    b.emitop(IRETURN)
}

/// `new C()` wired to the given state manager; optionally copies key fields from an id
fn new_instance(e: &Emitter<'_>, b: &mut CodeBuilder<'_>, with_identity: bool) -> BytecodeResult<()> {
    let this = e.class_name();
    if !e.plan.can_construct() {
        let fatal = e.policy.type_name(TypeRole::FatalInternalException);
        return e.throw_new(b, fatal, &format!("cannot instantiate {}", this.replace('/', ".")));
    }
    let sm = e.policy.member(MemberRole::StateManagerField);
    let flags = e.policy.member(MemberRole::FlagsField);
    let result = if with_identity { 3 } else { 2 };
    let this_type = FieldType::object(this);
    b.new_object(this)?;
    b.emitop(DUP)?;
    b.invokespecial(this, CONSTRUCTOR_METHOD_NAME, VOID_METHOD_DESCRIPTOR)?;
    b.store(&this_type, result)?;
    b.load(&this_type, result)?;
    b.iconst(1)?;
    b.putfield(this, &flags.name, &flags.descriptor)?;
    b.load(&this_type, result)?;
    b.aload(1)?;
    b.putfield(this, &sm.name, &sm.descriptor)?;
    if with_identity {
        let copy = e.policy.member(MemberRole::CopyKeyFieldsFromObjectId);
        b.load(&this_type, result)?;
        b.aload(2)?;
        b.invokevirtual(this, &copy.name, &copy.descriptor)?;
    }
    b.load(&this_type, result)?;
    b.emitop(ARETURN)
}

fn new_object_id(e: &Emitter<'_>, b: &mut CodeBuilder<'_>) -> BytecodeResult<()> {
    match &e.plan.object_id_class {
        Some(key) => {
            b.new_object(key)?;
            b.emitop(DUP)?;
            b.invokespecial(key, CONSTRUCTOR_METHOD_NAME, VOID_METHOD_DESCRIPTOR)?;
        }
        None => b.emitop(ACONST_NULL)?,
    }
    b.emitop(ARETURN)
}

fn copy_key_fields(e: &Emitter<'_>, b: &mut CodeBuilder<'_>) -> BytecodeResult<()> {
    let Some(key) = e.plan.object_id_class.as_deref() else {
        return b.emitop(RETURN);
    };
    let ok = b.new_label();
    b.aload(1)?;
    b.instanceof(key)?;
    b.branch(IFNE, ok)?;
    e.throw_new(b, CLASS_CAST, &format!("key class is not {}", key.replace('/', ".")))?;
    b.bind(ok);
    let key_type = FieldType::object(key);
    b.aload(1)?;
    b.checkcast(key)?;
    b.store(&key_type, 2)?;
    for member in &e.plan.key_members {
        // a reference member holds the related object, and the key only its id; the
        // runtime resolves the object through its state manager when it loads the field
        if e.plan.key_references.contains(&member.name) {
            continue;
        }
        b.aload(0)?;
        b.load(&key_type, 2)?;
        b.getfield(key, &member.name, &member.descriptor())?;
        e.raw_store(b, member)?;
    }
    b.emitop(RETURN)
}

/// Push a `java.lang.Class` for `field_type`
fn class_literal(e: &Emitter<'_>, b: &mut CodeBuilder<'_>, field_type: &FieldType) -> BytecodeResult<()> {
    if let Some(wrapper) = field_type.wrapper_class() {
        return b.getstatic(wrapper, "TYPE", "Ljava/lang/Class;");
    }
    match (field_type.class_operand(), field_type.binary_name()) {
        (Some(operand), _) if e.plan.ldc_class => b.ldc_class(&operand),
        (_, Some(binary)) => {
            b.ldc_string(&binary)?;
            b.invokestatic("java/lang/Class", "forName", "(Ljava/lang/String;)Ljava/lang/Class;")
        }
        _ => b.emitop(ACONST_NULL),
    }
}

/// Populate the static metadata fields and register the class with the helper
pub fn initializer_block(e: &Emitter<'_>, b: &mut CodeBuilder<'_>) -> BytecodeResult<()> {
    let this = e.class_name();
    let members = &e.plan.members;
    let static_field = |role: MemberRole| e.policy.member(role);
    let names = static_field(MemberRole::FieldNamesField);
    let types = static_field(MemberRole::FieldTypesField);
    let flags = static_field(MemberRole::FieldFlagsField);
    let parent = static_field(MemberRole::PersistenceCapableSuperclassField);
    let inherited = static_field(MemberRole::InheritedFieldCountField);

    b.iconst(members.len() as i32)?;
    b.new_array(&FieldType::object("java/lang/String"))?;
    for (i, m) in members.iter().enumerate() {
        b.emitop(DUP)?;
        b.iconst(i as i32)?;
        b.ldc_string(&m.name)?;
        b.emitop(AASTORE)?;
    }
    b.putstatic(this, &names.name, &names.descriptor)?;

    b.iconst(members.len() as i32)?;
    b.new_array(&FieldType::object("java/lang/Class"))?;
    for (i, m) in members.iter().enumerate() {
        b.emitop(DUP)?;
        b.iconst(i as i32)?;
        class_literal(e, b, &m.field_type)?;
        b.emitop(AASTORE)?;
    }
    b.putstatic(this, &types.name, &types.descriptor)?;

    b.iconst(members.len() as i32)?;
    b.new_array(&FieldType::Byte)?;
    for (i, m) in members.iter().enumerate() {
        b.emitop(DUP)?;
        b.iconst(i as i32)?;
        b.iconst(m.flags as i8 as i32)?;
        b.emitop(BASTORE)?;
    }
    b.putstatic(this, &flags.name, &flags.descriptor)?;

    match &e.plan.persistent_superclass {
        Some(p) => {
            class_literal(e, b, &FieldType::object(p))?;
            b.putstatic(this, &parent.name, &parent.descriptor)?;
            let count = e.policy.member(MemberRole::GetManagedFieldCount);
            b.invokestatic(p, &count.name, &count.descriptor)?;
        }
        None => {
            b.emitop(ACONST_NULL)?;
            b.putstatic(this, &parent.name, &parent.descriptor)?;
            b.iconst(0)?;
        }
    }
    b.putstatic(this, &inherited.name, &inherited.descriptor)?;

    class_literal(e, b, &FieldType::object(this))?;
    b.getstatic(this, &names.name, &names.descriptor)?;
    b.getstatic(this, &types.name, &types.descriptor)?;
    b.getstatic(this, &flags.name, &flags.descriptor)?;
    b.getstatic(this, &parent.name, &parent.descriptor)?;
    if e.plan.can_construct() {
        b.new_object(this)?;
        b.emitop(DUP)?;
        b.invokespecial(this, CONSTRUCTOR_METHOD_NAME, VOID_METHOD_DESCRIPTOR)?;
    } else {
        b.emitop(ACONST_NULL)?;
    }
    b.invokestatic(
        e.policy.type_name(TypeRole::ImplHelper),
        "registerClass",
        &e.policy.register_class_descriptor(),
    )
}

/// The initializer block as a straight-line fragment for splicing into `<clinit>`
pub fn initializer_fragment(pool: &mut ConstantPool, e: &Emitter<'_>) -> Result<(Vec<u8>, u16)> {
    let this = e.class_name();
    let mut b = CodeBuilder::new(pool, this, false, Vec::new());
    initializer_block(e, &mut b).map_err(|err| Error::from_bytecode(this, STATIC_INITIALIZER_METHOD_NAME, err))?;
    b.into_fragment().map_err(|err| Error::from_bytecode(this, STATIC_INITIALIZER_METHOD_NAME, err))
}
