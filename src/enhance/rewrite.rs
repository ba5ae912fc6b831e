//! Instruction rewriting inside existing method bodies
//!
//! Each decoded instruction is classified into at most one [`RewriteSite`]. Field
//! accesses and ancestor accessor calls are replaced in place by instructions of the
//! same length; initializer and serialization sites get straight-line fragments
//! spliced in through [`insert_fragments`].

use crate::codegen::defs::access_flags::*;
use crate::codegen::defs::{CONSTRUCTOR_METHOD_NAME, STATIC_INITIALIZER_METHOD_NAME};
use crate::codegen::descriptor::object_descriptor;
use crate::codegen::error::BytecodeError;
use crate::codegen::instruction::{decode, insert_fragments, Insertion, Instruction};
use crate::codegen::opcodes::*;
use crate::codegen::{ClassFile, CodeBuilder, ConstantPool, MethodInfo, Type};
use crate::error::{Error, Result};
use crate::metadata::{MemberDescriptor, MetadataView};
use crate::naming::{AccessorKind, MemberRole, NamingPolicy};

use super::emit::Emitter;
use super::plan::{EnhancementPlan, PlanKind};
use super::structure;

const WRITE_OBJECT: &str = "writeObject";
const WRITE_OBJECT_DESCRIPTOR: &str = "(Ljava/io/ObjectOutputStream;)V";

/// A place in a method body that the enhancer changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteSite {
    /// `getfield` of a managed field, replaced by its public getter
    FieldRead { offset: u32, member: MemberDescriptor },
    /// `putfield` of a managed field, replaced by its public setter
    FieldWrite { offset: u32, member: MemberDescriptor },
    /// `return` of the static initializer; the metadata block runs first
    InitializerReturn { offset: u32 },
    /// Start of `writeObject`; pre-serialization runs first
    SerializationEntry,
    /// `super.getX()` inside a moved property body, redirected to the ancestor's raw accessor
    AncestorAccessorCall {
        offset: u32,
        ancestor: String,
        raw_name: String,
        descriptor: String,
    },
}

/// What kind of method a body belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodRole {
    Constructor,
    StaticInitializer,
    WriteObject,
    PropertyAccessor,
    Other,
}

impl MethodRole {
    pub fn of(plan: &EnhancementPlan, access: u16, name: &str, descriptor: &str) -> MethodRole {
        match name {
            CONSTRUCTOR_METHOD_NAME => MethodRole::Constructor,
            STATIC_INITIALIZER_METHOD_NAME => MethodRole::StaticInitializer,
            WRITE_OBJECT if descriptor == WRITE_OBJECT_DESCRIPTOR && access & ACC_STATIC == 0 => MethodRole::WriteObject,
            _ if plan.property_for_method(name, descriptor).is_some() => MethodRole::PropertyAccessor,
            _ => MethodRole::Other,
        }
    }
}

/// Classifies instructions of one method
pub struct SiteMatcher<'a> {
    plan: &'a EnhancementPlan,
    view: &'a dyn MetadataView,
    role: MethodRole,
}

impl<'a> SiteMatcher<'a> {
    pub fn new(plan: &'a EnhancementPlan, view: &'a dyn MetadataView, role: MethodRole) -> Self {
        Self { plan, view, role }
    }

    pub fn classify(&self, instr: &Instruction, pool: &ConstantPool) -> Result<Option<RewriteSite>> {
        let class = &self.plan.class_name;
        let capable = self.plan.kind == PlanKind::PersistenceCapable;
        match instr.opcode {
            GETFIELD | PUTFIELD => {
                let Some(member) = self.managed_field(instr, pool)? else {
                    return Ok(None);
                };
                if self.role == MethodRole::Constructor && member.declaring_class == *class {
                    return Ok(None);
                }
                Ok(Some(if instr.opcode == GETFIELD {
                    RewriteSite::FieldRead { offset: instr.offset, member }
                } else {
                    RewriteSite::FieldWrite { offset: instr.offset, member }
                }))
            }
            RETURN if capable && self.role == MethodRole::StaticInitializer => {
                Ok(Some(RewriteSite::InitializerReturn { offset: instr.offset }))
            }
            INVOKESPECIAL if capable && self.role == MethodRole::PropertyAccessor => {
                let Some(index) = instr.cp_index() else {
                    return Ok(None);
                };
                let target = pool.member_ref(index).map_err(|e| Error::malformed(class, e))?;
                if target.owner == class || target.name == CONSTRUCTOR_METHOD_NAME {
                    return Ok(None);
                }
                let key = (target.name.to_string(), target.descriptor.to_string());
                Ok(self.plan.ancestor_accessors.get(&key).map(|(ancestor, raw_name)| {
                    RewriteSite::AncestorAccessorCall {
                        offset: instr.offset,
                        ancestor: ancestor.clone(),
                        raw_name: raw_name.clone(),
                        descriptor: key.1.clone(),
                    }
                }))
            }
            _ => Ok(None),
        }
    }

    /// The managed field member an instance-field instruction refers to
    fn managed_field(&self, instr: &Instruction, pool: &ConstantPool) -> Result<Option<MemberDescriptor>> {
        let class = &self.plan.class_name;
        let Some(index) = instr.cp_index() else {
            return Ok(None);
        };
        let field = pool.member_ref(index).map_err(|e| Error::malformed(class, e))?;
        let member = self.view.resolve_member(field.owner, field.name)?;
        Ok(member.filter(|m| !m.is_property() && m.descriptor() == field.descriptor))
    }
}

/// Rewrite the first `count` methods of `class`, returning the number of sites changed
pub fn rewrite_class(
    class: &mut ClassFile,
    plan: &EnhancementPlan,
    view: &dyn MetadataView,
    policy: &NamingPolicy,
    count: usize,
) -> Result<usize> {
    let mut total = 0;
    for index in 0..count.min(class.methods.len()) {
        total += rewrite_method(class, index, plan, view, policy)?;
    }
    Ok(total)
}

fn rewrite_method(
    class: &mut ClassFile,
    index: usize,
    plan: &EnhancementPlan,
    view: &dyn MetadataView,
    policy: &NamingPolicy,
) -> Result<usize> {
    let this = plan.class_name.as_str();
    let method: &MethodInfo = &class.methods[index];
    let pool = &class.constant_pool;
    let name = method.name(pool).map_err(|e| Error::malformed(this, e))?.to_string();
    let descriptor = method.descriptor(pool).map_err(|e| Error::malformed(this, e))?.to_string();
    let role = MethodRole::of(plan, method.access_flags, &name, &descriptor);
    let Some(mut code) = method.code(pool).map_err(|e| Error::malformed(this, e))? else {
        return Ok(0);
    };
    let instructions = decode(&code.code).map_err(|e| Error::malformed(this, format!("{}: {}", name, e)))?;

    let matcher = SiteMatcher::new(plan, view, role);
    let mut sites = Vec::new();
    for instr in &instructions {
        if let Some(site) = matcher.classify(instr, pool)? {
            sites.push(site);
        }
    }
    if role == MethodRole::WriteObject && plan.kind == PlanKind::PersistenceCapable {
        sites.push(RewriteSite::SerializationEntry);
    }
    if sites.is_empty() {
        return Ok(0);
    }

    let pool = &mut class.constant_pool;
    let cp_error = |e| Error::const_pool(this, e);
    let mut insertions = Vec::new();
    let mut initializer: Option<(Vec<u8>, u16)> = None;
    for site in &sites {
        match site {
            RewriteSite::FieldRead { offset, member } => {
                let accessor = policy.accessor_name(AccessorKind::PublicGetter, &member.name);
                let owner = &member.declaring_class;
                let descriptor = format!("({}){}", object_descriptor(owner), member.descriptor());
                let target = pool.add_method_ref(owner, &accessor, &descriptor).map_err(cp_error)?;
                patch(&mut code.code, *offset, INVOKESTATIC, target);
                tracing::debug!(class = %this, method = %name, offset, field = %member.name, "field read rewritten");
            }
            RewriteSite::FieldWrite { offset, member } => {
                let accessor = policy.accessor_name(AccessorKind::PublicSetter, &member.name);
                let owner = &member.declaring_class;
                let descriptor = format!("({}{})V", object_descriptor(owner), member.descriptor());
                let target = pool.add_method_ref(owner, &accessor, &descriptor).map_err(cp_error)?;
                patch(&mut code.code, *offset, INVOKESTATIC, target);
                tracing::debug!(class = %this, method = %name, offset, field = %member.name, "field write rewritten");
            }
            RewriteSite::AncestorAccessorCall { offset, ancestor, raw_name, descriptor } => {
                let target = pool.add_method_ref(ancestor, raw_name, descriptor).map_err(cp_error)?;
                patch(&mut code.code, *offset, INVOKESPECIAL, target);
                tracing::debug!(class = %this, method = %name, offset, to = %raw_name, "ancestor accessor call redirected");
            }
            RewriteSite::InitializerReturn { offset } => {
                if initializer.is_none() {
                    initializer = Some(structure::initializer_fragment(pool, &Emitter::new(plan, policy))?);
                }
                if let Some((fragment, max_stack)) = &initializer {
                    insertions.push(Insertion { at: *offset, fragment: fragment.clone(), max_stack: *max_stack });
                }
            }
            RewriteSite::SerializationEntry => {
                let (fragment, max_stack) = pre_serialize_fragment(pool, plan, policy)?;
                insertions.push(Insertion { at: 0, fragment, max_stack });
            }
        }
    }
    if !insertions.is_empty() {
        insert_fragments(&mut code, pool, &insertions).map_err(|e| Error::from_bytecode(this, &name, e))?;
        tracing::debug!(class = %this, method = %name, count = insertions.len(), "fragments inserted");
    }
    class.methods[index]
        .set_code(&mut class.constant_pool, code)
        .map_err(|e| Error::const_pool(this, e))?;
    Ok(sites.len())
}

/// Overwrite the three-byte instruction at `offset`
fn patch(code: &mut [u8], offset: u32, opcode: u8, index: u16) {
    let at = offset as usize;
    code[at] = opcode;
    code[at + 1..at + 3].copy_from_slice(&index.to_be_bytes());
}

/// `aload_0; invokevirtual preSerialize()V`
fn pre_serialize_fragment(pool: &mut ConstantPool, plan: &EnhancementPlan, policy: &NamingPolicy) -> Result<(Vec<u8>, u16)> {
    let this = plan.class_name.as_str();
    let spec = policy.member(MemberRole::PreSerialize);
    let fail = |e: BytecodeError| Error::from_bytecode(this, WRITE_OBJECT, e);
    let mut b = CodeBuilder::new(pool, this, false, vec![Type::object(this)]);
    b.aload(0).map_err(fail)?;
    b.invokevirtual(this, &spec.name, &spec.descriptor).map_err(fail)?;
    b.into_fragment().map_err(fail)
}
