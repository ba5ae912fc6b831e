//! Phase 1: decide everything before touching the class
//!
//! [`EnhancementPlan::build`] reads the class file and the metadata view and records
//! every synthetic name, descriptor and index the emission phase will use. The plan is
//! never mutated afterwards; structure, accessor and rewrite passes only read it.

use std::collections::HashMap;

use crate::codegen::defs::access_flags::*;
use crate::codegen::defs::{
    CONSTRUCTOR_METHOD_NAME, FIRST_LDC_CLASS_VERSION, FIRST_STACK_MAP_VERSION, VOID_METHOD_DESCRIPTOR,
};
use crate::codegen::descriptor::{object_descriptor, FieldType};
use crate::codegen::ClassFile;
use crate::config::EnhancerOptions;
use crate::error::{Error, Result};
use crate::metadata::{ClassMetadata, IdentityType, MemberDescriptor, MetadataView, PersistenceModifier};
use crate::naming::{AccessorKind, MemberRole, MemberSpec, NamingPolicy, TypeRole};

/// Suffix of generated companion key classes
pub const GENERATED_KEY_SUFFIX: &str = "_PK";

/// Every interface, field and method a class must carry once enhanced
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Contract {
    pub interfaces: Vec<&'static str>,
    pub fields: Vec<MemberSpec>,
    pub methods: Vec<MemberSpec>,
}

impl Contract {
    /// Contract of a persistence-capable class.
    ///
    /// `field_access` supplies the declared access flags of a member field; public
    /// accessors copy its visibility. Members it does not know fall back to the
    /// visibility in the metadata.
    pub fn for_class(
        policy: &NamingPolicy,
        view: &dyn MetadataView,
        class_name: &str,
        field_access: &dyn Fn(&str) -> Option<u16>,
    ) -> Result<Contract> {
        let meta = view
            .class(class_name)
            .ok_or_else(|| Error::config_error(format!("no metadata for class `{}`", class_name)))?;
        let members = view.members(class_name)?;
        let is_root = meta.persistent_superclass.is_none();
        let mut contract = Contract::default();

        if is_root {
            contract.interfaces.push(policy.type_name(TypeRole::PersistenceCapable));
            if meta.detachable {
                contract.interfaces.push(policy.type_name(TypeRole::Detachable));
            }
            contract.fields.push(policy.member(MemberRole::StateManagerField));
            contract.fields.push(policy.member(MemberRole::FlagsField));
            if meta.detachable {
                contract.fields.push(policy.member(MemberRole::DetachedStateField));
            }
        }
        for role in [
            MemberRole::InheritedFieldCountField,
            MemberRole::FieldNamesField,
            MemberRole::FieldTypesField,
            MemberRole::FieldFlagsField,
            MemberRole::PersistenceCapableSuperclassField,
        ] {
            contract.fields.push(policy.member(role));
        }

        if is_root {
            let mut roles = vec![
                MemberRole::IsDetached,
                MemberRole::IsDirty,
                MemberRole::IsNew,
                MemberRole::IsDeleted,
                MemberRole::IsPersistent,
                MemberRole::IsTransactional,
                MemberRole::GetObjectId,
                MemberRole::GetTransactionalObjectId,
                MemberRole::GetVersion,
                MemberRole::GetPersistenceManager,
                MemberRole::MakeDirty,
                MemberRole::PreSerialize,
                MemberRole::ReplaceStateManager,
                MemberRole::ReplaceFlags,
            ];
            if meta.detachable {
                roles.push(MemberRole::ReplaceDetachedState);
            }
            contract.methods.extend(roles.into_iter().map(|r| policy.member(r)));
        }
        for role in [
            MemberRole::ProvideField,
            MemberRole::ReplaceField,
            MemberRole::GetManagedFieldCount,
            MemberRole::NewInstance,
        ] {
            contract.methods.push(policy.member(role));
        }
        if declares_key(meta) {
            for role in [
                MemberRole::NewObjectIdInstance,
                MemberRole::CopyKeyFieldsFromObjectId,
                MemberRole::NewInstanceWithIdentity,
            ] {
                contract.methods.push(policy.member(role));
            }
        }

        let owner = object_descriptor(class_name);
        for m in &members {
            let value = m.descriptor();
            if m.is_property() {
                if m.is_abstract {
                    continue;
                }
                let cap = capitalize(&m.name);
                let access = m.visibility.access_flags();
                contract.methods.push(MemberSpec {
                    name: policy.accessor_name(AccessorKind::RawGetter, &cap),
                    descriptor: format!("(){}", value),
                    access,
                });
                contract.methods.push(MemberSpec {
                    name: policy.accessor_name(AccessorKind::RawSetter, &cap),
                    descriptor: format!("({})V", value),
                    access,
                });
            } else {
                let visibility = field_access(&m.name)
                    .map(|flags| flags & VISIBILITY_MASK)
                    .unwrap_or_else(|| m.visibility.access_flags());
                contract.methods.push(MemberSpec {
                    name: policy.accessor_name(AccessorKind::PublicGetter, &m.name),
                    descriptor: format!("({}){}", owner, value),
                    access: visibility | ACC_STATIC | ACC_FINAL,
                });
                contract.methods.push(MemberSpec {
                    name: policy.accessor_name(AccessorKind::PublicSetter, &m.name),
                    descriptor: format!("({}{})V", owner, value),
                    access: visibility | ACC_STATIC | ACC_FINAL,
                });
                contract.methods.push(MemberSpec {
                    name: policy.accessor_name(AccessorKind::RawGetter, &m.name),
                    descriptor: format!("({}){}", owner, value),
                    access: ACC_PRIVATE | ACC_STATIC,
                });
                contract.methods.push(MemberSpec {
                    name: policy.accessor_name(AccessorKind::RawSetter, &m.name),
                    descriptor: format!("({}{})V", owner, value),
                    access: ACC_PRIVATE | ACC_STATIC,
                });
            }
        }
        Ok(contract)
    }
}

/// Application identity with key members declared by the class itself
pub fn declares_key(meta: &ClassMetadata) -> bool {
    matches!(meta.identity, IdentityType::Application { .. }) && meta.key_members().next().is_some()
}

pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// User accessor pair of a property member and the raw names its bodies move to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyPlan {
    pub member: MemberDescriptor,
    pub getter: String,
    pub getter_descriptor: String,
    pub setter: String,
    pub setter_descriptor: String,
    pub raw_getter: String,
    pub raw_setter: String,
}

/// What a class gets: the full contract, or only its field accesses rewritten
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanKind {
    PersistenceCapable,
    PersistenceAware,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancementPlan {
    pub kind: PlanKind,
    pub class_name: String,
    /// JVM superclass
    pub super_name: String,
    pub persistent_superclass: Option<String>,
    pub is_abstract: bool,
    /// The class or one of its persistent ancestors is detachable
    pub detachable: bool,
    pub inherited_count: usize,
    /// Own managed members in relative-index order
    pub members: Vec<MemberDescriptor>,
    pub key_members: Vec<MemberDescriptor>,
    /// Key members that reference another persistence-capable class
    pub key_references: Vec<String>,
    pub object_id_class: Option<String>,
    /// Emit a companion key class named `object_id_class`
    pub generate_key_class: bool,
    pub has_default_constructor: bool,
    pub add_default_constructor: bool,
    pub detach_listener: bool,
    pub need_stack_map: bool,
    /// `ldc` may load class literals
    pub ldc_class: bool,
    pub contract: Contract,
    /// Contract fields absent from the class
    pub missing_fields: Vec<MemberSpec>,
    /// Contract methods absent from the class, excluding per-member accessors
    pub missing_methods: Vec<MemberSpec>,
    /// Declared access flags of member fields
    pub field_access: HashMap<String, u16>,
    pub properties: Vec<PropertyPlan>,
    /// `(name, descriptor)` of an ancestor's property accessor -> `(ancestor, raw accessor)`
    pub ancestor_accessors: HashMap<(String, String), (String, String)>,
}

impl EnhancementPlan {
    /// Build the plan for `class`, or `None` when the metadata leaves it alone
    pub fn build(
        class: &ClassFile,
        view: &dyn MetadataView,
        policy: &NamingPolicy,
        options: &EnhancerOptions,
    ) -> Result<Option<EnhancementPlan>> {
        let class_name = class.name().map_err(|e| Error::malformed("<unknown>", e))?.to_string();
        let Some(meta) = view.class(&class_name) else {
            return Ok(None);
        };
        let kind = match meta.modifier {
            PersistenceModifier::PersistenceCapable => PlanKind::PersistenceCapable,
            PersistenceModifier::PersistenceAware => PlanKind::PersistenceAware,
            PersistenceModifier::None => return Ok(None),
        };
        let super_name = class
            .super_name()
            .map_err(|e| Error::malformed(&class_name, e))?
            .unwrap_or_default()
            .to_string();
        if kind == PlanKind::PersistenceAware {
            return Ok(Some(Self::aware(class, class_name, super_name)));
        }
        if class.has_access(ACC_INTERFACE) {
            return Err(Error::unsupported(&class_name, "<class>", "interfaces cannot be persistence-capable"));
        }

        let members = view.members(&class_name)?;
        let detachable = meta.detachable || view.ancestors(&class_name)?.iter().any(|a| a.detachable);
        let inherited_count = view.inherited_field_count(&class_name)?;
        let pool = &class.constant_pool;

        let mut field_access = HashMap::new();
        let mut properties = Vec::new();
        for m in &members {
            if m.is_property() {
                properties.push(Self::property_plan(class, policy, m)?);
                continue;
            }
            let field = class
                .find_field(&m.name)
                .ok_or_else(|| Error::missing_member(&class_name, &m.name))?;
            let descriptor = field.descriptor(pool).map_err(|e| Error::malformed(&class_name, e))?;
            if descriptor != m.descriptor() {
                return Err(Error::config_error(format!(
                    "{}.{} is declared `{}` but metadata says `{}`",
                    class_name,
                    m.name,
                    descriptor,
                    m.descriptor()
                )));
            }
            if field.access_flags & ACC_STATIC != 0 {
                return Err(Error::unsupported(&class_name, &m.name, "static fields cannot be persistent"));
            }
            field_access.insert(m.name.clone(), field.access_flags);
        }

        let lookup = |name: &str| field_access.get(name).copied();
        let contract = Contract::for_class(policy, view, &class_name, &lookup)?;
        let accessor_names: Vec<String> = members
            .iter()
            .flat_map(|m| {
                [AccessorKind::PublicGetter, AccessorKind::PublicSetter, AccessorKind::RawGetter, AccessorKind::RawSetter]
                    .into_iter()
                    .map(|k| {
                        if m.is_property() {
                            policy.accessor_name(k, &capitalize(&m.name))
                        } else {
                            policy.accessor_name(k, &m.name)
                        }
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        let missing_fields = contract
            .fields
            .iter()
            .filter(|f| !class.has_field(&f.name, &f.descriptor))
            .cloned()
            .collect();
        let missing_methods = contract
            .methods
            .iter()
            .filter(|m| !accessor_names.contains(&m.name) && !class.has_method(&m.name, &m.descriptor))
            .cloned()
            .collect();

        let key_members: Vec<MemberDescriptor> = members.iter().filter(|m| m.primary_key).cloned().collect();
        let key_references = key_members
            .iter()
            .filter(|m| matches!(&m.field_type, FieldType::Object(target) if view.is_persistence_capable(target)))
            .map(|m| m.name.clone())
            .collect();
        let (object_id_class, generate_key_class) = match &meta.identity {
            IdentityType::Application { object_id_class: Some(id) } => (Some(id.clone()), false),
            IdentityType::Application { object_id_class: None } if declares_key(meta) => {
                if !options.generate_primary_key {
                    return Err(Error::config_error(format!(
                        "{} uses application identity without an object-id class and key generation is disabled",
                        class_name
                    )));
                }
                (Some(format!("{}{}", class_name, GENERATED_KEY_SUFFIX)), true)
            }
            _ => (None, false),
        };

        let mut ancestor_accessors = HashMap::new();
        for ancestor in view.ancestors(&class_name)? {
            for m in view.members(&ancestor.name)? {
                if !m.is_property() || m.is_abstract {
                    continue;
                }
                let cap = capitalize(&m.name);
                let value = m.descriptor();
                let mut getters = vec![format!("get{}", cap)];
                if m.field_type == FieldType::Boolean {
                    getters.push(format!("is{}", cap));
                }
                for getter in getters {
                    ancestor_accessors
                        .entry((getter, format!("(){}", value)))
                        .or_insert_with(|| (ancestor.name.clone(), policy.accessor_name(AccessorKind::RawGetter, &cap)));
                }
                ancestor_accessors
                    .entry((format!("set{}", cap), format!("({})V", value)))
                    .or_insert_with(|| (ancestor.name.clone(), policy.accessor_name(AccessorKind::RawSetter, &cap)));
            }
        }

        Ok(Some(EnhancementPlan {
            kind,
            super_name,
            persistent_superclass: meta.persistent_superclass.clone(),
            is_abstract: class.has_access(ACC_ABSTRACT),
            detachable,
            inherited_count,
            members,
            key_members,
            key_references,
            object_id_class,
            generate_key_class,
            has_default_constructor: class.has_method(CONSTRUCTOR_METHOD_NAME, VOID_METHOD_DESCRIPTOR),
            add_default_constructor: options.add_default_constructor,
            detach_listener: options.detach_listener,
            need_stack_map: class.major_version >= FIRST_STACK_MAP_VERSION,
            ldc_class: class.major_version >= FIRST_LDC_CLASS_VERSION,
            contract,
            missing_fields,
            missing_methods,
            field_access,
            properties,
            ancestor_accessors,
            class_name,
        }))
    }

    fn aware(class: &ClassFile, class_name: String, super_name: String) -> EnhancementPlan {
        EnhancementPlan {
            kind: PlanKind::PersistenceAware,
            class_name,
            super_name,
            persistent_superclass: None,
            is_abstract: class.has_access(ACC_ABSTRACT),
            detachable: false,
            inherited_count: 0,
            members: Vec::new(),
            key_members: Vec::new(),
            key_references: Vec::new(),
            object_id_class: None,
            generate_key_class: false,
            has_default_constructor: class.has_method(CONSTRUCTOR_METHOD_NAME, VOID_METHOD_DESCRIPTOR),
            add_default_constructor: false,
            detach_listener: false,
            need_stack_map: class.major_version >= FIRST_STACK_MAP_VERSION,
            ldc_class: class.major_version >= FIRST_LDC_CLASS_VERSION,
            contract: Contract::default(),
            missing_fields: Vec::new(),
            missing_methods: Vec::new(),
            field_access: HashMap::new(),
            properties: Vec::new(),
            ancestor_accessors: HashMap::new(),
        }
    }

    fn property_plan(class: &ClassFile, policy: &NamingPolicy, m: &MemberDescriptor) -> Result<PropertyPlan> {
        let class_name = &m.declaring_class;
        let cap = capitalize(&m.name);
        let value = m.descriptor();
        let getter_descriptor = format!("(){}", value);
        let setter_descriptor = format!("({})V", value);
        let getter = [format!("get{}", cap), format!("is{}", cap)]
            .into_iter()
            .filter(|g| m.field_type == FieldType::Boolean || g.starts_with("get"))
            .find(|g| class.has_method(g, &getter_descriptor));
        let setter = format!("set{}", cap);
        let getter = match getter {
            Some(g) => g,
            None if m.is_abstract => format!("get{}", cap),
            None => return Err(Error::missing_member(class_name, format!("get{}{}", cap, getter_descriptor))),
        };
        if !m.is_abstract && !class.has_method(&setter, &setter_descriptor) {
            return Err(Error::missing_member(class_name, format!("{}{}", setter, setter_descriptor)));
        }
        Ok(PropertyPlan {
            member: m.clone(),
            getter,
            getter_descriptor,
            setter,
            setter_descriptor,
            raw_getter: policy.accessor_name(AccessorKind::RawGetter, &cap),
            raw_setter: policy.accessor_name(AccessorKind::RawSetter, &cap),
        })
    }

    pub fn is_root(&self) -> bool {
        self.persistent_superclass.is_none()
    }

    pub fn declares_key(&self) -> bool {
        self.object_id_class.is_some() && !self.key_members.is_empty()
    }

    /// Whether a no-arg constructor exists or will be added
    pub fn can_construct(&self) -> bool {
        !self.is_abstract && (self.has_default_constructor || self.add_default_constructor)
    }

    pub fn needs_default_constructor(&self) -> bool {
        self.kind == PlanKind::PersistenceCapable
            && !self.is_abstract
            && !self.has_default_constructor
            && self.add_default_constructor
    }

    pub fn property(&self, name: &str) -> Option<&PropertyPlan> {
        self.properties.iter().find(|p| p.member.name == name)
    }

    /// Property whose user getter or setter is `name` + `descriptor`
    pub fn property_for_method(&self, name: &str, descriptor: &str) -> Option<&PropertyPlan> {
        self.properties.iter().find(|p| {
            (p.getter == name && p.getter_descriptor == descriptor) || (p.setter == name && p.setter_descriptor == descriptor)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ClassMetadata, MemberMetadata, MetadataRegistry};

    fn class_with_fields(name: &str, fields: &[(&str, &str)]) -> ClassFile {
        let mut class = ClassFile::new();
        class.this_class = class.constant_pool.add_class(name).unwrap();
        class.super_class = class.constant_pool.add_class("java/lang/Object").unwrap();
        class.access_flags = ACC_PUBLIC | ACC_SUPER;
        for (n, d) in fields {
            class.add_field(ACC_PRIVATE, n, d).unwrap();
        }
        class
    }

    #[test]
    fn root_contract_includes_lifecycle_and_accessors() {
        let reg = MetadataRegistry::new([ClassMetadata::new("p/A")
            .detachable()
            .with_member(MemberMetadata::field("x", "I"))]);
        let class = class_with_fields("p/A", &[("x", "I")]);
        let plan = EnhancementPlan::build(&class, &reg, &NamingPolicy::jdo(), &EnhancerOptions::default())
            .unwrap()
            .unwrap();
        assert!(plan.is_root());
        let names: Vec<_> = plan.contract.methods.iter().map(|m| m.name.as_str()).collect();
        assert!(names.contains(&"jdoReplaceDetachedState"));
        assert!(names.contains(&"jdoGetx"));
        let getter = plan.contract.methods.iter().find(|m| m.name == "jdoGetx").unwrap();
        assert_eq!(getter.access, ACC_PRIVATE | ACC_STATIC | ACC_FINAL);
        assert_eq!(getter.descriptor, "(Lp/A;)I");
        assert!(plan.missing_fields.iter().any(|f| f.name == "jdoDetachedState"));
        assert!(!plan.missing_methods.iter().any(|m| m.name == "jdoGetx"));
    }

    #[test]
    fn missing_field_is_reported() {
        let reg = MetadataRegistry::new([ClassMetadata::new("p/A").with_member(MemberMetadata::field("y", "I"))]);
        let class = class_with_fields("p/A", &[("x", "I")]);
        let err = EnhancementPlan::build(&class, &reg, &NamingPolicy::jdo(), &EnhancerOptions::default()).unwrap_err();
        assert!(matches!(err, Error::MissingMember { ref member, .. } if member == "y"));
    }

    #[test]
    fn generated_key_class_needs_the_option() {
        let reg = MetadataRegistry::new([ClassMetadata::new("p/A")
            .with_application_identity(None)
            .with_member(MemberMetadata::field("x", "I").primary_key())]);
        let class = class_with_fields("p/A", &[("x", "I")]);
        let plan = EnhancementPlan::build(&class, &reg, &NamingPolicy::jdo(), &EnhancerOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(plan.object_id_class.as_deref(), Some("p/A_PK"));
        assert!(plan.generate_key_class);

        let options = EnhancerOptions { generate_primary_key: false, ..EnhancerOptions::default() };
        assert!(matches!(
            EnhancementPlan::build(&class, &reg, &NamingPolicy::jdo(), &options),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn unknown_classes_have_no_plan() {
        let reg = MetadataRegistry::default();
        let class = class_with_fields("p/A", &[]);
        assert!(EnhancementPlan::build(&class, &reg, &NamingPolicy::jdo(), &EnhancerOptions::default())
            .unwrap()
            .is_none());
    }
}
