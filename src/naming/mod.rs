//! Naming policy: the concrete names behind the enhancement contract
//!
//! A [`NamingPolicy`] maps every synthetic role (fields, lifecycle methods, accessor
//! prefixes, runtime types) to a name, descriptor and access set. Two dialects ship:
//! the `jdo` contract and its `datanucleus` successor. A policy is an immutable value
//! chosen once per engine and passed by reference.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::codegen::defs::access_flags::*;
use crate::codegen::descriptor::{object_descriptor, FieldType};

/// Which contract dialect a policy implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Jdo,
    Datanucleus,
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jdo" => Ok(Dialect::Jdo),
            "datanucleus" | "dn" => Ok(Dialect::Datanucleus),
            other => Err(format!("unknown dialect `{}` (expected `jdo` or `datanucleus`)", other)),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dialect::Jdo => "jdo",
            Dialect::Datanucleus => "datanucleus",
        })
    }
}

/// Synthetic fields and methods of the contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberRole {
    StateManagerField,
    FlagsField,
    DetachedStateField,
    InheritedFieldCountField,
    FieldNamesField,
    FieldTypesField,
    FieldFlagsField,
    PersistenceCapableSuperclassField,
    IsDetached,
    IsDirty,
    IsNew,
    IsDeleted,
    IsPersistent,
    IsTransactional,
    GetObjectId,
    GetTransactionalObjectId,
    GetVersion,
    GetPersistenceManager,
    MakeDirty,
    PreSerialize,
    ReplaceStateManager,
    ReplaceFlags,
    ReplaceDetachedState,
    ProvideField,
    ReplaceField,
    GetManagedFieldCount,
    NewInstance,
    NewInstanceWithIdentity,
    NewObjectIdInstance,
    CopyKeyFieldsFromObjectId,
}

impl MemberRole {
    pub const ALL: [MemberRole; 30] = [
        MemberRole::StateManagerField,
        MemberRole::FlagsField,
        MemberRole::DetachedStateField,
        MemberRole::InheritedFieldCountField,
        MemberRole::FieldNamesField,
        MemberRole::FieldTypesField,
        MemberRole::FieldFlagsField,
        MemberRole::PersistenceCapableSuperclassField,
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
        MemberRole::ReplaceDetachedState,
        MemberRole::ProvideField,
        MemberRole::ReplaceField,
        MemberRole::GetManagedFieldCount,
        MemberRole::NewInstance,
        MemberRole::NewInstanceWithIdentity,
        MemberRole::NewObjectIdInstance,
        MemberRole::CopyKeyFieldsFromObjectId,
    ];

    pub fn is_field(self) -> bool {
        matches!(
            self,
            MemberRole::StateManagerField
                | MemberRole::FlagsField
                | MemberRole::DetachedStateField
                | MemberRole::InheritedFieldCountField
                | MemberRole::FieldNamesField
                | MemberRole::FieldTypesField
                | MemberRole::FieldFlagsField
                | MemberRole::PersistenceCapableSuperclassField
        )
    }

    /// Name without the dialect prefix
    fn stem(self, dialect: Dialect) -> &'static str {
        match self {
            MemberRole::StateManagerField => "StateManager",
            MemberRole::FlagsField => "Flags",
            MemberRole::DetachedStateField => "DetachedState",
            MemberRole::InheritedFieldCountField => "InheritedFieldCount",
            MemberRole::FieldNamesField => "FieldNames",
            MemberRole::FieldTypesField => "FieldTypes",
            MemberRole::FieldFlagsField => "FieldFlags",
            MemberRole::PersistenceCapableSuperclassField => "PersistenceCapableSuperclass",
            MemberRole::IsDetached => "IsDetached",
            MemberRole::IsDirty => "IsDirty",
            MemberRole::IsNew => "IsNew",
            MemberRole::IsDeleted => "IsDeleted",
            MemberRole::IsPersistent => "IsPersistent",
            MemberRole::IsTransactional => "IsTransactional",
            MemberRole::GetObjectId => "GetObjectId",
            MemberRole::GetTransactionalObjectId => "GetTransactionalObjectId",
            MemberRole::GetVersion => "GetVersion",
            MemberRole::GetPersistenceManager => match dialect {
                Dialect::Jdo => "GetPersistenceManager",
                Dialect::Datanucleus => "GetExecutionContext",
            },
            MemberRole::MakeDirty => "MakeDirty",
            MemberRole::PreSerialize => "PreSerialize",
            MemberRole::ReplaceStateManager => "ReplaceStateManager",
            MemberRole::ReplaceFlags => "ReplaceFlags",
            MemberRole::ReplaceDetachedState => "ReplaceDetachedState",
            MemberRole::ProvideField => "ProvideField",
            MemberRole::ReplaceField => "ReplaceField",
            MemberRole::GetManagedFieldCount => "GetManagedFieldCount",
            MemberRole::NewInstance | MemberRole::NewInstanceWithIdentity => "NewInstance",
            MemberRole::NewObjectIdInstance => "NewObjectIdInstance",
            MemberRole::CopyKeyFieldsFromObjectId => "CopyKeyFieldsFromObjectId",
        }
    }
}

/// Runtime types the enhanced class refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeRole {
    PersistenceCapable,
    Detachable,
    StateManager,
    PersistenceManager,
    ImplHelper,
    DetachListener,
    FieldNotDetachedException,
    FatalInternalException,
}

/// Prefixes of per-member accessor methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessorKind {
    PublicGetter,
    PublicSetter,
    RawGetter,
    RawSetter,
}

/// Name, descriptor and access flags of one synthetic member
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberSpec {
    pub name: String,
    pub descriptor: String,
    pub access: u16,
}

/// How the state manager sees a member's value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Boolean,
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    String,
    Object,
}

impl FieldKind {
    pub fn of(field_type: &FieldType) -> FieldKind {
        match field_type {
            FieldType::Boolean => FieldKind::Boolean,
            FieldType::Byte => FieldKind::Byte,
            FieldType::Char => FieldKind::Char,
            FieldType::Double => FieldKind::Double,
            FieldType::Float => FieldKind::Float,
            FieldType::Int => FieldKind::Int,
            FieldType::Long => FieldKind::Long,
            FieldType::Short => FieldKind::Short,
            FieldType::Object(name) if name == "java/lang/String" => FieldKind::String,
            FieldType::Object(_) | FieldType::Array(_) => FieldKind::Object,
        }
    }

    /// Suffix used in state-manager method names, e.g. `getIntField`
    pub fn suffix(self) -> &'static str {
        match self {
            FieldKind::Boolean => "Boolean",
            FieldKind::Byte => "Byte",
            FieldKind::Char => "Char",
            FieldKind::Double => "Double",
            FieldKind::Float => "Float",
            FieldKind::Int => "Int",
            FieldKind::Long => "Long",
            FieldKind::Short => "Short",
            FieldKind::String => "String",
            FieldKind::Object => "Object",
        }
    }

    /// Descriptor of the value as passed to the state manager
    pub fn value_descriptor(self) -> &'static str {
        match self {
            FieldKind::Boolean => "Z",
            FieldKind::Byte => "B",
            FieldKind::Char => "C",
            FieldKind::Double => "D",
            FieldKind::Float => "F",
            FieldKind::Int => "I",
            FieldKind::Long => "J",
            FieldKind::Short => "S",
            FieldKind::String => "Ljava/lang/String;",
            FieldKind::Object => "Ljava/lang/Object;",
        }
    }
}

/// Calls made from enhanced code into the state manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateManagerCall {
    IsLoaded,
    GetField(FieldKind),
    SetField(FieldKind),
    ProvidedField(FieldKind),
    ReplacingField(FieldKind),
    ReplacingStateManager,
    ReplacingFlags,
    ReplacingDetachedState,
    MakeDirty,
    PreSerialize,
    IsDirty,
    IsNew,
    IsDeleted,
    IsPersistent,
    IsTransactional,
    GetObjectId,
    GetTransactionalObjectId,
    GetVersion,
    GetPersistenceManager,
}

/// Immutable table of contract names for one dialect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingPolicy {
    dialect: Dialect,
    prefix: &'static str,
    persistence_capable: &'static str,
    detachable: &'static str,
    state_manager: &'static str,
    persistence_manager: &'static str,
    impl_helper: &'static str,
    detach_listener: &'static str,
    field_not_detached: &'static str,
    fatal_internal: &'static str,
}

impl NamingPolicy {
    pub fn jdo() -> Self {
        Self {
            dialect: Dialect::Jdo,
            prefix: "jdo",
            persistence_capable: "javax/jdo/spi/PersistenceCapable",
            detachable: "javax/jdo/spi/Detachable",
            state_manager: "javax/jdo/spi/StateManager",
            persistence_manager: "javax/jdo/PersistenceManager",
            impl_helper: "javax/jdo/spi/JDOImplHelper",
            detach_listener: "org/datanucleus/util/DetachListener",
            field_not_detached: "javax/jdo/JDODetachedFieldAccessException",
            fatal_internal: "javax/jdo/JDOFatalInternalException",
        }
    }

    pub fn datanucleus() -> Self {
        Self {
            dialect: Dialect::Datanucleus,
            prefix: "dn",
            persistence_capable: "org/datanucleus/enhancement/Persistable",
            detachable: "org/datanucleus/enhancement/Detachable",
            state_manager: "org/datanucleus/enhancement/StateManager",
            persistence_manager: "org/datanucleus/enhancement/ExecutionContextReference",
            impl_helper: "org/datanucleus/enhancer/EnhancementHelper",
            detach_listener: "org/datanucleus/util/DetachListener",
            field_not_detached: "org/datanucleus/exceptions/NucleusDetachedFieldAccessException",
            fatal_internal: "org/datanucleus/exceptions/NucleusException",
        }
    }

    pub fn for_dialect(dialect: Dialect) -> Self {
        match dialect {
            Dialect::Jdo => Self::jdo(),
            Dialect::Datanucleus => Self::datanucleus(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Internal class name for a runtime type
    pub fn type_name(&self, role: TypeRole) -> &'static str {
        match role {
            TypeRole::PersistenceCapable => self.persistence_capable,
            TypeRole::Detachable => self.detachable,
            TypeRole::StateManager => self.state_manager,
            TypeRole::PersistenceManager => self.persistence_manager,
            TypeRole::ImplHelper => self.impl_helper,
            TypeRole::DetachListener => self.detach_listener,
            TypeRole::FieldNotDetachedException => self.field_not_detached,
            TypeRole::FatalInternalException => self.fatal_internal,
        }
    }

    pub fn type_descriptor(&self, role: TypeRole) -> String {
        object_descriptor(self.type_name(role))
    }

    /// Name, descriptor and access flags of a synthetic member
    pub fn member(&self, role: MemberRole) -> MemberSpec {
        let pc = self.type_descriptor(TypeRole::PersistenceCapable);
        let sm = self.type_descriptor(TypeRole::StateManager);
        let (descriptor, access): (String, u16) = match role {
            MemberRole::StateManagerField => (sm, ACC_PROTECTED | ACC_TRANSIENT),
            MemberRole::FlagsField => ("B".into(), ACC_PROTECTED | ACC_TRANSIENT),
            MemberRole::DetachedStateField => ("[Ljava/lang/Object;".into(), ACC_PROTECTED),
            MemberRole::InheritedFieldCountField => ("I".into(), ACC_PRIVATE | ACC_STATIC),
            MemberRole::FieldNamesField => ("[Ljava/lang/String;".into(), ACC_PRIVATE | ACC_STATIC),
            MemberRole::FieldTypesField => ("[Ljava/lang/Class;".into(), ACC_PRIVATE | ACC_STATIC),
            MemberRole::FieldFlagsField => ("[B".into(), ACC_PRIVATE | ACC_STATIC),
            MemberRole::PersistenceCapableSuperclassField => ("Ljava/lang/Class;".into(), ACC_PRIVATE | ACC_STATIC),
            MemberRole::IsDetached
            | MemberRole::IsDirty
            | MemberRole::IsNew
            | MemberRole::IsDeleted
            | MemberRole::IsPersistent
            | MemberRole::IsTransactional => ("()Z".into(), ACC_PUBLIC),
            MemberRole::GetObjectId | MemberRole::GetTransactionalObjectId | MemberRole::GetVersion => {
                ("()Ljava/lang/Object;".into(), ACC_PUBLIC)
            }
            MemberRole::GetPersistenceManager => {
                (format!("(){}", self.type_descriptor(TypeRole::PersistenceManager)), ACC_PUBLIC)
            }
            MemberRole::MakeDirty => ("(Ljava/lang/String;)V".into(), ACC_PUBLIC),
            MemberRole::PreSerialize => ("()V".into(), ACC_PROTECTED | ACC_FINAL),
            MemberRole::ReplaceStateManager => (format!("({})V", sm), ACC_PUBLIC | ACC_FINAL | ACC_SYNCHRONIZED),
            MemberRole::ReplaceFlags => ("()V".into(), ACC_PUBLIC | ACC_FINAL),
            MemberRole::ReplaceDetachedState => ("()V".into(), ACC_PUBLIC | ACC_FINAL | ACC_SYNCHRONIZED),
            MemberRole::ProvideField | MemberRole::ReplaceField => ("(I)V".into(), ACC_PUBLIC),
            MemberRole::GetManagedFieldCount => ("()I".into(), ACC_PROTECTED | ACC_STATIC),
            MemberRole::NewInstance => (format!("({}){}", sm, pc), ACC_PUBLIC),
            MemberRole::NewInstanceWithIdentity => (format!("({}Ljava/lang/Object;){}", sm, pc), ACC_PUBLIC),
            MemberRole::NewObjectIdInstance => ("()Ljava/lang/Object;".into(), ACC_PUBLIC),
            MemberRole::CopyKeyFieldsFromObjectId => ("(Ljava/lang/Object;)V".into(), ACC_PUBLIC),
        };
        MemberSpec { name: format!("{}{}", self.prefix, role.stem(self.dialect)), descriptor, access }
    }

    /// Accessor method name for a member, e.g. `jdoGetname`
    pub fn accessor_name(&self, kind: AccessorKind, member: &str) -> String {
        let stem = match kind {
            AccessorKind::PublicGetter => "Get",
            AccessorKind::PublicSetter => "Set",
            AccessorKind::RawGetter => "RawGet",
            AccessorKind::RawSetter => "RawSet",
        };
        format!("{}{}{}", self.prefix, stem, member)
    }

    /// Every name the dialect reserves starts with this prefix
    pub fn prefix(&self) -> &'static str {
        self.prefix
    }

    /// Name and descriptor of a state-manager method
    pub fn state_manager_method(&self, call: StateManagerCall) -> (String, String) {
        let pc = self.type_descriptor(TypeRole::PersistenceCapable);
        let sm = self.type_descriptor(TypeRole::StateManager);
        match call {
            StateManagerCall::IsLoaded => ("isLoaded".into(), format!("({}I)Z", pc)),
            StateManagerCall::GetField(kind) => {
                let v = kind.value_descriptor();
                (format!("get{}Field", kind.suffix()), format!("({}I{}){}", pc, v, v))
            }
            StateManagerCall::SetField(kind) => {
                let v = kind.value_descriptor();
                (format!("set{}Field", kind.suffix()), format!("({}I{}{})V", pc, v, v))
            }
            StateManagerCall::ProvidedField(kind) => {
                let v = kind.value_descriptor();
                (format!("provided{}Field", kind.suffix()), format!("({}I{})V", pc, v))
            }
            StateManagerCall::ReplacingField(kind) => {
                let v = kind.value_descriptor();
                (format!("replacing{}Field", kind.suffix()), format!("({}I){}", pc, v))
            }
            StateManagerCall::ReplacingStateManager => ("replacingStateManager".into(), format!("({}{}){}", pc, sm, sm)),
            StateManagerCall::ReplacingFlags => ("replacingFlags".into(), format!("({})B", pc)),
            StateManagerCall::ReplacingDetachedState => (
                "replacingDetachedState".into(),
                format!(
                    "({}[Ljava/lang/Object;)[Ljava/lang/Object;",
                    self.type_descriptor(TypeRole::Detachable)
                ),
            ),
            StateManagerCall::MakeDirty => ("makeDirty".into(), format!("({}Ljava/lang/String;)V", pc)),
            StateManagerCall::PreSerialize => ("preSerialize".into(), format!("({})V", pc)),
            StateManagerCall::IsDirty => ("isDirty".into(), format!("({})Z", pc)),
            StateManagerCall::IsNew => ("isNew".into(), format!("({})Z", pc)),
            StateManagerCall::IsDeleted => ("isDeleted".into(), format!("({})Z", pc)),
            StateManagerCall::IsPersistent => ("isPersistent".into(), format!("({})Z", pc)),
            StateManagerCall::IsTransactional => ("isTransactional".into(), format!("({})Z", pc)),
            StateManagerCall::GetObjectId => ("getObjectId".into(), format!("({})Ljava/lang/Object;", pc)),
            StateManagerCall::GetTransactionalObjectId => {
                ("getTransactionalObjectId".into(), format!("({})Ljava/lang/Object;", pc))
            }
            StateManagerCall::GetVersion => ("getVersion".into(), format!("({})Ljava/lang/Object;", pc)),
            StateManagerCall::GetPersistenceManager => (
                match self.dialect {
                    Dialect::Jdo => "getPersistenceManager".into(),
                    Dialect::Datanucleus => "getExecutionContext".into(),
                },
                format!("({}){}", pc, self.type_descriptor(TypeRole::PersistenceManager)),
            ),
        }
    }

    /// `registerClass(Class, String[], Class[], byte[], Class, PC)` on the implementation helper
    pub fn register_class_descriptor(&self) -> String {
        format!(
            "(Ljava/lang/Class;[Ljava/lang/String;[Ljava/lang/Class;[BLjava/lang/Class;{})V",
            self.type_descriptor(TypeRole::PersistenceCapable)
        )
    }
}

impl Default for NamingPolicy {
    fn default() -> Self {
        Self::jdo()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn jdo_names_follow_the_contract() {
        let p = NamingPolicy::jdo();
        let sm = p.member(MemberRole::StateManagerField);
        assert_eq!(sm.name, "jdoStateManager");
        assert_eq!(sm.descriptor, "Ljavax/jdo/spi/StateManager;");
        assert_eq!(sm.access, ACC_PROTECTED | ACC_TRANSIENT);
        assert_eq!(p.member(MemberRole::IsDetached).name, "jdoIsDetached");
        assert_eq!(p.accessor_name(AccessorKind::PublicGetter, "name"), "jdoGetname");
        assert_eq!(
            p.member(MemberRole::NewInstance).descriptor,
            "(Ljavax/jdo/spi/StateManager;)Ljavax/jdo/spi/PersistenceCapable;"
        );
    }

    #[test]
    fn policy_is_total_and_unambiguous() {
        for policy in [NamingPolicy::jdo(), NamingPolicy::datanucleus()] {
            let mut seen = HashSet::new();
            for role in MemberRole::ALL {
                let spec = policy.member(role);
                assert!(spec.name.starts_with(policy.prefix()));
                assert!(seen.insert((spec.name.clone(), spec.descriptor.clone())), "duplicate {:?}", role);
            }
        }
    }

    #[test]
    fn dialects_do_not_share_names() {
        let jdo = NamingPolicy::jdo();
        let dn = NamingPolicy::datanucleus();
        assert_eq!(dn.member(MemberRole::FlagsField).name, "dnFlags");
        assert_eq!(dn.member(MemberRole::GetPersistenceManager).name, "dnGetExecutionContext");
        assert_ne!(jdo.type_name(TypeRole::PersistenceCapable), dn.type_name(TypeRole::PersistenceCapable));
    }

    #[test]
    fn state_manager_descriptors_use_value_kind() {
        let p = NamingPolicy::jdo();
        let (name, desc) = p.state_manager_method(StateManagerCall::GetField(FieldKind::Long));
        assert_eq!(name, "getLongField");
        assert_eq!(desc, "(Ljavax/jdo/spi/PersistenceCapable;IJ)J");
        assert_eq!(FieldKind::of(&FieldType::object("java/lang/String")), FieldKind::String);
        assert_eq!(FieldKind::of(&FieldType::parse("[I").unwrap()), FieldKind::Object);
    }

    #[test]
    fn dialect_parses_from_option_strings() {
        assert_eq!("JDO".parse::<Dialect>().unwrap(), Dialect::Jdo);
        assert_eq!("datanucleus".parse::<Dialect>().unwrap(), Dialect::Datanucleus);
        assert!("hibernate".parse::<Dialect>().is_err());
    }
}
