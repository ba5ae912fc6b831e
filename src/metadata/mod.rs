//! Persistence metadata consumed by the enhancer
//!
//! The enhancer never parses mapping files itself. It reads class and member
//! metadata through [`MetadataView`]; [`MetadataRegistry`] is the in-memory
//! implementation, built once (usually from JSON) and read-only afterwards.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::codegen::defs::access_flags::*;
use crate::codegen::descriptor::FieldType;
use crate::error::{Error, Result};

/// How the enhancer treats a class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceModifier {
    /// Gets the full enhancement contract
    #[default]
    PersistenceCapable,
    /// Only its field accesses to capable classes are rewritten
    PersistenceAware,
    /// Left alone
    None,
}

/// Identity kind of a persistence-capable class
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum IdentityType {
    #[default]
    Datastore,
    Application {
        /// Companion key class; generated when absent and key generation is enabled
        #[serde(default)]
        object_id_class: Option<String>,
    },
    Nondurable,
}

/// Interception policy for one direction of member access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPolicy {
    /// Direct access, no state-manager involvement
    Normal,
    /// Consults the flags byte before the state manager
    #[default]
    Checked,
    /// Always goes through the state manager when one is attached
    Mediated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    #[default]
    Field,
    /// Getter/setter pair named after the property
    Property,
}

/// How a key member of a class-typed value round-trips through the key's string form.
///
/// Only needed for types the key generator cannot recognise on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyConversion {
    /// `Enum.valueOf` to parse, `name()` to print
    Enum,
    /// A public `(String)` constructor to parse, `toString` to print
    StringConstructor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Protected,
    #[default]
    Package,
    Private,
}

impl Visibility {
    pub fn access_flags(self) -> u16 {
        match self {
            Visibility::Public => ACC_PUBLIC,
            Visibility::Protected => ACC_PROTECTED,
            Visibility::Package => 0,
            Visibility::Private => ACC_PRIVATE,
        }
    }
}

/// One managed member as written in the metadata file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberMetadata {
    pub name: String,

    #[serde(default)]
    pub kind: MemberKind,

    /// JVM field descriptor of the member's value
    pub descriptor: String,

    #[serde(default)]
    pub read: AccessPolicy,

    #[serde(default)]
    pub write: AccessPolicy,

    /// Opaque field-flag byte handed to the runtime verbatim
    #[serde(default)]
    pub flags: u8,

    #[serde(default)]
    pub visibility: Visibility,

    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,

    #[serde(default)]
    pub primary_key: bool,

    #[serde(default)]
    pub serialized: bool,

    #[serde(default)]
    pub embedded: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_conversion: Option<KeyConversion>,
}

impl MemberMetadata {
    pub fn field(name: &str, descriptor: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: MemberKind::Field,
            descriptor: descriptor.to_string(),
            read: AccessPolicy::default(),
            write: AccessPolicy::default(),
            flags: 0,
            visibility: Visibility::default(),
            is_abstract: false,
            primary_key: false,
            serialized: false,
            embedded: false,
            key_conversion: None,
        }
    }

    pub fn property(name: &str, descriptor: &str) -> Self {
        Self { kind: MemberKind::Property, visibility: Visibility::Public, ..Self::field(name, descriptor) }
    }

    pub fn with_policies(mut self, read: AccessPolicy, write: AccessPolicy) -> Self {
        self.read = read;
        self.write = write;
        self
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn with_key_conversion(mut self, conversion: KeyConversion) -> Self {
        self.key_conversion = Some(conversion);
        self
    }
}

/// Metadata of one class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassMetadata {
    /// Internal (slash-separated) name; dotted names are accepted on load
    pub name: String,

    #[serde(default)]
    pub modifier: PersistenceModifier,

    /// Nearest persistence-capable ancestor
    #[serde(default)]
    pub persistent_superclass: Option<String>,

    #[serde(default)]
    pub detachable: bool,

    #[serde(default)]
    pub identity: IdentityType,

    /// Managed members in relative-index order
    #[serde(default)]
    pub members: Vec<MemberMetadata>,
}

impl ClassMetadata {
    pub fn new(name: &str) -> Self {
        Self {
            name: internal_name(name),
            modifier: PersistenceModifier::PersistenceCapable,
            persistent_superclass: None,
            detachable: false,
            identity: IdentityType::Datastore,
            members: Vec::new(),
        }
    }

    pub fn aware(name: &str) -> Self {
        Self { modifier: PersistenceModifier::PersistenceAware, ..Self::new(name) }
    }

    pub fn with_superclass(mut self, name: &str) -> Self {
        self.persistent_superclass = Some(internal_name(name));
        self
    }

    pub fn detachable(mut self) -> Self {
        self.detachable = true;
        self
    }

    pub fn with_application_identity(mut self, object_id_class: Option<&str>) -> Self {
        self.identity = IdentityType::Application { object_id_class: object_id_class.map(internal_name) };
        self
    }

    pub fn with_member(mut self, member: MemberMetadata) -> Self {
        self.members.push(member);
        self
    }

    pub fn is_persistence_capable(&self) -> bool {
        self.modifier == PersistenceModifier::PersistenceCapable
    }

    pub fn member(&self, name: &str) -> Option<&MemberMetadata> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn key_members(&self) -> impl Iterator<Item = &MemberMetadata> {
        self.members.iter().filter(|m| m.primary_key)
    }
}

/// A managed member with its position in the class hierarchy resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDescriptor {
    pub declaring_class: String,
    pub name: String,
    pub field_type: FieldType,
    /// Index among the declaring class's own members
    pub relative_index: usize,
    /// `relative_index` plus the inherited field count
    pub absolute_index: usize,
    pub read: AccessPolicy,
    pub write: AccessPolicy,
    pub flags: u8,
    pub kind: MemberKind,
    pub visibility: Visibility,
    pub is_abstract: bool,
    pub primary_key: bool,
    pub serialized: bool,
    pub embedded: bool,
    pub key_conversion: Option<KeyConversion>,
}

impl MemberDescriptor {
    pub fn descriptor(&self) -> String {
        self.field_type.to_descriptor()
    }

    pub fn is_property(&self) -> bool {
        self.kind == MemberKind::Property
    }
}

/// Read access to class metadata
///
/// Implementations are immutable once handed to an enhancer and must be shareable
/// across threads.
pub trait MetadataView: Send + Sync {
    fn class(&self, name: &str) -> Option<&ClassMetadata>;

    fn is_persistence_capable(&self, name: &str) -> bool {
        self.class(name).is_some_and(ClassMetadata::is_persistence_capable)
    }

    /// Persistent ancestors, nearest first
    fn ancestors(&self, name: &str) -> Result<Vec<&ClassMetadata>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::from([name.to_string()]);
        let mut next = self.class(name).and_then(|c| c.persistent_superclass.clone());
        while let Some(parent) = next {
            if !seen.insert(parent.clone()) {
                return Err(Error::config_error(format!("persistent superclass cycle through `{}`", parent)));
            }
            let meta = self
                .class(&parent)
                .ok_or_else(|| Error::config_error(format!("no metadata for persistent superclass `{}`", parent)))?;
            next = meta.persistent_superclass.clone();
            chain.push(meta);
        }
        Ok(chain)
    }

    /// Number of managed members declared by all persistent ancestors
    fn inherited_field_count(&self, name: &str) -> Result<usize> {
        Ok(self.ancestors(name)?.iter().map(|c| c.members.len()).sum())
    }

    /// Own managed members with relative and absolute indices
    fn members(&self, name: &str) -> Result<Vec<MemberDescriptor>> {
        let class = self
            .class(name)
            .ok_or_else(|| Error::config_error(format!("no metadata for class `{}`", name)))?;
        let inherited = self.inherited_field_count(name)?;
        class
            .members
            .iter()
            .enumerate()
            .map(|(relative, m)| {
                let field_type = FieldType::parse(&m.descriptor).map_err(|e| {
                    Error::config_error(format!("{}.{}: {}", class.name, m.name, e))
                })?;
                Ok(MemberDescriptor {
                    declaring_class: class.name.clone(),
                    name: m.name.clone(),
                    field_type,
                    relative_index: relative,
                    absolute_index: inherited + relative,
                    read: m.read,
                    write: m.write,
                    flags: m.flags,
                    kind: m.kind,
                    visibility: m.visibility,
                    is_abstract: m.is_abstract,
                    primary_key: m.primary_key,
                    serialized: m.serialized,
                    embedded: m.embedded,
                    key_conversion: m.key_conversion,
                })
            })
            .collect()
    }

    /// Find the managed member `member` visible from `owner`, walking up the
    /// persistent superclass chain
    fn resolve_member(&self, owner: &str, member: &str) -> Result<Option<MemberDescriptor>> {
        let Some(start) = self.class(owner) else {
            return Ok(None);
        };
        if !start.is_persistence_capable() {
            return Ok(None);
        }
        let mut candidates = vec![start];
        candidates.extend(self.ancestors(owner)?);
        for class in candidates {
            if class.member(member).is_some() {
                return Ok(self.members(&class.name)?.into_iter().find(|m| m.name == member));
            }
        }
        Ok(None)
    }
}

/// JSON document holding every class the enhancer may need to consult
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataDocument {
    #[serde(default)]
    pub classes: Vec<ClassMetadata>,
}

/// In-memory [`MetadataView`]
#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    classes: HashMap<String, ClassMetadata>,
}

impl MetadataRegistry {
    pub fn new(classes: impl IntoIterator<Item = ClassMetadata>) -> Self {
        let classes = classes
            .into_iter()
            .map(|mut c| {
                c.name = internal_name(&c.name);
                c.persistent_superclass = c.persistent_superclass.as_deref().map(internal_name);
                if let IdentityType::Application { object_id_class: Some(id) } = &mut c.identity {
                    *id = internal_name(id);
                }
                (c.name.clone(), c)
            })
            .collect();
        Self { classes }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let doc: MetadataDocument = serde_json::from_str(json)?;
        Ok(Self::new(doc.classes))
    }

    pub fn to_json(&self) -> Result<String> {
        let mut classes: Vec<_> = self.classes.values().cloned().collect();
        classes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(serde_json::to_string_pretty(&MetadataDocument { classes })?)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }
}

impl MetadataView for MetadataRegistry {
    fn class(&self, name: &str) -> Option<&ClassMetadata> {
        self.classes.get(name)
    }
}

/// `a.b.C` -> `a/b/C`
pub fn internal_name(name: &str) -> String {
    name.replace('.', "/")
}
