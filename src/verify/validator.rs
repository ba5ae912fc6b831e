//! Enhancement contract validation
//!
//! The validator walks a class the way a visitor would: the header seeds the sets of
//! required interfaces, fields and methods, every visited member that matches an entry
//! exactly removes it, and whatever is left at the end is reported. It never mutates
//! the class and never fails; even unreadable bytes come back as a diagnostic.

use std::fmt;

use crate::codegen::defs::access_flags::ACC_SYNTHETIC;
use crate::codegen::defs::CONSTRUCTOR_METHOD_NAME;
use crate::codegen::instruction::decode;
use crate::codegen::opcodes::{GETFIELD, PUTFIELD};
use crate::codegen::ClassFile;
use crate::enhance::Contract;
use crate::metadata::{MetadataView, PersistenceModifier};
use crate::naming::{MemberSpec, NamingPolicy};

/// Terminal state of a validation run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Enhanced,
    NotEnhanced,
}

/// One finding about a class
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    Malformed(String),
    NotPersistent(String),
    Metadata(String),
    MissingInterface(String),
    MissingField { name: String, descriptor: String },
    MissingMethod { name: String, descriptor: String },
    FieldMismatch { name: String, expected: String, found: String },
    MethodMismatch { name: String, expected: String, found: String },
    DirectFieldAccess { method: String, field: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::Malformed(message) => write!(f, "class cannot be read: {}", message),
            Diagnostic::NotPersistent(class) => write!(f, "{} is neither persistence-capable nor persistence-aware", class),
            Diagnostic::Metadata(message) => write!(f, "metadata problem: {}", message),
            Diagnostic::MissingInterface(name) => write!(f, "interface {} is not implemented", name),
            Diagnostic::MissingField { name, descriptor } => write!(f, "field {} {} is missing", name, descriptor),
            Diagnostic::MissingMethod { name, descriptor } => write!(f, "method {}{} is missing", name, descriptor),
            Diagnostic::FieldMismatch { name, expected, found } => {
                write!(f, "field {} is {}, expected {}", name, found, expected)
            }
            Diagnostic::MethodMismatch { name, expected, found } => {
                write!(f, "method {} is {}, expected {}", name, found, expected)
            }
            Diagnostic::DirectFieldAccess { method, field } => {
                write!(f, "{} accesses persistent field {} directly", method, field)
            }
        }
    }
}

/// Result of validating one class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub outcome: Outcome,
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationReport {
    fn finish(diagnostics: Vec<Diagnostic>) -> Self {
        let outcome = if diagnostics.is_empty() { Outcome::Enhanced } else { Outcome::NotEnhanced };
        Self { outcome, diagnostics }
    }

    pub fn is_enhanced(&self) -> bool {
        self.outcome == Outcome::Enhanced
    }

    /// The class has no persistence metadata, so there was nothing to check
    pub fn is_not_persistent(&self) -> bool {
        matches!(self.diagnostics.as_slice(), [Diagnostic::NotPersistent(_)])
    }

    /// Diagnostics rendered as text
    pub fn messages(&self) -> Vec<String> {
        self.diagnostics.iter().map(ToString::to_string).collect()
    }
}

/// Checks classes against the contract implied by their metadata
pub struct EnhancementValidator<'a> {
    policy: &'a NamingPolicy,
    metadata: &'a dyn MetadataView,
}

impl<'a> EnhancementValidator<'a> {
    pub fn new(policy: &'a NamingPolicy, metadata: &'a dyn MetadataView) -> Self {
        Self { policy, metadata }
    }

    pub fn validate(&self, bytes: &[u8]) -> ValidationReport {
        match ClassFile::parse(bytes) {
            Ok(class) => self.validate_class(&class),
            Err(e) => ValidationReport::finish(vec![Diagnostic::Malformed(e.to_string())]),
        }
    }

    pub fn validate_class(&self, class: &ClassFile) -> ValidationReport {
        let name = match class.name() {
            Ok(name) => name.to_string(),
            Err(e) => return ValidationReport::finish(vec![Diagnostic::Malformed(e.to_string())]),
        };
        let diagnostics = match self.metadata.class(&name).map(|m| m.modifier) {
            Some(PersistenceModifier::PersistenceCapable) => self.capable(class, &name),
            Some(PersistenceModifier::PersistenceAware) => self.aware(class),
            Some(PersistenceModifier::None) | None => vec![Diagnostic::NotPersistent(name.clone())],
        };
        let report = ValidationReport::finish(diagnostics);
        tracing::debug!(class = %name, outcome = ?report.outcome, diagnostics = report.diagnostics.len(), "validated");
        report
    }

    fn capable(&self, class: &ClassFile, name: &str) -> Vec<Diagnostic> {
        let pool = &class.constant_pool;
        let field_access = |member: &str| class.find_field(member).map(|f| f.access_flags);
        let contract = match Contract::for_class(self.policy, self.metadata, name, &field_access) {
            Ok(contract) => contract,
            Err(e) => return vec![Diagnostic::Metadata(e.to_string())],
        };
        let mut diagnostics = Vec::new();

        for interface in &contract.interfaces {
            if !class.implements(interface) {
                diagnostics.push(Diagnostic::MissingInterface(interface.to_string()));
            }
        }

        let mut fields = contract.fields;
        for field in &class.fields {
            let (Ok(field_name), Ok(descriptor)) = (field.name(pool), field.descriptor(pool)) else {
                continue;
            };
            let Some(at) = fields.iter().position(|f| f.name == field_name) else {
                continue;
            };
            let required = fields.remove(at);
            if required.descriptor != descriptor || required.access != field.access_flags {
                diagnostics.push(Diagnostic::FieldMismatch {
                    name: required.name.clone(),
                    expected: signature(&required.descriptor, required.access),
                    found: signature(descriptor, field.access_flags),
                });
            }
        }
        diagnostics.extend(
            fields
                .into_iter()
                .map(|f| Diagnostic::MissingField { name: f.name, descriptor: f.descriptor }),
        );

        let mut methods = contract.methods;
        let mut seen: Vec<(&str, &str, u16)> = Vec::new();
        for method in &class.methods {
            let (Ok(method_name), Ok(descriptor)) = (method.name(pool), method.descriptor(pool)) else {
                continue;
            };
            let access = method.access_flags & !ACC_SYNTHETIC;
            seen.push((method_name, descriptor, access));
            let Some(at) = methods.iter().position(|m| m.name == method_name && m.descriptor == descriptor) else {
                continue;
            };
            let required = methods.remove(at);
            if required.access != access {
                diagnostics.push(Diagnostic::MethodMismatch {
                    name: required.name.clone(),
                    expected: signature(&required.descriptor, required.access),
                    found: signature(descriptor, access),
                });
            }
        }
        for MemberSpec { name, descriptor, access } in methods {
            match seen.iter().find(|(n, ..)| *n == name) {
                Some((_, found, found_access)) => diagnostics.push(Diagnostic::MethodMismatch {
                    expected: signature(&descriptor, access),
                    found: signature(found, *found_access),
                    name,
                }),
                None => diagnostics.push(Diagnostic::MissingMethod { name, descriptor }),
            }
        }
        diagnostics
    }

    /// A persistence-aware class is enhanced once no method touches a persistent field directly
    fn aware(&self, class: &ClassFile) -> Vec<Diagnostic> {
        let pool = &class.constant_pool;
        let mut diagnostics = Vec::new();
        for method in &class.methods {
            let Ok(method_name) = method.name(pool) else {
                continue;
            };
            let code = match method.code(pool) {
                Ok(Some(code)) => code,
                Ok(None) => continue,
                Err(e) => {
                    diagnostics.push(Diagnostic::Malformed(format!("{}: {}", method_name, e)));
                    continue;
                }
            };
            let instructions = match decode(&code.code) {
                Ok(instructions) => instructions,
                Err(e) => {
                    diagnostics.push(Diagnostic::Malformed(format!("{}: {}", method_name, e)));
                    continue;
                }
            };
            for instr in instructions.iter().filter(|i| i.opcode == GETFIELD || i.opcode == PUTFIELD) {
                let Some(field) = instr.cp_index().and_then(|i| pool.member_ref(i).ok()) else {
                    continue;
                };
                let member = match self.metadata.resolve_member(field.owner, field.name) {
                    Ok(member) => member,
                    Err(e) => {
                        diagnostics.push(Diagnostic::Metadata(e.to_string()));
                        continue;
                    }
                };
                let Some(member) = member.filter(|m| !m.is_property() && m.descriptor() == field.descriptor) else {
                    continue;
                };
                if method_name == CONSTRUCTOR_METHOD_NAME && member.declaring_class == field.owner {
                    continue;
                }
                diagnostics.push(Diagnostic::DirectFieldAccess {
                    method: method_name.to_string(),
                    field: format!("{}.{}", member.declaring_class, member.name),
                });
            }
        }
        diagnostics
    }
}

fn signature(descriptor: &str, access: u16) -> String {
    format!("{} (access 0x{:04x})", descriptor, access)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::class_file_to_bytes;
    use crate::codegen::defs::access_flags::*;
    use crate::metadata::{ClassMetadata, MemberMetadata, MetadataRegistry};

    fn class(name: &str) -> ClassFile {
        let mut class = ClassFile::new();
        class.access_flags = ACC_PUBLIC | ACC_SUPER;
        class.this_class = class.constant_pool.add_class(name).unwrap();
        class.super_class = class.constant_pool.add_class("java/lang/Object").unwrap();
        class
    }

    #[test]
    fn garbage_is_a_single_diagnostic() {
        let reg = MetadataRegistry::default();
        let policy = NamingPolicy::jdo();
        let report = EnhancementValidator::new(&policy, &reg).validate(&[0xca, 0xfe]);
        assert_eq!(report.outcome, Outcome::NotEnhanced);
        assert_eq!(report.diagnostics.len(), 1);
        assert!(matches!(report.diagnostics[0], Diagnostic::Malformed(_)));
    }

    #[test]
    fn plain_class_reports_every_missing_member() {
        let reg = MetadataRegistry::new([ClassMetadata::new("p/A").with_member(MemberMetadata::field("x", "I"))]);
        let policy = NamingPolicy::jdo();
        let mut c = class("p/A");
        c.add_field(ACC_PRIVATE, "x", "I").unwrap();
        let report = EnhancementValidator::new(&policy, &reg).validate(&class_file_to_bytes(&c));
        assert!(!report.is_enhanced());
        assert!(report.diagnostics.contains(&Diagnostic::MissingInterface("javax/jdo/spi/PersistenceCapable".into())));
        assert!(report
            .messages()
            .iter()
            .any(|m| m.contains("jdoGetx") && m.contains("missing")));
    }

    #[test]
    fn wrong_access_is_a_mismatch() {
        let reg = MetadataRegistry::new([ClassMetadata::new("p/A")]);
        let policy = NamingPolicy::jdo();
        let mut c = class("p/A");
        c.add_field(ACC_PUBLIC, "jdoStateManager", "Ljavax/jdo/spi/StateManager;").unwrap();
        let report = EnhancementValidator::new(&policy, &reg).validate_class(&c);
        assert!(report
            .diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::FieldMismatch { name, .. } if name == "jdoStateManager")));
        assert!(!report
            .diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::MissingField { name, .. } if name == "jdoStateManager")));
    }

    #[test]
    fn unknown_classes_are_not_enhanced() {
        let reg = MetadataRegistry::default();
        let policy = NamingPolicy::jdo();
        let report = EnhancementValidator::new(&policy, &reg).validate_class(&class("p/B"));
        assert_eq!(report.diagnostics, vec![Diagnostic::NotPersistent("p/B".into())]);
        assert!(report.is_not_persistent());
        assert!(!report.is_enhanced());
        assert!(!ValidationReport::finish(vec![Diagnostic::Malformed("truncated".into())]).is_not_persistent());
    }
}
