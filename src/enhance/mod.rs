//! The enhancement engine
//!
//! Enhancement runs in two phases. [`EnhancementPlan::build`] decides every name,
//! descriptor and index up front; the passes then apply the plan to a copy of the
//! class:
//!
//! ```text
//! bytes -> ClassFile -> plan -> rewrite (existing bodies)
//!                             -> accessors (per member)
//!                             -> structure (contract members, <clinit>)
//!                             -> verify -> bytes [+ key class]
//! ```
//!
//! Nothing is returned until every pass has succeeded, so a failure never leaves a
//! partially enhanced class behind.

mod accessor;
mod emit;
mod plan;
mod rewrite;
mod structure;

pub use plan::{declares_key, Contract, EnhancementPlan, PlanKind, PropertyPlan, GENERATED_KEY_SUFFIX};
pub use rewrite::{MethodRole, RewriteSite, SiteMatcher};

use crate::codegen::{class_file_to_bytes, ClassFile};
use crate::config::EnhancerOptions;
use crate::error::{Error, Result};
use crate::keygen::{KeyClassDescriptor, KeyClassGenerator};
use crate::metadata::MetadataView;
use crate::naming::{MemberRole, NamingPolicy, TypeRole};

pub use crate::keygen::GeneratedClass;

use emit::Emitter;

/// Output of one [`Enhancer::enhance`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancementResult {
    /// The enhanced class, or the input unchanged
    pub bytes: Vec<u8>,
    pub changed: bool,
    /// Generated object-id class, when the metadata asks for one
    pub companion: Option<GeneratedClass>,
}

impl EnhancementResult {
    fn unchanged(bytes: &[u8]) -> Self {
        Self { bytes: bytes.to_vec(), changed: false, companion: None }
    }
}

/// Enhances classes against one metadata view and naming policy.
///
/// All working state lives inside [`Enhancer::enhance`], so one enhancer can be
/// shared between threads.
pub struct Enhancer<'a> {
    policy: &'a NamingPolicy,
    metadata: &'a dyn MetadataView,
    options: EnhancerOptions,
}

impl<'a> Enhancer<'a> {
    pub fn new(policy: &'a NamingPolicy, metadata: &'a dyn MetadataView, options: EnhancerOptions) -> Self {
        Self { policy, metadata, options }
    }

    pub fn options(&self) -> &EnhancerOptions {
        &self.options
    }

    pub fn enhance(&self, bytes: &[u8]) -> Result<EnhancementResult> {
        let original = ClassFile::parse(bytes).map_err(|e| Error::malformed("<unknown>", e))?;
        let Some(plan) = EnhancementPlan::build(&original, self.metadata, self.policy, &self.options)? else {
            tracing::debug!(class = ?original.name().ok(), "no metadata, left unchanged");
            return Ok(EnhancementResult::unchanged(bytes));
        };
        let name = plan.class_name.clone();
        if plan.kind == PlanKind::PersistenceCapable && self.already_enhanced(&original) {
            tracing::info!(class = %name, "already enhanced");
            return Ok(EnhancementResult::unchanged(bytes));
        }

        let mut class = original.clone();
        let existing = class.methods.len();
        let sites = rewrite::rewrite_class(&mut class, &plan, self.metadata, self.policy, existing)?;
        if plan.kind == PlanKind::PersistenceAware {
            if sites == 0 {
                tracing::debug!(class = %name, "persistence-aware class has no field accesses to rewrite");
                return Ok(EnhancementResult::unchanged(bytes));
            }
        } else {
            let e = Emitter::new(&plan, self.policy);
            accessor::synthesize(&mut class, &e)?;
            structure::augment(&mut class, &e)?;
        }

        crate::verify::verify(&class).map_err(|e| Error::internal(format!("enhanced {} fails verification: {}", name, e)))?;
        let companion = if plan.generate_key_class {
            let key_name = plan.object_id_class.as_deref().unwrap_or_default();
            let descriptor = KeyClassDescriptor::from_metadata(self.metadata, &name, key_name)?;
            Some(KeyClassGenerator::new().generate(&descriptor)?)
        } else {
            None
        };
        let bytes = class_file_to_bytes(&class);
        tracing::info!(
            class = %name,
            kind = ?plan.kind,
            sites,
            methods = class.methods.len() - existing,
            companion = companion.is_some(),
            "enhanced"
        );
        Ok(EnhancementResult { bytes, changed: true, companion })
    }

    /// Whether the class already carries the contract of this policy
    fn already_enhanced(&self, class: &ClassFile) -> bool {
        let count = self.policy.member(MemberRole::InheritedFieldCountField);
        class.implements(self.policy.type_name(TypeRole::PersistenceCapable))
            || class.has_field(&count.name, &count.descriptor)
    }
}
