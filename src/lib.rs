//! classenhance
//!
//! A bytecode enhancer that makes compiled JVM classes persistence-capable: field
//! reads and writes are routed through a state manager, lifecycle and introspection
//! methods are added, and classes using generated application identity get a
//! companion key class.
//!
//! ## Architecture
//!
//! - **codegen**: class-file model, reader and writer, instruction decoding and relocation, code builder
//! - **naming**: the member and type names of one persistence API dialect
//! - **metadata**: what is persistent, as a trait plus an in-memory JSON-backed registry
//! - **enhance**: the two-phase engine (plan, then rewrite, accessors and structure)
//! - **verify**: structural class-file checks and the enhancement contract validator
//! - **keygen**: companion key-class generation
//! - **config**: enhancer options
//! - **bin**: command-line interface
//!
//! ## Enhancement Flow
//!
//! ```text
//! .class bytes → ClassFile → EnhancementPlan → rewritten + augmented ClassFile → .class bytes
//!                                  ↑                                       ↓
//!                          metadata + naming                      companion key class
//! ```

pub mod codegen;
pub mod config;
pub mod enhance;
pub mod error;
pub mod keygen;
pub mod metadata;
pub mod naming;
pub mod verify;

pub use config::{Dialect, EnhancerOptions};
pub use enhance::{EnhancementResult, Enhancer, GeneratedClass};
pub use error::{Error, Result};
pub use keygen::{KeyClassDescriptor, KeyClassGenerator};
pub use metadata::{MetadataRegistry, MetadataView};
pub use naming::NamingPolicy;
pub use verify::{EnhancementValidator, Outcome, ValidationReport};

/// Enhance one class with a policy built from `options`
///
/// Convenience wrapper for callers that do not keep an [`Enhancer`] around.
pub fn enhance_class(bytes: &[u8], metadata: &dyn MetadataView, options: &EnhancerOptions) -> Result<EnhancementResult> {
    let policy = options.naming_policy();
    Enhancer::new(&policy, metadata, options.clone()).enhance(bytes)
}

/// Validate one class against the contract its metadata implies
pub fn validate_class(bytes: &[u8], metadata: &dyn MetadataView, dialect: Dialect) -> ValidationReport {
    let policy = NamingPolicy::for_dialect(dialect);
    EnhancementValidator::new(&policy, metadata).validate(bytes)
}

/// Generate the companion key class of `class_name`
pub fn generate_key_class(metadata: &dyn MetadataView, class_name: &str, key_name: &str) -> Result<GeneratedClass> {
    let descriptor = KeyClassDescriptor::from_metadata(metadata, class_name, key_name)?;
    KeyClassGenerator::new().generate(&descriptor)
}
