//! Class-file checks
//!
//! [`verify`] runs structural sanity checks over a parsed class; the enhancer runs it
//! on everything it emits. [`EnhancementValidator`] answers a different question:
//! whether a class carries the complete enhancement contract for its metadata.

mod verifier;
pub mod class_access_flags;
pub mod constant_pool;
pub mod fields;
pub mod interfaces;
pub mod method_access_flags;
pub mod methods;
pub mod validator;

pub use validator::{Diagnostic, EnhancementValidator, Outcome, ValidationReport};
pub use verifier::{verify, VerifyError, VerifyResult};
