//! Enhancer options
//!
//! Options arrive either as a serde document or as the string-valued property map
//! used by build tooling (`enhancer.addDefaultConstructor=true`, ...).

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
pub use crate::naming::Dialect;
use crate::naming::NamingPolicy;

pub const ADD_DEFAULT_CONSTRUCTOR: &str = "enhancer.addDefaultConstructor";
pub const GENERATE_PRIMARY_KEY: &str = "enhancer.generatePrimaryKey";
pub const DETACH_LISTENER: &str = "enhancer.detachListener";
pub const DIALECT: &str = "enhancer.dialect";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnhancerOptions {
    /// Synthesize `<init>()` when the class has no no-arg constructor
    pub add_default_constructor: bool,
    /// Generate a companion key class for application identity without one
    pub generate_primary_key: bool,
    /// Unloaded access to a detached member calls the detach listener instead of throwing
    pub detach_listener: bool,
    pub dialect: Dialect,
}

impl Default for EnhancerOptions {
    fn default() -> Self {
        Self { add_default_constructor: true, generate_primary_key: true, detach_listener: false, dialect: Dialect::Jdo }
    }
}

impl EnhancerOptions {
    /// Build options from `key=value` properties; unknown keys are rejected
    pub fn from_properties<'a, I>(properties: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut options = Self::default();
        for (key, value) in properties {
            let key = key.trim();
            let value = value.trim();
            match key {
                ADD_DEFAULT_CONSTRUCTOR => options.add_default_constructor = parse_bool(key, value)?,
                GENERATE_PRIMARY_KEY => options.generate_primary_key = parse_bool(key, value)?,
                DETACH_LISTENER => options.detach_listener = parse_bool(key, value)?,
                DIALECT => options.dialect = value.parse::<Dialect>().map_err(Error::config_error)?,
                _ => return Err(Error::config_error(format!("unknown option `{}`", key))),
            }
        }
        Ok(options)
    }

    /// Parse a single `key=value` argument
    pub fn parse_assignment(arg: &str) -> Result<(String, String)> {
        let (key, value) = arg
            .split_once('=')
            .ok_or_else(|| Error::config_error(format!("expected key=value, got `{}`", arg)))?;
        Ok((key.trim().to_string(), value.trim().to_string()))
    }

    pub fn naming_policy(&self) -> NamingPolicy {
        NamingPolicy::for_dialect(self.dialect)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(Error::config_error(format!("option `{}` expects a boolean, got `{}`", key, value))),
    }
}
