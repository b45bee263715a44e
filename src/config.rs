//! Inliner configuration
//!
//! Every phase of the inliner can be switched off individually, which is how the
//! engine's debugging flags (and the fixture-driven tests) isolate one transformation.
//! Configurations are plain JSON documents; missing fields take their defaults and
//! unknown fields are rejected.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Hard limit on arguments an inlinee frame can encode
pub const MAX_INLINEE_ARGOUT_COUNT: u16 = 15;

/// Hard limit on arms of a polymorphic dispatch
pub const MAX_POLYMORPHIC_INLINEES: usize = 4;

/// Phase toggles and limits for the inliner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InlinerConfig {
    /// Master switch
    pub inline: bool,
    /// Inline script-function candidates (as opposed to only fixed-method rewrites)
    pub inline_candidates: bool,
    pub polymorphic_inline: bool,
    pub polymorphic_inline_fixed_methods: bool,
    pub fixed_methods: bool,
    pub fixed_ctor_inlining: bool,
    pub fixed_builtin_inlining: bool,
    pub fixed_script_inlining: bool,
    pub fixed_ctor_calls: bool,
    pub fixed_builtin_calls: bool,
    /// Fixed-method rewrites of calls that are not inlined
    pub fixed_script_calls: bool,
    pub inline_builtins: bool,
    pub inline_apply_target: bool,
    pub inline_call_target: bool,
    pub inline_apply_without_array_arg: bool,
    pub inline_call: bool,
    pub inline_accessors: bool,
    pub inline_getters: bool,
    pub inline_setters: bool,
    pub inline_constructors: bool,
    pub inline_spread: bool,
    /// Split a non-inlined fixed `new` into allocation plus call
    pub split_new_sc_object: bool,
    pub inline_recursive: bool,
    pub check_this: bool,
    /// Fold constant arguments of inlinees
    pub const_fold: bool,
    pub float_type_spec: bool,
    pub aggressive_int_type_spec: bool,
    pub lossy_int_type_spec: bool,
    /// Target supports the SSE4.1 rounding instructions
    pub sse4_1: bool,
    /// Arms of a polymorphic dispatch (2..=4)
    pub max_polymorphic_inlinees: usize,
    /// Policy cap on inlined argument count; never above the frame encoding limit
    pub max_inline_argouts: u16,
    /// Self-recursive inlining depth
    pub max_recursive_inline_depth: u32,
    /// Argument positions considered when building the constant-argument mask
    pub max_constant_argument_index: u16,
}

impl Default for InlinerConfig {
    fn default() -> Self {
        Self {
            inline: true,
            inline_candidates: true,
            polymorphic_inline: true,
            polymorphic_inline_fixed_methods: true,
            fixed_methods: true,
            fixed_ctor_inlining: true,
            fixed_builtin_inlining: true,
            fixed_script_inlining: true,
            fixed_ctor_calls: true,
            fixed_builtin_calls: true,
            fixed_script_calls: false,
            inline_builtins: true,
            inline_apply_target: true,
            inline_call_target: true,
            inline_apply_without_array_arg: true,
            inline_call: true,
            inline_accessors: true,
            inline_getters: true,
            inline_setters: true,
            inline_constructors: true,
            inline_spread: true,
            split_new_sc_object: true,
            inline_recursive: true,
            check_this: true,
            const_fold: true,
            float_type_spec: true,
            aggressive_int_type_spec: true,
            lossy_int_type_spec: true,
            sse4_1: true,
            max_polymorphic_inlinees: MAX_POLYMORPHIC_INLINEES,
            max_inline_argouts: MAX_INLINEE_ARGOUT_COUNT,
            max_recursive_inline_depth: 2,
            max_constant_argument_index: 16,
        }
    }
}

impl InlinerConfig {
    /// Everything off except the master switch; handy for enabling single phases
    pub fn minimal() -> Self {
        Self {
            inline: true,
            inline_candidates: true,
            polymorphic_inline: false,
            polymorphic_inline_fixed_methods: false,
            fixed_methods: false,
            inline_builtins: false,
            inline_apply_target: false,
            inline_call_target: false,
            inline_apply_without_array_arg: false,
            inline_call: false,
            inline_accessors: false,
            inline_constructors: false,
            inline_spread: false,
            split_new_sc_object: false,
            check_this: false,
            const_fold: false,
            ..Self::default()
        }
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: InlinerConfig = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("invalid inliner configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if !(2..=MAX_POLYMORPHIC_INLINEES).contains(&self.max_polymorphic_inlinees) {
            return Err(Error::config(format!(
                "max_polymorphic_inlinees must be between 2 and {}, got {}",
                MAX_POLYMORPHIC_INLINEES, self.max_polymorphic_inlinees
            )));
        }
        if self.max_inline_argouts > MAX_INLINEE_ARGOUT_COUNT {
            return Err(Error::config(format!(
                "max_inline_argouts cannot exceed the frame encoding limit of {}, got {}",
                MAX_INLINEE_ARGOUT_COUNT, self.max_inline_argouts
            )));
        }
        if self.max_constant_argument_index > 32 {
            return Err(Error::config("max_constant_argument_index must fit a 32-bit mask"));
        }
        Ok(())
    }

    /// Effective argument limit
    pub fn argout_limit(&self) -> u16 {
        self.max_inline_argouts.min(MAX_INLINEE_ARGOUT_COUNT)
    }

    /// Effective polymorphic arm limit
    pub fn polymorphic_limit(&self) -> usize {
        self.max_polymorphic_inlinees.clamp(2, MAX_POLYMORPHIC_INLINEES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = InlinerConfig::default();
        assert!(config.inline);
        assert!(!config.fixed_script_calls);
        assert_eq!(config.argout_limit(), 15);
        assert_eq!(config.polymorphic_limit(), 4);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = InlinerConfig::from_json_str(r#"{"polymorphic_inline": false}"#).unwrap();
        assert!(!config.polymorphic_inline);
        assert!(config.fixed_methods);
    }

    #[test]
    fn test_rejects_unknown_field() {
        let err = InlinerConfig::from_json_str(r#"{"inline_everything": true}"#).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_rejects_limits_out_of_range() {
        assert!(InlinerConfig::from_json_str(r#"{"max_polymorphic_inlinees": 1}"#).is_err());
        assert!(InlinerConfig::from_json_str(r#"{"max_polymorphic_inlinees": 5}"#).is_err());
        assert!(InlinerConfig::from_json_str(r#"{"max_inline_argouts": 16}"#).is_err());
        let tight = InlinerConfig::from_json_str(r#"{"max_inline_argouts": 3}"#).unwrap();
        assert_eq!(tight.argout_limit(), 3);
    }
}
