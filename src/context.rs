//! Shared, immutable engine data threaded through the inliner
//!
//! This replaces ambient thread-context state: the built-in identity table, the
//! well-known constructors, and the object-layout offsets guards need are all read
//! from one [`InlineContext`] that many compilation jobs may share.

use rustc_hash::FxHashMap as HashMap;
use std::ops::RangeInclusive;

use crate::profile::{BuiltinFunction, FunctionInfoId, TypeId};

/// Function-info ids the default context assigns to built-ins start here
pub const BUILTIN_FUNCTION_INFO_BASE: u64 = 0x1000;

const ALL_BUILTINS: &[BuiltinFunction] = &[
    BuiltinFunction::MathAbs,
    BuiltinFunction::MathFloor,
    BuiltinFunction::MathCeil,
    BuiltinFunction::MathRound,
    BuiltinFunction::MathSqrt,
    BuiltinFunction::MathMin,
    BuiltinFunction::MathMax,
    BuiltinFunction::MathImul,
    BuiltinFunction::MathClz32,
    BuiltinFunction::MathPow,
    BuiltinFunction::ArrayPush,
    BuiltinFunction::ArrayPop,
    BuiltinFunction::StringCharAt,
    BuiltinFunction::StringCharCodeAt,
    BuiltinFunction::FunctionApply,
    BuiltinFunction::FunctionCall,
];

/// Object layout offsets used by emitted guards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectLayout {
    /// Offset of the type pointer in an object
    pub type_offset: i32,
    /// Offset of the type id in a type
    pub type_id_offset: i32,
    /// Offset of the function info in a function object
    pub function_info_offset: i32,
}

impl Default for ObjectLayout {
    fn default() -> Self {
        Self {
            type_offset: 0x8,
            type_id_offset: 0x0,
            function_info_offset: 0x20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InlineContext {
    builtins: HashMap<FunctionInfoId, BuiltinFunction>,
    builtin_infos: HashMap<BuiltinFunction, FunctionInfoId>,
    pub object_ctor: FunctionInfoId,
    pub array_ctor: FunctionInfoId,
    /// Type ids of plain objects (safe receivers)
    pub object_type_ids: RangeInclusive<u32>,
    /// Type id of function objects
    pub function_type_id: u32,
    /// Type of the global object
    pub global_object_type: Option<TypeId>,
    pub layout: ObjectLayout,
}

impl Default for InlineContext {
    fn default() -> Self {
        let mut builtins = HashMap::default();
        let mut builtin_infos = HashMap::default();
        for (i, b) in ALL_BUILTINS.iter().enumerate() {
            let info = FunctionInfoId(BUILTIN_FUNCTION_INFO_BASE + i as u64);
            builtins.insert(info, *b);
            builtin_infos.insert(*b, info);
        }
        Self {
            builtins,
            builtin_infos,
            object_ctor: FunctionInfoId(BUILTIN_FUNCTION_INFO_BASE + 0x100),
            array_ctor: FunctionInfoId(BUILTIN_FUNCTION_INFO_BASE + 0x101),
            object_type_ids: 100..=999,
            function_type_id: 30,
            global_object_type: None,
            layout: ObjectLayout::default(),
        }
    }
}

impl InlineContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Which built-in a function info identifies, if any
    pub fn builtin_for(&self, info: FunctionInfoId) -> Option<BuiltinFunction> {
        self.builtins.get(&info).copied()
    }

    /// The function info registered for a built-in
    pub fn function_info_of(&self, builtin: BuiltinFunction) -> Option<FunctionInfoId> {
        self.builtin_infos.get(&builtin).copied()
    }

    /// Register (or re-map) a built-in's identity
    pub fn register_builtin(&mut self, info: FunctionInfoId, builtin: BuiltinFunction) {
        if let Some(old) = self.builtin_infos.insert(builtin, info) {
            self.builtins.remove(&old);
        }
        self.builtins.insert(info, builtin);
    }

    /// Is a value of this type known to be a non-primitive object?
    pub fn is_object_type(&self, type_id: TypeId) -> bool {
        self.object_type_ids.contains(&type_id.0) || Some(type_id) == self.global_object_type
    }

    pub fn is_builtin_ctor(&self, info: FunctionInfoId) -> bool {
        info == self.object_ctor || info == self.array_ctor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_identity_roundtrip() {
        let ctx = InlineContext::default();
        let info = ctx.function_info_of(BuiltinFunction::MathFloor).unwrap();
        assert_eq!(ctx.builtin_for(info), Some(BuiltinFunction::MathFloor));
        assert_eq!(ctx.builtin_for(FunctionInfoId(1)), None);
    }

    #[test]
    fn test_register_builtin_remaps() {
        let mut ctx = InlineContext::default();
        let old = ctx.function_info_of(BuiltinFunction::FunctionApply).unwrap();
        ctx.register_builtin(FunctionInfoId(77), BuiltinFunction::FunctionApply);
        assert_eq!(ctx.builtin_for(old), None);
        assert_eq!(ctx.builtin_for(FunctionInfoId(77)), Some(BuiltinFunction::FunctionApply));
    }

    #[test]
    fn test_object_types() {
        let mut ctx = InlineContext::default();
        assert!(ctx.is_object_type(TypeId(100)));
        assert!(!ctx.is_object_type(TypeId(5)));
        ctx.global_object_type = Some(TypeId(5));
        assert!(ctx.is_object_type(TypeId(5)));
    }
}
