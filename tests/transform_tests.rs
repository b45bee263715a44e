//! Call shapes other than a plain script call, driven through JSON fixtures
//!
//!   - builtins: calls to built-ins with an inline fast path
//!   - forwarding: `Function.prototype.call` and `apply`
//!   - accessors: getters, setters and DOM fast paths at property accesses
//!   - constructors: `new` of a script constructor
//!   - folding: constant arguments folded at inlined call sites

mod common;

use common::*;
use quicksilver_inliner::inliner::DeclineReason;
use quicksilver_inliner::ir::{OpCode, Operand};
use quicksilver_inliner::InlinerConfig;

mod builtins {
    use super::*;
    use pretty_assertions::assert_eq;

    const ABS: &str = r#"{
        "entry": "f",
        "functions": [
            { "body": { "name": "f", "function_number": 1, "in_params_count": 2, "locals_count": 4 },
              "call_sites": { "0": "abs" },
              "ir": [
                { "op": "ArgIn", "dst": "r0", "slot": 1 },
                { "op": "ArgIn", "dst": "r2", "slot": 2 },
                { "op": "CallI", "dst": "r3", "src1": "r1", "args": ["r0", "r2"], "profile": 0 },
                { "op": "Ret", "src1": "r3" }
              ] }
        ],
        "natives": [ { "name": "abs", "builtin": "math_abs" } ]
    }"#;

    #[test]
    fn test_math_abs_becomes_inline_opcode() {
        let run = Scenario::from_json(ABS).run();
        assert_eq!(run.stats.builtins, 1);
        assert_eq!(run.count(OpCode::InlineMathAbs), 1);
        assert_eq!(run.count(OpCode::BailOnNotBuiltIn), 1);
        assert_eq!(run.count(OpCode::CallI), 0);
        assert!(run.position(OpCode::BailOnNotBuiltIn).unwrap() < run.position(OpCode::InlineMathAbs).unwrap());
    }

    #[test]
    fn test_builtins_switched_off() {
        let run = Scenario::from_json(ABS)
            .config(InlinerConfig {
                inline_builtins: false,
                ..InlinerConfig::default()
            })
            .run();
        assert_eq!(run.stats.builtins, 0);
        assert_eq!(run.stats.declined_for(DeclineReason::Disabled), 1);
        assert_eq!(run.count(OpCode::CallI), 1);
    }
}

mod forwarding {
    use super::*;
    use pretty_assertions::assert_eq;

    /// `o.m.call(o, x, x)` with no profile for `m`
    const CALL: &str = r#"{
        "entry": "f",
        "functions": [
            { "body": { "name": "f", "function_number": 1, "in_params_count": 2, "locals_count": 8 },
              "call_sites": { "0": "call" },
              "ir": [
                { "op": "ArgIn", "dst": "r0", "slot": 1 },
                { "op": "ArgIn", "dst": "r3", "slot": 2 },
                { "op": "LdFldForCallApplyTarget", "dst": "r1", "field": { "object": "r0", "property": 1, "cache": 3 } },
                { "op": "LdMethodFld", "dst": "r2", "field": { "object": "r1", "property": 2, "cache": 4 } },
                { "op": "CallI", "dst": "r4", "src1": "r2", "args": ["r1", "r0", "r3", "r3"], "profile": 0 },
                { "op": "Ret", "src1": "r4" }
              ] }
        ],
        "natives": [ { "name": "call", "builtin": "function_call" } ]
    }"#;

    #[test]
    fn test_call_drops_the_forwarder() {
        let run = Scenario::from_json(CALL).run();
        assert_eq!(run.stats.apply_call, 1);
        assert_eq!(run.count(OpCode::CallI), 1);
        let top = run.job.top();
        let call = run
            .job
            .func_instrs(top)
            .into_iter()
            .find(|i| run.job.opcode(*i) == OpCode::CallI)
            .unwrap();
        assert_eq!(run.job.call_arg_slot(call), Some(3));
        assert!(run.count(OpCode::InlineBuiltInStart) >= 1);
    }

    #[test]
    fn test_call_switched_off() {
        let run = Scenario::from_json(CALL)
            .config(InlinerConfig {
                inline_call: false,
                ..InlinerConfig::default()
            })
            .run();
        assert_eq!(run.stats.apply_call, 0);
    }
}

mod accessors {
    use super::*;
    use pretty_assertions::assert_eq;

    const GETTER: &str = r##"{
        "entry": "f",
        "functions": [
            { "body": { "name": "f", "function_number": 1, "in_params_count": 2, "locals_count": 4 },
              "ldfld_inlinees": { "9": "get_x" },
              "ir": [
                { "op": "ArgIn", "dst": "r0", "slot": 2 },
                { "op": "LdFld", "dst": "r1", "field": { "object": "r0", "property": 1, "cache": 9, "accessor": true } },
                { "op": "Ret", "src1": "r1" }
              ] },
            { "body": { "name": "get_x", "function_number": 2, "in_params_count": 1 },
              "ir": [
                { "op": "LdConstI4", "dst": "r1", "src1": "#42" },
                { "op": "Ret", "src1": "r1" }
              ] }
        ]
    }"##;

    #[test]
    fn test_getter_is_inlined() {
        let run = Scenario::from_json(GETTER).run();
        assert_eq!(run.stats.accessors, 1);
        assert_eq!(run.count(OpCode::InlineeStart), 1);
        assert_eq!(run.count(OpCode::LdFld), 0);
        let top = run.job.top();
        let start = run
            .job
            .func_instrs(top)
            .into_iter()
            .find(|i| run.job.opcode(*i) == OpCode::InlineeStart)
            .unwrap();
        assert!(run.job.func(run.job.instr(start).func).is_getter_setter());
    }

    #[test]
    fn test_getters_switched_off() {
        let run = Scenario::from_json(GETTER)
            .config(InlinerConfig {
                inline_getters: false,
                ..InlinerConfig::default()
            })
            .run();
        assert_eq!(run.stats.accessors, 0);
        assert_eq!(run.count(OpCode::LdFld), 1);
    }

    #[test]
    fn test_dom_getter_uses_fast_path() {
        let json = r#"{
            "entry": "f",
            "functions": [
                { "body": { "name": "f", "function_number": 1, "in_params_count": 2, "locals_count": 4 },
                  "ldfld_inlinees": { "9": "innerHTML" },
                  "ir": [
                    { "op": "ArgIn", "dst": "r0", "slot": 2 },
                    { "op": "LdFld", "dst": "r1", "field": { "object": "r0", "property": 7, "cache": 9, "accessor": true } },
                    { "op": "Ret", "src1": "r1" }
                  ] }
            ],
            "natives": [ { "name": "innerHTML", "function_info": 8192, "dom_fast_path": 5 } ]
        }"#;
        let run = Scenario::from_json(json).run();
        assert_eq!(run.stats.dom_getters, 1);
        assert_eq!(run.count(OpCode::DomFastPathGetter), 1);
        assert_eq!(run.count(OpCode::InlineeStart), 0);
    }
}

mod constructors {
    use super::*;
    use pretty_assertions::assert_eq;

    const NEW_POINT: &str = r#"{
        "entry": "f",
        "functions": [
            { "body": { "name": "f", "function_number": 1, "in_params_count": 2, "locals_count": 4 },
              "call_sites": { "0": "Point" },
              "ir": [
                { "op": "ArgIn", "dst": "r1", "slot": 2 },
                { "op": "NewScObject", "dst": "r2", "src1": "r0", "args": ["r1"], "profile": 0 },
                { "op": "Ret", "src1": "r2" }
              ] },
            { "body": { "name": "Point", "function_number": 2, "in_params_count": 2 },
              "ir": [
                { "op": "ArgIn", "dst": "r0", "slot": 1 },
                { "op": "ArgIn", "dst": "r1", "slot": 2 },
                { "op": "StFld", "src1": "r1", "field": { "object": "r0", "property": 3 } },
                { "op": "Ret", "src1": "r0" }
              ] }
        ]
    }"#;

    #[test]
    fn test_constructor_is_split_and_inlined() {
        let run = Scenario::from_json(NEW_POINT).run();
        assert_eq!(run.stats.inlined, 1);
        assert_eq!(run.stats.ctor_splits, 1);
        assert_eq!(run.count(OpCode::NewScObjectNoCtor), 1);
        assert_eq!(run.count(OpCode::NewScObject), 0);
        assert!(run.position(OpCode::NewScObjectNoCtor).unwrap() < run.position(OpCode::InlineeStart).unwrap());
    }

    #[test]
    fn test_constructors_switched_off() {
        let run = Scenario::from_json(NEW_POINT)
            .config(InlinerConfig {
                inline_constructors: false,
                ..InlinerConfig::default()
            })
            .run();
        assert_eq!(run.stats.inlined, 0);
        assert_eq!(run.count(OpCode::NewScObject), 1);
    }
}

mod folding {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_constant_argument_expression_folds() {
        let f = with_site(
            script(
                "f",
                1,
                1,
                vec![
                    arg_in("r0", 1),
                    ld_const("r1", 3),
                    ld_const("r2", 4),
                    binary("Add", "r3", "r1", "r2"),
                    call(Some("r5"), "r4", &["r0", "r3"], Some(0)),
                    ret("r5"),
                ],
            ),
            0,
            "g",
        );
        let g = script("g", 2, 2, vec![arg_in("r0", 2), ret("r0")]);
        let run = Scenario::new("f").function(f).function(g).run();

        assert_eq!(run.stats.const_folds, 1);
        assert_eq!(run.stats.inlined, 1);
        assert_eq!(run.count(OpCode::Add), 0);
        let top = run.job.top();
        let folded = run
            .job
            .func_instrs(top)
            .into_iter()
            .any(|i| run.job.opcode(i) == OpCode::LdConstI4 && run.job.instr(i).src1 == Some(Operand::IntConst(7)));
        assert!(folded);
    }
}
