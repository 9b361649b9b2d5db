use deas_lib::{
    DeasError, DecompileMode, DecompileOptions, Decompiler, Expr, Instruction, Opcode, Outcome, Program, RuleContext,
    Statement, TranslationRule, decompile_json,
};

const COUNTER: &[u8] = br#"{
    "constants": [{ "String": "i" }],
    "code": [
        { "opcode": "PushData", "operands": [{ "Constant": 0 }, { "Integer": 0 }] },
        { "opcode": "SetVariable" },
        { "opcode": "PushData", "operands": [{ "Constant": 0 }] },
        { "opcode": "GetVariable" },
        { "opcode": "PushData", "operands": [{ "Integer": 3 }] },
        { "opcode": "LessThan2" },
        { "opcode": "LogicalNot" },
        { "opcode": "BranchIfTrue", "operands": [{ "Integer": 5 }] },
        { "opcode": "PushData", "operands": [{ "Constant": 0 }, { "Constant": 0 }] },
        { "opcode": "GetVariable" },
        { "opcode": "Increment" },
        { "opcode": "SetVariable" },
        { "opcode": "BranchAlways", "operands": [{ "Integer": -11 }] },
        { "opcode": "End" }
    ]
}"#;

fn options(mode: DecompileMode) -> DecompileOptions {
    DecompileOptions { mode, ..Default::default() }
}

#[test]
fn test_counter_loop() {
    let out = decompile_json(COUNTER, DecompileOptions::default()).unwrap();
    assert_eq!(out, "i = 0;\nwhile (i < 3) {\n    i = i + 1;\n}\n");
}

#[test]
fn test_counter_loop_indent_width() {
    let out = decompile_json(COUNTER, DecompileOptions { indent_width: 2, ..Default::default() }).unwrap();
    assert_eq!(out, "i = 0;\nwhile (i < 3) {\n  i = i + 1;\n}\n");
}

#[test]
fn test_structure_and_disasm_modes() {
    let tree = decompile_json(COUNTER, options(DecompileMode::Structure)).unwrap();
    assert!(tree.starts_with("Sequential [#0, end]\n"));
    assert!(tree.contains("Loop [#1, #2]"));

    let disasm = decompile_json(COUNTER, options(DecompileMode::Disasm)).unwrap();
    assert!(disasm.contains("BranchIfTrue 5"));
    assert!(disasm.contains("block #3"));
}

#[test]
fn test_function_definition_and_call() {
    let json = br#"{
        "code": [
            { "opcode": "DefineFunction2", "function": {
                "name": "sum",
                "params": [{ "name": "a", "register": 1 }, { "name": "b", "register": 2 }],
                "body": [
                    { "opcode": "PushData", "operands": [{ "Register": 1 }, { "Register": 2 }] },
                    { "opcode": "Add2" },
                    { "opcode": "Return" }
                ]
            } },
            { "opcode": "PushData", "operands": [
                { "String": "r" }, { "Integer": 2 }, { "Integer": 1 }, { "Integer": 2 }, { "String": "sum" }
            ] },
            { "opcode": "CallFunction" },
            { "opcode": "SetVariable" }
        ]
    }"#;
    let out = decompile_json(json, DecompileOptions::default()).unwrap();
    assert_eq!(out, "function sum(a, b) {\n    return a + b;\n}\nr = sum(1, 2);\n");
}

const ENTERS_LOOP_BODY: &[u8] = br#"{
    "code": [
        { "opcode": "PushData", "operands": [{ "Boolean": true }] },
        { "opcode": "BranchIfTrue", "operands": [{ "Integer": 1 }] },
        { "opcode": "Play" },
        { "opcode": "Stop" },
        { "opcode": "BranchAlways", "operands": [{ "Integer": -3 }] },
        { "opcode": "End" }
    ]
}"#;

#[test]
fn test_reducibility_check() {
    let err = decompile_json(ENTERS_LOOP_BODY, DecompileOptions { check_reducibility: true, ..Default::default() })
        .unwrap_err();
    assert!(matches!(err, DeasError::IrreducibleLoop { header: 1, block: 2 }));
    assert!(err.is_structural());
}

#[test]
fn test_constant_out_of_range() {
    let json = br#"{ "code": [{ "opcode": "PushData", "operands": [{ "Constant": 3 }] }] }"#;
    let err = decompile_json(json, DecompileOptions::default()).unwrap_err();
    assert!(matches!(err, DeasError::ConstantOutOfRange { index: 3, len: 0 }));
    assert!(!err.is_structural());
}

#[test]
fn test_invalid_branch_target() {
    let json = br#"{ "code": [{ "opcode": "BranchAlways", "operands": [{ "Integer": 40 }] }] }"#;
    let err = decompile_json(json, DecompileOptions::default()).unwrap_err();
    assert!(matches!(err, DeasError::InvalidBranchTarget { position: 0, target: 41 }));
}

#[test]
fn test_custom_rule() {
    struct TraceAsLog;

    impl TranslationRule for TraceAsLog {
        fn translate(&self, cx: &mut RuleContext<'_>, inst: &Instruction) -> Result<Outcome, DeasError> {
            if inst.opcode != Opcode::Trace {
                return Ok(Outcome::Unhandled);
            }
            let value = cx.pop();
            Ok(Outcome::Emit(Statement::Expression(Expr::call(Expr::name("log"), vec![value]))))
        }
    }

    let json = br#"{
        "constants": [{ "String": "ready" }],
        "code": [
            { "opcode": "PushData", "operands": [{ "Constant": 0 }] },
            { "opcode": "Trace" }
        ]
    }"#;
    let program = Program::from_json(json).unwrap();
    let out = Decompiler::default().with_rule(TraceAsLog).decompile_program(&program).unwrap();
    assert_eq!(out, "log(\"ready\");\n");

    let plain = Decompiler::default().decompile_program(&program).unwrap();
    assert_eq!(plain, "trace(\"ready\");\n");
}
