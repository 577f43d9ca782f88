//! End-to-end decompilation of hand-assembled code objects.
//!
//! Fixtures are encoded through the decoder's own tables (see
//! `helpers::asm`), so every test exercises decode → CFG → dataflow →
//! structural emission → codegen as one pipeline.

mod helpers;

use helpers::{PY27, PY38, asm, code, decompile};
use pez::opcode::Opcode::*;
use pez::{Code, Object};
use pretty_assertions::assert_eq;
use std::rc::Rc;

#[test]
fn empty_function_elides_return_none() {
    let code = code(PY38, "f", &[(LoadConst, 0), (ReturnValue, 0)], vec![Object::None], &[], &[]);
    assert_eq!(decompile(&code, PY38), "pass\n");
}

#[test]
fn straight_line_assignment() {
    let code = code(
        PY38,
        "<module>",
        &[
            (LoadConst, 1),
            (StoreName, 0),
            (LoadConst, 0),
            (ReturnValue, 0),
        ],
        vec![Object::None, Object::Int(1)],
        &["x"],
        &[],
    );
    assert_eq!(decompile(&code, PY38), "x = 1\n");
}

#[test]
fn if_without_else() {
    // if a: x = 1
    let code = code(
        PY38,
        "<module>",
        &[
            (LoadName, 0),          // 0
            (PopJumpIfFalse, 8),    // 2
            (LoadConst, 1),         // 4
            (StoreName, 1),         // 6
            (LoadConst, 0),         // 8
            (ReturnValue, 0),       // 10
        ],
        vec![Object::None, Object::Int(1)],
        &["a", "x"],
        &[],
    );
    assert_eq!(decompile(&code, PY38), "if a:\n    x = 1\n");
}

#[test]
fn if_elif_else_collapses() {
    let code = code(
        PY38,
        "<module>",
        &[
            (LoadName, 0),          // 0: a
            (PopJumpIfFalse, 10),   // 2
            (LoadConst, 1),         // 4
            (StoreName, 2),         // 6: x = 1
            (JumpForward, 14),      // 8 -> 24
            (LoadName, 1),          // 10: b
            (PopJumpIfFalse, 20),   // 12
            (LoadConst, 2),         // 14
            (StoreName, 2),         // 16: x = 2
            (JumpForward, 4),       // 18 -> 24
            (LoadConst, 3),         // 20
            (StoreName, 2),         // 22: x = 3
            (LoadConst, 0),         // 24
            (ReturnValue, 0),       // 26
        ],
        vec![Object::None, Object::Int(1), Object::Int(2), Object::Int(3)],
        &["a", "b", "x"],
        &[],
    );
    assert_eq!(
        decompile(&code, PY38),
        "if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n"
    );
}

#[test]
fn ternary_feeds_single_store() {
    // x = a if c else b
    let code = code(
        PY38,
        "<module>",
        &[
            (LoadName, 0),          // 0: c
            (PopJumpIfFalse, 8),    // 2
            (LoadName, 1),          // 4: a
            (JumpForward, 2),       // 6 -> 10
            (LoadName, 2),          // 8: b
            (StoreName, 3),         // 10: x
            (LoadConst, 0),         // 12
            (ReturnValue, 0),       // 14
        ],
        vec![Object::None],
        &["c", "a", "b", "x"],
        &[],
    );
    assert_eq!(decompile(&code, PY38), "x = a if c else b\n");
}

#[test]
fn bool_op_value() {
    // x = a and b
    let code = code(
        PY38,
        "<module>",
        &[
            (LoadName, 0),           // 0: a
            (JumpIfFalseOrPop, 6),   // 2
            (LoadName, 1),           // 4: b
            (StoreName, 2),          // 6: x
            (LoadConst, 0),          // 8
            (ReturnValue, 0),        // 10
        ],
        vec![Object::None],
        &["a", "b", "x"],
        &[],
    );
    assert_eq!(decompile(&code, PY38), "x = a and b\n");
}

#[test]
fn while_loop() {
    let code = code(
        PY38,
        "<module>",
        &[
            (LoadName, 0),          // 0: a
            (PopJumpIfFalse, 10),   // 2
            (LoadConst, 1),         // 4
            (StoreName, 1),         // 6: x = 1
            (JumpAbsolute, 0),      // 8
            (LoadConst, 0),         // 10
            (ReturnValue, 0),       // 12
        ],
        vec![Object::None, Object::Int(1)],
        &["a", "x"],
        &[],
    );
    assert_eq!(decompile(&code, PY38), "while a:\n    x = 1\n");
}

#[test]
fn for_loop_extracts_target() {
    let code = code(
        PY38,
        "<module>",
        &[
            (LoadName, 0),      // 0: xs
            (GetIter, 0),       // 2
            (ForIter, 8),       // 4 -> exit 14
            (StoreName, 1),     // 6: i
            (LoadName, 1),      // 8
            (StoreName, 2),     // 10: y = i
            (JumpAbsolute, 4),  // 12
            (LoadConst, 0),     // 14
            (ReturnValue, 0),   // 16
        ],
        vec![Object::None],
        &["xs", "i", "y"],
        &[],
    );
    assert_eq!(decompile(&code, PY38), "for i in xs:\n    y = i\n");
}

#[test]
fn import_statement() {
    let code = code(
        PY38,
        "<module>",
        &[
            (LoadConst, 1),     // 0: level 0
            (LoadConst, 0),     // 2: fromlist None
            (ImportName, 0),    // 4: os
            (StoreName, 0),     // 6
            (LoadConst, 0),     // 8
            (ReturnValue, 0),   // 10
        ],
        vec![Object::None, Object::Int(0)],
        &["os"],
        &[],
    );
    assert_eq!(decompile(&code, PY38), "import os\n");
}

#[test]
fn import_from_groups_names() {
    let names: Rc<[Object]> = vec![Object::String("a".into()), Object::String("b".into())].into();
    let code = code(
        PY38,
        "<module>",
        &[
            (LoadConst, 1),     // 0: level 0
            (LoadConst, 2),     // 2: ('a', 'b')
            (ImportName, 0),    // 4: m
            (ImportFrom, 1),    // 6
            (StoreName, 1),     // 8: a
            (ImportFrom, 2),    // 10
            (StoreName, 2),     // 12: b
            (PopTop, 0),        // 14
            (LoadConst, 0),     // 16
            (ReturnValue, 0),   // 18
        ],
        vec![Object::None, Object::Int(0), Object::Tuple(names)],
        &["m", "a", "b"],
        &[],
    );
    assert_eq!(decompile(&code, PY38), "from m import a, b\n");
}

#[test]
fn chained_assignment_shares_value() {
    // a = b = 1
    let code = code(
        PY38,
        "<module>",
        &[
            (LoadConst, 1),
            (DupTop, 0),
            (StoreName, 0),
            (StoreName, 1),
            (LoadConst, 0),
            (ReturnValue, 0),
        ],
        vec![Object::None, Object::Int(1)],
        &["a", "b"],
        &[],
    );
    assert_eq!(decompile(&code, PY38), "a = b = 1\n");
}

#[test]
fn tuple_unpacking_assignment() {
    // a, b = xs
    let code = code(
        PY38,
        "<module>",
        &[
            (LoadName, 0),
            (UnpackSequence, 2),
            (StoreName, 1),
            (StoreName, 2),
            (LoadConst, 0),
            (ReturnValue, 0),
        ],
        vec![Object::None],
        &["xs", "a", "b"],
        &[],
    );
    assert_eq!(decompile(&code, PY38), "a, b = xs\n");
}

#[test]
fn augmented_assignment() {
    // x += 1
    let code = code(
        PY38,
        "<module>",
        &[
            (LoadName, 0),
            (LoadConst, 1),
            (InplaceAdd, 0),
            (StoreName, 0),
            (LoadConst, 0),
            (ReturnValue, 0),
        ],
        vec![Object::None, Object::Int(1)],
        &["x"],
        &[],
    );
    assert_eq!(decompile(&code, PY38), "x += 1\n");
}

#[test]
fn method_call_expression_statement() {
    // xs.append(1)
    let code = code(
        PY38,
        "<module>",
        &[
            (LoadName, 0),
            (LoadMethod, 1),
            (LoadConst, 1),
            (CallMethod, 1),
            (PopTop, 0),
            (LoadConst, 0),
            (ReturnValue, 0),
        ],
        vec![Object::None, Object::Int(1)],
        &["xs", "append"],
        &[],
    );
    assert_eq!(decompile(&code, PY38), "xs.append(1)\n");
}

#[test]
fn try_except_typed_handler() {
    // 2.7: try: x = 1 / except ValueError: x = 2
    let code = code(
        PY27,
        "<module>",
        &[
            (SetupExcept, 10),     // 0 -> handler 13
            (LoadConst, 1),        // 3
            (StoreName, 1),        // 6: x = 1
            (PopBlock, 0),         // 9
            (JumpForward, 23),     // 10 -> 36
            (DupTop, 0),           // 13
            (LoadGlobal, 0),       // 14: ValueError
            (CompareOp, 10),       // 17: exception match
            (PopJumpIfFalse, 35),  // 20
            (PopTop, 0),           // 23
            (PopTop, 0),           // 24
            (PopTop, 0),           // 25
            (LoadConst, 2),        // 26
            (StoreName, 1),        // 29: x = 2
            (JumpForward, 1),      // 32 -> 36
            (EndFinally, 0),       // 35
            (LoadConst, 0),        // 36
            (ReturnValue, 0),      // 39
        ],
        vec![Object::None, Object::Int(1), Object::Int(2)],
        &["ValueError", "x"],
        &[],
    );
    assert_eq!(
        decompile(&code, PY27),
        "try:\n    x = 1\nexcept ValueError:\n    x = 2\n"
    );
}

#[test]
fn print_statement_merges_items() {
    // print a, b
    let code = code(
        PY27,
        "<module>",
        &[
            (LoadName, 0),
            (PrintItem, 0),
            (LoadName, 1),
            (PrintItem, 0),
            (PrintNewline, 0),
            (LoadConst, 0),
            (ReturnValue, 0),
        ],
        vec![Object::None],
        &["a", "b"],
        &[],
    );
    assert_eq!(decompile(&code, PY27), "print a, b\n");
}

#[test]
fn list_comprehension_from_nested_code() {
    // xs = [i for i in range(3)]
    let nested = Rc::new(Code {
        name: "<listcomp>".to_owned(),
        code_bytes: asm(
            PY38,
            &[
                (BuildList, 0),     // 0
                (LoadFast, 0),      // 2: .0
                (ForIter, 8),       // 4 -> 14
                (StoreFast, 1),     // 6: i
                (LoadFast, 1),      // 8
                (ListAppend, 2),    // 10
                (JumpAbsolute, 4),  // 12
                (ReturnValue, 0),   // 14
            ],
        ),
        varnames: vec![Rc::from(".0"), Rc::from("i")],
        nlocals: 2,
        argcount: 1,
        ..Code::default()
    });
    let code = code(
        PY38,
        "<module>",
        &[
            (LoadConst, 0),       // 0: <listcomp> code
            (LoadConst, 1),       // 2: qualname
            (MakeFunction, 0),    // 4
            (LoadName, 0),        // 6: range
            (LoadConst, 2),       // 8: 3
            (CallFunction, 1),    // 10
            (GetIter, 0),         // 12
            (CallFunction, 1),    // 14
            (StoreName, 1),       // 16: xs
            (LoadConst, 3),       // 18
            (ReturnValue, 0),     // 20
        ],
        vec![
            Object::Code(nested),
            Object::String("<listcomp>".into()),
            Object::Int(3),
            Object::None,
        ],
        &["range", "xs"],
        &[],
    );
    assert_eq!(decompile(&code, PY38), "xs = [i for i in range(3)]\n");
}

#[test]
fn function_def_with_default() {
    // def f(a, b=2): return a
    let nested = Rc::new(Code {
        name: "f".to_owned(),
        code_bytes: asm(PY38, &[(LoadFast, 0), (ReturnValue, 0)]),
        consts: vec![Object::None],
        varnames: vec![Rc::from("a"), Rc::from("b")],
        nlocals: 2,
        argcount: 2,
        ..Code::default()
    });
    let defaults: Rc<[Object]> = vec![Object::Int(2)].into();
    let code = code(
        PY38,
        "<module>",
        &[
            (LoadConst, 1),       // 0: (2,) defaults
            (LoadConst, 0),       // 2: code
            (LoadConst, 2),       // 4: qualname
            (MakeFunction, 1),    // 6
            (StoreName, 0),       // 8: f
            (LoadConst, 3),       // 10
            (ReturnValue, 0),     // 12
        ],
        vec![
            Object::Code(nested),
            Object::Tuple(defaults),
            Object::String("f".into()),
            Object::None,
        ],
        &["f"],
        &[],
    );
    assert_eq!(decompile(&code, PY38), "def f(a, b=2):\n    return a\n");
}

#[test]
fn lambda_resolves_inline() {
    // f = lambda v: v
    let nested = Rc::new(Code {
        name: "<lambda>".to_owned(),
        code_bytes: asm(PY38, &[(LoadFast, 0), (ReturnValue, 0)]),
        consts: vec![Object::None],
        varnames: vec![Rc::from("v")],
        nlocals: 1,
        argcount: 1,
        ..Code::default()
    });
    let code = code(
        PY38,
        "<module>",
        &[
            (LoadConst, 0),
            (LoadConst, 1),
            (MakeFunction, 0),
            (StoreName, 0),
            (LoadConst, 2),
            (ReturnValue, 0),
        ],
        vec![
            Object::Code(nested),
            Object::String("<lambda>".into()),
            Object::None,
        ],
        &["f"],
        &[],
    );
    assert_eq!(decompile(&code, PY38), "f = lambda v: v\n");
}

#[test]
fn break_in_while_body() {
    // while a: break
    let code = code(
        PY38,
        "<module>",
        &[
            (LoadName, 0),          // 0
            (PopJumpIfFalse, 8),    // 2
            (JumpAbsolute, 8),      // 4: break (jump out of loop)
            (JumpAbsolute, 0),      // 6: latch
            (LoadConst, 0),         // 8
            (ReturnValue, 0),       // 10
        ],
        vec![Object::None],
        &["a"],
        &[],
    );
    assert_eq!(decompile(&code, PY38), "while a:\n    break\n");
}

#[test]
fn chained_comparison_remerges() {
    // if a < b < c: x = 1
    // The chain duplicates b, short-circuits through an or-pop, and cleans
    // the duplicate up on the short path; it must come back as one
    // comparison with two operators.
    let code = code(
        PY38,
        "<module>",
        &[
            (LoadName, 0),            // 0: a
            (LoadName, 1),            // 2: b
            (DupTop, 0),              // 4
            (RotThree, 0),            // 6
            (CompareOp, 0),           // 8: <
            (JumpIfFalseOrPop, 18),   // 10
            (LoadName, 2),            // 12: c
            (CompareOp, 0),           // 14: <
            (JumpForward, 4),         // 16 -> 22
            (RotTwo, 0),              // 18
            (PopTop, 0),              // 20
            (PopJumpIfFalse, 28),     // 22
            (LoadConst, 1),           // 24
            (StoreName, 3),           // 26: x = 1
            (LoadConst, 0),           // 28
            (ReturnValue, 0),         // 30
        ],
        vec![Object::None, Object::Int(1)],
        &["a", "b", "c", "x"],
        &[],
    );
    assert_eq!(decompile(&code, PY38), "if a < b < c:\n    x = 1\n");
}

/// Determinism: identical inputs render identical text (the driver has no
/// hash-order dependence on any emission path).
#[test]
fn decompilation_is_deterministic() {
    let build = || {
        code(
            PY38,
            "<module>",
            &[
                (LoadName, 0),
                (PopJumpIfFalse, 10),
                (LoadConst, 1),
                (StoreName, 2),
                (JumpForward, 4),
                (LoadConst, 2),
                (StoreName, 2),
                (LoadConst, 0),
                (ReturnValue, 0),
            ],
            vec![Object::None, Object::Int(1), Object::Int(2)],
            &["a", "b", "x"],
            &[],
        )
    };
    let first = decompile(&build(), PY38);
    let second = decompile(&build(), PY38);
    assert_eq!(first, second);
}
