//! Pipeline-level properties: placeholder hygiene, recursion bounds, and
//! focus-path resolution.

mod helpers;

use std::rc::Rc;

use helpers::{PY38, asm, code, decompile};
use pez::opcode::Opcode::{
    GetIter, JumpAbsolute, LoadConst, LoadName, MakeFunction, PopJumpIfFalse, ReturnValue, StoreName,
};
use pez::{Code, FocusPath, Object};

/// No internal placeholder name may survive into rendered source.
#[test]
fn placeholders_never_leak() {
    let code = code(
        PY38,
        "<module>",
        &[
            (LoadName, 0),          // xs
            (GetIter, 0),
            (pez::opcode::Opcode::ForIter, 8),
            (StoreName, 1),
            (LoadName, 1),
            (StoreName, 2),
            (JumpAbsolute, 4),
            (LoadConst, 0),
            (ReturnValue, 0),
        ],
        vec![Object::None],
        &["xs", "i", "y"],
        &[],
    );
    let source = decompile(&code, PY38);
    for marker in ["__loop_value__", "__unknown__", "__exception__", "__with_exit__", "__for_iter__"] {
        assert!(!source.contains(marker), "leaked {marker} in:\n{source}");
    }
}

/// Nesting beyond the recursion guard fails cleanly instead of blowing the
/// stack.
#[test]
fn recursion_guard_trips() {
    // Build a chain of code objects each defining the next: f = lambda-ish
    // def chain deeper than the guard.
    let mut inner = Rc::new(Code {
        name: "leaf".to_owned(),
        code_bytes: asm(PY38, &[(LoadConst, 0), (ReturnValue, 0)]),
        consts: vec![Object::None],
        ..Code::default()
    });
    for depth in 0..140 {
        inner = Rc::new(Code {
            name: format!("level{depth}"),
            code_bytes: asm(
                PY38,
                &[
                    (LoadConst, 0),
                    (LoadConst, 1),
                    (MakeFunction, 0),
                    (StoreName, 0),
                    (LoadConst, 2),
                    (ReturnValue, 0),
                ],
            ),
            consts: vec![
                Object::Code(Rc::clone(&inner)),
                Object::String("f".into()),
                Object::None,
            ],
            names: vec![Rc::from("f")],
            ..Code::default()
        });
    }
    let mut tracer = pez::NoopTracer;
    let error = pez::decompile_code(&inner, PY38, &mut tracer).unwrap_err();
    assert!(matches!(error.kind, pez::DecompileErrorKind::RecursionLimit(_)));
}

#[test]
fn focus_path_walks_nested_names() {
    let leaf = Rc::new(Code {
        name: "inner".to_owned(),
        code_bytes: asm(PY38, &[(LoadConst, 0), (ReturnValue, 0)]),
        consts: vec![Object::None],
        ..Code::default()
    });
    let outer = Rc::new(Code {
        name: "outer".to_owned(),
        code_bytes: asm(PY38, &[(LoadConst, 1), (ReturnValue, 0)]),
        consts: vec![Object::Code(Rc::clone(&leaf)), Object::None],
        ..Code::default()
    });
    let module = Rc::new(Code {
        name: "<module>".to_owned(),
        code_bytes: asm(PY38, &[(LoadConst, 1), (ReturnValue, 0)]),
        consts: vec![Object::Code(Rc::clone(&outer)), Object::None],
        ..Code::default()
    });

    let path = FocusPath::parse("outer.inner").expect("valid path");
    let resolved = path.resolve(&module).expect("resolves");
    assert!(Rc::ptr_eq(&resolved, &leaf));

    let missing = FocusPath::parse("outer.nope").expect("valid path");
    let error = missing.resolve(&module).unwrap_err();
    assert!(matches!(error.kind, pez::DecompileErrorKind::FocusNotFound(_)));
}

#[test]
fn ambiguous_focus_is_rejected() {
    let twin = |name: &str| {
        Rc::new(Code {
            name: name.to_owned(),
            code_bytes: asm(PY38, &[(LoadConst, 0), (ReturnValue, 0)]),
            consts: vec![Object::None],
            ..Code::default()
        })
    };
    let module = Rc::new(Code {
        name: "<module>".to_owned(),
        code_bytes: asm(PY38, &[(LoadConst, 2), (ReturnValue, 0)]),
        consts: vec![
            Object::Code(twin("f")),
            Object::Code(twin("f")),
            Object::None,
        ],
        ..Code::default()
    });
    let path = FocusPath::parse("f").expect("valid path");
    let error = path.resolve(&module).unwrap_err();
    assert!(matches!(error.kind, pez::DecompileErrorKind::AmbiguousFocus(_)));
}

/// A conditional whose arms disagree on the produced value still renders:
/// the join becomes unknown in dataflow but the ternary emitter resolves it
/// as an expression before the merge consumes it.
#[test]
fn disagreeing_arms_resolve_via_ternary() {
    let code = code(
        PY38,
        "<module>",
        &[
            (LoadName, 0),          // 0: c
            (PopJumpIfFalse, 8),    // 2
            (LoadConst, 1),         // 4: 1
            (pez::opcode::Opcode::JumpForward, 2), // 6 -> 10
            (LoadConst, 2),         // 8: 2
            (StoreName, 1),         // 10: x
            (LoadConst, 0),         // 12
            (ReturnValue, 0),       // 14
        ],
        vec![Object::None, Object::Int(1), Object::Int(2)],
        &["c", "x"],
        &[],
    );
    assert_eq!(decompile(&code, PY38), "x = 1 if c else 2\n");
}
