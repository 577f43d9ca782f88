//! `match` statement reconstruction on modern bytecode.

mod helpers;

use helpers::{PY312, code, decompile};
use pez::Object;
use pez::opcode::Opcode::{
    CompareOp, Copy, JumpForward, LoadConst, LoadName, PopJumpIfFalse, PopJumpIfTrue, PopTop, ReturnConst, StoreName,
};
use pretty_assertions::assert_eq;

#[test]
fn or_pattern_collapses_to_one_case() {
    // match x:
    //     case 1 | 2 | 3: y = 10
    //     case _: y = 20
    //
    // The subject is duplicated before every equality test, which is the
    // discriminator against a hand-written `if x == 1 or ...`.
    let code = code(
        PY312,
        "<module>",
        &[
            (LoadName, 0),         // 0: x
            (Copy, 1),             // 2
            (LoadConst, 0),        // 4: 1
            (CompareOp, 32),       // 6 (+cache): ==
            (PopJumpIfTrue, 10),   // 10 -> 32
            (Copy, 1),             // 12
            (LoadConst, 1),        // 14: 2
            (CompareOp, 32),       // 16
            (PopJumpIfTrue, 5),    // 20 -> 32
            (Copy, 1),             // 22
            (LoadConst, 2),        // 24: 3
            (CompareOp, 32),       // 26
            (PopJumpIfFalse, 4),   // 30 -> 40
            (PopTop, 0),           // 32
            (LoadConst, 3),        // 34: 10
            (StoreName, 1),        // 36: y
            (JumpForward, 3),      // 38 -> 46
            (PopTop, 0),           // 40
            (LoadConst, 4),        // 42: 20
            (StoreName, 1),        // 44: y
            (ReturnConst, 5),      // 46
        ],
        vec![
            Object::Int(1),
            Object::Int(2),
            Object::Int(3),
            Object::Int(10),
            Object::Int(20),
            Object::None,
        ],
        &["x", "y"],
        &[],
    );
    assert_eq!(
        decompile(&code, PY312),
        "match x:\n    case 1 | 2 | 3:\n        y = 10\n    case _:\n        y = 20\n"
    );
}

#[test]
fn reloaded_subject_stays_an_if() {
    // if x == 1 or x == 2: y = 10
    // Reloading x (no COPY) must NOT read back as a match statement.
    let code = code(
        PY312,
        "<module>",
        &[
            (LoadName, 0),         // 0: x
            (LoadConst, 0),        // 2: 1
            (CompareOp, 32),       // 4 (+cache)
            (PopJumpIfTrue, 5),    // 8 -> 20
            (LoadName, 0),         // 10
            (LoadConst, 1),        // 12: 2
            (CompareOp, 32),       // 14
            (PopJumpIfFalse, 2),   // 18 -> 24
            (LoadConst, 2),        // 20: 10
            (StoreName, 1),        // 22: y
            (ReturnConst, 3),      // 24
        ],
        vec![Object::Int(1), Object::Int(2), Object::Int(10), Object::None],
        &["x", "y"],
        &[],
    );
    assert_eq!(
        decompile(&code, PY312),
        "if x == 1 or x == 2:\n    y = 10\n"
    );
}
