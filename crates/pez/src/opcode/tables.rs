//! Byte → opcode mapping, one table per bytecode family.
//!
//! CPython renumbered its opcode space several times; the decoder picks the
//! family from the version and the family function maps raw bytes onto the
//! semantic [`Opcode`] enum. Bytes outside a family's table mean the file
//! was compiled by an interpreter this table does not know; the decoder
//! surfaces them as unsupported rather than guessing.

use super::Opcode;
use crate::version::PythonVersion;

/// First byte value that carries an operand, per family.
#[must_use]
pub fn have_argument(version: PythonVersion) -> u8 {
    if version.gte(3, 13) { 44 } else { 90 }
}

/// Resolves a raw opcode byte for `version`.
#[must_use]
pub fn lookup(version: PythonVersion, byte: u8) -> Option<Opcode> {
    if version.is_legacy() {
        classic(version, byte)
    } else if version.lt(3, 6) {
        py3_early(version, byte)
    } else if version.lt(3, 11) {
        py3_word(version, byte)
    } else if version.lt(3, 12) {
        py311(byte)
    } else if version.lt(3, 13) {
        py312(byte)
    } else {
        py313(byte)
    }
}

/// Reverse lookup, used by the test assembler so fixtures are encoded with
/// the same table the decoder reads them with.
#[must_use]
pub fn byte_for(version: PythonVersion, opcode: Opcode) -> Option<u8> {
    (0..=u8::MAX).find(|&byte| lookup(version, byte) == Some(opcode))
}

/// Number of two-byte `CACHE` slots following an instruction (3.11+).
#[must_use]
pub fn cache_entries(version: PythonVersion, opcode: Opcode) -> u32 {
    use Opcode as Op;
    if version.lt(3, 11) {
        return 0;
    }
    if version.lt(3, 12) {
        match opcode {
            Op::LoadGlobal => 5,
            Op::LoadMethod => 10,
            Op::BinarySubscr | Op::LoadAttr | Op::StoreAttr | Op::Call => 4,
            Op::CompareOp => 2,
            Op::BinaryOp | Op::UnpackSequence | Op::ForIter | Op::StoreSubscr | Op::Precall => 1,
            _ => 0,
        }
    } else if version.lt(3, 13) {
        match opcode {
            Op::LoadAttr => 9,
            Op::LoadGlobal | Op::StoreAttr => 4,
            Op::Call => 3,
            Op::BinaryOp
            | Op::BinarySubscr
            | Op::CompareOp
            | Op::UnpackSequence
            | Op::ForIter
            | Op::StoreSubscr
            | Op::Send
            | Op::LoadSuperAttr => 1,
            _ => 0,
        }
    } else {
        match opcode {
            Op::LoadAttr => 9,
            Op::LoadGlobal | Op::StoreAttr => 4,
            Op::Call | Op::CallKw | Op::ToBool => 3,
            Op::BinaryOp
            | Op::BinarySubscr
            | Op::CompareOp
            | Op::ContainsOp
            | Op::UnpackSequence
            | Op::ForIter
            | Op::StoreSubscr
            | Op::Send
            | Op::LoadSuperAttr
            | Op::JumpBackward
            | Op::PopJumpIfTrue
            | Op::PopJumpIfFalse
            | Op::PopJumpIfNone
            | Op::PopJumpIfNotNone => 1,
            _ => 0,
        }
    }
}

/// 1.5 – 2.7. One table with inline version forks where the assignment
/// changed hands (93 was `UNPACK_LIST` before iterators existed, `FOR_ITER`
/// after; 111/112 flipped from peek jumps to or-pop jumps in 2.7).
fn classic(version: PythonVersion, byte: u8) -> Option<Opcode> {
    use Opcode as Op;
    let op = match byte {
        0 => Op::StopCode,
        1 => Op::PopTop,
        2 => Op::RotTwo,
        3 => Op::RotThree,
        4 => Op::DupTop,
        5 if version.gte(2, 0) => Op::RotFour,
        9 if version.gte(2, 4) => Op::Nop,
        10 => Op::UnaryPositive,
        11 => Op::UnaryNegative,
        12 => Op::UnaryNot,
        13 => Op::UnaryConvert,
        15 => Op::UnaryInvert,
        18 if version.lt(2, 7) && version.gte(2, 0) => Op::ListAppend,
        19 => Op::BinaryPower,
        20 => Op::BinaryMultiply,
        21 => Op::BinaryDivide,
        22 => Op::BinaryModulo,
        23 => Op::BinaryAdd,
        24 => Op::BinarySubtract,
        25 => Op::BinarySubscr,
        26 if version.gte(2, 2) => Op::BinaryFloorDivide,
        27 if version.gte(2, 2) => Op::BinaryTrueDivide,
        28 if version.gte(2, 2) => Op::InplaceFloorDivide,
        29 if version.gte(2, 2) => Op::InplaceTrueDivide,
        30 => Op::Slice0,
        31 => Op::Slice1,
        32 => Op::Slice2,
        33 => Op::Slice3,
        40 => Op::StoreSlice0,
        41 => Op::StoreSlice1,
        42 => Op::StoreSlice2,
        43 => Op::StoreSlice3,
        50 => Op::DeleteSlice0,
        51 => Op::DeleteSlice1,
        52 => Op::DeleteSlice2,
        53 => Op::DeleteSlice3,
        54 if version.gte(2, 6) => Op::StoreMap,
        55 if version.gte(2, 0) => Op::InplaceAdd,
        56 if version.gte(2, 0) => Op::InplaceSubtract,
        57 if version.gte(2, 0) => Op::InplaceMultiply,
        58 if version.gte(2, 0) => Op::InplaceDivide,
        59 if version.gte(2, 0) => Op::InplaceModulo,
        60 => Op::StoreSubscr,
        61 => Op::DeleteSubscr,
        62 => Op::BinaryLshift,
        63 => Op::BinaryRshift,
        64 => Op::BinaryAnd,
        65 => Op::BinaryXor,
        66 => Op::BinaryOr,
        67 if version.gte(2, 0) => Op::InplacePower,
        68 if version.gte(2, 2) => Op::GetIter,
        70 => Op::PrintExpr,
        71 => Op::PrintItem,
        72 => Op::PrintNewline,
        73 if version.gte(2, 0) => Op::PrintItemTo,
        74 if version.gte(2, 0) => Op::PrintNewlineTo,
        75 if version.gte(2, 0) => Op::InplaceLshift,
        76 if version.gte(2, 0) => Op::InplaceRshift,
        77 if version.gte(2, 0) => Op::InplaceAnd,
        78 if version.gte(2, 0) => Op::InplaceXor,
        79 if version.gte(2, 0) => Op::InplaceOr,
        80 => Op::BreakLoop,
        81 if version.gte(2, 5) => Op::WithCleanup,
        82 => Op::LoadLocals,
        83 => Op::ReturnValue,
        84 => Op::ImportStar,
        85 => Op::ExecStmt,
        86 if version.gte(2, 2) => Op::YieldValue,
        87 => Op::PopBlock,
        88 => Op::EndFinally,
        89 => Op::BuildClass,
        90 => Op::StoreName,
        91 => Op::DeleteName,
        92 if version.gte(2, 0) => Op::UnpackSequence,
        92 => Op::UnpackTuple,
        93 if version.gte(2, 2) => Op::ForIter,
        93 => Op::UnpackList,
        94 if version.gte(2, 7) => Op::ListAppend,
        95 => Op::StoreAttr,
        96 => Op::DeleteAttr,
        97 => Op::StoreGlobal,
        98 => Op::DeleteGlobal,
        99 if version.gte(2, 0) => Op::DupTopX,
        100 => Op::LoadConst,
        101 => Op::LoadName,
        102 => Op::BuildTuple,
        103 => Op::BuildList,
        104 if version.gte(2, 7) => Op::BuildSet,
        105 => Op::BuildMap,
        106 => Op::LoadAttr,
        107 => Op::CompareOp,
        108 => Op::ImportName,
        109 => Op::ImportFrom,
        110 => Op::JumpForward,
        111 if version.gte(2, 7) => Op::JumpIfFalseOrPop,
        111 => Op::JumpIfFalse,
        112 if version.gte(2, 7) => Op::JumpIfTrueOrPop,
        112 => Op::JumpIfTrue,
        113 => Op::JumpAbsolute,
        114 if version.gte(2, 7) => Op::PopJumpIfFalse,
        114 if version.lt(2, 3) => Op::ForLoop,
        115 if version.gte(2, 7) => Op::PopJumpIfTrue,
        116 => Op::LoadGlobal,
        119 if version.gte(2, 1) => Op::ContinueLoop,
        120 => Op::SetupLoop,
        121 => Op::SetupExcept,
        122 => Op::SetupFinally,
        124 => Op::LoadFast,
        125 => Op::StoreFast,
        126 => Op::DeleteFast,
        127 if version.lt(2, 3) => Op::SetLineno,
        130 => Op::RaiseVarargs,
        131 => Op::CallFunction,
        132 => Op::MakeFunction,
        133 => Op::BuildSlice,
        134 if version.gte(2, 1) => Op::MakeClosure,
        135 if version.gte(2, 1) => Op::LoadClosure,
        136 if version.gte(2, 1) => Op::LoadDeref,
        137 if version.gte(2, 1) => Op::StoreDeref,
        140 if version.gte(2, 0) => Op::CallFunctionVar,
        141 if version.gte(2, 0) => Op::CallFunctionKw,
        142 if version.gte(2, 0) => Op::CallFunctionVarKw,
        143 if version.gte(2, 7) => Op::SetupWith,
        145 if version.gte(2, 0) => Op::ExtendedArg,
        146 if version.gte(2, 7) => Op::SetAdd,
        147 if version.gte(2, 7) => Op::MapAdd,
        _ => return None,
    };
    Some(op)
}

/// 3.0 – 3.5 (byte-coded, pre-wordcode).
fn py3_early(version: PythonVersion, byte: u8) -> Option<Opcode> {
    use Opcode as Op;
    let op = match byte {
        1 => Op::PopTop,
        2 => Op::RotTwo,
        3 => Op::RotThree,
        4 => Op::DupTop,
        5 if version.gte(3, 2) => Op::DupTopTwo,
        5 => Op::RotFour,
        9 => Op::Nop,
        10 => Op::UnaryPositive,
        11 => Op::UnaryNegative,
        12 => Op::UnaryNot,
        15 => Op::UnaryInvert,
        16 if version.gte(3, 5) => Op::BinaryMatrixMultiply,
        17 if version.gte(3, 5) => Op::InplaceMatrixMultiply,
        19 => Op::BinaryPower,
        20 => Op::BinaryMultiply,
        22 => Op::BinaryModulo,
        23 => Op::BinaryAdd,
        24 => Op::BinarySubtract,
        25 => Op::BinarySubscr,
        26 => Op::BinaryFloorDivide,
        27 => Op::BinaryTrueDivide,
        28 => Op::InplaceFloorDivide,
        29 => Op::InplaceTrueDivide,
        50 if version.gte(3, 5) => Op::GetAiter,
        51 if version.gte(3, 5) => Op::GetAnext,
        52 if version.gte(3, 5) => Op::BeforeAsyncWith,
        54 if version.lt(3, 5) => Op::StoreMap,
        55 => Op::InplaceAdd,
        56 => Op::InplaceSubtract,
        57 => Op::InplaceMultiply,
        59 => Op::InplaceModulo,
        60 => Op::StoreSubscr,
        61 => Op::DeleteSubscr,
        62 => Op::BinaryLshift,
        63 => Op::BinaryRshift,
        64 => Op::BinaryAnd,
        65 => Op::BinaryXor,
        66 => Op::BinaryOr,
        67 => Op::InplacePower,
        68 => Op::GetIter,
        69 if version.gte(3, 5) => Op::GetYieldFromIter,
        70 => Op::PrintExpr,
        71 => Op::LoadBuildClass,
        72 if version.gte(3, 3) => Op::YieldFrom,
        75 => Op::InplaceLshift,
        76 => Op::InplaceRshift,
        77 => Op::InplaceAnd,
        78 => Op::InplaceXor,
        79 => Op::InplaceOr,
        80 => Op::BreakLoop,
        81 if version.gte(3, 5) => Op::WithCleanupStart,
        81 => Op::WithCleanup,
        82 if version.gte(3, 5) => Op::WithCleanupFinish,
        83 => Op::ReturnValue,
        84 => Op::ImportStar,
        86 => Op::YieldValue,
        87 => Op::PopBlock,
        88 => Op::EndFinally,
        89 if version.gte(3, 1) => Op::PopExcept,
        90 => Op::StoreName,
        91 => Op::DeleteName,
        92 => Op::UnpackSequence,
        93 => Op::ForIter,
        94 => Op::UnpackEx,
        95 => Op::StoreAttr,
        96 => Op::DeleteAttr,
        97 => Op::StoreGlobal,
        98 => Op::DeleteGlobal,
        100 => Op::LoadConst,
        101 => Op::LoadName,
        102 => Op::BuildTuple,
        103 => Op::BuildList,
        104 => Op::BuildSet,
        105 => Op::BuildMap,
        106 => Op::LoadAttr,
        107 => Op::CompareOp,
        108 => Op::ImportName,
        109 => Op::ImportFrom,
        110 => Op::JumpForward,
        111 if version.gte(3, 1) => Op::JumpIfFalseOrPop,
        111 => Op::JumpIfFalse,
        112 if version.gte(3, 1) => Op::JumpIfTrueOrPop,
        112 => Op::JumpIfTrue,
        113 => Op::JumpAbsolute,
        114 if version.gte(3, 1) => Op::PopJumpIfFalse,
        115 if version.gte(3, 1) => Op::PopJumpIfTrue,
        116 => Op::LoadGlobal,
        119 => Op::ContinueLoop,
        120 => Op::SetupLoop,
        121 => Op::SetupExcept,
        122 => Op::SetupFinally,
        124 => Op::LoadFast,
        125 => Op::StoreFast,
        126 => Op::DeleteFast,
        130 => Op::RaiseVarargs,
        131 => Op::CallFunction,
        132 => Op::MakeFunction,
        133 => Op::BuildSlice,
        134 => Op::MakeClosure,
        135 => Op::LoadClosure,
        136 => Op::LoadDeref,
        137 => Op::StoreDeref,
        138 if version.gte(3, 2) => Op::DeleteDeref,
        140 => Op::CallFunctionVar,
        141 => Op::CallFunctionKw,
        142 => Op::CallFunctionVarKw,
        143 if version.gte(3, 2) => Op::SetupWith,
        144 => Op::ExtendedArg,
        145 => Op::ListAppend,
        146 => Op::SetAdd,
        147 => Op::MapAdd,
        148 if version.gte(3, 4) => Op::LoadClassderef,
        149 if version.gte(3, 5) => Op::BuildListUnpack,
        150 if version.gte(3, 5) => Op::BuildMapUnpack,
        151 if version.gte(3, 5) => Op::BuildMapUnpackWithCall,
        152 if version.gte(3, 5) => Op::BuildTupleUnpack,
        153 if version.gte(3, 5) => Op::BuildSetUnpack,
        154 if version.gte(3, 5) => Op::SetupAsyncWith,
        _ => return None,
    };
    Some(op)
}

/// 3.6 – 3.10 (wordcode).
fn py3_word(version: PythonVersion, byte: u8) -> Option<Opcode> {
    use Opcode as Op;
    let op = match byte {
        1 => Op::PopTop,
        2 => Op::RotTwo,
        3 => Op::RotThree,
        4 => Op::DupTop,
        5 => Op::DupTopTwo,
        6 if version.gte(3, 8) => Op::RotFour,
        9 => Op::Nop,
        10 => Op::UnaryPositive,
        11 => Op::UnaryNegative,
        12 => Op::UnaryNot,
        15 => Op::UnaryInvert,
        16 => Op::BinaryMatrixMultiply,
        17 => Op::InplaceMatrixMultiply,
        19 => Op::BinaryPower,
        20 => Op::BinaryMultiply,
        22 => Op::BinaryModulo,
        23 => Op::BinaryAdd,
        24 => Op::BinarySubtract,
        25 => Op::BinarySubscr,
        26 => Op::BinaryFloorDivide,
        27 => Op::BinaryTrueDivide,
        28 => Op::InplaceFloorDivide,
        29 => Op::InplaceTrueDivide,
        30 if version.gte(3, 10) => Op::GetLen,
        31 if version.gte(3, 10) => Op::MatchMapping,
        32 if version.gte(3, 10) => Op::MatchSequence,
        33 if version.gte(3, 10) => Op::MatchKeys,
        34 if version.gte(3, 10) => Op::CopyDictWithoutKeys,
        48 if version.gte(3, 9) && version.lt(3, 10) => Op::Reraise,
        49 if version.gte(3, 9) => Op::WithExceptStart,
        50 => Op::GetAiter,
        51 => Op::GetAnext,
        52 => Op::BeforeAsyncWith,
        53 if version.gte(3, 8) && version.lt(3, 9) => Op::BeginFinally,
        54 if version.gte(3, 8) => Op::EndAsyncFor,
        55 => Op::InplaceAdd,
        56 => Op::InplaceSubtract,
        57 => Op::InplaceMultiply,
        59 => Op::InplaceModulo,
        60 => Op::StoreSubscr,
        61 => Op::DeleteSubscr,
        62 => Op::BinaryLshift,
        63 => Op::BinaryRshift,
        64 => Op::BinaryAnd,
        65 => Op::BinaryXor,
        66 => Op::BinaryOr,
        67 => Op::InplacePower,
        68 => Op::GetIter,
        69 => Op::GetYieldFromIter,
        70 => Op::PrintExpr,
        71 => Op::LoadBuildClass,
        72 => Op::YieldFrom,
        73 => Op::GetAwaitable,
        74 if version.gte(3, 9) => Op::LoadAssertionError,
        75 => Op::InplaceLshift,
        76 => Op::InplaceRshift,
        77 => Op::InplaceAnd,
        78 => Op::InplaceXor,
        79 => Op::InplaceOr,
        80 if version.lt(3, 8) => Op::BreakLoop,
        81 if version.lt(3, 9) => Op::WithCleanupStart,
        82 if version.lt(3, 9) => Op::WithCleanupFinish,
        83 => Op::ReturnValue,
        84 => Op::ImportStar,
        85 if version.gte(3, 6) => Op::SetupAnnotations,
        86 => Op::YieldValue,
        87 => Op::PopBlock,
        88 if version.lt(3, 9) => Op::EndFinally,
        89 => Op::PopExcept,
        90 => Op::StoreName,
        91 => Op::DeleteName,
        92 => Op::UnpackSequence,
        93 => Op::ForIter,
        94 => Op::UnpackEx,
        95 => Op::StoreAttr,
        96 => Op::DeleteAttr,
        97 => Op::StoreGlobal,
        98 => Op::DeleteGlobal,
        99 if version.gte(3, 10) => Op::RotN,
        100 => Op::LoadConst,
        101 => Op::LoadName,
        102 => Op::BuildTuple,
        103 => Op::BuildList,
        104 => Op::BuildSet,
        105 => Op::BuildMap,
        106 => Op::LoadAttr,
        107 => Op::CompareOp,
        108 => Op::ImportName,
        109 => Op::ImportFrom,
        110 => Op::JumpForward,
        111 => Op::JumpIfFalseOrPop,
        112 => Op::JumpIfTrueOrPop,
        113 => Op::JumpAbsolute,
        114 => Op::PopJumpIfFalse,
        115 => Op::PopJumpIfTrue,
        116 => Op::LoadGlobal,
        117 if version.gte(3, 9) => Op::IsOp,
        118 if version.gte(3, 9) => Op::ContainsOp,
        119 if version.gte(3, 10) => Op::Reraise,
        119 if version.lt(3, 8) => Op::ContinueLoop,
        120 if version.lt(3, 8) => Op::SetupLoop,
        121 if version.gte(3, 9) => Op::JumpIfNotExcMatch,
        121 if version.lt(3, 8) => Op::SetupExcept,
        122 => Op::SetupFinally,
        124 => Op::LoadFast,
        125 => Op::StoreFast,
        126 => Op::DeleteFast,
        129 if version.gte(3, 10) => Op::GenStart,
        130 => Op::RaiseVarargs,
        131 => Op::CallFunction,
        132 => Op::MakeFunction,
        133 => Op::BuildSlice,
        135 => Op::LoadClosure,
        136 => Op::LoadDeref,
        137 => Op::StoreDeref,
        138 => Op::DeleteDeref,
        141 => Op::CallFunctionKw,
        142 => Op::CallFunctionEx,
        143 => Op::SetupWith,
        144 => Op::ExtendedArg,
        145 => Op::ListAppend,
        146 => Op::SetAdd,
        147 => Op::MapAdd,
        148 => Op::LoadClassderef,
        149 if version.lt(3, 9) => Op::BuildListUnpack,
        150 if version.lt(3, 9) => Op::BuildMapUnpack,
        151 if version.lt(3, 9) => Op::BuildMapUnpackWithCall,
        152 if version.lt(3, 9) => Op::BuildTupleUnpack,
        153 if version.lt(3, 9) => Op::BuildSetUnpack,
        154 => Op::SetupAsyncWith,
        155 => Op::FormatValue,
        156 => Op::BuildConstKeyMap,
        157 => Op::BuildString,
        158 if version.lt(3, 9) => Op::BuildTupleUnpackWithCall,
        160 if version.gte(3, 7) => Op::LoadMethod,
        161 if version.gte(3, 7) => Op::CallMethod,
        162 if version.gte(3, 9) => Op::ListExtend,
        162 if version.gte(3, 8) => Op::CallFinally,
        163 if version.gte(3, 9) => Op::SetUpdate,
        163 if version.gte(3, 8) => Op::PopFinally,
        164 if version.gte(3, 9) => Op::DictMerge,
        165 if version.gte(3, 9) => Op::DictUpdate,
        _ => return None,
    };
    Some(op)
}

/// 3.11. The only release with the forward/backward conditional-jump split
/// and the `PRECALL`/`CALL` pair.
fn py311(byte: u8) -> Option<Opcode> {
    use Opcode as Op;
    let op = match byte {
        0 => Op::Cache,
        1 => Op::PopTop,
        2 => Op::PushNull,
        9 => Op::Nop,
        10 => Op::UnaryPositive,
        11 => Op::UnaryNegative,
        12 => Op::UnaryNot,
        15 => Op::UnaryInvert,
        25 => Op::BinarySubscr,
        30 => Op::GetLen,
        31 => Op::MatchMapping,
        32 => Op::MatchSequence,
        33 => Op::MatchKeys,
        35 => Op::PushExcInfo,
        36 => Op::CheckExcMatch,
        37 => Op::CheckEgMatch,
        49 => Op::WithExceptStart,
        50 => Op::GetAiter,
        51 => Op::GetAnext,
        52 => Op::BeforeAsyncWith,
        53 => Op::BeforeWith,
        54 => Op::EndAsyncFor,
        60 => Op::StoreSubscr,
        61 => Op::DeleteSubscr,
        68 => Op::GetIter,
        69 => Op::GetYieldFromIter,
        70 => Op::PrintExpr,
        71 => Op::LoadBuildClass,
        74 => Op::LoadAssertionError,
        75 => Op::ReturnGenerator,
        82 => Op::ListToTuple,
        83 => Op::ReturnValue,
        84 => Op::ImportStar,
        85 => Op::SetupAnnotations,
        86 => Op::YieldValue,
        87 => Op::AsyncGenWrap,
        88 => Op::PrepReraiseStar,
        89 => Op::PopExcept,
        90 => Op::StoreName,
        91 => Op::DeleteName,
        92 => Op::UnpackSequence,
        93 => Op::ForIter,
        94 => Op::UnpackEx,
        95 => Op::StoreAttr,
        96 => Op::DeleteAttr,
        97 => Op::StoreGlobal,
        98 => Op::DeleteGlobal,
        99 => Op::Swap,
        100 => Op::LoadConst,
        101 => Op::LoadName,
        102 => Op::BuildTuple,
        103 => Op::BuildList,
        104 => Op::BuildSet,
        105 => Op::BuildMap,
        106 => Op::LoadAttr,
        107 => Op::CompareOp,
        108 => Op::ImportName,
        109 => Op::ImportFrom,
        110 => Op::JumpForward,
        111 => Op::JumpIfFalseOrPop,
        112 => Op::JumpIfTrueOrPop,
        113 => Op::PopJumpIfFalse,
        114 => Op::PopJumpIfTrue,
        115 => Op::LoadGlobal,
        116 => Op::IsOp,
        117 => Op::ContainsOp,
        118 => Op::Reraise,
        119 => Op::Copy,
        121 => Op::BinaryOp,
        122 => Op::Send,
        123 => Op::LoadFast,
        124 => Op::StoreFast,
        125 => Op::DeleteFast,
        128 => Op::PopJumpIfNotNone,
        129 => Op::PopJumpIfNone,
        130 => Op::RaiseVarargs,
        131 => Op::GetAwaitable,
        132 => Op::MakeFunction,
        133 => Op::BuildSlice,
        134 => Op::JumpBackwardNoInterrupt,
        135 => Op::MakeCell,
        136 => Op::LoadClosure,
        137 => Op::LoadDeref,
        138 => Op::StoreDeref,
        139 => Op::DeleteDeref,
        140 => Op::JumpBackward,
        142 => Op::CallFunctionEx,
        144 => Op::ExtendedArg,
        145 => Op::ListAppend,
        146 => Op::SetAdd,
        147 => Op::MapAdd,
        148 => Op::LoadClassderef,
        149 => Op::CopyFreeVars,
        151 => Op::Resume,
        152 => Op::MatchClass,
        155 => Op::FormatValue,
        156 => Op::BuildConstKeyMap,
        157 => Op::BuildString,
        160 => Op::LoadMethod,
        162 => Op::ListExtend,
        163 => Op::SetUpdate,
        164 => Op::DictMerge,
        165 => Op::DictUpdate,
        166 => Op::Precall,
        171 => Op::Call,
        172 => Op::KwNames,
        173 => Op::PopJumpBackwardIfNotNone,
        174 => Op::PopJumpBackwardIfNone,
        175 => Op::PopJumpBackwardIfFalse,
        176 => Op::PopJumpBackwardIfTrue,
        _ => return None,
    };
    Some(op)
}

/// 3.12.
fn py312(byte: u8) -> Option<Opcode> {
    use Opcode as Op;
    let op = match byte {
        0 => Op::Cache,
        1 => Op::PopTop,
        2 => Op::PushNull,
        3 => Op::InterpreterExit,
        4 => Op::EndFor,
        5 => Op::EndSend,
        9 => Op::Nop,
        11 => Op::UnaryNegative,
        12 => Op::UnaryNot,
        15 => Op::UnaryInvert,
        17 => Op::Reserved,
        25 => Op::BinarySubscr,
        26 => Op::BinarySlice,
        27 => Op::StoreSlice,
        30 => Op::GetLen,
        31 => Op::MatchMapping,
        32 => Op::MatchSequence,
        33 => Op::MatchKeys,
        35 => Op::PushExcInfo,
        36 => Op::CheckExcMatch,
        37 => Op::CheckEgMatch,
        49 => Op::WithExceptStart,
        50 => Op::GetAiter,
        51 => Op::GetAnext,
        52 => Op::BeforeAsyncWith,
        53 => Op::BeforeWith,
        54 => Op::EndAsyncFor,
        55 => Op::CleanupThrow,
        60 => Op::StoreSubscr,
        61 => Op::DeleteSubscr,
        68 => Op::GetIter,
        69 => Op::GetYieldFromIter,
        70 => Op::PrintExpr,
        71 => Op::LoadBuildClass,
        74 => Op::LoadAssertionError,
        75 => Op::ReturnGenerator,
        83 => Op::ReturnValue,
        85 => Op::SetupAnnotations,
        87 => Op::LoadLocals,
        89 => Op::PopExcept,
        90 => Op::StoreName,
        91 => Op::DeleteName,
        92 => Op::UnpackSequence,
        93 => Op::ForIter,
        94 => Op::UnpackEx,
        95 => Op::StoreAttr,
        96 => Op::DeleteAttr,
        97 => Op::StoreGlobal,
        98 => Op::DeleteGlobal,
        99 => Op::Swap,
        100 => Op::LoadConst,
        101 => Op::LoadName,
        102 => Op::BuildTuple,
        103 => Op::BuildList,
        104 => Op::BuildSet,
        105 => Op::BuildMap,
        106 => Op::LoadAttr,
        107 => Op::CompareOp,
        108 => Op::ImportName,
        109 => Op::ImportFrom,
        110 => Op::JumpForward,
        114 => Op::PopJumpIfFalse,
        115 => Op::PopJumpIfTrue,
        116 => Op::LoadGlobal,
        117 => Op::IsOp,
        118 => Op::ContainsOp,
        119 => Op::Reraise,
        120 => Op::Copy,
        121 => Op::ReturnConst,
        122 => Op::BinaryOp,
        123 => Op::Send,
        124 => Op::LoadFast,
        125 => Op::StoreFast,
        126 => Op::DeleteFast,
        127 => Op::LoadFastCheck,
        128 => Op::PopJumpIfNotNone,
        129 => Op::PopJumpIfNone,
        130 => Op::RaiseVarargs,
        131 => Op::GetAwaitable,
        132 => Op::MakeFunction,
        133 => Op::BuildSlice,
        134 => Op::JumpBackwardNoInterrupt,
        135 => Op::MakeCell,
        136 => Op::LoadClosure,
        137 => Op::LoadDeref,
        138 => Op::StoreDeref,
        139 => Op::DeleteDeref,
        140 => Op::JumpBackward,
        141 => Op::LoadSuperAttr,
        142 => Op::CallFunctionEx,
        143 => Op::LoadFastAndClear,
        144 => Op::ExtendedArg,
        145 => Op::ListAppend,
        146 => Op::SetAdd,
        147 => Op::MapAdd,
        149 => Op::CopyFreeVars,
        150 => Op::YieldValue,
        151 => Op::Resume,
        152 => Op::MatchClass,
        155 => Op::FormatValue,
        156 => Op::BuildConstKeyMap,
        157 => Op::BuildString,
        162 => Op::ListExtend,
        163 => Op::SetUpdate,
        164 => Op::DictMerge,
        165 => Op::DictUpdate,
        171 => Op::Call,
        172 => Op::KwNames,
        173 => Op::CallIntrinsic1,
        174 => Op::CallIntrinsic2,
        175 => Op::LoadFromDictOrGlobals,
        176 => Op::LoadFromDictOrDeref,
        _ => return None,
    };
    Some(op)
}

/// 3.13 – 3.14 (the alphabetically renumbered table; 3.14 rides it).
fn py313(byte: u8) -> Option<Opcode> {
    use Opcode as Op;
    let op = match byte {
        0 => Op::Cache,
        1 => Op::BeforeAsyncWith,
        2 => Op::BeforeWith,
        3 => Op::BinarySlice,
        4 => Op::BinarySubscr,
        5 => Op::CheckEgMatch,
        6 => Op::CheckExcMatch,
        7 => Op::CleanupThrow,
        8 => Op::DeleteSubscr,
        9 => Op::EndAsyncFor,
        10 => Op::EndFor,
        11 => Op::EndSend,
        12 => Op::ExitInitCheck,
        13 => Op::FormatSimple,
        14 => Op::FormatWithSpec,
        15 => Op::GetAiter,
        16 => Op::GetAnext,
        17 => Op::GetIter,
        18 => Op::Reserved,
        19 => Op::GetLen,
        20 => Op::GetYieldFromIter,
        21 => Op::InterpreterExit,
        22 => Op::LoadAssertionError,
        23 => Op::LoadBuildClass,
        24 => Op::LoadLocals,
        25 => Op::MakeFunction,
        26 => Op::MatchKeys,
        27 => Op::MatchMapping,
        28 => Op::MatchSequence,
        29 => Op::Nop,
        30 => Op::PopExcept,
        31 => Op::PopTop,
        32 => Op::PushExcInfo,
        33 => Op::PushNull,
        34 => Op::ReturnGenerator,
        35 => Op::ReturnValue,
        36 => Op::SetupAnnotations,
        37 => Op::StoreSlice,
        38 => Op::StoreSubscr,
        39 => Op::ToBool,
        40 => Op::UnaryInvert,
        41 => Op::UnaryNegative,
        42 => Op::UnaryNot,
        43 => Op::WithExceptStart,
        44 => Op::BinaryOp,
        45 => Op::BuildConstKeyMap,
        46 => Op::BuildList,
        47 => Op::BuildMap,
        48 => Op::BuildSet,
        49 => Op::BuildSlice,
        50 => Op::BuildString,
        51 => Op::BuildTuple,
        52 => Op::Call,
        53 => Op::CallFunctionEx,
        54 => Op::CallIntrinsic1,
        55 => Op::CallIntrinsic2,
        56 => Op::CallKw,
        57 => Op::CompareOp,
        58 => Op::ContainsOp,
        59 => Op::ConvertValue,
        60 => Op::Copy,
        61 => Op::CopyFreeVars,
        62 => Op::DeleteAttr,
        63 => Op::DeleteDeref,
        64 => Op::DeleteFast,
        65 => Op::DeleteGlobal,
        66 => Op::DeleteName,
        67 => Op::DictMerge,
        68 => Op::DictUpdate,
        69 => Op::EnterExecutor,
        70 => Op::ExtendedArg,
        71 => Op::ForIter,
        72 => Op::GetAwaitable,
        73 => Op::ImportFrom,
        74 => Op::ImportName,
        75 => Op::IsOp,
        76 => Op::JumpBackward,
        77 => Op::JumpBackwardNoInterrupt,
        78 => Op::JumpForward,
        79 => Op::ListAppend,
        80 => Op::ListExtend,
        81 => Op::LoadAttr,
        82 => Op::LoadSmallInt,
        83 => Op::LoadConst,
        84 => Op::LoadDeref,
        85 => Op::LoadFast,
        86 => Op::LoadFastAndClear,
        87 => Op::LoadFastCheck,
        88 => Op::LoadFastLoadFast,
        89 => Op::LoadFromDictOrDeref,
        90 => Op::LoadFromDictOrGlobals,
        91 => Op::LoadGlobal,
        92 => Op::LoadName,
        93 => Op::LoadSuperAttr,
        94 => Op::MakeCell,
        95 => Op::MapAdd,
        96 => Op::MatchClass,
        97 => Op::PopJumpIfFalse,
        98 => Op::PopJumpIfNone,
        99 => Op::PopJumpIfNotNone,
        100 => Op::PopJumpIfTrue,
        101 => Op::RaiseVarargs,
        102 => Op::Reraise,
        103 => Op::ReturnConst,
        104 => Op::Send,
        105 => Op::SetAdd,
        106 => Op::SetFunctionAttribute,
        107 => Op::SetUpdate,
        108 => Op::StoreAttr,
        109 => Op::StoreDeref,
        110 => Op::StoreFast,
        111 => Op::StoreFastLoadFast,
        112 => Op::StoreFastStoreFast,
        113 => Op::StoreGlobal,
        114 => Op::StoreName,
        115 => Op::Swap,
        116 => Op::UnpackEx,
        117 => Op::UnpackSequence,
        118 => Op::YieldValue,
        119 => Op::Resume,
        120 => Op::LoadSpecial,
        _ => return None,
    };
    Some(op)
}

#[cfg(test)]
mod tests {
    use super::{byte_for, cache_entries, lookup};
    use crate::{opcode::Opcode, version::PythonVersion};

    #[test]
    fn byte_for_round_trips_through_lookup() {
        for version in [
            PythonVersion::new(2, 7),
            PythonVersion::new(3, 4),
            PythonVersion::new(3, 8),
            PythonVersion::new(3, 10),
            PythonVersion::new(3, 11),
            PythonVersion::new(3, 12),
            PythonVersion::new(3, 13),
        ] {
            for opcode in [
                Opcode::LoadConst,
                Opcode::ReturnValue,
                Opcode::StoreName,
                Opcode::CompareOp,
                Opcode::JumpForward,
            ] {
                let byte = byte_for(version, opcode).expect("core opcode present in every family");
                assert_eq!(lookup(version, byte), Some(opcode), "{version} {opcode:?}");
            }
        }
    }

    #[test]
    fn family_membership_shifts_with_version() {
        // FOR_LOOP died with the iterator protocol.
        assert_eq!(lookup(PythonVersion::new(2, 2), 114), Some(Opcode::ForLoop));
        assert_eq!(lookup(PythonVersion::new(2, 7), 114), Some(Opcode::PopJumpIfFalse));
        // 2.6 had the peek conditionals, 2.7 the or-pop family.
        assert_eq!(lookup(PythonVersion::new(2, 6), 111), Some(Opcode::JumpIfFalse));
        assert_eq!(lookup(PythonVersion::new(2, 7), 111), Some(Opcode::JumpIfFalseOrPop));
        // PRECALL existed only in 3.11.
        assert_eq!(lookup(PythonVersion::new(3, 11), 166), Some(Opcode::Precall));
        assert_eq!(lookup(PythonVersion::new(3, 12), 166), None);
        // TO_BOOL arrived in 3.13.
        assert_eq!(lookup(PythonVersion::new(3, 13), 39), Some(Opcode::ToBool));
    }

    #[test]
    fn cache_counts() {
        assert_eq!(cache_entries(PythonVersion::new(3, 10), Opcode::Call), 0);
        assert_eq!(cache_entries(PythonVersion::new(3, 11), Opcode::LoadGlobal), 5);
        assert_eq!(cache_entries(PythonVersion::new(3, 12), Opcode::LoadAttr), 9);
        assert_eq!(cache_entries(PythonVersion::new(3, 13), Opcode::ToBool), 3);
    }
}
