//! Opcode table and per-version instruction decoding.
//!
//! The [`Opcode`] enum names instructions semantically and
//! version-independently: one variant per behaviour, even when CPython
//! renumbered or renamed the byte across releases. The per-version byte →
//! opcode mapping lives in [`tables`]; the instruction decoder (which folds
//! `EXTENDED_ARG` prefixes and trailing `CACHE` slots into a single
//! [`Instruction`]) lives in [`decode`]; the 3.11+ exception-table format
//! lives in [`exception_table`].
//!
//! # Module Structure
//!
//! - `tables` - byte → opcode mapping per version family
//! - `decode` - `Instruction` and the stream decoder
//! - `exception_table` - varint exception-range decoding (3.11+)

pub use decode::{Instruction, decode};
pub use exception_table::{ExceptionEntry, parse_exception_table};

use strum::IntoStaticStr;

use crate::version::PythonVersion;

pub mod decode;
pub mod exception_table;
pub mod tables;

/// One semantic instruction.
///
/// CPython-era aliases collapse onto a single variant wherever the stack
/// behaviour is identical (e.g. 3.11's `POP_JUMP_FORWARD_IF_TRUE` and
/// 3.12's `POP_JUMP_IF_TRUE` are both [`Opcode::PopJumpIfTrue`]); variants
/// stay distinct where the behaviour differs (the backward 3.11 forms jump
/// the other way, the pre-2.7 `JUMP_IF_TRUE` peeks instead of popping).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum Opcode {
    // --- stack shuffling ---
    PopTop,
    RotTwo,
    RotThree,
    RotFour,
    RotN,
    DupTop,
    DupTopTwo,
    DupTopX,
    Copy,
    Swap,
    Nop,
    StopCode,
    SetLineno,

    // --- loads ---
    LoadConst,
    LoadSmallInt,
    LoadFast,
    LoadFastCheck,
    LoadFastAndClear,
    LoadFastLoadFast,
    LoadName,
    LoadGlobal,
    LoadDeref,
    LoadClassderef,
    LoadFromDictOrDeref,
    LoadFromDictOrGlobals,
    LoadClosure,
    LoadAttr,
    LoadMethod,
    LoadSuperAttr,
    LoadBuildClass,
    LoadAssertionError,
    LoadLocals,
    LoadSpecial,

    // --- stores / deletes ---
    StoreFast,
    StoreFastStoreFast,
    StoreFastLoadFast,
    StoreName,
    StoreGlobal,
    StoreDeref,
    StoreAttr,
    StoreSubscr,
    StoreSlice,
    StoreMap,
    DeleteFast,
    DeleteName,
    DeleteGlobal,
    DeleteDeref,
    DeleteAttr,
    DeleteSubscr,

    // --- legacy whole-object slices (1.5-2.7) ---
    Slice0,
    Slice1,
    Slice2,
    Slice3,
    StoreSlice0,
    StoreSlice1,
    StoreSlice2,
    StoreSlice3,
    DeleteSlice0,
    DeleteSlice1,
    DeleteSlice2,
    DeleteSlice3,

    // --- unary / binary operators ---
    UnaryPositive,
    UnaryNegative,
    UnaryNot,
    UnaryInvert,
    UnaryConvert,
    BinaryOp,
    BinaryAdd,
    BinarySubtract,
    BinaryMultiply,
    BinaryDivide,
    BinaryTrueDivide,
    BinaryFloorDivide,
    BinaryModulo,
    BinaryPower,
    BinaryLshift,
    BinaryRshift,
    BinaryAnd,
    BinaryOr,
    BinaryXor,
    BinaryMatrixMultiply,
    BinarySubscr,
    BinarySlice,
    InplaceAdd,
    InplaceSubtract,
    InplaceMultiply,
    InplaceDivide,
    InplaceTrueDivide,
    InplaceFloorDivide,
    InplaceModulo,
    InplacePower,
    InplaceLshift,
    InplaceRshift,
    InplaceAnd,
    InplaceOr,
    InplaceXor,
    InplaceMatrixMultiply,
    CompareOp,
    IsOp,
    ContainsOp,
    ToBool,

    // --- jumps ---
    JumpForward,
    JumpAbsolute,
    JumpBackward,
    JumpBackwardNoInterrupt,
    PopJumpIfTrue,
    PopJumpIfFalse,
    PopJumpIfNone,
    PopJumpIfNotNone,
    PopJumpBackwardIfTrue,
    PopJumpBackwardIfFalse,
    PopJumpBackwardIfNone,
    PopJumpBackwardIfNotNone,
    JumpIfTrueOrPop,
    JumpIfFalseOrPop,
    /// Pre-2.7 / 3.0 conditional that peeks the condition instead of popping.
    JumpIfTrue,
    /// Pre-2.7 / 3.0 conditional that peeks the condition instead of popping.
    JumpIfFalse,
    JumpIfNotExcMatch,

    // --- loops / iteration ---
    GetIter,
    GetYieldFromIter,
    ForIter,
    ForLoop,
    EndFor,
    BreakLoop,
    ContinueLoop,
    SetupLoop,

    // --- returns / raises ---
    ReturnValue,
    ReturnConst,
    ReturnGenerator,
    RaiseVarargs,
    Reraise,

    // --- exception handling ---
    SetupExcept,
    SetupFinally,
    PopBlock,
    PopExcept,
    EndFinally,
    BeginFinally,
    CallFinally,
    PopFinally,
    PushExcInfo,
    CheckExcMatch,
    CheckEgMatch,
    PrepReraiseStar,
    WithExceptStart,
    CleanupThrow,

    // --- with statements ---
    SetupWith,
    SetupAsyncWith,
    BeforeWith,
    BeforeAsyncWith,
    WithCleanup,
    WithCleanupStart,
    WithCleanupFinish,

    // --- async ---
    GetAwaitable,
    GetAiter,
    GetAnext,
    EndAsyncFor,
    Send,
    EndSend,
    AsyncGenWrap,

    // --- generators ---
    YieldValue,
    YieldFrom,
    GenStart,
    Resume,
    RetrieveSendValue,

    // --- functions / classes / calls ---
    MakeFunction,
    MakeClosure,
    SetFunctionAttribute,
    MakeCell,
    CopyFreeVars,
    BuildClass,
    CallFunction,
    CallFunctionVar,
    CallFunctionKw,
    CallFunctionVarKw,
    CallFunctionEx,
    CallMethod,
    Call,
    CallKw,
    CallIntrinsic1,
    CallIntrinsic2,
    KwNames,
    Precall,
    PushNull,
    ExitInitCheck,

    // --- builders ---
    BuildTuple,
    BuildList,
    BuildSet,
    BuildMap,
    BuildConstKeyMap,
    BuildString,
    BuildSlice,
    ListAppend,
    SetAdd,
    MapAdd,
    ListExtend,
    SetUpdate,
    DictUpdate,
    DictMerge,
    ListToTuple,
    BuildTupleUnpack,
    BuildListUnpack,
    BuildSetUnpack,
    BuildMapUnpack,
    BuildMapUnpackWithCall,
    BuildTupleUnpackWithCall,
    FormatValue,
    FormatSimple,
    FormatWithSpec,
    ConvertValue,

    // --- unpacking ---
    UnpackSequence,
    UnpackEx,
    UnpackTuple,
    UnpackList,

    // --- imports ---
    ImportName,
    ImportFrom,
    ImportStar,

    // --- match statements ---
    MatchMapping,
    MatchSequence,
    MatchKeys,
    MatchClass,
    GetLen,
    CopyDictWithoutKeys,

    // --- Python 2 statements ---
    PrintExpr,
    PrintItem,
    PrintNewline,
    PrintItemTo,
    PrintNewlineTo,
    ExecStmt,

    // --- misc ---
    SetupAnnotations,
    InterpreterExit,
    EnterExecutor,
    Reserved,
    ExtendedArg,
    Cache,
}

impl Opcode {
    /// The canonical name, for diagnostics.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// True for every conditional branch terminator (pop, peek, or-pop, and
    /// the exception-match jump).
    #[must_use]
    pub fn is_conditional_jump(self) -> bool {
        matches!(
            self,
            Self::PopJumpIfTrue
                | Self::PopJumpIfFalse
                | Self::PopJumpIfNone
                | Self::PopJumpIfNotNone
                | Self::PopJumpBackwardIfTrue
                | Self::PopJumpBackwardIfFalse
                | Self::PopJumpBackwardIfNone
                | Self::PopJumpBackwardIfNotNone
                | Self::JumpIfTrueOrPop
                | Self::JumpIfFalseOrPop
                | Self::JumpIfTrue
                | Self::JumpIfFalse
                | Self::JumpIfNotExcMatch
        )
    }

    /// True when the branch is taken on a truthy condition.
    ///
    /// The Python-level `if` body is the *untaken* side of a false-testing
    /// jump, so pattern detection needs the polarity, not just the kind.
    #[must_use]
    pub fn jumps_on_true(self) -> bool {
        matches!(
            self,
            Self::PopJumpIfTrue | Self::PopJumpBackwardIfTrue | Self::JumpIfTrueOrPop | Self::JumpIfTrue
        )
    }

    /// True for the `..._OR_POP` family: the tested value stays on the stack
    /// along the taken edge and is popped along the fallthrough edge.
    #[must_use]
    pub fn keeps_value_when_taken(self) -> bool {
        matches!(self, Self::JumpIfTrueOrPop | Self::JumpIfFalseOrPop)
    }

    /// True for the pre-2.7/3.0 peek conditionals that never pop the value.
    #[must_use]
    pub fn peeks_condition(self) -> bool {
        matches!(self, Self::JumpIfTrue | Self::JumpIfFalse)
    }

    /// True for `..._IF_NONE` / `..._IF_NOT_NONE` jumps, whose condition is
    /// an implicit `is None` test rather than a truthiness test.
    #[must_use]
    pub fn tests_none(self) -> Option<bool> {
        match self {
            Self::PopJumpIfNone | Self::PopJumpBackwardIfNone => Some(true),
            Self::PopJumpIfNotNone | Self::PopJumpBackwardIfNotNone => Some(false),
            _ => None,
        }
    }

    /// True for unconditional jumps.
    #[must_use]
    pub fn is_unconditional_jump(self) -> bool {
        matches!(
            self,
            Self::JumpForward
                | Self::JumpAbsolute
                | Self::JumpBackward
                | Self::JumpBackwardNoInterrupt
                | Self::ContinueLoop
                | Self::BreakLoop
                | Self::CallFinally
        )
    }

    /// True when no execution falls out of this instruction at all.
    #[must_use]
    pub fn is_block_end_no_successor(self) -> bool {
        matches!(
            self,
            Self::ReturnValue | Self::ReturnConst | Self::RaiseVarargs | Self::Reraise | Self::InterpreterExit
        )
    }

    /// True for every instruction that must terminate a basic block.
    #[must_use]
    pub fn is_terminator(self) -> bool {
        self.is_conditional_jump()
            || self.is_unconditional_jump()
            || self.is_block_end_no_successor()
            || matches!(self, Self::ForIter | Self::ForLoop | Self::EndAsyncFor)
    }

    /// True for the `SETUP_*` family that opens a protected region on
    /// pre-3.11 interpreters.
    #[must_use]
    pub fn is_setup(self) -> bool {
        matches!(
            self,
            Self::SetupLoop | Self::SetupExcept | Self::SetupFinally | Self::SetupWith | Self::SetupAsyncWith
        )
    }
}

/// How a jump's operand is turned into a byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JumpEncoding {
    /// Operand is an absolute byte offset.
    AbsoluteBytes,
    /// Operand is an absolute instruction-word index (3.10).
    AbsoluteWords,
    /// Operand is a byte delta from the next instruction.
    RelativeBytes,
    /// Operand is a word delta forward from the next instruction (3.10+).
    RelativeWords,
    /// Operand is a word delta backward from the next instruction (3.11+).
    BackwardWords,
}

/// Computes the destination byte offset of a jump instruction, or `None`
/// when the opcode does not jump.
///
/// `offset` and `size` describe the folded instruction: `offset + size` is
/// the start of the next instruction, which is what every relative encoding
/// measures from.
#[must_use]
pub fn jump_target(version: PythonVersion, opcode: Opcode, arg: u32, offset: u32, size: u32) -> Option<u32> {
    use JumpEncoding::{AbsoluteBytes, AbsoluteWords, BackwardWords, RelativeBytes, RelativeWords};

    let encoding = match opcode {
        Opcode::JumpForward => {
            if version.gte(3, 10) {
                RelativeWords
            } else {
                RelativeBytes
            }
        }
        Opcode::JumpAbsolute | Opcode::ContinueLoop => {
            if version.gte(3, 10) {
                AbsoluteWords
            } else {
                AbsoluteBytes
            }
        }
        Opcode::JumpBackward | Opcode::JumpBackwardNoInterrupt => BackwardWords,
        Opcode::PopJumpIfTrue
        | Opcode::PopJumpIfFalse
        | Opcode::PopJumpIfNone
        | Opcode::PopJumpIfNotNone => {
            if version.gte(3, 11) {
                RelativeWords
            } else if version.gte(3, 10) {
                AbsoluteWords
            } else {
                AbsoluteBytes
            }
        }
        Opcode::PopJumpBackwardIfTrue
        | Opcode::PopJumpBackwardIfFalse
        | Opcode::PopJumpBackwardIfNone
        | Opcode::PopJumpBackwardIfNotNone => BackwardWords,
        Opcode::JumpIfTrueOrPop | Opcode::JumpIfFalseOrPop => {
            if version.gte(3, 11) {
                RelativeWords
            } else if version.gte(3, 10) {
                AbsoluteWords
            } else {
                AbsoluteBytes
            }
        }
        Opcode::JumpIfNotExcMatch => {
            if version.gte(3, 10) {
                AbsoluteWords
            } else {
                AbsoluteBytes
            }
        }
        // The peek conditionals were always relative.
        Opcode::JumpIfTrue | Opcode::JumpIfFalse => RelativeBytes,
        Opcode::ForIter | Opcode::Send => {
            if version.gte(3, 10) {
                RelativeWords
            } else {
                RelativeBytes
            }
        }
        Opcode::ForLoop => RelativeBytes,
        Opcode::SetupLoop
        | Opcode::SetupExcept
        | Opcode::SetupFinally
        | Opcode::SetupWith
        | Opcode::SetupAsyncWith
        | Opcode::CallFinally => {
            if version.gte(3, 10) {
                RelativeWords
            } else {
                RelativeBytes
            }
        }
        _ => return None,
    };

    let next = offset + size;
    Some(match encoding {
        AbsoluteBytes => arg,
        AbsoluteWords => arg * 2,
        RelativeBytes => next + arg,
        RelativeWords => next + arg * 2,
        BackwardWords => next.saturating_sub(arg * 2),
    })
}

/// Net operand-stack effect of an instruction, where it is fixed and simple.
///
/// Returns `None` for opcodes whose effect depends on more context than
/// `(opcode, arg)` (calls with `NULL` markers, `MAKE_FUNCTION` flag bits on
/// old versions, the exception-handling family). The stack simulator models
/// those precisely; this function exists for the dataflow fallback on
/// opcodes the simulator treats as opaque.
#[must_use]
pub fn stack_effect(version: PythonVersion, opcode: Opcode, arg: u32) -> Option<i32> {
    let arg_i = i32::try_from(arg).ok()?;
    let effect = match opcode {
        Opcode::Nop
        | Opcode::StopCode
        | Opcode::SetLineno
        | Opcode::Resume
        | Opcode::GenStart
        | Opcode::ExtendedArg
        | Opcode::Cache
        | Opcode::SetupAnnotations
        | Opcode::MakeCell
        | Opcode::CopyFreeVars
        | Opcode::RotTwo
        | Opcode::RotThree
        | Opcode::RotFour
        | Opcode::RotN
        | Opcode::Swap
        | Opcode::GetIter
        | Opcode::GetYieldFromIter
        | Opcode::GetAwaitable
        | Opcode::GetAiter
        | Opcode::UnaryPositive
        | Opcode::UnaryNegative
        | Opcode::UnaryNot
        | Opcode::UnaryInvert
        | Opcode::UnaryConvert
        | Opcode::ToBool
        | Opcode::ConvertValue
        | Opcode::FormatSimple
        | Opcode::ListToTuple => 0,
        Opcode::PopTop | Opcode::PopBlock | Opcode::PopExcept | Opcode::EndFor | Opcode::EndSend => -1,
        Opcode::DupTop | Opcode::Copy | Opcode::GetLen | Opcode::MatchMapping | Opcode::MatchSequence => 1,
        Opcode::DupTopTwo => 2,
        Opcode::DupTopX => arg_i,
        Opcode::LoadConst
        | Opcode::LoadSmallInt
        | Opcode::LoadFast
        | Opcode::LoadFastCheck
        | Opcode::LoadFastAndClear
        | Opcode::LoadName
        | Opcode::LoadDeref
        | Opcode::LoadClassderef
        | Opcode::LoadClosure
        | Opcode::LoadBuildClass
        | Opcode::LoadAssertionError
        | Opcode::LoadLocals
        | Opcode::PushNull => 1,
        Opcode::LoadFastLoadFast => 2,
        Opcode::LoadGlobal => {
            // 3.11+ pushes a NULL ahead of the global when the low bit is set.
            if version.gte(3, 11) && arg & 1 != 0 {
                2
            } else {
                1
            }
        }
        Opcode::LoadAttr => {
            if version.gte(3, 12) && arg & 1 != 0 {
                1
            } else {
                0
            }
        }
        Opcode::LoadMethod => 1,
        Opcode::StoreFast | Opcode::StoreName | Opcode::StoreGlobal | Opcode::StoreDeref | Opcode::PrintItem => -1,
        Opcode::StoreFastStoreFast => -2,
        Opcode::StoreFastLoadFast => 0,
        Opcode::StoreAttr => -2,
        Opcode::StoreSubscr => -3,
        Opcode::StoreSlice => -4,
        Opcode::StoreMap => -2,
        Opcode::DeleteFast
        | Opcode::DeleteName
        | Opcode::DeleteGlobal
        | Opcode::DeleteDeref
        | Opcode::PrintNewline => 0,
        Opcode::DeleteAttr => -1,
        Opcode::DeleteSubscr => -2,
        Opcode::Slice0 => 0,
        Opcode::Slice1 | Opcode::Slice2 => -1,
        Opcode::Slice3 => -2,
        Opcode::StoreSlice0 => -2,
        Opcode::StoreSlice1 | Opcode::StoreSlice2 => -3,
        Opcode::StoreSlice3 => -4,
        Opcode::DeleteSlice0 => -1,
        Opcode::DeleteSlice1 | Opcode::DeleteSlice2 => -2,
        Opcode::DeleteSlice3 => -3,
        Opcode::BinaryOp
        | Opcode::BinaryAdd
        | Opcode::BinarySubtract
        | Opcode::BinaryMultiply
        | Opcode::BinaryDivide
        | Opcode::BinaryTrueDivide
        | Opcode::BinaryFloorDivide
        | Opcode::BinaryModulo
        | Opcode::BinaryPower
        | Opcode::BinaryLshift
        | Opcode::BinaryRshift
        | Opcode::BinaryAnd
        | Opcode::BinaryOr
        | Opcode::BinaryXor
        | Opcode::BinaryMatrixMultiply
        | Opcode::BinarySubscr
        | Opcode::InplaceAdd
        | Opcode::InplaceSubtract
        | Opcode::InplaceMultiply
        | Opcode::InplaceDivide
        | Opcode::InplaceTrueDivide
        | Opcode::InplaceFloorDivide
        | Opcode::InplaceModulo
        | Opcode::InplacePower
        | Opcode::InplaceLshift
        | Opcode::InplaceRshift
        | Opcode::InplaceAnd
        | Opcode::InplaceOr
        | Opcode::InplaceXor
        | Opcode::InplaceMatrixMultiply
        | Opcode::CompareOp
        | Opcode::IsOp
        | Opcode::ContainsOp
        | Opcode::BinarySlice
        | Opcode::FormatWithSpec
        | Opcode::ListAppend
        | Opcode::SetAdd
        | Opcode::MatchKeys => -1,
        Opcode::MapAdd => -2,
        Opcode::BuildTuple | Opcode::BuildList | Opcode::BuildSet | Opcode::BuildString => 1 - arg_i,
        Opcode::BuildMap => 1 - 2 * arg_i,
        Opcode::BuildConstKeyMap => -arg_i,
        Opcode::BuildSlice => {
            if arg == 3 {
                -2
            } else {
                -1
            }
        }
        Opcode::ListExtend | Opcode::SetUpdate | Opcode::DictUpdate | Opcode::DictMerge => -1,
        Opcode::UnpackSequence | Opcode::UnpackTuple | Opcode::UnpackList => arg_i - 1,
        Opcode::ReturnValue | Opcode::YieldValue | Opcode::ImportStar | Opcode::PrintExpr => -1,
        Opcode::ReturnConst => 0,
        Opcode::ReturnGenerator => 0,
        Opcode::YieldFrom => -1,
        Opcode::RaiseVarargs => -arg_i,
        Opcode::ImportName => -1,
        Opcode::ImportFrom => 1,
        Opcode::PopJumpIfTrue
        | Opcode::PopJumpIfFalse
        | Opcode::PopJumpIfNone
        | Opcode::PopJumpIfNotNone
        | Opcode::PopJumpBackwardIfTrue
        | Opcode::PopJumpBackwardIfFalse
        | Opcode::PopJumpBackwardIfNone
        | Opcode::PopJumpBackwardIfNotNone => -1,
        Opcode::JumpForward
        | Opcode::JumpAbsolute
        | Opcode::JumpBackward
        | Opcode::JumpBackwardNoInterrupt
        | Opcode::JumpIfTrue
        | Opcode::JumpIfFalse
        | Opcode::BreakLoop
        | Opcode::ContinueLoop => 0,
        Opcode::ForIter => 1,
        Opcode::GetAnext => 1,
        Opcode::ExecStmt => -3,
        Opcode::PrintItemTo => -2,
        Opcode::PrintNewlineTo => -1,
        _ => return None,
    };
    Some(effect)
}

#[cfg(test)]
mod tests {
    use super::{Opcode, jump_target};
    use crate::version::PythonVersion;

    #[test]
    fn jump_target_arithmetic_per_family() {
        let py38 = PythonVersion::new(3, 8);
        let py310 = PythonVersion::new(3, 10);
        let py312 = PythonVersion::new(3, 12);

        // 3.8: absolute in bytes.
        assert_eq!(jump_target(py38, Opcode::PopJumpIfFalse, 20, 4, 2), Some(20));
        // 3.8: relative in bytes from next instruction.
        assert_eq!(jump_target(py38, Opcode::JumpForward, 6, 10, 2), Some(18));
        // 3.10: operands count instruction words.
        assert_eq!(jump_target(py310, Opcode::PopJumpIfFalse, 10, 4, 2), Some(20));
        // 3.12: forward relative words.
        assert_eq!(jump_target(py312, Opcode::PopJumpIfFalse, 3, 4, 2), Some(12));
        // 3.12: backward.
        assert_eq!(jump_target(py312, Opcode::JumpBackward, 5, 20, 2), Some(12));
        // Non-jumps have no target.
        assert_eq!(jump_target(py312, Opcode::LoadConst, 0, 0, 2), None);
    }

    #[test]
    fn polarity_helpers() {
        assert!(Opcode::PopJumpIfTrue.jumps_on_true());
        assert!(!Opcode::PopJumpIfFalse.jumps_on_true());
        assert!(Opcode::JumpIfTrueOrPop.keeps_value_when_taken());
        assert!(Opcode::JumpIfFalse.peeks_condition());
        assert_eq!(Opcode::PopJumpIfNone.tests_none(), Some(true));
        assert_eq!(Opcode::PopJumpIfNotNone.tests_none(), Some(false));
    }
}
