//! The abstract stack simulator.
//!
//! Executes one basic block at a time against a symbolic [`OperandStack`],
//! building AST expression nodes as values are produced and statement
//! records as they are consumed. Opcodes are grouped semantically rather
//! than version-by-version; where versions disagree on operand meaning the
//! handlers branch on the version tag at that one point.
//!
//! # Module Structure
//!
//! - `binary` - unary/binary operators, comparisons, subscripts, slices
//! - `call` - calls, function/class construction, imports
//! - `collections` - literal builders, unpacking, f-strings
//!
//! Two modes share this code. In *emission* mode every statement-shaped
//! result is appended to [`Simulator::statements`]. In *flow* mode (used by
//! the entry-stack dataflow) statements are discarded and only the stack
//! shape matters.

mod binary;
mod call;
mod collections;

use std::rc::Rc;

use ahash::AHashSet;

use crate::{
    ast::{AstArena, AstExpr, AstStmt, ComprehensionKind, ExprId},
    cfg::BlockId,
    code::Code,
    error::{SimError, SimResult},
    object::Object,
    opcode::{Instruction, Opcode},
    stack::{ClassBuilder, FunctionBuilder, ImportValue, OperandStack, StackValue},
    tracer::DecompileTracer,
    version::PythonVersion,
};

/// Resolves values that require decompiling a nested code object.
///
/// The driver implements this by spinning up a nested decompiler in the
/// same arena; the simulator calls through it whenever a lambda or a
/// comprehension must become an expression mid-block.
pub trait NestedResolver {
    /// Converts a lambda builder into a `Lambda` expression.
    fn lambda(&mut self, arena: &mut AstArena, builder: &FunctionBuilder) -> SimResult<ExprId>;

    /// Converts a comprehension call into the comprehension expression.
    fn comprehension(
        &mut self,
        arena: &mut AstArena,
        kind: ComprehensionKind,
        code: &Rc<Code>,
        iterable: ExprId,
    ) -> SimResult<ExprId>;
}

/// A resolver that refuses: used in flow mode, where nested values only
/// need to survive as opaque stack slots.
pub struct NoNested;

impl NestedResolver for NoNested {
    fn lambda(&mut self, arena: &mut AstArena, _builder: &FunctionBuilder) -> SimResult<ExprId> {
        Ok(arena.name("<lambda>".into()))
    }

    fn comprehension(
        &mut self,
        arena: &mut AstArena,
        _kind: ComprehensionKind,
        _code: &Rc<Code>,
        _iterable: ExprId,
    ) -> SimResult<ExprId> {
        Ok(arena.name("<comprehension>".into()))
    }
}

/// A statement-shaped simulation result.
///
/// Function and class definitions stay as builders here because turning
/// them into `FunctionDef`/`ClassDef` statements requires recursive
/// decompilation, which belongs to the driver.
#[derive(Debug)]
pub enum SimStmt {
    /// An ordinary finished statement.
    Plain(AstStmt),
    /// A function builder reached a store.
    DefFunction {
        /// Store target (a `Name` expression in well-formed code).
        target: ExprId,
        /// The assembled builder.
        builder: Box<FunctionBuilder>,
    },
    /// A class builder reached a store.
    DefClass {
        /// Store target.
        target: ExprId,
        /// The assembled builder.
        builder: Box<ClassBuilder>,
    },
    /// A comprehension-accumulator append (`LIST_APPEND` family). Only the
    /// inline-comprehension builder consumes these; anywhere else they mean
    /// the block was not really a comprehension body.
    CompAppend {
        /// Dict-comprehension key, when there is one.
        key: Option<ExprId>,
        /// Appended value.
        value: ExprId,
    },
}

/// An open `UNPACK_SEQUENCE`/`UNPACK_EX` group waiting for its stores.
#[derive(Debug, Clone)]
pub struct UnpackGroup {
    /// The unpacked value.
    pub value: ExprId,
    /// Collected targets, in source order.
    pub targets: Vec<Option<ExprId>>,
    /// Which target index is the starred one, for `UNPACK_EX`.
    pub star_index: Option<usize>,
    /// Targets still missing.
    pub remaining: usize,
}

/// Single-block symbolic executor.
pub struct Simulator<'a, Tr: DecompileTracer> {
    /// Arena receiving every node this block builds.
    pub arena: &'a mut AstArena,
    /// The code object being decompiled.
    pub code: &'a Code,
    /// Version tag.
    pub version: PythonVersion,
    /// The operand stack.
    pub stack: OperandStack,
    /// Statements produced so far (emission mode only).
    pub statements: Vec<SimStmt>,
    /// False in flow mode: statement results are discarded.
    pub emit: bool,
    /// Condition expression left by a conditional terminator.
    pub last_condition: Option<ExprId>,
    /// Context-manager expression recorded by a `with` prologue.
    pub pending_with: Option<ExprId>,
    /// Open unpack groups.
    pub unpack_groups: Vec<UnpackGroup>,
    /// Names stored through `STORE_GLOBAL`, for `global` declarations.
    pub global_names: Vec<Rc<str>>,
    /// Free variables stored through `STORE_DEREF`, for `nonlocal`
    /// declarations.
    pub nonlocal_names: Vec<Rc<str>>,
    /// Expression ids produced by in-place operators.
    inplace: AHashSet<ExprId>,
    /// Names set by `KW_NAMES` for the next call (3.11/3.12).
    kw_names: Vec<Rc<str>>,
    resolver: &'a mut dyn NestedResolver,
    tracer: &'a mut Tr,
    block: BlockId,
}

impl<'a, Tr: DecompileTracer> Simulator<'a, Tr> {
    /// Creates a simulator for one block run.
    pub fn new(
        arena: &'a mut AstArena,
        code: &'a Code,
        version: PythonVersion,
        stack: OperandStack,
        emit: bool,
        resolver: &'a mut dyn NestedResolver,
        tracer: &'a mut Tr,
        block: BlockId,
    ) -> Self {
        Self {
            arena,
            code,
            version,
            stack,
            statements: Vec::new(),
            emit,
            last_condition: None,
            pending_with: None,
            unpack_groups: Vec::new(),
            global_names: Vec::new(),
            nonlocal_names: Vec::new(),
            inplace: AHashSet::new(),
            kw_names: Vec::new(),
            resolver,
            tracer,
            block,
        }
    }

    /// Runs every instruction of a block in order.
    pub fn run(&mut self, instructions: &[Instruction]) -> SimResult<()> {
        for instruction in instructions {
            self.step(instruction)?;
        }
        Ok(())
    }

    /// Executes one instruction.
    pub fn step(&mut self, instruction: &Instruction) -> SimResult<()> {
        use Opcode as Op;
        self.tracer
            .sim_step(self.block, instruction.offset, instruction.opcode.name(), self.stack.len());
        let arg = instruction.arg;

        match instruction.opcode {
            // --- no-ops and bookkeeping ---
            Op::Nop
            | Op::StopCode
            | Op::SetLineno
            | Op::Resume
            | Op::GenStart
            | Op::Cache
            | Op::Precall
            | Op::MakeCell
            | Op::CopyFreeVars
            | Op::SetupAnnotations
            | Op::SetupLoop
            | Op::SetupExcept
            | Op::SetupFinally
            | Op::PopBlock
            | Op::BeginFinally
            | Op::EnterExecutor
            | Op::Reserved
            | Op::ReturnGenerator
            | Op::AsyncGenWrap
            | Op::EndSend
            | Op::GetYieldFromIter
            | Op::ExitInitCheck => {}

            // --- stack shuffling ---
            Op::PopTop => self.pop_top()?,
            Op::EndFor => {
                // Exhausted-iterator sentinel; the iterator below it goes to
                // an explicit POP_TOP on 3.13, or is dropped with it here.
                if !self.stack.is_empty() {
                    let _ = self.stack.pop()?;
                }
                if self.version.lt(3, 13) && !self.stack.is_empty() {
                    let _ = self.stack.pop()?;
                }
            }
            Op::RotTwo => self.stack.rotate(2)?,
            Op::RotThree => self.stack.rotate(3)?,
            Op::RotFour => self.stack.rotate(4)?,
            Op::RotN => self.stack.rotate(arg)?,
            Op::DupTop => self.stack.copy(1)?,
            Op::DupTopTwo => {
                self.stack.copy(2)?;
                self.stack.copy(2)?;
            }
            Op::DupTopX => {
                for _ in 0..arg {
                    self.stack.copy(arg)?;
                }
            }
            Op::Copy => self.stack.copy(arg)?,
            Op::Swap => self.stack.swap(arg)?,

            // --- loads ---
            Op::LoadConst | Op::ReturnConst => {
                let value = self.const_at(arg)?;
                let pushed = match &value {
                    Object::Code(code) => StackValue::CodeRef(Rc::clone(code)),
                    _ => StackValue::Expr(self.arena.constant(value)),
                };
                self.stack.push(pushed);
                if instruction.opcode == Op::ReturnConst {
                    let value = self.pop_expr()?;
                    self.emit_return(Some(value));
                }
            }
            Op::LoadSmallInt => {
                let id = self.arena.constant(Object::Int(i64::from(arg)));
                self.stack.push(StackValue::Expr(id));
            }
            Op::LoadFast | Op::LoadFastCheck | Op::LoadFastAndClear => {
                let name = self.local_name(arg)?;
                let id = self.arena.name(name);
                self.stack.push(StackValue::Expr(id));
            }
            Op::LoadFastLoadFast => {
                for slot in [arg >> 4, arg & 0xf] {
                    let name = self.local_name(slot)?;
                    let id = self.arena.name(name);
                    self.stack.push(StackValue::Expr(id));
                }
            }
            Op::LoadName | Op::LoadFromDictOrGlobals => {
                let name = self.global_name(arg)?;
                let id = self.arena.name(name);
                self.stack.push(StackValue::Expr(id));
            }
            Op::LoadGlobal => {
                let (index, with_null) = if self.version.gte(3, 11) {
                    (arg >> 1, arg & 1 != 0)
                } else {
                    (arg, false)
                };
                if with_null {
                    self.stack.push(StackValue::NullMarker);
                }
                let name = self.global_name(index)?;
                let id = self.arena.name(name);
                self.stack.push(StackValue::Expr(id));
            }
            Op::LoadDeref | Op::LoadClassderef | Op::LoadFromDictOrDeref | Op::LoadClosure => {
                let name = self.deref_name(arg)?;
                let id = self.arena.name(name);
                self.stack.push(StackValue::Expr(id));
            }
            Op::LoadBuildClass => {
                let id = self.arena.name(BUILD_CLASS_MARKER.into());
                self.stack.push(StackValue::Expr(id));
            }
            Op::LoadAssertionError => {
                let id = self.arena.name("AssertionError".into());
                self.stack.push(StackValue::Expr(id));
            }
            Op::LoadLocals => {
                let locals = self.arena.name("locals".into());
                let id = self.arena.expr(AstExpr::Call {
                    func: locals,
                    args: Vec::new(),
                    keywords: Vec::new(),
                });
                self.stack.push(StackValue::Expr(id));
            }
            Op::LoadAttr | Op::LoadMethod | Op::LoadSuperAttr | Op::LoadSpecial => self.load_attr(instruction)?,

            // --- stores and deletes ---
            Op::StoreFast | Op::StoreName | Op::StoreGlobal | Op::StoreDeref => {
                let name = match instruction.opcode {
                    Op::StoreFast => self.local_name(arg)?,
                    Op::StoreDeref => self.deref_name(arg)?,
                    _ => self.global_name(arg)?,
                };
                match instruction.opcode {
                    Op::StoreGlobal => self.global_names.push(Rc::clone(&name)),
                    Op::StoreDeref if self.code.freevars.contains(&name) => {
                        self.nonlocal_names.push(Rc::clone(&name));
                    }
                    _ => {}
                }
                let target = self.arena.name(name);
                self.store(target)?;
            }
            Op::StoreFastStoreFast => {
                for slot in [arg >> 4, arg & 0xf] {
                    let name = self.local_name(slot)?;
                    let target = self.arena.name(name);
                    self.store(target)?;
                }
            }
            Op::StoreFastLoadFast => {
                let name = self.local_name(arg >> 4)?;
                let target = self.arena.name(name);
                self.store(target)?;
                let name = self.local_name(arg & 0xf)?;
                let id = self.arena.name(name);
                self.stack.push(StackValue::Expr(id));
            }
            Op::StoreAttr => {
                let object = self.pop_expr()?;
                let attr = self.global_name(arg)?;
                let target = self.arena.expr(AstExpr::Attribute { value: object, attr });
                self.store(target)?;
            }
            Op::StoreSubscr => {
                let index = self.pop_expr()?;
                let object = self.pop_expr()?;
                let target = self.arena.expr(AstExpr::Subscript { value: object, index });
                self.store(target)?;
            }
            Op::StoreSlice => {
                let upper = self.pop_expr()?;
                let lower = self.pop_expr()?;
                let object = self.pop_expr()?;
                let index = self.arena.expr(AstExpr::Slice {
                    lower: Some(lower),
                    upper: Some(upper),
                    step: None,
                });
                let target = self.arena.expr(AstExpr::Subscript { value: object, index });
                self.store(target)?;
            }
            Op::StoreMap => {
                // 2.6-3.4 dict displays: [dict, value, key] -> dict.
                let key = self.pop_expr()?;
                let value = self.pop_expr()?;
                let dict = self.pop_expr()?;
                let extended = self.extend_dict_literal(dict, Some(key), value)?;
                self.stack.push(StackValue::Expr(extended));
            }
            Op::DeleteFast | Op::DeleteName | Op::DeleteGlobal | Op::DeleteDeref => {
                let name = match instruction.opcode {
                    Op::DeleteFast => self.local_name(arg)?,
                    Op::DeleteDeref => self.deref_name(arg)?,
                    _ => self.global_name(arg)?,
                };
                let target = self.arena.name(name);
                self.push_stmt(AstStmt::Delete(vec![target]));
            }
            Op::DeleteAttr => {
                let object = self.pop_expr()?;
                let attr = self.global_name(arg)?;
                let target = self.arena.expr(AstExpr::Attribute { value: object, attr });
                self.push_stmt(AstStmt::Delete(vec![target]));
            }
            Op::DeleteSubscr => {
                let index = self.pop_expr()?;
                let object = self.pop_expr()?;
                let target = self.arena.expr(AstExpr::Subscript { value: object, index });
                self.push_stmt(AstStmt::Delete(vec![target]));
            }

            // --- operators, comparisons, subscripts, legacy slices ---
            Op::UnaryPositive
            | Op::UnaryNegative
            | Op::UnaryNot
            | Op::UnaryInvert
            | Op::UnaryConvert
            | Op::BinaryOp
            | Op::BinaryAdd
            | Op::BinarySubtract
            | Op::BinaryMultiply
            | Op::BinaryDivide
            | Op::BinaryTrueDivide
            | Op::BinaryFloorDivide
            | Op::BinaryModulo
            | Op::BinaryPower
            | Op::BinaryLshift
            | Op::BinaryRshift
            | Op::BinaryAnd
            | Op::BinaryOr
            | Op::BinaryXor
            | Op::BinaryMatrixMultiply
            | Op::BinarySubscr
            | Op::BinarySlice
            | Op::InplaceAdd
            | Op::InplaceSubtract
            | Op::InplaceMultiply
            | Op::InplaceDivide
            | Op::InplaceTrueDivide
            | Op::InplaceFloorDivide
            | Op::InplaceModulo
            | Op::InplacePower
            | Op::InplaceLshift
            | Op::InplaceRshift
            | Op::InplaceAnd
            | Op::InplaceOr
            | Op::InplaceXor
            | Op::InplaceMatrixMultiply
            | Op::CompareOp
            | Op::IsOp
            | Op::ContainsOp
            | Op::Slice0
            | Op::Slice1
            | Op::Slice2
            | Op::Slice3
            | Op::StoreSlice0
            | Op::StoreSlice1
            | Op::StoreSlice2
            | Op::StoreSlice3
            | Op::DeleteSlice0
            | Op::DeleteSlice1
            | Op::DeleteSlice2
            | Op::DeleteSlice3
            | Op::ToBool => self.operator(instruction)?,

            // --- builders, unpacking, formatting ---
            Op::BuildTuple
            | Op::BuildList
            | Op::BuildSet
            | Op::BuildMap
            | Op::BuildConstKeyMap
            | Op::BuildString
            | Op::BuildSlice
            | Op::BuildTupleUnpack
            | Op::BuildListUnpack
            | Op::BuildSetUnpack
            | Op::BuildMapUnpack
            | Op::BuildMapUnpackWithCall
            | Op::BuildTupleUnpackWithCall
            | Op::ListExtend
            | Op::SetUpdate
            | Op::DictUpdate
            | Op::DictMerge
            | Op::ListToTuple
            | Op::ListAppend
            | Op::SetAdd
            | Op::MapAdd
            | Op::UnpackSequence
            | Op::UnpackTuple
            | Op::UnpackList
            | Op::UnpackEx
            | Op::FormatValue
            | Op::FormatSimple
            | Op::FormatWithSpec
            | Op::ConvertValue => self.collection(instruction)?,

            // --- calls, functions, classes, imports ---
            Op::CallFunction
            | Op::CallFunctionVar
            | Op::CallFunctionKw
            | Op::CallFunctionVarKw
            | Op::CallFunctionEx
            | Op::CallMethod
            | Op::Call
            | Op::CallKw
            | Op::CallIntrinsic1
            | Op::CallIntrinsic2
            | Op::KwNames
            | Op::PushNull
            | Op::MakeFunction
            | Op::MakeClosure
            | Op::SetFunctionAttribute
            | Op::BuildClass
            | Op::ImportName
            | Op::ImportFrom
            | Op::ImportStar => self.call_family(instruction)?,

            // --- iteration and generators ---
            Op::GetIter => {
                // The iterable survives as-is; GET_ITER is implicit in the
                // `for`/comprehension rendering.
            }
            Op::GetAiter | Op::GetAnext => {
                // Async iteration markers; the loop rewrite reads through
                // them, so the operand stays untouched.
            }
            Op::YieldValue => {
                let value = self.pop_expr()?;
                let value = self.non_trivial(value);
                let id = self.arena.expr(AstExpr::Yield(value));
                self.stack.push(StackValue::Expr(id));
            }
            Op::YieldFrom | Op::Send => {
                // [iterable-or-awaitable, None] -> delegation result.
                let _sent = self.stack.pop()?;
                let source = self.pop_expr()?;
                let id = if matches!(self.arena.get_expr(source), AstExpr::Await(_)) {
                    source
                } else {
                    self.arena.expr(AstExpr::YieldFrom(source))
                };
                self.stack.push(StackValue::Expr(id));
            }
            Op::GetAwaitable => {
                let value = self.pop_expr()?;
                let id = self.arena.expr(AstExpr::Await(value));
                self.stack.push(StackValue::Expr(id));
            }

            // --- returns and raises ---
            Op::ReturnValue => {
                let value = self.pop_expr()?;
                self.emit_return(Some(value));
            }
            Op::RaiseVarargs => {
                let (exc, cause) = match arg {
                    0 => (None, None),
                    1 => (Some(self.pop_expr()?), None),
                    2 => {
                        let cause = self.pop_expr()?;
                        let exc = self.pop_expr()?;
                        (Some(exc), Some(cause))
                    }
                    3 => {
                        // raise exc, value, traceback (Python 2); the
                        // traceback cannot be expressed in 3.x source.
                        let _traceback = self.pop_expr()?;
                        let cause = self.pop_expr()?;
                        let exc = self.pop_expr()?;
                        (Some(exc), Some(cause))
                    }
                    _ => return Err(SimError::BadStackArg(arg)),
                };
                self.push_stmt(AstStmt::Raise { exc, cause });
            }
            Op::Reraise => {
                self.push_stmt(AstStmt::Raise { exc: None, cause: None });
            }

            // --- exception-handler plumbing ---
            Op::PushExcInfo => {
                // [exc] -> [prev_exc, exc]
                let exc = self.stack.pop()?;
                self.stack.push(StackValue::Unknown);
                self.stack.push(exc);
            }
            Op::CheckExcMatch | Op::CheckEgMatch => {
                let matched_type = self.pop_expr()?;
                let exc = self.exc_placeholder();
                let id = self.arena.expr(AstExpr::Compare {
                    left: exc,
                    ops: vec![crate::ast::CmpOpKind::ExcMatch],
                    comparators: vec![matched_type],
                });
                self.stack.push(StackValue::Expr(id));
            }
            Op::PopExcept | Op::PopFinally | Op::CallFinally | Op::EndFinally | Op::CleanupThrow => {
                // Handler cleanup; stack effects differ by version but the
                // values involved are never part of the source program.
                self.stack.set_lenient();
                if instruction.opcode == Op::PopExcept && self.version.gte(3, 11) {
                    let _ = self.stack.pop()?;
                }
            }
            Op::WithExceptStart | Op::WithCleanup | Op::WithCleanupStart => {
                self.stack.push(StackValue::Unknown);
            }
            Op::WithCleanupFinish | Op::EndAsyncFor | Op::PrepReraiseStar => {
                self.stack.set_lenient();
                let _ = self.stack.pop()?;
            }

            // --- with prologues ---
            Op::SetupWith | Op::SetupAsyncWith | Op::BeforeWith | Op::BeforeAsyncWith => {
                let manager = self.pop_expr()?;
                self.pending_with = Some(manager);
                self.stack.push(StackValue::SavedLocal(WITH_EXIT_MARKER.into()));
                self.stack.push(StackValue::Expr(manager));
            }

            // --- Python 2 statements ---
            Op::PrintExpr => {
                let value = self.pop_expr()?;
                self.push_stmt(AstStmt::Expr(value));
            }
            Op::PrintItem => {
                let value = self.pop_expr()?;
                self.push_print(None, Some(value), false);
            }
            Op::PrintNewline => self.push_print(None, None, true),
            Op::PrintItemTo => {
                let value = self.pop_expr()?;
                let dest = self.pop_expr()?;
                self.push_print(Some(dest), Some(value), false);
            }
            Op::PrintNewlineTo => {
                let dest = self.pop_expr()?;
                self.push_print(Some(dest), None, true);
            }
            Op::ExecStmt => {
                let locals = self.pop_expr()?;
                let globals = self.pop_expr()?;
                let body = self.pop_expr()?;
                let globals = self.non_trivial(globals);
                let locals = self.non_trivial(locals).filter(|_| globals.is_some());
                self.push_stmt(AstStmt::Exec { body, globals, locals });
            }

            // --- terminators with condition values ---
            Op::PopJumpIfTrue
            | Op::PopJumpIfFalse
            | Op::PopJumpBackwardIfTrue
            | Op::PopJumpBackwardIfFalse => {
                let condition = self.pop_expr()?;
                self.last_condition = Some(condition);
            }
            Op::PopJumpIfNone | Op::PopJumpIfNotNone | Op::PopJumpBackwardIfNone | Op::PopJumpBackwardIfNotNone => {
                let value = self.pop_expr()?;
                let none = self.arena.constant(Object::None);
                let id = self.arena.expr(AstExpr::Compare {
                    left: value,
                    ops: vec![crate::ast::CmpOpKind::Is],
                    comparators: vec![none],
                });
                self.last_condition = Some(id);
            }
            Op::JumpIfTrueOrPop | Op::JumpIfFalseOrPop | Op::JumpIfTrue | Op::JumpIfFalse => {
                let condition = self.peek_expr(0)?;
                self.last_condition = Some(condition);
            }
            Op::JumpIfNotExcMatch => {
                let matched_type = self.pop_expr()?;
                let exc = self.exc_placeholder();
                let id = self.arena.expr(AstExpr::Compare {
                    left: exc,
                    ops: vec![crate::ast::CmpOpKind::ExcMatch],
                    comparators: vec![matched_type],
                });
                self.last_condition = Some(id);
                self.stack.set_lenient();
                let _ = self.stack.pop();
            }
            Op::ForIter | Op::ForLoop => {
                // The driver owns loop headers; in flow mode the pushed
                // next-value is opaque.
                self.stack.push(StackValue::Unknown);
            }

            // --- plain unconditional jumps carry no stack effect ---
            Op::JumpForward
            | Op::JumpAbsolute
            | Op::JumpBackward
            | Op::JumpBackwardNoInterrupt
            | Op::BreakLoop
            | Op::ContinueLoop => {}

            // --- match opcodes are interpreted structurally by the driver ---
            Op::MatchMapping | Op::MatchSequence | Op::MatchKeys | Op::MatchClass | Op::GetLen
            | Op::CopyDictWithoutKeys => {
                return Err(SimError::UnhandledOpcode(instruction.opcode.name()));
            }

            Op::InterpreterExit | Op::ExtendedArg | Op::RetrieveSendValue => {
                return Err(SimError::UnhandledOpcode(instruction.opcode.name()));
            }
        }
        Ok(())
    }

    // --- helpers shared by the handler modules ---

    /// Marker name carried by the `LOAD_BUILD_CLASS` pseudo-value.
    pub(crate) fn is_build_class_marker(&self, id: ExprId) -> bool {
        matches!(self.arena.get_expr(id), AstExpr::Name(name) if &**name == BUILD_CLASS_MARKER)
    }

    /// A `POP_TOP` that distinguishes expression statements from plumbing.
    fn pop_top(&mut self) -> SimResult<()> {
        match self.stack.pop()? {
            StackValue::Expr(id) => {
                if !self.is_placeholder(id) {
                    let statement = AstStmt::Expr(id);
                    self.push_stmt(statement);
                }
            }
            // Imports end with POP_TOP after their stores; builders and
            // markers popped here are plumbing, not statements.
            _ => {}
        }
        Ok(())
    }

    /// True for synthesized placeholder expressions that must not become
    /// expression statements.
    fn is_placeholder(&self, id: ExprId) -> bool {
        match self.arena.get_expr(id) {
            AstExpr::Name(name) => {
                matches!(&**name, EXC_MARKER | WITH_EXIT_MARKER | UNKNOWN_MARKER | BUILD_CLASS_MARKER)
            }
            // Synthesized __exit__ calls and friends.
            AstExpr::Call { func, .. } => self.is_placeholder(*func),
            _ => false,
        }
    }

    /// The placeholder naming the in-flight exception inside handlers.
    pub(crate) fn exc_placeholder(&mut self) -> ExprId {
        self.arena.name(EXC_MARKER.into())
    }

    /// Pops a value and converts it to an expression, resolving lambdas.
    pub(crate) fn pop_expr(&mut self) -> SimResult<ExprId> {
        let value = self.stack.pop()?;
        self.value_to_expr(value)
    }

    /// Reads the expression `depth` below the top without popping.
    pub(crate) fn peek_expr(&mut self, depth: usize) -> SimResult<ExprId> {
        match self.stack.peek(depth)? {
            StackValue::Expr(id) => Ok(*id),
            other => Err(SimError::NotAnExpression(other.tag())),
        }
    }

    /// Converts a stack value into an expression.
    pub(crate) fn value_to_expr(&mut self, value: StackValue) -> SimResult<ExprId> {
        match value {
            StackValue::Expr(id) => Ok(id),
            StackValue::Unknown => Ok(self.arena.name(UNKNOWN_MARKER.into())),
            StackValue::SavedLocal(name) => Ok(self.arena.name(name)),
            StackValue::Function(builder) if builder.is_lambda() => {
                self.resolver.lambda(self.arena, &builder)
            }
            other => Err(SimError::NotAnExpression(other.tag())),
        }
    }

    /// Filters out a `None` constant, for optional expression slots.
    pub(crate) fn non_trivial(&self, id: ExprId) -> Option<ExprId> {
        match self.arena.get_expr(id) {
            AstExpr::Constant(Object::None) => None,
            _ => Some(id),
        }
    }

    /// Handles a store into `target` for whatever value is on top.
    pub(crate) fn store(&mut self, target: ExprId) -> SimResult<()> {
        match self.stack.pop()? {
            StackValue::Function(builder) => {
                if builder.is_lambda() {
                    let value = self.resolver.lambda(self.arena, &builder)?;
                    self.push_assign(target, value);
                } else if self.emit {
                    self.statements.push(SimStmt::DefFunction { target, builder });
                }
            }
            StackValue::Class(builder) => {
                if self.emit {
                    self.statements.push(SimStmt::DefClass { target, builder });
                }
            }
            StackValue::Import(import) => self.store_import(target, import)?,
            StackValue::UnpackItem { group, index } => self.store_unpack_item(group, index, target)?,
            value => {
                let value = self.value_to_expr(value)?;
                // A stored in-place operation whose left side is the target
                // reads back as augmented assignment.
                if self.inplace.contains(&value) {
                    if let AstExpr::BinOp { left, op, right } = self.arena.get_expr(value) {
                        if self.arena.exprs_equal(*left, target) {
                            let statement = AstStmt::AugAssign {
                                target,
                                op: *op,
                                value: *right,
                            };
                            self.push_stmt(statement);
                            return Ok(());
                        }
                    }
                }
                self.push_assign(target, value);
            }
        }
        Ok(())
    }

    fn store_import(&mut self, target: ExprId, import: ImportValue) -> SimResult<()> {
        let target_name = match self.arena.get_expr(target) {
            AstExpr::Name(name) => Rc::clone(name),
            _ => return Err(SimError::NotAnExpression("import target")),
        };
        let statement = if let Some(item) = import.item {
            AstStmt::ImportFrom {
                module: (!import.module.is_empty()).then(|| Rc::clone(&import.module)),
                names: vec![crate::ast::Alias {
                    name: item.clone(),
                    asname: (target_name != item).then_some(target_name),
                }],
                level: import.level,
            }
        } else {
            let top_level = import.module.split('.').next().unwrap_or_default();
            AstStmt::Import(vec![crate::ast::Alias {
                name: Rc::clone(&import.module),
                asname: (target_name.as_ref() != top_level).then_some(target_name),
            }])
        };
        self.push_stmt(statement);
        Ok(())
    }

    fn store_unpack_item(&mut self, group: u32, index: u32, target: ExprId) -> SimResult<()> {
        let group_index = group as usize;
        let Some(entry) = self.unpack_groups.get_mut(group_index) else {
            return Err(SimError::InvalidUnpackCount(group));
        };
        let slot = entry
            .targets
            .get_mut(index as usize)
            .ok_or(SimError::InvalidUnpackCount(index))?;
        if slot.is_some() {
            return Err(SimError::InvalidUnpackCount(index));
        }
        *slot = Some(target);
        entry.remaining -= 1;
        if entry.remaining == 0 {
            let entry = self.unpack_groups[group_index].clone();
            let mut elements = Vec::with_capacity(entry.targets.len());
            for (position, target) in entry.targets.iter().enumerate() {
                let target = target.ok_or(SimError::InvalidUnpackCount(position as u32))?;
                if entry.star_index == Some(position) {
                    elements.push(self.arena.expr(AstExpr::Starred(target)));
                } else {
                    elements.push(target);
                }
            }
            let tuple = self.arena.expr(AstExpr::Tuple(elements));
            self.push_assign(tuple, entry.value);
        }
        Ok(())
    }

    /// Appends an assignment, merging chained targets that share a value.
    fn push_assign(&mut self, target: ExprId, value: ExprId) {
        if !self.emit {
            return;
        }
        // `x = x` only arises from save/restore plumbing (3.12 inline
        // comprehensions); never a source statement.
        if self.arena.exprs_equal(target, value) {
            return;
        }
        if let Some(SimStmt::Plain(AstStmt::Assign { targets, value: prior })) = self.statements.last_mut() {
            // DUP_TOP before several stores shares the exact node id.
            if *prior == value {
                targets.push(target);
                return;
            }
        }
        self.statements
            .push(SimStmt::Plain(AstStmt::Assign {
                targets: vec![target],
                value,
            }));
    }

    /// Appends a print fragment, merging runs the way the compiler split
    /// them.
    fn push_print(&mut self, dest: Option<ExprId>, value: Option<ExprId>, newline: bool) {
        if !self.emit {
            return;
        }
        if let Some(SimStmt::Plain(AstStmt::Print {
            values,
            newline: done, ..
        })) = self.statements.last_mut()
        {
            if !*done {
                if let Some(value) = value {
                    values.push(value);
                }
                *done = newline;
                return;
            }
        }
        self.statements.push(SimStmt::Plain(AstStmt::Print {
            dest,
            values: value.into_iter().collect(),
            newline,
        }));
    }

    fn emit_return(&mut self, value: Option<ExprId>) {
        let value = value.and_then(|id| match self.arena.get_expr(id) {
            // `return None` renders as bare `return`; the driver elides a
            // trailing one entirely.
            AstExpr::Constant(Object::None) => None,
            _ => Some(id),
        });
        self.push_stmt(AstStmt::Return(value));
    }

    /// Appends a plain statement (emission mode only).
    pub(crate) fn push_stmt(&mut self, statement: AstStmt) {
        if self.emit {
            self.statements.push(SimStmt::Plain(statement));
        }
    }

    /// Marks an expression as produced by an in-place operator.
    pub(crate) fn mark_inplace(&mut self, id: ExprId) {
        self.inplace.insert(id);
    }

    /// Takes the pending `KW_NAMES` list.
    pub(crate) fn take_kw_names(&mut self) -> Vec<Rc<str>> {
        std::mem::take(&mut self.kw_names)
    }

    /// Sets the pending `KW_NAMES` list.
    pub(crate) fn set_kw_names(&mut self, names: Vec<Rc<str>>) {
        self.kw_names = names;
    }

    /// Reads a constant by index.
    pub(crate) fn const_at(&self, index: u32) -> SimResult<Object> {
        self.code
            .const_at(index)
            .cloned()
            .ok_or(SimError::BadStackArg(index))
    }

    /// Resolves a local-variable operand.
    pub(crate) fn local_name(&self, index: u32) -> SimResult<Rc<str>> {
        if self.version.gte(3, 11) {
            // Locals-plus layout: plain locals first, then cells and frees.
            let nlocals = self.code.varnames.len() as u32;
            if index >= nlocals {
                return self
                    .code
                    .deref_name_at(index - nlocals)
                    .cloned()
                    .ok_or(SimError::BadStackArg(index));
            }
        }
        self.code.varname_at(index).cloned().ok_or(SimError::BadStackArg(index))
    }

    /// Resolves a name-table operand.
    pub(crate) fn global_name(&self, index: u32) -> SimResult<Rc<str>> {
        self.code.name_at(index).cloned().ok_or(SimError::BadStackArg(index))
    }

    /// Resolves a deref operand across the two layout eras.
    pub(crate) fn deref_name(&self, index: u32) -> SimResult<Rc<str>> {
        if self.version.gte(3, 11) {
            self.local_name(index)
        } else {
            self.code.deref_name_at(index).cloned().ok_or(SimError::BadStackArg(index))
        }
    }

    /// Extends a dict literal expression with one more entry.
    fn extend_dict_literal(&mut self, dict: ExprId, key: Option<ExprId>, value: ExprId) -> SimResult<ExprId> {
        match self.arena.get_expr(dict).clone() {
            AstExpr::Dict { mut keys, mut values } => {
                keys.push(key);
                values.push(value);
                Ok(self.arena.expr(AstExpr::Dict { keys, values }))
            }
            _ => Err(SimError::NotAnExpression("dict literal")),
        }
    }
}

/// Placeholder names; these never leak into rendered source.
pub(crate) const EXC_MARKER: &str = "__exception__";
pub(crate) const WITH_EXIT_MARKER: &str = "__with_exit__";
pub(crate) const UNKNOWN_MARKER: &str = "__unknown__";
pub(crate) const BUILD_CLASS_MARKER: &str = "__build_class__";
