//! The decompiler driver.
//!
//! Owns the per-code-object state and runs the three phases: entry-stack
//! dataflow, structural emission, and (for the module object) finalisation.
//! Emission walks blocks in ascending id order, consults the pattern
//! detectors in a fixed priority (boolean short-circuit, ternary, match
//! chain, then the statement-level patterns) and recurses into each
//! region, leaping over everything a region consumed.
//!
//! # Module Structure
//!
//! - `dataflow` - worklist inference of `stack_in` per block
//! - `conditional` - condition-tree folding, `if`, ternary, bool-op regions
//! - `loops` - `while`/`for` emission, break/continue, inline comprehensions
//! - `exceptions` - `try`/`except`/`finally` and `with` regions
//! - `matches` - `match` statement reconstruction
//! - `functions` - nested code objects: defs, classes, lambdas, signatures
//! - `finalize` - module-level cleanup passes

mod conditional;
mod dataflow;
mod exceptions;
mod finalize;
mod functions;
mod loops;
mod matches;

use std::rc::Rc;

use indexmap::IndexMap;

use crate::{
    ast::{AstArena, AstExpr, AstStmt, ExprId, StmtId},
    cfg::{BlockId, Cfg, EdgeKind},
    code::Code,
    dom::{DomTree, PostDomTree},
    error::{DecompileError, DecompileErrorKind, DecompileResult, ErrorContext},
    object::Object,
    opcode::Opcode,
    pattern::{PatternAnalyzer, StructuralPattern},
    scratch::BitSet,
    sim::{NestedResolver, SimStmt, Simulator},
    stack::{OperandStack, StackValue},
    tracer::DecompileTracer,
    version::PythonVersion,
};

/// Default bound on nested-code-object recursion.
pub const DEFAULT_MAX_DEPTH: usize = 128;

/// A loop being emitted, for break/continue resolution.
#[derive(Debug)]
pub(crate) struct LoopCtx {
    /// Loop header block.
    pub header: BlockId,
    /// Natural-loop membership.
    pub body: BitSet,
    /// The header's exit block, when the loop has a condition.
    pub exit: Option<BlockId>,
    /// Where `break` statements were seen to jump, if anywhere.
    pub break_target: Option<BlockId>,
}

/// Everything one simulator run produced.
pub(crate) struct SimOutcome {
    pub statements: Vec<SimStmt>,
    pub exit_stack: Vec<StackValue>,
    pub last_condition: Option<ExprId>,
    pub pending_with: Option<ExprId>,
    pub global_names: Vec<Rc<str>>,
    pub nonlocal_names: Vec<Rc<str>>,
}

/// Resolver handed to the simulator for mid-block nested decompilation.
struct DriverResolver {
    version: PythonVersion,
    depth: usize,
}

impl NestedResolver for DriverResolver {
    fn lambda(
        &mut self,
        arena: &mut AstArena,
        builder: &crate::stack::FunctionBuilder,
    ) -> Result<ExprId, crate::error::SimError> {
        functions::lambda_expr(arena, builder, self.version, self.depth)
            .map_err(|_| crate::error::SimError::InvalidLambdaBody)
    }

    fn comprehension(
        &mut self,
        arena: &mut AstArena,
        kind: crate::ast::ComprehensionKind,
        code: &Rc<Code>,
        iterable: ExprId,
    ) -> Result<ExprId, crate::error::SimError> {
        functions::comprehension_expr(arena, kind, code, iterable, self.version, self.depth)
            .map_err(|_| crate::error::SimError::InvalidComprehension)
    }
}

/// Decompiler for exactly one code object.
///
/// Constructed per code object, consumes it, and is dropped with its
/// borrowed arena still owned by the caller; nested code objects recurse
/// through fresh `Decompiler`s splicing into the same arena.
pub struct Decompiler<'a, Tr: DecompileTracer> {
    pub(crate) arena: &'a mut AstArena,
    pub(crate) tracer: &'a mut Tr,
    pub(crate) code: Rc<Code>,
    pub(crate) version: PythonVersion,
    pub(crate) depth: usize,
    pub(crate) cfg: Cfg,
    pub(crate) dom: DomTree,
    pub(crate) postdom: PostDomTree,
    pub(crate) stack_in: Vec<Option<Vec<StackValue>>>,
    pub(crate) consumed: BitSet,
    /// Merge-block stack overrides produced by value regions (ternary,
    /// boolean short-circuits, inline comprehensions). Insertion-ordered so
    /// emission never depends on hash order.
    pub(crate) seed_overrides: IndexMap<u32, Vec<StackValue>>,
    /// Blocks whose first `n` instructions were consumed structurally.
    pub(crate) partial_start: IndexMap<u32, usize>,
    pub(crate) loop_stack: Vec<LoopCtx>,
    pub(crate) global_names: Vec<Rc<str>>,
    pub(crate) nonlocal_names: Vec<Rc<str>>,
}

impl<'a, Tr: DecompileTracer> Decompiler<'a, Tr> {
    /// Builds the CFG, dominance facts, and entry stacks for `code`.
    pub fn new(
        arena: &'a mut AstArena,
        tracer: &'a mut Tr,
        code: Rc<Code>,
        version: PythonVersion,
        depth: usize,
    ) -> DecompileResult<Self> {
        if depth >= DEFAULT_MAX_DEPTH {
            return Err(DecompileError::new(DecompileErrorKind::RecursionLimit(DEFAULT_MAX_DEPTH)));
        }
        let cfg = Cfg::build(&code, version).map_err(|error| annotate(error, &code))?;
        let dom = DomTree::build(&cfg);
        let postdom = PostDomTree::build(&cfg);
        let num_blocks = cfg.num_blocks();
        let mut decompiler = Self {
            arena,
            tracer,
            code,
            version,
            depth,
            cfg,
            dom,
            postdom,
            stack_in: vec![None; num_blocks],
            consumed: BitSet::with_capacity(num_blocks),
            seed_overrides: IndexMap::new(),
            partial_start: IndexMap::new(),
            loop_stack: Vec::new(),
            global_names: Vec::new(),
            nonlocal_names: Vec::new(),
        };
        dataflow::compute_entry_stacks(&mut decompiler)?;
        Ok(decompiler)
    }

    /// Decompiles the whole code object into a statement list.
    pub fn run(&mut self) -> DecompileResult<Vec<StmtId>> {
        let entry = self.cfg.entry;
        let mut statements = self.emit_region(Some(entry), &[], None)?;
        // A trailing bare `return` is the compiler's epilogue, not source.
        if let Some(&last) = statements.last() {
            if matches!(self.arena.get_stmt(last), AstStmt::Return(None)) {
                statements.pop();
            }
        }
        if statements.is_empty() {
            statements.push(self.arena.stmt(AstStmt::Pass));
        }
        Ok(statements)
    }

    /// Attaches the standard error context for this code object.
    pub(crate) fn context(&self, block: BlockId) -> ErrorContext {
        let terminator = self.cfg.terminator(block);
        ErrorContext {
            code_name: self.code.name.clone(),
            block,
            offset: terminator.offset,
            opcode: terminator.opcode.name(),
        }
    }

    // --- region emission ---

    /// Emits the region starting at `start`, stopping before any block in
    /// `stops` and never leaving `within` when one is given.
    pub(crate) fn emit_region(
        &mut self,
        start: Option<BlockId>,
        stops: &[BlockId],
        within: Option<&BitSet>,
    ) -> DecompileResult<Vec<StmtId>> {
        let mut statements = Vec::new();
        let mut current = start;
        let mut last_block: Option<BlockId> = None;
        while let Some(block) = current {
            if stops.contains(&block) {
                break;
            }
            if let Some(within) = within {
                if !within.contains(block.index()) {
                    break;
                }
            }
            if self.consumed.contains(block.index()) {
                current = self.cfg.next_block(block);
                continue;
            }
            let next = self.emit_block(block, within, &mut statements)?;
            if next == Some(block) && Some(block) == last_block {
                return Err(
                    DecompileError::new(DecompileErrorKind::NoProgress).with_context(self.context(block)),
                );
            }
            last_block = Some(block);
            current = next;
        }
        Ok(statements)
    }

    /// Emits one block (or the region rooted at it) and returns the next
    /// block to process.
    fn emit_block(
        &mut self,
        block: BlockId,
        within: Option<&BitSet>,
        out: &mut Vec<StmtId>,
    ) -> DecompileResult<Option<BlockId>> {
        self.consumed.insert(block.index());

        // Value-producing short-circuit regions come first so their guards
        // are never mistaken for statements.
        let bool_op = self.analyze(|analyzer| analyzer.detect_bool_op(block));
        if let Some(pattern) = bool_op {
            if let Some(next) = self.emit_bool_op(&pattern, out)? {
                self.tracer.decision(block, "bool-op");
                return Ok(Some(next));
            }
        }

        let ternary = self.analyze(|analyzer| analyzer.detect_ternary(block));
        if let Some(pattern) = ternary {
            if let Some(next) = self.emit_ternary(&pattern, out)? {
                self.tracer.decision(block, "ternary");
                return Ok(Some(next));
            }
        }

        if self.version.gte(3, 10) {
            if let Some(next) = matches::try_emit_match(self, block, out)? {
                self.tracer.decision(block, "match");
                return Ok(Some(next));
            }
        }

        let in_active_loop = self.loop_stack.iter().any(|ctx| ctx.header == block);
        if !in_active_loop {
            let pattern = self.analyze(|analyzer| analyzer.detect_pattern(block));
            if let Some(pattern) = pattern {
                self.tracer.decision(block, pattern.name());
                return match pattern {
                    StructuralPattern::If(pattern) => self.emit_if(&pattern, within, out),
                    StructuralPattern::While(pattern) => self.emit_while(&pattern, out),
                    StructuralPattern::For(pattern) => self.emit_for(&pattern, out),
                    StructuralPattern::Try(pattern) => self.emit_try(&pattern, out),
                    StructuralPattern::With(pattern) => self.emit_with(&pattern, out),
                    StructuralPattern::Match(pattern) => matches::emit_structural_match(self, &pattern, out),
                };
            }
        }

        self.tracer.decision(block, "straight-line");
        self.emit_straight_line(block, out)
    }

    /// Runs a detector with scoped borrows.
    pub(crate) fn analyze<T>(&self, detect: impl FnOnce(&mut PatternAnalyzer<'_>) -> T) -> T {
        let mut analyzer = PatternAnalyzer::new(&self.cfg, &self.dom, &self.postdom);
        detect(&mut analyzer)
    }

    // --- straight-line emission ---

    /// Emits a non-structural block and resolves its terminator into the
    /// next block (emitting `break`/`continue` where edges leave the
    /// current loop).
    fn emit_straight_line(&mut self, block: BlockId, out: &mut Vec<StmtId>) -> DecompileResult<Option<BlockId>> {
        let outcome = self.run_sim_or_fallback(block)?;
        self.absorb(outcome.global_names, outcome.nonlocal_names);
        let lowered = self.lower_stmts(outcome.statements)?;
        out.extend(lowered);
        if !outcome.exit_stack.is_empty() {
            self.propagate_override(block, outcome.exit_stack);
        }
        self.resolve_terminator(block, out)
    }

    /// Chooses the next block after `block` from its terminator, inserting
    /// `break`/`continue` for edges that leave the active loop.
    pub(crate) fn resolve_terminator(
        &mut self,
        block: BlockId,
        out: &mut Vec<StmtId>,
    ) -> DecompileResult<Option<BlockId>> {
        let terminator = *self.cfg.terminator(block);
        let opcode = terminator.opcode;

        if opcode.is_block_end_no_successor() {
            return Ok(None);
        }
        if opcode == Opcode::BreakLoop {
            out.push(self.arena.stmt(AstStmt::Break));
            return Ok(None);
        }
        if opcode == Opcode::ContinueLoop {
            out.push(self.arena.stmt(AstStmt::Continue));
            return Ok(None);
        }

        let target = if opcode.is_unconditional_jump() {
            self.cfg.block(block).edge(EdgeKind::Jump).or_else(|| {
                self.cfg.block(block).edge(EdgeKind::LoopBack)
            })
        } else {
            self.cfg.block(block).edge(EdgeKind::Fallthrough)
        };
        let Some(target) = target else {
            return Ok(self.cfg.next_block(block));
        };

        if let Some(ctx) = self.loop_stack.last_mut() {
            if target == ctx.header {
                // Back to the header: either the natural latch or an
                // explicit continue.
                let is_latch = self
                    .cfg
                    .next_block(block)
                    .is_none_or(|next| !ctx.body.contains(next.index()));
                if !is_latch {
                    out.push(self.arena.stmt(AstStmt::Continue));
                }
                return Ok(self.cfg.next_block(block));
            }
            if !ctx.body.contains(target.index()) && self.cfg.block(block).id != ctx.header {
                // Leaving the loop region: a break, unless this is the
                // loop condition's own exit edge.
                if Some(target) != ctx.exit || opcode.is_unconditional_jump() {
                    if ctx.break_target.is_none() {
                        ctx.break_target = Some(target);
                    }
                    out.push(self.arena.stmt(AstStmt::Break));
                    return Ok(self.cfg.next_block(block));
                }
            }
        }

        Ok(Some(target))
    }

    // --- simulation plumbing ---

    /// The seed stack for a block: an explicit override, the dataflow
    /// result, or a lenient handler seed.
    pub(crate) fn seed_for(&mut self, block: BlockId) -> (Vec<StackValue>, bool) {
        if let Some(seed) = self.seed_overrides.swap_remove(&(block.index() as u32)) {
            let lenient = seed.iter().any(|value| matches!(value, StackValue::Unknown));
            return (seed, lenient);
        }
        if let Some(seed) = self.stack_in[block.index()].clone() {
            let lenient = self.cfg.block(block).is_exception_handler
                || seed.iter().any(|value| matches!(value, StackValue::Unknown));
            return (seed, lenient);
        }
        // No inference reached this block (handler entry, unreachable
        // stretch): seed from the exception table's depth when available.
        let basic_block = self.cfg.block(block);
        let depth = self
            .cfg
            .exception_entries
            .iter()
            .find(|entry| entry.target == basic_block.start_offset)
            .map_or(0, |entry| entry.depth as usize + 1 + usize::from(entry.lasti));
        (vec![StackValue::Unknown; depth], true)
    }

    /// Runs the simulator on a block in emission mode.
    pub(crate) fn run_sim(&mut self, block: BlockId) -> Result<SimOutcome, crate::error::SimError> {
        let (seed, lenient) = self.seed_for(block);
        self.run_sim_seeded(block, seed, lenient, true)
    }

    /// Runs the simulator with an explicit seed.
    pub(crate) fn run_sim_seeded(
        &mut self,
        block: BlockId,
        seed: Vec<StackValue>,
        lenient: bool,
        emit: bool,
    ) -> Result<SimOutcome, crate::error::SimError> {
        let skip = self.partial_start.swap_remove(&(block.index() as u32)).unwrap_or(0);
        let mut resolver = DriverResolver {
            version: self.version,
            depth: self.depth,
        };
        let stack = OperandStack::seeded(seed, lenient);
        let block_range = {
            let basic_block = self.cfg.block(block);
            basic_block.first_instruction + skip..basic_block.end_instruction
        };
        let code = Rc::clone(&self.code);
        let mut sim = Simulator::new(
            &mut *self.arena,
            &code,
            self.version,
            stack,
            emit,
            &mut resolver,
            &mut *self.tracer,
            block,
        );
        for index in block_range {
            let instruction = self.cfg.instructions[index];
            sim.step(&instruction)?;
        }
        Ok(SimOutcome {
            statements: std::mem::take(&mut sim.statements),
            last_condition: sim.last_condition,
            pending_with: sim.pending_with,
            global_names: std::mem::take(&mut sim.global_names),
            nonlocal_names: std::mem::take(&mut sim.nonlocal_names),
            exit_stack: sim.stack.clone().into_values(),
        })
    }

    /// Emission-mode run with soft-error fallback: on a simulator error the
    /// block is replayed leniently, instruction by instruction, keeping
    /// whatever statements survive.
    pub(crate) fn run_sim_or_fallback(&mut self, block: BlockId) -> DecompileResult<SimOutcome> {
        match self.run_sim(block) {
            Ok(outcome) => Ok(outcome),
            Err(_soft) => {
                let (seed, _) = self.seed_for(block);
                let mut resolver = DriverResolver {
                    version: self.version,
                    depth: self.depth,
                };
                let stack = OperandStack::seeded(seed, true);
                let block_range = {
                    let basic_block = self.cfg.block(block);
                    basic_block.first_instruction..basic_block.end_instruction
                };
                let code = Rc::clone(&self.code);
                let mut sim = Simulator::new(
                    &mut *self.arena,
                    &code,
                    self.version,
                    stack,
                    true,
                    &mut resolver,
                    &mut *self.tracer,
                    block,
                );
                for index in block_range {
                    let instruction = self.cfg.instructions[index];
                    // Skip anything the lenient replay still rejects.
                    let _ = sim.step(&instruction);
                }
                Ok(SimOutcome {
                    statements: std::mem::take(&mut sim.statements),
                    last_condition: sim.last_condition,
                    pending_with: sim.pending_with,
                    global_names: std::mem::take(&mut sim.global_names),
                    nonlocal_names: std::mem::take(&mut sim.nonlocal_names),
                    exit_stack: sim.stack.clone().into_values(),
                })
            }
        }
    }

    /// Carries a non-empty exit stack to the fallthrough successor, so
    /// expression values survive block splits that are not region merges.
    fn propagate_override(&mut self, block: BlockId, exit_stack: Vec<StackValue>) {
        let terminator = self.cfg.terminator(block);
        if terminator.opcode.is_terminator() {
            return;
        }
        if let Some(next) = self.cfg.block(block).edge(EdgeKind::Fallthrough) {
            self.seed_overrides.insert(next.index() as u32, exit_stack);
        }
    }

    /// Records global/nonlocal names seen during simulation.
    pub(crate) fn absorb(&mut self, globals: Vec<Rc<str>>, nonlocals: Vec<Rc<str>>) {
        for name in globals {
            if !self.global_names.contains(&name) {
                self.global_names.push(name);
            }
        }
        for name in nonlocals {
            if !self.nonlocal_names.contains(&name) {
                self.nonlocal_names.push(name);
            }
        }
    }

    // --- statement lowering ---

    /// Converts simulator statements into arena statements, recursing into
    /// function and class builders.
    pub(crate) fn lower_stmts(&mut self, statements: Vec<SimStmt>) -> DecompileResult<Vec<StmtId>> {
        let mut lowered = Vec::with_capacity(statements.len());
        for statement in statements {
            match statement {
                SimStmt::Plain(statement) => lowered.push(self.arena.stmt(statement)),
                SimStmt::DefFunction { target, builder } => {
                    let statement = functions::function_def(self, target, &builder)?;
                    lowered.push(statement);
                }
                SimStmt::DefClass { target, builder } => {
                    let statement = functions::class_def(self, target, &builder)?;
                    lowered.push(statement);
                }
                SimStmt::CompAppend { key, value } => {
                    // Encoded as a marker call; only the comprehension
                    // walker reads these back.
                    let func = self.arena.name(functions::COMP_APPEND_MARKER.into());
                    let mut args = vec![value];
                    if let Some(key) = key {
                        args.insert(0, key);
                    }
                    let call = self.arena.expr(AstExpr::Call {
                        func,
                        args,
                        keywords: Vec::new(),
                    });
                    lowered.push(self.arena.stmt(AstStmt::Expr(call)));
                }
            }
        }
        Ok(lowered)
    }

    /// Allocates a `True` constant, for `while True:` headers.
    pub(crate) fn true_expr(&mut self) -> ExprId {
        self.arena.constant(Object::True)
    }
}

/// Attaches a code-object name to errors raised before a driver exists.
fn annotate(mut error: DecompileError, code: &Code) -> DecompileError {
    if error.context.is_none() {
        error.context = Some(ErrorContext {
            code_name: code.name.clone(),
            block: BlockId::new(0),
            offset: 0,
            opcode: "?",
        });
    }
    error
}
