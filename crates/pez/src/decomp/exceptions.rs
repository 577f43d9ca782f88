//! `try` and `with` region emission.
//!
//! Exception regions are the most version-divergent corner of the stream:
//! `SETUP_EXCEPT`/`SETUP_FINALLY` blocks before 3.11, table-driven ranges
//! after. Handler prologues are parsed structurally (not through the
//! general simulator) because the exception triple they manipulate has no
//! source-level counterpart; only the matched-type expression inside the
//! prologue is simulated, on a lenient stack.

use std::rc::Rc;

use crate::{
    ast::{AstExpr, AstStmt, ExceptHandler, ExprId, StmtId, WithItem},
    cfg::{BlockId, EdgeKind},
    error::DecompileResult,
    object::Object,
    opcode::{Instruction, Opcode},
    pattern::{TryPattern, WithPattern},
    scratch::BitSet,
    stack::StackValue,
    tracer::DecompileTracer,
};

use super::Decompiler;

/// One parsed `except` clause, pre-emission.
struct ParsedHandler {
    exc_type: Option<ExprId>,
    name: Option<Rc<str>>,
    body_entry: BlockId,
    body_skip: usize,
    next_chain: Option<BlockId>,
}

impl<Tr: DecompileTracer> Decompiler<'_, Tr> {
    /// Emits a `try` region; returns the block after the whole statement.
    pub(crate) fn emit_try(&mut self, pattern: &TryPattern, out: &mut Vec<StmtId>) -> DecompileResult<Option<BlockId>> {
        // Statements sharing the SETUP block precede the try itself.
        if let Some(setup_block) = pattern.setup_block {
            let outcome = self.run_sim_or_fallback(setup_block)?;
            self.absorb(outcome.global_names, outcome.nonlocal_names);
            let preamble = self.lower_stmts(outcome.statements)?;
            out.extend(preamble);
        }
        let try_start = self.cfg.block(pattern.try_block).start_offset;
        let body_set = self.range_set(try_start, pattern.protected_end);
        let body = self.emit_region(Some(pattern.try_block), &[], Some(&body_set))?;
        let body = if body.is_empty() {
            vec![self.arena.stmt(AstStmt::Pass)]
        } else {
            body
        };
        let after_try = self.escape_target(&body_set, pattern);

        let mut handlers = Vec::new();
        let mut finalbody = Vec::new();
        let mut exit_candidates: Vec<BlockId> = Vec::new();
        let mut chain_end_offset = pattern.protected_end;

        for info in &pattern.handlers {
            if info.is_finally {
                let (statements, end_offset) = self.emit_finally(info.handler_block)?;
                finalbody = statements;
                chain_end_offset = chain_end_offset.max(end_offset);
            } else {
                let (chain, exits, end_offset) = self.emit_except_chain(info.handler_block)?;
                handlers.extend(chain);
                exit_candidates.extend(exits);
                chain_end_offset = chain_end_offset.max(end_offset);
            }
        }

        // Everything inside the handler machinery is accounted for.
        self.consume_range(self.cfg.block(pattern.handlers[0].handler_block).start_offset, chain_end_offset);

        // Exit and else resolution: handler bodies jump to the statement
        // exit; the protected body's own escape lands on the else (when it
        // differs) or the same exit.
        let exit = exit_candidates.first().copied();
        let (orelse, next) = match (after_try, exit) {
            (Some(else_entry), Some(exit)) if else_entry != exit && else_entry < exit => {
                let orelse = self.emit_region(Some(else_entry), &[exit], None)?;
                (orelse, Some(exit))
            }
            (Some(else_entry), None) => (Vec::new(), Some(else_entry)),
            (_, exit) => (Vec::new(), exit.or(after_try)),
        };

        // A finally with duplicated inline copies (3.9+) leaves the normal
        // path copy right at the exit; skip blocks that repeat the handler
        // body instruction-for-instruction.
        let next = if finalbody.is_empty() {
            next
        } else {
            self.skip_duplicate_finally(next, pattern)
        };

        let statement = self.arena.stmt(AstStmt::Try {
            body,
            handlers,
            orelse,
            finalbody,
        });
        out.push(statement);
        Ok(next)
    }

    /// Blocks whose byte range falls inside `[start, end)`.
    fn range_set(&self, start: u32, end: u32) -> BitSet {
        let mut set = BitSet::with_capacity(self.cfg.num_blocks());
        for block in &self.cfg.blocks {
            if block.start_offset >= start && block.end_offset <= end {
                set.insert(block.id.index());
            }
        }
        set
    }

    fn consume_range(&mut self, start: u32, end: u32) {
        for block in &self.cfg.blocks {
            if block.start_offset >= start && block.end_offset <= end {
                self.consumed.insert(block.id.index());
            }
        }
    }

    /// Where the protected body escapes to (the jump out of its last
    /// block), which is the `else` entry or the statement exit.
    fn escape_target(&self, body_set: &BitSet, pattern: &TryPattern) -> Option<BlockId> {
        let handler_start = self.cfg.block(pattern.handlers[0].handler_block).start_offset;
        let mut best: Option<BlockId> = None;
        for index in body_set.iter() {
            let block = &self.cfg.blocks[index];
            for edge in block.normal_successors() {
                let target = self.cfg.block(edge.target);
                if !body_set.contains(edge.target.index()) && target.start_offset >= handler_start {
                    best = Some(match best {
                        Some(current) if current <= edge.target => current,
                        _ => edge.target,
                    });
                }
            }
        }
        best
    }

    /// Parses and emits a chain of `except` clauses starting at `first`.
    fn emit_except_chain(
        &mut self,
        first: BlockId,
    ) -> DecompileResult<(Vec<ExceptHandler>, Vec<BlockId>, u32)> {
        let mut handlers = Vec::new();
        let mut exits = Vec::new();
        let mut end_offset = self.cfg.block(first).end_offset;
        let mut current = Some(first);

        while let Some(block) = current {
            end_offset = end_offset.max(self.cfg.block(block).end_offset);
            let Some(parsed) = self.parse_handler(block)? else {
                // A block that no longer parses as a clause is the chain's
                // terminal cleanup (reraise / end-finally).
                break;
            };
            self.consumed.insert(block.index());

            let bound = parsed
                .next_chain
                .map_or(u32::MAX, |next| self.cfg.block(next).start_offset);
            let (body, body_end, handler_exit) = self.emit_handler_body(&parsed, bound)?;
            end_offset = end_offset.max(body_end);
            if let Some(exit) = handler_exit {
                if !exits.contains(&exit) {
                    exits.push(exit);
                }
            }
            handlers.push(ExceptHandler {
                exc_type: parsed.exc_type,
                name: parsed.name.clone(),
                body,
            });

            if parsed.exc_type.is_none() {
                break;
            }
            current = parsed.next_chain;
        }
        Ok((handlers, exits, end_offset))
    }

    /// Parses one handler block into its clause shape, or `None` when the
    /// block is chain cleanup rather than a clause.
    fn parse_handler(&mut self, block: BlockId) -> DecompileResult<Option<ParsedHandler>> {
        let instructions: Vec<Instruction> = self.cfg.instructions_of(block).to_vec();
        if instructions
            .iter()
            .all(|instruction| is_chain_cleanup(instruction.opcode))
        {
            return Ok(None);
        }

        let match_test = instructions.iter().position(|instruction| {
            matches!(instruction.opcode, Opcode::CheckExcMatch | Opcode::JumpIfNotExcMatch)
                || (instruction.opcode == Opcode::CompareOp
                    && self.version.lt(3, 9)
                    && instruction.arg == EXC_MATCH_LEGACY)
        });

        if let Some(test_index) = match_test {
            // Typed clause: simulate just the type-expression window.
            let start = instructions
                .iter()
                .position(|instruction| {
                    !matches!(instruction.opcode, Opcode::DupTop | Opcode::PushExcInfo | Opcode::PopTop)
                })
                .unwrap_or(0);
            let exc_type = self.sim_type_expr(&instructions[start..test_index]);

            let basic_block = self.cfg.block(block);
            let (match_entry, next_chain) = match (
                basic_block.edge(EdgeKind::ConditionalTrue),
                basic_block.edge(EdgeKind::ConditionalFalse),
            ) {
                (Some(true_side), Some(false_side)) => (true_side, Some(false_side)),
                _ => return Ok(None),
            };
            let (name, skip) = self.parse_binding(match_entry);
            self.consumed.insert(match_entry.index());
            Ok(Some(ParsedHandler {
                exc_type: Some(exc_type),
                name,
                body_entry: match_entry,
                body_skip: skip,
                next_chain,
            }))
        } else {
            // Bare clause: the prologue pops straight into the body.
            let (name, skip) = self.parse_binding(block);
            Ok(Some(ParsedHandler {
                exc_type: None,
                name,
                body_entry: block,
                body_skip: skip,
                next_chain: None,
            }))
        }
    }

    /// Simulates a type-expression window on a lenient stack.
    fn sim_type_expr(&mut self, window: &[Instruction]) -> ExprId {
        let saved_block = self.cfg.entry;
        let mut resolver = super::DriverResolver {
            version: self.version,
            depth: self.depth,
        };
        let code = Rc::clone(&self.code);
        let mut sim = crate::sim::Simulator::new(
            &mut *self.arena,
            &code,
            self.version,
            crate::stack::OperandStack::seeded(Vec::new(), true),
            false,
            &mut resolver,
            &mut *self.tracer,
            saved_block,
        );
        for instruction in window {
            let _ = sim.step(instruction);
        }
        match sim.stack.values().last() {
            Some(StackValue::Expr(id)) => *id,
            _ => self.arena.name("BaseException".into()),
        }
    }

    /// Reads the binding prologue of a handler body block: leading
    /// `POP_TOP`s with an optional `STORE` of the exception name.
    fn parse_binding(&mut self, block: BlockId) -> (Option<Rc<str>>, usize) {
        let instructions = self.cfg.instructions_of(block);
        let mut name = None;
        let mut skip = 0;
        for instruction in instructions {
            match instruction.opcode {
                Opcode::PopTop | Opcode::PushExcInfo | Opcode::Nop => skip += 1,
                Opcode::StoreFast | Opcode::StoreName | Opcode::StoreGlobal | Opcode::StoreDeref if name.is_none() => {
                    let resolved = match instruction.opcode {
                        Opcode::StoreFast => self.code.varname_at(instruction.arg).cloned(),
                        Opcode::StoreDeref => self.code.deref_name_at(instruction.arg).cloned(),
                        _ => self.code.name_at(instruction.arg).cloned(),
                    };
                    // Binding stores sit inside the pop run; a store after
                    // the pops is the first body statement instead.
                    let followed_by_pop = instructions
                        .get(skip + 1)
                        .is_some_and(|next| next.opcode == Opcode::PopTop);
                    if !(self.version.gte(3, 11) || followed_by_pop) {
                        break;
                    }
                    name = resolved;
                    skip += 1;
                    if !self.version.gte(3, 11) {
                        continue;
                    }
                    break;
                }
                _ => break,
            }
        }
        (name, skip)
    }

    /// Emits a handler body with its prologue skipped, bounded before
    /// `bound`.
    fn emit_handler_body(
        &mut self,
        parsed: &ParsedHandler,
        bound: u32,
    ) -> DecompileResult<(Vec<StmtId>, u32, Option<BlockId>)> {
        let entry = parsed.body_entry;
        self.consumed.remove(entry.index());
        if parsed.body_skip > 0 {
            self.partial_start.insert(entry.index() as u32, parsed.body_skip);
        }
        // The last clause has no following clause to bound it; its escape
        // jump (followed through fallthroughs) marks the boundary instead.
        // A handler that ends in return/raise needs no bound at all.
        let mut bound = bound;
        if bound == u32::MAX {
            let mut cursor = entry;
            for _ in 0..self.cfg.num_blocks() {
                let terminator = self.cfg.terminator(cursor);
                if terminator.opcode.is_unconditional_jump() {
                    if let Some(target) = self.cfg.block(cursor).edge(EdgeKind::Jump) {
                        bound = self.cfg.block(target).start_offset;
                    }
                    break;
                }
                if terminator.opcode.is_block_end_no_successor() {
                    break;
                }
                match self.cfg.block(cursor).edge(EdgeKind::Fallthrough) {
                    Some(next) => cursor = next,
                    None => break,
                }
            }
        }
        let body_set = self.range_set(self.cfg.block(entry).start_offset, bound);
        let mut end_offset = self.cfg.block(entry).end_offset;
        let mut exit = None;
        for index in body_set.iter() {
            let block = &self.cfg.blocks[index];
            end_offset = end_offset.max(block.end_offset);
            for edge in block.normal_successors() {
                // A forward jump out of the handler body is the statement
                // exit.
                if edge.kind == EdgeKind::Jump
                    && !body_set.contains(edge.target.index())
                    && self.cfg.block(edge.target).start_offset > block.start_offset
                {
                    exit = Some(edge.target);
                }
            }
        }
        let mut body = self.emit_region(Some(entry), &[], Some(&body_set))?;
        self.trim_name_cleanup(&mut body, parsed.name.as_deref());
        self.trim_trailing_reraise(&mut body);
        if body.is_empty() {
            body.push(self.arena.stmt(AstStmt::Pass));
        }
        Ok((body, end_offset, exit))
    }

    /// Drops the compiler's `name = None; del name` epilogue from a bound
    /// handler body.
    fn trim_name_cleanup(&mut self, body: &mut Vec<StmtId>, name: Option<&str>) {
        let Some(name) = name else { return };
        while let Some(&last) = body.last() {
            let drop = match self.arena.get_stmt(last) {
                AstStmt::Delete(targets) => targets.iter().any(|&target| self.is_name(target, name)),
                AstStmt::Assign { targets, value } => {
                    targets.iter().any(|&target| self.is_name(target, name))
                        && matches!(self.arena.get_expr(*value), AstExpr::Constant(Object::None))
                }
                _ => false,
            };
            if drop {
                body.pop();
            } else {
                break;
            }
        }
    }

    /// Drops a trailing bare `raise` that is really the unwind epilogue.
    fn trim_trailing_reraise(&mut self, body: &mut Vec<StmtId>) {
        if body.len() > 1 {
            if let Some(&last) = body.last() {
                if matches!(self.arena.get_stmt(last), AstStmt::Raise { exc: None, cause: None }) {
                    body.pop();
                }
            }
        }
    }

    fn is_name(&self, id: ExprId, name: &str) -> bool {
        matches!(self.arena.get_expr(id), AstExpr::Name(n) if &**n == name)
    }

    /// Emits a `finally` body from its handler copy, returning the body and
    /// the end offset of the consumed range.
    fn emit_finally(&mut self, handler: BlockId) -> DecompileResult<(Vec<StmtId>, u32)> {
        // The handler copy runs to the RERAISE/END_FINALLY that rethrows.
        let start = self.cfg.block(handler).start_offset;
        let mut end = self.cfg.block(handler).end_offset;
        let mut cursor = Some(handler);
        let mut set = BitSet::with_capacity(self.cfg.num_blocks());
        while let Some(block) = cursor {
            set.insert(block.index());
            end = end.max(self.cfg.block(block).end_offset);
            let terminator = self.cfg.terminator(block);
            if matches!(terminator.opcode, Opcode::Reraise | Opcode::EndFinally)
                || terminator.opcode.is_block_end_no_successor()
            {
                break;
            }
            cursor = self
                .cfg
                .block(block)
                .normal_successors()
                .map(|edge| edge.target)
                .next()
                .filter(|target| self.cfg.block(*target).start_offset > start);
        }
        let mut body = self.emit_region(Some(handler), &[], Some(&set))?;
        self.trim_trailing_reraise(&mut body);
        if body.is_empty() {
            body.push(self.arena.stmt(AstStmt::Pass));
        }
        Ok((body, end))
    }

    /// Skips the inline (normal-path) copy of a duplicated finally body.
    fn skip_duplicate_finally(&mut self, next: Option<BlockId>, pattern: &TryPattern) -> Option<BlockId> {
        let next = next?;
        let Some(finally) = pattern.handlers.iter().find(|info| info.is_finally) else {
            return Some(next);
        };
        let handler_instructions = self.handler_body_opcodes(finally.handler_block);
        if handler_instructions.is_empty() {
            return Some(next);
        }
        let mut cursor = next;
        let mut matched = 0usize;
        while matched < handler_instructions.len() {
            let block_ops: Vec<_> = self
                .cfg
                .instructions_of(cursor)
                .iter()
                .map(|instruction| (instruction.opcode, instruction.arg))
                .collect();
            let window = &handler_instructions[matched..];
            if block_ops.len() > window.len() || block_ops[..] != window[..block_ops.len()] {
                break;
            }
            matched += block_ops.len();
            self.consumed.insert(cursor.index());
            match self.cfg.next_block(cursor) {
                Some(following) => cursor = following,
                None => break,
            }
        }
        if matched > 0 { Some(cursor) } else { Some(next) }
    }

    /// The opcode/arg sequence of a finally handler's body, ignoring the
    /// unwind plumbing, for duplicate matching.
    fn handler_body_opcodes(&self, handler: BlockId) -> Vec<(Opcode, u32)> {
        self.cfg
            .instructions_of(handler)
            .iter()
            .filter(|instruction| !is_chain_cleanup(instruction.opcode))
            .map(|instruction| (instruction.opcode, instruction.arg))
            .collect()
    }

    /// Emits a `with` region; returns the block after the statement.
    pub(crate) fn emit_with(&mut self, pattern: &WithPattern, out: &mut Vec<StmtId>) -> DecompileResult<Option<BlockId>> {
        let outcome = self.run_sim_or_fallback(pattern.setup_block)?;
        self.absorb(outcome.global_names, outcome.nonlocal_names);
        let preamble = self.lower_stmts(outcome.statements)?;
        out.extend(preamble);
        let Some(manager) = outcome.pending_with else {
            // Nothing with-shaped after all; resume sequentially.
            return self.resolve_terminator(pattern.setup_block, out);
        };
        let enter_result = match outcome.exit_stack.last() {
            Some(StackValue::Expr(id)) => Some(*id),
            _ => None,
        };

        // Bound the body before the cleanup handler.
        let body_end = pattern
            .cleanup_block
            .map_or(u32::MAX, |cleanup| self.cfg.block(cleanup).start_offset);
        let body_set = self.range_set(self.cfg.block(pattern.body_block).start_offset, body_end);
        self.seed_overrides
            .insert(pattern.body_block.index() as u32, outcome.exit_stack.clone());
        let mut body = self.emit_region(Some(pattern.body_block), &[], Some(&body_set))?;

        // The `as` target is the first statement consuming the __enter__
        // result; without one the result was popped as plumbing.
        let mut optional_vars = None;
        if let (Some(&first), Some(enter_result)) = (body.first(), enter_result) {
            match self.arena.get_stmt(first).clone() {
                AstStmt::Assign { targets, value } if value == enter_result => {
                    optional_vars = targets.first().copied();
                    body.remove(0);
                }
                AstStmt::Expr(id) if id == enter_result => {
                    body.remove(0);
                }
                _ => {}
            }
        }

        // Consume the exit dance.
        let next = self.with_exit(pattern, &body_set);
        if body.is_empty() {
            body.push(self.arena.stmt(AstStmt::Pass));
        }
        let statement = self.arena.stmt(AstStmt::With {
            items: vec![WithItem {
                context: manager,
                optional_vars,
            }],
            body,
            is_async: pattern.is_async,
        });
        out.push(statement);
        Ok(next)
    }

    /// Consumes the `__exit__` cleanup blocks and finds the statement exit.
    fn with_exit(&mut self, pattern: &WithPattern, body_set: &BitSet) -> Option<BlockId> {
        let mut next = None;
        if let Some(cleanup) = pattern.cleanup_block {
            let mut cursor = Some(cleanup);
            let start = self.cfg.block(cleanup).start_offset;
            while let Some(block) = cursor {
                self.consumed.insert(block.index());
                let terminator = self.cfg.terminator(block);
                if terminator.opcode.is_block_end_no_successor()
                    || matches!(terminator.opcode, Opcode::Reraise | Opcode::EndFinally)
                {
                    break;
                }
                let following = self
                    .cfg
                    .block(block)
                    .normal_successors()
                    .map(|edge| edge.target)
                    .next();
                match following {
                    Some(target) if self.cfg.block(target).start_offset > start => cursor = Some(target),
                    other => {
                        next = other;
                        break;
                    }
                }
            }
        }
        // The body's escape jump names the true continuation when the
        // cleanup walk did not.
        for index in body_set.iter() {
            let block = &self.cfg.blocks[index];
            for edge in block.normal_successors() {
                if !body_set.contains(edge.target.index())
                    && Some(edge.target) != pattern.cleanup_block
                    && !self.consumed.contains(edge.target.index())
                {
                    next = Some(match next {
                        Some(current) if current >= edge.target => edge.target,
                        Some(current) => current,
                        None => edge.target,
                    });
                }
            }
        }
        next
    }
}

/// Opcodes that belong to chain/unwind plumbing rather than source.
fn is_chain_cleanup(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::PopTop
            | Opcode::PopExcept
            | Opcode::PopBlock
            | Opcode::Reraise
            | Opcode::EndFinally
            | Opcode::PopFinally
            | Opcode::BeginFinally
            | Opcode::PushExcInfo
            | Opcode::CheckExcMatch
            | Opcode::DupTop
            | Opcode::RotTwo
            | Opcode::RotThree
            | Opcode::RotFour
            | Opcode::Copy
            | Opcode::Swap
            | Opcode::Nop
            | Opcode::JumpForward
            | Opcode::JumpAbsolute
            | Opcode::CleanupThrow
            | Opcode::WithExceptStart
            | Opcode::WithCleanup
            | Opcode::WithCleanupStart
            | Opcode::WithCleanupFinish
    )
}

/// Legacy `COMPARE_OP` operand for "exception match".
const EXC_MATCH_LEGACY: u32 = 10;
