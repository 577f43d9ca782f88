//! Loop emission.
//!
//! `while` and `for` regions bound their bodies with the natural-loop set,
//! so recursion cannot wander past the back edge; edges that leave the set
//! surface as `break`, non-latch edges back to the header as `continue`
//! (resolved in the driver's terminator handling). `for` headers carry the
//! iterable on the entry stack, which is also where inline comprehensions
//! are spotted: an empty container literal right under the iterator plus an
//! append-only body is a comprehension, not a loop.

use crate::{
    ast::{AstExpr, AstStmt, ExprId, StmtId},
    cfg::BlockId,
    error::DecompileResult,
    opcode::Opcode,
    pattern::{ForPattern, WhilePattern},
    stack::StackValue,
    tracer::DecompileTracer,
};

use super::{Decompiler, LoopCtx, functions};

impl<Tr: DecompileTracer> Decompiler<'_, Tr> {
    /// Emits a `while` region; returns the block after the statement.
    pub(crate) fn emit_while(
        &mut self,
        pattern: &WhilePattern,
        out: &mut Vec<StmtId>,
    ) -> DecompileResult<Option<BlockId>> {
        let header = pattern.header_block;
        let body_set = self.dom.loop_body(&self.cfg, header);

        let (test, body_entry, exit) = if pattern.infinite {
            // The header itself opens the body; re-open it for emission.
            self.consumed.remove(header.index());
            (self.true_expr(), header, None)
        } else {
            let (condition, true_target, false_target) = self.fold_condition(header, out)?;
            if body_set.contains(true_target.index()) {
                (condition, true_target, Some(false_target))
            } else {
                let negated = self.negate_expr(condition);
                (negated, false_target, Some(true_target))
            }
        };
        self.trace_loop_guard(header, !pattern.infinite);

        self.loop_stack.push(LoopCtx {
            header,
            body: body_set.clone(),
            exit,
            break_target: None,
        });
        // An infinite loop's body *starts* at the header, so the header
        // cannot be its own stop; the body set bounds the walk instead.
        let stops: &[BlockId] = if pattern.infinite { &[] } else { &[header] };
        let body = self.emit_region(Some(body_entry), stops, Some(&body_set))?;
        let context = self.loop_stack.pop().expect("pushed above");

        let body = self.ensure_body(body);
        let (orelse, next) = self.loop_tail(exit, context.break_target)?;
        // Async iteration has no dedicated loop opcode before 3.11: it
        // compiles to an infinite loop driving __anext__. Undo that here.
        if pattern.infinite && orelse.is_empty() && self.code.is_async() {
            if let Some(statement) = self.rewrite_async_for(&body) {
                out.push(statement);
                return Ok(next);
            }
        }
        let statement = self.arena.stmt(AstStmt::While { test, body, orelse });
        out.push(statement);
        Ok(next)
    }

    /// `while True: <target> = <delegation of __anext__>; ...` inside an
    /// async function reads back as `async for`.
    fn rewrite_async_for(&mut self, body: &[StmtId]) -> Option<StmtId> {
        let (&first, rest) = body.split_first()?;
        let (target, iter, rest) = match self.arena.get_stmt(first).clone() {
            AstStmt::Assign { targets, value } => {
                let iter = self.delegated_iter(value)?;
                (*targets.first()?, iter, rest.to_vec())
            }
            AstStmt::Try { body: try_body, handlers, .. } => {
                // 3.5-3.10: the __anext__ call sits in a try whose
                // StopAsyncIteration handler breaks.
                let [handler] = handlers.as_slice() else { return None };
                let stops_iteration = handler
                    .exc_type
                    .is_some_and(|id| matches!(self.arena.get_expr(id), AstExpr::Name(name) if &**name == "StopAsyncIteration"));
                if !stops_iteration {
                    return None;
                }
                let [assign] = try_body.as_slice() else { return None };
                let AstStmt::Assign { targets, value } = self.arena.get_stmt(*assign).clone() else {
                    return None;
                };
                let iter = self.delegated_iter(value)?;
                (*targets.first()?, iter, rest.to_vec())
            }
            _ => return None,
        };
        let body = if rest.is_empty() {
            vec![self.arena.stmt(AstStmt::Pass)]
        } else {
            rest
        };
        Some(self.arena.stmt(AstStmt::For {
            target,
            iter,
            body,
            orelse: Vec::new(),
            is_async: true,
        }))
    }

    /// The iterable under an `__anext__` delegation. Real `await`
    /// expressions wrap in `Await`, so only the bare delegation form (which
    /// no async-function source can spell) qualifies.
    fn delegated_iter(&self, value: ExprId) -> Option<ExprId> {
        match self.arena.get_expr(value) {
            AstExpr::YieldFrom(inner) => Some(*inner),
            _ => None,
        }
    }

    /// Emits a `for` region (or the comprehension it encodes); returns the
    /// block after the statement.
    pub(crate) fn emit_for(&mut self, pattern: &ForPattern, out: &mut Vec<StmtId>) -> DecompileResult<Option<BlockId>> {
        let header = pattern.header_block;
        let (seed, _lenient) = self.seed_for(header);
        let iterable = match seed.last() {
            Some(StackValue::Expr(id)) => *id,
            _ => self.arena.name("_".into()),
        };

        if let Some(next) = self.try_inline_comprehension(pattern, &seed, iterable, out)? {
            return Ok(Some(next));
        }


        let body_set = self.dom.loop_body(&self.cfg, header);
        let (mut body, target) = self.emit_loop_body(pattern, &seed, &body_set)?;
        let context = self.loop_stack.pop().expect("pushed in emit_loop_body");

        // The exit continues with the stack as it was under the iterator.
        if let Some(exit) = pattern.exit_block {
            self.seed_overrides
                .insert(exit.index() as u32, self.for_exit_seed(&seed));
        }

        if body.is_empty() {
            body.push(self.arena.stmt(AstStmt::Pass));
        }
        let (orelse, next) = self.loop_tail(pattern.exit_block, context.break_target)?;
        let statement = self.arena.stmt(AstStmt::For {
            target,
            iter: iterable,
            body,
            orelse,
            is_async: pattern.is_async,
        });
        out.push(statement);
        Ok(next)
    }

    /// Emits the loop body with a marker for the per-iteration value and
    /// extracts the loop target from the first store of that marker.
    fn emit_loop_body(
        &mut self,
        pattern: &ForPattern,
        seed: &[StackValue],
        body_set: &crate::scratch::BitSet,
    ) -> DecompileResult<(Vec<StmtId>, ExprId)> {
        let header = pattern.header_block;
        let marker = self.arena.name(LOOP_VALUE_MARKER.into());
        let mut body_seed = seed.to_vec();
        body_seed.push(StackValue::Expr(marker));
        self.seed_overrides
            .insert(pattern.body_block.index() as u32, body_seed);

        self.loop_stack.push(LoopCtx {
            header,
            body: body_set.clone(),
            exit: pattern.exit_block,
            break_target: None,
        });
        let mut body = self.emit_region(Some(pattern.body_block), &[header], Some(body_set))?;

        let target = self.extract_loop_target(&mut body, marker);
        Ok((body, target))
    }

    /// Pulls the target out of the leading `<marker> = ...` assignment.
    fn extract_loop_target(&mut self, body: &mut Vec<StmtId>, marker: ExprId) -> ExprId {
        if let Some(&first) = body.first() {
            if let AstStmt::Assign { targets, value } = self.arena.get_stmt(first).clone() {
                if value == marker && !targets.is_empty() {
                    body.remove(0);
                    return targets[0];
                }
            }
        }
        // No store of the iteration value: `for _ in ...` over a discarded
        // value, or a body the fallback paths flattened.
        self.arena.name("_".into())
    }

    /// Emits a loop-`else` region when breaks bypass the exit block.
    fn loop_tail(
        &mut self,
        exit: Option<BlockId>,
        break_target: Option<BlockId>,
    ) -> DecompileResult<(Vec<StmtId>, Option<BlockId>)> {
        match (exit, break_target) {
            (Some(exit), Some(break_target)) if break_target != exit => {
                let orelse = self.emit_region(Some(exit), &[break_target], None)?;
                Ok((orelse, Some(break_target)))
            }
            (Some(exit), _) => Ok((Vec::new(), Some(exit))),
            (None, break_target) => Ok((Vec::new(), break_target)),
        }
    }

    fn ensure_body(&mut self, body: Vec<StmtId>) -> Vec<StmtId> {
        if body.is_empty() {
            vec![self.arena.stmt(AstStmt::Pass)]
        } else {
            body
        }
    }

    fn trace_loop_guard(&mut self, header: BlockId, rewritten: bool) {
        self.tracer.loop_guard(header, rewritten);
    }

    /// Stack left for the block after a `for` loop.
    fn for_exit_seed(&self, seed: &[StackValue]) -> Vec<StackValue> {
        let mut exit_seed = seed.to_vec();
        if self.version.gte(3, 12) {
            // The iterator is popped by the END_FOR / POP_TOP epilogue;
            // leave silent placeholders for it and the sentinel.
            if let Some(top) = exit_seed.last_mut() {
                *top = StackValue::SavedLocal(ITER_LEFTOVER_MARKER.into());
            }
            exit_seed.push(StackValue::Unknown);
        } else {
            exit_seed.pop();
        }
        exit_seed
    }

    /// Recognizes a `for` region that is really a comprehension: an empty
    /// container literal right under the iterator, and a body that only
    /// appends.
    fn try_inline_comprehension(
        &mut self,
        pattern: &ForPattern,
        seed: &[StackValue],
        iterable: ExprId,
        out: &mut Vec<StmtId>,
    ) -> DecompileResult<Option<BlockId>> {
        let Some(exit) = pattern.exit_block else {
            return Ok(None);
        };
        if seed.len() < 2 {
            return Ok(None);
        }
        let container_slot = seed.len() - 2;
        let StackValue::Expr(container) = &seed[container_slot] else {
            return Ok(None);
        };
        let container = *container;
        let kind = match self.arena.get_expr(container) {
            AstExpr::List(items) if items.is_empty() => crate::ast::ComprehensionKind::List,
            AstExpr::Set(items) if items.is_empty() => crate::ast::ComprehensionKind::Set,
            AstExpr::Dict { keys, .. } if keys.is_empty() => crate::ast::ComprehensionKind::Dict,
            _ => return Ok(None),
        };

        // Commit only when the body cannot contain real statements.
        let body_set = self.dom.loop_body(&self.cfg, pattern.header_block);
        if !self.body_is_append_only(&body_set, pattern.header_block) {
            return Ok(None);
        }

        let (body, target) = self.emit_loop_body(pattern, seed, &body_set)?;
        self.loop_stack.pop();

        let first_generator = crate::ast::Comprehension {
            target,
            iter: iterable,
            ifs: Vec::new(),
            is_async: false,
        };
        let Some((key, element, generators)) = functions::comp_from_stmts(self.arena, &body, first_generator) else {
            // The body refused to reduce; keep it as an explicit loop with
            // the appends rendered as method calls so nothing is lost.
            let body = functions::appends_to_calls(self.arena, &body, container);
            let statement = self.arena.stmt(AstStmt::For {
                target,
                iter: iterable,
                body,
                orelse: Vec::new(),
                is_async: false,
            });
            out.push(statement);
            let exit_seed = self.for_exit_seed(seed);
            self.seed_overrides.insert(exit.index() as u32, exit_seed);
            return Ok(Some(exit));
        };

        let comp = self.arena.expr(AstExpr::Comp {
            kind,
            key,
            element,
            generators,
        });
        let mut exit_seed = self.for_exit_seed(seed);
        exit_seed[container_slot] = StackValue::Expr(comp);
        self.seed_overrides.insert(exit.index() as u32, exit_seed);
        Ok(Some(exit))
    }

    /// Pre-scan: every block of the candidate body must stay inside the
    /// expression/append vocabulary.
    fn body_is_append_only(&self, body_set: &crate::scratch::BitSet, header: BlockId) -> bool {
        let mut saw_append = false;
        for index in body_set.iter() {
            let block = BlockId::new(index);
            if block == header {
                continue;
            }
            for instruction in self.cfg.instructions_of(block) {
                match instruction.opcode {
                    Opcode::ListAppend | Opcode::SetAdd | Opcode::MapAdd => saw_append = true,
                    Opcode::ReturnValue
                    | Opcode::ReturnConst
                    | Opcode::YieldValue
                    | Opcode::RaiseVarargs
                    | Opcode::ImportName
                    | Opcode::PrintItem
                    | Opcode::SetupExcept
                    | Opcode::SetupFinally
                    | Opcode::SetupWith
                    | Opcode::BeforeWith
                    | Opcode::StoreAttr
                    | Opcode::StoreSubscr
                    | Opcode::DeleteFast
                    | Opcode::DeleteName => return false,
                    _ => {}
                }
            }
        }
        saw_append
    }
}

/// Marker for the value `FOR_ITER` pushes each iteration.
const LOOP_VALUE_MARKER: &str = "__loop_value__";
/// Marker for the iterator the 3.12+ epilogue pops.
const ITER_LEFTOVER_MARKER: &str = "__for_iter__";
