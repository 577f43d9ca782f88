//! Conditions and conditional regions.
//!
//! `fold_condition` rebuilds the boolean expression a chain of conditional
//! blocks computes: each pure-condition successor (no statements, balanced
//! stack, conditional exit) folds into an `and`/`or` operand, with chained
//! comparisons re-merged into a single `Compare`. The `if` emitter then
//! works with source-level anchors instead of raw branch targets, so a
//! short-circuit guard can never leak out as a nested `if`.

use crate::{
    ast::{AstExpr, AstStmt, BoolOpKind, CmpOpKind, ExprId, StmtId, UnaryOpKind},
    cfg::{BlockId, EdgeKind},
    error::DecompileResult,
    opcode::Opcode,
    pattern::{BoolOpPattern, TernaryPattern},
    stack::StackValue,
    tracer::DecompileTracer,
};

use super::Decompiler;

impl<Tr: DecompileTracer> Decompiler<'_, Tr> {
    /// Logical negation with the obvious simplifications.
    pub(crate) fn negate_expr(&mut self, expr: ExprId) -> ExprId {
        match self.arena.get_expr(expr).clone() {
            AstExpr::UnaryOp {
                op: UnaryOpKind::Not,
                operand,
            } => operand,
            AstExpr::Compare {
                left,
                ops,
                comparators,
            } if ops.len() == 1 => match ops[0].negated() {
                Some(negated) => self.arena.expr(AstExpr::Compare {
                    left,
                    ops: vec![negated],
                    comparators,
                }),
                None => self.wrap_not(expr),
            },
            _ => self.wrap_not(expr),
        }
    }

    fn wrap_not(&mut self, operand: ExprId) -> ExprId {
        self.arena.expr(AstExpr::UnaryOp {
            op: UnaryOpKind::Not,
            operand,
        })
    }

    /// Joins two conditions with `and`/`or`, flattening nested `BoolOp`s
    /// and merging comparison chains (`a < b and b < c` → `a < b < c`).
    pub(crate) fn join_bool(&mut self, op: BoolOpKind, left: ExprId, right: ExprId) -> ExprId {
        if op == BoolOpKind::And {
            if let Some(merged) = self.merge_compare_chain(left, right) {
                return merged;
            }
        }
        let mut values = match self.arena.get_expr(left).clone() {
            AstExpr::BoolOp {
                op: existing,
                values,
            } if existing == op => values,
            _ => vec![left],
        };
        match self.arena.get_expr(right).clone() {
            AstExpr::BoolOp {
                op: existing,
                values: more,
            } if existing == op => values.extend(more),
            _ => values.push(right),
        }
        // A chain may complete only once the right side arrives.
        if op == BoolOpKind::And && values.len() >= 2 {
            let mut folded = vec![values[0]];
            for &value in &values[1..] {
                let last = *folded.last().expect("non-empty");
                match self.merge_compare_chain(last, value) {
                    Some(merged) => *folded.last_mut().expect("non-empty") = merged,
                    None => folded.push(value),
                }
            }
            values = folded;
        }
        if values.len() == 1 {
            values[0]
        } else {
            self.arena.expr(AstExpr::BoolOp { op, values })
        }
    }

    /// `a OP b and b OP c` → `a OP b OP c`, when the middle operand is the
    /// duplicated one the chained encoding produces.
    fn merge_compare_chain(&mut self, left: ExprId, right: ExprId) -> Option<ExprId> {
        let (l_left, l_ops, l_comparators) = match self.arena.get_expr(left) {
            AstExpr::Compare {
                left,
                ops,
                comparators,
            } => (*left, ops.clone(), comparators.clone()),
            _ => return None,
        };
        let (r_left, r_ops, r_comparators) = match self.arena.get_expr(right) {
            AstExpr::Compare {
                left,
                ops,
                comparators,
            } => (*left, ops.clone(), comparators.clone()),
            _ => return None,
        };
        if l_ops.iter().any(|op| !chains(*op)) || r_ops.iter().any(|op| !chains(*op)) {
            return None;
        }
        let last = *l_comparators.last()?;
        if !self.arena.exprs_equal(last, r_left) {
            return None;
        }
        let mut ops = l_ops;
        ops.extend(r_ops);
        let mut comparators = l_comparators;
        comparators.extend(r_comparators);
        Some(self.arena.expr(AstExpr::Compare {
            left: l_left,
            ops,
            comparators,
        }))
    }

    /// True when `block` computes a condition and nothing else: balanced
    /// stack, no statements, conditional exit, single predecessor.
    fn is_pure_condition(&mut self, block: BlockId) -> bool {
        if self.consumed.contains(block.index()) || self.cfg.block(block).is_loop_header {
            return false;
        }
        let terminator = self.cfg.terminator(block);
        if !terminator.opcode.is_conditional_jump() || terminator.opcode.keeps_value_when_taken() {
            return false;
        }
        if self.cfg.block(block).preds.len() != 1 {
            return false;
        }
        let Some(seed) = self.stack_in[block.index()].clone() else {
            return false;
        };
        let depth = seed.len();
        match self.run_sim_seeded(block, seed, true, true) {
            Ok(outcome) => outcome.statements.is_empty() && outcome.exit_stack.len() == depth,
            Err(_) => false,
        }
    }

    /// Rebuilds the full boolean condition anchored at `block`.
    ///
    /// Returns `(condition, true_entry, false_entry)`; any statements the
    /// root condition block computed first go to `out`. Folded blocks are
    /// consumed.
    pub(crate) fn fold_condition(
        &mut self,
        block: BlockId,
        out: &mut Vec<StmtId>,
    ) -> DecompileResult<(ExprId, BlockId, BlockId)> {
        self.consumed.insert(block.index());
        let outcome = self.run_sim_or_fallback(block)?;
        self.absorb(outcome.global_names, outcome.nonlocal_names);
        let preamble = self.lower_stmts(outcome.statements)?;
        out.extend(preamble);
        let condition = match outcome.last_condition {
            Some(condition) => condition,
            None => self.true_expr(),
        };
        let basic_block = self.cfg.block(block);
        let (mut true_target, mut false_target) = match (
            basic_block.edge(EdgeKind::ConditionalTrue),
            basic_block.edge(EdgeKind::ConditionalFalse),
        ) {
            (Some(t), Some(f)) => (t, f),
            _ => {
                let next = self.cfg.next_block(block).unwrap_or(block);
                return Ok((condition, next, next));
            }
        };
        let mut condition = condition;

        loop {
            // Fold the true side: `c and rest`.
            if true_target != false_target && self.foldable_into(true_target, false_target) {
                let (inner, inner_true, inner_false) = self.fold_subcondition(true_target)?;
                if inner_false == false_target {
                    condition = self.join_bool(BoolOpKind::And, condition, inner);
                    true_target = inner_true;
                    continue;
                }
                if inner_true == false_target {
                    let negated = self.negate_expr(inner);
                    condition = self.join_bool(BoolOpKind::And, condition, negated);
                    true_target = inner_false;
                    continue;
                }
                break;
            }
            // Fold the false side: `c or rest`.
            if true_target != false_target && self.foldable_into(false_target, true_target) {
                let (inner, inner_true, inner_false) = self.fold_subcondition(false_target)?;
                if inner_true == true_target {
                    condition = self.join_bool(BoolOpKind::Or, condition, inner);
                    false_target = inner_false;
                    continue;
                }
                if inner_false == true_target {
                    let negated = self.negate_expr(inner);
                    condition = self.join_bool(BoolOpKind::Or, condition, negated);
                    false_target = inner_true;
                    continue;
                }
                break;
            }
            break;
        }

        Ok((condition, true_target, false_target))
    }

    /// Pre-check that a candidate's own branches anchor on the shared
    /// target, so folding cannot wander out of the condition region.
    fn foldable_into(&mut self, candidate: BlockId, shared: BlockId) -> bool {
        if !self.is_pure_condition(candidate) {
            return false;
        }
        let candidate_block = self.cfg.block(candidate);
        let edges = (
            candidate_block.edge(EdgeKind::ConditionalTrue),
            candidate_block.edge(EdgeKind::ConditionalFalse),
        );
        matches!(edges, (Some(t), Some(f)) if t == shared || f == shared)
    }

    fn fold_subcondition(&mut self, block: BlockId) -> DecompileResult<(ExprId, BlockId, BlockId)> {
        let mut scratch = Vec::new();
        let folded = self.fold_condition(block, &mut scratch)?;
        // A pure condition has no statements by definition; anything that
        // slipped through is dropped with the block consumed.
        Ok(folded)
    }

    /// Emits an `if` region rooted at `pattern.condition_block`.
    pub(crate) fn emit_if(
        &mut self,
        pattern: &crate::pattern::IfPattern,
        within: Option<&crate::scratch::BitSet>,
        out: &mut Vec<StmtId>,
    ) -> DecompileResult<Option<BlockId>> {
        let (condition, true_entry, false_entry) = self.fold_condition(pattern.condition_block, out)?;
        let merge = self.postdom.common_post_dominator(true_entry, false_entry);

        let (test, body, orelse, next) = if merge == Some(false_entry) {
            // No else: the false edge goes straight to the join.
            let body = self.emit_region(Some(true_entry), &[false_entry], within)?;
            (condition, body, Vec::new(), Some(false_entry))
        } else if merge == Some(true_entry) {
            // The true edge goes straight to the join: `if not c:`.
            let test = self.negate_expr(condition);
            let body = self.emit_region(Some(false_entry), &[true_entry], within)?;
            (test, body, Vec::new(), Some(true_entry))
        } else if let Some(merge) = merge {
            let body = self.emit_region(Some(true_entry), &[false_entry, merge], within)?;
            let orelse = self.emit_region(Some(false_entry), &[merge], within)?;
            (condition, body, orelse, Some(merge))
        } else {
            // Both arms terminate; emit the true arm as the body and
            // continue at the false arm (the flat, canonical layout).
            let body = self.emit_region(Some(true_entry), &[false_entry], within)?;
            (condition, body, Vec::new(), Some(false_entry))
        };

        let body = if body.is_empty() {
            vec![self.arena.stmt(AstStmt::Pass)]
        } else {
            body
        };

        // `assert` re-forms from `if not c: raise AssertionError(...)`.
        if orelse.is_empty() && body.len() == 1 {
            if let Some(statement) = self.as_assert(test, body[0]) {
                out.push(statement);
                return Ok(next);
            }
        }

        let statement = self.arena.stmt(AstStmt::If { test, body, orelse });
        out.push(statement);
        Ok(next)
    }

    fn as_assert(&mut self, test: ExprId, body: StmtId) -> Option<StmtId> {
        let AstStmt::Raise {
            exc: Some(exc),
            cause: None,
        } = self.arena.get_stmt(body).clone()
        else {
            return None;
        };
        let (is_assertion, msg) = match self.arena.get_expr(exc).clone() {
            AstExpr::Name(name) => (&*name == "AssertionError", None),
            AstExpr::Call { func, args, .. } => match self.arena.get_expr(func) {
                AstExpr::Name(name) if &**name == "AssertionError" => (true, args.first().copied()),
                _ => (false, None),
            },
            _ => (false, None),
        };
        if !is_assertion {
            return None;
        }
        let test = self.negate_expr(test);
        Some(self.arena.stmt(AstStmt::Assert { test, msg }))
    }

    /// Emits a ternary region if the arms verify as expression-only;
    /// returns the merge block to continue at, or `None` to fall back.
    pub(crate) fn emit_ternary(
        &mut self,
        pattern: &TernaryPattern,
        out: &mut Vec<StmtId>,
    ) -> DecompileResult<Option<BlockId>> {
        if self.cfg.block(pattern.condition_block).is_loop_header {
            return Ok(None);
        }
        let saved_override = self
            .seed_overrides
            .get(&(pattern.condition_block.index() as u32))
            .cloned();

        let (seed, lenient) = self.seed_for(pattern.condition_block);
        let Ok(outcome) = self.run_sim_seeded(pattern.condition_block, seed, lenient, true) else {
            self.restore_override(pattern.condition_block, saved_override);
            return Ok(None);
        };
        let Some(condition) = outcome.last_condition else {
            self.restore_override(pattern.condition_block, saved_override);
            return Ok(None);
        };
        let base = outcome.exit_stack.clone();

        let Some(true_value) = self.arm_value(pattern.true_block, &base, pattern.merge_block) else {
            self.restore_override(pattern.condition_block, saved_override);
            return Ok(None);
        };
        let Some(false_value) = self.arm_value(pattern.false_block, &base, pattern.merge_block) else {
            self.restore_override(pattern.condition_block, saved_override);
            return Ok(None);
        };

        // Commit.
        self.consumed.insert(pattern.condition_block.index());
        self.consumed.insert(pattern.true_block.index());
        self.consumed.insert(pattern.false_block.index());
        self.absorb(outcome.global_names, outcome.nonlocal_names);
        let preamble = self.lower_stmts(outcome.statements)?;
        out.extend(preamble);

        let value = self.arena.expr(AstExpr::IfExp {
            test: condition,
            body: true_value,
            orelse: false_value,
        });
        let mut merged_seed = base;
        merged_seed.push(StackValue::Expr(value));
        self.seed_overrides
            .insert(pattern.merge_block.index() as u32, merged_seed);
        Ok(Some(pattern.merge_block))
    }

    fn restore_override(&mut self, block: BlockId, saved: Option<Vec<StackValue>>) {
        if let Some(saved) = saved {
            self.seed_overrides.insert(block.index() as u32, saved);
        }
    }

    /// The single expression an expression-only arm pushes, recursing into
    /// nested ternaries for chained conditionals.
    fn arm_value(&mut self, arm: BlockId, base: &[StackValue], merge: BlockId) -> Option<ExprId> {
        // A nested diamond meeting at the same merge is a chained ternary.
        if let Some(nested) = self.analyze(|analyzer| analyzer.detect_ternary(arm)) {
            if nested.merge_block == merge && nested.condition_block == arm {
                let mut scratch = Vec::new();
                if let Ok(Some(next)) = self.emit_ternary(&nested, &mut scratch) {
                    if next == merge && scratch.is_empty() {
                        let seed = self.seed_overrides.swap_remove(&(merge.index() as u32))?;
                        if let Some(StackValue::Expr(value)) = seed.last() {
                            return Some(*value);
                        }
                    }
                }
                return None;
            }
        }
        let outcome = self.run_sim_seeded(arm, base.to_vec(), true, true).ok()?;
        if !outcome.statements.is_empty() || outcome.exit_stack.len() != base.len() + 1 {
            return None;
        }
        match outcome.exit_stack.last()? {
            StackValue::Expr(value) => Some(*value),
            _ => None,
        }
    }

    /// Emits a boolean short-circuit value region; returns the merge block
    /// to continue at, or `None` to fall back to statement patterns.
    pub(crate) fn emit_bool_op(
        &mut self,
        pattern: &BoolOpPattern,
        out: &mut Vec<StmtId>,
    ) -> DecompileResult<Option<BlockId>> {
        if self.cfg.block(pattern.condition_block).is_loop_header {
            return Ok(None);
        }
        let saved_override = self
            .seed_overrides
            .get(&(pattern.condition_block.index() as u32))
            .cloned();
        let (seed, lenient) = self.seed_for(pattern.condition_block);
        let Ok(outcome) = self.run_sim_seeded(pattern.condition_block, seed, lenient, true) else {
            self.restore_override(pattern.condition_block, saved_override);
            return Ok(None);
        };
        let Some(lhs) = outcome.last_condition else {
            self.restore_override(pattern.condition_block, saved_override);
            return Ok(None);
        };
        let base = outcome.exit_stack.clone();
        if base.is_empty() {
            return Ok(None);
        }

        // The right-hand side must be expression-only and flow to a single
        // exit.
        let drop_first = pattern.copies_value.then_some(lhs);
        let Some((rhs_value, rhs_exit, rhs_stack)) = self.bool_rhs(pattern.rhs_block, &base, drop_first) else {
            self.restore_override(pattern.condition_block, saved_override);
            return Ok(None);
        };

        // The taken edge either lands on the same exit or on a small
        // stack-cleanup block in front of it.
        let merge = if pattern.merge_block == rhs_exit {
            rhs_exit
        } else if self.is_cleanup_block(pattern.merge_block, rhs_exit) {
            self.consumed.insert(pattern.merge_block.index());
            rhs_exit
        } else {
            self.restore_override(pattern.condition_block, saved_override);
            return Ok(None);
        };

        // Commit.
        self.consumed.insert(pattern.condition_block.index());
        self.consumed.insert(pattern.rhs_block.index());
        self.absorb(outcome.global_names, outcome.nonlocal_names);
        let preamble = self.lower_stmts(outcome.statements)?;
        out.extend(preamble);

        let op = if pattern.is_and { BoolOpKind::And } else { BoolOpKind::Or };
        let value = self.join_bool(op, lhs, rhs_value);
        // The merged value continues with the right side's stack shape (a
        // chained comparison consumes the duplicated middle operand there).
        let mut merged_seed = rhs_stack;
        match merged_seed.last_mut() {
            Some(top) => *top = StackValue::Expr(value),
            None => merged_seed.push(StackValue::Expr(value)),
        }
        self.seed_overrides.insert(merge.index() as u32, merged_seed);
        Ok(Some(merge))
    }

    /// Evaluates the right-hand region of a short-circuit: one
    /// expression-only block (possibly a nested short-circuit), returning
    /// its value, the block it flows into, and its exit stack.
    fn bool_rhs(
        &mut self,
        block: BlockId,
        base: &[StackValue],
        drop_first: Option<ExprId>,
    ) -> Option<(ExprId, BlockId, Vec<StackValue>)> {
        // Nested short-circuit with a deeper chain.
        if let Some(nested) = self.analyze(|analyzer| analyzer.detect_bool_op(block)) {
            let mut scratch = Vec::new();
            if let Ok(Some(merge)) = self.emit_bool_op(&nested, &mut scratch) {
                if scratch.is_empty() {
                    let seed = self.seed_overrides.swap_remove(&(merge.index() as u32))?;
                    if let Some(StackValue::Expr(value)) = seed.last() {
                        return Some((*value, merge, seed.clone()));
                    }
                }
            }
            return None;
        }

        // The or-pop edge consumed the tested value implicitly; the copy
        // form pops it with an explicit POP_TOP below. The right side may
        // also consume duplicated operands underneath (chained
        // comparisons), so depth may shrink but never grow.
        let mut seed = base.to_vec();
        if drop_first.is_none() {
            seed.pop();
        }
        let outcome = self.run_sim_seeded(block, seed, true, true).ok()?;
        let mut statements = outcome.statements;
        if let Some(expected) = drop_first {
            match statements.first() {
                Some(crate::sim::SimStmt::Plain(AstStmt::Expr(id))) if *id == expected => {
                    statements.remove(0);
                }
                _ => {}
            }
        }
        if !statements.is_empty() {
            return None;
        }
        if outcome.exit_stack.is_empty() || outcome.exit_stack.len() > base.len() {
            return None;
        }
        let value = match outcome.exit_stack.last()? {
            StackValue::Expr(value) => *value,
            _ => return None,
        };
        let exit = self
            .cfg
            .block(block)
            .normal_successors()
            .map(|edge| edge.target)
            .next()?;
        Some((value, exit, outcome.exit_stack))
    }

    /// A block that only reshuffles the stack before the real merge.
    fn is_cleanup_block(&self, block: BlockId, exit: BlockId) -> bool {
        let instructions = self.cfg.instructions_of(block);
        let shuffles_only = instructions.iter().all(|instruction| {
            matches!(
                instruction.opcode,
                Opcode::RotTwo | Opcode::RotThree | Opcode::PopTop | Opcode::Nop | Opcode::Swap | Opcode::JumpForward
            )
        });
        shuffles_only
            && self
                .cfg
                .block(block)
                .normal_successors()
                .all(|edge| edge.target == exit)
    }
}

/// Comparison operators that participate in chained form.
fn chains(op: CmpOpKind) -> bool {
    matches!(
        op,
        CmpOpKind::Lt | CmpOpKind::LtE | CmpOpKind::Gt | CmpOpKind::GtE | CmpOpKind::Eq | CmpOpKind::NotEq
    )
}
