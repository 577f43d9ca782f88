//! `match` statement reconstruction.
//!
//! Two recognizers. Literal case chains (including OR-patterns) have no
//! dedicated opcode: they read as equality tests against a subject that is
//! duplicated before every test, which is exactly how they are told apart
//! from a hand-written `if x == 1 or x == 2` (that form reloads `x`
//! instead of duplicating it). Structural patterns announce themselves
//! through `MATCH_SEQUENCE`/`MATCH_MAPPING`/`MATCH_CLASS`; the common
//! shapes are rebuilt here and anything more exotic degrades to the
//! simulator's opaque fallback, never to wrong output.

use crate::{
    ast::{AstExpr, AstStmt, CmpOpKind, ExprId, MatchCase, Pattern, StmtId},
    cfg::{BlockId, EdgeKind},
    error::DecompileResult,
    opcode::Opcode,
    pattern::MatchPattern,
    stack::StackValue,
    tracer::DecompileTracer,
};

use super::Decompiler;

/// One recognized case: its literal test values and body entry.
struct LiteralCase {
    values: Vec<ExprId>,
    body_entry: BlockId,
    is_default: bool,
}

/// Recognizes and emits a literal-pattern `match` chain rooted at `block`.
/// Returns the continuation block, or `None` when this is not a match.
pub(super) fn try_emit_match<Tr: DecompileTracer>(
    decompiler: &mut Decompiler<'_, Tr>,
    block: BlockId,
    out: &mut Vec<StmtId>,
) -> DecompileResult<Option<BlockId>> {
    // Cheap shape gate before any simulation: the block must duplicate a
    // value and compare it for equality.
    let instructions = decompiler.cfg.instructions_of(block);
    let duplicates = instructions
        .iter()
        .any(|instruction| matches!(instruction.opcode, Opcode::Copy | Opcode::DupTop));
    let compares_equal = instructions
        .iter()
        .any(|instruction| instruction.opcode == Opcode::CompareOp);
    let conditional = decompiler.cfg.terminator(block).opcode.is_conditional_jump();
    if !(duplicates && compares_equal && conditional) {
        return Ok(None);
    }

    // Walk the test chain, collecting equality tests per body target.
    let mut subject: Option<ExprId> = None;
    let mut cases: Vec<LiteralCase> = Vec::new();
    let mut preamble: Vec<StmtId> = Vec::new();
    let mut visited: Vec<BlockId> = Vec::new();
    let mut current = block;
    let root_override = decompiler.seed_overrides.get(&(block.index() as u32)).cloned();

    loop {
        let (seed, lenient) = decompiler.seed_for(current);
        let Ok(outcome) = decompiler.run_sim_seeded(current, seed.clone(), lenient, true) else {
            restore_root(decompiler, block, root_override);
            return Ok(None);
        };
        let Some(condition) = outcome.last_condition else {
            restore_root(decompiler, block, root_override);
            return Ok(None);
        };
        let AstExpr::Compare {
            left,
            ops,
            comparators,
        } = decompiler.arena.get_expr(condition).clone()
        else {
            restore_root(decompiler, block, root_override);
            return Ok(None);
        };
        if ops != vec![CmpOpKind::Eq] || comparators.len() != 1 {
            restore_root(decompiler, block, root_override);
            return Ok(None);
        }
        match subject {
            None => {
                subject = Some(left);
                let lowered = decompiler.lower_stmts(outcome.statements)?;
                preamble = lowered;
            }
            Some(existing) if decompiler.arena.exprs_equal(existing, left) => {
                if !outcome.statements.is_empty() {
                    restore_root(decompiler, block, root_override);
                    return Ok(None);
                }
            }
            Some(_) => {
                restore_root(decompiler, block, root_override);
                return Ok(None);
            }
        }
        // The duplicated subject must survive the test on the stack.
        if !matches!(outcome.exit_stack.last(), Some(StackValue::Expr(_))) {
            restore_root(decompiler, block, root_override);
            return Ok(None);
        }
        visited.push(current);

        let value = comparators[0];
        let basic_block = decompiler.cfg.block(current);
        let terminator = decompiler.cfg.terminator(current).opcode;
        let (match_side, fail_side) = match (
            basic_block.edge(EdgeKind::ConditionalTrue),
            basic_block.edge(EdgeKind::ConditionalFalse),
        ) {
            (Some(true_side), Some(false_side)) => (true_side, false_side),
            _ => {
                restore_root(decompiler, block, root_override);
                return Ok(None);
            }
        };

        // Attach this test to the case keyed by its body entry.
        match cases.iter_mut().find(|case| case.body_entry == match_side) {
            Some(case) => case.values.push(value),
            None => cases.push(LiteralCase {
                values: vec![value],
                body_entry: match_side,
                is_default: false,
            }),
        }

        // A fail side that is another test continues the chain; anything
        // else ends it.
        let fail_instructions = decompiler.cfg.instructions_of(fail_side);
        let continues = decompiler.cfg.terminator(fail_side).opcode.is_conditional_jump()
            && fail_instructions
                .iter()
                .any(|instruction| instruction.opcode == Opcode::CompareOp)
            && !decompiler.consumed.contains(fail_side.index());
        if continues && terminator != Opcode::JumpIfNotExcMatch {
            current = fail_side;
        } else {
            cases.push(LiteralCase {
                values: Vec::new(),
                body_entry: fail_side,
                is_default: true,
            });
            break;
        }
    }

    // One test is an `if`; a match needs a real chain.
    let test_count: usize = cases.iter().map(|case| case.values.len()).sum();
    if test_count < 2 || cases.len() < 2 {
        restore_root(decompiler, block, root_override);
        return Ok(None);
    }
    let Some(subject) = subject else {
        restore_root(decompiler, block, root_override);
        return Ok(None);
    };

    // Commit: emit each case body; the leading pop of the subject copy is
    // plumbing.
    for block in visited {
        decompiler.consumed.insert(block.index());
    }
    let mut emitted_cases = Vec::with_capacity(cases.len());
    let mut exit: Option<BlockId> = None;
    for case in cases {
        let (body, case_exit) = emit_case_body(decompiler, case.body_entry, subject, exit)?;
        if exit.is_none() {
            exit = case_exit;
        }
        let pattern = if case.is_default {
            Pattern::As {
                pattern: None,
                name: None,
            }
        } else if case.values.len() == 1 {
            Pattern::Value(case.values[0])
        } else {
            Pattern::Or(case.values.into_iter().map(Pattern::Value).collect())
        };
        emitted_cases.push(MatchCase {
            pattern,
            guard: None,
            body,
        });
    }

    out.extend(preamble);
    let statement = decompiler.arena.stmt(AstStmt::Match {
        subject,
        cases: emitted_cases,
    });
    out.push(statement);
    Ok(Some(exit.unwrap_or_else(|| {
        decompiler
            .cfg
            .next_block(block)
            .unwrap_or(block)
    })))
}

/// Emits one case body, stripping the subject-copy pop and recording where
/// the body jumps afterwards.
fn emit_case_body<Tr: DecompileTracer>(
    decompiler: &mut Decompiler<'_, Tr>,
    entry: BlockId,
    subject: ExprId,
    stop: Option<BlockId>,
) -> DecompileResult<(Vec<StmtId>, Option<BlockId>)> {
    // The statement exit is where the body's escape jump lands; follow
    // fallthroughs from the entry to the jump when the body spans blocks.
    let mut exit = stop;
    let mut cursor = entry;
    for _ in 0..decompiler.cfg.num_blocks() {
        let terminator = decompiler.cfg.terminator(cursor);
        if terminator.opcode.is_unconditional_jump() {
            if let Some(target) = decompiler.cfg.block(cursor).edge(crate::cfg::EdgeKind::Jump) {
                if decompiler.cfg.block(target).start_offset > decompiler.cfg.block(entry).start_offset {
                    exit = Some(target);
                }
            }
            break;
        }
        if terminator.opcode.is_block_end_no_successor() {
            break;
        }
        match decompiler.cfg.block(cursor).edge(crate::cfg::EdgeKind::Fallthrough) {
            Some(next) if Some(next) != stop => cursor = next,
            _ => break,
        }
    }
    let stops: Vec<BlockId> = exit.into_iter().collect();
    let mut body = decompiler.emit_region(Some(entry), &stops, None)?;
    if let Some(&first) = body.first() {
        if let AstStmt::Expr(id) = decompiler.arena.get_stmt(first) {
            if decompiler.arena.exprs_equal(*id, subject) {
                body.remove(0);
            }
        }
    }
    if body.is_empty() {
        body.push(decompiler.arena.stmt(AstStmt::Pass));
    }
    Ok((body, exit))
}

/// Emits a `match` whose cases use the structural pattern opcodes.
///
/// The common sequence/class shapes are rebuilt; a region that does not
/// parse falls back to opaque straight-line emission of its blocks, which
/// keeps the output valid (if less pretty) instead of guessing.
pub(super) fn emit_structural_match<Tr: DecompileTracer>(
    decompiler: &mut Decompiler<'_, Tr>,
    pattern: &MatchPattern,
    out: &mut Vec<StmtId>,
) -> DecompileResult<Option<BlockId>> {
    let Some(subject) = structural_subject(decompiler, pattern.subject_block) else {
        // Unparseable region: opaque fallback for the subject block, then
        // continue sequentially.
        let outcome = decompiler.run_sim_or_fallback(pattern.subject_block)?;
        let lowered = decompiler.lower_stmts(outcome.statements)?;
        out.extend(lowered);
        return Ok(decompiler.cfg.next_block(pattern.subject_block));
    };

    let mut cases = Vec::new();
    let mut exit = pattern.exit_block;
    for &case_block in &pattern.case_blocks {
        decompiler.consumed.insert(case_block.index());
        let Some((case_pattern, body_entry)) = parse_structural_case(decompiler, case_block) else {
            continue;
        };
        let (body, case_exit) = emit_case_body(decompiler, body_entry, subject, exit)?;
        if exit.is_none() {
            exit = case_exit;
        }
        cases.push(MatchCase {
            pattern: case_pattern,
            guard: None,
            body,
        });
    }

    // A trailing non-test block is the wildcard case.
    if let Some(default_entry) = pattern.exit_block {
        if !decompiler.consumed.contains(default_entry.index())
            && decompiler
                .cfg
                .block(default_entry)
                .preds
                .iter()
                .all(|pred| pattern.case_blocks.contains(pred))
        {
            let (body, case_exit) = emit_case_body(decompiler, default_entry, subject, None)?;
            exit = case_exit.or(exit);
            cases.push(MatchCase {
                pattern: Pattern::As {
                    pattern: None,
                    name: None,
                },
                guard: None,
                body,
            });
        }
    }

    let statement = decompiler.arena.stmt(AstStmt::Match { subject, cases });
    out.push(statement);
    Ok(exit)
}

/// The subject expression: whatever the case block's entry stack tests.
fn structural_subject<Tr: DecompileTracer>(
    decompiler: &mut Decompiler<'_, Tr>,
    subject_block: BlockId,
) -> Option<ExprId> {
    let (seed, _) = decompiler.seed_for(subject_block);
    // Re-arm the seed; this probe must not consume it.
    decompiler
        .seed_overrides
        .insert(subject_block.index() as u32, seed.clone());
    match seed.last() {
        Some(StackValue::Expr(id)) => Some(*id),
        _ => None,
    }
}

/// Parses one structural case block into a pattern and its body entry.
fn parse_structural_case<Tr: DecompileTracer>(
    decompiler: &mut Decompiler<'_, Tr>,
    case_block: BlockId,
) -> Option<(Pattern, BlockId)> {
    let instructions: Vec<_> = decompiler.cfg.instructions_of(case_block).to_vec();
    let basic_block = decompiler.cfg.block(case_block);
    let match_side = basic_block.edge(EdgeKind::ConditionalTrue)?;

    let has = |opcode: Opcode| instructions.iter().any(|instruction| instruction.opcode == opcode);

    if has(Opcode::MatchSequence) {
        // `case [a, b, c]`: the body entry unpacks the subject; read the
        // element count from the length test when present.
        let count = instructions
            .iter()
            .zip(instructions.iter().skip(1))
            .find_map(|(first, second)| {
                (first.opcode == Opcode::LoadConst && second.opcode == Opcode::CompareOp)
                    .then(|| decompiler.code.const_at(first.arg))
                    .flatten()
                    .and_then(crate::object::Object::as_int)
            });
        let captures = sequence_captures(decompiler, match_side, count.unwrap_or(0) as usize);
        return Some((Pattern::Sequence(captures), match_side));
    }
    if has(Opcode::MatchMapping) {
        return Some((
            Pattern::Mapping {
                keys: Vec::new(),
                patterns: Vec::new(),
                rest: None,
            },
            match_side,
        ));
    }
    if has(Opcode::MatchClass) {
        // The class expression is loaded right before MATCH_CLASS's operand
        // setup; simulate the prefix to recover it.
        let (seed, _) = decompiler.seed_for(case_block);
        let class_expr = decompiler
            .run_sim_seeded(case_block, seed.clone(), true, false)
            .ok()
            .and_then(|outcome| match outcome.exit_stack.last() {
                Some(StackValue::Expr(id)) => Some(*id),
                _ => None,
            })
            .unwrap_or_else(|| decompiler.arena.name("object".into()));
        decompiler
            .seed_overrides
            .insert(case_block.index() as u32, seed);
        return Some((
            Pattern::Class {
                cls: class_expr,
                patterns: Vec::new(),
                kwd_attrs: Vec::new(),
                kwd_patterns: Vec::new(),
            },
            match_side,
        ));
    }
    None
}

/// Capture names from the unpack stores at a sequence-case body entry.
fn sequence_captures<Tr: DecompileTracer>(
    decompiler: &mut Decompiler<'_, Tr>,
    body_entry: BlockId,
    count: usize,
) -> Vec<Pattern> {
    let mut captures = Vec::new();
    for instruction in decompiler.cfg.instructions_of(body_entry) {
        match instruction.opcode {
            Opcode::StoreFast | Opcode::StoreName => {
                let name = match instruction.opcode {
                    Opcode::StoreFast => decompiler.code.varname_at(instruction.arg),
                    _ => decompiler.code.name_at(instruction.arg),
                };
                if let Some(name) = name {
                    captures.push(Pattern::As {
                        pattern: None,
                        name: Some(name.clone()),
                    });
                }
            }
            Opcode::UnpackSequence => {}
            _ if captures.is_empty() => {}
            _ => break,
        }
    }
    while captures.len() < count {
        captures.push(Pattern::As {
            pattern: None,
            name: None,
        });
    }
    captures
}

/// Puts back a seed override consumed while probing a non-match.
fn restore_root<Tr: DecompileTracer>(
    decompiler: &mut Decompiler<'_, Tr>,
    block: BlockId,
    saved: Option<Vec<StackValue>>,
) {
    if let Some(saved) = saved {
        decompiler.seed_overrides.insert(block.index() as u32, saved);
    }
}
