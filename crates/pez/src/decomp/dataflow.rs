//! Entry-stack inference.
//!
//! A worklist pass runs the simulator in flow mode (no statement output)
//! over every reachable block and propagates the exit stack along each
//! normal successor edge, adjusted for the terminator's branch-specific
//! effect. Merges unify element-wise: agreeing values survive, anything
//! else becomes `Unknown`, and differing depths align at the top of stack.
//! The `{concrete, unknown}` lattice over bounded depth gives termination.

use std::collections::VecDeque;

use crate::{
    cfg::{BlockId, EdgeKind},
    error::DecompileResult,
    opcode::Opcode,
    stack::StackValue,
    tracer::DecompileTracer,
};

use super::Decompiler;

pub(super) fn compute_entry_stacks<Tr: DecompileTracer>(
    decompiler: &mut Decompiler<'_, Tr>,
) -> DecompileResult<()> {
    let entry = decompiler.cfg.entry;
    decompiler.stack_in[entry.index()] = Some(Vec::new());

    let mut queue: VecDeque<BlockId> = VecDeque::new();
    let mut queued = vec![false; decompiler.cfg.num_blocks()];
    queue.push_back(entry);
    queued[entry.index()] = true;

    while let Some(block) = queue.pop_front() {
        queued[block.index()] = false;
        let seed = decompiler.stack_in[block.index()].clone().unwrap_or_default();
        let depth_in = seed.len();

        // Flow mode: lenient, no emission; a block the simulator cannot
        // model contributes an all-unknown stack of unchanged depth.
        let exit_stack = match decompiler.run_sim_seeded(block, seed, true, false) {
            Ok(outcome) => outcome.exit_stack,
            Err(_) => vec![StackValue::Unknown; depth_in],
        };

        let terminator = *decompiler.cfg.terminator(block);
        let edges: Vec<_> = decompiler.cfg.block(block).edges.iter().copied().collect();
        for edge in edges {
            if !edge.kind.is_normal() {
                continue;
            }
            let mut out = exit_stack.clone();
            adjust_for_edge(&mut out, terminator.opcode, edge.kind, decompiler.version.gte(3, 12));
            if merge_into(decompiler, edge.target, out) && !queued[edge.target.index()] {
                queued[edge.target.index()] = true;
                queue.push_back(edge.target);
            }
        }
    }

    // Every block on a normal path from the entry must have been reached;
    // a hole here means the propagation itself is broken, not the input.
    let mut reachable = vec![false; decompiler.cfg.num_blocks()];
    let mut stack = vec![entry];
    reachable[entry.index()] = true;
    while let Some(block) = stack.pop() {
        for edge in decompiler.cfg.block(block).normal_successors() {
            if !reachable[edge.target.index()] {
                reachable[edge.target.index()] = true;
                stack.push(edge.target);
            }
        }
    }
    for (index, &reached) in reachable.iter().enumerate() {
        if reached && decompiler.stack_in[index].is_none() {
            return Err(crate::error::DecompileError::new(
                crate::error::DecompileErrorKind::UnexpectedEmptyWorklist,
            )
            .with_context(decompiler.context(crate::cfg::BlockId::new(index))));
        }
    }
    Ok(())
}

/// Branch-specific stack adjustment on top of the block's exit shape.
fn adjust_for_edge(stack: &mut Vec<StackValue>, opcode: Opcode, kind: EdgeKind, end_for_era: bool) {
    match opcode {
        // The simulator pushed the next-value; before 3.12 the exit edge
        // sees neither it nor the iterator, from 3.12 on the END_FOR /
        // POP_TOP epilogue pops both explicitly.
        Opcode::ForIter | Opcode::ForLoop => {
            if kind == EdgeKind::ConditionalFalse && !end_for_era {
                stack.pop();
                stack.pop();
            }
        }
        // The tested value survives only the short-circuit edge.
        Opcode::JumpIfTrueOrPop => {
            if kind == EdgeKind::ConditionalFalse {
                stack.pop();
            }
        }
        Opcode::JumpIfFalseOrPop => {
            if kind == EdgeKind::ConditionalTrue {
                stack.pop();
            }
        }
        // Peek conditionals leave the value for an explicit POP_TOP on
        // both sides; nothing to adjust.
        Opcode::JumpIfTrue | Opcode::JumpIfFalse => {}
        // Pop-style conditionals already popped during simulation.
        _ => {}
    }
}

/// Merges `incoming` into the recorded entry stack of `target`. Returns
/// true when the recorded stack changed.
fn merge_into<Tr: DecompileTracer>(
    decompiler: &mut Decompiler<'_, Tr>,
    target: BlockId,
    incoming: Vec<StackValue>,
) -> bool {
    match decompiler.stack_in[target.index()].take() {
        None => {
            decompiler.stack_in[target.index()] = Some(incoming);
            true
        }
        Some(existing) => {
            let merged = unify(decompiler, &existing, &incoming);
            let changed = !stacks_equal(decompiler, &existing, &merged);
            decompiler.stack_in[target.index()] = Some(merged);
            changed
        }
    }
}

/// Element-wise unification, aligned at the top of stack. Missing slots and
/// disagreements become `Unknown`; an existing `Unknown` never recovers
/// (monotonicity is what terminates the fixpoint).
fn unify<Tr: DecompileTracer>(
    decompiler: &Decompiler<'_, Tr>,
    existing: &[StackValue],
    incoming: &[StackValue],
) -> Vec<StackValue> {
    let depth = existing.len().max(incoming.len());
    let mut merged = Vec::with_capacity(depth);
    for slot in 0..depth {
        let from_end = depth - slot;
        let left = existing
            .len()
            .checked_sub(from_end)
            .map(|index| &existing[index]);
        let right = incoming
            .len()
            .checked_sub(from_end)
            .map(|index| &incoming[index]);
        let value = match (left, right) {
            (Some(left), Some(right)) => {
                if matches!(left, StackValue::Unknown) {
                    StackValue::Unknown
                } else if left.equals(right, decompiler.arena) {
                    left.clone()
                } else {
                    StackValue::Unknown
                }
            }
            _ => StackValue::Unknown,
        };
        merged.push(value);
    }
    merged
}

fn stacks_equal<Tr: DecompileTracer>(
    decompiler: &Decompiler<'_, Tr>,
    a: &[StackValue],
    b: &[StackValue],
) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y, decompiler.arena))
}
