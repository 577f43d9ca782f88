//! Decompilation tracing infrastructure.
//!
//! Provides a trait-based tracing system for the decompiler with zero-cost
//! abstraction: with [`NoopTracer`] every hook compiles away through
//! monomorphization.
//!
//! # Architecture
//!
//! The [`DecompileTracer`] trait defines hook points at the decisions that
//! are hard to reconstruct after the fact: which structural pattern the
//! driver chose for a block, which loop-guard rewrites fired, and what the
//! simulator did inside a block of interest. Concrete implementations:
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (library default) |
//! | [`StderrTracer`] | Human-readable log to stderr, gated per event class |
//! | [`RecordingTracer`] | Full event recording for tests and post-mortem |
//!
//! The CLI's `--trace-decisions`, `--trace-loop-guards`, and
//! `--trace-sim-block <id>` flags configure a [`StderrTracer`].

use crate::cfg::BlockId;

/// One traced event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// The driver chose a structural pattern for a block.
    Decision {
        /// Block the pattern was anchored at.
        block: BlockId,
        /// Human-readable pattern name (`"if"`, `"ternary"`, …).
        pattern: &'static str,
    },
    /// A loop-guard condition was folded into the loop header.
    LoopGuard {
        /// The loop header block.
        header: BlockId,
        /// Whether the rewrite was performed or rejected as unprofitable.
        rewritten: bool,
    },
    /// The simulator dispatched an instruction.
    SimStep {
        /// Block being simulated.
        block: BlockId,
        /// Instruction byte offset.
        offset: u32,
        /// Opcode name.
        opcode: &'static str,
        /// Operand stack depth before the instruction.
        depth: usize,
    },
}

/// Hook points the decompiler reports progress through.
///
/// All methods have empty default bodies so implementations opt into only
/// the events they care about.
pub trait DecompileTracer {
    /// Called when the driver settles on a structural pattern for a block.
    fn decision(&mut self, block: BlockId, pattern: &'static str) {
        let _ = (block, pattern);
    }

    /// Called when a loop-guard rewrite is considered.
    fn loop_guard(&mut self, header: BlockId, rewritten: bool) {
        let _ = (header, rewritten);
    }

    /// Called for each simulated instruction.
    fn sim_step(&mut self, block: BlockId, offset: u32, opcode: &'static str, depth: usize) {
        let _ = (block, offset, opcode, depth);
    }
}

/// Tracer that does nothing. All hooks compile away.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl DecompileTracer for NoopTracer {}

/// Tracer that prints selected event classes to stderr.
#[derive(Debug, Clone, Default)]
pub struct StderrTracer {
    /// Log pattern decisions.
    pub decisions: bool,
    /// Log loop-guard rewrites.
    pub loop_guards: bool,
    /// Log simulator steps for this block only.
    pub sim_block: Option<u32>,
}

impl DecompileTracer for StderrTracer {
    fn decision(&mut self, block: BlockId, pattern: &'static str) {
        if self.decisions {
            eprintln!("decision: block {block} -> {pattern}");
        }
    }

    fn loop_guard(&mut self, header: BlockId, rewritten: bool) {
        if self.loop_guards {
            let verdict = if rewritten { "rewritten" } else { "kept" };
            eprintln!("loop-guard: header {header} {verdict}");
        }
    }

    fn sim_step(&mut self, block: BlockId, offset: u32, opcode: &'static str, depth: usize) {
        if self.sim_block == Some(block.index() as u32) {
            eprintln!("sim: block {block} offset {offset} depth {depth} {opcode}");
        }
    }
}

/// Tracer that records every event, for assertions in tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingTracer {
    /// Recorded events, in emission order.
    pub events: Vec<TraceEvent>,
}

impl RecordingTracer {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pattern decisions in order, for compact assertions.
    #[must_use]
    pub fn decisions(&self) -> Vec<&'static str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                TraceEvent::Decision { pattern, .. } => Some(*pattern),
                _ => None,
            })
            .collect()
    }
}

impl DecompileTracer for RecordingTracer {
    fn decision(&mut self, block: BlockId, pattern: &'static str) {
        self.events.push(TraceEvent::Decision { block, pattern });
    }

    fn loop_guard(&mut self, header: BlockId, rewritten: bool) {
        self.events.push(TraceEvent::LoopGuard { header, rewritten });
    }

    fn sim_step(&mut self, block: BlockId, offset: u32, opcode: &'static str, depth: usize) {
        self.events.push(TraceEvent::SimStep {
            block,
            offset,
            opcode,
            depth,
        });
    }
}
