//! Control-flow graph construction.
//!
//! Two passes over the decoded instruction stream. The first records every
//! leader offset (offset 0, every jump target, every offset following a
//! terminator). The second cuts the stream at the leaders into
//! [`BasicBlock`]s and wires edges from each block's terminator, then
//! overlays exception edges: from the exception table on 3.11+, from the
//! `SETUP_*` protected-region stack on older versions.

use std::fmt;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::{
    code::Code,
    error::{DecompileError, DecompileResult},
    opcode::{self, ExceptionEntry, Instruction, Opcode},
    version::PythonVersion,
};

/// Dense index of a basic block. Blocks are numbered in ascending
/// `start_offset` order, so id order is offset order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);

impl BlockId {
    /// Creates a block id from a raw index.
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// Raw index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// How control reaches an edge's target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Sequential flow into the next block.
    Fallthrough,
    /// Unconditional jump.
    Jump,
    /// Conditional jump, taken side of the truth test.
    ConditionalTrue,
    /// Conditional jump, not-taken side.
    ConditionalFalse,
    /// Unconditional jump backwards into a loop header.
    LoopBack,
    /// Unwinding into an exception handler.
    Exception,
}

impl EdgeKind {
    /// True for every kind that carries normal (non-unwind) flow.
    #[must_use]
    pub fn is_normal(self) -> bool {
        !matches!(self, Self::Exception)
    }
}

/// One outgoing edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// Destination block.
    pub target: BlockId,
    /// Edge classification.
    pub kind: EdgeKind,
}

/// A maximal straight-line run of instructions.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// This block's id (also its index in `Cfg::blocks`).
    pub id: BlockId,
    /// Offset of the first instruction.
    pub start_offset: u32,
    /// Offset one past the last instruction.
    pub end_offset: u32,
    /// Index range into `Cfg::instructions`.
    pub first_instruction: usize,
    /// One past the last instruction index.
    pub end_instruction: usize,
    /// Outgoing edges.
    pub edges: SmallVec<[Edge; 2]>,
    /// Incoming block ids (normal and exception alike).
    pub preds: SmallVec<[BlockId; 2]>,
    /// Target of at least one back-edge.
    pub is_loop_header: bool,
    /// Entered by unwinding.
    pub is_exception_handler: bool,
}

impl BasicBlock {
    /// The block's successors along normal edges.
    pub fn normal_successors(&self) -> impl Iterator<Item = Edge> + '_ {
        self.edges.iter().copied().filter(|edge| edge.kind.is_normal())
    }

    /// Finds the outgoing edge of a given kind.
    #[must_use]
    pub fn edge(&self, kind: EdgeKind) -> Option<BlockId> {
        self.edges.iter().find(|edge| edge.kind == kind).map(|edge| edge.target)
    }
}

/// The control-flow graph of one code object.
#[derive(Debug)]
pub struct Cfg {
    /// Blocks, sorted and indexed by ascending start offset.
    pub blocks: Vec<BasicBlock>,
    /// The block containing offset 0.
    pub entry: BlockId,
    /// The decoded instruction stream all blocks slice into.
    pub instructions: Vec<Instruction>,
    /// Exception ranges (3.11+), kept for pattern detection.
    pub exception_entries: Vec<ExceptionEntry>,
    /// Version tag the stream was decoded with.
    pub version: PythonVersion,
    offset_to_block: AHashMap<u32, BlockId>,
}

impl Cfg {
    /// Builds the CFG for `code`.
    pub fn build(code: &Code, version: PythonVersion) -> DecompileResult<Self> {
        let instructions = opcode::decode(&code.code_bytes, version)?;
        let code_len = code.code_bytes.len() as u32;
        let exception_entries = if version.has_exception_table() && !code.exceptiontable_bytes.is_empty() {
            opcode::parse_exception_table(&code.exceptiontable_bytes, code_len)?
        } else {
            Vec::new()
        };

        let offsets: AHashMap<u32, usize> = instructions
            .iter()
            .enumerate()
            .map(|(index, instruction)| (instruction.offset, index))
            .collect();

        // Pass 1: leaders.
        let mut leaders: Vec<u32> = vec![0];
        for instruction in &instructions {
            if let Some(target) = instruction.jump_target(version) {
                if !offsets.contains_key(&target) {
                    return Err(DecompileError::invalid_bytecode(format!(
                        "jump from offset {} to {target}, which is not an instruction boundary",
                        instruction.offset
                    )));
                }
                leaders.push(target);
            }
            let splits_after = instruction.opcode.is_terminator() || instruction.opcode.is_setup();
            if splits_after {
                let next = instruction.offset + instruction.size;
                if next < code_len {
                    leaders.push(next);
                }
            }
        }
        for entry in &exception_entries {
            if !offsets.contains_key(&entry.target) || !offsets.contains_key(&entry.start) {
                return Err(DecompileError::invalid_bytecode(format!(
                    "exception handler target {} is not an instruction boundary",
                    entry.target
                )));
            }
            leaders.push(entry.target);
            leaders.push(entry.start);
            // The instruction after the protected range resumes normal flow.
            if entry.end < code_len && offsets.contains_key(&entry.end) {
                leaders.push(entry.end);
            }
        }
        leaders.sort_unstable();
        leaders.dedup();

        // Pass 2: cut blocks.
        let mut blocks: Vec<BasicBlock> = Vec::with_capacity(leaders.len());
        let mut offset_to_block = AHashMap::with_capacity(leaders.len());
        for (index, &start) in leaders.iter().enumerate() {
            let end = leaders.get(index + 1).copied().unwrap_or(code_len);
            let first_instruction = offsets[&start];
            let end_instruction = leaders
                .get(index + 1)
                .map_or(instructions.len(), |next_start| offsets[next_start]);
            let id = BlockId::new(index);
            offset_to_block.insert(start, id);
            blocks.push(BasicBlock {
                id,
                start_offset: start,
                end_offset: end,
                first_instruction,
                end_instruction,
                edges: SmallVec::new(),
                preds: SmallVec::new(),
                is_loop_header: false,
                is_exception_handler: false,
            });
        }

        let mut cfg = Self {
            blocks,
            entry: BlockId::new(0),
            instructions,
            exception_entries,
            version,
            offset_to_block,
        };
        cfg.wire_edges()?;
        cfg.wire_exception_edges();
        cfg.fill_preds();
        Ok(cfg)
    }

    fn wire_edges(&mut self) -> DecompileResult<()> {
        let version = self.version;
        let mut new_edges: Vec<SmallVec<[Edge; 2]>> = Vec::with_capacity(self.blocks.len());

        for block in &self.blocks {
            let mut edges: SmallVec<[Edge; 2]> = SmallVec::new();
            let terminator = &self.instructions[block.end_instruction - 1];
            let op = terminator.opcode;
            let target_block = |offset: u32| -> DecompileResult<BlockId> {
                self.offset_to_block.get(&offset).copied().ok_or_else(|| {
                    DecompileError::invalid_bytecode(format!("jump target {offset} has no block"))
                })
            };
            let next_block = self.offset_to_block.get(&block.end_offset).copied();

            if op.is_block_end_no_successor() {
                // Return and raise end the trace.
            } else if op.is_conditional_jump() {
                let taken = target_block(terminator.jump_target(version).unwrap_or(block.end_offset))?;
                let fallthrough = next_block.ok_or_else(|| {
                    DecompileError::invalid_bytecode(format!(
                        "conditional jump at offset {} has no fallthrough",
                        terminator.offset
                    ))
                })?;
                let (true_target, false_target) = if op.jumps_on_true() || op.tests_none() == Some(true) {
                    (taken, fallthrough)
                } else {
                    (fallthrough, taken)
                };
                edges.push(Edge {
                    target: true_target,
                    kind: EdgeKind::ConditionalTrue,
                });
                edges.push(Edge {
                    target: false_target,
                    kind: EdgeKind::ConditionalFalse,
                });
            } else if op.is_unconditional_jump() {
                if let Some(target) = terminator.jump_target(version) {
                    let kind = if target <= block.start_offset {
                        EdgeKind::LoopBack
                    } else {
                        EdgeKind::Jump
                    };
                    edges.push(Edge {
                        target: target_block(target)?,
                        kind,
                    });
                } else if op == Opcode::BreakLoop {
                    // Target comes from the enclosing SETUP_LOOP; the driver
                    // resolves it structurally. No edge here keeps the loop
                    // body self-contained.
                } else if let Some(next) = next_block {
                    edges.push(Edge {
                        target: next,
                        kind: EdgeKind::Fallthrough,
                    });
                }
            } else if matches!(op, Opcode::ForIter | Opcode::ForLoop) {
                if let Some(next) = next_block {
                    edges.push(Edge {
                        target: next,
                        kind: EdgeKind::Fallthrough,
                    });
                }
                if let Some(exit) = terminator.jump_target(version) {
                    edges.push(Edge {
                        target: target_block(exit)?,
                        kind: EdgeKind::ConditionalFalse,
                    });
                }
            } else if let Some(next) = next_block {
                edges.push(Edge {
                    target: next,
                    kind: EdgeKind::Fallthrough,
                });
            }

            new_edges.push(edges);
        }

        for (block, edges) in self.blocks.iter_mut().zip(new_edges) {
            block.edges = edges;
        }

        // Tag loop headers: any edge whose target starts at or before its
        // source block is a back-edge.
        let mut headers = Vec::new();
        for block in &self.blocks {
            for edge in &block.edges {
                if edge.kind.is_normal() && self.blocks[edge.target.index()].start_offset <= block.start_offset {
                    headers.push(edge.target);
                }
            }
        }
        for header in headers {
            self.blocks[header.index()].is_loop_header = true;
        }
        Ok(())
    }

    /// Overlays exception edges.
    ///
    /// 3.11+ uses the exception table; earlier versions replay the
    /// `SETUP_EXCEPT`/`SETUP_FINALLY`/`SETUP_WITH` protected-region stack,
    /// which `POP_BLOCK` pops.
    fn wire_exception_edges(&mut self) {
        let mut additions: Vec<(BlockId, BlockId)> = Vec::new();

        if self.version.has_exception_table() {
            for entry in &self.exception_entries {
                let Some(&handler) = self.offset_to_block.get(&entry.target) else {
                    continue;
                };
                for block in &self.blocks {
                    if block.start_offset < entry.end && block.end_offset > entry.start {
                        additions.push((block.id, handler));
                    }
                }
            }
        } else {
            // Replay the block-stack over the instruction stream. SETUP_LOOP
            // participates in the stack but does not protect anything.
            let mut stack: Vec<Option<u32>> = Vec::new();
            for block in &self.blocks {
                // Protection state at block entry applies to the whole
                // block: SETUP/POP_BLOCK always sit at block boundaries
                // because they are leaders or terminators.
                if let Some(&Some(handler)) = stack.last() {
                    if let Some(&handler_block) = self.offset_to_block.get(&handler) {
                        additions.push((block.id, handler_block));
                    }
                }
                for instruction in &self.instructions[block.first_instruction..block.end_instruction] {
                    match instruction.opcode {
                        Opcode::SetupExcept | Opcode::SetupFinally | Opcode::SetupWith | Opcode::SetupAsyncWith => {
                            stack.push(instruction.jump_target(self.version));
                        }
                        Opcode::SetupLoop => stack.push(None),
                        Opcode::PopBlock => {
                            stack.pop();
                        }
                        _ => {}
                    }
                }
            }
        }

        for (from, handler) in additions {
            let already = self.blocks[from.index()]
                .edges
                .iter()
                .any(|edge| edge.kind == EdgeKind::Exception && edge.target == handler);
            if !already && from != handler {
                self.blocks[from.index()].edges.push(Edge {
                    target: handler,
                    kind: EdgeKind::Exception,
                });
                self.blocks[handler.index()].is_exception_handler = true;
            }
        }
    }

    fn fill_preds(&mut self) {
        let mut preds: Vec<SmallVec<[BlockId; 2]>> = vec![SmallVec::new(); self.blocks.len()];
        for block in &self.blocks {
            for edge in &block.edges {
                if !preds[edge.target.index()].contains(&block.id) {
                    preds[edge.target.index()].push(block.id);
                }
            }
        }
        for (block, preds) in self.blocks.iter_mut().zip(preds) {
            block.preds = preds;
        }
    }

    /// Number of blocks.
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Reads a block.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    /// Resolves a byte offset to the block starting there.
    #[must_use]
    pub fn block_at_offset(&self, offset: u32) -> Option<BlockId> {
        self.offset_to_block.get(&offset).copied()
    }

    /// The instructions of a block.
    #[must_use]
    pub fn instructions_of(&self, id: BlockId) -> &[Instruction] {
        let block = self.block(id);
        &self.instructions[block.first_instruction..block.end_instruction]
    }

    /// The block's final instruction.
    #[must_use]
    pub fn terminator(&self, id: BlockId) -> &Instruction {
        let block = self.block(id);
        &self.instructions[block.end_instruction - 1]
    }

    /// The block following `id` in offset order, if any.
    #[must_use]
    pub fn next_block(&self, id: BlockId) -> Option<BlockId> {
        let next = id.index() + 1;
        (next < self.blocks.len()).then(|| BlockId::new(next))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{Cfg, EdgeKind};
    use crate::{code::Code, version::PythonVersion};

    const PY38: PythonVersion = PythonVersion::new(3, 8);

    fn code(bytes: &[u8]) -> Code {
        Code {
            code_bytes: bytes.to_vec(),
            ..Code::default()
        }
    }

    #[test]
    fn straight_line_is_one_block() {
        // LOAD_CONST 0; RETURN_VALUE
        let cfg = Cfg::build(&code(&[100, 0, 83, 0]), PY38).unwrap();
        assert_eq!(cfg.num_blocks(), 1);
        assert_eq!(cfg.block(cfg.entry).edges.len(), 0);
    }

    #[test]
    fn conditional_jump_splits_into_diamond() {
        // 0: LOAD_FAST 0
        // 2: POP_JUMP_IF_FALSE 8    (3.8: absolute byte target)
        // 4: LOAD_CONST 0
        // 6: RETURN_VALUE
        // 8: LOAD_CONST 1
        // 10: RETURN_VALUE
        let cfg = Cfg::build(&code(&[124, 0, 114, 8, 100, 0, 83, 0, 100, 1, 83, 0]), PY38).unwrap();
        assert_eq!(cfg.num_blocks(), 3);
        let entry = cfg.block(cfg.entry);
        assert_eq!(entry.edge(EdgeKind::ConditionalTrue), cfg.block_at_offset(4));
        assert_eq!(entry.edge(EdgeKind::ConditionalFalse), cfg.block_at_offset(8));
    }

    #[test]
    fn backward_jump_marks_loop_header() {
        // 0: LOAD_FAST 0
        // 2: POP_JUMP_IF_FALSE 8
        // 4: NOP
        // 6: JUMP_ABSOLUTE 0
        // 8: LOAD_CONST 0
        // 10: RETURN_VALUE
        let cfg = Cfg::build(&code(&[124, 0, 114, 8, 9, 0, 113, 0, 100, 0, 83, 0]), PY38).unwrap();
        let header = cfg.block(cfg.entry);
        assert!(header.is_loop_header);
        let latch = cfg.block_at_offset(4).unwrap();
        assert_eq!(cfg.block(latch).edges[0].kind, EdgeKind::LoopBack);
    }

    #[test]
    fn mid_instruction_jump_is_rejected() {
        // POP_JUMP_IF_FALSE 3 targets the middle of an instruction.
        let result = Cfg::build(&code(&[124, 0, 114, 3, 83, 0]), PY38);
        assert!(result.is_err());
    }

    #[test]
    fn legacy_setup_except_adds_exception_edges() {
        // 2.7:
        // 0: SETUP_EXCEPT +4 -> 7
        // 3: POP_BLOCK
        // 4: JUMP_FORWARD +2 -> 9
        // 7: POP_TOP (handler)
        // 8: RETURN_VALUE  -- filler so handler block ends
        // 9: LOAD_CONST 0
        // 12: RETURN_VALUE
        let py27 = PythonVersion::new(2, 7);
        let bytes = [121, 4, 0, 87, 110, 2, 0, 1, 83, 100, 0, 0, 83];
        let cfg = Cfg::build(&code(&bytes), py27).unwrap();
        let handler = cfg.block_at_offset(7).unwrap();
        assert!(cfg.block(handler).is_exception_handler);
        // The protected body block carries the exception edge.
        let body = cfg.block_at_offset(3).unwrap();
        assert!(
            cfg.block(body)
                .edges
                .iter()
                .any(|edge| edge.kind == EdgeKind::Exception && edge.target == handler)
        );
    }
}
