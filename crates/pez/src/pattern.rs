//! Structural pattern detection over the CFG.
//!
//! Each detector inspects block shapes only (no stack simulation) and
//! returns a record naming the blocks a region is made of. The driver
//! consults detectors in a fixed priority (boolean short-circuit, ternary,
//! and/or chains, then the statement-level patterns) and verifies
//! value-shaped preconditions with the simulator before committing, so a
//! short-circuit guard is never mistaken for an `if`.

use crate::{
    cfg::{BlockId, Cfg, EdgeKind},
    dom::{DomTree, PostDomTree},
    opcode::{Instruction, Opcode},
};

/// An `if`/`elif`/`else` region.
///
/// `then_block` is always the fallthrough side of the conditional; when the
/// terminator jumps on a truthy condition (`POP_JUMP_IF_TRUE` from
/// `if not x:`), `negate` records that the tested expression must be
/// negated before it reads as the source-level condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfPattern {
    /// Block whose terminator tests the condition.
    pub condition_block: BlockId,
    /// First block of the `if` body.
    pub then_block: BlockId,
    /// First block of the `else` body, when one exists.
    pub else_block: Option<BlockId>,
    /// Join point both arms flow into, when one exists.
    pub merge_block: Option<BlockId>,
    /// Whether the tested expression is negated in source.
    pub negate: bool,
    /// Whether the else arm is itself a single `if` sharing our merge.
    pub is_elif: bool,
}

/// A `while` loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhilePattern {
    /// Loop header (back-edge target).
    pub header_block: BlockId,
    /// First body block.
    pub body_block: BlockId,
    /// Block execution resumes at after the loop.
    pub exit_block: Option<BlockId>,
    /// `while True:`, i.e. the header has no conditional exit.
    pub infinite: bool,
    /// Negate the header's tested expression (header jumps on true).
    pub negate: bool,
}

/// A `for` loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForPattern {
    /// Block that pushed the iterator (`GET_ITER` and the iterable before
    /// it); `None` when the setup is merged into an earlier region.
    pub setup_block: Option<BlockId>,
    /// The `FOR_ITER` block.
    pub header_block: BlockId,
    /// First body block (the `FOR_ITER` fallthrough).
    pub body_block: BlockId,
    /// Loop `else` body, when distinct from the exit.
    pub else_block: Option<BlockId>,
    /// Block after the loop.
    pub exit_block: Option<BlockId>,
    /// `async for` (header is `GET_ANEXT`-driven).
    pub is_async: bool,
}

/// One handler of a `try` region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerInfo {
    /// Handler entry block.
    pub handler_block: BlockId,
    /// True for a `finally` handler rather than an `except`.
    pub is_finally: bool,
}

/// A `try` statement region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryPattern {
    /// The block ending in `SETUP_*` (pre-3.11 only); it may carry
    /// statements preceding the `try`.
    pub setup_block: Option<BlockId>,
    /// First protected block.
    pub try_block: BlockId,
    /// Handler entries, in table/stack order.
    pub handlers: Vec<HandlerInfo>,
    /// Block after the whole statement, when known.
    pub exit_block: Option<BlockId>,
    /// End offset of the protected range (exclusive).
    pub protected_end: u32,
}

/// A `with` statement region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithPattern {
    /// Block running the context-manager prologue.
    pub setup_block: BlockId,
    /// First body block.
    pub body_block: BlockId,
    /// The `__exit__` cleanup handler.
    pub cleanup_block: Option<BlockId>,
    /// Block after the statement.
    pub exit_block: Option<BlockId>,
    /// `async with`.
    pub is_async: bool,
}

/// A `match` statement region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPattern {
    /// Block computing the subject and testing the first case.
    pub subject_block: BlockId,
    /// Entry block of each case test, in order.
    pub case_blocks: Vec<BlockId>,
    /// Block after the statement.
    pub exit_block: Option<BlockId>,
}

/// The statement-level patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralPattern {
    If(IfPattern),
    While(WhilePattern),
    For(ForPattern),
    Try(TryPattern),
    With(WithPattern),
    Match(MatchPattern),
}

impl StructuralPattern {
    /// Pattern name for tracing.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::If(_) => "if",
            Self::While(_) => "while",
            Self::For(_) => "for",
            Self::Try(_) => "try",
            Self::With(_) => "with",
            Self::Match(_) => "match",
        }
    }
}

/// A ternary (`a if cond else b`) candidate: a diamond whose arms are
/// single expression-only blocks meeting at the value's consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TernaryPattern {
    /// The conditional block.
    pub condition_block: BlockId,
    /// Arm producing the value when the condition is true.
    pub true_block: BlockId,
    /// Arm producing the value when the condition is false.
    pub false_block: BlockId,
    /// Block that consumes the produced value.
    pub merge_block: BlockId,
}

/// A boolean short-circuit producing a *value* (`x = a and b`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoolOpPattern {
    /// Block producing the left operand and testing it.
    pub condition_block: BlockId,
    /// Entry of the right-operand region.
    pub rhs_block: BlockId,
    /// Block where the surviving value is consumed.
    pub merge_block: BlockId,
    /// True for `and` (short-circuits on false), false for `or`.
    pub is_and: bool,
    /// The 3.12+ `COPY 1; [TO_BOOL;] POP_JUMP_IF_*` encoding: the rhs path
    /// must drop the duplicated test value first.
    pub copies_value: bool,
}

/// Shape-only detectors over one CFG.
///
/// The caller owns the post-dominator tree (the driver builds it on first
/// merge query and keeps it for the life of the code object).
pub struct PatternAnalyzer<'a> {
    cfg: &'a Cfg,
    dom: &'a DomTree,
    postdom: &'a PostDomTree,
}

impl<'a> PatternAnalyzer<'a> {
    /// Creates an analyzer for one CFG.
    #[must_use]
    pub fn new(cfg: &'a Cfg, dom: &'a DomTree, postdom: &'a PostDomTree) -> Self {
        Self { cfg, dom, postdom }
    }

    fn postdom(&self) -> &PostDomTree {
        self.postdom
    }

    /// Statement-level pattern rooted at `block`, if any.
    pub fn detect_pattern(&mut self, block: BlockId) -> Option<StructuralPattern> {
        if let Some(with) = self.detect_with(block) {
            return Some(StructuralPattern::With(with));
        }
        if let Some(try_pattern) = self.detect_try(block) {
            return Some(StructuralPattern::Try(try_pattern));
        }
        if let Some(match_pattern) = self.detect_match(block) {
            return Some(StructuralPattern::Match(match_pattern));
        }
        if let Some(for_pattern) = self.detect_for(block) {
            return Some(StructuralPattern::For(for_pattern));
        }
        if let Some(while_pattern) = self.detect_while(block) {
            return Some(StructuralPattern::While(while_pattern));
        }
        self.detect_if(block).map(StructuralPattern::If)
    }

    /// `if` detection: a conditional terminator that no higher-priority
    /// detector claimed.
    pub fn detect_if(&mut self, block: BlockId) -> Option<IfPattern> {
        let terminator = self.cfg.terminator(block);
        if !terminator.opcode.is_conditional_jump() {
            return None;
        }
        let negate = terminator.opcode.jumps_on_true();
        let basic_block = self.cfg.block(block);
        let true_target = basic_block.edge(EdgeKind::ConditionalTrue)?;
        let false_target = basic_block.edge(EdgeKind::ConditionalFalse)?;
        // The body is always the fallthrough side in compiler output.
        let (then_block, other) = if negate {
            (false_target, true_target)
        } else {
            (true_target, false_target)
        };

        let merge_block = self.postdom().common_post_dominator(then_block, other);
        let else_block = match merge_block {
            Some(merge) if other == merge => None,
            _ => Some(other),
        };
        let is_elif = match else_block {
            Some(else_block) if self.cfg.terminator(else_block).opcode.is_conditional_jump() => {
                let else_bb = self.cfg.block(else_block);
                match (
                    else_bb.edge(EdgeKind::ConditionalTrue),
                    else_bb.edge(EdgeKind::ConditionalFalse),
                ) {
                    (Some(inner_true), Some(inner_false)) => {
                        self.postdom().common_post_dominator(inner_true, inner_false) == merge_block
                    }
                    _ => false,
                }
            }
            _ => false,
        };
        Some(IfPattern {
            condition_block: block,
            then_block,
            else_block,
            merge_block,
            negate,
            is_elif,
        })
    }

    /// `while` detection: a loop header with (or without) a conditional
    /// exit.
    pub fn detect_while(&mut self, block: BlockId) -> Option<WhilePattern> {
        let basic_block = self.cfg.block(block);
        if !basic_block.is_loop_header {
            return None;
        }
        let terminator = self.cfg.terminator(block);
        if matches!(terminator.opcode, Opcode::ForIter | Opcode::ForLoop) {
            return None;
        }
        if terminator.opcode.is_conditional_jump() {
            let negate = terminator.opcode.jumps_on_true();
            let true_target = basic_block.edge(EdgeKind::ConditionalTrue)?;
            let false_target = basic_block.edge(EdgeKind::ConditionalFalse)?;
            let (body_block, exit_block) = if negate {
                (false_target, true_target)
            } else {
                (true_target, false_target)
            };
            Some(WhilePattern {
                header_block: block,
                body_block,
                exit_block: Some(exit_block),
                infinite: false,
                negate,
            })
        } else {
            // `while True:`: the body starts right at the header.
            Some(WhilePattern {
                header_block: block,
                body_block: block,
                exit_block: None,
                infinite: true,
                negate: false,
            })
        }
    }

    /// `for` detection: a `FOR_ITER`/`FOR_LOOP` header.
    pub fn detect_for(&mut self, block: BlockId) -> Option<ForPattern> {
        let terminator = self.cfg.terminator(block);
        if !matches!(terminator.opcode, Opcode::ForIter | Opcode::ForLoop) {
            return None;
        }
        let basic_block = self.cfg.block(block);
        let body_block = basic_block.edge(EdgeKind::Fallthrough)?;
        let exit_block = basic_block.edge(EdgeKind::ConditionalFalse);
        let setup_block = basic_block
            .preds
            .iter()
            .copied()
            .find(|&pred| {
                self.cfg.block(pred).start_offset < basic_block.start_offset
                    && self
                        .cfg
                        .block(pred)
                        .normal_successors()
                        .any(|edge| edge.target == block)
            });
        // An async for never uses FOR_ITER; the GET_ANEXT rewrite is
        // detected by the driver on the legacy bytecode shape instead.
        Some(ForPattern {
            setup_block,
            header_block: block,
            body_block,
            else_block: None,
            exit_block,
            is_async: false,
        })
    }

    /// `try` detection: the first block of a protected range.
    pub fn detect_try(&mut self, block: BlockId) -> Option<TryPattern> {
        if self.cfg.version.has_exception_table() {
            self.detect_try_from_table(block)
        } else {
            self.detect_try_from_setup(block)
        }
    }

    fn detect_try_from_table(&mut self, block: BlockId) -> Option<TryPattern> {
        let basic_block = self.cfg.block(block);
        if basic_block.is_exception_handler {
            return None;
        }
        // The candidate must be exactly the start of a protected range whose
        // handler is a real handler block (not a cleanup-only range the
        // with/for machinery produces; those are claimed by other
        // detectors first).
        let entry = self
            .cfg
            .exception_entries
            .iter()
            .filter(|entry| entry.start == basic_block.start_offset)
            .min_by_key(|entry| entry.depth)?;
        let handler = self.cfg.block_at_offset(entry.target)?;
        let handler_is_finally = handler_looks_like_finally(self.cfg.instructions_of(handler));
        let mut handlers = vec![HandlerInfo {
            handler_block: handler,
            is_finally: handler_is_finally,
        }];
        // A finally attached to except handlers shows up as a second range
        // covering the handler blocks themselves.
        if let Some(outer) = self
            .cfg
            .exception_entries
            .iter()
            .find(|outer| outer.start <= entry.target && entry.target < outer.end && outer.target != entry.target)
        {
            if let Some(finally_block) = self.cfg.block_at_offset(outer.target) {
                handlers.push(HandlerInfo {
                    handler_block: finally_block,
                    is_finally: true,
                });
            }
        }
        Some(TryPattern {
            setup_block: None,
            try_block: block,
            handlers,
            exit_block: None,
            protected_end: entry.end,
        })
    }

    fn detect_try_from_setup(&mut self, block: BlockId) -> Option<TryPattern> {
        let terminator = self.cfg.terminator(block);
        if !matches!(terminator.opcode, Opcode::SetupExcept | Opcode::SetupFinally) {
            return None;
        }
        let handler_offset = terminator.jump_target(self.cfg.version)?;
        let handler = self.cfg.block_at_offset(handler_offset)?;
        let try_block = self.cfg.block(block).edge(EdgeKind::Fallthrough)?;
        // 3.8 spells try/except with SETUP_FINALLY, so the opcode alone
        // cannot classify the handler; a handler that tests the exception
        // type is an except chain regardless.
        let tests_match = self.cfg.instructions_of(handler).iter().any(|instruction| {
            matches!(instruction.opcode, Opcode::CheckExcMatch | Opcode::JumpIfNotExcMatch)
                || (instruction.opcode == Opcode::CompareOp && instruction.arg == 10)
        });
        Some(TryPattern {
            setup_block: Some(block),
            try_block,
            handlers: vec![HandlerInfo {
                handler_block: handler,
                is_finally: terminator.opcode == Opcode::SetupFinally && !tests_match,
            }],
            exit_block: None,
            protected_end: handler_offset,
        })
    }

    /// `with` detection by prologue opcode.
    pub fn detect_with(&mut self, block: BlockId) -> Option<WithPattern> {
        let instructions = self.cfg.instructions_of(block);
        let version = self.cfg.version;
        let setup = instructions.iter().find(|instruction| {
            matches!(
                instruction.opcode,
                Opcode::SetupWith | Opcode::SetupAsyncWith | Opcode::BeforeWith | Opcode::BeforeAsyncWith
            ) || (instruction.opcode == Opcode::LoadSpecial && version.gte(3, 14))
        })?;
        let is_async = matches!(setup.opcode, Opcode::SetupAsyncWith | Opcode::BeforeAsyncWith);

        let (body_block, cleanup_block) = match setup.opcode {
            Opcode::SetupWith | Opcode::SetupAsyncWith => {
                let cleanup = setup
                    .jump_target(version)
                    .and_then(|offset| self.cfg.block_at_offset(offset));
                (self.cfg.block(block).edge(EdgeKind::Fallthrough)?, cleanup)
            }
            _ => {
                // 3.11+: the cleanup handler is the exception edge of the
                // body region.
                let body = self.cfg.block(block).edge(EdgeKind::Fallthrough).unwrap_or(block);
                let cleanup = self
                    .cfg
                    .block(body)
                    .edges
                    .iter()
                    .find(|edge| edge.kind == EdgeKind::Exception)
                    .map(|edge| edge.target);
                (body, cleanup)
            }
        };
        Some(WithPattern {
            setup_block: block,
            body_block,
            cleanup_block,
            exit_block: None,
            is_async,
        })
    }

    /// `match` detection by the dedicated match opcodes.
    pub fn detect_match(&mut self, block: BlockId) -> Option<MatchPattern> {
        let has_match_op = |id: BlockId| {
            self.cfg.instructions_of(id).iter().any(|instruction| {
                matches!(
                    instruction.opcode,
                    Opcode::MatchSequence | Opcode::MatchMapping | Opcode::MatchClass | Opcode::MatchKeys
                )
            })
        };
        if !has_match_op(block) {
            return None;
        }
        // Walk the chain of case tests: each failed case falls through its
        // conditional-false side into the next case block.
        let mut case_blocks = vec![block];
        let mut current = block;
        let mut exit_block = None;
        loop {
            let terminator = self.cfg.terminator(current);
            if !terminator.opcode.is_conditional_jump() {
                break;
            }
            let fail_target = self
                .cfg
                .block(current)
                .edge(if terminator.opcode.jumps_on_true() {
                    EdgeKind::ConditionalTrue
                } else {
                    EdgeKind::ConditionalFalse
                })?;
            if has_match_op(fail_target) {
                case_blocks.push(fail_target);
                current = fail_target;
            } else {
                exit_block = Some(fail_target);
                break;
            }
        }
        Some(MatchPattern {
            subject_block: block,
            case_blocks,
            exit_block,
        })
    }

    /// Ternary candidate: both arms are single expression-shaped blocks
    /// flowing into one consumer. The driver still verifies each arm pushes
    /// exactly one value before committing.
    pub fn detect_ternary(&mut self, block: BlockId) -> Option<TernaryPattern> {
        let terminator = self.cfg.terminator(block);
        if !terminator.opcode.is_conditional_jump() || terminator.opcode.keeps_value_when_taken() {
            return None;
        }
        let basic_block = self.cfg.block(block);
        let true_block = basic_block.edge(EdgeKind::ConditionalTrue)?;
        let false_block = basic_block.edge(EdgeKind::ConditionalFalse)?;
        if true_block == false_block {
            return None;
        }

        let single_exit = |id: BlockId| -> Option<BlockId> {
            let mut successors = self.cfg.block(id).normal_successors();
            let first = successors.next()?;
            if successors.next().is_some() || self.cfg.terminator(id).opcode.is_conditional_jump() {
                return None;
            }
            Some(first.target)
        };
        let true_exit = single_exit(true_block)?;
        let false_exit = single_exit(false_block)?;
        if true_exit != false_exit {
            return None;
        }
        // Both arms must be dominated by the condition: anything else is a
        // merge of unrelated flow, not a diamond.
        if !self.dom.dominates(block, true_block) || !self.dom.dominates(block, false_block) {
            return None;
        }
        Some(TernaryPattern {
            condition_block: block,
            true_block,
            false_block,
            merge_block: true_exit,
        })
    }

    /// Boolean short-circuit value candidate.
    pub fn detect_bool_op(&mut self, block: BlockId) -> Option<BoolOpPattern> {
        let instructions = self.cfg.instructions_of(block);
        let terminator = instructions.last()?;
        let basic_block = self.cfg.block(block);

        if terminator.opcode.keeps_value_when_taken() {
            // JUMP_IF_FALSE_OR_POP: value survives the taken edge.
            let is_and = terminator.opcode == Opcode::JumpIfFalseOrPop;
            let merge_block = basic_block.edge(if is_and {
                EdgeKind::ConditionalFalse
            } else {
                EdgeKind::ConditionalTrue
            })?;
            let rhs_block = basic_block.edge(if is_and {
                EdgeKind::ConditionalTrue
            } else {
                EdgeKind::ConditionalFalse
            })?;
            // The merge must lie forward; a backward or-pop is a loop
            // condition, not a value.
            if self.cfg.block(merge_block).start_offset <= basic_block.start_offset {
                return None;
            }
            return Some(BoolOpPattern {
                condition_block: block,
                rhs_block,
                merge_block,
                is_and,
                copies_value: false,
            });
        }

        // 3.12+ spelling: COPY 1; [TO_BOOL;] POP_JUMP_IF_{TRUE,FALSE}.
        if matches!(terminator.opcode, Opcode::PopJumpIfTrue | Opcode::PopJumpIfFalse) && instructions.len() >= 2 {
            let before = &instructions[..instructions.len() - 1];
            let copied = match before {
                [.., copy, to_bool] if to_bool.opcode == Opcode::ToBool => copy,
                [.., copy] => copy,
                [] => return None,
            };
            if copied.opcode != Opcode::Copy || copied.arg != 1 {
                return None;
            }
            let is_and = terminator.opcode == Opcode::PopJumpIfFalse;
            let merge_block = basic_block.edge(if is_and {
                EdgeKind::ConditionalFalse
            } else {
                EdgeKind::ConditionalTrue
            })?;
            let rhs_block = basic_block.edge(if is_and {
                EdgeKind::ConditionalTrue
            } else {
                EdgeKind::ConditionalFalse
            })?;
            if self.cfg.block(merge_block).start_offset <= basic_block.start_offset {
                return None;
            }
            return Some(BoolOpPattern {
                condition_block: block,
                rhs_block,
                merge_block,
                is_and,
                copies_value: true,
            });
        }
        None
    }
}

/// Heuristic: a handler that re-raises unconditionally without testing the
/// exception type is a `finally` body.
fn handler_looks_like_finally(instructions: &[Instruction]) -> bool {
    !instructions
        .iter()
        .any(|instruction| matches!(instruction.opcode, Opcode::CheckExcMatch | Opcode::JumpIfNotExcMatch))
        && instructions
            .iter()
            .any(|instruction| instruction.opcode == Opcode::Reraise)
}

#[cfg(test)]
mod tests {
    use super::PatternAnalyzer;
    use crate::{
        cfg::Cfg,
        code::Code,
        dom::{DomTree, PostDomTree},
        version::PythonVersion,
    };

    const PY38: PythonVersion = PythonVersion::new(3, 8);

    fn build(bytes: &[u8]) -> Cfg {
        let code = Code {
            code_bytes: bytes.to_vec(),
            ..Code::default()
        };
        Cfg::build(&code, PY38).unwrap()
    }

    #[test]
    fn if_else_diamond() {
        let cfg = build(&[
            124, 0, // LOAD_FAST 0
            114, 10, // POP_JUMP_IF_FALSE 10
            100, 1, 125, 1, // then: LOAD_CONST 1; STORE_FAST 1
            110, 4, // JUMP_FORWARD -> 14
            100, 2, 125, 1, // else: LOAD_CONST 2; STORE_FAST 1
            124, 1, 83, 0, // merge: LOAD_FAST 1; RETURN_VALUE
        ]);
        let dom = DomTree::build(&cfg);
        let postdom = PostDomTree::build(&cfg);
        let mut analyzer = PatternAnalyzer::new(&cfg, &dom, &postdom);
        let pattern = analyzer.detect_if(cfg.entry).unwrap();
        assert_eq!(pattern.then_block, cfg.block_at_offset(4).unwrap());
        assert_eq!(pattern.else_block, cfg.block_at_offset(10));
        assert_eq!(pattern.merge_block, cfg.block_at_offset(14));
        assert!(!pattern.negate);
    }

    #[test]
    fn if_without_else_has_no_else_block() {
        let cfg = build(&[
            124, 0, // LOAD_FAST 0
            114, 8, // POP_JUMP_IF_FALSE 8
            100, 1, 125, 1, // then
            100, 0, 83, 0, // merge: LOAD_CONST None; RETURN_VALUE
        ]);
        let dom = DomTree::build(&cfg);
        let postdom = PostDomTree::build(&cfg);
        let mut analyzer = PatternAnalyzer::new(&cfg, &dom, &postdom);
        let pattern = analyzer.detect_if(cfg.entry).unwrap();
        assert_eq!(pattern.else_block, None);
        assert_eq!(pattern.merge_block, cfg.block_at_offset(8));
    }

    #[test]
    fn while_loop() {
        let cfg = build(&[
            124, 0, // header: LOAD_FAST 0
            114, 8, // POP_JUMP_IF_FALSE 8
            9, 0, // body: NOP
            113, 0, // JUMP_ABSOLUTE 0
            100, 0, 83, 0, // exit
        ]);
        let dom = DomTree::build(&cfg);
        let postdom = PostDomTree::build(&cfg);
        let mut analyzer = PatternAnalyzer::new(&cfg, &dom, &postdom);
        let pattern = analyzer.detect_while(cfg.entry).unwrap();
        assert!(!pattern.infinite);
        assert_eq!(pattern.body_block, cfg.block_at_offset(4).unwrap());
        assert_eq!(pattern.exit_block, cfg.block_at_offset(8));
    }

    #[test]
    fn ternary_diamond() {
        // x = a if c else b; both arms single LOAD + jump to the store.
        let cfg = build(&[
            124, 0, // LOAD_FAST c
            114, 8, // POP_JUMP_IF_FALSE 8
            124, 1, // LOAD_FAST a
            110, 2, // JUMP_FORWARD -> 10
            124, 2, // LOAD_FAST b
            125, 3, 100, 0, 83, 0, // STORE_FAST x; LOAD_CONST None; RETURN
        ]);
        let dom = DomTree::build(&cfg);
        let postdom = PostDomTree::build(&cfg);
        let mut analyzer = PatternAnalyzer::new(&cfg, &dom, &postdom);
        let pattern = analyzer.detect_ternary(cfg.entry).unwrap();
        assert_eq!(pattern.true_block, cfg.block_at_offset(4).unwrap());
        assert_eq!(pattern.false_block, cfg.block_at_offset(8).unwrap());
        assert_eq!(pattern.merge_block, cfg.block_at_offset(10).unwrap());
    }

    #[test]
    fn or_pop_boolop() {
        // x = a and b
        let cfg = build(&[
            124, 0, // LOAD_FAST a
            111, 8, // JUMP_IF_FALSE_OR_POP 8
            124, 1, // LOAD_FAST b
            125, 2, 100, 0, 83, 0, // 8: STORE_FAST x; ...
        ]);
        let dom = DomTree::build(&cfg);
        let postdom = PostDomTree::build(&cfg);
        let mut analyzer = PatternAnalyzer::new(&cfg, &dom, &postdom);
        let pattern = analyzer.detect_bool_op(cfg.entry).unwrap();
        assert!(pattern.is_and);
        assert!(!pattern.copies_value);
        assert_eq!(pattern.rhs_block, cfg.block_at_offset(4).unwrap());
        assert_eq!(pattern.merge_block, cfg.block_at_offset(8).unwrap());
    }
}
