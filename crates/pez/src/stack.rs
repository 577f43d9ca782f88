//! Symbolic operand-stack values.
//!
//! The simulator executes a block against an [`OperandStack`] of
//! [`StackValue`]s: mostly expression ids, plus the handful of non-expression
//! things CPython keeps on its stack (function and class builders mid
//! construction, import state between `IMPORT_NAME` and its stores, `NULL`
//! call markers). [`StackValue::Unknown`] is the lattice top used at join
//! points: merging two disagreeing values yields it, and the only safe
//! operation on it is a pop.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::{
    ast::{AstArena, ComprehensionKind, ExprId, Keyword},
    code::Code,
    error::{SimError, SimResult},
};

/// A function object under construction (`MAKE_FUNCTION` and friends).
#[derive(Debug, Clone)]
pub struct FunctionBuilder {
    /// The nested code object.
    pub code: Rc<Code>,
    /// Positional default values, in signature order.
    pub defaults: Vec<ExprId>,
    /// Keyword-only defaults by parameter name.
    pub kw_defaults: Vec<(Rc<str>, ExprId)>,
    /// Parameter/return annotations by name (`return` for the latter).
    pub annotations: Vec<(Rc<str>, ExprId)>,
    /// Whether a closure tuple was attached.
    pub has_closure: bool,
    /// Decorator expressions, innermost first (application order).
    pub decorators: Vec<ExprId>,
}

impl FunctionBuilder {
    /// A fresh builder for `code` with nothing attached yet.
    #[must_use]
    pub fn new(code: Rc<Code>) -> Self {
        Self {
            code,
            defaults: Vec::new(),
            kw_defaults: Vec::new(),
            annotations: Vec::new(),
            has_closure: false,
            decorators: Vec::new(),
        }
    }

    /// True when this builder holds a `lambda` body.
    #[must_use]
    pub fn is_lambda(&self) -> bool {
        self.code.name == "<lambda>"
    }
}

/// A class statement under construction (`LOAD_BUILD_CLASS` call shape).
#[derive(Debug, Clone)]
pub struct ClassBuilder {
    /// The class-body code object.
    pub code: Rc<Code>,
    /// Class name.
    pub name: Rc<str>,
    /// Base-class expressions.
    pub bases: Vec<ExprId>,
    /// Class keyword arguments (`metaclass=...` and friends).
    pub keywords: Vec<Keyword>,
    /// Decorator expressions, innermost first (application order).
    pub decorators: Vec<ExprId>,
}

/// Import state pushed by `IMPORT_NAME`, consumed by stores and
/// `IMPORT_FROM`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportValue {
    /// Dotted module name.
    pub module: Rc<str>,
    /// Relative-import level.
    pub level: u32,
    /// The fromlist tuple, empty for `import m`.
    pub fromlist: Vec<Rc<str>>,
    /// Set by `IMPORT_FROM`: this value is one imported name, not the
    /// module itself.
    pub item: Option<Rc<str>>,
}

/// One symbolic stack slot.
#[derive(Debug, Clone)]
pub enum StackValue {
    /// An ordinary expression.
    Expr(ExprId),
    /// A function object being assembled.
    Function(Box<FunctionBuilder>),
    /// A class being assembled.
    Class(Box<ClassBuilder>),
    /// A comprehension callee (the nested `<listcomp>`-style code object).
    Comprehension {
        /// Which literal the nested code builds.
        kind: ComprehensionKind,
        /// The nested code object.
        code: Rc<Code>,
    },
    /// Module import in progress.
    Import(ImportValue),
    /// A bare code-object constant (between `LOAD_CONST` and
    /// `MAKE_FUNCTION`).
    CodeRef(Rc<Code>),
    /// A local saved around a region (3.12 inline comprehensions).
    SavedLocal(Rc<str>),
    /// One slot of an `UNPACK_SEQUENCE`/`UNPACK_EX` group; the matching
    /// stores assemble the tuple-assignment targets.
    UnpackItem {
        /// Index into the simulator's unpack-group table.
        group: u32,
        /// Which element of the unpacked sequence this is.
        index: u32,
    },
    /// The `NULL` pushed by `PUSH_NULL` / flagged `LOAD_GLOBAL`.
    NullMarker,
    /// Anything the dataflow could not agree on.
    Unknown,
}

impl StackValue {
    /// Short tag for diagnostics.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Expr(_) => "expr",
            Self::Function(_) => "function",
            Self::Class(_) => "class",
            Self::Comprehension { .. } => "comprehension",
            Self::Import(_) => "import",
            Self::CodeRef(_) => "code",
            Self::SavedLocal(_) => "saved-local",
            Self::UnpackItem { .. } => "unpack-item",
            Self::NullMarker => "null",
            Self::Unknown => "unknown",
        }
    }

    /// Structural equality, resolving expressions through `arena`.
    ///
    /// Used by the entry-stack dataflow: slots that disagree become
    /// [`StackValue::Unknown`].
    #[must_use]
    pub fn equals(&self, other: &Self, arena: &AstArena) -> bool {
        match (self, other) {
            (Self::Expr(a), Self::Expr(b)) => arena.exprs_equal(*a, *b),
            (Self::NullMarker, Self::NullMarker) | (Self::Unknown, Self::Unknown) => true,
            (Self::SavedLocal(a), Self::SavedLocal(b)) => a == b,
            (Self::Import(a), Self::Import(b)) => a == b,
            (Self::CodeRef(a), Self::CodeRef(b)) => Rc::ptr_eq(a, b),
            (
                Self::Comprehension { kind: ka, code: ca },
                Self::Comprehension { kind: kb, code: cb },
            ) => ka == kb && Rc::ptr_eq(ca, cb),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(&a.code, &b.code),
            (Self::Class(a), Self::Class(b)) => Rc::ptr_eq(&a.code, &b.code) && a.name == b.name,
            _ => false,
        }
    }
}

/// The simulated operand stack.
///
/// In lenient mode (handler entries, blocks with uncertain inbound state)
/// an underflowing pop synthesizes [`StackValue::Unknown`] instead of
/// failing, and records that it did so.
#[derive(Debug, Clone, Default)]
pub struct OperandStack {
    values: SmallVec<[StackValue; 8]>,
    lenient: bool,
    underflowed: bool,
}

impl OperandStack {
    /// An empty strict stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a stack seeded with `values`.
    #[must_use]
    pub fn seeded(values: Vec<StackValue>, lenient: bool) -> Self {
        Self {
            values: values.into(),
            lenient,
            underflowed: false,
        }
    }

    /// Whether underflow synthesizes placeholders.
    #[must_use]
    pub fn is_lenient(&self) -> bool {
        self.lenient
    }

    /// Switches lenient mode on.
    pub fn set_lenient(&mut self) {
        self.lenient = true;
    }

    /// True if a lenient underflow ever happened.
    #[must_use]
    pub fn underflowed(&self) -> bool {
        self.underflowed
    }

    /// Current depth.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Pushes a value.
    pub fn push(&mut self, value: StackValue) {
        self.values.push(value);
    }

    /// Pops a value; in lenient mode an empty stack yields `Unknown`.
    pub fn pop(&mut self) -> SimResult<StackValue> {
        match self.values.pop() {
            Some(value) => Ok(value),
            None if self.lenient => {
                self.underflowed = true;
                Ok(StackValue::Unknown)
            }
            None => Err(SimError::StackUnderflow),
        }
    }

    /// Pops `count` values, topmost first.
    pub fn pop_n(&mut self, count: usize) -> SimResult<Vec<StackValue>> {
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.pop()?);
        }
        Ok(values)
    }

    /// Reads the value `depth` slots below the top (0 = top).
    pub fn peek(&self, depth: usize) -> SimResult<&StackValue> {
        let len = self.values.len();
        if depth < len {
            Ok(&self.values[len - 1 - depth])
        } else {
            Err(SimError::StackUnderflow)
        }
    }

    /// `COPY n` / `DUP_TOP`: pushes a clone of the value `n - 1` below the
    /// top.
    pub fn copy(&mut self, n: u32) -> SimResult<()> {
        let n = n as usize;
        if n == 0 || n > self.values.len() {
            if self.lenient {
                self.underflowed = true;
                self.values.push(StackValue::Unknown);
                return Ok(());
            }
            return Err(SimError::BadStackArg(n as u32));
        }
        let value = self.values[self.values.len() - n].clone();
        self.values.push(value);
        Ok(())
    }

    /// `SWAP n`: exchanges the top with the value `n - 1` below it.
    pub fn swap(&mut self, n: u32) -> SimResult<()> {
        let n = n as usize;
        let len = self.values.len();
        if n < 2 || n > len {
            return Err(SimError::BadStackArg(n as u32));
        }
        self.values.swap(len - 1, len - n);
        Ok(())
    }

    /// `ROT_N`: lifts the top above the `n - 1` values below it.
    pub fn rotate(&mut self, n: u32) -> SimResult<()> {
        let n = n as usize;
        let len = self.values.len();
        if n < 2 || n > len {
            return Err(SimError::BadStackArg(n as u32));
        }
        let top = self.values.remove(len - 1);
        self.values.insert(len - n, top);
        Ok(())
    }

    /// Consumes the stack into its raw values.
    #[must_use]
    pub fn into_values(self) -> Vec<StackValue> {
        self.values.into_vec()
    }

    /// Snapshot of the current values.
    #[must_use]
    pub fn values(&self) -> &[StackValue] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::{OperandStack, StackValue};
    use crate::error::SimError;

    #[test]
    fn strict_underflow_fails() {
        let mut stack = OperandStack::new();
        assert_eq!(stack.pop().unwrap_err(), SimError::StackUnderflow);
    }

    #[test]
    fn lenient_underflow_synthesizes_unknown() {
        let mut stack = OperandStack::seeded(Vec::new(), true);
        assert!(matches!(stack.pop(), Ok(StackValue::Unknown)));
        assert!(stack.underflowed());
    }

    #[test]
    fn swap_and_rotate() {
        let mut stack = OperandStack::new();
        stack.push(StackValue::NullMarker);
        stack.push(StackValue::Unknown);
        stack.push(StackValue::SavedLocal("x".into()));
        // SWAP 3: top <-> third.
        stack.swap(3).unwrap();
        assert!(matches!(stack.peek(2).unwrap(), StackValue::SavedLocal(_)));
        assert!(matches!(stack.peek(0).unwrap(), StackValue::NullMarker));
        // ROT 3 restores: top goes to the bottom of the rotated window.
        stack.rotate(3).unwrap();
        assert!(matches!(stack.peek(0).unwrap(), StackValue::Unknown));
        assert!(stack.rotate(9).is_err());
    }
}
