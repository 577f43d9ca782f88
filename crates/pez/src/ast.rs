//! The Python AST the decompiler produces.
//!
//! Nodes live in a per-code-object [`AstArena`] and reference each other by
//! dense [`ExprId`]/[`StmtId`] indices instead of pointers, so the whole
//! tree is freed as a unit when its code object is done and cyclic-looking
//! shapes (a block list referring back into itself) never arise. Nodes are
//! immutable once allocated, which makes sharing an id across two stack
//! snapshots equivalent to a deep copy.

use std::rc::Rc;

use crate::object::Object;

/// Index of an expression node in its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(u32);

impl ExprId {
    /// Raw index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a statement node in its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StmtId(u32);

impl StmtId {
    /// Raw index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpKind {
    Add,
    Sub,
    Mult,
    MatMult,
    Div,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
    FloorDiv,
}

impl BinOpKind {
    /// Source form of the operator.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mult => "*",
            Self::MatMult => "@",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Pow => "**",
            Self::LShift => "<<",
            Self::RShift => ">>",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::BitAnd => "&",
            Self::FloorDiv => "//",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOpKind {
    Not,
    UAdd,
    USub,
    Invert,
}

impl UnaryOpKind {
    /// Source form, including the trailing space for `not`.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Not => "not ",
            Self::UAdd => "+",
            Self::USub => "-",
            Self::Invert => "~",
        }
    }
}

/// `and` / `or`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOpKind {
    And,
    Or,
}

/// Comparison operators, including identity and membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOpKind {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
    /// Python 2 exception-match pseudo-comparison; never printed.
    ExcMatch,
}

impl CmpOpKind {
    /// Source form of the operator.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtE => "<=",
            Self::Gt => ">",
            Self::GtE => ">=",
            Self::Is => "is",
            Self::IsNot => "is not",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::ExcMatch => "exception match",
        }
    }

    /// The operator with swapped operand order (`a < b` == `b > a`).
    #[must_use]
    pub fn swapped(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::LtE => Self::GtE,
            Self::Gt => Self::Lt,
            Self::GtE => Self::LtE,
            other => other,
        }
    }

    /// Logical negation, where one exists in source form.
    #[must_use]
    pub fn negated(self) -> Option<Self> {
        match self {
            Self::Eq => Some(Self::NotEq),
            Self::NotEq => Some(Self::Eq),
            Self::Lt => Some(Self::GtE),
            Self::LtE => Some(Self::Gt),
            Self::Gt => Some(Self::LtE),
            Self::GtE => Some(Self::Lt),
            Self::Is => Some(Self::IsNot),
            Self::IsNot => Some(Self::Is),
            Self::In => Some(Self::NotIn),
            Self::NotIn => Some(Self::In),
            Self::ExcMatch => None,
        }
    }
}

/// One `for`/`if` clause chain of a comprehension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comprehension {
    /// Loop target.
    pub target: ExprId,
    /// Iterated expression.
    pub iter: ExprId,
    /// Filter conditions, in order.
    pub ifs: Vec<ExprId>,
    /// `async for` clause.
    pub is_async: bool,
}

/// Which comprehension expression a builder produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComprehensionKind {
    List,
    Set,
    Dict,
    Generator,
}

/// A keyword argument (or `**` splat when `arg` is `None`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyword {
    /// Keyword name; `None` for `**kwargs` splats.
    pub arg: Option<Rc<str>>,
    /// Argument value.
    pub value: ExprId,
}

/// One formal parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Parameter name.
    pub name: Rc<str>,
    /// Annotation expression, if any.
    pub annotation: Option<ExprId>,
    /// Default value, if any.
    pub default: Option<ExprId>,
}

impl Param {
    /// A bare parameter with no annotation or default.
    #[must_use]
    pub fn plain(name: Rc<str>) -> Self {
        Self {
            name,
            annotation: None,
            default: None,
        }
    }
}

/// A full parameter list, as rendered between `def f(` and `)`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Params {
    /// Positional-only parameters (before the `/`).
    pub posonly: Vec<Param>,
    /// Regular positional-or-keyword parameters.
    pub args: Vec<Param>,
    /// `*args`, if present.
    pub vararg: Option<Param>,
    /// Keyword-only parameters (after `*` or `*args`).
    pub kwonly: Vec<Param>,
    /// `**kwargs`, if present.
    pub kwarg: Option<Param>,
}

impl Params {
    /// True when the list renders as `()`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.posonly.is_empty()
            && self.args.is_empty()
            && self.vararg.is_none()
            && self.kwonly.is_empty()
            && self.kwarg.is_none()
    }
}

/// An import alias (`name` or `name as asname`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    /// Imported (dotted) name.
    pub name: Rc<str>,
    /// Binding name when it differs.
    pub asname: Option<Rc<str>>,
}

/// One `except` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptHandler {
    /// Matched exception type; `None` for a bare `except:`.
    pub exc_type: Option<ExprId>,
    /// Bound name (`except E as name`).
    pub name: Option<Rc<str>>,
    /// Handler body.
    pub body: Vec<StmtId>,
}

/// One `with` item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithItem {
    /// Context manager expression.
    pub context: ExprId,
    /// `as` target, if any.
    pub optional_vars: Option<ExprId>,
}

/// A `match` statement pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    /// A literal or dotted-name value pattern.
    Value(ExprId),
    /// `None` / `True` / `False`.
    Singleton(Object),
    /// `[p, ...]` / `(p, ...)`.
    Sequence(Vec<Pattern>),
    /// `{key: p, ..., **rest}`.
    Mapping {
        /// Key expressions, parallel to `patterns`.
        keys: Vec<ExprId>,
        /// Value sub-patterns.
        patterns: Vec<Pattern>,
        /// `**rest` capture name.
        rest: Option<Rc<str>>,
    },
    /// `Cls(p, ..., kw=p, ...)`.
    Class {
        /// Class expression.
        cls: ExprId,
        /// Positional sub-patterns.
        patterns: Vec<Pattern>,
        /// Keyword attribute names, parallel to `kwd_patterns`.
        kwd_attrs: Vec<Rc<str>>,
        /// Keyword sub-patterns.
        kwd_patterns: Vec<Pattern>,
    },
    /// `*name` / `*_` inside a sequence pattern.
    Star(Option<Rc<str>>),
    /// `p as name`, a bare capture `name`, or the wildcard `_`.
    As {
        /// Inner pattern; `None` for a bare capture or wildcard.
        pattern: Option<Box<Pattern>>,
        /// Capture name; `None` for the wildcard.
        name: Option<Rc<str>>,
    },
    /// `p1 | p2 | ...`.
    Or(Vec<Pattern>),
}

/// One `case` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCase {
    /// The case pattern.
    pub pattern: Pattern,
    /// Optional `if` guard.
    pub guard: Option<ExprId>,
    /// Case body.
    pub body: Vec<StmtId>,
}

/// An expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum AstExpr {
    /// A variable reference.
    Name(Rc<str>),
    /// A literal from the constant pool.
    Constant(Object),
    /// `left op right`.
    BinOp {
        left: ExprId,
        op: BinOpKind,
        right: ExprId,
    },
    /// `op operand`.
    UnaryOp { op: UnaryOpKind, operand: ExprId },
    /// `a and b and c` / `a or b`.
    BoolOp { op: BoolOpKind, values: Vec<ExprId> },
    /// `left op0 c0 op1 c1 ...` (chained comparisons share one node).
    Compare {
        left: ExprId,
        ops: Vec<CmpOpKind>,
        comparators: Vec<ExprId>,
    },
    /// `body if test else orelse`.
    IfExp {
        test: ExprId,
        body: ExprId,
        orelse: ExprId,
    },
    /// A call with positional, keyword, and splat arguments.
    Call {
        func: ExprId,
        args: Vec<ExprId>,
        keywords: Vec<Keyword>,
    },
    /// `value.attr`.
    Attribute { value: ExprId, attr: Rc<str> },
    /// `value[index]`.
    Subscript { value: ExprId, index: ExprId },
    /// `lower:upper:step` inside a subscript.
    Slice {
        lower: Option<ExprId>,
        upper: Option<ExprId>,
        step: Option<ExprId>,
    },
    /// `(a, b)`.
    Tuple(Vec<ExprId>),
    /// `[a, b]`.
    List(Vec<ExprId>),
    /// `{a, b}`.
    Set(Vec<ExprId>),
    /// `{k: v, ...}`; a `None` key renders `**value`.
    Dict {
        keys: Vec<Option<ExprId>>,
        values: Vec<ExprId>,
    },
    /// `[elt for ...]` and friends; `Dict` kind stores the key in `key`.
    Comp {
        kind: ComprehensionKind,
        /// Dict-comprehension key; `None` for the other kinds.
        key: Option<ExprId>,
        element: ExprId,
        generators: Vec<Comprehension>,
    },
    /// `lambda params: body`.
    Lambda { params: Box<Params>, body: ExprId },
    /// `*value` in calls and unpacking targets.
    Starred(ExprId),
    /// `yield` / `yield value`.
    Yield(Option<ExprId>),
    /// `yield from value`.
    YieldFrom(ExprId),
    /// `await value`.
    Await(ExprId),
    /// One `{...}` fragment of an f-string.
    FormattedValue {
        value: ExprId,
        /// `!s` / `!r` / `!a`.
        conversion: Option<char>,
        /// `:spec`, itself possibly a joined string.
        format_spec: Option<ExprId>,
    },
    /// An f-string.
    JoinedStr(Vec<ExprId>),
    /// `(target := value)`.
    NamedExpr { target: ExprId, value: ExprId },
}

/// A statement node.
#[derive(Debug, Clone, PartialEq)]
pub enum AstStmt {
    /// An expression evaluated for effect.
    Expr(ExprId),
    /// `t1 = t2 = value` (chained targets share the node).
    Assign { targets: Vec<ExprId>, value: ExprId },
    /// `target op= value`.
    AugAssign {
        target: ExprId,
        op: BinOpKind,
        value: ExprId,
    },
    /// `target: annotation = value`.
    AnnAssign {
        target: ExprId,
        annotation: ExprId,
        value: Option<ExprId>,
    },
    /// `if` / `elif` / `else` (elif nests in `orelse`).
    If {
        test: ExprId,
        body: Vec<StmtId>,
        orelse: Vec<StmtId>,
    },
    /// `while test: ... else: ...`.
    While {
        test: ExprId,
        body: Vec<StmtId>,
        orelse: Vec<StmtId>,
    },
    /// `for target in iter: ... else: ...`.
    For {
        target: ExprId,
        iter: ExprId,
        body: Vec<StmtId>,
        orelse: Vec<StmtId>,
        is_async: bool,
    },
    /// `try` with any combination of handlers / `else` / `finally`.
    Try {
        body: Vec<StmtId>,
        handlers: Vec<ExceptHandler>,
        orelse: Vec<StmtId>,
        finalbody: Vec<StmtId>,
    },
    /// `with items: ...`.
    With {
        items: Vec<WithItem>,
        body: Vec<StmtId>,
        is_async: bool,
    },
    /// `match subject: case ...`.
    Match { subject: ExprId, cases: Vec<MatchCase> },
    /// `def` / `async def`.
    FunctionDef {
        name: Rc<str>,
        params: Box<Params>,
        body: Vec<StmtId>,
        decorators: Vec<ExprId>,
        returns: Option<ExprId>,
        is_async: bool,
    },
    /// `class name(bases, **kwds): ...`.
    ClassDef {
        name: Rc<str>,
        bases: Vec<ExprId>,
        keywords: Vec<Keyword>,
        body: Vec<StmtId>,
        decorators: Vec<ExprId>,
    },
    /// `return` / `return value`.
    Return(Option<ExprId>),
    /// `raise` / `raise exc` / `raise exc from cause`.
    Raise {
        exc: Option<ExprId>,
        cause: Option<ExprId>,
    },
    Break,
    Continue,
    Pass,
    /// `del targets`.
    Delete(Vec<ExprId>),
    /// `global names`.
    Global(Vec<Rc<str>>),
    /// `nonlocal names`.
    Nonlocal(Vec<Rc<str>>),
    /// `assert test, msg`.
    Assert { test: ExprId, msg: Option<ExprId> },
    /// `import a as b, c`.
    Import(Vec<Alias>),
    /// `from module import names` with a relative level.
    ImportFrom {
        module: Option<Rc<str>>,
        names: Vec<Alias>,
        level: u32,
    },
    /// Python 2 `print` statement.
    Print {
        dest: Option<ExprId>,
        values: Vec<ExprId>,
        newline: bool,
    },
    /// Python 2 `exec` statement.
    Exec {
        body: ExprId,
        globals: Option<ExprId>,
        locals: Option<ExprId>,
    },
}

/// Arena owning every node of one code object's tree.
#[derive(Debug, Default)]
pub struct AstArena {
    exprs: Vec<AstExpr>,
    stmts: Vec<AstStmt>,
}

impl AstArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an expression node.
    pub fn expr(&mut self, node: AstExpr) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(node);
        id
    }

    /// Allocates a statement node.
    pub fn stmt(&mut self, node: AstStmt) -> StmtId {
        let id = StmtId(self.stmts.len() as u32);
        self.stmts.push(node);
        id
    }

    /// Reads an expression node.
    #[must_use]
    pub fn get_expr(&self, id: ExprId) -> &AstExpr {
        &self.exprs[id.index()]
    }

    /// Reads a statement node.
    #[must_use]
    pub fn get_stmt(&self, id: StmtId) -> &AstStmt {
        &self.stmts[id.index()]
    }

    /// Allocates a `Name` expression; the most common node by far.
    pub fn name(&mut self, name: Rc<str>) -> ExprId {
        self.expr(AstExpr::Name(name))
    }

    /// Allocates a constant expression.
    pub fn constant(&mut self, value: Object) -> ExprId {
        self.expr(AstExpr::Constant(value))
    }

    /// Structural equality of two expression trees.
    ///
    /// Identical ids are trivially equal; otherwise the nodes are compared
    /// recursively. Used by the entry-stack dataflow to decide whether two
    /// incoming stack values agree at a join point.
    #[must_use]
    pub fn exprs_equal(&self, a: ExprId, b: ExprId) -> bool {
        if a == b {
            return true;
        }
        match (self.get_expr(a), self.get_expr(b)) {
            (AstExpr::Name(x), AstExpr::Name(y)) => x == y,
            (AstExpr::Constant(x), AstExpr::Constant(y)) => x == y,
            (
                AstExpr::BinOp {
                    left: la,
                    op: oa,
                    right: ra,
                },
                AstExpr::BinOp {
                    left: lb,
                    op: ob,
                    right: rb,
                },
            ) => oa == ob && self.exprs_equal(*la, *lb) && self.exprs_equal(*ra, *rb),
            (
                AstExpr::UnaryOp { op: oa, operand: xa },
                AstExpr::UnaryOp { op: ob, operand: xb },
            ) => oa == ob && self.exprs_equal(*xa, *xb),
            (
                AstExpr::Attribute { value: va, attr: aa },
                AstExpr::Attribute { value: vb, attr: ab },
            ) => aa == ab && self.exprs_equal(*va, *vb),
            (
                AstExpr::Subscript { value: va, index: ia },
                AstExpr::Subscript { value: vb, index: ib },
            ) => self.exprs_equal(*va, *vb) && self.exprs_equal(*ia, *ib),
            (AstExpr::Tuple(xs), AstExpr::Tuple(ys)) | (AstExpr::List(xs), AstExpr::List(ys)) => {
                xs.len() == ys.len() && xs.iter().zip(ys).all(|(&x, &y)| self.exprs_equal(x, y))
            }
            (
                AstExpr::Compare {
                    left: la,
                    ops: oa,
                    comparators: ca,
                },
                AstExpr::Compare {
                    left: lb,
                    ops: ob,
                    comparators: cb,
                },
            ) => {
                oa == ob
                    && self.exprs_equal(*la, *lb)
                    && ca.len() == cb.len()
                    && ca.iter().zip(cb).all(|(&x, &y)| self.exprs_equal(x, y))
            }
            // Anything more exotic never coincides across branches in
            // compiler output; treat as unequal rather than deep-compare.
            _ => false,
        }
    }

    /// Number of allocated expressions, for diagnostics.
    #[must_use]
    pub fn expr_count(&self) -> usize {
        self.exprs.len()
    }

    /// Number of allocated statements, for diagnostics.
    #[must_use]
    pub fn stmt_count(&self) -> usize {
        self.stmts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{AstArena, AstExpr, BinOpKind, CmpOpKind};
    use crate::object::Object;

    #[test]
    fn structural_equality_crosses_ids() {
        let mut arena = AstArena::new();
        let a1 = arena.name("a".into());
        let a2 = arena.name("a".into());
        let b = arena.name("b".into());
        assert!(arena.exprs_equal(a1, a2));
        assert!(!arena.exprs_equal(a1, b));

        let one = arena.constant(Object::Int(1));
        let sum1 = arena.expr(AstExpr::BinOp {
            left: a1,
            op: BinOpKind::Add,
            right: one,
        });
        let one2 = arena.constant(Object::Int(1));
        let sum2 = arena.expr(AstExpr::BinOp {
            left: a2,
            op: BinOpKind::Add,
            right: one2,
        });
        assert!(arena.exprs_equal(sum1, sum2));
    }

    #[test]
    fn negation_table() {
        assert_eq!(CmpOpKind::Lt.negated(), Some(CmpOpKind::GtE));
        assert_eq!(CmpOpKind::In.negated(), Some(CmpOpKind::NotIn));
        assert_eq!(CmpOpKind::Is.negated(), Some(CmpOpKind::IsNot));
        assert_eq!(CmpOpKind::ExcMatch.negated(), None);
    }
}
