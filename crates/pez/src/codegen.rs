//! Renders the AST to Python source text.
//!
//! Four-space indentation, parenthesization by operator precedence (with
//! right-associative `**` and the usual `lambda < ternary < or < and`
//! ladder), and canonical literal forms from [`crate::object`]. The AST is
//! the only input: nothing bytecode-specific survives to here.

use std::fmt::Write;

use crate::ast::{
    AstArena, AstExpr, AstStmt, BinOpKind, BoolOpKind, CmpOpKind, Comprehension, ComprehensionKind, ExprId,
    MatchCase, Param, Params, Pattern, StmtId, UnaryOpKind,
};

/// Renders a module body.
#[must_use]
pub fn render_module(arena: &AstArena, statements: &[StmtId]) -> String {
    let mut writer = Writer {
        arena,
        out: String::new(),
        indent: 0,
    };
    writer.suite_flat(statements);
    writer.out
}

/// Expression precedence levels; higher binds tighter.
mod prec {
    pub const LAMBDA: u8 = 0;
    pub const TERNARY: u8 = 1;
    pub const OR: u8 = 2;
    pub const AND: u8 = 3;
    pub const NOT: u8 = 4;
    pub const COMPARISON: u8 = 5;
    pub const BIT_OR: u8 = 6;
    pub const BIT_XOR: u8 = 7;
    pub const BIT_AND: u8 = 8;
    pub const SHIFT: u8 = 9;
    pub const ADD: u8 = 10;
    pub const MUL: u8 = 11;
    pub const UNARY: u8 = 12;
    pub const POWER: u8 = 13;
    pub const AWAIT: u8 = 14;
    pub const POSTFIX: u8 = 15;
    pub const ATOM: u8 = 16;
}

fn bin_prec(op: BinOpKind) -> (u8, bool) {
    // (precedence, right-associative)
    match op {
        BinOpKind::BitOr => (prec::BIT_OR, false),
        BinOpKind::BitXor => (prec::BIT_XOR, false),
        BinOpKind::BitAnd => (prec::BIT_AND, false),
        BinOpKind::LShift | BinOpKind::RShift => (prec::SHIFT, false),
        BinOpKind::Add | BinOpKind::Sub => (prec::ADD, false),
        BinOpKind::Mult | BinOpKind::MatMult | BinOpKind::Div | BinOpKind::FloorDiv | BinOpKind::Mod => {
            (prec::MUL, false)
        }
        BinOpKind::Pow => (prec::POWER, true),
    }
}

struct Writer<'a> {
    arena: &'a AstArena,
    out: String,
    indent: usize,
}

impl Writer<'_> {
    fn line_start(&mut self) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
    }

    fn suite(&mut self, statements: &[StmtId]) {
        self.indent += 1;
        if statements.is_empty() {
            self.line_start();
            self.out.push_str("pass\n");
        } else {
            for &statement in statements {
                self.stmt(statement);
            }
        }
        self.indent -= 1;
    }

    fn suite_flat(&mut self, statements: &[StmtId]) {
        for &statement in statements {
            self.stmt(statement);
        }
    }

    fn stmt(&mut self, id: StmtId) {
        match self.arena.get_stmt(id) {
            AstStmt::Expr(value) => {
                self.line_start();
                self.expr(*value, prec::LAMBDA);
                self.out.push('\n');
            }
            AstStmt::Assign { targets, value } => {
                self.line_start();
                for &target in targets {
                    self.target(target);
                    self.out.push_str(" = ");
                }
                self.expr(*value, prec::LAMBDA);
                self.out.push('\n');
            }
            AstStmt::AugAssign { target, op, value } => {
                self.line_start();
                self.target(*target);
                let _ = write!(self.out, " {}= ", op.symbol());
                self.expr(*value, prec::LAMBDA);
                self.out.push('\n');
            }
            AstStmt::AnnAssign {
                target,
                annotation,
                value,
            } => {
                self.line_start();
                self.target(*target);
                self.out.push_str(": ");
                self.expr(*annotation, prec::LAMBDA);
                if let Some(value) = value {
                    self.out.push_str(" = ");
                    self.expr(*value, prec::LAMBDA);
                }
                self.out.push('\n');
            }
            AstStmt::If { test, body, orelse } => self.if_chain(*test, body, orelse, "if"),
            AstStmt::While { test, body, orelse } => {
                self.line_start();
                self.out.push_str("while ");
                self.expr(*test, prec::TERNARY);
                self.out.push_str(":\n");
                self.suite(body);
                self.else_suite(orelse);
            }
            AstStmt::For {
                target,
                iter,
                body,
                orelse,
                is_async,
            } => {
                self.line_start();
                if *is_async {
                    self.out.push_str("async ");
                }
                self.out.push_str("for ");
                self.target(*target);
                self.out.push_str(" in ");
                self.expr(*iter, prec::TERNARY);
                self.out.push_str(":\n");
                self.suite(body);
                self.else_suite(orelse);
            }
            AstStmt::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.line_start();
                self.out.push_str("try:\n");
                self.suite(body);
                for handler in handlers {
                    self.line_start();
                    self.out.push_str("except");
                    if let Some(exc_type) = handler.exc_type {
                        self.out.push(' ');
                        self.expr(exc_type, prec::TERNARY);
                        if let Some(name) = &handler.name {
                            let _ = write!(self.out, " as {name}");
                        }
                    }
                    self.out.push_str(":\n");
                    self.suite(&handler.body);
                }
                self.else_suite(orelse);
                if !finalbody.is_empty() {
                    self.line_start();
                    self.out.push_str("finally:\n");
                    self.suite(finalbody);
                }
            }
            AstStmt::With { items, body, is_async } => {
                self.line_start();
                if *is_async {
                    self.out.push_str("async ");
                }
                self.out.push_str("with ");
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        self.out.push_str(", ");
                    }
                    self.expr(item.context, prec::TERNARY);
                    if let Some(optional_vars) = item.optional_vars {
                        self.out.push_str(" as ");
                        self.target(optional_vars);
                    }
                }
                self.out.push_str(":\n");
                self.suite(body);
            }
            AstStmt::Match { subject, cases } => {
                self.line_start();
                self.out.push_str("match ");
                self.expr(*subject, prec::TERNARY);
                self.out.push_str(":\n");
                self.indent += 1;
                for case in cases {
                    self.case(case);
                }
                self.indent -= 1;
            }
            AstStmt::FunctionDef {
                name,
                params,
                body,
                decorators,
                returns,
                is_async,
            } => {
                self.decorators(decorators);
                self.line_start();
                if *is_async {
                    self.out.push_str("async ");
                }
                let _ = write!(self.out, "def {name}(");
                self.params(params);
                self.out.push(')');
                if let Some(returns) = returns {
                    self.out.push_str(" -> ");
                    self.expr(*returns, prec::TERNARY);
                }
                self.out.push_str(":\n");
                self.suite(body);
            }
            AstStmt::ClassDef {
                name,
                bases,
                keywords,
                body,
                decorators,
            } => {
                self.decorators(decorators);
                self.line_start();
                let _ = write!(self.out, "class {name}");
                if !bases.is_empty() || !keywords.is_empty() {
                    self.out.push('(');
                    let mut first = true;
                    for &base in bases {
                        if !first {
                            self.out.push_str(", ");
                        }
                        first = false;
                        self.expr(base, prec::TERNARY);
                    }
                    for keyword in keywords {
                        if !first {
                            self.out.push_str(", ");
                        }
                        first = false;
                        match &keyword.arg {
                            Some(arg) => {
                                let _ = write!(self.out, "{arg}=");
                            }
                            None => self.out.push_str("**"),
                        }
                        self.expr(keyword.value, prec::TERNARY);
                    }
                    self.out.push(')');
                }
                self.out.push_str(":\n");
                self.suite(body);
            }
            AstStmt::Return(value) => {
                self.line_start();
                self.out.push_str("return");
                if let Some(value) = value {
                    self.out.push(' ');
                    self.expr_or_bare_tuple(*value);
                }
                self.out.push('\n');
            }
            AstStmt::Raise { exc, cause } => {
                self.line_start();
                self.out.push_str("raise");
                if let Some(exc) = exc {
                    self.out.push(' ');
                    self.expr(*exc, prec::TERNARY);
                }
                if let Some(cause) = cause {
                    self.out.push_str(" from ");
                    self.expr(*cause, prec::TERNARY);
                }
                self.out.push('\n');
            }
            AstStmt::Break => {
                self.line_start();
                self.out.push_str("break\n");
            }
            AstStmt::Continue => {
                self.line_start();
                self.out.push_str("continue\n");
            }
            AstStmt::Pass => {
                self.line_start();
                self.out.push_str("pass\n");
            }
            AstStmt::Delete(targets) => {
                self.line_start();
                self.out.push_str("del ");
                for (index, &target) in targets.iter().enumerate() {
                    if index > 0 {
                        self.out.push_str(", ");
                    }
                    self.target(target);
                }
                self.out.push('\n');
            }
            AstStmt::Global(names) => {
                self.line_start();
                self.out.push_str("global ");
                self.name_list(names);
                self.out.push('\n');
            }
            AstStmt::Nonlocal(names) => {
                self.line_start();
                self.out.push_str("nonlocal ");
                self.name_list(names);
                self.out.push('\n');
            }
            AstStmt::Assert { test, msg } => {
                self.line_start();
                self.out.push_str("assert ");
                self.expr(*test, prec::TERNARY);
                if let Some(msg) = msg {
                    self.out.push_str(", ");
                    self.expr(*msg, prec::TERNARY);
                }
                self.out.push('\n');
            }
            AstStmt::Import(aliases) => {
                self.line_start();
                self.out.push_str("import ");
                self.aliases(aliases);
                self.out.push('\n');
            }
            AstStmt::ImportFrom { module, names, level } => {
                self.line_start();
                self.out.push_str("from ");
                for _ in 0..*level {
                    self.out.push('.');
                }
                if let Some(module) = module {
                    let _ = write!(self.out, "{module}");
                }
                self.out.push_str(" import ");
                self.aliases(names);
                self.out.push('\n');
            }
            AstStmt::Print { dest, values, newline } => {
                self.line_start();
                self.out.push_str("print");
                if let Some(dest) = dest {
                    self.out.push_str(" >>");
                    self.expr(*dest, prec::TERNARY);
                    if !values.is_empty() {
                        self.out.push(',');
                    }
                }
                for (index, &value) in values.iter().enumerate() {
                    self.out.push(if index == 0 { ' ' } else { ',' });
                    if index > 0 {
                        self.out.push(' ');
                    }
                    self.expr(value, prec::TERNARY);
                }
                if !newline {
                    self.out.push(',');
                }
                self.out.push('\n');
            }
            AstStmt::Exec { body, globals, locals } => {
                self.line_start();
                self.out.push_str("exec ");
                self.expr(*body, prec::TERNARY);
                if let Some(globals) = globals {
                    self.out.push_str(" in ");
                    self.expr(*globals, prec::TERNARY);
                }
                if let Some(locals) = locals {
                    self.out.push_str(", ");
                    self.expr(*locals, prec::TERNARY);
                }
                self.out.push('\n');
            }
        }
    }

    /// `if`/`elif` collapse: a single `If` in the else suite continues the
    /// chain.
    fn if_chain(&mut self, test: ExprId, body: &[StmtId], orelse: &[StmtId], keyword: &str) {
        self.line_start();
        self.out.push_str(keyword);
        self.out.push(' ');
        self.expr(test, prec::TERNARY);
        self.out.push_str(":\n");
        self.suite(body);
        match orelse {
            [] => {}
            [single] => {
                if let AstStmt::If {
                    test: elif_test,
                    body: elif_body,
                    orelse: elif_orelse,
                } = self.arena.get_stmt(*single)
                {
                    self.if_chain(*elif_test, elif_body, elif_orelse, "elif");
                } else {
                    self.else_suite(orelse);
                }
            }
            _ => self.else_suite(orelse),
        }
    }

    fn else_suite(&mut self, orelse: &[StmtId]) {
        if !orelse.is_empty() {
            self.line_start();
            self.out.push_str("else:\n");
            self.suite(orelse);
        }
    }

    fn case(&mut self, case: &MatchCase) {
        self.line_start();
        self.out.push_str("case ");
        self.pattern(&case.pattern);
        if let Some(guard) = case.guard {
            self.out.push_str(" if ");
            self.expr(guard, prec::TERNARY);
        }
        self.out.push_str(":\n");
        self.suite(&case.body);
    }

    fn pattern(&mut self, pattern: &Pattern) {
        match pattern {
            Pattern::Value(value) => self.expr(*value, prec::COMPARISON),
            Pattern::Singleton(object) => object.write_repr(&mut self.out),
            Pattern::Sequence(items) => {
                self.out.push('[');
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        self.out.push_str(", ");
                    }
                    self.pattern(item);
                }
                self.out.push(']');
            }
            Pattern::Mapping { keys, patterns, rest } => {
                self.out.push('{');
                let mut first = true;
                for (key, value) in keys.iter().zip(patterns) {
                    if !first {
                        self.out.push_str(", ");
                    }
                    first = false;
                    self.expr(*key, prec::TERNARY);
                    self.out.push_str(": ");
                    self.pattern(value);
                }
                if let Some(rest) = rest {
                    if !first {
                        self.out.push_str(", ");
                    }
                    let _ = write!(self.out, "**{rest}");
                }
                self.out.push('}');
            }
            Pattern::Class {
                cls,
                patterns,
                kwd_attrs,
                kwd_patterns,
            } => {
                self.expr(*cls, prec::POSTFIX);
                self.out.push('(');
                let mut first = true;
                for item in patterns {
                    if !first {
                        self.out.push_str(", ");
                    }
                    first = false;
                    self.pattern(item);
                }
                for (attr, value) in kwd_attrs.iter().zip(kwd_patterns) {
                    if !first {
                        self.out.push_str(", ");
                    }
                    first = false;
                    let _ = write!(self.out, "{attr}=");
                    self.pattern(value);
                }
                self.out.push(')');
            }
            Pattern::Star(name) => match name {
                Some(name) => {
                    let _ = write!(self.out, "*{name}");
                }
                None => self.out.push_str("*_"),
            },
            Pattern::As { pattern, name } => match (pattern, name) {
                (Some(inner), Some(name)) => {
                    self.pattern(inner);
                    let _ = write!(self.out, " as {name}");
                }
                (None, Some(name)) => {
                    let _ = write!(self.out, "{name}");
                }
                _ => self.out.push('_'),
            },
            Pattern::Or(options) => {
                for (index, option) in options.iter().enumerate() {
                    if index > 0 {
                        self.out.push_str(" | ");
                    }
                    self.pattern(option);
                }
            }
        }
    }

    fn decorators(&mut self, decorators: &[ExprId]) {
        for &decorator in decorators {
            self.line_start();
            self.out.push('@');
            self.expr(decorator, prec::TERNARY);
            self.out.push('\n');
        }
    }

    fn params(&mut self, params: &Params) {
        let mut first = true;
        let mut separator = |out: &mut String| {
            if !first {
                out.push_str(", ");
            }
            first = false;
        };
        for param in &params.posonly {
            separator(&mut self.out);
            self.param(param);
        }
        if !params.posonly.is_empty() {
            separator(&mut self.out);
            self.out.push('/');
        }
        for param in &params.args {
            separator(&mut self.out);
            self.param(param);
        }
        if let Some(vararg) = &params.vararg {
            separator(&mut self.out);
            self.out.push('*');
            self.param(vararg);
        } else if !params.kwonly.is_empty() {
            separator(&mut self.out);
            self.out.push('*');
        }
        for param in &params.kwonly {
            separator(&mut self.out);
            self.param(param);
        }
        if let Some(kwarg) = &params.kwarg {
            separator(&mut self.out);
            self.out.push_str("**");
            self.param(kwarg);
        }
    }

    fn param(&mut self, param: &Param) {
        let _ = write!(self.out, "{}", param.name);
        if let Some(annotation) = param.annotation {
            self.out.push_str(": ");
            self.expr(annotation, prec::TERNARY);
        }
        if let Some(default) = param.default {
            self.out.push_str(if param.annotation.is_some() { " = " } else { "=" });
            self.expr(default, prec::TERNARY);
        }
    }

    fn aliases(&mut self, aliases: &[crate::ast::Alias]) {
        for (index, alias) in aliases.iter().enumerate() {
            if index > 0 {
                self.out.push_str(", ");
            }
            let _ = write!(self.out, "{}", alias.name);
            if let Some(asname) = &alias.asname {
                let _ = write!(self.out, " as {asname}");
            }
        }
    }

    fn name_list(&mut self, names: &[std::rc::Rc<str>]) {
        for (index, name) in names.iter().enumerate() {
            if index > 0 {
                self.out.push_str(", ");
            }
            let _ = write!(self.out, "{name}");
        }
    }

    /// Assignment/return targets render without outer tuple parentheses.
    fn target(&mut self, id: ExprId) {
        match self.arena.get_expr(id) {
            AstExpr::Tuple(items) if !items.is_empty() => {
                for (index, &item) in items.iter().enumerate() {
                    if index > 0 {
                        self.out.push_str(", ");
                    }
                    self.expr(item, prec::TERNARY);
                }
            }
            _ => self.expr(id, prec::TERNARY),
        }
    }

    fn expr_or_bare_tuple(&mut self, id: ExprId) {
        match self.arena.get_expr(id) {
            AstExpr::Tuple(items) if !items.is_empty() => {
                for (index, &item) in items.iter().enumerate() {
                    if index > 0 {
                        self.out.push_str(", ");
                    }
                    self.expr(item, prec::TERNARY);
                }
            }
            _ => self.expr(id, prec::LAMBDA),
        }
    }

    fn expr(&mut self, id: ExprId, context: u8) {
        let own = self.precedence(id);
        let parens = own < context;
        if parens {
            self.out.push('(');
        }
        match self.arena.get_expr(id) {
            AstExpr::Name(name) => {
                let _ = write!(self.out, "{name}");
            }
            AstExpr::Constant(object) => object.write_repr(&mut self.out),
            AstExpr::BinOp { left, op, right } => {
                let (level, right_assoc) = bin_prec(*op);
                let (left_context, right_context) = if right_assoc {
                    (level + 1, level)
                } else {
                    (level, level + 1)
                };
                self.expr(*left, left_context);
                let _ = write!(self.out, " {} ", op.symbol());
                self.expr(*right, right_context);
            }
            AstExpr::UnaryOp { op, operand } => {
                self.out.push_str(op.symbol());
                let level = if *op == UnaryOpKind::Not { prec::NOT } else { prec::UNARY };
                self.expr(*operand, level);
            }
            AstExpr::BoolOp { op, values } => {
                let (symbol, level) = match op {
                    BoolOpKind::And => (" and ", prec::AND),
                    BoolOpKind::Or => (" or ", prec::OR),
                };
                for (index, &value) in values.iter().enumerate() {
                    if index > 0 {
                        self.out.push_str(symbol);
                    }
                    self.expr(value, level + 1);
                }
            }
            AstExpr::Compare {
                left,
                ops,
                comparators,
            } => {
                self.expr(*left, prec::COMPARISON + 1);
                for (op, &comparator) in ops.iter().zip(comparators) {
                    let _ = write!(self.out, " {} ", op.symbol());
                    self.expr(comparator, prec::COMPARISON + 1);
                }
            }
            AstExpr::IfExp { test, body, orelse } => {
                self.expr(*body, prec::OR);
                self.out.push_str(" if ");
                self.expr(*test, prec::OR);
                self.out.push_str(" else ");
                self.expr(*orelse, prec::TERNARY);
            }
            AstExpr::Call { func, args, keywords } => {
                self.expr(*func, prec::POSTFIX);
                self.out.push('(');
                let mut first = true;
                for &arg in args {
                    if !first {
                        self.out.push_str(", ");
                    }
                    first = false;
                    self.expr(arg, prec::TERNARY);
                }
                for keyword in keywords {
                    if !first {
                        self.out.push_str(", ");
                    }
                    first = false;
                    match &keyword.arg {
                        Some(arg) => {
                            let _ = write!(self.out, "{arg}=");
                        }
                        None => self.out.push_str("**"),
                    }
                    self.expr(keyword.value, prec::TERNARY);
                }
                self.out.push(')');
            }
            AstExpr::Attribute { value, attr } => {
                self.expr(*value, prec::POSTFIX);
                let _ = write!(self.out, ".{attr}");
            }
            AstExpr::Subscript { value, index } => {
                self.expr(*value, prec::POSTFIX);
                self.out.push('[');
                self.subscript_index(*index);
                self.out.push(']');
            }
            AstExpr::Slice { lower, upper, step } => {
                // A bare slice outside a subscript renders as slice(...)
                // for safety; inside one it is handled by the subscript arm.
                self.out.push_str("slice(");
                match lower {
                    Some(lower) => self.expr(*lower, prec::TERNARY),
                    None => self.out.push_str("None"),
                }
                self.out.push_str(", ");
                match upper {
                    Some(upper) => self.expr(*upper, prec::TERNARY),
                    None => self.out.push_str("None"),
                }
                if let Some(step) = step {
                    self.out.push_str(", ");
                    self.expr(*step, prec::TERNARY);
                }
                self.out.push(')');
            }
            AstExpr::Tuple(items) => {
                self.out.push('(');
                for (index, &item) in items.iter().enumerate() {
                    if index > 0 {
                        self.out.push_str(", ");
                    }
                    self.expr(item, prec::TERNARY);
                }
                if items.len() == 1 {
                    self.out.push(',');
                }
                self.out.push(')');
            }
            AstExpr::List(items) => {
                self.out.push('[');
                for (index, &item) in items.iter().enumerate() {
                    if index > 0 {
                        self.out.push_str(", ");
                    }
                    self.expr(item, prec::TERNARY);
                }
                self.out.push(']');
            }
            AstExpr::Set(items) => {
                if items.is_empty() {
                    self.out.push_str("set()");
                } else {
                    self.out.push('{');
                    for (index, &item) in items.iter().enumerate() {
                        if index > 0 {
                            self.out.push_str(", ");
                        }
                        self.expr(item, prec::TERNARY);
                    }
                    self.out.push('}');
                }
            }
            AstExpr::Dict { keys, values } => {
                self.out.push('{');
                for (index, (key, &value)) in keys.iter().zip(values).enumerate() {
                    if index > 0 {
                        self.out.push_str(", ");
                    }
                    match key {
                        Some(key) => {
                            self.expr(*key, prec::TERNARY);
                            self.out.push_str(": ");
                            self.expr(value, prec::TERNARY);
                        }
                        None => {
                            self.out.push_str("**");
                            self.expr(value, prec::TERNARY);
                        }
                    }
                }
                self.out.push('}');
            }
            AstExpr::Comp {
                kind,
                key,
                element,
                generators,
            } => {
                let (open, close) = match kind {
                    ComprehensionKind::List => ("[", "]"),
                    ComprehensionKind::Set | ComprehensionKind::Dict => ("{", "}"),
                    ComprehensionKind::Generator => ("(", ")"),
                };
                self.out.push_str(open);
                if let Some(key) = key {
                    self.expr(*key, prec::TERNARY);
                    self.out.push_str(": ");
                }
                self.expr(*element, prec::TERNARY);
                for generator in generators {
                    self.generator(generator);
                }
                self.out.push_str(close);
            }
            AstExpr::Lambda { params, body } => {
                self.out.push_str("lambda");
                if !params.is_empty() {
                    self.out.push(' ');
                    self.params(params);
                }
                self.out.push_str(": ");
                self.expr(*body, prec::LAMBDA);
            }
            AstExpr::Starred(value) => {
                self.out.push('*');
                self.expr(*value, prec::UNARY);
            }
            AstExpr::Yield(value) => {
                self.out.push_str("yield");
                if let Some(value) = value {
                    self.out.push(' ');
                    self.expr(*value, prec::TERNARY);
                }
            }
            AstExpr::YieldFrom(value) => {
                self.out.push_str("yield from ");
                self.expr(*value, prec::TERNARY);
            }
            AstExpr::Await(value) => {
                self.out.push_str("await ");
                self.expr(*value, prec::AWAIT);
            }
            AstExpr::FormattedValue { .. } => {
                // A formatted value outside a JoinedStr is still an
                // f-string with a single fragment.
                self.out.push_str("f\"");
                self.fstring_fragment(id);
                self.out.push('"');
            }
            AstExpr::JoinedStr(values) => {
                self.out.push_str("f\"");
                for &value in values {
                    self.fstring_fragment(value);
                }
                self.out.push('"');
            }
            AstExpr::NamedExpr { target, value } => {
                self.expr(*target, prec::POSTFIX);
                self.out.push_str(" := ");
                self.expr(*value, prec::TERNARY);
            }
        }
        if parens {
            self.out.push(')');
        }
    }

    /// Inside `[...]` a slice renders in colon form.
    fn subscript_index(&mut self, index: ExprId) {
        match self.arena.get_expr(index) {
            AstExpr::Slice { lower, upper, step } => {
                if let Some(lower) = lower {
                    self.expr(*lower, prec::TERNARY);
                }
                self.out.push(':');
                if let Some(upper) = upper {
                    self.expr(*upper, prec::TERNARY);
                }
                if let Some(step) = step {
                    self.out.push(':');
                    self.expr(*step, prec::TERNARY);
                }
            }
            AstExpr::Tuple(items) if items.iter().any(|&item| self.is_slice(item)) => {
                for (position, &item) in items.iter().enumerate() {
                    if position > 0 {
                        self.out.push_str(", ");
                    }
                    self.subscript_index(item);
                }
            }
            _ => self.expr(index, prec::TERNARY),
        }
    }

    fn is_slice(&self, id: ExprId) -> bool {
        matches!(self.arena.get_expr(id), AstExpr::Slice { .. })
    }

    fn generator(&mut self, generator: &Comprehension) {
        if generator.is_async {
            self.out.push_str(" async");
        }
        self.out.push_str(" for ");
        self.target(generator.target);
        self.out.push_str(" in ");
        self.expr(generator.iter, prec::OR);
        for &filter in &generator.ifs {
            self.out.push_str(" if ");
            self.expr(filter, prec::OR);
        }
    }

    /// One f-string piece: literal text or a `{...}` replacement field.
    fn fstring_fragment(&mut self, id: ExprId) {
        match self.arena.get_expr(id) {
            AstExpr::Constant(crate::object::Object::String(text)) => {
                for ch in text.chars() {
                    match ch {
                        '{' => self.out.push_str("{{"),
                        '}' => self.out.push_str("}}"),
                        '"' => self.out.push_str("\\\""),
                        '\\' => self.out.push_str("\\\\"),
                        '\n' => self.out.push_str("\\n"),
                        other => self.out.push(other),
                    }
                }
            }
            AstExpr::FormattedValue {
                value,
                conversion,
                format_spec,
            } => {
                self.out.push('{');
                self.expr(*value, prec::TERNARY);
                if let Some(conversion) = conversion {
                    let _ = write!(self.out, "!{conversion}");
                }
                if let Some(format_spec) = format_spec {
                    self.out.push(':');
                    self.format_spec(*format_spec);
                }
                self.out.push('}');
            }
            _ => {
                self.out.push('{');
                self.expr(id, prec::TERNARY);
                self.out.push('}');
            }
        }
    }

    /// Format specs are either literal text or nested fragments.
    fn format_spec(&mut self, id: ExprId) {
        match self.arena.get_expr(id) {
            AstExpr::Constant(crate::object::Object::String(text)) => {
                let text = text.to_string();
                self.out.push_str(&text);
            }
            AstExpr::JoinedStr(values) => {
                for &value in values {
                    self.fstring_fragment(value);
                }
            }
            _ => self.fstring_fragment(id),
        }
    }

    /// The precedence a node binds at, for parenthesization.
    fn precedence(&self, id: ExprId) -> u8 {
        match self.arena.get_expr(id) {
            AstExpr::Name(_)
            | AstExpr::Constant(_)
            | AstExpr::Tuple(_)
            | AstExpr::List(_)
            | AstExpr::Set(_)
            | AstExpr::Dict { .. }
            | AstExpr::Comp { .. }
            | AstExpr::JoinedStr(_)
            | AstExpr::FormattedValue { .. } => prec::ATOM,
            AstExpr::Call { .. } | AstExpr::Attribute { .. } | AstExpr::Subscript { .. } => prec::POSTFIX,
            AstExpr::Await(_) => prec::AWAIT,
            AstExpr::BinOp { op, .. } => bin_prec(*op).0,
            AstExpr::UnaryOp { op, .. } => {
                if *op == UnaryOpKind::Not {
                    prec::NOT
                } else {
                    prec::UNARY
                }
            }
            AstExpr::BoolOp { op, .. } => match op {
                BoolOpKind::And => prec::AND,
                BoolOpKind::Or => prec::OR,
            },
            AstExpr::Compare { .. } => prec::COMPARISON,
            AstExpr::IfExp { .. } => prec::TERNARY,
            AstExpr::Lambda { .. } => prec::LAMBDA,
            AstExpr::Starred(_) | AstExpr::Yield(_) | AstExpr::YieldFrom(_) | AstExpr::NamedExpr { .. } => {
                prec::LAMBDA
            }
            AstExpr::Slice { .. } => prec::ATOM,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::render_module;
    use crate::{
        ast::{AstArena, AstExpr, AstStmt, BinOpKind, BoolOpKind, CmpOpKind},
        object::Object,
    };

    fn render_expr(arena: &AstArena, statements: &[crate::ast::StmtId]) -> String {
        render_module(arena, statements)
    }

    #[test]
    fn precedence_parenthesization() {
        let mut arena = AstArena::new();
        let a = arena.name("a".into());
        let b = arena.name("b".into());
        let c = arena.name("c".into());
        let sum = arena.expr(AstExpr::BinOp {
            left: a,
            op: BinOpKind::Add,
            right: b,
        });
        let product = arena.expr(AstExpr::BinOp {
            left: sum,
            op: BinOpKind::Mult,
            right: c,
        });
        let statement = arena.stmt(AstStmt::Expr(product));
        assert_eq!(render_expr(&arena, &[statement]), "(a + b) * c\n");
    }

    #[test]
    fn power_is_right_associative() {
        let mut arena = AstArena::new();
        let a = arena.name("a".into());
        let b = arena.name("b".into());
        let c = arena.name("c".into());
        let inner = arena.expr(AstExpr::BinOp {
            left: a,
            op: BinOpKind::Pow,
            right: b,
        });
        let outer = arena.expr(AstExpr::BinOp {
            left: inner,
            op: BinOpKind::Pow,
            right: c,
        });
        let statement = arena.stmt(AstStmt::Expr(outer));
        assert_eq!(render_expr(&arena, &[statement]), "(a ** b) ** c\n");
    }

    #[test]
    fn chained_compare_renders_flat() {
        let mut arena = AstArena::new();
        let a = arena.name("a".into());
        let b = arena.name("b".into());
        let c = arena.name("c".into());
        let compare = arena.expr(AstExpr::Compare {
            left: a,
            ops: vec![CmpOpKind::Lt, CmpOpKind::Lt],
            comparators: vec![b, c],
        });
        let statement = arena.stmt(AstStmt::Expr(compare));
        assert_eq!(render_expr(&arena, &[statement]), "a < b < c\n");
    }

    #[test]
    fn elif_collapse() {
        let mut arena = AstArena::new();
        let a = arena.name("a".into());
        let b = arena.name("b".into());
        let pass1 = arena.stmt(AstStmt::Pass);
        let pass2 = arena.stmt(AstStmt::Pass);
        let pass3 = arena.stmt(AstStmt::Pass);
        let inner = arena.stmt(AstStmt::If {
            test: b,
            body: vec![pass2],
            orelse: vec![pass3],
        });
        let outer = arena.stmt(AstStmt::If {
            test: a,
            body: vec![pass1],
            orelse: vec![inner],
        });
        assert_eq!(
            render_expr(&arena, &[outer]),
            "if a:\n    pass\nelif b:\n    pass\nelse:\n    pass\n"
        );
    }

    #[test]
    fn bool_op_and_ternary() {
        let mut arena = AstArena::new();
        let a = arena.name("a".into());
        let b = arena.name("b".into());
        let c = arena.name("c".into());
        let or_expr = arena.expr(AstExpr::BoolOp {
            op: BoolOpKind::Or,
            values: vec![b, c],
        });
        let ternary = arena.expr(AstExpr::IfExp {
            test: a,
            body: b,
            orelse: or_expr,
        });
        let x = arena.name("x".into());
        let statement = arena.stmt(AstStmt::Assign {
            targets: vec![x],
            value: ternary,
        });
        assert_eq!(render_expr(&arena, &[statement]), "x = b if a else b or c\n");
    }

    #[test]
    fn slices_and_calls() {
        let mut arena = AstArena::new();
        let xs = arena.name("xs".into());
        let one = arena.constant(Object::Int(1));
        let slice = arena.expr(AstExpr::Slice {
            lower: Some(one),
            upper: None,
            step: None,
        });
        let subscript = arena.expr(AstExpr::Subscript { value: xs, index: slice });
        let statement = arena.stmt(AstStmt::Expr(subscript));
        assert_eq!(render_expr(&arena, &[statement]), "xs[1:]\n");
    }
}
