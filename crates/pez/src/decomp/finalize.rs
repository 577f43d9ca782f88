//! Module-level finalisation passes.
//!
//! Run once after the top-level code object is emitted: a leading
//! `__doc__` assignment becomes the module docstring, `from __future__`
//! imports float to the top (after the docstring), and runs of single-name
//! `ImportFrom` statements that came from one multi-name import are merged
//! back together.

use std::rc::Rc;

use crate::{
    ast::{AstArena, AstStmt, StmtId},
    tracer::DecompileTracer,
};

use super::Decompiler;

impl<Tr: DecompileTracer> Decompiler<'_, Tr> {
    /// Applies the module-only cleanup passes to a finished statement list.
    pub fn finalize_module(&mut self, statements: Vec<StmtId>) -> Vec<StmtId> {
        let statements = rewrite_doc_assignment(self.arena, statements);
        let statements = group_import_from(self.arena, statements);
        reorder_future_imports(self.arena, statements)
    }
}

/// `__doc__ = '...'` at the top of a module is the docstring.
fn rewrite_doc_assignment(arena: &mut AstArena, mut statements: Vec<StmtId>) -> Vec<StmtId> {
    if let Some(&first) = statements.first() {
        if let AstStmt::Assign { targets, value } = arena.get_stmt(first) {
            let is_doc = targets.len() == 1
                && matches!(arena.get_expr(targets[0]), crate::ast::AstExpr::Name(name) if &**name == "__doc__");
            if is_doc && matches!(arena.get_expr(*value), crate::ast::AstExpr::Constant(crate::object::Object::String(_)))
            {
                let value = *value;
                statements[0] = arena.stmt(AstStmt::Expr(value));
            }
        }
    }
    statements
}

/// Merges consecutive single-name `from m import a` statements that share
/// one module and level back into `from m import a, b, c`.
fn group_import_from(arena: &mut AstArena, statements: Vec<StmtId>) -> Vec<StmtId> {
    let mut grouped: Vec<StmtId> = Vec::with_capacity(statements.len());
    for statement in statements {
        let merged = match (grouped.last(), arena.get_stmt(statement)) {
            (
                Some(&previous),
                AstStmt::ImportFrom {
                    module,
                    names,
                    level,
                },
            ) => match arena.get_stmt(previous) {
                AstStmt::ImportFrom {
                    module: prev_module,
                    names: prev_names,
                    level: prev_level,
                } if prev_module == module && prev_level == level && names.len() == 1 => {
                    let mut combined = prev_names.clone();
                    combined.extend(names.iter().cloned());
                    Some(AstStmt::ImportFrom {
                        module: module.as_ref().map(Rc::clone),
                        names: combined,
                        level: *level,
                    })
                }
                _ => None,
            },
            _ => None,
        };
        match merged {
            Some(statement) => {
                let id = arena.stmt(statement);
                *grouped.last_mut().expect("checked non-empty") = id;
            }
            None => grouped.push(statement),
        }
    }
    grouped
}

/// Docstring first, `from __future__ import ...` next (in original order),
/// everything else after.
fn reorder_future_imports(arena: &AstArena, statements: Vec<StmtId>) -> Vec<StmtId> {
    let is_docstring = |&id: &StmtId| {
        matches!(
            arena.get_stmt(id),
            AstStmt::Expr(value)
                if matches!(arena.get_expr(*value), crate::ast::AstExpr::Constant(crate::object::Object::String(_)))
        )
    };
    let is_future = |&id: &StmtId| {
        matches!(
            arena.get_stmt(id),
            AstStmt::ImportFrom { module: Some(module), .. } if &**module == "__future__"
        )
    };

    let mut docstring = Vec::new();
    let mut futures = Vec::new();
    let mut rest = Vec::new();
    for (index, statement) in statements.iter().enumerate() {
        if index == 0 && is_docstring(statement) {
            docstring.push(*statement);
        } else if is_future(statement) {
            futures.push(*statement);
        } else {
            rest.push(*statement);
        }
    }
    docstring.into_iter().chain(futures).chain(rest).collect()
}
