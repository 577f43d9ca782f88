//! Nested code objects: function and class definitions, lambdas, and
//! comprehension code objects.
//!
//! Each nested object recurses through a fresh `Decompiler` splicing into
//! the parent's arena. Signatures are rebuilt from the code object's
//! argument counts plus whatever defaults/annotations the `MAKE_FUNCTION`
//! site stashed on the builder; bodies get their docstring and inferred
//! `global`/`nonlocal` declarations prepended; class bodies drop the
//! compiler's `__module__`/`__qualname__` prelude.

use std::rc::Rc;

use crate::{
    ast::{
        AstArena, AstExpr, AstStmt, Comprehension, ComprehensionKind, ExprId, Param, Params, StmtId,
    },
    code::Code,
    error::{DecompileError, DecompileErrorKind, DecompileResult},
    object::Object,
    tracer::{DecompileTracer, NoopTracer},
    version::PythonVersion,
};

use super::Decompiler;

/// Marker callee for comprehension accumulator statements.
pub(crate) const COMP_APPEND_MARKER: &str = "__comp_append__";

/// Lowers a function builder reaching a store into a `FunctionDef`.
pub(super) fn function_def<Tr: DecompileTracer>(
    decompiler: &mut Decompiler<'_, Tr>,
    target: ExprId,
    builder: &crate::stack::FunctionBuilder,
) -> DecompileResult<StmtId> {
    let name = match decompiler.arena.get_expr(target) {
        AstExpr::Name(name) => Rc::clone(name),
        _ => Rc::from(builder.code.name.as_str()),
    };
    let params = build_params(decompiler.arena, builder);
    let returns = builder
        .annotations
        .iter()
        .find(|(key, _)| &**key == "return")
        .map(|(_, value)| *value);

    let mut body = decompile_body(
        decompiler.arena,
        decompiler.tracer,
        &builder.code,
        decompiler.version,
        decompiler.depth + 1,
    )?;
    prepend_docstring(decompiler.arena, &builder.code, decompiler.version, &mut body);

    let mut decorators = builder.decorators.clone();
    decorators.reverse();
    Ok(decompiler.arena.stmt(AstStmt::FunctionDef {
        name,
        params: Box::new(params),
        body,
        decorators,
        returns,
        is_async: builder.code.is_async(),
    }))
}

/// Lowers a class builder reaching a store into a `ClassDef`.
pub(super) fn class_def<Tr: DecompileTracer>(
    decompiler: &mut Decompiler<'_, Tr>,
    target: ExprId,
    builder: &crate::stack::ClassBuilder,
) -> DecompileResult<StmtId> {
    let name = match decompiler.arena.get_expr(target) {
        AstExpr::Name(name) => Rc::clone(name),
        _ => Rc::clone(&builder.name),
    };
    let mut body = decompile_body(
        decompiler.arena,
        decompiler.tracer,
        &builder.code,
        decompiler.version,
        decompiler.depth + 1,
    )?;
    trim_class_prelude(decompiler.arena, &mut body);
    if body.is_empty() {
        body.push(decompiler.arena.stmt(AstStmt::Pass));
    }

    let mut decorators = builder.decorators.clone();
    decorators.reverse();
    Ok(decompiler.arena.stmt(AstStmt::ClassDef {
        name,
        bases: builder.bases.clone(),
        keywords: builder.keywords.clone(),
        body,
        decorators,
    }))
}

/// Decompiles a nested code object into statements in the shared arena.
pub(super) fn decompile_body<Tr: DecompileTracer>(
    arena: &mut AstArena,
    tracer: &mut Tr,
    code: &Rc<Code>,
    version: PythonVersion,
    depth: usize,
) -> DecompileResult<Vec<StmtId>> {
    let mut nested = Decompiler::new(arena, tracer, Rc::clone(code), version, depth)?;
    let mut body = nested.run()?;
    let globals = std::mem::take(&mut nested.global_names);
    let nonlocals = std::mem::take(&mut nested.nonlocal_names);
    drop(nested);

    // Declarations come first, docstring handling later prepends before
    // them in source order.
    let mut prologue = Vec::new();
    if !globals.is_empty() {
        prologue.push(arena.stmt(AstStmt::Global(globals)));
    }
    if !nonlocals.is_empty() {
        prologue.push(arena.stmt(AstStmt::Nonlocal(nonlocals)));
    }
    prologue.append(&mut body);
    Ok(prologue)
}

/// Prepends a function docstring when the code object carries one.
///
/// The docstring sits in the constant pool's first slot but is never
/// loaded; a `LOAD_CONST 0` anywhere means slot 0 is a real constant
/// instead.
fn prepend_docstring(arena: &mut AstArena, code: &Code, version: PythonVersion, body: &mut Vec<StmtId>) {
    let Some(docstring) = code.docstring() else { return };
    let loads_slot_zero = crate::opcode::decode(&code.code_bytes, version)
        .map(|instructions| {
            instructions.iter().any(|instruction| {
                matches!(instruction.opcode, crate::opcode::Opcode::LoadConst) && instruction.arg == 0
            })
        })
        .unwrap_or(true);
    if loads_slot_zero {
        return;
    }
    let constant = arena.constant(Object::String(docstring.into()));
    let statement = arena.stmt(AstStmt::Expr(constant));
    body.insert(0, statement);
}

/// Drops the synthetic `__module__`/`__qualname__` assignments and the 2.x
/// `return locals()` epilogue from a class body.
fn trim_class_prelude(arena: &AstArena, body: &mut Vec<StmtId>) {
    body.retain(|&statement| match arena.get_stmt(statement) {
        AstStmt::Assign { targets, .. } => !targets.iter().any(|&target| {
            matches!(
                arena.get_expr(target),
                AstExpr::Name(name) if matches!(&**name, "__module__" | "__qualname__" | "__firstlineno__" | "__static_attributes__")
            )
        }),
        AstStmt::Return(Some(value)) => !matches!(
            arena.get_expr(*value),
            AstExpr::Call { func, .. } if matches!(arena.get_expr(*func), AstExpr::Name(name) if &**name == "locals")
        ),
        _ => true,
    });
}

/// Rebuilds the parameter list from argument counts and builder state.
fn build_params(arena: &mut AstArena, builder: &crate::stack::FunctionBuilder) -> Params {
    let code = &builder.code;
    let mut params = Params::default();
    let positional_total = code.argcount as usize;
    let posonly = code.posonlyargcount as usize;
    let kwonly = code.kwonlyargcount as usize;

    let annotation_for = |name: &str| {
        builder
            .annotations
            .iter()
            .find(|(key, _)| &**key == name)
            .map(|(_, value)| *value)
    };

    let mut make_param = |name: &Rc<str>| Param {
        name: Rc::clone(name),
        annotation: annotation_for(name),
        default: None,
    };

    for (index, name) in code.varnames.iter().take(positional_total).enumerate() {
        let param = make_param(name);
        if index < posonly {
            params.posonly.push(param);
        } else {
            params.args.push(param);
        }
    }
    for name in code.varnames.iter().skip(positional_total).take(kwonly) {
        let mut param = make_param(name);
        param.default = builder
            .kw_defaults
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| *value);
        params.kwonly.push(param);
    }
    let mut cursor = positional_total + kwonly;
    if code.has_varargs() {
        if let Some(name) = code.varnames.get(cursor) {
            params.vararg = Some(make_param(name));
        }
        cursor += 1;
    }
    if code.has_varkeywords() {
        if let Some(name) = code.varnames.get(cursor) {
            params.kwarg = Some(make_param(name));
        }
    }

    // Positional defaults align to the tail of the positional parameters.
    let defaults = &builder.defaults;
    let all_positional = params.posonly.len() + params.args.len();
    if defaults.len() <= all_positional {
        let offset = all_positional - defaults.len();
        for (index, &default) in defaults.iter().enumerate() {
            let slot = offset + index;
            let param = if slot < params.posonly.len() {
                &mut params.posonly[slot]
            } else {
                &mut params.args[slot - params.posonly.len()]
            };
            param.default = Some(default);
        }
    }
    params
}

/// Converts a lambda builder into a `Lambda` expression by decompiling its
/// body to a single returned expression.
pub(super) fn lambda_expr(
    arena: &mut AstArena,
    builder: &crate::stack::FunctionBuilder,
    version: PythonVersion,
    depth: usize,
) -> DecompileResult<ExprId> {
    let mut tracer = NoopTracer;
    let body = decompile_body(arena, &mut tracer, &builder.code, version, depth + 1)?;
    let value = match body.as_slice() {
        [single] => match arena.get_stmt(*single) {
            AstStmt::Return(Some(value)) => *value,
            // `lambda: None` compiles to a bare return.
            AstStmt::Return(None) | AstStmt::Pass => arena.constant(Object::None),
            _ => {
                return Err(DecompileError::new(DecompileErrorKind::InvalidBlock(
                    "lambda body is not a single expression".to_owned(),
                )));
            }
        },
        _ => {
            return Err(DecompileError::new(DecompileErrorKind::InvalidBlock(
                "lambda body is not a single expression".to_owned(),
            )));
        }
    };
    let params = build_params(arena, builder);
    Ok(arena.expr(AstExpr::Lambda {
        params: Box::new(params),
        body: value,
    }))
}

/// Converts a comprehension code object plus its iterator argument into the
/// comprehension expression.
pub(super) fn comprehension_expr(
    arena: &mut AstArena,
    kind: ComprehensionKind,
    code: &Rc<Code>,
    iterable: ExprId,
    version: PythonVersion,
    depth: usize,
) -> DecompileResult<ExprId> {
    let mut tracer = NoopTracer;
    let body = decompile_body(arena, &mut tracer, code, version, depth + 1)?;

    // Inline-comprehension detection inside the nested body usually
    // reduces everything to `return <comp>`; splice the real iterable in
    // place of the `.0` argument.
    let statements = body;
    if let [single] = statements.as_slice() {
        if let AstStmt::Return(Some(value)) = arena.get_stmt(*single) {
            if let AstExpr::Comp {
                key,
                element,
                generators,
                ..
            } = arena.get_expr(*value).clone()
            {
                let mut generators = generators;
                if let Some(first) = generators.first_mut() {
                    first.iter = iterable;
                }
                return Ok(arena.expr(AstExpr::Comp {
                    kind,
                    key,
                    element,
                    generators,
                }));
            }
        }
    }

    // Otherwise the body is still a for-loop (generator expressions yield
    // instead of appending).
    let for_stmt = statements
        .iter()
        .find_map(|&statement| match arena.get_stmt(statement) {
            AstStmt::For { .. } => Some(statement),
            _ => None,
        })
        .ok_or_else(invalid_comprehension)?;
    let AstStmt::For {
        target, body: loop_body, is_async, ..
    } = arena.get_stmt(for_stmt).clone()
    else {
        return Err(invalid_comprehension());
    };

    let first = Comprehension {
        target,
        iter: iterable,
        ifs: Vec::new(),
        is_async,
    };
    let (key, element, generators) =
        comp_from_stmts(arena, &loop_body, first).ok_or_else(invalid_comprehension)?;
    Ok(arena.expr(AstExpr::Comp {
        kind,
        key,
        element,
        generators,
    }))
}

fn invalid_comprehension() -> DecompileError {
    DecompileError::new(DecompileErrorKind::InvalidBlock(
        "comprehension body has unexpected shape".to_owned(),
    ))
}

/// Walks a comprehension body: nested `for`s extend the generator list,
/// `if`s add filters, and the innermost append/yield is the element.
///
/// Returns `(dict_key, element, generators)`.
pub(super) fn comp_from_stmts(
    arena: &mut AstArena,
    body: &[StmtId],
    first: Comprehension,
) -> Option<(Option<ExprId>, ExprId, Vec<Comprehension>)> {
    let mut generators = vec![first];
    let mut cursor: Vec<StmtId> = body.to_vec();

    loop {
        match cursor.as_slice() {
            [single] => match arena.get_stmt(*single).clone() {
                AstStmt::For {
                    target,
                    iter,
                    body,
                    orelse,
                    is_async,
                } if orelse.is_empty() => {
                    generators.push(Comprehension {
                        target,
                        iter,
                        ifs: Vec::new(),
                        is_async,
                    });
                    cursor = body;
                }
                AstStmt::If { test, body, orelse } if orelse.is_empty() => {
                    generators.last_mut()?.ifs.push(test);
                    cursor = body;
                }
                AstStmt::Expr(value) => {
                    // Either the marker call or a yielded element.
                    return element_of(arena, value).map(|(key, element)| (key, element, generators));
                }
                _ => return None,
            },
            _ => return None,
        }
    }
}

/// Extracts the element (and dict key) from the innermost statement.
fn element_of(arena: &AstArena, value: ExprId) -> Option<(Option<ExprId>, ExprId)> {
    match arena.get_expr(value) {
        AstExpr::Call { func, args, .. } => match arena.get_expr(*func) {
            AstExpr::Name(name) if &**name == COMP_APPEND_MARKER => match args.as_slice() {
                [element] => Some((None, *element)),
                [key, element] => Some((Some(*key), *element)),
                _ => None,
            },
            _ => None,
        },
        // Generator expressions yield their element.
        AstExpr::Yield(Some(element)) => Some((None, *element)),
        _ => None,
    }
}

/// Renders leftover append markers as explicit method calls on the
/// container, for loops that refused to reduce to a comprehension.
pub(super) fn appends_to_calls(arena: &mut AstArena, body: &[StmtId], container: ExprId) -> Vec<StmtId> {
    body.iter()
        .map(|&statement| match arena.get_stmt(statement).clone() {
            AstStmt::Expr(value) => match element_of(arena, value) {
                Some((key, element)) => {
                    let call = match key {
                        Some(key) => {
                            let index = key;
                            let target = arena.expr(AstExpr::Subscript {
                                value: container,
                                index,
                            });
                            return arena.stmt(AstStmt::Assign {
                                targets: vec![target],
                                value: element,
                            });
                        }
                        None => {
                            let method = arena.expr(AstExpr::Attribute {
                                value: container,
                                attr: "append".into(),
                            });
                            arena.expr(AstExpr::Call {
                                func: method,
                                args: vec![element],
                                keywords: Vec::new(),
                            })
                        }
                    };
                    arena.stmt(AstStmt::Expr(call))
                }
                None => statement,
            },
            _ => statement,
        })
        .collect()
}

