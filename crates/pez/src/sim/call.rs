//! Call-shaped handlers: attribute loads, every call convention CPython has
//! used, function/class construction, and the import family.

use std::rc::Rc;

use crate::{
    ast::{AstExpr, ComprehensionKind, ExprId, Keyword, UnaryOpKind},
    error::{SimError, SimResult},
    object::Object,
    opcode::{Instruction, Opcode},
    stack::{ClassBuilder, FunctionBuilder, ImportValue, StackValue},
    tracer::DecompileTracer,
};

use super::Simulator;

/// `CALL_INTRINSIC_1` operands with a source-level meaning.
const INTRINSIC_IMPORT_STAR: u32 = 2;
const INTRINSIC_STOPITERATION_ERROR: u32 = 3;
const INTRINSIC_UNARY_POSITIVE: u32 = 5;
const INTRINSIC_LIST_TO_TUPLE: u32 = 6;

impl<Tr: DecompileTracer> Simulator<'_, Tr> {
    /// Attribute and method loads across the layout eras.
    pub(super) fn load_attr(&mut self, instruction: &Instruction) -> SimResult<()> {
        use Opcode as Op;
        let arg = instruction.arg;
        match instruction.opcode {
            Op::LoadAttr => {
                let (index, method_form) = if self.version.gte(3, 12) {
                    (arg >> 1, arg & 1 != 0)
                } else {
                    (arg, false)
                };
                let attr = self.global_name(index)?;
                match self.stack.pop()? {
                    // `import a.b as c` walks the attribute path; the dotted
                    // module name already carries it.
                    StackValue::Import(import) => {
                        self.stack.push(StackValue::Import(import));
                    }
                    value => {
                        let object = self.value_to_expr(value)?;
                        let id = self.arena.expr(AstExpr::Attribute { value: object, attr });
                        self.stack.push(StackValue::Expr(id));
                        if method_form {
                            self.stack.push(StackValue::Expr(object));
                        }
                    }
                }
            }
            Op::LoadMethod => {
                let attr = self.global_name(arg)?;
                let object = self.pop_expr()?;
                let id = self.arena.expr(AstExpr::Attribute { value: object, attr });
                self.stack.push(StackValue::Expr(id));
                self.stack.push(StackValue::Expr(object));
            }
            Op::LoadSuperAttr => {
                let method_form = arg & 1 != 0;
                let attr = self.global_name(arg >> 2)?;
                let receiver = self.pop_expr()?;
                let _class = self.pop_expr()?;
                let _super_name = self.pop_expr()?;
                let func = self.arena.name("super".into());
                let call = self.arena.expr(AstExpr::Call {
                    func,
                    args: Vec::new(),
                    keywords: Vec::new(),
                });
                let id = self.arena.expr(AstExpr::Attribute { value: call, attr });
                self.stack.push(StackValue::Expr(id));
                if method_form {
                    self.stack.push(StackValue::Expr(receiver));
                }
            }
            Op::LoadSpecial => {
                // 3.14 with-statement prologue; the manager is the operand
                // under the special-method slot.
                if let Ok(manager) = self.peek_expr(0) {
                    self.pending_with = Some(manager);
                }
                self.stack.push(StackValue::SavedLocal(super::WITH_EXIT_MARKER.into()));
            }
            other => return Err(SimError::UnhandledOpcode(other.name())),
        }
        Ok(())
    }

    /// Calls, construction, and imports.
    pub(super) fn call_family(&mut self, instruction: &Instruction) -> SimResult<()> {
        use Opcode as Op;
        let arg = instruction.arg;
        match instruction.opcode {
            Op::PushNull => self.stack.push(StackValue::NullMarker),
            Op::KwNames => {
                let names = self.const_name_tuple(arg)?;
                self.set_kw_names(names);
            }
            Op::MakeFunction => self.make_function(arg, false)?,
            Op::MakeClosure => self.make_function(arg, true)?,
            Op::SetFunctionAttribute => self.set_function_attribute(arg)?,
            Op::BuildClass => self.legacy_build_class()?,
            Op::ImportName => self.import_name(arg)?,
            Op::ImportFrom => self.import_from(arg)?,
            Op::ImportStar => self.import_star()?,
            Op::CallIntrinsic1 => self.intrinsic_1(arg)?,
            Op::CallIntrinsic2 => {
                let _rhs = self.stack.pop()?;
                let _lhs = self.stack.pop()?;
                self.stack.push(StackValue::Unknown);
            }
            Op::Call | Op::CallKw => self.call_modern(instruction.opcode, arg)?,
            Op::CallMethod => {
                let args = self.stack.pop_n(arg as usize)?;
                let _receiver = self.stack.pop()?;
                let callee = self.stack.pop()?;
                self.finish_call(callee, args, Vec::new())?;
            }
            Op::CallFunction => {
                if self.version.is_legacy() {
                    self.call_legacy(arg, false, false)?;
                } else {
                    let args = self.stack.pop_n(arg as usize)?;
                    let callee = self.stack.pop()?;
                    self.finish_call(callee, args, Vec::new())?;
                }
            }
            Op::CallFunctionVar => self.call_legacy(arg, true, false)?,
            Op::CallFunctionVarKw => self.call_legacy(arg, true, true)?,
            Op::CallFunctionKw => {
                if self.version.lt(3, 6) {
                    self.call_legacy(arg, false, true)?;
                } else {
                    // Names tuple on top; the last len(names) arguments are
                    // keyword values.
                    let names = match self.stack.pop()? {
                        StackValue::Expr(id) => match self.arena.get_expr(id) {
                            AstExpr::Constant(Object::Tuple(items)) => items
                                .iter()
                                .map(|item| match item {
                                    Object::String(s) => Ok(Rc::clone(s)),
                                    _ => Err(SimError::NotAnExpression("keyword name")),
                                })
                                .collect::<SimResult<Vec<_>>>()?,
                            _ => return Err(SimError::NotAnExpression("keyword names")),
                        },
                        other => return Err(SimError::NotAnExpression(other.tag())),
                    };
                    let mut args = self.stack.pop_n(arg as usize)?;
                    args.reverse();
                    let callee = self.stack.pop()?;
                    let split = args.len() - names.len().min(args.len());
                    let keyword_values = args.split_off(split);
                    let keywords = names
                        .into_iter()
                        .zip(keyword_values)
                        .map(|(name, value)| {
                            Ok(Keyword {
                                arg: Some(name),
                                value: self.value_to_expr(value)?,
                            })
                        })
                        .collect::<SimResult<Vec<_>>>()?;
                    let positional = args
                        .into_iter()
                        .map(|value| self.value_to_expr(value))
                        .collect::<SimResult<Vec<_>>>()?;
                    let id = self.build_call_expr(callee, positional, keywords)?;
                    self.stack.push(id);
                }
            }
            Op::CallFunctionEx => {
                let kwargs = if arg & 1 != 0 { Some(self.pop_expr()?) } else { None };
                let packed = self.pop_expr()?;
                // A NULL marker sits next to the callable on 3.11+; accept
                // it on either side of the callee.
                let first = self.stack.pop()?;
                let callee = match first {
                    StackValue::NullMarker => self.stack.pop()?,
                    other => {
                        if self.version.gte(3, 11)
                            && matches!(self.stack.peek(0), Ok(StackValue::NullMarker))
                        {
                            let _ = self.stack.pop();
                        }
                        other
                    }
                };

                let mut args = Vec::new();
                match self.arena.get_expr(packed).clone() {
                    AstExpr::Tuple(items) => args.extend(items),
                    _ => {
                        let id = self.arena.expr(AstExpr::Starred(packed));
                        args.push(id);
                    }
                }
                let mut keywords = Vec::new();
                if let Some(kwargs) = kwargs {
                    match self.arena.get_expr(kwargs).clone() {
                        AstExpr::Dict { keys, values } => {
                            for (key, value) in keys.into_iter().zip(values) {
                                let arg_name = key.and_then(|key| match self.arena.get_expr(key) {
                                    AstExpr::Constant(Object::String(s)) => Some(Rc::clone(s)),
                                    _ => None,
                                });
                                keywords.push(Keyword { arg: arg_name, value });
                            }
                        }
                        _ => keywords.push(Keyword {
                            arg: None,
                            value: kwargs,
                        }),
                    }
                }
                let id = self.build_call_expr(callee, args, keywords)?;
                self.stack.push(id);
            }
            other => return Err(SimError::UnhandledOpcode(other.name())),
        }
        Ok(())
    }

    /// 3.11+ `CALL` / 3.13 `CALL_KW`.
    fn call_modern(&mut self, opcode: Opcode, argc: u32) -> SimResult<()> {
        let kw_names = if opcode == Opcode::CallKw {
            match self.stack.pop()? {
                StackValue::Expr(id) => match self.arena.get_expr(id) {
                    AstExpr::Constant(Object::Tuple(items)) => items
                        .iter()
                        .map(|item| match item {
                            Object::String(s) => Ok(Rc::clone(s)),
                            _ => Err(SimError::NotAnExpression("keyword name")),
                        })
                        .collect::<SimResult<Vec<_>>>()?,
                    _ => return Err(SimError::NotAnExpression("keyword names")),
                },
                other => return Err(SimError::NotAnExpression(other.tag())),
            }
        } else {
            self.take_kw_names()
        };

        let mut args = self.stack.pop_n(argc as usize)?;
        args.reverse();
        // Two-slot convention: [NULL, callable] for plain calls,
        // [callable, receiver] for method calls (the receiver is already
        // embedded in the Attribute node the callable is).
        let upper = self.stack.pop()?;
        let lower = self.stack.pop()?;
        let callee = match lower {
            StackValue::NullMarker | StackValue::Unknown => upper,
            other => other,
        };

        let split = args.len() - kw_names.len().min(args.len());
        let keyword_values = args.split_off(split);
        let keywords = kw_names
            .into_iter()
            .zip(keyword_values)
            .map(|(name, value)| {
                Ok(Keyword {
                    arg: Some(name),
                    value: self.value_to_expr(value)?,
                })
            })
            .collect::<SimResult<Vec<_>>>()?;
        self.finish_call(callee, args, keywords)
    }

    /// Pre-3.6 call conventions, including the `*args`/`**kwargs` variants.
    fn call_legacy(&mut self, arg: u32, star: bool, double_star: bool) -> SimResult<()> {
        let mut keywords = Vec::new();
        if double_star {
            let kwargs = self.pop_expr()?;
            keywords.push(Keyword {
                arg: None,
                value: kwargs,
            });
        }
        let star_arg = if star { Some(self.pop_expr()?) } else { None };

        let kw_count = (arg >> 8) & 0xff;
        let pos_count = arg & 0xff;
        let mut named = Vec::with_capacity(kw_count as usize);
        for _ in 0..kw_count {
            let value = self.pop_expr()?;
            let name = match self.stack.pop()? {
                StackValue::Expr(id) => match self.arena.get_expr(id) {
                    AstExpr::Constant(Object::String(s)) => Rc::clone(s),
                    _ => return Err(SimError::NotAnExpression("keyword name")),
                },
                other => return Err(SimError::NotAnExpression(other.tag())),
            };
            named.push(Keyword {
                arg: Some(name),
                value,
            });
        }
        named.reverse();

        let mut args = self.stack.pop_n(pos_count as usize)?;
        args.reverse();
        let callee = self.stack.pop()?;

        if let Some(star_arg) = star_arg {
            let id = self.arena.expr(AstExpr::Starred(star_arg));
            args.push(StackValue::Expr(id));
        }
        let mut keywords_all = named;
        keywords_all.extend(keywords);
        self.finish_call(callee, args, keywords_all)
    }

    /// Classifies and completes a call once callee and raw arguments are in
    /// hand. Decorators, class construction, and comprehension invocation
    /// all look like calls at the bytecode level.
    fn finish_call(&mut self, callee: StackValue, args: Vec<StackValue>, keywords: Vec<Keyword>) -> SimResult<()> {
        // Comprehension code objects are invoked with their iterator as the
        // single argument; the call *is* the comprehension expression.
        if let StackValue::Comprehension { kind, code } = &callee {
            if args.len() == 1 && keywords.is_empty() {
                let iterable = match &args[0] {
                    StackValue::Expr(id) => *id,
                    other => return Err(SimError::NotAnExpression(other.tag())),
                };
                let kind = *kind;
                let code = Rc::clone(code);
                let id = self.resolve_comprehension(kind, &code, iterable)?;
                self.stack.push(StackValue::Expr(id));
                return Ok(());
            }
        }

        // A Python 2 class body invocation: keep the builder flowing so
        // BUILD_CLASS can read it.
        if self.version.is_legacy() && args.is_empty() && keywords.is_empty() {
            if let StackValue::Function(builder) = &callee {
                if !builder.is_lambda() {
                    self.stack.push(callee);
                    return Ok(());
                }
            }
        }

        if let StackValue::Expr(callee_id) = &callee {
            // Modern class construction: __build_class__(body, name, *bases,
            // **kwds).
            if self.is_build_class_marker(*callee_id) {
                return self.modern_build_class(args, keywords);
            }
            // Decorator application: a single builder argument survives as
            // the builder with one more decorator attached.
            if args.len() == 1 && keywords.is_empty() {
                match &args[0] {
                    StackValue::Function(builder) if !builder.is_lambda() => {
                        let mut builder = builder.clone();
                        builder.decorators.push(*callee_id);
                        self.stack.push(StackValue::Function(builder));
                        return Ok(());
                    }
                    StackValue::Class(builder) => {
                        let mut builder = builder.clone();
                        builder.decorators.push(*callee_id);
                        self.stack.push(StackValue::Class(builder));
                        return Ok(());
                    }
                    _ => {}
                }
            }
        }

        let args = args
            .into_iter()
            .map(|value| self.value_to_expr(value))
            .collect::<SimResult<Vec<_>>>()?;
        let id = self.build_call_expr(callee, args, keywords)?;
        self.stack.push(id);
        Ok(())
    }

    fn build_call_expr(
        &mut self,
        callee: StackValue,
        args: Vec<ExprId>,
        keywords: Vec<Keyword>,
    ) -> SimResult<StackValue> {
        let func = self.value_to_expr(callee)?;
        let id = self.arena.expr(AstExpr::Call { func, args, keywords });
        Ok(StackValue::Expr(id))
    }

    fn resolve_comprehension(
        &mut self,
        kind: ComprehensionKind,
        code: &Rc<crate::code::Code>,
        iterable: ExprId,
    ) -> SimResult<ExprId> {
        let resolver = &mut *self.resolver;
        resolver.comprehension(self.arena, kind, code, iterable)
    }

    /// `MAKE_FUNCTION` in all five historical shapes (plus `MAKE_CLOSURE`).
    fn make_function(&mut self, arg: u32, closure_variant: bool) -> SimResult<()> {
        // The qualname sits on top for 3.3-3.10.
        if self.version.gte(3, 3) && self.version.lt(3, 11) {
            let _qualname = self.stack.pop()?;
        }
        let code = match self.stack.pop()? {
            StackValue::CodeRef(code) => code,
            other => return Err(SimError::NotAnExpression(other.tag())),
        };
        let mut builder = FunctionBuilder::new(code);

        if self.version.is_legacy() {
            if closure_variant {
                let _closure = self.stack.pop()?;
                builder.has_closure = true;
            }
            let mut defaults = self.stack.pop_n(arg as usize)?;
            defaults.reverse();
            builder.defaults = defaults
                .into_iter()
                .map(|value| self.value_to_expr(value))
                .collect::<SimResult<Vec<_>>>()?;
        } else if self.version.lt(3, 6) {
            if closure_variant {
                let _closure = self.stack.pop()?;
                builder.has_closure = true;
            }
            let annotation_count = (arg >> 16) & 0x7fff;
            if annotation_count > 0 {
                let names = match self.stack.pop()? {
                    StackValue::Expr(id) => match self.arena.get_expr(id) {
                        AstExpr::Constant(Object::Tuple(items)) => items
                            .iter()
                            .filter_map(|item| match item {
                                Object::String(s) => Some(Rc::clone(s)),
                                _ => None,
                            })
                            .collect::<Vec<_>>(),
                        _ => Vec::new(),
                    },
                    _ => Vec::new(),
                };
                let mut values = self.stack.pop_n(annotation_count as usize - 1)?;
                values.reverse();
                for (name, value) in names.into_iter().zip(values) {
                    let value = self.value_to_expr(value)?;
                    builder.annotations.push((name, value));
                }
            }
            let kw_count = (arg >> 8) & 0xff;
            for _ in 0..kw_count {
                let value = self.pop_expr()?;
                let name = match self.stack.pop()? {
                    StackValue::Expr(id) => match self.arena.get_expr(id) {
                        AstExpr::Constant(Object::String(s)) => Rc::clone(s),
                        _ => return Err(SimError::NotAnExpression("keyword default name")),
                    },
                    other => return Err(SimError::NotAnExpression(other.tag())),
                };
                builder.kw_defaults.push((name, value));
            }
            builder.kw_defaults.reverse();
            let mut defaults = self.stack.pop_n((arg & 0xff) as usize)?;
            defaults.reverse();
            builder.defaults = defaults
                .into_iter()
                .map(|value| self.value_to_expr(value))
                .collect::<SimResult<Vec<_>>>()?;
        } else {
            // 3.6+ flag bits; values were pushed lowest-bit first.
            if arg & 0x08 != 0 {
                let _closure = self.stack.pop()?;
                builder.has_closure = true;
            }
            if arg & 0x04 != 0 {
                let annotations = self.pop_expr()?;
                self.read_annotations(annotations, &mut builder);
            }
            if arg & 0x02 != 0 {
                let kw_defaults = self.pop_expr()?;
                if let AstExpr::Dict { keys, values } = self.arena.get_expr(kw_defaults).clone() {
                    for (key, value) in keys.into_iter().zip(values) {
                        if let Some(key) = key {
                            if let AstExpr::Constant(Object::String(name)) = self.arena.get_expr(key) {
                                builder.kw_defaults.push((Rc::clone(name), value));
                            }
                        }
                    }
                }
            }
            if arg & 0x01 != 0 {
                let defaults = self.pop_expr()?;
                match self.arena.get_expr(defaults).clone() {
                    AstExpr::Tuple(items) => builder.defaults = items,
                    AstExpr::Constant(Object::Tuple(items)) => {
                        builder.defaults = items
                            .iter()
                            .map(|item| self.arena.constant(item.clone()))
                            .collect();
                    }
                    _ => builder.defaults = vec![defaults],
                }
            }
        }

        self.push_function_value(builder);
        Ok(())
    }

    /// 3.13 `SET_FUNCTION_ATTRIBUTE`.
    fn set_function_attribute(&mut self, arg: u32) -> SimResult<()> {
        let function = self.stack.pop()?;
        let value = self.stack.pop()?;
        let StackValue::Function(mut builder) = function else {
            return Err(SimError::NotAnExpression(function.tag()));
        };
        match arg {
            0x01 => {
                let defaults = self.value_to_expr(value)?;
                match self.arena.get_expr(defaults).clone() {
                    AstExpr::Tuple(items) => builder.defaults = items,
                    AstExpr::Constant(Object::Tuple(items)) => {
                        builder.defaults = items
                            .iter()
                            .map(|item| self.arena.constant(item.clone()))
                            .collect();
                    }
                    _ => builder.defaults = vec![defaults],
                }
            }
            0x02 => {
                let kw_defaults = self.value_to_expr(value)?;
                if let AstExpr::Dict { keys, values } = self.arena.get_expr(kw_defaults).clone() {
                    for (key, value) in keys.into_iter().zip(values) {
                        if let Some(key) = key {
                            if let AstExpr::Constant(Object::String(name)) = self.arena.get_expr(key) {
                                builder.kw_defaults.push((Rc::clone(name), value));
                            }
                        }
                    }
                }
            }
            0x04 => {
                let annotations = self.value_to_expr(value)?;
                self.read_annotations(annotations, &mut builder);
            }
            0x08 => builder.has_closure = true,
            _ => {}
        }
        self.stack.push(StackValue::Function(builder));
        Ok(())
    }

    fn read_annotations(&mut self, annotations: ExprId, builder: &mut FunctionBuilder) {
        if let AstExpr::Dict { keys, values } = self.arena.get_expr(annotations).clone() {
            for (key, value) in keys.into_iter().zip(values) {
                if let Some(key) = key {
                    if let AstExpr::Constant(Object::String(name)) = self.arena.get_expr(key) {
                        builder.annotations.push((Rc::clone(name), value));
                    }
                }
            }
        }
    }

    /// Comprehension code objects become [`StackValue::Comprehension`];
    /// everything else is a function builder.
    fn push_function_value(&mut self, builder: FunctionBuilder) {
        let kind = match builder.code.name.as_str() {
            "<listcomp>" => Some(ComprehensionKind::List),
            "<setcomp>" => Some(ComprehensionKind::Set),
            "<dictcomp>" => Some(ComprehensionKind::Dict),
            "<genexpr>" => Some(ComprehensionKind::Generator),
            _ => None,
        };
        match kind {
            Some(kind) => self.stack.push(StackValue::Comprehension {
                kind,
                code: builder.code,
            }),
            None => self.stack.push(StackValue::Function(Box::new(builder))),
        }
    }

    /// Python 2 `BUILD_CLASS`: `[name, bases, namespace]`.
    fn legacy_build_class(&mut self) -> SimResult<()> {
        let namespace = self.stack.pop()?;
        let bases = self.pop_expr()?;
        let name = match self.stack.pop()? {
            StackValue::Expr(id) => match self.arena.get_expr(id) {
                AstExpr::Constant(Object::String(s)) => Rc::clone(s),
                _ => return Err(SimError::NotAnExpression("class name")),
            },
            other => return Err(SimError::NotAnExpression(other.tag())),
        };
        let StackValue::Function(body) = namespace else {
            return Err(SimError::NotAnExpression(namespace.tag()));
        };
        let bases = match self.arena.get_expr(bases).clone() {
            AstExpr::Tuple(items) => items,
            AstExpr::Constant(Object::Tuple(items)) if items.is_empty() => Vec::new(),
            _ => vec![bases],
        };
        self.stack.push(StackValue::Class(Box::new(ClassBuilder {
            code: Rc::clone(&body.code),
            name,
            bases,
            keywords: Vec::new(),
            decorators: Vec::new(),
        })));
        Ok(())
    }

    /// `__build_class__(body, name, *bases, **kwds)`.
    fn modern_build_class(&mut self, args: Vec<StackValue>, keywords: Vec<Keyword>) -> SimResult<()> {
        let mut args = args.into_iter();
        let body = match args.next() {
            Some(StackValue::Function(builder)) => builder,
            Some(other) => return Err(SimError::NotAnExpression(other.tag())),
            None => return Err(SimError::StackUnderflow),
        };
        let name = match args.next() {
            Some(StackValue::Expr(id)) => match self.arena.get_expr(id) {
                AstExpr::Constant(Object::String(s)) => Rc::clone(s),
                _ => return Err(SimError::NotAnExpression("class name")),
            },
            _ => return Err(SimError::NotAnExpression("class name")),
        };
        let bases = args
            .map(|value| self.value_to_expr(value))
            .collect::<SimResult<Vec<_>>>()?;
        self.stack.push(StackValue::Class(Box::new(ClassBuilder {
            code: Rc::clone(&body.code),
            name,
            bases,
            keywords,
            decorators: Vec::new(),
        })));
        Ok(())
    }

    /// Reads a constant-pool tuple of strings (KW_NAMES operands).
    fn const_name_tuple(&mut self, index: u32) -> SimResult<Vec<Rc<str>>> {
        match self.const_at(index)? {
            Object::Tuple(items) => items
                .iter()
                .map(|item| match item {
                    Object::String(s) => Ok(Rc::clone(s)),
                    _ => Err(SimError::NotAnExpression("keyword name")),
                })
                .collect(),
            _ => Err(SimError::NotAnExpression("keyword names")),
        }
    }

    fn import_name(&mut self, arg: u32) -> SimResult<()> {
        let module = self.global_name(arg)?;
        let (level, fromlist) = if self.version.gte(2, 5) {
            let fromlist = self.stack.pop()?;
            let level = self.stack.pop()?;
            (self.import_level(level), self.import_fromlist(fromlist))
        } else if self.version.gte(2, 0) {
            let fromlist = self.stack.pop()?;
            (0, self.import_fromlist(fromlist))
        } else {
            (0, Vec::new())
        };
        self.stack.push(StackValue::Import(ImportValue {
            module,
            level,
            fromlist,
            item: None,
        }));
        Ok(())
    }

    fn import_level(&self, value: StackValue) -> u32 {
        match value {
            StackValue::Expr(id) => match self.arena.get_expr(id) {
                AstExpr::Constant(Object::Int(level)) if *level > 0 => *level as u32,
                _ => 0,
            },
            _ => 0,
        }
    }

    fn import_fromlist(&self, value: StackValue) -> Vec<Rc<str>> {
        match value {
            StackValue::Expr(id) => match self.arena.get_expr(id) {
                AstExpr::Constant(Object::Tuple(items)) => items
                    .iter()
                    .filter_map(|item| match item {
                        Object::String(s) => Some(Rc::clone(s)),
                        _ => None,
                    })
                    .collect(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    fn import_from(&mut self, arg: u32) -> SimResult<()> {
        let name = self.global_name(arg)?;
        let import = match self.stack.peek(0)? {
            StackValue::Import(import) => import.clone(),
            other => return Err(SimError::NotAnExpression(other.tag())),
        };
        self.stack.push(StackValue::Import(ImportValue {
            item: Some(name),
            ..import
        }));
        Ok(())
    }

    fn import_star(&mut self) -> SimResult<()> {
        let import = match self.stack.pop()? {
            StackValue::Import(import) => import,
            other => return Err(SimError::NotAnExpression(other.tag())),
        };
        self.push_stmt(crate::ast::AstStmt::ImportFrom {
            module: (!import.module.is_empty()).then_some(import.module),
            names: vec![crate::ast::Alias {
                name: "*".into(),
                asname: None,
            }],
            level: import.level,
        });
        Ok(())
    }

    fn intrinsic_1(&mut self, arg: u32) -> SimResult<()> {
        match arg {
            INTRINSIC_IMPORT_STAR => self.import_star(),
            INTRINSIC_UNARY_POSITIVE => {
                let operand = self.pop_expr()?;
                let id = self.arena.expr(AstExpr::UnaryOp {
                    op: UnaryOpKind::UAdd,
                    operand,
                });
                self.stack.push(StackValue::Expr(id));
                Ok(())
            }
            INTRINSIC_LIST_TO_TUPLE => {
                let value = self.pop_expr()?;
                let id = match self.arena.get_expr(value).clone() {
                    AstExpr::List(items) => self.arena.expr(AstExpr::Tuple(items)),
                    _ => value,
                };
                self.stack.push(StackValue::Expr(id));
                Ok(())
            }
            INTRINSIC_STOPITERATION_ERROR => Ok(()),
            _ => Ok(()),
        }
    }
}
