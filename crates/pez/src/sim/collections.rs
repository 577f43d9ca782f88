//! Literal builders, sequence unpacking, and string formatting.

use std::rc::Rc;

use crate::{
    ast::{AstExpr, ExprId},
    error::{SimError, SimResult},
    object::Object,
    opcode::{Instruction, Opcode},
    stack::StackValue,
    tracer::DecompileTracer,
};

use super::{SimStmt, Simulator, UnpackGroup};

impl<Tr: DecompileTracer> Simulator<'_, Tr> {
    /// Dispatches the builder/unpack/format family.
    pub(super) fn collection(&mut self, instruction: &Instruction) -> SimResult<()> {
        use Opcode as Op;
        let arg = instruction.arg;
        match instruction.opcode {
            Op::BuildTuple => self.build_sequence(arg, AstExpr::Tuple)?,
            Op::BuildList => self.build_sequence(arg, AstExpr::List)?,
            Op::BuildSet => self.build_sequence(arg, AstExpr::Set)?,
            Op::BuildMap => {
                if self.version.lt(3, 5) && arg > 0 {
                    // Pre-3.5 BUILD_MAP pre-sizes an empty dict that
                    // STORE_MAP fills in.
                    let id = self.arena.expr(AstExpr::Dict {
                        keys: Vec::new(),
                        values: Vec::new(),
                    });
                    self.stack.push(StackValue::Expr(id));
                } else {
                    let mut keys = Vec::with_capacity(arg as usize);
                    let mut values = Vec::with_capacity(arg as usize);
                    for _ in 0..arg {
                        let value = self.pop_expr()?;
                        let key = self.pop_expr()?;
                        keys.push(Some(key));
                        values.push(value);
                    }
                    keys.reverse();
                    values.reverse();
                    let id = self.arena.expr(AstExpr::Dict { keys, values });
                    self.stack.push(StackValue::Expr(id));
                }
            }
            Op::BuildConstKeyMap => {
                let keys = match self.stack.pop()? {
                    StackValue::Expr(id) => match self.arena.get_expr(id) {
                        AstExpr::Constant(Object::Tuple(items)) => items.clone(),
                        _ => return Err(SimError::InvalidConstKeyMap),
                    },
                    _ => return Err(SimError::InvalidConstKeyMap),
                };
                if keys.len() != arg as usize {
                    return Err(SimError::InvalidConstKeyMap);
                }
                let mut values = self.stack.pop_n(arg as usize)?;
                values.reverse();
                let keys = keys
                    .iter()
                    .map(|key| Some(self.arena.constant(key.clone())))
                    .collect();
                let values = values
                    .into_iter()
                    .map(|value| self.value_to_expr(value))
                    .collect::<SimResult<Vec<_>>>()?;
                let id = self.arena.expr(AstExpr::Dict { keys, values });
                self.stack.push(StackValue::Expr(id));
            }
            Op::BuildString => {
                let mut parts = self.stack.pop_n(arg as usize)?;
                parts.reverse();
                let values = parts
                    .into_iter()
                    .map(|part| self.value_to_expr(part))
                    .collect::<SimResult<Vec<_>>>()?;
                let id = self.arena.expr(AstExpr::JoinedStr(values));
                self.stack.push(StackValue::Expr(id));
            }
            Op::BuildSlice => {
                let step = if arg == 3 { Some(self.pop_expr()?) } else { None };
                let upper = self.pop_expr()?;
                let lower = self.pop_expr()?;
                let lower = self.non_trivial(lower);
                let upper = self.non_trivial(upper);
                let step = step.and_then(|step| self.non_trivial(step));
                let id = self.arena.expr(AstExpr::Slice { lower, upper, step });
                self.stack.push(StackValue::Expr(id));
            }

            // 3.5-3.8 unpack-merge builders: every element is a splat.
            Op::BuildTupleUnpack | Op::BuildTupleUnpackWithCall => self.build_unpack(arg, AstExpr::Tuple)?,
            Op::BuildListUnpack => self.build_unpack(arg, AstExpr::List)?,
            Op::BuildSetUnpack => self.build_unpack(arg, AstExpr::Set)?,
            Op::BuildMapUnpack | Op::BuildMapUnpackWithCall => {
                let mut parts = self.stack.pop_n(arg as usize)?;
                parts.reverse();
                let mut keys = Vec::new();
                let mut values = Vec::new();
                for part in parts {
                    let part = self.value_to_expr(part)?;
                    match self.arena.get_expr(part).clone() {
                        AstExpr::Dict {
                            keys: inner_keys,
                            values: inner_values,
                        } => {
                            keys.extend(inner_keys);
                            values.extend(inner_values);
                        }
                        _ => {
                            keys.push(None);
                            values.push(part);
                        }
                    }
                }
                let id = self.arena.expr(AstExpr::Dict { keys, values });
                self.stack.push(StackValue::Expr(id));
            }

            // In-place literal growers (LOAD_CONST tuple + LIST_EXTEND is
            // how 3.9+ spells a long list display).
            Op::ListExtend | Op::SetUpdate => {
                let extension = self.pop_expr()?;
                let container = self.pop_expr()?;
                let elements = self.spread_elements(extension)?;
                let id = match self.arena.get_expr(container).clone() {
                    AstExpr::List(mut items) => {
                        items.extend(elements);
                        self.arena.expr(AstExpr::List(items))
                    }
                    AstExpr::Set(mut items) => {
                        items.extend(elements);
                        self.arena.expr(AstExpr::Set(items))
                    }
                    _ => return Err(SimError::NotAnExpression("list/set literal")),
                };
                self.stack.push(StackValue::Expr(id));
            }
            Op::DictUpdate | Op::DictMerge => {
                let extension = self.pop_expr()?;
                let container = self.pop_expr()?;
                let (mut keys, mut values) = match self.arena.get_expr(container).clone() {
                    AstExpr::Dict { keys, values } => (keys, values),
                    _ => return Err(SimError::NotAnExpression("dict literal")),
                };
                match self.arena.get_expr(extension).clone() {
                    AstExpr::Dict {
                        keys: inner_keys,
                        values: inner_values,
                    } => {
                        keys.extend(inner_keys);
                        values.extend(inner_values);
                    }
                    _ => {
                        keys.push(None);
                        values.push(extension);
                    }
                }
                let id = self.arena.expr(AstExpr::Dict { keys, values });
                self.stack.push(StackValue::Expr(id));
            }
            Op::ListToTuple => {
                let value = self.pop_expr()?;
                let id = match self.arena.get_expr(value).clone() {
                    AstExpr::List(items) => self.arena.expr(AstExpr::Tuple(items)),
                    _ => value,
                };
                self.stack.push(StackValue::Expr(id));
            }

            // Comprehension accumulators; meaningful only to the
            // inline-comprehension builder.
            Op::ListAppend | Op::SetAdd => {
                let value = self.pop_expr()?;
                if self.emit {
                    self.statements.push(SimStmt::CompAppend { key: None, value });
                }
            }
            Op::MapAdd => {
                // [key, value] on 3.8+; [value, key] before.
                let (key, value) = if self.version.gte(3, 8) {
                    let value = self.pop_expr()?;
                    let key = self.pop_expr()?;
                    (key, value)
                } else {
                    let key = self.pop_expr()?;
                    let value = self.pop_expr()?;
                    (key, value)
                };
                if self.emit {
                    self.statements.push(SimStmt::CompAppend {
                        key: Some(key),
                        value,
                    });
                }
            }

            Op::UnpackSequence | Op::UnpackTuple | Op::UnpackList => {
                let value = self.pop_expr()?;
                self.open_unpack(value, arg as usize, None)?;
            }
            Op::UnpackEx => {
                let before = arg & 0xff;
                let after = arg >> 8;
                let value = self.pop_expr()?;
                let total = before as usize + 1 + after as usize;
                self.open_unpack(value, total, Some(before as usize))?;
            }

            Op::FormatValue => {
                let spec = if arg & 0x04 != 0 { Some(self.pop_expr()?) } else { None };
                let value = self.pop_expr()?;
                let conversion = match arg & 0x03 {
                    1 => Some('s'),
                    2 => Some('r'),
                    3 => Some('a'),
                    _ => None,
                };
                let id = self.arena.expr(AstExpr::FormattedValue {
                    value,
                    conversion,
                    format_spec: spec,
                });
                self.stack.push(StackValue::Expr(id));
            }
            Op::FormatSimple => {
                let value = self.pop_expr()?;
                let id = self.arena.expr(AstExpr::FormattedValue {
                    value,
                    conversion: None,
                    format_spec: None,
                });
                self.stack.push(StackValue::Expr(id));
            }
            Op::FormatWithSpec => {
                let spec = self.pop_expr()?;
                let value = self.pop_expr()?;
                let id = self.arena.expr(AstExpr::FormattedValue {
                    value,
                    conversion: None,
                    format_spec: Some(spec),
                });
                self.stack.push(StackValue::Expr(id));
            }
            Op::ConvertValue => {
                let value = self.pop_expr()?;
                let conversion = match arg {
                    1 => Some('s'),
                    2 => Some('r'),
                    3 => Some('a'),
                    _ => None,
                };
                let id = self.arena.expr(AstExpr::FormattedValue {
                    value,
                    conversion,
                    format_spec: None,
                });
                self.stack.push(StackValue::Expr(id));
            }

            other => return Err(SimError::UnhandledOpcode(other.name())),
        }
        Ok(())
    }

    fn build_sequence(&mut self, count: u32, make: fn(Vec<ExprId>) -> AstExpr) -> SimResult<()> {
        let mut items = self.stack.pop_n(count as usize)?;
        items.reverse();
        let items = items
            .into_iter()
            .map(|item| self.value_to_expr(item))
            .collect::<SimResult<Vec<_>>>()?;
        let id = self.arena.expr(make(items));
        self.stack.push(StackValue::Expr(id));
        Ok(())
    }

    fn build_unpack(&mut self, count: u32, make: fn(Vec<ExprId>) -> AstExpr) -> SimResult<()> {
        let mut parts = self.stack.pop_n(count as usize)?;
        parts.reverse();
        let mut items = Vec::new();
        for part in parts {
            let part = self.value_to_expr(part)?;
            match self.arena.get_expr(part).clone() {
                AstExpr::Tuple(inner) | AstExpr::List(inner) => items.extend(inner),
                _ => items.push(self.arena.expr(AstExpr::Starred(part))),
            }
        }
        let id = self.arena.expr(make(items));
        self.stack.push(StackValue::Expr(id));
        Ok(())
    }

    /// Splices a constant tuple (or literal sequence) into literal elements.
    fn spread_elements(&mut self, extension: ExprId) -> SimResult<Vec<ExprId>> {
        match self.arena.get_expr(extension).clone() {
            AstExpr::Constant(Object::Tuple(items)) => {
                Ok(items.iter().map(|item| self.arena.constant(item.clone())).collect())
            }
            AstExpr::Constant(Object::FrozenSet(items)) => {
                Ok(items.iter().map(|item| self.arena.constant(item.clone())).collect())
            }
            AstExpr::Tuple(items) | AstExpr::List(items) => Ok(items),
            _ => Ok(vec![self.arena.expr(AstExpr::Starred(extension))]),
        }
    }

    fn open_unpack(&mut self, value: ExprId, total: usize, star_index: Option<usize>) -> SimResult<()> {
        if total == 0 || total > u16::MAX as usize {
            return Err(SimError::InvalidUnpackCount(total as u32));
        }
        let group = self.unpack_groups.len() as u32;
        self.unpack_groups.push(UnpackGroup {
            value,
            targets: vec![None; total],
            star_index,
            remaining: total,
        });
        // Targets are stored left to right, so the leftmost slot must be on
        // top of the stack.
        for index in (0..total).rev() {
            self.stack.push(StackValue::UnpackItem {
                group,
                index: index as u32,
            });
        }
        Ok(())
    }
}
