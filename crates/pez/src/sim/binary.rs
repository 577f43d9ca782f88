//! Operator handlers: unary, binary, in-place, comparisons, and the legacy
//! whole-object slice family.

use crate::{
    ast::{AstExpr, BinOpKind, CmpOpKind, UnaryOpKind},
    error::{SimError, SimResult},
    opcode::{Instruction, Opcode},
    tracer::DecompileTracer,
};

use super::Simulator;

/// Modern `BINARY_OP` operand values; adding [`INPLACE_OFFSET`] selects the
/// in-place form.
const NB_OPS: [BinOpKind; 13] = [
    BinOpKind::Add,
    BinOpKind::BitAnd,
    BinOpKind::FloorDiv,
    BinOpKind::LShift,
    BinOpKind::MatMult,
    BinOpKind::Mult,
    BinOpKind::Mod,
    BinOpKind::BitOr,
    BinOpKind::Pow,
    BinOpKind::RShift,
    BinOpKind::Sub,
    BinOpKind::Div,
    BinOpKind::BitXor,
];
const INPLACE_OFFSET: u32 = 13;

/// Comparison table used by `COMPARE_OP` before the 3.12 re-encoding.
const LEGACY_CMP: [CmpOpKind; 11] = [
    CmpOpKind::Lt,
    CmpOpKind::LtE,
    CmpOpKind::Eq,
    CmpOpKind::NotEq,
    CmpOpKind::Gt,
    CmpOpKind::GtE,
    CmpOpKind::In,
    CmpOpKind::NotIn,
    CmpOpKind::Is,
    CmpOpKind::IsNot,
    CmpOpKind::ExcMatch,
];

impl<Tr: DecompileTracer> Simulator<'_, Tr> {
    /// Dispatches the operator family.
    pub(super) fn operator(&mut self, instruction: &Instruction) -> SimResult<()> {
        use Opcode as Op;
        let arg = instruction.arg;
        match instruction.opcode {
            Op::UnaryPositive => self.unary(UnaryOpKind::UAdd),
            Op::UnaryNegative => self.unary(UnaryOpKind::USub),
            Op::UnaryNot => self.unary(UnaryOpKind::Not),
            Op::UnaryInvert => self.unary(UnaryOpKind::Invert),
            Op::UnaryConvert => {
                // Python 2 backquotes; repr() is the portable spelling.
                let value = self.pop_expr()?;
                let func = self.arena.name("repr".into());
                let id = self.arena.expr(AstExpr::Call {
                    func,
                    args: vec![value],
                    keywords: Vec::new(),
                });
                self.stack.push(crate::stack::StackValue::Expr(id));
                Ok(())
            }
            Op::ToBool => Ok(()),

            Op::BinaryOp => {
                let index = (arg % INPLACE_OFFSET) as usize;
                let inplace = arg >= INPLACE_OFFSET;
                // 3.14 folds subscript into BINARY_OP; anything past the
                // table reads as a subscript there.
                if index >= NB_OPS.len() {
                    return self.subscript();
                }
                self.binary(NB_OPS[index], inplace)
            }
            Op::BinaryAdd => self.binary(BinOpKind::Add, false),
            Op::BinarySubtract => self.binary(BinOpKind::Sub, false),
            Op::BinaryMultiply => self.binary(BinOpKind::Mult, false),
            Op::BinaryDivide => self.binary(BinOpKind::Div, false),
            Op::BinaryTrueDivide => self.binary(BinOpKind::Div, false),
            Op::BinaryFloorDivide => self.binary(BinOpKind::FloorDiv, false),
            Op::BinaryModulo => self.binary(BinOpKind::Mod, false),
            Op::BinaryPower => self.binary(BinOpKind::Pow, false),
            Op::BinaryLshift => self.binary(BinOpKind::LShift, false),
            Op::BinaryRshift => self.binary(BinOpKind::RShift, false),
            Op::BinaryAnd => self.binary(BinOpKind::BitAnd, false),
            Op::BinaryOr => self.binary(BinOpKind::BitOr, false),
            Op::BinaryXor => self.binary(BinOpKind::BitXor, false),
            Op::BinaryMatrixMultiply => self.binary(BinOpKind::MatMult, false),
            Op::InplaceAdd => self.binary(BinOpKind::Add, true),
            Op::InplaceSubtract => self.binary(BinOpKind::Sub, true),
            Op::InplaceMultiply => self.binary(BinOpKind::Mult, true),
            Op::InplaceDivide => self.binary(BinOpKind::Div, true),
            Op::InplaceTrueDivide => self.binary(BinOpKind::Div, true),
            Op::InplaceFloorDivide => self.binary(BinOpKind::FloorDiv, true),
            Op::InplaceModulo => self.binary(BinOpKind::Mod, true),
            Op::InplacePower => self.binary(BinOpKind::Pow, true),
            Op::InplaceLshift => self.binary(BinOpKind::LShift, true),
            Op::InplaceRshift => self.binary(BinOpKind::RShift, true),
            Op::InplaceAnd => self.binary(BinOpKind::BitAnd, true),
            Op::InplaceOr => self.binary(BinOpKind::BitOr, true),
            Op::InplaceXor => self.binary(BinOpKind::BitXor, true),
            Op::InplaceMatrixMultiply => self.binary(BinOpKind::MatMult, true),

            Op::BinarySubscr => self.subscript(),
            Op::BinarySlice => {
                let upper = self.pop_expr()?;
                let lower = self.pop_expr()?;
                let object = self.pop_expr()?;
                let lower = self.non_trivial(lower);
                let upper = self.non_trivial(upper);
                let index = self.arena.expr(AstExpr::Slice {
                    lower,
                    upper,
                    step: None,
                });
                let id = self.arena.expr(AstExpr::Subscript { value: object, index });
                self.stack.push(crate::stack::StackValue::Expr(id));
                Ok(())
            }

            Op::CompareOp => {
                let index = if self.version.gte(3, 12) { arg >> 4 } else { arg };
                let op = LEGACY_CMP
                    .get(index as usize)
                    .copied()
                    .ok_or(SimError::BadStackArg(arg))?;
                self.compare(op)
            }
            Op::IsOp => self.compare(if arg == 0 { CmpOpKind::Is } else { CmpOpKind::IsNot }),
            Op::ContainsOp => self.compare(if arg == 0 { CmpOpKind::In } else { CmpOpKind::NotIn }),

            Op::Slice0 | Op::Slice1 | Op::Slice2 | Op::Slice3 => {
                let index = self.legacy_slice(instruction.opcode)?;
                let object = self.pop_expr()?;
                let id = self.arena.expr(AstExpr::Subscript { value: object, index });
                self.stack.push(crate::stack::StackValue::Expr(id));
                Ok(())
            }
            Op::StoreSlice0 | Op::StoreSlice1 | Op::StoreSlice2 | Op::StoreSlice3 => {
                let index = self.legacy_slice(instruction.opcode)?;
                let object = self.pop_expr()?;
                let target = self.arena.expr(AstExpr::Subscript { value: object, index });
                self.store(target)
            }
            Op::DeleteSlice0 | Op::DeleteSlice1 | Op::DeleteSlice2 | Op::DeleteSlice3 => {
                let index = self.legacy_slice(instruction.opcode)?;
                let object = self.pop_expr()?;
                let target = self.arena.expr(AstExpr::Subscript { value: object, index });
                self.push_stmt(crate::ast::AstStmt::Delete(vec![target]));
                Ok(())
            }

            other => Err(SimError::UnhandledOpcode(other.name())),
        }
    }

    fn unary(&mut self, op: UnaryOpKind) -> SimResult<()> {
        let operand = self.pop_expr()?;
        let id = self.arena.expr(AstExpr::UnaryOp { op, operand });
        self.stack.push(crate::stack::StackValue::Expr(id));
        Ok(())
    }

    fn binary(&mut self, op: BinOpKind, inplace: bool) -> SimResult<()> {
        let right = self.pop_expr()?;
        let left = self.pop_expr()?;
        let id = self.arena.expr(AstExpr::BinOp { left, op, right });
        if inplace {
            self.mark_inplace(id);
        }
        self.stack.push(crate::stack::StackValue::Expr(id));
        Ok(())
    }

    fn subscript(&mut self) -> SimResult<()> {
        let index = self.pop_expr()?;
        let object = self.pop_expr()?;
        let id = self.arena.expr(AstExpr::Subscript { value: object, index });
        self.stack.push(crate::stack::StackValue::Expr(id));
        Ok(())
    }

    /// Builds a single comparison. Chained forms (`a < b < c`) are
    /// reassembled by the driver when it collapses the short-circuit
    /// region the chain compiles to.
    fn compare(&mut self, op: CmpOpKind) -> SimResult<()> {
        let right = self.pop_expr()?;
        let left = self.pop_expr()?;
        let id = self.arena.expr(AstExpr::Compare {
            left,
            ops: vec![op],
            comparators: vec![right],
        });
        self.stack.push(crate::stack::StackValue::Expr(id));
        Ok(())
    }

    /// Operand shapes of the four legacy slice opcodes.
    fn legacy_slice(&mut self, opcode: Opcode) -> SimResult<crate::ast::ExprId> {
        use Opcode as Op;
        let (lower, upper) = match opcode {
            Op::Slice0 | Op::StoreSlice0 | Op::DeleteSlice0 => (None, None),
            Op::Slice1 | Op::StoreSlice1 | Op::DeleteSlice1 => (Some(self.pop_expr()?), None),
            Op::Slice2 | Op::StoreSlice2 | Op::DeleteSlice2 => (None, Some(self.pop_expr()?)),
            _ => {
                let upper = self.pop_expr()?;
                let lower = self.pop_expr()?;
                (Some(lower), Some(upper))
            }
        };
        Ok(self.arena.expr(AstExpr::Slice {
            lower,
            upper,
            step: None,
        }))
    }
}
