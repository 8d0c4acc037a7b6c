// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Generic binary operations on object operands.
//!
//! The interpreter routes any typed operation whose left operand is an
//! object through [`Engine::object_op`], and the mirrored
//! `<non-object> op <object>` case through [`Engine::object_rop`]. The
//! boolean operators never dispatch: any object reference counts as true.

use crate::execution::engine::Engine;
use crate::execution::exception::{Exception, XResult};
use crate::heap::arena::Obj;
use crate::objects::class::Metamethod;
use crate::types::value::Value;

/// Binary operators the interpreter can apply to values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Power,
    Mod,
    Div,
    Sub,
    Mul,
    Add,
    VecPower,
    VecMod,
    VecDiv,
    VecSub,
    VecMul,
    VecAdd,
    And,
    Or,
    Xor,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    Min,
    Max,
}

/// Try to index `key` out of `container`; the probed value is released.
fn probe_index(engine: &mut Engine, container: Obj, key: &Value) -> bool {
    let mut probed = Value::Nil;
    match engine.metamethod(container, Metamethod::GetIndex, key, &mut probed) {
        Ok(()) => {
            engine.disown_value(probed);
            true
        }
        Err(_) => false,
    }
}

fn arith(base: Metamethod, inplace: bool) -> Metamethod {
    if inplace { base.assign_form() } else { base }
}

impl Engine {
    /// Evaluate `left op right` where `left` is an object reference.
    pub fn object_op(
        &mut self,
        left: &Value,
        op: BinOp,
        right: &Value,
        result: &mut Value,
        inplace: bool,
    ) -> XResult<()> {
        let o = left.as_object()?;
        match op {
            BinOp::Power => self.metamethod(o, arith(Metamethod::Power, inplace), right, result),
            BinOp::Mod => self.metamethod(o, arith(Metamethod::Mod, inplace), right, result),
            BinOp::Div => self.metamethod(o, arith(Metamethod::Div, inplace), right, result),
            BinOp::Sub => self.metamethod(o, arith(Metamethod::Sub, inplace), right, result),
            BinOp::Mul => self.metamethod(o, arith(Metamethod::Mul, inplace), right, result),
            BinOp::Add => self.metamethod(o, arith(Metamethod::Add, inplace), right, result),
            BinOp::VecPower => {
                self.metamethod(o, arith(Metamethod::VecPower, inplace), right, result)
            }
            BinOp::VecMod => self.metamethod(o, arith(Metamethod::VecMod, inplace), right, result),
            BinOp::VecDiv => self.metamethod(o, arith(Metamethod::VecDiv, inplace), right, result),
            BinOp::VecSub => self.metamethod(o, arith(Metamethod::VecSub, inplace), right, result),
            BinOp::VecMul => self.metamethod(o, arith(Metamethod::VecMul, inplace), right, result),
            BinOp::VecAdd => self.metamethod(o, arith(Metamethod::VecAdd, inplace), right, result),

            // Boolean: any object is true, no dispatch.
            BinOp::And => {
                *result = Value::Boolean(right.is_true());
                Ok(())
            }
            BinOp::Or => {
                *result = Value::Boolean(true);
                Ok(())
            }
            BinOp::Xor => {
                *result = Value::Boolean(!right.is_true());
                Ok(())
            }

            BinOp::Eq => {
                if inplace {
                    return Err(Exception::CANTINPLACE);
                }
                self.metamethod(o, Metamethod::Eq, right, result)
            }
            BinOp::Ne => {
                if inplace {
                    return Err(Exception::CANTINPLACE);
                }
                self.metamethod(o, Metamethod::Eq, right, result)?;
                *result = Value::Boolean(!result.is_true());
                Ok(())
            }
            BinOp::Gt => self.compare_op(o, right, result, inplace, |sign| sign > 0),
            BinOp::Ge => self.compare_op(o, right, result, inplace, |sign| sign >= 0),
            BinOp::Lt => self.compare_op(o, right, result, inplace, |sign| sign < 0),
            BinOp::Le => self.compare_op(o, right, result, inplace, |sign| sign <= 0),

            BinOp::In => {
                if inplace {
                    return Err(Exception::CANTINPLACE);
                }
                let found = match right {
                    Value::Object(container) => probe_index(self, *container, left),
                    // Not an indexable object, so "no".
                    _ => false,
                };
                *result = Value::Boolean(found);
                Ok(())
            }

            BinOp::Min => self.select_op(left, right, result, inplace, |sign| sign <= 0),
            BinOp::Max => self.select_op(left, right, result, inplace, |sign| sign >= 0),
        }
    }

    /// Evaluate `right op left` where `left` is an object reference and the
    /// original left operand was not: reverse dispatch.
    pub fn object_rop(
        &mut self,
        left: &Value,
        op: BinOp,
        right: &Value,
        result: &mut Value,
        inplace: bool,
    ) -> XResult<()> {
        let o = left.as_object()?;
        match op {
            BinOp::Power => {
                self.metamethod(o, arith(Metamethod::RevPower, inplace), right, result)
            }
            BinOp::Mod => self.metamethod(o, arith(Metamethod::RevMod, inplace), right, result),
            BinOp::Div => self.metamethod(o, arith(Metamethod::RevDiv, inplace), right, result),
            BinOp::Sub => self.metamethod(o, arith(Metamethod::RevSub, inplace), right, result),
            BinOp::Mul => self.metamethod(o, arith(Metamethod::RevMul, inplace), right, result),
            BinOp::Add => self.metamethod(o, arith(Metamethod::RevAdd, inplace), right, result),
            BinOp::VecPower => {
                self.metamethod(o, arith(Metamethod::VecRevPower, inplace), right, result)
            }
            BinOp::VecMod => {
                self.metamethod(o, arith(Metamethod::VecRevMod, inplace), right, result)
            }
            BinOp::VecDiv => {
                self.metamethod(o, arith(Metamethod::VecRevDiv, inplace), right, result)
            }
            BinOp::VecSub => {
                self.metamethod(o, arith(Metamethod::VecRevSub, inplace), right, result)
            }
            BinOp::VecMul => {
                self.metamethod(o, arith(Metamethod::VecRevMul, inplace), right, result)
            }
            BinOp::VecAdd => {
                self.metamethod(o, arith(Metamethod::VecRevAdd, inplace), right, result)
            }

            // Boolean and commutative forms read the same both ways.
            BinOp::And => {
                *result = Value::Boolean(right.is_true());
                Ok(())
            }
            BinOp::Or => {
                *result = Value::Boolean(true);
                Ok(())
            }
            BinOp::Xor => {
                *result = Value::Boolean(!right.is_true());
                Ok(())
            }
            BinOp::Eq => {
                if inplace {
                    return Err(Exception::CANTINPLACE);
                }
                self.metamethod(o, Metamethod::Eq, right, result)
            }
            BinOp::Ne => {
                if inplace {
                    return Err(Exception::CANTINPLACE);
                }
                self.metamethod(o, Metamethod::Eq, right, result)?;
                *result = Value::Boolean(!result.is_true());
                Ok(())
            }
            BinOp::Min => self.select_op(left, right, result, inplace, |sign| sign <= 0),
            BinOp::Max => self.select_op(left, right, result, inplace, |sign| sign >= 0),

            // Comparisons swap: the object was the right operand.
            BinOp::Gt => self.compare_op(o, right, result, inplace, |sign| sign < 0),
            BinOp::Ge => self.compare_op(o, right, result, inplace, |sign| sign <= 0),
            BinOp::Lt => self.compare_op(o, right, result, inplace, |sign| sign > 0),
            BinOp::Le => self.compare_op(o, right, result, inplace, |sign| sign >= 0),

            // `<non-object> in <object>`: the object is the container.
            BinOp::In => {
                if inplace {
                    return Err(Exception::CANTINPLACE);
                }
                *result = Value::Boolean(probe_index(self, o, right));
                Ok(())
            }
        }
    }

    fn compare_op(
        &mut self,
        o: Obj,
        right: &Value,
        result: &mut Value,
        inplace: bool,
        pick: fn(i64) -> bool,
    ) -> XResult<()> {
        if inplace {
            return Err(Exception::CANTINPLACE);
        }
        let mut sign = Value::Nil;
        self.metamethod(o, Metamethod::Compare, right, &mut sign)?;
        *result = Value::Boolean(pick(sign.as_integer()?));
        Ok(())
    }

    /// MIN/MAX: compare, then hand back an owning copy of the winner. Ties
    /// select the left operand.
    fn select_op(
        &mut self,
        left: &Value,
        right: &Value,
        result: &mut Value,
        inplace: bool,
        pick_left: fn(i64) -> bool,
    ) -> XResult<()> {
        if inplace {
            return Err(Exception::CANTINPLACE);
        }
        let o = left.as_object()?;
        let mut sign = Value::Nil;
        self.metamethod(o, Metamethod::Compare, right, &mut sign)?;
        let winner = if pick_left(sign.as_integer()?) {
            left
        } else {
            right
        };
        *result = self.copy_value(winner);
        Ok(())
    }
}
