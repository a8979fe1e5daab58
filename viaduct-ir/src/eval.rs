// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Constant evaluation of pure function blocks.
//!
//! Given a function kind and the constant values arriving on its input
//! elements, compute the output token. Returns `None` for kinds that cannot
//! be evaluated statically; the caller leaves those blocks alone.

use crate::block::{BitwiseOp, BlockKind, CmpOp, ShiftDir, ShiftStyle};
use crate::types::{Type, Value, sign_extend, truncate_bits};

/// Evaluate a function block over the element values of its input struct.
/// `out_ty` is the block's declared output type.
pub fn eval_function(kind: &BlockKind, args: &[Value], out_ty: &Type) -> Option<Value> {
    let out_width = match out_ty {
        Type::Int(w) => *w,
        _ => 0,
    };
    let ints = |idx: usize| args.get(idx).and_then(Value::as_int);
    let widths = |idx: usize| {
        args.get(idx).map(|v| match v.type_of() {
            Type::Int(w) => w,
            _ => 0,
        })
    };

    match kind {
        BlockKind::Identity | BlockKind::Cast => args.first().cloned(),
        BlockKind::Extract { path } => {
            Value::Struct(args.to_vec()).extracted(path).ok()
        }
        BlockKind::Join => Some(Value::Struct(args.to_vec())),
        BlockKind::IntAdd => Some(Value::int(out_width, ints(0)?.wrapping_add(ints(1)?))),
        BlockKind::IntSub => Some(Value::int(out_width, ints(0)?.wrapping_sub(ints(1)?))),
        BlockKind::IntMul => Some(Value::int(out_width, ints(0)?.wrapping_mul(ints(1)?))),
        BlockKind::IntDiv { signed } => {
            let (a, b) = (ints(0)?, ints(1)?);
            if b == 0 {
                return None;
            }
            let bits = if *signed {
                let (aw, bw) = (widths(0)?, widths(1)?);
                (sign_extend(aw, a) / sign_extend(bw, b)) as u64
            } else {
                a / b
            };
            Some(Value::int(out_width, bits))
        }
        BlockKind::IntRem { signed } => {
            let (a, b) = (ints(0)?, ints(1)?);
            if b == 0 {
                return None;
            }
            let bits = if *signed {
                let (aw, bw) = (widths(0)?, widths(1)?);
                (sign_extend(aw, a) % sign_extend(bw, b)) as u64
            } else {
                a % b
            };
            Some(Value::int(out_width, bits))
        }
        BlockKind::Shift { dir, style } => {
            let data = ints(0)?;
            let amount = ints(1)? as i64;
            let amount = match dir {
                ShiftDir::Left => amount,
                ShiftDir::Right => -amount,
                ShiftDir::Either => sign_extend(widths(1)?, amount as u64),
            };
            Some(Value::int(out_width, shift_bits(out_width, data, amount, *style)))
        }
        BlockKind::ConstShift { shift, style } => {
            let data = ints(0)?;
            Some(Value::int(out_width, shift_bits(out_width, data, i64::from(*shift), *style)))
        }
        BlockKind::IntTruncate => Some(Value::int(out_width, ints(0)?)),
        BlockKind::IntExtend { signed } => {
            let bits = ints(0)?;
            let from = widths(0)?;
            let bits = if *signed {
                sign_extend(from, bits) as u64
            } else {
                bits
            };
            Some(Value::int(out_width, bits))
        }
        BlockKind::Bitwise { op } => {
            let mut acc = ints(0)?;
            for idx in 1..args.len() {
                let v = ints(idx)?;
                acc = match op {
                    BitwiseOp::And => acc & v,
                    BitwiseOp::Or => acc | v,
                    BitwiseOp::Xor => acc ^ v,
                };
            }
            Some(Value::int(out_width, acc))
        }
        BlockKind::IntCompare { cmp, signed } => {
            let (a, b) = (ints(0)?, ints(1)?);
            let result = if *signed {
                let (a, b) = (sign_extend(widths(0)?, a), sign_extend(widths(1)?, b));
                compare(a, b, *cmp)
            } else {
                compare(a, b, *cmp)
            };
            Some(Value::int(1, u64::from(result)))
        }
        BlockKind::Multiplexer => {
            let sel = ints(0)? as usize;
            args.get(1 + sel).cloned()
        }
        BlockKind::SparseMultiplexer { inputs } => {
            let sel = ints(0)? as u32;
            match inputs.iter().position(|&i| i == sel) {
                Some(pos) => args.get(2 + pos).cloned(),
                None => args.get(1).cloned(),
            }
        }
        _ => None,
    }
}

fn compare<T: PartialOrd + PartialEq>(a: T, b: T, cmp: CmpOp) -> bool {
    match cmp {
        CmpOp::Eq => a == b,
        CmpOp::Neq => a != b,
        CmpOp::Gt => a > b,
        CmpOp::Gte => a >= b,
    }
}

fn shift_bits(width: u32, data: u64, amount: i64, style: ShiftStyle) -> u64 {
    if width == 0 {
        return 0;
    }
    let w = i64::from(width);
    match style {
        ShiftStyle::Logical => {
            if amount >= 0 {
                data.checked_shl(amount as u32).unwrap_or(0)
            } else {
                data.checked_shr((-amount) as u32).unwrap_or(0)
            }
        }
        ShiftStyle::Rotating => {
            let amount = amount.rem_euclid(w) as u32;
            let masked = truncate_bits(width, data);
            if amount == 0 {
                masked
            } else {
                truncate_bits(width, (masked << amount) | (masked >> (width - amount)))
            }
        }
        ShiftStyle::Arithmetic => {
            let val = sign_extend(width, data);
            let bits = if amount >= 0 {
                (val as u64).checked_shl(amount as u32).unwrap_or(0)
            } else {
                (val >> (-amount).min(63)) as u64
            };
            bits
        }
    }
}
