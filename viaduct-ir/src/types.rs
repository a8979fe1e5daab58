// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Wire types and constant values.
//!
//! Every port carries a [`Type`]. Bit-width is defined inductively: scalar
//! widths for the primitives, zero for void, and the sum of the element
//! widths for composites.

use std::fmt;

use crate::{CompileResult, Error};

/// The type of a token travelling over a connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    /// Integer of the given bit width.
    Int(u32),
    Half,
    Float,
    Double,
    Quad,
    /// The empty token. Zero bits of payload, but still a token.
    Void,
    /// Opaque pointer. The synthesized width is implementation-defined.
    Pointer,
    /// Ordered, possibly heterogeneous elements.
    Struct(Vec<Type>),
    /// `n` elements of one element type.
    Vector(Box<Type>, usize),
}

impl Type {
    /// Number of bits required to carry one token of this type.
    pub fn bit_width(&self) -> u64 {
        match self {
            Type::Int(w) => u64::from(*w),
            Type::Half => 16,
            Type::Float => 32,
            Type::Double => 64,
            Type::Quad => 128,
            Type::Void => 0,
            Type::Pointer => 64,
            Type::Struct(elems) => elems.iter().map(Type::bit_width).sum(),
            Type::Vector(elem, n) => elem.bit_width() * (*n as u64),
        }
    }

    /// Number of contained elements. Zero for scalars.
    pub fn num_elements(&self) -> usize {
        match self {
            Type::Struct(elems) => elems.len(),
            Type::Vector(_, n) => *n,
            _ => 0,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Type::Struct(_) | Type::Vector(_, _))
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    /// The type of element `idx` of a composite.
    pub fn element(&self, idx: usize) -> CompileResult<&Type> {
        match self {
            Type::Struct(elems) => elems.get(idx).ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "struct element {idx} out of range ({} elements)",
                    elems.len()
                ))
            }),
            Type::Vector(elem, n) => {
                if idx < *n {
                    Ok(elem)
                } else {
                    Err(Error::InvalidArgument(format!(
                        "vector element {idx} out of range ({n} elements)"
                    )))
                }
            }
            _ => Err(Error::InvalidArgument(format!(
                "cannot index into non-composite type {self}"
            ))),
        }
    }

    /// Walk a path of composite indices and return the projected type.
    pub fn extracted(&self, path: &[usize]) -> CompileResult<Type> {
        let mut ty = self;
        for idx in path {
            ty = ty.element(*idx)?;
        }
        Ok(ty.clone())
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::Int(w) => write!(f, "i{w}"),
            Type::Half => write!(f, "f16"),
            Type::Float => write!(f, "f32"),
            Type::Double => write!(f, "f64"),
            Type::Quad => write!(f, "f128"),
            Type::Void => write!(f, "void"),
            Type::Pointer => write!(f, "ptr"),
            Type::Struct(elems) => {
                write!(f, "{{")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, "}}")
            }
            Type::Vector(elem, n) => write!(f, "<{n} x {elem}>"),
        }
    }
}

/// A constant token.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int { width: u32, bits: u64 },
    Fp { ty: Type, value: f64 },
    Void,
    Struct(Vec<Value>),
    Vector(Vec<Value>),
}

impl Value {
    pub fn int(width: u32, bits: u64) -> Value {
        Value::Int {
            width,
            bits: truncate_bits(width, bits),
        }
    }

    pub fn type_of(&self) -> Type {
        match self {
            Value::Int { width, .. } => Type::Int(*width),
            Value::Fp { ty, .. } => ty.clone(),
            Value::Void => Type::Void,
            Value::Struct(elems) => Type::Struct(elems.iter().map(Value::type_of).collect()),
            Value::Vector(elems) => {
                let elem_ty = elems.first().map_or(Type::Void, Value::type_of);
                Type::Vector(Box::new(elem_ty), elems.len())
            }
        }
    }

    pub fn as_int(&self) -> Option<u64> {
        match self {
            Value::Int { bits, .. } => Some(*bits),
            _ => None,
        }
    }

    /// Project a path of composite indices out of this value.
    pub fn extracted(&self, path: &[usize]) -> CompileResult<Value> {
        let mut value = self;
        for idx in path {
            value = match value {
                Value::Struct(elems) | Value::Vector(elems) => elems.get(*idx).ok_or_else(|| {
                    Error::InvalidArgument(format!("constant element {idx} out of range"))
                })?,
                _ => {
                    return Err(Error::InvalidArgument(
                        "cannot index into scalar constant".to_string(),
                    ));
                }
            };
        }
        Ok(value.clone())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Int { bits, width } => write!(f, "{bits}:i{width}"),
            Value::Fp { value, .. } => write!(f, "{value}"),
            Value::Void => write!(f, "()"),
            Value::Struct(elems) | Value::Vector(elems) => {
                write!(f, "{{")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Mask `bits` down to `width` bits.
pub fn truncate_bits(width: u32, bits: u64) -> u64 {
    if width >= 64 {
        bits
    } else {
        bits & ((1u64 << width) - 1)
    }
}

/// Sign-extend the low `width` bits of `bits` into an `i64`.
pub fn sign_extend(width: u32, bits: u64) -> i64 {
    if width == 0 || width >= 64 {
        return bits as i64;
    }
    let shift = 64 - width;
    ((bits << shift) as i64) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_widths() {
        assert_eq!(Type::Int(13).bit_width(), 13);
        assert_eq!(Type::Void.bit_width(), 0);
        let s = Type::Struct(vec![Type::Int(3), Type::Int(5), Type::Void]);
        assert_eq!(s.bit_width(), 8);
        let v = Type::Vector(Box::new(Type::Int(8)), 4);
        assert_eq!(v.bit_width(), 32);
        assert_eq!(Type::Struct(vec![s, v]).bit_width(), 40);
    }

    #[test]
    fn element_access() {
        let s = Type::Struct(vec![Type::Int(1), Type::Struct(vec![Type::Int(2)])]);
        assert_eq!(s.element(0).unwrap(), &Type::Int(1));
        assert_eq!(s.extracted(&[1, 0]).unwrap(), Type::Int(2));
        assert!(s.element(2).is_err());
        assert!(Type::Int(4).element(0).is_err());
    }

    #[test]
    fn value_truncation() {
        assert_eq!(Value::int(4, 0x1f).as_int(), Some(0xf));
        assert_eq!(sign_extend(4, 0xf), -1);
        assert_eq!(sign_extend(4, 0x7), 7);
    }
}
