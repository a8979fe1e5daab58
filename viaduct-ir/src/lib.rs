// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! `viaduct-ir` - The Viaduct dataflow intermediate representation
//!
//! This library provides the data model of the Viaduct compiler: typed
//! [blocks](crate::block) connected port-to-port through a per-module
//! [connection database](crate::conns). A frontend builds a
//! [`Design`](crate::design::Design) of [modules](crate::module); the
//! refinement and optimization stages rewrite the connection graph in place
//! until every remaining block is a backend primitive.
//!
//! The IR is arena-based: blocks, ports and modules live in
//! [slotmap](https://docs.rs/slotmap) arenas owned by the `Design`, and all
//! cross-references are keys. A block's behaviour is dispatched by matching
//! on its [`BlockKind`](crate::block::BlockKind).
//!
//! # Simple graph
//!
//! ```rust
//! use viaduct_ir::block::BlockKind;
//! use viaduct_ir::design::Design;
//! use viaduct_ir::types::{Type, Value};
//!
//! let mut design = Design::default();
//! let top = design.new_module("top");
//! let c = design.add_constant(Value::int(32, 5));
//! let sink = design.add_null_sink(Type::Int(32));
//! let dout = design.outputs(c)[0];
//! let din = design.inputs(sink)[0];
//! design.connect(top, dout, din).unwrap();
//! assert_eq!(design.find_source(top, din), Some(dout));
//! assert!(matches!(design.block(c).kind, BlockKind::Constant { .. }));
//! ```

pub mod block;
pub mod conns;
pub mod design;
pub mod eval;
pub mod history;
pub mod module;
pub mod port;
pub mod time;
pub mod types;

use std::error;
use std::fmt;

/// Build an [Error] of the given kind from a message that supports
/// `to_string`.
#[macro_export]
macro_rules! ir_error {
    ($kind:ident, $msg:expr) => {
        Err($crate::Error::$kind($msg.to_string()))
    };
}

/// The error returned by fallible IR and pass operations.
///
/// The compiler is fail-fast: these are raised eagerly and propagate
/// unchanged to the top-level driver, which converts them to a non-zero
/// exit code.
#[derive(Debug)]
pub enum Error {
    /// Malformed input from the caller: mismatched widths, out-of-range
    /// indices, ports that do not belong to the named block.
    InvalidArgument(String),
    /// Type mismatch at a connection.
    TypeError(String),
    /// Operation used out of sequence.
    InvalidCall(String),
    /// Invariant violation the code believes is impossible.
    ImplementationError(String),
    /// A collaborator (frontend, emitter) reported failure.
    ExternalError(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            Error::TypeError(msg) => write!(f, "Type error: {msg}"),
            Error::InvalidCall(msg) => write!(f, "Invalid call: {msg}"),
            Error::ImplementationError(msg) => write!(f, "Implementation error: {msg}"),
            Error::ExternalError(msg) => write!(f, "External error: {msg}"),
        }
    }
}

impl error::Error for Error {}

/// The result type for most compiler operations.
pub type CompileResult<T> = Result<T, Error>;
