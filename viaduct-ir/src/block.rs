// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Blocks: the nodes of the dataflow graph.
//!
//! A block can compute, store state, read inputs and write outputs. Its
//! granularity is not defined: anything from a whole module down to a single
//! gate. Behaviour is dispatched by exhaustive matching on [`BlockKind`];
//! refiners that rewrite coarse kinds into finer subgraphs live in the
//! `viaduct-refine` crate.
//!
//! # Port conventions
//!
//! Port lists are ordered, and each kind documents its layout:
//!
//! * single-input/single-output kinds (`Identity`, `Cast`, `Extract`,
//!   function blocks, `PipelineRegister`, `Latch`, `Dummy`): `inputs[0]` is
//!   `din`, `outputs[0]` is `dout`.
//! * `Wait`: `inputs[0]` is the data channel, `inputs[1..]` the controls.
//! * `Join`/`Select`: N data inputs, one output.
//! * `Split`/`Router`/`Fork`: one input, N outputs.
//! * `PipelineStageController`: `inputs[0]` = `vin`; `outputs[0]` = `vout`,
//!   `outputs[1]` = `ce`.
//! * memory kinds: request inputs paired index-for-index with response
//!   outputs (write interfaces first for `Register`/`RtlReg`).
//! * `InterfaceMultiplexer`: `inputs[0]`/`outputs[0]` are the client pair,
//!   entry `1 + i` on both sides is server interface `i`.
//! * `Tagger`: `inputs[0]`/`outputs[0]` the (tagged) server pair,
//!   `inputs[1]`/`outputs[1]` the client pair.

use std::collections::BTreeSet;
use std::fmt;

use itertools::Itertools;

use crate::history::History;
use crate::port::{
    BlockId, DependenceRule, InputPortId, InputType, ModuleId, OutputPortId, OutputType,
};
use crate::time::Latency;
use crate::types::Value;
use crate::{CompileResult, Error};

/// Direction of a variable shift.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShiftDir {
    Left,
    Right,
    /// Negative amounts shift right, positive left.
    Either,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShiftStyle {
    Logical,
    Rotating,
    Arithmetic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BitwiseOp {
    And,
    Or,
    Xor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Neq,
    Gt,
    Gte,
}

/// The closed set of block behaviours the compiler understands.
#[derive(Clone, Debug)]
pub enum BlockKind {
    // Communication intrinsics. These govern the flow of information and
    // every backend must support them directly.
    /// Pass-through. Always safely removable.
    Identity,
    /// Emits the data token once every control has arrived; controls are
    /// consumed.
    Wait,
    /// Reinterpret to an equal-width type.
    Cast,
    /// Concatenate N inputs into one composite output.
    Join,
    /// Break a composite input into its N elements.
    Split,
    /// Emit whichever input arrives. Arrival order is undefined.
    Select,
    /// Input struct `{sel, v0..vN-1}`; output `v[sel]`, all inputs consumed.
    Multiplexer,
    /// Input struct `{sel, v}`; `v` emitted on output `sel` only.
    Router,
    /// Project one element through a path of composite indices.
    Extract { path: Vec<usize> },
    /// Multiplexer with a sparse input population and a default; selector
    /// values outside `inputs` pick the default field.
    SparseMultiplexer { inputs: BTreeSet<u32> },

    // Logic intrinsics.
    /// Emits the stored value once per firing.
    Constant { value: Value },
    /// Produces no tokens, ever.
    Never,
    /// Accepts and destroys tokens.
    NullSink,
    /// Emits a single token immediately after reset.
    Once { value: Value },

    // Memory intrinsics.
    /// One write interface, one read interface, independent firing.
    Register,
    /// Addressable storage of `depth` entries.
    FiniteArray { depth: usize },
    /// RTL register: `writes` write interfaces then `reads` read interfaces,
    /// none of which ever block.
    RtlReg { writes: usize, reads: usize },
    /// Block RAM with `ports` true RW ports. Request `{is_write, data, idx}`,
    /// response `{data}`.
    BlockRam { depth: usize, ports: usize },

    // Synthesis blocks.
    /// One clock cycle of latency.
    PipelineRegister,
    /// Amortized control for a set of pipeline registers: `vin` -> `vout`
    /// plus a clock-enable output.
    PipelineStageController,
    /// Transparent latch on one channel.
    Latch,
    /// Fan-out. Virtual forks share valid/backpressure with their source and
    /// cost nothing.
    Fork { virt: bool },

    // Interface plumbing.
    /// Multiplexes one client channel across N server interfaces.
    InterfaceMultiplexer { servers: usize },
    /// Wraps requests with a tag and routes responses back by tag.
    Tagger,

    // Integer functions.
    IntAdd,
    IntSub,
    IntMul,
    IntDiv { signed: bool },
    IntRem { signed: bool },
    Shift { dir: ShiftDir, style: ShiftStyle },
    ConstShift { shift: i32, style: ShiftStyle },
    IntTruncate,
    IntExtend { signed: bool },
    Bitwise { op: BitwiseOp },
    IntCompare { cmp: CmpOp, signed: bool },

    // Structure.
    /// A module instantiated as a block; the ports are the module's external
    /// ports.
    ModuleRef(ModuleId),
    /// Boundary identity pairing a module's external port with its internal
    /// driver or sink.
    Dummy,
}

impl BlockKind {
    /// Stable name used by stats output and diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            BlockKind::Identity => "Identity",
            BlockKind::Wait => "Wait",
            BlockKind::Cast => "Cast",
            BlockKind::Join => "Join",
            BlockKind::Split => "Split",
            BlockKind::Select => "Select",
            BlockKind::Multiplexer => "Multiplexer",
            BlockKind::Router => "Router",
            BlockKind::Extract { .. } => "Extract",
            BlockKind::SparseMultiplexer { .. } => "SparseMultiplexer",
            BlockKind::Constant { .. } => "Constant",
            BlockKind::Never => "Never",
            BlockKind::NullSink => "NullSink",
            BlockKind::Once { .. } => "Once",
            BlockKind::Register => "Register",
            BlockKind::FiniteArray { .. } => "FiniteArray",
            BlockKind::RtlReg { .. } => "RtlReg",
            BlockKind::BlockRam { .. } => "BlockRam",
            BlockKind::PipelineRegister => "PipelineRegister",
            BlockKind::PipelineStageController => "PipelineStageController",
            BlockKind::Latch => "Latch",
            BlockKind::Fork { .. } => "Fork",
            BlockKind::InterfaceMultiplexer { .. } => "InterfaceMultiplexer",
            BlockKind::Tagger => "Tagger",
            BlockKind::IntAdd => "IntAdd",
            BlockKind::IntSub => "IntSub",
            BlockKind::IntMul => "IntMul",
            BlockKind::IntDiv { .. } => "IntDiv",
            BlockKind::IntRem { .. } => "IntRem",
            BlockKind::Shift { .. } => "Shift",
            BlockKind::ConstShift { .. } => "ConstShift",
            BlockKind::IntTruncate => "IntTruncate",
            BlockKind::IntExtend { .. } => "IntExtend",
            BlockKind::Bitwise { .. } => "Bitwise",
            BlockKind::IntCompare { .. } => "IntCompare",
            BlockKind::ModuleRef(_) => "Module",
            BlockKind::Dummy => "Dummy",
        }
    }

    /// Does execution depend on prior history?
    pub fn has_state(&self) -> bool {
        matches!(
            self,
            BlockKind::Register
                | BlockKind::FiniteArray { .. }
                | BlockKind::RtlReg { .. }
                | BlockKind::BlockRam { .. }
                | BlockKind::Once { .. }
        )
    }

    /// Is this one of the pure single-output function kinds?
    pub fn is_function(&self) -> bool {
        matches!(
            self,
            BlockKind::IntAdd
                | BlockKind::IntSub
                | BlockKind::IntMul
                | BlockKind::IntDiv { .. }
                | BlockKind::IntRem { .. }
                | BlockKind::Shift { .. }
                | BlockKind::ConstShift { .. }
                | BlockKind::IntTruncate
                | BlockKind::IntExtend { .. }
                | BlockKind::Bitwise { .. }
                | BlockKind::IntCompare { .. }
                | BlockKind::Multiplexer
                | BlockKind::SparseMultiplexer { .. }
        )
    }
}

/// A node in the dataflow graph.
#[derive(Clone, Debug)]
pub struct Block {
    pub kind: BlockKind,
    pub inputs: Vec<InputPortId>,
    pub outputs: Vec<OutputPortId>,
    /// The module this block currently belongs to; set when the block first
    /// participates in a connection.
    pub module: Option<ModuleId>,
    pub name: Option<String>,
    pub history: History,
}

impl Block {
    pub fn new(kind: BlockKind) -> Block {
        Block {
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            module: None,
            name: None,
            history: History::default(),
        }
    }

    /// The data input of a single-input kind.
    pub fn din(&self) -> InputPortId {
        self.inputs[0]
    }

    /// The data output of a single-output kind.
    pub fn dout(&self) -> OutputPortId {
        self.outputs[0]
    }

    /// The control inputs of a `Wait`.
    pub fn controls(&self) -> &[InputPortId] {
        &self.inputs[1..]
    }

    /// Interface `idx` counted over `(inputs[idx], outputs[idx])` pairs.
    /// Memory and interface kinds lay their ports out this way.
    pub fn interface(&self, idx: usize, server: bool) -> Interface {
        Interface {
            din: self.inputs[idx],
            dout: self.outputs[idx],
            server,
        }
    }

    /// The write interface of a `Register`/`FiniteArray`.
    pub fn write_iface(&self) -> Interface {
        self.interface(0, true)
    }

    /// The read interface of a `Register`/`FiniteArray`.
    pub fn read_iface(&self) -> Interface {
        self.interface(1, true)
    }

    pub fn has_state(&self) -> bool {
        self.kind.has_state()
    }

    pub fn is_pure(&self) -> bool {
        !self.has_state()
    }

    /// True when the outputs may fire independently of one another.
    pub fn outputs_separate(&self) -> bool {
        matches!(
            self.kind,
            BlockKind::Router
                | BlockKind::Fork { .. }
                | BlockKind::Register
                | BlockKind::FiniteArray { .. }
                | BlockKind::RtlReg { .. }
                | BlockKind::BlockRam { .. }
                | BlockKind::InterfaceMultiplexer { .. }
                | BlockKind::Tagger
                | BlockKind::ModuleRef(_)
        )
    }

    /// True when all outputs fire together, sharing one dependence rule.
    pub fn outputs_tied(&self) -> bool {
        !matches!(
            self.kind,
            BlockKind::Router
                | BlockKind::Register
                | BlockKind::FiniteArray { .. }
                | BlockKind::RtlReg { .. }
                | BlockKind::BlockRam { .. }
                | BlockKind::InterfaceMultiplexer { .. }
                | BlockKind::Tagger
        )
    }

    /// The dependence rule of one of this block's outputs.
    pub fn dep_rule(&self, op: OutputPortId) -> CompileResult<DependenceRule> {
        let idx = self
            .outputs
            .iter()
            .position(|&o| o == op)
            .ok_or_else(|| Error::InvalidArgument("output port does not belong".to_string()))?;

        let rule = match &self.kind {
            BlockKind::Wait | BlockKind::Join => {
                DependenceRule::new(InputType::And, OutputType::Always, self.inputs.clone())
            }
            BlockKind::Select => {
                DependenceRule::new(InputType::Or, OutputType::Always, self.inputs.clone())
            }
            BlockKind::Router => {
                DependenceRule::new(InputType::And, OutputType::Maybe, self.inputs.clone())
            }
            BlockKind::Constant { .. } => DependenceRule::and_fire_one(Vec::new()),
            BlockKind::Never | BlockKind::Once { .. } => DependenceRule::custom(Vec::new()),
            BlockKind::Register
            | BlockKind::FiniteArray { .. }
            | BlockKind::BlockRam { .. } => {
                // Response `idx` pairs with request `idx`.
                DependenceRule::and_fire_one(vec![self.inputs[idx]])
            }
            BlockKind::RtlReg { writes, .. } => {
                if idx < *writes {
                    DependenceRule::and_fire_one(vec![self.inputs[idx]])
                } else {
                    // Read ports never block and carry no request.
                    DependenceRule::and_fire_one(Vec::new())
                }
            }
            BlockKind::PipelineRegister => {
                DependenceRule::and_fire_one(vec![self.inputs[0]]).with_latency(Latency::registers(1))
            }
            BlockKind::PipelineStageController | BlockKind::Latch => {
                DependenceRule::new(InputType::And, OutputType::Always, self.inputs.clone())
            }
            BlockKind::Tagger => {
                if idx == 0 {
                    // Tagged response depends only on the client response.
                    DependenceRule::custom(vec![self.inputs[1]])
                } else {
                    DependenceRule::custom(self.inputs.clone())
                }
            }
            BlockKind::InterfaceMultiplexer { .. } => DependenceRule::custom(self.inputs.clone()),
            BlockKind::NullSink => {
                return Err(Error::InvalidArgument(
                    "NullSink has no output ports".to_string(),
                ));
            }
            // Identity, Cast, Extract, Split, Fork, Multiplexer, Dummy,
            // ModuleRef and the function kinds: combinational AND over every
            // input. A module's contract is the NED property itself.
            _ => DependenceRule::and_fire_one(self.inputs.clone()),
        };
        Ok(rule)
    }

    /// The inputs one of this block's outputs depends on.
    pub fn deps(&self, op: OutputPortId) -> CompileResult<Vec<InputPortId>> {
        Ok(self.dep_rule(op)?.inputs)
    }

    /// Short per-block description for printers.
    pub fn print(&self) -> String {
        match &self.kind {
            BlockKind::Constant { value } | BlockKind::Once { value } => value.to_string(),
            BlockKind::Extract { path } => format!("[{}]", path.iter().join(".")),
            BlockKind::Fork { virt: true } => "virt".to_string(),
            BlockKind::ConstShift { shift, .. } => format!("<< {shift}"),
            BlockKind::FiniteArray { depth } | BlockKind::BlockRam { depth, .. } => {
                format!("depth {depth}")
            }
            _ => String::new(),
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}:{}", self.kind.kind_name(), name),
            None => write!(f, "{}", self.kind.kind_name()),
        }
    }
}

/// A logical request/response channel pair on one block.
///
/// A server consumes requests on `din` and produces responses on `dout`;
/// a client is the mirror image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interface {
    pub din: InputPortId,
    pub dout: OutputPortId,
    pub server: bool,
}

impl Interface {
    /// The request side of the channel: an input for servers, an output for
    /// clients.
    pub fn req_is_input(&self) -> bool {
        self.server
    }
}
