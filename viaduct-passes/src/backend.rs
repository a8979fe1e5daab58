// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The backend contract the optimizer consults.
//!
//! The core emits nothing itself; it only needs to know whether the target
//! is synchronous, which blocks it synthesizes directly, and a delay
//! estimate per block for timing-driven pipelining. Delay is modelled as
//! logical effort - a per-kind fan-in/fan-out weight - times a nominal
//! gate delay.

use viaduct_ir::block::BlockKind;
use viaduct_ir::design::Design;
use viaduct_ir::port::{InputPortId, OutputPortId};
use viaduct_ir::time::Time;
use viaduct_refine::stop::{KindStopCondition, std_library_stops};

pub trait Backend {
    fn synchronous(&self) -> bool;

    /// Worst-case combinational delay from any dep input to this output.
    fn max_time(&self, design: &Design, op: OutputPortId) -> Time;

    /// Wire delay of one connection.
    fn routing_latency(&self, design: &Design, op: OutputPortId, ip: InputPortId) -> Time;

    /// The blocks this backend synthesizes directly.
    fn primitive_stops(&self) -> KindStopCondition;
}

/// The default clocked backend.
pub struct SynchronousBackend {
    /// Delay of one unit of logical effort.
    pub gate_delay: Time,
    /// Flat estimate for one routed connection.
    pub wire_delay: Time,
}

impl Default for SynchronousBackend {
    fn default() -> Self {
        SynchronousBackend {
            gate_delay: Time::ps(100.0),
            wire_delay: Time::ps(50.0),
        }
    }
}

/// Logical effort of computing `op`.
fn logical_effort(design: &Design, op: OutputPortId) -> f64 {
    let b = design.output_owner(op);
    let block = design.block(b);
    let width = design.output_type(op).bit_width().max(1) as f64;
    let fan = |n: usize| (n.max(2) as f64).log2();

    match &block.kind {
        BlockKind::Identity
        | BlockKind::Cast
        | BlockKind::Extract { .. }
        | BlockKind::Split
        | BlockKind::Join
        | BlockKind::Dummy
        | BlockKind::Constant { .. }
        | BlockKind::Never
        | BlockKind::Once { .. } => 0.0,
        // Registers launch their output at the clock edge.
        BlockKind::PipelineRegister | BlockKind::Latch => 0.0,
        BlockKind::PipelineStageController => 1.0,
        BlockKind::Wait => 0.5,
        BlockKind::Select => 1.0 + fan(block.inputs.len()),
        BlockKind::Multiplexer | BlockKind::SparseMultiplexer { .. } => {
            let fields = design.input_type(block.din()).num_elements();
            1.0 + fan(fields.saturating_sub(1))
        }
        BlockKind::Router => 1.0 + fan(block.outputs.len()),
        BlockKind::Fork { virt } => {
            if *virt {
                0.0
            } else {
                fan(block.outputs.len())
            }
        }
        BlockKind::RtlReg { .. } => 0.25,
        BlockKind::BlockRam { .. } => 1.0,
        BlockKind::Register | BlockKind::FiniteArray { .. } => 10.0,
        BlockKind::InterfaceMultiplexer { .. } | BlockKind::Tagger => 1.0,
        BlockKind::IntAdd | BlockKind::IntSub | BlockKind::IntCompare { .. } => {
            1.0 + width.log2()
        }
        BlockKind::IntMul => 2.0 * width.log2().max(1.0),
        BlockKind::IntDiv { .. } | BlockKind::IntRem { .. } => 4.0 * width.log2().max(1.0),
        BlockKind::Shift { .. } => width.log2().max(1.0),
        BlockKind::ConstShift { .. } | BlockKind::IntTruncate | BlockKind::IntExtend { .. } => 0.0,
        BlockKind::Bitwise { .. } => 1.0,
        // A module's delay is resolved by the caller's per-output cache.
        BlockKind::ModuleRef(_) => 0.0,
        BlockKind::NullSink => unreachable!("NullSink has no output ports"),
    }
}

impl Backend for SynchronousBackend {
    fn synchronous(&self) -> bool {
        true
    }

    fn max_time(&self, design: &Design, op: OutputPortId) -> Time {
        Time::seconds(self.gate_delay.as_seconds() * logical_effort(design, op))
    }

    fn routing_latency(&self, _design: &Design, _op: OutputPortId, _ip: InputPortId) -> Time {
        self.wire_delay
    }

    fn primitive_stops(&self) -> KindStopCondition {
        std_library_stops()
    }
}
