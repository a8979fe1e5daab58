// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Stop conditions: which blocks end refinement.

use std::collections::HashSet;
use std::mem::{Discriminant, discriminant};

use viaduct_ir::block::BlockKind;
use viaduct_ir::design::Design;
use viaduct_ir::port::BlockId;
use viaduct_ir::types::Value;

/// A predicate over blocks deciding whether refinement should leave them
/// alone.
pub trait StopCondition {
    fn stop_refine(&self, design: &Design, b: BlockId) -> bool;

    /// The subset of `blocks` for which the predicate is false.
    fn unrefined(&self, design: &Design, blocks: &[BlockId]) -> Vec<BlockId> {
        blocks
            .iter()
            .copied()
            .filter(|&b| !self.stop_refine(design, b))
            .collect()
    }

    /// Are all of `blocks` refined?
    fn refined(&self, design: &Design, blocks: &[BlockId]) -> bool {
        blocks.iter().all(|&b| self.stop_refine(design, b))
    }
}

/// Matches blocks by kind. The discriminant set plays the role of a class
/// list: any block whose kind is in the set stops refining.
#[derive(Default)]
pub struct KindStopCondition {
    kinds: HashSet<Discriminant<BlockKind>>,
}

impl KindStopCondition {
    pub fn add_kind(&mut self, probe: &BlockKind) {
        self.kinds.insert(discriminant(probe));
    }
}

impl StopCondition for KindStopCondition {
    fn stop_refine(&self, design: &Design, b: BlockId) -> bool {
        self.kinds.contains(&discriminant(&design.block(b).kind))
    }
}

/// The primitive set of the synchronous backend: communication, logic and
/// synthesis intrinsics plus the integer function library. Registers,
/// sparse multiplexers and interface plumbing must refine away.
pub fn std_library_stops() -> KindStopCondition {
    let mut sc = KindStopCondition::default();
    for probe in [
        BlockKind::Identity,
        BlockKind::Wait,
        BlockKind::Cast,
        BlockKind::Join,
        BlockKind::Split,
        BlockKind::Select,
        BlockKind::Multiplexer,
        BlockKind::Router,
        BlockKind::Extract { path: Vec::new() },
        BlockKind::Constant { value: Value::Void },
        BlockKind::Never,
        BlockKind::NullSink,
        BlockKind::Once { value: Value::Void },
        BlockKind::RtlReg { writes: 0, reads: 0 },
        BlockKind::BlockRam { depth: 0, ports: 0 },
        BlockKind::PipelineRegister,
        BlockKind::PipelineStageController,
        BlockKind::Latch,
        BlockKind::Fork { virt: false },
        BlockKind::IntAdd,
        BlockKind::IntSub,
        BlockKind::IntMul,
        BlockKind::IntDiv { signed: false },
        BlockKind::IntRem { signed: false },
        BlockKind::Shift {
            dir: viaduct_ir::block::ShiftDir::Left,
            style: viaduct_ir::block::ShiftStyle::Logical,
        },
        BlockKind::ConstShift {
            shift: 0,
            style: viaduct_ir::block::ShiftStyle::Logical,
        },
        BlockKind::IntTruncate,
        BlockKind::IntExtend { signed: false },
        BlockKind::Bitwise {
            op: viaduct_ir::block::BitwiseOp::And,
        },
        BlockKind::IntCompare {
            cmp: viaduct_ir::block::CmpOp::Eq,
            signed: false,
        },
        BlockKind::ModuleRef(Default::default()),
        BlockKind::Dummy,
    ] {
        sc.add_kind(&probe);
    }
    sc
}
