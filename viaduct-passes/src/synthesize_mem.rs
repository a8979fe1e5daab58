// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Memory synthesis: lower `Register` blocks to RTL registers.

use viaduct_ir::block::BlockKind;
use viaduct_ir::design::Design;
use viaduct_ir::port::ModuleId;
use viaduct_ir::CompileResult;
use viaduct_refine::refiners::refine_register;

use crate::pass::ModulePass;
use crate::transform::Transformer;

/// Transform every `Register` into an `RtlReg` with one read interface
/// (and read-side Wait) per requestor, unrolling an interface multiplexer
/// in front of the read port when present.
pub struct SynthesizeMemoryPass;

impl ModulePass for SynthesizeMemoryPass {
    fn name(&self) -> &'static str {
        "synthesize-memories"
    }

    fn run_on_module(&mut self, design: &mut Design, m: ModuleId) -> CompileResult<()> {
        let t = Transformer::new(m);
        if !t.can_mutate(design) {
            return Ok(());
        }
        for b in design.find_all_blocks(m) {
            if design.blocks.get(b).is_none() {
                continue;
            }
            if matches!(design.block(b).kind, BlockKind::Register) {
                refine_register(design, m, b)?;
            }
        }
        Ok(())
    }
}
