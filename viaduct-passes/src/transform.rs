// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Small graph-surgery helpers shared by the transform passes.

use viaduct_ir::design::Design;
use viaduct_ir::port::{BlockId, InputPortId, ModuleId, OutputPortId};
use viaduct_ir::{CompileResult, Error};

/// Rewrites bound to one module. Refuses to touch finalized regions.
pub struct Transformer {
    m: ModuleId,
}

impl Transformer {
    pub fn new(m: ModuleId) -> Transformer {
        Transformer { m }
    }

    pub fn can_mutate(&self, design: &Design) -> bool {
        design.module(self.m).can_mutate()
    }

    /// Splice a single-input single-output block out of the graph,
    /// reconnecting its driver to its sinks.
    pub fn remove(&self, design: &mut Design, b: BlockId) -> CompileResult<()> {
        let block = design.block(b);
        if block.inputs.len() != 1 || block.outputs.len() > 1 {
            return Err(Error::InvalidArgument(
                "can only splice out blocks with one input and at most one output".to_string(),
            ));
        }
        let din = block.din();
        let driver = design.find_source(self.m, din);
        if let Some(driver) = driver {
            design.disconnect(self.m, driver, din);
        }
        if let Some(&dout) = design.block(b).outputs.first() {
            for sink in design.find_sinks(self.m, dout) {
                design.disconnect(self.m, dout, sink);
                if let Some(driver) = driver {
                    design.connect(self.m, driver, sink)?;
                }
            }
        }
        design.remove_block(self.m, b);
        Ok(())
    }

    /// Drop a block and all its connections.
    pub fn trash(&self, design: &mut Design, b: BlockId) {
        design.remove_block(self.m, b);
    }

    /// Swap one block for another with the same port shape.
    pub fn replace(&self, design: &mut Design, b: BlockId, with: BlockId) -> CompileResult<()> {
        let inputs = design.block(b).inputs.clone();
        let outputs = design.block(b).outputs.clone();
        let new_inputs = design.block(with).inputs.clone();
        let new_outputs = design.block(with).outputs.clone();
        if inputs.len() != new_inputs.len() || outputs.len() != new_outputs.len() {
            return Err(Error::InvalidArgument(
                "replacement block must have the same port shape".to_string(),
            ));
        }

        for (ip, nip) in inputs.iter().zip(&new_inputs) {
            if let Some(driver) = design.find_source(self.m, *ip) {
                design.disconnect(self.m, driver, *ip);
                design.connect(self.m, driver, *nip)?;
            }
        }
        for (op, nop) in outputs.iter().zip(&new_outputs) {
            for sink in design.find_sinks(self.m, *op) {
                design.disconnect(self.m, *op, sink);
                design.connect(self.m, *nop, sink)?;
            }
        }
        design.remove_block(self.m, b);
        Ok(())
    }

    /// Move all fan-out of `op` behind a single-channel block: `op` feeds
    /// `nip`, `nop` feeds the old sinks.
    pub fn insert_after(
        &self,
        design: &mut Design,
        op: OutputPortId,
        nip: InputPortId,
        nop: OutputPortId,
    ) -> CompileResult<()> {
        for sink in design.find_sinks(self.m, op) {
            design.disconnect(self.m, op, sink);
            design.connect(self.m, nop, sink)?;
        }
        design.connect(self.m, op, nip)
    }

    /// Break one connection with a single-channel block.
    pub fn insert_between(
        &self,
        design: &mut Design,
        op: OutputPortId,
        ip: InputPortId,
        nip: InputPortId,
        nop: OutputPortId,
    ) -> CompileResult<()> {
        design.disconnect(self.m, op, ip);
        design.connect(self.m, op, nip)?;
        design.connect(self.m, nop, ip)
    }
}
