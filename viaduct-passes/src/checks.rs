// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Post-condition checks: connections, outputs, cycles.

use itertools::Itertools;
use log::{error, warn};

use viaduct_analysis::queries::find_cycle;
use viaduct_ir::block::BlockKind;
use viaduct_ir::design::Design;
use viaduct_ir::port::{BlockId, ModuleId};
use viaduct_ir::{CompileResult, Error};

use crate::pass::ModulePass;

/// Every input of every block must have a driver. A missing one is
/// reported along with the block's history and, when the module is still
/// mutable, patched with a `Never` source so downstream stages have a
/// well-formed graph to work with.
pub struct CheckConnectionsPass;

impl ModulePass for CheckConnectionsPass {
    fn name(&self) -> &'static str {
        "check-connections"
    }

    fn run_on_module(&mut self, design: &mut Design, m: ModuleId) -> CompileResult<()> {
        let mutable = design.module(m).can_mutate();
        for b in design.find_all_blocks(m) {
            for ip in design.block(b).inputs.clone() {
                if design.find_source(m, ip).is_some() {
                    continue;
                }
                warn!(
                    "could not find driver for an input of {} ({}); history: {}",
                    design.global_name(b),
                    design.input_type(ip),
                    design.block(b).history.describe()
                );
                if mutable {
                    let never = design.add_never(design.input_type(ip).clone());
                    design.block_mut(never).history.set_optimization(Some(b));
                    design.connect(m, design.block(never).dout(), ip)?;
                }
            }
        }
        Ok(())
    }
}

/// Outside regions, a block with dependent (tied, multiple) outputs must
/// feed pipeline registers only; anything else cannot be synthesized.
#[derive(Default)]
pub struct CheckOutputsPass {
    pub violations: usize,
}

impl ModulePass for CheckOutputsPass {
    fn name(&self) -> &'static str {
        "check-outputs"
    }

    fn run_on_module(&mut self, design: &mut Design, m: ModuleId) -> CompileResult<()> {
        if design.module(m).is_region() {
            return Ok(());
        }
        for b in design.find_all_blocks(m) {
            let block = design.block(b);
            if block.outputs_separate() || block.outputs.len() <= 1 {
                continue;
            }
            for op in design.block(b).outputs.clone() {
                for sink in design.find_sinks(m, op) {
                    let sink_owner = design.input_owner(sink);
                    if !matches!(design.block(sink_owner).kind, BlockKind::PipelineRegister) {
                        error!(
                            "un-pipelined connection from dependent outputs: {} -> {}",
                            design.global_name(b),
                            design.global_name(sink_owner)
                        );
                        self.violations += 1;
                    }
                }
            }
        }
        Ok(())
    }
}

fn is_sequential(design: &Design, b: BlockId) -> bool {
    match design.block(b).kind {
        BlockKind::PipelineRegister => true,
        BlockKind::ModuleRef(sub) => design
            .module(sub)
            .schedule()
            .is_some_and(|s| s.clocks() > 1),
        _ => false,
    }
}

/// No combinational cycles may remain once pipelining is done.
pub struct CheckCyclesPass;

impl ModulePass for CheckCyclesPass {
    fn name(&self) -> &'static str {
        "check-cycles"
    }

    fn run_on_module(&mut self, design: &mut Design, m: ModuleId) -> CompileResult<()> {
        let cycle = find_cycle(design, m, &is_sequential);
        if cycle.is_empty() {
            return Ok(());
        }

        error!(
            "found combinational loop in '{}':",
            design.module(m).name
        );
        let rendered = cycle
            .iter()
            .map(|(op, ip)| {
                let line = format!(
                    "    {} -> {}",
                    design.global_name(design.output_owner(*op)),
                    design.global_name(design.input_owner(*ip))
                );
                error!("{line}");
                line
            })
            .join("\n");
        Err(Error::ImplementationError(format!(
            "combinational loop in '{}':\n{rendered}",
            design.module(m).name
        )))
    }
}
