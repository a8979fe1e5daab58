// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Fork synthesis.
//!
//! Latency-insensitive channels are point to point, so every multi-sink
//! output becomes an explicit Fork. Forks fed by constants are virtual
//! (they share valid/backpressure with their source and cost nothing).
//! Fork branches that later recombine without a pipeline register between
//! them would deadlock the rendezvous, so those branches get registers.

use std::collections::BTreeSet;

use log::info;

use viaduct_analysis::queries::{find_consumers, find_constants};
use viaduct_ir::block::BlockKind;
use viaduct_ir::design::Design;
use viaduct_ir::port::{BlockId, ModuleId, OutputPortId};
use viaduct_ir::CompileResult;

use crate::pass::ModulePass;
use crate::transform::Transformer;

pub struct SynthesizeForksPass {
    /// Put a pipeline register in front of every real fork.
    pub pipeline: bool,
}

impl ModulePass for SynthesizeForksPass {
    fn name(&self) -> &'static str {
        "synthesize-forks"
    }

    fn run_on_module(&mut self, design: &mut Design, m: ModuleId) -> CompileResult<()> {
        if design.module(m).is_region() {
            // The schedule supplies fan-out inside a region.
            return Ok(());
        }
        let t = Transformer::new(m);
        if !t.can_mutate(design) {
            return Ok(());
        }

        let consts = find_constants(design, m);

        let forking_sources: Vec<OutputPortId> = design
            .module(m)
            .conns
            .sinks_raw()
            .iter()
            .filter(|(_, sinks)| sinks.len() > 1)
            .map(|(&op, _)| op)
            .collect();

        // Pre-existing forks participate in recombination checking too.
        let mut real_forks: BTreeSet<BlockId> = design
            .filter_blocks(m, |b| matches!(b.kind, BlockKind::Fork { virt: false }))
            .into_iter()
            .collect();

        for op in forking_sources {
            let sinks = design.find_sinks(m, op);
            let virt = consts.is_const_output(op);

            let ty = design.output_type(op).clone();
            let fork = design.add_fork(ty.clone(), virt);
            let owner = design.output_owner(op);
            design
                .block_mut(fork)
                .history
                .set_optimization(Some(owner));
            if !virt {
                real_forks.insert(fork);
            }

            if !virt && self.pipeline {
                let preg = design.add_pipeline_register_for(op);
                design.connect(m, op, design.block(preg).din())?;
                design
                    .connect(m, design.block(preg).dout(), design.block(fork).din())?;
            } else {
                design.connect(m, op, design.block(fork).din())?;
            }

            for sink in sinks {
                design.disconnect(m, op, sink);
                let f_out = design.fork_new_output(fork);
                design.connect(m, f_out, sink)?;
            }
        }

        if !real_forks.is_empty() {
            info!("created or kept {} real forks", real_forks.len());
        }

        // Fork outputs whose consumer sets overlap recombine without a
        // register in between; pipeline them.
        let is_preg = |d: &Design, b: BlockId| matches!(d.block(b).kind, BlockKind::PipelineRegister);
        let mut recombined = 0u32;
        for fork in real_forks {
            if design.blocks.get(fork).is_none() {
                continue;
            }
            let outputs = design.block(fork).outputs.clone();
            let consumers: Vec<_> = outputs
                .iter()
                .map(|&op| find_consumers(design, m, op, &is_preg))
                .collect();

            let mut pipeline_these: BTreeSet<usize> = BTreeSet::new();
            for i in 0..outputs.len() {
                for j in i + 1..outputs.len() {
                    if consumers[i].intersection(&consumers[j]).next().is_some() {
                        pipeline_these.insert(i);
                        pipeline_these.insert(j);
                    }
                }
            }

            for idx in &pipeline_these {
                let op = outputs[*idx];
                let preg = design.add_pipeline_register_for(op);
                let nip = design.block(preg).din();
                let nop = design.block(preg).dout();
                t.insert_after(design, op, nip, nop)?;
            }
            if !pipeline_these.is_empty() {
                recombined += 1;
            }
        }
        if recombined > 0 {
            info!("found and pipelined {recombined} recombining forks");
        }
        Ok(())
    }
}
