// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Pipelining passes: output bundling, cycle breaking, latching and
//! frequency-directed register insertion.

use std::collections::{BTreeMap, BTreeSet};

use log::info;

use viaduct_analysis::queries::{find_constants, find_cycle};
use viaduct_analysis::search::{
    Action, Edge, Forward, GraphSearch, SearchAlgo, SearchPath, Visitor,
};
use viaduct_ir::block::BlockKind;
use viaduct_ir::design::Design;
use viaduct_ir::port::{BlockId, ModuleId, OutputPortId};
use viaduct_ir::time::Time;
use viaduct_ir::CompileResult;
use viaduct_refine::refiners::refine_split_to_extracts;

use crate::backend::Backend;
use crate::pass::ModulePass;
use crate::transform::Transformer;

fn is_pipeline_register(design: &Design, b: BlockId) -> bool {
    matches!(design.block(b).kind, BlockKind::PipelineRegister)
}

/// Does this block stop a combinational path for cycle-breaking purposes?
fn breaks_cycle(design: &Design, b: BlockId) -> bool {
    match design.block(b).kind {
        BlockKind::PipelineRegister => true,
        BlockKind::ModuleRef(sub) => design.module(sub).is_region(),
        _ => false,
    }
}

/// Blocks with tied (but not separate) outputs cannot be pipelined one
/// output at a time. Join the outputs into one bundle, fork it, and let
/// the consumers extract their fields; a Split is replaced directly by
/// parallel Extracts off a common fork.
pub struct PipelineDependentsPass;

impl ModulePass for PipelineDependentsPass {
    fn name(&self) -> &'static str {
        "pipeline-dependents"
    }

    fn run_on_module(&mut self, design: &mut Design, m: ModuleId) -> CompileResult<()> {
        if design.module(m).is_region() {
            // Output rules do not apply within scheduled regions.
            return Ok(());
        }
        let t = Transformer::new(m);
        if !t.can_mutate(design) {
            return Ok(());
        }

        for b in design.find_all_blocks(m) {
            if design.blocks.get(b).is_none() {
                continue;
            }
            let block = design.block(b);
            if block.outputs_separate() || block.outputs.len() <= 1 {
                continue;
            }
            if matches!(block.kind, BlockKind::ModuleRef(_)) {
                continue;
            }

            if matches!(block.kind, BlockKind::Split) {
                let din = block.din();
                let din_ty = design.input_type(din).clone();
                let orig_input = design.find_source(m, din);
                let extracts = refine_split_to_extracts(design, m, b, true)?;

                if let Some(orig_input) = orig_input {
                    let fork = design.add_fork(din_ty, true);
                    design.block_mut(fork).history.set_optimization(Some(b));
                    for e in extracts.into_iter().flatten() {
                        let e_din = design.block(e).din();
                        design.disconnect(m, orig_input, e_din);
                        let f_out = design.fork_new_output(fork);
                        design.connect(m, f_out, e_din)?;
                    }
                    design.connect(m, orig_input, design.block(fork).din())?;
                }
                continue;
            }

            // Join the dependent outputs, fork the bundle, extract per
            // consumer.
            let outputs = design.block(b).outputs.clone();
            let tys: Vec<_> = outputs
                .iter()
                .map(|&op| design.output_type(op).clone())
                .collect();
            let join = design.add_join(tys.clone());
            design.block_mut(join).history.set_optimization(Some(b));
            let bundle_ty = design.output_type(design.block(join).dout()).clone();
            let fork = design.add_fork(bundle_ty.clone(), false);
            design.block_mut(fork).history.set_optimization(Some(b));
            design
                .connect(m, design.block(join).dout(), design.block(fork).din())?;

            for (i, &op) in outputs.iter().enumerate() {
                let sinks = design.find_sinks(m, op);
                design.connect(m, op, design.inputs(join)[i])?;
                let extr = design.add_extract(bundle_ty.clone(), vec![i])?;
                design.block_mut(extr).history.set_optimization(Some(b));
                let f_out = design.fork_new_output(fork);
                design.connect(m, f_out, design.block(extr).din())?;

                for sink in sinks {
                    design.disconnect(m, op, sink);
                    design.connect(m, design.block(extr).dout(), sink)?;
                }
            }
        }
        Ok(())
    }
}

/// Per-block flow estimator used to pick which cycle edge to break. One
/// unit of flow enters at each module driver and each pipeline-register
/// output; flow divides evenly across a block's outgoing edges over two
/// propagation rounds.
struct FlowVisitor {
    flow: BTreeMap<BlockId, f64>,
    output_edges: BTreeMap<BlockId, usize>,
}

impl FlowVisitor {
    fn edge_flow(&self, design: &Design, op: OutputPortId) -> f64 {
        let b = design.output_owner(op);
        let outputs = self.output_edges.get(&b).copied().unwrap_or(0);
        if outputs == 0 {
            return -1.0;
        }
        self.flow.get(&b).copied().unwrap_or(0.0) / outputs as f64
    }

    fn run(&mut self, design: &Design, m: ModuleId) {
        let mut init: BTreeSet<OutputPortId> = design.internal_drivers(m).into_iter().collect();

        for c in design.module(m).conns.connections() {
            let src_owner = design.output_owner(c.source);
            let sink_owner = design.input_owner(c.sink);
            if !is_pipeline_register(design, sink_owner) {
                *self.output_edges.entry(src_owner).or_insert(0) += 1;
            }
            if is_pipeline_register(design, src_owner) {
                init.insert(c.source);
            }
        }

        for &op in &init {
            let owner = design.output_owner(op);
            let no_inputs = design.inputs(owner).is_empty();
            let flow = if no_inputs { 0.0 } else { 1.0 };
            self.flow.insert(owner, flow);
        }

        let search = GraphSearch::new(design, m, SearchAlgo::Bfs);
        for _ in 0..2 {
            search.go(self, init.iter().copied().collect::<Vec<_>>());
        }
    }
}

impl Visitor for FlowVisitor {
    type Dir = Forward;
    type Path = Edge<Forward>;

    fn visit(&mut self, design: &Design, _m: ModuleId, path: &Self::Path) -> Action {
        let (src, dst) = path.end();
        let dst_block = design.input_owner(dst);
        if is_pipeline_register(design, dst_block) {
            return Action::TerminatePath;
        }
        let ef = self.edge_flow(design, src);
        *self.flow.entry(dst_block).or_insert(0.0) += ef;
        Action::Continue
    }
}

/// Break every combinational cycle with a pipeline register on the cycle
/// edge carrying the most flow.
pub struct PipelineCyclesPass;

impl ModulePass for PipelineCyclesPass {
    fn name(&self) -> &'static str {
        "pipeline-cycles"
    }

    fn run_on_module(&mut self, design: &mut Design, m: ModuleId) -> CompileResult<()> {
        if design.module(m).is_region() {
            return Ok(());
        }
        let t = Transformer::new(m);
        if !t.can_mutate(design) {
            return Ok(());
        }

        let mut count = 0u32;
        let mut bits = 0u64;
        loop {
            let cycle = find_cycle(design, m, &breaks_cycle);
            if cycle.is_empty() {
                break;
            }

            let mut fvisitor = FlowVisitor {
                flow: BTreeMap::new(),
                output_edges: BTreeMap::new(),
            };
            fvisitor.run(design, m);

            let mut to_break = cycle[0];
            let mut max_flow = 0.0;
            for &c in &cycle {
                let flow = fvisitor.edge_flow(design, c.0);
                if flow > max_flow {
                    max_flow = flow;
                    to_break = c;
                }
            }

            let preg = design.add_pipeline_register_for(to_break.0);
            let preg_din = design.block(preg).din();
            let preg_dout = design.block(preg).dout();
            t.insert_after(design, to_break.0, preg_din, preg_dout)?;
            count += 1;
            bits += design.output_type(preg_dout).bit_width();
        }

        if count > 0 {
            info!("inserted {count} pipeline registers ({bits} bits) breaking cycles");
        }
        Ok(())
    }
}

/// Give untied multi-output blocks a latch (or register) per output so
/// downstream stages see a uniform one-token-per-edge contract.
pub struct LatchUntiedOutputs {
    pub use_regs: bool,
}

impl ModulePass for LatchUntiedOutputs {
    fn name(&self) -> &'static str {
        "latch-untied-outputs"
    }

    fn run_on_module(&mut self, design: &mut Design, m: ModuleId) -> CompileResult<()> {
        if design.module(m).is_region() {
            return Ok(());
        }
        let t = Transformer::new(m);
        if !t.can_mutate(design) {
            return Ok(());
        }

        let mut count = 0u32;
        for b in design.find_all_blocks(m) {
            let block = design.block(b);
            if block.outputs_tied() || block.outputs.len() <= 1 || block.outputs_separate() {
                continue;
            }
            for op in design.block(b).outputs.clone() {
                let latch = if self.use_regs {
                    design.add_pipeline_register_for(op)
                } else {
                    design.add_latch(op)
                };
                let nip = design.block(latch).din();
                let nop = design.block(latch).dout();
                t.insert_after(design, op, nip, nop)?;
                count += 1;
            }
        }
        if count > 0 {
            info!("inserted {count} latches");
        }
        Ok(())
    }
}

/// Forward delay accumulation against a clock period: when extending a
/// path would reach the period, the source output is selected for
/// pipelining and the accumulator resets behind it.
struct DelayVisitor<'b> {
    backend: &'b dyn Backend,
    period: Time,
    delays: BTreeMap<OutputPortId, Time>,
    pipeline: BTreeSet<OutputPortId>,
    const_ports: BTreeSet<viaduct_ir::port::PortId>,
    mod_out_delays: BTreeMap<OutputPortId, Time>,
}

impl DelayVisitor<'_> {
    fn edge_delay(&self, design: &Design, op: OutputPortId) -> Time {
        if self.pipeline.contains(&op) || self.const_ports.contains(&op.0) {
            return Time::zero();
        }
        let owner = design.output_owner(op);
        if let BlockKind::ModuleRef(_) = design.block(owner).kind {
            return self
                .mod_out_delays
                .get(&op)
                .copied()
                .unwrap_or_else(Time::zero);
        }
        let path = self.delays.get(&op).copied().unwrap_or_else(Time::zero);
        path + self.backend.max_time(design, op)
    }
}

impl Visitor for DelayVisitor<'_> {
    type Dir = Forward;
    type Path = Edge<Forward>;

    fn visit(&mut self, design: &Design, _m: ModuleId, path: &Self::Path) -> Action {
        let (src, dst) = path.end();
        let mut delay = self.edge_delay(design, src);
        delay += self.backend.routing_latency(design, src, dst);

        if delay >= self.period {
            self.pipeline.insert(src);
            delay = Time::zero();
        }

        for op in design.driven_outputs(dst) {
            let entry = self.delays.entry(op).or_insert_with(Time::zero);
            if *entry < delay {
                *entry = delay;
            }
        }
        Action::Continue
    }
}

/// Insert pipeline registers so no combinational path exceeds the target
/// clock period. The module walk runs leaves-first, so a submodule's
/// per-output delays are ready where it is instantiated.
pub struct PipelineFrequencyPass<B: Backend> {
    pub backend: B,
    pub period: Time,
    mod_out_delays: BTreeMap<OutputPortId, Time>,
}

impl<B: Backend> PipelineFrequencyPass<B> {
    pub fn new(backend: B, period: Time) -> Self {
        PipelineFrequencyPass {
            backend,
            period,
            mod_out_delays: BTreeMap::new(),
        }
    }

    fn pipeline_module(&mut self, design: &mut Design, m: ModuleId) -> CompileResult<bool> {
        let t = Transformer::new(m);
        if !t.can_mutate(design) {
            return Ok(false);
        }

        let mut dv = DelayVisitor {
            backend: &self.backend,
            period: self.period,
            delays: BTreeMap::new(),
            pipeline: BTreeSet::new(),
            const_ports: find_constants(design, m).ports,
            mod_out_delays: self.mod_out_delays.clone(),
        };

        // Seed only the module ports and register outputs. Constant cones
        // are zero-delay by decree, and seeding them would visit a join's
        // fan-out before the real critical path arrives at it.
        let mut init: Vec<OutputPortId> = design
            .module(m)
            .port_drivers
            .values()
            .map(|&d| design.block(d).dout())
            .collect();
        for b in design.find_all_blocks(m) {
            if is_pipeline_register(design, b) {
                let dout = design.block(b).dout();
                dv.pipeline.insert(dout);
                init.push(dout);
            }
        }
        for &op in &init {
            dv.delays.insert(op, Time::zero());
        }

        GraphSearch::new(design, m, SearchAlgo::Bfs).go(&mut dv, init);

        let mut inserted = 0u32;
        let mut bits = 0u64;
        for &op in &dv.pipeline {
            if is_pipeline_register(design, design.output_owner(op)) {
                continue;
            }
            if design.count_sinks(m, op) == 0 {
                // Don't pipeline things with no consumer.
                continue;
            }
            let preg = design.add_pipeline_register_for(op);
            let nip = design.block(preg).din();
            let nop = design.block(preg).dout();
            t.insert_after(design, op, nip, nop)?;
            inserted += 1;
            bits += design.output_type(nop).bit_width();
        }
        if inserted > 0 {
            info!(
                "inserted {inserted} pipeline registers ({bits} bits) into '{}' to meet timing",
                design.module(m).name
            );
        }

        // Publish this module's per-output delays for the parent walk.
        for mod_op in design.module_outputs(m) {
            if let Some(sink) = design.sink_of(m, mod_op) {
                if let Some(int_op) = design.find_source(m, sink) {
                    let d = dv.edge_delay(design, int_op);
                    self.mod_out_delays.insert(mod_op, d);
                }
            }
        }

        Ok(inserted > 0)
    }
}

impl<B: Backend> ModulePass for PipelineFrequencyPass<B> {
    fn name(&self) -> &'static str {
        "pipeline-frequency"
    }

    fn run_on_module(&mut self, design: &mut Design, m: ModuleId) -> CompileResult<()> {
        self.pipeline_module(design, m)?;
        design.validity_check(m)
    }
}
