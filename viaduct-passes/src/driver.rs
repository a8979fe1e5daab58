// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The elaboration and optimization drivers.
//!
//! Elaboration refines every module down to the backend's primitive set,
//! bounded by a hard pass cap. Optimization runs the standard pass
//! pipeline: simplify, form scheduled regions, bundle dependent outputs,
//! latch, synthesize forks, pipeline to frequency, break cycles, check,
//! print.

use log::error;

use viaduct_ir::CompileResult;
use viaduct_ir::design::Design;
use viaduct_ir::history::HistorySource;
use viaduct_refine::refiners::standard_refiners;
use viaduct_refine::refinery::refine_module;
use viaduct_refine::stop::StopCondition;

use crate::backend::{Backend, SynchronousBackend};
use crate::checks::{CheckConnectionsPass, CheckCyclesPass, CheckOutputsPass};
use crate::manager::PassManager;
use crate::options::SynthesisOptions;
use crate::pass::ModulePass;
use crate::pipeline::{
    LatchUntiedOutputs, PipelineCyclesPass, PipelineDependentsPass, PipelineFrequencyPass,
};
use crate::print::{GraphvizPass, StatsPrinterPass, TextPrinterPass};
use crate::regions::FormScheduledRegionsPass;
use crate::simplify::SimplifyPass;
use crate::synthesize_forks::SynthesizeForksPass;
use crate::synthesize_mem::SynthesizeMemoryPass;

/// Per-module ceiling on refinement rounds. A watchdog, not a tuning knob.
const MAX_REFINEMENT_PASSES: u32 = 100;

/// Refine every module of the design to the backend primitive set.
///
/// Blocks that cannot be refined are reported and left in place; the
/// checks passes surface them again later.
pub fn elaborate(design: &mut Design, _opts: &SynthesisOptions) -> CompileResult<()> {
    // Anything the frontend left unstamped belongs to the frontend.
    for m in design.all_modules() {
        for b in design.find_all_blocks(m) {
            if design.block(b).history.source() == HistorySource::Unset {
                design.block_mut(b).history.set_frontend("");
            }
        }
    }

    let backend = SynchronousBackend::default();
    let stop = backend.primitive_stops();

    for m in design.all_modules() {
        design.validity_check(m)?;

        SynthesizeMemoryPass.run_on_module(design, m)?;

        let mut collection = standard_refiners();
        let mut refined = false;
        for _ in 0..MAX_REFINEMENT_PASSES {
            let rounds = refine_module(design, m, &mut collection, Some(&stop))?;
            refined = stop.refined(design, &design.find_all_blocks(m));
            if refined || rounds == 0 {
                break;
            }
        }

        for b in design.find_all_blocks(m) {
            if design.block(b).history.source() == HistorySource::Unset {
                let history = &mut design.block_mut(b).history;
                history.set_unknown();
                history.set_meta("elaboration");
            }
        }
        design.validity_check(m)?;

        if !refined {
            error!("could not finish refining '{}'", design.module(m).name);
            for b in stop.unrefined(design, &design.find_all_blocks(m)) {
                error!(
                    "    remaining: {} {}",
                    design.block(b).kind.kind_name(),
                    design.block(b).print()
                );
            }
        }
    }
    Ok(())
}

/// The standard optimization pipeline for these options.
pub fn build_optimizations(opts: &SynthesisOptions) -> PassManager {
    let mut pm = PassManager::default();
    let dir = opts.work_dir.clone();
    let clocked = opts.period().is_some();

    if opts.control_regions {
        pm.append(Box::new(SimplifyPass));
        pm.append(Box::new(FormScheduledRegionsPass));
    }
    pm.append(Box::new(SimplifyPass));
    pm.append(Box::new(PipelineDependentsPass));
    pm.append(Box::new(LatchUntiedOutputs { use_regs: clocked }));
    pm.append(Box::new(SynthesizeForksPass { pipeline: clocked }));
    if let Some(period) = opts.period() {
        pm.append(Box::new(PipelineFrequencyPass::new(
            SynchronousBackend::default(),
            period,
        )));
    }
    pm.append(Box::new(PipelineCyclesPass));

    pm.append(Box::new(CheckConnectionsPass));
    pm.append(Box::new(CheckOutputsPass::default()));
    pm.append(Box::new(CheckCyclesPass));

    pm.append(Box::new(TextPrinterPass::new("final", dir.clone())));
    pm.append(Box::new(StatsPrinterPass::new("final", dir.clone())));
    pm.append(Box::new(GraphvizPass::new("final", dir)));
    pm
}

/// Run the optimization pipeline and stamp the history of anything a pass
/// created without saying so.
pub fn optimize(design: &mut Design, opts: &SynthesisOptions) -> CompileResult<bool> {
    let mut manager = build_optimizations(opts);
    if opts.debug_passes {
        manager.debug_into(opts.work_dir.clone());
    }
    let changed = manager.run(design)?;

    for m in design.all_modules() {
        for b in design.find_all_blocks(m) {
            if design.block(b).history.source() == HistorySource::Unset {
                let history = &mut design.block_mut(b).history;
                history.set_optimization(None);
                history.set_meta("(unknown which optimization)");
            }
        }
    }
    Ok(changed)
}

/// Elaborate then optimize.
pub fn synthesize(design: &mut Design, opts: &SynthesisOptions) -> CompileResult<()> {
    elaborate(design, opts)?;
    optimize(design, opts)?;
    Ok(())
}
