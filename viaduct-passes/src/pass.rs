// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Passes over designs and modules.

use viaduct_ir::CompileResult;
use viaduct_ir::design::Design;
use viaduct_ir::port::ModuleId;

/// A whole-design rewrite or analysis. Returns whether anything changed.
pub trait Pass {
    fn name(&self) -> &'static str;
    fn run(&mut self, design: &mut Design) -> CompileResult<bool>;
}

/// A pass with a per-module hook. The provided [`Pass`] implementation
/// walks every module of the design, submodules included, then calls
/// `finalize` once.
pub trait ModulePass {
    fn name(&self) -> &'static str;
    fn run_on_module(&mut self, design: &mut Design, m: ModuleId) -> CompileResult<()>;

    /// Called after the walk, for passes that accumulate across modules.
    fn finalize(&mut self, _design: &mut Design) -> CompileResult<()> {
        Ok(())
    }
}

/// Sum of all module change counters: a cheap fingerprint of the design's
/// observable connection state.
pub fn design_version(design: &Design) -> u64 {
    design
        .modules
        .values()
        .map(|m| m.conns.change_counter())
        .sum()
}

impl<T: ModulePass> Pass for T {
    fn name(&self) -> &'static str {
        ModulePass::name(self)
    }

    fn run(&mut self, design: &mut Design) -> CompileResult<bool> {
        let before = design_version(design);
        // Leaves first, so passes that publish per-module results (delay
        // caches, schedules) have them ready where the module is used.
        for m in design.all_modules().into_iter().rev() {
            if design.modules.get(m).is_none() {
                continue;
            }
            self.run_on_module(design, m)?;
        }
        self.finalize(design)?;
        Ok(design_version(design) != before)
    }
}

/// Wraps a callable as a module pass.
pub struct LambdaModulePass<F>
where
    F: FnMut(&mut Design, ModuleId) -> CompileResult<()>,
{
    name: &'static str,
    func: F,
}

impl<F> LambdaModulePass<F>
where
    F: FnMut(&mut Design, ModuleId) -> CompileResult<()>,
{
    pub fn new(name: &'static str, func: F) -> Self {
        LambdaModulePass { name, func }
    }
}

impl<F> ModulePass for LambdaModulePass<F>
where
    F: FnMut(&mut Design, ModuleId) -> CompileResult<()>,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn run_on_module(&mut self, design: &mut Design, m: ModuleId) -> CompileResult<()> {
        (self.func)(design, m)
    }
}
