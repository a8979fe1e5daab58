// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Pass wrapper around scheduled-region formation.

use viaduct_ir::design::Design;
use viaduct_ir::port::ModuleId;
use viaduct_ir::CompileResult;
use viaduct_region::form::form_scheduled_regions;

use crate::pass::ModulePass;

pub struct FormScheduledRegionsPass;

impl ModulePass for FormScheduledRegionsPass {
    fn name(&self) -> &'static str {
        "form-scheduled-regions"
    }

    fn run_on_module(&mut self, design: &mut Design, m: ModuleId) -> CompileResult<()> {
        form_scheduled_regions(design, m)?;
        Ok(())
    }
}
