// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Ordered pass execution.

use std::path::PathBuf;

use log::{debug, info};

use viaduct_ir::CompileResult;
use viaduct_ir::design::Design;

use crate::pass::Pass;
use crate::print::write_graphviz;

/// Runs passes in order. In debug mode, every module is dumped as
/// graphviz between passes.
#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
    debug_dir: Option<PathBuf>,
}

impl PassManager {
    pub fn append(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    /// Dump graphviz into this directory between passes.
    pub fn debug_into(&mut self, dir: PathBuf) {
        self.debug_dir = Some(dir);
    }

    pub fn run(&mut self, design: &mut Design) -> CompileResult<bool> {
        let mut changed = false;
        for (i, pass) in self.passes.iter_mut().enumerate() {
            info!("running pass '{}'", pass.name());
            changed |= pass.run(design)?;

            if let Some(dir) = &self.debug_dir {
                for m in design.all_modules() {
                    let fname = dir.join(format!(
                        "{}_debug{:03}_{}.gv",
                        design.module(m).name,
                        i,
                        pass.name()
                    ));
                    if let Err(e) = write_graphviz(design, m, &fname) {
                        debug!("debug dump failed: {e}");
                    }
                }
            }
        }
        Ok(changed)
    }
}
