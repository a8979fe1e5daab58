// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! `viaduct-passes` - The pass framework and the optimization pipeline.
//!
//! A [`Pass`](crate::pass::Pass) rewrites a whole design;
//! [module passes](crate::pass::ModulePass) get a per-module hook and a
//! walker that recurses into submodules. The
//! [`PassManager`](crate::manager::PassManager) runs an ordered list.
//!
//! The standard pipeline (see [`driver`]) refines a frontend-built design
//! to backend primitives, simplifies, carves out scheduled regions,
//! pipelines against the clock target, synthesizes forks, and checks the
//! result, writing graphviz/text/stats diagnostics along the way.

pub mod backend;
pub mod checks;
pub mod driver;
pub mod manager;
pub mod options;
pub mod pass;
pub mod pipeline;
pub mod print;
pub mod regions;
pub mod simplify;
pub mod synthesize_forks;
pub mod synthesize_mem;
pub mod transform;
