// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Synthesis options.
//!
//! The core has no CLI of its own; collaborators parse flags (or a YAML
//! file) into this structure and hand it to the drivers.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Synchronous,
}

#[derive(Clone, Debug, Parser, Serialize, Deserialize)]
#[command(about = "Viaduct synthesis options")]
pub struct SynthesisOptions {
    /// Target clock frequency in MHz. Unset disables timing-driven
    /// pipelining.
    #[arg(long)]
    pub clk: Option<f64>,

    /// Whether statically scheduled regions are formed.
    #[arg(long, default_value_t = true)]
    pub control_regions: bool,

    /// Which backend the design is refined towards.
    #[arg(long, value_enum, default_value_t = BackendKind::Synchronous)]
    pub backend: BackendKind,

    /// Directory for diagnostic artifacts (graphviz, text dumps, stats).
    #[arg(long, default_value = ".")]
    pub work_dir: PathBuf,

    /// Dump graphviz between passes.
    #[arg(long, default_value_t = false)]
    pub debug_passes: bool,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        SynthesisOptions {
            clk: None,
            control_regions: true,
            backend: BackendKind::Synchronous,
            work_dir: PathBuf::from("."),
            debug_passes: false,
        }
    }
}

impl SynthesisOptions {
    /// The clock period implied by `--clk`, if any.
    pub fn period(&self) -> Option<viaduct_ir::time::Time> {
        self.clk
            .filter(|mhz| *mhz > 0.0)
            .map(|mhz| viaduct_ir::time::Time::seconds(1.0 / (mhz * 1e6)))
    }
}
