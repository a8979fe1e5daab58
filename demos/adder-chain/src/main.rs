// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Pipeline a chain of adders against a clock target.
//!
//! Builds a configurable chain of 32-bit increments and synthesizes it
//! with a target clock frequency, then reports how many pipeline
//! registers the frequency pass had to insert to meet the period.

use std::process::ExitCode;

use clap::Parser;
use log::info;

use viaduct_ir::block::BlockKind;
use viaduct_ir::design::Design;
use viaduct_ir::types::{Type, Value};
use viaduct_passes::driver::synthesize;
use viaduct_passes::options::SynthesisOptions;

/// Command-line arguments.
#[derive(Parser)]
#[command(about = "Adder chain pipelining example")]
struct Cli {
    #[command(flatten)]
    options: SynthesisOptions,

    /// Number of adders in the chain.
    #[arg(long, default_value_t = 10)]
    stages: usize,
}

fn build_chain(design: &mut Design, stages: usize) -> viaduct_ir::CompileResult<()> {
    let top = design.new_module("chain");
    let input = design.add_module_input(top, Type::Int(32), Some("input0".to_string()));
    let out = design.add_module_output(top, Type::Int(32), Some("output0".to_string()));
    let driver = design
        .driver_of(top, input)
        .ok_or_else(|| viaduct_ir::Error::ImplementationError("missing input driver".into()))?;
    let out_sink = design
        .sink_of(top, out)
        .ok_or_else(|| viaduct_ir::Error::ImplementationError("missing output sink".into()))?;

    let mut current = driver;
    for _ in 0..stages {
        let c = design.add_constant(Value::int(32, 1));
        let join = design.add_join(vec![Type::Int(32), Type::Int(32)]);
        let add = design.add_int_add(32, 32);
        design.connect(top, current, design.inputs(join)[0])?;
        design.connect(top, design.outputs(c)[0], design.inputs(join)[1])?;
        design.connect(top, design.block(join).dout(), design.block(add).din())?;
        current = design.block(add).dout();
    }
    design.connect(top, current, out_sink)?;
    Ok(())
}

fn run(cli: Cli) -> viaduct_ir::CompileResult<()> {
    let mut design = Design::default();
    build_chain(&mut design, cli.stages)?;
    synthesize(&mut design, &cli.options)?;

    let mut registers = 0usize;
    for m in design.all_modules() {
        registers += design
            .filter_blocks(m, |b| matches!(b.kind, BlockKind::PipelineRegister))
            .len();
    }
    info!(
        "{} stages at {:?} MHz: {} pipeline registers",
        cli.stages, cli.options.clk, registers
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
