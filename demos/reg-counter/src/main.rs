// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Synthesize a self-feeding register counter.
//!
//! The design is the canonical smallest stateful dataflow graph: a
//! register whose read output feeds an adder with the constant one, and
//! the adder feeds the register's write port. Elaboration lowers the
//! register to an RTL register with a read-side wait; optimization forms
//! scheduled regions, checks for combinational loops and writes the
//! diagnostic artifacts into the working directory.

use std::process::ExitCode;

use clap::Parser;
use log::info;

use viaduct_ir::design::Design;
use viaduct_ir::types::{Type, Value};
use viaduct_passes::driver::synthesize;
use viaduct_passes::options::SynthesisOptions;

/// Command-line arguments.
#[derive(Parser)]
#[command(about = "Register counter synthesis example")]
struct Cli {
    #[command(flatten)]
    options: SynthesisOptions,

    /// Read synthesis options from a YAML file instead of flags.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Simulator wedge to hand the result to. Emission lives outside this
    /// workspace; the flag is accepted and recorded for the collaborator.
    #[arg(long, default_value = "none")]
    wedge: String,

    /// Bus wrapper to generate around the design. Same collaborator
    /// arrangement as `--wedge`.
    #[arg(long, default_value = "none")]
    wrapper: String,

    /// Counter width in bits.
    #[arg(long, default_value_t = 32)]
    width: u32,
}

fn build_counter(design: &mut Design, width: u32) -> viaduct_ir::CompileResult<()> {
    let top = design.new_module("counter");
    let out = design.add_module_output(top, Type::Int(width), Some("output0".to_string()));
    let out_sink = design
        .sink_of(top, out)
        .ok_or_else(|| viaduct_ir::Error::ImplementationError("missing output sink".into()))?;

    let reg = design.add_register(Type::Int(width));
    let one = design.add_constant(Value::int(width, 1));
    let join = design.add_join(vec![Type::Int(width), Type::Int(width)]);
    let add = design.add_int_add(width, width);
    let read_go = design.add_constant(Value::Void);
    let ack_sink = design.add_null_sink(Type::Void);

    let write = design.block(reg).write_iface();
    let read = design.block(reg).read_iface();

    design.connect(top, read.dout, design.inputs(join)[0])?;
    design.connect(top, design.outputs(one)[0], design.inputs(join)[1])?;
    design.connect(top, design.block(join).dout(), design.block(add).din())?;
    design.connect(top, design.block(add).dout(), write.din)?;
    design.connect(top, design.outputs(read_go)[0], read.din)?;
    design.connect(top, write.dout, design.inputs(ack_sink)[0])?;
    design.connect(top, design.block(add).dout(), out_sink)?;
    Ok(())
}

fn run(cli: Cli) -> viaduct_ir::CompileResult<()> {
    let options = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| viaduct_ir::Error::ExternalError(format!("reading config: {e}")))?;
            serde_yaml::from_str(&text)
                .map_err(|e| viaduct_ir::Error::ExternalError(format!("parsing config: {e}")))?
        }
        None => cli.options,
    };

    if cli.wedge != "none" || cli.wrapper != "none" {
        info!(
            "wedge '{}' / wrapper '{}' will be applied by the emission collaborator",
            cli.wedge, cli.wrapper
        );
    }

    let mut design = Design::default();
    build_counter(&mut design, cli.width)?;
    synthesize(&mut design, &options)?;

    for m in design.all_modules() {
        if let Some(schedule) = design.module(m).schedule() {
            info!(
                "region '{}': {} cycles, {} inputs, {} outputs",
                design.module(m).name,
                schedule.clocks(),
                schedule.external_inputs.len(),
                schedule.external_outputs.len()
            );
        }
    }
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
