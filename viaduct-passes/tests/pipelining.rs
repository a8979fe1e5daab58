// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Pipelining and fork-synthesis behaviour.

use viaduct_analysis::queries::find_cycle;
use viaduct_ir::block::BlockKind;
use viaduct_ir::design::Design;
use viaduct_ir::port::ModuleId;
use viaduct_ir::types::Type;
use viaduct_passes::pass::Pass;
use viaduct_passes::pipeline::PipelineCyclesPass;
use viaduct_passes::synthesize_forks::SynthesizeForksPass;

fn count_pregs(design: &Design, m: ModuleId) -> usize {
    design
        .filter_blocks(m, |b| matches!(b.kind, BlockKind::PipelineRegister))
        .len()
}

/// A fork whose branches recombine at one join without a register in
/// between would deadlock the rendezvous: fork synthesis must register
/// the converging branches.
#[test]
fn recombining_fork_branches_get_registers() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let input = design.add_module_input(top, Type::Int(8), Some("input0".to_string()));
    let out = design.add_module_output(
        top,
        Type::Struct(vec![Type::Int(8), Type::Int(8)]),
        Some("output0".to_string()),
    );
    let driver = design.driver_of(top, input).unwrap();
    let out_sink = design.sink_of(top, out).unwrap();

    let fork = design.add_fork(Type::Int(8), false);
    let f0 = design.fork_new_output(fork);
    let f1 = design.fork_new_output(fork);
    let join = design.add_join(vec![Type::Int(8), Type::Int(8)]);

    design.connect(top, driver, design.block(fork).din()).unwrap();
    design.connect(top, f0, design.inputs(join)[0]).unwrap();
    design.connect(top, f1, design.inputs(join)[1]).unwrap();
    design.connect(top, design.block(join).dout(), out_sink).unwrap();

    SynthesizeForksPass { pipeline: false }
        .run(&mut design)
        .unwrap();

    // One register on either fork branch.
    for op in design.block(fork).outputs.clone() {
        let sinks = design.find_sinks(top, op);
        assert_eq!(sinks.len(), 1);
        let owner = design.input_owner(*sinks.iter().next().unwrap());
        assert!(matches!(
            design.block(owner).kind,
            BlockKind::PipelineRegister
        ));
    }

    // And no combinational cycle remains.
    let cycle = find_cycle(&design, top, &|d, b| {
        matches!(d.block(b).kind, BlockKind::PipelineRegister)
    });
    assert!(cycle.is_empty());
}

/// After fork synthesis, every output drives at most one sink.
#[test]
fn fork_synthesis_leaves_point_to_point_channels() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let input = design.add_module_input(top, Type::Int(8), Some("input0".to_string()));
    let driver = design.driver_of(top, input).unwrap();

    let sinks: Vec<_> = (0..3).map(|_| design.add_null_sink(Type::Int(8))).collect();
    for s in &sinks {
        design.connect(top, driver, design.inputs(*s)[0]).unwrap();
    }

    SynthesizeForksPass { pipeline: false }
        .run(&mut design)
        .unwrap();

    for b in design.find_all_blocks(top) {
        for op in design.block(b).outputs.clone() {
            assert!(design.count_sinks(top, op) <= 1);
        }
    }
}

/// Cycle breaking inserts registers until no combinational cycle remains.
#[test]
fn cycle_breaking_reaches_a_registered_fixed_point() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let input = design.add_module_input(top, Type::Int(8), Some("input0".to_string()));
    let driver = design.driver_of(top, input).unwrap();

    // select -> identity -> back into select: a combinational loop.
    let select = design.add_select(2, Type::Int(8));
    let ident = design.add_identity(Type::Int(8));
    let sink = design.add_null_sink(Type::Int(8));
    let tap = design.add_fork(Type::Int(8), false);
    let t0 = design.fork_new_output(tap);
    let t1 = design.fork_new_output(tap);

    design.connect(top, driver, design.inputs(select)[0]).unwrap();
    design
        .connect(top, design.block(select).dout(), design.block(tap).din())
        .unwrap();
    design.connect(top, t0, design.block(ident).din()).unwrap();
    design
        .connect(top, design.block(ident).dout(), design.inputs(select)[1])
        .unwrap();
    design.connect(top, t1, design.inputs(sink)[0]).unwrap();

    assert!(!find_cycle(&design, top, &|_, _| false).is_empty());

    PipelineCyclesPass.run(&mut design).unwrap();

    assert!(count_pregs(&design, top) >= 1);
    let remaining = find_cycle(&design, top, &|d, b| {
        matches!(d.block(b).kind, BlockKind::PipelineRegister)
    });
    assert!(remaining.is_empty());
}

/// A long adder chain against a short clock period picks up registers
/// along the way, so no combinational stretch exceeds the period.
#[test]
fn frequency_pipelining_splits_a_long_chain() {
    use viaduct_ir::types::Value;
    use viaduct_passes::driver::synthesize;
    use viaduct_passes::options::SynthesisOptions;

    let dir = tempfile::tempdir().unwrap();
    let mut design = Design::default();
    let top = design.new_module("top");
    let input = design.add_module_input(top, Type::Int(32), Some("input0".to_string()));
    let out = design.add_module_output(top, Type::Int(32), Some("output0".to_string()));
    let driver = design.driver_of(top, input).unwrap();
    let out_sink = design.sink_of(top, out).unwrap();

    let mut current = driver;
    for _ in 0..10 {
        let c = design.add_constant(Value::int(32, 1));
        let join = design.add_join(vec![Type::Int(32), Type::Int(32)]);
        let add = design.add_int_add(32, 32);
        design.connect(top, current, design.inputs(join)[0]).unwrap();
        design.connect(top, design.outputs(c)[0], design.inputs(join)[1]).unwrap();
        design
            .connect(top, design.block(join).dout(), design.block(add).din())
            .unwrap();
        current = design.block(add).dout();
    }
    design.connect(top, current, out_sink).unwrap();

    let opts = SynthesisOptions {
        clk: Some(500.0),
        control_regions: false,
        work_dir: dir.path().to_path_buf(),
        ..SynthesisOptions::default()
    };
    synthesize(&mut design, &opts).unwrap();

    // Ten adders at ~0.65ns each against a 2ns period: at least three
    // stage boundaries.
    assert!(count_pregs(&design, top) >= 3);
}
