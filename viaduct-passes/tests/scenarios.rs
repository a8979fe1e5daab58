// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! End-to-end synthesis scenarios.

use viaduct_ir::block::BlockKind;
use viaduct_ir::design::Design;
use viaduct_ir::port::ModuleId;
use viaduct_ir::types::{Type, Value};
use viaduct_passes::driver::synthesize;
use viaduct_passes::options::SynthesisOptions;

fn options_in(dir: &tempfile::TempDir) -> SynthesisOptions {
    SynthesisOptions {
        work_dir: dir.path().to_path_buf(),
        ..SynthesisOptions::default()
    }
}

fn regions_of(design: &Design, m: ModuleId) -> Vec<ModuleId> {
    design
        .find_all_blocks(m)
        .into_iter()
        .filter_map(|b| match design.block(b).kind {
            BlockKind::ModuleRef(sub) if design.module(sub).is_region() => Some(sub),
            _ => None,
        })
        .collect()
}

fn count_kind(design: &Design, m: ModuleId, probe: fn(&BlockKind) -> bool) -> usize {
    design
        .find_all_blocks(m)
        .into_iter()
        .filter(|&b| probe(&design.block(b).kind))
        .count()
}

/// A single 32-bit adder over two constants folds and schedules into one
/// region of one cycle with one 32-bit output.
#[test]
fn single_adder_synthesizes_to_one_region() {
    let dir = tempfile::tempdir().unwrap();
    let mut design = Design::default();
    let top = design.new_module("top");
    let out = design.add_module_output(top, Type::Int(32), Some("output0".to_string()));
    let out_sink = design.sink_of(top, out).unwrap();

    let c3 = design.add_constant(Value::int(32, 3));
    let c5 = design.add_constant(Value::int(32, 5));
    let join = design.add_join(vec![Type::Int(32), Type::Int(32)]);
    let add = design.add_int_add(32, 32);

    design.connect(top, design.outputs(c3)[0], design.inputs(join)[0]).unwrap();
    design.connect(top, design.outputs(c5)[0], design.inputs(join)[1]).unwrap();
    design
        .connect(top, design.block(join).dout(), design.block(add).din())
        .unwrap();
    design.connect(top, design.block(add).dout(), out_sink).unwrap();

    synthesize(&mut design, &options_in(&dir)).unwrap();

    let regions = regions_of(&design, top);
    assert_eq!(regions.len(), 1);
    let schedule = design.module(regions[0]).schedule().unwrap();
    assert_eq!(schedule.clocks(), 1);
    assert_eq!(schedule.external_outputs.len(), 1);
    let ext_out = *schedule.external_outputs.iter().next().unwrap();
    assert_eq!(design.output_type(ext_out), &Type::Int(32));

    // The add folded away: the region computes a constant 8.
    let consts: Vec<_> = design
        .find_all_blocks(regions[0])
        .into_iter()
        .filter_map(|b| match &design.block(b).kind {
            BlockKind::Constant { value } => value.as_int(),
            _ => None,
        })
        .collect();
    assert_eq!(consts, vec![8]);

    // Diagnostics landed in the working directory.
    let gv_files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|x| x == "gv"))
        .collect();
    assert!(!gv_files.is_empty());
    assert!(dir.path().join("statsfinal.csv").exists());
}

/// A register whose read output feeds an adder feeding its own write port:
/// the register breaks the combinational cycle and the design schedules.
#[test]
fn self_dependent_counter_passes_cycle_checks() {
    let dir = tempfile::tempdir().unwrap();
    let mut design = Design::default();
    let top = design.new_module("top");
    let out = design.add_module_output(top, Type::Int(32), Some("output0".to_string()));
    let out_sink = design.sink_of(top, out).unwrap();

    let reg = design.add_register(Type::Int(32));
    let one = design.add_constant(Value::int(32, 1));
    let join = design.add_join(vec![Type::Int(32), Type::Int(32)]);
    let add = design.add_int_add(32, 32);
    let read_go = design.add_constant(Value::Void);
    let ack_sink = design.add_null_sink(Type::Void);

    let write = design.block(reg).write_iface();
    let read = design.block(reg).read_iface();

    design.connect(top, read.dout, design.inputs(join)[0]).unwrap();
    design.connect(top, design.outputs(one)[0], design.inputs(join)[1]).unwrap();
    design
        .connect(top, design.block(join).dout(), design.block(add).din())
        .unwrap();
    design.connect(top, design.block(add).dout(), write.din).unwrap();
    design.connect(top, design.outputs(read_go)[0], read.din).unwrap();
    design.connect(top, write.dout, design.inputs(ack_sink)[0]).unwrap();
    design.connect(top, design.block(add).dout(), out_sink).unwrap();

    // Synthesize runs the cycle checks; a combinational loop would error.
    synthesize(&mut design, &options_in(&dir)).unwrap();

    // The register lowered to an RTL register.
    assert_eq!(
        count_kind(&design, top, |k| matches!(k, BlockKind::Register)),
        0
    );

    // At least one region scheduled with a positive latency.
    let regions = regions_of(&design, top);
    assert!(!regions.is_empty());
    for r in &regions {
        assert!(design.module(*r).schedule().unwrap().clocks() >= 1);
    }
}

/// A Split with consumers on fields 0 and 2: the dependents pass leaves
/// three Extracts, two used, all behind one virtual Fork.
#[test]
fn split_becomes_extracts_behind_a_virtual_fork() {
    use viaduct_passes::pass::Pass;
    use viaduct_passes::pipeline::PipelineDependentsPass;

    let mut design = Design::default();
    let top = design.new_module("top");
    let ty = Type::Struct(vec![Type::Int(8), Type::Int(8), Type::Int(8)]);
    let input = design.add_module_input(top, ty.clone(), Some("input0".to_string()));
    let driver = design.driver_of(top, input).unwrap();

    let split = design.add_split(ty).unwrap();
    let sink0 = design.add_null_sink(Type::Int(8));
    let sink2 = design.add_null_sink(Type::Int(8));

    design.connect(top, driver, design.block(split).din()).unwrap();
    let split_outs = design.block(split).outputs.clone();
    design.connect(top, split_outs[0], design.inputs(sink0)[0]).unwrap();
    design.connect(top, split_outs[2], design.inputs(sink2)[0]).unwrap();

    PipelineDependentsPass.run(&mut design).unwrap();

    assert_eq!(
        count_kind(&design, top, |k| matches!(k, BlockKind::Split)),
        0
    );
    assert_eq!(
        count_kind(&design, top, |k| matches!(k, BlockKind::Extract { .. })),
        3
    );

    // All extracts hang off one virtual fork fed by the module input.
    let forks = design.filter_blocks(top, |b| matches!(b.kind, BlockKind::Fork { virt: true }));
    assert_eq!(forks.len(), 1);
    let fork = forks[0];
    assert_eq!(design.find_source(top, design.block(fork).din()), Some(driver));
    assert_eq!(design.block(fork).outputs.len(), 3);

    let used: usize = design
        .filter_blocks(top, |b| matches!(b.kind, BlockKind::Extract { .. }))
        .into_iter()
        .filter(|&e| design.count_sinks(top, design.block(e).dout()) > 0)
        .count();
    assert_eq!(used, 2);
}
