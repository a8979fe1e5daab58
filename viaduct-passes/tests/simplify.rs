// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Simplification behaviour: constant folding, split/join elimination,
//! input canonicalization and wait pruning.

use viaduct_ir::block::BlockKind;
use viaduct_ir::design::Design;
use viaduct_ir::types::{Type, Value};
use viaduct_passes::pass::Pass;
use viaduct_passes::simplify::{CanonicalizeInputsPass, SimplifyPass, SimplifyWaitsPass};

#[test]
fn constants_fold_through_pure_blocks() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let c3 = design.add_constant(Value::int(8, 3));
    let c4 = design.add_constant(Value::int(8, 4));
    let join = design.add_join(vec![Type::Int(8), Type::Int(8)]);
    let add = design.add_int_add(8, 8);
    let sink = design.add_null_sink(Type::Int(8));

    design.connect(top, design.outputs(c3)[0], design.inputs(join)[0]).unwrap();
    design.connect(top, design.outputs(c4)[0], design.inputs(join)[1]).unwrap();
    design
        .connect(top, design.block(join).dout(), design.block(add).din())
        .unwrap();
    design
        .connect(top, design.block(add).dout(), design.inputs(sink)[0])
        .unwrap();

    SimplifyPass.run(&mut design).unwrap();

    // The whole cone folded into a single constant 7 feeding the sink.
    let source = design.find_source(top, design.inputs(sink)[0]).unwrap();
    match &design.block(design.output_owner(source)).kind {
        BlockKind::Constant { value } => assert_eq!(value.as_int(), Some(7)),
        other => panic!("expected a folded constant, got {other:?}"),
    }
    assert!(design.filter_blocks(top, |b| matches!(b.kind, BlockKind::IntAdd)).is_empty());
}

#[test]
fn identity_chains_disappear() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let input = design.add_module_input(top, Type::Int(8), Some("input0".to_string()));
    let driver = design.driver_of(top, input).unwrap();
    let a = design.add_identity(Type::Int(8));
    let b = design.add_identity(Type::Int(8));
    let sink = design.add_null_sink(Type::Int(8));

    design.connect(top, driver, design.block(a).din()).unwrap();
    design.connect(top, design.block(a).dout(), design.block(b).din()).unwrap();
    design.connect(top, design.block(b).dout(), design.inputs(sink)[0]).unwrap();

    SimplifyPass.run(&mut design).unwrap();

    assert_eq!(design.find_source(top, design.inputs(sink)[0]), Some(driver));
    assert!(design.filter_blocks(top, |b| matches!(b.kind, BlockKind::Identity)).is_empty());
}

#[test]
fn matched_split_join_pairs_vanish() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let ty = Type::Struct(vec![Type::Int(4), Type::Int(4)]);
    let input = design.add_module_input(top, ty.clone(), Some("input0".to_string()));
    let driver = design.driver_of(top, input).unwrap();

    let split = design.add_split(ty.clone()).unwrap();
    let join = design.add_join(vec![Type::Int(4), Type::Int(4)]);
    let sink = design.add_null_sink(ty);

    design.connect(top, driver, design.block(split).din()).unwrap();
    let split_outs = design.block(split).outputs.clone();
    design.connect(top, split_outs[0], design.inputs(join)[0]).unwrap();
    design.connect(top, split_outs[1], design.inputs(join)[1]).unwrap();
    design
        .connect(top, design.block(join).dout(), design.inputs(sink)[0])
        .unwrap();

    SimplifyPass.run(&mut design).unwrap();

    assert_eq!(design.find_source(top, design.inputs(sink)[0]), Some(driver));
    assert!(design.filter_blocks(top, |b| matches!(b.kind, BlockKind::Split)).is_empty());
    assert!(design.filter_blocks(top, |b| matches!(b.kind, BlockKind::Join)).is_empty());
}

#[test]
fn canonicalization_collapses_extract_chains() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let inner = Type::Struct(vec![Type::Int(8), Type::Int(8)]);
    let outer = Type::Struct(vec![Type::Int(4), inner.clone()]);
    let input = design.add_module_input(top, outer.clone(), Some("input0".to_string()));
    let driver = design.driver_of(top, input).unwrap();

    // Two chained extracts: outer[1] then inner[0].
    let e1 = design.add_extract(outer, vec![1]).unwrap();
    let e2 = design.add_extract(inner, vec![0]).unwrap();
    let sink = design.add_null_sink(Type::Int(8));

    design.connect(top, driver, design.block(e1).din()).unwrap();
    design
        .connect(top, design.block(e1).dout(), design.block(e2).din())
        .unwrap();
    design
        .connect(top, design.block(e2).dout(), design.inputs(sink)[0])
        .unwrap();

    CanonicalizeInputsPass.run(&mut design).unwrap();

    // The sink now reads through a single two-step extract straight off
    // the module input.
    let source = design.find_source(top, design.inputs(sink)[0]).unwrap();
    let owner = design.output_owner(source);
    match &design.block(owner).kind {
        BlockKind::Extract { path } => assert_eq!(path, &vec![1, 0]),
        other => panic!("expected a collapsed extract, got {other:?}"),
    }
    assert_eq!(design.find_source(top, design.block(owner).din()), Some(driver));
}

#[test]
fn dominated_wait_controls_are_dropped() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let input = design.add_module_input(top, Type::Int(8), Some("input0".to_string()));
    let driver = design.driver_of(top, input).unwrap();

    // The wait's control is derived from the same token as its data, so
    // the control adds no ordering.
    let fork = design.add_fork(Type::Int(8), false);
    let f0 = design.fork_new_output(fork);
    let f1 = design.fork_new_output(fork);
    let wait = design.add_wait(Type::Int(8));
    let control = design.add_wait_control(wait, Type::Int(8));
    let sink = design.add_null_sink(Type::Int(8));

    design.connect(top, driver, design.block(fork).din()).unwrap();
    design.connect(top, f0, design.block(wait).din()).unwrap();
    design.connect(top, f1, control).unwrap();
    design
        .connect(top, design.block(wait).dout(), design.inputs(sink)[0])
        .unwrap();

    SimplifyWaitsPass.run(&mut design).unwrap();

    assert!(design.filter_blocks(top, |b| matches!(b.kind, BlockKind::Wait)).is_empty());
    assert_eq!(design.find_source(top, design.inputs(sink)[0]), Some(f0));
}
