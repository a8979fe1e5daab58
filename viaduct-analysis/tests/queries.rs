// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use viaduct_analysis::queries::{
    find_consumers, find_constants, find_cycle, find_dependencies, find_dominators,
    module_has_cycle, token_order_analysis,
};
use viaduct_ir::block::BlockKind;
use viaduct_ir::design::Design;
use viaduct_ir::port::InputType;
use viaduct_ir::types::{Type, Value};

#[test]
fn find_cycle_returns_a_closed_edge_list() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let ext = design.add_module_input(top, Type::Int(8), None);
    let driver = design.driver_of(top, ext).unwrap();

    // A select whose second input is fed back through an identity.
    let select = design.add_select(2, Type::Int(8));
    let ident = design.add_identity(Type::Int(8));
    design.connect(top, driver, design.inputs(select)[0]).unwrap();
    design
        .connect(top, design.block(select).dout(), design.block(ident).din())
        .unwrap();
    design
        .connect(top, design.block(ident).dout(), design.inputs(select)[1])
        .unwrap();

    let cycle = find_cycle(&design, top, &|_, _| false);
    assert!(!cycle.is_empty());
    // Every edge exists in the database, and the list closes on itself.
    for (op, ip) in &cycle {
        assert!(design.find_sinks(top, *op).contains(ip));
    }
    let first_src = design.output_owner(cycle[0].0);
    let last_sink = design.input_owner(cycle.last().unwrap().1);
    assert_eq!(first_src, last_sink);
    assert!(module_has_cycle(&design, top));
}

#[test]
fn find_cycle_honours_the_ignore_filter() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let ext = design.add_module_input(top, Type::Int(8), None);
    let driver = design.driver_of(top, ext).unwrap();

    let select = design.add_select(2, Type::Int(8));
    let preg = design.add_pipeline_register(Type::Int(8));
    design.connect(top, driver, design.inputs(select)[0]).unwrap();
    design
        .connect(top, design.block(select).dout(), design.block(preg).din())
        .unwrap();
    design
        .connect(top, design.block(preg).dout(), design.inputs(select)[1])
        .unwrap();

    let cycle = find_cycle(&design, top, &|d, b| {
        matches!(d.block(b).kind, BlockKind::PipelineRegister)
    });
    assert!(cycle.is_empty());
}

#[test]
fn constants_propagate_and_grow_monotonically() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let ext = design.add_module_input(top, Type::Int(8), None);
    let driver = design.driver_of(top, ext).unwrap();

    let c0 = design.add_constant(Value::int(8, 3));
    let join = design.add_join(vec![Type::Int(8), Type::Int(8)]);
    let add = design.add_int_add(8, 8);
    let sink = design.add_null_sink(Type::Int(8));

    design.connect(top, design.outputs(c0)[0], design.inputs(join)[0]).unwrap();
    design.connect(top, driver, design.inputs(join)[1]).unwrap();
    design
        .connect(top, design.block(join).dout(), design.block(add).din())
        .unwrap();
    design
        .connect(top, design.block(add).dout(), design.inputs(sink)[0])
        .unwrap();

    // One join input is external, so nothing downstream is constant.
    let consts = find_constants(&design, top);
    assert!(consts.blocks.contains(&c0));
    assert!(!consts.blocks.contains(&join));

    // Replacing the external feed with a constant grows the constant set.
    design.disconnect(top, driver, design.inputs(join)[1]);
    let c1 = design.add_constant(Value::int(8, 5));
    design.connect(top, design.outputs(c1)[0], design.inputs(join)[1]).unwrap();

    let bigger = find_constants(&design, top);
    assert!(bigger.blocks.contains(&join));
    assert!(bigger.blocks.contains(&add));
    assert!(consts.ports.is_subset(&bigger.ports));
}

#[test]
fn dominators_include_every_upstream_block() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let c = design.add_constant(Value::int(8, 1));
    let ident = design.add_identity(Type::Int(8));
    let sink = design.add_null_sink(Type::Int(8));

    design.connect(top, design.outputs(c)[0], design.block(ident).din()).unwrap();
    design
        .connect(top, design.block(ident).dout(), design.inputs(sink)[0])
        .unwrap();

    let doms = find_dominators(&design, top, sink);
    assert!(doms.contains(&ident));
    assert!(doms.contains(&c));
    assert!(!doms.contains(&sink));
}

#[test]
fn dependencies_fold_through_the_rule_monoid() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let c0 = design.add_constant(Value::int(8, 1));
    let c1 = design.add_constant(Value::int(8, 2));
    let join = design.add_join(vec![Type::Int(8), Type::Int(8)]);
    let sink = design.add_null_sink(Type::Struct(vec![Type::Int(8), Type::Int(8)]));

    design.connect(top, design.outputs(c0)[0], design.inputs(join)[0]).unwrap();
    design.connect(top, design.outputs(c1)[0], design.inputs(join)[1]).unwrap();
    design
        .connect(top, design.block(join).dout(), design.inputs(sink)[0])
        .unwrap();

    let (deps, rule) = find_dependencies(&design, top, design.inputs(sink)[0]);
    // The terminal sources are the two constants.
    assert_eq!(deps.len(), 2);
    assert_eq!(rule.input_type, InputType::And);

    // Mixing in a select collapses the combined input type to Custom.
    let sel = design.add_select(1, Type::Int(8));
    let sink2 = design.add_null_sink(Type::Int(8));
    design.disconnect(top, design.outputs(c1)[0], design.inputs(join)[1]);
    design.connect(top, design.outputs(c1)[0], design.inputs(sel)[0]).unwrap();
    design
        .connect(top, design.block(sel).dout(), design.inputs(sink2)[0])
        .unwrap();
    let (_, rule) = find_dependencies(&design, top, design.inputs(sink2)[0]);
    assert_eq!(rule.input_type, InputType::Custom);
}

#[test]
fn consumers_stop_at_ignored_blocks() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let c = design.add_constant(Value::int(8, 1));
    let fork = design.add_fork(Type::Int(8), false);
    let f0 = design.fork_new_output(fork);
    let f1 = design.fork_new_output(fork);
    let preg = design.add_pipeline_register(Type::Int(8));
    let sink_a = design.add_null_sink(Type::Int(8));
    let sink_b = design.add_null_sink(Type::Int(8));

    design.connect(top, design.outputs(c)[0], design.block(fork).din()).unwrap();
    design.connect(top, f0, design.inputs(sink_a)[0]).unwrap();
    design.connect(top, f1, design.block(preg).din()).unwrap();
    design
        .connect(top, design.block(preg).dout(), design.inputs(sink_b)[0])
        .unwrap();

    let ignore_pregs = |d: &Design, b: viaduct_ir::port::BlockId| {
        matches!(d.block(b).kind, BlockKind::PipelineRegister)
    };
    let direct = find_consumers(&design, top, f0, &ignore_pregs);
    assert!(direct.contains(&design.inputs(sink_a)[0]));

    // The path through the pipeline register is cut off.
    let behind_reg = find_consumers(&design, top, f1, &ignore_pregs);
    assert!(!behind_reg.contains(&design.inputs(sink_b)[0]));
}

#[test]
fn token_order_sees_a_single_source_chain() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let ext = design.add_module_input(top, Type::Int(8), None);
    let driver = design.driver_of(top, ext).unwrap();
    let ident = design.add_identity(Type::Int(8));
    let sink = design.add_null_sink(Type::Int(8));

    design.connect(top, driver, design.block(ident).din()).unwrap();
    design
        .connect(top, design.block(ident).dout(), design.inputs(sink)[0])
        .unwrap();

    let order =
        token_order_analysis(&design, top, driver.0, design.inputs(sink)[0].0).unwrap();
    assert!(order.found_source);
    assert!(order.single_source);
    assert!(!order.reorder_potential);
    assert!(!order.cyclic);
}
