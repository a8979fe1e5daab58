// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use viaduct_ir::Error;
use viaduct_ir::design::Design;
use viaduct_ir::types::{Type, Value};

#[test]
fn connect_then_find_source_is_identity() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let c = design.add_constant(Value::int(8, 3));
    let sink = design.add_null_sink(Type::Int(8));
    let dout = design.outputs(c)[0];
    let din = design.inputs(sink)[0];

    design.connect(top, dout, din).unwrap();
    assert_eq!(design.find_source(top, din), Some(dout));
    assert!(design.find_sinks(top, dout).contains(&din));
    assert_eq!(design.count_sinks(top, dout), 1);
}

#[test]
fn connect_rejects_type_mismatch() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let c = design.add_constant(Value::int(8, 3));
    let sink = design.add_null_sink(Type::Int(16));
    let dout = design.outputs(c)[0];
    let din = design.inputs(sink)[0];

    match design.connect(top, dout, din) {
        Err(Error::TypeError(_)) => {}
        other => panic!("expected a type error, got {other:?}"),
    }
}

#[test]
fn input_accepts_at_most_one_driver() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let c0 = design.add_constant(Value::int(8, 1));
    let c1 = design.add_constant(Value::int(8, 2));
    let sink = design.add_null_sink(Type::Int(8));
    let din = design.inputs(sink)[0];

    design.connect(top, design.outputs(c0)[0], din).unwrap();
    assert!(design.connect(top, design.outputs(c1)[0], din).is_err());
    // Re-connecting the same pair is a no-op, not an error.
    design.connect(top, design.outputs(c0)[0], din).unwrap();
}

#[test]
fn disconnect_restores_prior_state() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let c = design.add_constant(Value::int(8, 3));
    let sink = design.add_null_sink(Type::Int(8));
    let dout = design.outputs(c)[0];
    let din = design.inputs(sink)[0];

    design.connect(top, dout, din).unwrap();
    design.disconnect(top, dout, din);
    assert_eq!(design.find_source(top, din), None);
    assert_eq!(design.count_sinks(top, dout), 0);
    assert!(design.find_all_blocks(top).is_empty());
}

#[test]
fn change_counter_strictly_increases() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let c = design.add_constant(Value::int(8, 3));
    let sink = design.add_null_sink(Type::Int(8));
    let dout = design.outputs(c)[0];
    let din = design.inputs(sink)[0];

    let c0 = design.module(top).conns.change_counter();
    design.connect(top, dout, din).unwrap();
    let c1 = design.module(top).conns.change_counter();
    assert!(c1 > c0);
    design.disconnect(top, dout, din);
    let c2 = design.module(top).conns.change_counter();
    assert!(c2 > c1);
}

#[test]
fn remap_output_moves_fanout() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let old = design.add_constant(Value::int(8, 1));
    let new = design.add_constant(Value::int(8, 2));
    let sink_a = design.add_null_sink(Type::Int(8));
    let sink_b = design.add_null_sink(Type::Int(8));
    let old_out = design.outputs(old)[0];
    let new_out = design.outputs(new)[0];

    design.connect(top, old_out, design.inputs(sink_a)[0]).unwrap();
    design.connect(top, old_out, design.inputs(sink_b)[0]).unwrap();
    design.remap_output(top, old_out, new_out).unwrap();

    assert_eq!(design.count_sinks(top, old_out), 0);
    assert_eq!(design.count_sinks(top, new_out), 2);
    assert_eq!(design.find_source(top, design.inputs(sink_a)[0]), Some(new_out));
}

#[test]
fn remap_input_reroutes_driver() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let c = design.add_constant(Value::int(8, 1));
    let old_sink = design.add_null_sink(Type::Int(8));
    let new_a = design.add_null_sink(Type::Int(8));
    let new_b = design.add_null_sink(Type::Int(8));
    let dout = design.outputs(c)[0];
    let old_in = design.inputs(old_sink)[0];

    design.connect(top, dout, old_in).unwrap();
    design
        .remap_input(top, old_in, vec![design.inputs(new_a)[0], design.inputs(new_b)[0]])
        .unwrap();

    assert_eq!(design.find_source(top, old_in), None);
    assert_eq!(design.find_source(top, design.inputs(new_a)[0]), Some(dout));
    assert_eq!(design.find_source(top, design.inputs(new_b)[0]), Some(dout));
}

#[test]
fn queued_remap_applies_on_later_connect() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let c = design.add_constant(Value::int(8, 1));
    let old_sink = design.add_null_sink(Type::Int(8));
    let new_sink = design.add_null_sink(Type::Int(8));
    let dout = design.outputs(c)[0];
    let old_in = design.inputs(old_sink)[0];
    let new_in = design.inputs(new_sink)[0];

    // No connection exists on old_in yet; the remap queues.
    design.remap_input(top, old_in, vec![new_in]).unwrap();
    design.connect(top, dout, old_in).unwrap();

    assert_eq!(design.find_source(top, old_in), None);
    assert_eq!(design.find_source(top, new_in), Some(dout));
}

#[test]
fn use_counts_govern_membership() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let c = design.add_constant(Value::int(8, 1));
    let fork = design.add_fork(Type::Int(8), false);
    let f0 = design.fork_new_output(fork);
    let f1 = design.fork_new_output(fork);
    let sink_a = design.add_null_sink(Type::Int(8));
    let sink_b = design.add_null_sink(Type::Int(8));

    design.connect(top, design.outputs(c)[0], design.block(fork).din()).unwrap();
    design.connect(top, f0, design.inputs(sink_a)[0]).unwrap();
    design.connect(top, f1, design.inputs(sink_b)[0]).unwrap();
    assert_eq!(design.find_all_blocks(top).len(), 4);

    design.remove_block(top, fork);
    // The fork's connections went with it.
    assert_eq!(design.find_source(top, design.inputs(sink_a)[0]), None);
    assert!(!design.find_all_blocks(top).contains(&fork));
}

#[test]
fn blacklisted_blocks_hide_from_queries() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let c = design.add_constant(Value::int(8, 1));
    let sink = design.add_null_sink(Type::Int(8));
    let dout = design.outputs(c)[0];
    let din = design.inputs(sink)[0];

    design.module_mut(top).conns.add_to_blacklist(c);
    design.connect(top, dout, din).unwrap();

    let blocks = design.find_all_blocks(top);
    assert!(!blocks.contains(&c));
    assert!(blocks.contains(&sink));
    assert!(design.module(top).conns.is_hidden(dout, din));
    assert!(design.is_internal_driver(top, dout));
}

#[test]
fn module_ports_pair_with_boundary_dummies() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let ext_in = design.add_module_input(top, Type::Int(8), Some("input0".to_string()));
    let ext_out = design.add_module_output(top, Type::Int(8), Some("output0".to_string()));

    let driver = design.driver_of(top, ext_in).unwrap();
    let sink = design.sink_of(top, ext_out).unwrap();

    // Wire the module input straight to the module output.
    design.connect(top, driver, sink).unwrap();
    assert_eq!(design.external_of_driver(top, driver), Some(ext_in));
    assert_eq!(design.external_of_sink(top, sink), Some(ext_out));
    design.validity_check(top).unwrap();
}
