// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use viaduct_ir::block::BlockKind;
use viaduct_ir::design::Design;
use viaduct_ir::types::{Type, Value};
use viaduct_refine::refiners::standard_refiners;
use viaduct_refine::refinery::refine_module;
use viaduct_refine::stop::{StopCondition, std_library_stops};

#[test]
fn stop_condition_matches_by_kind() {
    let mut design = Design::default();
    let reg = design.add_register(Type::Int(8));
    let add = design.add_int_add(8, 8);

    let sc = std_library_stops();
    assert!(!sc.stop_refine(&design, reg));
    assert!(sc.stop_refine(&design, add));

    let unref = sc.unrefined(&design, &[reg, add]);
    assert_eq!(unref, vec![reg]);
    assert!(!sc.refined(&design, &[reg, add]));
    assert!(sc.refined(&design, &[add]));
}

#[test]
fn split_refines_to_extracts_on_a_shared_source() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let ty = Type::Struct(vec![Type::Int(4), Type::Int(8)]);
    let c = design.add_constant(Value::Struct(vec![
        Value::int(4, 1),
        Value::int(8, 2),
    ]));
    let split = design.add_split(ty).unwrap();
    let sink0 = design.add_null_sink(Type::Int(4));
    let sink1 = design.add_null_sink(Type::Int(8));

    design.connect(top, design.outputs(c)[0], design.block(split).din()).unwrap();
    let split_outs = design.block(split).outputs.clone();
    design.connect(top, split_outs[0], design.inputs(sink0)[0]).unwrap();
    design.connect(top, split_outs[1], design.inputs(sink1)[0]).unwrap();

    // Split is itself a primitive, so run without a stop condition to
    // force it through its refiner.
    let mut collection = standard_refiners();
    let passes = refine_module(&mut design, top, &mut collection, None).unwrap();
    assert!(passes >= 1);

    let extracts = design.filter_blocks(top, |b| matches!(b.kind, BlockKind::Extract { .. }));
    assert_eq!(extracts.len(), 2);
    for e in extracts {
        assert_eq!(
            design.find_source(top, design.block(e).din()),
            Some(design.outputs(c)[0])
        );
        assert_eq!(design.count_sinks(top, design.block(e).dout()), 1);
    }
    assert!(design.filter_blocks(top, |b| matches!(b.kind, BlockKind::Split)).is_empty());
}

#[test]
fn register_refines_to_rtlreg_and_wait() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let reg = design.add_register(Type::Int(16));
    let data = design.add_constant(Value::int(16, 7));
    let go = design.add_constant(Value::Void);
    let ack = design.add_null_sink(Type::Void);
    let sink = design.add_null_sink(Type::Int(16));

    let write = design.block(reg).write_iface();
    let read = design.block(reg).read_iface();
    design.connect(top, design.outputs(data)[0], write.din).unwrap();
    design.connect(top, write.dout, design.inputs(ack)[0]).unwrap();
    design.connect(top, design.outputs(go)[0], read.din).unwrap();
    design.connect(top, read.dout, design.inputs(sink)[0]).unwrap();

    let stop = std_library_stops();
    let mut collection = standard_refiners();
    refine_module(&mut design, top, &mut collection, Some(&stop)).unwrap();

    assert!(design.filter_blocks(top, |b| matches!(b.kind, BlockKind::Register)).is_empty());
    let rtlregs = design.filter_blocks(top, |b| matches!(b.kind, BlockKind::RtlReg { .. }));
    assert_eq!(rtlregs.len(), 1);
    let waits = design.filter_blocks(top, |b| matches!(b.kind, BlockKind::Wait));
    assert_eq!(waits.len(), 1);

    // The wait gates the read response on the requestor's token.
    let wait = waits[0];
    assert_eq!(
        design.find_source(top, design.block(wait).din()),
        Some(design.rtl_reg_read(rtlregs[0], 0))
    );
    assert_eq!(
        design.find_source(top, design.block(wait).controls()[0]),
        Some(design.outputs(go)[0])
    );
    assert_eq!(
        design.find_source(top, design.inputs(sink)[0]),
        Some(design.block(wait).dout())
    );

    // Everything left is now primitive: refinement has converged.
    assert!(stop.refined(&design, &design.find_all_blocks(top)));
}

#[test]
fn refinement_terminates_within_the_cap() {
    let mut design = Design::default();
    let top = design.new_module("top");
    // A chain of registers: every pass refines at least one, and the
    // fixed point arrives well before the watchdog.
    for _ in 0..5 {
        let reg = design.add_register(Type::Int(8));
        let data = design.add_constant(Value::int(8, 0));
        let go = design.add_constant(Value::Void);
        let ack = design.add_null_sink(Type::Void);
        let sink = design.add_null_sink(Type::Int(8));
        let write = design.block(reg).write_iface();
        let read = design.block(reg).read_iface();
        design.connect(top, design.outputs(data)[0], write.din).unwrap();
        design.connect(top, write.dout, design.inputs(ack)[0]).unwrap();
        design.connect(top, design.outputs(go)[0], read.din).unwrap();
        design.connect(top, read.dout, design.inputs(sink)[0]).unwrap();
    }

    let stop = std_library_stops();
    let mut collection = standard_refiners();
    let passes = refine_module(&mut design, top, &mut collection, Some(&stop)).unwrap();
    assert!(passes <= 100);
    assert!(stop.refined(&design, &design.find_all_blocks(top)));
}

#[test]
fn sparse_multiplexer_densifies_with_a_default() {
    let mut design = Design::default();
    let top = design.new_module("top");
    // Two of four selector values populated.
    let inputs = [0u32, 2u32].into_iter().collect();
    let mux = design.add_sparse_multiplexer(2, Type::Int(8), inputs);
    let din_ty = design.input_type(design.block(mux).din()).clone();
    let c = design.add_constant(Value::Struct(vec![
        Value::int(2, 0),
        Value::int(8, 99),
        Value::int(8, 10),
        Value::int(8, 20),
    ]));
    let sink = design.add_null_sink(Type::Int(8));

    assert_eq!(din_ty.num_elements(), 4);
    design.connect(top, design.outputs(c)[0], design.block(mux).din()).unwrap();
    design
        .connect(top, design.block(mux).dout(), design.inputs(sink)[0])
        .unwrap();

    let stop = std_library_stops();
    let mut collection = standard_refiners();
    refine_module(&mut design, top, &mut collection, Some(&stop)).unwrap();

    assert!(
        design
            .filter_blocks(top, |b| matches!(b.kind, BlockKind::SparseMultiplexer { .. }))
            .is_empty()
    );
    let dense = design.filter_blocks(top, |b| matches!(b.kind, BlockKind::Multiplexer));
    assert_eq!(dense.len(), 1);
    // Four selector values feed the dense mux.
    let mux_in = design.input_type(design.block(dense[0]).din()).clone();
    assert_eq!(mux_in.num_elements(), 5);
}
