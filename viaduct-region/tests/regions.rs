// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use viaduct_ir::block::BlockKind;
use viaduct_ir::design::Design;
use viaduct_ir::port::ModuleId;
use viaduct_ir::types::{Type, Value};
use viaduct_region::form::form_scheduled_regions;

/// The scheduled regions instantiated in a module.
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

#[test]
fn constant_adder_forms_a_single_cycle_region() {
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

    let formed = form_scheduled_regions(&mut design, top).unwrap();
    assert_eq!(formed, 1);

    let regions = regions_of(&design, top);
    assert_eq!(regions.len(), 1);
    let schedule = design.module(regions[0]).schedule().unwrap();
    assert!(schedule.finalized);
    assert_eq!(schedule.clocks(), 1);
    assert!(schedule.external_inputs.is_empty());
    assert_eq!(schedule.external_outputs.len(), 1);

    // The region output carries the adder's 32-bit result.
    let ext_out = *schedule.external_outputs.iter().next().unwrap();
    assert_eq!(design.output_type(ext_out), &Type::Int(32));

    design.validity_check(top).unwrap();
    design.validity_check(regions[0]).unwrap();
}

#[test]
fn pipeline_register_stretches_the_schedule() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let input = design.add_module_input(top, Type::Int(8), Some("input0".to_string()));
    let out = design.add_module_output(top, Type::Int(8), Some("output0".to_string()));
    let driver = design.driver_of(top, input).unwrap();
    let out_sink = design.sink_of(top, out).unwrap();

    let front = design.add_identity(Type::Int(8));
    let preg = design.add_pipeline_register(Type::Int(8));
    let back = design.add_identity(Type::Int(8));

    design.connect(top, driver, design.block(front).din()).unwrap();
    design
        .connect(top, design.block(front).dout(), design.block(preg).din())
        .unwrap();
    design
        .connect(top, design.block(preg).dout(), design.block(back).din())
        .unwrap();
    design.connect(top, design.block(back).dout(), out_sink).unwrap();

    form_scheduled_regions(&mut design, top).unwrap();
    let regions = regions_of(&design, top);
    assert_eq!(regions.len(), 1);
    let region = regions[0];
    let schedule = design.module(region).schedule().unwrap();

    // One register inside the region: two clocks.
    assert_eq!(schedule.clocks(), 2);

    // The input side fires a cycle before the output side; the distance
    // equals the pipeline depth along the path.
    let ext_in = *schedule.external_inputs.iter().next().unwrap();
    let ext_out = *schedule.external_outputs.iter().next().unwrap();
    let in_driver = design.driver_of(region, ext_in).unwrap();
    let out_sink = design.sink_of(region, ext_out).unwrap();
    let start = schedule.cycle_of(in_driver.0).unwrap();
    let end = schedule.cycle_of(out_sink.0).unwrap();
    assert_eq!(end - start, 1);
}

#[test]
fn ned_violation_prunes_the_offending_output() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let in_a = design.add_module_input(top, Type::Int(8), Some("input0".to_string()));
    let in_b = design.add_module_input(top, Type::Int(8), Some("input1".to_string()));
    let out_j = design.add_module_output(
        top,
        Type::Struct(vec![Type::Int(8), Type::Int(8)]),
        Some("output0".to_string()),
    );
    let out_x = design.add_module_output(top, Type::Int(8), Some("output1".to_string()));

    let drv_a = design.driver_of(top, in_a).unwrap();
    let drv_b = design.driver_of(top, in_b).unwrap();

    let ident_a = design.add_identity(Type::Int(8));
    let ident_b = design.add_identity(Type::Int(8));
    let join = design.add_join(vec![Type::Int(8), Type::Int(8)]);

    design.connect(top, drv_a, design.block(ident_a).din()).unwrap();
    design.connect(top, drv_b, design.block(ident_b).din()).unwrap();
    design
        .connect(top, design.block(ident_a).dout(), design.inputs(join)[0])
        .unwrap();
    design
        .connect(top, design.block(ident_b).dout(), design.inputs(join)[1])
        .unwrap();
    design
        .connect(top, design.block(join).dout(), design.sink_of(top, out_j).unwrap())
        .unwrap();
    // ident_a also feeds a module output directly: its dep set ({a}) is a
    // strict subset of the join's ({a, b}).
    design
        .connect(top, design.block(ident_a).dout(), design.sink_of(top, out_x).unwrap())
        .unwrap();

    form_scheduled_regions(&mut design, top).unwrap();
    let regions = regions_of(&design, top);
    assert!(!regions.is_empty());

    // Every surviving region output must see the full external input set.
    for region in regions {
        let schedule = design.module(region).schedule().unwrap();
        assert!(schedule.finalized);
        assert_eq!(schedule.external_outputs.len(), 1);
    }
}
