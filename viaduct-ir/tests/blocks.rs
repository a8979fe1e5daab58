// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use viaduct_ir::design::Design;
use viaduct_ir::port::{InputType, OutputType};
use viaduct_ir::time::PipelineDepth;
use viaduct_ir::types::{Type, Value};

#[test]
fn join_depends_on_all_inputs() {
    let mut design = Design::default();
    let join = design.add_join(vec![Type::Int(4), Type::Int(4), Type::Int(4)]);
    let block = design.block(join);
    let rule = block.dep_rule(block.dout()).unwrap();
    assert_eq!(rule.input_type, InputType::And);
    assert_eq!(rule.output_type, OutputType::Always);
    assert_eq!(rule.inputs.len(), 3);
    assert!(block.outputs_tied());
    assert!(!block.outputs_separate());
    assert_eq!(design.output_type(block.dout()).bit_width(), 12);
}

#[test]
fn select_fires_on_any_input() {
    let mut design = Design::default();
    let select = design.add_select(2, Type::Int(8));
    let block = design.block(select);
    let rule = block.dep_rule(block.dout()).unwrap();
    assert_eq!(rule.input_type, InputType::Or);
}

#[test]
fn router_outputs_fire_conditionally() {
    let mut design = Design::default();
    let router = design.add_router(4, Type::Int(8));
    let block = design.block(router);
    assert!(block.outputs_separate());
    assert!(!block.outputs_tied());
    for &op in &block.outputs {
        let rule = block.dep_rule(op).unwrap();
        assert_eq!(rule.output_type, OutputType::Maybe);
    }
    // Selector is wide enough for four destinations.
    assert_eq!(design.input_type(block.din()).element(0).unwrap(), &Type::Int(2));
}

#[test]
fn register_interfaces_are_independent() {
    let mut design = Design::default();
    let reg = design.add_register(Type::Int(16));
    let block = design.block(reg);
    assert!(block.has_state());
    assert!(block.outputs_separate());

    let write = block.write_iface();
    let read = block.read_iface();
    let write_rule = block.dep_rule(write.dout).unwrap();
    assert_eq!(write_rule.inputs, vec![write.din]);
    let read_rule = block.dep_rule(read.dout).unwrap();
    assert_eq!(read_rule.inputs, vec![read.din]);
}

#[test]
fn pipeline_register_carries_one_stage() {
    let mut design = Design::default();
    let preg = design.add_pipeline_register(Type::Int(8));
    let block = design.block(preg);
    let rule = block.dep_rule(block.dout()).unwrap();
    assert!(rule.is_and_fire_one());
    assert_eq!(rule.latencies[0].depth, PipelineDepth::Fixed(1));
}

#[test]
fn constant_has_no_deps() {
    let mut design = Design::default();
    let c = design.add_constant(Value::int(8, 42));
    let block = design.block(c);
    let rule = block.dep_rule(block.dout()).unwrap();
    assert!(rule.is_and_fire_one());
    assert!(rule.inputs.is_empty());
}

#[test]
fn split_projects_every_element() {
    let mut design = Design::default();
    let ty = Type::Struct(vec![Type::Int(1), Type::Int(2), Type::Int(3)]);
    let split = design.add_split(ty).unwrap();
    let block = design.block(split);
    assert_eq!(block.outputs.len(), 3);
    assert_eq!(design.output_type(block.outputs[2]), &Type::Int(3));
    assert!(design.add_split(Type::Int(8)).is_err());
}

#[test]
fn extract_validates_its_path() {
    let mut design = Design::default();
    let ty = Type::Struct(vec![Type::Int(8), Type::Struct(vec![Type::Int(4)])]);
    let e = design.add_extract(ty.clone(), vec![1, 0]).unwrap();
    assert_eq!(design.output_type(design.block(e).dout()), &Type::Int(4));
    assert!(design.add_extract(ty, vec![3]).is_err());
}

#[test]
fn cast_requires_equal_widths() {
    let mut design = Design::default();
    assert!(design.add_cast(Type::Int(32), Type::Float).is_ok());
    assert!(design.add_cast(Type::Int(8), Type::Int(16)).is_err());
}
