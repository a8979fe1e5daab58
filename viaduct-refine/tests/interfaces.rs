// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Interface plumbing refinement: multiplexers and taggers.

use viaduct_ir::block::BlockKind;
use viaduct_ir::design::Design;
use viaduct_ir::types::{Type, Value};
use viaduct_refine::refiners::standard_refiners;
use viaduct_refine::refinery::refine_module;
use viaduct_refine::stop::std_library_stops;

#[test]
fn interface_multiplexer_lowers_to_tag_routing() {
    let mut design = Design::default();
    let top = design.new_module("top");
    let req_ty = Type::Int(16);
    let resp_ty = Type::Int(16);

    // One downstream server (modelled as a register file read path would
    // be): requests sunk, responses sourced.
    let server_req_sink = design.add_null_sink(req_ty.clone());
    let server_resp_src = design.add_constant(Value::int(16, 42));

    let im = design.add_interface_multiplexer(req_ty.clone(), resp_ty.clone());
    let client = design.client_iface(im);
    design
        .connect(top, client.dout, design.inputs(server_req_sink)[0])
        .unwrap();
    design
        .connect(top, design.outputs(server_resp_src)[0], client.din)
        .unwrap();

    // Two upstream clients feed the multiplexer's server interfaces.
    let mut upstream_sinks = Vec::new();
    for _ in 0..2 {
        let iface = design.im_create_server(im);
        let req_src = design.add_constant(Value::int(16, 7));
        let resp_sink = design.add_null_sink(resp_ty.clone());
        design.connect(top, design.outputs(req_src)[0], iface.din).unwrap();
        design.connect(top, iface.dout, design.inputs(resp_sink)[0]).unwrap();
        upstream_sinks.push(resp_sink);
    }

    let stop = std_library_stops();
    let mut collection = standard_refiners();
    refine_module(&mut design, top, &mut collection, Some(&stop)).unwrap();

    // The multiplexer and the intermediate tagger are gone, replaced by
    // tag joins, a select, and a response router.
    let gone: [fn(&BlockKind) -> bool; 2] = [
        |k| matches!(k, BlockKind::InterfaceMultiplexer { .. }),
        |k| matches!(k, BlockKind::Tagger),
    ];
    for kind_gone in gone {
        assert!(design.filter_blocks(top, |b| kind_gone(&b.kind)).is_empty());
    }
    assert_eq!(
        design.filter_blocks(top, |b| matches!(b.kind, BlockKind::Select)).len(),
        1
    );
    assert_eq!(
        design.filter_blocks(top, |b| matches!(b.kind, BlockKind::Router)).len(),
        1
    );

    // Each upstream response sink is now fed from the router (via the
    // tagger lowering), not from the multiplexer.
    for sink in upstream_sinks {
        let source = design.find_source(top, design.inputs(sink)[0]);
        assert!(source.is_some());
    }
    design.validity_check(top).unwrap();
}
