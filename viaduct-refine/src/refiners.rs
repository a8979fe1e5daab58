// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The standard refiners.
//!
//! Each refiner rewrites one coarse block kind into an equivalent subgraph
//! of backend primitives, remapping the old ports so pending and existing
//! connections follow the replacement.

use viaduct_ir::CompileResult;
use viaduct_ir::block::BlockKind;
use viaduct_ir::design::{Design, clog2};
use viaduct_ir::port::{BlockId, ModuleId};
use viaduct_ir::types::{Type, Value};

use crate::collection::{PriorityCollection, Refiner};

/// The default refiner stack in priority order.
pub fn standard_refiners() -> PriorityCollection {
    let mut collection = PriorityCollection::default();
    collection.append_entry(Box::new(SplitRefiner));
    collection.append_entry(Box::new(RegisterRefiner));
    collection.append_entry(Box::new(SparseMultiplexerRefiner));
    collection.append_entry(Box::new(InterfaceMultiplexerRefiner));
    collection.append_entry(Box::new(TaggerRefiner));
    collection.append_entry(Box::new(DefaultRefiner));
    collection
}

/// Split -> one Extract per used element, all sharing the split's source.
/// Fan-out of the shared source becomes a Fork later, in fork synthesis.
pub struct SplitRefiner;

impl Refiner for SplitRefiner {
    fn name(&self) -> &'static str {
        "split-to-extracts"
    }

    fn handles(&self, design: &Design, b: BlockId) -> bool {
        matches!(design.block(b).kind, BlockKind::Split)
    }

    fn refine(&self, design: &mut Design, m: ModuleId, b: BlockId) -> CompileResult<bool> {
        let _ = refine_split_to_extracts(design, m, b, false)?;
        Ok(true)
    }
}

/// Replace a Split with per-element Extracts. Returns the new blocks,
/// element-indexed. With `keep_unused` false, elements nobody consumes get
/// no Extract (`None`).
pub fn refine_split_to_extracts(
    design: &mut Design,
    m: ModuleId,
    split: BlockId,
    keep_unused: bool,
) -> CompileResult<Vec<Option<BlockId>>> {
    let din = design.block(split).din();
    let input_ty = design.input_type(din).clone();
    let outputs = design.block(split).outputs.clone();

    let mut extracts = Vec::with_capacity(outputs.len());
    let mut extract_dins = Vec::new();
    for (i, &dout) in outputs.iter().enumerate() {
        if !keep_unused && design.count_sinks(m, dout) == 0 {
            extracts.push(None);
            continue;
        }
        let e = design.add_extract(input_ty.clone(), vec![i])?;
        design.block_mut(e).history.set_refinement(split);
        design.remap_output(m, dout, design.block(e).dout())?;
        extract_dins.push(design.block(e).din());
        extracts.push(Some(e));
    }

    design.remap_input(m, din, extract_dins)?;
    design.remove_block(m, split);
    Ok(extracts)
}

/// Register -> RtlReg plus a read-side Wait per requestor. The Wait makes
/// the read response deliverable only once the read request has arrived,
/// which is the token contract an RTL register cannot provide by itself.
pub struct RegisterRefiner;

impl Refiner for RegisterRefiner {
    fn name(&self) -> &'static str {
        "register-to-rtlreg"
    }

    fn handles(&self, design: &Design, b: BlockId) -> bool {
        matches!(design.block(b).kind, BlockKind::Register)
    }

    fn refine(&self, design: &mut Design, m: ModuleId, b: BlockId) -> CompileResult<bool> {
        refine_register(design, m, b)?;
        Ok(true)
    }
}

/// Lower one Register. When the read interface is served through an
/// `InterfaceMultiplexer`, the multiplexer is unrolled into one RtlReg read
/// interface (and Wait) per server.
pub fn refine_register(design: &mut Design, m: ModuleId, reg: BlockId) -> CompileResult<()> {
    let write = design.block(reg).write_iface();
    let read = design.block(reg).read_iface();
    let data_ty = design.output_type(read.dout).clone();

    let rr = design.add_rtl_reg(data_ty.clone());
    design.block_mut(rr).history.set_refinement(reg);
    let rr_write = design.block(rr).interface(0, true);
    design.remap_input(m, write.din, vec![rr_write.din])?;
    design.remap_output(m, write.dout, rr_write.dout)?;

    // Find the read requestors: either the register's own read interface,
    // or every server of an InterfaceMultiplexer in front of it.
    let mut requests = Vec::new();
    let im = design.find_source(m, read.din).and_then(|src| {
        let owner = design.output_owner(src);
        match design.block(owner).kind {
            BlockKind::InterfaceMultiplexer { .. } if design.client_iface(owner).dout == src => {
                Some(owner)
            }
            _ => None,
        }
    });

    if let Some(im) = im {
        let servers = match design.block(im).kind {
            BlockKind::InterfaceMultiplexer { servers } => servers,
            _ => 0,
        };
        for i in 0..servers {
            let iface = design.block(im).interface(1 + i, true);
            requests.push((iface.din, iface.dout));
        }
    } else {
        requests.push((read.din, read.dout));
    }

    for (i, (req_in, resp_out)) in requests.into_iter().enumerate() {
        let rr_read = if i == 0 {
            design.rtl_reg_read(rr, 0)
        } else {
            design.rtl_reg_new_read(rr, data_ty.clone())
        };

        let wait = design.add_wait(data_ty.clone());
        design.block_mut(wait).history.set_refinement(reg);
        design.connect(m, rr_read, design.block(wait).din())?;

        let req_ty = design.input_type(req_in).clone();
        let control = design.add_wait_control(wait, req_ty);
        design.remap_input(m, req_in, vec![control])?;
        design.remap_output(m, resp_out, design.block(wait).dout())?;
    }

    if let Some(im) = im {
        design.remove_block(m, im);
    }
    design.remove_block(m, reg);
    Ok(())
}

/// SparseMultiplexer -> dense Multiplexer, with the default value fanned in
/// to every selector slot the sparse population leaves empty.
pub struct SparseMultiplexerRefiner;

impl Refiner for SparseMultiplexerRefiner {
    fn name(&self) -> &'static str {
        "sparse-to-dense-mux"
    }

    fn handles(&self, design: &Design, b: BlockId) -> bool {
        matches!(design.block(b).kind, BlockKind::SparseMultiplexer { .. })
    }

    fn refine(&self, design: &mut Design, m: ModuleId, b: BlockId) -> CompileResult<bool> {
        let inputs = match &design.block(b).kind {
            BlockKind::SparseMultiplexer { inputs } => inputs.clone(),
            _ => return Ok(false),
        };
        let din = design.block(b).din();
        let din_ty = design.input_type(din).clone();
        let sel_ty = din_ty.element(0)?.clone();
        let data_ty = din_ty.element(1)?.clone();
        let sel_width = match sel_ty {
            Type::Int(w) => w,
            _ => return Ok(false),
        };
        let n = 1usize << sel_width;

        let dm = design.add_multiplexer(n, data_ty);
        design.block_mut(dm).history.set_refinement(b);
        let split = design.add_split(din_ty)?;
        design.block_mut(split).history.set_refinement(b);
        design.remap_input(m, din, vec![design.block(split).din()])?;

        let dm_in_ty = design.input_type(design.block(dm).din()).clone();
        let join = design.add_join_of(dm_in_ty)?;
        design.block_mut(join).history.set_refinement(b);
        design.connect(m, design.block(join).dout(), design.block(dm).din())?;
        design.remap_output(m, design.block(b).dout(), design.block(dm).dout())?;

        // Selector straight through.
        let split_outs = design.block(split).outputs.clone();
        let join_ins = design.block(join).inputs.clone();
        design.connect(m, split_outs[0], join_ins[0])?;

        // Populated slots.
        for (idx, input) in inputs.iter().enumerate() {
            design.connect(m, split_outs[2 + idx], join_ins[1 + *input as usize])?;
        }

        // Default fan-in everywhere else.
        for i in 0..n {
            if !inputs.contains(&(i as u32)) {
                design.connect(m, split_outs[1], join_ins[1 + i])?;
            }
        }

        design.remove_block(m, b);
        Ok(true)
    }
}

/// InterfaceMultiplexer -> per-server tag Joins into a Select, a Tagger in
/// front of the downstream server, and a Router distributing tagged
/// responses back to the servers.
pub struct InterfaceMultiplexerRefiner;

impl Refiner for InterfaceMultiplexerRefiner {
    fn name(&self) -> &'static str {
        "interface-mux-to-tagger"
    }

    fn handles(&self, design: &Design, b: BlockId) -> bool {
        matches!(design.block(b).kind, BlockKind::InterfaceMultiplexer { .. })
    }

    fn refine(&self, design: &mut Design, m: ModuleId, b: BlockId) -> CompileResult<bool> {
        let servers = match design.block(b).kind {
            BlockKind::InterfaceMultiplexer { servers } => servers,
            _ => return Ok(false),
        };
        let client = design.client_iface(b);
        let req_ty = design.output_type(client.dout).clone();
        let resp_ty = design.input_type(client.din).clone();
        let tag_width = clog2(servers.max(2));
        let tag_ty = Type::Int(tag_width);
        let tagged_req = Type::Struct(vec![tag_ty.clone(), req_ty.clone()]);

        let select = design.add_select(servers, tagged_req.clone());
        design.block_mut(select).history.set_refinement(b);
        let tagger = design.add_tagger(req_ty.clone(), resp_ty.clone(), tag_ty.clone());
        design.block_mut(tagger).history.set_refinement(b);
        let router = design.add_router(1 << tag_width, resp_ty.clone());
        design.block_mut(router).history.set_refinement(b);

        // Request path: tag each server's request and merge.
        for i in 0..servers {
            let iface = design.block(b).interface(1 + i, true);
            let tag_const = design.add_constant(Value::int(tag_width, i as u64));
            design.block_mut(tag_const).history.set_refinement(b);
            let join = design.add_join(vec![tag_ty.clone(), req_ty.clone()]);
            design.block_mut(join).history.set_refinement(b);

            let join_ins = design.block(join).inputs.clone();
            design.connect(m, design.outputs(tag_const)[0], join_ins[0])?;
            design.remap_input(m, iface.din, vec![join_ins[1]])?;
            let sel_in = design.inputs(select)[i];
            design.connect(m, design.block(join).dout(), sel_in)?;
        }
        design.connect(
            m,
            design.block(select).dout(),
            design.inputs(tagger)[0],
        )?;

        // The tagger's client side replaces the multiplexer's.
        design.remap_output(m, client.dout, design.outputs(tagger)[1])?;
        design.remap_input(m, client.din, vec![design.inputs(tagger)[1]])?;

        // Response path: route tagged responses back by tag.
        design.connect(
            m,
            design.outputs(tagger)[0],
            design.block(router).din(),
        )?;
        for i in 0..servers {
            let iface = design.block(b).interface(1 + i, true);
            let router_out = design.outputs(router)[i];
            design.remap_output(m, iface.dout, router_out)?;
        }

        design.remove_block(m, b);
        Ok(true)
    }
}

/// Tagger -> explicit tag routing: split the tag off the request, forward
/// the bare request downstream, and rejoin the held tag with the response.
pub struct TaggerRefiner;

impl Refiner for TaggerRefiner {
    fn name(&self) -> &'static str {
        "tagger-to-routing"
    }

    fn handles(&self, design: &Design, b: BlockId) -> bool {
        matches!(design.block(b).kind, BlockKind::Tagger)
    }

    fn refine(&self, design: &mut Design, m: ModuleId, b: BlockId) -> CompileResult<bool> {
        let server_req = design.inputs(b)[0];
        let server_resp = design.outputs(b)[0];
        let client_resp = design.inputs(b)[1];
        let client_req = design.outputs(b)[1];

        let tagged_req_ty = design.input_type(server_req).clone();
        let tag_ty = tagged_req_ty.element(0)?.clone();
        let resp_ty = design.input_type(client_resp).clone();

        let split = design.add_split(tagged_req_ty)?;
        design.block_mut(split).history.set_refinement(b);
        let join = design.add_join(vec![tag_ty, resp_ty]);
        design.block_mut(join).history.set_refinement(b);

        design.remap_input(m, server_req, vec![design.block(split).din()])?;
        let split_outs = design.block(split).outputs.clone();
        design.remap_output(m, client_req, split_outs[1])?;

        let join_ins = design.block(join).inputs.clone();
        design.connect(m, split_outs[0], join_ins[0])?;
        design.remap_input(m, client_resp, vec![join_ins[1]])?;
        design.remap_output(m, server_resp, design.block(join).dout())?;

        design.remove_block(m, b);
        Ok(true)
    }
}

/// Terminal entry: handles everything and refines nothing, so refinement
/// ends cleanly on blocks no other refiner understands.
pub struct DefaultRefiner;

impl Refiner for DefaultRefiner {
    fn name(&self) -> &'static str {
        "default"
    }

    fn handles(&self, _design: &Design, _b: BlockId) -> bool {
        true
    }

    fn refine(&self, _design: &mut Design, _m: ModuleId, _b: BlockId) -> CompileResult<bool> {
        Ok(false)
    }
}
