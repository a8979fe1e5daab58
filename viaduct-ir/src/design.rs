// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The design: arena owner and mutation surface of the IR.
//!
//! Blocks, ports and modules form a cyclic object graph, so all three live
//! in slotmap arenas owned by the [`Design`] and reference each other by
//! key. Graph mutations (connect, disconnect, remap, block removal) are
//! methods here because they need the arenas for type checking and block
//! registration; the per-module [`ConnectionDB`] holds the indices.

use std::collections::BTreeSet;

use log::warn;
use slotmap::SlotMap;

use crate::block::{Block, BlockKind, Interface};
use crate::conns::ConnectionDB;
use crate::module::{Module, ModuleKind, RegionSchedule};
use crate::port::{BlockId, InputPortId, ModuleId, OutputPortId, Port, PortDir, PortId};
use crate::types::{Type, Value};
use crate::{CompileResult, Error};

/// Number of bits needed to select among `n` choices.
pub fn clog2(n: usize) -> u32 {
    let mut bits = 0;
    while (1usize << bits) < n {
        bits += 1;
    }
    bits.max(1)
}

#[derive(Default)]
pub struct Design {
    pub blocks: SlotMap<BlockId, Block>,
    pub ports: SlotMap<PortId, Port>,
    pub modules: SlotMap<ModuleId, Module>,
    top: Vec<ModuleId>,
}

impl Design {
    // ------------------------------------------------------------------
    // Arena accessors

    pub fn block(&self, b: BlockId) -> &Block {
        &self.blocks[b]
    }

    pub fn block_mut(&mut self, b: BlockId) -> &mut Block {
        &mut self.blocks[b]
    }

    pub fn module(&self, m: ModuleId) -> &Module {
        &self.modules[m]
    }

    pub fn module_mut(&mut self, m: ModuleId) -> &mut Module {
        &mut self.modules[m]
    }

    pub fn port(&self, p: PortId) -> &Port {
        &self.ports[p]
    }

    pub fn input_type(&self, ip: InputPortId) -> &Type {
        &self.ports[ip.0].ty
    }

    pub fn output_type(&self, op: OutputPortId) -> &Type {
        &self.ports[op.0].ty
    }

    pub fn input_owner(&self, ip: InputPortId) -> BlockId {
        self.ports[ip.0].owner
    }

    pub fn output_owner(&self, op: OutputPortId) -> BlockId {
        self.ports[op.0].owner
    }

    pub fn inputs(&self, b: BlockId) -> &[InputPortId] {
        &self.blocks[b].inputs
    }

    pub fn outputs(&self, b: BlockId) -> &[OutputPortId] {
        &self.blocks[b].outputs
    }

    /// The outputs of the owning block that depend on this input.
    pub fn driven_outputs(&self, ip: InputPortId) -> Vec<OutputPortId> {
        let block = &self.blocks[self.input_owner(ip)];
        block
            .outputs
            .iter()
            .copied()
            .filter(|&op| block.deps(op).is_ok_and(|deps| deps.contains(&ip)))
            .collect()
    }

    /// Index of the port within its owner's input or output list.
    pub fn port_num(&self, p: PortId) -> usize {
        let port = &self.ports[p];
        let block = &self.blocks[port.owner];
        match port.dir {
            PortDir::Input => block.inputs.iter().position(|ip| ip.0 == p).unwrap_or(0),
            PortDir::Output => block.outputs.iter().position(|op| op.0 == p).unwrap_or(0),
        }
    }

    pub fn top_modules(&self) -> &[ModuleId] {
        &self.top
    }

    /// The module hierarchy in pre-order: tops first, then submodules.
    pub fn all_modules(&self) -> Vec<ModuleId> {
        let mut out = Vec::new();
        let mut work: Vec<ModuleId> = self.top.clone();
        while let Some(m) = work.pop() {
            out.push(m);
            for b in self.modules[m].conns.all_blocks() {
                if let BlockKind::ModuleRef(sub) = self.blocks[b].kind {
                    work.push(sub);
                }
            }
        }
        out
    }

    /// Hierarchical name for diagnostics: module path plus block name or
    /// kind, suffixed with the arena key for uniqueness.
    pub fn global_name(&self, b: BlockId) -> String {
        let block = &self.blocks[b];
        let prefix = block
            .module
            .map(|m| format!("{}::", self.modules[m].name))
            .unwrap_or_default();
        match &block.name {
            Some(name) => format!("{prefix}{name}"),
            None => format!("{prefix}{}_{:?}", block.kind.kind_name(), b),
        }
    }

    // ------------------------------------------------------------------
    // Modules

    fn new_module_with_kind(
        &mut self,
        name: impl Into<String>,
        kind: ModuleKind,
        parent: Option<ModuleId>,
    ) -> ModuleId {
        let facade = self.blocks.insert(Block::new(BlockKind::Dummy));
        let m = self.modules.insert(Module::new(name, kind, facade));
        // The facade stands in for the module in its parent.
        self.blocks[facade].kind = BlockKind::ModuleRef(m);
        self.blocks[facade].module = parent;
        self.modules[m].parent = parent;
        if parent.is_none() {
            self.top.push(m);
        }
        m
    }

    /// Create a new top-level container module.
    pub fn new_module(&mut self, name: impl Into<String>) -> ModuleId {
        self.new_module_with_kind(name, ModuleKind::Container, None)
    }

    /// Create a container module nested inside `parent`.
    pub fn new_submodule(&mut self, parent: ModuleId, name: impl Into<String>) -> ModuleId {
        self.new_module_with_kind(name, ModuleKind::Container, Some(parent))
    }

    /// Create an (unfinalized) scheduled-region module inside `parent`.
    pub fn new_region(&mut self, parent: ModuleId, name: impl Into<String>) -> ModuleId {
        self.new_module_with_kind(name, ModuleKind::Region(RegionSchedule::default()), Some(parent))
    }

    /// Add an external input port to a module. Pairs the port with an
    /// internal boundary dummy whose output drives the member blocks.
    pub fn add_module_input(
        &mut self,
        m: ModuleId,
        ty: Type,
        name: Option<String>,
    ) -> InputPortId {
        let facade = self.modules[m].block;
        let ip = self.new_input(facade, ty.clone(), name);
        let dummy = self.blocks.insert(Block::new(BlockKind::Dummy));
        self.blocks[dummy].module = Some(m);
        self.new_input(dummy, ty.clone(), None);
        self.new_output(dummy, ty, None);
        self.modules[m].conns.add_to_blacklist(dummy);
        self.modules[m].port_drivers.insert(ip, dummy);
        ip
    }

    /// Add an external output port to a module, paired with an internal
    /// boundary dummy whose input collects the result.
    pub fn add_module_output(
        &mut self,
        m: ModuleId,
        ty: Type,
        name: Option<String>,
    ) -> OutputPortId {
        let facade = self.modules[m].block;
        let op = self.new_output(facade, ty.clone(), name);
        let dummy = self.blocks.insert(Block::new(BlockKind::Dummy));
        self.blocks[dummy].module = Some(m);
        self.new_input(dummy, ty.clone(), None);
        self.new_output(dummy, ty, None);
        self.modules[m].conns.add_to_blacklist(dummy);
        self.modules[m].port_sinks.insert(op, dummy);
        op
    }

    pub fn module_inputs(&self, m: ModuleId) -> Vec<InputPortId> {
        self.blocks[self.modules[m].block].inputs.clone()
    }

    pub fn module_outputs(&self, m: ModuleId) -> Vec<OutputPortId> {
        self.blocks[self.modules[m].block].outputs.clone()
    }

    /// The internal output driving members on behalf of external input `ip`.
    pub fn driver_of(&self, m: ModuleId, ip: InputPortId) -> Option<OutputPortId> {
        self.modules[m]
            .port_drivers
            .get(&ip)
            .map(|&d| self.blocks[d].dout())
    }

    /// The internal input collecting the value of external output `op`.
    pub fn sink_of(&self, m: ModuleId, op: OutputPortId) -> Option<InputPortId> {
        self.modules[m]
            .port_sinks
            .get(&op)
            .map(|&d| self.blocks[d].din())
    }

    /// Reverse of [`Design::driver_of`].
    pub fn external_of_driver(&self, m: ModuleId, op: OutputPortId) -> Option<InputPortId> {
        let owner = self.output_owner(op);
        self.modules[m]
            .port_drivers
            .iter()
            .find(|&(_, &d)| d == owner)
            .map(|(&ext, _)| ext)
    }

    /// Reverse of [`Design::sink_of`].
    pub fn external_of_sink(&self, m: ModuleId, ip: InputPortId) -> Option<OutputPortId> {
        let owner = self.input_owner(ip);
        self.modules[m]
            .port_sinks
            .iter()
            .find(|&(_, &d)| d == owner)
            .map(|(&ext, _)| ext)
    }

    /// Is this block one of the module's boundary dummies?
    pub fn is_boundary_dummy(&self, m: ModuleId, b: BlockId) -> bool {
        let module = &self.modules[m];
        module.port_drivers.values().any(|&d| d == b)
            || module.port_sinks.values().any(|&d| d == b)
    }

    /// Sources internal to the module from which forward searches start:
    /// the boundary drivers of every external input plus the outputs of
    /// blocks with no inputs.
    pub fn internal_drivers(&self, m: ModuleId) -> Vec<OutputPortId> {
        let mut init = Vec::new();
        for &dummy in self.modules[m].port_drivers.values() {
            init.push(self.blocks[dummy].dout());
        }
        for b in self.modules[m].conns.all_blocks() {
            let block = &self.blocks[b];
            if block.inputs.is_empty() {
                init.extend(block.outputs.iter().copied());
            }
        }
        init
    }

    // ------------------------------------------------------------------
    // Ports

    fn new_input(&mut self, owner: BlockId, ty: Type, name: Option<String>) -> InputPortId {
        let p = self.ports.insert(Port::new(owner, PortDir::Input, ty, name));
        let ip = InputPortId(p);
        self.blocks[owner].inputs.push(ip);
        ip
    }

    fn new_output(&mut self, owner: BlockId, ty: Type, name: Option<String>) -> OutputPortId {
        let p = self.ports.insert(Port::new(owner, PortDir::Output, ty, name));
        let op = OutputPortId(p);
        self.blocks[owner].outputs.push(op);
        op
    }

    // ------------------------------------------------------------------
    // Block builders. Blocks are created unattached; they join a module
    // when one of their ports first participates in a connection.

    fn add_block(&mut self, kind: BlockKind) -> BlockId {
        self.blocks.insert(Block::new(kind))
    }

    pub fn add_identity(&mut self, ty: Type) -> BlockId {
        let b = self.add_block(BlockKind::Identity);
        self.new_input(b, ty.clone(), Some("din".to_string()));
        self.new_output(b, ty, Some("dout".to_string()));
        b
    }

    pub fn add_wait(&mut self, ty: Type) -> BlockId {
        let b = self.add_block(BlockKind::Wait);
        self.new_input(b, ty.clone(), Some("din".to_string()));
        self.new_output(b, ty, Some("dout".to_string()));
        b
    }

    /// Add a control channel to a `Wait`.
    pub fn add_wait_control(&mut self, wait: BlockId, ty: Type) -> InputPortId {
        let n = self.blocks[wait].inputs.len() - 1;
        self.new_input(wait, ty, Some(format!("control{n}")))
    }

    pub fn add_cast(&mut self, from: Type, to: Type) -> CompileResult<BlockId> {
        if from.bit_width() != to.bit_width() {
            return Err(Error::TypeError(format!(
                "cast requires equal bit widths ({} vs {})",
                from.bit_width(),
                to.bit_width()
            )));
        }
        let b = self.add_block(BlockKind::Cast);
        self.new_input(b, from, Some("din".to_string()));
        self.new_output(b, to, Some("dout".to_string()));
        Ok(b)
    }

    pub fn add_join(&mut self, elems: Vec<Type>) -> BlockId {
        let b = self.add_block(BlockKind::Join);
        for (i, ty) in elems.iter().enumerate() {
            self.new_input(b, ty.clone(), Some(format!("din{i}")));
        }
        self.new_output(b, Type::Struct(elems), Some("dout".to_string()));
        b
    }

    /// A join whose output is an existing composite type.
    pub fn add_join_of(&mut self, out: Type) -> CompileResult<BlockId> {
        let elems = match &out {
            Type::Struct(elems) => elems.clone(),
            Type::Vector(elem, n) => vec![(**elem).clone(); *n],
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "join output must be composite, got {out}"
                )));
            }
        };
        let b = self.add_block(BlockKind::Join);
        for (i, ty) in elems.iter().enumerate() {
            self.new_input(b, ty.clone(), Some(format!("din{i}")));
        }
        self.new_output(b, out, Some("dout".to_string()));
        Ok(b)
    }

    pub fn add_split(&mut self, input: Type) -> CompileResult<BlockId> {
        if !input.is_composite() {
            return Err(Error::InvalidArgument(format!(
                "split input must be composite, got {input}"
            )));
        }
        let b = self.add_block(BlockKind::Split);
        let n = input.num_elements();
        for i in 0..n {
            let ty = input.element(i)?.clone();
            self.new_output(b, ty, Some(format!("dout{i}")));
        }
        self.new_input(b, input, Some("din".to_string()));
        Ok(b)
    }

    pub fn add_select(&mut self, n: usize, ty: Type) -> BlockId {
        let b = self.add_block(BlockKind::Select);
        for i in 0..n {
            self.new_input(b, ty.clone(), Some(format!("din{i}")));
        }
        self.new_output(b, ty, Some("dout".to_string()));
        b
    }

    /// Add another input channel to a `Select`.
    pub fn add_select_input(&mut self, select: BlockId, ty: Type) -> InputPortId {
        let n = self.blocks[select].inputs.len();
        self.new_input(select, ty, Some(format!("din{n}")))
    }

    pub fn add_multiplexer(&mut self, n: usize, ty: Type) -> BlockId {
        let b = self.add_block(BlockKind::Multiplexer);
        let mut elems = vec![Type::Int(clog2(n))];
        elems.extend(std::iter::repeat_n(ty.clone(), n));
        self.new_input(b, Type::Struct(elems), Some("din".to_string()));
        self.new_output(b, ty, Some("dout".to_string()));
        b
    }

    pub fn add_router(&mut self, n: usize, ty: Type) -> BlockId {
        let b = self.add_block(BlockKind::Router);
        let input = Type::Struct(vec![Type::Int(clog2(n)), ty.clone()]);
        self.new_input(b, input, Some("din".to_string()));
        for i in 0..n {
            self.new_output(b, ty.clone(), Some(format!("dout{i}")));
        }
        b
    }

    pub fn add_extract(&mut self, input: Type, path: Vec<usize>) -> CompileResult<BlockId> {
        let out = input.extracted(&path)?;
        let b = self.add_block(BlockKind::Extract { path });
        self.new_input(b, input, Some("din".to_string()));
        self.new_output(b, out, Some("dout".to_string()));
        Ok(b)
    }

    pub fn add_sparse_multiplexer(
        &mut self,
        sel_width: u32,
        data: Type,
        inputs: BTreeSet<u32>,
    ) -> BlockId {
        let mut elems = vec![Type::Int(sel_width), data.clone()];
        elems.extend(std::iter::repeat_n(data.clone(), inputs.len()));
        let b = self.add_block(BlockKind::SparseMultiplexer { inputs });
        self.new_input(b, Type::Struct(elems), Some("din".to_string()));
        self.new_output(b, data, Some("dout".to_string()));
        b
    }

    pub fn add_constant(&mut self, value: Value) -> BlockId {
        let ty = value.type_of();
        let b = self.add_block(BlockKind::Constant { value });
        self.new_output(b, ty, Some("c".to_string()));
        b
    }

    pub fn add_never(&mut self, ty: Type) -> BlockId {
        let b = self.add_block(BlockKind::Never);
        self.new_output(b, ty, Some("c".to_string()));
        b
    }

    pub fn add_null_sink(&mut self, ty: Type) -> BlockId {
        let b = self.add_block(BlockKind::NullSink);
        self.new_input(b, ty, Some("in".to_string()));
        b
    }

    pub fn add_once(&mut self, value: Value) -> BlockId {
        let ty = value.type_of();
        let b = self.add_block(BlockKind::Once { value });
        self.new_output(b, ty, Some("c".to_string()));
        b
    }

    pub fn add_register(&mut self, ty: Type) -> BlockId {
        let b = self.add_block(BlockKind::Register);
        // Interface layout: (write req/resp, read req/resp).
        self.new_input(b, ty.clone(), Some("write_req".to_string()));
        self.new_output(b, Type::Void, Some("write_resp".to_string()));
        self.new_input(b, Type::Void, Some("read_req".to_string()));
        self.new_output(b, ty, Some("read_resp".to_string()));
        b
    }

    pub fn add_finite_array(&mut self, ty: Type, depth: usize) -> BlockId {
        let idx = Type::Int(clog2(depth));
        let b = self.add_block(BlockKind::FiniteArray { depth });
        self.new_input(
            b,
            Type::Struct(vec![ty.clone(), idx.clone()]),
            Some("write_req".to_string()),
        );
        self.new_output(b, Type::Void, Some("write_resp".to_string()));
        self.new_input(b, idx, Some("read_req".to_string()));
        self.new_output(b, ty, Some("read_resp".to_string()));
        b
    }

    pub fn add_rtl_reg(&mut self, ty: Type) -> BlockId {
        let b = self.add_block(BlockKind::RtlReg { writes: 0, reads: 0 });
        self.blocks[b].name = Some("rtlreg".to_string());
        let _ = self.rtl_reg_new_write(b, ty.clone());
        let _ = self.rtl_reg_new_read(b, ty);
        b
    }

    /// Add a write interface to an `RtlReg`. Write interfaces precede read
    /// outputs in the port lists. Writes never block: the response is a
    /// void completion token.
    pub fn rtl_reg_new_write(&mut self, reg: BlockId, ty: Type) -> Interface {
        let idx = match &mut self.blocks[reg].kind {
            BlockKind::RtlReg { writes, .. } => {
                *writes += 1;
                *writes - 1
            }
            _ => 0,
        };
        let ip = self.new_input(reg, ty, Some(format!("write{idx}_req")));
        let op = self.new_output(reg, Type::Void, Some(format!("write{idx}_resp")));
        let block = &mut self.blocks[reg];
        // Keep writes ahead of the read outputs.
        block.outputs.pop();
        block.outputs.insert(idx, op);
        Interface {
            din: ip,
            dout: op,
            server: true,
        }
    }

    /// Add a read port to an `RtlReg`. RTL reads never block and carry no
    /// request: the port continuously offers the stored value.
    pub fn rtl_reg_new_read(&mut self, reg: BlockId, ty: Type) -> OutputPortId {
        let idx = match &mut self.blocks[reg].kind {
            BlockKind::RtlReg { reads, .. } => {
                *reads += 1;
                *reads - 1
            }
            _ => 0,
        };
        self.new_output(reg, ty, Some(format!("read{idx}_resp")))
    }

    /// The `idx`th read output of an `RtlReg`.
    pub fn rtl_reg_read(&self, reg: BlockId, idx: usize) -> OutputPortId {
        let writes = match self.blocks[reg].kind {
            BlockKind::RtlReg { writes, .. } => writes,
            _ => 0,
        };
        self.blocks[reg].outputs[writes + idx]
    }

    pub fn add_block_ram(&mut self, ty: Type, depth: usize, ports: usize) -> BlockId {
        let idx = Type::Int(clog2(depth));
        let req = Type::Struct(vec![Type::Int(1), ty.clone(), idx]);
        let b = self.add_block(BlockKind::BlockRam { depth, ports });
        for i in 0..ports {
            self.new_input(b, req.clone(), Some(format!("req{i}")));
            self.new_output(b, ty.clone(), Some(format!("resp{i}")));
        }
        b
    }

    pub fn add_pipeline_register(&mut self, ty: Type) -> BlockId {
        let b = self.add_block(BlockKind::PipelineRegister);
        self.new_input(b, ty.clone(), Some("d".to_string()));
        self.new_output(b, ty, Some("q".to_string()));
        b
    }

    /// A pipeline register named and historied after the output it buffers.
    pub fn add_pipeline_register_for(&mut self, source: OutputPortId) -> BlockId {
        let ty = self.output_type(source).clone();
        let owner = self.output_owner(source);
        let b = self.add_pipeline_register(ty);
        if let Some(name) = self.blocks[owner].name.clone() {
            self.blocks[b].name = Some(format!("{name}_reg"));
        }
        self.blocks[b].history.set_optimization(Some(owner));
        b
    }

    pub fn add_stage_controller(&mut self) -> BlockId {
        let b = self.add_block(BlockKind::PipelineStageController);
        self.new_input(b, Type::Int(1), Some("vin".to_string()));
        self.new_output(b, Type::Int(1), Some("vout".to_string()));
        self.new_output(b, Type::Int(1), Some("ce".to_string()));
        b
    }

    pub fn add_latch(&mut self, source: OutputPortId) -> BlockId {
        let ty = self.output_type(source).clone();
        let owner = self.output_owner(source);
        let b = self.add_block(BlockKind::Latch);
        self.new_input(b, ty.clone(), Some("d".to_string()));
        self.new_output(b, ty, Some("q".to_string()));
        if let Some(name) = self.blocks[owner].name.clone() {
            self.blocks[b].name = Some(format!("{name}_latch"));
        }
        self.blocks[b].history.set_optimization(Some(owner));
        b
    }

    pub fn add_fork(&mut self, ty: Type, virt: bool) -> BlockId {
        let b = self.add_block(BlockKind::Fork { virt });
        self.new_input(b, ty, Some("din".to_string()));
        b
    }

    /// Add another output channel to a `Fork`.
    pub fn fork_new_output(&mut self, fork: BlockId) -> OutputPortId {
        let ty = self.input_type(self.blocks[fork].din()).clone();
        let n = self.blocks[fork].outputs.len();
        self.new_output(fork, ty, Some(format!("dout{n}")))
    }

    pub fn add_interface_multiplexer(&mut self, req: Type, resp: Type) -> BlockId {
        let b = self.add_block(BlockKind::InterfaceMultiplexer { servers: 0 });
        // Client pair: responses arrive, requests leave.
        self.new_input(b, resp, Some("client_resp".to_string()));
        self.new_output(b, req, Some("client_req".to_string()));
        b
    }

    /// Create another server interface on an `InterfaceMultiplexer`.
    pub fn im_create_server(&mut self, im: BlockId) -> Interface {
        let req = self.output_type(self.blocks[im].outputs[0]).clone();
        let resp = self.input_type(self.blocks[im].inputs[0]).clone();
        let idx = match &mut self.blocks[im].kind {
            BlockKind::InterfaceMultiplexer { servers } => {
                *servers += 1;
                *servers - 1
            }
            _ => 0,
        };
        let ip = self.new_input(im, req, Some(format!("iface{idx}_req")));
        let op = self.new_output(im, resp, Some(format!("iface{idx}_resp")));
        Interface {
            din: ip,
            dout: op,
            server: true,
        }
    }

    /// The client interface of an `InterfaceMultiplexer` or `Tagger`.
    pub fn client_iface(&self, b: BlockId) -> Interface {
        match self.blocks[b].kind {
            BlockKind::Tagger => self.blocks[b].interface(1, false),
            _ => self.blocks[b].interface(0, false),
        }
    }

    pub fn add_tagger(&mut self, req: Type, resp: Type, tag: Type) -> BlockId {
        let b = self.add_block(BlockKind::Tagger);
        let server_in = Type::Struct(vec![tag.clone(), req.clone()]);
        let server_out = Type::Struct(vec![tag, resp.clone()]);
        self.new_input(b, server_in, Some("server_req".to_string()));
        self.new_output(b, server_out, Some("server_resp".to_string()));
        self.new_input(b, resp, Some("client_resp".to_string()));
        self.new_output(b, req, Some("client_req".to_string()));
        b
    }

    // Function blocks: one (possibly struct) data input, one output.

    fn add_function(&mut self, kind: BlockKind, input: Type, output: Type) -> BlockId {
        let b = self.add_block(kind);
        self.new_input(b, input, Some("din".to_string()));
        self.new_output(b, output, Some("dout".to_string()));
        b
    }

    pub fn add_int_add(&mut self, a: u32, b_width: u32) -> BlockId {
        let out = a.max(b_width);
        self.add_function(
            BlockKind::IntAdd,
            Type::Struct(vec![Type::Int(a), Type::Int(b_width)]),
            Type::Int(out),
        )
    }

    pub fn add_int_sub(&mut self, a: u32, b_width: u32) -> BlockId {
        let out = a.max(b_width);
        self.add_function(
            BlockKind::IntSub,
            Type::Struct(vec![Type::Int(a), Type::Int(b_width)]),
            Type::Int(out),
        )
    }

    pub fn add_int_mul(&mut self, a: u32, b_width: u32) -> BlockId {
        let out = a.max(b_width);
        self.add_function(
            BlockKind::IntMul,
            Type::Struct(vec![Type::Int(a), Type::Int(b_width)]),
            Type::Int(out),
        )
    }

    pub fn add_int_div(&mut self, a: u32, b_width: u32, signed: bool) -> BlockId {
        self.add_function(
            BlockKind::IntDiv { signed },
            Type::Struct(vec![Type::Int(a), Type::Int(b_width)]),
            Type::Int(a),
        )
    }

    pub fn add_int_rem(&mut self, a: u32, b_width: u32, signed: bool) -> BlockId {
        self.add_function(
            BlockKind::IntRem { signed },
            Type::Struct(vec![Type::Int(a), Type::Int(b_width)]),
            Type::Int(a),
        )
    }

    pub fn add_shift(
        &mut self,
        data: u32,
        amount: u32,
        dir: crate::block::ShiftDir,
        style: crate::block::ShiftStyle,
    ) -> BlockId {
        self.add_function(
            BlockKind::Shift { dir, style },
            Type::Struct(vec![Type::Int(data), Type::Int(amount)]),
            Type::Int(data),
        )
    }

    pub fn add_const_shift(
        &mut self,
        data: u32,
        shift: i32,
        style: crate::block::ShiftStyle,
    ) -> BlockId {
        self.add_function(
            BlockKind::ConstShift { shift, style },
            Type::Int(data),
            Type::Int(data),
        )
    }

    pub fn add_int_truncate(&mut self, from: u32, to: u32) -> CompileResult<BlockId> {
        if to >= from {
            return Err(Error::InvalidArgument(format!(
                "truncate must narrow ({from} -> {to})"
            )));
        }
        Ok(self.add_function(BlockKind::IntTruncate, Type::Int(from), Type::Int(to)))
    }

    pub fn add_int_extend(&mut self, from: u32, to: u32, signed: bool) -> CompileResult<BlockId> {
        if to <= from {
            return Err(Error::InvalidArgument(format!(
                "extend must widen ({from} -> {to})"
            )));
        }
        Ok(self.add_function(
            BlockKind::IntExtend { signed },
            Type::Int(from),
            Type::Int(to),
        ))
    }

    pub fn add_bitwise(&mut self, n: usize, width: u32, op: crate::block::BitwiseOp) -> BlockId {
        let elems = vec![Type::Int(width); n];
        self.add_function(BlockKind::Bitwise { op }, Type::Struct(elems), Type::Int(width))
    }

    pub fn add_int_compare(
        &mut self,
        a: u32,
        b_width: u32,
        cmp: crate::block::CmpOp,
        signed: bool,
    ) -> BlockId {
        self.add_function(
            BlockKind::IntCompare { cmp, signed },
            Type::Struct(vec![Type::Int(a), Type::Int(b_width)]),
            Type::Int(1),
        )
    }

    // ------------------------------------------------------------------
    // Connections

    fn register_block(&mut self, m: ModuleId, b: BlockId) {
        if self.modules[m].conns.increment_use(b) {
            self.blocks[b].module = Some(m);
        }
    }

    fn deregister_block(&mut self, m: ModuleId, b: BlockId) {
        self.modules[m].conns.decrement_use(b);
    }

    /// Connect `op` to `ip`. Fails on a type mismatch. A pending remap on
    /// either endpoint is applied instead of connecting the stale port.
    pub fn connect(&mut self, m: ModuleId, op: OutputPortId, ip: InputPortId) -> CompileResult<()> {
        // Resolve queued output rewrites, chasing chains.
        let mut op = op;
        let mut hops = 0;
        while let Some(&new_op) = self.modules[m].conns.output_rewrites.get(&op) {
            op = new_op;
            hops += 1;
            if hops > self.modules[m].conns.output_rewrites.len() {
                return Err(Error::ImplementationError(
                    "output rewrite chain contains a cycle".to_string(),
                ));
            }
        }

        if let Some(new_ips) = self.modules[m].conns.input_rewrites.get(&ip).cloned() {
            for new_ip in new_ips {
                self.connect(m, op, new_ip)?;
            }
            return Ok(());
        }

        let src_ty = self.output_type(op);
        let sink_ty = self.input_type(ip);
        if src_ty != sink_ty {
            return crate::ir_error!(
                TypeError,
                format!("ports being connected must have matching types ({src_ty} vs {sink_ty})")
            );
        }

        if let Some(existing) = self.modules[m].conns.find_source(ip) {
            if existing == op {
                return Ok(());
            }
            return crate::ir_error!(InvalidArgument, "input port already has a driver");
        }

        self.modules[m].conns.insert(op, ip);
        let src_owner = self.output_owner(op);
        let sink_owner = self.input_owner(ip);
        if self.modules[m].conns.is_blacklisted(src_owner)
            || self.modules[m].conns.is_blacklisted(sink_owner)
        {
            self.modules[m].conns.mark_hidden(op, ip);
        }
        self.register_block(m, src_owner);
        self.register_block(m, sink_owner);
        Ok(())
    }

    pub fn disconnect(&mut self, m: ModuleId, op: OutputPortId, ip: InputPortId) {
        if self.modules[m].conns.remove(op, ip) {
            let src_owner = self.output_owner(op);
            let sink_owner = self.input_owner(ip);
            self.deregister_block(m, src_owner);
            self.deregister_block(m, sink_owner);
        }
    }

    pub fn find_source(&self, m: ModuleId, ip: InputPortId) -> Option<OutputPortId> {
        self.modules[m].conns.find_source(ip)
    }

    pub fn find_sinks(&self, m: ModuleId, op: OutputPortId) -> BTreeSet<InputPortId> {
        self.modules[m].conns.find_sinks(op)
    }

    pub fn count_sinks(&self, m: ModuleId, op: OutputPortId) -> usize {
        self.modules[m].conns.count_sinks(op)
    }

    /// Redirect whatever drives `old` to drive each of `new_ports` instead.
    /// Queued until a connection appears if none exists yet.
    pub fn remap_input(
        &mut self,
        m: ModuleId,
        old: InputPortId,
        new_ports: Vec<InputPortId>,
    ) -> CompileResult<()> {
        self.modules[m]
            .conns
            .input_rewrites
            .insert(old, new_ports.clone());
        self.modules[m].conns.bump();
        if let Some(source) = self.find_source(m, old) {
            self.disconnect(m, source, old);
            for ip in new_ports {
                self.connect(m, source, ip)?;
            }
        }
        Ok(())
    }

    /// Redirect all fan-out of `old` onto `new`. Queued until a connection
    /// appears if none exists yet.
    pub fn remap_output(
        &mut self,
        m: ModuleId,
        old: OutputPortId,
        new: OutputPortId,
    ) -> CompileResult<()> {
        self.modules[m].conns.output_rewrites.insert(old, new);
        self.modules[m].conns.bump();
        for sink in self.find_sinks(m, old) {
            self.disconnect(m, old, sink);
            self.connect(m, new, sink)?;
        }
        Ok(())
    }

    /// Blocks in the module with use count >= 1 and not blacklisted.
    pub fn find_all_blocks(&self, m: ModuleId) -> Vec<BlockId> {
        self.modules[m].conns.all_blocks()
    }

    pub fn filter_blocks(&self, m: ModuleId, filter: impl Fn(&Block) -> bool) -> Vec<BlockId> {
        self.find_all_blocks(m)
            .into_iter()
            .filter(|&b| filter(&self.blocks[b]))
            .collect()
    }

    pub fn is_internal_driver(&self, m: ModuleId, op: OutputPortId) -> bool {
        self.modules[m].conns.is_blacklisted(self.output_owner(op))
    }

    /// Remove a block: all incident connections first, then the block and
    /// its ports leave the arena.
    pub fn remove_block(&mut self, m: ModuleId, b: BlockId) {
        let inputs = self.blocks[b].inputs.clone();
        let outputs = self.blocks[b].outputs.clone();
        for ip in inputs.iter() {
            if let Some(source) = self.find_source(m, *ip) {
                self.disconnect(m, source, *ip);
            }
        }
        for op in outputs.iter() {
            for sink in self.find_sinks(m, *op) {
                self.disconnect(m, *op, sink);
            }
        }
        self.modules[m].conns.remove_from_blacklist(b);
        for ip in inputs {
            self.ports.remove(ip.0);
        }
        for op in outputs {
            self.ports.remove(op.0);
        }
        self.blocks.remove(b);
    }

    // ------------------------------------------------------------------
    // Checks

    /// Verify the structural invariants of one module's graph.
    pub fn validity_check(&self, m: ModuleId) -> CompileResult<()> {
        let conns = &self.modules[m].conns;
        for c in conns.connections() {
            let src = self
                .ports
                .get(c.source.0)
                .ok_or_else(|| Error::ImplementationError("dangling source port".to_string()))?;
            let sink = self
                .ports
                .get(c.sink.0)
                .ok_or_else(|| Error::ImplementationError("dangling sink port".to_string()))?;
            if src.ty != sink.ty {
                return Err(Error::ImplementationError(format!(
                    "connection with mismatched types: {} vs {}",
                    src.ty, sink.ty
                )));
            }
            if self.blocks.get(src.owner).is_none() || self.blocks.get(sink.owner).is_none() {
                return Err(Error::ImplementationError(
                    "connection references a removed block".to_string(),
                ));
            }
        }

        for b in conns.all_blocks() {
            let block = &self.blocks[b];
            for &op in &block.outputs {
                let deps = block.deps(op)?;
                for dep in deps {
                    if !block.inputs.contains(&dep) {
                        warn!("block {} declares a dep outside its inputs", self.global_name(b));
                        return Err(Error::ImplementationError(format!(
                            "dependence rule of {} names a foreign input",
                            self.global_name(b)
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
