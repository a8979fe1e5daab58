// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The region builder: grow, prune, absorb, schedule.
//!
//! Construction is a multi-step process. Starting from one seed block the
//! builder grows a member set along `AND_FireOne` dependences - the maximum
//! possible region. Growth can violate the NED property, so `finalize`
//! prunes members until every external output sees exactly the full set of
//! external inputs, absorbs the full members into a fresh region module,
//! and computes the per-cycle schedule backward from the outputs.
//!
//! Members need not all relocate: ports reached through constant-latency
//! exterior dataflow stay where they are as *virtual* members, contributing
//! to scheduling without moving.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use log::{debug, warn};

use viaduct_analysis::queries::block_has_internal_cycle;
use viaduct_ir::block::BlockKind;
use viaduct_ir::design::Design;
use viaduct_ir::module::{CycleInfo, ModuleKind, RegionSchedule};
use viaduct_ir::port::{
    BlockId, DependenceRule, InputPortId, ModuleId, OutputPortId, PortDir, PortId,
};
use viaduct_ir::{CompileResult, Error};

/// The hard cap on schedule length. Exceeding it indicates a bug in region
/// construction, not a big region.
const MAX_SCHEDULE_CYCLES: usize = 100;

/// May this port be a member? Inputs qualify when everything they drive is
/// `AND_FireOne`; outputs when their own rule is `AND_FireOne` with fixed,
/// finite latency on every dep.
pub fn port_allowed(design: &Design, p: PortId) -> bool {
    let port = design.port(p);
    match port.dir {
        PortDir::Input => {
            let ip = InputPortId(p);
            design.driven_outputs(ip).iter().all(|&op| {
                design
                    .block(design.output_owner(op))
                    .dep_rule(op)
                    .is_ok_and(|r| r.is_and_fire_one())
            })
        }
        PortDir::Output => {
            let op = OutputPortId(p);
            let block = design.block(design.output_owner(op));
            match block.dep_rule(op) {
                Ok(rule) => {
                    rule.is_and_fire_one()
                        && rule.latencies.iter().all(|l| l.depth.is_fixed_finite())
                }
                Err(_) => false,
            }
        }
    }
}

/// May this block relocate into a region?
pub fn block_allowed_full(design: &Design, b: BlockId) -> bool {
    let block = design.block(b);
    if !block.outputs_tied() {
        return false;
    }
    if matches!(block.kind, BlockKind::ModuleRef(_) | BlockKind::Dummy) {
        return false;
    }
    if block_has_internal_cycle(design, b) {
        return false;
    }
    block.outputs.iter().all(|&op| port_allowed(design, op.0))
}

/// May this block participate virtually (scheduled but not relocated)?
pub fn block_allowed_virtual(design: &Design, b: BlockId) -> bool {
    !matches!(design.block(b).kind, BlockKind::Dummy) && !block_has_internal_cycle(design, b)
}

/// Pre-absorb classification of the member set.
#[derive(Default)]
struct IoSets {
    full_members: BTreeSet<BlockId>,
    external_inputs: BTreeSet<InputPortId>,
    external_outputs: BTreeSet<OutputPortId>,
    internal_inputs: BTreeSet<InputPortId>,
    internal_outputs: BTreeSet<OutputPortId>,
}

pub struct RegionBuilder {
    parent: ModuleId,
    name: String,
    members: BTreeSet<PortId>,
    const_ports: BTreeSet<PortId>,

    /// Firing `op` must happen at a cycle <= the cycle of every input in
    /// its set, directly or through since-removed Waits and Forks.
    exec_order: BTreeMap<OutputPortId, BTreeSet<InputPortId>>,

    full_members: BTreeSet<BlockId>,
    // After absorb these hold the region module's own ports.
    external_inputs: BTreeSet<InputPortId>,
    external_outputs: BTreeSet<OutputPortId>,
    internal_inputs: BTreeSet<InputPortId>,
    internal_outputs: BTreeSet<OutputPortId>,

    region: Option<ModuleId>,
}

impl RegionBuilder {
    /// Seed a region with one allowed block. Growth starts from its ports.
    pub fn new(
        design: &Design,
        parent: ModuleId,
        seed: BlockId,
        name: impl Into<String>,
        const_ports: BTreeSet<PortId>,
    ) -> CompileResult<RegionBuilder> {
        if !block_allowed_full(design, seed) {
            return Err(Error::InvalidArgument(
                "region seed block is not full-member eligible".to_string(),
            ));
        }
        let mut members = BTreeSet::new();
        let block = design.block(seed);
        members.extend(block.inputs.iter().map(|ip| ip.0));
        members.extend(block.outputs.iter().map(|op| op.0));
        Ok(RegionBuilder {
            parent,
            name: name.into(),
            members,
            const_ports,
            exec_order: BTreeMap::new(),
            full_members: BTreeSet::new(),
            external_inputs: BTreeSet::new(),
            external_outputs: BTreeSet::new(),
            internal_inputs: BTreeSet::new(),
            internal_outputs: BTreeSet::new(),
            region: None,
        })
    }

    pub fn region(&self) -> Option<ModuleId> {
        self.region
    }

    fn contains(&self, p: PortId) -> bool {
        self.members.contains(&p)
    }

    /// The connection database governing a port: its owner's module.
    fn conns_of(&self, design: &Design, p: PortId) -> ModuleId {
        design
            .block(design.port(p).owner)
            .module
            .unwrap_or(self.parent)
    }

    fn is_connected_to_me(&self, design: &Design, p: PortId) -> bool {
        let m = self.conns_of(design, p);
        let port = design.port(p);
        let mut connected: Vec<PortId> = Vec::new();
        match port.dir {
            PortDir::Input => {
                let ip = InputPortId(p);
                if let Some(source) = design.find_source(m, ip) {
                    connected.push(source.0);
                }
                connected.extend(design.driven_outputs(ip).iter().map(|op| op.0));
            }
            PortDir::Output => {
                let op = OutputPortId(p);
                connected.extend(design.find_sinks(m, op).iter().map(|ip| ip.0));
                if let Ok(deps) = design.block(design.output_owner(op)).deps(op) {
                    connected.extend(deps.iter().map(|ip| ip.0));
                }
            }
        }
        connected.iter().any(|c| self.contains(*c))
    }

    /// Try to admit one port. Admission recurses over the dependences the
    /// port brings with it.
    fn add(&mut self, design: &Design, p: PortId) -> bool {
        if self.contains(p) {
            return false;
        }
        if !(self.const_ports.contains(&p) || port_allowed(design, p)) {
            return false;
        }
        if !self.is_connected_to_me(design, p) {
            return false;
        }
        if !block_allowed_virtual(design, design.port(p).owner) {
            return false;
        }

        self.members.insert(p);

        match design.port(p).dir {
            PortDir::Output => self.add_drivers(design, OutputPortId(p)),
            PortDir::Input => self.add_driven(design, InputPortId(p)),
        }
        true
    }

    /// An admitted output pulls in its dep inputs.
    fn add_drivers(&mut self, design: &Design, op: OutputPortId) {
        let block = design.block(design.output_owner(op));
        if let Ok(rule) = block.dep_rule(op) {
            if rule.is_and_fire_one() {
                for ip in rule.inputs {
                    self.add(design, ip.0);
                }
            }
        }
    }

    /// An admitted input pulls in the outputs it always fires, provided
    /// every one of them is `AND_FireOne`, plus their dep sets.
    fn add_driven(&mut self, design: &Design, ip: InputPortId) {
        let mut fires: BTreeSet<PortId> = BTreeSet::new();
        let mut all_and = true;
        for op in design.driven_outputs(ip) {
            let block = design.block(design.output_owner(op));
            match block.dep_rule(op) {
                Ok(rule) if rule.is_and_fire_one() => {
                    fires.insert(op.0);
                    fires.extend(rule.inputs.iter().map(|i| i.0));
                }
                _ => all_and = false,
            }
        }
        if all_and {
            for p in fires {
                self.add(design, p);
            }
        }
    }

    fn grow_port(&mut self, design: &Design, p: PortId) -> bool {
        let m = self.conns_of(design, p);
        match design.port(p).dir {
            PortDir::Input => match design.find_source(m, InputPortId(p)) {
                Some(source) => self.add(design, source.0),
                None => false,
            },
            PortDir::Output => {
                let mut grew = false;
                for sink in design.find_sinks(m, OutputPortId(p)) {
                    grew |= self.add(design, sink.0);
                }
                grew
            }
        }
    }

    /// Grow up and down from the current members until a fixed point.
    pub fn grow(&mut self, design: &Design) {
        loop {
            let mut grew = false;
            for p in self.members.clone() {
                grew |= self.grow_port(design, p);
            }
            if !grew {
                break;
            }
        }
    }

    // ------------------------------------------------------------------
    // Pruning

    /// Drop ports whose own dependences are no longer members, to a fixed
    /// point.
    fn remove_ineligible_ports(&mut self, design: &Design) {
        loop {
            let mut to_remove: BTreeSet<PortId> = BTreeSet::new();
            for &p in &self.members {
                match design.port(p).dir {
                    PortDir::Input => {
                        let ip = InputPortId(p);
                        if design
                            .driven_outputs(ip)
                            .iter()
                            .any(|op| !self.contains(op.0))
                        {
                            to_remove.insert(p);
                        }
                    }
                    PortDir::Output => {
                        let op = OutputPortId(p);
                        let block = design.block(design.output_owner(op));
                        if let Ok(deps) = block.deps(op) {
                            if deps.iter().any(|ip| !self.contains(ip.0)) {
                                to_remove.insert(p);
                            }
                        }
                    }
                }
            }
            if to_remove.is_empty() {
                break;
            }
            for p in to_remove {
                self.members.remove(&p);
            }
        }
    }

    /// External source ports feeding member inputs.
    fn find_ext_ins(&self, design: &Design) -> BTreeSet<OutputPortId> {
        let mut ext = BTreeSet::new();
        for &p in &self.members {
            if design.port(p).dir == PortDir::Input {
                let ip = InputPortId(p);
                let m = self.conns_of(design, p);
                if let Some(source) = design.find_source(m, ip) {
                    if !self.contains(source.0) {
                        ext.insert(source);
                    }
                }
            }
        }
        ext
    }

    /// Member outputs with at least one non-member sink.
    fn find_ext_outs(&self, design: &Design) -> BTreeSet<OutputPortId> {
        let mut ext = BTreeSet::new();
        for &p in &self.members {
            if design.port(p).dir == PortDir::Output {
                let op = OutputPortId(p);
                let m = self.conns_of(design, p);
                if design
                    .find_sinks(m, op)
                    .iter()
                    .any(|sink| !self.contains(sink.0))
                {
                    ext.insert(op);
                }
            }
        }
        ext
    }

    /// Walk the member cone behind `op`, collecting every port it covers
    /// and the external source ports just beyond the boundary.
    fn find_deps(
        &self,
        design: &Design,
        op: OutputPortId,
    ) -> (BTreeSet<PortId>, BTreeSet<OutputPortId>) {
        let mut all: BTreeSet<PortId> = BTreeSet::new();
        let mut ext: BTreeSet<OutputPortId> = BTreeSet::new();
        let mut stack = vec![op];
        let mut seen: BTreeSet<OutputPortId> = BTreeSet::new();
        seen.insert(op);

        while let Some(op) = stack.pop() {
            all.insert(op.0);
            let block = design.block(design.output_owner(op));
            let Ok(deps) = block.deps(op) else { continue };
            for ip in deps {
                if !self.contains(ip.0) {
                    continue;
                }
                all.insert(ip.0);
                let m = self.conns_of(design, ip.0);
                match design.find_source(m, ip) {
                    Some(source) if self.contains(source.0) => {
                        if seen.insert(source) {
                            stack.push(source);
                        }
                    }
                    Some(source) => {
                        ext.insert(source);
                    }
                    None => {}
                }
            }
        }
        (all, ext)
    }

    /// Prune members until the NED property holds: every external output's
    /// external dep set must be exactly the external input set. The output
    /// whose dep set differs most from the root's goes first.
    fn shrink_to_constraints(&mut self, design: &Design, root: OutputPortId) {
        while !self.members.is_empty() {
            self.remove_ineligible_ports(design);
            if self.members.is_empty() {
                break;
            }

            let ext_ins = self.find_ext_ins(design);
            let ext_outs = self.find_ext_outs(design);
            if ext_outs.is_empty() {
                // No external outputs: NED is guaranteed.
                return;
            }

            struct DepInfo {
                op: OutputPortId,
                all: BTreeSet<PortId>,
                ext: BTreeSet<OutputPortId>,
            }
            let dep_info: Vec<DepInfo> = ext_outs
                .iter()
                .map(|&op| {
                    let (all, ext) = self.find_deps(design, op);
                    DepInfo { op, all, ext }
                })
                .collect();

            // The root output anchors the comparison; if pruning took it,
            // fall back to any output covering it, then to any output.
            let root_idx = dep_info
                .iter()
                .position(|d| d.op == root)
                .or_else(|| dep_info.iter().position(|d| d.all.contains(&root.0)))
                .unwrap_or(0);

            let mut highest_diff = 0;
            let mut highest_idx = 0;
            for (i, d) in dep_info.iter().enumerate() {
                let diff = dep_info[root_idx]
                    .ext
                    .symmetric_difference(&d.ext)
                    .count();
                if diff > highest_diff {
                    highest_diff = diff;
                    highest_idx = i;
                }
            }

            if highest_diff == 0 && dep_info[highest_idx].ext == ext_ins {
                // NED satisfied.
                return;
            }

            let offender = &dep_info[highest_idx];
            debug!(
                "region '{}': pruning output of {} to restore NED",
                self.name,
                design.global_name(design.output_owner(offender.op))
            );
            self.members.remove(&offender.op.0);
            let block = design.block(design.output_owner(offender.op));
            if let Ok(deps) = block.deps(offender.op) {
                for ip in deps {
                    self.members.remove(&ip.0);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // IO identification and execution order

    fn identify_io(&mut self, design: &Design) -> IoSets {
        let mut io = IoSets::default();

        let owners: BTreeSet<BlockId> =
            self.members.iter().map(|&p| design.port(p).owner).collect();
        for b in owners {
            if !block_allowed_full(design, b) {
                continue;
            }
            let block = design.block(b);
            let all_in = block.inputs.iter().all(|ip| self.contains(ip.0))
                && block.outputs.iter().all(|op| self.contains(op.0));
            if all_in {
                io.full_members.insert(b);
            }
        }

        for &p in &self.members {
            let m = self.conns_of(design, p);
            match design.port(p).dir {
                PortDir::Input => {
                    let ip = InputPortId(p);
                    match design.find_source(m, ip) {
                        None => {}
                        Some(source)
                            if io.full_members.contains(&design.output_owner(source)) => {}
                        Some(source) if self.contains(source.0) => {
                            io.internal_inputs.insert(ip);
                        }
                        Some(_) => {
                            io.external_inputs.insert(ip);
                        }
                    }
                }
                PortDir::Output => {
                    let op = OutputPortId(p);
                    for sink in design.find_sinks(m, op) {
                        if io.full_members.contains(&design.input_owner(sink)) {
                            continue;
                        }
                        if self.contains(sink.0) {
                            io.internal_outputs.insert(op);
                        } else {
                            io.external_outputs.insert(op);
                        }
                    }
                }
            }
        }
        io
    }

    /// Transitive member inputs downstream of `op`. Memoized for member
    /// outputs; this is what survives Wait and Fork removal.
    fn calc_exec_order(&mut self, design: &Design, op: OutputPortId) -> BTreeSet<InputPortId> {
        if let Some(cached) = self.exec_order.get(&op) {
            return cached.clone();
        }

        let mut ret: BTreeSet<InputPortId> = BTreeSet::new();
        let m = self.conns_of(design, op.0);
        for sink in design.find_sinks(m, op) {
            if !self.contains(sink.0) {
                continue;
            }
            ret.insert(sink);
            for driven in design.driven_outputs(sink) {
                if self.contains(driven.0) {
                    let rec = self.calc_exec_order(design, driven);
                    ret.extend(rec);
                }
            }
        }

        if self.contains(op.0) {
            self.exec_order.insert(op, ret.clone());
        }
        ret
    }

    fn calculate_order(&mut self, design: &Design, io: &IoSets) {
        for &ip in &io.external_inputs.clone() {
            let m = self.conns_of(design, ip.0);
            if let Some(source) = design.find_source(m, ip) {
                self.calc_exec_order(design, source);
            }
        }
        for &b in &io.full_members.clone() {
            if design.inputs(b).is_empty() {
                for &op in design.outputs(b).to_vec().iter() {
                    self.calc_exec_order(design, op);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Absorption

    /// Move the full members and their connections into a fresh region
    /// module, materializing region ports at every boundary crossing.
    fn absorb(&mut self, design: &mut Design, io: &IoSets) -> CompileResult<ModuleId> {
        let region = design.new_region(self.parent, self.name.clone());
        self.region = Some(region);
        self.full_members = io.full_members.clone();

        let members_copy = self.members.clone();

        // Absorb based on member inputs; this pulls in every full-member
        // connection and creates region inputs at the boundary.
        for &p in &members_copy {
            if design.ports.get(p).is_none() || design.port(p).dir != PortDir::Input {
                continue;
            }
            let ip = InputPortId(p);
            if let Some(source) = design.find_source(self.parent, ip) {
                design.disconnect(self.parent, source, ip);
                self.absorb_connection(design, io, region, source, ip)?;
            }
        }

        // Member outputs with non-member sinks become region outputs.
        for &p in &members_copy {
            if design.ports.get(p).is_none() || design.port(p).dir != PortDir::Output {
                continue;
            }
            let op = OutputPortId(p);
            for sink in design.find_sinks(self.parent, op) {
                if !self.contains(sink.0) {
                    design.disconnect(self.parent, op, sink);
                    self.absorb_connection(design, io, region, op, sink)?;
                }
            }
        }

        for &b in &io.full_members {
            design.block_mut(b).module = Some(region);
        }

        Ok(region)
    }

    /// Re-create one absorbed connection, inserting region boundary ports
    /// where an endpoint stays outside. Existing boundary ports are reused
    /// when several members share an exterior port.
    fn absorb_connection(
        &mut self,
        design: &mut Design,
        io: &IoSets,
        region: ModuleId,
        op: OutputPortId,
        ip: InputPortId,
    ) -> CompileResult<()> {
        let op_memb = self.contains(op.0);
        let ip_memb = self.contains(ip.0);

        let mut op = op;
        if !io.full_members.contains(&design.output_owner(op)) {
            // The source stays outside, so the value enters through a
            // region input: virtual crossings get `int_input` ports,
            // true boundary crossings get `input` ports.
            let int_conn = op_memb;
            let mut internal_output = None;
            for sink in design.find_sinks(self.parent, op) {
                let reusable = if int_conn {
                    self.internal_inputs.contains(&sink)
                } else {
                    self.external_inputs.contains(&sink)
                };
                if reusable {
                    internal_output = design.driver_of(region, sink);
                }
            }

            let internal_output = match internal_output {
                Some(drv) => drv,
                None => {
                    let ty = design.output_type(op).clone();
                    let name = if int_conn {
                        format!("int_input{}", self.internal_inputs.len())
                    } else {
                        format!("input{}", self.external_inputs.len())
                    };
                    let np = design.add_module_input(region, ty, Some(name));
                    if int_conn {
                        self.internal_inputs.insert(np);
                        self.members.insert(np.0);
                    } else {
                        self.external_inputs.insert(np);
                    }
                    let drv = design.driver_of(region, np).ok_or_else(|| {
                        Error::ImplementationError("region input lost its driver".to_string())
                    })?;
                    self.members.insert(drv.0);
                    design.connect(self.parent, op, np)?;
                    drv
                }
            };
            op = internal_output;
        }

        let mut ip = ip;
        if !io.full_members.contains(&design.input_owner(ip)) {
            let int_conn = ip_memb;
            let mut internal_input = None;
            if let Some(source) = design.find_source(self.parent, ip) {
                let reusable = if int_conn {
                    self.internal_outputs.contains(&source)
                } else {
                    self.external_outputs.contains(&source)
                };
                if reusable {
                    internal_input = design.sink_of(region, source);
                }
            }

            let internal_input = match internal_input {
                Some(sink) => sink,
                None => {
                    let ty = design.input_type(ip).clone();
                    let name = if int_conn {
                        format!("int_output{}", self.internal_outputs.len())
                    } else {
                        format!("output{}", self.external_outputs.len())
                    };
                    let np = design.add_module_output(region, ty, Some(name));
                    if int_conn {
                        self.internal_outputs.insert(np);
                        self.members.insert(np.0);
                    } else {
                        self.external_outputs.insert(np);
                    }
                    let sink = design.sink_of(region, np).ok_or_else(|| {
                        Error::ImplementationError("region output lost its sink".to_string())
                    })?;
                    self.members.insert(sink.0);
                    design.connect(self.parent, np, ip)?;
                    sink
                }
            };
            ip = internal_input;
        }

        design.connect(region, op, ip)
    }

    /// Register everything now living inside the region as a full member
    /// and thread the region-internal dataflow into the execution order.
    fn add_new_members(&mut self, design: &Design) {
        let Some(region) = self.region else { return };
        for b in design.find_all_blocks(region) {
            self.full_members.insert(b);
            let block = design.block(b);
            self.members.extend(block.inputs.iter().map(|ip| ip.0));
            self.members.extend(block.outputs.iter().map(|op| op.0));
        }

        for p in self.members.clone() {
            let Some(port) = design.ports.get(p) else { continue };
            if port.dir != PortDir::Input {
                continue;
            }
            let ip = InputPortId(p);
            if let Some(source) = self.find_internal_source(design, ip) {
                self.exec_order.entry(source).or_default().insert(ip);
            }
        }
    }

    /// The member output driving `ip`, full or virtual.
    fn find_internal_source(&self, design: &Design, ip: InputPortId) -> Option<OutputPortId> {
        let m = design.block(design.input_owner(ip)).module?;
        let source = design.find_source(m, ip)?;
        self.contains(source.0).then_some(source)
    }

    /// The dependence rule scheduling sees for one output, with module
    /// boundary ports translated to their exterior pairings.
    fn internal_deps(&self, design: &Design, op: OutputPortId) -> DependenceRule {
        let Some(region) = self.region else {
            return DependenceRule::and_fire_one(Vec::new());
        };
        let owner = design.output_owner(op);
        if owner == design.module(region).block {
            // A region output seen from outside: it fires with its sink.
            if let Some(sink) = design.sink_of(region, op) {
                return DependenceRule::and_fire_one(vec![sink]);
            }
        }
        if design.is_boundary_dummy(region, owner) {
            if let Some(ext) = design.external_of_driver(region, op) {
                return DependenceRule::and_fire_one(vec![ext]);
            }
        }
        design
            .block(owner)
            .dep_rule(op)
            .unwrap_or_else(|_| DependenceRule::and_fire_one(Vec::new()))
    }

    /// The external inputs one in-region input transitively depends on.
    fn find_external_deps(
        &self,
        design: &Design,
        ip: InputPortId,
        seen: &mut BTreeSet<InputPortId>,
    ) -> BTreeSet<InputPortId> {
        if !seen.insert(ip) {
            return BTreeSet::new();
        }
        let Some(region) = self.region else {
            return BTreeSet::new();
        };
        if design.input_owner(ip) == design.module(region).block
            && self.external_inputs.contains(&ip)
        {
            return BTreeSet::from([ip]);
        }

        let Some(source) = self.find_internal_source(design, ip) else {
            return BTreeSet::new();
        };
        let mut ret = BTreeSet::new();
        for dep in self.internal_deps(design, source).inputs {
            ret.extend(self.find_external_deps(design, dep, seen));
        }
        ret
    }

    // ------------------------------------------------------------------
    // Post-absorb checks and cleanup

    /// Verify NED on the absorbed region, then dissolve Waits and Forks -
    /// the schedule supplies their ordering - and drop anything left
    /// driving nothing.
    fn check_opt_finalize(&mut self, design: &mut Design) -> CompileResult<()> {
        let region = self.region.ok_or_else(|| {
            Error::InvalidCall("check_opt_finalize before absorb".to_string())
        })?;

        let ext_ins: BTreeSet<InputPortId> = self.external_inputs.clone();
        for op in design.module_outputs(region) {
            if !self.external_outputs.contains(&op) {
                continue;
            }
            let Some(sink) = design.sink_of(region, op) else { continue };
            let mut seen = BTreeSet::new();
            let deps = self.find_external_deps(design, sink, &mut seen);
            if deps != ext_ins {
                warn!("region '{}': NED property does not hold", self.name);
                return Err(Error::ImplementationError(format!(
                    "NED violated in region '{}'",
                    self.name
                )));
            }
        }

        // Dissolve Waits and Forks.
        for b in design.find_all_blocks(region) {
            match design.block(b).kind {
                BlockKind::Wait => {
                    let din = design.block(b).din();
                    let dout = design.block(b).dout();
                    let source = design.find_source(region, din);
                    for sink in design.find_sinks(region, dout) {
                        design.disconnect(region, dout, sink);
                        if let Some(source) = source {
                            design.connect(region, source, sink)?;
                        }
                    }
                    design.remove_block(region, b);
                }
                BlockKind::Fork { .. } => {
                    let din = design.block(b).din();
                    let source = design.find_source(region, din);
                    for dout in design.block(b).outputs.clone() {
                        for sink in design.find_sinks(region, dout) {
                            design.disconnect(region, dout, sink);
                            if let Some(source) = source {
                                design.connect(region, source, sink)?;
                            }
                        }
                    }
                    design.remove_block(region, b);
                }
                _ => {}
            }
        }

        // Dangling subgraphs would confuse the scheduler.
        loop {
            let mut removed = false;
            for b in design.find_all_blocks(region) {
                let block = design.block(b);
                if block.outputs.is_empty() {
                    continue;
                }
                let sinkless = block
                    .outputs
                    .clone()
                    .iter()
                    .all(|&op| design.count_sinks(region, op) == 0);
                if sinkless {
                    design.remove_block(region, b);
                    removed = true;
                }
            }
            if !removed {
                break;
            }
        }

        self.clean_internal(design);
        Ok(())
    }

    /// Drop references to ports and blocks that optimization removed.
    fn clean_internal(&mut self, design: &Design) {
        self.members.retain(|&p| design.ports.get(p).is_some());
        self.full_members.retain(|&b| design.blocks.get(b).is_some());

        let live = &self.members;
        self.exec_order.retain(|op, _| live.contains(&op.0));
        for ips in self.exec_order.values_mut() {
            ips.retain(|ip| live.contains(&ip.0));
        }
    }

    // ------------------------------------------------------------------
    // Scheduling

    /// Lazy backward scheduling from the region outputs. Cycle numbers run
    /// in inverse time during construction (0 = last cycle) and the vector
    /// is reversed at the end so cycle 0 is the first clock.
    fn schedule_minimum_clocks(&mut self, design: &mut Design) -> CompileResult<()> {
        let region = self
            .region
            .ok_or_else(|| Error::InvalidCall("schedule before absorb".to_string()))?;

        self.add_new_members(design);

        let input_sources: BTreeSet<OutputPortId> = self
            .external_inputs
            .iter()
            .filter_map(|&ext| design.driver_of(region, ext))
            .collect();

        // Invert the execution order to get per-input dep sets.
        let mut remaining: BTreeMap<InputPortId, BTreeSet<OutputPortId>> = BTreeMap::new();
        for (&op, ips) in &self.exec_order {
            for &ip in ips {
                remaining.entry(ip).or_default().insert(op);
            }
        }

        let mut firing: BTreeMap<usize, VecDeque<InputPortId>> = BTreeMap::new();
        for &ext in self.external_outputs.iter().chain(&self.internal_outputs) {
            if let Some(sink) = design.sink_of(region, ext) {
                firing.entry(0).or_default().push_back(sink);
            }
        }
        // Inputs leading nowhere also fire last.
        for &p in &self.members {
            let Some(port) = design.ports.get(p) else { continue };
            if port.dir == PortDir::Input {
                let ip = InputPortId(p);
                if design.driven_outputs(ip).is_empty() {
                    firing.entry(0).or_default().push_back(ip);
                }
            }
        }

        let mut rev_cycles: Vec<CycleInfo> = Vec::new();
        loop {
            let cycle_num = rev_cycles.len();
            if cycle_num > MAX_SCHEDULE_CYCLES {
                return Err(Error::ImplementationError(format!(
                    "giving up scheduling region '{}' after {MAX_SCHEDULE_CYCLES} cycles",
                    self.name
                )));
            }

            let mut cycle = CycleInfo::default();
            while let Some(firing_ip) = firing.get_mut(&cycle_num).and_then(VecDeque::pop_front)
            {
                cycle.firing.insert(firing_ip);
                let needed = remaining.remove(&firing_ip).unwrap_or_default();

                let Some(data_source) = self.find_internal_source(design, firing_ip) else {
                    return Err(Error::ImplementationError(format!(
                        "scheduling found an undriven firing input in region '{}'",
                        self.name
                    )));
                };
                cycle.available.insert(data_source);

                for dep in needed {
                    if input_sources.contains(&dep) {
                        // Inputs need no scheduling.
                        continue;
                    }
                    let already_used = self
                        .exec_order
                        .get(&dep)
                        .is_some_and(|users| users.iter().any(|u| remaining.contains_key(u)));
                    if already_used {
                        continue;
                    }

                    // First use: the value must be produced this cycle.
                    cycle.new_values.insert(dep);
                    let rule = self.internal_deps(design, dep);
                    for (i, &ip) in rule.inputs.iter().enumerate() {
                        let registers = rule
                            .latencies
                            .get(i)
                            .map_or(0, |l| l.depth.registers() as usize);
                        firing
                            .entry(cycle_num + registers)
                            .or_default()
                            .push_back(ip);
                    }
                }
            }
            firing.remove(&cycle_num);
            rev_cycles.push(cycle);

            if remaining.is_empty() {
                break;
            }
        }

        // Inverse time to forward time.
        rev_cycles.reverse();
        let mut cycle_idx: BTreeMap<PortId, usize> = BTreeMap::new();
        for &ext in &self.external_inputs {
            if let Some(drv) = design.driver_of(region, ext) {
                if let Some(first) = rev_cycles.first_mut() {
                    first.new_values.insert(drv);
                }
                cycle_idx.insert(drv.0, 0);
            }
        }
        for (i, cycle) in rev_cycles.iter().enumerate() {
            for &nv in &cycle.new_values {
                cycle_idx.insert(nv.0, i);
            }
            for &f in &cycle.firing {
                cycle_idx.insert(f.0, i);
            }
        }

        let schedule = RegionSchedule {
            cycles: rev_cycles,
            cycle_idx,
            external_inputs: self.external_inputs.clone(),
            external_outputs: self.external_outputs.clone(),
            internal_inputs: self.internal_inputs.clone(),
            internal_outputs: self.internal_outputs.clone(),
            finalized: true,
        };
        design.module_mut(region).kind = ModuleKind::Region(schedule);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Finalization

    /// Prune to the NED restrictions keeping `root` if possible, absorb
    /// the members, and schedule. Returns the region module on success;
    /// `None` means the caller should fall back to treating the seed as an
    /// ordinary block.
    pub fn finalize(
        &mut self,
        design: &mut Design,
        root: OutputPortId,
    ) -> CompileResult<Option<ModuleId>> {
        if self.members.is_empty() {
            return Ok(None);
        }

        self.shrink_to_constraints(design, root);
        if self.members.is_empty() {
            return Ok(None);
        }

        // Capture wait-based ordering before the blocks move; tracing it
        // through module boundaries afterwards would be much harder.
        let io = self.identify_io(design);
        self.calculate_order(design, &io);
        if io.full_members.is_empty() {
            return Ok(None);
        }

        // Member outputs without a member sink get NullSinks so every
        // value has an in-region consumer to schedule against.
        let snapshot: Vec<PortId> = self.members.iter().copied().collect();
        for p in snapshot {
            if design.port(p).dir != PortDir::Output {
                continue;
            }
            let op = OutputPortId(p);
            let m = self.conns_of(design, p);
            let member_sinks = design
                .find_sinks(m, op)
                .iter()
                .filter(|s| self.contains(s.0))
                .count();
            if member_sinks == 0 {
                let ty = design.output_type(op).clone();
                let ns = design.add_null_sink(ty);
                design.block_mut(ns).history.set_optimization(None);
                let din = design.block(ns).din();
                design.connect(m, op, din)?;
                self.members.insert(din.0);
            }
        }

        // Re-classify: the fresh NullSinks are full members too.
        let io = self.identify_io(design);
        let region = self.absorb(design, &io)?;
        self.check_opt_finalize(design)?;

        // Region inputs nobody ended up consuming still need sinking.
        for ext in design.module_inputs(region) {
            if let Some(drv) = design.driver_of(region, ext) {
                if design.count_sinks(region, drv) == 0 {
                    let ty = design.output_type(drv).clone();
                    let ns = design.add_null_sink(ty);
                    let din = design.block(ns).din();
                    design.connect(region, drv, din)?;
                    self.members.insert(din.0);
                }
            }
        }

        self.schedule_minimum_clocks(design)?;
        Ok(Some(region))
    }
}
