// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The query library built on the graph search framework.
//!
//! Everything here is read-only over a module's connection graph: cycle
//! detection and extraction, dominators, constant propagation, token-order
//! analysis and dependency tracing.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use viaduct_ir::block::BlockKind;
use viaduct_ir::design::Design;
use viaduct_ir::port::{
    BlockId, DependenceRule, InputPortId, InputType, ModuleId, OutputPortId, PortId,
};
use viaduct_ir::{CompileResult, Error};

use crate::search::{
    Action, Edge, Forward, GraphSearch, QueryPath, Reverse, SearchAlgo, SearchPath, Visitor,
    VisitPort,
};

/// One edge of a discovered cycle.
pub type CycleEdge = (OutputPortId, InputPortId);

/// Does this block conceal a cyclic graph of its own?
pub fn block_has_internal_cycle(design: &Design, b: BlockId) -> bool {
    match design.block(b).kind {
        BlockKind::ModuleRef(sub) => module_has_cycle(design, sub),
        _ => false,
    }
}

struct CycleDetectionVisitor {
    seen: BTreeSet<(OutputPortId, InputPortId)>,
    found: bool,
}

impl Visitor for CycleDetectionVisitor {
    type Dir = Forward;
    type Path = QueryPath<Forward>;

    fn visit(&mut self, design: &Design, _m: ModuleId, path: &Self::Path) -> Action {
        let current = path.end_port();
        let block = design.input_owner(current);
        if block_has_internal_cycle(design, block) {
            self.found = true;
            return Action::TerminateSearch;
        }

        if path.has_cycle() {
            self.found = true;
            Action::TerminateSearch
        } else if !self.seen.insert(path.end()) {
            Action::TerminatePath
        } else {
            Action::Continue
        }
    }

    fn next(
        &mut self,
        design: &Design,
        _m: ModuleId,
        path: &Self::Path,
        out: &mut Vec<OutputPortId>,
    ) -> Action {
        // Combinational reachability follows the dependence rules: a
        // stateful interface whose response ignores an input does not
        // extend the path through it.
        out.extend(design.driven_outputs(path.end_port()));
        Action::Continue
    }
}

/// DFS from each init; true as soon as any path closes on itself or
/// reaches a block with an internal cycle.
pub fn block_cycle_exists(design: &Design, m: ModuleId, init: &[OutputPortId]) -> bool {
    for &op in init {
        let mut visitor = CycleDetectionVisitor {
            seen: BTreeSet::new(),
            found: false,
        };
        GraphSearch::new(design, m, SearchAlgo::Dfs).go(&mut visitor, [op]);
        if visitor.found {
            return true;
        }
    }
    false
}

/// Does the module's internal graph contain a combinational cycle?
pub fn module_has_cycle(design: &Design, m: ModuleId) -> bool {
    block_cycle_exists(design, m, &design.internal_drivers(m))
}

struct DominatorVisitor {
    dominators: BTreeSet<BlockId>,
}

impl Visitor for DominatorVisitor {
    type Dir = Reverse;
    type Path = Edge<Reverse>;

    fn visit(&mut self, design: &Design, _m: ModuleId, path: &Self::Path) -> Action {
        self.dominators.insert(design.output_owner(path.end_port()));
        Action::Continue
    }
}

/// Every block reachable walking backward from the block's inputs.
pub fn find_dominators(design: &Design, m: ModuleId, b: BlockId) -> BTreeSet<BlockId> {
    let mut visitor = DominatorVisitor {
        dominators: BTreeSet::new(),
    };
    GraphSearch::new(design, m, SearchAlgo::Dfs)
        .go(&mut visitor, design.inputs(b).to_vec());
    visitor.dominators
}

/// Result of [`token_order_analysis`].
#[derive(Clone, Copy, Debug, Default)]
pub struct TokenOrder {
    /// Was the source actually reached from the sink?
    pub found_source: bool,
    /// Does firing the sink always require a token from the source?
    pub single_source: bool,
    /// Was an OR/Custom dependence found along the way?
    pub reorder_potential: bool,
    pub cyclic: bool,
}

struct TokenAnalysisVisitor {
    source: PortId,
    requires_source: BTreeMap<InputPortId, bool>,
    found_source: bool,
    found_or: bool,
    found_cycle: bool,
}

impl TokenAnalysisVisitor {
    /// Fold the requires-source flags along the path, walking from the
    /// source end toward the sink. AND rules require the source when any
    /// dep does; OR rules only when every dep does.
    fn add_source(&mut self, design: &Design, path: &QueryPath<Reverse>) {
        for &(ip, op) in path.edges.iter().rev() {
            if ip.0 == self.source || op.0 == self.source {
                self.requires_source.insert(ip, true);
            } else {
                let block = design.block(design.output_owner(op));
                let Ok(rule) = block.dep_rule(op) else {
                    continue;
                };
                let requires = if rule.input_type == InputType::And {
                    rule.inputs
                        .iter()
                        .any(|dep| self.requires_source.get(dep).copied().unwrap_or(false))
                } else {
                    rule.inputs
                        .iter()
                        .all(|dep| self.requires_source.get(dep).copied().unwrap_or(false))
                };
                self.requires_source.insert(ip, requires);
            }
        }
    }
}

impl Visitor for TokenAnalysisVisitor {
    type Dir = Reverse;
    type Path = QueryPath<Reverse>;

    fn visit(&mut self, design: &Design, _m: ModuleId, path: &Self::Path) -> Action {
        let current = path.end_port();
        let block_id = design.output_owner(current);
        let path_cycle = path.has_cycle();
        if block_has_internal_cycle(design, block_id) || path_cycle {
            self.found_cycle = true;
        }

        let block = design.block(block_id);
        if let Ok(rule) = block.dep_rule(current) {
            if rule.input_type != InputType::And {
                // Both OR and Custom can inject or reorder tokens.
                self.found_or = true;
            }
        }

        if current.0 == self.source || path.end().0.0 == self.source {
            self.found_source = true;
            self.add_source(design, path);
            Action::TerminatePath
        } else if path_cycle {
            Action::TerminatePath
        } else {
            Action::Continue
        }
    }

    fn next(
        &mut self,
        design: &Design,
        m: ModuleId,
        path: &Self::Path,
        out: &mut Vec<InputPortId>,
    ) -> Action {
        let current = path.end_port();
        if design.is_internal_driver(m, current) {
            self.add_source(design, path);
            return Action::TerminatePath;
        }

        let block = design.block(design.output_owner(current));
        if let Ok(deps) = block.deps(current) {
            out.extend(deps);
        }
        Action::Continue
    }
}

/// Walk backward from the sink's driving inputs and determine, per node,
/// whether firing it requires a token from `source`.
pub fn token_order_analysis(
    design: &Design,
    m: ModuleId,
    source: PortId,
    sink: PortId,
) -> CompileResult<TokenOrder> {
    let port = design.port(sink);
    let init: Vec<InputPortId> = match port.dir {
        viaduct_ir::port::PortDir::Input => vec![InputPortId(sink)],
        viaduct_ir::port::PortDir::Output => design
            .find_sinks(m, OutputPortId(sink))
            .into_iter()
            .collect(),
    };
    if init.is_empty() {
        return Err(Error::InvalidArgument(
            "token order sink has no driven inputs".to_string(),
        ));
    }
    let first = init[0];

    let mut visitor = TokenAnalysisVisitor {
        source,
        requires_source: BTreeMap::new(),
        found_source: false,
        found_or: false,
        found_cycle: false,
    };
    GraphSearch::new(design, m, SearchAlgo::Dfs).go(&mut visitor, init);

    Ok(TokenOrder {
        found_source: visitor.found_source,
        single_source: visitor.requires_source.get(&first).copied().unwrap_or(false),
        reorder_potential: visitor.found_or,
        cyclic: visitor.found_cycle,
    })
}

/// Can tokens passing from `req` to `resp` come back out of order? True
/// when more than one control path exists or an independent dependence can
/// inject extra tokens.
pub fn could_reorder_tokens(
    design: &Design,
    m: ModuleId,
    req: PortId,
    resp: PortId,
) -> CompileResult<bool> {
    let order = token_order_analysis(design, m, req, resp)?;
    if !order.found_source {
        return Err(Error::InvalidArgument(
            "interface responses are not driven by its requests".to_string(),
        ));
    }
    Ok(!order.single_source || order.reorder_potential)
}

struct CycleFindingVisitor<'f> {
    ignore: &'f dyn Fn(&Design, BlockId) -> bool,
    seen: BTreeSet<(OutputPortId, InputPortId)>,
    cycle: Vec<CycleEdge>,
}

impl Visitor for CycleFindingVisitor<'_> {
    type Dir = Forward;
    type Path = QueryPath<Forward>;

    fn visit(&mut self, design: &Design, _m: ModuleId, path: &Self::Path) -> Action {
        let owner = design.input_owner(path.end_port());
        if (self.ignore)(design, owner) {
            Action::TerminatePath
        } else if path.has_cycle() {
            self.cycle = path.extract_cycle();
            Action::TerminateSearch
        } else if !self.seen.insert(path.end()) {
            Action::TerminatePath
        } else {
            Action::Continue
        }
    }

    fn next(
        &mut self,
        design: &Design,
        _m: ModuleId,
        path: &Self::Path,
        out: &mut Vec<OutputPortId>,
    ) -> Action {
        out.extend(design.driven_outputs(path.end_port()));
        Action::Continue
    }
}

/// DFS from the module's internal drivers; returns the first combinational
/// cycle found, skipping paths through ignored blocks. Empty when acyclic.
pub fn find_cycle(
    design: &Design,
    m: ModuleId,
    ignore: &dyn Fn(&Design, BlockId) -> bool,
) -> Vec<CycleEdge> {
    let mut visitor = CycleFindingVisitor {
        ignore,
        seen: BTreeSet::new(),
        cycle: Vec::new(),
    };
    GraphSearch::new(design, m, SearchAlgo::Dfs).go(&mut visitor, design.internal_drivers(m));
    visitor.cycle
}

/// Result of constant propagation over a module.
#[derive(Clone, Debug, Default)]
pub struct Constants {
    pub ports: BTreeSet<PortId>,
    pub blocks: BTreeSet<BlockId>,
}

impl Constants {
    pub fn is_const_output(&self, op: OutputPortId) -> bool {
        self.ports.contains(&op.0)
    }
}

struct ConstFindingVisitor {
    consts: Constants,
    num_const_inputs: BTreeMap<BlockId, usize>,
}

impl ConstFindingVisitor {
    fn add_block(&mut self, design: &Design, b: BlockId) {
        self.consts.blocks.insert(b);
        self.consts
            .ports
            .extend(design.outputs(b).iter().map(|op| op.0));
    }
}

impl Visitor for ConstFindingVisitor {
    type Dir = Forward;
    type Path = VisitPort<Forward>;

    fn visit(&mut self, design: &Design, _m: ModuleId, path: &Self::Path) -> Action {
        let ip = path.end_port();
        self.consts.ports.insert(ip.0);

        let b = design.input_owner(ip);
        let block = design.block(b);
        let count = self.num_const_inputs.entry(b).or_insert(0);
        *count += 1;
        if *count == block.inputs.len() && !block.has_state() {
            self.add_block(design, b);
            Action::Continue
        } else {
            Action::TerminatePath
        }
    }
}

/// BFS from the outputs of every `Constant`. A block becomes constant once
/// all its inputs are reached; a port is constant when its driver is.
/// Adding a constant only ever grows the result.
pub fn find_constants(design: &Design, m: ModuleId) -> Constants {
    let mut visitor = ConstFindingVisitor {
        consts: Constants::default(),
        num_const_inputs: BTreeMap::new(),
    };

    let mut init = Vec::new();
    for b in design.find_all_blocks(m) {
        if matches!(design.block(b).kind, BlockKind::Constant { .. }) {
            visitor.add_block(design, b);
            init.extend(design.outputs(b).iter().copied());
        }
    }
    let seeded = visitor.consts.ports.len();
    GraphSearch::new(design, m, SearchAlgo::Bfs).go(&mut visitor, init);
    debug!(
        "constant propagation grew {seeded} seed ports to {}",
        visitor.consts.ports.len()
    );
    visitor.consts
}

struct DepFindingVisitor {
    rule: Option<DependenceRule>,
    deps: BTreeSet<OutputPortId>,
}

impl Visitor for DepFindingVisitor {
    type Dir = Reverse;
    type Path = Edge<Reverse>;

    fn visit(&mut self, design: &Design, _m: ModuleId, path: &Self::Path) -> Action {
        let op = path.end_port();
        let block = design.block(design.output_owner(op));
        if let Ok(rule) = block.dep_rule(op) {
            self.rule = Some(match &self.rule {
                Some(acc) => acc.combine(&rule),
                None => rule,
            });
        }
        Action::Continue
    }

    fn path_end(&mut self, _design: &Design, _m: ModuleId, path: &Self::Path) -> Action {
        self.deps.insert(path.end_port());
        Action::Continue
    }
}

/// Trace backward from an input and sum the dependence rules met along the
/// way. Returns the terminal source ports and the folded rule.
pub fn find_dependencies(
    design: &Design,
    m: ModuleId,
    ip: InputPortId,
) -> (BTreeSet<OutputPortId>, DependenceRule) {
    let mut visitor = DepFindingVisitor {
        rule: None,
        deps: BTreeSet::new(),
    };
    GraphSearch::new(design, m, SearchAlgo::Dfs).go(&mut visitor, [ip]);
    let rule = visitor
        .rule
        .unwrap_or_else(|| DependenceRule::and_fire_one(Vec::new()));
    (visitor.deps, rule)
}

struct ConsumerVisitor<'f> {
    ignore: &'f dyn Fn(&Design, BlockId) -> bool,
    consumers: BTreeSet<InputPortId>,
}

impl Visitor for ConsumerVisitor<'_> {
    type Dir = Forward;
    type Path = VisitPort<Forward>;

    fn visit(&mut self, design: &Design, _m: ModuleId, path: &Self::Path) -> Action {
        let ip = path.end_port();
        if (self.ignore)(design, design.input_owner(ip)) {
            Action::TerminatePath
        } else {
            self.consumers.insert(ip);
            Action::Continue
        }
    }
}

/// All input ports reachable forward from `op`, stopping at (and not
/// recording) ignored blocks.
pub fn find_consumers(
    design: &Design,
    m: ModuleId,
    op: OutputPortId,
    ignore: &dyn Fn(&Design, BlockId) -> bool,
) -> BTreeSet<InputPortId> {
    let mut visitor = ConsumerVisitor {
        ignore,
        consumers: BTreeSet::new(),
    };
    GraphSearch::new(design, m, SearchAlgo::Dfs).go(&mut visitor, [op]);
    visitor.consumers
}
