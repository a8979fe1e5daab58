// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Graph simplification.
//!
//! Removes no-ops (identities, single-input selects, single-output
//! routers, empty extracts, two-field multiplexers), folds constants
//! through pure blocks, merges families of extracts into splits,
//! eliminates no-op split/join pairs and drops blocks that drive nothing.
//! Applied iteratively until convergence.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use viaduct_analysis::search::{Action, Edge, GraphSearch, Reverse, SearchAlgo, SearchPath, Visitor};
use viaduct_ir::block::BlockKind;
use viaduct_ir::design::Design;
use viaduct_ir::eval::eval_function;
use viaduct_ir::port::{BlockId, InputPortId, InputType, ModuleId, OutputPortId, OutputType};
use viaduct_ir::types::Value;
use viaduct_ir::CompileResult;

use crate::pass::ModulePass;
use crate::transform::Transformer;

fn alive(design: &Design, m: ModuleId, b: BlockId) -> bool {
    design.blocks.contains_key(b) && design.module(m).conns.is_used(b)
}

pub struct SimplifyPass;

impl ModulePass for SimplifyPass {
    fn name(&self) -> &'static str {
        "simplify"
    }

    fn run_on_module(&mut self, design: &mut Design, m: ModuleId) -> CompileResult<()> {
        loop {
            if !simplify_once(design, m)? {
                break;
            }
        }
        Ok(())
    }
}

fn simplify_once(design: &mut Design, m: ModuleId) -> CompileResult<bool> {
    let t = Transformer::new(m);
    if !t.can_mutate(design) {
        return Ok(false);
    }
    let before = design.module(m).conns.change_counter();
    let orig_count = design.find_all_blocks(m).len();

    // No-ops first.
    for b in design.find_all_blocks(m) {
        if !alive(design, m, b) {
            continue;
        }
        match &design.block(b).kind {
            BlockKind::Identity => t.remove(design, b)?,
            BlockKind::Select if design.block(b).inputs.len() == 1 => t.remove(design, b)?,
            BlockKind::Extract { path } if path.is_empty() => t.remove(design, b)?,
            BlockKind::Router if design.block(b).outputs.len() == 1 => {
                // A one-way router only strips the selector.
                let din_ty = design.input_type(design.block(b).din()).clone();
                let e = design.add_extract(din_ty, vec![1])?;
                design.block_mut(e).history.set_optimization(Some(b));
                t.replace(design, b, e)?;
            }
            BlockKind::Multiplexer => {
                let din_ty = design.input_type(design.block(b).din()).clone();
                if din_ty.num_elements() == 2 {
                    // Just a selector and one data field.
                    let e = design.add_extract(din_ty, vec![1])?;
                    design.block_mut(e).history.set_optimization(Some(b));
                    t.replace(design, b, e)?;
                }
            }
            _ => {}
        }
    }

    fold_constants(design, m, &t)?;
    merge_extracts_into_splits(design, m)?;
    eliminate_split_join_pairs(design, m)?;

    // Blocks that drive nothing can go, except sinks and submodules.
    for b in design.find_all_blocks(m) {
        if !alive(design, m, b) {
            continue;
        }
        let block = design.block(b);
        if block.outputs.is_empty() || matches!(block.kind, BlockKind::ModuleRef(_)) {
            continue;
        }
        let no_sinks = block
            .outputs
            .clone()
            .iter()
            .all(|&op| design.count_sinks(m, op) == 0);
        if no_sinks {
            t.trash(design, b);
        }
    }

    let now = design.find_all_blocks(m).len();
    if now < orig_count {
        debug!(
            "simplified '{}' from {orig_count} to {now} blocks",
            design.module(m).name
        );
    }
    Ok(design.module(m).conns.change_counter() != before)
}

/// Fold pure single-output blocks whose every input is fed by a Constant
/// into an equivalent Constant.
fn fold_constants(design: &mut Design, m: ModuleId, t: &Transformer) -> CompileResult<()> {
    for b in design.find_all_blocks(m) {
        if !alive(design, m, b) {
            continue;
        }
        let block = design.block(b);
        if block.outputs.len() != 1 || block.has_state() {
            continue;
        }
        let foldable = block.kind.is_function()
            || matches!(
                block.kind,
                BlockKind::Join | BlockKind::Extract { .. } | BlockKind::Cast
            );
        if !foldable {
            continue;
        }

        let mut vals = Vec::new();
        let mut all_const = !block.inputs.is_empty();
        for &ip in &block.inputs {
            let val = design.find_source(m, ip).and_then(|src| {
                match &design.block(design.output_owner(src)).kind {
                    BlockKind::Constant { value } => Some(value.clone()),
                    _ => None,
                }
            });
            match val {
                Some(v) => vals.push(v),
                None => {
                    all_const = false;
                    break;
                }
            }
        }
        if !all_const {
            continue;
        }

        let dout = design.block(b).dout();
        let out_ty = design.output_type(dout).clone();
        let evaluated = match &design.block(b).kind {
            BlockKind::Join => Some(Value::Struct(vals)),
            BlockKind::Extract { path } => vals[0].extracted(path).ok(),
            BlockKind::Cast => Some(vals[0].clone()),
            kind => {
                let args = match &vals[0] {
                    Value::Struct(elems) if vals.len() == 1 => elems.clone(),
                    _ => vals.clone(),
                };
                eval_function(kind, &args, &out_ty)
            }
        };

        let Some(value) = evaluated else { continue };
        if value.type_of() != out_ty {
            continue;
        }
        let c = design.add_constant(value);
        design.block_mut(c).history.set_optimization(Some(b));
        design.remap_output(m, dout, design.block(c).dout())?;
        t.trash(design, b);
    }
    Ok(())
}

/// When two or more fields of one value are extracted, convert the family
/// of Extracts to a single Split.
fn merge_extracts_into_splits(design: &mut Design, m: ModuleId) -> CompileResult<()> {
    let mut fields_used: BTreeMap<OutputPortId, BTreeSet<usize>> = BTreeMap::new();
    for b in design.find_all_blocks(m) {
        if let BlockKind::Extract { path } = &design.block(b).kind {
            if path.is_empty() {
                continue;
            }
            let first = path[0];
            if let Some(src) = design.find_source(m, design.block(b).din()) {
                fields_used.entry(src).or_default().insert(first);
            }
        }
    }

    for (src, fields) in fields_used {
        if fields.len() < 2 || design.ports.get(src.0).is_none() {
            continue;
        }
        let src_ty = design.output_type(src).clone();
        if !src_ty.is_composite() {
            continue;
        }
        let split = design.add_split(src_ty.clone())?;
        design.connect(m, src, design.block(split).din())?;

        for sink in design.find_sinks(m, src) {
            let owner = design.input_owner(sink);
            let path = match &design.block(owner).kind {
                BlockKind::Extract { path } if !path.is_empty() => path.clone(),
                _ => continue,
            };
            let field = path[0];
            let rest: Vec<usize> = path[1..].to_vec();
            design.disconnect(m, src, sink);

            let mut new_op = design.block(split).outputs[field];
            if !rest.is_empty() {
                let elem_ty = design.output_type(new_op).clone();
                let ne = design.add_extract(elem_ty, rest)?;
                design.block_mut(ne).history.set_optimization(Some(owner));
                design.connect(m, new_op, design.block(ne).din())?;
                new_op = design.block(ne).dout();
            }

            let dout = design.block(owner).dout();
            for user in design.find_sinks(m, dout) {
                design.disconnect(m, dout, user);
                design.connect(m, new_op, user)?;
            }
            design.remove_block(m, owner);
        }
    }
    Ok(())
}

/// A Join fed by the same Split, element for element in order, is a no-op
/// pair: splice the split's source straight through to the join's sinks.
fn eliminate_split_join_pairs(design: &mut Design, m: ModuleId) -> CompileResult<()> {
    for b in design.find_all_blocks(m) {
        if !alive(design, m, b) || !matches!(design.block(b).kind, BlockKind::Join) {
            continue;
        }

        let join_inputs = design.block(b).inputs.clone();
        let mut split = None;
        let mut ordered = true;
        for (i, &ip) in join_inputs.iter().enumerate() {
            let Some(driver) = design.find_source(m, ip) else {
                ordered = false;
                break;
            };
            let owner = design.output_owner(driver);
            if !matches!(design.block(owner).kind, BlockKind::Split) {
                ordered = false;
                break;
            }
            match split {
                None => split = Some(owner),
                Some(s) if s != owner => {
                    ordered = false;
                    break;
                }
                _ => {}
            }
            if design.block(owner).outputs.len() != join_inputs.len()
                || design.block(owner).outputs[i] != driver
            {
                ordered = false;
                break;
            }
        }

        let Some(split) = split else { continue };
        if !ordered {
            continue;
        }
        let Some(split_driver) = design.find_source(m, design.block(split).din()) else {
            continue;
        };

        let join_out = design.block(b).dout();
        for sink in design.find_sinks(m, join_out) {
            design.disconnect(m, join_out, sink);
            design.connect(m, split_driver, sink)?;
        }
        design.remove_block(m, b);
        design.remove_block(m, split);
    }
    Ok(())
}

/// Rebuild each block input in canonical form.
///
/// Frontends leave chains of Extracts, Splits, Joins, Identities, Casts
/// and Waits between a value's producer and its consumer. Walking the
/// chain collapses it to at most one Extract, one Cast and one Wait
/// (carrying whatever ordering tokens the chain implied), connected
/// straight to the originating source.
pub struct CanonicalizeInputsPass;

impl ModulePass for CanonicalizeInputsPass {
    fn name(&self) -> &'static str {
        "canonicalize-inputs"
    }

    fn run_on_module(&mut self, design: &mut Design, m: ModuleId) -> CompileResult<()> {
        let t = Transformer::new(m);
        if !t.can_mutate(design) {
            return Ok(());
        }
        for b in design.find_all_blocks(m) {
            if matches!(
                design.block(b).kind,
                BlockKind::Extract { .. }
                    | BlockKind::Identity
                    | BlockKind::Split
                    | BlockKind::Cast
                    | BlockKind::Wait
            ) {
                continue;
            }
            for ip in design.block(b).inputs.clone() {
                canonicalize_input(design, m, ip)?;
            }
        }
        Ok(())
    }
}

fn canonicalize_input(design: &mut Design, m: ModuleId, target: InputPortId) -> CompileResult<()> {
    // Sources this input must wait on without actually depending on their
    // data.
    let mut waits: BTreeSet<OutputPortId> = BTreeSet::new();
    let mut cast = false;
    let mut extractions: std::collections::VecDeque<usize> = std::collections::VecDeque::new();

    let mut source = None;
    let mut ip = Some(target);
    let mut hops = 0usize;
    while let Some(cur) = ip {
        // A cyclic chain would walk forever; nothing upstream of a cycle
        // can be canonical anyway.
        hops += 1;
        if hops > design.ports.len() {
            return Ok(());
        }
        let Some(found) = design.find_source(m, cur) else {
            break;
        };
        source = Some(found);

        let b = design.output_owner(found);
        ip = match &design.block(b).kind {
            BlockKind::Extract { path } => {
                for &idx in path.iter().rev() {
                    extractions.push_front(idx);
                }
                Some(design.block(b).din())
            }
            BlockKind::Split => {
                let idx = design
                    .block(b)
                    .outputs
                    .iter()
                    .position(|&op| op == found)
                    .unwrap_or(0);
                extractions.push_front(idx);
                Some(design.block(b).din())
            }
            BlockKind::Join => {
                match extractions.pop_front() {
                    // The whole joined value is needed; keep the join and
                    // end the walk here.
                    None => None,
                    Some(idx) => {
                        waits.insert(found);
                        design.block(b).inputs.get(idx).copied()
                    }
                }
            }
            BlockKind::Identity => Some(design.block(b).din()),
            BlockKind::Cast => {
                cast = true;
                Some(design.block(b).din())
            }
            BlockKind::Wait => {
                for &control in design.block(b).controls() {
                    if let Some(wsource) = design.find_source(m, control) {
                        waits.insert(wsource);
                    }
                }
                Some(design.block(b).din())
            }
            _ => None,
        };
    }

    let current = design.find_source(m, target);
    let Some(mut source) = source else {
        return Ok(());
    };
    if Some(source) == current {
        return Ok(());
    }
    if let Some(current) = current {
        design.disconnect(m, current, target);
    }

    if design.input_type(target).is_void() {
        // A void consumer only needs the ordering, not the data.
        waits.insert(source);
        let c = design.add_constant(Value::Void);
        design.block_mut(c).history.set_optimization(None);
        source = design.block(c).dout();
    } else {
        if !extractions.is_empty() {
            let src_ty = design.output_type(source).clone();
            let e = design.add_extract(src_ty, extractions.into_iter().collect())?;
            design.block_mut(e).history.set_optimization(None);
            design.connect(m, source, design.block(e).din())?;
            source = design.block(e).dout();
        }

        if cast {
            let from = design.output_type(source).clone();
            let to = design.input_type(target).clone();
            let c = design.add_cast(from, to)?;
            design.block_mut(c).history.set_optimization(None);
            design.connect(m, source, design.block(c).din())?;
            source = design.block(c).dout();
        }
    }

    if !waits.is_empty() {
        let ty = design.output_type(source).clone();
        let w = design.add_wait(ty);
        design.block_mut(w).history.set_optimization(None);
        design.connect(m, source, design.block(w).din())?;
        source = design.block(w).dout();
        for op in waits {
            let ctrl_ty = design.output_type(op).clone();
            let ctrl = design.add_wait_control(w, ctrl_ty);
            design.connect(m, op, ctrl)?;
        }
    }

    design.connect(m, source, target)
}

/// Drop Wait controls that the data path already dominates: a control
/// whose token provably arrives with the data adds no ordering.
pub struct SimplifyWaitsPass;

impl ModulePass for SimplifyWaitsPass {
    fn name(&self) -> &'static str {
        "simplify-waits"
    }

    fn run_on_module(&mut self, design: &mut Design, m: ModuleId) -> CompileResult<()> {
        let t = Transformer::new(m);
        if !t.can_mutate(design) {
            return Ok(());
        }
        for b in design.find_all_blocks(m) {
            if alive(design, m, b) && matches!(design.block(b).kind, BlockKind::Wait) {
                collect_controls(design, m, b)?;
            }
        }
        Ok(())
    }
}

struct WaitDominatorVisitor {
    second_pass: bool,
    all_dominators: BTreeSet<OutputPortId>,
    init_points: BTreeSet<OutputPortId>,
}

impl Visitor for WaitDominatorVisitor {
    type Dir = Reverse;
    type Path = Edge<Reverse>;

    fn visit(&mut self, design: &Design, _m: ModuleId, path: &Self::Path) -> Action {
        let op = path.end_port();
        if !self.second_pass {
            self.all_dominators.insert(op);
        }

        let block = design.block(design.output_owner(op));
        let always_and = block
            .dep_rule(op)
            .is_ok_and(|r| r.input_type == InputType::And && r.output_type == OutputType::Always);
        if !always_and || matches!(block.kind, BlockKind::Constant { .. }) {
            return Action::TerminatePath;
        }
        Action::Continue
    }

    fn path_end(&mut self, design: &Design, _m: ModuleId, path: &Self::Path) -> Action {
        let op = path.end_port();
        let block = design.block(design.output_owner(op));
        if matches!(block.kind, BlockKind::Constant { .. }) || self.all_dominators.contains(&op) {
            return Action::Continue;
        }
        if self.second_pass {
            self.init_points.insert(op);
        }
        Action::Continue
    }
}

fn collect_controls(design: &mut Design, m: ModuleId, wait: BlockId) -> CompileResult<()> {
    let din = design.block(wait).din();
    let dout = design.block(wait).dout();
    let controls: Vec<InputPortId> = design.block(wait).controls().to_vec();

    let mut visitor = WaitDominatorVisitor {
        second_pass: false,
        all_dominators: BTreeSet::new(),
        init_points: BTreeSet::new(),
    };
    GraphSearch::new(design, m, SearchAlgo::Dfs).go(&mut visitor, [din]);
    visitor.second_pass = true;
    GraphSearch::new(design, m, SearchAlgo::Dfs).go(&mut visitor, controls);

    if visitor.init_points.is_empty() {
        // Every control is dominated by the data path: the wait is a no-op.
        if let Some(driver) = design.find_source(m, din) {
            design.disconnect(m, driver, din);
            design.remap_output(m, dout, driver)?;
        }
        design.remove_block(m, wait);
    } else if visitor.init_points.len() < controls_driver_count(design, m, wait) {
        let ty = design.input_type(din).clone();
        let new_wait = design.add_wait(ty);
        design.block_mut(new_wait).history.set_optimization(Some(wait));
        design.remap_input(m, din, vec![design.block(new_wait).din()])?;
        design.remap_output(m, dout, design.block(new_wait).dout())?;

        for op in visitor.init_points {
            let ctrl_ty = design.output_type(op).clone();
            let ctrl = design.add_wait_control(new_wait, ctrl_ty);
            design.connect(m, op, ctrl)?;
        }
        design.remove_block(m, wait);
    }
    Ok(())
}

fn controls_driver_count(design: &Design, m: ModuleId, wait: BlockId) -> usize {
    design
        .block(wait)
        .controls()
        .iter()
        .filter(|&&c| design.find_source(m, c).is_some())
        .count()
}
