// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Prioritized refiner lookup.
//!
//! The collection holds refiners in registration order; that order defines
//! priority when several refiners handle the same block. Lookups are cached
//! per block-kind discriminant, so a refiner's `handles` must depend only
//! on the kind of block it is offered.

use std::collections::HashMap;
use std::mem::{Discriminant, discriminant};

use viaduct_ir::CompileResult;
use viaduct_ir::block::BlockKind;
use viaduct_ir::design::Design;
use viaduct_ir::port::{BlockId, ModuleId};

/// A rewrite of one block into an equivalent finer-grained subgraph.
pub trait Refiner {
    fn name(&self) -> &'static str;

    /// Can this refiner do anything with the block?
    fn handles(&self, design: &Design, b: BlockId) -> bool;

    /// Replace `b` inside `m` with its refinement. Returns false when the
    /// refiner declined; a later refiner may still match.
    fn refine(&self, design: &mut Design, m: ModuleId, b: BlockId) -> CompileResult<bool>;
}

#[derive(Default)]
pub struct PriorityCollection {
    entries: Vec<Box<dyn Refiner>>,
    cache: HashMap<Discriminant<BlockKind>, Vec<usize>>,
}

impl PriorityCollection {
    pub fn append_entry(&mut self, entry: Box<dyn Refiner>) {
        self.entries.push(entry);
        self.cache.clear();
    }

    pub fn prepend_entry(&mut self, entry: Box<dyn Refiner>) {
        self.entries.insert(0, entry);
        self.cache.clear();
    }

    pub fn entry(&self, idx: usize) -> &dyn Refiner {
        self.entries[idx].as_ref()
    }

    /// Indices of the refiners handling this block, in priority order.
    pub fn lookup(&mut self, design: &Design, b: BlockId) -> Vec<usize> {
        let key = discriminant(&design.block(b).kind);
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }
        let matches: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.handles(design, b))
            .map(|(i, _)| i)
            .collect();
        self.cache.insert(key, matches.clone());
        matches
    }
}
