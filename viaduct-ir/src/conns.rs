// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The per-module connection database.
//!
//! Provides fast lookup of which input ports are driven by an output port
//! and which output port drives an input port. The blocks contained by a
//! module are implicitly defined by the ports involved in connections; the
//! database keeps a use count per block so membership and destruction
//! eligibility fall out of connect/disconnect traffic.
//!
//! Mutations happen through [`crate::design::Design`], which owns the port
//! and block arenas needed for type checking and block registration. Every
//! mutating operation bumps a monotonically increasing change counter that
//! downstream caches use as a version number.

use std::collections::{BTreeMap, BTreeSet};

use slotmap::SecondaryMap;

use crate::port::{BlockId, InputPortId, OutputPortId};

/// A directed connection: `source` drives `sink`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Connection {
    pub source: OutputPortId,
    pub sink: InputPortId,
}

#[derive(Default, Debug)]
pub struct ConnectionDB {
    change_counter: u64,

    sink_idx: BTreeMap<OutputPortId, BTreeSet<InputPortId>>,
    source_idx: BTreeMap<InputPortId, OutputPortId>,

    use_counts: SecondaryMap<BlockId, u64>,
    blacklist: BTreeSet<BlockId>,
    new_blocks: BTreeSet<BlockId>,
    hidden: BTreeSet<(OutputPortId, InputPortId)>,

    // Rewires requested before the affected connections exist; applied when
    // a later connect touches the remapped port.
    pub(crate) input_rewrites: BTreeMap<InputPortId, Vec<InputPortId>>,
    pub(crate) output_rewrites: BTreeMap<OutputPortId, OutputPortId>,
}

impl ConnectionDB {
    /// The version number of this database. Strictly increases on every
    /// mutating operation.
    pub fn change_counter(&self) -> u64 {
        self.change_counter
    }

    pub(crate) fn bump(&mut self) {
        self.change_counter += 1;
    }

    pub fn num_connections(&self) -> usize {
        self.source_idx.len()
    }

    /// All connections, in sink order.
    pub fn connections(&self) -> impl Iterator<Item = Connection> + '_ {
        self.source_idx.iter().map(|(&sink, &source)| Connection { source, sink })
    }

    pub fn find_source(&self, ip: InputPortId) -> Option<OutputPortId> {
        self.source_idx.get(&ip).copied()
    }

    pub fn find_sinks(&self, op: OutputPortId) -> BTreeSet<InputPortId> {
        self.sink_idx.get(&op).cloned().unwrap_or_default()
    }

    pub fn count_sinks(&self, op: OutputPortId) -> usize {
        self.sink_idx.get(&op).map_or(0, BTreeSet::len)
    }

    pub fn exists(&self, op: OutputPortId, ip: InputPortId) -> bool {
        self.find_source(ip) == Some(op)
    }

    /// The raw sink index, for passes that scan fan-out in bulk.
    pub fn sinks_raw(&self) -> &BTreeMap<OutputPortId, BTreeSet<InputPortId>> {
        &self.sink_idx
    }

    pub(crate) fn insert(&mut self, op: OutputPortId, ip: InputPortId) {
        self.sink_idx.entry(op).or_default().insert(ip);
        self.source_idx.insert(ip, op);
        self.bump();
    }

    /// Remove the connection, if present. Returns whether anything changed.
    pub(crate) fn remove(&mut self, op: OutputPortId, ip: InputPortId) -> bool {
        let mut removed = false;
        if let Some(sinks) = self.sink_idx.get_mut(&op) {
            removed = sinks.remove(&ip);
            if sinks.is_empty() {
                self.sink_idx.remove(&op);
            }
        }
        if self.source_idx.get(&ip) == Some(&op) {
            self.source_idx.remove(&ip);
            removed = true;
        }
        if removed {
            self.hidden.remove(&(op, ip));
            self.bump();
        }
        removed
    }

    /// Connections touching a blacklisted endpoint are flagged so printers
    /// and stats can skip boundary plumbing.
    pub(crate) fn mark_hidden(&mut self, op: OutputPortId, ip: InputPortId) {
        self.hidden.insert((op, ip));
    }

    pub fn is_hidden(&self, op: OutputPortId, ip: InputPortId) -> bool {
        self.hidden.contains(&(op, ip))
    }

    // Use counting. A block is a member of the module while any of its
    // ports participates in a connection.

    pub(crate) fn increment_use(&mut self, b: BlockId) -> bool {
        let count = self.use_counts.entry(b).unwrap().or_insert(0);
        *count += 1;
        if *count == 1 {
            self.new_blocks.insert(b);
            true
        } else {
            false
        }
    }

    /// Returns true when the count reached zero and the block became
    /// eligible for destruction.
    pub(crate) fn decrement_use(&mut self, b: BlockId) -> bool {
        match self.use_counts.get_mut(b) {
            Some(count) if *count > 0 => {
                *count -= 1;
                *count == 0
            }
            _ => false,
        }
    }

    pub fn is_used(&self, b: BlockId) -> bool {
        self.use_counts.get(b).is_some_and(|&c| c >= 1)
    }

    /// Blocks with use count >= 1 that are not blacklisted.
    pub fn all_blocks(&self) -> Vec<BlockId> {
        self.use_counts
            .iter()
            .filter(|&(b, &count)| count >= 1 && !self.blacklist.contains(&b))
            .map(|(b, _)| b)
            .collect()
    }

    /// Blocks registered since the last call, typically read by a driver
    /// that needs to stamp history onto freshly created blocks.
    pub fn read_and_clear_new_blocks(&mut self) -> BTreeSet<BlockId> {
        std::mem::take(&mut self.new_blocks)
    }

    // Blacklisting hides blocks from normal queries. The module
    // infrastructure uses it for boundary dummies.

    pub fn add_to_blacklist(&mut self, b: BlockId) {
        self.blacklist.insert(b);
        self.bump();
    }

    pub fn remove_from_blacklist(&mut self, b: BlockId) {
        self.blacklist.remove(&b);
        self.bump();
    }

    pub fn is_blacklisted(&self, b: BlockId) -> bool {
        self.blacklist.contains(&b)
    }
}
