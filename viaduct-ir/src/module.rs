// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Modules: named containers of blocks.
//!
//! A module's external ports belong to its facade block (a
//! [`BlockKind::ModuleRef`](crate::block::BlockKind) living in the parent
//! module). Internally, every external input is paired with a boundary
//! `Dummy` block whose output drives the member blocks, and every external
//! output with a `Dummy` whose input collects the result. Transparent
//! modules expose a mutable connection database; a finalized scheduled
//! region does not.

use std::collections::{BTreeMap, BTreeSet};

use crate::conns::ConnectionDB;
use crate::port::{BlockId, InputPortId, ModuleId, OutputPortId, PortId};

#[derive(Debug)]
pub enum ModuleKind {
    /// Plain container of blocks; always mutable.
    Container,
    /// A statically scheduled region. Mutable until finalized.
    Region(RegionSchedule),
}

#[derive(Debug)]
pub struct Module {
    pub name: String,
    pub kind: ModuleKind,
    pub conns: ConnectionDB,
    /// The facade block representing this module in its parent.
    pub block: BlockId,
    pub parent: Option<ModuleId>,
    /// External input port -> the internal boundary dummy.
    pub port_drivers: BTreeMap<InputPortId, BlockId>,
    /// External output port -> the internal boundary dummy.
    pub port_sinks: BTreeMap<OutputPortId, BlockId>,
}

impl Module {
    pub fn new(name: impl Into<String>, kind: ModuleKind, block: BlockId) -> Module {
        Module {
            name: name.into(),
            kind,
            conns: ConnectionDB::default(),
            block,
            parent: None,
            port_drivers: BTreeMap::new(),
            port_sinks: BTreeMap::new(),
        }
    }

    pub fn is_region(&self) -> bool {
        matches!(self.kind, ModuleKind::Region(_))
    }

    pub fn schedule(&self) -> Option<&RegionSchedule> {
        match &self.kind {
            ModuleKind::Region(s) => Some(s),
            ModuleKind::Container => None,
        }
    }

    pub fn schedule_mut(&mut self) -> Option<&mut RegionSchedule> {
        match &mut self.kind {
            ModuleKind::Region(s) => Some(s),
            ModuleKind::Container => None,
        }
    }

    /// May passes rewrite this module's graph?
    pub fn can_mutate(&self) -> bool {
        match &self.kind {
            ModuleKind::Container => true,
            ModuleKind::Region(s) => !s.finalized,
        }
    }
}

/// One clock of a region's static schedule.
#[derive(Clone, Debug, Default)]
pub struct CycleInfo {
    /// Outputs whose values are produced this cycle.
    pub new_values: BTreeSet<OutputPortId>,
    /// Outputs whose values must (still) be available this cycle.
    pub available: BTreeSet<OutputPortId>,
    /// Inputs consuming their token this cycle.
    pub firing: BTreeSet<InputPortId>,
}

/// The per-cycle schedule of a finalized region.
///
/// `cycle_idx` is authoritative for member ports only; ports owned by
/// boundary dummies are not recorded.
#[derive(Debug, Default)]
pub struct RegionSchedule {
    pub cycles: Vec<CycleInfo>,
    pub cycle_idx: BTreeMap<PortId, usize>,
    pub external_inputs: BTreeSet<InputPortId>,
    pub external_outputs: BTreeSet<OutputPortId>,
    pub internal_inputs: BTreeSet<InputPortId>,
    pub internal_outputs: BTreeSet<OutputPortId>,
    pub finalized: bool,
}

impl RegionSchedule {
    /// How many clock cycles the region takes to compute.
    pub fn clocks(&self) -> usize {
        self.cycles.len()
    }

    pub fn cycle_of(&self, port: PortId) -> Option<usize> {
        self.cycle_idx.get(&port).copied()
    }
}
