// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Block provenance.
//!
//! Every block carries a record of where it came from. History is purely
//! advisory: it feeds diagnostics and emitted names and never affects
//! semantics. Chains of predecessors form DAGs when an optimization births
//! one block from several.

use crate::port::BlockId;

/// Which compilation stage created a block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HistorySource {
    #[default]
    Unset,
    Unknown,
    Frontend,
    Refinement,
    Optimization,
}

#[derive(Clone, Debug, Default)]
pub struct History {
    source: HistorySource,
    parents: Vec<BlockId>,
    meta: String,
}

impl History {
    pub fn source(&self) -> HistorySource {
        self.source
    }

    pub fn parents(&self) -> &[BlockId] {
        &self.parents
    }

    pub fn meta(&self) -> &str {
        &self.meta
    }

    pub fn set_meta(&mut self, meta: impl Into<String>) {
        self.meta = meta.into();
    }

    pub fn set_unknown(&mut self) {
        self.source = HistorySource::Unknown;
    }

    pub fn set_frontend(&mut self, meta: impl Into<String>) {
        self.source = HistorySource::Frontend;
        self.meta = meta.into();
    }

    pub fn set_refinement(&mut self, parent: BlockId) {
        self.source = HistorySource::Refinement;
        self.parents = vec![parent];
    }

    pub fn set_optimization(&mut self, parent: Option<BlockId>) {
        self.source = HistorySource::Optimization;
        self.parents = parent.into_iter().collect();
    }

    pub fn set_optimization_of(&mut self, parents: Vec<BlockId>) {
        self.source = HistorySource::Optimization;
        self.parents = parents;
    }

    /// One line per history entry, for diagnostics.
    pub fn describe(&self) -> String {
        let src = match self.source {
            HistorySource::Unset => "unset",
            HistorySource::Unknown => "unknown",
            HistorySource::Frontend => "frontend",
            HistorySource::Refinement => "refinement",
            HistorySource::Optimization => "optimization",
        };
        if self.meta.is_empty() {
            format!("{src} ({} parents)", self.parents.len())
        } else {
            format!("{src} [{}] ({} parents)", self.meta, self.parents.len())
        }
    }
}
