// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! `viaduct-analysis` - Graph searches and queries over the Viaduct IR.
//!
//! The [search framework](crate::search) walks port-to-port edges with
//! pluggable path representations and visitor hooks; the
//! [queries](crate::queries) built on it answer the questions the
//! refinement, region-forming and pipelining stages ask: where are the
//! cycles, what is constant, what does a port depend on, who consumes a
//! value.

pub mod queries;
pub mod search;
