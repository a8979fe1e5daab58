// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! `viaduct-refine` - The refinement engine.
//!
//! Refinement rewrites a block into a semantically equivalent subgraph
//! closer to backend primitives. A [prioritized collection](crate::collection)
//! of [refiners](crate::collection::Refiner) is driven to a
//! [fixed point](crate::refinery) per module; a
//! [stop condition](crate::stop) identifies the blocks the backend can
//! synthesize directly, ending refinement.

pub mod collection;
pub mod refiners;
pub mod refinery;
pub mod stop;
