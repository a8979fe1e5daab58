// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! `viaduct-region` - Scheduled-region construction.
//!
//! A scheduled region is a group of blocks which can be statically
//! scheduled: once all its inputs are available (t = 0), the cycle on which
//! every member port fires is known relative to t. Regions must obey the
//! LI-BDN restrictions - NED (no extraneous dependency: every external
//! output depends on every external input) and SC (self cleaning) - so a
//! candidate region is grown to its maximum extent and then pruned until
//! the restrictions hold.
//!
//! [`builder::RegionBuilder`] performs the grow / prune / absorb / schedule
//! steps for one seed; [`form::form_scheduled_regions`] drives it across a
//! module.

pub mod builder;
pub mod form;
