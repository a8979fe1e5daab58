// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Carving a module into scheduled regions.

use std::collections::{BTreeSet, VecDeque};

use log::info;

use viaduct_analysis::queries::find_constants;
use viaduct_ir::CompileResult;
use viaduct_ir::design::Design;
use viaduct_ir::port::{BlockId, InputPortId, ModuleId};

use crate::builder::{RegionBuilder, block_allowed_full};

/// Walk backward from the module outputs, seeding a region on every
/// full-member-eligible driver met along the way. Successfully finalized
/// regions continue the walk at their external inputs; failures fall back
/// to treating the seed as an ordinary block. Returns the number of
/// regions formed.
pub fn form_scheduled_regions(design: &mut Design, m: ModuleId) -> CompileResult<usize> {
    if design.module(m).is_region() {
        return Ok(0);
    }

    info!(
        "forming module '{}' into scheduled regions",
        design.module(m).name
    );

    let const_ports = find_constants(design, m).ports;

    let mut counter = 1usize;
    let mut seen: BTreeSet<BlockId> = BTreeSet::new();
    let mut inputs_to_see: VecDeque<InputPortId> = VecDeque::new();

    // Start with the module outputs.
    for op in design.module_outputs(m) {
        if let Some(sink) = design.sink_of(m, op) {
            inputs_to_see.push_back(sink);
        }
    }

    while let Some(ip) = inputs_to_see.pop_front() {
        if design.ports.get(ip.0).is_none() {
            continue;
        }
        let Some(driver) = design.find_source(m, ip) else {
            // An undriven input. Odd, but nothing to grow from.
            continue;
        };

        let b = design.output_owner(driver);
        if design.block(b).module != Some(m) {
            // Relocated into a region since it was queued.
            continue;
        }

        if !block_allowed_full(design, b) {
            // Not schedulable; keep searching upstream of it.
            if seen.insert(b) {
                inputs_to_see.extend(design.inputs(b).iter().copied());
            }
            continue;
        }

        let name = format!("{}_sr{}", design.module(m).name, counter);
        let mut builder = RegionBuilder::new(design, m, b, name, const_ports.clone())?;
        builder.grow(design);
        match builder.finalize(design, driver)? {
            Some(region) => {
                inputs_to_see.extend(design.module_inputs(region));
                counter += 1;
            }
            None => {
                seen.insert(b);
                inputs_to_see.extend(design.inputs(b).iter().copied());
            }
        }
    }

    let regions = counter - 1;
    info!("formed {regions} scheduled regions");
    Ok(regions)
}
