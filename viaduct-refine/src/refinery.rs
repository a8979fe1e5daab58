// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The fixed-point refinement driver.

use log::{debug, info};

use viaduct_ir::CompileResult;
use viaduct_ir::design::Design;
use viaduct_ir::port::ModuleId;

use crate::collection::PriorityCollection;
use crate::stop::StopCondition;

/// Iteratively scan the module's blocks, trying refiners in priority order
/// on everything the stop condition does not protect. The first successful
/// refiner wins a block; the scan repeats until a whole pass produces no
/// refinements. Returns the number of productive passes.
///
/// Blocks that cannot be refined are left unchanged; the caller reports
/// them through [`StopCondition::unrefined`].
pub fn refine_module(
    design: &mut Design,
    m: ModuleId,
    collection: &mut PriorityCollection,
    stop: Option<&dyn StopCondition>,
) -> CompileResult<u32> {
    let mut passes = 0;
    loop {
        let mut found_refinement = false;
        for b in design.find_all_blocks(m) {
            // A previous refinement in this pass may have removed or
            // disconnected the block.
            if !design.blocks.contains_key(b) || !design.module(m).conns.is_used(b) {
                continue;
            }
            if stop.is_some_and(|sc| sc.stop_refine(design, b)) {
                continue;
            }

            for idx in collection.lookup(design, b) {
                let refiner = collection.entry(idx);
                if refiner.refine(design, m, b)? {
                    debug!(
                        "refined a {} block with '{}'",
                        design.blocks.get(b).map_or("removed", |blk| blk.kind.kind_name()),
                        collection.entry(idx).name()
                    );
                    found_refinement = true;
                    break;
                }
            }
        }

        if found_refinement {
            passes += 1;
        } else {
            break;
        }
    }

    info!(
        "{} refinement passes on '{}'",
        passes,
        design.module(m).name
    );
    Ok(passes)
}
