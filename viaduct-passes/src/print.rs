// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Diagnostic printers: graphviz, text listings and block statistics.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use slotmap::Key;

use viaduct_ir::block::BlockKind;
use viaduct_ir::design::Design;
use viaduct_ir::port::{BlockId, ModuleId};
use viaduct_ir::{CompileResult, Error};

use crate::pass::ModulePass;

fn io_err(e: std::io::Error) -> Error {
    Error::ExternalError(format!("diagnostic write failed: {e}"))
}

fn node_id(b: BlockId) -> String {
    format!("b{}", b.data().as_ffi())
}

/// Write one module's connection graph as graphviz.
pub fn write_graphviz(design: &Design, m: ModuleId, path: &Path) -> CompileResult<()> {
    let mut f = File::create(path).map_err(io_err)?;
    writeln!(f, "digraph {} {{", design.module(m).name).map_err(io_err)?;

    for b in design.find_all_blocks(m) {
        let block = design.block(b);
        let attrs = match &block.kind {
            BlockKind::PipelineRegister => "shape=rectangle,label=\"reg\"".to_string(),
            _ => format!(
                "shape=component,label=\"{}\\n{}\\n{}\"",
                design.global_name(b),
                block.print(),
                block.kind.kind_name()
            ),
        };
        writeln!(f, "    {}[{}];", node_id(b), attrs).map_err(io_err)?;
    }

    for c in design.module(m).conns.connections() {
        if design.module(m).conns.is_hidden(c.source, c.sink) {
            continue;
        }
        let src_owner = design.output_owner(c.source);
        let sink_owner = design.input_owner(c.sink);
        let op_name = design
            .port(c.source.0)
            .name
            .clone()
            .unwrap_or_else(|| design.port_num(c.source.0).to_string());
        let ip_name = design
            .port(c.sink.0)
            .name
            .clone()
            .unwrap_or_else(|| design.port_num(c.sink.0).to_string());
        writeln!(
            f,
            "    {} -> {}[label=\"{}\\n{}\\n{}\",fontsize=8.0];",
            node_id(src_owner),
            node_id(sink_owner),
            op_name,
            ip_name,
            design.output_type(c.source)
        )
        .map_err(io_err)?;
    }

    writeln!(f, "}}").map_err(io_err)
}

/// Emits `<module>_<tag>NNN.gv` per module each time it runs.
pub struct GraphvizPass {
    tag: String,
    dir: PathBuf,
    counters: BTreeMap<ModuleId, u32>,
}

impl GraphvizPass {
    pub fn new(tag: impl Into<String>, dir: PathBuf) -> Self {
        GraphvizPass {
            tag: tag.into(),
            dir,
            counters: BTreeMap::new(),
        }
    }
}

impl ModulePass for GraphvizPass {
    fn name(&self) -> &'static str {
        "print-graphviz"
    }

    fn run_on_module(&mut self, design: &mut Design, m: ModuleId) -> CompileResult<()> {
        let ctr = self.counters.entry(m).or_insert(0);
        let fname = self
            .dir
            .join(format!("{}_{}{:03}.gv", design.module(m).name, self.tag, ctr));
        *ctr += 1;
        write_graphviz(design, m, &fname)
    }
}

/// Emits `<module>_<tag>NNN.txt` connection listings.
pub struct TextPrinterPass {
    tag: String,
    dir: PathBuf,
    counters: BTreeMap<ModuleId, u32>,
}

impl TextPrinterPass {
    pub fn new(tag: impl Into<String>, dir: PathBuf) -> Self {
        TextPrinterPass {
            tag: tag.into(),
            dir,
            counters: BTreeMap::new(),
        }
    }
}

impl ModulePass for TextPrinterPass {
    fn name(&self) -> &'static str {
        "print-text"
    }

    fn run_on_module(&mut self, design: &mut Design, m: ModuleId) -> CompileResult<()> {
        let ctr = self.counters.entry(m).or_insert(0);
        let fname = self
            .dir
            .join(format!("{}_{}{:03}.txt", design.module(m).name, self.tag, ctr));
        *ctr += 1;

        let mut f = File::create(fname).map_err(io_err)?;
        for c in design.module(m).conns.connections() {
            let src_owner = design.output_owner(c.source);
            let sink_owner = design.input_owner(c.sink);
            writeln!(
                f,
                "{} ({}:{}) -> {} ({}:{})",
                design.global_name(src_owner),
                design.port_num(c.source.0),
                design.port(c.source.0).name.as_deref().unwrap_or(""),
                design.global_name(sink_owner),
                design.port_num(c.sink.0),
                design.port(c.sink.0).name.as_deref().unwrap_or(""),
            )
            .map_err(io_err)?;
        }
        Ok(())
    }
}

/// Counts blocks by kind across every module and writes `stats<tag>.csv`
/// when the walk finishes.
pub struct StatsPrinterPass {
    tag: String,
    dir: PathBuf,
    counts: BTreeMap<&'static str, u64>,
}

impl StatsPrinterPass {
    pub fn new(tag: impl Into<String>, dir: PathBuf) -> Self {
        StatsPrinterPass {
            tag: tag.into(),
            dir,
            counts: BTreeMap::new(),
        }
    }
}

impl ModulePass for StatsPrinterPass {
    fn name(&self) -> &'static str {
        "print-stats"
    }

    fn run_on_module(&mut self, design: &mut Design, m: ModuleId) -> CompileResult<()> {
        for b in design.find_all_blocks(m) {
            *self.counts.entry(design.block(b).kind.kind_name()).or_insert(0) += 1;
        }
        Ok(())
    }

    fn finalize(&mut self, _design: &mut Design) -> CompileResult<()> {
        let fname = self.dir.join(format!("stats{}.csv", self.tag));
        let mut f = File::create(fname).map_err(io_err)?;
        for (kind, count) in &self.counts {
            writeln!(f, "{kind}, {count}").map_err(io_err)?;
        }
        Ok(())
    }
}
