//! Debug annotator: attaches provenance to an already-built function.
//!
//! Annotation never touches block boundaries, edges, or ops; it only fills
//! in [`Block::debug`](crate::ir::Block).

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;

use crate::ir::{BlockDebug, Function, IrOp};
use crate::LiftError;

/// Kind of provenance attached to emitted IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DebugInfo {
    /// No debug information
    #[default]
    None,
    /// Debug information referring to the assembly of the input
    #[value(name = "asm")]
    OriginalAssembly,
    /// Debug information referring to the decoder's micro-operations
    #[value(name = "ptc", alias = "trace")]
    DecoderTrace,
}

impl fmt::Display for DebugInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebugInfo::None => write!(f, "none"),
            DebugInfo::OriginalAssembly => write!(f, "asm"),
            DebugInfo::DecoderTrace => write!(f, "ptc"),
        }
    }
}

impl FromStr for DebugInfo {
    type Err = LiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(DebugInfo::None),
            "asm" => Ok(DebugInfo::OriginalAssembly),
            "ptc" | "trace" => Ok(DebugInfo::DecoderTrace),
            _ => Err(LiftError::UnknownDebugMode(s.to_string())),
        }
    }
}

/// Trace identifier of micro-operation `index` of the instruction at `pc`
pub fn trace_id(pc: u64, index: usize) -> String {
    format!("ptc:0x{:x}#{}", pc, index)
}

/// Attach `mode` provenance to every block of `function`, replacing any
/// previous annotation.
pub fn annotate(function: &mut Function, mode: DebugInfo) {
    for block in function.blocks_mut() {
        block.debug = match mode {
            DebugInfo::None => None,
            DebugInfo::OriginalAssembly => Some(assembly_debug(block)),
            DebugInfo::DecoderTrace => Some(trace_debug(block)),
        };
    }
    function.debug_info = mode;
}

fn assembly_debug(block: &crate::ir::Block) -> BlockDebug {
    let mut op_notes = vec![None; block.ops.len()];
    let mut lines = Vec::with_capacity(block.insns.len() + 1);

    for insn in &block.insns {
        let line = insn.render();
        op_notes[insn.first_op] = Some(line.clone());
        lines.push(line);
    }

    if block.is_unreachable() {
        lines.push(format!("0x{:x}: <invalid>", block.end));
    }

    BlockDebug {
        text: lines.join("\n"),
        op_notes,
    }
}

fn trace_debug(block: &crate::ir::Block) -> BlockDebug {
    let op_notes: Vec<Option<String>> = block
        .ops
        .iter()
        .map(|op| match op {
            IrOp::Micro { origin, .. } => Some(trace_id(origin.pc, origin.index)),
            _ => None,
        })
        .collect();

    let ids: Vec<&str> = op_notes.iter().flatten().map(String::as_str).collect();
    let text = match (ids.first(), ids.last()) {
        (Some(first), Some(last)) if first == last => first.to_string(),
        (Some(first), Some(last)) => format!("{}..{}", first, last),
        _ => format!("ptc:0x{:x}: <invalid>", block.entry),
    };

    BlockDebug { text, op_notes }
}
