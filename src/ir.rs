//! Target-independent IR produced by the translator.
//!
//! A [`Function`] owns an arena of [`Block`]s. Blocks are numbered in entry
//! address order, so two translations of the same input produce the same ids.
//! [`Function::emit`] replays the function into an [`IrBuilder`], the boundary
//! to whatever IR library consumes the result.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::debug::DebugInfo;
use crate::decoder::DecodeFailure;
use crate::{Address, DecodedInsn, LiftError};

/// Index of a block inside its [`Function`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub usize);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block{}", self.0)
    }
}

/// Provenance of a translated operation: native instruction and the index
/// of the micro-operation within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub pc: Address,
    pub index: usize,
}

/// One emitted IR operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum IrOp {
    /// Start of a native instruction
    InsnStart { pc: Address, size: u8 },
    /// A decoder micro-operation, carried over verbatim
    Micro {
        opcode: String,
        args: Vec<String>,
        origin: Origin,
    },
    /// Undefined behavior: the instruction at `pc` could not be decoded
    Unreachable { pc: Address },
}

impl fmt::Display for IrOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrOp::InsnStart { pc, .. } => write!(f, "insn_start $0x{:x}", pc),
            IrOp::Micro { opcode, args, .. } if args.is_empty() => write!(f, "{}", opcode),
            IrOp::Micro { opcode, args, .. } => write!(f, "{} {}", opcode, args.join(", ")),
            IrOp::Unreachable { .. } => write!(f, "unreachable"),
        }
    }
}

/// Kind of a control transfer between blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// Execution continues at the next address
    Fallthrough,
    /// Unconditional direct branch
    Direct,
    /// Taken side of a conditional branch
    Conditional,
    /// Direct call
    Call,
    /// Return or jump with no statically known target
    Indirect,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKind::Fallthrough => write!(f, "fallthrough"),
            EdgeKind::Direct => write!(f, "direct"),
            EdgeKind::Conditional => write!(f, "conditional"),
            EdgeKind::Call => write!(f, "call"),
            EdgeKind::Indirect => write!(f, "indirect"),
        }
    }
}

/// A resolved outgoing edge. `target` is `None` only for [`EdgeKind::Indirect`],
/// which the IR represents as a dynamic dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub kind: EdgeKind,
    pub target: Option<BlockId>,
}

/// A native instruction covered by a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsnRecord {
    pub addr: Address,
    pub size: u8,
    pub bytes: Vec<u8>,
    pub text: Option<String>,
    /// Index of this instruction's `InsnStart` in the block's ops
    pub first_op: usize,
}

impl InsnRecord {
    /// `0x<addr>: <text>`, falling back to the raw bytes
    pub fn render(&self) -> String {
        match &self.text {
            Some(text) => format!("0x{:x}: {}", self.addr, text),
            None => {
                let bytes = self
                    .bytes
                    .iter()
                    .map(|b| format!("{:02x}", b))
                    .collect::<Vec<_>>()
                    .join(" ");
                format!("0x{:x}: .byte {}", self.addr, bytes)
            }
        }
    }
}

/// Provenance metadata attached by the debug annotator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockDebug {
    /// Block-level annotation, never empty
    pub text: String,
    /// Per-op annotations, parallel to `Block::ops`
    pub op_notes: Vec<Option<String>>,
}

/// One basic block: straight-line ops with control transfers only at the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Entry address
    pub entry: Address,
    /// Address just past the last byte covered by the block
    pub end: Address,
    pub insns: Vec<InsnRecord>,
    pub ops: Vec<IrOp>,
    pub edges: Vec<Edge>,
    pub debug: Option<BlockDebug>,
}

impl Block {
    /// Create an empty, open block
    pub fn new(entry: Address) -> Self {
        Self {
            entry,
            end: entry,
            insns: Vec::new(),
            ops: Vec::new(),
            edges: Vec::new(),
            debug: None,
        }
    }

    /// Append a decoded instruction and its micro-operations
    pub fn push_insn(&mut self, insn: &DecodedInsn) {
        self.insns.push(InsnRecord {
            addr: insn.addr,
            size: insn.size,
            bytes: insn.bytes.clone(),
            text: insn.text.clone(),
            first_op: self.ops.len(),
        });
        self.ops.push(IrOp::InsnStart {
            pc: insn.addr,
            size: insn.size,
        });
        self.ops.extend(insn.ops.iter().enumerate().map(|(index, op)| IrOp::Micro {
            opcode: op.opcode.clone(),
            args: op.args.clone(),
            origin: Origin {
                pc: insn.addr,
                index,
            },
        }));
        self.end = insn.next();
    }

    /// Address of the last instruction in the block
    pub fn last_insn_addr(&self) -> Option<Address> {
        self.insns.last().map(|insn| insn.addr)
    }

    /// Whether the block ends in undefined behavior
    pub fn is_unreachable(&self) -> bool {
        matches!(self.ops.last(), Some(IrOp::Unreachable { .. }))
    }
}

/// Recoverable problems found while translating, attached to the [`Function`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Diagnostic {
    /// A block ended early because an instruction could not be decoded
    #[error("{0}")]
    Decode(DecodeFailure),

    /// An edge points at an address that was never translated; it was dropped
    #[error("Dropped {kind} edge from 0x{from:x} to untranslated 0x{target:x}")]
    UnresolvedTarget {
        from: Address,
        target: Address,
        kind: EdgeKind,
    },
}

impl Diagnostic {
    /// Address the diagnostic refers to
    pub fn address(&self) -> Address {
        match self {
            Diagnostic::Decode(failure) => failure.address(),
            Diagnostic::UnresolvedTarget { from, .. } => *from,
        }
    }
}

/// The lifted CFG of one translation region.
#[derive(Debug, Clone)]
pub struct Function {
    pub entry: Address,
    blocks: Vec<Block>,
    pub diagnostics: Vec<Diagnostic>,
    pub debug_info: DebugInfo,
}

impl Function {
    /// Assemble a function from blocks already sorted by entry address
    pub(crate) fn new(entry: Address, blocks: Vec<Block>, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            entry,
            blocks,
            diagnostics,
            debug_info: DebugInfo::None,
        }
    }

    /// All blocks, in entry address order
    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.blocks.iter().enumerate().map(|(i, b)| (BlockId(i), b))
    }

    pub(crate) fn blocks_mut(&mut self) -> impl Iterator<Item = &mut Block> {
        self.blocks.iter_mut()
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    /// Block whose entry is `addr`
    pub fn block_at(&self, addr: Address) -> Option<BlockId> {
        self.blocks
            .binary_search_by_key(&addr, |b| b.entry)
            .ok()
            .map(BlockId)
    }

    /// Block containing the entry point
    pub fn entry_block(&self) -> Option<BlockId> {
        self.block_at(self.entry)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn op_count(&self) -> usize {
        self.blocks.iter().map(|b| b.ops.len()).sum()
    }

    pub fn edge_count(&self) -> usize {
        self.blocks.iter().map(|b| b.edges.len()).sum()
    }

    /// True when some part of the region could not be decoded
    pub fn is_partial(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::Decode(_)))
    }

    /// Blocks that have an edge into `id`, with the edge kind
    pub fn predecessors(&self, id: BlockId) -> Vec<(BlockId, EdgeKind)> {
        self.blocks()
            .flat_map(|(source, block)| {
                block
                    .edges
                    .iter()
                    .filter(move |e| e.target == Some(id))
                    .map(move |e| (source, e.kind))
            })
            .collect()
    }

    /// Replay this function into `builder`.
    ///
    /// Every block is created before any op is appended, so branches may
    /// refer to blocks that come later.
    pub fn emit(&self, builder: &mut dyn IrBuilder) -> Result<String, LiftError> {
        for (id, block) in self.blocks() {
            builder.create_block(id, block.entry);
        }

        for (id, block) in self.blocks() {
            if let Some(debug) = &block.debug {
                builder.attach_debug(id, None, &debug.text);
            }

            for (index, op) in block.ops.iter().enumerate() {
                builder.append(id, op);

                let note = block
                    .debug
                    .as_ref()
                    .and_then(|d| d.op_notes.get(index))
                    .and_then(Option::as_deref);
                if let Some(note) = note {
                    builder.attach_debug(id, Some(index), note);
                }
            }

            for edge in &block.edges {
                builder.create_branch(id, edge);
            }
        }

        builder.finalize(self)
    }
}

/// Output boundary: an IR construction library.
pub trait IrBuilder {
    /// Create an empty block for `entry`
    fn create_block(&mut self, id: BlockId, entry: Address);

    /// Append one operation to `block`
    fn append(&mut self, block: BlockId, op: &IrOp);

    /// Add an outgoing edge to `block`
    fn create_branch(&mut self, block: BlockId, edge: &Edge);

    /// Attach provenance to a block (`op == None`) or to one of its ops
    fn attach_debug(&mut self, _block: BlockId, _op: Option<usize>, _note: &str) {}

    /// Finish the function and produce the builder's output
    fn finalize(&mut self, function: &Function) -> Result<String, LiftError>;
}
