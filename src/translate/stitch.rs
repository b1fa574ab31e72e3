//! CFG stitcher: address-to-block map, block splitting, and edge resolution.
//!
//! Edges are recorded against the address of the instruction that produced
//! them, never against a block. A split moves instructions between blocks,
//! and the edges follow the instructions without any bookkeeping.

use std::collections::BTreeMap;

use crate::ir::{Block, BlockId, Diagnostic, Edge, EdgeKind, Function};
use crate::Address;

/// A control transfer whose target block may not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingEdge {
    /// Address of the instruction that performs the transfer
    pub from: Address,
    pub kind: EdgeKind,
    /// `None` for indirect transfers
    pub target: Option<Address>,
}

impl PendingEdge {
    pub fn new(from: Address, kind: EdgeKind, target: Option<Address>) -> Self {
        Self { from, kind, target }
    }
}

/// Where an address falls relative to the blocks translated so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lookup {
    /// Entry of the block in this slot
    Entry(usize),
    /// Instruction boundary strictly inside the block in this slot
    Interior(usize),
    /// Not a known instruction boundary
    Unknown,
}

#[derive(Debug, Default)]
pub(crate) struct CfgStitcher {
    blocks: Vec<Block>,
    /// Block entry -> arena slot
    entries: BTreeMap<Address, usize>,
    /// Every instruction start -> arena slot of the block holding it
    owners: BTreeMap<Address, usize>,
    pending: Vec<PendingEdge>,
}

impl CfgStitcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, addr: Address) -> Lookup {
        if let Some(&slot) = self.entries.get(&addr) {
            return Lookup::Entry(slot);
        }
        match self.owners.get(&addr) {
            Some(&slot) => Lookup::Interior(slot),
            None => Lookup::Unknown,
        }
    }

    /// Whether `addr` starts a block or an already translated instruction
    pub fn is_boundary(&self, addr: Address) -> bool {
        self.entries.contains_key(&addr) || self.owners.contains_key(&addr)
    }

    /// Take ownership of a closed block and its exits
    pub fn commit(&mut self, block: Block, exits: Vec<PendingEdge>) -> usize {
        let slot = self.blocks.len();
        debug_assert!(!self.entries.contains_key(&block.entry));

        self.entries.insert(block.entry, slot);
        for insn in &block.insns {
            self.owners.insert(insn.addr, slot);
        }
        // The failure point is a boundary too, so a later branch to it
        // splits this block instead of decoding the address again
        if block.is_unreachable() && !block.insns.is_empty() {
            self.owners.insert(block.end, slot);
        }
        self.pending.extend(exits);
        self.blocks.push(block);
        slot
    }

    /// Make `addr` a block entry by splitting the block that holds it.
    ///
    /// Returns the slot of the block starting at `addr`, or `None` if `addr`
    /// is not a known instruction boundary. Splitting at an existing entry
    /// is a no-op.
    pub fn split(&mut self, addr: Address) -> Option<usize> {
        let owner = match self.lookup(addr) {
            Lookup::Entry(slot) => return Some(slot),
            Lookup::Unknown => return None,
            Lookup::Interior(slot) => slot,
        };

        let head = &mut self.blocks[owner];
        let (insns, op_start) = match head.insns.iter().position(|insn| insn.addr == addr) {
            Some(at) => {
                let insns = head.insns.split_off(at);
                let op_start = insns[0].first_op;
                (insns, op_start)
            }
            // Only the trailing `Unreachable` moves
            None if head.end == addr && head.is_unreachable() => (Vec::new(), head.ops.len() - 1),
            None => return None,
        };

        let mut tail = Block::new(addr);
        tail.insns = insns;
        tail.ops = head.ops.split_off(op_start);
        for insn in &mut tail.insns {
            insn.first_op -= op_start;
        }
        tail.end = head.end;
        head.end = addr;
        let from = head.last_insn_addr()?;
        let head_entry = head.entry;

        let slot = self.blocks.len();
        for insn in &tail.insns {
            self.owners.insert(insn.addr, slot);
        }
        if tail.is_unreachable() {
            self.owners.insert(tail.end, slot);
        }
        self.entries.insert(addr, slot);
        self.blocks.push(tail);
        self.pending.push(PendingEdge::new(from, EdgeKind::Fallthrough, Some(addr)));

        log::debug!("Split block 0x{:x} at 0x{:x}", head_entry, addr);
        Some(slot)
    }

    /// Resolve every pending edge and hand the blocks over to a [`Function`].
    ///
    /// Edges whose target was never translated are dropped with a diagnostic.
    pub fn finish(mut self, entry: Address, mut diagnostics: Vec<Diagnostic>) -> Function {
        // Targets that became interior after they were recorded
        let targets: Vec<Address> = self.pending.iter().filter_map(|e| e.target).collect();
        for target in targets {
            if let Lookup::Interior(_) = self.lookup(target) {
                self.split(target);
            }
        }

        // Number blocks by entry address
        let mut renumber = vec![0; self.blocks.len()];
        for (id, &slot) in self.entries.values().enumerate() {
            renumber[slot] = id;
        }
        let mut arena: Vec<Option<Block>> = self.blocks.into_iter().map(Some).collect();
        let mut blocks: Vec<Block> = self
            .entries
            .values()
            .filter_map(|&slot| arena[slot].take())
            .collect();

        for edge in &self.pending {
            let Some(&source) = self.owners.get(&edge.from) else {
                continue;
            };
            let target = match edge.target {
                None => None,
                Some(target) => match self.entries.get(&target) {
                    Some(&slot) => Some(BlockId(renumber[slot])),
                    None => {
                        log::warn!(
                            "Dropping {} edge 0x{:x} -> 0x{:x}: target never translated",
                            edge.kind,
                            edge.from,
                            target
                        );
                        diagnostics.push(Diagnostic::UnresolvedTarget {
                            from: edge.from,
                            target,
                            kind: edge.kind,
                        });
                        continue;
                    }
                },
            };
            blocks[renumber[source]].edges.push(Edge {
                kind: edge.kind,
                target,
            });
        }

        diagnostics.sort_by_key(Diagnostic::address);
        Function::new(entry, blocks, diagnostics)
    }
}
