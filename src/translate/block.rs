//! Block translator: decode forward from one address until a terminator

use crate::decoder::{DecodeFailure, Decoder};
use crate::ir::{Block, EdgeKind, IrOp};
use crate::translate::stitch::{CfgStitcher, PendingEdge};
use crate::translate::ReturnPolicy;
use crate::{Address, ControlFlow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Open,
    Closed,
}

/// A freshly translated block, not yet committed to the stitcher.
#[derive(Debug)]
pub(crate) struct BlockOutcome {
    pub block: Block,
    pub exits: Vec<PendingEdge>,
    pub failure: Option<DecodeFailure>,
}

/// Translates one block at a time against a fixed image and decoder.
pub(crate) struct BlockTranslator<'a> {
    pub decoder: &'a dyn Decoder,
    pub image: &'a [u8],
    pub policy: &'a dyn ReturnPolicy,
    pub max_insns: usize,
}

impl BlockTranslator<'_> {
    /// Decode from `entry` until a control transfer, a decode failure, or a
    /// known instruction boundary of an existing block.
    pub fn run(&self, entry: Address, stitcher: &CfgStitcher) -> BlockOutcome {
        let mut block = Block::new(entry);
        let mut exits = Vec::new();
        let mut failure = None;
        let mut cursor = entry;
        let mut state = BlockState::Open;

        while state == BlockState::Open {
            if let Some(last) = block.last_insn_addr() {
                // Never re-decode past an instruction someone else owns
                if stitcher.is_boundary(cursor) {
                    exits.push(PendingEdge::new(last, EdgeKind::Fallthrough, Some(cursor)));
                    break;
                }
                if block.insns.len() >= self.max_insns {
                    log::debug!("Block 0x{:x} hit the {} instruction limit", entry, self.max_insns);
                    exits.push(PendingEdge::new(last, EdgeKind::Fallthrough, Some(cursor)));
                    break;
                }
            }

            let decoded = self.decoder.decode_one(self.image, cursor).and_then(|insn| {
                if insn.size == 0 || insn.ops.is_empty() {
                    Err(DecodeFailure::Invalid {
                        addr: cursor,
                        reason: "empty instruction".to_string(),
                    })
                } else {
                    Ok(insn)
                }
            });
            let insn = match decoded {
                Ok(insn) => insn,
                Err(f) => {
                    block.ops.push(IrOp::Unreachable { pc: cursor });
                    failure = Some(f);
                    state = BlockState::Closed;
                    continue;
                }
            };

            let pc = insn.addr;
            block.push_insn(&insn);
            cursor = insn.next();

            if let Some(flow) = insn.flow() {
                exits.extend(self.exits_for(flow, pc, cursor));
                state = BlockState::Closed;
            }
        }

        block.end = cursor;
        BlockOutcome {
            block,
            exits,
            failure,
        }
    }

    /// Statically derivable successors of a control transfer at `pc`
    fn exits_for(&self, flow: ControlFlow, pc: Address, next: Address) -> Vec<PendingEdge> {
        match flow {
            ControlFlow::Jump(target) => vec![PendingEdge::new(pc, EdgeKind::Direct, Some(target))],
            ControlFlow::CondJump(target) => vec![
                PendingEdge::new(pc, EdgeKind::Conditional, Some(target)),
                PendingEdge::new(pc, EdgeKind::Fallthrough, Some(next)),
            ],
            ControlFlow::Call { target, returns } => {
                let mut exits = vec![PendingEdge::new(pc, EdgeKind::Call, Some(target))];
                if self.policy.call_returns(pc, Some(target), returns) {
                    exits.push(PendingEdge::new(pc, EdgeKind::Fallthrough, Some(next)));
                }
                exits
            }
            ControlFlow::IndirectCall => {
                let mut exits = vec![PendingEdge::new(pc, EdgeKind::Indirect, None)];
                if self.policy.call_returns(pc, None, None) {
                    exits.push(PendingEdge::new(pc, EdgeKind::Fallthrough, Some(next)));
                }
                exits
            }
            ControlFlow::Return | ControlFlow::IndirectJump => {
                vec![PendingEdge::new(pc, EdgeKind::Indirect, None)]
            }
            ControlFlow::Halt => Vec::new(),
        }
    }
}
