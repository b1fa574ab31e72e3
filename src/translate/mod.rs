//! Worklist-driven translation of a code region into a [`Function`].

use std::collections::BTreeSet;

use crate::debug::{self, DebugInfo};
use crate::decoder::Decoder;
use crate::ir::{Diagnostic, EdgeKind, Function};
use crate::worklist::{UniquedQueue, UniquedStack};
use crate::Address;

mod block;
mod stitch;

use self::block::BlockTranslator;
use self::stitch::{CfgStitcher, Lookup};

/// Default bound on the number of instructions in one block
pub const DEFAULT_MAX_BLOCK_INSNS: usize = 4096;

/// Decides whether execution continues after a call.
pub trait ReturnPolicy {
    /// `callee` is `None` for indirect calls; `hint` is the decoder's opinion.
    fn call_returns(&self, call_site: Address, callee: Option<Address>, hint: Option<bool>) -> bool;
}

/// Every call returns
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReturns;

impl ReturnPolicy for AlwaysReturns {
    fn call_returns(&self, _call_site: Address, _callee: Option<Address>, _hint: Option<bool>) -> bool {
        true
    }
}

/// Trust the decoder hint; calls without one return
#[derive(Debug, Clone, Copy, Default)]
pub struct DecoderHint;

impl ReturnPolicy for DecoderHint {
    fn call_returns(&self, _call_site: Address, _callee: Option<Address>, hint: Option<bool>) -> bool {
        hint.unwrap_or(true)
    }
}

/// Calls to these addresses never return
#[derive(Debug, Clone, Default)]
pub struct NoReturnSet(pub BTreeSet<Address>);

impl ReturnPolicy for NoReturnSet {
    fn call_returns(&self, _call_site: Address, callee: Option<Address>, _hint: Option<bool>) -> bool {
        callee.map_or(true, |callee| !self.0.contains(&callee))
    }
}

/// Translator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiftConfig {
    /// Provenance attached to the finished function
    pub debug_info: DebugInfo,
    /// A block longer than this is closed with a fallthrough edge
    pub max_block_insns: usize,
}

impl Default for LiftConfig {
    fn default() -> Self {
        Self {
            debug_info: DebugInfo::None,
            max_block_insns: DEFAULT_MAX_BLOCK_INSNS,
        }
    }
}

/// Lifts a code region, one [`Function`] per call to [`Translator::translate`].
pub struct Translator<'d> {
    decoder: &'d dyn Decoder,
    config: LiftConfig,
    policy: Box<dyn ReturnPolicy + 'd>,
}

/// Addresses waiting for translation
#[derive(Debug, Default)]
struct Worklist {
    /// Call targets and the entry point
    functions: UniquedQueue<Address>,
    /// Successors within the current function, explored depth first
    successors: UniquedStack<Address>,
}

impl Worklist {
    fn pop(&mut self) -> Option<Address> {
        self.successors.pop().or_else(|| self.functions.pop())
    }
}

impl<'d> Translator<'d> {
    /// Create a translator with the default configuration
    pub fn new(decoder: &'d dyn Decoder) -> Self {
        Self {
            decoder,
            config: LiftConfig::default(),
            policy: Box::new(AlwaysReturns),
        }
    }

    pub fn with_config(mut self, config: LiftConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_debug_info(mut self, debug_info: DebugInfo) -> Self {
        self.config.debug_info = debug_info;
        self
    }

    pub fn with_max_block_insns(mut self, max: usize) -> Self {
        self.config.max_block_insns = max;
        self
    }

    pub fn with_return_policy(mut self, policy: impl ReturnPolicy + 'd) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn config(&self) -> &LiftConfig {
        &self.config
    }

    /// Translate everything reachable from `entry` in `image`.
    ///
    /// Decode failures and unresolved targets never abort the run; they are
    /// recorded as diagnostics on the returned function.
    pub fn translate(&self, image: &[u8], entry: Address) -> Function {
        log::debug!("Translating {} bytes from 0x{:x}", image.len(), entry);

        let blocks = BlockTranslator {
            decoder: self.decoder,
            image,
            policy: self.policy.as_ref(),
            max_insns: self.config.max_block_insns.max(1),
        };
        let mut stitcher = CfgStitcher::new();
        let mut worklist = Worklist::default();
        let mut diagnostics = Vec::new();

        worklist.functions.insert(entry);

        while let Some(addr) = worklist.pop() {
            match stitcher.lookup(addr) {
                Lookup::Entry(_) => continue,
                Lookup::Interior(_) => {
                    stitcher.split(addr);
                    continue;
                }
                Lookup::Unknown => {}
            }

            let outcome = blocks.run(addr, &stitcher);
            log::debug!(
                "Block 0x{:x}..0x{:x}: {} insns, {} exits",
                addr,
                outcome.block.end,
                outcome.block.insns.len(),
                outcome.exits.len()
            );

            if let Some(failure) = outcome.failure {
                log::warn!("{}", failure);
                diagnostics.push(Diagnostic::Decode(failure));
            }

            let exits = outcome.exits.clone();
            stitcher.commit(outcome.block, outcome.exits);

            for exit in exits {
                let Some(target) = exit.target else { continue };
                self.discover(&mut stitcher, &mut worklist, image, target, exit.kind);
            }
        }

        let mut function = stitcher.finish(entry, diagnostics);
        debug::annotate(&mut function, self.config.debug_info);

        log::info!(
            "Translated 0x{:x}: {} blocks, {} edges, {} diagnostics",
            entry,
            function.block_count(),
            function.edge_count(),
            function.diagnostics.len()
        );
        function
    }

    /// Queue `target` unless it already has a block; split when it lands
    /// inside one.
    fn discover(
        &self,
        stitcher: &mut CfgStitcher,
        worklist: &mut Worklist,
        image: &[u8],
        target: Address,
        kind: EdgeKind,
    ) {
        if target >= image.len() as Address {
            log::debug!("Target 0x{:x} is outside the region", target);
            return;
        }

        match stitcher.lookup(target) {
            Lookup::Entry(_) => {}
            Lookup::Interior(_) => {
                stitcher.split(target);
            }
            Lookup::Unknown if kind == EdgeKind::Call => {
                worklist.functions.insert(target);
            }
            Lookup::Unknown => {
                worklist.successors.insert(target);
            }
        }
    }
}
