//! Test helpers: a decoder driven by a table of instructions.

use std::cell::RefCell;
use std::collections::BTreeMap;

use crate::decoder::{DecodeFailure, Decoder};
use crate::{Address, ControlFlow, DecodedInsn, MicroOp};

/// One-op instruction without control flow
pub(crate) fn plain_insn(addr: Address, size: u8) -> DecodedInsn {
    scripted_insn(addr, size, None)
}

fn scripted_insn(addr: Address, size: u8, flow: Option<ControlFlow>) -> DecodedInsn {
    let mut ops = vec![MicroOp::new(format!("op_{:x}", addr), vec![])];
    if let Some(flow) = flow {
        ops.push(MicroOp::control("flow", flow));
    }
    if let Some(op) = ops.last_mut() {
        op.last = true;
    }

    DecodedInsn {
        addr,
        size,
        ops,
        bytes: vec![0xaa; size as usize],
        text: None,
    }
}

/// Decoder that only knows the instructions it was given. Everything else
/// decodes as invalid. Counts decode attempts per address.
#[derive(Debug, Default)]
pub(crate) struct ScriptedDecoder {
    insns: BTreeMap<Address, (u8, Option<ControlFlow>)>,
    attempts: RefCell<BTreeMap<Address, usize>>,
}

impl ScriptedDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain instruction
    pub fn op(mut self, addr: Address, size: u8) -> Self {
        self.insns.insert(addr, (size, None));
        self
    }

    /// Control-transfer instruction
    pub fn flow(mut self, addr: Address, size: u8, flow: ControlFlow) -> Self {
        self.insns.insert(addr, (size, Some(flow)));
        self
    }

    /// How many times `addr` was decoded
    pub fn attempts(&self, addr: Address) -> usize {
        self.attempts.borrow().get(&addr).copied().unwrap_or(0)
    }
}

impl Decoder for ScriptedDecoder {
    fn decode_one(&self, image: &[u8], at: Address) -> Result<DecodedInsn, DecodeFailure> {
        *self.attempts.borrow_mut().entry(at).or_insert(0) += 1;

        if at >= image.len() as Address {
            return Err(DecodeFailure::OutOfRange(at));
        }
        match self.insns.get(&at) {
            Some(&(size, flow)) => Ok(scripted_insn(at, size, flow)),
            None => Err(DecodeFailure::Invalid {
                addr: at,
                reason: "not scripted".to_string(),
            }),
        }
    }
}
