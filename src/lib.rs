//! Core types, traits, and dispatch for the Nuclide Lift binary-to-IR lifter.
//!
//! This library statically translates raw machine code into a target-independent
//! IR. Starting from an entry address it discovers the control flow graph with a
//! worklist, decodes every native instruction into micro-operations through an
//! architecture-specific [`Decoder`], and stitches the resulting basic blocks
//! into a single [`Function`].
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use std::fs;
//! use nuclide_lift::{
//!     decoder::DecoderRegistry,
//!     format::OutputFormat,
//!     translate::Translator,
//!     DebugInfo,
//! };
//!
//! // Read the raw code buffer
//! let code = fs::read("path/to/code.bin").unwrap();
//!
//! // Resolve a decoder backend by architecture name
//! let decoder = DecoderRegistry::with_builtin().resolve("x86_64").unwrap();
//!
//! // Lift everything reachable from offset 0
//! let function = Translator::new(decoder.as_ref())
//!     .with_debug_info(DebugInfo::OriginalAssembly)
//!     .translate(&code, 0);
//!
//! // Hand the function to an IR builder
//! let text = OutputFormat::Text.render(&function).unwrap();
//! println!("{}", text);
//! ```

pub mod debug;
pub mod decoder;
pub mod format;
pub mod ir;
pub mod translate;
pub mod worklist;

/// Represents an address in the translation region
pub type Address = u64;

use std::fmt;
use std::str::FromStr;

pub use crate::debug::DebugInfo;
pub use crate::decoder::{DecodeFailure, Decoder};
pub use crate::ir::{BlockId, Edge, EdgeKind, Function, IrBuilder, IrOp};
pub use crate::translate::{LiftConfig, ReturnPolicy, Translator};

/// Maximum instruction size in bytes
pub const MAX_INSTRUCTION_SIZE: usize = 16;

/// A control transfer encoded by a micro-operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlow {
    /// Unconditional direct jump
    Jump(Address),
    /// Conditional direct jump; the other way is the next instruction
    CondJump(Address),
    /// Direct call. `returns` is the decoder's hint, if it has one.
    Call {
        target: Address,
        returns: Option<bool>,
    },
    /// Call through a register or memory operand
    IndirectCall,
    /// Return to the caller
    Return,
    /// Jump through a register or memory operand
    IndirectJump,
    /// Execution stops here (trap, halt)
    Halt,
}

impl ControlFlow {
    /// Statically known target of the transfer, if any
    pub fn target(&self) -> Option<Address> {
        match *self {
            ControlFlow::Jump(t) | ControlFlow::CondJump(t) => Some(t),
            ControlFlow::Call { target, .. } => Some(target),
            _ => None,
        }
    }
}

/// One elementary semantic step of a native instruction.
///
/// The translator treats `opcode` and `args` as opaque; only `flow` and
/// `last` are interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicroOp {
    pub opcode: String,
    pub args: Vec<String>,
    /// Control-transfer marker
    pub flow: Option<ControlFlow>,
    /// Final operation of the native instruction
    pub last: bool,
}

impl MicroOp {
    /// Create an opaque operation without control flow
    pub fn new(opcode: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            opcode: opcode.into(),
            args,
            flow: None,
            last: false,
        }
    }

    /// Create a control-transfer marker operation
    pub fn control(opcode: impl Into<String>, flow: ControlFlow) -> Self {
        Self {
            opcode: opcode.into(),
            args: flow
                .target()
                .map(|t| vec![format!("0x{:x}", t)])
                .unwrap_or_default(),
            flow: Some(flow),
            last: false,
        }
    }
}

/// One native instruction, lowered to micro-operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInsn {
    /// Address of the instruction
    pub addr: Address,
    /// Size of the instruction in bytes
    pub size: u8,
    /// Micro-operations, never empty, the last one carries `last == true`
    pub ops: Vec<MicroOp>,
    /// Raw encoding
    pub bytes: Vec<u8>,
    /// Textual rendering (mnemonic and operands), when the backend has one
    pub text: Option<String>,
}

impl DecodedInsn {
    /// Address immediately following this instruction
    pub fn next(&self) -> Address {
        self.addr + self.size as Address
    }

    /// Control transfer of the final micro-operation, if any
    pub fn flow(&self) -> Option<ControlFlow> {
        self.ops.last().and_then(|op| op.flow)
    }
}

/// Supported architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[non_exhaustive]
pub enum Architecture {
    /// 32-bit x86
    X86_32,
    /// 64-bit x86
    X86_64,
    /// ARM (32-bit)
    Arm,
    /// ARM Thumb mode
    Thumb,
    /// AArch64 (ARM 64-bit)
    AArch64,
    /// MIPS 32-bit
    Mips32,
    /// RISC-V 32-bit
    RiscV32,
    /// RISC-V 64-bit
    RiscV64,
    /// PowerPC 32-bit
    Ppc32,
}

impl Architecture {
    /// Every architecture with a built-in decoder
    pub fn all() -> &'static [Architecture] {
        &[
            Architecture::X86_32,
            Architecture::X86_64,
            Architecture::Arm,
            Architecture::Thumb,
            Architecture::AArch64,
            Architecture::Mips32,
            Architecture::RiscV32,
            Architecture::RiscV64,
            Architecture::Ppc32,
        ]
    }

    /// Canonical name used by the decoder registry
    pub fn name(&self) -> &'static str {
        match self {
            Architecture::X86_32 => "x86",
            Architecture::X86_64 => "x86_64",
            Architecture::Arm => "arm",
            Architecture::Thumb => "thumb",
            Architecture::AArch64 => "aarch64",
            Architecture::Mips32 => "mips32",
            Architecture::RiscV32 => "riscv32",
            Architecture::RiscV64 => "riscv64",
            Architecture::Ppc32 => "ppc32",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::X86_32 => write!(f, "x86-32"),
            Architecture::X86_64 => write!(f, "x86-64"),
            Architecture::Arm => write!(f, "ARM"),
            Architecture::Thumb => write!(f, "Thumb"),
            Architecture::AArch64 => write!(f, "AArch64"),
            Architecture::Mips32 => write!(f, "MIPS32"),
            Architecture::RiscV32 => write!(f, "RISC-V 32"),
            Architecture::RiscV64 => write!(f, "RISC-V 64"),
            Architecture::Ppc32 => write!(f, "PowerPC 32"),
        }
    }
}

impl FromStr for Architecture {
    type Err = LiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "x86" | "i386" | "x86_32" | "x86-32" => Ok(Architecture::X86_32),
            "x86_64" | "x86-64" | "amd64" => Ok(Architecture::X86_64),
            "arm" => Ok(Architecture::Arm),
            "thumb" => Ok(Architecture::Thumb),
            "aarch64" | "arm64" => Ok(Architecture::AArch64),
            "mips" | "mips32" => Ok(Architecture::Mips32),
            "riscv32" => Ok(Architecture::RiscV32),
            "riscv" | "riscv64" => Ok(Architecture::RiscV64),
            "ppc" | "ppc32" | "powerpc" => Ok(Architecture::Ppc32),
            _ => Err(LiftError::UnknownArchitecture(s.to_string())),
        }
    }
}

/// Fatal errors, reported before any translation work
#[derive(Debug, thiserror::Error)]
pub enum LiftError {
    /// No decoder is registered under this name
    #[error("Unknown architecture: {0}")]
    UnknownArchitecture(String),

    /// Debug-info selector is not one of none, asm, ptc
    #[error("Unexpected value for the debug info selector: {0}")]
    UnknownDebugMode(String),

    /// The decoder backend exists but could not be initialized
    #[error("Couldn't initialize the decoder for {arch}: {reason}")]
    DecoderUnavailable { arch: String, reason: String },

    /// Start offset or length outside the input buffer
    #[error("Region 0x{offset:x}+{len} is outside the {available}-byte input")]
    RegionOutOfRange {
        offset: usize,
        len: usize,
        available: usize,
    },

    /// An IR builder failed to produce its output
    #[error("Output error: {0}")]
    Output(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Slice `buffer[offset..offset + len]`, the region handed to the translator.
pub fn region(buffer: &[u8], offset: usize, len: usize) -> Result<&[u8], LiftError> {
    offset
        .checked_add(len)
        .filter(|&end| end <= buffer.len())
        .map(|end| &buffer[offset..end])
        .ok_or(LiftError::RegionOutOfRange {
            offset,
            len,
            available: buffer.len(),
        })
}

#[cfg(test)]
pub(crate) mod testing;
