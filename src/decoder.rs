//! Decoder adapter: turns one native instruction into micro-operations.
//!
//! Backends are selected by architecture name through a [`DecoderRegistry`].
//! The built-in backend is Capstone; other backends can be registered as
//! plain factories.

use std::collections::BTreeMap;
use std::fmt;

use capstone::arch::arm::ArchMode as ArmMode;
use capstone::arch::arm64::ArchMode as Arm64Mode;
use capstone::arch::mips::ArchMode as MipsMode;
use capstone::arch::ppc::ArchMode as PpcMode;
use capstone::arch::riscv::ArchMode as RiscVMode;
use capstone::arch::x86::ArchMode as X86Mode;
use capstone::prelude::*;
use capstone::{Endian, InsnDetail, InsnGroupId, InsnGroupType};

use crate::{Address, Architecture, ControlFlow, DecodedInsn, LiftError, MicroOp, MAX_INSTRUCTION_SIZE};

/// Errors that can occur while building a decoder backend
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    /// Capstone error
    #[error("Capstone error: {0}")]
    CapstoneError(#[from] capstone::Error),

    /// Unsupported architecture
    #[error("Unsupported architecture: {0}")]
    UnsupportedArchitecture(Architecture),
}

/// Why a single instruction could not be decoded.
///
/// This is local to one block: the translator ends the block and moves on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeFailure {
    /// The offset is outside the translation region
    #[error("Offset 0x{0:x} is outside the translation region")]
    OutOfRange(Address),

    /// The backend rejected the encoding
    #[error("Invalid instruction at 0x{addr:x}: {reason}")]
    Invalid { addr: Address, reason: String },
}

impl DecodeFailure {
    /// Address the failure refers to
    pub fn address(&self) -> Address {
        match self {
            DecodeFailure::OutOfRange(addr) => *addr,
            DecodeFailure::Invalid { addr, .. } => *addr,
        }
    }

    fn invalid(addr: Address, reason: impl Into<String>) -> Self {
        DecodeFailure::Invalid {
            addr,
            reason: reason.into(),
        }
    }
}

/// Decoder trait: architecture-specific instruction lowering.
pub trait Decoder {
    /// Decode exactly one instruction at `at`.
    ///
    /// # Arguments
    /// * `image` - The translation region
    /// * `at` - Offset of the instruction within the region
    ///
    /// # Returns
    /// The instruction and its micro-operations (never empty), or the reason
    /// it could not be decoded
    fn decode_one(&self, image: &[u8], at: Address) -> Result<DecodedInsn, DecodeFailure>;
}

/// Mnemonics that stop execution outright
const HALT_MNEMONICS: [&str; 7] = ["hlt", "ud2", "udf", "brk", "break", "ebreak", "trap"];

/// ARM condition code suffixes
const ARM_CONDS: [&str; 16] = [
    "eq", "ne", "cs", "hs", "cc", "lo", "mi", "pl", "vs", "vc", "hi", "ls", "ge", "lt", "gt", "le",
];

/// A Capstone-based decoder for all supported ISAs.
pub struct CapstoneDecoder {
    arch: Architecture,
    cs: Capstone,
}

impl CapstoneDecoder {
    /// Create a decoder for a specific architecture
    pub fn for_architecture(arch: Architecture) -> Result<Self, DecoderError> {
        let cs = match arch {
            Architecture::X86_32 => Capstone::new().x86().mode(X86Mode::Mode32).detail(true).build()?,
            Architecture::X86_64 => Capstone::new().x86().mode(X86Mode::Mode64).detail(true).build()?,
            Architecture::Arm => Capstone::new().arm().mode(ArmMode::Arm).detail(true).build()?,
            Architecture::Thumb => Capstone::new().arm().mode(ArmMode::Thumb).detail(true).build()?,
            Architecture::AArch64 => Capstone::new().arm64().mode(Arm64Mode::Arm).detail(true).build()?,
            Architecture::Mips32 => Capstone::new().mips().mode(MipsMode::Mips32).detail(true).build()?,
            Architecture::RiscV32 => Capstone::new().riscv().mode(RiscVMode::RiscV32).detail(true).build()?,
            Architecture::RiscV64 => Capstone::new().riscv().mode(RiscVMode::RiscV64).detail(true).build()?,
            Architecture::Ppc32 => Capstone::new()
                .ppc()
                .mode(PpcMode::Mode32)
                .endian(Endian::Big)
                .detail(true)
                .build()?,
        };

        Ok(Self { arch, cs })
    }

    /// Get the architecture of this decoder
    pub fn architecture(&self) -> Architecture {
        self.arch
    }

    /// Classify the control transfer performed by the instruction at `at`, if any.
    ///
    /// Capstone's instruction groups are reliable on x86 only. Everywhere
    /// else the mnemonic decides first and the groups are a fallback.
    fn classify(
        &self,
        at: Address,
        mnemonic: &str,
        operands: &str,
        detail: &InsnDetail,
    ) -> Option<ControlFlow> {
        let mnemonic = mnemonic.to_lowercase();
        let operands = operands.to_lowercase();

        if HALT_MNEMONICS.contains(&mnemonic.as_str()) {
            return Some(ControlFlow::Halt);
        }

        let target = self.immediate_target(at, &operands, detail);
        let by_mnemonic = match self.arch {
            Architecture::X86_32 | Architecture::X86_64 => None,
            Architecture::Arm | Architecture::Thumb => arm_flow(&mnemonic, &operands, target),
            Architecture::AArch64 => aarch64_flow(&mnemonic, target),
            Architecture::Mips32 => mips_flow(&mnemonic, &operands, target),
            Architecture::RiscV32 | Architecture::RiscV64 => riscv_flow(&mnemonic, &operands, target),
            Architecture::Ppc32 => ppc_flow(&mnemonic, target),
        };

        by_mnemonic.or_else(|| self.classify_by_group(&mnemonic, target, detail))
    }

    fn classify_by_group(
        &self,
        mnemonic: &str,
        target: Option<Address>,
        detail: &InsnDetail,
    ) -> Option<ControlFlow> {
        if in_group(detail, InsnGroupType::CS_GRP_RET as u8)
            || in_group(detail, InsnGroupType::CS_GRP_IRET as u8)
        {
            return Some(ControlFlow::Return);
        }

        if in_group(detail, InsnGroupType::CS_GRP_CALL as u8) {
            return Some(call_to(target));
        }

        if in_group(detail, InsnGroupType::CS_GRP_JUMP as u8)
            || in_group(detail, InsnGroupType::CS_GRP_BRANCH_RELATIVE as u8)
        {
            return Some(match target {
                Some(target) if self.is_conditional(mnemonic) => ControlFlow::CondJump(target),
                Some(target) => ControlFlow::Jump(target),
                None => ControlFlow::IndirectJump,
            });
        }

        None
    }

    /// Absolute target of a direct transfer at `at`
    fn immediate_target(&self, at: Address, operands: &str, detail: &InsnDetail) -> Option<Address> {
        match self.arch {
            Architecture::X86_32
            | Architecture::X86_64
            | Architecture::Arm
            | Architecture::Thumb
            | Architecture::AArch64 => detail_immediate(detail),
            // RISC-V branch operands are PC-relative
            Architecture::RiscV32 | Architecture::RiscV64 => {
                last_immediate(operands).map(|offset| at.wrapping_add(offset as Address))
            }
            Architecture::Mips32 | Architecture::Ppc32 => {
                last_immediate(operands).map(|target| target as Address)
            }
        }
    }

    /// Whether a jump with a static target may fall through
    fn is_conditional(&self, mnemonic: &str) -> bool {
        match self.arch {
            Architecture::X86_32 | Architecture::X86_64 => {
                (mnemonic.starts_with('j') && mnemonic != "jmp") || mnemonic.starts_with("loop")
            }
            Architecture::Arm | Architecture::Thumb => {
                mnemonic.starts_with("cb") || arm_conditional(mnemonic)
            }
            Architecture::AArch64 => {
                mnemonic.starts_with("b.") || mnemonic.starts_with("cb") || mnemonic.starts_with("tb")
            }
            Architecture::Mips32 => mnemonic.starts_with('b') && !matches!(mnemonic, "b" | "bal"),
            Architecture::RiscV32 | Architecture::RiscV64 => mnemonic.starts_with('b'),
            Architecture::Ppc32 => {
                mnemonic.starts_with('b') && !matches!(mnemonic, "b" | "ba" | "bl" | "bla")
            }
        }
    }
}

impl fmt::Debug for CapstoneDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapstoneDecoder").field("arch", &self.arch).finish()
    }
}

impl fmt::Display for CapstoneDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapstoneDecoder::{}", self.arch)
    }
}

impl Decoder for CapstoneDecoder {
    fn decode_one(&self, image: &[u8], at: Address) -> Result<DecodedInsn, DecodeFailure> {
        let offset = usize::try_from(at)
            .ok()
            .filter(|&offset| offset < image.len())
            .ok_or(DecodeFailure::OutOfRange(at))?;

        // Only look at a small slice
        let end = std::cmp::min(offset + MAX_INSTRUCTION_SIZE, image.len());
        let slice = &image[offset..end];

        let insns = self
            .cs
            .disasm_count(slice, at, 1)
            .map_err(|e| DecodeFailure::invalid(at, e.to_string()))?;
        let insn = insns
            .iter()
            .next()
            .ok_or_else(|| DecodeFailure::invalid(at, "unrecognized encoding"))?;

        // Ensure instruction starts at the address we requested
        if insn.address() != at || insn.bytes().is_empty() {
            return Err(DecodeFailure::invalid(at, "decoder returned a misplaced instruction"));
        }

        let detail = self
            .cs
            .insn_detail(&insn)
            .map_err(|e| DecodeFailure::invalid(at, e.to_string()))?;

        let mnemonic = insn.mnemonic().unwrap_or("").to_string();
        let operands = insn.op_str().unwrap_or("").to_string();
        let flow = self.classify(at, &mnemonic, &operands, &detail);

        let mut ops = vec![MicroOp::new(mnemonic.clone(), split_operands(&operands))];
        if let Some(flow) = flow {
            ops.push(MicroOp::control(control_opcode(flow), flow));
        }
        if let Some(op) = ops.last_mut() {
            op.last = true;
        }

        Ok(DecodedInsn {
            addr: at,
            size: insn.bytes().len() as u8,
            ops,
            bytes: insn.bytes().to_vec(),
            text: Some(format!("{} {}", mnemonic, operands).trim().to_string()),
        })
    }
}

fn in_group(detail: &InsnDetail, group: u8) -> bool {
    detail.groups().iter().any(|g| *g == InsnGroupId(group))
}

fn call_to(target: Option<Address>) -> ControlFlow {
    match target {
        Some(target) => ControlFlow::Call { target, returns: None },
        None => ControlFlow::IndirectCall,
    }
}

fn jump_to(target: Option<Address>) -> ControlFlow {
    target.map_or(ControlFlow::IndirectJump, ControlFlow::Jump)
}

/// Register names in an operand string, without list braces or writeback marks
fn registers(operands: &str) -> impl Iterator<Item = &str> {
    operands
        .split(|c: char| c == ',' || c == '{' || c == '}' || c.is_whitespace())
        .map(|r| r.trim_end_matches('!').trim_start_matches('$'))
        .filter(|r| !r.is_empty())
}

fn first_register(operands: &str) -> Option<&str> {
    registers(operands).next()
}

fn arm_flow(mnemonic: &str, operands: &str, target: Option<Address>) -> Option<ControlFlow> {
    // Thumb-2 width qualifiers (`b.w`)
    let base = mnemonic.split('.').next().unwrap_or(mnemonic);
    let writes_pc = first_register(operands) == Some("pc");

    match base {
        "bl" | "blx" => Some(call_to(target)),
        "bx" if operands == "lr" => Some(ControlFlow::Return),
        "bx" => Some(ControlFlow::IndirectJump),
        "b" => Some(jump_to(target)),
        "cbz" | "cbnz" => target.map(ControlFlow::CondJump),
        "pop" if registers(operands).any(|r| r == "pc") => Some(ControlFlow::Return),
        m if m.starts_with("ldm") && registers(operands).any(|r| r == "pc") => {
            if first_register(operands) == Some("sp") {
                Some(ControlFlow::Return)
            } else {
                Some(ControlFlow::IndirectJump)
            }
        }
        "mov" if writes_pc && registers(operands).last() == Some("lr") => Some(ControlFlow::Return),
        "mov" | "ldr" if writes_pc => Some(ControlFlow::IndirectJump),
        _ if arm_conditional(base) => target.map(ControlFlow::CondJump),
        _ => None,
    }
}

fn aarch64_flow(mnemonic: &str, target: Option<Address>) -> Option<ControlFlow> {
    match mnemonic {
        "ret" | "retaa" | "retab" => Some(ControlFlow::Return),
        m if m.starts_with("blr") => Some(ControlFlow::IndirectCall),
        m if m.starts_with("br") => Some(ControlFlow::IndirectJump),
        "bl" => Some(call_to(target)),
        "b" => Some(jump_to(target)),
        "cbz" | "cbnz" | "tbz" | "tbnz" => target.map(ControlFlow::CondJump),
        m if m.starts_with("b.") => target.map(ControlFlow::CondJump),
        _ => None,
    }
}

fn mips_flow(mnemonic: &str, operands: &str, target: Option<Address>) -> Option<ControlFlow> {
    let base = mnemonic.split('.').next().unwrap_or(mnemonic);
    match base {
        "jr" if first_register(operands) == Some("ra") => Some(ControlFlow::Return),
        "jr" => Some(ControlFlow::IndirectJump),
        "jalr" => Some(ControlFlow::IndirectCall),
        "jal" | "bal" | "bgezal" | "bltzal" => Some(call_to(target)),
        "j" | "b" => Some(jump_to(target)),
        m if m.starts_with('b') => target.map(ControlFlow::CondJump),
        _ => None,
    }
}

fn riscv_flow(mnemonic: &str, operands: &str, target: Option<Address>) -> Option<ControlFlow> {
    let base = mnemonic.strip_prefix("c.").unwrap_or(mnemonic);
    let first = first_register(operands);

    match base {
        "ret" => Some(ControlFlow::Return),
        "j" => Some(jump_to(target)),
        // `jal offset` links through ra; `jal zero, offset` is a plain jump
        "jal" if first == Some("zero") => Some(jump_to(target)),
        "jal" => Some(call_to(target)),
        "jr" if first == Some("ra") => Some(ControlFlow::Return),
        "jr" => Some(ControlFlow::IndirectJump),
        "jalr" if first == Some("zero") => {
            if operands.contains("(ra)") || registers(operands).last() == Some("ra") {
                Some(ControlFlow::Return)
            } else {
                Some(ControlFlow::IndirectJump)
            }
        }
        "jalr" => Some(ControlFlow::IndirectCall),
        m if m.starts_with('b') => target.map(ControlFlow::CondJump),
        _ => None,
    }
}

fn ppc_flow(mnemonic: &str, target: Option<Address>) -> Option<ControlFlow> {
    match mnemonic {
        "blr" => Some(ControlFlow::Return),
        "blrl" | "bctrl" => Some(ControlFlow::IndirectCall),
        "bctr" => Some(ControlFlow::IndirectJump),
        "bl" | "bla" => Some(call_to(target)),
        "b" | "ba" => Some(jump_to(target)),
        // Conditional returns and jumps through ctr keep the group fallback
        m if m.starts_with('b') => target.map(ControlFlow::CondJump),
        _ => None,
    }
}

fn detail_immediate(detail: &InsnDetail) -> Option<Address> {
    // The target is the last immediate (`tbz w0, #3, #0x10`)
    detail.arch_detail().operands().iter().rev().find_map(|op| match op {
        capstone::arch::ArchOperand::X86Operand(op) => {
            if let capstone::arch::x86::X86OperandType::Imm(imm) = op.op_type {
                Some(imm as Address)
            } else {
                None
            }
        }
        capstone::arch::ArchOperand::ArmOperand(op) => {
            if let capstone::arch::arm::ArmOperandType::Imm(imm) = op.op_type {
                Some(imm as u32 as Address)
            } else {
                None
            }
        }
        capstone::arch::ArchOperand::Arm64Operand(op) => {
            if let capstone::arch::arm64::Arm64OperandType::Imm(imm) = op.op_type {
                Some(imm as Address)
            } else {
                None
            }
        }
        _ => None,
    })
}

/// Parse the last operand as a signed immediate (`0x` hex or decimal)
fn last_immediate(operands: &str) -> Option<i64> {
    let last = split_operands(operands).pop()?;
    let last = last.trim().trim_start_matches('#');
    let (negative, digits) = match last.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, last),
    };
    let value = match digits.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };
    Some(if negative { -value } else { value })
}

fn arm_conditional(mnemonic: &str) -> bool {
    // Thumb-2 width qualifiers (`beq.w`)
    let base = mnemonic.split('.').next().unwrap_or(mnemonic);
    ["b", "bx"]
        .iter()
        .any(|prefix| base.strip_prefix(prefix).is_some_and(|cond| ARM_CONDS.contains(&cond)))
}

fn control_opcode(flow: ControlFlow) -> &'static str {
    match flow {
        ControlFlow::Jump(_) => "br",
        ControlFlow::CondJump(_) => "brcond",
        ControlFlow::Call { .. } => "call",
        ControlFlow::IndirectCall => "call_ptr",
        ControlFlow::Return => "ret",
        ControlFlow::IndirectJump => "goto_ptr",
        ControlFlow::Halt => "exit_tb",
    }
}

/// Split an operand string on commas that are not inside brackets or braces
fn split_operands(operands: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();

    for c in operands.chars() {
        match c {
            '[' | '{' | '(' => depth += 1,
            ']' | '}' | ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                args.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }

    if !current.trim().is_empty() {
        args.push(current.trim().to_string());
    }
    args
}

/// Constructs a decoder backend on demand
pub type DecoderFactory = Box<dyn Fn() -> Result<Box<dyn Decoder>, DecoderError>>;

/// Name-to-backend table, resolved once before translation starts.
pub struct DecoderRegistry {
    factories: BTreeMap<String, DecoderFactory>,
}

impl DecoderRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry with a Capstone backend for every supported architecture
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for &arch in Architecture::all() {
            registry.register(arch.name(), move || {
                Ok(Box::new(CapstoneDecoder::for_architecture(arch)?) as Box<dyn Decoder>)
            });
        }
        registry
    }

    /// Register (or replace) the backend for `name`
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Result<Box<dyn Decoder>, DecoderError> + 'static,
    {
        self.factories.insert(name.to_lowercase(), Box::new(factory));
    }

    /// Registered backend names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Initialize the backend for `name`.
    ///
    /// Aliases accepted by [`Architecture`] resolve to the canonical entry.
    pub fn resolve(&self, name: &str) -> Result<Box<dyn Decoder>, LiftError> {
        let key = name.to_lowercase();
        let factory = self
            .factories
            .get(&key)
            .or_else(|| {
                key.parse::<Architecture>()
                    .ok()
                    .and_then(|arch| self.factories.get(arch.name()))
            })
            .ok_or_else(|| LiftError::UnknownArchitecture(name.to_string()))?;

        let decoder = factory().map_err(|e| LiftError::DecoderUnavailable {
            arch: name.to_string(),
            reason: e.to_string(),
        })?;
        log::debug!("Resolved decoder backend for '{}'", name);
        Ok(decoder)
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn x86() -> CapstoneDecoder {
        CapstoneDecoder::for_architecture(Architecture::X86_32).unwrap()
    }

    #[test]
    fn test_architecture_mapping() {
        let decoder = CapstoneDecoder::for_architecture(Architecture::X86_64).unwrap();
        assert_eq!(decoder.architecture(), Architecture::X86_64);
    }

    #[test]
    fn test_x86_decode() {
        // mov eax, 1
        let bytes = [0xb8, 0x01, 0x00, 0x00, 0x00];
        let insn = x86().decode_one(&bytes, 0).unwrap();

        assert_eq!(insn.size, 5);
        assert_eq!(insn.next(), 5);
        assert_eq!(insn.bytes, bytes.to_vec());
        assert_eq!(insn.ops.len(), 1);
        assert_eq!(insn.ops[0].opcode, "mov");
        assert_eq!(insn.ops[0].args, vec!["eax".to_string(), "1".to_string()]);
        assert!(insn.ops[0].last);
        assert_eq!(insn.flow(), None);
        assert_eq!(insn.text.as_deref(), Some("mov eax, 1"));
    }

    #[rstest]
    // call 0x10
    #[case(&[0xe8, 0x0b, 0x00, 0x00, 0x00], ControlFlow::Call { target: 0x10, returns: None })]
    // je 0xa
    #[case(&[0x74, 0x08], ControlFlow::CondJump(0x0a))]
    // jmp 0
    #[case(&[0xeb, 0xfe], ControlFlow::Jump(0))]
    // ret
    #[case(&[0xc3], ControlFlow::Return)]
    // jmp eax
    #[case(&[0xff, 0xe0], ControlFlow::IndirectJump)]
    // call eax
    #[case(&[0xff, 0xd0], ControlFlow::IndirectCall)]
    // hlt
    #[case(&[0xf4], ControlFlow::Halt)]
    fn test_x86_control_flow(#[case] bytes: &[u8], #[case] expected: ControlFlow) {
        let insn = x86().decode_one(bytes, 0).unwrap();

        assert_eq!(insn.flow(), Some(expected));
        assert_eq!(insn.ops.len(), 2);
        assert!(!insn.ops[0].last);
        assert!(insn.ops[1].last);
    }

    #[test]
    fn test_decode_failures() {
        let decoder = x86();

        assert_eq!(decoder.decode_one(&[0x90], 1), Err(DecodeFailure::OutOfRange(1)));
        assert_eq!(decoder.decode_one(&[], 0), Err(DecodeFailure::OutOfRange(0)));

        // Truncated call
        let err = decoder.decode_one(&[0xe8, 0x00], 0).unwrap_err();
        assert_eq!(err.address(), 0);
        assert!(matches!(err, DecodeFailure::Invalid { .. }));
    }

    #[test]
    fn test_split_operands() {
        assert_eq!(split_operands(""), Vec::<String>::new());
        assert_eq!(
            split_operands("dword ptr [eax + ecx*4], 1"),
            vec!["dword ptr [eax + ecx*4]".to_string(), "1".to_string()]
        );
        assert_eq!(split_operands("{r4, lr}"), vec!["{r4, lr}".to_string()]);
    }

    #[test]
    fn test_conditional_rules() {
        assert!(arm_conditional("beq"));
        assert!(arm_conditional("bne.w"));
        assert!(!arm_conditional("bl"));
        assert!(!arm_conditional("bx"));
        assert_eq!(last_immediate("a0, a1, 0x20"), Some(0x20));
        assert_eq!(last_immediate("16"), Some(16));
        assert_eq!(last_immediate("a0, zero, -8"), Some(-8));
        assert_eq!(last_immediate("ra"), None);
    }

    /// Decode `bytes` placed at `at` in an otherwise zeroed region
    fn flow_at(arch: Architecture, bytes: &[u8], at: Address) -> Option<ControlFlow> {
        let mut image = vec![0u8; at as usize];
        image.extend_from_slice(bytes);
        let decoder = CapstoneDecoder::for_architecture(arch).unwrap();
        decoder.decode_one(&image, at).unwrap().flow()
    }

    fn call(target: Address) -> ControlFlow {
        ControlFlow::Call { target, returns: None }
    }

    #[rstest]
    // bl #0x10
    #[case(&[0x04, 0x00, 0x00, 0x94], call(0x10))]
    // b.eq #8
    #[case(&[0x40, 0x00, 0x00, 0x54], ControlFlow::CondJump(8))]
    // b #0xc
    #[case(&[0x03, 0x00, 0x00, 0x14], ControlFlow::Jump(0xc))]
    // blr x8
    #[case(&[0x00, 0x01, 0x3f, 0xd6], ControlFlow::IndirectCall)]
    // ret
    #[case(&[0xc0, 0x03, 0x5f, 0xd6], ControlFlow::Return)]
    // br x16
    #[case(&[0x00, 0x02, 0x1f, 0xd6], ControlFlow::IndirectJump)]
    // tbz w0, #3, #0x10
    #[case(&[0x80, 0x00, 0x18, 0x36], ControlFlow::CondJump(0x10))]
    // cbz x0, #8
    #[case(&[0x40, 0x00, 0x00, 0xb4], ControlFlow::CondJump(8))]
    fn test_aarch64_control_flow(#[case] bytes: &[u8], #[case] expected: ControlFlow) {
        assert_eq!(flow_at(Architecture::AArch64, bytes, 0), Some(expected));
    }

    #[rstest]
    // bl #0x10
    #[case(&[0x02, 0x00, 0x00, 0xeb], call(0x10))]
    // beq #0x10
    #[case(&[0x02, 0x00, 0x00, 0x0a], ControlFlow::CondJump(0x10))]
    // b #0x10
    #[case(&[0x02, 0x00, 0x00, 0xea], ControlFlow::Jump(0x10))]
    // blx r3
    #[case(&[0x33, 0xff, 0x2f, 0xe1], ControlFlow::IndirectCall)]
    // bx lr
    #[case(&[0x1e, 0xff, 0x2f, 0xe1], ControlFlow::Return)]
    // pop {r4, pc}
    #[case(&[0x10, 0x80, 0xbd, 0xe8], ControlFlow::Return)]
    fn test_arm_control_flow(#[case] bytes: &[u8], #[case] expected: ControlFlow) {
        assert_eq!(flow_at(Architecture::Arm, bytes, 0), Some(expected));
    }

    /// Branch operands are relative to the instruction, which sits at 4.
    #[rstest]
    // beq a0, a1, 8
    #[case(&[0x63, 0x04, 0xb5, 0x00], ControlFlow::CondJump(12))]
    // jal 16
    #[case(&[0xef, 0x00, 0x00, 0x01], call(20))]
    // j 8
    #[case(&[0x6f, 0x00, 0x80, 0x00], ControlFlow::Jump(12))]
    // jalr a0
    #[case(&[0xe7, 0x00, 0x05, 0x00], ControlFlow::IndirectCall)]
    // ret
    #[case(&[0x67, 0x80, 0x00, 0x00], ControlFlow::Return)]
    fn test_riscv_control_flow(#[case] bytes: &[u8], #[case] expected: ControlFlow) {
        assert_eq!(flow_at(Architecture::RiscV64, bytes, 4), Some(expected));
        assert_eq!(flow_at(Architecture::RiscV32, bytes, 4), Some(expected));
    }

    #[rstest]
    // jal 0x10
    #[case(&[0x04, 0x00, 0x00, 0x0c], call(0x10))]
    // j 0x10
    #[case(&[0x04, 0x00, 0x00, 0x08], ControlFlow::Jump(0x10))]
    // beq $a0, $a1, 0x14
    #[case(&[0x04, 0x00, 0x85, 0x10], ControlFlow::CondJump(0x14))]
    // jalr $t9
    #[case(&[0x09, 0xf8, 0x20, 0x03], ControlFlow::IndirectCall)]
    // jr $ra
    #[case(&[0x08, 0x00, 0xe0, 0x03], ControlFlow::Return)]
    fn test_mips_control_flow(#[case] bytes: &[u8], #[case] expected: ControlFlow) {
        assert_eq!(flow_at(Architecture::Mips32, bytes, 0), Some(expected));
    }

    #[rstest]
    // bl 0x10
    #[case(&[0x48, 0x00, 0x00, 0x11], call(0x10))]
    // b 0x10
    #[case(&[0x48, 0x00, 0x00, 0x10], ControlFlow::Jump(0x10))]
    // beq 0x10
    #[case(&[0x41, 0x82, 0x00, 0x10], ControlFlow::CondJump(0x10))]
    // bctrl
    #[case(&[0x4e, 0x80, 0x04, 0x21], ControlFlow::IndirectCall)]
    // blr
    #[case(&[0x4e, 0x80, 0x00, 0x20], ControlFlow::Return)]
    // bctr
    #[case(&[0x4e, 0x80, 0x04, 0x20], ControlFlow::IndirectJump)]
    fn test_ppc_control_flow(#[case] bytes: &[u8], #[case] expected: ControlFlow) {
        assert_eq!(flow_at(Architecture::Ppc32, bytes, 0), Some(expected));
    }

    #[test]
    fn test_pc_writes() {
        assert_eq!(arm_flow("ldm", "sp!, {r4, r5, pc}", None), Some(ControlFlow::Return));
        assert_eq!(arm_flow("ldmia", "r0, {r1, pc}", None), Some(ControlFlow::IndirectJump));
        assert_eq!(arm_flow("mov", "pc, lr", None), Some(ControlFlow::Return));
        assert_eq!(arm_flow("ldr", "pc, [r0]", None), Some(ControlFlow::IndirectJump));
        assert_eq!(arm_flow("pop", "{r4, r5}", None), None);
        assert_eq!(riscv_flow("jalr", "zero, 0(ra)", None), Some(ControlFlow::Return));
        assert_eq!(riscv_flow("jalr", "zero, 0(t0)", None), Some(ControlFlow::IndirectJump));
        assert_eq!(riscv_flow("c.jr", "ra", None), Some(ControlFlow::Return));
        assert_eq!(mips_flow("jr", "$t9", None), Some(ControlFlow::IndirectJump));
    }

    #[test]
    fn test_registry_resolves_aliases() {
        let registry = DecoderRegistry::with_builtin();
        assert_eq!(registry.names().count(), Architecture::all().len());

        for name in ["x86", "i386", "AMD64", "arm64", "riscv", "ppc"] {
            assert!(registry.resolve(name).is_ok(), "failed to resolve {}", name);
        }
    }

    #[test]
    fn test_registry_errors() {
        let mut registry = DecoderRegistry::new();
        assert!(matches!(
            registry.resolve("x86"),
            Err(LiftError::UnknownArchitecture(_))
        ));

        registry.register("broken", || {
            Err(DecoderError::UnsupportedArchitecture(Architecture::Ppc32))
        });
        match registry.resolve("broken") {
            Err(LiftError::DecoderUnavailable { arch, reason }) => {
                assert_eq!(arch, "broken");
                assert!(reason.contains("PowerPC 32"));
            }
            _ => panic!("Expected DecoderUnavailable"),
        }
    }
}
