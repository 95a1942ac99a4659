//! Native instruction descriptors and the fixed-width encoders. Everything
//! that leaves pseudo-op expansion comes through here exactly once per
//! emitted word; relocations are recorded against the current segment
//! offset.

use crate::ast::{Instruction, MemoryOffset, Operand};
use crate::error::{EncodingError, Error, Result, SymbolError};
use crate::expr::{self, ExprNode, SymbolResolver};
use crate::symbols::SymbolTable;
use mimage::{RelocationRecord, RelocationType};
use mips::{
    constants, make_i_instruction, make_j_instruction, make_r_instruction,
    make_special2_instruction, Funct, Opcode, RegisterId, Segment, Word,
};
use util::EnumFromStr;
use util_derive::EnumFromStr;

/// The native mnemonic set. Anything else must come from the pseudo-op
/// table.
#[derive(Clone, Copy, PartialEq, Eq, Debug, EnumFromStr)]
pub enum Mnemonic {
    ADDI,
    ADDIU,
    ORI,
    ANDI,
    XORI,
    LUI,
    ADD,
    ADDU,
    MUL,
    SUB,
    SUBU,
    AND,
    OR,
    SLT,
    SLL,
    SLTI,
    SLTIU,
    LB,
    LBU,
    LH,
    LHU,
    LW,
    SB,
    SH,
    SW,
    BEQ,
    BNE,
    J,
    JAL,
    JR,
    SYSCALL,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NativeKind {
    RType(Funct),
    Mul,
    Shift,
    JumpRegister,
    ArithI { opcode: Opcode, signed: bool },
    Lui,
    Branch(Opcode),
    LoadStore(Opcode),
    Jump(Opcode),
    Syscall,
}

pub fn native_kind(mnemonic: &str) -> Option<NativeKind> {
    let mnemonic = Mnemonic::from_str(&mnemonic.to_uppercase()).ok()?;
    Some(match mnemonic {
        Mnemonic::ADD => NativeKind::RType(Funct::ADD),
        Mnemonic::ADDU => NativeKind::RType(Funct::ADDU),
        Mnemonic::SUB => NativeKind::RType(Funct::SUB),
        Mnemonic::SUBU => NativeKind::RType(Funct::SUBU),
        Mnemonic::AND => NativeKind::RType(Funct::AND),
        Mnemonic::OR => NativeKind::RType(Funct::OR),
        Mnemonic::SLT => NativeKind::RType(Funct::SLT),
        Mnemonic::MUL => NativeKind::Mul,
        Mnemonic::SLL => NativeKind::Shift,
        Mnemonic::JR => NativeKind::JumpRegister,
        Mnemonic::ADDI => NativeKind::ArithI {
            opcode: Opcode::ADDI,
            signed: true,
        },
        Mnemonic::ADDIU => NativeKind::ArithI {
            opcode: Opcode::ADDIU,
            signed: true,
        },
        Mnemonic::SLTI => NativeKind::ArithI {
            opcode: Opcode::SLTI,
            signed: true,
        },
        Mnemonic::SLTIU => NativeKind::ArithI {
            opcode: Opcode::SLTIU,
            signed: true,
        },
        Mnemonic::ANDI => NativeKind::ArithI {
            opcode: Opcode::ANDI,
            signed: false,
        },
        Mnemonic::ORI => NativeKind::ArithI {
            opcode: Opcode::ORI,
            signed: false,
        },
        Mnemonic::XORI => NativeKind::ArithI {
            opcode: Opcode::XORI,
            signed: false,
        },
        Mnemonic::LUI => NativeKind::Lui,
        Mnemonic::BEQ => NativeKind::Branch(Opcode::BEQ),
        Mnemonic::BNE => NativeKind::Branch(Opcode::BNE),
        Mnemonic::LB => NativeKind::LoadStore(Opcode::LB),
        Mnemonic::LBU => NativeKind::LoadStore(Opcode::LBU),
        Mnemonic::LH => NativeKind::LoadStore(Opcode::LH),
        Mnemonic::LHU => NativeKind::LoadStore(Opcode::LHU),
        Mnemonic::LW => NativeKind::LoadStore(Opcode::LW),
        Mnemonic::SB => NativeKind::LoadStore(Opcode::SB),
        Mnemonic::SH => NativeKind::LoadStore(Opcode::SH),
        Mnemonic::SW => NativeKind::LoadStore(Opcode::SW),
        Mnemonic::J => NativeKind::Jump(Opcode::J),
        Mnemonic::JAL => NativeKind::Jump(Opcode::JAL),
        Mnemonic::SYSCALL => NativeKind::Syscall,
    })
}

pub fn fits_i16(value: i64) -> bool {
    value >= i64::from(i16::min_value()) && value <= i64::from(i16::max_value())
}

pub fn fits_u16(value: i64) -> bool {
    value >= 0 && value <= i64::from(u16::max_value())
}

fn is_register(operand: &Operand) -> bool {
    matches!(operand, Operand::Register { .. })
}

/// Whether the operands encode directly, without pseudo-op expansion. An
/// out-of-range immediate or a symbolic operand in an immediate slot sends
/// the instruction to the table instead.
pub fn operands_fit_native(kind: &NativeKind, operands: &[Operand]) -> bool {
    match kind {
        NativeKind::RType(_) | NativeKind::Mul => {
            operands.len() == 3 && operands.iter().all(is_register)
        }
        NativeKind::Shift => match operands {
            [Operand::Register { .. }, Operand::Register { .. }, Operand::Immediate { value }] => {
                *value >= 0 && *value <= 31
            }
            _ => false,
        },
        NativeKind::JumpRegister => matches!(operands, [Operand::Register { .. }]),
        NativeKind::ArithI { signed, .. } => match operands {
            [Operand::Register { .. }, Operand::Register { .. }, Operand::Immediate { value }] => {
                if *signed {
                    fits_i16(*value)
                } else {
                    fits_u16(*value)
                }
            }
            _ => false,
        },
        NativeKind::Lui => match operands {
            [Operand::Register { .. }, Operand::Immediate { value }] => fits_u16(*value),
            [Operand::Register { .. }, Operand::Label { .. }]
            | [Operand::Register { .. }, Operand::Expression { .. }] => true,
            _ => false,
        },
        NativeKind::Branch(_) => match operands {
            [Operand::Register { .. }, Operand::Register { .. }, Operand::Immediate { value }] => {
                fits_i16(*value)
            }
            [Operand::Register { .. }, Operand::Register { .. }, Operand::Label { .. }]
            | [Operand::Register { .. }, Operand::Register { .. }, Operand::Expression { .. }] => {
                true
            }
            _ => false,
        },
        NativeKind::LoadStore(_) => match operands {
            [Operand::Register { .. }, Operand::Memory { offset, .. }] => match offset {
                MemoryOffset::Immediate(value) => fits_i16(*value),
                MemoryOffset::Label(_) | MemoryOffset::Expression(_) => false,
            },
            _ => false,
        },
        NativeKind::Jump(_) => match operands {
            [Operand::Label { .. }]
            | [Operand::Immediate { .. }]
            | [Operand::Expression { .. }] => true,
            _ => false,
        },
        NativeKind::Syscall => operands.is_empty(),
    }
}

/// Module-aware symbol resolution; extern and undefined symbols evaluate to
/// zero and leave patching to the relocation record.
pub struct TableResolver<'a> {
    pub table: &'a SymbolTable,
    pub modules: &'a [String],
}

impl<'a> SymbolResolver for TableResolver<'a> {
    fn resolve(&mut self, name: &str) -> Result<i64> {
        if let Some(value) = self.table.lookup(name, self.modules) {
            return Ok(i64::from(value));
        }
        if self.table.is_external(name) {
            return Ok(0);
        }
        Err(Error::from(SymbolError::Undefined {
            name: name.to_string(),
        }))
    }
}

pub struct EncodeContext<'a> {
    pub symbols: &'a SymbolTable,
    pub modules: &'a [String],
    pub segment: Segment,
    /// Address of the instruction being encoded.
    pub pc: u32,
    /// Byte offset of the instruction within its segment.
    pub offset: u32,
}

struct ResolvedValue {
    value: i64,
    /// `(symbol, symbol_value)` when the operand referenced a symbol.
    symbol: Option<(String, i64)>,
}

impl<'a> EncodeContext<'a> {
    fn resolver(&self) -> TableResolver<'a> {
        TableResolver {
            table: self.symbols,
            modules: self.modules,
        }
    }

    fn resolve_symbol(&self, name: &str) -> Result<ResolvedValue> {
        let value = self.resolver().resolve(name)?;
        Ok(ResolvedValue {
            value,
            symbol: Some((name.to_string(), value)),
        })
    }

    fn resolve_tree(&self, tree: &ExprNode) -> Result<ResolvedValue> {
        let mut resolver = self.resolver();
        let value = expr::evaluate(tree, &mut resolver)?;
        let symbol = match tree.first_symbol() {
            Some(name) => Some((name.to_string(), resolver.resolve(name)?)),
            None => None,
        };
        Ok(ResolvedValue { value, symbol })
    }

    fn resolve_operand(&self, operand: &Operand) -> Result<ResolvedValue> {
        match operand {
            Operand::Immediate { value } => Ok(ResolvedValue {
                value: *value,
                symbol: None,
            }),
            Operand::Label { name } => self.resolve_symbol(name),
            Operand::Expression { tree } => self.resolve_tree(tree),
            _ => Err(Error::from(EncodingError::OperandMismatch {
                mnemonic: String::new(),
            })),
        }
    }

    fn resolve_offset(&self, offset: &MemoryOffset) -> Result<ResolvedValue> {
        match offset {
            MemoryOffset::Immediate(value) => Ok(ResolvedValue {
                value: *value,
                symbol: None,
            }),
            MemoryOffset::Label(name) => self.resolve_symbol(name),
            MemoryOffset::Expression(tree) => self.resolve_tree(tree),
        }
    }

    fn relocation(&self, kind: RelocationType, resolved: &ResolvedValue) -> Option<RelocationRecord> {
        resolved.symbol.as_ref().map(|(name, symbol_value)| {
            RelocationRecord {
                segment: self.segment,
                offset: self.offset,
                symbol: name.clone(),
                kind,
                addend: resolved.value - symbol_value,
            }
        })
    }
}

fn reg(operand: &Operand, mnemonic: &str) -> Result<RegisterId> {
    match operand {
        Operand::Register { id, .. } => Ok(*id),
        _ => Err(Error::from(EncodingError::OperandMismatch {
            mnemonic: mnemonic.to_string(),
        })),
    }
}

fn mismatch(mnemonic: &str) -> Error {
    Error::from(EncodingError::OperandMismatch {
        mnemonic: mnemonic.to_string(),
    })
}

/// Encodes one native instruction to its 32-bit word, returning the
/// relocation record if a symbol was referenced.
pub fn encode_instruction(
    instruction: &Instruction,
    ctx: &EncodeContext,
) -> Result<(Word, Option<RelocationRecord>)> {
    let mnemonic = instruction.mnemonic.as_str();
    let kind = native_kind(mnemonic).ok_or_else(|| {
        Error::from(EncodingError::UnknownInstruction {
            mnemonic: mnemonic.to_string(),
        })
    })?;
    let ops = &instruction.operands;

    match kind {
        NativeKind::RType(funct) => {
            if ops.len() != 3 {
                return Err(mismatch(mnemonic));
            }
            let rd = reg(&ops[0], mnemonic)?;
            let rs = reg(&ops[1], mnemonic)?;
            let rt = reg(&ops[2], mnemonic)?;
            Ok((make_r_instruction(funct, rd, rs, rt, 0), None))
        }
        NativeKind::Mul => {
            if ops.len() != 3 {
                return Err(mismatch(mnemonic));
            }
            let rd = reg(&ops[0], mnemonic)?;
            let rs = reg(&ops[1], mnemonic)?;
            let rt = reg(&ops[2], mnemonic)?;
            Ok((make_special2_instruction(rd, rs, rt), None))
        }
        NativeKind::Shift => {
            if ops.len() != 3 {
                return Err(mismatch(mnemonic));
            }
            let rd = reg(&ops[0], mnemonic)?;
            let rt = reg(&ops[1], mnemonic)?;
            let shamt = ctx.resolve_operand(&ops[2])?.value;
            if shamt < 0 || shamt > 31 {
                return Err(Error::from(EncodingError::ShiftOutOfRange { value: shamt }));
            }
            Ok((
                make_r_instruction(Funct::SLL, rd, RegisterId::ZERO, rt, shamt as u32),
                None,
            ))
        }
        NativeKind::JumpRegister => {
            if ops.len() != 1 {
                return Err(mismatch(mnemonic));
            }
            let rs = reg(&ops[0], mnemonic)?;
            Ok((
                make_r_instruction(Funct::JR, RegisterId::ZERO, rs, RegisterId::ZERO, 0),
                None,
            ))
        }
        NativeKind::ArithI { opcode, signed } => {
            if ops.len() != 3 {
                return Err(mismatch(mnemonic));
            }
            let rt = reg(&ops[0], mnemonic)?;
            let rs = reg(&ops[1], mnemonic)?;
            let resolved = ctx.resolve_operand(&ops[2])?;
            let in_range = if signed {
                fits_i16(resolved.value)
            } else {
                fits_u16(resolved.value)
            };
            if !in_range {
                return Err(Error::from(EncodingError::ImmediateOutOfRange {
                    mnemonic: mnemonic.to_string(),
                    value: resolved.value,
                }));
            }
            let reloc = ctx.relocation(RelocationType::MipsLo16, &resolved);
            Ok((
                make_i_instruction(opcode, rs, rt, resolved.value as u16 as i16),
                reloc,
            ))
        }
        NativeKind::Lui => {
            if ops.len() != 2 {
                return Err(mismatch(mnemonic));
            }
            let rt = reg(&ops[0], mnemonic)?;
            let resolved = ctx.resolve_operand(&ops[1])?;
            if resolved.symbol.is_none() && !fits_u16(resolved.value) {
                return Err(Error::from(EncodingError::ImmediateOutOfRange {
                    mnemonic: mnemonic.to_string(),
                    value: resolved.value,
                }));
            }
            let reloc = ctx.relocation(RelocationType::MipsHi16, &resolved);
            Ok((
                make_i_instruction(Opcode::LUI, RegisterId::ZERO, rt, resolved.value as u16 as i16),
                reloc,
            ))
        }
        NativeKind::Branch(opcode) => {
            if ops.len() != 3 {
                return Err(mismatch(mnemonic));
            }
            let rs = reg(&ops[0], mnemonic)?;
            let rt = reg(&ops[1], mnemonic)?;
            let (offset, reloc) = match &ops[2] {
                Operand::Immediate { value } => {
                    if !fits_i16(*value) {
                        return Err(Error::from(EncodingError::BranchOutOfRange {
                            distance: *value,
                        }));
                    }
                    (*value, None)
                }
                target => {
                    let resolved = ctx.resolve_operand(target)?;
                    let external = resolved
                        .symbol
                        .as_ref()
                        .map(|(name, _)| is_unresolved_external(ctx, name))
                        .unwrap_or(false);
                    let distance = if external {
                        // Externals encode a zero field; the relocation
                        // carries the addend.
                        0
                    } else {
                        (resolved.value - (i64::from(ctx.pc) + 4)) / 4
                    };
                    if !fits_i16(distance) {
                        return Err(Error::from(EncodingError::BranchOutOfRange { distance }));
                    }
                    (distance, ctx.relocation(RelocationType::MipsPc16, &resolved))
                }
            };
            Ok((
                make_i_instruction(opcode, rs, rt, offset as i16),
                reloc,
            ))
        }
        NativeKind::LoadStore(opcode) => {
            if ops.len() != 2 {
                return Err(mismatch(mnemonic));
            }
            let rt = reg(&ops[0], mnemonic)?;
            let (base, offset) = match &ops[1] {
                Operand::Memory { base, offset } => (*base, offset),
                _ => return Err(mismatch(mnemonic)),
            };
            let resolved = ctx.resolve_offset(offset)?;
            if !fits_i16(resolved.value) {
                return Err(Error::from(EncodingError::ImmediateOutOfRange {
                    mnemonic: mnemonic.to_string(),
                    value: resolved.value,
                }));
            }
            let reloc = ctx.relocation(RelocationType::MipsLo16, &resolved);
            Ok((
                make_i_instruction(opcode, base, rt, resolved.value as i16),
                reloc,
            ))
        }
        NativeKind::Jump(opcode) => {
            if ops.len() != 1 {
                return Err(mismatch(mnemonic));
            }
            let resolved = ctx.resolve_operand(&ops[0])?;
            let reloc = ctx.relocation(RelocationType::Mips26, &resolved);
            let target = (resolved.value as u32) >> 2;
            Ok((make_j_instruction(opcode, target), reloc))
        }
        NativeKind::Syscall => {
            if !ops.is_empty() {
                return Err(mismatch(mnemonic));
            }
            Ok((constants::SYSCALL_WORD, None))
        }
    }
}

fn is_unresolved_external(ctx: &EncodeContext, name: &str) -> bool {
    ctx.symbols.lookup(name, ctx.modules).is_none() && ctx.symbols.is_external(name)
}
