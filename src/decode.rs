//! Field extraction and reference decoding for encoded instruction words.
//! The decoder is the exact inverse of the `make_*` constructors and covers
//! only the native set; it exists so tests can round-trip emitted text.

use crate::{constants, Funct, Opcode, Word};
use num::traits::FromPrimitive;

#[inline]
pub fn opcode_bits(word: Word) -> u32 {
    (word & constants::OPCODE_MASK) >> constants::OPCODE_OFFSET
}

#[inline]
pub fn rs_bits(word: Word) -> u32 {
    (word & constants::RS_MASK) >> constants::RS_OFFSET
}

#[inline]
pub fn rt_bits(word: Word) -> u32 {
    (word & constants::RT_MASK) >> constants::RT_OFFSET
}

#[inline]
pub fn rd_bits(word: Word) -> u32 {
    (word & constants::RD_MASK) >> constants::RD_OFFSET
}

#[inline]
pub fn shamt_bits(word: Word) -> u32 {
    (word & constants::SHAMT_MASK) >> constants::SHAMT_OFFSET
}

#[inline]
pub fn funct_bits(word: Word) -> u32 {
    (word & constants::FUNCT_MASK) >> constants::FUNCT_OFFSET
}

#[inline]
pub fn immediate_bits(word: Word) -> i16 {
    (word & constants::IMMEDIATE_MASK) as i16
}

#[inline]
pub fn target_bits(word: Word) -> u32 {
    (word & constants::TARGET_MASK) >> constants::TARGET_OFFSET
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decoded {
    R {
        funct: Funct,
        rd: u32,
        rs: u32,
        rt: u32,
        shamt: u32,
    },
    I {
        opcode: Opcode,
        rs: u32,
        rt: u32,
        immediate: i16,
    },
    J {
        opcode: Opcode,
        target: u32,
    },
    Syscall,
}

impl Decoded {
    pub fn mnemonic(&self) -> &'static str {
        match *self {
            Decoded::Syscall => "syscall",
            Decoded::R { funct, .. } => match funct {
                Funct::SLL => "sll",
                Funct::MUL => "mul",
                Funct::JR => "jr",
                Funct::SYSCALL => "syscall",
                Funct::ADD => "add",
                Funct::ADDU => "addu",
                Funct::SUB => "sub",
                Funct::SUBU => "subu",
                Funct::AND => "and",
                Funct::OR => "or",
                Funct::SLT => "slt",
            },
            Decoded::I { opcode, .. } => match opcode {
                Opcode::BEQ => "beq",
                Opcode::BNE => "bne",
                Opcode::ADDI => "addi",
                Opcode::ADDIU => "addiu",
                Opcode::SLTI => "slti",
                Opcode::SLTIU => "sltiu",
                Opcode::ANDI => "andi",
                Opcode::ORI => "ori",
                Opcode::XORI => "xori",
                Opcode::LUI => "lui",
                Opcode::LB => "lb",
                Opcode::LH => "lh",
                Opcode::LW => "lw",
                Opcode::LBU => "lbu",
                Opcode::LHU => "lhu",
                Opcode::SB => "sb",
                Opcode::SH => "sh",
                Opcode::SW => "sw",
                _ => "",
            },
            Decoded::J { opcode, .. } => match opcode {
                Opcode::J => "j",
                Opcode::JAL => "jal",
                _ => "",
            },
        }
    }
}

/// Decodes one instruction word. Returns `None` for encodings outside the
/// native set.
pub fn decode(word: Word) -> Option<Decoded> {
    let opcode = Opcode::from_u32(opcode_bits(word))?;
    match opcode {
        Opcode::SPECIAL => {
            let funct = Funct::from_u32(funct_bits(word))?;
            if funct == Funct::SYSCALL {
                return Some(Decoded::Syscall);
            }
            if funct == Funct::MUL {
                // MUL shares its code with nothing under SPECIAL.
                return None;
            }
            Some(Decoded::R {
                funct,
                rd: rd_bits(word),
                rs: rs_bits(word),
                rt: rt_bits(word),
                shamt: shamt_bits(word),
            })
        }
        Opcode::SPECIAL2 => {
            if funct_bits(word) != constants::SPECIAL2_MUL_FUNCT {
                return None;
            }
            Some(Decoded::R {
                funct: Funct::MUL,
                rd: rd_bits(word),
                rs: rs_bits(word),
                rt: rt_bits(word),
                shamt: 0,
            })
        }
        Opcode::J | Opcode::JAL => Some(Decoded::J {
            opcode,
            target: target_bits(word),
        }),
        _ => Some(Decoded::I {
            opcode,
            rs: rs_bits(word),
            rt: rt_bits(word),
            immediate: immediate_bits(word),
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::*;

    #[test]
    fn round_trip_i_type() {
        let word = instr_i!(ADDI, T1, T0, -7);
        match decode(word) {
            Some(Decoded::I {
                opcode,
                rs,
                rt,
                immediate,
            }) => {
                assert_eq!(opcode, Opcode::ADDI);
                assert_eq!(rs, 9);
                assert_eq!(rt, 8);
                assert_eq!(immediate, -7);
            }
            other => panic!("decoded {:?}", other),
        }
    }

    #[test]
    fn round_trip_special2() {
        let word = make_special2_instruction(RegisterId::T0, RegisterId::T1, RegisterId::AT);
        assert_eq!(
            decode(word),
            Some(Decoded::R {
                funct: Funct::MUL,
                rd: 8,
                rs: 9,
                rt: 1,
                shamt: 0,
            })
        );
        assert_eq!(decode(word).unwrap().mnemonic(), "mul");
    }

    #[test]
    fn syscall_word_decodes() {
        assert_eq!(decode(constants::SYSCALL_WORD), Some(Decoded::Syscall));
    }

    #[test]
    fn unknown_opcode_is_none() {
        assert_eq!(decode(0xffff_ffff), None);
    }
}
