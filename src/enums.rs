use crate::{constants, Address, Immediate, Word};
use num::traits::{FromPrimitive, ToPrimitive};
use num_derive::{FromPrimitive, ToPrimitive};
use util::{EnumFromStr, ParseEnumError};
use util_derive::EnumFromStr;

// Instruction Formats
//
//          +------+-----+-----+-----+-----+------+
//          |31    |     |     |     |     |     0|
//          +------+-----+-----+-----+-----+------+
// R-Format |opcode| Rs  | Rt  | Rd  |shamt|funct |
//          +------+-----+-----+-----+-----+------+
// I-Format |opcode| Rs  | Rt  |    immediate     |
//          +------+-----+-----+-----+-----+------+
// J-Format |opcode|           target             |
//          +------+-----+-----+-----+-----+------+

/// The thirty-two integer registers, in encoding order. Variant indices are
/// the hardware register numbers, so `$t0` is variant 8 and encodes as 8.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Debug, ToPrimitive, FromPrimitive, EnumFromStr,
)]
pub enum RegisterId {
    ZERO, // Hardwired zero
    AT,   // Assembler temporary, reserved for pseudo-op expansion

    V0, // Value 0
    V1, // Value 1

    A0, // Argument 0
    A1, // Argument 1
    A2, // Argument 2
    A3, // Argument 3

    T0, // Temporary 0
    T1, // Temporary 1
    T2, // Temporary 2
    T3, // Temporary 3
    T4, // Temporary 4
    T5, // Temporary 5
    T6, // Temporary 6
    T7, // Temporary 7

    S0, // Saved 0
    S1, // Saved 1
    S2, // Saved 2
    S3, // Saved 3
    S4, // Saved 4
    S5, // Saved 5
    S6, // Saved 6
    S7, // Saved 7

    T8, // Temporary 8
    T9, // Temporary 9

    K0, // Kernel 0
    K1, // Kernel 1

    GP, // Global pointer
    SP, // Stack pointer
    FP, // Frame pointer (alias $s8)
    RA, // Return address
}

impl RegisterId {
    /// Parses a register operand. Accepts symbolic names with or without the
    /// `$` sigil, the numeric forms `$0`..`$31`, and the `$s8` alias for
    /// `$fp`. Case-insensitive.
    pub fn parse(name: &str) -> Result<RegisterId, ParseEnumError> {
        let body = if name.starts_with('$') {
            &name[1..]
        } else {
            name
        };

        let not_a_register = || ParseEnumError {
            value: name.to_string(),
            enum_name: "RegisterId",
        };

        if !body.is_empty() && body.bytes().all(|b| b.is_ascii_digit()) {
            return body
                .parse::<u32>()
                .ok()
                .filter(|index| (*index as usize) < constants::REGISTER_COUNT)
                .and_then(RegisterId::from_u32)
                .ok_or_else(not_a_register);
        }

        let upper = body.to_uppercase();
        if upper == "S8" {
            return Ok(RegisterId::FP);
        }
        EnumFromStr::from_str(&upper).map_err(|_| not_a_register())
    }

    #[inline]
    pub fn index(self) -> usize {
        enum_to_u32(self) as usize
    }
}

/// Primary opcodes of the native set. Discriminants are the encoding values;
/// R-type instructions live under `SPECIAL` with a [`Funct`] code and `mul`
/// under `SPECIAL2`.
#[derive(
    Clone, Copy, PartialEq, Eq, Debug, ToPrimitive, FromPrimitive, EnumFromStr,
)]
pub enum Opcode {
    SPECIAL = 0x00,
    J = 0x02,
    JAL = 0x03,
    BEQ = 0x04,
    BNE = 0x05,
    ADDI = 0x08,
    ADDIU = 0x09,
    SLTI = 0x0a,
    SLTIU = 0x0b,
    ANDI = 0x0c,
    ORI = 0x0d,
    XORI = 0x0e,
    LUI = 0x0f,
    SPECIAL2 = 0x1c,
    LB = 0x20,
    LH = 0x21,
    LW = 0x23,
    LBU = 0x24,
    LHU = 0x25,
    SB = 0x28,
    SH = 0x29,
    SW = 0x2b,
}

/// Function codes under `SPECIAL` (plus `MUL`, which is the function code
/// under `SPECIAL2`).
#[derive(
    Clone, Copy, PartialEq, Eq, Debug, ToPrimitive, FromPrimitive, EnumFromStr,
)]
pub enum Funct {
    SLL = 0x00,
    MUL = 0x02,
    JR = 0x08,
    SYSCALL = 0x0c,
    ADD = 0x20,
    ADDU = 0x21,
    SUB = 0x22,
    SUBU = 0x23,
    AND = 0x24,
    OR = 0x25,
    SLT = 0x2a,
}

/// The four output segments. Instructions live in `Text`/`KText`, data
/// directives in `Data`/`KData`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Segment {
    Text,
    Data,
    KText,
    KData,
}

impl Segment {
    #[inline]
    pub fn base(self) -> u32 {
        match self {
            Segment::Text => constants::TEXT_BASE,
            Segment::Data => constants::DATA_BASE,
            Segment::KText => constants::KTEXT_BASE,
            Segment::KData => constants::KDATA_BASE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Segment::Text => "text",
            Segment::Data => "data",
            Segment::KText => "ktext",
            Segment::KData => "kdata",
        }
    }

    /// Whether instructions may be emitted into this segment.
    #[inline]
    pub fn holds_code(self) -> bool {
        match self {
            Segment::Text | Segment::KText => true,
            Segment::Data | Segment::KData => false,
        }
    }
}

#[inline]
pub fn enum_to_u32<T: ToPrimitive + Copy>(val: T) -> u32 {
    val.to_u32().unwrap()
}

macro_rules! impl_enum_display {
    ($e:ty) => {
        impl std::fmt::Display for $e {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                std::fmt::Debug::fmt(self, f)
            }
        }
    };
}

impl_enum_display!(Opcode);
impl_enum_display!(Funct);
impl_enum_display!(RegisterId);
impl_enum_display!(Segment);

#[inline]
pub fn make_r_instruction(
    funct: Funct,
    rd: RegisterId,
    rs: RegisterId,
    rt: RegisterId,
    shamt: u32,
) -> Word {
    ((enum_to_u32(rs) << constants::RS_OFFSET) & constants::RS_MASK)
        | ((enum_to_u32(rt) << constants::RT_OFFSET) & constants::RT_MASK)
        | ((enum_to_u32(rd) << constants::RD_OFFSET) & constants::RD_MASK)
        | ((shamt << constants::SHAMT_OFFSET) & constants::SHAMT_MASK)
        | ((enum_to_u32(funct) << constants::FUNCT_OFFSET) & constants::FUNCT_MASK)
}

/// `mul` is the only native SPECIAL2 instruction.
#[inline]
pub fn make_special2_instruction(rd: RegisterId, rs: RegisterId, rt: RegisterId) -> Word {
    ((enum_to_u32(Opcode::SPECIAL2) << constants::OPCODE_OFFSET) & constants::OPCODE_MASK)
        | ((enum_to_u32(rs) << constants::RS_OFFSET) & constants::RS_MASK)
        | ((enum_to_u32(rt) << constants::RT_OFFSET) & constants::RT_MASK)
        | ((enum_to_u32(rd) << constants::RD_OFFSET) & constants::RD_MASK)
        | constants::SPECIAL2_MUL_FUNCT
}

#[inline]
pub fn make_i_instruction(
    oc: Opcode,
    rs: RegisterId,
    rt: RegisterId,
    immediate: Immediate,
) -> Word {
    ((enum_to_u32(oc) << constants::OPCODE_OFFSET) & constants::OPCODE_MASK)
        | ((enum_to_u32(rs) << constants::RS_OFFSET) & constants::RS_MASK)
        | ((enum_to_u32(rt) << constants::RT_OFFSET) & constants::RT_MASK)
        | (((immediate as u32) << constants::IMMEDIATE_OFFSET) & constants::IMMEDIATE_MASK)
}

#[inline]
pub fn make_j_instruction(oc: Opcode, target: Address) -> Word {
    ((enum_to_u32(oc) << constants::OPCODE_OFFSET) & constants::OPCODE_MASK)
        | ((target << constants::TARGET_OFFSET) & constants::TARGET_MASK)
}

#[macro_export]
macro_rules! instr_r {
    ($funct:ident, $rd:ident, $rs:ident, $rt:ident) => {
        make_r_instruction(
            Funct::$funct,
            RegisterId::$rd,
            RegisterId::$rs,
            RegisterId::$rt,
            0,
        )
    };
}

#[macro_export]
macro_rules! instr_shift {
    ($rd:ident, $rt:ident, $shamt:expr) => {
        make_r_instruction(
            Funct::SLL,
            RegisterId::$rd,
            RegisterId::ZERO,
            RegisterId::$rt,
            $shamt,
        )
    };
}

#[macro_export]
macro_rules! instr_i {
    ($opcode:ident, $rs:ident, $rt:ident, $imm:expr) => {
        make_i_instruction(Opcode::$opcode, RegisterId::$rs, RegisterId::$rt, $imm)
    };
}

#[macro_export]
macro_rules! instr_j {
    ($opcode:ident, $target:expr) => {
        make_j_instruction(Opcode::$opcode, $target)
    };
}

#[macro_export]
macro_rules! nop {
    () => {
        instr_shift!(ZERO, ZERO, 0)
    };
}
