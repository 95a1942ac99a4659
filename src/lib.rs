//! Instruction set model for the 32-bit MIPS subset assembled by
//! [masm](../masm/index.html): register identifiers, opcode and function
//! codes, instruction word construction and field extraction, and the
//! default memory segment map.

extern crate num;

pub mod constants;
mod enums;
pub mod decode;

pub use enums::*;

pub type Word = u32;
pub type Immediate = i16;
pub type Address = u32;
