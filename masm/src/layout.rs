//! Per-segment offset arithmetic shared by both passes: advancing, implicit
//! and explicit alignment, and `.org` jumps. Pass 1 and Pass 2 drive the
//! exact same cursor operations, which is what keeps their offsets in step.

use crate::ast::{AstNode, Operand};
use crate::error::{Error, Result, SymbolError};
use mips::Segment;
use num_integer::Integer;

fn segment_index(segment: Segment) -> usize {
    match segment {
        Segment::Text => 0,
        Segment::Data => 1,
        Segment::KText => 2,
        Segment::KData => 3,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LayoutCursor {
    pub segment: Segment,
    offsets: [u32; 4],
}

impl LayoutCursor {
    pub fn new() -> LayoutCursor {
        LayoutCursor {
            segment: Segment::Text,
            offsets: [0; 4],
        }
    }

    pub fn offset_of(&self, segment: Segment) -> u32 {
        self.offsets[segment_index(segment)]
    }

    pub fn offset(&self) -> u32 {
        self.offset_of(self.segment)
    }

    /// Absolute address of the current position.
    pub fn address(&self) -> u32 {
        self.segment.base() + self.offset()
    }

    pub fn switch(&mut self, segment: Segment) {
        self.segment = segment;
    }

    pub fn advance(&mut self, bytes: u32) {
        self.offsets[segment_index(self.segment)] += bytes;
    }

    /// Pads the current segment to a multiple of `alignment` bytes and
    /// returns the number of padding bytes.
    pub fn align(&mut self, alignment: u32) -> u32 {
        if alignment <= 1 {
            return 0;
        }
        let offset = self.offset();
        let padding = Integer::next_multiple_of(&offset, &alignment) - offset;
        self.advance(padding);
        padding
    }

    /// Moves the current offset forward to `address`, returning the number
    /// of padding bytes. Backward movement is an error.
    pub fn org(&mut self, address: u32) -> Result<u32> {
        let base = self.segment.base();
        let current = self.address();
        if address < current {
            return Err(Error::from(SymbolError::OrgBackward {
                requested: address,
                current,
            }));
        }
        if self.segment.holds_code() && (address - base) % 4 != 0 {
            return Err(Error::from(SymbolError::OrgUnaligned { requested: address }));
        }
        let padding = address - current;
        self.advance(padding);
        Ok(padding)
    }
}

/// Directives that add bytes to a data segment.
pub fn sized_data_directive(name: &str) -> bool {
    match name {
        ".byte" | ".half" | ".word" | ".float" | ".double" | ".ascii" | ".asciiz" | ".space" => {
            true
        }
        _ => false,
    }
}

/// Natural alignment of a data directive's elements.
pub fn natural_alignment(name: &str) -> u32 {
    match name {
        ".half" => 2,
        ".word" | ".float" => 4,
        ".double" => 8,
        _ => 1,
    }
}

/// Element size in bytes for the fixed-width data directives.
pub fn element_size(name: &str) -> u32 {
    match name {
        ".byte" => 1,
        ".half" => 2,
        ".word" | ".float" => 4,
        ".double" => 8,
        _ => 0,
    }
}

/// Alignment a label must receive so it points at the next sized data
/// directive. Scans past other labels and non-emitting directives; anything
/// else ends the search with no padding.
pub fn lookahead_alignment(nodes: &[AstNode], index: usize) -> u32 {
    for node in &nodes[index + 1..] {
        match node {
            AstNode::Label { .. } => continue,
            AstNode::Directive { name, .. } => {
                if sized_data_directive(name) {
                    return natural_alignment(name);
                }
                match name.as_str() {
                    ".globl" | ".extern" | ".eqv" | ".set" | ".module" | ".endmodule" => continue,
                    _ => return 1,
                }
            }
            AstNode::Instruction(_) => return 1,
        }
    }
    1
}

fn invalid_size(name: &str, detail: &str) -> Error {
    Error::from(SymbolError::InvalidSize {
        name: name.to_string(),
        detail: detail.to_string(),
    })
}

/// The single literal argument of `.space`, `.align` and `.org`. Symbolic
/// expressions are rejected so both passes compute identical sizes.
pub fn literal_argument(name: &str, args: &[Operand]) -> Result<i64> {
    match args {
        [Operand::Immediate { value }] => Ok(*value),
        _ => Err(invalid_size(name, "must be a constant expression")),
    }
}

/// Power-of-two exponent for `.align`.
pub fn alignment_argument(args: &[Operand]) -> Result<u32> {
    let value = literal_argument(".align", args)?;
    if value < 0 || value > 31 {
        return Err(invalid_size(".align", "exponent must be between 0 and 31"));
    }
    Ok(1u32 << value)
}

/// Number of reserved bytes for `.space`.
pub fn space_argument(args: &[Operand]) -> Result<u32> {
    let value = literal_argument(".space", args)?;
    if value < 0 || value > i64::from(u32::max_value()) {
        return Err(invalid_size(".space", "size must be non-negative"));
    }
    Ok(value as u32)
}

/// Byte length one data directive adds to its segment, not counting
/// alignment padding. Used identically by both passes.
pub fn data_directive_len(name: &str, args: &[Operand]) -> Result<u32> {
    match name {
        ".byte" | ".half" | ".word" | ".float" | ".double" => {
            Ok(element_size(name) * args.len() as u32)
        }
        ".ascii" | ".asciiz" => {
            let mut total = 0u32;
            for arg in args {
                match arg {
                    Operand::String { bytes } => total += bytes.len() as u32,
                    _ => return Err(invalid_size(name, "expects a string")),
                }
            }
            if name == ".asciiz" {
                total += 1;
            }
            Ok(total)
        }
        ".space" => space_argument(args),
        _ => Ok(0),
    }
}
