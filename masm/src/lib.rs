//! Two-pass assembler for a MIPS-style assembly language.
//!
//! The main entry points are [`assemble`] and [`assemble_with`], which take
//! assembly source text and produce a relocatable
//! [`BinaryImage`](../mimage/struct.BinaryImage.html): per-segment payloads,
//! a symbol table, relocation records and a source map. The pipeline is a
//! straight line of composable stages:
//!
//! ```text
//! source text
//!   -> include expansion   (.include splicing + origin map)
//!   -> macro expansion     (.macro/.end_macro, lexical substitution)
//!   -> lexer               (per-line token vectors)
//!   -> parser              (directives, labels, instructions)
//!   -> pass 1              (symbol table construction)
//!   -> pass 2              (pseudo-op expansion, encoding, relocation)
//! ```
//!
//! # Segments
//!
//! Four output segments exist, selected by directive: `.text` (default,
//! base 0x00400000), `.data` (0x10010000), `.ktext` (0x80000000) and
//! `.kdata` (0x90000000). Instructions may only appear in `.text`/`.ktext`,
//! data directives only in `.data`/`.kdata`.
//!
//! # Directives
//!
//! Keyword | Effect
//! --------|-------
//! `.text .data .ktext .kdata` | select the current segment
//! `.word .half .byte` | emit integer values (big-endian)
//! `.float .double` | emit IEEE 754 values
//! `.ascii .asciiz` | emit UTF-8 string bytes, `.asciiz` NUL-terminated
//! `.space N` | reserve N zeroed bytes (`.skip` is an alias)
//! `.align K` | pad to a multiple of 2^K (`.balign` is an alias)
//! `.globl SYM` | export a symbol (`.global` is an alias)
//! `.extern SYM` | declare an external symbol
//! `.eqv NAME VALUE` | define an equate (`.equ` is an alias)
//! `.include "PATH"` | splice another file (via the include resolver)
//! `.macro .end_macro` | define a lexical macro
//! `.module .endmodule` | scope label names with a `NAME::` prefix
//! `.org ADDR` | move the segment offset forward to ADDR
//! `.set` | accepted and ignored
//!
//! # Registers
//!
//! The usual o32 names: `$zero $at $v0-$v1 $a0-$a3 $t0-$t9 $s0-$s7 $k0-$k1
//! $gp $sp $fp $ra`, the numeric forms `$0`-`$31`, and `$s8` as an alias
//! for `$fp`.
//!
//! # Pseudo-instructions
//!
//! `li`, `move`, `muli` and `nop` are built in; everything else outside the
//! native set is driven by the pseudo-op catalog (see the [`pseudo`]
//! module), which ships bundled and can be overridden per host. Expansion
//! can be disabled entirely through
//! [`AssembleOptions::enable_pseudo_instructions`].

mod ast;
mod emit;
mod encode;
pub mod error;
mod expr;
mod include;
mod layout;
mod lexer;
mod macros;
mod parser;
pub mod pseudo;
mod symbols;


pub use crate::error::{Error, ErrorKind, Result, SourceLocation};
pub use mimage::BinaryImage;

use crate::pseudo::PseudoOpTable;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Resolver callback for `.include`: absolute path in, file contents out.
/// The assembler itself never touches the filesystem.
pub type IncludeResolver = Box<dyn Fn(&Path) -> std::io::Result<String>>;

pub struct AssembleOptions {
    /// Directory against which relative includes in the top-level source
    /// are resolved.
    pub base_dir: Option<PathBuf>,
    /// Name used for the top-level source in diagnostics and the source
    /// map.
    pub source_name: Option<String>,
    pub include_resolver: Option<IncludeResolver>,
    pub enable_pseudo_instructions: bool,
    pub delayed_branching_enabled: bool,
    /// Explicit pseudo-op table; the process-wide table is used otherwise.
    pub pseudo_ops: Option<Arc<PseudoOpTable>>,
}

impl Default for AssembleOptions {
    fn default() -> AssembleOptions {
        AssembleOptions {
            base_dir: None,
            source_name: None,
            include_resolver: None,
            enable_pseudo_instructions: true,
            delayed_branching_enabled: true,
            pseudo_ops: None,
        }
    }
}

/// Assembles with default options.
pub fn assemble(source: &str) -> Result<BinaryImage> {
    assemble_with(source, &AssembleOptions::default())
}

/// Assembles one source into a binary image. All core state lives for the
/// duration of this call; nothing is shared between calls except the
/// read-only pseudo-op table.
pub fn assemble_with(source: &str, options: &AssembleOptions) -> Result<BinaryImage> {
    let (lines, origins) = include::expand_includes(source, options)?;

    let mut lexed = Vec::with_capacity(lines.len());
    for (index, text) in lines.iter().enumerate() {
        let line = index as u32 + 1;
        lexed.push(lexer::lex_line(text, line).map_err(|e| e.at(origins.get(line)))?);
    }

    let expanded = macros::expand_macros(lexed, &origins)?;
    let ast = parser::parse_program(&expanded, &origins)?;

    let table = options
        .pseudo_ops
        .clone()
        .unwrap_or_else(pseudo::global);
    let pass1 = symbols::run(&ast, &table, options, &origins)?;
    emit::run(&ast, &pass1, &origins)
}
