//! Pass 1: address assignment. Walks the AST once, assigning every label a
//! segment-relative address through the shared layout cursor, recording
//! linkage classes, and deferring `.eqv` equates for the fix-point
//! resolution that runs after the walk. Instruction sizing invokes pseudo-op
//! expansion; the expansions are kept and replayed verbatim by Pass 2.

use crate::ast::{AstNode, Instruction, Operand};
use crate::error::{Error, Result, SourceLocation, SymbolError};
use crate::expr::{self, ExprNode, SymbolResolver};
use crate::include::OriginMap;
use crate::layout::{self, LayoutCursor};
use crate::pseudo::PseudoOpTable;
use crate::AssembleOptions;
use std::collections::{HashMap, HashSet};

#[derive(Clone, Debug)]
struct Equate {
    name: String,
    expr: ExprNode,
    /// Module stack at the definition site, for qualified lookup.
    prefix: Vec<String>,
    location: SourceLocation,
}

#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, i32>,
    globl: HashSet<String>,
    externs: HashSet<String>,
    undefined: HashSet<String>,
    equates: Vec<Equate>,
    equate_names: HashMap<String, usize>,
}

fn qualify(prefix: &[String], name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}::{}", prefix.join("::"), name)
    }
}

/// Candidate names for a reference made under `prefix`: fully qualified
/// first, then progressively shorter prefixes, then the bare name.
fn candidates(prefix: &[String], name: &str) -> Vec<String> {
    let mut list = Vec::with_capacity(prefix.len() + 1);
    for end in (1..=prefix.len()).rev() {
        list.push(qualify(&prefix[..end], name));
    }
    list.push(name.to_string());
    list
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    pub fn get(&self, name: &str) -> Option<i32> {
        self.symbols.get(name).copied()
    }

    /// Module-aware lookup: qualified form first, bare name as fallback.
    pub fn lookup(&self, name: &str, modules: &[String]) -> Option<i32> {
        candidates(modules, name)
            .into_iter()
            .find_map(|candidate| self.symbols.get(&candidate).copied())
    }

    pub fn is_external(&self, name: &str) -> bool {
        self.externs.contains(name) || self.undefined.contains(name)
    }

    pub fn defined_names(&self) -> impl Iterator<Item = (&String, &i32)> {
        self.symbols.iter()
    }

    pub fn globl_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.globl.iter().cloned().collect();
        names.sort();
        names
    }

    pub fn extern_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.externs.iter().cloned().collect();
        names.sort();
        names
    }

    pub fn undefined_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.undefined.iter().cloned().collect();
        names.sort();
        names
    }

    fn define_label(&mut self, name: String, address: i32) -> Result<()> {
        if self.equate_names.contains_key(&name) {
            return Err(Error::from(SymbolError::DuplicateSymbol { name }));
        }
        if self.symbols.contains_key(&name) {
            return Err(Error::from(SymbolError::DuplicateLabel { name }));
        }
        self.undefined.remove(&name);
        self.symbols.insert(name, address);
        Ok(())
    }

    fn define_equate(
        &mut self,
        name: String,
        expr: ExprNode,
        prefix: Vec<String>,
        location: SourceLocation,
    ) -> Result<()> {
        if self.symbols.contains_key(&name) || self.equate_names.contains_key(&name) {
            return Err(Error::from(SymbolError::DuplicateSymbol { name }).at(location));
        }
        self.equate_names.insert(name.clone(), self.equates.len());
        self.equates.push(Equate {
            name,
            expr,
            prefix,
            location,
        });
        Ok(())
    }

    fn mark_globl(&mut self, name: &str) {
        self.globl.insert(name.to_string());
    }

    fn mark_extern(&mut self, name: String) -> Result<()> {
        if self.symbols.contains_key(&name) {
            return Err(Error::from(SymbolError::DuplicateSymbol { name }));
        }
        self.externs.insert(name.clone());
        self.undefined.insert(name);
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq)]
enum EquateState {
    Visiting,
    Done,
}

/// Resolves pending equates as a depth-first fix-point; the visiting set
/// catches `CircularEqv`.
struct EquateResolution<'a> {
    table: &'a mut SymbolTable,
    equates: Vec<Equate>,
    states: HashMap<String, EquateState>,
    prefix_stack: Vec<Vec<String>>,
}

impl<'a> EquateResolution<'a> {
    fn resolve_index(&mut self, index: usize) -> Result<i64> {
        let equate = self.equates[index].clone();
        if let Some(value) = self.table.get(&equate.name) {
            return Ok(i64::from(value));
        }
        match self.states.get(&equate.name) {
            Some(EquateState::Visiting) => {
                return Err(Error::from(SymbolError::CircularEqv {
                    name: equate.name.clone(),
                })
                .at(equate.location.clone()))
            }
            Some(EquateState::Done) => {
                return Ok(i64::from(self.table.get(&equate.name).unwrap_or(0)))
            }
            None => {}
        }

        self.states
            .insert(equate.name.clone(), EquateState::Visiting);
        self.prefix_stack.push(equate.prefix.clone());
        let value = expr::evaluate(&equate.expr, self).map_err(|e| e.at(equate.location.clone()));
        self.prefix_stack.pop();
        let value = value?;

        self.states.insert(equate.name.clone(), EquateState::Done);
        self.table.undefined.remove(&equate.name);
        self.table.symbols.insert(equate.name.clone(), value as i32);
        Ok(value)
    }
}

impl<'a> SymbolResolver for EquateResolution<'a> {
    fn resolve(&mut self, name: &str) -> Result<i64> {
        let prefix = self.prefix_stack.last().cloned().unwrap_or_default();
        for candidate in candidates(&prefix, name) {
            if let Some(value) = self.table.get(&candidate) {
                return Ok(i64::from(value));
            }
            if let Some(&index) = self.table.equate_names.get(&candidate) {
                return self.resolve_index(index);
            }
        }
        Err(Error::from(SymbolError::Undefined {
            name: name.to_string(),
        }))
    }
}

pub struct Pass1 {
    pub table: SymbolTable,
    /// Native expansion of each AST node; empty for non-instructions.
    /// Pass 2 replays these verbatim, so both passes agree on sizes.
    pub expansions: Vec<Vec<Instruction>>,
    pub segment_lengths: [u32; 4],
}

fn label_names(args: &[Operand]) -> Vec<String> {
    args.iter()
        .filter_map(|arg| match arg {
            Operand::Label { name } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

pub fn run(
    ast: &[AstNode],
    table: &PseudoOpTable,
    options: &AssembleOptions,
    origins: &OriginMap,
) -> Result<Pass1> {
    let mut symbols = SymbolTable::new();
    let mut cursor = LayoutCursor::new();
    let mut modules: Vec<String> = Vec::new();
    let mut expansions: Vec<Vec<Instruction>> = Vec::with_capacity(ast.len());

    for (index, node) in ast.iter().enumerate() {
        let located = |e: Error| e.at(origins.get(node.line()));
        let mut expansion = Vec::new();

        match node {
            AstNode::Directive { name, args, .. } => match name.as_str() {
                ".text" => cursor.switch(mips::Segment::Text),
                ".data" => cursor.switch(mips::Segment::Data),
                ".ktext" => cursor.switch(mips::Segment::KText),
                ".kdata" => cursor.switch(mips::Segment::KData),
                ".org" => {
                    let target = layout::literal_argument(".org", args).map_err(located)?;
                    if target < 0 || target > i64::from(u32::max_value()) {
                        return Err(located(Error::from(SymbolError::InvalidSize {
                            name: ".org".to_string(),
                            detail: "address out of range".to_string(),
                        })));
                    }
                    cursor.org(target as u32).map_err(located)?;
                }
                ".align" => {
                    if cursor.segment.holds_code() {
                        return Err(located(Error::from(SymbolError::DirectiveWrongSegment {
                            name: name.clone(),
                            segment: cursor.segment.name(),
                        })));
                    }
                    let alignment = layout::alignment_argument(args).map_err(located)?;
                    cursor.align(alignment);
                }
                ".globl" => {
                    for label in label_names(args) {
                        symbols.mark_globl(&label);
                    }
                }
                ".extern" => {
                    for label in label_names(args) {
                        symbols.mark_extern(label).map_err(located)?;
                    }
                }
                ".eqv" => {
                    let name = match args.first() {
                        Some(Operand::Label { name }) => name.clone(),
                        _ => unreachable!(),
                    };
                    let expr = match args.get(1) {
                        Some(Operand::Expression { tree }) => tree.clone(),
                        _ => unreachable!(),
                    };
                    let qualified = qualify(&modules, &name);
                    symbols.define_equate(
                        qualified,
                        expr,
                        modules.clone(),
                        origins.get(node.line()),
                    )?;
                }
                ".module" => {
                    let name = match args.first() {
                        Some(Operand::Label { name }) => name.clone(),
                        _ => unreachable!(),
                    };
                    modules.push(name);
                }
                ".endmodule" => {
                    if modules.pop().is_none() {
                        return Err(located(Error::from(SymbolError::ModuleMismatch)));
                    }
                }
                ".set" => {}
                _ if layout::sized_data_directive(name) => {
                    if cursor.segment.holds_code() {
                        return Err(located(Error::from(SymbolError::DirectiveWrongSegment {
                            name: name.clone(),
                            segment: cursor.segment.name(),
                        })));
                    }
                    cursor.align(layout::natural_alignment(name));
                    let length = layout::data_directive_len(name, args).map_err(located)?;
                    cursor.advance(length);
                }
                _ => unreachable!("parser admitted directive {}", name),
            },
            AstNode::Label { name, segment, .. } => {
                if !segment.holds_code() {
                    cursor.align(layout::lookahead_alignment(ast, index));
                }
                let qualified = qualify(&modules, name);
                symbols
                    .define_label(qualified, cursor.address() as i32)
                    .map_err(located)?;
            }
            AstNode::Instruction(instruction) => {
                if !cursor.segment.holds_code() {
                    return Err(located(Error::from(SymbolError::InstructionWrongSegment {
                        segment: cursor.segment.name(),
                    })));
                }
                expansion =
                    crate::pseudo::expand_instruction(instruction, table, options, 0)
                        .map_err(located)?;
                cursor.advance(4 * expansion.len() as u32);
            }
        }

        expansions.push(expansion);
    }

    if !modules.is_empty() {
        return Err(Error::from(SymbolError::ModuleMismatch));
    }

    // Deferred equate resolution against the now-populated table.
    let equates = symbols.equates.clone();
    let mut resolution = EquateResolution {
        table: &mut symbols,
        equates,
        states: HashMap::new(),
        prefix_stack: Vec::new(),
    };
    for index in 0..resolution.equates.len() {
        resolution.resolve_index(index)?;
    }

    // A .globl for a symbol that never got defined stays visible as
    // undefined; only a reference makes that fatal.
    let missing: Vec<String> = symbols
        .globl
        .iter()
        .filter(|name| !symbols.symbols.contains_key(*name) && !symbols.externs.contains(*name))
        .cloned()
        .collect();
    for name in missing {
        symbols.undefined.insert(name);
    }

    let segment_lengths = [
        cursor.offset_of(mips::Segment::Text),
        cursor.offset_of(mips::Segment::Data),
        cursor.offset_of(mips::Segment::KText),
        cursor.offset_of(mips::Segment::KData),
    ];

    Ok(Pass1 {
        table: symbols,
        expansions,
        segment_lengths,
    })
}
