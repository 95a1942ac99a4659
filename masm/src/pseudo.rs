//! The pseudo-op catalog and expansion engine. The bundled tab-separated
//! catalog is authoritative; a user override (text or JSON) merges over it
//! by mnemonic. Templates are pre-compiled at load time into sequences of
//! literal text and substitution symbols, then instantiated per instruction
//! and re-lexed through the normal front end.

use crate::ast::{AstNode, Instruction, Operand};
use crate::encode::{self, fits_i16};
use crate::error::{
    EncodingError, Error, ErrorKind, Result, TableError,
};
use crate::expr::{ExprNode, ExprOp};
use crate::lexer::{self, Token, TokenKind, TokenValue};
use crate::parser;
use crate::AssembleOptions;
use lazy_static::lazy_static;
use log::debug;
use mips::{RegisterId, Segment};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Two layers of template expansion at most.
pub const MAX_EXPANSION_DEPTH: usize = 2;

/// One substitution symbol of the template mini-language.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum MacroSym {
    /// `DBNOP`: a `nop` when delayed branching is on, nothing otherwise.
    Dbnop,
    /// `BROFFnm`: branch offset `n` without delayed branching, `m` with.
    Broff { plain: u8, delayed: u8 },
    /// `RGn`: register token n.
    Rg(usize),
    /// `NRn`: the register one higher than token n.
    Nr(usize),
    /// `OPn`: raw text of token n.
    Op(usize),
    /// `IMM`: first numeric token after the mnemonic, else the last token.
    Imm,
    /// `LAB`/`LABn`: label text (last token by default).
    Lab(Option<usize>),
    /// `LLn[Pm][U]`: low 16 bits of the label at token n.
    Ll { index: usize, addend: i64, unsigned: bool },
    /// `LHn[Pm]`: high 16 bits with bit-15 carry adjustment.
    Lh { index: usize, addend: i64 },
    /// `VLn[Pm][U]` for numeric token values.
    Vl { index: usize, addend: i64, unsigned: bool },
    /// `VHn[Pm]`: numeric high 16 with carry adjustment.
    Vh { index: usize, addend: i64 },
    /// `VHLn[Pm]`: numeric high 16 without carry adjustment.
    Vhl { index: usize, addend: i64 },
    /// `LLP[Pm][U]`: low 16 of `label + immediate`.
    Llp { addend: i64, unsigned: bool },
    /// `LHPA[Pm]`: high 16 of `label + immediate`, carry-adjusted.
    Lhpa { addend: i64 },
    /// `LHPN`: high 16 of `label + immediate`, no carry.
    Lhpn,
    /// `LHL`: plain high 16 of the label at token 2.
    Lhl,
    /// `S32`: 32 minus the numeric value of the last token.
    S32,
}

#[derive(Clone, Debug)]
enum Fragment {
    Literal(String),
    Sub(MacroSym),
}

#[derive(Clone, Debug)]
struct Template {
    fragments: Vec<Fragment>,
}

#[derive(Clone, Debug)]
pub struct PseudoOpDefinition {
    pub mnemonic: String,
    pub example: String,
    pub description: String,
    example_tokens: Vec<Token>,
    default_group: Vec<Template>,
    compact_group: Vec<Template>,
}

#[derive(Clone, Debug, Default)]
pub struct PseudoOpTable {
    forms: HashMap<String, Vec<PseudoOpDefinition>>,
}

fn parse_indexed_suffix(rest: &str, allow_unsigned: bool) -> Option<(usize, i64, bool)> {
    let mut chars = rest.char_indices().peekable();
    let mut digits_end = 0;
    while let Some(&(i, c)) = chars.peek() {
        if c.is_ascii_digit() {
            digits_end = i + 1;
            chars.next();
        } else {
            break;
        }
    }
    if digits_end == 0 {
        return None;
    }
    let index: usize = rest[..digits_end].parse().ok()?;
    let (addend, tail) = parse_addend(&rest[digits_end..])?;
    let unsigned = match tail {
        "" => false,
        "U" if allow_unsigned => true,
        _ => return None,
    };
    Some((index, addend, unsigned))
}

/// Optional `Pm` decimal addend; returns the remaining tail.
fn parse_addend(rest: &str) -> Option<(i64, &str)> {
    if let Some(stripped) = rest.strip_prefix('P') {
        let digits_end = stripped
            .char_indices()
            .take_while(|(_, c)| c.is_ascii_digit())
            .map(|(i, _)| i + 1)
            .last()?;
        let addend: i64 = stripped[..digits_end].parse().ok()?;
        Some((addend, &stripped[digits_end..]))
    } else {
        Some((0, rest))
    }
}

fn parse_macro_sym(word: &str) -> Option<MacroSym> {
    match word {
        "DBNOP" => return Some(MacroSym::Dbnop),
        "IMM" => return Some(MacroSym::Imm),
        "S32" => return Some(MacroSym::S32),
        "LHL" => return Some(MacroSym::Lhl),
        "LHPN" => return Some(MacroSym::Lhpn),
        "LAB" => return Some(MacroSym::Lab(None)),
        _ => {}
    }
    if let Some(digits) = word.strip_prefix("BROFF") {
        let bytes = digits.as_bytes();
        if bytes.len() >= 2 && bytes.iter().all(u8::is_ascii_digit) {
            return Some(MacroSym::Broff {
                plain: bytes[bytes.len() - 2] - b'0',
                delayed: bytes[bytes.len() - 1] - b'0',
            });
        }
        return None;
    }
    if let Some(rest) = word.strip_prefix("LHPA") {
        let (addend, tail) = parse_addend(rest)?;
        if tail.is_empty() {
            return Some(MacroSym::Lhpa { addend });
        }
        return None;
    }
    if let Some(rest) = word.strip_prefix("LLP") {
        if !rest.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            let (addend, tail) = parse_addend(rest)?;
            let unsigned = match tail {
                "" => false,
                "U" => true,
                _ => return None,
            };
            return Some(MacroSym::Llp { addend, unsigned });
        }
    }
    if let Some(rest) = word.strip_prefix("LAB") {
        if let Ok(index) = rest.parse() {
            return Some(MacroSym::Lab(Some(index)));
        }
        return None;
    }
    if let Some(rest) = word.strip_prefix("RG") {
        return rest.parse().ok().map(MacroSym::Rg);
    }
    if let Some(rest) = word.strip_prefix("NR") {
        return rest.parse().ok().map(MacroSym::Nr);
    }
    if let Some(rest) = word.strip_prefix("OP") {
        return rest.parse().ok().map(MacroSym::Op);
    }
    if let Some(rest) = word.strip_prefix("VHL") {
        let (index, addend, _) = parse_indexed_suffix(rest, false)?;
        return Some(MacroSym::Vhl { index, addend });
    }
    if let Some(rest) = word.strip_prefix("VH") {
        let (index, addend, _) = parse_indexed_suffix(rest, false)?;
        return Some(MacroSym::Vh { index, addend });
    }
    if let Some(rest) = word.strip_prefix("VL") {
        let (index, addend, unsigned) = parse_indexed_suffix(rest, true)?;
        return Some(MacroSym::Vl {
            index,
            addend,
            unsigned,
        });
    }
    if let Some(rest) = word.strip_prefix("LL") {
        let (index, addend, unsigned) = parse_indexed_suffix(rest, true)?;
        return Some(MacroSym::Ll {
            index,
            addend,
            unsigned,
        });
    }
    if let Some(rest) = word.strip_prefix("LH") {
        let (index, addend, _) = parse_indexed_suffix(rest, false)?;
        return Some(MacroSym::Lh { index, addend });
    }
    None
}

fn symbol_boundary(previous: Option<char>) -> bool {
    match previous {
        Some(c) => !(c.is_ascii_alphanumeric() || c == '_'),
        None => true,
    }
}

/// Pre-compiles one template into literal/substitution fragments. Uppercase
/// words that are not mini-language symbols stay literal text.
fn compile_template(text: &str) -> std::result::Result<Template, String> {
    let mut fragments = Vec::new();
    let mut literal = String::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let previous = if i == 0 { None } else { Some(chars[i - 1]) };
        if c.is_ascii_uppercase() && symbol_boundary(previous) {
            let mut end = i + 1;
            while end < chars.len()
                && (chars[end].is_ascii_uppercase() || chars[end].is_ascii_digit())
            {
                end += 1;
            }
            let next = chars.get(end).copied();
            let clean_end = !matches!(next, Some(c) if c.is_ascii_lowercase() || c == '_');
            let word: String = chars[i..end].iter().collect();
            if clean_end {
                if word == "COMPACT" {
                    return Err("COMPACT must start a template".to_string());
                }
                if let Some(sym) = parse_macro_sym(&word) {
                    if !literal.is_empty() {
                        fragments.push(Fragment::Literal(literal.clone()));
                        literal.clear();
                    }
                    fragments.push(Fragment::Sub(sym));
                    i = end;
                    continue;
                }
                if word.starts_with("BROFF") {
                    return Err(format!("malformed branch offset symbol \"{}\"", word));
                }
            }
            literal.push_str(&word);
            i = end;
            continue;
        }
        literal.push(c);
        i += 1;
    }
    if !literal.is_empty() {
        fragments.push(Fragment::Literal(literal));
    }
    Ok(Template { fragments })
}

fn strip_commas(tokens: Vec<Token>) -> Vec<Token> {
    tokens
        .into_iter()
        .filter(|t| t.kind != TokenKind::Comma)
        .collect()
}

fn build_definition(
    example: &str,
    templates: &[&str],
    description: &str,
) -> std::result::Result<PseudoOpDefinition, String> {
    let lexed =
        lexer::lex_line(example, 0).map_err(|e| format!("example does not lex: {}", e))?;
    let example_tokens = strip_commas(lexed.tokens);
    let mnemonic = match example_tokens.first() {
        Some(token) if token.kind == TokenKind::Identifier => token.text.to_lowercase(),
        _ => return Err("example must start with a mnemonic".to_string()),
    };

    let mut default_group = Vec::new();
    let mut compact_group = Vec::new();
    let mut compact = false;
    for raw in templates {
        let mut text = raw.trim();
        if text.is_empty() {
            continue;
        }
        if let Some(rest) = text.strip_prefix("COMPACT") {
            compact = true;
            text = rest.trim();
            if text.is_empty() {
                continue;
            }
        }
        let template = compile_template(text)?;
        if compact {
            compact_group.push(template);
        } else {
            default_group.push(template);
        }
    }
    if default_group.is_empty() {
        return Err("at least one expansion template is required".to_string());
    }

    Ok(PseudoOpDefinition {
        mnemonic,
        example: example.to_string(),
        description: description.to_string(),
        example_tokens,
        default_group,
        compact_group,
    })
}

impl PseudoOpTable {
    pub fn new() -> PseudoOpTable {
        PseudoOpTable::default()
    }

    fn insert(&mut self, definition: PseudoOpDefinition) {
        self.forms
            .entry(definition.mnemonic.clone())
            .or_insert_with(Vec::new)
            .push(definition);
    }

    pub fn contains(&self, mnemonic: &str) -> bool {
        self.forms.contains_key(mnemonic)
    }

    pub fn definitions(&self, mnemonic: &str) -> &[PseudoOpDefinition] {
        self.forms.get(mnemonic).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.forms.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.forms.is_empty()
    }

    /// Parses the tab-separated catalog format. Validation problems are
    /// collected per line and reported together.
    pub fn parse_text(source: &str) -> Result<PseudoOpTable> {
        let mut table = PseudoOpTable::new();
        let mut errors = Vec::new();

        for (index, raw) in source.lines().enumerate() {
            let line = index + 1;
            if raw.trim().is_empty() || raw.starts_with('#') {
                continue;
            }
            if raw.starts_with(' ') || raw.starts_with('\t') {
                errors.push(TableError {
                    line,
                    message: "continuation lines are not supported".to_string(),
                });
                continue;
            }

            let mut fields: Vec<&str> = raw.split('\t').map(str::trim).collect();
            let description = match fields.last().copied() {
                Some(last) if last.starts_with('#') => {
                    fields.pop();
                    last[1..].trim().to_string()
                }
                _ => String::new(),
            };
            if fields.len() < 2 {
                errors.push(TableError {
                    line,
                    message: "expected an example and at least one template".to_string(),
                });
                continue;
            }

            match build_definition(fields[0], &fields[1..], &description) {
                Ok(definition) => table.insert(definition),
                Err(message) => errors.push(TableError { line, message }),
            }
        }

        if errors.is_empty() {
            debug!("loaded pseudo-op catalog with {} forms", table.len());
            Ok(table)
        } else {
            Err(Error::new(ErrorKind::Table(errors)))
        }
    }

    /// Parses the JSON override form: either an object keyed by mnemonic or
    /// a flat array of forms.
    pub fn parse_json(source: &str) -> Result<PseudoOpTable> {
        use serde::Deserialize;

        #[derive(Deserialize)]
        struct JsonForm {
            example: String,
            templates: Vec<String>,
            #[serde(default)]
            description: Option<String>,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum JsonForms {
            One(JsonForm),
            Many(Vec<JsonForm>),
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum JsonCatalog {
            Map(HashMap<String, JsonForms>),
            List(Vec<JsonForm>),
        }

        let catalog: JsonCatalog = serde_json::from_str(source).map_err(|err| {
            Error::new(ErrorKind::Table(vec![TableError {
                line: err.line(),
                message: err.to_string(),
            }]))
        })?;

        let forms: Vec<JsonForm> = match catalog {
            JsonCatalog::List(list) => list,
            JsonCatalog::Map(map) => {
                let mut list = Vec::new();
                for (_, value) in map {
                    match value {
                        JsonForms::One(form) => list.push(form),
                        JsonForms::Many(mut many) => list.append(&mut many),
                    }
                }
                list
            }
        };

        let mut table = PseudoOpTable::new();
        let mut errors = Vec::new();
        for (index, form) in forms.iter().enumerate() {
            let templates: Vec<&str> = form.templates.iter().map(String::as_str).collect();
            match build_definition(
                &form.example,
                &templates,
                form.description.as_deref().unwrap_or(""),
            ) {
                Ok(definition) => table.insert(definition),
                Err(message) => errors.push(TableError {
                    line: index + 1,
                    message,
                }),
            }
        }

        if errors.is_empty() {
            Ok(table)
        } else {
            Err(Error::new(ErrorKind::Table(errors)))
        }
    }

    /// The catalog shipped with the assembler.
    pub fn bundled() -> PseudoOpTable {
        PseudoOpTable::parse_text(include_str!("pseudo_ops.txt"))
            .expect("bundled pseudo-op catalog is valid")
    }

    /// Merges a user override; user entries replace bundled entries with the
    /// same mnemonic wholesale.
    pub fn merge_overrides(&mut self, user: PseudoOpTable) {
        for (mnemonic, definitions) in user.forms {
            self.forms.insert(mnemonic, definitions);
        }
    }
}

lazy_static! {
    static ref GLOBAL_TABLE: RwLock<Arc<PseudoOpTable>> =
        RwLock::new(Arc::new(PseudoOpTable::bundled()));
}

/// The process-wide table used when options carry no explicit one.
pub fn global() -> Arc<PseudoOpTable> {
    GLOBAL_TABLE.read().unwrap().clone()
}

/// Replaces the process-wide table atomically.
pub fn install(table: PseudoOpTable) {
    *GLOBAL_TABLE.write().unwrap() = Arc::new(table);
}

/// Restores the bundled catalog.
pub fn reload() {
    install(PseudoOpTable::bundled());
}

impl PseudoOpDefinition {
    /// Positional token match against the example pattern.
    fn matches(&self, raw: &[Token]) -> bool {
        if self.example_tokens.len() != raw.len() {
            return false;
        }
        for (example, source) in self.example_tokens.iter().zip(raw).skip(1) {
            let ok = match example.kind {
                TokenKind::Register => source.kind == TokenKind::Register,
                TokenKind::Identifier if example.text.eq_ignore_ascii_case("label") => {
                    source.kind != TokenKind::Number && source.kind != TokenKind::Register
                }
                TokenKind::Number => match (example.int_value(), source.int_value()) {
                    (Some(pattern), Some(value)) => match pattern.abs() {
                        10 => (0..=31).contains(&value),
                        100 => fits_i16(value),
                        _ => true,
                    },
                    (Some(_), None) => false,
                    _ => false,
                },
                _ => {
                    example.kind == source.kind
                        && example.text.eq_ignore_ascii_case(&source.text)
                }
            };
            if !ok {
                return false;
            }
        }
        true
    }
}

struct Substitution<'a> {
    tokens: &'a [Token],
    mnemonic: &'a str,
    delayed_branching: bool,
}

impl<'a> Substitution<'a> {
    fn mismatch(&self) -> Error {
        Error::from(EncodingError::OperandMismatch {
            mnemonic: self.mnemonic.to_string(),
        })
    }

    fn token(&self, index: usize) -> Result<&Token> {
        self.tokens.get(index).ok_or_else(|| self.mismatch())
    }

    fn number(&self, index: usize) -> Result<i64> {
        self.token(index)?
            .int_value()
            .ok_or_else(|| self.mismatch())
    }

    fn last(&self) -> Result<&Token> {
        self.tokens.last().ok_or_else(|| self.mismatch())
    }

    /// The label token of a `label + offset` operand, with the optional
    /// combined immediate rendered alongside it.
    fn label_plus_immediate(&self) -> Result<String> {
        let position = self.tokens[1..]
            .iter()
            .position(|t| t.kind == TokenKind::Identifier)
            .map(|p| p + 1)
            .ok_or_else(|| self.mismatch())?;
        let label = &self.tokens[position].text;
        match (
            self.tokens.get(position + 1).map(|t| t.kind),
            self.tokens.get(position + 2),
        ) {
            (Some(TokenKind::Plus), Some(number)) if number.kind == TokenKind::Number => {
                Ok(format!("({} + {})", label, number.text))
            }
            (Some(TokenKind::Minus), Some(number)) if number.kind == TokenKind::Number => {
                Ok(format!("({} - {})", label, number.text))
            }
            _ => Ok(format!("({})", label)),
        }
    }

    fn with_addend(base: &str, addend: i64) -> String {
        if addend == 0 {
            base.to_string()
        } else {
            format!("({} + {})", base, addend)
        }
    }

    fn low16(value_text: &str, unsigned: bool) -> String {
        if unsigned {
            format!("({} & 65535)", value_text)
        } else {
            format!("((({}) << 16) >> 16)", value_text)
        }
    }

    fn high16_carry(value_text: &str) -> String {
        format!(
            "(((({}) >> 16) + ((({}) >> 15) & 1)) & 65535)",
            value_text, value_text
        )
    }

    fn high16_plain(value_text: &str) -> String {
        format!("((({}) >> 16) & 65535)", value_text)
    }

    fn numeric_parts(&self, index: usize, addend: i64) -> Result<u32> {
        let value = self.number(index)?.wrapping_add(addend);
        Ok(value as u32)
    }

    fn apply(&self, sym: MacroSym) -> Result<String> {
        Ok(match sym {
            MacroSym::Dbnop => {
                if self.delayed_branching {
                    "nop".to_string()
                } else {
                    String::new()
                }
            }
            MacroSym::Broff { plain, delayed } => {
                let offset = if self.delayed_branching { delayed } else { plain };
                offset.to_string()
            }
            MacroSym::Rg(index) => {
                let token = self.token(index)?;
                if token.kind != TokenKind::Register {
                    return Err(self.mismatch());
                }
                token.text.clone()
            }
            MacroSym::Nr(index) => {
                let token = self.token(index)?;
                let id = RegisterId::parse(&token.text).map_err(|_| self.mismatch())?;
                let next = id.index() + 1;
                if next >= mips::constants::REGISTER_COUNT {
                    return Err(Error::from(EncodingError::RegisterOutOfRange {
                        text: token.text.clone(),
                    }));
                }
                format!("${}", next)
            }
            MacroSym::Op(index) => self.token(index)?.text.clone(),
            MacroSym::Imm => {
                let number = self
                    .tokens
                    .iter()
                    .skip(1)
                    .find(|t| t.kind == TokenKind::Number);
                match number {
                    Some(token) => token.text.clone(),
                    None => self.last()?.text.clone(),
                }
            }
            MacroSym::Lab(index) => match index {
                Some(index) => self.token(index)?.text.clone(),
                None => self.last()?.text.clone(),
            },
            MacroSym::Ll {
                index,
                addend,
                unsigned,
            } => {
                let base = Self::with_addend(&self.token(index)?.text, addend);
                Self::low16(&base, unsigned)
            }
            MacroSym::Lh { index, addend } => {
                let base = Self::with_addend(&self.token(index)?.text, addend);
                Self::high16_carry(&base)
            }
            MacroSym::Vl {
                index,
                addend,
                unsigned,
            } => {
                let value = self.numeric_parts(index, addend)?;
                if unsigned {
                    (value & 0xffff).to_string()
                } else {
                    i64::from((value & 0xffff) as i16).to_string()
                }
            }
            MacroSym::Vh { index, addend } => {
                let value = self.numeric_parts(index, addend)?;
                (((value >> 16) + ((value >> 15) & 1)) & 0xffff).to_string()
            }
            MacroSym::Vhl { index, addend } => {
                let value = self.numeric_parts(index, addend)?;
                ((value >> 16) & 0xffff).to_string()
            }
            MacroSym::Llp { addend, unsigned } => {
                let base = Self::with_addend(&self.label_plus_immediate()?, addend);
                Self::low16(&base, unsigned)
            }
            MacroSym::Lhpa { addend } => {
                let base = Self::with_addend(&self.label_plus_immediate()?, addend);
                Self::high16_carry(&base)
            }
            MacroSym::Lhpn => Self::high16_plain(&self.label_plus_immediate()?),
            MacroSym::Lhl => Self::high16_plain(&self.token(2)?.text),
            MacroSym::S32 => {
                let value = self
                    .last()?
                    .int_value()
                    .ok_or_else(|| self.mismatch())?;
                (32 - value).to_string()
            }
        })
    }
}

impl Template {
    /// Renders the template for one source instruction. `None` means the
    /// template contributes no line (a `DBNOP` with delayed branching off).
    fn instantiate(&self, substitution: &Substitution) -> Result<Option<String>> {
        let dbnop_only = self.fragments.iter().all(|fragment| match fragment {
            Fragment::Sub(MacroSym::Dbnop) => true,
            Fragment::Literal(text) => text.trim().is_empty(),
            _ => false,
        }) && self
            .fragments
            .iter()
            .any(|f| matches!(f, Fragment::Sub(MacroSym::Dbnop)));
        if dbnop_only && !substitution.delayed_branching {
            return Ok(None);
        }

        let mut text = String::new();
        for fragment in &self.fragments {
            match fragment {
                Fragment::Literal(literal) => text.push_str(literal),
                Fragment::Sub(sym) => text.push_str(&substitution.apply(*sym)?),
            }
        }
        Ok(Some(text))
    }
}

fn register_operand(id: RegisterId) -> Operand {
    Operand::Register {
        id,
        name: format!("${}", id.index()),
    }
}

fn synthetic(
    mnemonic: &str,
    operands: Vec<Operand>,
    segment: Segment,
    line: u32,
) -> Instruction {
    Instruction {
        mnemonic: mnemonic.to_string(),
        operands,
        segment,
        line,
        raw_tokens: Vec::new(),
    }
}

fn low16_tree(tree: ExprNode) -> ExprNode {
    ExprNode::Binary(
        ExprOp::And,
        Box::new(tree),
        Box::new(ExprNode::Number(0xffff)),
    )
}

fn high16_tree(tree: ExprNode) -> ExprNode {
    ExprNode::Binary(
        ExprOp::And,
        Box::new(ExprNode::Binary(
            ExprOp::RShift,
            Box::new(tree),
            Box::new(ExprNode::Number(16)),
        )),
        Box::new(ExprNode::Number(0xffff)),
    )
}

/// Builds the one- or two-instruction load of a value into `target`.
fn load_immediate(
    target: RegisterId,
    value_operand: &Operand,
    segment: Segment,
    line: u32,
) -> Result<Vec<Instruction>> {
    let target_op = register_operand(target);
    match value_operand {
        Operand::Immediate { value } if fits_i16(*value) => Ok(vec![synthetic(
            "addi",
            vec![
                target_op,
                register_operand(RegisterId::ZERO),
                Operand::Immediate { value: *value },
            ],
            segment,
            line,
        )]),
        Operand::Immediate { value } => {
            let bits = *value as u32;
            Ok(vec![
                synthetic(
                    "lui",
                    vec![
                        target_op.clone(),
                        Operand::Immediate {
                            value: i64::from(bits >> 16),
                        },
                    ],
                    segment,
                    line,
                ),
                synthetic(
                    "ori",
                    vec![
                        target_op.clone(),
                        target_op,
                        Operand::Immediate {
                            value: i64::from(bits & 0xffff),
                        },
                    ],
                    segment,
                    line,
                ),
            ])
        }
        Operand::Label { name } => {
            let tree = ExprNode::Symbol(name.clone());
            Ok(load_symbolic(target, tree, segment, line))
        }
        Operand::Expression { tree } => Ok(load_symbolic(target, tree.clone(), segment, line)),
        _ => Err(Error::from(EncodingError::OperandMismatch {
            mnemonic: "li".to_string(),
        })),
    }
}

/// Label and expression forms always take the two-instruction path.
fn load_symbolic(
    target: RegisterId,
    tree: ExprNode,
    segment: Segment,
    line: u32,
) -> Vec<Instruction> {
    let target_op = register_operand(target);
    vec![
        synthetic(
            "lui",
            vec![
                target_op.clone(),
                Operand::Expression {
                    tree: high16_tree(tree.clone()),
                },
            ],
            segment,
            line,
        ),
        synthetic(
            "ori",
            vec![
                target_op.clone(),
                target_op,
                Operand::Expression {
                    tree: low16_tree(tree),
                },
            ],
            segment,
            line,
        ),
    ]
}

/// `li`, `move`, `muli` and `nop` are expanded inline rather than through
/// the catalog.
fn expand_hard_coded(instruction: &Instruction) -> Result<Option<Vec<Instruction>>> {
    let segment = instruction.segment;
    let line = instruction.line;
    let mismatch = || {
        Error::from(EncodingError::OperandMismatch {
            mnemonic: instruction.mnemonic.clone(),
        })
    };

    match instruction.mnemonic.as_str() {
        "nop" => {
            if !instruction.operands.is_empty() {
                return Err(mismatch());
            }
            Ok(Some(vec![synthetic(
                "sll",
                vec![
                    register_operand(RegisterId::ZERO),
                    register_operand(RegisterId::ZERO),
                    Operand::Immediate { value: 0 },
                ],
                segment,
                line,
            )]))
        }
        "move" => match instruction.operands.as_slice() {
            [Operand::Register { id: rd, .. }, Operand::Register { id: rs, .. }] => {
                Ok(Some(vec![synthetic(
                    "addu",
                    vec![
                        register_operand(*rd),
                        register_operand(*rs),
                        register_operand(RegisterId::ZERO),
                    ],
                    segment,
                    line,
                )]))
            }
            _ => Err(mismatch()),
        },
        "li" => match instruction.operands.as_slice() {
            [Operand::Register { id: rd, .. }, value] => {
                Ok(Some(load_immediate(*rd, value, segment, line)?))
            }
            _ => Err(mismatch()),
        },
        "muli" => match instruction.operands.as_slice() {
            [Operand::Register { id: rd, .. }, Operand::Register { id: rs, .. }, value] => {
                let mut expansion = load_immediate(RegisterId::AT, value, segment, line)?;
                expansion.push(synthetic(
                    "mul",
                    vec![
                        register_operand(*rd),
                        register_operand(*rs),
                        register_operand(RegisterId::AT),
                    ],
                    segment,
                    line,
                ));
                Ok(Some(expansion))
            }
            _ => Err(mismatch()),
        },
        _ => Ok(None),
    }
}

/// Every numeric source operand fits a signed 16-bit field.
fn compact_eligible(raw: &[Token]) -> bool {
    raw.iter().skip(1).all(|token| match token.value {
        TokenValue::Int(value) => fits_i16(value),
        _ => true,
    })
}

/// Expands one instruction into native instructions. Native instructions
/// with fitting operands pass through unchanged; everything else goes via
/// the hard-coded pseudos or the catalog, recursively up to
/// [`MAX_EXPANSION_DEPTH`] layers.
pub fn expand_instruction(
    instruction: &Instruction,
    table: &PseudoOpTable,
    options: &AssembleOptions,
    depth: usize,
) -> Result<Vec<Instruction>> {
    if let Some(kind) = encode::native_kind(&instruction.mnemonic) {
        if encode::operands_fit_native(&kind, &instruction.operands) {
            return Ok(vec![instruction.clone()]);
        }
    }

    if !options.enable_pseudo_instructions {
        return Err(Error::new(ErrorKind::PseudoOpDisabled {
            mnemonic: instruction.mnemonic.clone(),
        }));
    }

    if let Some(expansion) = expand_hard_coded(instruction)? {
        return Ok(expansion);
    }

    if depth >= MAX_EXPANSION_DEPTH {
        return Err(Error::from(EncodingError::ExpansionTooDeep {
            mnemonic: instruction.mnemonic.clone(),
        }));
    }

    for definition in table.definitions(&instruction.mnemonic) {
        if !definition.matches(&instruction.raw_tokens) {
            continue;
        }
        debug!(
            "expanding \"{}\" via form \"{}\"",
            instruction.mnemonic, definition.example
        );

        let group = if !definition.compact_group.is_empty()
            && compact_eligible(&instruction.raw_tokens)
        {
            &definition.compact_group
        } else {
            &definition.default_group
        };

        let substitution = Substitution {
            tokens: &instruction.raw_tokens,
            mnemonic: &instruction.mnemonic,
            delayed_branching: options.delayed_branching_enabled,
        };

        let mut result = Vec::new();
        for template in group {
            let text = match template.instantiate(&substitution)? {
                Some(text) => text,
                None => continue,
            };
            let lexed = lexer::lex_line(&text, instruction.line)?;
            let nodes = parser::parse_snippet(&lexed, instruction.segment)?;
            for node in nodes {
                match node {
                    AstNode::Instruction(inner) => {
                        result.extend(expand_instruction(&inner, table, options, depth + 1)?)
                    }
                    _ => {
                        return Err(Error::from(EncodingError::OperandMismatch {
                            mnemonic: instruction.mnemonic.clone(),
                        }))
                    }
                }
            }
        }
        return Ok(result);
    }

    if encode::native_kind(&instruction.mnemonic).is_some() {
        return Ok(vec![instruction.clone()]);
    }

    Err(Error::from(EncodingError::UnknownInstruction {
        mnemonic: instruction.mnemonic.clone(),
    }))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parser::parse_snippet;

    fn raw_tokens(source: &str) -> Vec<Token> {
        strip_commas(lexer::lex_line(source, 1).unwrap().tokens)
    }

    fn substitution<'a>(tokens: &'a [Token], delayed: bool) -> Substitution<'a> {
        Substitution {
            tokens,
            mnemonic: "test",
            delayed_branching: delayed,
        }
    }

    fn apply(source: &str, word: &str) -> String {
        let tokens = raw_tokens(source);
        let sub = substitution(&tokens, true);
        sub.apply(parse_macro_sym(word).unwrap()).unwrap()
    }

    #[test]
    fn symbol_spellings() {
        assert_eq!(parse_macro_sym("DBNOP"), Some(MacroSym::Dbnop));
        assert_eq!(
            parse_macro_sym("BROFF12"),
            Some(MacroSym::Broff {
                plain: 1,
                delayed: 2
            })
        );
        assert_eq!(parse_macro_sym("RG1"), Some(MacroSym::Rg(1)));
        assert_eq!(parse_macro_sym("NR2"), Some(MacroSym::Nr(2)));
        assert_eq!(parse_macro_sym("OP3"), Some(MacroSym::Op(3)));
        assert_eq!(parse_macro_sym("LAB"), Some(MacroSym::Lab(None)));
        assert_eq!(parse_macro_sym("LAB3"), Some(MacroSym::Lab(Some(3))));
        assert_eq!(
            parse_macro_sym("LL2P4U"),
            Some(MacroSym::Ll {
                index: 2,
                addend: 4,
                unsigned: true
            })
        );
        assert_eq!(
            parse_macro_sym("LH3P8"),
            Some(MacroSym::Lh { index: 3, addend: 8 })
        );
        assert_eq!(
            parse_macro_sym("VHL2"),
            Some(MacroSym::Vhl { index: 2, addend: 0 })
        );
        assert_eq!(
            parse_macro_sym("LLPU"),
            Some(MacroSym::Llp {
                addend: 0,
                unsigned: true
            })
        );
        assert_eq!(parse_macro_sym("LHPN"), Some(MacroSym::Lhpn));
        assert_eq!(parse_macro_sym("LHPA"), Some(MacroSym::Lhpa { addend: 0 }));
        assert_eq!(parse_macro_sym("LHL"), Some(MacroSym::Lhl));
        assert_eq!(parse_macro_sym("S32"), Some(MacroSym::S32));
        assert_eq!(parse_macro_sym("LABEL"), None);
        assert_eq!(parse_macro_sym("FOO"), None);
    }

    #[test]
    fn numeric_substitutions() {
        // 0x12348765: low half sign-extends, high half carries.
        assert_eq!(apply("la $t0, 0x12348765", "VL2"), "-30875");
        assert_eq!(apply("la $t0, 0x12348765", "VL2U"), "34661");
        assert_eq!(apply("la $t0, 0x12348765", "VH2"), "4661");
        assert_eq!(apply("la $t0, 0x12348765", "VHL2"), "4660");
        assert_eq!(apply("la $t0, 100", "VL2P4"), "104");
        assert_eq!(apply("sll $t0, $t0, 10", "S32"), "22");
    }

    #[test]
    fn register_substitutions() {
        assert_eq!(apply("lw $t1, label($t2)", "RG1"), "$t1");
        assert_eq!(apply("lw $t1, label($t2)", "RG4"), "$t2");
        assert_eq!(apply("lw $t1, label($t2)", "NR1"), "$10");
        assert_eq!(apply("lw $t1, label($t2)", "OP2"), "label");
        assert_eq!(apply("lw $t1, label($t2)", "LAB2"), "label");
    }

    #[test]
    fn immediate_and_branch_substitutions() {
        assert_eq!(apply("addi $t0, $t1, 77", "IMM"), "77");
        assert_eq!(apply("b target", "LAB"), "target");

        let tokens = raw_tokens("seq $t0, $t1, $t2");
        let delayed = substitution(&tokens, true);
        let plain = substitution(&tokens, false);
        let sym = parse_macro_sym("BROFF24").unwrap();
        assert_eq!(delayed.apply(sym).unwrap(), "4");
        assert_eq!(plain.apply(sym).unwrap(), "2");
        assert_eq!(delayed.apply(MacroSym::Dbnop).unwrap(), "nop");
        assert_eq!(plain.apply(MacroSym::Dbnop).unwrap(), "");
    }

    #[test]
    fn label_substitutions_build_expressions() {
        assert_eq!(
            apply("lw $t1, buf", "LL2"),
            "(((buf) << 16) >> 16)"
        );
        assert_eq!(apply("la $t1, buf", "LL2U"), "(buf & 65535)");
        assert_eq!(apply("la $t1, buf", "LHL"), "(((buf) >> 16) & 65535)");
        assert_eq!(
            apply("lw $t1, buf", "LH2"),
            "((((buf) >> 16) + (((buf) >> 15) & 1)) & 65535)"
        );
        assert_eq!(
            apply("lw $t1, buf+100000", "LLP"),
            "((((buf + 100000)) << 16) >> 16)"
        );
        assert_eq!(
            apply("lw $t1, buf-8", "LHPN"),
            "((((buf - 8)) >> 16) & 65535)"
        );
    }

    #[test]
    fn template_compilation_keeps_literals() {
        let template = compile_template("lw RG1, LL2($1)").unwrap();
        let literals: Vec<&str> = template
            .fragments
            .iter()
            .filter_map(|f| match f {
                Fragment::Literal(text) => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(literals, vec!["lw ", ", ", "($1)"]);
    }

    #[test]
    fn catalog_rejects_bad_lines() {
        let source = "only_one_field\n\tleading tab\nla $t1,label\tori RG1, $0, LL2U";
        let err = PseudoOpTable::parse_text(source).unwrap_err();
        match err.kind {
            ErrorKind::Table(errors) => {
                assert_eq!(errors.len(), 2);
                assert_eq!(errors[0].line, 1);
                assert_eq!(errors[1].line, 2);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn bundled_catalog_loads() {
        let table = PseudoOpTable::bundled();
        assert!(table.contains("la"));
        assert!(table.contains("blt"));
        assert!(table.contains("seq"));
        assert!(!table.is_empty());
    }

    #[test]
    fn json_catalog_forms() {
        let object = r#"{ "zmv": { "example": "zmv $t1,$t2",
                                   "templates": ["addu RG1, RG2, $0"],
                                   "description": "copy" } }"#;
        let table = PseudoOpTable::parse_json(object).unwrap();
        assert!(table.contains("zmv"));

        let array = r#"[ { "example": "zclr $t1", "templates": ["ori RG1, $0, 0"] } ]"#;
        let table = PseudoOpTable::parse_json(array).unwrap();
        assert!(table.contains("zclr"));
    }

    #[test]
    fn overrides_replace_by_mnemonic() {
        let mut table = PseudoOpTable::bundled();
        let before = table.definitions("la").len();
        assert!(before > 1);
        let user =
            PseudoOpTable::parse_text("la $t1,label\tori RG1, $0, LL2U").unwrap();
        table.merge_overrides(user);
        assert_eq!(table.definitions("la").len(), 1);
        assert!(table.contains("seq"));
    }

    fn first_instruction(source: &str) -> Instruction {
        let lexed = lexer::lex_line(source, 1).unwrap();
        match parse_snippet(&lexed, Segment::Text).unwrap().remove(0) {
            AstNode::Instruction(instruction) => instruction,
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn nop_expands_to_sll() {
        let table = PseudoOpTable::bundled();
        let options = crate::AssembleOptions::default();
        let expansion =
            expand_instruction(&first_instruction("nop"), &table, &options, 0).unwrap();
        assert_eq!(expansion.len(), 1);
        assert_eq!(expansion[0].mnemonic, "sll");
    }

    #[test]
    fn native_instructions_pass_through() {
        let table = PseudoOpTable::bundled();
        let options = crate::AssembleOptions::default();
        let instruction = first_instruction("addu $t0, $t1, $t2");
        let expansion = expand_instruction(&instruction, &table, &options, 0).unwrap();
        assert_eq!(expansion, vec![instruction]);
    }

    #[test]
    fn seq_emits_delay_slots_only_when_enabled() {
        let table = PseudoOpTable::bundled();
        let instruction = first_instruction("seq $t0, $t1, $t2");

        let delayed = crate::AssembleOptions::default();
        let expansion = expand_instruction(&instruction, &table, &delayed, 0).unwrap();
        assert_eq!(expansion.len(), 6);

        let plain = crate::AssembleOptions {
            delayed_branching_enabled: false,
            ..crate::AssembleOptions::default()
        };
        let expansion = expand_instruction(&instruction, &table, &plain, 0).unwrap();
        assert_eq!(expansion.len(), 4);
    }

    #[test]
    fn compact_group_is_used_when_operands_fit() {
        let table = PseudoOpTable::bundled();
        let options = crate::AssembleOptions::default();

        let small = expand_instruction(
            &first_instruction("add $t0, $t1, 50"),
            &table,
            &options,
            0,
        )
        .unwrap();
        assert_eq!(small.len(), 1);
        assert_eq!(small[0].mnemonic, "addi");

        let large = expand_instruction(
            &first_instruction("add $t0, $t1, 100000"),
            &table,
            &options,
            0,
        )
        .unwrap();
        assert_eq!(
            large.iter().map(|i| i.mnemonic.as_str()).collect::<Vec<_>>(),
            vec!["lui", "ori", "add"]
        );
    }

    #[test]
    fn pseudo_disabled_blocks_expansion() {
        let table = PseudoOpTable::bundled();
        let options = crate::AssembleOptions {
            enable_pseudo_instructions: false,
            ..crate::AssembleOptions::default()
        };
        let err = expand_instruction(&first_instruction("nop"), &table, &options, 0)
            .unwrap_err();
        match err.kind {
            ErrorKind::PseudoOpDisabled { ref mnemonic } => assert_eq!(mnemonic, "nop"),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
