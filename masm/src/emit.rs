//! Pass 2: byte and word emission. Re-walks the AST in Pass 1 order,
//! replaying the cached pseudo-op expansions and driving the same layout
//! cursor, so every offset lands exactly where Pass 1 said it would.

use crate::ast::{AstNode, Operand};
use crate::encode::{self, EncodeContext, TableResolver};
use crate::error::{Error, Result, SymbolError};
use crate::expr::{self, ExprNode};
use crate::include::OriginMap;
use crate::layout::{self, LayoutCursor};
use crate::symbols::{Pass1, SymbolTable};
use byteorder::ByteOrder;
use matches::debug_assert_matches;
use mimage::{BinaryImage, RelocationRecord, RelocationType, SourceMapEntry, SymbolEntry};
use mips::Segment;
use util::Endian;

struct Output {
    text: Vec<u32>,
    ktext: Vec<u32>,
    data: Vec<u8>,
    kdata: Vec<u8>,
    data_words: Vec<i32>,
    kdata_words: Vec<i32>,
    relocations: Vec<RelocationRecord>,
    source_map: Vec<SourceMapEntry>,
}

impl Output {
    fn bytes_mut(&mut self, segment: Segment) -> &mut Vec<u8> {
        match segment {
            Segment::Data => &mut self.data,
            Segment::KData => &mut self.kdata,
            _ => unreachable!("byte emission into a code segment"),
        }
    }

    fn words_mut(&mut self, segment: Segment) -> &mut Vec<u32> {
        match segment {
            Segment::Text => &mut self.text,
            Segment::KText => &mut self.ktext,
            _ => unreachable!("word emission into a data segment"),
        }
    }

    fn data_words_mut(&mut self, segment: Segment) -> &mut Vec<i32> {
        match segment {
            Segment::Data => &mut self.data_words,
            Segment::KData => &mut self.kdata_words,
            _ => unreachable!(),
        }
    }

    fn pad(&mut self, segment: Segment, padding: u32) {
        if padding == 0 {
            return;
        }
        if segment.holds_code() {
            debug_assert_eq!(padding % 4, 0);
            let words = self.words_mut(segment);
            words.resize(words.len() + padding as usize / 4, 0);
        } else {
            let bytes = self.bytes_mut(segment);
            bytes.resize(bytes.len() + padding as usize, 0);
        }
    }

    fn push_int(&mut self, segment: Segment, value: i64, size: usize) {
        let bytes = self.bytes_mut(segment);
        let start = bytes.len();
        bytes.resize(start + size, 0);
        Endian::write_int(&mut bytes[start..], value, size);
    }
}

struct ResolvedData {
    value: i64,
    symbol: Option<(String, i64)>,
}

fn resolve_data_value(
    operand: &Operand,
    table: &SymbolTable,
    modules: &[String],
) -> Result<ResolvedData> {
    let mut resolver = TableResolver { table, modules };
    match operand {
        Operand::Immediate { value } => Ok(ResolvedData {
            value: *value,
            symbol: None,
        }),
        Operand::Label { name } => {
            let value = expr::evaluate(&ExprNode::Symbol(name.clone()), &mut resolver)?;
            Ok(ResolvedData {
                value,
                symbol: Some((name.clone(), value)),
            })
        }
        Operand::Expression { tree } => {
            let value = expr::evaluate(tree, &mut resolver)?;
            let symbol = match tree.first_symbol() {
                Some(name) => {
                    let symbol_value = expr::evaluate(
                        &ExprNode::Symbol(name.to_string()),
                        &mut resolver,
                    )?;
                    Some((name.to_string(), symbol_value))
                }
                None => None,
            };
            Ok(ResolvedData { value, symbol })
        }
        _ => Err(Error::from(SymbolError::InvalidSize {
            name: "data directive".to_string(),
            detail: "unsupported argument".to_string(),
        })),
    }
}

fn float_value(operand: &Operand) -> f64 {
    match operand {
        Operand::Float { value } => *value,
        Operand::Immediate { value } => *value as f64,
        _ => 0.0,
    }
}

pub fn run(ast: &[AstNode], pass1: &Pass1, origins: &OriginMap) -> Result<BinaryImage> {
    let table = &pass1.table;
    let mut cursor = LayoutCursor::new();
    let mut modules: Vec<String> = Vec::new();
    let mut out = Output {
        text: Vec::new(),
        ktext: Vec::new(),
        data: Vec::new(),
        kdata: Vec::new(),
        data_words: Vec::new(),
        kdata_words: Vec::new(),
        relocations: Vec::new(),
        source_map: Vec::new(),
    };

    for (index, node) in ast.iter().enumerate() {
        let location = origins.get(node.line());
        let located = |e: Error| e.at(location.clone());

        match node {
            AstNode::Directive { name, args, .. } => match name.as_str() {
                ".text" => cursor.switch(Segment::Text),
                ".data" => cursor.switch(Segment::Data),
                ".ktext" => cursor.switch(Segment::KText),
                ".kdata" => cursor.switch(Segment::KData),
                ".org" => {
                    let target = layout::literal_argument(".org", args).map_err(located)?;
                    let segment = cursor.segment;
                    let padding = cursor.org(target as u32).map_err(located)?;
                    out.pad(segment, padding);
                }
                ".align" => {
                    let alignment = layout::alignment_argument(args).map_err(located)?;
                    let segment = cursor.segment;
                    let padding = cursor.align(alignment);
                    out.pad(segment, padding);
                }
                ".globl" | ".extern" | ".eqv" | ".set" => {}
                ".module" => {
                    if let Some(Operand::Label { name }) = args.first() {
                        modules.push(name.clone());
                    }
                }
                ".endmodule" => {
                    modules.pop();
                }
                _ if layout::sized_data_directive(name) => {
                    let segment = cursor.segment;
                    debug_assert_matches!(segment, Segment::Data | Segment::KData);
                    let padding = cursor.align(layout::natural_alignment(name));
                    out.pad(segment, padding);

                    match name.as_str() {
                        ".byte" | ".half" => {
                            let size = layout::element_size(name) as usize;
                            for arg in args {
                                let resolved = resolve_data_value(arg, table, &modules)
                                    .map_err(located)?;
                                out.push_int(segment, resolved.value, size);
                            }
                        }
                        ".word" => {
                            for arg in args {
                                let resolved = resolve_data_value(arg, table, &modules)
                                    .map_err(located)?;
                                // The byte buffer length is the running
                                // offset within the segment.
                                let byte_offset = out.bytes_mut(segment).len() as u32;
                                if let Some((symbol, symbol_value)) = resolved.symbol {
                                    out.relocations.push(RelocationRecord {
                                        segment,
                                        offset: byte_offset,
                                        symbol,
                                        kind: RelocationType::Mips32,
                                        addend: resolved.value - symbol_value,
                                    });
                                }
                                out.push_int(segment, resolved.value, 4);
                                out.data_words_mut(segment).push(resolved.value as i32);
                            }
                        }
                        ".float" => {
                            for arg in args {
                                let value = float_value(arg) as f32;
                                let bytes = out.bytes_mut(segment);
                                let start = bytes.len();
                                bytes.resize(start + 4, 0);
                                Endian::write_f32(&mut bytes[start..], value);
                            }
                        }
                        ".double" => {
                            for arg in args {
                                let value = float_value(arg);
                                let bytes = out.bytes_mut(segment);
                                let start = bytes.len();
                                bytes.resize(start + 8, 0);
                                Endian::write_f64(&mut bytes[start..], value);
                            }
                        }
                        ".ascii" | ".asciiz" => {
                            for arg in args {
                                if let Operand::String { bytes } = arg {
                                    out.bytes_mut(segment).extend_from_slice(bytes);
                                }
                            }
                            if name == ".asciiz" {
                                out.bytes_mut(segment).push(0);
                            }
                        }
                        ".space" => {
                            let size = layout::space_argument(args).map_err(located)?;
                            out.pad(segment, size);
                        }
                        _ => unreachable!(),
                    }

                    let length = layout::data_directive_len(name, args).map_err(located)?;
                    cursor.advance(length);
                }
                _ => unreachable!("pass 1 admitted directive {}", name),
            },
            AstNode::Label { .. } => {
                if !cursor.segment.holds_code() {
                    let segment = cursor.segment;
                    let padding = cursor.align(layout::lookahead_alignment(ast, index));
                    out.pad(segment, padding);
                }
            }
            AstNode::Instruction(_) => {
                let segment = cursor.segment;
                for native in &pass1.expansions[index] {
                    let ctx = EncodeContext {
                        symbols: table,
                        modules: &modules,
                        segment,
                        pc: cursor.address(),
                        offset: cursor.offset(),
                    };
                    let (word, relocation) =
                        encode::encode_instruction(native, &ctx).map_err(located)?;
                    let words = out.words_mut(segment);
                    words.push(word);
                    let segment_index = words.len() - 1;
                    out.source_map.push(SourceMapEntry {
                        address: ctx.pc,
                        file: location.file.to_string(),
                        line: location.line,
                        segment,
                        segment_index,
                    });
                    if let Some(relocation) = relocation {
                        out.relocations.push(relocation);
                    }
                    cursor.advance(4);
                }
            }
        }
    }

    debug_assert_eq!(
        [
            cursor.offset_of(Segment::Text),
            cursor.offset_of(Segment::Data),
            cursor.offset_of(Segment::KText),
            cursor.offset_of(Segment::KData),
        ],
        pass1.segment_lengths
    );

    let mut image = BinaryImage::new();
    image.text = out.text;
    image.ktext = out.ktext;
    image.data = out.data;
    image.kdata = out.kdata;
    image.data_words = out.data_words;
    image.kdata_words = out.kdata_words;
    image.relocations = out.relocations;
    image.source_map = out.source_map;
    for (name, value) in table.defined_names() {
        image.symbols.insert(name.clone(), *value);
    }
    image.global_symbols = table.globl_names();
    image.extern_symbols = table.extern_names();
    image.undefined_symbols = table.undefined_names();

    let mut entries: Vec<SymbolEntry> = image
        .symbols
        .iter()
        .map(|(name, &address)| SymbolEntry {
            name: name.clone(),
            address,
            segment: image.classify(address),
        })
        .collect();
    entries.sort_by(|a, b| (a.address, &a.name).cmp(&(b.address, &b.name)));
    image.symbol_entries = entries;

    Ok(image)
}
