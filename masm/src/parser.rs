//! Turns lexed lines into the program AST: chained leading labels, directive
//! validation, instruction operand grouping. Tracks the running segment so
//! every node is tagged with the segment it lands in.

use crate::ast::{AstNode, Instruction, MemoryOffset, Operand};
use crate::error::{EncodingError, Error, MacroError, ParseError, Result};
use crate::expr;
use crate::include::OriginMap;
use crate::lexer::{LexedLine, Token, TokenKind, TokenValue};
use mips::{RegisterId, Segment};

/// Directive aliases are canonicalized at parse time so the passes only see
/// one spelling.
fn canonical_directive(name: &str) -> String {
    match name {
        ".global" => ".globl".to_string(),
        ".equ" => ".eqv".to_string(),
        ".skip" => ".space".to_string(),
        ".balign" => ".align".to_string(),
        other => other.to_string(),
    }
}

fn segment_directive(name: &str) -> Option<Segment> {
    match name {
        ".text" => Some(Segment::Text),
        ".data" => Some(Segment::Data),
        ".ktext" => Some(Segment::KText),
        ".kdata" => Some(Segment::KData),
        _ => None,
    }
}

fn split_groups(tokens: &[Token]) -> Vec<&[Token]> {
    if tokens.is_empty() {
        return Vec::new();
    }
    let mut groups = Vec::new();
    let mut start = 0;
    for (index, token) in tokens.iter().enumerate() {
        if token.kind == TokenKind::Comma {
            groups.push(&tokens[start..index]);
            start = index + 1;
        }
    }
    groups.push(&tokens[start..]);
    groups
}

fn register_operand(token: &Token) -> Result<Operand> {
    let id = RegisterId::parse(&token.text).map_err(|_| {
        Error::from(EncodingError::RegisterOutOfRange {
            text: token.text.clone(),
        })
    })?;
    Ok(Operand::Register {
        id,
        name: token.text.clone(),
    })
}

/// Parses the offset part of a memory operand, or a bare expression group.
/// Constant expressions fold to immediates here, which is what lets both
/// passes size pseudo-op expansions identically.
fn expression_operand(tokens: &[Token]) -> Result<Operand> {
    let tree = expr::parse_expression(tokens)?;
    if tree.contains_symbol() {
        Ok(Operand::Expression { tree })
    } else {
        Ok(Operand::Immediate {
            value: expr::evaluate_literal(&tree)?,
        })
    }
}

/// A memory operand ends in `( register )`; everything before that triple
/// is the offset.
fn is_memory_group(group: &[Token]) -> bool {
    group.len() >= 3
        && group[group.len() - 3].kind == TokenKind::LParen
        && group[group.len() - 2].kind == TokenKind::Register
        && group[group.len() - 1].kind == TokenKind::RParen
}

fn memory_operand(group: &[Token]) -> Result<Operand> {
    let malformed = |detail: &str| {
        Error::from(ParseError::MalformedOperand {
            detail: detail.to_string(),
        })
    };

    let base = match register_operand(&group[group.len() - 2])? {
        Operand::Register { id, .. } => id,
        _ => unreachable!(),
    };

    let offset_tokens = &group[..group.len() - 3];
    let offset = if offset_tokens.is_empty() {
        MemoryOffset::Immediate(0)
    } else if offset_tokens.len() == 1 {
        let token = &offset_tokens[0];
        match (token.kind, &token.value) {
            (TokenKind::Number, TokenValue::Int(value)) => MemoryOffset::Immediate(*value),
            (TokenKind::Identifier, _) => MemoryOffset::Label(token.text.clone()),
            _ => return Err(malformed("invalid memory offset")),
        }
    } else {
        match expression_operand(offset_tokens)? {
            Operand::Immediate { value } => MemoryOffset::Immediate(value),
            Operand::Expression { tree } => MemoryOffset::Expression(tree),
            _ => unreachable!(),
        }
    };

    Ok(Operand::Memory { base, offset })
}

fn operand_from_group(group: &[Token]) -> Result<Operand> {
    if group.is_empty() {
        return Err(Error::from(ParseError::MalformedOperand {
            detail: "empty operand".to_string(),
        }));
    }
    if is_memory_group(group) {
        return memory_operand(group);
    }
    if group.len() == 1 {
        let token = &group[0];
        return match (token.kind, &token.value) {
            (TokenKind::Register, _) => register_operand(token),
            (TokenKind::Number, TokenValue::Int(value)) => {
                Ok(Operand::Immediate { value: *value })
            }
            (TokenKind::Number, TokenValue::Float(value)) => {
                Ok(Operand::Float { value: *value })
            }
            (TokenKind::Str, TokenValue::Str(text)) => Ok(Operand::String {
                bytes: text.clone().into_bytes(),
            }),
            (TokenKind::Identifier, _) => Ok(Operand::Label {
                name: token.text.clone(),
            }),
            _ => Err(Error::from(ParseError::UnexpectedToken {
                text: token.text.clone(),
            })),
        };
    }
    expression_operand(group)
}

fn parse_operands(tokens: &[Token]) -> Result<Vec<Operand>> {
    split_groups(tokens)
        .into_iter()
        .map(operand_from_group)
        .collect()
}

fn wrong_count(name: &str, expected: &'static str) -> Error {
    Error::from(ParseError::WrongOperandCount {
        name: name.to_string(),
        expected,
    })
}

fn numeric_args(name: &str, args: &[Operand], allow_labels: bool) -> Result<()> {
    for arg in args {
        match arg {
            Operand::Immediate { .. } | Operand::Expression { .. } => {}
            Operand::Label { .. } if allow_labels => {}
            _ => {
                return Err(Error::from(ParseError::MalformedOperand {
                    detail: format!("invalid argument for \"{}\"", name),
                }))
            }
        }
    }
    Ok(())
}

fn parse_directive(
    name_token: &Token,
    rest: &[Token],
    segment: Segment,
    line: u32,
) -> Result<(AstNode, Option<Segment>)> {
    let name = canonical_directive(&name_token.text.to_lowercase());

    if let Some(new_segment) = segment_directive(&name) {
        if !rest.is_empty() {
            return Err(wrong_count(&name, "no arguments"));
        }
        return Ok((
            AstNode::Directive {
                name,
                args: Vec::new(),
                segment: new_segment,
                line,
            },
            Some(new_segment),
        ));
    }

    let args = match name.as_str() {
        ".word" => {
            let args = parse_operands(rest)?;
            if args.is_empty() {
                return Err(wrong_count(&name, "one or more values"));
            }
            numeric_args(&name, &args, true)?;
            args
        }
        ".byte" | ".half" => {
            let args = parse_operands(rest)?;
            if args.is_empty() {
                return Err(wrong_count(&name, "one or more values"));
            }
            numeric_args(&name, &args, false)?;
            args
        }
        ".float" | ".double" => {
            let args = parse_operands(rest)?;
            if args.is_empty() {
                return Err(wrong_count(&name, "one or more values"));
            }
            for arg in &args {
                match arg {
                    Operand::Float { .. } | Operand::Immediate { .. } => {}
                    _ => {
                        return Err(Error::from(ParseError::MalformedOperand {
                            detail: format!("invalid argument for \"{}\"", name),
                        }))
                    }
                }
            }
            args
        }
        ".ascii" | ".asciiz" => {
            let args = parse_operands(rest)?;
            match args.as_slice() {
                [Operand::String { .. }] => {}
                _ => return Err(wrong_count(&name, "a single string")),
            }
            args
        }
        ".space" | ".align" | ".org" => {
            let args = parse_operands(rest)?;
            if args.len() != 1 {
                return Err(wrong_count(&name, "a single value"));
            }
            numeric_args(&name, &args, false)?;
            args
        }
        ".globl" | ".extern" => {
            let args = parse_operands(rest)?;
            if args.is_empty() {
                return Err(wrong_count(&name, "one or more symbols"));
            }
            for arg in &args {
                match arg {
                    Operand::Label { .. } => {}
                    _ => return Err(wrong_count(&name, "one or more symbols")),
                }
            }
            args
        }
        ".eqv" => {
            // `.eqv NAME VALUE` with an optional comma after the name; the
            // value is everything that follows, as one expression.
            if rest.is_empty() || rest[0].kind != TokenKind::Identifier {
                return Err(wrong_count(&name, "a symbol followed by a value"));
            }
            let symbol = Operand::Label {
                name: rest[0].text.clone(),
            };
            let mut value_tokens = &rest[1..];
            if value_tokens.first().map(|t| t.kind) == Some(TokenKind::Comma) {
                value_tokens = &value_tokens[1..];
            }
            if value_tokens.is_empty() {
                return Err(wrong_count(&name, "a symbol followed by a value"));
            }
            let tree = expr::parse_expression(value_tokens)?;
            vec![symbol, Operand::Expression { tree }]
        }
        ".module" => {
            let args = parse_operands(rest)?;
            match args.as_slice() {
                [Operand::Label { .. }] => {}
                _ => return Err(wrong_count(&name, "a single module name")),
            }
            args
        }
        ".endmodule" => {
            if !rest.is_empty() {
                return Err(wrong_count(&name, "no arguments"));
            }
            Vec::new()
        }
        ".set" => {
            if rest.is_empty() {
                return Err(wrong_count(&name, "at least one argument"));
            }
            Vec::new()
        }
        ".include" => {
            return Err(wrong_count(&name, "a quoted file path"));
        }
        ".macro" | ".end_macro" => {
            return Err(Error::from(MacroError::InvalidDefinition {
                detail: format!("\"{}\" outside of a macro context", name),
            }));
        }
        _ => {
            return Err(Error::from(ParseError::UnknownDirective { name }));
        }
    };

    Ok((
        AstNode::Directive {
            name,
            args,
            segment,
            line,
        },
        None,
    ))
}

fn parse_instruction(tokens: &[Token], segment: Segment, line: u32) -> Result<Instruction> {
    let mnemonic = tokens[0].text.to_lowercase();
    let operands = parse_operands(&tokens[1..])?;
    let raw_tokens = tokens
        .iter()
        .filter(|t| t.kind != TokenKind::Comma)
        .cloned()
        .collect();
    Ok(Instruction {
        mnemonic,
        operands,
        segment,
        line,
        raw_tokens,
    })
}

fn parse_line(
    lexed: &LexedLine,
    segment: Segment,
) -> Result<(Vec<AstNode>, Option<Segment>)> {
    let tokens = &lexed.tokens;
    let line = lexed.line;
    let mut nodes = Vec::new();
    let mut index = 0;

    while index + 1 < tokens.len()
        && tokens[index].kind == TokenKind::Identifier
        && tokens[index + 1].kind == TokenKind::Colon
    {
        nodes.push(AstNode::Label {
            name: tokens[index].text.clone(),
            segment,
            line,
        });
        index += 2;
    }

    if index == tokens.len() {
        return Ok((nodes, None));
    }

    let first = &tokens[index];
    match first.kind {
        TokenKind::Directive => {
            let (node, new_segment) = parse_directive(first, &tokens[index + 1..], segment, line)?;
            nodes.push(node);
            Ok((nodes, new_segment))
        }
        TokenKind::Identifier => {
            let instruction = parse_instruction(&tokens[index..], segment, line)?;
            nodes.push(AstNode::Instruction(instruction));
            Ok((nodes, None))
        }
        _ => Err(Error::from(ParseError::UnexpectedToken {
            text: first.text.clone(),
        })),
    }
}

/// Parses the full lexed program. The segment starts as `.text` and changes
/// only on segment directives.
pub fn parse_program(lines: &[LexedLine], origins: &OriginMap) -> Result<Vec<AstNode>> {
    let mut nodes = Vec::new();
    let mut segment = Segment::Text;

    for lexed in lines {
        let (mut line_nodes, new_segment) =
            parse_line(lexed, segment).map_err(|e| e.at(origins.get(lexed.line)))?;
        nodes.append(&mut line_nodes);
        if let Some(new_segment) = new_segment {
            segment = new_segment;
        }
    }

    Ok(nodes)
}

/// Parses one generated line during pseudo-op expansion. Segment switches
/// are not allowed there; the caller supplies the enclosing segment.
pub fn parse_snippet(lexed: &LexedLine, segment: Segment) -> Result<Vec<AstNode>> {
    let (nodes, new_segment) = parse_line(lexed, segment)?;
    if new_segment.is_some() {
        return Err(Error::from(ParseError::UnexpectedToken {
            text: "segment directive in expansion".to_string(),
        }));
    }
    Ok(nodes)
}
