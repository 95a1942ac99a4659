//! The lexical macro expander. Definitions are captured verbatim between
//! `.macro` and `.end_macro`; invocations substitute argument text for
//! parameter tokens, rename body-local labels with a per-expansion `_M<N>`
//! suffix, and push the re-lexed lines back onto the work stack. Expansion
//! ancestry rides along with every generated line so recursion is caught no
//! matter how it is spelled.

use crate::error::{Error, MacroError, Result};
use crate::include::OriginMap;
use crate::lexer::{self, LexedLine, Token, TokenKind};

pub const MACRO_DEPTH_LIMIT: usize = 32;

#[derive(Debug)]
struct MacroDefinition {
    name: String,
    params: Vec<String>,
    body: Vec<LexedLine>,
    /// Labels defined at body line starts, renamed per expansion.
    locals: Vec<String>,
}

struct WorkLine {
    lexed: LexedLine,
    /// Definition indices currently being expanded, outermost first.
    ancestry: Vec<usize>,
}

fn directive_is(token: &Token, name: &str) -> bool {
    token.kind == TokenKind::Directive && token.text.to_lowercase() == name
}

/// Number of leading `IDENT :` pairs.
fn leading_labels(tokens: &[Token]) -> usize {
    let mut index = 0;
    while index + 1 < tokens.len()
        && tokens[index].kind == TokenKind::Identifier
        && tokens[index + 1].kind == TokenKind::Colon
    {
        index += 2;
    }
    index
}

fn split_arguments(tokens: &[Token]) -> Result<Vec<String>> {
    if tokens.is_empty() {
        return Ok(Vec::new());
    }
    let mut arguments = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for token in tokens {
        if token.kind == TokenKind::Comma {
            if current.is_empty() {
                return Err(Error::from(MacroError::InvalidParameter {
                    text: ",".to_string(),
                }));
            }
            arguments.push(current.join(" "));
            current.clear();
        } else {
            current.push(&token.text);
        }
    }
    if current.is_empty() {
        return Err(Error::from(MacroError::InvalidParameter {
            text: ",".to_string(),
        }));
    }
    arguments.push(current.join(" "));
    Ok(arguments)
}

fn parse_header(tokens: &[Token]) -> Result<(String, Vec<String>)> {
    let name = match tokens.get(1) {
        Some(token) if token.kind == TokenKind::Identifier => token.text.clone(),
        _ => {
            return Err(Error::from(MacroError::InvalidDefinition {
                detail: "\".macro\" expects a name".to_string(),
            }))
        }
    };

    let mut rest = &tokens[2..];
    // Parameter lists may optionally be parenthesized.
    if rest.first().map(|t| t.kind) == Some(TokenKind::LParen)
        && rest.last().map(|t| t.kind) == Some(TokenKind::RParen)
    {
        rest = &rest[1..rest.len() - 1];
    }

    let mut params = Vec::new();
    for token in rest {
        match token.kind {
            TokenKind::Comma => {}
            TokenKind::Identifier | TokenKind::Register => params.push(token.text.clone()),
            _ => {
                return Err(Error::from(MacroError::InvalidParameter {
                    text: token.text.clone(),
                }))
            }
        }
    }
    Ok((name, params))
}

fn body_locals(body: &[LexedLine]) -> Vec<String> {
    let mut locals = Vec::new();
    for line in body {
        let count = leading_labels(&line.tokens);
        for pair in line.tokens[..count].chunks(2) {
            locals.push(pair[0].text.clone());
        }
    }
    locals
}

/// Latest definition with this name and arity wins.
fn find_definition(defs: &[MacroDefinition], name: &str, arity: usize) -> Option<usize> {
    defs.iter()
        .rposition(|def| def.name == name && def.params.len() == arity)
}

pub fn expand_macros(lines: Vec<LexedLine>, origins: &OriginMap) -> Result<Vec<LexedLine>> {
    let mut definitions: Vec<MacroDefinition> = Vec::new();
    let mut output: Vec<LexedLine> = Vec::new();
    let mut expansion_counter = 0u32;

    let mut work: Vec<WorkLine> = lines
        .into_iter()
        .rev()
        .map(|lexed| WorkLine {
            lexed,
            ancestry: Vec::new(),
        })
        .collect();

    while let Some(WorkLine { lexed, ancestry }) = work.pop() {
        let tokens = &lexed.tokens;

        if tokens.first().map(|t| directive_is(t, ".macro")) == Some(true) {
            let location = origins.get(lexed.line);
            let (name, params) =
                parse_header(tokens).map_err(|e| e.at(location.clone()))?;

            let mut body = Vec::new();
            let mut depth = 1;
            loop {
                let inner = match work.pop() {
                    Some(inner) => inner,
                    None => {
                        return Err(Error::from(MacroError::MissingEnd { name })
                            .at(location))
                    }
                };
                let first = inner.lexed.tokens.first();
                if first.map(|t| directive_is(t, ".macro")) == Some(true) {
                    depth += 1;
                } else if first.map(|t| directive_is(t, ".end_macro")) == Some(true) {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                body.push(inner.lexed);
            }

            let locals = body_locals(&body);
            definitions.push(MacroDefinition {
                name,
                params,
                body,
                locals,
            });
            continue;
        }

        if tokens.first().map(|t| directive_is(t, ".end_macro")) == Some(true) {
            return Err(Error::from(MacroError::InvalidDefinition {
                detail: "\".end_macro\" without \".macro\"".to_string(),
            })
            .at(origins.get(lexed.line)));
        }

        let label_end = leading_labels(tokens);
        let call = tokens
            .get(label_end)
            .filter(|t| t.kind == TokenKind::Identifier)
            .and_then(|t| {
                let arguments = split_arguments(&tokens[label_end + 1..]);
                match arguments {
                    Ok(arguments) => find_definition(&definitions, &t.text, arguments.len())
                        .map(|index| Ok((index, arguments))),
                    // Only an error if this actually names a macro.
                    Err(err) => {
                        if definitions.iter().any(|d| d.name == t.text) {
                            Some(Err(err))
                        } else {
                            None
                        }
                    }
                }
            });

        let (def_index, arguments) = match call {
            Some(result) => result.map_err(|e| e.at(origins.get(lexed.line)))?,
            None => {
                output.push(lexed);
                continue;
            }
        };

        let location = origins.get(lexed.line);
        if ancestry.len() >= MACRO_DEPTH_LIMIT {
            return Err(Error::from(MacroError::DepthExceeded {
                limit: MACRO_DEPTH_LIMIT,
            })
            .at(location));
        }
        if ancestry.iter().any(|&index| index == def_index) {
            let chain = ancestry
                .iter()
                .chain(std::iter::once(&def_index))
                .map(|&index| definitions[index].name.as_str())
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(Error::from(MacroError::Recursion { chain }).at(location));
        }

        if label_end > 0 {
            output.push(LexedLine {
                line: lexed.line,
                tokens: tokens[..label_end].to_vec(),
            });
        }

        let definition = &definitions[def_index];
        let suffix = format!("_M{}", expansion_counter);
        expansion_counter += 1;

        let mut child_ancestry = ancestry.clone();
        child_ancestry.push(def_index);

        let mut generated = Vec::new();
        for body_line in &definition.body {
            let mut pieces: Vec<String> = Vec::with_capacity(body_line.tokens.len());
            for token in &body_line.tokens {
                let piece = match token.kind {
                    TokenKind::Identifier | TokenKind::Register => {
                        if let Some(position) =
                            definition.params.iter().position(|p| *p == token.text)
                        {
                            arguments[position].clone()
                        } else if token.kind == TokenKind::Identifier
                            && definition.locals.iter().any(|l| *l == token.text)
                        {
                            format!("{}{}", token.text, suffix)
                        } else {
                            token.text.clone()
                        }
                    }
                    _ => token.text.clone(),
                };
                pieces.push(piece);
            }
            let text = pieces.join(" ");
            let relexed = lexer::lex_line(&text, lexed.line)
                .map_err(|e| e.at(location.clone()))?;
            generated.push(relexed);
        }

        for relexed in generated.into_iter().rev() {
            work.push(WorkLine {
                lexed: relexed,
                ancestry: child_ancestry.clone(),
            });
        }
    }

    Ok(output)
}
