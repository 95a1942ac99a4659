//! `.include` resolution. The expander never touches the filesystem itself;
//! the host injects a resolver callback. Alongside the expanded text it
//! builds the origin map that lets every later diagnostic point back into
//! the original files.

use crate::error::{Error, IncludeError, ParseError, Result, SourceLocation};
use crate::lexer::{self, TokenKind, TokenValue};
use crate::AssembleOptions;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Maps each expanded line (1-based) to its original file and line.
#[derive(Clone, Debug)]
pub struct OriginMap {
    entries: Vec<SourceLocation>,
}

impl OriginMap {
    pub fn get(&self, line: u32) -> SourceLocation {
        self.entries
            .get(line.saturating_sub(1) as usize)
            .cloned()
            .unwrap_or_else(|| SourceLocation {
                file: Rc::from("<input>"),
                line,
            })
    }
}

fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    path.starts_with('/')
        || (bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic())
}

/// The `.include "PATH"` line shape, if this line is one.
fn include_path(text: &str) -> Option<Result<String>> {
    let lexed = lexer::lex_line(text, 0).ok()?;
    let tokens = &lexed.tokens;
    let first = tokens.first()?;
    if first.kind != TokenKind::Directive || first.text.to_lowercase() != ".include" {
        return None;
    }
    match tokens.get(1).map(|t| (&t.kind, &t.value)) {
        Some((TokenKind::Str, TokenValue::Str(path))) if tokens.len() == 2 => {
            Some(Ok(path.clone()))
        }
        _ => Some(Err(Error::from(ParseError::WrongOperandCount {
            name: ".include".to_string(),
            expected: "a quoted file path",
        }))),
    }
}

struct Expander<'a> {
    options: &'a AssembleOptions,
    active: Vec<String>,
    lines: Vec<String>,
    origins: Vec<SourceLocation>,
}

impl<'a> Expander<'a> {
    fn expand(&mut self, text: &str, file: Rc<str>, dir: &Path) -> Result<()> {
        for (index, raw) in text.lines().enumerate() {
            let location = SourceLocation {
                file: file.clone(),
                line: index as u32 + 1,
            };

            let path = match include_path(raw) {
                None => {
                    self.lines.push(raw.to_string());
                    self.origins.push(location);
                    continue;
                }
                Some(result) => result.map_err(|e| e.at(location.clone()))?,
            };

            let resolved = if is_absolute(&path) {
                PathBuf::from(&path)
            } else {
                dir.join(&path)
            };
            let key = resolved.to_string_lossy().into_owned();
            if self.active.iter().any(|entry| *entry == key) {
                return Err(Error::from(IncludeError::Recursive { path: key })
                    .at(location));
            }

            let resolver = match &self.options.include_resolver {
                Some(resolver) => resolver,
                None => {
                    return Err(Error::from(IncludeError::Unavailable { path })
                        .at(location))
                }
            };
            let content = resolver(&resolved).map_err(|err| {
                Error::from(IncludeError::Resolver {
                    path: key.clone(),
                    message: err.to_string(),
                })
                .at(location.clone())
            })?;

            let sub_dir = resolved
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            let sub_file: Rc<str> = Rc::from(key.as_str());

            self.active.push(key);
            self.expand(&content, sub_file, &sub_dir)?;
            self.active.pop();
        }
        Ok(())
    }
}

/// Splices all includes into a flat line list plus the origin map.
pub fn expand_includes(
    source: &str,
    options: &AssembleOptions,
) -> Result<(Vec<String>, OriginMap)> {
    let file: Rc<str> = Rc::from(
        options
            .source_name
            .as_deref()
            .unwrap_or("<input>"),
    );
    let dir = options
        .base_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));

    let mut expander = Expander {
        options,
        active: Vec::new(),
        lines: Vec::new(),
        origins: Vec::new(),
    };
    if let Some(name) = &options.source_name {
        let key = if is_absolute(name) {
            PathBuf::from(name)
        } else {
            dir.join(name)
        };
        expander.active.push(key.to_string_lossy().into_owned());
    }
    expander.expand(source, file, &dir)?;

    Ok((
        expander.lines,
        OriginMap {
            entries: expander.origins,
        },
    ))
}
