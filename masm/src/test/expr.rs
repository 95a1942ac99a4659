use crate::error::{ErrorKind, ExpressionError, Result};
use crate::expr::{evaluate, evaluate_literal, parse_expression, ExprNode, SymbolResolver};
use crate::lexer::lex_line;
use std::collections::HashMap;

fn parse(source: &str) -> ExprNode {
    let line = lex_line(source, 1).unwrap();
    parse_expression(&line.tokens).unwrap()
}

fn eval(source: &str) -> i64 {
    evaluate_literal(&parse(source)).unwrap()
}

struct MapResolver(HashMap<String, i64>);

impl SymbolResolver for MapResolver {
    fn resolve(&mut self, name: &str) -> Result<i64> {
        Ok(*self.0.get(name).unwrap())
    }
}

#[test]
fn precedence() {
    assert_eq!(eval("1 + 2 * 3"), 7);
    assert_eq!(eval("2 * (3 + 4)"), 14);
    assert_eq!(eval("16 / 2 / 2"), 4);
    assert_eq!(eval("7 % 4"), 3);
    assert_eq!(eval("1 | 2 ^ 3 & 2"), 1);
    assert_eq!(eval("1 << 4 - 2"), 4);
}

#[test]
fn unary_operators() {
    assert_eq!(eval("~0"), -1);
    assert_eq!(eval("- (3 + 4)"), -7);
    assert_eq!(eval("1 + - 2"), -1);
}

#[test]
fn thirty_two_bit_shift_semantics() {
    // Low half-word extraction with sign extension.
    assert_eq!(eval("((0x12348765 << 16) >> 16)"), -30875);
    assert_eq!(eval("(0x12348765 & 65535)"), 0x8765);
    assert_eq!(eval("((0x12348765 >> 16) & 65535)"), 0x1234);
    // Shifting wraps at 32 bits.
    assert_eq!(eval("(0x80000000 >> 31)"), -1);
}

#[test]
fn division_by_zero() {
    let node = parse("1 / 0");
    match evaluate_literal(&node).unwrap_err().kind {
        ErrorKind::Expression(ExpressionError::DivisionByZero) => {}
        other => panic!("unexpected error {:?}", other),
    }
    let node = parse("1 % 0");
    assert!(evaluate_literal(&node).is_err());
}

#[test]
fn symbols_resolve() {
    let node = parse("base + 8");
    assert_eq!(node.first_symbol(), Some("base"));

    let mut resolver = MapResolver(
        [("base".to_string(), 0x1001_0000i64)]
            .iter()
            .cloned()
            .collect(),
    );
    assert_eq!(evaluate(&node, &mut resolver).unwrap(), 0x1001_0008);
}

#[test]
fn literal_only_rejects_symbols() {
    let node = parse("base + 8");
    assert!(evaluate_literal(&node).is_err());
}

#[test]
fn malformed_expressions() {
    let line = lex_line("1 +", 1).unwrap();
    assert!(parse_expression(&line.tokens).is_err());
    let line = lex_line("(1 + 2", 1).unwrap();
    assert!(parse_expression(&line.tokens).is_err());
}
