#![allow(clippy::cognitive_complexity)]

use crate::lexer::{MasmParser, Rule};
use ::pest::*;

#[test]
fn number_decimal() {
    parses_to! {
        parser: MasmParser,
        input: "4492",
        rule: Rule::number,
        tokens: [number(0, 4)]
    };
}

#[test]
fn number_hex() {
    parses_to! {
        parser: MasmParser,
        input: "0xF40a67",
        rule: Rule::number,
        tokens: [number(0, 8)]
    };
}

#[test]
fn number_float() {
    parses_to! {
        parser: MasmParser,
        input: "3.25",
        rule: Rule::number,
        tokens: [number(0, 4)]
    };

    parses_to! {
        parser: MasmParser,
        input: "1.5e-3",
        rule: Rule::number,
        tokens: [number(0, 6)]
    };
}

#[test]
fn identifier() {
    parses_to! {
        parser: MasmParser,
        input: "some label",
        rule: Rule::identifier,
        tokens: [identifier(0, 4)]
    };

    parses_to! {
        parser: MasmParser,
        input: "_loop$2.end",
        rule: Rule::identifier,
        tokens: [identifier(0, 11)]
    };

    parses_to! {
        parser: MasmParser,
        input: "%param",
        rule: Rule::identifier,
        tokens: [identifier(0, 6)]
    };

    fails_with! {
        parser: MasmParser,
        input: "555abc",
        rule: Rule::identifier,
        positives: vec![Rule::identifier],
        negatives: vec![],
        pos: 0
    };
}

#[test]
fn register() {
    parses_to! {
        parser: MasmParser,
        input: "$t0",
        rule: Rule::register,
        tokens: [register(0, 3)]
    };

    parses_to! {
        parser: MasmParser,
        input: "$31",
        rule: Rule::register,
        tokens: [register(0, 3)]
    };
}

#[test]
fn directive() {
    parses_to! {
        parser: MasmParser,
        input: ".end_macro",
        rule: Rule::directive,
        tokens: [directive(0, 10)]
    };
}

#[test]
fn string_with_inner() {
    parses_to! {
        parser: MasmParser,
        input: "\"hi\"",
        rule: Rule::string,
        tokens: [string(0, 4, [string_inner(1, 3)])]
    };
}

#[test]
fn shifts() {
    parses_to! {
        parser: MasmParser,
        input: "<<",
        rule: Rule::lshift,
        tokens: [lshift(0, 2)]
    };

    parses_to! {
        parser: MasmParser,
        input: ">>",
        rule: Rule::rshift,
        tokens: [rshift(0, 2)]
    };
}
