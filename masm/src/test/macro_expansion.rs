use crate::error::{ErrorKind, MacroError};
use crate::include::expand_includes;
use crate::lexer::{lex_line, LexedLine};
use crate::macros::expand_macros;
use crate::AssembleOptions;

fn expand(source: &str) -> crate::error::Result<Vec<LexedLine>> {
    let (lines, origins) = expand_includes(source, &AssembleOptions::default())?;
    let lexed = lines
        .iter()
        .enumerate()
        .map(|(index, text)| lex_line(text, index as u32 + 1))
        .collect::<crate::error::Result<Vec<_>>>()?;
    expand_macros(lexed, &origins)
}

fn texts(lines: &[LexedLine]) -> Vec<String> {
    lines
        .iter()
        .filter(|line| !line.tokens.is_empty())
        .map(|line| {
            line.tokens
                .iter()
                .map(|t| t.text.clone())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

#[test]
fn parameters_substitute() {
    let expanded = expand(
        ".macro push r\nsw r, -4($sp)\naddi $sp, $sp, -4\n.end_macro\npush $t3",
    )
    .unwrap();
    assert_eq!(
        texts(&expanded),
        vec!["sw $t3 , -4 ( $sp )", "addi $sp , $sp , -4"]
    );
}

#[test]
fn percent_parameters_are_accepted() {
    let expanded = expand(".macro set2 %rd\nli %rd, 2\n.end_macro\nset2 $s0").unwrap();
    assert_eq!(texts(&expanded), vec!["li $s0 , 2"]);
}

#[test]
fn local_labels_rename_per_expansion() {
    let expanded = expand(
        ".macro spin\nagain: bne $t0, $zero, again\n.end_macro\nspin\nspin",
    )
    .unwrap();
    assert_eq!(
        texts(&expanded),
        vec![
            "again_M0 : bne $t0 , $zero , again_M0",
            "again_M1 : bne $t0 , $zero , again_M1",
        ]
    );
}

#[test]
fn invocation_labels_are_kept() {
    let expanded = expand(".macro one\nnop\n.end_macro\nentry: one").unwrap();
    assert_eq!(texts(&expanded), vec!["entry :", "nop"]);
}

#[test]
fn arity_selects_the_definition() {
    let expanded = expand(
        ".macro put a\nori $t0, $0, a\n.end_macro\n.macro put a, b\nori a, $0, b\n.end_macro\nput 7\nput $t5, 9",
    )
    .unwrap();
    assert_eq!(
        texts(&expanded),
        vec!["ori $t0 , $0 , 7", "ori $t5 , $0 , 9"]
    );
}

#[test]
fn latest_definition_wins() {
    let expanded = expand(
        ".macro v\nori $t0, $0, 1\n.end_macro\n.macro v\nori $t0, $0, 2\n.end_macro\nv",
    )
    .unwrap();
    assert_eq!(texts(&expanded), vec!["ori $t0 , $0 , 2"]);
}

#[test]
fn nested_definitions_expand_on_use() {
    let expanded = expand(
        ".macro outer\n.macro inner\nsyscall\n.end_macro\ninner\n.end_macro\nouter",
    )
    .unwrap();
    assert_eq!(texts(&expanded), vec!["syscall"]);
}

#[test]
fn missing_end_macro() {
    let err = expand(".macro broken\nnop").unwrap_err();
    match err.kind {
        ErrorKind::Macro(MacroError::MissingEnd { ref name }) => assert_eq!(name, "broken"),
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn stray_end_macro() {
    let err = expand(".end_macro").unwrap_err();
    match err.kind {
        ErrorKind::Macro(MacroError::InvalidDefinition { .. }) => {}
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn recursion_is_detected() {
    let err = expand(".macro a\na\n.end_macro\na").unwrap_err();
    match err.kind {
        ErrorKind::Macro(MacroError::Recursion { ref chain }) => {
            assert_eq!(chain, "a -> a");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn mutual_recursion_is_detected() {
    let err = expand(
        ".macro a\nb\n.end_macro\n.macro b\na\n.end_macro\na",
    )
    .unwrap_err();
    match err.kind {
        ErrorKind::Macro(MacroError::Recursion { .. }) => {}
        other => panic!("unexpected error {:?}", other),
    }
}
