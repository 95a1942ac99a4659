use crate::ast::{AstNode, MemoryOffset, Operand};
use crate::test::parse_source;
use mips::{RegisterId, Segment};

#[test]
fn chained_labels() {
    let nodes = parse_source("first: second: add $t0, $t1, $t2").unwrap();
    assert_eq!(nodes.len(), 3);
    match (&nodes[0], &nodes[1]) {
        (
            AstNode::Label { name: a, .. },
            AstNode::Label { name: b, .. },
        ) => {
            assert_eq!(a, "first");
            assert_eq!(b, "second");
        }
        other => panic!("unexpected nodes {:?}", other),
    }
    match &nodes[2] {
        AstNode::Instruction(instruction) => {
            assert_eq!(instruction.mnemonic, "add");
            assert_eq!(instruction.operands.len(), 3);
        }
        other => panic!("unexpected node {:?}", other),
    }
}

#[test]
fn segment_tracking() {
    let nodes = parse_source(".data\nvalue: .word 1\n.text\nstart: nop").unwrap();
    match &nodes[1] {
        AstNode::Label { name, segment, .. } => {
            assert_eq!(name, "value");
            assert_eq!(*segment, Segment::Data);
        }
        other => panic!("unexpected node {:?}", other),
    }
    match &nodes[4] {
        AstNode::Label { segment, .. } => assert_eq!(*segment, Segment::Text),
        other => panic!("unexpected node {:?}", other),
    }
}

#[test]
fn memory_operands() {
    let nodes = parse_source("lw $t0, 8($sp)\nsw $t1, buf($t2)\nlb $t3, ($t4)").unwrap();

    match &nodes[0] {
        AstNode::Instruction(i) => match &i.operands[1] {
            Operand::Memory { base, offset } => {
                assert_eq!(*base, RegisterId::SP);
                assert_eq!(*offset, MemoryOffset::Immediate(8));
            }
            other => panic!("unexpected operand {:?}", other),
        },
        other => panic!("unexpected node {:?}", other),
    }
    match &nodes[1] {
        AstNode::Instruction(i) => match &i.operands[1] {
            Operand::Memory { base, offset } => {
                assert_eq!(*base, RegisterId::T2);
                assert_eq!(*offset, MemoryOffset::Label("buf".to_string()));
            }
            other => panic!("unexpected operand {:?}", other),
        },
        other => panic!("unexpected node {:?}", other),
    }
    match &nodes[2] {
        AstNode::Instruction(i) => match &i.operands[1] {
            Operand::Memory { base, offset } => {
                assert_eq!(*base, RegisterId::T4);
                assert_eq!(*offset, MemoryOffset::Immediate(0));
            }
            other => panic!("unexpected operand {:?}", other),
        },
        other => panic!("unexpected node {:?}", other),
    }
}

#[test]
fn constant_expressions_fold() {
    let nodes = parse_source("addi $t0, $t1, 2+3*4").unwrap();
    match &nodes[0] {
        AstNode::Instruction(i) => {
            assert_eq!(i.operands[2], Operand::Immediate { value: 14 });
        }
        other => panic!("unexpected node {:?}", other),
    }
}

#[test]
fn symbolic_expressions_stay_expressions() {
    let nodes = parse_source(".word buf+4").unwrap();
    match &nodes[0] {
        AstNode::Directive { args, .. } => match &args[0] {
            Operand::Expression { tree } => assert_eq!(tree.first_symbol(), Some("buf")),
            other => panic!("unexpected operand {:?}", other),
        },
        other => panic!("unexpected node {:?}", other),
    }
}

#[test]
fn raw_tokens_keep_parens_drop_commas() {
    let nodes = parse_source("lw $t0, label($t1)").unwrap();
    match &nodes[0] {
        AstNode::Instruction(i) => {
            let texts: Vec<&str> = i.raw_tokens.iter().map(|t| t.text.as_str()).collect();
            assert_eq!(texts, vec!["lw", "$t0", "label", "(", "$t1", ")"]);
        }
        other => panic!("unexpected node {:?}", other),
    }
}

#[test]
fn directive_aliases_canonicalize() {
    let nodes = parse_source(".global main\n.equ SIZE, 4\n.skip 8\n.balign 2").unwrap();
    let names: Vec<&str> = nodes
        .iter()
        .map(|node| match node {
            AstNode::Directive { name, .. } => name.as_str(),
            other => panic!("unexpected node {:?}", other),
        })
        .collect();
    assert_eq!(names, vec![".globl", ".eqv", ".space", ".align"]);
}

#[test]
fn directive_arity_is_validated() {
    assert!(parse_source(".word").is_err());
    assert!(parse_source(".ascii 5").is_err());
    assert!(parse_source(".ascii \"a\", \"b\"").is_err());
    assert!(parse_source(".align 2, 3").is_err());
    assert!(parse_source(".globl 7").is_err());
    assert!(parse_source(".text 100").is_err());
    assert!(parse_source(".module").is_err());
}

#[test]
fn unknown_directive_is_rejected() {
    assert!(parse_source(".bogus 1").is_err());
}

#[test]
fn bad_register_is_rejected() {
    assert!(parse_source("add $t0, $q1, $t2").is_err());
    assert!(parse_source("add $t0, $32, $t2").is_err());
}

#[test]
fn eqv_value_keeps_expression() {
    let nodes = parse_source(".eqv LIMIT, 1 << 4").unwrap();
    match &nodes[0] {
        AstNode::Directive { name, args, .. } => {
            assert_eq!(name, ".eqv");
            assert_eq!(
                args[0],
                Operand::Label {
                    name: "LIMIT".to_string()
                }
            );
            assert!(matches!(args[1], Operand::Expression { .. }));
        }
        other => panic!("unexpected node {:?}", other),
    }
}
