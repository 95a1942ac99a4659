use crate::error::{ErrorKind, SymbolError};
use crate::test::hashmap;
use crate::{assemble, assemble_with, AssembleOptions};
use std::collections::HashMap;

#[test]
fn data_labels_get_aligned_addresses() {
    let image = assemble(
        ".data
b:  .byte 1
h:  .half 2
w:  .word 3
d:  .double 4.0
s:  .asciiz \"hi\"",
    )
    .unwrap();

    let expected: HashMap<String, i32> = hashmap![
        "b".to_string() => 0x1001_0000,
        "h".to_string() => 0x1001_0002,
        "w".to_string() => 0x1001_0004,
        "d".to_string() => 0x1001_0008,
        "s".to_string() => 0x1001_0010
    ];
    assert_eq!(image.symbols, expected);
    // byte 1, pad 1, half, word, double, "hi\0"
    assert_eq!(image.data.len(), 19);
}

#[test]
fn explicit_align_pads() {
    let image = assemble(".data\n.byte 1\n.align 3\nd: .word 5").unwrap();
    assert_eq!(image.symbols["d"], 0x1001_0008);
    assert_eq!(image.data.len(), 12);
}

#[test]
fn space_reserves_zeroed_bytes() {
    let image = assemble(".data\nbuf: .space 6\nnext: .byte 9").unwrap();
    assert_eq!(image.symbols["buf"], 0x1001_0000);
    assert_eq!(image.symbols["next"], 0x1001_0006);
    assert_eq!(&image.data[..6], &[0, 0, 0, 0, 0, 0]);
}

#[test]
fn org_moves_forward() {
    let image = assemble(".data\n.org 0x10010010\nv: .word 1").unwrap();
    assert_eq!(image.symbols["v"], 0x1001_0010);
    assert_eq!(image.data.len(), 20);
    assert_eq!(&image.data[16..], &[0, 0, 0, 1]);
}

#[test]
fn org_backward_is_an_error() {
    let err = assemble(".data\n.word 1, 2\n.org 0x10010000").unwrap_err();
    match err.kind {
        ErrorKind::Symbol(SymbolError::OrgBackward { .. }) => {}
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn duplicate_label_is_an_error() {
    let err = assemble("a: nop\na: nop").unwrap_err();
    match err.kind {
        ErrorKind::Symbol(SymbolError::DuplicateLabel { ref name }) => assert_eq!(name, "a"),
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn equates_resolve_in_dependency_order() {
    let image = assemble(".eqv SECOND, FIRST + 1\n.eqv FIRST, 41\nnop").unwrap();
    assert_eq!(image.symbols["FIRST"], 41);
    assert_eq!(image.symbols["SECOND"], 42);
}

#[test]
fn equate_of_label_address() {
    let image = assemble(".data\nbuf: .space 4\n.eqv BUF_END, buf + 4\n.text\nnop").unwrap();
    assert_eq!(image.symbols["BUF_END"], 0x1001_0004);
}

#[test]
fn equate_duplicate_is_an_error() {
    let err = assemble(".eqv A, 1\n.eqv A, 2\nnop").unwrap_err();
    match err.kind {
        ErrorKind::Symbol(SymbolError::DuplicateSymbol { ref name }) => assert_eq!(name, "A"),
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn label_equate_collision_is_an_error() {
    let err = assemble(".eqv a, 1\na: nop").unwrap_err();
    match err.kind {
        ErrorKind::Symbol(SymbolError::DuplicateSymbol { .. }) => {}
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn modules_qualify_names() {
    let image = assemble(
        ".module outer
.module inner
deep: nop
.endmodule
shallow: nop
.endmodule
top: nop",
    )
    .unwrap();
    assert_eq!(image.symbols["outer::inner::deep"], 0x0040_0000);
    assert_eq!(image.symbols["outer::shallow"], 0x0040_0004);
    assert_eq!(image.symbols["top"], 0x0040_0008);
}

#[test]
fn qualified_lookup_wins_over_bare() {
    // Both `x` and `m::x` exist; the branch inside the module must bind to
    // the qualified one.
    let image = assemble(
        "x: nop
.module m
x: nop
b: beq $zero, $zero, x
.endmodule",
    )
    .unwrap();
    assert_eq!(image.symbols["x"], 0x0040_0000);
    assert_eq!(image.symbols["m::x"], 0x0040_0004);
    // beq at 0x00400008 targeting m::x at 0x00400004: offset -2.
    assert_eq!(image.text[2], 0x1000_fffe);
}

#[test]
fn module_mismatch_is_an_error() {
    assert!(assemble(".endmodule").is_err());
    assert!(assemble(".module m\nnop").is_err());
}

#[test]
fn extern_symbols_are_undefined_with_value_zero() {
    let image = assemble(".extern handler\nj handler").unwrap();
    assert_eq!(image.extern_symbols, vec!["handler".to_string()]);
    assert_eq!(image.undefined_symbols, vec!["handler".to_string()]);
    // Encoded against address zero; the relocation carries the symbol.
    assert_eq!(image.text[0], 0x0800_0000);
    assert_eq!(image.relocations.len(), 1);
    assert_eq!(image.relocations[0].symbol, "handler");
}

#[test]
fn globl_without_definition_stays_undefined() {
    let image = assemble(".globl missing\nnop").unwrap();
    assert_eq!(image.undefined_symbols, vec!["missing".to_string()]);
}

#[test]
fn undefined_reference_is_fatal() {
    let err = assemble("j nowhere").unwrap_err();
    match err.kind {
        ErrorKind::Symbol(SymbolError::Undefined { ref name }) => assert_eq!(name, "nowhere"),
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn circular_equates_are_detected() {
    let err = assemble(".eqv A, B\n.eqv B, A\nnop").unwrap_err();
    match err.kind {
        ErrorKind::Symbol(SymbolError::CircularEqv { .. }) => {}
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn negative_space_is_rejected() {
    let err = assemble(".data\n.space 0-4").unwrap_err();
    match err.kind {
        ErrorKind::Symbol(SymbolError::InvalidSize { .. }) => {}
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn pass_one_is_deterministic() {
    let source = ".data\nv: .word 1, 2, 3\n.text\nmain: la $t0, v\nlw $t1, v\nsyscall";
    let first = assemble(source).unwrap();
    let second = assemble(source).unwrap();
    assert_eq!(first.symbols, second.symbols);
    assert_eq!(first.text, second.text);
    assert_eq!(first.data, second.data);
}

#[test]
fn instructions_in_data_segment_are_rejected() {
    let err = assemble(".data\nadd $t0, $t1, $t2").unwrap_err();
    match err.kind {
        ErrorKind::Symbol(SymbolError::InstructionWrongSegment { .. }) => {}
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn ktext_and_kdata_have_kernel_bases() {
    let image = assemble(
        ".kdata
kd: .word 1
.ktext
kh: nop",
    )
    .unwrap();
    assert_eq!(image.symbols["kd"] as u32, 0x9000_0000);
    assert_eq!(image.symbols["kh"] as u32, 0x8000_0000);
    assert_eq!(image.ktext, vec![0x0000_0000]);
    assert_eq!(image.kdata_words, vec![1]);
}

#[test]
fn options_default_to_pseudo_and_delay_enabled() {
    let options = AssembleOptions::default();
    assert!(options.enable_pseudo_instructions);
    assert!(options.delayed_branching_enabled);
    let image = assemble_with("nop", &options).unwrap();
    assert_eq!(image.text, vec![0]);
}
