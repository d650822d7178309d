//! Integration tests for the SCOM verifier.
//!
//! Modules are written in assembly text so that each case reads as the
//! script a compiler could have produced.

use scom_assembler::assemble;
use scom_common::BytecodeImage;
use scom_verifier::{verify, VerifyError};

fn module(text: &str) -> BytecodeImage {
    assemble(text).unwrap_or_else(|err| panic!("assembly failed: {err}"))
}

fn errors(text: &str) -> Vec<VerifyError> {
    verify(&module(text)).unwrap_err()
}

// ========================================================
// Valid modules pass verification
// ========================================================

#[test]
fn accept_empty_module() {
    assert!(verify(&module("")).is_ok());
}

#[test]
fn accept_minimal_function() {
    assert!(verify(&module(".export f\nLITTOREG ax, 42\nRET\n")).is_ok());
}

#[test]
fn accept_loop() {
    let text = "\
.export Count$1
    LOADSPOFFS 8
    MEMREAD ax
top:
    SUB ax, 1
    JNZ top
    RET
";
    assert!(verify(&module(text)).is_ok());
}

#[test]
fn accept_code_ending_in_jump() {
    assert!(verify(&module("top:\nLINENUM 1\nJMP top\n")).is_ok());
}

#[test]
fn accept_stack_pointer_adjustment() {
    // ADD and SUB on sp are the sanctioned way to move the stack.
    let text = "\
.export f
    SUB sp, 8
    ADD sp, 8
    RET
";
    assert!(verify(&module(text)).is_ok());
}

#[test]
fn accept_references_of_every_kind() {
    let text = "\
.data 8
.ptr 0 4
.string name \"Ego\"
.import Display
.export f
f:
    LITTOREG mar, data:4
    LITTOREG ax, str:name
    LITTOREG bx, func:f
    LITTOREG cx, import:Display
    WRITELIT 4, data:0
    RET
";
    assert!(verify(&module(text)).is_ok());
}

#[test]
fn accept_managed_array_of_words() {
    assert!(verify(&module("NEWARRAY ax, 4, 1\nNEWARRAY bx, 12, 0\nRET\n")).is_ok());
}

// ========================================================
// Structural errors
// ========================================================

#[test]
fn reject_undecodable_word() {
    let errs = errors("LITTOREG ax, 1\n.word 500\nRET\n");
    assert_eq!(errs.len(), 1, "{errs:?}");
    assert!(matches!(errs[0], VerifyError::Undecodable { at: 3, .. }));
}

#[test]
fn reject_truncated_instruction() {
    // The operand words of the last instruction are missing.
    let errs = errors("RET\n.word 7\n");
    assert!(matches!(errs[0], VerifyError::Undecodable { at: 1, .. }), "{errs:?}");
}

#[test]
fn reject_register_out_of_range() {
    let errs = errors("PUSHREG 12\nRET\n");
    assert_eq!(
        errs,
        vec![VerifyError::InvalidRegister {
            at: 0,
            param: 1,
            word: 12
        }]
    );
}

#[test]
fn reject_reference_in_literal_slot() {
    let errs = errors(".data 4\nLITTOREG ax, 0\nSUB ax, data:0\nRET\n");
    assert_eq!(
        errs,
        vec![VerifyError::UnexpectedFixup {
            at: 3,
            param: 2,
            kind: "data"
        }]
    );
}

#[test]
fn reject_stack_pointer_write() {
    let errs = errors("LITTOREG sp, 0\nPOPREG sp\nRET\n");
    assert_eq!(
        errs,
        vec![
            VerifyError::StackPointerWrite { at: 0 },
            VerifyError::StackPointerWrite { at: 3 },
        ]
    );
}

#[test]
fn reject_function_reference_into_operand() {
    let errs = errors("LITTOREG bx, func:1\nRET\n");
    assert_eq!(errs, vec![VerifyError::MisalignedFunction { at: 0, target: 1 }]);
}

#[test]
fn reject_misaligned_export() {
    let errs = errors(".export f = 2\nLITTOREG ax, 0\nRET\n");
    assert_eq!(
        errs,
        vec![VerifyError::MisalignedExport {
            name: "f".to_string(),
            address: 2
        }]
    );
}

#[test]
fn data_exports_are_not_checked_against_code() {
    assert!(verify(&module(".data 8\n.export_data Score 5\nRET\n")).is_ok());
}

// ========================================================
// Literal ranges
// ========================================================

#[test]
fn reject_bad_write_size() {
    let errs = errors("WRITELIT 3, 0\nRET\n");
    assert_eq!(
        errs,
        vec![VerifyError::LiteralOutOfRange {
            at: 0,
            opcode: "WRITELIT",
            value: 3,
            allowed: "1, 2 or 4"
        }]
    );
}

#[test]
fn reject_too_many_external_args() {
    let errs = errors("NUMFUNCARGS 300\nSUBREALSTACK -1\nRET\n");
    assert_eq!(errs.len(), 2, "{errs:?}");
    assert!(errs
        .iter()
        .all(|e| matches!(e, VerifyError::LiteralOutOfRange { .. })));
}

#[test]
fn reject_negative_sizes() {
    let errs = errors("ZEROMEMORY -4\nLOADSPOFFS -8\nRET\n");
    assert_eq!(errs.iter().filter_map(VerifyError::at).collect::<Vec<_>>(), vec![0, 2]);
}

#[test]
fn reject_empty_bounds() {
    let errs = errors("CHECKBOUNDS ax, 0\nRET\n");
    assert!(matches!(
        errs[0],
        VerifyError::LiteralOutOfRange {
            opcode: "CHECKBOUNDS",
            value: 0,
            ..
        }
    ));
}

#[test]
fn reject_managed_array_with_wide_elements() {
    let errs = errors("NEWARRAY ax, 8, 1\nRET\n");
    assert!(matches!(
        errs[0],
        VerifyError::LiteralOutOfRange {
            opcode: "NEWARRAY",
            value: 8,
            ..
        }
    ));
}

#[test]
fn reject_oversized_object() {
    let errs = errors("NEWUSEROBJECT ax, -1\nRET\n");
    assert_eq!(errs.len(), 1, "{errs:?}");
}

// ========================================================
// Control flow
// ========================================================

#[test]
fn reject_jump_past_end() {
    let errs = errors("JZ 100\nRET\n");
    assert_eq!(errs, vec![VerifyError::BadJumpTarget { at: 0, target: 102 }]);
}

#[test]
fn reject_jump_before_start() {
    let errs = errors("JMP -10\n");
    assert_eq!(errs, vec![VerifyError::BadJumpTarget { at: 0, target: -8 }]);
}

#[test]
fn reject_jump_into_operand() {
    let errs = errors("JNZ 1\nLITTOREG ax, 0\nRET\n");
    assert_eq!(errs, vec![VerifyError::BadJumpTarget { at: 0, target: 3 }]);
}

#[test]
fn reject_fall_off_end() {
    let errs = errors(".export f\nLITTOREG ax, 1\n");
    assert_eq!(errs, vec![VerifyError::FallsOffEnd { at: 0 }]);
}

#[test]
fn conditional_jump_at_end_falls_off() {
    let errs = errors("top:\nJZ top\n");
    assert_eq!(errs, vec![VerifyError::FallsOffEnd { at: 0 }]);
}

// ========================================================
// Error collection
// ========================================================

#[test]
fn all_errors_collected_in_pass_order() {
    let errs = errors("PUSHREG 12\nWRITELIT 5, 0\n");
    assert_eq!(
        errs,
        vec![
            VerifyError::InvalidRegister {
                at: 0,
                param: 1,
                word: 12
            },
            VerifyError::LiteralOutOfRange {
                at: 2,
                opcode: "WRITELIT",
                value: 5,
                allowed: "1, 2 or 4"
            },
            VerifyError::FallsOffEnd { at: 2 },
        ]
    );
}

#[test]
fn undecodable_code_still_reports_earlier_problems() {
    let errs = errors("PUSHREG 9\nJMP 40\n.word 1234\n");
    assert_eq!(errs.len(), 2, "{errs:?}");
    assert_eq!(
        errs[0],
        VerifyError::InvalidRegister {
            at: 0,
            param: 1,
            word: 9
        }
    );
    assert!(matches!(errs[1], VerifyError::Undecodable { at: 4, .. }));
}

#[test]
fn verification_survives_binary_roundtrip() {
    let image = module("JZ 100\nRET\n");
    let decoded = BytecodeImage::decode(&image.encode()).unwrap();
    assert_eq!(verify(&image), verify(&decoded));
}
